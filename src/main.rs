#[tokio::main]
async fn main() {
    let code = instantly::cli::run().await;
    std::process::exit(code);
}
