//! Example demonstrating dry-run requests and agent envelopes.
//!
//! This example shows how to:
//! - Build a request policy with dry-run enabled
//! - Describe GET, POST and DELETE requests without touching the network
//! - Wrap a response in an agent envelope with request metadata
//! - Print the envelope through a filtered printer
//!
//! Run with: `cargo run --example dry_run`

use instantly::envelope::{self, kind_from_command_path};
use instantly::metadata::Query;
use instantly::output::{OutputMode, Printer};
use instantly::{Client, Error, RequestPolicy};
use serde_json::json;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<(), Error> {
    // Initialize tracing for logging
    tracing_subscriber::fmt()
        .with_env_filter("instantly=debug,dry_run=info")
        .init();

    // Dry-run clients never send, so no API key is needed
    let policy = RequestPolicy::builder()
        .dry_run(true)
        .max_5xx_retries(2)
        .retry_delay(Duration::from_millis(500))
        .build();
    let client = Client::new(&policy)?;
    let cancel = CancellationToken::new();

    println!("=== GET Request Example ===");
    let mut query = Query::new();
    query.insert("limit".to_string(), vec!["10".to_string()]);
    query.insert("status".to_string(), vec!["1".to_string()]);
    let response = client.get_json("/campaigns", Some(query), &cancel).await?;

    println!("Dry run: {}", response.is_dry_run());
    println!("Attempts: {}", response.attempts);
    println!("URL: {}", response.meta.url());
    println!("{:#}", response.data);
    println!();

    println!("=== POST Request Example ===");
    let lead = json!({
        "email": "ada@example.com",
        "first_name": "Ada",
        "campaign": "c-123",
    });
    let response = client.post_json("/leads", None, Some(&lead), &cancel).await?;
    println!("{:#}", response.data);
    println!();

    println!("=== DELETE With Body Example ===");
    let response = client
        .delete_json_with_body("/leads", None, Some(&json!({"ids": ["l-1", "l-2"]})), &cancel)
        .await?;
    println!("{:#}", response.data);
    println!();

    println!("=== Agent Envelope Example ===");
    let kind = kind_from_command_path("instantly leads delete");
    let meta = envelope::meta_from(Some(&response.meta), Some(&response.data));
    let printer = Printer::new(OutputMode::Agent, "{kind, method: .data.request.method}");
    printer.print_result(&mut std::io::stdout(), &kind, response.data, meta)?;

    Ok(())
}
