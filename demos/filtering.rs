//! Example demonstrating response filtering.
//!
//! This example shows how to:
//! - Project responses with jq-style expressions
//! - Compile a `--fields` list into a projection
//! - Use regex builtins and `@format` strings
//! - Handle invalid expressions and runtime errors
//! - Print the same response in every output mode
//!
//! Run with: `cargo run --example filtering`

use instantly::filter::{self, effective_expression};
use instantly::output::{OutputMode, Printer};
use instantly::Error;
use serde_json::json;

fn main() -> Result<(), Error> {
    // Initialize tracing for logging
    tracing_subscriber::fmt()
        .with_env_filter("instantly=debug,filtering=info")
        .init();

    let response = json!({
        "items": [
            {"id": "l-1", "email": "ada@example.com", "company": {"name": "Analytical"}, "opens": 3},
            {"id": "l-2", "email": "grace@navy.mil", "company": {"name": "Navy"}, "opens": 0},
            {"id": "l-3", "email": "alan@example.com", "company": null, "opens": 7},
        ],
        "next_starting_after": "l-3",
    });

    println!("=== Expression Example ===");
    let opened = filter::apply(response.clone(), "[.items[] | select(.opens > 0) | .id]")?;
    println!("Opened: {opened}");
    let total = filter::apply(response.clone(), "[.items[].opens] | add")?;
    println!("Total opens: {total}");
    println!();

    println!("=== Fields Example ===");
    let expression = effective_expression("", "id, company.name")?;
    let projected = filter::apply(response.clone(), &expression)?;
    println!("{projected:#}");
    println!();

    println!("=== Regex And Format Example ===");
    let domains = filter::apply(
        response.clone(),
        r#"[.items[].email | select(test("example\\.com$")) | sub("@.*"; "")]"#,
    )?;
    println!("Example.com users: {domains}");
    let rows = filter::apply(response.clone(), r#".items[] | [.id, .email, .opens] | @tsv"#)?;
    println!("TSV rows: {rows}");
    println!();

    println!("=== Error Handling Example ===");
    match filter::apply(response.clone(), ".items[") {
        Ok(value) => println!("Unexpected success: {value}"),
        Err(Error::InvalidExpression(message)) => println!("Invalid expression: {message}"),
        Err(e) => println!("Other error: {e}"),
    }
    match filter::apply(response.clone(), ".items | keys | .[0] | ascii_downcase") {
        Ok(value) => println!("Unexpected success: {value}"),
        Err(Error::FilterRuntime(message)) => println!("Runtime error: {message}"),
        Err(e) => println!("Other error: {e}"),
    }
    println!();

    println!("=== Output Modes Example ===");
    let mut stdout = std::io::stdout();
    for mode in [OutputMode::Json, OutputMode::Jsonl, OutputMode::Agent, OutputMode::Text] {
        println!("--- {} ---", mode.as_str());
        let printer = Printer::new(mode, "");
        printer.print_result(&mut stdout, "leads.list", response.clone(), None)?;
    }

    Ok(())
}
