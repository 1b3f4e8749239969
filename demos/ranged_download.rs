//! Example: Parallel Ranged Download
//!
//! Downloads a URL with concurrent byte-range sub-requests, printing progress
//! as chunks land. Servers without range support fall back to a single GET
//! transparently.
//!
//! # Usage
//!
//! ```bash
//! # Download into a file
//! cargo run --example ranged_download -- https://example.com/large.bin large.bin
//!
//! # Download into memory and print a summary
//! cargo run --example ranged_download -- https://example.com/large.bin
//! ```
//!
//! Set `RUST_LOG=rangefetch=debug` to watch the probe and worker dispatch.

use std::env;
use std::time::Duration;

use rangefetch::{FetchRequest, RangeTripper, RetryClient};
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        eprintln!("Usage: ranged_download <url> [output-file]");
        eprintln!();
        eprintln!("Examples:");
        eprintln!("  ranged_download https://example.com/large.bin large.bin");
        eprintln!("  ranged_download https://example.com/large.bin");
        std::process::exit(1);
    }

    let url = &args[1];
    let output = args.get(2);

    let mut tripper = RangeTripper::new(8);
    tripper.set_client(RetryClient::new(
        3,
        Duration::from_millis(250),
        Duration::from_secs(30),
    )?);

    let (tx, mut rx) = mpsc::channel(32);
    let reporter = tokio::spawn(async move {
        let total = rx.recv().await.unwrap_or(0);
        let mut received = 0u64;
        while let Some(bytes) = rx.recv().await {
            received += bytes;
            if total > 0 {
                println!("  {received}/{total} bytes ({:.1}%)", received as f64 / total as f64 * 100.0);
            } else {
                println!("  {received} bytes");
            }
        }
        received
    });

    let mut request = FetchRequest::get(url)?.progress(tx);
    if let Some(path) = output {
        request = request.output_file(path);
    }

    println!("Downloading {url}");
    let response = tripper.round_trip(request).await?;
    let received = reporter.await?;

    println!();
    println!("=== Download Complete ===");
    println!("  Status: {}", response.status());
    println!("  Bytes received: {received}");
    match output {
        Some(path) => println!("  Written to: {path}"),
        None => println!("  In-memory body: {} bytes", response.body().len()),
    }

    Ok(())
}
