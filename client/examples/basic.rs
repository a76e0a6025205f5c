use std::{env, fs, time::Duration};

use anyhow::{Context, Result};
use feedback_client::{
    connect_with_pkcs12, ChannelConfig, Environment, FeedbackError, FeedbackReader, Identity,
};

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    println!("=== APNs Feedback Basic Example ===");

    let Ok(p12_path) = env::var("APNS_P12") else {
        println!("Set APNS_P12 (and optionally APNS_P12_PASSWORD) to run this example.");
        return Ok(());
    };
    let password = env::var("APNS_P12_PASSWORD").ok();
    let data = fs::read(&p12_path).with_context(|| format!("Failed to read {p12_path}"))?;

    // Example 1: One-shot connect and read everything
    println!("\n1. Reading all feedback from the sandbox:");
    example_read_all(&data, password.as_deref())?;

    // Example 2: Reusable reader with custom settings, reading in batches
    println!("\n2. Reading in batches with a custom configuration:");
    example_batches(&data, password.as_deref())?;

    println!("\n✓ All examples completed successfully!");
    Ok(())
}

fn example_read_all(data: &[u8], password: Option<&str>) -> Result<()> {
    let mut reader = connect_with_pkcs12(data, password, Environment::Sandbox)?;

    let records = reader.read_records(0)?;
    println!("Received {} record(s)", records.len());
    for record in &records {
        println!("  {} failed at {:?}", record.token(), record.date());
    }

    reader.disconnect();
    Ok(())
}

fn example_batches(data: &[u8], password: Option<&str>) -> Result<()> {
    let config = ChannelConfig::new()
        .with_connect_timeout(Duration::from_secs(10))
        .with_read_timeout(Some(Duration::from_secs(30)));

    let identity = Identity::from_pkcs12(data, password)?;
    println!("Using certificate {}", identity.fingerprint());

    let mut reader = FeedbackReader::with_config(config)?;
    reader.connect_with_identity(identity, Environment::Sandbox)?;

    while reader.is_connected() {
        match reader.read_records(10) {
            Ok(batch) => println!("Batch of {} record(s)", batch.len()),
            Err(FeedbackError::Read { records, source }) => {
                println!("Stream failed after {} record(s): {source}", records.len());
                break;
            }
            Err(e) => return Err(e.into()),
        }
    }

    reader.disconnect();
    println!("✓ Batch example completed");
    Ok(())
}
