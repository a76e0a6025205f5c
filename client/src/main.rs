use std::{fs, path::PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use feedback_client::{
    ChannelConfig, Credential, Environment, FeedbackError, FeedbackReader, FeedbackRecord,
    Identity,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "apns-feedback")]
#[command(about = "Read unreachable device tokens from the APNs feedback service")]
struct Args {
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// PKCS#12 bundle holding the push certificate and key
    #[arg(long, conflicts_with_all = ["cert", "key"], required_unless_present = "cert")]
    pkcs12: Option<PathBuf>,

    /// Passphrase for the PKCS#12 bundle
    #[arg(long, env = "APNS_FEEDBACK_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// PEM certificate chain (used with --key)
    #[arg(long, requires = "key")]
    cert: Option<PathBuf>,

    /// PEM private key (used with --cert)
    #[arg(long, requires = "cert")]
    key: Option<PathBuf>,

    /// Feedback service to query
    #[arg(short, long, default_value = "sandbox")]
    environment: Environment,

    /// Stop after this many records, 0 reads everything
    #[arg(short, long, default_value_t = 0)]
    max: usize,

    /// Print records as JSON lines
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Setup logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let credential = load_credential(&args)?;
    let config = ChannelConfig::from_env().context("Invalid feedback configuration")?;

    let mut reader = FeedbackReader::with_config(config)
        .context("Failed to set up TLS for the feedback service")?;
    reader
        .connect(&credential, args.environment)
        .with_context(|| format!("Failed to connect to {} feedback service", args.environment))?;

    let outcome = reader.for_each_record(args.max, |record| print_record(&record, args.json));
    reader.disconnect();

    match outcome {
        Ok(count) => {
            info!("Read {} feedback record(s)", count);
            Ok(())
        }
        Err(e @ FeedbackError::Read { .. }) => {
            warn!("Feedback stream failed; records printed so far are valid");
            Err(e).context("Feedback read failed")
        }
        Err(e) => Err(e.into()),
    }
}

fn load_credential(args: &Args) -> Result<Credential> {
    if let Some(path) = &args.pkcs12 {
        let data = fs::read(path)
            .with_context(|| format!("Failed to read PKCS#12 bundle from {path:?}"))?;
        return Ok(Credential::pkcs12(data, args.password.as_deref()));
    }

    match (&args.cert, &args.key) {
        (Some(cert), Some(key)) => {
            let identity = Identity::from_pem_files(cert, key)
                .with_context(|| format!("Failed to load identity from {cert:?} and {key:?}"))?;
            Ok(Credential::Identity(identity))
        }
        _ => Err(anyhow!("Either --pkcs12 or both --cert and --key are required")),
    }
}

fn print_record(record: &FeedbackRecord, json: bool) {
    if json {
        match serde_json::to_string(record) {
            Ok(line) => println!("{line}"),
            Err(e) => warn!("Failed to serialize record: {}", e),
        }
    } else {
        println!("{}\t{}", record.timestamp(), record.token());
    }
}
