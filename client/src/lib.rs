//! APNs Feedback Client Library
//!
//! Connects to Apple's feedback service with a push certificate and reads the
//! device tokens that could not be delivered to, each with the time of the
//! failed delivery. Once a token has been read the service will not report it
//! again until another delivery fails, so callers should act on every record
//! they receive.
//!
//! # Example
//!
//! ```no_run
//! use feedback_client::{FeedbackReader, Environment};
//!
//! # fn main() -> anyhow::Result<()> {
//! let pkcs12 = std::fs::read("push.p12")?;
//!
//! let mut reader = FeedbackReader::new()?;
//! reader.connect_with_pkcs12(&pkcs12, Some("secret"), Environment::Sandbox)?;
//!
//! for record in reader.read_records(0)? {
//!     println!("{} {}", record.timestamp(), record.token());
//! }
//!
//! reader.disconnect();
//! # Ok(())
//! # }
//! ```

mod decoder;
mod error;
mod reader;
mod record;

pub use decoder::RecordDecoder;
pub use error::{FeedbackError, Result};
pub use reader::{connect_with_identity, connect_with_pkcs12, FeedbackReader};
pub use record::{FeedbackRecord, HEADER_LEN};
// Re-export important types from feedback-common for convenience
pub use feedback_common::{
    ChannelConfig, ConnectError, Connector, Credential, CredentialError, Endpoint, Environment,
    Identity, SecureChannel, ShutdownHandle, TlsConnector,
};
