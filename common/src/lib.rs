//! APNs Feedback Common Library
//!
//! The pieces the feedback reader consumes but does not own:
//!
//! - Environment and endpoint configuration
//! - Client identities (PEM files or PKCS#12 bundles)
//! - A blocking TLS stream over TCP
//! - The [`SecureChannel`] / [`Connector`] seam the reader is written against
//!
//! # Features
//!
//! - **Mutual TLS**: client certificate authentication with rustls
//! - **PKCS#12 import**: the bundle format Apple hands out for push certificates
//! - **Explicit initialisation**: [`init`] installs the crypto provider once

/// Environments, endpoints and channel settings
pub mod config;

/// Identity material and the credential variants accepted at connect time
pub mod credential;

/// TLS stream wrapper for blocking sockets
pub mod tls_stream;

/// Secure channel abstraction and its rustls implementation
pub mod channel;

#[cfg(test)]
mod testing;

// Re-export commonly used types for convenience
pub use channel::{
    init, ConnectError, Connector, SecureChannel, ShutdownHandle, TlsChannel, TlsConnector,
};
pub use config::{ChannelConfig, ConfigError, Endpoint, Environment};
pub use credential::{Credential, CredentialError, Identity};
pub use tls_stream::TlsStream;
