use std::io;

use feedback_common::ConnectError;

use crate::record::FeedbackRecord;

/// Errors returned by [`FeedbackReader`](crate::FeedbackReader)
#[derive(Debug, thiserror::Error)]
pub enum FeedbackError {
    /// Credential, TCP or TLS failure while connecting
    #[error("failed to connect to feedback service: {0}")]
    Connection(#[from] ConnectError),

    /// A read was attempted without an active connection
    #[error("not connected to feedback service")]
    NotConnected,

    /// The stream failed mid-read
    ///
    /// `records` holds what was decoded by this call before the failure.
    #[error("failed to read from feedback service after {} record(s): {source}", .records.len())]
    Read {
        records: Vec<FeedbackRecord>,
        #[source]
        source:  io::Error,
    },
}

impl FeedbackError {
    /// Records decoded before a read failure; empty for other errors
    pub fn partial_records(&self) -> &[FeedbackRecord] {
        match self {
            FeedbackError::Read { records, .. } => records,
            _ => &[],
        }
    }

    /// Takes ownership of the records decoded before a read failure
    pub fn into_partial_records(self) -> Vec<FeedbackRecord> {
        match self {
            FeedbackError::Read { records, .. } => records,
            _ => Vec::new(),
        }
    }
}

pub type Result<T, E = FeedbackError> = std::result::Result<T, E>;
