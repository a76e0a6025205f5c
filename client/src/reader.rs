use std::{io, mem};

use feedback_common::{
    ChannelConfig, ConnectError, Connector, Credential, Environment, Identity, SecureChannel,
    ShutdownHandle, TlsConnector,
};

use crate::{
    decoder::RecordDecoder,
    error::{FeedbackError, Result},
    record::FeedbackRecord,
};

/// Upper bound on a single channel read
const READ_CHUNK_SIZE: usize = 4096;

enum ConnectionState {
    Disconnected,
    Connected(Box<dyn SecureChannel>),
}

/// Reads unreachable device tokens from the feedback service
///
/// One reader owns at most one connection. Reads block; the service closes the
/// stream once everything queued for the certificate has been sent, after
/// which the reader is disconnected again.
pub struct FeedbackReader<C: Connector = TlsConnector> {
    connector: C,
    state:     ConnectionState,
    decoder:   RecordDecoder,
}

impl FeedbackReader<TlsConnector> {
    /// Creates a disconnected reader with the default channel settings
    pub fn new() -> Result<Self> {
        Self::with_config(ChannelConfig::default())
    }

    /// Creates a disconnected reader that dials with `config`
    pub fn with_config(config: ChannelConfig) -> Result<Self> {
        let connector = TlsConnector::new(config)?;
        Ok(Self::with_connector(connector))
    }
}

impl<C: Connector> FeedbackReader<C> {
    /// Creates a disconnected reader on top of any channel connector
    pub fn with_connector(connector: C) -> Self {
        Self {
            connector,
            state: ConnectionState::Disconnected,
            decoder: RecordDecoder::new(),
        }
    }

    /// The connector used to open channels
    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Check if the reader holds a live channel
    pub fn is_connected(&self) -> bool {
        matches!(self.state, ConnectionState::Connected(_))
    }

    /// Connect to the feedback service of `environment`
    ///
    /// An existing connection is closed first. On failure the reader stays
    /// disconnected.
    pub fn connect(&mut self, credential: &Credential, environment: Environment) -> Result<()> {
        if self.is_connected() {
            tracing::debug!("Dropping existing feedback connection before reconnecting");
            self.disconnect();
        }

        let identity = credential.resolve().map_err(ConnectError::from)?;
        let endpoint = self.connector.resolve(environment);

        tracing::info!(
            "Connecting to {} feedback service at {} (certificate {})",
            environment,
            endpoint,
            identity.fingerprint()
        );

        let channel = self.connector.connect(&endpoint, &identity)?;
        self.decoder.clear();
        self.state = ConnectionState::Connected(channel);
        Ok(())
    }

    /// Connect presenting an already loaded identity
    pub fn connect_with_identity(
        &mut self,
        identity: Identity,
        environment: Environment,
    ) -> Result<()> {
        self.connect(&Credential::Identity(identity), environment)
    }

    /// Connect presenting the identity inside a PKCS#12 bundle
    pub fn connect_with_pkcs12(
        &mut self,
        data: &[u8],
        password: Option<&str>,
        environment: Environment,
    ) -> Result<()> {
        self.connect(&Credential::pkcs12(data, password), environment)
    }

    /// Disconnect from the feedback service
    ///
    /// Safe to call at any time; close failures are only logged.
    pub fn disconnect(&mut self) {
        if let ConnectionState::Connected(mut channel) =
            mem::replace(&mut self.state, ConnectionState::Disconnected)
        {
            tracing::info!("Disconnecting from feedback service");
            channel.close();
        }
        self.decoder.clear();
    }

    /// Handle that closes the transport from another thread
    ///
    /// Shutting it down makes a blocked read fail with
    /// [`FeedbackError::Read`] (`ErrorKind::ConnectionAborted`), never a clean
    /// end of stream. The reader stays connected until [`disconnect`](Self::disconnect).
    pub fn shutdown_handle(&self) -> Option<ShutdownHandle> {
        match &self.state {
            ConnectionState::Connected(channel) => channel.shutdown_handle(),
            ConnectionState::Disconnected => None,
        }
    }

    /// Read up to `max_records` records, 0 meaning until end-of-stream
    ///
    /// On an I/O failure the records decoded before it are returned inside
    /// [`FeedbackError::Read`].
    pub fn read_records(&mut self, max_records: usize) -> Result<Vec<FeedbackRecord>> {
        let mut records = Vec::new();
        let result = self.for_each_record(max_records, |record| records.push(record));

        match result {
            Ok(_) => Ok(records),
            Err(FeedbackError::Read { source, .. }) => {
                Err(FeedbackError::Read { records, source })
            }
            Err(e) => Err(e),
        }
    }

    /// Decode records and hand each to `on_record` as soon as it is complete
    ///
    /// Returns how many records were handed over. Records delivered before an
    /// I/O failure have already reached the callback, so the `Read` error
    /// returned here carries none.
    pub fn for_each_record<F>(&mut self, max_records: usize, mut on_record: F) -> Result<usize>
    where
        F: FnMut(FeedbackRecord),
    {
        if !self.is_connected() {
            return Err(FeedbackError::NotConnected);
        }

        let limit_reached = |emitted: usize| max_records != 0 && emitted >= max_records;
        let mut emitted = 0;
        let mut chunk = [0u8; READ_CHUNK_SIZE];

        loop {
            // Drain whatever is already buffered before touching the channel
            while !limit_reached(emitted) {
                match self.decoder.next_record() {
                    Some(record) => {
                        on_record(record);
                        emitted += 1;
                    }
                    None => break,
                }
            }
            if limit_reached(emitted) {
                tracing::debug!("Record limit {} reached", max_records);
                return Ok(emitted);
            }

            let ConnectionState::Connected(channel) = &mut self.state else {
                return Err(FeedbackError::NotConnected);
            };

            match channel.read_available(&mut chunk) {
                Ok(0) => {
                    if self.decoder.has_partial() {
                        tracing::warn!(
                            "Feedback stream ended mid-record, dropping {} trailing byte(s)",
                            self.decoder.buffered()
                        );
                    }
                    tracing::info!("Feedback stream complete after {} record(s)", emitted);
                    self.disconnect();
                    return Ok(emitted);
                }
                Ok(n) => {
                    self.decoder.extend(&chunk[..n]);
                    tracing::debug!("Read {} bytes ({} buffered)", n, self.decoder.buffered());
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(source) => {
                    tracing::error!("Feedback read failed after {} record(s): {}", emitted, source);
                    return Err(FeedbackError::Read {
                        records: Vec::new(),
                        source,
                    });
                }
            }
        }
    }
}

impl<C: Connector> Drop for FeedbackReader<C> {
    fn drop(&mut self) {
        if self.is_connected() {
            self.disconnect();
        }
    }
}

/// Create a reader and connect it with an already loaded identity
pub fn connect_with_identity(
    identity: Identity,
    environment: Environment,
) -> Result<FeedbackReader> {
    let mut reader = FeedbackReader::<TlsConnector>::new()?;
    reader.connect_with_identity(identity, environment)?;
    Ok(reader)
}

/// Create a reader and connect it with a PKCS#12 bundle
pub fn connect_with_pkcs12(
    data: &[u8],
    password: Option<&str>,
    environment: Environment,
) -> Result<FeedbackReader> {
    let mut reader = FeedbackReader::<TlsConnector>::new()?;
    reader.connect_with_pkcs12(data, password, environment)?;
    Ok(reader)
}
