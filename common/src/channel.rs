use std::{
    fs,
    io::{self, BufReader},
    net::{Shutdown, TcpStream, ToSocketAddrs},
    path::Path,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Once,
    },
};

use rustls::{
    pki_types::ServerName, ClientConfig as RustlsClientConfig, ClientConnection, RootCertStore,
};
use rustls_pemfile::certs;

use crate::{
    config::{ChannelConfig, Endpoint, Environment},
    credential::{CredentialError, Identity},
    tls_stream::TlsStream,
};

static CRYPTO_PROVIDER: Once = Once::new();

/// Installs the process-wide rustls crypto provider
///
/// Safe to call repeatedly; only the first call does anything. A provider
/// installed earlier by the host application is left in place.
pub fn init() {
    CRYPTO_PROVIDER.call_once(|| {
        if rustls::crypto::aws_lc_rs::default_provider()
            .install_default()
            .is_err()
        {
            tracing::debug!("rustls crypto provider already installed");
        }
    });
}

/// Errors raised while establishing a secure channel
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("invalid credential: {0}")]
    Credential(#[from] CredentialError),
    #[error("invalid server name '{0}'")]
    InvalidServerName(String),
    #[error("failed to load CA bundle {path}: {source}")]
    CaFile {
        path:   String,
        #[source]
        source: io::Error,
    },
    #[error("no trusted root certificates found in {0}")]
    NoRootCertificates(String),
    #[error("failed to build TLS client configuration: {0}")]
    TlsConfig(#[source] rustls::Error),
    #[error("failed to resolve {endpoint}: {source}")]
    Resolve {
        endpoint: Endpoint,
        #[source]
        source:   io::Error,
    },
    #[error("failed to connect to {endpoint}: {source}")]
    Tcp {
        endpoint: Endpoint,
        #[source]
        source:   io::Error,
    },
    #[error("TLS handshake with {endpoint} failed: {source}")]
    Handshake {
        endpoint: Endpoint,
        #[source]
        source:   io::Error,
    },
}

/// Handle that can tear down a channel's transport from another thread
///
/// Shutting down unblocks a read in progress on the owning reader, which then
/// fails with `ErrorKind::ConnectionAborted` rather than ending cleanly.
#[derive(Debug)]
pub struct ShutdownHandle {
    aborted: Arc<AtomicBool>,
    socket:  Option<TcpStream>,
}

impl ShutdownHandle {
    /// Handle raising the channel's `aborted` flag
    pub fn new(aborted: Arc<AtomicBool>) -> Self {
        Self {
            aborted,
            socket: None,
        }
    }

    /// Also shut down `socket`, a clone of the channel's transport
    pub fn with_socket(mut self, socket: TcpStream) -> Self {
        self.socket = Some(socket);
        self
    }

    /// Mark the channel aborted and shut down both directions of the transport
    pub fn shutdown(&self) {
        self.aborted.store(true, Ordering::SeqCst);
        if let Some(socket) = &self.socket {
            if let Err(e) = socket.shutdown(Shutdown::Both) {
                tracing::debug!("Socket shutdown failed: {}", e);
            }
        }
    }

    /// Whether [`shutdown`](Self::shutdown) has been called
    pub fn is_shutdown(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }
}

/// An authenticated, encrypted byte stream to the feedback service
pub trait SecureChannel: Send {
    /// Blocking read of up to `buf.len()` bytes
    ///
    /// Returns `Ok(0)` only on clean end-of-stream.
    fn read_available(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Close the channel. Idempotent and never fails.
    fn close(&mut self);

    /// Handle for closing the transport from elsewhere, if supported
    fn shutdown_handle(&self) -> Option<ShutdownHandle> {
        None
    }
}

/// Opens secure channels
pub trait Connector {
    /// Endpoint to dial for an environment
    fn resolve(&self, environment: Environment) -> Endpoint {
        environment.default_endpoint()
    }

    /// Connect to `endpoint` presenting `identity` as the client certificate
    fn connect(
        &self,
        endpoint: &Endpoint,
        identity: &Identity,
    ) -> Result<Box<dyn SecureChannel>, ConnectError>;
}

/// rustls over TCP
pub struct TlsConnector {
    config: ChannelConfig,
    roots:  Arc<RootCertStore>,
}

impl TlsConnector {
    /// Creates a connector, loading trusted roots once
    pub fn new(config: ChannelConfig) -> Result<Self, ConnectError> {
        init();
        let roots = match &config.ca_path {
            Some(path) => load_ca_file(path)?,
            None => load_native_roots()?,
        };
        Ok(Self {
            config,
            roots: Arc::new(roots),
        })
    }

    fn tls_config(&self, identity: &Identity) -> Result<Arc<RustlsClientConfig>, ConnectError> {
        let (chain, key) = identity.to_client_auth();
        let config = RustlsClientConfig::builder()
            .with_root_certificates(self.roots.clone())
            .with_client_auth_cert(chain, key)
            .map_err(ConnectError::TlsConfig)?;
        Ok(Arc::new(config))
    }

    fn open_socket(&self, endpoint: &Endpoint) -> Result<TcpStream, ConnectError> {
        let addrs = (endpoint.host.as_str(), endpoint.port)
            .to_socket_addrs()
            .map_err(|source| ConnectError::Resolve {
                endpoint: endpoint.clone(),
                source,
            })?;

        let mut last_err = io::Error::new(io::ErrorKind::NotFound, "no addresses resolved");
        for addr in addrs {
            tracing::debug!("Trying {} ({})", endpoint, addr);
            match TcpStream::connect_timeout(&addr, self.config.connect_timeout) {
                Ok(socket) => return Ok(socket),
                Err(e) => last_err = e,
            }
        }

        Err(ConnectError::Tcp {
            endpoint: endpoint.clone(),
            source:   last_err,
        })
    }
}

impl Connector for TlsConnector {
    fn resolve(&self, environment: Environment) -> Endpoint {
        self.config.endpoint(environment)
    }

    fn connect(
        &self,
        endpoint: &Endpoint,
        identity: &Identity,
    ) -> Result<Box<dyn SecureChannel>, ConnectError> {
        let server_name = ServerName::try_from(endpoint.host.clone())
            .map_err(|_| ConnectError::InvalidServerName(endpoint.host.clone()))?;
        let tls_config = self.tls_config(identity)?;

        let socket = self.open_socket(endpoint)?;
        let io_err = |source: io::Error| ConnectError::Tcp {
            endpoint: endpoint.clone(),
            source,
        };
        socket
            .set_read_timeout(self.config.read_timeout)
            .map_err(io_err)?;
        socket.set_nodelay(true).map_err(io_err)?;

        tracing::debug!("Socket connected to {}, establishing TLS...", endpoint);

        let client_conn = ClientConnection::new(tls_config, server_name)
            .map_err(ConnectError::TlsConfig)?;
        let stream = TlsStream::connect(socket, client_conn).map_err(|source| {
            ConnectError::Handshake {
                endpoint: endpoint.clone(),
                source,
            }
        })?;

        tracing::info!("✓ Secure connection established with {}", endpoint);

        Ok(Box::new(TlsChannel::new(stream)))
    }
}

/// Channel backed by a [`TlsStream`] over TCP
pub struct TlsChannel {
    stream:  Option<TlsStream<TcpStream>>,
    aborted: Arc<AtomicBool>,
}

impl TlsChannel {
    /// Wraps an established stream
    pub fn new(stream: TlsStream<TcpStream>) -> Self {
        Self {
            stream:  Some(stream),
            aborted: Arc::new(AtomicBool::new(false)),
        }
    }

    fn aborted_error() -> io::Error {
        io::Error::new(io::ErrorKind::ConnectionAborted, "channel shut down")
    }
}

impl SecureChannel for TlsChannel {
    fn read_available(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.aborted.load(Ordering::SeqCst) {
            return Err(Self::aborted_error());
        }
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "channel closed"))?;

        let result = io::Read::read(stream, buf);

        // A shutdown from another thread ends the read however the socket
        // reports it, and must never look like the end of the feed.
        if self.aborted.load(Ordering::SeqCst) {
            return Err(Self::aborted_error());
        }

        match result {
            // The feedback service drops the TCP connection once everything
            // has been sent, frequently without a close_notify.
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                tracing::debug!("Peer closed without close_notify");
                Ok(0)
            }
            other => other,
        }
    }

    fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.close() {
                tracing::debug!("close_notify not delivered: {}", e);
            }
            if let Err(e) = stream.get_ref().shutdown(Shutdown::Both) {
                tracing::debug!("Socket shutdown failed: {}", e);
            }
        }
    }

    fn shutdown_handle(&self) -> Option<ShutdownHandle> {
        let stream = self.stream.as_ref()?;
        match stream.get_ref().try_clone() {
            Ok(socket) => Some(ShutdownHandle::new(self.aborted.clone()).with_socket(socket)),
            Err(e) => {
                tracing::warn!("Could not clone socket for shutdown handle: {}", e);
                None
            }
        }
    }
}

impl Drop for TlsChannel {
    fn drop(&mut self) {
        self.close();
    }
}

fn load_ca_file(path: &Path) -> Result<RootCertStore, ConnectError> {
    let ca_err = |source: io::Error| ConnectError::CaFile {
        path: path.display().to_string(),
        source,
    };
    let ca_pem = fs::read(path).map_err(ca_err)?;
    let ca_certs = certs(&mut BufReader::new(&*ca_pem))
        .collect::<Result<Vec<_>, _>>()
        .map_err(ca_err)?;

    let mut root_store = RootCertStore::empty();
    root_store.add_parsable_certificates(ca_certs);

    if root_store.is_empty() {
        return Err(ConnectError::NoRootCertificates(
            path.display().to_string(),
        ));
    }
    Ok(root_store)
}

fn load_native_roots() -> Result<RootCertStore, ConnectError> {
    let mut root_store = RootCertStore::empty();
    match rustls_native_certs::load_native_certs() {
        Ok(native) => {
            let (added, ignored) = root_store.add_parsable_certificates(native);
            tracing::debug!("Loaded {} platform root(s), ignored {}", added, ignored);
        }
        Err(e) => tracing::warn!("Failed to load platform root certificates: {}", e),
    }

    if root_store.is_empty() {
        return Err(ConnectError::NoRootCertificates(
            "the platform certificate store".to_string(),
        ));
    }
    Ok(root_store)
}
