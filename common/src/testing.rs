//! Certificates, PKCS#12 bundles and a loopback TLS server for tests

use std::{
    io::{Read, Write},
    net::{Shutdown, TcpListener},
    sync::Arc,
    thread::{self, JoinHandle},
};

use p12_keystore::{Certificate, KeyStore, KeyStoreEntry, PrivateKeyChain};
use rcgen::CertifiedKey;
use rustls::{
    pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer},
    ServerConfig, ServerConnection, StreamOwned,
};

/// Name the loopback server's certificate is issued for
pub const SERVER_NAME: &str = "localhost";

/// Self-signed certificate and key for `name`
pub fn self_signed(name: &str) -> CertifiedKey {
    rcgen::generate_simple_self_signed(vec![name.to_string()]).unwrap()
}

pub fn key_der(certified: &CertifiedKey) -> PrivateKeyDer<'static> {
    PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(certified.key_pair.serialize_der()))
}

/// PKCS#12 bundle holding one key chain per entry of `keys` plus `certs`
/// as bare certificate entries
pub fn pkcs12_bundle(keys: &[&CertifiedKey], certs: &[&CertifiedKey], password: &str) -> Vec<u8> {
    let mut store = KeyStore::new();
    for (i, certified) in keys.iter().enumerate() {
        let cert = Certificate::from_der(certified.cert.der()).unwrap();
        let chain = PrivateKeyChain::new(
            certified.key_pair.serialize_der(),
            [i as u8 + 1; 20],
            vec![cert],
        );
        store.add_entry(&format!("key{i}"), KeyStoreEntry::PrivateKeyChain(chain));
    }
    for (i, certified) in certs.iter().enumerate() {
        let cert = Certificate::from_der(certified.cert.der()).unwrap();
        store.add_entry(&format!("cert{i}"), KeyStoreEntry::Certificate(cert));
    }
    store.writer(password).write().unwrap()
}

/// What the loopback server does once the handshake is done
pub enum Script {
    /// Send the bytes, then close_notify, then FIN
    CloseNotify(Vec<u8>),
    /// Send the bytes, then FIN without close_notify
    BareFin(Vec<u8>),
    /// Keep the connection open until the client goes away
    Hold,
}

/// Single-connection rustls server on 127.0.0.1
pub struct TestServer {
    pub port:     u16,
    pub cert:     CertificateDer<'static>,
    pub cert_pem: String,
    handle:       JoinHandle<()>,
}

impl TestServer {
    pub fn spawn(script: Script) -> Self {
        crate::channel::init();
        let certified = self_signed(SERVER_NAME);
        let cert = certified.cert.der().clone();
        let config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(vec![cert.clone()], key_der(&certified))
            .unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let handle = thread::spawn(move || {
            let (socket, _) = listener.accept().unwrap();
            let conn = ServerConnection::new(Arc::new(config)).unwrap();
            let mut stream = StreamOwned::new(conn, socket);

            let payload = match script {
                Script::Hold => {
                    let mut buf = [0u8; 64];
                    let _ = stream.read(&mut buf);
                    return;
                }
                Script::CloseNotify(payload) => {
                    stream.write_all(&payload).unwrap();
                    stream.conn.send_close_notify();
                    payload
                }
                Script::BareFin(payload) => {
                    stream.write_all(&payload).unwrap();
                    payload
                }
            };
            tracing::debug!("Test server sent {} byte(s)", payload.len());
            stream.flush().unwrap();
            let _ = stream.sock.shutdown(Shutdown::Write);

            // Drain until the client leaves so our side ends in FIN, not RST
            let mut buf = [0u8; 256];
            while matches!(stream.sock.read(&mut buf), Ok(n) if n > 0) {}
        });

        Self {
            port,
            cert,
            cert_pem: certified.cert.pem(),
            handle,
        }
    }

    pub fn join(self) {
        self.handle.join().unwrap();
    }
}
