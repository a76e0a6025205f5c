use std::io::{self, Read, Write};

use rustls::ClientConnection;

/// Synchronous TLS client wrapper over a blocking socket
pub struct TlsStream<S: Read + Write> {
    socket: S,
    tls:    ClientConnection,
}

impl<S: Read + Write> TlsStream<S> {
    /// Wrap a connected socket and complete the handshake
    pub fn connect(socket: S, tls: ClientConnection) -> io::Result<Self> {
        let mut stream = Self { socket, tls };
        stream.complete_handshake()?;
        Ok(stream)
    }

    /// Complete the TLS handshake
    fn complete_handshake(&mut self) -> io::Result<()> {
        while self.tls.is_handshaking() {
            let (read, written) = self.tls.complete_io(&mut self.socket)?;
            if read == 0 && written == 0 && self.tls.is_handshaking() {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed during TLS handshake",
                ));
            }
        }
        // The client's last flight may still be queued when the handshake
        // state flips
        if self.tls.wants_write() {
            self.flush_tls()?;
        }
        Ok(())
    }

    /// Underlying socket
    pub fn get_ref(&self) -> &S {
        &self.socket
    }

    /// Send close_notify and flush it, ignoring a peer that is already gone
    pub fn close(&mut self) -> io::Result<()> {
        self.tls.send_close_notify();
        match self.flush_tls() {
            Err(e) if peer_gone(&e) => {
                tracing::debug!("Peer gone before close_notify: {}", e);
                Ok(())
            }
            other => other,
        }
    }

    fn flush_tls(&mut self) -> io::Result<()> {
        while self.tls.wants_write() {
            match self.tls.write_tls(&mut self.socket) {
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e),
            }
        }
        self.socket.flush()
    }
}

fn peer_gone(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::BrokenPipe | io::ErrorKind::NotConnected | io::ErrorKind::ConnectionReset
    )
}

impl<S: Read + Write> Read for TlsStream<S> {
    /// Reads decrypted bytes
    ///
    /// `Ok(0)` means the peer sent close_notify. A transport that closes
    /// without one surfaces as `ErrorKind::UnexpectedEof`.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        loop {
            // Try to read buffered plaintext first
            match self.tls.reader().read(buf) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(e),
            }

            // Need more TLS data from the socket
            let n = self.tls.read_tls(&mut self.socket)?;
            self.tls
                .process_new_packets()
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

            // Alerts and key updates may need an answer
            if self.tls.wants_write() {
                self.flush_tls()?;
            }

            if n == 0 {
                // Transport EOF; the plaintext reader now reports how it ended
                return self.tls.reader().read(buf);
            }
        }
    }
}
