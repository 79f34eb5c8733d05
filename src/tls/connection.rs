use super::{TlsContext, TlsError};
use rustls::ServerConnection;
use std::{
    io::{self, Read, Write},
    mem,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsState {
    Init,
    Handshaking,
    Established,
    /// A fatal alert was produced or received; only the alert may still be flushed.
    Error,
    Closed,
}

/// Server side of one TLS session, driven entirely through byte buffers.
///
/// The owner feeds ciphertext from the socket to [`on_read`](Self::on_read),
/// consumes plaintext from [`decrypted_mut`](Self::decrypted_mut) and writes
/// whatever [`take_outgoing`](Self::take_outgoing) returns back to the socket.
pub struct TlsConnection {
    engine: Option<ServerConnection>,
    state: TlsState,
    read_buffer: Vec<u8>,
    write_buffer: Vec<u8>,
    decrypted: Vec<u8>,
    peer_closed: bool,
}

impl TlsConnection {
    pub fn new(context: &TlsContext) -> Result<Self, TlsError> {
        Ok(Self {
            engine: Some(ServerConnection::new(context.server_config())?),
            state: TlsState::Init,
            read_buffer: Vec::new(),
            write_buffer: Vec::new(),
            decrypted: Vec::new(),
            peer_closed: false,
        })
    }

    #[inline]
    pub fn state(&self) -> TlsState {
        self.state
    }

    #[inline]
    pub fn is_established(&self) -> bool {
        self.state == TlsState::Established
    }

    /// `true` once the client sent `close_notify`.
    #[inline]
    pub fn is_peer_closed(&self) -> bool {
        self.peer_closed
    }

    /// ALPN protocol picked during the handshake.
    pub fn alpn_protocol(&self) -> Option<&[u8]> {
        self.engine.as_ref()?.alpn_protocol()
    }

    /// Arms the handshake. The server waits for the ClientHello, so nothing
    /// is queued for sending yet.
    pub fn start_handshake(&mut self) {
        if self.state == TlsState::Init {
            self.set_state(TlsState::Handshaking);
        }
    }

    /// Feeds ciphertext received from the peer.
    ///
    /// Returns the number of plaintext bytes appended to the decrypted
    /// buffer. Handshake replies and alerts land in the outgoing buffer, so
    /// the caller should flush [`take_outgoing`](Self::take_outgoing) after
    /// every call, including failed ones.
    pub fn on_read(&mut self, data: &[u8]) -> Result<usize, TlsError> {
        match self.state {
            TlsState::Init => self.start_handshake(),
            TlsState::Error | TlsState::Closed => return Err(TlsError::InvalidState(self.state)),
            TlsState::Handshaking | TlsState::Established => {}
        }

        let Some(engine) = self.engine.as_mut() else {
            return Err(TlsError::InvalidState(self.state));
        };

        self.read_buffer.extend_from_slice(data);
        let before = self.decrypted.len();

        let result = pump(
            engine,
            &mut self.read_buffer,
            &mut self.decrypted,
            &mut self.peer_closed,
        );
        flush(engine, &mut self.write_buffer)?;

        if let Err(err) = result {
            tracing::debug!(error = %err, "TLS session failed");
            self.set_state(TlsState::Error);
            return Err(err);
        }

        if self.state == TlsState::Handshaking && !engine.is_handshaking() {
            tracing::debug!(
                version = ?engine.protocol_version(),
                alpn = ?engine.alpn_protocol().map(String::from_utf8_lossy),
                "TLS handshake complete"
            );
            self.set_state(TlsState::Established);
        }

        Ok(self.decrypted.len() - before)
    }

    /// Encrypts `data` into the outgoing buffer.
    pub fn send(&mut self, data: &[u8]) -> Result<(), TlsError> {
        match self.state {
            TlsState::Established => {}
            TlsState::Init | TlsState::Handshaking => return Err(TlsError::NotEstablished),
            TlsState::Error | TlsState::Closed => return Err(TlsError::InvalidState(self.state)),
        }

        let Some(engine) = self.engine.as_mut() else {
            return Err(TlsError::InvalidState(self.state));
        };

        // The engine caps buffered plaintext, so large payloads take several passes.
        let mut offset = 0;
        while offset < data.len() {
            let written = engine.writer().write(&data[offset..]).map_err(TlsError::Buffer)?;
            offset += written;

            let flushed = flush(engine, &mut self.write_buffer)?;
            if written == 0 && flushed == 0 {
                return Err(TlsError::Buffer(io::ErrorKind::WriteZero.into()));
            }
        }

        Ok(())
    }

    #[inline]
    pub fn has_outgoing(&self) -> bool {
        !self.write_buffer.is_empty()
    }

    /// Ciphertext waiting to be written to the socket.
    #[inline]
    pub fn take_outgoing(&mut self) -> Vec<u8> {
        mem::take(&mut self.write_buffer)
    }

    /// Plaintext received so far. The owner drains what it consumed.
    #[inline]
    pub fn decrypted_mut(&mut self) -> &mut Vec<u8> {
        &mut self.decrypted
    }

    /// Queues `close_notify` and releases the engine.
    ///
    /// Returns the last ciphertext to send. Undelivered plaintext is dropped.
    pub fn close(&mut self) -> Vec<u8> {
        if let Some(mut engine) = self.engine.take() {
            if matches!(self.state, TlsState::Handshaking | TlsState::Established) {
                engine.send_close_notify();
            }
            // Writing into a Vec cannot fail.
            let _ = flush(&mut engine, &mut self.write_buffer);
        }

        self.read_buffer = Vec::new();
        self.decrypted = Vec::new();
        self.set_state(TlsState::Closed);

        mem::take(&mut self.write_buffer)
    }

    fn set_state(&mut self, state: TlsState) {
        if self.state != state {
            tracing::trace!(from = ?self.state, to = ?state, "TLS state change");
            self.state = state;
        }
    }
}

impl std::fmt::Debug for TlsConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConnection")
            .field("state", &self.state)
            .field("pending_in", &self.read_buffer.len())
            .field("pending_out", &self.write_buffer.len())
            .field("decrypted", &self.decrypted.len())
            .field("peer_closed", &self.peer_closed)
            .finish()
    }
}

/// Moves ciphertext from `input` through the engine, draining plaintext
/// after every record batch so the engine's plaintext buffer never fills.
fn pump(
    engine: &mut ServerConnection,
    input: &mut Vec<u8>,
    plaintext: &mut Vec<u8>,
    peer_closed: &mut bool,
) -> Result<(), TlsError> {
    while !input.is_empty() {
        let mut unread = &input[..];
        let consumed = engine.read_tls(&mut unread).map_err(TlsError::Buffer)?;
        input.drain(..consumed);

        engine.process_new_packets()?;
        drain_plaintext(engine, plaintext, peer_closed)?;

        if consumed == 0 {
            break;
        }
    }

    Ok(())
}

fn drain_plaintext(
    engine: &mut ServerConnection,
    plaintext: &mut Vec<u8>,
    peer_closed: &mut bool,
) -> Result<(), TlsError> {
    let mut chunk = [0u8; 4096];
    loop {
        match engine.reader().read(&mut chunk) {
            Ok(0) => {
                *peer_closed = true;
                return Ok(());
            }
            Ok(n) => plaintext.extend_from_slice(&chunk[..n]),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(()),
            Err(err) => return Err(TlsError::Buffer(err)),
        }
    }
}

fn flush(engine: &mut ServerConnection, output: &mut Vec<u8>) -> Result<usize, TlsError> {
    let mut total = 0;
    while engine.wants_write() {
        total += engine.write_tls(output).map_err(TlsError::Buffer)?;
    }
    Ok(total)
}
