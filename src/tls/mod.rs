//! TLS over in-memory buffers.
//!
//! The TLS engine never touches a socket. Ciphertext received by the
//! reactor is pushed into a [`TlsConnection`], decrypted bytes are pulled
//! out of it, and encrypted output is collected from it and written by the
//! reactor. This keeps the handshake state machine independent of how and
//! when socket I/O happens.
//!
//! ```text
//!  socket ──ciphertext──> on_read ──> [engine] ──plaintext──> decrypted_mut()
//!  socket <──ciphertext── take_outgoing <── [engine] <──plaintext── send
//! ```

mod connection;
mod context;

pub use connection::{TlsConnection, TlsState};
pub use context::{TlsConfig, TlsContext, TlsVersion};

use std::{io, path::PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TlsError {
    #[error("failed to read {}: {source}", path.display())]
    File { path: PathBuf, source: io::Error },

    #[error("invalid PEM data: {0}")]
    Pem(io::Error),
    #[error("no certificate found in PEM data")]
    NoCertificates,
    #[error("no private key found in PEM data")]
    NoPrivateKey,

    /// Rejected configuration or a fatal protocol violation. Never retried.
    #[error("TLS protocol error: {0}")]
    Protocol(#[from] rustls::Error),
    #[error("TLS buffer error: {0}")]
    Buffer(io::Error),

    #[error("TLS handshake is not complete")]
    NotEstablished,
    #[error("TLS connection is unusable ({0:?})")]
    InvalidState(TlsState),
}
