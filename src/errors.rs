use crate::{
    http::{
        response::Response,
        types::{StatusCode, Version},
    },
    tls::TlsError,
};
use std::io;
use thiserror::Error;

/// Error type returned by application handlers and callbacks.
///
/// Any error a handler returns is logged and turned into a
/// `500 Internal Server Error` for that request only.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type of a handler invocation.
pub type HandlerResult = std::result::Result<(), BoxError>;

/// Startup and configuration failures.
///
/// These are the only errors that can stop the whole server; everything
/// that happens after a connection is accepted stays local to it.
#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("failed to parse configuration: {0}")]
    ConfigFormat(#[from] toml::de::Error),

    #[error("invalid route pattern {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("TLS error: {0}")]
    Tls(#[from] TlsError),
}

/// Result type alias for fallible startup operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Malformed or unsupported request framing.
///
/// Every variant is fatal for the connection it happened on: the server
/// answers with the matching status code, marks the response
/// `Connection: close` and never hands a partial request to the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("invalid HTTP method")]
    InvalidMethod,
    #[error("invalid request target")]
    InvalidUrl,
    #[error("request line too long")]
    UriTooLong,

    #[error("invalid HTTP version")]
    InvalidVersion,
    #[error("HTTP version not supported")]
    UnsupportedVersion,

    #[error("invalid header line")]
    InvalidHeader,
    #[error("header section too large")]
    HeaderTooLarge,
    #[error("invalid Content-Length")]
    InvalidContentLength,
    #[error("Transfer-Encoding is not supported")]
    UnsupportedTransferEncoding,

    #[error("request body too large")]
    BodyTooLarge,
    #[error("request is not valid UTF-8")]
    InvalidEncoding,
}

macro_rules! http_errors {
    ($($name:ident: $status:ident => $code:literal; )*) => {
        /// Status code the server answers with.
        pub const fn status(&self) -> StatusCode {
            match self { $(
                Self::$name => StatusCode::$status,
            )* }
        }

        /// Machine-readable error code used in JSON error bodies.
        pub const fn code(&self) -> &'static str {
            match self { $(
                Self::$name => $code,
            )* }
        }
    };
}

impl ParseError {
    http_errors! {
        InvalidMethod: BadRequest => "INVALID_METHOD";
        InvalidUrl: BadRequest => "INVALID_URL";
        UriTooLong: UriTooLong => "URI_TOO_LONG";

        InvalidVersion: BadRequest => "INVALID_VERSION";
        UnsupportedVersion: HttpVersionNotSupported => "UNSUPPORTED_VERSION";

        InvalidHeader: BadRequest => "INVALID_HEADER";
        HeaderTooLarge: RequestHeaderFieldsTooLarge => "HEADER_TOO_LARGE";
        InvalidContentLength: BadRequest => "INVALID_CONTENT_LENGTH";
        UnsupportedTransferEncoding: NotImplemented => "UNSUPPORTED_TRANSFER_ENCODING";

        BodyTooLarge: PayloadTooLarge => "BODY_TOO_LARGE";
        InvalidEncoding: BadRequest => "INVALID_ENCODING";
    }

    /// Builds the `Connection: close` response sent for this error.
    ///
    /// With `json` the body is `{"error":"...","code":"..."}`, otherwise
    /// the body is empty.
    pub fn to_response(&self, version: Version, json: bool) -> Response {
        let mut response = Response::new(version);
        response.status(self.status()).close();

        if json {
            response
                .header("Content-Type", "application/json")
                .body(format!(r#"{{"error":"{self}","code":"{}"}}"#, self.code()));
        }

        response
    }
}
