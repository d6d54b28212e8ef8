use std::io;

use thiserror::Error;

/// Errors produced by the client and server halves of the protocol engine.
#[derive(Debug, Error)]
pub enum Error {
    /// Scheme or host could not be extracted from the URL.
    #[error("invalid URL")]
    InvalidUrl,
    /// The URL names a scheme other than `http`.
    #[error("unsupported protocol {0}")]
    UnsupportedProtocol(String),
    /// Host name lookup failed before any candidate could be tried.
    #[error("host resolution failed for {host}:{port}")]
    Resolution {
        host: String,
        port: String,
        #[source]
        source: io::Error,
    },
    /// Every candidate address refused or failed.
    #[error("connection failed")]
    ConnectionFailed,
    /// The request line is missing its method, path or version.
    #[error("malformed request")]
    MalformedRequest,
    /// The request head grew past the configured limit.
    #[error("request exceeds {0} bytes")]
    RequestTooLarge(usize),
    #[error("unsupported method {0}")]
    UnsupportedMethod(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
