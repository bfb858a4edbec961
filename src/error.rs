//! Custom error types for inbox-assist.

use std::fmt;
use std::io;

/// Main error type for inbox-assist operations.
#[derive(Debug)]
pub enum Error {
    /// I/O errors (network, file operations)
    Io(io::Error),
    /// TLS setup or handshake errors
    Tls(String),
    /// `SQLite` or other storage errors
    Database(String),
    /// Mailbox connection or protocol errors
    Mailbox(String),
    /// Malformed message errors
    Parse(String),
    /// Missing or invalid request input
    Validation(String),
    /// Completion provider errors
    Provider(String),
    /// Configuration errors
    Config(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Tls(msg) => write!(f, "TLS error: {msg}"),
            Self::Database(msg) => write!(f, "database error: {msg}"),
            Self::Mailbox(msg) => write!(f, "mailbox error: {msg}"),
            Self::Parse(msg) => write!(f, "parse error: {msg}"),
            Self::Validation(msg) => write!(f, "{msg}"),
            Self::Provider(msg) => write!(f, "completion provider error: {msg}"),
            Self::Config(msg) => write!(f, "configuration error: {msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Self::Database(e.to_string())
    }
}

impl From<async_imap::error::Error> for Error {
    fn from(e: async_imap::error::Error) -> Self {
        Self::Mailbox(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Self::Provider(e.to_string())
    }
}

impl From<Error> for io::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::Io(io_err) => io_err,
            other => Self::other(other.to_string()),
        }
    }
}

/// Result type alias for inbox-assist operations.
pub type Result<T> = std::result::Result<T, Error>;
