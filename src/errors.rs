//! Error types shared across the crate.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all supervisor failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing, validation, or executable-resolution failure.
    /// Never retried.
    Config(String),
    /// Child process could not be spawned or controlled.
    Spawn(String),
    /// Handshake (link) protocol failure that is not a low-level fault.
    /// Aborts the retry loop on first occurrence.
    Link(String),
    /// Transient low-level native fault raised by the handshake client
    /// (access-violation class). Retried with process kill and client
    /// recreation between attempts.
    Fault(String),
    /// Log-stream capture failure.
    Stream(String),
    /// Shared engine handle failure during shutdown.
    Engine(String),
    /// File-system or I/O operation failure.
    Io(String),
    /// The overall cancellation token fired. Always propagated after
    /// rollback, never swallowed.
    Cancelled,
}

impl AppError {
    /// Whether the retry loop may attempt the handshake again after this
    /// error, recreating the link client first.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Fault(_))
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Spawn(msg) => write!(f, "spawn: {msg}"),
            Self::Link(msg) => write!(f, "link: {msg}"),
            Self::Fault(msg) => write!(f, "native fault: {msg}"),
            Self::Stream(msg) => write!(f, "stream: {msg}"),
            Self::Engine(msg) => write!(f, "engine: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
