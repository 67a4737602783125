//! ChatBridge error types.
//!
//! Errors never cross a context boundary as Rust values. They are flattened
//! into a [`WireError`] (kind + message) so the receiving side can match on
//! the kind instead of sniffing message substrings.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, BridgeError>;

#[derive(Debug, Error)]
pub enum BridgeError {
    /// Another answer request is already in flight.
    #[error("Another ChatGPT request is already in progress.")]
    Busy,

    #[error("Timeout: {0}")]
    Timeout(String),

    /// Page or context communication broke.
    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("Delivery abandoned: {0}")]
    DeliveryAbandoned(String),

    /// A page automation primitive failed (locator, text entry, click).
    #[error("Page error: {0}")]
    Page(String),

    #[error("Duplicate skipped: {0}")]
    Duplicate(String),

    #[error("A delivery job is already staged")]
    SlotOccupied,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Settings store error: {0}")]
    Store(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

/// Error categories that survive message passing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Busy,
    Timeout,
    Transport,
    DeliveryAbandoned,
    Page,
    Duplicate,
    SlotOccupied,
    Config,
    Store,
    Other,
}

/// Serializable error payload carried inside protocol messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireError {
    pub kind: ErrorKind,
    pub message: String,
}

impl WireError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }
}

impl std::fmt::Display for WireError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl BridgeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Busy => ErrorKind::Busy,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Transport(_) => ErrorKind::Transport,
            Self::DeliveryAbandoned(_) => ErrorKind::DeliveryAbandoned,
            Self::Page(_) => ErrorKind::Page,
            Self::Duplicate(_) => ErrorKind::Duplicate,
            Self::SlotOccupied => ErrorKind::SlotOccupied,
            Self::Config(_) => ErrorKind::Config,
            Self::Store(_) | Self::Io(_) => ErrorKind::Store,
            Self::Serialization(_) | Self::Other(_) => ErrorKind::Other,
        }
    }

    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Busy)
    }

    /// Flatten into the wire form.
    pub fn to_wire(&self) -> WireError {
        WireError::new(self.kind(), self.to_string())
    }
}

impl From<WireError> for BridgeError {
    fn from(err: WireError) -> Self {
        match err.kind {
            ErrorKind::Busy => Self::Busy,
            ErrorKind::Timeout => Self::Timeout(err.message),
            ErrorKind::Transport => Self::Transport(err.message),
            ErrorKind::DeliveryAbandoned => Self::DeliveryAbandoned(err.message),
            ErrorKind::Page => Self::Page(err.message),
            ErrorKind::Duplicate => Self::Duplicate(err.message),
            ErrorKind::SlotOccupied => Self::SlotOccupied,
            ErrorKind::Config => Self::Config(err.message),
            ErrorKind::Store => Self::Store(err.message),
            ErrorKind::Other => Self::Other(err.message),
        }
    }
}
