//! Error types for panelbus

use thiserror::Error;

use crate::bus::BusError;

/// Result type alias for panelbus operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while publishing or mirroring a widget tree
#[derive(Debug, Error)]
pub enum Error {
    /// Operation attempted on a widget that is not in the `Registered` state
    #[error("widget not registered: {0}")]
    NotRegistered(String),

    /// Registration attempted on a widget that is already registered or busy
    #[error("widget already registered: {0}")]
    AlreadyRegistered(String),

    /// Widget tree edit that would break the tree shape
    #[error("invalid widget tree: {0}")]
    InvalidTree(String),

    /// Remote interface is newer than the one this crate understands
    #[error("version mismatch on {interface}: remote {remote}, local {local}")]
    VersionMismatch {
        interface: String,
        remote: u16,
        local: u16,
    },

    /// Object path does not follow the control panel layout
    #[error("malformed object path: {0}")]
    MalformedPath(String),

    /// Remote object could not be introspected
    #[error("introspection failed for {path}: {reason}")]
    IntrospectionFailed { path: String, reason: String },

    /// Value type differs from the widget's fixed property type
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    /// Value falls outside the widget's constraints
    #[error("constraint violation: {0}")]
    Constraint(String),

    /// Operation not offered by this widget
    #[error("not implemented: {0}")]
    NotImplemented(String),

    /// Malformed wire payload
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// Signals were dropped before delivery; mirrors may be stale
    #[error("{0} signals dropped before delivery")]
    SignalsLost(u64),

    /// Resource not found
    #[error("not found: {0}")]
    NotFound(String),

    /// Error returned by the bus substrate or the remote peer
    #[error("bus error: {0}")]
    Bus(#[from] BusError),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Build a `TypeMismatch` from anything displayable
    pub(crate) fn type_mismatch(expected: impl ToString, actual: impl ToString) -> Self {
        Self::TypeMismatch {
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }
}
