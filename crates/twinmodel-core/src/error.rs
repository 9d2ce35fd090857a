//! Error taxonomy shared by every component of the core

use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Every way a core operation can fail
#[derive(Debug, Error)]
pub enum Error {
    /// A path was inserted through a leaf, or onto an existing node
    #[error("structural conflict at '{path}'")]
    StructuralConflict { path: String },

    /// A property path contained an empty segment
    #[error("empty path segment in '{path}'")]
    EmptyPathSegment { path: String },

    /// A value could not be rendered to, or parsed from, its textual form
    #[error("cannot convert {kind}: {reason}")]
    Conversion { kind: &'static str, reason: String },

    /// Composite field count, names or kinds do not match the declared struct
    #[error("shape mismatch for '{type_name}': {reason}")]
    ShapeMismatch { type_name: String, reason: String },

    #[error("unknown model '{0}'")]
    UnknownModel(String),

    #[error("unknown struct type '{0}'")]
    UnknownStruct(String),

    #[error("unknown action '{0}'")]
    UnknownAction(String),

    #[error("unknown property '{0}'")]
    UnknownProperty(String),

    /// A name was declared twice where names must be unique
    #[error("duplicate {what} '{name}'")]
    DuplicateName { what: &'static str, name: String },

    /// Publish, end or cancel called with no open transaction (or open called twice)
    #[error("transaction state violation: {0}")]
    TransactionState(&'static str),

    #[error("transaction has no published values")]
    EmptyTransaction,

    #[error("encoded payload of {size} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// The JSON parsed but does not have the expected structure
    #[error("unexpected JSON shape: {0}")]
    JsonShape(String),

    /// Arguments supplied to an action do not match its declared signature
    #[error("argument mismatch for action '{0}'")]
    ArgumentMismatch(String),

    #[error("unknown device {0}")]
    UnknownDevice(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    pub(crate) fn conversion(kind: &'static str, reason: impl Into<String>) -> Self {
        Self::Conversion {
            kind,
            reason: reason.into(),
        }
    }

    pub(crate) fn shape(type_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ShapeMismatch {
            type_name: type_name.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn duplicate(what: &'static str, name: impl Into<String>) -> Self {
        Self::DuplicateName {
            what,
            name: name.into(),
        }
    }
}
