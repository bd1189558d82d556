//! Error types for the node link.

use thiserror::Error;

/// Why a reply failed to decode in one wire format.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("empty reply")]
    Empty,

    #[error("reply is not text")]
    NotText,

    /// No terminator within the reply bound.
    #[error("reply exceeds {max} bytes without a terminator")]
    Overlong { max: usize },

    #[error("unexpected tag {found:?}")]
    WrongTag { found: String },

    #[error("expected {expected} fields after the tag, got {got}")]
    FieldCount { expected: usize, got: usize },

    #[error("field `{field}` must be {expected} hex digits, got {got}")]
    FieldWidth {
        field: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("field `{field}` is not a valid number")]
    InvalidNumber { field: &'static str },

    #[error("noise value is not finite")]
    NonFiniteNoise,
}

/// Transport failures. The coordinator treats every one as an absent node.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("node {node} is not on the bus")]
    NoSuchNode { node: usize },

    #[error("bus write failed: {0}")]
    Write(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ControlError {
    #[error("control lines start with '@'")]
    MissingPrefix,

    #[error("unknown control command `{0}`")]
    Unknown(String),

    #[error("malformed value for `{key}`")]
    BadValue { key: String },
}
