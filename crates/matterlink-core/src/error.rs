//! Protocol-level errors and the server's error-code table.

use std::fmt;

/// Error decoding a frame.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("frame is not a JSON object")]
    NotAnObject,
    #[error("unrecognized frame: {0}")]
    UnexpectedShape(&'static str),
}

/// Error codes the server attaches to failed commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    InvalidCommand,
    NotFound,
    StackError,
    UnknownError,
    /// A code this client does not know about.
    Other(i64),
}

impl From<i64> for ErrorCode {
    fn from(code: i64) -> Self {
        match code {
            1 => Self::InvalidCommand,
            2 => Self::NotFound,
            3 => Self::StackError,
            99 => Self::UnknownError,
            other => Self::Other(other),
        }
    }
}

impl From<ErrorCode> for i64 {
    fn from(code: ErrorCode) -> Self {
        match code {
            ErrorCode::InvalidCommand => 1,
            ErrorCode::NotFound => 2,
            ErrorCode::StackError => 3,
            ErrorCode::UnknownError => 99,
            ErrorCode::Other(other) => other,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidCommand => f.write_str("invalid command"),
            Self::NotFound => f.write_str("not found"),
            Self::StackError => f.write_str("stack error"),
            Self::UnknownError => f.write_str("unknown error"),
            Self::Other(code) => write!(f, "error code {code}"),
        }
    }
}
