//! Error types for the DBGp engine
//!
//! Every variant maps onto a DBGp status code so that command handlers can
//! return plain `Result`s and the dispatcher can turn failures into error
//! responses without knowing which handler produced them.

use std::io;
use thiserror::Error;

use crate::protocol::ErrorCode;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the engine, client and CLI
#[derive(Error, Debug)]
pub enum Error {
    // === Connection Errors ===
    #[error("Failed to connect to debugger client at {addr}: {source}")]
    ConnectFailed {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("Debugger client closed the connection")]
    Disconnected,

    #[error("No debugger client connected")]
    NotConnected,

    // === Protocol Errors ===
    #[error("Malformed command: {0}")]
    Parse(String),

    #[error("Invalid or missing options: {0}")]
    InvalidOptions(String),

    #[error("Unimplemented command '{0}'")]
    UnimplementedCommand(String),

    #[error("Command '{0}' is not available in the current state")]
    CommandUnavailable(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Operation timed out after {0} seconds")]
    Timeout(u64),

    #[error("Cannot open file '{0}'")]
    CannotOpenFile(String),

    #[error("Invalid file URI '{uri}': {reason}")]
    InvalidUri { uri: String, reason: String },

    // === Breakpoint Errors ===
    #[error("Breakpoint type '{0}' is not supported")]
    BreakpointType(String),

    #[error("Invalid breakpoint location: {0}")]
    BreakpointInvalid(String),

    #[error("No code on or after line {line} of {file}")]
    BreakpointNoCode { file: String, line: u32 },

    #[error("Invalid breakpoint state '{0}'")]
    BreakpointState(String),

    #[error("Breakpoint {id} not found")]
    BreakpointNotFound { id: u32 },

    // === Property Errors ===
    #[error("Evaluation failed: {0}")]
    EvalFailed(String),

    #[error("Unknown property '{0}'")]
    UnknownProperty(String),

    #[error("Invalid stack depth {0}")]
    InvalidStackDepth(usize),

    #[error("Invalid context {0}")]
    InvalidContext(i64),

    // === Buffer Errors ===
    #[error("Buffer exhausted: {requested} bytes requested")]
    BufferExhausted { requested: usize },

    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    /// DBGp status code reported to the client for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::Parse(_) => ErrorCode::ParseError,
            Error::InvalidOptions(_) => ErrorCode::InvalidOptions,
            Error::UnimplementedCommand(_) => ErrorCode::UnimplCommand,
            Error::CommandUnavailable(_) => ErrorCode::CommandUnavail,
            Error::CannotOpenFile(_) => ErrorCode::CanNotOpenFile,
            Error::InvalidUri { .. } => ErrorCode::InvalidOptions,
            Error::BreakpointType(_) => ErrorCode::BreakpointType,
            Error::BreakpointInvalid(_) => ErrorCode::BreakpointInvalid,
            Error::BreakpointNoCode { .. } => ErrorCode::BreakpointNoCode,
            Error::BreakpointState(_) => ErrorCode::BreakpointState,
            Error::BreakpointNotFound { .. } => ErrorCode::BreakpointNotFound,
            Error::EvalFailed(_) => ErrorCode::EvalFail,
            Error::UnknownProperty(_) => ErrorCode::UnknownProperty,
            Error::InvalidStackDepth(_) => ErrorCode::InvalidStackDepth,
            Error::InvalidContext(_) => ErrorCode::InvalidContext,
            _ => ErrorCode::InternalError,
        }
    }

    /// Whether the error means the connection itself is unusable
    ///
    /// Anything else is answered with an error response and the command
    /// loop carries on.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::ConnectFailed { .. }
                | Error::Disconnected
                | Error::NotConnected
                | Error::Io(_)
                | Error::Protocol(_)
        )
    }

    /// Extra attributes for the `<response>` element of an error envelope
    pub fn extra_attributes(&self) -> Option<String> {
        match self {
            Error::BreakpointNotFound { id } => Some(format!("id=\"{}\"", id)),
            Error::InvalidStackDepth(depth) => Some(format!("depth=\"{}\"", depth)),
            Error::InvalidContext(context) => Some(format!("context=\"{}\"", context)),
            _ => None,
        }
    }

    /// Create an invalid options error for a missing argument
    pub fn missing_arg(flag: char) -> Self {
        Self::InvalidOptions(format!("missing required argument -{}", flag))
    }

    /// Create a "no code" error for a breakpoint location
    pub fn no_code(file: &str, line: u32) -> Self {
        Self::BreakpointNoCode {
            file: file.to_string(),
            line,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_errors_map_to_codes() {
        assert_eq!(Error::Parse("x".into()).code(), ErrorCode::ParseError);
        assert_eq!(
            Error::BreakpointNotFound { id: 3 }.code(),
            ErrorCode::BreakpointNotFound
        );
        assert_eq!(Error::InvalidStackDepth(4).code(), ErrorCode::InvalidStackDepth);
        assert_eq!(
            Error::UnknownProperty("a.b".into()).code(),
            ErrorCode::UnknownProperty
        );
        assert_eq!(
            Error::BufferExhausted { requested: 10 }.code(),
            ErrorCode::InternalError
        );
        assert_eq!(
            Error::InvalidUri {
                uri: "file://h/x".into(),
                reason: "remote".into()
            }
            .code(),
            ErrorCode::InvalidOptions
        );
    }

    #[test]
    fn test_fatal_classification() {
        assert!(Error::Disconnected.is_fatal());
        assert!(Error::Io(io::Error::new(io::ErrorKind::BrokenPipe, "gone")).is_fatal());
        assert!(!Error::EvalFailed("boom".into()).is_fatal());
        assert!(!Error::BufferExhausted { requested: 1 }.is_fatal());
    }

    #[test]
    fn test_extra_attributes() {
        assert_eq!(
            Error::BreakpointNotFound { id: 7 }.extra_attributes().as_deref(),
            Some("id=\"7\"")
        );
        assert!(Error::Parse("x".into()).extra_attributes().is_none());
    }
}
