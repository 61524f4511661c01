//! DBGp error codes
//!
//! The numeric values are part of the wire protocol and must not change.

use std::fmt;

/// Status code carried in `<error code="..">` elements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    Ok,
    ParseError,
    InvalidOptions,
    UnimplCommand,
    CommandUnavail,
    CanNotOpenFile,
    BreakpointType,
    BreakpointInvalid,
    BreakpointNoCode,
    BreakpointState,
    BreakpointNotFound,
    EvalFail,
    UnknownProperty,
    InvalidStackDepth,
    InvalidContext,
    InternalError,
}

impl ErrorCode {
    /// Numeric value sent on the wire
    pub fn as_i32(self) -> i32 {
        match self {
            Self::Ok => 0,
            Self::ParseError => 1,
            Self::InvalidOptions => 3,
            Self::UnimplCommand => 4,
            Self::CommandUnavail => 5,
            Self::CanNotOpenFile => 100,
            Self::BreakpointType => 201,
            Self::BreakpointInvalid => 202,
            Self::BreakpointNoCode => 203,
            Self::BreakpointState => 204,
            Self::BreakpointNotFound => 205,
            Self::EvalFail => 206,
            Self::UnknownProperty => 300,
            Self::InvalidStackDepth => 301,
            Self::InvalidContext => 302,
            Self::InternalError => 998,
        }
    }

    /// Look up a code by its numeric value
    pub fn from_i32(code: i32) -> Option<Self> {
        let code = match code {
            0 => Self::Ok,
            1 => Self::ParseError,
            3 => Self::InvalidOptions,
            4 => Self::UnimplCommand,
            5 => Self::CommandUnavail,
            100 => Self::CanNotOpenFile,
            201 => Self::BreakpointType,
            202 => Self::BreakpointInvalid,
            203 => Self::BreakpointNoCode,
            204 => Self::BreakpointState,
            205 => Self::BreakpointNotFound,
            206 => Self::EvalFail,
            300 => Self::UnknownProperty,
            301 => Self::InvalidStackDepth,
            302 => Self::InvalidContext,
            998 => Self::InternalError,
            _ => return None,
        };
        Some(code)
    }

    /// Symbolic name, as used in the protocol documentation
    pub fn name(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::ParseError => "PARSE_ERROR",
            Self::InvalidOptions => "INVALID_OPTIONS",
            Self::UnimplCommand => "UNIMPL_COMMAND",
            Self::CommandUnavail => "COMMAND_UNAVAIL",
            Self::CanNotOpenFile => "CAN_NOT_OPEN_FILE",
            Self::BreakpointType => "BREAKPOINT_TYPE",
            Self::BreakpointInvalid => "BREAKPOINT_INVALID",
            Self::BreakpointNoCode => "BREAKPOINT_NO_CODE",
            Self::BreakpointState => "BREAKPOINT_STATE",
            Self::BreakpointNotFound => "BREAKPOINT_NOT_FOUND",
            Self::EvalFail => "EVAL_FAIL",
            Self::UnknownProperty => "UNKNOWN_PROPERTY",
            Self::InvalidStackDepth => "INVALID_STACK_DEPTH",
            Self::InvalidContext => "INVALID_CONTEXT",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.as_i32())
    }
}
