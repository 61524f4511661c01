//! In-process DBGp debug engine
//!
//! The interpreter embeds a [`Session`], mirrors its call stack through
//! [`Session::push_frame`] / [`Session::on_function_exit`] and calls
//! [`Session::on_line`] before every statement. Everything the engine needs
//! to know about the script goes through the [`Host`] trait.

pub mod breakpoints;
mod commands;
pub mod host;
pub mod property;
pub mod session;
pub mod stack;
pub mod value;

pub use breakpoints::{Breakpoint, BreakpointRegistry, BreakpointState, BreakpointType};
pub use host::{
    CallId, FatalAction, FileIndex, FuncId, Host, LineId, LocalScope, SourceLine, Transport,
    VarScope, VarStorage,
};
pub use property::PropertyLimits;
pub use session::{Directive, RunState, Session, SessionSettings, StreamMode};
pub use stack::{CallStack, FrameKind, StackEntry};
pub use value::{DebugObject, Facets, Key, ObjectRef, Value, Variable};
