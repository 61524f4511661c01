//! Scripted host for exercising the engine
//!
//! A YAML [`Program`] stands in for a real script: each statement carries
//! the line number it pretends to be on, and [`ScriptRunner`] drives the
//! session hooks the way an interpreter would. Used by the unit tests, the
//! integration tests and the `mock_engine` binary.

mod expr;
mod host;
mod object;
mod program;
mod runner;
mod transport;

pub use expr::evaluate;
pub use host::{ScriptHost, SCRIPT_FILE};
pub use object::{value_from_yaml, ScriptObject};
pub use program::{Action, FunctionDef, Program, Statement};
pub use runner::{RunOutcome, ScriptRunner, MAIN_THREAD};
pub use transport::{split_packets, MemoryTransport, OutputHandle};
