//! DBGp debug engine for embedded script interpreters
//!
//! The [`engine`] module is linked into an interpreter: the interpreter
//! calls the [`engine::Session`] hooks as it executes, and the session
//! talks DBGp to an IDE over TCP. The [`client`] module is the IDE side,
//! used by the `dbgp` CLI and the end-to-end tests. [`testing`] holds a
//! small scripted interpreter that exercises every hook.

pub mod cli;
pub mod client;
pub mod commands;
pub mod common;
pub mod engine;
pub mod protocol;
pub mod testing;

// Re-export commonly used types for tests
pub use common::{Error, Result};
