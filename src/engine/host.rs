//! Capability surface the interpreter exposes to the engine
//!
//! The engine never parses scripts or evaluates expressions itself. Each
//! hook receives a `&mut dyn Host` and calls back through it while the
//! interpreter thread is parked.

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::path::Path;

use super::value::{Value, Variable};

/// Index of a script file known to the host
pub type FileIndex = usize;

/// Opaque identity of an executable line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LineId(pub u32);

/// Identity of a user-defined function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FuncId(pub u32);

/// Identity of one invocation of a user-defined function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallId(pub u64);

/// An executable line as reported to the hooks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceLine {
    pub id: LineId,
    pub file: FileIndex,
    pub number: u32,
}

/// Where the variables of one function invocation currently live
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarStorage {
    /// The newest invocation: variables are live
    Live,
    /// An older invocation whose variables were backed up when the given
    /// (deeper) invocation of the same function started
    Backup(CallId),
}

/// Local variable scope of a stack frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalScope {
    pub func: FuncId,
    pub storage: VarStorage,
}

/// Scope used when assigning a variable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarScope {
    Global,
    Local(LocalScope),
}

/// What to do after the connection failed mid-session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FatalAction {
    /// Drop the debugger and keep running the script
    #[default]
    Disconnect,
    /// Terminate the script
    Terminate,
}

/// Interpreter services used by the engine
pub trait Host {
    /// Path of the main script (reported in the `init` packet)
    fn main_script(&self) -> &Path;

    /// Path of a script file
    fn file_path(&self, file: FileIndex) -> Option<&Path>;

    /// Find the file index for a path sent by the client
    fn find_file(&self, path: &Path) -> Option<FileIndex>;

    /// First executable line at or after `line` in `file`
    fn resolve_line(&self, file: FileIndex, line: u32) -> Option<SourceLine>;

    /// Full text of a source file, for the `source` command
    fn read_source(&self, path: &Path) -> io::Result<String> {
        std::fs::read_to_string(path)
    }

    /// All global variables
    fn global_variables(&self) -> Vec<Variable>;

    /// Local (and static) variables of one function invocation
    fn local_variables(&self, scope: &LocalScope) -> Vec<Variable>;

    /// Assign a variable, creating it if the scope allows
    fn set_variable(&mut self, scope: &VarScope, name: &str, value: Value) -> Result<(), String>;

    /// Evaluate an expression in the frame `depth` levels below the top
    fn evaluate(&mut self, expression: &str, depth: usize) -> Result<Value, String>;

    /// The connection failed; decide whether the script keeps running
    fn on_fatal_error(&mut self, _message: &str) -> FatalAction {
        FatalAction::Disconnect
    }
}

/// Byte stream to the debugger client
pub trait Transport: Read + Write {
    /// Whether unread inbound data is waiting; must not block
    fn has_pending(&mut self) -> io::Result<bool>;

    /// Close both directions
    fn shutdown(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Transport for TcpStream {
    fn has_pending(&mut self) -> io::Result<bool> {
        self.set_nonblocking(true)?;
        let mut peeked = [0u8; 1];
        let result = self.peek(&mut peeked);
        self.set_nonblocking(false)?;
        match result {
            // Zero means EOF, which the next read reports as a disconnect.
            Ok(_) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn shutdown(&mut self) -> io::Result<()> {
        TcpStream::shutdown(self, std::net::Shutdown::Both)
    }
}
