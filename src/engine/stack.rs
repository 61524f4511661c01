//! Call stack mirror
//!
//! The interpreter pushes and pops frames in lock-step with its own calls;
//! the engine only reads the stack while the interpreter is parked.

use super::host::{CallId, FuncId, LocalScope, SourceLine, VarStorage};

/// Initial capacity; script recursion is rarely deep
pub const INITIAL_STACK_CAPACITY: usize = 128;

/// What a frame represents
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameKind {
    /// Start of a script thread ("auto-execute", a hotkey, a timer, ...)
    Thread { desc: String },
    /// Call into a native (built-in) routine
    Native { name: String },
    /// Call of a user-defined function
    User {
        name: String,
        func: FuncId,
        call: CallId,
    },
}

/// One stack frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackEntry {
    /// Last known position in this frame; for every frame but the top this
    /// is the line that made the call above it
    pub line: Option<SourceLine>,
    pub kind: FrameKind,
}

impl StackEntry {
    /// Text for the `where` attribute of `stack_get`
    pub fn name(&self) -> String {
        match &self.kind {
            FrameKind::Thread { desc } => desc.clone(),
            FrameKind::Native { name } | FrameKind::User { name, .. } => format!("{}()", name),
        }
    }
}

/// Growable array of frames, bottom first
#[derive(Debug)]
pub struct CallStack {
    entries: Vec<StackEntry>,
}

impl Default for CallStack {
    fn default() -> Self {
        Self::new()
    }
}

impl CallStack {
    pub fn new() -> Self {
        Self::with_capacity(INITIAL_STACK_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity.max(1)),
        }
    }

    /// Number of frames
    pub fn depth(&self) -> usize {
        self.entries.len()
    }

    pub fn capacity(&self) -> usize {
        self.entries.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Push a frame; `current` is recorded as the caller's position
    pub fn push(&mut self, kind: FrameKind, current: Option<SourceLine>) -> &StackEntry {
        if self.entries.len() == self.entries.capacity() {
            self.expand();
        }
        if let Some(top) = self.entries.last_mut() {
            top.line = current;
        }
        self.entries.push(StackEntry {
            line: current,
            kind,
        });
        &self.entries[self.entries.len() - 1]
    }

    // Doubling keeps reallocations rare even for deep recursion.
    fn expand(&mut self) {
        let additional = self.entries.capacity().max(1);
        self.entries.reserve_exact(additional);
        tracing::debug!(capacity = self.entries.capacity(), "Call stack expanded");
    }

    /// Remove the top frame
    pub fn pop(&mut self) -> Option<StackEntry> {
        self.entries.pop()
    }

    pub fn top(&self) -> Option<&StackEntry> {
        self.entries.last()
    }

    /// Frame `depth` levels below the top (0 = top)
    pub fn entry_at(&self, depth: usize) -> Option<&StackEntry> {
        let index = self.entries.len().checked_sub(depth + 1)?;
        self.entries.get(index)
    }

    /// Frames from the top down
    pub fn iter_from_top(&self) -> impl Iterator<Item = &StackEntry> {
        self.entries.iter().rev()
    }

    /// Local variable scope visible at `depth`
    ///
    /// Walks down from the requested frame to the nearest user function. If
    /// a deeper invocation of the same function exists, this frame's
    /// variables were backed up when that invocation started, so the scope
    /// points at the backup held by the closest such invocation.
    pub fn local_scope(&self, depth: usize) -> Option<LocalScope> {
        let start = self.entries.len().checked_sub(depth + 1)?;
        let (index, func) = self.entries[..=start]
            .iter()
            .enumerate()
            .rev()
            .find_map(|(i, entry)| match entry.kind {
                FrameKind::User { func, .. } => Some((i, func)),
                _ => None,
            })?;

        let deeper_call = self.entries[index + 1..].iter().find_map(|entry| match entry.kind {
            FrameKind::User {
                func: f, call, ..
            } if f == func => Some(call),
            _ => None,
        });

        Some(LocalScope {
            func,
            storage: match deeper_call {
                Some(call) => VarStorage::Backup(call),
                None => VarStorage::Live,
            },
        })
    }
}
