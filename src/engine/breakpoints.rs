//! Breakpoint registry
//!
//! Breakpoints live in an ordered map keyed by id, with a second index from
//! executable line to breakpoint id so the per-line check in the hook is a
//! single hash lookup. The catch-all exception breakpoint is kept apart from
//! the map; it always exists and is only ever enabled or disabled.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;

use crate::common::{Error, Result};
use crate::protocol::codec::decode_file_uri;
use crate::protocol::{Buffer, BufferFull};

use super::host::{Host, LineId, SourceLine};

/// Id reported for the exception breakpoint
pub const EXCEPTION_BREAKPOINT_ID: u32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakpointType {
    Line,
    Call,
    Return,
    Exception,
    Conditional,
    Watch,
}

impl BreakpointType {
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "line" => Ok(Self::Line),
            "call" => Ok(Self::Call),
            "return" => Ok(Self::Return),
            "exception" => Ok(Self::Exception),
            "conditional" => Ok(Self::Conditional),
            "watch" => Ok(Self::Watch),
            other => Err(Error::BreakpointType(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Line => "line",
            Self::Call => "call",
            Self::Return => "return",
            Self::Exception => "exception",
            Self::Conditional => "conditional",
            Self::Watch => "watch",
        }
    }

    /// Types that can be placed on a source line
    pub fn is_line_based(&self) -> bool {
        matches!(self, Self::Line | Self::Conditional)
    }
}

impl fmt::Display for BreakpointType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakpointState {
    Enabled,
    Disabled,
}

impl BreakpointState {
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "enabled" => Ok(Self::Enabled),
            "disabled" => Ok(Self::Disabled),
            other => Err(Error::BreakpointState(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Enabled => "enabled",
            Self::Disabled => "disabled",
        }
    }
}

impl fmt::Display for BreakpointState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Breakpoint {
    pub id: u32,
    pub kind: BreakpointType,
    pub state: BreakpointState,
    /// Removed after the first hit
    pub temporary: bool,
    /// `None` only for the exception breakpoint
    pub line: Option<SourceLine>,
    /// Condition, evaluated by the host before suspending
    pub expression: Option<String>,
    pub hit_count: u32,
}

impl Breakpoint {
    pub fn is_enabled(&self) -> bool {
        self.state == BreakpointState::Enabled
    }

    /// Write the `<breakpoint>` element used by `breakpoint_get` and friends
    pub fn write_xml(&self, buf: &mut Buffer, host: &dyn Host) -> std::result::Result<(), BufferFull> {
        write!(
            buf,
            "<breakpoint id=\"{}\" type=\"{}\" state=\"{}\"",
            self.id, self.kind, self.state
        )?;
        match self.line {
            Some(line) => {
                if let Some(path) = host.file_path(line.file) {
                    buf.write_str(" filename=\"")?;
                    buf.write_file_uri(path)?;
                    buf.write_str("\"")?;
                }
                write!(buf, " lineno=\"{}\"", line.number)?;
            }
            None => buf.write_str(" exception=\"*\"")?,
        }
        write!(
            buf,
            " temporary=\"{}\" hit_count=\"{}\"",
            self.temporary as u8, self.hit_count
        )?;
        match &self.expression {
            Some(expression) => {
                buf.write_str("><expression>")?;
                buf.write_base64(expression.as_bytes())?;
                buf.write_str("</expression></breakpoint>")
            }
            None => buf.write_str("/>"),
        }
    }
}

/// Arguments of a new line-based breakpoint
#[derive(Debug, Clone)]
pub struct NewBreakpoint {
    pub kind: BreakpointType,
    pub state: BreakpointState,
    pub temporary: bool,
    pub line: SourceLine,
    pub expression: Option<String>,
}

/// All breakpoints of one session
#[derive(Debug)]
pub struct BreakpointRegistry {
    breakpoints: BTreeMap<u32, Breakpoint>,
    by_line: HashMap<LineId, u32>,
    exception: Breakpoint,
    next_id: u32,
}

impl Default for BreakpointRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl BreakpointRegistry {
    pub fn new() -> Self {
        Self {
            breakpoints: BTreeMap::new(),
            by_line: HashMap::new(),
            exception: Breakpoint {
                id: EXCEPTION_BREAKPOINT_ID,
                kind: BreakpointType::Exception,
                state: BreakpointState::Disabled,
                temporary: false,
                line: None,
                expression: None,
                hit_count: 0,
            },
            next_id: 1,
        }
    }

    /// Add a breakpoint, or update the one already on that line
    pub fn create(&mut self, new: NewBreakpoint) -> Result<&Breakpoint> {
        if !new.kind.is_line_based() {
            return Err(Error::BreakpointType(new.kind.to_string()));
        }
        if new.kind == BreakpointType::Conditional && new.expression.is_none() {
            return Err(Error::InvalidOptions(
                "conditional breakpoint requires an expression".to_string(),
            ));
        }

        let id = match self.by_line.get(&new.line.id) {
            Some(&existing) => {
                tracing::debug!(id = existing, "Updating breakpoint already on line");
                existing
            }
            None => {
                let id = self.next_id;
                self.next_id += 1;
                self.by_line.insert(new.line.id, id);
                id
            }
        };

        let hit_count = self.breakpoints.get(&id).map_or(0, |bp| bp.hit_count);
        let bp = self.breakpoints.entry(id).or_insert(Breakpoint {
            id,
            kind: new.kind,
            state: new.state,
            temporary: new.temporary,
            line: Some(new.line),
            expression: None,
            hit_count,
        });
        bp.kind = new.kind;
        bp.state = new.state;
        bp.temporary = new.temporary;
        bp.expression = new.expression;
        Ok(bp)
    }

    pub fn get(&self, id: u32) -> Result<&Breakpoint> {
        if id == EXCEPTION_BREAKPOINT_ID {
            return Ok(&self.exception);
        }
        self.breakpoints
            .get(&id)
            .ok_or(Error::BreakpointNotFound { id })
    }

    /// Change state, temporariness or line of an existing breakpoint
    pub fn update(
        &mut self,
        id: u32,
        state: Option<BreakpointState>,
        temporary: Option<bool>,
        line: Option<SourceLine>,
    ) -> Result<&Breakpoint> {
        if id == EXCEPTION_BREAKPOINT_ID {
            if let Some(state) = state {
                self.exception.state = state;
            }
            return Ok(&self.exception);
        }

        if !self.breakpoints.contains_key(&id) {
            return Err(Error::BreakpointNotFound { id });
        }
        if let Some(line) = line {
            match self.by_line.get(&line.id) {
                Some(&other) if other != id => {
                    return Err(Error::BreakpointInvalid(format!(
                        "line {} already has breakpoint {}",
                        line.number, other
                    )))
                }
                _ => {}
            }
        }

        let bp = self
            .breakpoints
            .get_mut(&id)
            .ok_or(Error::BreakpointNotFound { id })?;
        if let Some(state) = state {
            bp.state = state;
        }
        if let Some(temporary) = temporary {
            bp.temporary = temporary;
        }
        if let Some(line) = line {
            if let Some(old) = bp.line.replace(line) {
                self.by_line.remove(&old.id);
            }
            self.by_line.insert(line.id, id);
        }
        Ok(bp)
    }

    /// Remove a breakpoint; id 0 disables the exception breakpoint
    pub fn remove(&mut self, id: u32) -> Result<Breakpoint> {
        if id == EXCEPTION_BREAKPOINT_ID {
            self.exception.state = BreakpointState::Disabled;
            return Ok(self.exception.clone());
        }
        let bp = self
            .breakpoints
            .remove(&id)
            .ok_or(Error::BreakpointNotFound { id })?;
        if let Some(line) = bp.line {
            self.by_line.remove(&line.id);
        }
        Ok(bp)
    }

    /// Registered breakpoints in id order, without the exception breakpoint
    pub fn list(&self) -> impl Iterator<Item = &Breakpoint> {
        self.breakpoints.values()
    }

    pub fn len(&self) -> usize {
        self.breakpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakpoints.is_empty()
    }

    /// Enabled breakpoint on an executable line
    pub fn at_line(&self, line: LineId) -> Option<&Breakpoint> {
        let id = self.by_line.get(&line)?;
        self.breakpoints.get(id).filter(|bp| bp.is_enabled())
    }

    /// Count a hit; a temporary breakpoint is removed by its hit
    pub fn record_hit(&mut self, id: u32) {
        if id == EXCEPTION_BREAKPOINT_ID {
            self.exception.hit_count += 1;
            return;
        }
        let temporary = match self.breakpoints.get_mut(&id) {
            Some(bp) => {
                bp.hit_count += 1;
                bp.temporary
            }
            None => return,
        };
        if temporary {
            tracing::debug!(id, "Removing temporary breakpoint after hit");
            let _ = self.remove(id);
        }
    }

    pub fn exception(&self) -> &Breakpoint {
        &self.exception
    }

    pub fn set_exception_state(&mut self, state: BreakpointState) -> &Breakpoint {
        self.exception.state = state;
        &self.exception
    }
}

/// Resolve a client-supplied file URI and line to an executable line
///
/// Lines without code move forward to the next line that has some.
pub fn resolve_location(host: &dyn Host, uri: &str, line: u32) -> Result<SourceLine> {
    if line == 0 {
        return Err(Error::BreakpointInvalid("line numbers start at 1".to_string()));
    }
    let path = decode_file_uri(uri).map_err(|e| Error::BreakpointInvalid(e.to_string()))?;
    let file = host
        .find_file(&path)
        .or_else(|| find_by_file_name(host, &path))
        .ok_or_else(|| Error::BreakpointInvalid(format!("unknown file {}", path.display())))?;
    host.resolve_line(file, line)
        .ok_or_else(|| Error::no_code(&path.display().to_string(), line))
}

// Clients may send a path relative to a different root than the one the
// script was started with; fall back to matching the bare file name.
fn find_by_file_name(host: &dyn Host, path: &Path) -> Option<usize> {
    let name = path.file_name()?;
    let main = host.main_script();
    if main.file_name() == Some(name) {
        return host.find_file(main);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(n: u32) -> SourceLine {
        SourceLine {
            id: LineId(n),
            file: 0,
            number: n,
        }
    }

    fn line_bp(n: u32) -> NewBreakpoint {
        NewBreakpoint {
            kind: BreakpointType::Line,
            state: BreakpointState::Enabled,
            temporary: false,
            line: line(n),
            expression: None,
        }
    }

    #[test]
    fn test_ids_start_at_one_and_are_not_reused() {
        let mut reg = BreakpointRegistry::new();
        assert_eq!(reg.create(line_bp(10)).unwrap().id, 1);
        assert_eq!(reg.create(line_bp(20)).unwrap().id, 2);
        reg.remove(2).unwrap();
        assert_eq!(reg.create(line_bp(30)).unwrap().id, 3);
    }

    #[test]
    fn test_get_returns_what_was_set() {
        let mut reg = BreakpointRegistry::new();
        let id = reg
            .create(NewBreakpoint {
                kind: BreakpointType::Line,
                state: BreakpointState::Disabled,
                temporary: true,
                line: line(4),
                expression: None,
            })
            .unwrap()
            .id;
        let bp = reg.get(id).unwrap();
        assert_eq!(bp.kind, BreakpointType::Line);
        assert_eq!(bp.state, BreakpointState::Disabled);
        assert!(bp.temporary);
        assert_eq!(bp.line, Some(line(4)));
    }

    #[test]
    fn test_remove_twice_is_not_found() {
        let mut reg = BreakpointRegistry::new();
        let id = reg.create(line_bp(10)).unwrap().id;
        reg.remove(id).unwrap();
        let err = reg.remove(id).unwrap_err();
        assert!(matches!(err, Error::BreakpointNotFound { id: 1 }));
        assert!(reg.at_line(LineId(10)).is_none());
        assert!(reg.is_empty());
    }

    #[test]
    fn test_one_breakpoint_per_line() {
        let mut reg = BreakpointRegistry::new();
        let first = reg.create(line_bp(7)).unwrap().id;
        let mut again = line_bp(7);
        again.state = BreakpointState::Disabled;
        let second = reg.create(again).unwrap();
        assert_eq!(second.id, first);
        assert_eq!(second.state, BreakpointState::Disabled);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_unsupported_types() {
        let mut reg = BreakpointRegistry::new();
        for kind in [BreakpointType::Call, BreakpointType::Return, BreakpointType::Watch] {
            let mut bp = line_bp(1);
            bp.kind = kind;
            assert!(matches!(reg.create(bp), Err(Error::BreakpointType(_))));
        }
        assert!(BreakpointType::parse("bogus").is_err());
    }

    #[test]
    fn test_conditional_requires_expression() {
        let mut reg = BreakpointRegistry::new();
        let mut bp = line_bp(1);
        bp.kind = BreakpointType::Conditional;
        assert!(matches!(reg.create(bp.clone()), Err(Error::InvalidOptions(_))));
        bp.expression = Some("$x > 1".into());
        assert!(reg.create(bp).is_ok());
    }

    #[test]
    fn test_at_line_skips_disabled() {
        let mut reg = BreakpointRegistry::new();
        let id = reg.create(line_bp(3)).unwrap().id;
        assert!(reg.at_line(LineId(3)).is_some());
        reg.update(id, Some(BreakpointState::Disabled), None, None).unwrap();
        assert!(reg.at_line(LineId(3)).is_none());
    }

    #[test]
    fn test_update_moves_line_index() {
        let mut reg = BreakpointRegistry::new();
        let id = reg.create(line_bp(3)).unwrap().id;
        reg.update(id, None, None, Some(line(9))).unwrap();
        assert!(reg.at_line(LineId(3)).is_none());
        assert_eq!(reg.at_line(LineId(9)).map(|bp| bp.id), Some(id));

        let other = reg.create(line_bp(5)).unwrap().id;
        assert!(matches!(
            reg.update(other, None, None, Some(line(9))),
            Err(Error::BreakpointInvalid(_))
        ));
    }

    #[test]
    fn test_update_unknown_id_onto_taken_line() {
        let mut reg = BreakpointRegistry::new();
        reg.create(line_bp(9)).unwrap();
        assert!(matches!(
            reg.update(42, None, None, Some(line(9))),
            Err(Error::BreakpointNotFound { id: 42 })
        ));
    }

    #[test]
    fn test_temporary_removed_on_hit() {
        let mut reg = BreakpointRegistry::new();
        let mut bp = line_bp(2);
        bp.temporary = true;
        let id = reg.create(bp).unwrap().id;
        reg.record_hit(id);
        assert!(reg.get(id).is_err());
        assert!(reg.at_line(LineId(2)).is_none());
    }

    #[test]
    fn test_hit_count() {
        let mut reg = BreakpointRegistry::new();
        let id = reg.create(line_bp(2)).unwrap().id;
        reg.record_hit(id);
        reg.record_hit(id);
        assert_eq!(reg.get(id).unwrap().hit_count, 2);
    }

    #[test]
    fn test_exception_breakpoint_always_exists() {
        let mut reg = BreakpointRegistry::new();
        assert_eq!(reg.exception().state, BreakpointState::Disabled);
        reg.set_exception_state(BreakpointState::Enabled);
        assert!(reg.get(0).unwrap().is_enabled());
        reg.remove(0).unwrap();
        assert!(!reg.get(0).unwrap().is_enabled());
        // Still there after removal, and never listed.
        assert!(reg.get(0).is_ok());
        assert_eq!(reg.list().count(), 0);
    }
}
