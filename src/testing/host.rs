//! The scripted host's variables, call records and [`Host`] implementation

use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::{Path, PathBuf};

use crate::engine::{
    CallId, FatalAction, Facets, FileIndex, FuncId, Host, LineId, LocalScope, SourceLine,
    Value, VarScope, VarStorage, Variable,
};

use super::expr;
use super::object::value_from_yaml;
use super::program::Program;

/// The only file a scripted program has
pub const SCRIPT_FILE: FileIndex = 0;

/// One invocation of a user-defined function
#[derive(Debug)]
struct Invocation {
    func: FuncId,
    call: CallId,
    locals: BTreeMap<String, Value>,
}

/// Variable storage and bookkeeping for a running program
pub struct ScriptHost {
    script: PathBuf,
    source: Option<String>,
    lines: BTreeSet<u32>,
    globals: BTreeMap<String, Value>,
    statics: Vec<BTreeMap<String, Value>>,
    invocations: Vec<Invocation>,
    // Invocation index of each engine frame, `None` for threads and
    // native routines
    frames: Vec<Option<usize>>,
    next_call: u64,
    output: Vec<String>,
    echo: bool,
    fatal_action: FatalAction,
    fatal_errors: Vec<String>,
}

fn mapping_to_vars(map: &serde_yaml::Mapping) -> BTreeMap<String, Value> {
    map.iter()
        .filter_map(|(k, v)| Some((k.as_str()?.to_string(), value_from_yaml(v))))
        .collect()
}

impl ScriptHost {
    pub fn new(program: &Program) -> Self {
        Self {
            script: program.script.clone(),
            source: program.source.clone(),
            lines: program.executable_lines().collect(),
            globals: mapping_to_vars(&program.globals),
            statics: program
                .functions
                .iter()
                .map(|f| mapping_to_vars(&f.statics))
                .collect(),
            invocations: Vec::new(),
            frames: Vec::new(),
            next_call: 1,
            output: Vec::new(),
            echo: false,
            fatal_action: FatalAction::Disconnect,
            fatal_errors: Vec::new(),
        }
    }

    /// Also print script output to the real stdout/stderr
    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    /// What to do when the debugger connection fails
    pub fn with_fatal_action(mut self, action: FatalAction) -> Self {
        self.fatal_action = action;
        self
    }

    pub fn source_line(&self, number: u32) -> SourceLine {
        SourceLine {
            id: LineId(number),
            file: SCRIPT_FILE,
            number,
        }
    }

    /// Output not swallowed by redirection, in order
    pub fn output(&self) -> &[String] {
        &self.output
    }

    pub fn take_output(&mut self) -> Vec<String> {
        std::mem::take(&mut self.output)
    }

    pub fn fatal_errors(&self) -> &[String] {
        &self.fatal_errors
    }

    pub fn global(&self, name: &str) -> Option<&Value> {
        self.globals.get(name)
    }

    pub fn emit(&mut self, text: String, stderr: bool) {
        if self.echo {
            if stderr {
                eprintln!("{}", text);
            } else {
                println!("{}", text);
            }
        }
        self.output.push(text);
    }

    // === Frames ===

    pub fn enter_thread(&mut self) {
        self.frames.push(None);
    }

    pub fn enter_native(&mut self) {
        self.frames.push(None);
    }

    /// Start an invocation of function `index` with its parameters bound
    pub fn enter_function(&mut self, index: usize, locals: BTreeMap<String, Value>) -> (FuncId, CallId) {
        let func = FuncId(index as u32);
        let call = CallId(self.next_call);
        self.next_call += 1;
        self.invocations.push(Invocation { func, call, locals });
        self.frames.push(Some(self.invocations.len() - 1));
        (func, call)
    }

    pub fn leave_frame(&mut self) {
        if let Some(Some(_)) = self.frames.pop() {
            self.invocations.pop();
        }
    }

    /// Invocation running in the frame `depth` levels below the top
    fn invocation_at(&self, depth: usize) -> Option<usize> {
        let index = self.frames.len().checked_sub(depth + 1)?;
        self.frames[..=index].iter().rev().find_map(|frame| *frame)
    }

    fn invocation_for(&self, scope: &LocalScope) -> Option<usize> {
        let newest = |end: usize| {
            self.invocations[..end]
                .iter()
                .rposition(|inv| inv.func == scope.func)
        };
        match scope.storage {
            VarStorage::Live => newest(self.invocations.len()),
            VarStorage::Backup(call) => {
                let deeper = self.invocations.iter().position(|inv| inv.call == call)?;
                newest(deeper)
            }
        }
    }

    // === Variables ===

    fn read(&self, invocation: Option<usize>, name: &str) -> Option<Value> {
        if let Some(inv) = invocation.map(|i| &self.invocations[i]) {
            if let Some(value) = inv.locals.get(name) {
                return Some(value.clone());
            }
            if let Some(value) = self.statics[inv.func.0 as usize].get(name) {
                return Some(value.clone());
            }
        }
        self.globals.get(name).cloned()
    }

    fn write(&mut self, invocation: Option<usize>, name: &str, value: Value) {
        let Some(i) = invocation else {
            self.globals.insert(name.to_string(), value);
            return;
        };
        let func = self.invocations[i].func.0 as usize;
        match self.statics[func].get_mut(name) {
            Some(slot) => *slot = value,
            None => {
                self.invocations[i].locals.insert(name.to_string(), value);
            }
        }
    }

    /// Assign in the running frame: locals inside a function, else globals
    pub fn assign(&mut self, name: &str, value: Value) {
        let invocation = self.invocation_at(0);
        self.write(invocation, name, value);
    }

    /// Evaluate in the running frame
    pub fn eval(&self, source: &str) -> Result<Value, String> {
        self.eval_at(source, 0)
    }

    fn eval_at(&self, source: &str, depth: usize) -> Result<Value, String> {
        let invocation = self.invocation_at(depth);
        expr::evaluate(source, &|name| self.read(invocation, name))
    }
}

impl Host for ScriptHost {
    fn main_script(&self) -> &Path {
        &self.script
    }

    fn file_path(&self, file: FileIndex) -> Option<&Path> {
        (file == SCRIPT_FILE).then_some(self.script.as_path())
    }

    fn find_file(&self, path: &Path) -> Option<FileIndex> {
        (path == self.script).then_some(SCRIPT_FILE)
    }

    fn resolve_line(&self, file: FileIndex, line: u32) -> Option<SourceLine> {
        if file != SCRIPT_FILE {
            return None;
        }
        let number = *self.lines.range(line..).next()?;
        Some(self.source_line(number))
    }

    fn read_source(&self, path: &Path) -> io::Result<String> {
        match &self.source {
            Some(source) if path == self.script => Ok(source.clone()),
            _ => std::fs::read_to_string(path),
        }
    }

    fn global_variables(&self) -> Vec<Variable> {
        self.globals
            .iter()
            .map(|(name, value)| Variable::new(name.as_str(), value.clone()))
            .collect()
    }

    fn local_variables(&self, scope: &LocalScope) -> Vec<Variable> {
        let Some(i) = self.invocation_for(scope) else {
            return Vec::new();
        };
        let inv = &self.invocations[i];
        let statics = Facets {
            is_static: true,
            ..Facets::default()
        };
        inv.locals
            .iter()
            .map(|(name, value)| Variable::new(name.as_str(), value.clone()))
            .chain(
                self.statics[inv.func.0 as usize]
                    .iter()
                    .map(|(name, value)| Variable::new(name.as_str(), value.clone()).with_facets(statics)),
            )
            .collect()
    }

    fn set_variable(&mut self, scope: &VarScope, name: &str, value: Value) -> Result<(), String> {
        match scope {
            VarScope::Global => {
                self.write(None, name, value);
                Ok(())
            }
            VarScope::Local(local) => {
                let i = self
                    .invocation_for(local)
                    .ok_or_else(|| format!("no invocation holds '{}'", name))?;
                self.write(Some(i), name, value);
                Ok(())
            }
        }
    }

    fn evaluate(&mut self, expression: &str, depth: usize) -> Result<Value, String> {
        self.eval_at(expression, depth)
    }

    fn on_fatal_error(&mut self, message: &str) -> FatalAction {
        self.fatal_errors.push(message.to_string());
        self.fatal_action
    }
}
