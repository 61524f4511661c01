//! Program runner
//!
//! Executes a [`Program`] statement by statement, calling the session hooks
//! exactly where an interpreter would: before each statement, around calls
//! and output, and when something is thrown.

use std::collections::BTreeMap;

use crate::engine::{Directive, FatalAction, FrameKind, Session, Transport, Value};

use super::host::ScriptHost;
use super::program::{Action, Program, Statement};

/// Description of the script's only thread
pub const MAIN_THREAD: &str = "auto-execute";

/// How a program run ended
#[derive(Debug, Default)]
pub struct RunOutcome {
    /// The debugger (or a failed connection) terminated the script
    pub stopped: bool,
    /// Text of an exception nothing caught
    pub uncaught: Option<String>,
    /// Output that was not redirected to the debugger
    pub output: Vec<String>,
    /// Errors reported through the fatal-error hook
    pub fatal_errors: Vec<String>,
}

/// Result of executing statements
enum Signal {
    Next,
    Return(Value),
    Throw(Value),
    Stop,
}

/// Runs one program against a debug session
pub struct ScriptRunner<'p> {
    program: &'p Program,
    host: ScriptHost,
}

impl<'p> ScriptRunner<'p> {
    pub fn new(program: &'p Program) -> Self {
        Self {
            program,
            host: ScriptHost::new(program),
        }
    }

    /// Print script output as it happens
    pub fn with_echo(mut self, echo: bool) -> Self {
        self.host = self.host.with_echo(echo);
        self
    }

    pub fn with_fatal_action(mut self, action: FatalAction) -> Self {
        self.host = self.host.with_fatal_action(action);
        self
    }

    pub fn host(&self) -> &ScriptHost {
        &self.host
    }

    /// Run the program to completion (or until the debugger stops it)
    pub fn run<T: Transport>(&mut self, session: &mut Session<T>) -> RunOutcome {
        tracing::info!(program = %self.program.name, "Running program");
        let program = self.program;
        let mut outcome = RunOutcome::default();

        self.host.enter_thread();
        session.push_frame(FrameKind::Thread {
            desc: MAIN_THREAD.to_string(),
        });

        let signal = match session.begin(&mut self.host) {
            Directive::Stop => Signal::Stop,
            Directive::Continue => self.exec_block(session, &program.main),
        };

        match signal {
            Signal::Stop => outcome.stopped = true,
            Signal::Throw(value) => {
                let text = describe(&value);
                tracing::warn!(error = %text, "Uncaught exception");
                self.host.emit(format!("Error: {}", text), true);
                outcome.uncaught = Some(text);
            }
            Signal::Next | Signal::Return(_) => {}
        }

        self.host.leave_frame();
        if session.on_function_exit(&mut self.host) == Directive::Stop {
            outcome.stopped = true;
        }
        if !outcome.stopped {
            session.exit(&mut self.host);
        }

        outcome.output = self.host.take_output();
        outcome.fatal_errors = self.host.fatal_errors().to_vec();
        outcome
    }

    fn exec_block<T: Transport>(&mut self, session: &mut Session<T>, statements: &'p [Statement]) -> Signal {
        for stmt in statements {
            let line = self.host.source_line(stmt.line);
            if session.on_line(&mut self.host, line) == Directive::Stop {
                return Signal::Stop;
            }
            if let Some(condition) = &stmt.when {
                match self.host.eval(condition) {
                    Ok(value) if !value.is_truthy() => continue,
                    Ok(_) => {}
                    Err(e) => return self.raise(session, Value::String(e)),
                }
            }
            match self.exec(session, &stmt.action) {
                Signal::Next => {}
                other => return other,
            }
        }
        Signal::Next
    }

    fn exec<T: Transport>(&mut self, session: &mut Session<T>, action: &'p Action) -> Signal {
        match action {
            Action::Set { name, expr, value } => {
                let result = match (expr, value) {
                    (Some(expr), _) => self.host.eval(expr),
                    (None, Some(yaml)) => Ok(super::object::value_from_yaml(yaml)),
                    (None, None) => Ok(Value::Undefined),
                };
                match result {
                    Ok(value) => {
                        self.host.assign(name, value);
                        Signal::Next
                    }
                    Err(e) => self.raise(session, Value::String(e)),
                }
            }
            Action::Call {
                function,
                args,
                result,
            } => match self.call(session, function, args) {
                Ok(value) => {
                    if let Some(result) = result {
                        self.host.assign(result, value);
                    }
                    Signal::Next
                }
                Err(signal) => signal,
            },
            Action::Print { expr, stderr } => match self.host.eval(expr) {
                Ok(value) => self.print(session, describe(&value), *stderr),
                Err(e) => self.raise(session, Value::String(e)),
            },
            Action::Throw { expr } => {
                let value = self.host.eval(expr).unwrap_or_else(Value::String);
                self.raise(session, value)
            }
            Action::Return { expr } => match expr.as_deref().map(|e| self.host.eval(e)) {
                None => Signal::Return(Value::Undefined),
                Some(Ok(value)) => Signal::Return(value),
                Some(Err(e)) => self.raise(session, Value::String(e)),
            },
            Action::Nop => Signal::Next,
        }
    }

    /// Call a user-defined function; `Err` carries a throw or stop
    fn call<T: Transport>(
        &mut self,
        session: &mut Session<T>,
        name: &str,
        args: &[String],
    ) -> Result<Value, Signal> {
        let program = self.program;
        let Some((index, function)) = program.function(name) else {
            return Err(self.raise(
                session,
                Value::String(format!("Call to nonexistent function '{}'", name)),
            ));
        };

        let mut locals = BTreeMap::new();
        for (i, param) in function.params.iter().enumerate() {
            let value = match args.get(i) {
                Some(arg) => match self.host.eval(arg) {
                    Ok(value) => value,
                    Err(e) => return Err(self.raise(session, Value::String(e))),
                },
                None => Value::Undefined,
            };
            locals.insert(param.clone(), value);
        }

        let (func, call) = self.host.enter_function(index, locals);
        session.push_frame(FrameKind::User {
            name: function.name.clone(),
            func,
            call,
        });
        let signal = self.exec_block(session, &function.body);
        self.host.leave_frame();
        let directive = session.on_function_exit(&mut self.host);

        match signal {
            Signal::Stop => Err(Signal::Stop),
            _ if directive == Directive::Stop => Err(Signal::Stop),
            Signal::Throw(value) => Err(Signal::Throw(value)),
            Signal::Return(value) => Ok(value),
            Signal::Next => Ok(Value::Undefined),
        }
    }

    fn print<T: Transport>(&mut self, session: &mut Session<T>, text: String, stderr: bool) -> Signal {
        let routine = if stderr { "FileAppend" } else { "MsgBox" };
        self.host.enter_native();
        session.push_frame(FrameKind::Native {
            name: routine.to_string(),
        });
        let redirected = if stderr {
            session.on_stderr(&mut self.host, &text)
        } else {
            session.on_stdout(&mut self.host, &text)
        };
        if !redirected {
            self.host.emit(text, stderr);
        }
        self.host.leave_frame();
        match session.on_function_exit(&mut self.host) {
            Directive::Stop => Signal::Stop,
            Directive::Continue => Signal::Next,
        }
    }

    fn raise<T: Transport>(&mut self, session: &mut Session<T>, value: Value) -> Signal {
        tracing::debug!(error = %describe(&value), "Exception thrown");
        match session.on_exception(&mut self.host, value.clone()) {
            Some(Directive::Stop) => Signal::Stop,
            _ => Signal::Throw(value),
        }
    }
}

/// Text of a value as the script would print it
fn describe(value: &Value) -> String {
    match value {
        Value::Object(obj) => format!("<{}>", obj.class_name()),
        other => other.to_text().unwrap_or_default(),
    }
}
