//! Debug session: run state, interpreter hooks and the command loop
//!
//! The interpreter owns the [`Session`] and calls its hooks from the one
//! thread that runs the script. Suspending means blocking inside
//! [`Session::on_line`] (or another hook) while commands are read from the
//! client; the hook returns once a continuation command arrives.

use std::fmt;
use std::net::TcpStream;
use std::time::{Duration, Instant};

use crate::common::config::Config;
use crate::common::{Error, Result};
use crate::protocol::{codec, Buffer};

use super::breakpoints::{BreakpointRegistry, EXCEPTION_BREAKPOINT_ID};
use super::commands::{self, Flow};
use super::host::{FatalAction, Host, SourceLine, Transport};
use super::property::PropertyLimits;
use super::stack::{CallStack, FrameKind};
use super::value::Value;

/// Identity and tuning of a session
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub app_id: String,
    pub language: String,
    pub language_version: String,
    pub ide_key: String,
    pub session: String,
    /// Minimum time between checks for commands while the script runs
    pub poll_interval: Duration,
    pub limits: PropertyLimits,
    pub buffer_initial: usize,
    pub buffer_max: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for SessionSettings {
    fn from(config: &Config) -> Self {
        let engine = &config.engine;
        Self {
            app_id: engine.app_id.clone(),
            language: engine.language.clone(),
            language_version: engine.language_version.clone(),
            ide_key: engine.ide_key.clone(),
            session: engine.session.clone(),
            poll_interval: Duration::from_millis(engine.poll_interval_ms),
            limits: PropertyLimits {
                max_data: config.limits.max_data,
                max_children: config.limits.max_children,
                max_depth: config.limits.max_depth,
            },
            buffer_initial: config.buffers.initial_size,
            buffer_max: config.buffers.max_size_bytes(),
        }
    }
}

/// Execution state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// No continuation command received yet
    Starting,
    Run,
    Break,
    StepInto,
    StepOver,
    StepOut,
}

impl RunState {
    /// Value of the `status` attribute
    pub fn status(&self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Break => "break",
            Self::Run | Self::StepInto | Self::StepOver | Self::StepOut => "running",
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Starting => write!(f, "starting"),
            Self::Run => write!(f, "run"),
            Self::Break => write!(f, "break"),
            Self::StepInto => write!(f, "step_into"),
            Self::StepOver => write!(f, "step_over"),
            Self::StepOut => write!(f, "step_out"),
        }
    }
}

/// Redirection mode of one output stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamMode {
    /// Output goes to the real stream only
    #[default]
    Disabled,
    /// Output goes to the real stream and to the client
    Copy,
    /// Output goes to the client only
    Redirect,
}

impl StreamMode {
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim() {
            "0" => Ok(Self::Disabled),
            "1" => Ok(Self::Copy),
            "2" => Ok(Self::Redirect),
            other => Err(Error::InvalidOptions(format!(
                "invalid redirection mode '{}'",
                other
            ))),
        }
    }
}

/// What the interpreter should do after a hook returns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    /// Keep running the script
    Continue,
    /// Terminate the script
    Stop,
}

/// A `run`/`step_*` command whose response waits for the next break
#[derive(Debug, Clone)]
pub(super) struct Continuation {
    pub command: String,
    pub transaction_id: String,
}

/// Session state visible to command handlers
pub struct EngineState {
    pub(super) settings: SessionSettings,
    pub(super) state: RunState,
    /// The script has finished; only introspection remains
    pub(super) finished: bool,
    pub(super) stack: CallStack,
    pub(super) breakpoints: BreakpointRegistry,
    pub(super) current_line: Option<SourceLine>,
    /// Value being thrown while suspended on an exception
    pub(super) exception: Option<Value>,
    pub(super) continuation: Option<Continuation>,
    pub(super) continuation_depth: usize,
    pub(super) pending_break: bool,
    pub(super) stdout_mode: StreamMode,
    pub(super) stderr_mode: StreamMode,
    pub(super) limits: PropertyLimits,
    pub(super) response: Buffer,
}

impl EngineState {
    fn new(settings: SessionSettings) -> Self {
        let response = Buffer::with_limits(settings.buffer_initial, settings.buffer_max);
        Self {
            limits: settings.limits,
            settings,
            state: RunState::Starting,
            finished: false,
            stack: CallStack::new(),
            breakpoints: BreakpointRegistry::new(),
            current_line: None,
            exception: None,
            continuation: None,
            continuation_depth: 0,
            pending_break: false,
            stdout_mode: StreamMode::Disabled,
            stderr_mode: StreamMode::Disabled,
            response,
        }
    }

    /// Value of the `status` attribute
    pub(super) fn status(&self) -> &'static str {
        if self.finished {
            "stopping"
        } else {
            self.state.status()
        }
    }

    /// Whether the script is executing (commands arrive asynchronously)
    pub(super) fn is_running(&self) -> bool {
        !self.finished
            && matches!(
                self.state,
                RunState::Run | RunState::StepInto | RunState::StepOver | RunState::StepOut
            )
    }
}

/// One debugger connection
pub struct Session<T: Transport> {
    transport: Option<T>,
    command_buf: Buffer,
    engine: EngineState,
    last_poll: Instant,
    terminate: bool,
}

impl Session<TcpStream> {
    /// Connect to a listening debugger client
    pub fn connect(host: &str, port: u16, settings: SessionSettings) -> Result<Self> {
        let addr = format!("{}:{}", host, port);
        let stream = TcpStream::connect(&addr).map_err(|source| Error::ConnectFailed {
            addr: addr.clone(),
            source,
        })?;
        stream.set_nodelay(true)?;
        tracing::info!(addr = %addr, "Connected to debugger client");
        Ok(Self::new(stream, settings))
    }
}

impl<T: Transport> Session<T> {
    pub fn new(transport: T, settings: SessionSettings) -> Self {
        let command_buf = Buffer::with_limits(settings.buffer_initial, settings.buffer_max);
        Self {
            transport: Some(transport),
            command_buf,
            engine: EngineState::new(settings),
            last_poll: Instant::now(),
            terminate: false,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_some()
    }

    pub fn state(&self) -> RunState {
        self.engine.state
    }

    pub fn stack(&self) -> &CallStack {
        &self.engine.stack
    }

    pub fn breakpoints(&self) -> &BreakpointRegistry {
        &self.engine.breakpoints
    }

    pub fn limits(&self) -> PropertyLimits {
        self.engine.limits
    }

    pub fn current_line(&self) -> Option<SourceLine> {
        self.engine.current_line
    }

    pub fn stream_modes(&self) -> (StreamMode, StreamMode) {
        (self.engine.stdout_mode, self.engine.stderr_mode)
    }

    /// Send the `init` packet and serve commands until the first
    /// continuation
    pub fn begin(&mut self, host: &mut dyn Host) -> Directive {
        if !self.is_connected() {
            return Directive::Continue;
        }
        if let Err(e) = self.send_init(host) {
            return self.fail(host, e);
        }
        self.command_loop(host)
    }

    /// Record a new frame; call before entering a thread, native routine or
    /// user function
    pub fn push_frame(&mut self, kind: FrameKind) {
        self.engine.stack.push(kind, self.engine.current_line);
    }

    /// Hook called before every statement
    pub fn on_line(&mut self, host: &mut dyn Host, line: SourceLine) -> Directive {
        if self.terminate {
            return Directive::Stop;
        }
        self.engine.current_line = Some(line);
        if !self.is_connected() {
            return Directive::Continue;
        }

        if let Some(bp) = self.engine.breakpoints.at_line(line.id) {
            let id = bp.id;
            let condition = bp.expression.clone();
            if condition_holds(host, id, condition.as_deref()) {
                self.engine.breakpoints.record_hit(id);
                return self.suspend(host, "breakpoint");
            }
        }

        let depth = self.engine.stack.depth();
        let step_done = match self.engine.state {
            RunState::StepInto => true,
            RunState::StepOver => depth <= self.engine.continuation_depth,
            RunState::StepOut => depth < self.engine.continuation_depth,
            _ => false,
        };
        if step_done {
            return self.suspend(host, "step");
        }

        if let Some(directive) = self.poll(host) {
            return directive;
        }
        if self.engine.pending_break {
            self.engine.pending_break = false;
            return self.suspend(host, "ok");
        }
        Directive::Continue
    }

    /// Hook called when a frame ends; pops the call stack
    ///
    /// Returning from the frame a `step_over` or `step_out` was issued in
    /// suspends at the caller.
    pub fn on_function_exit(&mut self, host: &mut dyn Host) -> Directive {
        self.engine.stack.pop();
        if let Some(line) = self.engine.stack.top().and_then(|entry| entry.line) {
            self.engine.current_line = Some(line);
        }
        if self.terminate {
            return Directive::Stop;
        }
        if !self.is_connected() {
            return Directive::Continue;
        }

        let depth = self.engine.stack.depth();
        let stepping_out = matches!(self.engine.state, RunState::StepOver | RunState::StepOut);
        if stepping_out && depth > 0 && depth < self.engine.continuation_depth {
            return self.suspend(host, "step");
        }
        Directive::Continue
    }

    /// Hook called when the script throws
    ///
    /// Returns `None` when the exception was not reported to the client.
    pub fn on_exception(&mut self, host: &mut dyn Host, token: Value) -> Option<Directive> {
        if self.terminate {
            return Some(Directive::Stop);
        }
        if !self.is_connected() || !self.engine.breakpoints.exception().is_enabled() {
            return None;
        }
        self.engine.breakpoints.record_hit(EXCEPTION_BREAKPOINT_ID);
        self.engine.exception = Some(token);
        let directive = self.suspend(host, "exception");
        self.engine.exception = None;
        Some(directive)
    }

    /// Hook for script output to stdout; true means "do not print it"
    pub fn on_stdout(&mut self, host: &mut dyn Host, text: &str) -> bool {
        let mode = self.engine.stdout_mode;
        self.forward_output(host, "stdout", mode, text)
    }

    /// Hook for script output to stderr; true means "do not print it"
    pub fn on_stderr(&mut self, host: &mut dyn Host, text: &str) -> bool {
        let mode = self.engine.stderr_mode;
        self.forward_output(host, "stderr", mode, text)
    }

    /// Suspend at the next statement, as if the client had sent `break`
    pub fn request_break(&mut self) {
        self.engine.pending_break = true;
    }

    /// The script finished
    ///
    /// Answers the pending continuation with `stopping` and keeps serving
    /// commands until the client stops, detaches or disconnects.
    pub fn exit(&mut self, host: &mut dyn Host) {
        if !self.is_connected() {
            return;
        }
        tracing::info!("Script finished");
        self.engine.finished = true;
        self.engine.current_line = None;
        if let Err(e) = self.answer_continuation("stopping", "ok") {
            self.fail(host, e);
            return;
        }
        self.command_loop(host);
        if self.is_connected() {
            if let Err(e) = self.answer_continuation("stopping", "ok") {
                self.fail(host, e);
                return;
            }
        }
        self.disconnect();
    }

    /// Drop the connection; hooks become no-ops
    pub fn disconnect(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            if let Err(e) = transport.shutdown() {
                tracing::debug!(error = %e, "Shutdown failed");
            }
            tracing::info!("Debugger client detached");
        }
        self.engine.continuation = None;
        self.engine.pending_break = false;
    }

    fn send_init(&mut self, host: &dyn Host) -> Result<()> {
        let settings = &self.engine.settings;
        let buf = &mut self.engine.response;
        buf.clear();
        buf.write_str("<init appid=\"")?;
        buf.write_escaped(&settings.app_id)?;
        buf.write_str("\" ide_key=\"")?;
        buf.write_escaped(&settings.ide_key)?;
        buf.write_str("\" session=\"")?;
        buf.write_escaped(&settings.session)?;
        write!(buf, "\" thread=\"{}\" parent=\"\" language=\"", std::process::id())?;
        buf.write_escaped(&settings.language)?;
        buf.write_str("\" protocol_version=\"1.0\" fileuri=\"")?;
        buf.write_file_uri(host.main_script())?;
        buf.write_str("\"/>")?;
        self.send_response()
    }

    fn send_response(&mut self) -> Result<()> {
        let transport = self.transport.as_mut().ok_or(Error::NotConnected)?;
        tracing::trace!(
            packet = %String::from_utf8_lossy(self.engine.response.as_bytes()),
            "Sending packet"
        );
        codec::write_packet(transport, self.engine.response.as_bytes())
    }

    fn receive_command(&mut self) -> Result<String> {
        let transport = self.transport.as_mut().ok_or(Error::NotConnected)?;
        let line = codec::read_command(transport, &mut self.command_buf)?;
        tracing::trace!(command = %line, "Received command");
        Ok(line)
    }

    /// Serve commands until one of them resumes or ends the script
    fn command_loop(&mut self, host: &mut dyn Host) -> Directive {
        loop {
            match self.receive_command() {
                Ok(line) => {
                    if let Some(directive) = self.handle_command(host, &line) {
                        return directive;
                    }
                }
                Err(Error::Disconnected) | Err(Error::NotConnected) => {
                    tracing::info!("Debugger client closed the connection; detaching");
                    self.disconnect();
                    return Directive::Continue;
                }
                Err(e) => return self.fail(host, e),
            }
        }
    }

    /// Process commands that arrived while the script was running
    fn poll(&mut self, host: &mut dyn Host) -> Option<Directive> {
        if self.last_poll.elapsed() < self.engine.settings.poll_interval {
            return None;
        }
        self.last_poll = Instant::now();

        loop {
            let pending = if self.command_buf.find(0).is_some() {
                Ok(true)
            } else {
                match self.transport.as_mut() {
                    Some(transport) => transport.has_pending(),
                    None => return None,
                }
            };
            match pending {
                Ok(true) => {}
                Ok(false) => return None,
                Err(e) => return Some(self.fail(host, e.into())),
            }

            match self.receive_command() {
                Ok(line) => {
                    if let Some(directive) = self.handle_command(host, &line) {
                        return Some(directive);
                    }
                }
                Err(Error::Disconnected) | Err(Error::NotConnected) => {
                    tracing::info!("Debugger client closed the connection; detaching");
                    self.disconnect();
                    return Some(Directive::Continue);
                }
                Err(e) => return Some(self.fail(host, e)),
            }
        }
    }

    /// Dispatch one command line; `Some` means leave the command loop
    fn handle_command(&mut self, host: &mut dyn Host, line: &str) -> Option<Directive> {
        let args = match codec::parse_command(line) {
            Ok(args) => args,
            Err(failure) => {
                tracing::warn!(command = %line, reason = %failure.reason, "Malformed command");
                let command = failure.name.clone();
                let transaction_id = failure.transaction_id.clone();
                return self.reply_error(host, &command, &transaction_id, &Error::from(failure));
            }
        };

        self.engine.response.clear();
        let result = match commands::lookup(&args.name) {
            Some(handler) => handler(&mut self.engine, host, &args),
            None => Err(Error::UnimplementedCommand(args.name.clone())),
        };
        let result = result.and_then(|flow| {
            if self.engine.response.is_failed() {
                Err(Error::BufferExhausted {
                    requested: self.engine.response.len(),
                })
            } else {
                Ok(flow)
            }
        });

        match result {
            Ok(Flow::Reply) => self.send_or_fail(host),
            Ok(Flow::Resume) => {
                tracing::debug!(command = %args.name, state = %self.engine.state, "Resuming script");
                self.engine.continuation = Some(Continuation {
                    command: args.name.clone(),
                    transaction_id: args.transaction_id.clone(),
                });
                Some(Directive::Continue)
            }
            Ok(Flow::Stop) => {
                tracing::info!("Client requested stop");
                if let Some(directive) = self.send_or_fail(host) {
                    return Some(directive);
                }
                self.disconnect();
                self.terminate = true;
                Some(Directive::Stop)
            }
            Ok(Flow::Detach) => {
                tracing::info!("Client requested detach");
                if let Some(directive) = self.send_or_fail(host) {
                    return Some(directive);
                }
                self.disconnect();
                Some(Directive::Continue)
            }
            Err(e) if e.is_fatal() => Some(self.fail(host, e)),
            Err(e) => self.reply_error(host, &args.name, &args.transaction_id, &e),
        }
    }

    fn reply_error(
        &mut self,
        host: &mut dyn Host,
        command: &str,
        transaction_id: &str,
        error: &Error,
    ) -> Option<Directive> {
        tracing::debug!(command, code = error.code().as_i32(), error = %error, "Command failed");
        self.engine.response.clear();
        if let Err(e) = commands::write_error(&mut self.engine.response, command, transaction_id, error) {
            return Some(self.fail(host, e.into()));
        }
        self.send_or_fail(host)
    }

    fn send_or_fail(&mut self, host: &mut dyn Host) -> Option<Directive> {
        match self.send_response() {
            Ok(()) => None,
            Err(e) => Some(self.fail(host, e)),
        }
    }

    /// Enter the break state and serve commands
    fn suspend(&mut self, host: &mut dyn Host, reason: &str) -> Directive {
        self.engine.state = RunState::Break;
        tracing::debug!(reason, line = ?self.engine.current_line.map(|l| l.number), "Break");
        if let Err(e) = self.answer_continuation("break", reason) {
            return self.fail(host, e);
        }
        self.command_loop(host)
    }

    /// Send the deferred response to the last `run`/`step_*` command
    fn answer_continuation(&mut self, status: &str, reason: &str) -> Result<()> {
        let Some(continuation) = self.engine.continuation.take() else {
            return Ok(());
        };
        let buf = &mut self.engine.response;
        buf.clear();
        buf.write_str("<response command=\"")?;
        buf.write_escaped(&continuation.command)?;
        write!(buf, "\" status=\"{}\" reason=\"{}\" transaction_id=\"", status, reason)?;
        buf.write_escaped(&continuation.transaction_id)?;
        buf.write_str("\"/>")?;
        self.send_response()
    }

    fn forward_output(&mut self, host: &mut dyn Host, stream: &str, mode: StreamMode, text: &str) -> bool {
        if mode == StreamMode::Disabled || !self.is_connected() {
            return false;
        }
        match self.send_stream(stream, text) {
            Ok(()) => mode == StreamMode::Redirect,
            Err(e) => {
                self.fail(host, e);
                false
            }
        }
    }

    fn send_stream(&mut self, stream: &str, text: &str) -> Result<()> {
        let buf = &mut self.engine.response;
        buf.clear();
        write!(buf, "<stream type=\"{}\" encoding=\"base64\">", stream)?;
        buf.write_base64(text.as_bytes())?;
        buf.write_str("</stream>")?;
        self.send_response()
    }

    /// The connection is unusable; ask the host what to do and drop it
    fn fail(&mut self, host: &mut dyn Host, error: Error) -> Directive {
        tracing::error!(error = %error, "Debugger connection failed");
        let action = host.on_fatal_error(&error.to_string());
        self.disconnect();
        match action {
            FatalAction::Disconnect => Directive::Continue,
            FatalAction::Terminate => {
                self.terminate = true;
                Directive::Stop
            }
        }
    }
}

// A condition that cannot be evaluated never suspends.
fn condition_holds(host: &mut dyn Host, id: u32, condition: Option<&str>) -> bool {
    let Some(expression) = condition else {
        return true;
    };
    match host.evaluate(expression, 0) {
        Ok(value) => value.is_truthy(),
        Err(e) => {
            tracing::warn!(id, expression, error = %e, "Breakpoint condition failed");
            false
        }
    }
}
