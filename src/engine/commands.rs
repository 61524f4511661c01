//! Command handlers and the name → handler table
//!
//! Each handler writes a complete response into the session's response
//! buffer and tells the command loop what to do next. Failures are returned
//! as [`Error`]s; the loop discards whatever the handler wrote and sends an
//! error envelope instead.

use std::path::PathBuf;

use crate::common::{Error, Result};
use crate::protocol::codec::{decode_base64, decode_file_uri};
use crate::protocol::{Buffer, BufferFull, CommandArgs};

use super::breakpoints::{resolve_location, BreakpointState, BreakpointType, NewBreakpoint};
use super::host::{Host, SourceLine, VarScope, VarStorage};
use super::property::{
    self, data_page, PropertyPath, PropertySource, PropertyWriter, EXCEPTION_NAME,
};
use super::session::{EngineState, RunState, StreamMode};
use super::stack::StackEntry;

/// What the command loop does after a handler succeeded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Flow {
    /// Send the response and read the next command
    Reply,
    /// Resume the script; the response is deferred
    Resume,
    /// Send the response and terminate the script
    Stop,
    /// Send the response and let the script run on without the debugger
    Detach,
}

pub(super) type Handler = fn(&mut EngineState, &mut dyn Host, &CommandArgs) -> Result<Flow>;

/// Find the handler for a command name
pub(super) fn lookup(name: &str) -> Option<Handler> {
    let handler: Handler = match name {
        "status" => status,
        "feature_get" => feature_get,
        "feature_set" => feature_set,
        "run" => run,
        "step_into" => step_into,
        "step_over" => step_over,
        "step_out" => step_out,
        "break" => pause,
        "stop" => stop,
        "detach" => detach,
        "breakpoint_set" => breakpoint_set,
        "breakpoint_get" => breakpoint_get,
        "breakpoint_update" => breakpoint_update,
        "breakpoint_remove" => breakpoint_remove,
        "breakpoint_list" => breakpoint_list,
        "stack_depth" => stack_depth,
        "stack_get" => stack_get,
        "context_names" => context_names,
        "context_get" => context_get,
        "typemap_get" => typemap_get,
        "property_get" => property_get,
        "property_set" => property_set,
        "property_value" => property_value,
        "source" => source,
        "redirect_stdout" | "stdout" => redirect_stdout,
        "redirect_stderr" | "stderr" => redirect_stderr,
        _ => return None,
    };
    Some(handler)
}

/// Write `<response command=".." transaction_id=".."`, leaving the tag open
fn open_response(buf: &mut Buffer, args: &CommandArgs) -> std::result::Result<(), BufferFull> {
    buf.write_str("<response command=\"")?;
    buf.write_escaped(&args.name)?;
    buf.write_str("\" transaction_id=\"")?;
    buf.write_escaped(&args.transaction_id)?;
    buf.write_str("\"")
}

/// Write a complete error envelope
pub(super) fn write_error(
    buf: &mut Buffer,
    command: &str,
    transaction_id: &str,
    error: &Error,
) -> std::result::Result<(), BufferFull> {
    buf.write_str("<response command=\"")?;
    buf.write_escaped(command)?;
    buf.write_str("\" transaction_id=\"")?;
    buf.write_escaped(transaction_id)?;
    buf.write_str("\"")?;
    if let Some(extra) = error.extra_attributes() {
        buf.write_str(" ")?;
        buf.write_str(&extra)?;
    }
    write!(buf, "><error code=\"{}\"><message>", error.code().as_i32())?;
    buf.write_escaped(&error.to_string())?;
    buf.write_str("</message></error></response>")
}

// === Status and features ===

fn status(s: &mut EngineState, _host: &mut dyn Host, args: &CommandArgs) -> Result<Flow> {
    let status = s.status();
    open_response(&mut s.response, args)?;
    write!(s.response, " status=\"{}\" reason=\"ok\"/>", status)?;
    Ok(Flow::Reply)
}

fn feature_get(s: &mut EngineState, _host: &mut dyn Host, args: &CommandArgs) -> Result<Flow> {
    let name = args.require('n')?;
    let value = match name {
        "language_supports_threads" => Some("0".to_string()),
        "language_name" => Some(s.settings.language.clone()),
        "language_version" => Some(s.settings.language_version.clone()),
        "encoding" => Some("UTF-8".to_string()),
        "protocol_version" => Some("1".to_string()),
        "supports_async" => Some("1".to_string()),
        "breakpoint_types" => Some("line conditional exception".to_string()),
        "multiple_sessions" => Some("0".to_string()),
        "max_data" => Some(s.limits.max_data.to_string()),
        "max_children" => Some(s.limits.max_children.to_string()),
        "max_depth" => Some(s.limits.max_depth.to_string()),
        "data_encoding" => Some("base64".to_string()),
        "supports_conditional_breakpoints" => Some("1".to_string()),
        // A command name reports whether the command is implemented.
        other if lookup(other).is_some() => Some(String::new()),
        _ => None,
    };

    let buf = &mut s.response;
    open_response(buf, args)?;
    buf.write_str(" feature_name=\"")?;
    buf.write_escaped(name)?;
    write!(buf, "\" supported=\"{}\">", value.is_some() as u8)?;
    if let Some(value) = value {
        buf.write_escaped(&value)?;
    }
    buf.write_str("</response>")?;
    Ok(Flow::Reply)
}

fn feature_set(s: &mut EngineState, _host: &mut dyn Host, args: &CommandArgs) -> Result<Flow> {
    let name = args.require('n')?;
    args.require('v')?;
    let success = match name {
        "max_data" => {
            s.limits.max_data = required_number(args, 'v')?;
            true
        }
        "max_children" => {
            s.limits.max_children = required_number(args, 'v')?;
            true
        }
        "max_depth" => {
            s.limits.max_depth = required_number(args, 'v')?;
            true
        }
        _ => false,
    };
    tracing::debug!(feature = name, success, "feature_set");

    let buf = &mut s.response;
    open_response(buf, args)?;
    buf.write_str(" feature=\"")?;
    buf.write_escaped(name)?;
    write!(buf, "\" success=\"{}\"/>", success as u8)?;
    Ok(Flow::Reply)
}

fn required_number(args: &CommandArgs, flag: char) -> Result<usize> {
    args.parse::<usize>(flag)?
        .ok_or_else(|| Error::missing_arg(flag))
}

// === Continuation ===

fn resume(s: &mut EngineState, args: &CommandArgs, state: RunState) -> Result<Flow> {
    if s.is_running() {
        return Err(Error::CommandUnavailable(args.name.clone()));
    }
    s.state = state;
    s.continuation_depth = s.stack.depth();
    Ok(Flow::Resume)
}

fn run(s: &mut EngineState, _host: &mut dyn Host, args: &CommandArgs) -> Result<Flow> {
    s.pending_break = false;
    resume(s, args, RunState::Run)
}

fn step_into(s: &mut EngineState, _host: &mut dyn Host, args: &CommandArgs) -> Result<Flow> {
    resume(s, args, RunState::StepInto)
}

fn step_over(s: &mut EngineState, _host: &mut dyn Host, args: &CommandArgs) -> Result<Flow> {
    resume(s, args, RunState::StepOver)
}

fn step_out(s: &mut EngineState, _host: &mut dyn Host, args: &CommandArgs) -> Result<Flow> {
    resume(s, args, RunState::StepOut)
}

fn pause(s: &mut EngineState, _host: &mut dyn Host, args: &CommandArgs) -> Result<Flow> {
    if s.is_running() {
        s.pending_break = true;
    }
    open_response(&mut s.response, args)?;
    s.response.write_str(" success=\"1\"/>")?;
    Ok(Flow::Reply)
}

fn stop(s: &mut EngineState, _host: &mut dyn Host, args: &CommandArgs) -> Result<Flow> {
    open_response(&mut s.response, args)?;
    s.response.write_str(" status=\"stopped\" reason=\"ok\"/>")?;
    Ok(Flow::Stop)
}

fn detach(s: &mut EngineState, _host: &mut dyn Host, args: &CommandArgs) -> Result<Flow> {
    open_response(&mut s.response, args)?;
    s.response.write_str(" status=\"stopping\" reason=\"ok\"/>")?;
    Ok(Flow::Detach)
}

// === Breakpoints ===

fn breakpoint_id(args: &CommandArgs) -> Result<u32> {
    args.parse::<u32>('d')?.ok_or_else(|| Error::missing_arg('d'))
}

fn temporary_flag(args: &CommandArgs) -> Result<Option<bool>> {
    Ok(args.parse::<u8>('r')?.map(|r| r != 0))
}

fn decode_text(data: &str) -> Result<String> {
    Ok(String::from_utf8_lossy(&decode_base64(data)?).into_owned())
}

/// Resolve `-f`/`-n`, defaulting to the current file
fn breakpoint_target(s: &EngineState, host: &dyn Host, args: &CommandArgs) -> Result<SourceLine> {
    let line = args
        .parse::<u32>('n')?
        .ok_or_else(|| Error::BreakpointInvalid("missing line number".to_string()))?;
    if let Some(uri) = args.get('f') {
        return resolve_location(host, uri, line);
    }
    let file = match s.current_line {
        Some(current) => current.file,
        None => host
            .find_file(host.main_script())
            .ok_or_else(|| Error::BreakpointInvalid("no current file".to_string()))?,
    };
    if line == 0 {
        return Err(Error::BreakpointInvalid("line numbers start at 1".to_string()));
    }
    host.resolve_line(file, line).ok_or_else(|| {
        let name = host
            .file_path(file)
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        Error::no_code(&name, line)
    })
}

fn breakpoint_set(s: &mut EngineState, host: &mut dyn Host, args: &CommandArgs) -> Result<Flow> {
    let kind = BreakpointType::parse(args.require('t')?)?;
    let state = match args.get('s') {
        Some(state) => BreakpointState::parse(state)?,
        None => BreakpointState::Enabled,
    };
    let temporary = temporary_flag(args)?.unwrap_or(false);
    let expression = args.data().map(decode_text).transpose()?;

    let (id, state) = match kind {
        BreakpointType::Exception => {
            let bp = s.breakpoints.set_exception_state(state);
            (bp.id, bp.state)
        }
        kind if kind.is_line_based() => {
            let line = breakpoint_target(s, host, args)?;
            let bp = s.breakpoints.create(NewBreakpoint {
                kind,
                state,
                temporary,
                line,
                expression,
            })?;
            (bp.id, bp.state)
        }
        other => return Err(Error::BreakpointType(other.to_string())),
    };
    tracing::debug!(id, kind = %kind, "Breakpoint set");

    open_response(&mut s.response, args)?;
    write!(s.response, " state=\"{}\" id=\"{}\"/>", state, id)?;
    Ok(Flow::Reply)
}

fn breakpoint_get(s: &mut EngineState, host: &mut dyn Host, args: &CommandArgs) -> Result<Flow> {
    let id = breakpoint_id(args)?;
    let bp = s.breakpoints.get(id)?;
    let buf = &mut s.response;
    open_response(buf, args)?;
    buf.write_str(">")?;
    bp.write_xml(buf, host)?;
    buf.write_str("</response>")?;
    Ok(Flow::Reply)
}

fn breakpoint_update(s: &mut EngineState, host: &mut dyn Host, args: &CommandArgs) -> Result<Flow> {
    let id = breakpoint_id(args)?;
    let state = args.get('s').map(BreakpointState::parse).transpose()?;
    let temporary = temporary_flag(args)?;

    let existing = s.breakpoints.get(id)?;
    let line = match (args.parse::<u32>('n')?, existing.line) {
        (Some(number), Some(current)) => Some(host.resolve_line(current.file, number).ok_or_else(|| {
            let name = host
                .file_path(current.file)
                .map(|p| p.display().to_string())
                .unwrap_or_default();
            Error::no_code(&name, number)
        })?),
        _ => None,
    };

    s.breakpoints.update(id, state, temporary, line)?;
    open_response(&mut s.response, args)?;
    s.response.write_str("/>")?;
    Ok(Flow::Reply)
}

fn breakpoint_remove(s: &mut EngineState, host: &mut dyn Host, args: &CommandArgs) -> Result<Flow> {
    let id = breakpoint_id(args)?;
    let bp = s.breakpoints.remove(id)?;
    tracing::debug!(id, "Breakpoint removed");
    let buf = &mut s.response;
    open_response(buf, args)?;
    buf.write_str(">")?;
    bp.write_xml(buf, host)?;
    buf.write_str("</response>")?;
    Ok(Flow::Reply)
}

fn breakpoint_list(s: &mut EngineState, host: &mut dyn Host, args: &CommandArgs) -> Result<Flow> {
    let buf = &mut s.response;
    open_response(buf, args)?;
    buf.write_str(">")?;
    for bp in s.breakpoints.list() {
        bp.write_xml(buf, host)?;
    }
    buf.write_str("</response>")?;
    Ok(Flow::Reply)
}

// === Stack ===

/// `-d`, checked against the current stack
fn requested_depth(s: &EngineState, args: &CommandArgs) -> Result<usize> {
    let depth = args.parse::<usize>('d')?.unwrap_or(0);
    if depth > 0 && depth >= s.stack.depth() {
        return Err(Error::InvalidStackDepth(depth));
    }
    Ok(depth)
}

fn stack_depth(s: &mut EngineState, _host: &mut dyn Host, args: &CommandArgs) -> Result<Flow> {
    let depth = s.stack.depth();
    open_response(&mut s.response, args)?;
    write!(s.response, " depth=\"{}\"/>", depth)?;
    Ok(Flow::Reply)
}

fn write_frame(
    buf: &mut Buffer,
    host: &dyn Host,
    level: usize,
    entry: &StackEntry,
    line: Option<SourceLine>,
) -> std::result::Result<(), BufferFull> {
    let path = line
        .and_then(|l| host.file_path(l.file))
        .unwrap_or_else(|| host.main_script());
    write!(buf, "<stack level=\"{}\" type=\"file\" filename=\"", level)?;
    buf.write_file_uri(path)?;
    write!(buf, "\" lineno=\"{}\" where=\"", line.map_or(0, |l| l.number))?;
    buf.write_escaped(&entry.name())?;
    buf.write_str("\"/>")
}

fn stack_get(s: &mut EngineState, host: &mut dyn Host, args: &CommandArgs) -> Result<Flow> {
    let only = match args.get('d') {
        Some(_) => Some(requested_depth(s, args)?),
        None => None,
    };

    let buf = &mut s.response;
    open_response(buf, args)?;
    buf.write_str(">")?;
    for (level, entry) in s.stack.iter_from_top().enumerate() {
        if only.is_some_and(|d| d != level) {
            continue;
        }
        // The top frame is wherever execution is now; the others are
        // parked at the line that made the call above them.
        let line = if level == 0 { s.current_line } else { entry.line };
        write_frame(buf, host, level, entry, line)?;
    }
    buf.write_str("</response>")?;
    Ok(Flow::Reply)
}

// === Contexts and properties ===

const CONTEXT_LOCAL: i64 = 0;
const CONTEXT_GLOBAL: i64 = 1;

fn context_names(s: &mut EngineState, _host: &mut dyn Host, args: &CommandArgs) -> Result<Flow> {
    let buf = &mut s.response;
    open_response(buf, args)?;
    write!(
        buf,
        "><context name=\"Local\" id=\"{}\"/><context name=\"Global\" id=\"{}\"/></response>",
        CONTEXT_LOCAL, CONTEXT_GLOBAL
    )?;
    Ok(Flow::Reply)
}

fn check_context(context: Option<i64>) -> Result<i64> {
    match context.unwrap_or(CONTEXT_LOCAL) {
        c @ (CONTEXT_LOCAL | CONTEXT_GLOBAL) => Ok(c),
        other => Err(Error::InvalidContext(other)),
    }
}

fn local_properties(s: &EngineState, host: &dyn Host, depth: usize) -> Vec<(String, PropertySource)> {
    let mut out = Vec::new();
    if depth == 0 {
        if let Some(exception) = &s.exception {
            out.push((
                EXCEPTION_NAME.to_string(),
                PropertySource::Literal(exception.clone()),
            ));
        }
    }
    if let Some(scope) = s.stack.local_scope(depth) {
        let backup = matches!(scope.storage, VarStorage::Backup(_));
        for var in host.local_variables(&scope) {
            let name = var.name.clone();
            let source = if backup {
                PropertySource::Backup(var)
            } else {
                PropertySource::Var(var)
            };
            out.push((name, source));
        }
    }
    out
}

fn global_properties(host: &dyn Host) -> Vec<(String, PropertySource)> {
    host.global_variables()
        .into_iter()
        .map(|var| (var.name.clone(), PropertySource::Var(var)))
        .collect()
}

fn context_get(s: &mut EngineState, host: &mut dyn Host, args: &CommandArgs) -> Result<Flow> {
    let depth = requested_depth(s, args)?;
    let context = check_context(args.parse::<i64>('c')?)?;
    let properties = if context == CONTEXT_GLOBAL {
        global_properties(host)
    } else {
        local_properties(s, host, depth)
    };

    let limits = s.limits;
    let buf = &mut s.response;
    open_response(buf, args)?;
    write!(buf, " context=\"{}\">", context)?;
    let mut writer = PropertyWriter::new(buf, limits);
    for (name, source) in &properties {
        writer.write(name, name, source)?;
    }
    s.response.write_str("</response>")?;
    Ok(Flow::Reply)
}

fn typemap_get(s: &mut EngineState, _host: &mut dyn Host, args: &CommandArgs) -> Result<Flow> {
    let buf = &mut s.response;
    open_response(buf, args)?;
    buf.write_str(
        " xmlns:xsi=\"http://www.w3.org/2001/XMLSchema-instance\" xmlns:xsd=\"http://www.w3.org/2001/XMLSchema\">\
         <map name=\"string\" type=\"string\" xsi:type=\"xsd:string\"/>\
         <map name=\"integer\" type=\"int\" xsi:type=\"xsd:long\"/>\
         <map name=\"float\" type=\"float\" xsi:type=\"xsd:double\"/>\
         <map name=\"object\" type=\"object\"/>\
         <map name=\"undefined\" type=\"null\"/>\
         </response>",
    )?;
    Ok(Flow::Reply)
}

/// Find the variable a property name starts from
fn find_root(
    s: &EngineState,
    host: &dyn Host,
    depth: usize,
    context: i64,
    name: &str,
) -> Result<PropertySource> {
    let by_name = |(n, _): &(String, PropertySource)| n == name;
    let found = if context == CONTEXT_GLOBAL {
        global_properties(host).into_iter().find(by_name)
    } else {
        local_properties(s, host, depth)
            .into_iter()
            .find(by_name)
            .or_else(|| global_properties(host).into_iter().find(by_name))
    };
    found
        .map(|(_, source)| source)
        .ok_or_else(|| Error::UnknownProperty(name.to_string()))
}

fn lookup_property(
    s: &EngineState,
    host: &dyn Host,
    args: &CommandArgs,
) -> Result<(PropertyPath, PropertySource)> {
    let fullname = args.require('n')?;
    let depth = requested_depth(s, args)?;
    let context = check_context(args.parse::<i64>('c')?)?;
    let path = PropertyPath::parse(fullname)?;
    let root = find_root(s, host, depth, context, &path.root)?;
    let source = property::resolve(root, &path.segments, fullname)?;
    Ok((path, source))
}

fn request_limits(s: &EngineState, args: &CommandArgs) -> Result<(property::PropertyLimits, usize)> {
    let mut limits = s.limits;
    if let Some(max_data) = args.parse::<usize>('m')? {
        limits.max_data = max_data;
    }
    let page = args.parse::<usize>('p')?.unwrap_or(0);
    Ok((limits, page))
}

fn property_get(s: &mut EngineState, host: &mut dyn Host, args: &CommandArgs) -> Result<Flow> {
    let (path, source) = lookup_property(s, host, args)?;
    let (limits, page) = request_limits(s, args)?;
    let fullname = args.require('n')?;

    let buf = &mut s.response;
    open_response(buf, args)?;
    buf.write_str(">")?;
    PropertyWriter::new(buf, limits)
        .with_page(page)
        .write(&path.leaf_name(), fullname, &source)?;
    s.response.write_str("</response>")?;
    Ok(Flow::Reply)
}

fn property_value(s: &mut EngineState, host: &mut dyn Host, args: &CommandArgs) -> Result<Flow> {
    let (_, source) = lookup_property(s, host, args)?;
    let (limits, page) = request_limits(s, args)?;
    let text = source.text().unwrap_or_default();
    let data = text.as_bytes();

    let buf = &mut s.response;
    open_response(buf, args)?;
    write!(
        buf,
        " type=\"{}\" size=\"{}\" encoding=\"base64\">",
        source.type_name(),
        data.len()
    )?;
    buf.write_base64(data_page(data, limits.max_data, page))?;
    buf.write_str("</response>")?;
    Ok(Flow::Reply)
}

/// Scope a plain variable assignment goes to
fn assignment_scope(s: &EngineState, host: &dyn Host, depth: usize, context: i64, name: &str) -> VarScope {
    if context == CONTEXT_GLOBAL {
        return VarScope::Global;
    }
    let Some(scope) = s.stack.local_scope(depth) else {
        return VarScope::Global;
    };
    let is_local = host.local_variables(&scope).iter().any(|v| v.name == name);
    let is_global = host.global_variables().iter().any(|v| v.name == name);
    if is_global && !is_local {
        VarScope::Global
    } else {
        VarScope::Local(scope)
    }
}

fn property_set(s: &mut EngineState, host: &mut dyn Host, args: &CommandArgs) -> Result<Flow> {
    let fullname = args.require('n')?;
    let data = args
        .data()
        .ok_or_else(|| Error::InvalidOptions("missing value (--)".to_string()))?;
    let value = property::parse_typed_value(&decode_text(data)?, args.get('t'))?;
    let depth = requested_depth(s, args)?;
    let context = check_context(args.parse::<i64>('c')?)?;
    let path = PropertyPath::parse(fullname)?;

    if path.root == EXCEPTION_NAME {
        return Err(Error::EvalFailed(format!("{} is read-only", fullname)));
    }
    if path.segments.is_empty() {
        let scope = assignment_scope(s, host, depth, context, &path.root);
        host.set_variable(&scope, &path.root, value)
            .map_err(Error::EvalFailed)?;
    } else {
        let root = find_root(s, host, depth, context, &path.root)?;
        property::assign(root, &path.segments, fullname, value)?;
    }
    tracing::debug!(name = fullname, "Property set");

    open_response(&mut s.response, args)?;
    s.response.write_str(" success=\"1\"/>")?;
    Ok(Flow::Reply)
}

// === Source and streams ===

fn source(s: &mut EngineState, host: &mut dyn Host, args: &CommandArgs) -> Result<Flow> {
    let path = match args.get('f') {
        Some(uri) => decode_file_uri(uri).map_err(|_| Error::CannotOpenFile(uri.to_string()))?,
        None => s
            .current_line
            .and_then(|line| host.file_path(line.file))
            .unwrap_or_else(|| host.main_script())
            .to_path_buf(),
    };
    let text = read_source(host, &path)?;

    let begin = args.parse::<usize>('b')?.unwrap_or(1).max(1);
    let end = args.parse::<usize>('e')?;
    let count = match end {
        Some(end) if end < begin => 0,
        Some(end) => end - begin + 1,
        None => usize::MAX,
    };
    let selected: String = text.split_inclusive('\n').skip(begin - 1).take(count).collect();

    let buf = &mut s.response;
    open_response(buf, args)?;
    buf.write_str(" success=\"1\" encoding=\"base64\">")?;
    buf.write_base64(selected.as_bytes())?;
    buf.write_str("</response>")?;
    Ok(Flow::Reply)
}

fn read_source(host: &dyn Host, path: &PathBuf) -> Result<String> {
    host.read_source(path).map_err(|e| {
        tracing::debug!(path = %path.display(), error = %e, "Cannot read source");
        Error::CannotOpenFile(path.display().to_string())
    })
}

fn redirect_stdout(s: &mut EngineState, _host: &mut dyn Host, args: &CommandArgs) -> Result<Flow> {
    s.stdout_mode = StreamMode::parse(args.require('c')?)?;
    open_response(&mut s.response, args)?;
    s.response.write_str(" success=\"1\"/>")?;
    Ok(Flow::Reply)
}

fn redirect_stderr(s: &mut EngineState, _host: &mut dyn Host, args: &CommandArgs) -> Result<Flow> {
    s.stderr_mode = StreamMode::parse(args.require('c')?)?;
    open_response(&mut s.response, args)?;
    s.response.write_str(" success=\"1\"/>")?;
    Ok(Flow::Reply)
}
