//! End-to-end tests over a real TCP connection
//!
//! Each test binds the async client on an ephemeral port, runs a fixture
//! program under the engine on its own thread, and drives the session the
//! way an IDE would.

use std::path::PathBuf;
use std::thread::{self, JoinHandle};

use dbgp::client::{DbgpClient, DbgpListener, InitPacket, Response};
use dbgp::engine::{Session, SessionSettings};
use dbgp::testing::{Program, RunOutcome, ScriptRunner};

fn load_fixture(name: &str) -> Program {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name);
    Program::load(&path).expect("Failed to load fixture")
}

/// Start `fixture` under the engine and accept its connection
async fn start_engine(fixture: &str) -> (DbgpClient, InitPacket, JoinHandle<RunOutcome>) {
    let listener = DbgpListener::bind("127.0.0.1", 0).await.expect("bind");
    let port = listener.local_addr().expect("local addr").port();
    let program = load_fixture(fixture);

    let engine = thread::spawn(move || {
        let mut session =
            Session::connect("127.0.0.1", port, SessionSettings::default()).expect("connect");
        ScriptRunner::new(&program).run(&mut session)
    });

    let (client, init) = listener.accept().await.expect("accept");
    (client, init, engine)
}

async fn ok(client: &mut DbgpClient, command: &str) -> Response {
    let response = client.command(command).await.expect("command failed");
    assert!(
        !response.is_error(),
        "{} failed: {:?}",
        command,
        response.error
    );
    response
}

fn top_frame_line(response: &Response) -> Option<String> {
    response
        .element
        .children_named("stack")
        .next()
        .and_then(|frame| frame.attr("lineno"))
        .map(str::to_string)
}

#[tokio::test]
async fn test_breakpoint_then_step_over() {
    let (mut client, init, engine) = start_engine("counter.yaml").await;
    assert_eq!(init.fileuri, "file:///a.ahk");
    assert_eq!(init.protocol_version, "1.0");

    let status = ok(&mut client, "status").await;
    assert_eq!(status.status(), Some("starting"));

    let set = ok(&mut client, "breakpoint_set -t line -f file:///a.ahk -n 10").await;
    assert_eq!(set.attr("id"), Some("1"));
    assert_eq!(set.attr("state"), Some("enabled"));

    let run = ok(&mut client, "run").await;
    assert_eq!(run.status(), Some("break"));
    assert_eq!(run.reason(), Some("breakpoint"));

    let stack = ok(&mut client, "stack_get").await;
    let frames: Vec<_> = stack.element.children_named("stack").collect();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].attr("filename"), Some("file:///a.ahk"));
    assert_eq!(frames[0].attr("lineno"), Some("10"));

    let step = ok(&mut client, "step_over").await;
    assert_eq!(step.status(), Some("break"));
    assert_eq!(step.reason(), Some("step"));
    let stack = ok(&mut client, "stack_get").await;
    assert_eq!(top_frame_line(&stack).as_deref(), Some("11"));

    let count = ok(&mut client, "property_get -n count").await;
    let property = count.element.child("property").expect("property element");
    assert_eq!(property.attr("type"), Some("integer"));
    assert_eq!(property.text.as_deref(), Some("1"));

    let detach = ok(&mut client, "detach").await;
    assert_eq!(detach.status(), Some("stopping"));

    let outcome = engine.join().expect("engine thread panicked");
    assert!(!outcome.stopped);
    assert!(outcome.uncaught.is_none());
    assert_eq!(outcome.output, vec!["1".to_string(), "warn".to_string()]);
}

#[tokio::test]
async fn test_step_into_function_and_out() {
    let (mut client, _init, engine) = start_engine("counter.yaml").await;

    ok(&mut client, "breakpoint_set -t line -f file:///a.ahk -n 10").await;
    ok(&mut client, "run").await;

    let step = ok(&mut client, "step_into").await;
    assert_eq!(step.reason(), Some("step"));
    let stack = ok(&mut client, "stack_get").await;
    let frames: Vec<_> = stack.element.children_named("stack").collect();
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0].attr("where"), Some("Bump()"));
    assert_eq!(frames[0].attr("lineno"), Some("6"));
    assert_eq!(frames[1].attr("lineno"), Some("10"));

    let depth = ok(&mut client, "stack_depth").await;
    assert_eq!(depth.attr("depth"), Some("2"));

    let out = ok(&mut client, "step_out").await;
    assert_eq!(out.status(), Some("break"));
    let stack = ok(&mut client, "stack_get").await;
    assert_eq!(stack.element.children_named("stack").count(), 1);

    ok(&mut client, "stop").await;
    let outcome = engine.join().expect("engine thread panicked");
    assert!(outcome.stopped);
    assert!(outcome.output.is_empty());
}

#[tokio::test]
async fn test_redirected_output_arrives_as_streams() {
    let (mut client, _init, engine) = start_engine("counter.yaml").await;

    let stdout = ok(&mut client, "stdout -c 1").await;
    assert_eq!(stdout.attr("success"), Some("1"));
    ok(&mut client, "stderr -c 2").await;

    let run = ok(&mut client, "run").await;
    assert_eq!(run.status(), Some("stopping"));

    let streams = client.take_streams();
    assert_eq!(streams.len(), 2);
    assert_eq!(streams[0].stream, "stdout");
    assert_eq!(streams[0].data, "1");
    assert_eq!(streams[1].stream, "stderr");
    assert_eq!(streams[1].data, "warn");

    // The script has finished but globals are still inspectable
    let name = ok(&mut client, "property_get -c 1 -n settings.name").await;
    let property = name.element.child("property").expect("property element");
    assert_eq!(property.text.as_deref(), Some("demo"));

    ok(&mut client, "stop").await;
    let outcome = engine.join().expect("engine thread panicked");
    // Copied output is still printed; redirected output is not
    assert_eq!(outcome.output, vec!["1".to_string()]);
}

#[tokio::test]
async fn test_exception_breakpoint_inside_function() {
    let (mut client, init, engine) = start_engine("throws.yaml").await;
    assert_eq!(init.fileuri, "file:///scripts/throws.ahk");

    ok(&mut client, "breakpoint_set -t exception").await;
    let run = ok(&mut client, "run").await;
    assert_eq!(run.status(), Some("break"));
    assert_eq!(run.reason(), Some("exception"));

    let stack = ok(&mut client, "stack_get").await;
    let frames: Vec<_> = stack.element.children_named("stack").collect();
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0].attr("where"), Some("Check()"));
    assert_eq!(frames[0].attr("lineno"), Some("21"));
    assert_eq!(frames[1].attr("lineno"), Some("2"));

    let exception = ok(&mut client, "property_get -n <exception>").await;
    let property = exception.element.child("property").expect("property element");
    assert_eq!(property.text.as_deref(), Some("bad value"));

    let value = ok(&mut client, "property_get -n value").await;
    let property = value.element.child("property").expect("property element");
    assert_eq!(property.text.as_deref(), Some("5"));

    let run = ok(&mut client, "run").await;
    assert_eq!(run.status(), Some("stopping"));
    ok(&mut client, "detach").await;

    let outcome = engine.join().expect("engine thread panicked");
    assert_eq!(outcome.uncaught.as_deref(), Some("bad value"));
    assert!(!outcome.output.iter().any(|line| line == "unreachable"));
}

#[tokio::test]
async fn test_error_responses_keep_the_session_alive() {
    let (mut client, _init, engine) = start_engine("counter.yaml").await;

    let missing = client.command("breakpoint_get -d 42").await.expect("command");
    let error = missing.error.expect("expected an error");
    assert_eq!(error.code, 205);

    let unknown = client.command("eval -- MQ==").await.expect("command");
    assert_eq!(unknown.error.map(|e| e.code), Some(4));

    let no_code = client
        .command("breakpoint_set -t line -f file:///a.ahk -n 99")
        .await
        .expect("command");
    assert_eq!(no_code.error.map(|e| e.code), Some(203));

    let status = ok(&mut client, "status").await;
    assert_eq!(status.status(), Some("starting"));

    ok(&mut client, "stop").await;
    let outcome = engine.join().expect("engine thread panicked");
    assert!(outcome.stopped);
}
