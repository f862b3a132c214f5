//! End-to-end tests for the session harness
//!
//! These tests drive the `mock_target` binary, which prints a script and
//! then answers commands on stdin, in place of a real debugger.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use debug_harness::common::config::Config;
use debug_harness::session::ExpectationId;
use debug_harness::testing::run_scenario;
use debug_harness::{Error, LaunchSpec, Matcher, Session, SessionOptions, SessionState};
use tempfile::TempDir;

/// Test context with a scratch directory holding target scripts
struct TestContext {
    dir: TempDir,
}

impl TestContext {
    fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("Failed to create temp dir"),
        }
    }

    fn mock_target() -> PathBuf {
        PathBuf::from(env!("CARGO_BIN_EXE_mock_target"))
    }

    /// Write a script the mock prints at start-up
    fn script(&self, name: &str, lines: &[&str]) -> PathBuf {
        let path = self.dir.path().join(name);
        let mut content = lines.join("\n");
        if !lines.is_empty() {
            content.push('\n');
        }
        std::fs::write(&path, content).expect("Failed to write script");
        path
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Start a session whose break pattern is the line `ready`
    async fn session(&self, options: SessionOptions) -> Session {
        let script = self.script("scenario.txt", &["ready"]);
        Session::create(
            LaunchSpec::new(Self::mock_target(), script),
            options.break_pattern("^ready$"),
        )
        .await
        .expect("Failed to create session")
    }
}

fn fast_options() -> SessionOptions {
    SessionOptions::default()
        .default_timeout(Duration::from_secs(5))
        .terminate_grace(Duration::from_millis(300))
}

#[tokio::test]
async fn test_break_then_ping_pong() {
    let ctx = TestContext::new();
    let session = ctx.session(fast_options()).await;
    assert_eq!(session.state(), SessionState::Created);
    assert!(session.pid().is_some());

    let ready = session.wait_break().await.unwrap();
    assert_eq!(ready.text, "ready");
    assert_eq!(ready.sequence, 0);
    assert_eq!(session.state(), SessionState::Running);

    let pong = session.wait(Matcher::regex("pong").unwrap());
    session.send("ping").await.unwrap();
    let line = pong.await.unwrap();
    assert_eq!(line.text, "pong");
    assert_eq!(line.sequence, 1);

    session.quit().await;
    assert_eq!(session.state(), SessionState::Terminated);
}

#[tokio::test]
async fn test_workqueue_style_sequence() {
    let ctx = TestContext::new();
    let session = ctx.session(fast_options()).await;
    session.wait_break().await.unwrap();

    let tcp = session.exchange("v8 getactivehandles", "TCP").await.unwrap();
    assert!(tcp.text.contains("<Object: TCP"));

    let timer = session.exchange("v8 getactivehandles", "Timer").await.unwrap();
    assert!(timer.text.contains("<Object: Timer"));

    let fs = session
        .exchange("v8 getactiverequests", Matcher::regex("FSReqWrap").unwrap())
        .await
        .unwrap();
    assert!(fs.text.contains("<Object: FSReqWrap"));

    session.quit().await;
}

#[tokio::test]
async fn test_wait_times_out() {
    let ctx = TestContext::new();
    let session = ctx.session(fast_options()).await;
    session.wait_break().await.unwrap();

    let started = Instant::now();
    let err = session
        .wait_for(Matcher::regex("nomatch").unwrap(), Duration::from_millis(50))
        .await
        .unwrap_err();
    let elapsed = started.elapsed();

    match err {
        Error::Timeout { pattern, after } => {
            assert_eq!(pattern, "/nomatch/");
            assert_eq!(after, Duration::from_millis(50));
        }
        other => panic!("expected timeout, got {other:?}"),
    }
    assert!(elapsed >= Duration::from_millis(50), "{elapsed:?}");
    assert!(elapsed < Duration::from_secs(2), "{elapsed:?}");

    // The timed out wait left the queue; the next one sees new output
    let pong = session.exchange("ping", "pong").await.unwrap();
    assert_eq!(pong.text, "pong");

    session.quit().await;
}

#[tokio::test]
async fn test_crash_fails_pending_waits_in_order() {
    let ctx = TestContext::new();
    let session = ctx.session(fast_options()).await;
    session.wait_break().await.unwrap();

    let order = Arc::new(Mutex::new(Vec::new()));
    let (done_tx, done_rx) = tokio::sync::oneshot::channel();
    let first_order = order.clone();
    session.wait_with("never one", None, move |result| {
        first_order.lock().unwrap().push(("first", result.unwrap_err().code()));
    });
    let second_order = order.clone();
    session.wait_with("never two", None, move |result| {
        let code = match result {
            Err(Error::ProcessExited { code }) => {
                assert_eq!(code, Some(3));
                "PROCESS_EXITED"
            }
            Err(other) => other.code(),
            Ok(line) => panic!("unexpected match {line:?}"),
        };
        second_order.lock().unwrap().push(("second", code));
        let _ = done_tx.send(());
    });

    session.send("crash 3").await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), done_rx)
        .await
        .expect("settlements did not arrive")
        .unwrap();

    assert_eq!(
        *order.lock().unwrap(),
        vec![("first", "PROCESS_EXITED"), ("second", "PROCESS_EXITED")]
    );

    // Nothing works after termination, and quitting stays harmless
    assert!(matches!(session.send("ping").await, Err(Error::SessionClosed)));
    assert_eq!(session.state(), SessionState::Terminated);
    assert!(matches!(session.wait("pong").await, Err(Error::SessionClosed)));
    session.quit().await;
}

#[tokio::test]
async fn test_quit_cancels_once() {
    let ctx = TestContext::new();
    let session = ctx.session(fast_options()).await;
    session.wait_break().await.unwrap();

    let settlements = Arc::new(Mutex::new(Vec::new()));
    let sink = settlements.clone();
    session.wait_with("never", None, move |result| {
        sink.lock().unwrap().push(result.unwrap_err().code());
    });
    let pending = session.wait("also never");

    session.quit().await;
    assert!(matches!(pending.await, Err(Error::Cancelled)));
    session.quit().await;

    assert_eq!(*settlements.lock().unwrap(), vec!["CANCELLED"]);
    assert_eq!(session.state(), SessionState::Terminated);
}

#[tokio::test]
async fn test_unmatched_lines_are_discarded() {
    let ctx = TestContext::new();
    let session = ctx.session(fast_options()).await;
    session.wait_break().await.unwrap();

    let second = session.wait("line 2");
    let first = session.wait_for("line 1", Duration::from_millis(300));
    session.send("burst 3").await.unwrap();

    assert_eq!(second.await.unwrap().text, "line 2");
    // "line 1" arrived while "line 2" was the head, so it is gone
    assert!(matches!(first.await, Err(Error::Timeout { .. })));

    session.quit().await;
}

#[tokio::test]
async fn test_timeout_after_only_affects_later_waits() {
    let ctx = TestContext::new();
    let mut session = ctx.session(fast_options()).await;
    session.wait_break().await.unwrap();

    let mut early = session.wait("marker");
    session.timeout_after(Duration::from_millis(50));
    assert_eq!(session.default_timeout(), Duration::from_millis(50));
    let late = session.wait("never");

    // The early wait still has its original five seconds
    assert!(tokio::time::timeout(Duration::from_millis(200), &mut early)
        .await
        .is_err());

    session.send("echo marker").await.unwrap();
    assert_eq!(early.await.unwrap().text, "marker");

    // The late wait was already past its deadline when it reached the head
    match late.await {
        Err(Error::Timeout { after, .. }) => assert_eq!(after, Duration::from_millis(50)),
        other => panic!("expected timeout, got {other:?}"),
    }

    session.quit().await;
}

#[tokio::test]
async fn test_stderr_has_its_own_queue() {
    let ctx = TestContext::new();
    let session = ctx.session(fast_options()).await;
    session.wait_break().await.unwrap();

    let warning = session.wait_stderr("warning");
    let pong = session.wait("pong");
    session.send("err warning: deprecated handle").await.unwrap();
    session.send("ping").await.unwrap();

    assert_eq!(warning.await.unwrap().text, "warning: deprecated handle");
    assert_eq!(pong.await.unwrap().text, "pong");

    session.quit().await;
}

#[tokio::test]
async fn test_lines_until_collects_transcript() {
    let ctx = TestContext::new();
    let session = ctx.session(fast_options()).await;
    session.wait_break().await.unwrap();

    let lines = session.lines_until("line 3", None);
    session.send("burst 4").await.unwrap();

    let texts: Vec<_> = lines.await.unwrap().into_iter().map(|l| l.text).collect();
    assert_eq!(texts, vec!["line 1", "line 2", "line 3"]);

    session.quit().await;
}

#[tokio::test]
async fn test_unterminated_output_is_not_a_line() {
    let ctx = TestContext::new();
    let session = ctx.session(fast_options()).await;
    session.wait_break().await.unwrap();

    let tail = session.wait("tail");
    session.send("partial tail").await.unwrap();

    assert!(matches!(
        tail.await,
        Err(Error::ProcessExited { code: Some(0) })
    ));
}

#[tokio::test]
async fn test_startup_commands_and_default_break_pattern() {
    let ctx = TestContext::new();
    let script = ctx.script("empty.txt", &[]);
    let session = Session::create(
        LaunchSpec::new(TestContext::mock_target(), script),
        fast_options()
            .startup_commands(["run"])
            .quit_commands(["kill", "quit"]),
    )
    .await
    .unwrap();

    let stopped = session.wait_break().await.unwrap();
    assert!(stopped.text.starts_with("Process "), "{}", stopped.text);
    assert!(stopped.text.ends_with(" stopped"), "{}", stopped.text);

    let started = Instant::now();
    session.quit().await;
    // The target honours the quit commands, no SIGTERM grace needed
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_quit_escalates_to_kill() {
    let ctx = TestContext::new();
    let session = ctx
        .session(fast_options().terminate_grace(Duration::from_millis(200)))
        .await;
    session.wait_break().await.unwrap();
    session.exchange("ignore-term", "ignoring").await.unwrap();

    let started = Instant::now();
    session.quit().await;
    assert_eq!(session.state(), SessionState::Terminated);
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_dropping_session_cancels_waits() {
    let ctx = TestContext::new();
    let session = ctx.session(fast_options()).await;
    session.wait_break().await.unwrap();

    let (tx, rx) = tokio::sync::oneshot::channel();
    let id = session.wait_with("never", None, move |result| {
        let _ = tx.send(result.map(|l| l.text));
    });
    assert!(id > ExpectationId(1));
    drop(session);

    let result = tokio::time::timeout(Duration::from_secs(5), rx)
        .await
        .expect("callback never ran")
        .unwrap();
    assert!(matches!(result, Err(Error::Cancelled)));
}

#[tokio::test]
async fn test_stalled_input_does_not_delay_timeouts_or_quit() {
    let ctx = TestContext::new();
    let session = Arc::new(ctx.session(fast_options()).await);
    session.wait_break().await.unwrap();
    session.send("sleep 5000").await.unwrap();

    // Far more than a pipe holds, to a target that has stopped reading
    let sender = session.clone();
    let big_send = tokio::spawn(async move { sender.send("x".repeat(1 << 20)).await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let started = Instant::now();
    let err = session
        .wait_for("never", Duration::from_millis(100))
        .await
        .unwrap_err();
    let elapsed = started.elapsed();
    assert!(matches!(err, Error::Timeout { .. }), "{err:?}");
    assert!(elapsed < Duration::from_secs(1), "{elapsed:?}");

    let started = Instant::now();
    session.quit().await;
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(session.state(), SessionState::Terminated);
    assert!(big_send.await.unwrap().is_err());
}

#[tokio::test]
async fn test_waits_from_a_thread_outside_the_runtime() {
    let ctx = TestContext::new();
    let session = Arc::new(ctx.session(fast_options()).await);

    let (tx, rx) = tokio::sync::oneshot::channel();
    let remote = session.clone();
    std::thread::spawn(move || {
        remote.wait_with(Matcher::regex("^ready$").unwrap(), None, move |result| {
            let _ = tx.send(result.map(|l| l.text));
        });
    })
    .join()
    .unwrap();

    let text = tokio::time::timeout(Duration::from_secs(5), rx)
        .await
        .expect("callback never ran")
        .unwrap()
        .unwrap();
    assert_eq!(text, "ready");

    session.quit().await;
}

#[tokio::test]
async fn test_missing_script_is_spawn_error() {
    let ctx = TestContext::new();
    let result = Session::create(
        LaunchSpec::new(TestContext::mock_target(), ctx.path().join("missing.js")),
        fast_options(),
    )
    .await;
    assert!(matches!(result, Err(Error::Spawn { .. })));
}

#[tokio::test]
async fn test_invalid_break_pattern_is_rejected() {
    let ctx = TestContext::new();
    let script = ctx.script("s.txt", &["ready"]);
    let result = Session::create(
        LaunchSpec::new(TestContext::mock_target(), script),
        fast_options().break_pattern("(unclosed"),
    )
    .await;
    assert!(matches!(result, Err(Error::InvalidPattern { .. })));
}

fn write_scenario(ctx: &TestContext, name: &str, steps: &str) -> PathBuf {
    ctx.script("workqueue-scenario.txt", &["ready"]);
    let yaml = format!(
        r#"
name: {name}
target:
  script: workqueue-scenario.txt
  program: {program}
  args: []
  startup_commands: []
  quit_commands: [quit]
timeout_ms: 3000
break_pattern: "^ready$"
steps:
{steps}
"#,
        name = name,
        program = TestContext::mock_target().display(),
        steps = steps
    );
    let path = ctx.path().join(format!("{}.yaml", name));
    std::fs::write(&path, yaml).unwrap();
    path
}

#[tokio::test]
async fn test_scenario_runner_passes() {
    let ctx = TestContext::new();
    let path = write_scenario(
        &ctx,
        "workqueue",
        r#"
  - action: wait_break
  - action: send
    command: v8 getactivehandles
  - action: wait
    pattern: TCP
    expect:
      contains: "<Object: TCP"
  - action: wait
    pattern: Timer
    expect:
      matches: "(?i)<object: timer"
  - action: send
    command: v8 getactiverequests
  - action: lines_until
    pattern: FSReqWrap
    expect:
      count_at_least: 2
      any_contains: Active requests
  - action: quit
"#,
    );

    let result = run_scenario(&path, &Config::default(), false).await.unwrap();
    assert!(result.passed, "{:?}", result.error);
    assert_eq!(result.steps_run, 7);
}

#[tokio::test]
async fn test_scenario_runner_reports_failed_step() {
    let ctx = TestContext::new();
    let path = write_scenario(
        &ctx,
        "failing",
        r#"
  - action: wait_break
  - action: timeout_after
    ms: 100
  - action: send
    command: ping
  - action: wait
    pattern: nomatch
"#,
    );

    let result = run_scenario(&path, &Config::default(), false).await.unwrap();
    assert!(!result.passed);
    assert_eq!(result.steps_run, 4);
    assert!(result.error.unwrap().contains("Timed out"));
}

#[tokio::test]
async fn test_workqueue_fixture_with_configured_launcher() {
    let mut config = Config::default();
    config.launcher.program = TestContext::mock_target();
    config.launcher.args = Vec::new();
    config.timeouts.terminate_grace_ms = 500;

    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/workqueue.yaml");
    let result = run_scenario(&path, &config, true).await.unwrap();
    assert!(result.passed, "{:?}", result.error);
    assert_eq!(result.steps_total, 7);
}
