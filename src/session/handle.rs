//! The public session handle

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;

use crate::common::config::Config;
use crate::common::{Error, Result};
use crate::process::{InputWriter, LaunchSpec, Line, LineStream, OutputChannel, ProcessController};

use super::driver::{Driver, Request};
use super::matcher::Matcher;
use super::queue::{Expectation, ExpectationId, SettleFn, Settled, WaitQueue};
use super::SessionState;

/// Knobs for [`Session::create`]
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Timeout for waits that don't name their own
    pub default_timeout: Duration,
    /// Regex marking the target as stopped and ready (`wait_break`)
    pub break_pattern: String,
    /// Written to the target right after it starts
    pub startup_commands: Vec<String>,
    /// Written to the target on `quit()` before it is terminated
    pub quit_commands: Vec<String>,
    /// Time allowed after SIGTERM (and after quit commands) before a kill
    pub terminate_grace: Duration,
    /// Time buffered output is still dispatched after the target exits
    pub exit_drain: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(10),
            break_pattern: r"Process \d+ stopped".to_string(),
            startup_commands: Vec::new(),
            quit_commands: Vec::new(),
            terminate_grace: Duration::from_secs(2),
            exit_drain: Duration::from_millis(200),
        }
    }
}

impl SessionOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            default_timeout: config.timeouts.wait(),
            break_pattern: config.session.break_pattern.clone(),
            startup_commands: config.session.startup_commands.clone(),
            quit_commands: config.session.quit_commands.clone(),
            terminate_grace: config.timeouts.terminate_grace(),
            exit_drain: config.timeouts.exit_drain(),
        }
    }

    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn break_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.break_pattern = pattern.into();
        self
    }

    pub fn startup_commands<I, S>(mut self, commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.startup_commands = commands.into_iter().map(Into::into).collect();
        self
    }

    pub fn quit_commands<I, S>(mut self, commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.quit_commands = commands.into_iter().map(Into::into).collect();
        self
    }

    pub fn terminate_grace(mut self, grace: Duration) -> Self {
        self.terminate_grace = grace;
        self
    }

    pub fn exit_drain(mut self, drain: Duration) -> Self {
        self.exit_drain = drain;
        self
    }
}

/// The eventual outcome of one expectation
///
/// Registration has already happened by the time this exists; awaiting it
/// only observes the settlement. Dropping it does not withdraw the
/// expectation, which still holds its place in the queue.
#[must_use = "the expectation is queued either way; await it to see the outcome"]
pub struct Pending<T> {
    id: ExpectationId,
    rx: oneshot::Receiver<Result<T>>,
}

impl<T> Pending<T> {
    pub fn id(&self) -> ExpectationId {
        self.id
    }
}

impl<T> Future for Pending<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(Error::SessionClosed)),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// A running debugger session
///
/// Register a wait *before* sending the command that produces its line:
///
/// ```no_run
/// # async fn demo(session: &debug_harness::Session) -> debug_harness::Result<()> {
/// session.wait_break().await?;
/// let handles = session.wait("TCP");
/// session.send("v8 getactivehandles").await?;
/// let line = handles.await?;
/// assert!(line.text.contains("<Object: TCP"));
/// session.quit().await;
/// # Ok(())
/// # }
/// ```
///
/// The event loop starts on first use, so output printed while the
/// session was being set up is held until the first wait can see it. It
/// runs on the runtime that created the session; waits and sends may be
/// issued from any thread once that runtime is up.
pub struct Session {
    runtime: Handle,
    requests: mpsc::UnboundedSender<Request>,
    state: watch::Receiver<SessionState>,
    idle_driver: Mutex<Option<Driver>>,
    default_timeout: Duration,
    break_matcher: Matcher,
    next_id: AtomicU64,
    pid: Option<u32>,
}

impl Session {
    /// Spawn the target and build a session around it
    ///
    /// Fails with `Error::Spawn` when the program or script cannot be
    /// found or launched, and with `Error::Write` if a startup command
    /// cannot be delivered.
    pub async fn create(spec: LaunchSpec, options: SessionOptions) -> Result<Self> {
        let break_matcher = Matcher::ready(&options.break_pattern)?;
        let (controller, pipes) = ProcessController::spawn(&spec, options.terminate_grace)?;

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let streams = vec![
            LineStream::new(pipes.stdout, OutputChannel::Stdout).spawn(event_tx.clone()),
            LineStream::new(pipes.stderr, OutputChannel::Stderr).spawn(event_tx),
        ];

        let writer = InputWriter::spawn(pipes.stdin);
        for command in &options.startup_commands {
            writer.send_line(command.as_str()).await?;
        }

        let pid = controller.pid();
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(SessionState::Created);

        let driver = Driver {
            controller,
            writer,
            stdout: WaitQueue::new(OutputChannel::Stdout),
            stderr: WaitQueue::new(OutputChannel::Stderr),
            requests: request_rx,
            events: event_rx,
            streams,
            stdout_open: true,
            stderr_open: true,
            state: state_tx,
            quit_commands: options.quit_commands,
            exit_drain: options.exit_drain,
            quit_grace: options.terminate_grace,
        };

        Ok(Self {
            runtime: Handle::current(),
            requests: request_tx,
            state: state_rx,
            idle_driver: Mutex::new(Some(driver)),
            default_timeout: options.default_timeout,
            break_matcher,
            next_id: AtomicU64::new(1),
            pid,
        })
    }

    /// Create a session using the loaded configuration's launcher
    pub async fn with_config(
        script: impl Into<std::path::PathBuf>,
        config: &Config,
    ) -> Result<Self> {
        let spec = LaunchSpec::from_config(&config.launcher, script);
        Self::create(spec, SessionOptions::from_config(config)).await
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Target process id
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Change the timeout used by later waits that don't name their own
    ///
    /// Expectations already registered keep their deadlines.
    pub fn timeout_after(&mut self, timeout: Duration) {
        self.default_timeout = timeout;
    }

    /// Write a command line to the target
    pub async fn send(&self, command: impl Into<String>) -> Result<()> {
        let (ack, done) = oneshot::channel();
        self.submit_request(Request::Send {
            text: command.into(),
            ack,
        });
        done.await.unwrap_or(Err(Error::SessionClosed))
    }

    /// Wait for a stdout line matching `matcher`, with the default timeout
    pub fn wait(&self, matcher: impl Into<Matcher>) -> Pending<Line> {
        self.wait_on(OutputChannel::Stdout, matcher, None)
    }

    /// Wait for a stdout line matching `matcher`, with an explicit timeout
    pub fn wait_for(&self, matcher: impl Into<Matcher>, timeout: Duration) -> Pending<Line> {
        self.wait_on(OutputChannel::Stdout, matcher, Some(timeout))
    }

    /// Wait for the target to report it is stopped and ready
    pub fn wait_break(&self) -> Pending<Line> {
        self.wait_on(OutputChannel::Stdout, self.break_matcher.clone(), None)
    }

    /// Break wait with an explicit timeout
    pub fn wait_break_for(&self, timeout: Duration) -> Pending<Line> {
        self.wait_on(OutputChannel::Stdout, self.break_matcher.clone(), Some(timeout))
    }

    /// Wait for a stderr line matching `matcher`
    pub fn wait_stderr(&self, matcher: impl Into<Matcher>) -> Pending<Line> {
        self.wait_on(OutputChannel::Stderr, matcher, None)
    }

    /// Wait on either channel
    pub fn wait_on(
        &self,
        channel: OutputChannel,
        matcher: impl Into<Matcher>,
        timeout: Option<Duration>,
    ) -> Pending<Line> {
        let (tx, rx) = oneshot::channel();
        let id = self.submit(
            channel,
            matcher.into(),
            timeout,
            false,
            Box::new(move |result: Result<Settled>| {
                let _ = tx.send(result.map(|settled| settled.line));
            }),
        );
        Pending { id, rx }
    }

    /// Collect stdout lines up to and including the first match
    ///
    /// Collection starts once every earlier expectation has settled.
    pub fn lines_until(
        &self,
        matcher: impl Into<Matcher>,
        timeout: Option<Duration>,
    ) -> Pending<Vec<Line>> {
        let (tx, rx) = oneshot::channel();
        let id = self.submit(
            OutputChannel::Stdout,
            matcher.into(),
            timeout,
            true,
            Box::new(move |result: Result<Settled>| {
                let _ = tx.send(result.map(|settled| settled.transcript));
            }),
        );
        Pending { id, rx }
    }

    /// Callback form of [`wait_for`](Self::wait_for)
    ///
    /// `callback` runs exactly once, on the session's event loop, so it
    /// must not block.
    pub fn wait_with<F>(
        &self,
        matcher: impl Into<Matcher>,
        timeout: Option<Duration>,
        callback: F,
    ) -> ExpectationId
    where
        F: FnOnce(Result<Line>) + Send + 'static,
    {
        self.submit(
            OutputChannel::Stdout,
            matcher.into(),
            timeout,
            false,
            Box::new(move |result: Result<Settled>| callback(result.map(|settled| settled.line))),
        )
    }

    /// Register a wait, send `command`, and await the wait
    pub async fn exchange(
        &self,
        command: impl Into<String>,
        matcher: impl Into<Matcher>,
    ) -> Result<Line> {
        let reply = self.wait(matcher);
        self.send(command).await?;
        reply.await
    }

    /// Cancel every pending wait and stop the target
    ///
    /// Pending waits settle with `Error::Cancelled`. Calling this again, or
    /// after the target has exited, does nothing.
    pub async fn quit(&self) {
        if matches!(self.state(), SessionState::Quitting | SessionState::Terminated) {
            return;
        }
        let (ack, done) = oneshot::channel();
        self.submit_request(Request::Quit { ack });
        let _ = done.await;
    }

    fn submit(
        &self,
        channel: OutputChannel,
        matcher: Matcher,
        timeout: Option<Duration>,
        collect: bool,
        on_settle: SettleFn,
    ) -> ExpectationId {
        let id = ExpectationId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let timeout = timeout.unwrap_or(self.default_timeout);
        let mut expectation = Expectation::new(id, matcher, timeout, Instant::now(), on_settle);
        if collect {
            expectation = expectation.collecting();
        }

        self.submit_request(Request::Enqueue {
            channel,
            expectation,
        });
        id
    }

    /// Queue a request, then make sure the event loop is running
    ///
    /// The request goes in first so a freshly started loop sees it before
    /// any output that was already waiting.
    fn submit_request(&self, request: Request) {
        if let Err(mpsc::error::SendError(request)) = self.requests.send(request) {
            request.reject();
        }
        self.start();
    }

    /// Hand the event loop to the runtime on first use
    fn start(&self) {
        let driver = self
            .idle_driver
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(driver) = driver {
            self.runtime.spawn(driver.run());
        }
    }
}
