//! Session event loop
//!
//! One task owns the process controller, both wait queues and every
//! timer. Callers reach it only through the ordered request channel, so a
//! wait registered before a send is always queued before the command is
//! written, and no locks guard the queues.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::common::{Error, Result};
use crate::process::{InputWriter, Line, OutputChannel, ProcessController, StreamEvent};

use super::queue::{Expectation, WaitQueue};
use super::SessionState;

/// Work submitted by a [`Session`](super::Session) handle
pub(crate) enum Request {
    Enqueue {
        channel: OutputChannel,
        expectation: Expectation,
    },
    Send {
        text: String,
        ack: oneshot::Sender<Result<()>>,
    },
    Quit {
        ack: oneshot::Sender<()>,
    },
}

impl Request {
    /// Answer a request that arrived after the session closed
    pub(crate) fn reject(self) {
        match self {
            Request::Enqueue { expectation, .. } => expectation.settle(Err(Error::SessionClosed)),
            Request::Send { ack, .. } => {
                let _ = ack.send(Err(Error::SessionClosed));
            }
            // Quitting a closed session is a no-op
            Request::Quit { ack } => {
                let _ = ack.send(());
            }
        }
    }
}

pub(crate) struct Driver {
    pub controller: ProcessController,
    pub writer: InputWriter,
    pub stdout: WaitQueue,
    pub stderr: WaitQueue,
    pub requests: mpsc::UnboundedReceiver<Request>,
    pub events: mpsc::UnboundedReceiver<StreamEvent>,
    pub streams: Vec<JoinHandle<()>>,
    pub stdout_open: bool,
    pub stderr_open: bool,
    pub state: watch::Sender<SessionState>,
    pub quit_commands: Vec<String>,
    pub exit_drain: Duration,
    pub quit_grace: Duration,
}

/// What ended the loop
enum Shutdown {
    Quit(Option<oneshot::Sender<()>>),
    Exited(Option<i32>),
}

impl Driver {
    pub async fn run(mut self) {
        self.state.send_replace(SessionState::Running);

        let mut exit_code: Option<Option<i32>> = None;
        let mut drain_deadline: Option<Instant> = None;

        let shutdown = loop {
            if let Some(code) = exit_code {
                let drained = !self.stdout_open && !self.stderr_open;
                let expired = drain_deadline.is_some_and(|d| d <= Instant::now());
                if drained || expired {
                    break Shutdown::Exited(code);
                }
            }

            let timer = self.next_deadline();

            tokio::select! {
                biased;

                // Lines already framed are settled first: each is compared
                // with the head's deadline by the time it was observed, so
                // an elapsed timer only wins over lines that came later
                _ = sleep_until(timer), if timer.is_some() => {
                    self.drain_events();
                    let now = Instant::now();
                    self.stdout.expire(now);
                    self.stderr.expire(now);
                }

                request = self.requests.recv() => match request {
                    Some(Request::Enqueue { channel, expectation }) => {
                        self.queue(channel).enqueue(expectation);
                    }
                    Some(Request::Send { text, ack }) => {
                        if self.controller.has_exited() {
                            let _ = ack.send(Err(Error::Write(
                                "target has already exited".to_string(),
                            )));
                        } else {
                            self.writer.write_line(text, ack);
                        }
                    }
                    Some(Request::Quit { ack }) => break Shutdown::Quit(Some(ack)),
                    None => {
                        tracing::debug!("Session handle dropped, shutting down");
                        break Shutdown::Quit(None);
                    }
                },

                event = self.events.recv(), if self.stdout_open || self.stderr_open => match event {
                    Some(event) => self.handle_event(event),
                    None => {
                        self.stdout_open = false;
                        self.stderr_open = false;
                    }
                },

                status = self.controller.wait_exit(), if exit_code.is_none() => {
                    let code = match status {
                        Ok(status) => status.code(),
                        Err(e) => {
                            tracing::warn!("Failed to wait for target: {}", e);
                            None
                        }
                    };
                    exit_code = Some(code);
                    drain_deadline = Some(Instant::now() + self.exit_drain);
                }

                _ = sleep_until(drain_deadline), if drain_deadline.is_some() => {
                    tracing::debug!("Exit drain window elapsed");
                }
            }
        };

        match shutdown {
            Shutdown::Quit(ack) => {
                self.quit().await;
                self.close();
                if let Some(ack) = ack {
                    let _ = ack.send(());
                }
            }
            Shutdown::Exited(code) => {
                let pending = self.stdout.len() + self.stderr.len();
                if pending > 0 {
                    tracing::warn!(?code, pending, "Target exited with expectations pending");
                }
                self.stdout.settle_all(|| Error::ProcessExited { code });
                self.stderr.settle_all(|| Error::ProcessExited { code });
                self.close();
            }
        }
    }

    fn queue(&mut self, channel: OutputChannel) -> &mut WaitQueue {
        match channel {
            OutputChannel::Stdout => &mut self.stdout,
            OutputChannel::Stderr => &mut self.stderr,
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        match (self.stdout.head_deadline(), self.stderr.head_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn handle_event(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::Line(channel, line) => self.dispatch(channel, line),
            StreamEvent::Closed(OutputChannel::Stdout) => self.stdout_open = false,
            StreamEvent::Closed(OutputChannel::Stderr) => self.stderr_open = false,
        }
    }

    /// Dispatch every event the line streams have already published
    fn drain_events(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            self.handle_event(event);
        }
    }

    fn dispatch(&mut self, channel: OutputChannel, line: Line) {
        if channel == OutputChannel::Stderr {
            tracing::debug!(seq = line.sequence, "target stderr: {}", line.text);
        }
        self.queue(channel).offer(line);
    }

    /// Cancel everything, then stop the target
    async fn quit(&mut self) {
        self.state.send_replace(SessionState::Quitting);

        let cancelled =
            self.stdout.settle_all(|| Error::Cancelled) + self.stderr.settle_all(|| Error::Cancelled);
        tracing::info!(cancelled, "Quitting session");

        if !self.controller.has_exited() && !self.quit_commands.is_empty() {
            // Delivery and the exit it should cause share one grace period,
            // so a target that stopped reading stdin is still terminated
            let polite = async {
                for command in &self.quit_commands {
                    self.writer.send_line(command.as_str()).await?;
                }
                self.controller.wait_exit().await
            };
            match tokio::time::timeout(self.quit_grace, polite).await {
                Ok(Ok(status)) => tracing::debug!(%status, "Target quit on request"),
                Ok(Err(e)) => tracing::debug!("Quit commands failed: {}", e),
                Err(_) => tracing::debug!("Target did not quit within the grace period"),
            }
        }

        // Closing stdin is often enough for a debugger to quit
        self.writer.close();
        if let Err(e) = self.controller.terminate().await {
            tracing::warn!("Failed to terminate target: {}", e);
        }
    }

    /// Enter the terminal state and answer anything still in flight
    fn close(&mut self) {
        self.writer.close();
        for stream in self.streams.drain(..) {
            stream.abort();
        }
        self.state.send_replace(SessionState::Terminated);
        self.requests.close();
        while let Ok(request) = self.requests.try_recv() {
            request.reject();
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
