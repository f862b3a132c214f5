//! Ordered wait queue
//!
//! Expectations are kept in the order they were registered and only the
//! head may match. A line is offered to the head alone: on a match the head
//! is settled and the line is consumed, otherwise the line is dropped. A
//! later expectation therefore never sees a line that arrived while an
//! earlier one was still waiting.
//!
//! Deadlines are fixed at registration. When a line and an elapsed
//! deadline race, the deadline wins: [`WaitQueue::offer`] expires every
//! head whose deadline is at or before the line's `observed_at` before
//! testing the line.

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use tokio::time::Instant;

use crate::common::{Error, Result};
use crate::process::{Line, OutputChannel};

use super::matcher::Matcher;

/// Identifies one expectation within a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExpectationId(pub u64);

impl fmt::Display for ExpectationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A successful settlement
#[derive(Debug, Clone)]
pub struct Settled {
    /// The line that satisfied the matcher
    pub line: Line,
    /// For collecting expectations, every line seen while at the head,
    /// ending with `line`; empty otherwise
    pub transcript: Vec<Line>,
}

pub type SettleFn = Box<dyn FnOnce(Result<Settled>) + Send>;

/// A pending request to be told when a matching line arrives
pub struct Expectation {
    id: ExpectationId,
    matcher: Matcher,
    timeout: Duration,
    deadline: Instant,
    collect: bool,
    transcript: Vec<Line>,
    on_settle: SettleFn,
}

impl Expectation {
    pub fn new(
        id: ExpectationId,
        matcher: Matcher,
        timeout: Duration,
        enqueued_at: Instant,
        on_settle: SettleFn,
    ) -> Self {
        Self {
            id,
            matcher,
            timeout,
            deadline: enqueued_at + timeout,
            collect: false,
            transcript: Vec::new(),
            on_settle,
        }
    }

    /// Keep every line seen while at the head
    pub fn collecting(mut self) -> Self {
        self.collect = true;
        self
    }

    pub fn id(&self) -> ExpectationId {
        self.id
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Resolve this expectation; consumes it so it cannot settle twice
    pub fn settle(self, result: Result<Settled>) {
        (self.on_settle)(result)
    }

    fn time_out(self) {
        let err = Error::timeout(&self.matcher.to_string(), self.timeout);
        self.settle(Err(err));
    }
}

impl fmt::Debug for Expectation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Expectation")
            .field("id", &self.id)
            .field("matcher", &self.matcher)
            .field("deadline", &self.deadline)
            .field("collect", &self.collect)
            .finish_non_exhaustive()
    }
}

/// FIFO of expectations for one output channel
pub struct WaitQueue {
    channel: OutputChannel,
    pending: VecDeque<Expectation>,
}

impl WaitQueue {
    pub fn new(channel: OutputChannel) -> Self {
        Self {
            channel,
            pending: VecDeque::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// The only expectation currently eligible to match
    pub fn head(&self) -> Option<ExpectationId> {
        self.pending.front().map(Expectation::id)
    }

    /// Deadline of the head, the next instant the queue may need a timer
    pub fn head_deadline(&self) -> Option<Instant> {
        self.pending.front().map(Expectation::deadline)
    }

    /// Append an expectation behind all pending ones
    pub fn enqueue(&mut self, expectation: Expectation) -> ExpectationId {
        let id = expectation.id;
        tracing::debug!(
            channel = %self.channel,
            %id,
            matcher = %expectation.matcher,
            timeout_ms = expectation.timeout.as_millis() as u64,
            "Expectation registered"
        );
        self.pending.push_back(expectation);
        id
    }

    /// Time out heads whose deadline is at or before `now`
    ///
    /// Each one that expires promotes the next, which is checked in turn.
    /// Returns how many expired.
    pub fn expire(&mut self, now: Instant) -> usize {
        let mut expired = 0;
        while self.pending.front().is_some_and(|head| head.deadline <= now) {
            if let Some(head) = self.pending.pop_front() {
                tracing::debug!(
                    channel = %self.channel,
                    id = %head.id,
                    matcher = %head.matcher,
                    "Expectation timed out"
                );
                head.time_out();
                expired += 1;
            }
        }
        expired
    }

    /// Offer a freshly framed line to the head
    ///
    /// Returns the id of the expectation the line satisfied, if any. A line
    /// that satisfies nothing is dropped.
    pub fn offer(&mut self, line: Line) -> Option<ExpectationId> {
        self.expire(line.observed_at);

        let head = self.pending.front_mut()?;
        if head.collect {
            head.transcript.push(line.clone());
        }
        if !head.matcher.is_match(&line.text) {
            return None;
        }

        let mut head = self.pending.pop_front()?;
        tracing::debug!(
            channel = %self.channel,
            id = %head.id,
            matcher = %head.matcher,
            seq = line.sequence,
            "Expectation matched"
        );
        let id = head.id;
        let transcript = std::mem::take(&mut head.transcript);
        head.settle(Ok(Settled { line, transcript }));
        Some(id)
    }

    /// Settle everything still pending, oldest first, with an error
    pub fn settle_all(&mut self, make_error: impl Fn() -> Error) -> usize {
        let count = self.pending.len();
        for expectation in self.pending.drain(..) {
            let err = make_error();
            tracing::debug!(
                channel = %self.channel,
                id = %expectation.id,
                error = %err,
                "Expectation abandoned"
            );
            expectation.settle(Err(err));
        }
        count
    }
}

impl Drop for WaitQueue {
    fn drop(&mut self) {
        // Nothing leaves without exactly one settlement
        self.settle_all(|| Error::SessionClosed);
    }
}
