//! Target stdin writer
//!
//! Commands are written from a task of their own, so a target that stops
//! reading its input stalls only the writes queued behind the blocked one,
//! never the session's timers or output dispatch.

use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::common::{Error, Result};

struct WriteJob {
    text: String,
    ack: oneshot::Sender<Result<()>>,
}

/// Queue of command lines bound for the target's stdin
///
/// Lines are written in the order they were queued. Each queued line is
/// answered on its own `ack` once it has been flushed or has failed.
pub struct InputWriter {
    jobs: mpsc::UnboundedSender<WriteJob>,
    task: JoinHandle<()>,
}

impl InputWriter {
    pub fn spawn<W>(sink: W) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (jobs, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(write_loop(BufWriter::new(sink), rx));
        Self { jobs, task }
    }

    /// Queue `text` followed by a newline
    pub fn write_line(&self, text: String, ack: oneshot::Sender<Result<()>>) {
        if let Err(mpsc::error::SendError(job)) = self.jobs.send(WriteJob { text, ack }) {
            let _ = job.ack.send(Err(Error::Write("target stdin is closed".to_string())));
        }
    }

    /// Queue a line and wait until it has been written
    pub async fn send_line(&self, text: impl Into<String>) -> Result<()> {
        let (ack, done) = oneshot::channel();
        self.write_line(text.into(), ack);
        done.await
            .unwrap_or_else(|_| Err(Error::Write("target stdin is closed".to_string())))
    }

    /// Close the target's stdin, abandoning any write still in progress
    ///
    /// Lines still queued are dropped unanswered.
    pub fn close(&self) {
        self.task.abort();
    }
}

impl Drop for InputWriter {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn write_loop<W>(mut sink: BufWriter<W>, mut jobs: mpsc::UnboundedReceiver<WriteJob>)
where
    W: AsyncWrite + Unpin,
{
    let mut broken: Option<String> = None;
    while let Some(WriteJob { text, ack }) = jobs.recv().await {
        if let Some(reason) = &broken {
            let _ = ack.send(Err(Error::Write(reason.clone())));
            continue;
        }

        tracing::debug!(command = %text, "Sending to target");
        let result = async {
            sink.write_all(text.as_bytes()).await?;
            sink.write_all(b"\n").await?;
            sink.flush().await
        }
        .await;

        match result {
            Ok(()) => {
                let _ = ack.send(Ok(()));
            }
            Err(e) => {
                // A broken pipe means the target closed its input for good
                tracing::debug!("Target stdin failed: {}", e);
                let reason = e.to_string();
                let _ = ack.send(Err(Error::Write(reason.clone())));
                broken = Some(reason);
            }
        }
    }
}
