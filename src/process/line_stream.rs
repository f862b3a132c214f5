//! Line framing for target output
//!
//! Target output is an unbounded byte stream. Each `\n`-terminated chunk
//! becomes one [`Line`] with the next sequence number; a trailing `\r` is
//! stripped and invalid UTF-8 is replaced. Data left without a terminator
//! when the stream ends is not a line and is dropped.

use std::fmt;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Which output pipe of the target a line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputChannel {
    Stdout,
    Stderr,
}

impl fmt::Display for OutputChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdout => write!(f, "stdout"),
            Self::Stderr => write!(f, "stderr"),
        }
    }
}

/// One complete line of target output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    /// Position in this channel's output, starting at 0
    pub sequence: u64,
    /// Line text without the terminator
    pub text: String,
    /// When the line was framed
    pub observed_at: Instant,
}

impl fmt::Display for Line {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Events published by a running line stream
#[derive(Debug)]
pub enum StreamEvent {
    Line(OutputChannel, Line),
    /// The pipe reached EOF (or failed); no more lines will follow
    Closed(OutputChannel),
}

/// Frames a byte source into lines
pub struct LineStream<R> {
    reader: BufReader<R>,
    channel: OutputChannel,
    next_sequence: u64,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> LineStream<R> {
    pub fn new(source: R, channel: OutputChannel) -> Self {
        Self {
            reader: BufReader::new(source),
            channel,
            next_sequence: 0,
            buf: Vec::with_capacity(256),
        }
    }

    /// Read the next complete line
    ///
    /// Returns `Ok(None)` at end of stream, discarding any unterminated tail.
    pub async fn next_line(&mut self) -> std::io::Result<Option<Line>> {
        self.buf.clear();
        let n = self.reader.read_until(b'\n', &mut self.buf).await?;
        if n == 0 {
            return Ok(None);
        }

        if self.buf.last() != Some(&b'\n') {
            tracing::debug!(
                channel = %self.channel,
                bytes = self.buf.len(),
                "Discarding unterminated output at end of stream"
            );
            return Ok(None);
        }

        self.buf.pop();
        if self.buf.last() == Some(&b'\r') {
            self.buf.pop();
        }

        let line = Line {
            sequence: self.next_sequence,
            text: String::from_utf8_lossy(&self.buf).into_owned(),
            observed_at: Instant::now(),
        };
        self.next_sequence += 1;
        Ok(Some(line))
    }
}

impl<R: AsyncRead + Unpin + Send + 'static> LineStream<R> {
    /// Pump lines into `tx` on a background task until the source closes
    ///
    /// Publishing never waits on the consumer: the channel is unbounded, so
    /// the target is never stalled by a slow reader.
    pub fn spawn(mut self, tx: mpsc::UnboundedSender<StreamEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let channel = self.channel;
            loop {
                match self.next_line().await {
                    Ok(Some(line)) => {
                        tracing::trace!(%channel, seq = line.sequence, text = %line.text, "line");
                        if tx.send(StreamEvent::Line(channel, line)).is_err() {
                            // Session is gone
                            return;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(%channel, "Error reading target output: {}", e);
                        break;
                    }
                }
            }
            let _ = tx.send(StreamEvent::Closed(channel));
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    async fn collect(data: &[u8]) -> Vec<Line> {
        let mut stream = LineStream::new(Cursor::new(data.to_vec()), OutputChannel::Stdout);
        let mut lines = Vec::new();
        while let Some(line) = stream.next_line().await.unwrap() {
            lines.push(line);
        }
        lines
    }

    #[tokio::test]
    async fn test_splits_and_numbers_lines() {
        let lines = collect(b"first\nsecond\r\n\nthird\n").await;
        let texts: Vec<_> = lines.iter().map(|l| l.text.as_str()).collect();
        assert_eq!(texts, vec!["first", "second", "", "third"]);
        let seqs: Vec<_> = lines.iter().map(|l| l.sequence).collect();
        assert_eq!(seqs, vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_discards_unterminated_tail() {
        let lines = collect(b"done\n(lldb) ").await;
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].text, "done");
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_replaced() {
        let lines = collect(b"bad \xff byte\n").await;
        assert_eq!(lines[0].text, "bad \u{fffd} byte");
    }

    #[tokio::test]
    async fn test_partial_writes_are_joined() {
        let (mut writer, reader) = tokio::io::duplex(64);
        let (tx, mut rx) = mpsc::unbounded_channel();
        LineStream::new(reader, OutputChannel::Stderr).spawn(tx);

        use tokio::io::AsyncWriteExt;
        writer.write_all(b"Process 42 ").await.unwrap();
        writer.write_all(b"stopped\nnext").await.unwrap();
        drop(writer);

        match rx.recv().await.unwrap() {
            StreamEvent::Line(OutputChannel::Stderr, line) => {
                assert_eq!(line.text, "Process 42 stopped");
                assert_eq!(line.sequence, 0);
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(matches!(
            rx.recv().await.unwrap(),
            StreamEvent::Closed(OutputChannel::Stderr)
        ));
    }
}
