//! Captured service output.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::broadcast;

/// Lines kept per service.
pub const LOG_BUFFER_LINES: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStream {
    Stdout,
    Stderr,
}

/// One line of service output, without its trailing newline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
    pub timestamp: DateTime<Utc>,
    pub stream: LogStream,
    pub line: String,
}

/// Ring buffer of recent output plus a live feed for followers.
#[derive(Debug)]
pub struct LogBuffer {
    lines: Mutex<VecDeque<LogLine>>,
    capacity: usize,
    live: broadcast::Sender<LogLine>,
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        let (live, _) = broadcast::channel(256);
        Self {
            lines: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            live,
        }
    }

    pub fn push(&self, stream: LogStream, line: String) {
        let entry = LogLine {
            timestamp: Utc::now(),
            stream,
            line,
        };
        {
            let mut lines = self.lines.lock().unwrap_or_else(PoisonError::into_inner);
            if lines.len() == self.capacity {
                lines.pop_front();
            }
            lines.push_back(entry.clone());
        }
        // No followers is fine
        let _ = self.live.send(entry);
    }

    /// The last `limit` lines, oldest first.
    pub fn tail(&self, limit: Option<usize>) -> Vec<LogLine> {
        let lines = self.lines.lock().unwrap_or_else(PoisonError::into_inner);
        let skip = limit.map_or(0, |n| lines.len().saturating_sub(n));
        lines.iter().skip(skip).cloned().collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LogLine> {
        self.live.subscribe()
    }

    /// Copy `reader` into the buffer line by line until EOF.
    ///
    /// A trailing line without a newline is kept; invalid UTF-8 is replaced.
    pub async fn capture<R>(&self, reader: R, stream: LogStream)
    where
        R: AsyncRead + Unpin,
    {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::with_capacity(256);
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    while matches!(buf.last(), Some(b'\n' | b'\r')) {
                        buf.pop();
                    }
                    self.push(stream, String::from_utf8_lossy(&buf).into_owned());
                }
                Err(e) => {
                    tracing::debug!(error = %e, "output capture ended");
                    break;
                }
            }
        }
    }
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new(LOG_BUFFER_LINES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_buffer_drops_oldest() {
        let buffer = LogBuffer::new(3);
        for i in 0..5 {
            buffer.push(LogStream::Stdout, format!("line {i}"));
        }

        let lines: Vec<String> = buffer.tail(None).into_iter().map(|l| l.line).collect();
        assert_eq!(lines, vec!["line 2", "line 3", "line 4"]);

        let last: Vec<String> = buffer.tail(Some(1)).into_iter().map(|l| l.line).collect();
        assert_eq!(last, vec!["line 4"]);
    }

    #[tokio::test]
    async fn test_capture_keeps_partial_last_line() {
        let buffer = LogBuffer::default();
        let input: &[u8] = b"first\r\nsecond\nno newline";
        buffer.capture(input, LogStream::Stderr).await;

        let lines = buffer.tail(None);
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0].line, "first");
        assert_eq!(lines[2].line, "no newline");
        assert_eq!(lines[2].stream, LogStream::Stderr);
    }

    #[tokio::test]
    async fn test_subscribe_receives_new_lines() {
        let buffer = LogBuffer::default();
        let mut rx = buffer.subscribe();
        buffer.push(LogStream::Stdout, "hello".into());

        assert_eq!(rx.recv().await.unwrap().line, "hello");
    }
}
