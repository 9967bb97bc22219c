use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;

use super::error::{ControlError, Result};
use super::protocol::{ControlRequest, ControlResponse};

type Replies = Lines<BufReader<OwnedReadHalf>>;

/// Long enough for a reload that restarts services.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Talks to a running orchestrator over its control socket.
#[derive(Debug, Clone)]
pub struct ControlClient {
    path: PathBuf,
    timeout: Duration,
}

impl ControlClient {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the reply lines and the write half, which must stay open
    /// until the reply is read.
    async fn send(&self, request: &ControlRequest) -> Result<(Replies, OwnedWriteHalf)> {
        let stream = UnixStream::connect(&self.path)
            .await
            .map_err(|source| ControlError::NotRunning {
                path: self.path.clone(),
                source,
            })?;
        let (read_half, mut write_half) = stream.into_split();

        let mut line = serde_json::to_vec(request)?;
        line.push(b'\n');
        write_half.write_all(&line).await?;
        write_half.flush().await?;

        Ok((BufReader::new(read_half).lines(), write_half))
    }

    /// Send one request and return its single final response.
    ///
    /// # Errors
    /// `NotRunning` when nothing listens on the socket, `Timeout`, or
    /// `Remote` when the orchestrator answered with an error
    pub async fn request(&self, request: &ControlRequest) -> Result<ControlResponse> {
        tokio::time::timeout(self.timeout, self.exchange(request))
            .await
            .map_err(|_| ControlError::Timeout(self.timeout))?
    }

    async fn exchange(&self, request: &ControlRequest) -> Result<ControlResponse> {
        let (mut lines, _writer) = self.send(request).await?;
        loop {
            let response = next_response(&mut lines).await?;
            if response.is_final() {
                return into_result(response);
            }
        }
    }

    /// Send a streaming request, passing each response to `on_response`
    /// until the final one or until `on_response` returns `false`.
    ///
    /// # Errors
    /// As for [`ControlClient::request`]; no overall timeout applies
    pub async fn stream<F>(&self, request: &ControlRequest, mut on_response: F) -> Result<()>
    where
        F: FnMut(&ControlResponse) -> bool,
    {
        let (mut lines, _writer) = self.send(request).await?;
        loop {
            let response = next_response(&mut lines).await?;
            if response.is_final() {
                return into_result(response).map(|_| ());
            }
            if !on_response(&response) {
                return Ok(());
            }
        }
    }
}

async fn next_response(lines: &mut Replies) -> Result<ControlResponse> {
    match lines.next_line().await? {
        Some(line) => Ok(serde_json::from_str(&line)?),
        None => Err(ControlError::Closed),
    }
}

fn into_result(response: ControlResponse) -> Result<ControlResponse> {
    match response {
        ControlResponse::Error { kind, message } => Err(ControlError::Remote { kind, message }),
        other => Ok(other),
    }
}
