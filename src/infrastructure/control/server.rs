use async_trait::async_trait;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::error::{ControlError, Result};
use super::protocol::{ControlRequest, ControlResponse, ErrorKind};

/// Idle time allowed between requests on one connection.
const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Answers control requests.
///
/// Responses are sent on `responses` as they become available; a request
/// that streams (followed logs) keeps sending until the channel closes,
/// which happens when the client disconnects.
#[async_trait]
pub trait ControlHandler: Send + Sync + 'static {
    async fn handle(&self, request: ControlRequest, responses: mpsc::Sender<ControlResponse>);
}

/// Unix socket listener for the control protocol.
#[derive(Debug)]
pub struct ControlServer {
    listener: UnixListener,
    path: PathBuf,
}

impl ControlServer {
    /// Bind `path`, replacing a stale socket left by a previous run.
    ///
    /// # Errors
    /// `AlreadyRunning` when another process answers on the socket,
    /// `Bind` when the socket cannot be created
    pub async fn bind(path: &Path) -> Result<Self> {
        let bind_err = |source| ControlError::Bind {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(bind_err)?;
        }
        if path.exists() {
            if UnixStream::connect(path).await.is_ok() {
                return Err(ControlError::AlreadyRunning(path.to_path_buf()));
            }
            tracing::debug!(path = %path.display(), "removing stale control socket");
            tokio::fs::remove_file(path).await.map_err(bind_err)?;
        }

        let listener = UnixListener::bind(path).map_err(bind_err)?;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).map_err(bind_err)?;
        tracing::info!(path = %path.display(), "control socket listening");

        Ok(Self {
            listener,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Serve connections until `shutdown` fires, then remove the socket file.
    pub async fn run<H: ControlHandler>(self, handler: Arc<H>, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        let handler = handler.clone();
                        let cancel = shutdown.child_token();
                        tokio::spawn(async move {
                            if let Err(e) = serve_connection(stream, handler, cancel).await {
                                tracing::debug!(error = %e, "control connection failed");
                            }
                        });
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "control accept failed");
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }
                },
            }
        }

        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::debug!(path = %self.path.display(), error = %e, "could not remove control socket");
        }
    }
}

async fn serve_connection<H: ControlHandler>(
    stream: UnixStream,
    handler: Arc<H>,
    cancel: CancellationToken,
) -> Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    loop {
        let line = tokio::select! {
            () = cancel.cancelled() => return Ok(()),
            next = tokio::time::timeout(IDLE_TIMEOUT, lines.next_line()) => match next {
                Ok(Ok(Some(line))) => line,
                Ok(Ok(None)) | Err(_) => return Ok(()),
                Ok(Err(e)) => return Err(e.into()),
            },
        };
        if line.trim().is_empty() {
            continue;
        }

        let request = match serde_json::from_str::<ControlRequest>(&line) {
            Ok(request) => request,
            Err(e) => {
                let reply = ControlResponse::error(ErrorKind::Internal, format!("invalid request: {e}"));
                write_response(&mut write_half, &reply).await?;
                continue;
            }
        };
        tracing::debug!(request = request.kind(), "control request");

        let (tx, rx) = mpsc::channel(64);
        let handling = handler.handle(request, tx);
        let writing = async {
            // Dropping the receiver on a write error or client EOF stops the handler
            let mut rx = rx;
            let mut watch_client = true;
            loop {
                let response = tokio::select! {
                    response = rx.recv() => match response {
                        Some(response) => response,
                        None => break,
                    },
                    filled = lines.get_mut().fill_buf(), if watch_client => match filled {
                        Ok([]) | Err(_) => {
                            tracing::debug!("control client went away mid-request");
                            break;
                        }
                        // Next request already queued; it is read after this one
                        Ok(_) => {
                            watch_client = false;
                            continue;
                        }
                    },
                };
                write_response(&mut write_half, &response).await?;
            }
            Ok::<(), ControlError>(())
        };

        let ((), written) = tokio::select! {
            () = cancel.cancelled() => return Ok(()),
            done = async { tokio::join!(handling, writing) } => done,
        };
        written?;
    }
}

async fn write_response<W>(writer: &mut W, response: &ControlResponse) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut line = serde_json::to_vec(response)?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await?;
    Ok(())
}
