use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

const RELAY_BUFFER: usize = 16 * 1024;

/// Bytes moved in each direction of a relayed connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub client_to_backend: u64,
    pub backend_to_client: u64,
}

/// Copy bytes both ways until either side closes or `cancel` fires.
///
/// Each direction runs on its own task. Both share a child of `cancel`, so
/// when one direction finishes the other is torn down with it.
pub async fn relay<C, B>(client: C, backend: B, cancel: &CancellationToken) -> RelayStats
where
    C: AsyncRead + AsyncWrite + Send + 'static,
    B: AsyncRead + AsyncWrite + Send + 'static,
{
    let token = cancel.child_token();
    let (client_read, client_write) = tokio::io::split(client);
    let (backend_read, backend_write) = tokio::io::split(backend);

    let upstream = tokio::spawn(pipe(client_read, backend_write, token.clone()));
    let downstream = tokio::spawn(pipe(backend_read, client_write, token));
    let (up, down) = tokio::join!(upstream, downstream);

    RelayStats {
        client_to_backend: up.unwrap_or_default(),
        backend_to_client: down.unwrap_or_default(),
    }
}

async fn pipe<R, W>(mut reader: R, mut writer: W, token: CancellationToken) -> u64
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; RELAY_BUFFER];
    let mut total = 0u64;

    loop {
        let n = tokio::select! {
            () = token.cancelled() => break,
            read = reader.read(&mut buf) => match read {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    tracing::debug!(error = %e, "relay read failed");
                    break;
                }
            },
        };
        if let Err(e) = writer.write_all(&buf[..n]).await {
            tracing::debug!(error = %e, "relay write failed");
            break;
        }
        total += n as u64;
    }

    // Peer may already be gone
    let _ = writer.shutdown().await;
    token.cancel();
    total
}
