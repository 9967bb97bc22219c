//! Just enough HTTP/1.x to pick a route: read the request head, inject
//! forwarding headers, and answer gateway errors. Everything after the head
//! is relayed untouched.

use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};

use super::error::{ProxyError, Result};

/// Default limit for the request line plus headers.
pub const MAX_HEAD_BYTES: usize = 64 * 1024;

const HEAD_END: &[u8] = b"\r\n\r\n";

/// Parsed request line and headers, plus any body bytes read past them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    pub method: String,
    pub target: String,
    pub version: String,
    pub headers: Vec<(String, String)>,
    /// Bytes that arrived in the same reads as the head
    pub remainder: Vec<u8>,
}

impl RequestHead {
    /// First value of a header, matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn host(&self) -> Option<&str> {
        self.header("host").filter(|h| !h.is_empty())
    }

    /// Serialize the head for the backend with forwarding headers set.
    ///
    /// `X-Forwarded-Host` and `X-Forwarded-Proto` replace any incoming
    /// values; the client address is appended to `X-Forwarded-For`.
    pub fn forwarded(&self, client: SocketAddr, proto: &str, host: &str) -> Vec<u8> {
        let mut out = format!("{} {} {}\r\n", self.method, self.target, self.version);
        let mut forwarded_for = None;

        for (name, value) in &self.headers {
            if name.eq_ignore_ascii_case("x-forwarded-host")
                || name.eq_ignore_ascii_case("x-forwarded-proto")
            {
                continue;
            }
            if name.eq_ignore_ascii_case("x-forwarded-for") {
                forwarded_for = Some(value.as_str());
                continue;
            }
            out.push_str(&format!("{name}: {value}\r\n"));
        }

        let client_ip = client.ip();
        match forwarded_for {
            Some(existing) => out.push_str(&format!("X-Forwarded-For: {existing}, {client_ip}\r\n")),
            None => out.push_str(&format!("X-Forwarded-For: {client_ip}\r\n")),
        }
        out.push_str(&format!("X-Forwarded-Host: {host}\r\n"));
        out.push_str(&format!("X-Forwarded-Proto: {proto}\r\n\r\n"));

        let mut bytes = out.into_bytes();
        bytes.extend_from_slice(&self.remainder);
        bytes
    }
}

/// Read and parse a request head of at most `limit` bytes within `wait`.
pub async fn read_head<R>(reader: &mut R, limit: usize, wait: Duration) -> Result<RequestHead>
where
    R: AsyncRead + Unpin,
{
    match tokio::time::timeout(wait, read_head_bytes(reader, limit)).await {
        Ok(result) => {
            let (head, remainder) = result?;
            parse_head(&head, remainder)
        }
        Err(_) => Err(ProxyError::HeadTimeout(wait)),
    }
}

async fn read_head_bytes<R>(reader: &mut R, limit: usize) -> Result<(Vec<u8>, Vec<u8>)>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::with_capacity(4096);
    let mut chunk = [0u8; 4096];
    let mut scanned: usize = 0;

    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Err(if buf.is_empty() {
                ProxyError::ClientClosed
            } else {
                ProxyError::MalformedRequest("connection closed inside request head".into())
            });
        }
        buf.extend_from_slice(&chunk[..n]);

        // Resume the search a few bytes back in case the terminator straddles reads
        let from = scanned.saturating_sub(HEAD_END.len() - 1);
        if let Some(pos) = find(&buf[from..], HEAD_END) {
            let end = from + pos + HEAD_END.len();
            if end > limit {
                return Err(ProxyError::HeadTooLarge(limit));
            }
            let remainder = buf.split_off(end);
            return Ok((buf, remainder));
        }
        if buf.len() > limit {
            return Err(ProxyError::HeadTooLarge(limit));
        }
        scanned = buf.len();
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn parse_head(raw: &[u8], remainder: Vec<u8>) -> Result<RequestHead> {
    let text = std::str::from_utf8(raw)
        .map_err(|_| ProxyError::MalformedRequest("request head is not valid UTF-8".into()))?;
    let mut lines = text.split("\r\n");

    let request_line = lines.next().unwrap_or_default();
    let mut parts = request_line.split_ascii_whitespace();
    let (Some(method), Some(target), Some(version), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(ProxyError::MalformedRequest(format!(
            "invalid request line '{request_line}'"
        )));
    };
    if !version.starts_with("HTTP/1.") {
        return Err(ProxyError::MalformedRequest(format!("unsupported version '{version}'")));
    }

    let mut headers = Vec::new();
    for line in lines.take_while(|l| !l.is_empty()) {
        let Some((name, value)) = line.split_once(':') else {
            return Err(ProxyError::MalformedRequest(format!("invalid header line '{line}'")));
        };
        headers.push((name.trim().to_string(), value.trim().to_string()));
    }

    Ok(RequestHead {
        method: method.to_string(),
        target: target.to_string(),
        version: version.to_string(),
        headers,
        remainder,
    })
}

/// A complete `Connection: close` response with a small HTML body.
pub fn error_response(status: u16, reason: &str, message: &str) -> Vec<u8> {
    let body = format!(
        "<!DOCTYPE html>\n<html><head><title>{status} {reason}</title></head>\n\
         <body><h1>{status} {reason}</h1><p>{}</p><hr><p>lokl</p></body></html>\n",
        escape_html(message)
    );
    format!(
        "HTTP/1.1 {status} {reason}\r\nContent-Type: text/html; charset=utf-8\r\n\
         Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    )
    .into_bytes()
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;

    const WAIT: Duration = Duration::from_secs(1);

    #[tokio::test]
    async fn test_read_head_keeps_body_bytes() {
        let raw = b"POST /items HTTP/1.1\r\nHost: api.shop.test\r\nContent-Length: 4\r\n\r\nabcd";
        let mut reader = &raw[..];

        let head = read_head(&mut reader, MAX_HEAD_BYTES, WAIT).await.unwrap();
        assert_eq!(head.method, "POST");
        assert_eq!(head.target, "/items");
        assert_eq!(head.host(), Some("api.shop.test"));
        assert_eq!(head.header("content-length"), Some("4"));
        assert_eq!(head.remainder, b"abcd");
    }

    #[tokio::test]
    async fn test_read_head_split_terminator() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let writer = tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            client.write_all(b"GET / HTTP/1.1\r\nHost: a.test\r\n\r").await.unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
            client.write_all(b"\n").await.unwrap();
            client
        });

        let head = read_head(&mut server, MAX_HEAD_BYTES, WAIT).await.unwrap();
        assert_eq!(head.host(), Some("a.test"));
        assert!(head.remainder.is_empty());
        drop(writer.await.unwrap());
    }

    #[tokio::test]
    async fn test_read_head_limits() {
        let mut big = b"GET / HTTP/1.1\r\nX-Fill: ".to_vec();
        big.extend(std::iter::repeat_n(b'a', 200));
        big.extend_from_slice(b"\r\n\r\n");
        let mut reader = &big[..];
        assert!(matches!(
            read_head(&mut reader, 64, WAIT).await,
            Err(ProxyError::HeadTooLarge(64))
        ));

        let mut empty: &[u8] = b"";
        assert!(matches!(
            read_head(&mut empty, MAX_HEAD_BYTES, WAIT).await,
            Err(ProxyError::ClientClosed)
        ));

        let (_client, mut server) = tokio::io::duplex(64);
        assert!(matches!(
            read_head(&mut server, MAX_HEAD_BYTES, Duration::from_millis(50)).await,
            Err(ProxyError::HeadTimeout(_))
        ));
    }

    #[tokio::test]
    async fn test_malformed_request_line() {
        let mut reader: &[u8] = b"HELLO\r\n\r\n";
        assert!(matches!(
            read_head(&mut reader, MAX_HEAD_BYTES, WAIT).await,
            Err(ProxyError::MalformedRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_forwarded_headers() {
        let raw = b"GET /ws HTTP/1.1\r\nHost: app.test:8443\r\nX-Forwarded-Proto: ftp\r\n\
                    X-Forwarded-For: 10.0.0.1\r\nUpgrade: websocket\r\n\r\n";
        let mut reader = &raw[..];
        let head = read_head(&mut reader, MAX_HEAD_BYTES, WAIT).await.unwrap();

        let client = SocketAddr::from(([127, 0, 0, 1], 50000));
        let out = String::from_utf8(head.forwarded(client, "https", "app.test:8443")).unwrap();

        assert!(out.starts_with("GET /ws HTTP/1.1\r\n"));
        assert!(out.contains("Upgrade: websocket\r\n"));
        assert!(out.contains("X-Forwarded-For: 10.0.0.1, 127.0.0.1\r\n"));
        assert!(out.contains("X-Forwarded-Host: app.test:8443\r\n"));
        assert!(out.contains("X-Forwarded-Proto: https\r\n"));
        assert!(!out.contains("ftp"));
        assert!(out.ends_with("\r\n\r\n"));
    }

    #[test]
    fn test_error_response_is_complete() {
        let response = String::from_utf8(error_response(502, "Bad Gateway", "no route for <x>")).unwrap();
        let (head, body) = response.split_once("\r\n\r\n").unwrap();

        assert!(head.starts_with("HTTP/1.1 502 Bad Gateway"));
        assert!(head.contains(&format!("Content-Length: {}", body.len())));
        assert!(body.contains("no route for &lt;x&gt;"));
    }
}
