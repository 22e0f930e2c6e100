use mirrorcache_observability::LogLevel;
use std::collections::HashMap;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::state::AppState;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_HEADER_BYTES: usize = 8192;

/// Peek an accepted connection to decide whether it opens with `CONNECT `
/// (§4.8). If so, read its request line and headers, dial the tunnel
/// target, and relay until the tunnel closes — consuming `stream` entirely.
/// Otherwise `stream` is returned unread for normal HTTP/1 handling.
///
/// CONNECT is intercepted here, ahead of hyper, because the wire reply the
/// spec requires — the literal line `HTTP/1.1 200 Connection Established`
/// — is not a reason phrase hyper's HTTP/1 writer lets a handler choose.
pub async fn intercept(mut stream: TcpStream, state: &AppState) -> io::Result<Option<TcpStream>> {
    const NEEDLE: &[u8] = b"CONNECT ";
    let mut peek_buf = [0u8; 8];
    let mut n = 0;
    for _ in 0..20 {
        n = stream.peek(&mut peek_buf).await?;
        if n >= NEEDLE.len() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    if &peek_buf[..n] != NEEDLE {
        return Ok(Some(stream));
    }

    let (path, headers) = read_request_headers(&mut stream).await?;
    let target = tunnel_target(headers.get("host").map(String::as_str), Some(path.as_str()));
    state.stats.add_log(LogLevel::Info, format!("CONNECT: {target}"));
    if let Err(e) = relay(stream, &target).await {
        state.stats.add_log(LogLevel::Error, format!("CONNECT failed: {target} ({e})"));
        return Err(e);
    }
    Ok(None)
}

async fn read_request_headers(stream: &mut TcpStream) -> io::Result<(String, HashMap<String, String>)> {
    let mut buf = Vec::with_capacity(2048);
    let mut chunk = [0u8; 1024];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed before CONNECT headers completed"));
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
        if buf.len() > MAX_HEADER_BYTES {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "CONNECT request headers too large"));
        }
    }

    let mut headers_raw = [httparse::EMPTY_HEADER; 64];
    let mut req = httparse::Request::new(&mut headers_raw);
    match req.parse(&buf) {
        Ok(httparse::Status::Complete(_)) => {
            let path = req.path.unwrap_or("").to_string();
            let mut headers = HashMap::new();
            for h in req.headers.iter() {
                if h.name.is_empty() {
                    break;
                }
                headers.insert(h.name.to_ascii_lowercase(), String::from_utf8_lossy(h.value).into_owned());
            }
            Ok((path, headers))
        }
        _ => Err(io::Error::new(io::ErrorKind::InvalidData, "malformed CONNECT request")),
    }
}

/// Resolve the tunnel's `host:port` target from the `Host` header,
/// falling back to the request-line authority (§4.8). Defaults to port 443
/// when no port is given.
pub fn tunnel_target(host_header: Option<&str>, request_authority: Option<&str>) -> String {
    let candidate = match host_header {
        Some(h) if !h.is_empty() && !h.chars().all(|c| c.is_ascii_digit()) => h,
        _ => request_authority.unwrap_or(""),
    };
    if candidate.contains(':') {
        candidate.to_string()
    } else {
        format!("{candidate}:443")
    }
}

/// Dial `target` and relay bytes bidirectionally between it and `client`
/// until either side hits EOF or an error (§4.8, §8 property 9). `client`
/// must already be an upgraded, hijacked connection stream.
pub async fn relay<C>(mut client: C, target: &str) -> Result<(), std::io::Error>
where
    C: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let connect = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(target)).await;
    let mut upstream = match connect {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            warn!(target, error = %e, "CONNECT dial failed");
            client.write_all(b"HTTP/1.1 502 Bad Gateway\r\n\r\n").await?;
            return Err(e);
        }
        Err(_) => {
            warn!(target, "CONNECT dial timed out");
            client.write_all(b"HTTP/1.1 504 Gateway Timeout\r\n\r\n").await?;
            return Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timeout"));
        }
    };

    client.write_all(b"HTTP/1.1 200 Connection Established\r\n\r\n").await?;

    match tokio::io::copy_bidirectional(&mut client, &mut upstream).await {
        Ok((to_upstream, to_client)) => {
            debug!(target, to_upstream, to_client, "tunnel closed");
            Ok(())
        }
        Err(e) => {
            debug!(target, error = %e, "tunnel closed with error");
            Err(e)
        }
    }
}
