//! Client side of the exchange: connect, send one request, drain the response.

use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};

use log::{debug, info, warn};

use crate::error::{Error, Result};
use crate::url::Target;
use crate::Method;

/// Size of each read from the server.
const RESPONSE_CHUNK_LEN: usize = 512;

/// Resolve the target and connect to the first IPv4 candidate that accepts.
pub fn connect(target: &Target) -> Result<TcpStream> {
    let candidates = resolve(&target.host, &target.port)?;
    connect_first(candidates)
}

/// Resolve `host:port` to its IPv4 candidates, in resolver order.
pub fn resolve(host: &str, port: &str) -> Result<Vec<SocketAddr>> {
    let resolution_error = |source| Error::Resolution {
        host: host.to_string(),
        port: port.to_string(),
        source,
    };
    let port = port.parse::<u16>().map_err(|e| {
        resolution_error(std::io::Error::new(
            ErrorKind::InvalidInput,
            format!("invalid port: {}", e),
        ))
    })?;
    let candidates = (host, port)
        .to_socket_addrs()
        .map_err(resolution_error)?
        .filter(SocketAddr::is_ipv4)
        .collect();
    Ok(candidates)
}

/// Try each candidate in order and keep the first connection that succeeds.
///
/// A failing candidate is logged and skipped; only running out of candidates
/// is an error.
pub fn connect_first<I>(candidates: I) -> Result<TcpStream>
where
    I: IntoIterator<Item = SocketAddr>,
{
    for addr in candidates {
        info!("trying {}", addr.ip());
        match TcpStream::connect(addr) {
            Ok(stream) => {
                info!("connected to {}", addr);
                return Ok(stream);
            }
            Err(e) => warn!("connect() to {} failed ({})", addr, e),
        }
    }
    Err(Error::ConnectionFailed)
}

/// Write the request head for `target`.
///
/// `since` is an already encoded date; ` GMT` is appended here. The request
/// never carries a body and always asks the server to close the connection,
/// so end of stream marks the end of the response.
pub fn send_request<W: Write>(
    stream: &mut W,
    method: Method,
    target: &Target,
    since: Option<&str>,
) -> Result<Method> {
    let mut head = format!(
        "{} /{} HTTP/1.1\r\n\
        Host: {}\r\n\
        Connection: close\r\n",
        method, target.resource, target.host,
    );
    if let Some(since) = since {
        head.push_str(&format!("If-Modified-Since: {} GMT\r\n", since));
    }
    head.push_str("\r\n");

    stream.write_all(head.as_bytes())?;
    stream.flush()?;
    debug!("sent {} request for /{}", method, target.resource);
    Ok(method)
}

/// Status code and reason phrase from the first line of a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    pub code: String,
    pub reason: String,
}

impl StatusLine {
    /// Best-effort extraction from the first chunk of a response. The chunk
    /// itself is left untouched.
    pub fn from_chunk(chunk: &[u8]) -> Option<Self> {
        let text = String::from_utf8_lossy(chunk);
        let line = text
            .split(|c: char| matches!(c, '\r' | '\n'))
            .find(|line| !line.is_empty())?;
        let mut parts = line.splitn(2, ' ');
        let _version = parts.next()?;
        let rest = parts.next()?.trim_start_matches(' ');
        let mut parts = rest.splitn(2, ' ');
        let code = parts.next().filter(|code| !code.is_empty())?;
        let reason = parts.next().unwrap_or("").trim_start_matches(' ');
        Some(Self {
            code: code.to_string(),
            reason: reason.to_string(),
        })
    }
}

impl std::fmt::Display for StatusLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} : {}", self.code, self.reason)
    }
}

/// What came back from the server.
#[derive(Debug, Default)]
pub struct Received {
    pub status: Option<StatusLine>,
    /// Total bytes copied to the sink, headers included.
    pub bytes: u64,
}

/// Copy the whole response, headers and all, into `sink` until the server
/// closes the connection.
///
/// A read error ends the transfer early but is not fatal: whatever was
/// received so far is kept and reported. Failing to write to the sink is.
pub fn receive<R: Read, W: Write>(stream: &mut R, sink: &mut W) -> Result<Received> {
    let mut received = Received::default();
    let mut buf = [0; RESPONSE_CHUNK_LEN];
    let mut first = true;
    loop {
        let len = match stream.read(&mut buf) {
            Ok(len) => len,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                warn!("read failed: {}", e);
                break;
            }
        };
        if first {
            first = false;
            received.status = StatusLine::from_chunk(&buf[..len]);
        }
        if len == 0 {
            break;
        }
        sink.write_all(&buf[..len])?;
        received.bytes += len as u64;
        debug!("receiving data.. ({})", received.bytes);
    }
    sink.flush()?;
    Ok(received)
}
