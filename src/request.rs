//! Reading and tokenizing the single request a worker serves.

use std::io::{ErrorKind, Read};

use chrono::{DateTime, Utc};
use log::{debug, warn};

use crate::date::parse_if_modified_since;
use crate::error::{Error, Result};

/// Size of each read from the client.
const REQUEST_CHUNK_LEN: usize = 512;

// To prevent a malformed request from eating up too much memory, give up once the request exceeds
// this many bytes:
pub const MAX_REQUEST_LENGTH: usize = 4000;

const IF_MODIFIED_SINCE: &str = "If-Modified-Since";

/// Accumulate request bytes until the head is complete.
///
/// Stops at the first blank line, or when the peer closes early, in which case
/// whatever arrived is returned. A head longer than `limit` fails with
/// `RequestTooLarge`.
pub fn read_request<R: Read>(stream: &mut R, limit: usize) -> Result<Vec<u8>> {
    let mut request = Vec::new();
    let mut buf = [0; REQUEST_CHUNK_LEN];
    loop {
        let len = match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(len) => len,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        request.extend_from_slice(&buf[..len]);
        let complete = match head_end(&request) {
            Some(end) => {
                request.truncate(end);
                true
            }
            None => false,
        };
        if request.len() > limit {
            return Err(Error::RequestTooLarge(limit));
        }
        if complete {
            break;
        }
    }
    Ok(request)
}

/// Index just past the blank line that ends the request head, if any.
fn head_end(request: &[u8]) -> Option<usize> {
    let crlf = find(b"\r\n\r\n", request).map(|i| i + 4);
    let lf = find(b"\n\n", request).map(|i| i + 2);
    match (crlf, lf) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

/// Return index of first occurrence of `needle` in `haystack`.
fn find(needle: &[u8], haystack: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// A parsed request head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingRequest {
    pub method: String,
    pub path: String,
    pub version: String,
    /// Header fields in arrival order.
    pub headers: Vec<(String, String)>,
    /// The last well-formed `If-Modified-Since` value seen.
    pub if_modified_since: Option<DateTime<Utc>>,
}

impl IncomingRequest {
    /// Tokenize a request head.
    ///
    /// The request line is split on spaces and must yield a method, path and
    /// version. Every following non-empty line is split once on `": "`; lines
    /// without that separator are ignored. Header names are matched exactly.
    pub fn parse(request: &[u8]) -> Result<Self> {
        let request = String::from_utf8_lossy(request);
        let mut lines = request
            .split(|c: char| matches!(c, '\r' | '\n'))
            .filter(|line| !line.is_empty());

        let request_line = lines.next().ok_or(Error::MalformedRequest)?;
        let mut words = request_line.split(' ').filter(|word| !word.is_empty());
        let method = words.next().ok_or(Error::MalformedRequest)?;
        let path = words.next().ok_or(Error::MalformedRequest)?;
        let version = words.next().ok_or(Error::MalformedRequest)?;

        let mut headers = Vec::new();
        let mut if_modified_since = None;
        for line in lines {
            let (key, value) = match line.split_once(": ") {
                Some(field) => field,
                None => {
                    debug!("ignoring header line without separator: {:?}", line);
                    continue;
                }
            };
            if key == IF_MODIFIED_SINCE {
                match parse_if_modified_since(value) {
                    Some(since) => if_modified_since = Some(since),
                    None => warn!("ignoring unparseable {}: {}", IF_MODIFIED_SINCE, value),
                }
            }
            headers.push((key.to_string(), value.to_string()));
        }

        Ok(Self {
            method: method.to_string(),
            path: path.to_string(),
            version: version.to_string(),
            headers,
            if_modified_since,
        })
    }

    /// First value of header `name`, matched exactly.
    #[cfg(test)]
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use std::io::Cursor;

    use chrono::TimeZone;
    use test_case::test_case;

    /// Reader that hands out its input in fixed-size pieces.
    struct Trickle<'a> {
        data: &'a [u8],
        step: usize,
    }

    impl Read for Trickle<'_> {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            let len = self.step.min(buf.len()).min(self.data.len());
            buf[..len].copy_from_slice(&self.data[..len]);
            self.data = &self.data[len..];
            Ok(len)
        }
    }

    #[test]
    fn parse_simple_get() {
        let request = IncomingRequest::parse(
            b"GET /index.html HTTP/1.1\r\nHost: example.com\r\nConnection: close\r\n\r\n",
        )
        .unwrap();
        assert_eq!(request.method, "GET");
        assert_eq!(request.path, "/index.html");
        assert_eq!(request.version, "HTTP/1.1");
        assert_eq!(
            request.headers,
            vec![
                ("Host".to_string(), "example.com".to_string()),
                ("Connection".to_string(), "close".to_string()),
            ]
        );
        assert_eq!(request.header("Host"), Some("example.com"));
        assert_eq!(request.if_modified_since, None);
    }

    #[test]
    fn parse_if_modified_since_header() {
        let request = IncomingRequest::parse(
            b"GET / HTTP/1.1\r\nIf-Modified-Since: Wed May 26 14:51:23 2021 GMT\r\n\r\n",
        )
        .unwrap();
        assert_eq!(
            request.if_modified_since,
            Some(Utc.timestamp_opt(1622040683, 0).unwrap())
        );
    }

    #[test]
    fn last_if_modified_since_wins() {
        let request = IncomingRequest::parse(
            b"GET / HTTP/1.1\r\n\
            If-Modified-Since: Wed May 26 14:51:23 2021 GMT\r\n\
            If-Modified-Since: Sun Oct  3 08:00:00 2021 GMT\r\n\r\n",
        )
        .unwrap();
        assert_eq!(
            request.if_modified_since,
            Some(Utc.timestamp_opt(1633248000, 0).unwrap())
        );
    }

    #[test_case("if-modified-since: Wed May 26 14:51:23 2021 GMT" ; "lowercase key")]
    #[test_case("If-Modified-Since: yesterday" ; "unparseable value")]
    #[test_case("If-Modified-Since:Wed May 26 14:51:23 2021 GMT" ; "missing space")]
    fn if_modified_since_ignored(line: &str) {
        let request = IncomingRequest::parse(format!("GET / HTTP/1.1\r\n{}\r\n\r\n", line).as_bytes())
            .unwrap();
        assert_eq!(request.if_modified_since, None);
    }

    #[test]
    fn parse_tolerates_bare_newlines_and_extra_spaces() {
        let request = IncomingRequest::parse(b"\nHEAD  /a   HTTP/1.0\n\nX-Thing: a: b\n").unwrap();
        assert_eq!(request.method, "HEAD");
        assert_eq!(request.path, "/a");
        assert_eq!(request.version, "HTTP/1.0");
        assert_eq!(request.header("X-Thing"), Some("a: b"));
    }

    #[test_case(b"" ; "empty")]
    #[test_case(b"\r\n\r\n" ; "blank")]
    #[test_case(b"GET\r\n\r\n" ; "method only")]
    #[test_case(b"GET /\r\n\r\n" ; "no version")]
    fn parse_rejects_malformed(request: &[u8]) {
        assert!(matches!(
            IncomingRequest::parse(request),
            Err(Error::MalformedRequest)
        ));
    }

    #[test]
    fn read_request_stops_at_blank_line() {
        let data = b"GET / HTTP/1.1\r\nHost: x\r\n\r\ntrailing";
        let request = read_request(&mut Cursor::new(&data[..]), MAX_REQUEST_LENGTH).unwrap();
        assert_eq!(request, b"GET / HTTP/1.1\r\nHost: x\r\n\r\n");
    }

    #[test]
    fn read_request_accumulates_small_reads() {
        let data = b"GET /slow HTTP/1.1\r\nHost: x\r\n\r\n";
        let mut reader = Trickle { data, step: 3 };
        let request = read_request(&mut reader, MAX_REQUEST_LENGTH).unwrap();
        assert_eq!(request, &data[..]);
    }

    #[test]
    fn read_request_spans_several_chunks() {
        let mut data = b"GET / HTTP/1.1\r\n".to_vec();
        for i in 0..100 {
            data.extend(format!("X-Header-{}: value\r\n", i).as_bytes());
        }
        data.extend(b"\r\n");
        assert!(data.len() > REQUEST_CHUNK_LEN);
        let request = read_request(&mut Cursor::new(data.clone()), 1 << 16).unwrap();
        assert_eq!(request, data);
        assert_eq!(IncomingRequest::parse(&request).unwrap().headers.len(), 100);
    }

    #[test]
    fn read_request_returns_partial_head_on_close() {
        let data = b"GET / HTTP/1.1\r\nHost: x\r\n";
        let request = read_request(&mut Cursor::new(&data[..]), MAX_REQUEST_LENGTH).unwrap();
        assert_eq!(request, &data[..]);
    }

    #[test]
    fn read_request_rejects_complete_but_oversized_head() {
        let data = format!("GET /{} HTTP/1.1\r\n\r\n", "a".repeat(100));
        assert!(matches!(
            read_request(&mut Cursor::new(data.into_bytes()), 64),
            Err(Error::RequestTooLarge(64))
        ));
    }

    #[test]
    fn read_request_rejects_oversized_head() {
        let data = vec![b'a'; 2 * MAX_REQUEST_LENGTH];
        assert!(matches!(
            read_request(&mut Cursor::new(data), MAX_REQUEST_LENGTH),
            Err(Error::RequestTooLarge(MAX_REQUEST_LENGTH))
        ));
    }
}
