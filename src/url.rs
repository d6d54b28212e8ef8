use std::fmt;

use crate::error::{Error, Result};

const HTTP_PORT: &str = "80";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
}

impl Scheme {
    /// Port implied by the scheme when the URL does not name one.
    pub fn default_port(self) -> &'static str {
        match self {
            Self::Http => HTTP_PORT,
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http => f.write_str("http"),
        }
    }
}

/// Where a client request goes, recovered from a loosely formed URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub scheme: Scheme,
    pub host: String,
    pub port: String,
    /// Resource path without its leading `/`.
    pub resource: String,
}

impl Target {
    /// Parse `scheme://host[:port]/resource`.
    ///
    /// Parsing is tolerant: runs of delimiters collapse, so `http:example.com`
    /// and `http:///example.com//a` are both accepted. The scheme ends at the
    /// first `:` or `/`, the host at the next `/`, and everything after that is
    /// the resource.
    pub fn parse(url: &str) -> Result<Self> {
        let (scheme, rest) = next_token(url, &[':', '/']).ok_or(Error::InvalidUrl)?;
        let (host, rest) = next_token(rest, &['/']).ok_or(Error::InvalidUrl)?;
        let resource = rest.trim_start_matches('/');

        let scheme = match scheme {
            "http" => Scheme::Http,
            other => return Err(Error::UnsupportedProtocol(other.to_string())),
        };

        // A second pass over the host recovers an embedded port.
        let (name, rest) = next_token(host, &[':']).ok_or(Error::InvalidUrl)?;
        let port = match next_token(rest, &[':']) {
            Some((port, _)) => port,
            None => scheme.default_port(),
        };

        Ok(Self {
            scheme,
            host: name.to_string(),
            port: port.to_string(),
            resource: resource.to_string(),
        })
    }
}

/// Skip leading delimiters, then split off the next non-empty token.
///
/// The returned remainder starts after the single delimiter that ended the
/// token, or is empty when the input ran out.
fn next_token<'a>(input: &'a str, delims: &[char]) -> Option<(&'a str, &'a str)> {
    let input = input.trim_start_matches(|c: char| delims.contains(&c));
    if input.is_empty() {
        return None;
    }
    match input.find(|c: char| delims.contains(&c)) {
        Some(end) => Some((&input[..end], &input[end + 1..])),
        None => Some((input, "")),
    }
}
