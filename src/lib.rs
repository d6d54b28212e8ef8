//! A small HTTP/1.1 subset: a one-shot GET/HEAD client and a static file
//! server that forks one worker process per connection.

use std::fmt;
use std::str::FromStr;

pub mod client;
pub mod config;
pub mod date;
pub mod error;
pub mod reply;
pub mod request;
pub mod resolve;
pub mod server;
pub mod url;

pub use error::{Error, Result};

/// The only request methods either side speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Head,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Head => "HEAD",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = Error;

    /// Method names are matched exactly; `get` is not `GET`.
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "GET" => Ok(Self::Get),
            "HEAD" => Ok(Self::Head),
            other => Err(Error::UnsupportedMethod(other.to_string())),
        }
    }
}
