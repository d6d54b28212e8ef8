//! Command line configuration for both binaries.

use std::net::{AddrParseError, Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{anyhow, Context, Result};
use nix::unistd::getuid;

use crate::date::ConditionalOffset;
use crate::request::MAX_REQUEST_LENGTH;
use crate::Method;

const DEFAULT_OUTPUT: &str = "response";

/// What the command line asked for.
#[derive(Debug)]
pub enum Invocation<T> {
    Run(T),
    /// Print usage and stop; `true` when the invocation itself was wrong.
    Usage(bool),
}

/// Server settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub wwwroot: PathBuf,
    pub bindaddr: Option<String>,
    pub bindport: u16,
    pub want_chroot: bool,
    pub max_request_len: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            wwwroot: PathBuf::from("."),
            bindaddr: None,
            bindport: if getuid().is_root() { 80 } else { 8080 },
            want_chroot: false,
            max_request_len: MAX_REQUEST_LENGTH,
        }
    }
}

impl ServerConfig {
    /// Parse arguments, not including the program name.
    pub fn from_args<I: IntoIterator<Item = String>>(args: I) -> Result<Invocation<Self>> {
        let mut server = Self::default();
        let mut args = args.into_iter().peekable();
        if let Some(wwwroot) = args.next_if(|arg| !arg.starts_with("--")) {
            server.wwwroot = PathBuf::from(wwwroot);
        }
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--help" => return Ok(Invocation::Usage(false)),
                "--port" => {
                    let number = args.next().context("missing number after --port")?;
                    server.bindport = number
                        .parse()
                        .with_context(|| format!("port number {} is invalid", number))?;
                }
                "--addr" => {
                    server.bindaddr = Some(args.next().context("missing ip after --addr")?);
                }
                "--chroot" => server.want_chroot = true,
                "--maxreq" => {
                    let number = args.next().context("missing number after --maxreq")?;
                    server.max_request_len = number
                        .parse()
                        .with_context(|| format!("maxreq number {} is invalid", number))?;
                }
                _ => return Err(anyhow!("unknown argument `{}'", arg)),
            }
        }
        Ok(Invocation::Run(server))
    }

    pub fn usage(&self, argv0: &str) -> String {
        format!(
            "usage:\t{} [/path/to/wwwroot] [flags]\n\n\
            flags:\t--port number (default: {}, or 80 if running as root)\n\
            \t\tSpecifies which port to listen on for connections.\n\n\
            \t--addr ip (default: all)\n\
            \t\tIf multiple interfaces are present, specifies\n\
            \t\twhich one to bind the listening port to.\n\n\
            \t--chroot (default: don't chroot)\n\
            \t\tLocks server into wwwroot directory for added security.\n\n\
            \t--maxreq bytes (default: {})\n\
            \t\tDrops requests whose head grows past this size.\n\n",
            argv0, self.bindport, MAX_REQUEST_LENGTH,
        )
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, AddrParseError> {
        let addr = Ipv4Addr::from_str(self.bindaddr.as_deref().unwrap_or("0.0.0.0"))?;
        Ok(SocketAddr::V4(SocketAddrV4::new(addr, self.bindport)))
    }
}

/// Client settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub url: String,
    pub method: Method,
    pub since: Option<ConditionalOffset>,
    pub output: PathBuf,
}

impl ClientConfig {
    /// Parse arguments, not including the program name. Flags come before
    /// the URL.
    pub fn from_args<I: IntoIterator<Item = String>>(args: I) -> Result<Invocation<Self>> {
        let mut method = Method::Get;
        let mut since = None;
        let mut output = PathBuf::from(DEFAULT_OUTPUT);
        let mut args = args.into_iter();
        let url = loop {
            let arg = match args.next() {
                Some(arg) => arg,
                None => return Ok(Invocation::Usage(true)),
            };
            match arg.as_str() {
                "-h" => method = Method::Head,
                "-d" => {
                    let offset = args.next().context("missing D:H:M after -d")?;
                    since = Some(ConditionalOffset::parse(&offset));
                }
                "-o" => {
                    output = PathBuf::from(args.next().context("missing filename after -o")?);
                }
                "--help" => return Ok(Invocation::Usage(false)),
                flag if flag.starts_with('-') => return Ok(Invocation::Usage(true)),
                _ => break arg,
            }
        };
        Ok(Invocation::Run(Self {
            url,
            method,
            since,
            output,
        }))
    }

    pub fn usage(argv0: &str) -> String {
        format!("usage: {} [-h] [-d D:H:M] [-o file] <URL>\n", argv0)
    }
}
