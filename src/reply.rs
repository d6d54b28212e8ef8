use std::io::{ErrorKind, Read, Write};

use log::info;
use nix::unistd::getpid;

use crate::error::Result;
use crate::resolve::Resolution;
use crate::Method;

/// Chunk size when sending over files.
const SEND_CHUNK_LEN: usize = 512;

/// The three status lines the server ever writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    NotModified,
    NotFound,
}

impl Status {
    pub fn code(self) -> u16 {
        match self {
            Self::Ok => 200,
            Self::NotModified => 304,
            Self::NotFound => 404,
        }
    }

    pub fn reason(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::NotModified => "Not Modified",
            Self::NotFound => "Not Found",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "HTTP/1.1 {} {}", self.code(), self.reason())
    }
}

/// How a request was answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    /// `200` with the file body; holds the number of body bytes sent.
    OkBody(u64),
    /// `200` to a HEAD request.
    OkNoBody,
    NotModified,
    NotFound,
}

impl Reply {
    pub fn status(self) -> Status {
        match self {
            Self::OkBody(_) | Self::OkNoBody => Status::Ok,
            Self::NotModified => Status::NotModified,
            Self::NotFound => Status::NotFound,
        }
    }

    /// Worker exit status for this reply.
    pub fn exit_code(self) -> i32 {
        match self {
            Self::OkBody(_) | Self::OkNoBody | Self::NotModified => 0,
            Self::NotFound => 1,
        }
    }
}

/// Write the response for an already resolved request.
///
/// Exactly one status line goes out first. Only a GET for a found file is
/// followed by anything: a blank line and then the raw file contents. The file
/// is closed when this returns, whatever the outcome.
pub fn send<W: Write>(socket: &mut W, method: Method, resolution: Resolution) -> Result<Reply> {
    let status = match resolution {
        Resolution::Found(_) => Status::Ok,
        Resolution::NotModified => Status::NotModified,
        Resolution::NotFound => Status::NotFound,
    };

    // The client takes the status line from its first read.
    let line = format!("{}\r\n", status);
    socket.write_all(line.as_bytes())?;
    info!("[{}] {}", getpid(), status);

    let reply = match (resolution, method) {
        (Resolution::NotModified, _) => Reply::NotModified,
        (Resolution::NotFound, _) => Reply::NotFound,
        (Resolution::Found(_), Method::Head) => Reply::OkNoBody,
        (Resolution::Found(mut file), Method::Get) => {
            socket.write_all(b"\r\n")?;
            Reply::OkBody(send_body(socket, &mut file)?)
        }
    };
    socket.flush()?;
    Ok(reply)
}

/// Stream `file` in fixed-size chunks until a short read.
fn send_body<W: Write, R: Read>(socket: &mut W, file: &mut R) -> Result<u64> {
    let mut buf = [0; SEND_CHUNK_LEN];
    let mut sent = 0;
    loop {
        let len = match file.read(&mut buf) {
            Ok(len) => len,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        if len == 0 {
            break;
        }
        socket.write_all(&buf[..len])?;
        sent += len as u64;
        if len < SEND_CHUNK_LEN {
            break;
        }
    }
    Ok(sent)
}
