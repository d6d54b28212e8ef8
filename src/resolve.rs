//! Mapping a request path to a file under the served root.

use std::fs::File;
use std::path::Path;

use chrono::{DateTime, Utc};
use log::{debug, info};
use nix::unistd::getpid;

use crate::date::AscDate;
use crate::error::Result;

/// Outcome of looking a request path up under the root.
#[derive(Debug)]
pub enum Resolution {
    /// A regular file that should be sent.
    Found(File),
    /// The file has not changed since the client's copy.
    NotModified,
    /// Nothing servable lives at this path.
    NotFound,
}

/// Open `path` below `root` and decide whether it should be sent.
///
/// Directories and other non-regular files count as missing. With a
/// conditional date the file is only sent if its modification time is not
/// strictly before that date; a file modified at exactly that second is sent
/// again.
pub fn resolve(root: &Path, path: &str, since: Option<DateTime<Utc>>) -> Result<Resolution> {
    let safe_path = match confine(path) {
        Some(safe_path) => safe_path,
        None => {
            info!("[{}] path escapes the root: {}", getpid(), path);
            return Ok(Resolution::NotFound);
        }
    };
    let target = root.join(safe_path.trim_start_matches('/'));

    let file = match File::open(&target) {
        Ok(file) => file,
        Err(e) => {
            info!("[{}] file not found: {} ({})", getpid(), path, e);
            return Ok(Resolution::NotFound);
        }
    };

    let metadata = file.metadata()?;
    if !metadata.is_file() {
        info!("[{}] file type not permitted: {}", getpid(), path);
        return Ok(Resolution::NotFound);
    }

    if let Some(since) = since {
        let modified = DateTime::<Utc>::from(metadata.modified()?);
        debug!("[{}] file modified at UTC: {}", getpid(), AscDate(modified));
        debug!("[{}] IMS time at UTC: {}", getpid(), AscDate(since));

        // Compare at whole-second resolution; that is all the header carries.
        if modified.timestamp() < since.timestamp() {
            info!("[{}] {}: not modified since {}", getpid(), path, AscDate(since));
            return Ok(Resolution::NotModified);
        }
    }

    Ok(Resolution::Found(file))
}

/// Collapse empty, `.` and `..` segments of an absolute request path.
///
/// Returns None for relative paths and for paths that climb above `/`.
fn confine(path: &str) -> Option<String> {
    if !path.starts_with('/') {
        return None;
    }
    let mut segments = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop()?;
            }
            segment => segments.push(segment),
        }
    }
    Some(format!("/{}", segments.join("/")))
}
