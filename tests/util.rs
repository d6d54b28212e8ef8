use std::fs::{create_dir, read_to_string, write, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Output, Stdio};
use std::thread::sleep;
use std::time::{Duration, Instant, SystemTime};

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tempfile::{tempdir, TempDir};

pub const SERVER_BIN: &str = env!("CARGO_BIN_EXE_pocket-httpd");
pub const CLIENT_BIN: &str = env!("CARGO_BIN_EXE_pocket-get");

fn get_unused_port() -> Option<u16> {
    TcpListener::bind(("127.0.0.1", 0))
        .ok()
        .map(|listener| listener.local_addr().unwrap().port())
}

fn wait_for_port(port: u16) -> bool {
    for _ in 0..1000 {
        if TcpStream::connect(("127.0.0.1", port)).is_ok() {
            return true;
        }
        sleep(Duration::from_millis(1));
    }
    false
}

struct ScopedChild(Child);

impl Drop for ScopedChild {
    fn drop(&mut self) {
        self.0.kill().ok();
        self.0.wait().ok();
    }
}

/// A running server process serving a fresh temporary root.
pub struct Server {
    child: ScopedChild,
    port: u16,
    root: TempDir,
}
impl Server {
    pub fn new() -> Self {
        Self::with_args(&[])
    }
    pub fn with_args(args: &[&str]) -> Self {
        let root = tempdir().expect("failed to create tempdir");

        // Get an unused port. Assumes the port won't be reused before the server starts.
        let port = get_unused_port().expect("failed to get unused port");

        let child = Command::new(SERVER_BIN)
            .args(&[
                root.path().to_str().expect("path is not valid UTF-8"),
                "--port",
                &format!("{}", port),
                "--addr",
                "127.0.0.1",
            ])
            .args(args)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("failed to spawn server");

        // Create server early so it will be dropped if it fails to start.
        let server = Self {
            child: ScopedChild(child),
            port,
            root,
        };

        // Wait until the socket is open. The probe connection is answered by a
        // worker that sees an empty request and exits.
        assert!(wait_for_port(port), "failed to connect to server");

        server
    }
    pub fn port(&self) -> u16 {
        self.port
    }
    pub fn root(&self) -> &Path {
        self.root.path()
    }
    pub fn url(&self, path: &str) -> String {
        format!("http://127.0.0.1:{}/{}", self.port, path)
    }
    pub fn create_dir(&self, name: &str) {
        create_dir(self.root().join(name)).expect("failed to create directory");
    }
    /// Create a file whose modification time is `mtime` seconds after the epoch.
    pub fn create_file(&self, name: &str, contents: &[u8], mtime: u64) -> PathBuf {
        let path = self.root().join(name);
        write(&path, contents).expect("failed to create file");
        OpenOptions::new()
            .write(true)
            .open(&path)
            .expect("failed to open file")
            .set_modified(SystemTime::UNIX_EPOCH + Duration::from_secs(mtime))
            .expect("failed to set modification time");
        path
    }
    pub fn stream(&self) -> TcpStream {
        let stream =
            TcpStream::connect(("127.0.0.1", self.port)).expect("failed to connect to server");
        // Set timeouts to prevent tests from hanging
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        stream
            .set_write_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        stream
    }
    /// Send a raw request and return everything the server writes back.
    pub fn send(&self, request: &str) -> Vec<u8> {
        exchange(&mut self.stream(), request)
    }
    pub fn get(&self, path: &str, since: Option<&str>) -> Vec<u8> {
        let mut request = format!("GET {} HTTP/1.1\r\nHost: 127.0.0.1\r\n", path);
        if let Some(since) = since {
            request.push_str(&format!("If-Modified-Since: {} GMT\r\n", since));
        }
        request.push_str("Connection: close\r\n\r\n");
        self.send(&request)
    }
    pub fn signal(&self, signal: Signal) {
        kill(Pid::from_raw(self.child.0.id() as i32), signal).expect("failed to signal server");
    }
    /// Processes forked by the server that it has not reaped yet.
    pub fn workers(&self) -> Vec<Pid> {
        let pid = self.child.0.id();
        read_to_string(format!("/proc/{}/task/{}/children", pid, pid))
            .expect("failed to list server children")
            .split_whitespace()
            .map(|pid| Pid::from_raw(pid.parse().expect("invalid pid")))
            .collect()
    }
    /// Wait for a worker that is not in `known` to show up.
    pub fn wait_for_new_worker(&self, known: &[Pid]) -> Option<Pid> {
        for _ in 0..500 {
            if let Some(pid) = self.workers().into_iter().find(|pid| !known.contains(pid)) {
                return Some(pid);
            }
            sleep(Duration::from_millis(10));
        }
        None
    }
    /// Exit status of the server, if it exits within `timeout`.
    pub fn wait_for_exit(&mut self, timeout: Duration) -> Option<ExitStatus> {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if let Some(status) = self.child.0.try_wait().expect("failed to wait for server") {
                return Some(status);
            }
            sleep(Duration::from_millis(10));
        }
        None
    }
    /// Run the client binary with `args` from inside `dir`.
    pub fn client(&self, dir: &Path, args: &[&str]) -> Output {
        Command::new(CLIENT_BIN)
            .current_dir(dir)
            .args(args)
            .output()
            .expect("failed to run client")
    }
}

/// Write `request` on `stream` and read until the server closes it.
pub fn exchange(stream: &mut TcpStream, request: &str) -> Vec<u8> {
    stream
        .write_all(request.as_bytes())
        .expect("failed to write request");
    let mut buf = Vec::new();
    match stream.read_to_end(&mut buf) {
        Ok(_) => {}
        // A worker that drops a request unread may reset instead of closing.
        Err(e) if e.kind() == ErrorKind::ConnectionReset => {}
        Err(e) => panic!("failed to read response: {}", e),
    }
    buf
}
