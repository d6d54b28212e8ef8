//! Accept loop and per-connection workers.
//!
//! The parent accepts connections and forks one worker process for each. A
//! worker owns exactly one client socket, answers exactly one request on it and
//! exits; it never returns to the accept loop. SIGINT/SIGTERM stop the parent
//! from accepting, after which it waits for every outstanding worker.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::os::unix::io::{AsRawFd, FromRawFd};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use nix::errno::Errno;
use nix::sys::signal::{
    sigaction, signal, sigprocmask, SaFlags, SigAction, SigHandler, SigSet, SigmaskHow, Signal,
};
use nix::sys::socket;
use nix::sys::wait::{wait, waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{fork, getpid, ForkResult, Pid};

use crate::reply::{self, Reply};
use crate::request::{read_request, IncomingRequest};
use crate::resolve::resolve;
use crate::Method;

static RUNNING: AtomicBool = AtomicBool::new(true);

/// Client socket of this worker, or -1 in the parent.
static WORKER_SOCKET: AtomicI32 = AtomicI32::new(-1);

extern "C" fn stop_running(_signal: libc::c_int) {
    RUNNING.store(false, Ordering::Relaxed);
}

extern "C" fn stop_worker(_signal: libc::c_int) {
    let fd = WORKER_SOCKET.swap(-1, Ordering::Relaxed);
    // Only async-signal-safe calls from here on.
    unsafe {
        if fd >= 0 {
            libc::close(fd);
        }
        libc::_exit(1);
    }
}

fn is_running() -> bool {
    RUNNING.load(Ordering::Relaxed)
}

/// Everything one worker needs to answer its request.
#[derive(Debug)]
pub struct Connection<S> {
    socket: S,
    peer: Option<SocketAddr>,
    max_request_len: usize,
}

impl<S: Read + Write> Connection<S> {
    pub fn new(socket: S, peer: Option<SocketAddr>, max_request_len: usize) -> Self {
        Self {
            socket,
            peer,
            max_request_len,
        }
    }

    /// Read, parse and answer one request against `root`.
    ///
    /// Malformed, oversized and non GET/HEAD requests get no response at all;
    /// the method is checked before any status line is written.
    pub fn dispatch(&mut self, root: &Path) -> crate::Result<Reply> {
        match self.peer {
            Some(peer) => info!("[{}] accepted connection from {}", getpid(), peer.ip()),
            None => info!("[{}] accepted connection from unknown", getpid()),
        }

        let request = read_request(&mut self.socket, self.max_request_len)?;
        let request = IncomingRequest::parse(&request)?;
        info!(
            "[{}] {} {} {}",
            getpid(),
            request.method,
            request.path,
            request.version
        );
        for (key, value) in &request.headers {
            debug!("[{}] [{}]: {}", getpid(), key, value);
        }

        let method: Method = request.method.parse()?;
        let resolution = resolve(root, &request.path, request.if_modified_since)?;
        reply::send(&mut self.socket, method, resolution)
    }

    #[cfg(test)]
    fn into_socket(self) -> S {
        self.socket
    }
}

/// Worker exit status for a finished dispatch.
pub fn exit_code(outcome: &crate::Result<Reply>) -> i32 {
    match outcome {
        Ok(reply) => reply.exit_code(),
        Err(_) => 1,
    }
}

/// Install the parent's signal handlers.
///
/// SIGINT and SIGTERM are installed without `SA_RESTART` so a blocked
/// `accept` returns `EINTR` and the loop can notice the request to stop.
pub fn install_signal_handlers() -> Result<()> {
    unsafe { signal(Signal::SIGPIPE, SigHandler::SigIgn) }
        .context("failed to set SIGPIPE handler")?;
    let stop = SigAction::new(
        SigHandler::Handler(stop_running),
        SaFlags::empty(),
        SigSet::empty(),
    );
    unsafe { sigaction(Signal::SIGINT, &stop) }.context("failed to set SIGINT handler")?;
    unsafe { sigaction(Signal::SIGTERM, &stop) }.context("failed to set SIGTERM handler")?;
    Ok(())
}

fn install_worker_signal_handlers() -> Result<()> {
    let stop = SigAction::new(
        SigHandler::Handler(stop_worker),
        SaFlags::empty(),
        SigSet::empty(),
    );
    unsafe { sigaction(Signal::SIGINT, &stop) }.context("failed to set SIGINT handler")?;
    unsafe { sigaction(Signal::SIGTERM, &stop) }.context("failed to set SIGTERM handler")?;
    Ok(())
}

fn block_termination_signals(how: SigmaskHow) -> Result<()> {
    let mut set = SigSet::empty();
    set.add(Signal::SIGINT);
    set.add(Signal::SIGTERM);
    sigprocmask(how, Some(&set), None).context("failed to change signal mask")
}

/// The listening side of the server.
#[derive(Debug)]
pub struct Server {
    listener: TcpListener,
    root: PathBuf,
    max_request_len: usize,
    workers: usize,
}

impl Server {
    pub fn new(listener: TcpListener, root: PathBuf, max_request_len: usize) -> Self {
        Self {
            listener,
            root,
            max_request_len,
            workers: 0,
        }
    }

    /// Accept and fork until a termination signal arrives, then wait for all
    /// workers.
    ///
    /// Only ever returns in the parent. Workers exit from inside this call.
    pub fn run(mut self) -> Result<()> {
        while is_running() {
            // A signal that lands between the check above and `accept` is only
            // noticed once the next connection arrives.
            let fd = match socket::accept(self.listener.as_raw_fd()) {
                Ok(fd) => fd,
                Err(Errno::EINTR) => continue,
                Err(e) => {
                    // Failed to accept, but keep serving.
                    warn!("accept() failed: {}", e);
                    continue;
                }
            };
            let stream = unsafe { TcpStream::from_raw_fd(fd) };

            // Hold termination signals until the worker has its own handlers.
            block_termination_signals(SigmaskHow::SIG_BLOCK)?;
            let forked = unsafe { fork() }.context("failed to fork worker");
            if !matches!(forked, Ok(ForkResult::Child)) {
                block_termination_signals(SigmaskHow::SIG_UNBLOCK)?;
            }
            match forked? {
                ForkResult::Parent { child } => {
                    // The worker has its own copy of the client socket.
                    drop(stream);
                    self.workers += 1;
                    debug!("forked worker {} ({} running)", child, self.workers);
                    self.reap_finished();
                }
                ForkResult::Child => self.work(stream),
            }
        }

        info!("caught signal, no longer accepting");
        drop(self.listener);
        info!("waiting for {} worker(s)", self.workers);
        reap_all();
        info!("terminating cleanly");
        Ok(())
    }

    /// Worker side of the fork: serve `stream` and exit.
    fn work(self, stream: TcpStream) -> ! {
        // Don't hold onto the listening socket.
        drop(self.listener);
        WORKER_SOCKET.store(stream.as_raw_fd(), Ordering::Relaxed);
        let ready = install_worker_signal_handlers()
            .and_then(|()| block_termination_signals(SigmaskHow::SIG_UNBLOCK));
        if let Err(e) = ready {
            error!("[{}] {:#}", getpid(), e);
            std::process::exit(1);
        }

        let peer = stream.peer_addr().ok();
        let mut conn = Connection::new(stream, peer, self.max_request_len);
        let outcome = conn.dispatch(&self.root);
        if let Err(e) = &outcome {
            error!("[{}] {}", getpid(), e);
        }
        let code = exit_code(&outcome);

        WORKER_SOCKET.store(-1, Ordering::Relaxed);
        drop(conn);
        match &outcome {
            Ok(reply) => info!(
                "[{}] worker terminating after {}, status {}",
                getpid(),
                reply.status().code(),
                code
            ),
            Err(_) => info!("[{}] worker terminating, status {}", getpid(), code),
        }
        std::process::exit(code)
    }

    /// Collect workers that already exited, without blocking.
    fn reap_finished(&mut self) {
        loop {
            match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::StillAlive) | Err(_) => return,
                Ok(status) => {
                    self.workers = self.workers.saturating_sub(1);
                    log_worker_exit(status);
                }
            }
        }
    }
}

/// Block until every worker has exited.
fn reap_all() {
    loop {
        match wait() {
            Ok(status) => log_worker_exit(status),
            Err(Errno::EINTR) => continue,
            Err(Errno::ECHILD) => return,
            Err(e) => {
                warn!("wait() failed: {}", e);
                return;
            }
        }
    }
}

fn log_worker_exit(status: WaitStatus) {
    match status {
        WaitStatus::Exited(pid, code) => debug!("worker {} exited with status {}", pid, code),
        WaitStatus::Signaled(pid, signal, _) => debug!("worker {} killed by {:?}", pid, signal),
        other => debug!("worker status {:?}", other),
    }
}

/// Bind the listening socket.
pub fn create_listener(addr: SocketAddr) -> Result<TcpListener> {
    // Sets `SO_REUSEADDR` implicitly.
    let listener = TcpListener::bind(addr)
        .with_context(|| format!("failed to create listening socket for {}", addr))?;
    Ok(listener)
}
