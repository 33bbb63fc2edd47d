//! Anonymous pipe plumbing for data transfers
//!
//! Inbound reads are synchronous but bounded by a deadline and a size cap.
//! Outbound writes are either blocking (another client reads) or pumped
//! non-blockingly while this process is itself reading the same transfer.

use crate::error::{PlatformError, Result};
use calloop::generic::Generic;
use calloop::{EventLoop, Interest, Mode, PostAction};
use log::{debug, warn};
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::time::{Duration, Instant};

/// Creates a close-on-exec pipe as `(read_end, write_end)`
pub fn pipe() -> Result<(OwnedFd, OwnedFd)> {
    let mut fds = [0 as libc::c_int; 2];
    // SAFETY: `fds` has room for the two descriptors pipe2 writes.
    let ret = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) };
    if ret < 0 {
        return Err(PlatformError::unavailable("pipe", io::Error::last_os_error()));
    }
    // SAFETY: both descriptors were just created and are owned by nobody else.
    Ok(unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) })
}

fn set_nonblocking(fd: &OwnedFd) -> io::Result<()> {
    let raw = fd.as_raw_fd();
    let flags = OFlag::from_bits_truncate(fcntl(raw, FcntlArg::F_GETFL)?);
    fcntl(raw, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK))?;
    Ok(())
}

fn poll_error(err: calloop::Error) -> io::Error {
    io::Error::new(io::ErrorKind::Other, err)
}

/// Waits for one pipe end to become readable
struct ReadyWait {
    poller: EventLoop<'static, bool>,
}

impl ReadyWait {
    fn readable(file: &File) -> io::Result<Self> {
        let poller = EventLoop::try_new().map_err(poll_error)?;
        let watched = Generic::new(file.try_clone()?, Interest::READ, Mode::Level);
        poller
            .handle()
            .insert_source(watched, |_, _, ready: &mut bool| {
                *ready = true;
                Ok(PostAction::Continue)
            })
            .map_err(|err| poll_error(err.error))?;
        Ok(Self { poller })
    }

    /// True when the descriptor became ready within `timeout`
    fn wait(&mut self, timeout: Duration) -> io::Result<bool> {
        let mut ready = false;
        match self.poller.dispatch(timeout, &mut ready) {
            Ok(()) => Ok(ready),
            Err(calloop::Error::IoError(err)) if err.kind() == io::ErrorKind::Interrupted => Ok(false),
            Err(err) => Err(poll_error(err)),
        }
    }
}

/// Writes all of `data` into `fd` and closes it; a vanished reader is not an error
pub fn write_all_blocking(fd: OwnedFd, data: &[u8]) {
    let mut file = File::from(fd);
    match file.write_all(data) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::BrokenPipe => {
            debug!("Transfer reader went away after {} bytes", data.len());
        }
        Err(err) => warn!("⚠️ Transfer write failed: {}", err),
    }
}

/// Outbound transfer drained without blocking
#[derive(Debug)]
pub struct PendingWrite {
    file: File,
    data: Vec<u8>,
    written: usize,
}

impl PendingWrite {
    pub fn new(fd: OwnedFd, data: Vec<u8>) -> io::Result<Self> {
        set_nonblocking(&fd)?;
        Ok(Self {
            file: File::from(fd),
            data,
            written: 0,
        })
    }

    /// Writes as much as the pipe accepts; returns true once finished
    pub fn pump(&mut self) -> bool {
        while self.written < self.data.len() {
            match self.file.write(&self.data[self.written..]) {
                Ok(0) => return true,
                Ok(n) => self.written += n,
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return false,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    debug!("Pending transfer write stopped: {}", err);
                    return true;
                }
            }
        }
        true
    }
}

/// How an inbound read ended
#[derive(Debug, PartialEq, Eq)]
pub enum ReadOutcome {
    Complete(Vec<u8>),
    /// Hit the size cap; the data is cut at the limit
    Truncated(Vec<u8>),
    TimedOut,
    Failed(String),
}

impl ReadOutcome {
    pub fn into_data(self) -> Option<Vec<u8>> {
        match self {
            ReadOutcome::Complete(data) | ReadOutcome::Truncated(data) => Some(data),
            ReadOutcome::TimedOut | ReadOutcome::Failed(_) => None,
        }
    }
}

const CHUNK: usize = 4096;
const PUMP_SLICE: Duration = Duration::from_millis(5);

/// Reads `fd` to end-of-file within `timeout`, keeping at most `limit` bytes
///
/// `pump` runs between reads and returns true while it still has work;
/// the wait is then sliced so its writes keep flowing.
pub fn read_bounded(fd: OwnedFd, timeout: Duration, limit: usize, mut pump: impl FnMut() -> bool) -> ReadOutcome {
    let mut file = File::from(fd);
    let mut readable = match ReadyWait::readable(&file) {
        Ok(wait) => wait,
        Err(err) => return ReadOutcome::Failed(err.to_string()),
    };
    let deadline = Instant::now() + timeout;
    let mut data = Vec::new();
    let mut chunk = [0u8; CHUNK];

    loop {
        let pumping = pump();

        let now = Instant::now();
        if now >= deadline {
            warn!("⚠️ Transfer read timed out after {:?}", timeout);
            return ReadOutcome::TimedOut;
        }
        let mut wait = deadline - now;
        if pumping {
            wait = wait.min(PUMP_SLICE);
        }
        match readable.wait(wait) {
            Ok(true) => {}
            Ok(false) => continue,
            Err(err) => return ReadOutcome::Failed(err.to_string()),
        }

        // Readiness was reported, so this read returns without blocking
        match file.read(&mut chunk) {
            Ok(0) => return ReadOutcome::Complete(data),
            Ok(n) => {
                let room = limit.saturating_sub(data.len());
                data.extend_from_slice(&chunk[..n.min(room)]);
                if n > room {
                    warn!("⚠️ Transfer exceeded {} bytes, truncated", limit);
                    return ReadOutcome::Truncated(data);
                }
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return ReadOutcome::Failed(err.to_string()),
        }
    }
}
