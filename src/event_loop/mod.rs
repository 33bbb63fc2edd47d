//! Display event loop
//!
//! One blocking wait merges three sources of work on the loop thread:
//! protocol socket readiness, the software timer wheel and jobs posted from
//! other threads. The wait itself is a calloop dispatch over the display
//! descriptor, the job channel and a wake-up ping; the timer wheel only
//! decides its timeout. Every iteration follows the same order: prepare
//! read, flush, wait, read and dispatch, run due timers, drain jobs.

pub mod timers;

pub use timers::{Clock, ManualClock, MonotonicClock, TimerId, TimerPriority, Timers};

use crate::error::{PlatformError, Result};
use calloop::channel::{self, Sender};
use calloop::generic::Generic;
use calloop::ping::{self, Ping};
use calloop::{EventLoop, Interest, Mode, PostAction};
use log::{debug, error, info, trace};
use std::collections::VecDeque;
use std::io;
use std::os::fd::OwnedFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Shortest blocking wait while a timer is pending
const MIN_WAIT: Duration = Duration::from_millis(1);

/// Outcome of a non-blocking flush of outbound requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushStatus {
    Flushed,
    WouldBlock,
}

/// A read registration obtained from [`DisplaySource::prepare_read`]
///
/// Dropping it without calling `read` cancels the registration.
pub trait PendingRead {
    fn read(self) -> Result<usize>;
}

/// The protocol connection as seen by the loop
pub trait DisplaySource<S> {
    type Read: PendingRead;

    /// `None` means events are already queued locally and must be dispatched first
    fn prepare_read(&mut self) -> Option<Self::Read>;

    fn dispatch_pending(&mut self, state: &mut S) -> Result<usize>;

    fn flush(&mut self) -> Result<FlushStatus>;

    /// A duplicate of the connection descriptor to register for readiness
    fn duplicate_fd(&self) -> Result<OwnedFd>;
}

/// Hook run once when the loop stops, before the connection is dropped
pub trait LoopState {
    fn shutdown(&mut self, cause: Option<&PlatformError>);
}

/// Cooperative cancellation shared between the loop and any thread
#[derive(Clone)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
    wake: Option<Ping>,
}

impl CancellationToken {
    /// A token that is not attached to any loop; cancelling it wakes nothing
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            wake: None,
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        if let Some(wake) = &self.wake {
            wake.ping();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .field("attached", &self.wake.is_some())
            .finish()
    }
}

type Job<S> = Box<dyn FnOnce(&mut S) + Send>;

/// Posts work to the loop thread; jobs run at the end of the next iteration
pub struct LoopSender<S> {
    jobs: Sender<Job<S>>,
}

impl<S> Clone for LoopSender<S> {
    fn clone(&self) -> Self {
        Self {
            jobs: self.jobs.clone(),
        }
    }
}

impl<S> LoopSender<S> {
    pub fn post(&self, job: impl FnOnce(&mut S) + Send + 'static) {
        if self.jobs.send(Box::new(job)).is_err() {
            debug!("Display event loop is gone, job dropped");
        }
    }
}

/// What the calloop sources reported during one wait
struct Wakeups<S> {
    display: bool,
    writable: bool,
    jobs: VecDeque<Job<S>>,
}

impl<S> Default for Wakeups<S> {
    fn default() -> Self {
        Self {
            display: false,
            writable: false,
            jobs: VecDeque::new(),
        }
    }
}

fn wait_timeout(time_to_next: Option<Duration>) -> Option<Duration> {
    time_to_next.map(|timeout| timeout.max(MIN_WAIT))
}

pub struct DisplayEventLoop<S: 'static, D> {
    source: D,
    timers: Timers<S>,
    poller: EventLoop<'static, Wakeups<S>>,
    wakeups: Wakeups<S>,
    jobs: Sender<Job<S>>,
    wake: Ping,
}

impl<S, D> DisplayEventLoop<S, D>
where
    S: LoopState + 'static,
    D: DisplaySource<S>,
{
    pub fn new(source: D, timers: Timers<S>) -> Result<Self> {
        let poller: EventLoop<'static, Wakeups<S>> =
            EventLoop::try_new().map_err(|err| PlatformError::unavailable("event loop", err))?;
        let handle = poller.handle();

        let display = Generic::new(source.duplicate_fd()?, Interest::READ, Mode::Level);
        handle
            .insert_source(display, |readiness, _, wakeups: &mut Wakeups<S>| {
                // Hang-ups count as readable so the read reports the failure
                wakeups.display |= readiness.readable || readiness.error;
                Ok(PostAction::Continue)
            })
            .map_err(|err| PlatformError::unavailable("display source", err.error))?;

        let (jobs, channel) = channel::channel::<Job<S>>();
        handle
            .insert_source(channel, |event, _, wakeups: &mut Wakeups<S>| {
                if let channel::Event::Msg(job) = event {
                    wakeups.jobs.push_back(job);
                }
            })
            .map_err(|err| PlatformError::unavailable("job channel", err.error))?;

        let (wake, ping_source) =
            ping::make_ping().map_err(|err| PlatformError::unavailable("wake ping", err))?;
        handle
            .insert_source(ping_source, |_, _, _: &mut Wakeups<S>| {})
            .map_err(|err| PlatformError::unavailable("wake ping", err.error))?;

        Ok(Self {
            source,
            timers,
            poller,
            wakeups: Wakeups::default(),
            jobs,
            wake,
        })
    }

    pub fn timers(&self) -> &Timers<S> {
        &self.timers
    }

    pub fn source(&self) -> &D {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut D {
        &mut self.source
    }

    pub fn sender(&self) -> LoopSender<S> {
        LoopSender {
            jobs: self.jobs.clone(),
        }
    }

    /// A token whose cancellation also interrupts a blocked wait
    pub fn cancellation_token(&self) -> CancellationToken {
        CancellationToken {
            cancelled: Arc::new(AtomicBool::new(false)),
            wake: Some(self.wake.clone()),
        }
    }

    /// Runs until `token` is cancelled or the connection fails
    ///
    /// The connection is dropped on return either way.
    pub fn run(mut self, state: &mut S, token: &CancellationToken) -> Result<()> {
        info!("🔄 Display event loop running");

        let result = loop {
            if token.is_cancelled() {
                break Ok(());
            }
            if let Err(err) = self.dispatch_once(state, token) {
                break Err(err);
            }
        };

        match &result {
            Ok(()) => info!("🛑 Display event loop cancelled"),
            Err(err) => error!("💥 Display event loop failed: {}", err),
        }
        state.shutdown(result.as_ref().err());
        if let Err(err) = self.source.flush() {
            debug!("Final flush failed: {}", err);
        }
        result
    }

    /// One loop iteration; blocks until the socket, a timer or a wake-up fires
    pub fn dispatch_once(&mut self, state: &mut S, token: &CancellationToken) -> Result<()> {
        let guard = loop {
            match self.source.prepare_read() {
                Some(guard) => break guard,
                None => {
                    self.source.dispatch_pending(state)?;
                }
            }
        };

        // Dropping `guard` on error cancels the read registration
        self.flush_blocking()?;

        let timeout = if self.wakeups.jobs.is_empty() {
            wait_timeout(self.timers.time_to_next())
        } else {
            Some(Duration::ZERO)
        };
        trace!("⏳ Waiting for events (timeout {:?})", timeout);
        self.wakeups.display = false;
        self.wait(timeout)?;

        if token.is_cancelled() {
            drop(guard);
            return Ok(());
        }

        if self.wakeups.display {
            guard.read()?;
        } else {
            drop(guard);
        }
        self.source.dispatch_pending(state)?;

        if token.is_cancelled() {
            return Ok(());
        }

        self.timers.run_due(state);
        self.drain_jobs(state)?;

        Ok(())
    }

    fn wait(&mut self, timeout: Option<Duration>) -> Result<()> {
        match self.poller.dispatch(timeout, &mut self.wakeups) {
            Ok(()) => Ok(()),
            Err(calloop::Error::IoError(err)) if err.kind() == io::ErrorKind::Interrupted => Ok(()),
            Err(err) => Err(PlatformError::Transport(err.to_string())),
        }
    }

    fn flush_blocking(&mut self) -> Result<()> {
        loop {
            match self.source.flush()? {
                FlushStatus::Flushed => return Ok(()),
                FlushStatus::WouldBlock => self.wait_writable()?,
            }
        }
    }

    /// Blocks until the socket accepts more outbound data
    fn wait_writable(&mut self) -> Result<()> {
        let writable = Generic::new(self.source.duplicate_fd()?, Interest::WRITE, Mode::OneShot);
        let registration = self
            .poller
            .handle()
            .insert_source(writable, |_, _, wakeups: &mut Wakeups<S>| {
                wakeups.writable = true;
                Ok(PostAction::Continue)
            })
            .map_err(|err| PlatformError::unavailable("writable source", err.error))?;

        self.wakeups.writable = false;
        let waited = loop {
            if self.wakeups.writable {
                break Ok(());
            }
            if let Err(err) = self.wait(None) {
                break Err(err);
            }
        };
        self.poller.handle().remove(registration);
        waited
    }

    /// Runs posted jobs until none are left, including jobs posted by jobs
    pub fn drain_jobs(&mut self, state: &mut S) -> Result<usize> {
        let mut ran = 0;
        loop {
            while let Some(job) = self.wakeups.jobs.pop_front() {
                job(state);
                ran += 1;
            }
            // Collects whatever the channel received meanwhile without blocking
            self.wait(Some(Duration::ZERO))?;
            if self.wakeups.jobs.is_empty() {
                return Ok(ran);
            }
        }
    }
}
