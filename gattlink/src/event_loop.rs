//! Single-threaded readiness loop.
//!
//! # Model
//!
//! ```text
//!   register(fd, interest, callback, destructor)
//!            │
//!            ▼
//!   ┌──────────────┐  poll   ┌──────────────┐  one call per ready fd   ┌──────────┐
//!   │  Registry    │───────>│  Events      │─────────────────────────>│ callback │
//!   │ (fd → entry) │         │ (this pass)  │                          └────┬─────┘
//!   └──────────────┘         └──────────────┘                               │
//!            ▲                                                              │
//!            └──────────── LoopContext: stop / register / deregister ───────┘
//! ```
//!
//! Callbacks run to completion, one at a time, on the thread that called
//! [`EventLoop::run`]. A callback that blocks stalls every other descriptor.
//!
//! Dispatch is level-triggered. A descriptor is re-armed after its callback
//! returns, so a condition the callback left pending (unread data, an
//! unhandled hang-up) is reported again on the next pass. A callback may read
//! as little as one record per call.
//!
//! # Lifecycle
//!
//! `EventLoop::new` (initialized) → `run` (running) → `Stopped`. Dropping the
//! loop tears it down and runs the destructor of every descriptor still
//! registered.

mod readiness;

pub use readiness::{Interest, Readiness};

use std::collections::HashMap;
use std::io;
use std::os::fd::RawFd;

use mio::unix::SourceFd;
use mio::{Events, Poll, Registry, Token};

use crate::trace::{debug, trace, warn};

/// Maximum readiness events collected per pass.
const EVENTS_CAPACITY: usize = 16;

/// Readiness callback. Owns whatever per-descriptor state it needs.
pub type Callback = Box<dyn FnMut(&mut LoopContext<'_>, Readiness)>;

/// Cleanup hook run exactly once when a descriptor leaves the loop.
pub type Destructor = Box<dyn FnOnce()>;

/// Event loop errors.
#[derive(Debug, thiserror::Error)]
pub enum LoopError {
    /// The readiness-notification resource could not be allocated.
    #[error("failed to initialize event loop: {0}")]
    Init(#[source] io::Error),
    /// The descriptor already has a registration.
    #[error("descriptor {fd} is already registered")]
    AlreadyRegistered { fd: RawFd },
    /// The poller rejected the descriptor.
    #[error("failed to register descriptor {fd}: {source}")]
    Register {
        fd: RawFd,
        #[source]
        source: io::Error,
    },
    /// The descriptor has no registration.
    #[error("descriptor {fd} is not registered")]
    NotFound { fd: RawFd },
    /// Waiting for readiness failed.
    #[error("failed to wait for events: {0}")]
    Poll(#[source] io::Error),
    /// `run` was called on a loop that already stopped.
    #[error("event loop already stopped")]
    Stopped,
}

/// Lifecycle of an [`EventLoop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Initialized,
    Running,
    Stopped,
}

struct Registration {
    token: Token,
    interest: Interest,
    /// `None` while the callback is executing.
    callback: Option<Callback>,
    destructor: Option<Destructor>,
}

impl Registration {
    fn release(mut self) {
        if let Some(destructor) = self.destructor.take() {
            destructor();
        }
    }
}

/// Registration table shared between the loop and its callbacks.
struct Handlers {
    registry: Registry,
    entries: HashMap<RawFd, Registration>,
    tokens: HashMap<Token, RawFd>,
    next_token: usize,
    stop_requested: bool,
}

impl Handlers {
    fn register(
        &mut self,
        fd: RawFd,
        interest: Interest,
        callback: Callback,
        destructor: Option<Destructor>,
    ) -> Result<(), LoopError> {
        if self.entries.contains_key(&fd) {
            return Err(LoopError::AlreadyRegistered { fd });
        }
        if fd < 0 {
            return Err(LoopError::Register {
                fd,
                source: io::Error::from_raw_os_error(libc::EBADF),
            });
        }

        let token = Token(self.next_token);
        // Closing conditions are always reported; mio only needs READABLE.
        self.registry
            .register(&mut SourceFd(&fd), token, mio::Interest::READABLE)
            .map_err(|source| LoopError::Register { fd, source })?;
        self.next_token = self.next_token.wrapping_add(1);

        debug!(fd, ?interest, "descriptor registered");
        self.tokens.insert(token, fd);
        self.entries.insert(
            fd,
            Registration {
                token,
                interest,
                callback: Some(callback),
                destructor,
            },
        );
        Ok(())
    }

    fn deregister(&mut self, fd: RawFd) -> Result<(), LoopError> {
        let entry = self
            .entries
            .remove(&fd)
            .ok_or(LoopError::NotFound { fd })?;
        self.tokens.remove(&entry.token);

        if let Err(e) = self.registry.deregister(&mut SourceFd(&fd)) {
            // The descriptor may already be closed; the entry is gone either way.
            warn!(fd, error = %e, "poller deregistration failed");
        }
        debug!(fd, "descriptor deregistered");
        entry.release();
        Ok(())
    }

    /// Invokes the callback for `token`, if it is still registered and
    /// interested in `readiness`.
    fn dispatch(&mut self, token: Token, readiness: Readiness) {
        let Some(&fd) = self.tokens.get(&token) else {
            trace!(?token, "event for a descriptor removed earlier in this pass");
            return;
        };
        let Some(entry) = self.entries.get_mut(&fd) else {
            return;
        };
        if !entry.interest.matches(readiness) {
            trace!(fd, %readiness, "readiness outside interest mask");
            return;
        }
        let Some(mut callback) = entry.callback.take() else {
            return;
        };

        trace!(fd, %readiness, "dispatching");
        let mut ctx = LoopContext { handlers: self, fd };
        callback(&mut ctx, readiness);

        // Put the callback back unless the descriptor was deregistered (or
        // deregistered and registered afresh) while it ran.
        let Some(entry) = self.entries.get_mut(&fd) else {
            return;
        };
        if entry.token != token || entry.callback.is_some() {
            return;
        }
        entry.callback = Some(callback);

        // mio only reports edges. EPOLL_CTL_MOD re-evaluates the descriptor
        // and queues a fresh event if anything is still pending.
        if let Err(e) = self
            .registry
            .reregister(&mut SourceFd(&fd), token, mio::Interest::READABLE)
        {
            warn!(fd, error = %e, "failed to re-arm descriptor");
        }
    }

    fn teardown(&mut self) {
        for (fd, entry) in self.entries.drain() {
            let _ = self.registry.deregister(&mut SourceFd(&fd));
            entry.release();
        }
        self.tokens.clear();
    }
}

/// Handle given to callbacks for manipulating the running loop.
pub struct LoopContext<'a> {
    handlers: &'a mut Handlers,
    fd: RawFd,
}

impl LoopContext<'_> {
    /// Descriptor whose callback is running.
    #[must_use]
    pub fn fd(&self) -> RawFd {
        self.fd
    }

    /// Requests loop termination once the current pass completes.
    ///
    /// Remaining ready callbacks of this pass still run.
    pub fn stop(&mut self) {
        debug!(fd = self.fd, "stop requested");
        self.handlers.stop_requested = true;
    }

    /// Registers a descriptor from within a callback.
    ///
    /// # Errors
    ///
    /// See [`EventLoop::register`].
    pub fn register<F>(
        &mut self,
        fd: RawFd,
        interest: Interest,
        callback: F,
        destructor: Option<Destructor>,
    ) -> Result<(), LoopError>
    where
        F: FnMut(&mut LoopContext<'_>, Readiness) + 'static,
    {
        self.handlers
            .register(fd, interest, Box::new(callback), destructor)
    }

    /// Deregisters a descriptor, possibly the one whose callback is running.
    ///
    /// The destructor runs before this returns. A descriptor removed here
    /// receives no further callbacks, including later in the current pass.
    ///
    /// # Errors
    ///
    /// Returns [`LoopError::NotFound`] if `fd` is not registered.
    pub fn deregister(&mut self, fd: RawFd) -> Result<(), LoopError> {
        self.handlers.deregister(fd)
    }

    /// Deregisters the descriptor whose callback is running.
    ///
    /// # Errors
    ///
    /// Returns [`LoopError::NotFound`] if it was already deregistered.
    pub fn deregister_self(&mut self) -> Result<(), LoopError> {
        self.handlers.deregister(self.fd)
    }

    #[must_use]
    pub fn is_registered(&self, fd: RawFd) -> bool {
        self.handlers.entries.contains_key(&fd)
    }
}

/// Cooperative, single-threaded readiness multiplexer.
pub struct EventLoop {
    poll: Poll,
    events: Events,
    handlers: Handlers,
    state: LoopState,
}

impl EventLoop {
    /// Initializes the loop, allocating the poller.
    ///
    /// # Errors
    ///
    /// Returns [`LoopError::Init`] if the poller cannot be created.
    pub fn new() -> Result<Self, LoopError> {
        let poll = Poll::new().map_err(LoopError::Init)?;
        let registry = poll.registry().try_clone().map_err(LoopError::Init)?;
        debug!("event loop initialized");

        Ok(Self {
            poll,
            events: Events::with_capacity(EVENTS_CAPACITY),
            handlers: Handlers {
                registry,
                entries: HashMap::new(),
                tokens: HashMap::new(),
                next_token: 0,
                stop_requested: false,
            },
            state: LoopState::Initialized,
        })
    }

    #[must_use]
    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Number of registered descriptors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.entries.is_empty()
    }

    #[must_use]
    pub fn is_registered(&self, fd: RawFd) -> bool {
        self.handlers.entries.contains_key(&fd)
    }

    /// Registers `fd` for the conditions in `interest`.
    ///
    /// The loop does not own `fd`; it must stay open until deregistered.
    /// `destructor` runs exactly once when the descriptor is removed, by
    /// [`deregister`](Self::deregister) or at loop teardown.
    ///
    /// # Errors
    ///
    /// Returns [`LoopError::AlreadyRegistered`] if `fd` is present (the
    /// existing registration is untouched), or [`LoopError::Register`] if the
    /// poller rejects it.
    pub fn register<F>(
        &mut self,
        fd: RawFd,
        interest: Interest,
        callback: F,
        destructor: Option<Destructor>,
    ) -> Result<(), LoopError>
    where
        F: FnMut(&mut LoopContext<'_>, Readiness) + 'static,
    {
        self.handlers
            .register(fd, interest, Box::new(callback), destructor)
    }

    /// Removes `fd`, running its destructor before returning.
    ///
    /// # Errors
    ///
    /// Returns [`LoopError::NotFound`] if `fd` is not registered.
    pub fn deregister(&mut self, fd: RawFd) -> Result<(), LoopError> {
        self.handlers.deregister(fd)
    }

    /// Runs until a callback calls [`LoopContext::stop`] or no descriptors
    /// remain.
    ///
    /// # Errors
    ///
    /// Returns [`LoopError::Poll`] if waiting fails for a reason other than
    /// a signal interruption, or [`LoopError::Stopped`] if the loop already
    /// ran to completion.
    pub fn run(&mut self) -> Result<(), LoopError> {
        if self.state == LoopState::Stopped {
            return Err(LoopError::Stopped);
        }
        self.state = LoopState::Running;
        self.handlers.stop_requested = false;
        debug!(descriptors = self.handlers.entries.len(), "event loop running");

        let result = self.run_passes();

        self.state = LoopState::Stopped;
        debug!("event loop stopped");
        result
    }

    fn run_passes(&mut self) -> Result<(), LoopError> {
        loop {
            if self.handlers.entries.is_empty() {
                debug!("no descriptors registered");
                return Ok(());
            }

            match self.poll.poll(&mut self.events, None) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(LoopError::Poll(e)),
            }

            for event in &self.events {
                self.handlers.dispatch(event.token(), Readiness::from(event));
            }

            if self.handlers.stop_requested {
                return Ok(());
            }
        }
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        if !self.handlers.entries.is_empty() {
            debug!(
                descriptors = self.handlers.entries.len(),
                "tearing down event loop"
            );
        }
        self.handlers.teardown();
    }
}
