//! Sessions: one connection-oriented or connection-less peer exchange.
//!
//! A [`Session`] is a cheap, cloneable handle that any thread may hold. The
//! mutable per-session machinery (socket, filter chain, attributes, buffers and
//! the write queue) lives on the reactor the session is pinned to; the handle
//! only carries what must be visible across threads: state, settings,
//! statistics, the pull-mode read queue and the close future.
//!
//! ```text
//!  OPENING ──handshake──▶ CONNECTED ──close()/error──▶ CLOSING ──released──▶ CLOSED
//!     └──────────────────────── connect failure / disposal ─────────────────────┘
//! ```
//!
//! Operations that need the session's reactor (`write`, `close`) are sent to it as
//! commands, so they are processed in the order each producer issued them. A
//! write issued before a graceful `close()` is therefore flushed before the close
//! future completes.

use std::{
    collections::VecDeque,
    fmt,
    net::SocketAddr,
    sync::{
        atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering},
        Arc, Mutex, OnceLock,
    },
    time::Instant,
};

use bytes::Bytes;

use crate::{
    config::{SessionConfig, SessionSettings},
    error::Error,
    future::{CloseFuture, ReadFuture, WriteFuture},
    logger::Logger,
    reactor::{Command, ReactorHandle},
    utils::lock,
};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier; also used as the session's poll token, which is
/// why ids start at 1 (token 0 is the reactor's waker).
pub(crate) fn next_id() -> u64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    pub(crate) fn next() -> Self {
        SessionId(next_id())
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum SessionState {
    Opening = 0,
    Connected = 1,
    Closing = 2,
    Closed = 3,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionState::Opening,
            1 => SessionState::Connected,
            2 => SessionState::Closing,
            _ => SessionState::Closed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportType {
    Stream,
    Datagram,
}

#[derive(Default)]
struct ReadQueue {
    ready: VecDeque<Bytes>,
    waiting: VecDeque<ReadFuture>,
}

struct SessionInner {
    id: SessionId,
    transport: TransportType,
    state: AtomicU8,
    settings: SessionSettings,
    logger: Arc<dyn Logger>,
    reactor: ReactorHandle,
    local_addr: OnceLock<SocketAddr>,
    remote_addr: OnceLock<SocketAddr>,
    reads: Mutex<ReadQueue>,
    close_future: CloseFuture,
    read_bytes: AtomicU64,
    written_bytes: AtomicU64,
    scheduled_writes: AtomicUsize,
    created_at: Instant,
}

#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    pub(crate) fn new(
        transport: TransportType,
        config: &SessionConfig,
        reactor: ReactorHandle,
    ) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                id: SessionId::next(),
                transport,
                state: AtomicU8::new(SessionState::Opening as u8),
                settings: SessionSettings::new(config),
                logger: config.logger.clone(),
                reactor,
                local_addr: OnceLock::new(),
                remote_addr: OnceLock::new(),
                reads: Mutex::new(ReadQueue::default()),
                close_future: CloseFuture::new(),
                read_bytes: AtomicU64::new(0),
                written_bytes: AtomicU64::new(0),
                scheduled_writes: AtomicUsize::new(0),
                created_at: Instant::now(),
            }),
        }
    }

    pub fn id(&self) -> SessionId {
        self.inner.id
    }

    pub fn transport(&self) -> TransportType {
        self.inner.transport
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
    }

    /// `true` from the moment a close was requested or forced, including once
    /// the session is fully closed.
    pub fn is_closing(&self) -> bool {
        self.state() >= SessionState::Closing
    }

    pub fn is_closed(&self) -> bool {
        self.state() == SessionState::Closed
    }

    pub fn config(&self) -> &SessionSettings {
        &self.inner.settings
    }

    pub fn logger(&self) -> &Arc<dyn Logger> {
        &self.inner.logger
    }

    /// Index of the reactor this session is pinned to.
    pub fn reactor_id(&self) -> usize {
        self.inner.reactor.id()
    }

    pub fn local_address(&self) -> Option<SocketAddr> {
        self.inner.local_addr.get().copied()
    }

    pub fn remote_address(&self) -> Option<SocketAddr> {
        self.inner.remote_addr.get().copied()
    }

    pub fn read_bytes(&self) -> u64 {
        self.inner.read_bytes.load(Ordering::Relaxed)
    }

    pub fn written_bytes(&self) -> u64 {
        self.inner.written_bytes.load(Ordering::Relaxed)
    }

    /// Writes accepted by `write()` whose future has not completed yet.
    pub fn scheduled_write_requests(&self) -> usize {
        self.inner.scheduled_writes.load(Ordering::Relaxed)
    }

    pub fn created_at(&self) -> Instant {
        self.inner.created_at
    }

    /// Queues `message` for encoding by the filter chain and transmission.
    ///
    /// Fails immediately with [`Error::SessionClosed`] once the session is closing.
    pub fn write(&self, message: impl Into<Bytes>) -> WriteFuture {
        if self.is_closing() {
            return WriteFuture::completed(Err(Error::SessionClosed(self.id())));
        }

        let future = WriteFuture::new();
        self.inner.scheduled_writes.fetch_add(1, Ordering::Relaxed);
        let inner = Arc::downgrade(&self.inner);
        future.add_listener(move |_| {
            if let Some(inner) = inner.upgrade() {
                inner.scheduled_writes.fetch_sub(1, Ordering::Relaxed);
            }
        });

        self.inner.reactor.dispatch(Command::Write {
            id: self.id(),
            message: message.into(),
            future: future.clone(),
        });
        future
    }

    /// Takes the next decoded message of a pull-mode session.
    ///
    /// The returned future is already done when a message was queued; otherwise
    /// it completes with the next message, or fails when the session closes.
    pub fn read(&self) -> ReadFuture {
        if !self.config().use_read_operation() {
            return ReadFuture::completed(Err(Error::ReadOperationDisabled(self.id())));
        }

        let mut reads = lock(&self.inner.reads);
        if let Some(message) = reads.ready.pop_front() {
            return ReadFuture::completed(Ok(message));
        }
        if self.is_closed() {
            return ReadFuture::completed(Err(Error::SessionClosed(self.id())));
        }
        let future = ReadFuture::new();
        reads.waiting.push_back(future.clone());
        future
    }

    /// Closes after every write issued before this call has been flushed.
    pub fn close(&self) -> CloseFuture {
        self.request_close(false)
    }

    /// Closes without waiting for queued writes; their futures fail.
    pub fn close_immediately(&self) -> CloseFuture {
        self.request_close(true)
    }

    pub fn close_future(&self) -> CloseFuture {
        self.inner.close_future.clone()
    }

    fn request_close(&self, immediate: bool) -> CloseFuture {
        let first = self.begin_closing();
        if (first || immediate) && !self.is_closed() {
            self.inner.reactor.dispatch(Command::Close {
                id: self.id(),
                immediate,
            });
        }
        self.close_future()
    }

    pub(crate) fn set_state(&self, state: SessionState) {
        self.inner.state.store(state as u8, Ordering::Release);
    }

    /// OPENING to CONNECTED, unless a close got there first.
    pub(crate) fn mark_connected(&self) -> bool {
        self.inner
            .state
            .compare_exchange(
                SessionState::Opening as u8,
                SessionState::Connected as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Moves an open session to CLOSING; returns `false` if it already was.
    pub(crate) fn begin_closing(&self) -> bool {
        self.inner
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current < SessionState::Closing as u8).then_some(SessionState::Closing as u8)
            })
            .is_ok()
    }

    /// Final transition: fails pending reads with `reason`, completes the close future.
    pub(crate) fn mark_closed(&self, reason: &Error) {
        self.set_state(SessionState::Closed);
        let waiting = std::mem::take(&mut lock(&self.inner.reads).waiting);
        for waiter in waiting {
            waiter.complete(Err(reason.clone()));
        }
        self.inner.close_future.complete(Ok(()));
    }

    /// Routes a decoded message to the pull queue; hands it back in push mode.
    pub(crate) fn offer_read(&self, message: Bytes) -> Option<Bytes> {
        if !self.config().use_read_operation() {
            return Some(message);
        }
        let waiter = {
            let mut reads = lock(&self.inner.reads);
            match reads.waiting.pop_front() {
                Some(waiter) => waiter,
                None => {
                    reads.ready.push_back(message);
                    return None;
                }
            }
        };
        waiter.complete(Ok(message));
        None
    }

    pub(crate) fn set_addresses(&self, local: Option<SocketAddr>, remote: Option<SocketAddr>) {
        if let Some(local) = local {
            let _ = self.inner.local_addr.set(local);
        }
        if let Some(remote) = remote {
            let _ = self.inner.remote_addr.set(remote);
        }
    }

    pub(crate) fn record_read(&self, n: usize) {
        self.inner.read_bytes.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_written(&self, n: usize) {
        self.inner.written_bytes.fetch_add(n as u64, Ordering::Relaxed);
    }

    #[cfg(test)]
    pub(crate) fn detached(transport: TransportType) -> Self {
        Self::new(transport, &SessionConfig::default(), ReactorHandle::detached())
    }
}

impl PartialEq for Session {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for Session {}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id())
            .field("transport", &self.transport())
            .field("state", &self.state())
            .field("remote", &self.remote_address())
            .finish()
    }
}
