use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use crate::{
    logger::{LogFacade, Logger},
    reactor::{DEFAULT_EVENTS_CAPACITY, DEFAULT_POLL_TIMEOUT_MS},
    utils::get_default_capacity,
};

pub const DEFAULT_RECEIVE_BUFFER_SIZE: usize = 8192;

/// Configuration applied to every session a service creates.
///
/// Use `SessionConfig::builder()` for ergonomic construction. Each session gets
/// its own runtime copy of these values ([`SessionSettings`]) that can be changed
/// after the session exists.
///
/// ## Options
///
/// - receive_buffer_size: maximum number of bytes read from the socket per pass
/// - no_delay: when enabled (default), disables Nagle's algorithm on stream sessions
/// - use_read_operation: diverts decoded messages to `Session::read()` instead of
///   the handler's `message_received`
/// - close_on_port_unreachable: closes a datagram session when the peer reports
///   its port as unreachable (default); when disabled the report is suppressed
#[derive(Clone)]
pub struct SessionConfig {
    /// Maximum bytes read per pass
    pub receive_buffer_size: usize,
    /// Enable TCP_NODELAY
    pub no_delay: bool,
    /// Pull-mode delivery
    pub use_read_operation: bool,
    /// Datagram unreachable policy
    pub close_on_port_unreachable: bool,
    /// Logger for session events
    pub logger: Arc<dyn Logger>,
}

impl SessionConfig {
    /// Create a new builder for SessionConfig
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder::new()
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            receive_buffer_size: DEFAULT_RECEIVE_BUFFER_SIZE,
            no_delay: true,
            use_read_operation: false,
            close_on_port_unreachable: true,
            logger: Arc::new(LogFacade),
        }
    }
}

/// Builder for SessionConfig.
///
/// All fields are optional and will use defaults from SessionConfig::default()
/// if not explicitly set.
#[derive(Default)]
pub struct SessionConfigBuilder {
    receive_buffer_size: Option<usize>,
    no_delay: Option<bool>,
    use_read_operation: Option<bool>,
    close_on_port_unreachable: Option<bool>,
    logger: Option<Arc<dyn Logger>>,
}

impl SessionConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of bytes read per pass (at least one)
    pub fn receive_buffer_size(mut self, size: usize) -> Self {
        self.receive_buffer_size = Some(size.max(1));
        self
    }

    pub fn no_delay(mut self, enabled: bool) -> Self {
        self.no_delay = Some(enabled);
        self
    }

    pub fn use_read_operation(mut self, enabled: bool) -> Self {
        self.use_read_operation = Some(enabled);
        self
    }

    pub fn close_on_port_unreachable(mut self, enabled: bool) -> Self {
        self.close_on_port_unreachable = Some(enabled);
        self
    }

    pub fn logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn build(self) -> SessionConfig {
        let default = SessionConfig::default();
        SessionConfig {
            receive_buffer_size: self
                .receive_buffer_size
                .unwrap_or(default.receive_buffer_size),
            no_delay: self.no_delay.unwrap_or(default.no_delay),
            use_read_operation: self
                .use_read_operation
                .unwrap_or(default.use_read_operation),
            close_on_port_unreachable: self
                .close_on_port_unreachable
                .unwrap_or(default.close_on_port_unreachable),
            logger: self.logger.unwrap_or(default.logger),
        }
    }
}

/// Per-session, runtime-mutable view of a [`SessionConfig`].
///
/// Any thread may change a value; the owning reactor picks the new value up on
/// its next pass over the session.
#[derive(Debug)]
pub struct SessionSettings {
    receive_buffer_size: AtomicUsize,
    no_delay: AtomicBool,
    use_read_operation: AtomicBool,
    close_on_port_unreachable: AtomicBool,
}

impl SessionSettings {
    pub(crate) fn new(config: &SessionConfig) -> Self {
        Self {
            receive_buffer_size: AtomicUsize::new(config.receive_buffer_size.max(1)),
            no_delay: AtomicBool::new(config.no_delay),
            use_read_operation: AtomicBool::new(config.use_read_operation),
            close_on_port_unreachable: AtomicBool::new(config.close_on_port_unreachable),
        }
    }

    pub fn receive_buffer_size(&self) -> usize {
        self.receive_buffer_size.load(Ordering::Relaxed)
    }

    pub fn set_receive_buffer_size(&self, size: usize) {
        self.receive_buffer_size.store(size.max(1), Ordering::Relaxed);
    }

    pub fn no_delay(&self) -> bool {
        self.no_delay.load(Ordering::Relaxed)
    }

    pub fn set_no_delay(&self, enabled: bool) {
        self.no_delay.store(enabled, Ordering::Relaxed);
    }

    pub fn use_read_operation(&self) -> bool {
        self.use_read_operation.load(Ordering::Acquire)
    }

    pub fn set_use_read_operation(&self, enabled: bool) {
        self.use_read_operation.store(enabled, Ordering::Release);
    }

    pub fn close_on_port_unreachable(&self) -> bool {
        self.close_on_port_unreachable.load(Ordering::Acquire)
    }

    pub fn set_close_on_port_unreachable(&self, enabled: bool) {
        self.close_on_port_unreachable
            .store(enabled, Ordering::Release);
    }
}

/// How a pool picks the reactor a new session is pinned to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchStrategy {
    #[default]
    RoundRobin,
    /// The reactor currently owning the fewest sessions
    LeastSessions,
}

/// Configuration for a [`ReactorPool`](crate::reactor_pool::ReactorPool).
#[derive(Clone)]
pub struct ReactorPoolConfig {
    /// Number of reactor threads
    pub reactors: usize,
    /// Maximum readiness events handled per poll
    pub events_capacity: usize,
    /// Poll timeout
    pub poll_timeout: Duration,
    pub dispatch: DispatchStrategy,
    /// Logger for reactor events
    pub logger: Arc<dyn Logger>,
}

impl ReactorPoolConfig {
    pub fn builder() -> ReactorPoolConfigBuilder {
        ReactorPoolConfigBuilder::default()
    }
}

impl Default for ReactorPoolConfig {
    fn default() -> Self {
        Self {
            reactors: get_default_capacity(),
            events_capacity: DEFAULT_EVENTS_CAPACITY,
            poll_timeout: Duration::from_millis(DEFAULT_POLL_TIMEOUT_MS),
            dispatch: DispatchStrategy::RoundRobin,
            logger: Arc::new(LogFacade),
        }
    }
}

#[derive(Default)]
pub struct ReactorPoolConfigBuilder {
    reactors: Option<usize>,
    events_capacity: Option<usize>,
    poll_timeout: Option<Duration>,
    dispatch: Option<DispatchStrategy>,
    logger: Option<Arc<dyn Logger>>,
}

impl ReactorPoolConfigBuilder {
    pub fn reactors(mut self, count: usize) -> Self {
        self.reactors = Some(count);
        self
    }

    pub fn events_capacity(mut self, capacity: usize) -> Self {
        self.events_capacity = Some(capacity);
        self
    }

    pub fn poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = Some(timeout);
        self
    }

    pub fn dispatch(mut self, strategy: DispatchStrategy) -> Self {
        self.dispatch = Some(strategy);
        self
    }

    pub fn logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn build(self) -> ReactorPoolConfig {
        let default = ReactorPoolConfig::default();
        ReactorPoolConfig {
            reactors: self.reactors.unwrap_or(default.reactors),
            events_capacity: self.events_capacity.unwrap_or(default.events_capacity),
            poll_timeout: self.poll_timeout.unwrap_or(default.poll_timeout),
            dispatch: self.dispatch.unwrap_or(default.dispatch),
            logger: self.logger.unwrap_or(default.logger),
        }
    }
}
