use std::{
    io,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    thread::{Builder, JoinHandle},
};

use crate::{
    config::{DispatchStrategy, ReactorPoolConfig},
    error::{Error, Result},
    logger::{LogLevel, Logger},
    reactor::{Command, Reactor, ReactorHandle},
    utils::{is_reactor_thread, lock},
};

pub const DEFAULT_POOL_CAPACITY: usize = 4;

/// Picks the reactor each new session is pinned to.
#[derive(Clone)]
pub(crate) struct Dispatcher {
    handles: Arc<[ReactorHandle]>,
    strategy: DispatchStrategy,
    next: Arc<AtomicUsize>,
}

impl Dispatcher {
    fn new(handles: Vec<ReactorHandle>, strategy: DispatchStrategy) -> Self {
        Self {
            handles: handles.into(),
            strategy,
            next: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn next(&self) -> &ReactorHandle {
        match self.strategy {
            DispatchStrategy::RoundRobin => {
                let index = self.next.fetch_add(1, Ordering::Relaxed) % self.handles.len();
                &self.handles[index]
            }
            DispatchStrategy::LeastSessions => self
                .handles
                .iter()
                .min_by_key(|handle| handle.session_count())
                .unwrap_or(&self.handles[0]),
        }
    }

    pub(crate) fn handles(&self) -> &[ReactorHandle] {
        &self.handles
    }
}

struct PoolInner {
    dispatcher: Dispatcher,
    threads: Mutex<Vec<JoinHandle<Result<()>>>>,
    disposed: AtomicBool,
    logger: Arc<dyn Logger>,
}

impl PoolInner {
    fn signal_shutdown(&self) {
        for handle in self.dispatcher.handles() {
            let _ = handle.submit(Command::Shutdown);
        }
    }

    fn join_all(&self) -> Result<()> {
        let threads = std::mem::take(&mut *lock(&self.threads));
        let mut outcome = Ok(());
        for thread in threads {
            let result = match thread.join() {
                Ok(result) => result,
                Err(_) => Err(Error::ReactorFailed(Arc::new(io::Error::new(
                    io::ErrorKind::Other,
                    "reactor thread panicked",
                )))),
            };
            if let Err(e) = result {
                self.logger.log(LogLevel::Error, &format!("Reactor failed: {}", e));
                if outcome.is_ok() {
                    outcome = Err(e);
                }
            }
        }
        outcome
    }
}

impl Drop for PoolInner {
    fn drop(&mut self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.signal_shutdown();
        // joining our own reactor from inside it would never return
        if !is_reactor_thread() {
            let _ = self.join_all();
        }
    }
}

/// A fixed set of reactor threads sharing the sessions of one or more services.
///
/// Each reactor runs on its own thread named `mill-reactor-{id}`. New sessions
/// are pinned to a reactor by the configured [`DispatchStrategy`] and stay there
/// for their lifetime.
///
/// ```rust,no_run
/// use mill_nio::{config::ReactorPoolConfig, reactor_pool::ReactorPool};
///
/// # fn main() -> mill_nio::error::Result<()> {
/// let pool = ReactorPool::new(ReactorPoolConfig::builder().reactors(2).build())?;
/// assert_eq!(pool.len(), 2);
/// pool.dispose()?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ReactorPool {
    inner: Arc<PoolInner>,
}

impl ReactorPool {
    pub fn new(config: ReactorPoolConfig) -> Result<Self> {
        if config.reactors == 0 {
            return Err(Error::Configuration(
                "a reactor pool needs at least one reactor".into(),
            ));
        }

        let mut reactors = Vec::with_capacity(config.reactors);
        for id in 0..config.reactors {
            reactors.push(Reactor::new(id, &config)?);
        }
        let handles: Vec<ReactorHandle> = reactors.iter().map(Reactor::handle).collect();

        let inner = PoolInner {
            dispatcher: Dispatcher::new(handles, config.dispatch),
            threads: Mutex::new(Vec::with_capacity(config.reactors)),
            disposed: AtomicBool::new(false),
            logger: config.logger.clone(),
        };

        for (id, reactor) in reactors.into_iter().enumerate() {
            let spawned = Builder::new()
                .name(format!("mill-reactor-{id}"))
                .spawn(move || reactor.run());
            match spawned {
                Ok(thread) => lock(&inner.threads).push(thread),
                // dropping `inner` shuts down and joins what was already spawned
                Err(e) => return Err(Error::from(e)),
            }
        }

        config.logger.log(
            LogLevel::Info,
            &format!("Reactor pool started with {} reactors", config.reactors),
        );
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// A pool with the default configuration.
    pub fn with_defaults() -> Result<Self> {
        Self::new(ReactorPoolConfig::default())
    }

    pub fn len(&self) -> usize {
        self.inner.dispatcher.handles().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sessions handed to the pool's reactors and not yet released.
    pub fn session_count(&self) -> usize {
        self.inner
            .dispatcher
            .handles()
            .iter()
            .map(ReactorHandle::session_count)
            .sum()
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    pub(crate) fn dispatcher(&self) -> Dispatcher {
        self.inner.dispatcher.clone()
    }

    /// Stops every reactor and waits for its thread.
    ///
    /// All sessions are released and every pending future resolves, most of
    /// them with [`Error::Disposed`]. Returns the first fatal reactor error, if
    /// any reactor failed. Must not be called from a reactor thread.
    pub fn dispose(&self) -> Result<()> {
        if is_reactor_thread() {
            return Err(Error::BlockingInReactor);
        }
        self.inner.disposed.store(true, Ordering::Release);
        self.inner.signal_shutdown();
        self.inner.join_all()
    }
}

impl std::fmt::Debug for ReactorPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReactorPool")
            .field("reactors", &self.len())
            .field("sessions", &self.session_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
