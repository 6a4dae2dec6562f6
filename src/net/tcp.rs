//! Stream services: [`TcpAcceptor`] and [`TcpConnector`].
//!
//! ```text
//! Acceptor:
//!   bind(addr) ──> Listen command ──> listener registered on one reactor
//!   readable   ──> accept loop ──> max-sessions check
//!                   ──> Session pinned by the dispatcher ──> Register command
//!                   ──> session_opened, inserted into the managed registry
//!
//! Connector:
//!   connect(addr) ──> non-blocking connect ──> Register command
//!   writable      ──> handshake checked ──> session_opened ──> ConnectFuture done
//! ```
//!
//! Every session of a service shares the service's filter chain builder,
//! session configuration and handler.

use std::{
    net::SocketAddr,
    sync::{Arc, Mutex},
};

use bytes::Bytes;
use mio::{
    net::{TcpListener, TcpStream},
    Token,
};

use super::{ServiceContext, ServicePool};
use crate::{
    config::SessionConfig,
    error::{Error, Result},
    filter::FilterChainBuilder,
    future::{CloseFuture, ConnectFuture, IoFuture, WriteFuture},
    handler::IoHandler,
    logger::LogLevel,
    reactor::{AcceptHandler, Command, ListenerRegistration, ReactorHandle, Socket},
    reactor_pool::ReactorPool,
    session::{self, Session, SessionId, TransportType},
    utils::lock,
};

/// Runs on the listener's reactor for every accepted connection.
struct AcceptLoop {
    context: ServiceContext,
    max_sessions: Option<usize>,
}

impl AcceptHandler for AcceptLoop {
    fn accepted(&self, stream: TcpStream, peer: SocketAddr) {
        let logger = &self.context.config.logger;
        if !self.context.registry.try_admit(self.max_sessions) {
            logger.log(LogLevel::Warn, &Error::MaxSessionsReached(peer).to_string());
            return;
        }

        let session = self
            .context
            .open_admitted(TransportType::Stream, Socket::Stream(stream), None);
        logger.log(
            LogLevel::Info,
            &format!("New session: {} (id: {})", peer, session.id()),
        );
    }
}

struct Binding {
    token: Token,
    reactor: ReactorHandle,
    local_addr: SocketAddr,
}

/// Accepts stream connections and turns each into a session.
///
/// ```rust,no_run
/// use mill_nio::prelude::*;
///
/// # fn main() -> Result<()> {
/// let acceptor = TcpAcceptor::new(IoHandlerAdapter)?
///     .filter_chain(FilterChain::builder().add_last(AckFramingFilter::default))
///     .max_sessions(1000);
/// let addr = acceptor.bind("0.0.0.0:8080".parse().unwrap())?;
/// println!("bound to {addr}");
/// # Ok(())
/// # }
/// ```
pub struct TcpAcceptor {
    pool: ServicePool,
    context: ServiceContext,
    max_sessions: Option<usize>,
    bindings: Mutex<Vec<Binding>>,
}

impl TcpAcceptor {
    /// An acceptor running on its own pool with the default configuration.
    pub fn new<H: IoHandler>(handler: H) -> Result<Self> {
        let pool = ReactorPool::with_defaults()?;
        let context = ServiceContext::new(&pool, Arc::new(handler));
        Ok(Self::build(ServicePool::owned(pool), context))
    }

    /// An acceptor sharing `pool` with other services.
    pub fn with_pool<H: IoHandler>(pool: &ReactorPool, handler: H) -> Self {
        let context = ServiceContext::new(pool, Arc::new(handler));
        Self::build(ServicePool::shared(pool), context)
    }

    fn build(pool: ServicePool, context: ServiceContext) -> Self {
        Self {
            pool,
            context,
            max_sessions: None,
            bindings: Mutex::new(Vec::new()),
        }
    }

    /// Filters every accepted session gets; applies to addresses bound afterwards.
    pub fn filter_chain(mut self, chain: FilterChainBuilder) -> Self {
        self.context.chain = chain;
        self
    }

    pub fn session_config(mut self, config: SessionConfig) -> Self {
        self.context.config = config;
        self
    }

    /// Rejects connections while this many sessions are open or being opened.
    pub fn max_sessions(mut self, max: usize) -> Self {
        self.max_sessions = Some(max);
        self
    }

    /// Starts listening on `addr`; returns the bound address.
    pub fn bind(&self, addr: SocketAddr) -> Result<SocketAddr> {
        let listener = TcpListener::bind(addr)?;
        let local_addr = listener.local_addr()?;
        let token = Token(session::next_id() as usize);
        let reactor = self.context.dispatcher.next().clone();

        let bound = IoFuture::new();
        reactor.dispatch(Command::Listen(Box::new(ListenerRegistration {
            token,
            listener,
            acceptor: Arc::new(AcceptLoop {
                context: self.context.clone(),
                max_sessions: self.max_sessions,
            }),
            bound: bound.clone(),
        })));
        bound.wait()?;

        lock(&self.bindings).push(Binding {
            token,
            reactor,
            local_addr,
        });
        self.context.config.logger.log(
            LogLevel::Info,
            &format!("Listening on {}", local_addr),
        );
        Ok(local_addr)
    }

    pub fn local_addresses(&self) -> Vec<SocketAddr> {
        lock(&self.bindings)
            .iter()
            .map(|binding| binding.local_addr)
            .collect()
    }

    /// Stops listening everywhere and closes the sessions accepted so far.
    pub fn unbind(&self) -> Result<()> {
        let bindings = std::mem::take(&mut *lock(&self.bindings));
        for binding in bindings {
            let future = CloseFuture::new();
            binding.reactor.dispatch(Command::Unbind {
                token: binding.token,
                future: future.clone(),
            });
            future.wait()?;
        }
        for session in self.context.registry.snapshot() {
            session.close_immediately();
        }
        Ok(())
    }

    pub fn session_count(&self) -> usize {
        self.context.registry.len()
    }

    pub fn managed_sessions(&self) -> Vec<Session> {
        self.context.registry.snapshot()
    }

    /// The open session with the given id, if this acceptor manages it.
    pub fn session(&self, id: SessionId) -> Option<Session> {
        self.context.registry.get(id)
    }

    /// Writes `message` to every open session.
    pub fn broadcast(&self, message: impl Into<Bytes>) -> Vec<WriteFuture> {
        let message = message.into();
        self.context
            .registry
            .snapshot()
            .iter()
            .map(|session| session.write(message.clone()))
            .collect()
    }

    pub fn pool(&self) -> &ReactorPool {
        self.pool.pool()
    }

    /// Unbinds, then disposes the pool if the acceptor created it.
    pub fn dispose(&self) -> Result<()> {
        let unbound = self.unbind();
        self.pool.dispose(&self.context.registry)?;
        unbound
    }
}

/// Opens stream sessions to remote addresses.
pub struct TcpConnector {
    pool: ServicePool,
    context: ServiceContext,
}

impl TcpConnector {
    pub fn new<H: IoHandler>(handler: H) -> Result<Self> {
        let pool = ReactorPool::with_defaults()?;
        let context = ServiceContext::new(&pool, Arc::new(handler));
        Ok(Self {
            pool: ServicePool::owned(pool),
            context,
        })
    }

    pub fn with_pool<H: IoHandler>(pool: &ReactorPool, handler: H) -> Self {
        Self {
            context: ServiceContext::new(pool, Arc::new(handler)),
            pool: ServicePool::shared(pool),
        }
    }

    pub fn filter_chain(mut self, chain: FilterChainBuilder) -> Self {
        self.context.chain = chain;
        self
    }

    pub fn session_config(mut self, config: SessionConfig) -> Self {
        self.context.config = config;
        self
    }

    /// Starts a non-blocking connect; the future completes with the opened
    /// session, or fails with [`Error::Connect`].
    pub fn connect(&self, addr: SocketAddr) -> ConnectFuture {
        match TcpStream::connect(addr) {
            Ok(stream) => self.context.open_connecting(
                TransportType::Stream,
                Socket::Stream(stream),
                addr,
                true,
            ),
            Err(e) => ConnectFuture::completed(Err(Error::connect(addr, e))),
        }
    }

    pub fn session_count(&self) -> usize {
        self.context.registry.len()
    }

    pub fn managed_sessions(&self) -> Vec<Session> {
        self.context.registry.snapshot()
    }

    pub fn pool(&self) -> &ReactorPool {
        self.pool.pool()
    }

    /// Closes every session this connector opened, or disposes its own pool.
    pub fn dispose(&self) -> Result<()> {
        self.pool.dispose(&self.context.registry)
    }
}
