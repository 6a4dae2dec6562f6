//! Services: the acceptor and connectors that create sessions.
//!
//! A service owns no threads. It creates sockets, builds a filter chain per
//! session from its [`FilterChainBuilder`] and hands both to a reactor of a
//! [`ReactorPool`], which owns the session from then on.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       User Application                       │
//! │  ┌──────────────────────┐         ┌─────────────────────┐    │
//! │  │ TcpAcceptor          │         │ Your IoHandler      │    │
//! │  │ TcpConnector         │         │ (or session.read()) │    │
//! │  │ DatagramConnector    │         └──────────▲──────────┘    │
//! │  └──────────┬───────────┘                    │ callbacks     │
//! └─────────────┼────────────────────────────────┼───────────────┘
//!               │ Register(session, socket,      │
//!               │          filter chain)         │
//!               ▼                                │
//! ┌──────────────────────────────────────────────┴───────────────┐
//! │  ReactorPool: mill-reactor-0 .. mill-reactor-N               │
//! │  poll ─▶ read ─▶ filter chain (head→tail) ─▶ handler         │
//! │  write ─▶ filter chain (tail→head) ─▶ write queue ─▶ flush   │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use bytes::Bytes;
//! use mill_nio::prelude::*;
//!
//! struct Echo;
//!
//! impl IoHandler for Echo {
//!     fn message_received(&self, session: &Session, message: Bytes) -> Result<()> {
//!         session.write(message);
//!         Ok(())
//!     }
//! }
//!
//! # fn main() -> Result<()> {
//! let acceptor = TcpAcceptor::new(Echo)?;
//! let addr = acceptor.bind("127.0.0.1:0".parse().unwrap())?;
//! println!("listening on {addr}");
//! # acceptor.dispose()
//! # }
//! ```

pub mod tcp;
pub mod udp;

pub use tcp::{TcpAcceptor, TcpConnector};
pub use udp::DatagramConnector;

use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use lockfree::map::Map as LockfreeMap;

use crate::{
    config::SessionConfig,
    error::Result,
    filter::{FilterChain, FilterChainBuilder},
    future::ConnectFuture,
    handler::IoHandler,
    reactor::{Command, PendingConnect, Registration, Socket},
    reactor_pool::{Dispatcher, ReactorPool},
    session::{Session, SessionId, TransportType},
};

/// The sessions a service currently manages, keyed by session id.
///
/// Reactors insert a session once it is opened and remove it on release, so
/// the map is written from several reactor threads and read from any thread.
///
/// Admission is counted separately: a session is admitted when it is handed
/// to a reactor and dismissed when that reactor releases it (or never got it),
/// so sessions still queued or handshaking count against `max_sessions`.
pub(crate) struct SessionRegistry {
    sessions: LockfreeMap<u64, Session>,
    admitted: AtomicUsize,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self {
            sessions: LockfreeMap::new(),
            admitted: AtomicUsize::new(0),
        }
    }
}

impl SessionRegistry {
    /// Reserves a slot for a new session unless `max` slots are taken.
    pub(crate) fn try_admit(&self, max: Option<usize>) -> bool {
        self.admitted
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |admitted| match max {
                Some(max) if admitted >= max => None,
                _ => Some(admitted + 1),
            })
            .is_ok()
    }

    pub(crate) fn dismiss(&self) {
        let _ = self
            .admitted
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |admitted| {
                admitted.checked_sub(1)
            });
    }

    #[cfg(test)]
    pub(crate) fn admitted(&self) -> usize {
        self.admitted.load(Ordering::Acquire)
    }

    pub(crate) fn insert(&self, session: &Session) {
        self.sessions.insert(session.id().as_u64(), session.clone());
    }

    pub(crate) fn remove(&self, id: SessionId) {
        self.sessions.remove(&id.as_u64());
    }

    pub(crate) fn len(&self) -> usize {
        self.sessions.iter().count()
    }

    pub(crate) fn get(&self, id: SessionId) -> Option<Session> {
        self.sessions.get(&id.as_u64()).map(|entry| entry.val().clone())
    }

    pub(crate) fn snapshot(&self) -> Vec<Session> {
        self.sessions.iter().map(|entry| entry.val().clone()).collect()
    }
}

/// What every session of one service is created from.
///
/// Cloned into the accept loop, so it must never hold the pool itself.
#[derive(Clone)]
pub(crate) struct ServiceContext {
    pub(crate) dispatcher: Dispatcher,
    pub(crate) handler: Arc<dyn IoHandler>,
    pub(crate) chain: FilterChainBuilder,
    pub(crate) config: SessionConfig,
    pub(crate) registry: Arc<SessionRegistry>,
}

impl ServiceContext {
    pub(crate) fn new(pool: &ReactorPool, handler: Arc<dyn IoHandler>) -> Self {
        Self {
            dispatcher: pool.dispatcher(),
            handler,
            chain: FilterChain::builder(),
            config: SessionConfig::default(),
            registry: Arc::new(SessionRegistry::default()),
        }
    }

    /// Creates a session pinned to the next reactor and hands it `socket`.
    pub(crate) fn open(
        &self,
        transport: TransportType,
        socket: Socket,
        connect: Option<PendingConnect>,
    ) -> Session {
        self.registry.try_admit(None);
        self.open_admitted(transport, socket, connect)
    }

    /// Like [`open`](Self::open), for a session whose slot was already
    /// reserved with [`SessionRegistry::try_admit`].
    pub(crate) fn open_admitted(
        &self,
        transport: TransportType,
        socket: Socket,
        connect: Option<PendingConnect>,
    ) -> Session {
        let reactor = self.dispatcher.next().clone();
        let session = Session::new(transport, &self.config, reactor.clone());
        reactor.dispatch(Command::Register(Box::new(Registration {
            session: session.clone(),
            socket,
            chain: self.chain.build(),
            handler: self.handler.clone(),
            connect,
            registry: Some(self.registry.clone()),
        })));
        session
    }

    /// Opens a session whose connect future completes once it is connected.
    pub(crate) fn open_connecting(
        &self,
        transport: TransportType,
        socket: Socket,
        addr: SocketAddr,
        in_progress: bool,
    ) -> ConnectFuture {
        let future = ConnectFuture::new();
        self.open(
            transport,
            socket,
            Some(PendingConnect {
                future: future.clone(),
                addr,
                in_progress,
            }),
        );
        future
    }
}

/// The reactor pool a service runs on, and whether the service created it.
#[derive(Debug)]
pub(crate) struct ServicePool {
    pool: ReactorPool,
    owned: bool,
}

impl ServicePool {
    pub(crate) fn owned(pool: ReactorPool) -> Self {
        Self { pool, owned: true }
    }

    pub(crate) fn shared(pool: &ReactorPool) -> Self {
        Self {
            pool: pool.clone(),
            owned: false,
        }
    }

    pub(crate) fn pool(&self) -> &ReactorPool {
        &self.pool
    }

    /// Disposes an owned pool; otherwise closes the service's own sessions.
    pub(crate) fn dispose(&self, registry: &SessionRegistry) -> Result<()> {
        if self.owned {
            return self.pool.dispose();
        }
        for session in registry.snapshot() {
            session.close_immediately();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_tracks_sessions() {
        let registry = SessionRegistry::default();
        let a = Session::detached(TransportType::Stream);
        let b = Session::detached(TransportType::Stream);

        registry.insert(&a);
        registry.insert(&b);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get(a.id()), Some(a.clone()));

        registry.remove(a.id());
        assert_eq!(registry.len(), 1);
        assert!(registry.get(a.id()).is_none());
        assert_eq!(registry.snapshot(), vec![b]);
    }

    #[test]
    fn test_admission_stops_at_max() {
        let registry = SessionRegistry::default();
        assert!(registry.try_admit(Some(2)));
        assert!(registry.try_admit(Some(2)));
        assert!(!registry.try_admit(Some(2)));
        assert_eq!(registry.admitted(), 2);

        // connectors are never limited
        assert!(registry.try_admit(None));
        assert_eq!(registry.admitted(), 3);

        registry.dismiss();
        registry.dismiss();
        assert!(registry.try_admit(Some(2)));

        registry.dismiss();
        registry.dismiss();
        registry.dismiss();
        assert_eq!(registry.admitted(), 0);
    }
}
