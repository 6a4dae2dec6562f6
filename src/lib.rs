//! # mill-nio
//! A transport-agnostic, reactor-based network I/O core for Rust, built on [`mio`]
//! without an async runtime.
//!
//! mill-nio multiplexes many stream (TCP) and datagram (UDP) sessions over a
//! small pool of reactor threads. Each session carries a pluggable filter chain
//! that turns arbitrarily fragmented bytes into application messages and back,
//! and every operation on a session returns a future that can be waited on or
//! observed with listeners.
//! ## Features
//! - **Reactor pool**: one `mio::Poll` per thread, sessions pinned to a reactor
//!   for their whole life (round-robin or least-sessions dispatch)
//! - **Sessions**: OPENING → CONNECTED → CLOSING → CLOSED, typed attribute
//!   storage, statistics, runtime-mutable configuration
//! - **Filter chain**: head-to-tail inbound, tail-to-head outbound; ships with an
//!   acknowledging framing decoder, a length-field codec and a logging stage
//! - **Futures**: single-assignment connect/read/write/close completion with
//!   blocking waits, bounded waits and listeners
//! - **Delivery-failure policy**: choose whether a datagram "port unreachable"
//!   report closes the session or is ignored
//! ## Architecture Overview
//! ```text
//! ┌──────────────────┐   Register    ┌──────────────────────────────────────┐
//! │ TcpAcceptor      │──────────────▶│ ReactorPool                          │
//! │ TcpConnector     │               │  ┌────────────┐    ┌────────────┐    │
//! │ DatagramConnector│               │  │ reactor 0  │ .. │ reactor N  │    │
//! └──────────────────┘               │  └─────┬──────┘    └────────────┘    │
//!                                    └────────┼─────────────────────────────┘
//!                                             ▼
//!                    socket ─▶ FilterChain ─▶ IoHandler / Session::read()
//!                    socket ◀─ FilterChain ◀─ Session::write()
//! ```
//! ## Quick Start
//!
//! ```rust,no_run
//! use mill_nio::prelude::*;
//! use std::time::Duration;
//!
//! # fn main() -> Result<()> {
//! // a server answering every length-prefixed frame with a single 0x00 byte
//! let acceptor = TcpAcceptor::new(IoHandlerAdapter)?
//!     .filter_chain(FilterChain::builder().add_last(AckFramingFilter::default));
//! let addr = acceptor.bind("127.0.0.1:0".parse().unwrap())?;
//!
//! // a pull-mode client
//! let connector = TcpConnector::new(IoHandlerAdapter)?
//!     .session_config(SessionConfig::builder().use_read_operation(true).build());
//! let session = connector.connect(addr).wait()?;
//!
//! session.write(vec![0, 0, 0, 3, 1, 2, 3]).wait()?;
//! let ack = session.read();
//! if ack.wait_timeout(Duration::from_secs(1)) {
//!     assert_eq!(&ack.wait()?[..], &[0]);
//! }
//!
//! session.close().wait()?;
//! connector.dispose()?;
//! acceptor.dispose()?;
//! # Ok(())
//! # }
//! ```
//!
//! - [`session`]: the session handle and its state machine
//! - [`future`]: completion handles returned by session operations
//! - [`filter`]: the filter chain and the bundled filters
//! - [`net`]: acceptor and connectors
//! - [`reactor_pool`]: the reactor threads and dispatch
//! - [`config`]: session and pool configuration
//! - [`error`]: error types and result handling

pub mod attributes;
pub mod buffer;
pub mod config;
pub mod error;
mod event;
pub mod filter;
pub mod future;
pub mod handler;
pub mod logger;
pub mod net;
mod poll;
mod reactor;
pub mod reactor_pool;
pub mod session;
pub mod utils;

pub use reactor::{DEFAULT_EVENTS_CAPACITY, DEFAULT_POLL_TIMEOUT_MS};

/// A convenient prelude module that re-exports commonly used types and traits.
///
/// ```rust
/// use mill_nio::prelude::*;
/// ```
pub mod prelude {
    pub use crate::attributes::{AttributeKey, AttributeMap};
    pub use crate::config::{
        DispatchStrategy, ReactorPoolConfig, SessionConfig, SessionSettings,
    };
    pub use crate::error::{Error, Result};
    pub use crate::filter::{
        AckFramingFilter, Filter, FilterChain, FilterChainBuilder, FilterContext,
        LengthFieldCodec, LoggingFilter,
    };
    pub use crate::future::{CloseFuture, ConnectFuture, IoFuture, ReadFuture, WriteFuture};
    pub use crate::handler::{IoHandler, IoHandlerAdapter};
    pub use crate::logger::{LogFacade, LogLevel, Logger, NoOpLogger};
    pub use crate::net::{DatagramConnector, TcpAcceptor, TcpConnector};
    pub use crate::reactor_pool::ReactorPool;
    pub use crate::session::{Session, SessionId, SessionState, TransportType};
}
