//! Answers every length-prefixed frame with a single `0x00` byte.
//!
//! ```text
//! cargo run --example framing_server -- 127.0.0.1:9000
//! ```

use anyhow::Context;
use bytes::Bytes;
use mill_nio::prelude::*;
use std::{net::SocketAddr, thread, time::Duration};

struct Announce;

impl IoHandler for Announce {
    fn session_opened(&self, session: &Session) -> Result<()> {
        log::info!(
            "session {} opened from {:?} on reactor {}",
            session.id(),
            session.remote_address(),
            session.reactor_id()
        );
        Ok(())
    }

    fn message_sent(&self, session: &Session, message: &Bytes) {
        log::trace!("session {} acked ({} bytes)", session.id(), message.len());
    }

    fn exception_caught(&self, session: &Session, error: &Error) {
        log::warn!("session {}: {}", session.id(), error);
    }

    fn session_closed(&self, session: &Session) {
        log::info!(
            "session {} closed after {} bytes in, {} bytes out",
            session.id(),
            session.read_bytes(),
            session.written_bytes()
        );
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let addr: SocketAddr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:9000".to_string())
        .parse()
        .context("invalid listen address")?;

    let pool = ReactorPool::new(
        ReactorPoolConfig::builder()
            .dispatch(DispatchStrategy::LeastSessions)
            .build(),
    )?;

    let acceptor = TcpAcceptor::with_pool(&pool, Announce)
        .filter_chain(
            FilterChain::builder()
                .add_last(LoggingFilter::default)
                .add_last(AckFramingFilter::default),
        )
        .session_config(SessionConfig::builder().receive_buffer_size(16 * 1024).build())
        .max_sessions(1024);

    let bound = acceptor.bind(addr).context("bind failed")?;
    log::info!("listening on {} with {} reactors", bound, pool.len());

    loop {
        thread::sleep(Duration::from_secs(10));
        log::info!(
            "{} sessions open, {} across the pool",
            acceptor.session_count(),
            pool.session_count()
        );
    }
}
