use std::{
    net::{Ipv4Addr, Ipv6Addr, SocketAddr},
    sync::Arc,
};

use mio::net::UdpSocket;

use super::{ServiceContext, ServicePool};
use crate::{
    config::SessionConfig,
    error::{Error, Result},
    filter::FilterChainBuilder,
    future::ConnectFuture,
    handler::IoHandler,
    reactor::Socket,
    reactor_pool::ReactorPool,
    session::{Session, TransportType},
};

/// Opens connected datagram sessions.
///
/// Each session owns an ephemeral local socket connected to its peer, so the
/// kernel reports the peer's "port unreachable" to that session only. What
/// happens then is decided by
/// [`SessionConfig::close_on_port_unreachable`].
pub struct DatagramConnector {
    pool: ServicePool,
    context: ServiceContext,
}

impl DatagramConnector {
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

    /// Binds an ephemeral socket and connects it to `addr`. No packet is
    /// exchanged, so the future completes as soon as the session is registered.
    pub fn connect(&self, addr: SocketAddr) -> ConnectFuture {
        let local = match addr {
            SocketAddr::V4(_) => SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
            SocketAddr::V6(_) => SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0)),
        };

        let socket = match UdpSocket::bind(local).and_then(|socket| {
            socket.connect(addr)?;
            Ok(socket)
        }) {
            Ok(socket) => socket,
            Err(e) => return ConnectFuture::completed(Err(Error::connect(addr, e))),
        };

        self.context.open_connecting(
            TransportType::Datagram,
            Socket::Datagram(socket),
            addr,
            false,
        )
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

    pub fn dispose(&self) -> Result<()> {
        self.pool.dispose(&self.context.registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::ReactorPoolConfig, handler::IoHandlerAdapter};
    use bytes::Bytes;
    use std::time::Duration;

    #[test]
    fn test_connect_and_send() {
        let pool = ReactorPool::new(
            ReactorPoolConfig::builder()
                .reactors(1)
                .poll_timeout(Duration::from_millis(20))
                .build(),
        )
        .unwrap();
        let peer = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        peer.set_read_timeout(Some(Duration::from_secs(5))).unwrap();

        let connector = DatagramConnector::with_pool(&pool, IoHandlerAdapter);
        let session = connector
            .connect(peer.local_addr().unwrap())
            .wait()
            .unwrap();
        assert_eq!(session.transport(), TransportType::Datagram);
        assert_eq!(session.remote_address(), peer.local_addr().ok());

        assert!(session.write(Bytes::from_static(b"\x01")).wait().is_ok());
        let mut buf = [0u8; 4];
        let (n, from) = peer.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"\x01");
        assert_eq!(Some(from.port()), session.local_address().map(|a| a.port()));

        connector.dispose().unwrap();
        assert!(session.close_future().wait_timeout(Duration::from_secs(5)));
        pool.dispose().unwrap();
    }
}
