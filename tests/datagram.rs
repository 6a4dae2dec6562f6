mod common;

use std::{
    net::{SocketAddr, UdpSocket},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use bytes::Bytes;
use common::{pool, wait_until};
use mill_nio::prelude::*;

/// An address nobody listens on: the port was bound once, then released.
fn closed_port() -> SocketAddr {
    let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    socket.local_addr().unwrap()
}

#[derive(Default)]
struct Unreachable {
    refused: Arc<AtomicUsize>,
}

impl IoHandler for Unreachable {
    fn exception_caught(&self, _session: &Session, error: &Error) {
        if error.is_port_unreachable() {
            self.refused.fetch_add(1, Ordering::SeqCst);
        }
    }
}

fn assert_unreachable_policy(close_on_port_unreachable: bool) {
    let pool = pool(1);
    let handler = Unreachable::default();
    let refused = handler.refused.clone();
    let connector = DatagramConnector::with_pool(&pool, handler).session_config(
        SessionConfig::builder()
            .use_read_operation(true)
            .close_on_port_unreachable(close_on_port_unreachable)
            .build(),
    );

    let session = connector.connect(closed_port()).wait().unwrap();
    assert!(session.write(Bytes::from_static(&[1])).wait().is_ok());

    let read = session.read();
    let completed = read.wait_timeout(Duration::from_millis(2500));

    if close_on_port_unreachable {
        assert!(completed);
        assert!(matches!(read.failure(), Some(Error::SessionClosed(_))));
        assert!(wait_until(|| session.is_closed()));
        assert!(session.is_closing());
        assert_eq!(refused.load(Ordering::SeqCst), 1);
        assert_eq!(connector.session_count(), 0);
    } else {
        assert!(!completed);
        assert!(!session.is_closing());
        assert_eq!(refused.load(Ordering::SeqCst), 0);
        assert!(session.write(Bytes::from_static(&[2])).wait().is_ok());
        assert!(session.is_connected());
    }

    connector.dispose().unwrap();
    pool.dispose().unwrap();
}

#[test]
fn port_unreachable_closes_the_session() {
    assert_unreachable_policy(true);
}

#[test]
fn port_unreachable_is_suppressed_when_configured() {
    assert_unreachable_policy(false);
}

#[test]
fn port_unreachable_policy_can_change_at_runtime() {
    let pool = pool(1);
    let handler = Unreachable::default();
    let refused = handler.refused.clone();
    let connector = DatagramConnector::with_pool(&pool, handler).session_config(
        SessionConfig::builder()
            .use_read_operation(true)
            .close_on_port_unreachable(true)
            .build(),
    );

    let session = connector.connect(closed_port()).wait().unwrap();
    session.config().set_close_on_port_unreachable(false);
    assert!(session.write(Bytes::from_static(&[1])).wait().is_ok());

    let read = session.read();
    assert!(!read.wait_timeout(Duration::from_millis(2500)));
    assert!(!session.is_closing());
    assert_eq!(refused.load(Ordering::SeqCst), 0);

    // the next refusal is reported under the restored policy
    session.config().set_close_on_port_unreachable(true);
    let _ = session.write(Bytes::from_static(&[2])).wait();
    assert!(read.wait_timeout(Duration::from_secs(5)));
    assert!(matches!(read.failure(), Some(Error::SessionClosed(_))));
    assert!(wait_until(|| session.is_closed()));
    assert_eq!(refused.load(Ordering::SeqCst), 1);

    connector.dispose().unwrap();
    pool.dispose().unwrap();
}

#[test]
fn datagram_pull_mode_receives_replies() {
    let pool = pool(2);
    let peer = UdpSocket::bind("127.0.0.1:0").unwrap();
    peer.set_read_timeout(Some(Duration::from_secs(5))).unwrap();

    let connector = DatagramConnector::with_pool(&pool, IoHandlerAdapter)
        .session_config(SessionConfig::builder().use_read_operation(true).build());
    let session = connector
        .connect(peer.local_addr().unwrap())
        .wait()
        .unwrap();

    session.write(Bytes::from_static(b"ping")).wait().unwrap();
    let mut buf = [0u8; 16];
    let (n, from) = peer.recv_from(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"ping");

    // each datagram is delivered as one message
    peer.send_to(b"pong", from).unwrap();
    peer.send_to(b"again", from).unwrap();
    assert_eq!(&session.read().wait().unwrap()[..], b"pong");
    assert_eq!(&session.read().wait().unwrap()[..], b"again");
    assert_eq!(session.read_bytes(), 9);

    session.close().wait().unwrap();
    assert!(session.is_closed());
    pool.dispose().unwrap();
}
