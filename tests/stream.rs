mod common;

use std::{
    collections::{HashMap, HashSet},
    io::{Read, Write},
    net::{TcpListener, TcpStream},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    thread::{self, ThreadId},
    time::Duration,
};

use bytes::Bytes;
use common::{frame, pool, wait_until, Echo};
use mill_nio::prelude::*;

fn ack_acceptor(pool: &ReactorPool) -> (TcpAcceptor, std::net::SocketAddr) {
    let acceptor = TcpAcceptor::with_pool(pool, IoHandlerAdapter)
        .filter_chain(FilterChain::builder().add_last(AckFramingFilter::default));
    let addr = acceptor.bind("127.0.0.1:0".parse().unwrap()).unwrap();
    (acceptor, addr)
}

fn client(addr: std::net::SocketAddr) -> TcpStream {
    let stream = TcpStream::connect(addr).unwrap();
    stream.set_nodelay(true).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    stream
}

#[test]
fn acks_every_frame_whatever_the_fragmentation() {
    let pool = pool(2);
    let (acceptor, addr) = ack_acceptor(&pool);
    let mut stream = client(addr);

    let mut bytes = Vec::new();
    for len in [0, 1, 7, 300, 0, 4096] {
        bytes.extend(frame(len));
    }

    // one byte at a time through the length prefix, then uneven slices
    for byte in &bytes[..6] {
        stream.write_all(&[*byte]).unwrap();
        thread::sleep(Duration::from_millis(2));
    }
    for chunk in bytes[6..].chunks(97) {
        stream.write_all(chunk).unwrap();
    }

    let mut acks = [0xFFu8; 6];
    stream.read_exact(&mut acks).unwrap();
    assert_eq!(acks, [0u8; 6]);

    acceptor.dispose().unwrap();
    pool.dispose().unwrap();
}

#[test]
fn oversized_frame_length_closes_the_session() {
    #[derive(Default)]
    struct Watch {
        exceptions: Arc<AtomicUsize>,
        closed: Arc<AtomicUsize>,
    }

    impl IoHandler for Watch {
        fn exception_caught(&self, _session: &Session, error: &Error) {
            if matches!(error, Error::Protocol(_)) {
                self.exceptions.fetch_add(1, Ordering::SeqCst);
            }
        }

        fn session_closed(&self, _session: &Session) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    let pool = pool(1);
    let handler = Watch::default();
    let exceptions = handler.exceptions.clone();
    let closed = handler.closed.clone();
    let acceptor = TcpAcceptor::with_pool(&pool, handler)
        .filter_chain(FilterChain::builder().add_last(AckFramingFilter::default));
    let addr = acceptor.bind("127.0.0.1:0".parse().unwrap()).unwrap();

    let mut stream = client(addr);
    stream.write_all(&[0xFF, 0xFF, 0xFF, 0xFF]).unwrap();

    let mut buf = [0u8; 1];
    assert_eq!(stream.read(&mut buf).unwrap_or(0), 0);
    assert!(wait_until(|| closed.load(Ordering::SeqCst) == 1));
    assert_eq!(exceptions.load(Ordering::SeqCst), 1);
    assert_eq!(acceptor.session_count(), 0);

    pool.dispose().unwrap();
}

#[test]
fn sessions_stay_on_their_reactor_thread() {
    struct ThreadRecorder(Arc<Mutex<HashMap<SessionId, HashSet<ThreadId>>>>);

    impl Filter for ThreadRecorder {
        fn name(&self) -> &str {
            "thread-recorder"
        }

        fn on_inbound(&mut self, ctx: &mut FilterContext<'_>, message: Bytes) {
            self.0
                .lock()
                .unwrap()
                .entry(ctx.session().id())
                .or_default()
                .insert(thread::current().id());
            ctx.pass(message);
        }
    }

    let seen: Arc<Mutex<HashMap<SessionId, HashSet<ThreadId>>>> = Arc::default();
    let recorder = seen.clone();

    let pool = pool(4);
    let acceptor = TcpAcceptor::with_pool(&pool, Echo).filter_chain(
        FilterChain::builder().add_last(move || ThreadRecorder(recorder.clone())),
    );
    let addr = acceptor.bind("127.0.0.1:0".parse().unwrap()).unwrap();

    let clients: Vec<_> = (0..8)
        .map(|n| {
            thread::spawn(move || {
                let mut stream = client(addr);
                for round in 0..25u8 {
                    let message = [n as u8, round];
                    stream.write_all(&message).unwrap();
                    let mut echoed = [0u8; 2];
                    stream.read_exact(&mut echoed).unwrap();
                    assert_eq!(echoed, message);
                }
                stream
            })
        })
        .collect();
    let _streams: Vec<TcpStream> = clients
        .into_iter()
        .map(|client| client.join().unwrap())
        .collect();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 8);
    assert!(seen.values().all(|threads| threads.len() == 1));

    let reactors: HashSet<_> = acceptor
        .managed_sessions()
        .iter()
        .map(Session::reactor_id)
        .collect();
    assert!(reactors.len() > 1);
    assert!(seen.keys().all(|id| acceptor.session(*id).is_some()));

    acceptor.dispose().unwrap();
    pool.dispose().unwrap();
}

#[test]
fn graceful_close_flushes_earlier_writes() {
    let pool = pool(1);
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let connector = TcpConnector::with_pool(&pool, IoHandlerAdapter);

    let session = connector
        .connect(listener.local_addr().unwrap())
        .wait()
        .unwrap();
    let (mut peer, _) = listener.accept().unwrap();
    peer.set_read_timeout(Some(Duration::from_secs(5))).unwrap();

    let payload = vec![7u8; 256 * 1024];
    let big = session.write(payload.clone());
    let small = session.write(Bytes::from_static(b"tail"));
    let closed = session.close();

    assert!(session.is_closing());
    assert!(matches!(
        session.write(Bytes::from_static(b"late")).wait(),
        Err(Error::SessionClosed(_))
    ));

    let mut received = Vec::new();
    peer.read_to_end(&mut received).unwrap();
    assert_eq!(received.len(), payload.len() + 4);
    assert!(received.ends_with(b"tail"));

    assert!(big.wait().is_ok());
    assert!(small.wait().is_ok());
    assert!(closed.wait().is_ok());
    assert!(session.is_closed());
    assert_eq!(session.written_bytes(), (payload.len() + 4) as u64);

    pool.dispose().unwrap();
}

#[test]
fn pull_mode_reads_length_prefixed_messages() {
    let pool = pool(2);
    let codec = || LengthFieldCodec::new(1024);

    let acceptor = TcpAcceptor::with_pool(&pool, Echo)
        .filter_chain(FilterChain::builder().add_last(codec));
    let addr = acceptor.bind("127.0.0.1:0".parse().unwrap()).unwrap();

    let connector = TcpConnector::with_pool(&pool, IoHandlerAdapter)
        .filter_chain(FilterChain::builder().add_last(codec))
        .session_config(SessionConfig::builder().use_read_operation(true).build());
    let session = connector.connect(addr).wait().unwrap();

    // a read issued before the message arrives completes once it does
    let first = session.read();
    assert!(!first.is_done());

    session.write(Bytes::from_static(b"hello"));
    session.write(Bytes::from_static(b"world"));

    assert_eq!(&first.wait().unwrap()[..], b"hello");
    assert_eq!(&session.read().wait().unwrap()[..], b"world");

    let pending = session.read();
    session.close().wait().unwrap();
    assert!(matches!(pending.wait(), Err(Error::SessionClosed(_))));

    acceptor.dispose().unwrap();
    pool.dispose().unwrap();
}

#[test]
fn disposal_fails_every_pending_future() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let connector = TcpConnector::new(IoHandlerAdapter)
        .unwrap()
        .session_config(SessionConfig::builder().use_read_operation(true).build());

    let sessions: Vec<_> = (0..6)
        .map(|_| connector.connect(addr).wait().unwrap())
        .collect();
    let peers: Vec<_> = (0..6).map(|_| listener.accept().unwrap()).collect();
    let reads: Vec<_> = sessions.iter().map(Session::read).collect();

    connector.dispose().unwrap();

    for read in &reads {
        assert!(read.wait_timeout(Duration::from_secs(5)));
        assert!(matches!(read.failure(), Some(Error::Disposed)));
    }
    for session in &sessions {
        assert!(session.is_closed());
        assert!(session.close_future().is_done());
    }
    assert!(connector.pool().is_disposed());
    assert!(matches!(
        connector.connect(addr).wait(),
        Err(Error::Disposed)
    ));
    drop(peers);
}

#[test]
fn max_sessions_counts_sessions_still_opening() {
    struct SlowOpen(Arc<AtomicUsize>);

    impl IoHandler for SlowOpen {
        fn session_opened(&self, _session: &Session) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(300));
            Ok(())
        }
    }

    let opened = Arc::new(AtomicUsize::new(0));
    let pool = pool(1);
    let acceptor = TcpAcceptor::with_pool(&pool, SlowOpen(opened.clone())).max_sessions(2);
    let addr = acceptor.bind("127.0.0.1:0".parse().unwrap()).unwrap();

    // the rest connect while the reactor is stuck in the first session_opened
    let mut clients = vec![client(addr)];
    thread::sleep(Duration::from_millis(50));
    clients.extend((0..4).map(|_| client(addr)));

    assert!(wait_until(|| opened.load(Ordering::SeqCst) == 2));
    thread::sleep(Duration::from_millis(400));
    assert_eq!(opened.load(Ordering::SeqCst), 2);
    assert!(wait_until(|| acceptor.session_count() == 2));

    let mut rejected = 0;
    for stream in &mut clients {
        stream
            .set_read_timeout(Some(Duration::from_millis(500)))
            .unwrap();
        let mut buf = [0u8; 1];
        match stream.read(&mut buf) {
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) => {}
            _ => rejected += 1,
        }
    }
    assert_eq!(rejected, 3);

    acceptor.dispose().unwrap();
    pool.dispose().unwrap();
}

#[test]
fn close_immediately_abandons_queued_writes() {
    let pool = pool(1);
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let connector = TcpConnector::with_pool(&pool, IoHandlerAdapter);

    let session = connector
        .connect(listener.local_addr().unwrap())
        .wait()
        .unwrap();
    // the peer never reads, so the write cannot leave the queue
    let (_peer, _) = listener.accept().unwrap();

    let stuck = session.write(vec![0u8; 64 * 1024 * 1024]);
    let closed = session.close_immediately();

    assert!(closed.wait_timeout(Duration::from_secs(5)));
    assert!(closed.is_success());
    assert!(stuck.wait_timeout(Duration::from_secs(5)));
    assert!(matches!(stuck.failure(), Some(Error::SessionClosed(_))));
    assert!(session.is_closed());
    assert!(session.written_bytes() < 64 * 1024 * 1024);

    pool.dispose().unwrap();
}

#[test]
fn pull_mode_bypasses_message_received() {
    struct Received(Arc<AtomicUsize>);

    impl IoHandler for Received {
        fn message_received(&self, _session: &Session, _message: Bytes) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    let pool = pool(2);
    let codec = || LengthFieldCodec::new(1024);
    let acceptor = TcpAcceptor::with_pool(&pool, Echo)
        .filter_chain(FilterChain::builder().add_last(codec));
    let addr = acceptor.bind("127.0.0.1:0".parse().unwrap()).unwrap();

    let received = Arc::new(AtomicUsize::new(0));
    let connector = TcpConnector::with_pool(&pool, Received(received.clone()))
        .filter_chain(FilterChain::builder().add_last(codec))
        .session_config(SessionConfig::builder().use_read_operation(true).build());
    let session = connector.connect(addr).wait().unwrap();

    for message in [&b"one"[..], b"two", b"three"] {
        session.write(Bytes::copy_from_slice(message));
        assert_eq!(&session.read().wait().unwrap()[..], message);
    }
    assert_eq!(received.load(Ordering::SeqCst), 0);

    // switching back to push mode hands later messages to the handler
    session.config().set_use_read_operation(false);
    session.write(Bytes::from_static(b"four"));
    assert!(wait_until(|| received.load(Ordering::SeqCst) == 1));

    acceptor.dispose().unwrap();
    pool.dispose().unwrap();
}
