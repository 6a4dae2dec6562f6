use std::{
    io,
    net::SocketAddr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        mpsc::Sender,
        Arc, Mutex,
    },
};

use bytes::Bytes;
use mio::{
    net::{TcpListener, TcpStream, UdpSocket},
    Interest, Registry, Token, Waker,
};

use crate::{
    error::Error,
    filter::FilterChain,
    future::{CloseFuture, ConnectFuture, IoFuture, WriteFuture},
    handler::IoHandler,
    net::SessionRegistry,
    session::{Session, SessionId},
    utils::lock,
};

/// Requests other threads hand to a reactor. Each producer's commands are
/// processed in the order it submitted them.
pub(crate) enum Command {
    Register(Box<Registration>),
    Listen(Box<ListenerRegistration>),
    Write {
        id: SessionId,
        message: Bytes,
        future: WriteFuture,
    },
    Close {
        id: SessionId,
        immediate: bool,
    },
    Unbind {
        token: Token,
        future: CloseFuture,
    },
    Shutdown,
}

impl Command {
    /// Resolves whatever the command carried when it can no longer be processed.
    pub(crate) fn abort(self, reason: Error) {
        match self {
            Command::Register(registration) => {
                let Registration {
                    session,
                    connect,
                    registry,
                    ..
                } = *registration;
                if let Some(sessions) = registry {
                    sessions.dismiss();
                }
                session.begin_closing();
                if let Some(connect) = connect {
                    connect.future.complete(Err(reason.clone()));
                }
                session.mark_closed(&reason);
            }
            Command::Listen(listener) => {
                listener.bound.complete(Err(reason));
            }
            Command::Write { future, .. } => {
                future.complete(Err(reason));
            }
            Command::Unbind { future, .. } => {
                future.complete(Ok(()));
            }
            Command::Close { .. } | Command::Shutdown => {}
        }
    }
}

pub(crate) enum Socket {
    Stream(TcpStream),
    Datagram(UdpSocket),
}

impl Socket {
    pub(crate) fn register(&mut self, registry: &Registry, token: Token, interest: Interest) -> io::Result<()> {
        match self {
            Socket::Stream(stream) => registry.register(stream, token, interest),
            Socket::Datagram(socket) => registry.register(socket, token, interest),
        }
    }

    pub(crate) fn reregister(&mut self, registry: &Registry, token: Token, interest: Interest) -> io::Result<()> {
        match self {
            Socket::Stream(stream) => registry.reregister(stream, token, interest),
            Socket::Datagram(socket) => registry.reregister(socket, token, interest),
        }
    }

    pub(crate) fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        match self {
            Socket::Stream(stream) => registry.deregister(stream),
            Socket::Datagram(socket) => registry.deregister(socket),
        }
    }

    pub(crate) fn local_addr(&self) -> io::Result<SocketAddr> {
        match self {
            Socket::Stream(stream) => stream.local_addr(),
            Socket::Datagram(socket) => socket.local_addr(),
        }
    }

    pub(crate) fn peer_addr(&self) -> io::Result<SocketAddr> {
        match self {
            Socket::Stream(stream) => stream.peer_addr(),
            Socket::Datagram(socket) => socket.peer_addr(),
        }
    }
}

/// A connect the session must finish before it is opened.
pub(crate) struct PendingConnect {
    pub(crate) future: ConnectFuture,
    pub(crate) addr: SocketAddr,
    /// Waiting for the handshake; datagram sessions never are.
    pub(crate) in_progress: bool,
}

/// Everything a reactor needs to take ownership of a new session.
pub(crate) struct Registration {
    pub(crate) session: Session,
    pub(crate) socket: Socket,
    pub(crate) chain: FilterChain,
    pub(crate) handler: Arc<dyn IoHandler>,
    pub(crate) connect: Option<PendingConnect>,
    pub(crate) registry: Option<Arc<SessionRegistry>>,
}

/// Called on the listener's reactor for every accepted connection.
pub(crate) trait AcceptHandler: Send + Sync {
    fn accepted(&self, stream: TcpStream, peer: SocketAddr);
}

pub(crate) struct ListenerRegistration {
    pub(crate) token: Token,
    pub(crate) listener: TcpListener,
    pub(crate) acceptor: Arc<dyn AcceptHandler>,
    pub(crate) bound: IoFuture<()>,
}

struct HandleInner {
    id: usize,
    sender: Mutex<Option<Sender<Command>>>,
    waker: Arc<Waker>,
    sessions: AtomicUsize,
}

/// The cross-thread face of a reactor: a command queue plus its waker.
#[derive(Clone)]
pub(crate) struct ReactorHandle {
    inner: Arc<HandleInner>,
}

impl ReactorHandle {
    pub(crate) fn new(id: usize, sender: Sender<Command>, waker: Arc<Waker>) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                id,
                sender: Mutex::new(Some(sender)),
                waker,
                sessions: AtomicUsize::new(0),
            }),
        }
    }

    pub(crate) fn id(&self) -> usize {
        self.inner.id
    }

    /// Queues `command` and wakes the reactor; hands it back once disposed.
    pub(crate) fn submit(&self, command: Command) -> Result<(), Command> {
        {
            let sender = lock(&self.inner.sender);
            match sender.as_ref() {
                Some(sender) => sender.send(command).map_err(|e| e.0)?,
                None => return Err(command),
            }
        }
        // a failed wake only delays the command until the next poll timeout
        let _ = self.inner.waker.wake();
        Ok(())
    }

    /// Like [`submit`](Self::submit), but resolves the command's futures with
    /// [`Error::Disposed`] when the reactor is gone.
    ///
    /// A registration counts toward [`session_count`](Self::session_count) from
    /// here on, so a burst of dispatches sees the sessions already handed out.
    pub(crate) fn dispatch(&self, command: Command) {
        let registering = matches!(command, Command::Register(_));
        if registering {
            self.session_added();
        }
        if let Err(command) = self.submit(command) {
            if registering {
                self.session_removed();
            }
            command.abort(Error::Disposed);
        }
    }

    /// Stops accepting commands. Everything queued before this call is still
    /// in the channel for the reactor to drain.
    pub(crate) fn close_channel(&self) {
        lock(&self.inner.sender).take();
    }

    pub(crate) fn is_closed(&self) -> bool {
        lock(&self.inner.sender).is_none()
    }

    pub(crate) fn session_count(&self) -> usize {
        self.inner.sessions.load(Ordering::Relaxed)
    }

    pub(crate) fn session_added(&self) {
        self.inner.sessions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn session_removed(&self) {
        self.inner.sessions.fetch_sub(1, Ordering::Relaxed);
    }

    #[cfg(test)]
    pub(crate) fn detached() -> Self {
        let poll = mio::Poll::new().unwrap();
        let waker = Waker::new(poll.registry(), crate::poll::WAKER_TOKEN).unwrap();
        let handle = Self::new(0, std::sync::mpsc::channel().0, Arc::new(waker));
        handle.close_channel();
        handle
    }
}

impl std::fmt::Debug for ReactorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReactorHandle")
            .field("id", &self.inner.id)
            .field("sessions", &self.session_count())
            .finish()
    }
}
