//! The reactor: one thread multiplexing a disjoint set of sessions.
//!
//! ```text
//!             other threads                        reactor thread
//!  ┌──────────────────────────────┐     ┌─────────────────────────────────────┐
//!  │ session.write() / close()    │     │ loop {                              │
//!  │ acceptors, connectors        │     │   poll(events, timeout)             │
//!  │        │                     │     │   drain commands ◀───── channel     │
//!  │        ▼                     │     │   for each ready token:             │
//!  │ ReactorHandle::submit(cmd) ──┼────▶│     listener → accept loop          │
//!  │        └── waker.wake() ─────┼────▶│     session  → read / flush         │
//!  └──────────────────────────────┘     │ }                                   │
//!                                       └─────────────────────────────────────┘
//! ```
//!
//! A session's socket, filter chain, attributes and buffers live in the
//! reactor's session table and are only touched by the reactor thread. Other
//! threads reach a session exclusively through [`Command`]s.
//!
//! A failure of `poll` itself ends the loop: every session on the reactor is
//! released with [`Error::ReactorFailed`] and the error is returned from
//! [`Reactor::run`], which the pool surfaces from `dispose()`.

mod command;
mod session_io;

pub(crate) use command::{
    AcceptHandler, Command, ListenerRegistration, PendingConnect, ReactorHandle, Registration,
    Socket,
};

use std::{
    collections::HashMap,
    io,
    sync::{
        mpsc::{self, Receiver, TryRecvError},
        Arc,
    },
    time::Duration,
};

use mio::{net::TcpListener, Events, Interest, Token};

use crate::{
    config::ReactorPoolConfig,
    error::{Error, Result},
    event::Readiness,
    future::CloseFuture,
    logger::{LogLevel, Logger},
    poll::{PollHandle, WAKER_TOKEN},
    utils::mark_reactor_thread,
};
use session_io::{Outcome, SessionIo};

pub const DEFAULT_EVENTS_CAPACITY: usize = 1024;
pub const DEFAULT_POLL_TIMEOUT_MS: u64 = 100;

struct Listener {
    socket: TcpListener,
    acceptor: Arc<dyn AcceptHandler>,
}

pub(crate) struct Reactor {
    handle: ReactorHandle,
    poll: PollHandle,
    events: Events,
    ready: Vec<Readiness>,
    commands: Receiver<Command>,
    sessions: HashMap<Token, SessionIo>,
    listeners: HashMap<Token, Listener>,
    poll_timeout: Duration,
    logger: Arc<dyn Logger>,
}

impl Reactor {
    pub(crate) fn new(id: usize, config: &ReactorPoolConfig) -> io::Result<Self> {
        let poll = PollHandle::new()?;
        let (sender, commands) = mpsc::channel();
        let handle = ReactorHandle::new(id, sender, poll.waker());

        Ok(Self {
            handle,
            poll,
            events: Events::with_capacity(config.events_capacity.max(1)),
            ready: Vec::new(),
            commands,
            sessions: HashMap::new(),
            listeners: HashMap::new(),
            poll_timeout: config.poll_timeout,
            logger: config.logger.clone(),
        })
    }

    pub(crate) fn handle(&self) -> ReactorHandle {
        self.handle.clone()
    }

    /// Runs the event loop on the calling thread until shutdown or a fatal
    /// poll failure, then disposes every session it owns.
    pub(crate) fn run(mut self) -> Result<()> {
        mark_reactor_thread();
        self.logger.log(
            LogLevel::Debug,
            &format!("Reactor {} started", self.handle.id()),
        );

        let outcome = self.event_loop();
        let reason = match &outcome {
            Ok(()) => Error::Disposed,
            Err(e) => e.clone(),
        };
        self.dispose(reason);

        self.logger.log(
            LogLevel::Debug,
            &format!("Reactor {} stopped", self.handle.id()),
        );
        outcome
    }

    fn event_loop(&mut self) -> Result<()> {
        loop {
            // carried-over reads must not wait for the poll timeout
            let timeout = if self.ready.is_empty() {
                self.poll_timeout
            } else {
                Duration::ZERO
            };
            if let Err(e) = self.poll.poll(&mut self.events, Some(timeout)) {
                self.logger.log(
                    LogLevel::Error,
                    &format!("Reactor {} poll failed: {}", self.handle.id(), e),
                );
                return Err(Error::ReactorFailed(Arc::new(e)));
            }

            let mut ready = std::mem::take(&mut self.ready);
            ready.extend(
                self.events
                    .iter()
                    .filter(|event| event.token() != WAKER_TOKEN)
                    .map(Readiness::from),
            );

            if !self.drain_commands() {
                return Ok(());
            }
            for readiness in ready.drain(..) {
                self.dispatch_event(readiness);
            }
            if self.ready.is_empty() {
                self.ready = ready;
            }
        }
    }

    /// Applies queued commands; returns `false` once shutdown was requested.
    fn drain_commands(&mut self) -> bool {
        loop {
            match self.commands.try_recv() {
                Ok(Command::Shutdown) => return false,
                Ok(command) => self.apply(command),
                Err(TryRecvError::Empty) => return true,
                Err(TryRecvError::Disconnected) => return false,
            }
        }
    }

    fn apply(&mut self, command: Command) {
        match command {
            Command::Register(registration) => self.register(*registration),
            Command::Listen(listener) => self.listen(*listener),
            Command::Write { id, message, future } => {
                let token = Token(id.as_u64() as usize);
                let registry = self.poll.registry();
                let outcome = match self.sessions.get_mut(&token) {
                    Some(io) => io.write(message, future, registry),
                    None => {
                        future.complete(Err(Error::SessionClosed(id)));
                        return;
                    }
                };
                self.settle(token, outcome);
            }
            Command::Close { id, immediate } => {
                let token = Token(id.as_u64() as usize);
                let registry = self.poll.registry();
                if let Some(io) = self.sessions.get_mut(&token) {
                    let outcome = io.close(immediate, registry);
                    self.settle(token, outcome);
                }
            }
            Command::Unbind { token, future } => self.unbind(token, future),
            Command::Shutdown => {}
        }
    }

    fn register(&mut self, registration: Registration) {
        let mut io = SessionIo::new(registration);
        let token = io.token();

        if let Err(e) = io.register(self.poll.registry()) {
            self.logger.log(
                LogLevel::Error,
                &format!("Failed to register session {}: {}", io.session().id(), e),
            );
            self.release(io, Error::from(e));
            return;
        }

        match io.start(self.poll.registry()) {
            Outcome::Open => {
                self.sessions.insert(token, io);
            }
            Outcome::Release(reason) => self.release(io, reason),
        }
    }

    fn listen(&mut self, registration: ListenerRegistration) {
        let ListenerRegistration {
            token,
            mut listener,
            acceptor,
            bound,
        } = registration;

        if let Err(e) = self
            .poll
            .registry()
            .register(&mut listener, token, Interest::READABLE)
        {
            bound.complete(Err(Error::from(e)));
            return;
        }

        self.listeners.insert(
            token,
            Listener {
                socket: listener,
                acceptor,
            },
        );
        bound.complete(Ok(()));
    }

    fn unbind(&mut self, token: Token, future: CloseFuture) {
        if let Some(mut listener) = self.listeners.remove(&token) {
            let _ = self.poll.registry().deregister(&mut listener.socket);
        }
        future.complete(Ok(()));
    }

    fn dispatch_event(&mut self, readiness: Readiness) {
        let token = readiness.token();
        if self.listeners.contains_key(&token) {
            self.accept(token);
            return;
        }

        let registry = self.poll.registry();
        if let Some(io) = self.sessions.get_mut(&token) {
            let outcome = io.on_ready(&readiness, registry);
            if matches!(outcome, Outcome::Open) && io.read_pending() {
                self.ready.push(Readiness::readable(token));
            }
            self.settle(token, outcome);
        }
    }

    fn accept(&mut self, token: Token) {
        let Some(listener) = self.listeners.get(&token) else {
            return;
        };

        loop {
            match listener.socket.accept() {
                Ok((stream, peer)) => listener.acceptor.accepted(stream, peer),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.logger
                        .log(LogLevel::Error, &format!("Accept error: {}", e));
                    break;
                }
            }
        }
    }

    fn settle(&mut self, token: Token, outcome: Outcome) {
        if let Outcome::Release(reason) = outcome {
            if let Some(io) = self.sessions.remove(&token) {
                self.release(io, reason);
            }
        }
    }

    fn release(&mut self, io: SessionIo, reason: Error) {
        io.release(reason, self.poll.registry());
        self.handle.session_removed();
    }

    /// Refuses further commands, fails everything still queued and releases
    /// every session and listener.
    fn dispose(&mut self, reason: Error) {
        self.handle.close_channel();
        while let Ok(command) = self.commands.try_recv() {
            if matches!(command, Command::Register(_)) {
                self.handle.session_removed();
            }
            command.abort(reason.clone());
        }

        let sessions: Vec<SessionIo> = self.sessions.drain().map(|(_, io)| io).collect();
        for io in sessions {
            self.release(io, reason.clone());
        }
        for (_, mut listener) in self.listeners.drain() {
            let _ = self.poll.registry().deregister(&mut listener.socket);
        }
    }
}
