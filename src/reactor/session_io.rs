use std::{
    collections::VecDeque,
    io::{self, Read, Write},
    sync::Arc,
};

use bytes::Bytes;
use mio::{Interest, Registry, Token};

use super::command::{PendingConnect, Registration, Socket};
use crate::{
    attributes::AttributeMap,
    buffer::IoBuffer,
    error::Error,
    event::Readiness,
    filter::{ChainOutput, FilterChain},
    future::WriteFuture,
    handler::IoHandler,
    logger::LogLevel,
    net::SessionRegistry,
    session::Session,
};

/// Read passes one readiness event may take before other sessions get a turn.
pub(super) const MAX_READS_PER_EVENT: usize = 16;

/// What the reactor should do with a session after handling an event.
pub(super) enum Outcome {
    Open,
    /// Deregister and release the session; the error is why.
    Release(Error),
}

struct PendingWrite {
    message: Bytes,
    written: usize,
    future: Option<WriteFuture>,
}

/// The reactor-owned half of a session.
pub(super) struct SessionIo {
    session: Session,
    socket: Socket,
    chain: FilterChain,
    attributes: AttributeMap,
    handler: Arc<dyn IoHandler>,
    read_buf: IoBuffer,
    write_queue: VecDeque<PendingWrite>,
    connect: Option<PendingConnect>,
    registry: Option<Arc<SessionRegistry>>,
    token: Token,
    interest: Interest,
    opened: bool,
    close_pending: bool,
    /// The last read stopped at the pass limit with data possibly left.
    read_pending: bool,
    no_delay: Option<bool>,
}

impl SessionIo {
    pub(super) fn new(registration: Registration) -> Self {
        let Registration {
            session,
            socket,
            chain,
            handler,
            connect,
            registry,
        } = registration;

        let interest = match &connect {
            Some(connect) if connect.in_progress => Interest::READABLE | Interest::WRITABLE,
            _ => Interest::READABLE,
        };
        let capacity = session.config().receive_buffer_size();

        Self {
            token: Token(session.id().as_u64() as usize),
            session,
            socket,
            chain,
            attributes: AttributeMap::default(),
            handler,
            read_buf: IoBuffer::with_capacity(capacity),
            write_queue: VecDeque::new(),
            connect,
            registry,
            interest,
            opened: false,
            close_pending: false,
            read_pending: false,
            no_delay: None,
        }
    }

    pub(super) fn token(&self) -> Token {
        self.token
    }

    pub(super) fn session(&self) -> &Session {
        &self.session
    }

    pub(super) fn read_pending(&self) -> bool {
        self.read_pending
    }

    pub(super) fn register(&mut self, registry: &Registry) -> io::Result<()> {
        self.socket.register(registry, self.token, self.interest)
    }

    fn connecting(&self) -> bool {
        self.connect.as_ref().is_some_and(|connect| connect.in_progress)
    }

    /// Opens the session right away unless a stream handshake is still running.
    pub(super) fn start(&mut self, registry: &Registry) -> Outcome {
        if self.connecting() {
            return Outcome::Open;
        }
        self.established(registry)
    }

    fn established(&mut self, registry: &Registry) -> Outcome {
        self.session.set_addresses(
            self.socket.local_addr().ok(),
            self.socket.peer_addr().ok(),
        );
        self.session.mark_connected();
        self.apply_no_delay();
        if let Some(sessions) = &self.registry {
            sessions.insert(&self.session);
        }

        self.opened = true;
        let opened = self.handler.session_opened(&self.session);
        if let Some(connect) = self.connect.take() {
            connect.future.complete(Ok(self.session.clone()));
        }
        if let Err(e) = opened {
            self.exception(&e);
            return Outcome::Release(e);
        }

        if let Err(e) = self.set_interest(registry, Interest::READABLE) {
            return Outcome::Release(e);
        }
        self.flush(registry)
    }

    /// Checks whether a non-blocking connect has finished.
    fn finish_connect(&mut self) -> Result<bool, Error> {
        let addr = match &self.connect {
            Some(connect) => connect.addr,
            None => return Ok(true),
        };
        let Socket::Stream(stream) = &self.socket else {
            return Ok(true);
        };

        if let Some(e) = stream.take_error().map_err(|e| Error::connect(addr, e))? {
            return Err(Error::connect(addr, e));
        }
        match stream.peer_addr() {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(false),
            Err(e) => Err(Error::connect(addr, e)),
        }
    }

    pub(super) fn on_ready(&mut self, readiness: &Readiness, registry: &Registry) -> Outcome {
        if self.connecting() {
            if !readiness.connect_resolved() {
                return Outcome::Open;
            }
            match self.finish_connect() {
                Ok(true) => {
                    if let Outcome::Release(reason) = self.established(registry) {
                        return Outcome::Release(reason);
                    }
                }
                Ok(false) => return Outcome::Open,
                Err(e) => return Outcome::Release(e),
            }
        }

        if readiness.wants_read() {
            if let Outcome::Release(reason) = self.read(registry) {
                return Outcome::Release(reason);
            }
        }
        if readiness.is_writable() || !self.write_queue.is_empty() {
            return self.flush(registry);
        }
        Outcome::Open
    }

    fn read(&mut self, registry: &Registry) -> Outcome {
        self.read_pending = false;
        for _ in 0..MAX_READS_PER_EVENT {
            let limit = self.session.config().receive_buffer_size();
            let result = match &mut self.socket {
                Socket::Stream(stream) => self.read_buf.fill(limit, |window| stream.read(window)),
                Socket::Datagram(socket) => self.read_buf.fill(limit, |window| socket.recv(window)),
            };

            match result {
                Ok(0) if matches!(self.socket, Socket::Stream(_)) => {
                    self.session.logger().log(
                        LogLevel::Debug,
                        &format!("Session {} closed by peer", self.session.id()),
                    );
                    return Outcome::Release(Error::SessionClosed(self.session.id()));
                }
                Ok(n) => {
                    self.session.record_read(n);
                    let chunk = self.read_buf.take_readable();
                    if let Outcome::Release(reason) = self.inbound(chunk, registry) {
                        return Outcome::Release(reason);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Outcome::Open,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => match self.port_unreachable(&e) {
                    Some(Outcome::Open) => continue,
                    Some(outcome) => return outcome,
                    None => {
                        let err = Error::from(e);
                        self.exception(&err);
                        return Outcome::Release(err);
                    }
                },
            }
        }
        self.read_pending = true;
        Outcome::Open
    }

    /// Applies the unreachable policy to `e` if it is a datagram session's
    /// refusal report. `Some(Open)` means the report was suppressed.
    fn port_unreachable(&mut self, e: &io::Error) -> Option<Outcome> {
        if !matches!(self.socket, Socket::Datagram(_)) || e.kind() != io::ErrorKind::ConnectionRefused
        {
            return None;
        }

        if self.session.config().close_on_port_unreachable() {
            let err = Error::from(io::Error::new(e.kind(), e.to_string()));
            self.exception(&err);
            return Some(Outcome::Release(err));
        }

        self.session.logger().log(
            LogLevel::Debug,
            &format!("Session {}: port unreachable ignored", self.session.id()),
        );
        Some(Outcome::Open)
    }

    fn inbound(&mut self, chunk: Bytes, registry: &Registry) -> Outcome {
        let out = self
            .chain
            .fire_inbound(&self.session, &mut self.attributes, chunk);
        let ChainOutput {
            delivered,
            transmit,
            failure,
        } = out;

        self.queue(transmit, None);
        for message in delivered {
            let Some(message) = self.session.offer_read(message) else {
                continue;
            };
            if let Err(e) = self.handler.message_received(&self.session, message) {
                self.exception(&e);
                return Outcome::Release(e);
            }
        }
        if let Some(e) = failure {
            self.exception(&e);
            return Outcome::Release(e);
        }

        if self.write_queue.is_empty() {
            return Outcome::Open;
        }
        self.flush(registry)
    }

    pub(super) fn write(&mut self, message: Bytes, future: WriteFuture, registry: &Registry) -> Outcome {
        if self.close_pending {
            future.complete(Err(Error::SessionClosed(self.session.id())));
            return Outcome::Open;
        }

        let out = self
            .chain
            .fire_outbound(&self.session, &mut self.attributes, message);
        if let Some(e) = out.failure {
            future.complete(Err(e.clone()));
            self.exception(&e);
            return Outcome::Open;
        }
        if out.transmit.is_empty() {
            future.complete(Ok(()));
            return Outcome::Open;
        }

        self.queue(out.transmit, Some(future));
        self.flush(registry)
    }

    /// Queues buffers for transmission; `future` completes with the last one.
    fn queue(&mut self, transmit: Vec<Bytes>, mut future: Option<WriteFuture>) {
        let last = transmit.len();
        for (index, message) in transmit.into_iter().enumerate() {
            self.write_queue.push_back(PendingWrite {
                message,
                written: 0,
                future: if index + 1 == last { future.take() } else { None },
            });
        }
    }

    /// Graceful close waits for the write queue; immediate close does not.
    pub(super) fn close(&mut self, immediate: bool, registry: &Registry) -> Outcome {
        if immediate {
            return Outcome::Release(Error::SessionClosed(self.session.id()));
        }
        self.close_pending = true;
        self.flush(registry)
    }

    fn flush(&mut self, registry: &Registry) -> Outcome {
        if self.connecting() {
            return Outcome::Open;
        }
        self.apply_no_delay();

        while let Some(front) = self.write_queue.front_mut() {
            let pending = &front.message[front.written..];
            let result = match &mut self.socket {
                Socket::Stream(_) if pending.is_empty() => Ok(0),
                Socket::Stream(stream) => match stream.write(pending) {
                    Ok(0) => Err(io::ErrorKind::WriteZero.into()),
                    other => other,
                },
                Socket::Datagram(socket) => socket.send(pending),
            };

            match result {
                Ok(n) => {
                    self.session.record_written(n);
                    front.written += n;
                    let datagram = matches!(self.socket, Socket::Datagram(_));
                    if !datagram && front.written < front.message.len() {
                        continue;
                    }
                    if let Some(done) = self.write_queue.pop_front() {
                        if let Some(future) = done.future {
                            future.complete(Ok(()));
                        }
                        self.handler.message_sent(&self.session, &done.message);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    let interest = Interest::READABLE | Interest::WRITABLE;
                    if let Err(e) = self.set_interest(registry, interest) {
                        return Outcome::Release(e);
                    }
                    return Outcome::Open;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => match self.port_unreachable(&e) {
                    // the refusal consumed the pending report, so the send is retried
                    Some(Outcome::Open) => continue,
                    Some(outcome) => return outcome,
                    None => {
                        let err = Error::from(e);
                        self.exception(&err);
                        return Outcome::Release(err);
                    }
                },
            }
        }

        if let Err(e) = self.set_interest(registry, Interest::READABLE) {
            return Outcome::Release(e);
        }
        if self.close_pending {
            return Outcome::Release(Error::SessionClosed(self.session.id()));
        }
        Outcome::Open
    }

    fn set_interest(&mut self, registry: &Registry, interest: Interest) -> Result<(), Error> {
        if self.interest == interest {
            return Ok(());
        }
        self.socket.reregister(registry, self.token, interest)?;
        self.interest = interest;
        Ok(())
    }

    /// Applies the session's current no-delay flag if it changed.
    fn apply_no_delay(&mut self) {
        let Socket::Stream(stream) = &self.socket else {
            return;
        };
        let wanted = self.session.config().no_delay();
        if self.no_delay == Some(wanted) {
            return;
        }
        match stream.set_nodelay(wanted) {
            Ok(()) => self.no_delay = Some(wanted),
            Err(e) => {
                self.no_delay = Some(wanted);
                self.session.logger().log(
                    LogLevel::Warn,
                    &format!("Failed to set TCP_NODELAY on {}: {}", self.session.id(), e),
                );
            }
        }
    }

    /// Runs the chain's exception hooks, then the handler's.
    fn exception(&mut self, error: &Error) {
        self.session.logger().log(
            LogLevel::Debug,
            &format!("Session {} exception: {}", self.session.id(), error),
        );
        let out = self
            .chain
            .fire_exception(&self.session, &mut self.attributes, error);
        self.queue(out.transmit, None);
        self.handler.exception_caught(&self.session, error);
    }

    /// Releases the descriptor and resolves every future the session still holds.
    pub(super) fn release(mut self, reason: Error, registry: &Registry) {
        let _ = self.socket.deregister(registry);
        self.session.begin_closing();

        let id = self.session.id();
        let failure = match &reason {
            Error::Disposed | Error::ReactorFailed(_) => reason.clone(),
            _ => Error::SessionClosed(id),
        };

        for pending in self.write_queue.drain(..) {
            if let Some(future) = pending.future {
                future.complete(Err(failure.clone()));
            }
        }
        if let Some(connect) = self.connect.take() {
            connect.future.complete(Err(reason.clone()));
        }

        self.chain.fire_closed(&self.session, &mut self.attributes);
        self.attributes.clear();
        self.read_buf.clear();
        if let Some(sessions) = &self.registry {
            sessions.remove(id);
            sessions.dismiss();
        }
        if self.opened {
            self.handler.session_closed(&self.session);
        }

        self.session.logger().log(
            LogLevel::Debug,
            &format!("Session {} released: {}", id, reason),
        );
        self.session.mark_closed(&failure);
    }
}
