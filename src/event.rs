use mio::{event::Event, Token};
use std::fmt;

/// Readiness snapshot of one registered source, detached from the `Events`
/// buffer so the reactor can keep it while mutating its session table.
#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) struct Readiness {
    token: Token,
    readable: bool,
    writable: bool,
    error: bool,
    read_closed: bool,
    write_closed: bool,
}

impl fmt::Debug for Readiness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Readiness")
            .field("token", &self.token)
            .field("readable", &self.readable)
            .field("writable", &self.writable)
            .field("error", &self.error)
            .finish()
    }
}

impl Readiness {
    /// A read the reactor schedules itself for a session it stopped reading
    /// before the socket drained.
    pub(crate) fn readable(token: Token) -> Self {
        Self {
            token,
            readable: true,
            writable: false,
            error: false,
            read_closed: false,
            write_closed: false,
        }
    }

    pub(crate) fn token(&self) -> Token {
        self.token
    }

    /// Data, EOF or a pending socket error may be read.
    pub(crate) fn wants_read(&self) -> bool {
        self.readable || self.error || self.read_closed
    }

    /// A connect attempt finished, one way or the other.
    pub(crate) fn connect_resolved(&self) -> bool {
        self.writable || self.error || self.write_closed
    }

    pub(crate) fn is_writable(&self) -> bool {
        self.writable
    }
}

impl From<&Event> for Readiness {
    fn from(event: &Event) -> Self {
        Self {
            token: event.token(),
            readable: event.is_readable(),
            writable: event.is_writable(),
            error: event.is_error(),
            read_closed: event.is_read_closed(),
            write_closed: event.is_write_closed(),
        }
    }
}
