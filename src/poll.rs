use std::{io, sync::Arc, time::Duration};

use mio::{Events, Poll, Registry, Token, Waker};

/// Token reserved for the reactor's waker; session ids start at 1.
pub(crate) const WAKER_TOKEN: Token = Token(0);

/// A `mio::Poll` together with the waker other threads use to interrupt it.
pub(crate) struct PollHandle {
    poller: Poll,
    waker: Arc<Waker>,
}

impl PollHandle {
    pub(crate) fn new() -> io::Result<Self> {
        let poller = Poll::new()?;
        let waker = Waker::new(poller.registry(), WAKER_TOKEN)?;
        Ok(PollHandle {
            poller,
            waker: Arc::new(waker),
        })
    }

    pub(crate) fn registry(&self) -> &Registry {
        self.poller.registry()
    }

    pub(crate) fn waker(&self) -> Arc<Waker> {
        Arc::clone(&self.waker)
    }

    /// Waits for readiness; an interrupted wait reports zero events.
    pub(crate) fn poll(&mut self, events: &mut Events, timeout: Option<Duration>) -> io::Result<usize> {
        match self.poller.poll(events, timeout) {
            Ok(()) => Ok(events.iter().count()),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(0),
            Err(e) => Err(e),
        }
    }
}
