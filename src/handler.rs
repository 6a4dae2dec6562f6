use bytes::Bytes;

use crate::{error::Error, error::Result, session::Session};

/// Application callbacks for session events (push-mode delivery).
///
/// Implement this trait to define how your application responds to session
/// events. Every method has a default implementation that does nothing.
///
/// ## Execution Context
///
/// Callbacks run on the reactor thread that owns the session, so callbacks for
/// one session never run concurrently. Calls for different sessions may run in
/// parallel on different reactors. Keep callbacks short; never block on a future
/// from inside one (the wait is refused with [`Error::BlockingInReactor`]).
///
/// ## Error Handling
///
/// Returning an error from `session_opened` or `message_received` is treated
/// like a transport failure: `exception_caught` is invoked and the session is
/// closed.
pub trait IoHandler: Send + Sync + 'static {
    /// Called once the session is connected and registered with its reactor
    fn session_opened(&self, session: &Session) -> Result<()> {
        let _ = session;
        Ok(())
    }

    /// Called for every decoded message unless the session is in pull mode
    fn message_received(&self, session: &Session, message: Bytes) -> Result<()> {
        let _ = (session, message);
        Ok(())
    }

    /// Called after an encoded buffer was fully handed to the transport
    fn message_sent(&self, session: &Session, message: &Bytes) {
        let _ = (session, message);
    }

    /// Called on transport, protocol and handler errors
    fn exception_caught(&self, session: &Session, error: &Error) {
        let _ = (session, error);
    }

    /// Called once the session released its descriptor
    fn session_closed(&self, session: &Session) {
        let _ = session;
    }
}

/// A handler that ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct IoHandlerAdapter;

impl IoHandler for IoHandlerAdapter {}
