use std::{io, net::SocketAddr, result::Result as StdResult, sync::Arc};

use thiserror::Error;

use crate::session::SessionId;

/// Errors produced by sessions, reactors and the filter chain.
///
/// The enum is `Clone` because a single failure is stored in a future and may be
/// read by any number of waiters and listeners; I/O errors are shared behind an
/// [`Arc`] for that reason.
#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(Arc<io::Error>),

    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: SocketAddr,
        source: Arc<io::Error>,
    },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("session {0} is closing")]
    SessionClosed(SessionId),

    #[error("reactor disposed")]
    Disposed,

    #[error("reactor failed: {0}")]
    ReactorFailed(Arc<io::Error>),

    #[error("blocking wait on a reactor thread would deadlock it")]
    BlockingInReactor,

    #[error("read operation is not enabled for session {0}")]
    ReadOperationDisabled(SessionId),

    #[error("max sessions reached, rejecting {0}")]
    MaxSessionsReached(SocketAddr),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl Error {
    pub(crate) fn connect(addr: SocketAddr, source: io::Error) -> Self {
        Error::Connect {
            addr,
            source: Arc::new(source),
        }
    }

    /// Returns `true` for the asynchronous "destination unreachable" report of
    /// a connected datagram socket.
    pub fn is_port_unreachable(&self) -> bool {
        match self {
            Error::Io(e) => e.kind() == io::ErrorKind::ConnectionRefused,
            _ => false,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(Arc::new(err))
    }
}

pub type Result<T> = StdResult<T, Error>;
