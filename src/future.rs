//! Single-assignment completion handles for session operations.
//!
//! Every asynchronous operation on a [`Session`](crate::session::Session)
//! returns an [`IoFuture`]: a cloneable handle whose outcome is set exactly once
//! by the reactor thread that finishes the operation. Consumers either block on
//! it from an application thread or register listeners.
//!
//! ```text
//!   application thread                 reactor thread
//!   ──────────────────                 ──────────────
//!   let f = session.write(msg);
//!   f.add_listener(..) ───────┐
//!   f.wait_timeout(d) ──┐     │        flush(msg)
//!                       │     │        f.complete(Ok(()))
//!                       ◀─────┴──────── (wakes waiters, runs listeners
//!                                        in registration order)
//! ```
//!
//! ## Rules
//!
//! - The outcome transitions from pending to done exactly once; later
//!   completion attempts are ignored.
//! - A listener registered before completion runs once, on the completing
//!   thread, after the outcome is visible. Listeners run in registration order:
//!   one registered while the completing thread is still running listeners is
//!   queued behind them, and one registered after that runs immediately on the
//!   registering thread.
//! - [`IoFuture::wait_timeout`] returns `false` on timeout; the operation keeps
//!   running and may still complete and notify listeners later.
//! - Blocking waits are refused on reactor threads, since the reactor is the
//!   thread that would have to complete the future.

use std::{
    fmt,
    sync::{Arc, Condvar, Mutex},
    time::{Duration, Instant},
};

use bytes::Bytes;

use crate::{
    error::{Error, Result},
    session::Session,
    utils::{is_reactor_thread, lock},
};

type Listener<T> = Box<dyn FnOnce(&IoFuture<T>) + Send + 'static>;

struct State<T> {
    outcome: Option<Result<T>>,
    listeners: Vec<Listener<T>>,
    /// The completing thread is still running listeners.
    dispatching: bool,
}

struct Inner<T> {
    state: Mutex<State<T>>,
    done: Condvar,
}

pub struct IoFuture<T> {
    inner: Arc<Inner<T>>,
}

/// Completes with the connected [`Session`].
pub type ConnectFuture = IoFuture<Session>;
/// Completes once the encoded message has been handed to the transport.
pub type WriteFuture = IoFuture<()>;
/// Completes with the next decoded message of a pull-mode session.
pub type ReadFuture = IoFuture<Bytes>;
/// Completes once the session has released its descriptor.
pub type CloseFuture = IoFuture<()>;

impl<T> Clone for IoFuture<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone + Send + 'static> Default for IoFuture<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + 'static> IoFuture<T> {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    outcome: None,
                    listeners: Vec::new(),
                    dispatching: false,
                }),
                done: Condvar::new(),
            }),
        }
    }

    pub(crate) fn completed(outcome: Result<T>) -> Self {
        let future = Self::new();
        future.complete(outcome);
        future
    }

    /// Sets the outcome, wakes every waiter and runs pending listeners.
    ///
    /// Returns `false` if the future was already done; the first outcome wins.
    pub(crate) fn complete(&self, outcome: Result<T>) -> bool {
        let mut listeners = {
            let mut state = lock(&self.inner.state);
            if state.outcome.is_some() {
                return false;
            }
            state.outcome = Some(outcome);
            state.dispatching = true;
            std::mem::take(&mut state.listeners)
        };
        self.inner.done.notify_all();

        loop {
            for listener in listeners {
                listener(self);
            }
            let mut state = lock(&self.inner.state);
            if state.listeners.is_empty() {
                state.dispatching = false;
                return true;
            }
            listeners = std::mem::take(&mut state.listeners);
        }
    }

    /// Non-blocking completion check.
    pub fn is_done(&self) -> bool {
        lock(&self.inner.state).outcome.is_some()
    }

    /// Returns `true` once the operation completed successfully.
    pub fn is_success(&self) -> bool {
        matches!(lock(&self.inner.state).outcome, Some(Ok(_)))
    }

    /// The outcome, if the future is done.
    pub fn result(&self) -> Option<Result<T>> {
        lock(&self.inner.state).outcome.clone()
    }

    /// The failure, if the future is done and the operation failed.
    pub fn failure(&self) -> Option<Error> {
        match &lock(&self.inner.state).outcome {
            Some(Err(e)) => Some(e.clone()),
            _ => None,
        }
    }

    /// Blocks until the future is done and returns its outcome.
    ///
    /// Fails with [`Error::BlockingInReactor`] when called on a reactor thread
    /// while the future is still pending.
    pub fn wait(&self) -> Result<T> {
        let mut state = lock(&self.inner.state);
        loop {
            if let Some(outcome) = &state.outcome {
                return outcome.clone();
            }
            if is_reactor_thread() {
                return Err(Error::BlockingInReactor);
            }
            state = self
                .inner
                .done
                .wait(state)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
        }
    }

    /// Blocks for at most `timeout`; returns whether the future is done.
    ///
    /// On a reactor thread this never blocks and only reports the current state.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = lock(&self.inner.state);
        while state.outcome.is_none() {
            if is_reactor_thread() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            state = match self.inner.done.wait_timeout(state, deadline - now) {
                Ok((state, _)) => state,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        true
    }

    /// Registers a callback that runs exactly once after completion.
    pub fn add_listener<F>(&self, listener: F) -> &Self
    where
        F: FnOnce(&IoFuture<T>) + Send + 'static,
    {
        {
            let mut state = lock(&self.inner.state);
            // queued behind the completing thread's listeners to keep their order
            if state.outcome.is_none() || state.dispatching {
                state.listeners.push(Box::new(listener));
                return self;
            }
        }
        listener(self);
        self
    }
}

impl IoFuture<Session> {
    /// The connected session, once the connect succeeded.
    pub fn session(&self) -> Option<Session> {
        match self.result() {
            Some(Ok(session)) => Some(session),
            _ => None,
        }
    }
}

impl<T> fmt::Debug for IoFuture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock(&self.inner.state);
        let status = match &state.outcome {
            None => "pending",
            Some(Ok(_)) => "done",
            Some(Err(_)) => "failed",
        };
        f.debug_struct("IoFuture")
            .field("status", &status)
            .field("listeners", &state.listeners.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::mark_reactor_thread;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn test_single_completion() {
        let future: IoFuture<u32> = IoFuture::new();
        assert!(!future.is_done());
        assert!(future.complete(Ok(7)));
        assert!(!future.complete(Ok(8)));
        assert!(!future.complete(Err(Error::Disposed)));
        assert_eq!(future.wait().unwrap(), 7);
        assert!(future.is_success());
    }

    #[test]
    fn test_listener_before_completion() {
        let future: IoFuture<u32> = IoFuture::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for id in 0..3 {
            let order = order.clone();
            future.add_listener(move |f| {
                assert!(f.is_done());
                order.lock().unwrap().push(id);
            });
        }
        assert!(order.lock().unwrap().is_empty());

        future.complete(Ok(1));
        future.complete(Ok(2));
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_listener_after_completion() {
        let future = IoFuture::completed(Ok(5u32));
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        future.add_listener(move |f| {
            assert_eq!(f.result().unwrap().unwrap(), 5);
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        future.complete(Ok(6));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_late_listener_runs_after_earlier_ones() {
        let future: IoFuture<u32> = IoFuture::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let first = order.clone();
        future.add_listener(move |f| {
            // another thread registers while this listener is running
            let late = f.clone();
            let order = first.clone();
            thread::spawn(move || {
                late.add_listener(move |_| order.lock().unwrap().push(3));
            })
            .join()
            .unwrap();
            first.lock().unwrap().push(1);
        });
        let second = order.clone();
        future.add_listener(move |_| second.lock().unwrap().push(2));

        future.complete(Ok(0));
        assert_eq!(*order.lock().unwrap(), vec![1, 2, 3]);

        // once dispatch is over, new listeners run on the caller again
        let after = order.clone();
        future.add_listener(move |_| after.lock().unwrap().push(4));
        assert_eq!(*order.lock().unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_wait_timeout_does_not_cancel() {
        let future: IoFuture<()> = IoFuture::new();
        assert!(!future.wait_timeout(Duration::from_millis(20)));

        let remote = future.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            remote.complete(Ok(()));
        });
        assert!(future.wait_timeout(Duration::from_secs(5)));
        assert!(future.is_success());
        handle.join().unwrap();
    }

    #[test]
    fn test_failure_is_distinct_from_timeout() {
        let future: IoFuture<()> = IoFuture::new();
        future.complete(Err(Error::Disposed));
        assert!(future.wait_timeout(Duration::from_millis(1)));
        assert!(!future.is_success());
        assert!(matches!(future.failure(), Some(Error::Disposed)));
        assert!(matches!(future.wait(), Err(Error::Disposed)));
    }

    #[test]
    fn test_wait_refused_on_reactor_thread() {
        thread::spawn(|| {
            mark_reactor_thread();
            let pending: IoFuture<()> = IoFuture::new();
            assert!(matches!(pending.wait(), Err(Error::BlockingInReactor)));
            assert!(!pending.wait_timeout(Duration::from_secs(10)));

            let done = IoFuture::completed(Ok(()));
            assert!(done.wait().is_ok());
        })
        .join()
        .unwrap();
    }

    #[test]
    fn test_concurrent_completers() {
        let future: IoFuture<usize> = IoFuture::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let f = fired.clone();
        future.add_listener(move |_| {
            f.fetch_add(1, Ordering::SeqCst);
        });

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let future = future.clone();
                thread::spawn(move || future.complete(Ok(i)))
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();

        assert_eq!(winners, 1);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
