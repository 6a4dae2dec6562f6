use std::{
    cell::Cell,
    sync::{Mutex, MutexGuard, PoisonError},
};

use crate::reactor_pool::DEFAULT_POOL_CAPACITY;

thread_local! {
    static REACTOR_THREAD: Cell<bool> = const { Cell::new(false) };
}

pub fn get_default_capacity() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(DEFAULT_POOL_CAPACITY)
}

/// Returns `true` when called from inside a reactor's event loop thread.
pub fn is_reactor_thread() -> bool {
    REACTOR_THREAD.with(Cell::get)
}

pub(crate) fn mark_reactor_thread() {
    REACTOR_THREAD.with(|flag| flag.set(true));
}

// A panicking listener must not wedge every later waiter.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
