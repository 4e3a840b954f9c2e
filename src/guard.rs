use std::{fmt, sync::Arc};

use parking_lot::{const_rwlock, lock_api::RawMutex as _, RwLock};

/// A mutual-exclusion primitive supplied by the host program.
///
/// Every tracker operation acquires the configured lock on entry and releases it before returning, including right
/// before terminating the process on a fatal error. Implementations only need to provide plain, non-reentrant
/// exclusion: the tracker never acquires the lock twice from within one operation.
pub trait GuardLock: Send + Sync {
    /// Blocks until the lock is held by the current caller.
    fn acquire(&self);

    /// Releases a lock previously taken with [`acquire`][GuardLock::acquire].
    ///
    /// # Safety
    ///
    /// The caller must hold the lock, having taken it with `acquire` in the current context, and must not release it
    /// more than once per acquisition.
    unsafe fn release(&self);
}

impl GuardLock for parking_lot::RawMutex {
    fn acquire(&self) {
        self.lock();
    }

    unsafe fn release(&self) {
        // SAFETY: the caller holds the lock, as required by `GuardLock::release`.
        self.unlock()
    }
}

/// A [`GuardLock`] made from a pair of acquire and release functions.
///
/// Useful for plugging in a lock the host program already has, without having to write a dedicated type for it.
pub struct FnLock<L, U> {
    lock: L,
    unlock: U,
}

impl<L, U> FnLock<L, U>
where
    L: Fn() + Send + Sync,
    U: Fn() + Send + Sync,
{
    /// Creates a lock that calls `lock` to acquire and `unlock` to release.
    pub fn new(lock: L, unlock: U) -> Self {
        Self { lock, unlock }
    }
}

impl<L, U> GuardLock for FnLock<L, U>
where
    L: Fn() + Send + Sync,
    U: Fn() + Send + Sync,
{
    fn acquire(&self) {
        (self.lock)()
    }

    unsafe fn release(&self) {
        (self.unlock)()
    }
}

impl<L, U> fmt::Debug for FnLock<L, U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnLock").finish_non_exhaustive()
    }
}

/// Holds the host-supplied lock, if any.
pub(crate) struct ConcurrencyGuard {
    lock: RwLock<Option<Arc<dyn GuardLock>>>,
}

impl ConcurrencyGuard {
    pub const fn new() -> Self {
        Self {
            lock: const_rwlock(None),
        }
    }

    pub fn configure(&self, lock: Option<Arc<dyn GuardLock>>) {
        *self.lock.write() = lock;
    }

    /// Acquires the configured lock, if there is one.
    ///
    /// The returned token holds on to the exact lock that was acquired, so a concurrent reconfiguration never causes
    /// a release on a lock that was not taken.
    pub fn enter(&self) -> Held {
        let lock = self.lock.read().clone();
        if let Some(lock) = &lock {
            lock.acquire();
        }
        Held { lock }
    }
}

/// Proof that the configured lock is held. Releases it when dropped.
pub(crate) struct Held {
    lock: Option<Arc<dyn GuardLock>>,
}

impl Drop for Held {
    fn drop(&mut self) {
        if let Some(lock) = self.lock.take() {
            // SAFETY: a `Held` only carries a lock that `ConcurrencyGuard::enter` acquired, and it's taken out here
            // so it can't be released twice.
            unsafe { lock.release() };
        }
    }
}
