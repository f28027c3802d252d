use std::{fmt, marker::PhantomData};

use parking_lot::{RawMutex, lock_api::RawMutex as RawMutexApi};

/// The lock shared by every instance in the process.
pub(crate) static GIL: Gil = Gil::new();

/// Global interpreter lock.
///
/// Exactly one thread executes language code at a time. A fiber releases
/// it around blocking work and re-acquires it before touching any value
/// cell again.
pub struct Gil {
    raw: RawMutex,
}

impl Gil {
    pub const fn new() -> Self {
        Self {
            raw: <RawMutex as RawMutexApi>::INIT,
        }
    }

    pub fn acquire(&self) -> GilGuard<'_> {
        self.raw.lock();
        GilGuard {
            gil: self,
            _marker: PhantomData,
        }
    }

    pub fn try_acquire(&self) -> Option<GilGuard<'_>> {
        self.raw.try_lock().then(|| GilGuard {
            gil: self,
            _marker: PhantomData,
        })
    }

    pub fn is_held(&self) -> bool {
        self.raw.is_locked()
    }

    /// Runs `f` with the lock released and re-acquires it afterwards, also
    /// when `f` unwinds.
    ///
    /// # Safety
    /// The calling thread must hold the lock.
    pub(crate) unsafe fn released<T>(&self, f: impl FnOnce() -> T) -> T {
        debug_assert!(self.raw.is_locked());
        // SAFETY: the caller holds the lock
        unsafe { self.raw.unlock() };
        let _relock = Relock(self);
        f()
    }
}

impl Default for Gil {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Gil {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gil").field("held", &self.is_held()).finish()
    }
}

/// Proof that the current thread holds the GIL. Not `Send`: the lock must
/// be released on the thread that took it.
#[must_use]
pub struct GilGuard<'a> {
    gil: &'a Gil,
    _marker: PhantomData<*const ()>,
}

impl GilGuard<'_> {
    /// Lets other fibers run while `f` executes.
    pub fn unlocked<T>(&mut self, f: impl FnOnce() -> T) -> T {
        // SAFETY: the guard proves the lock is held by this thread
        unsafe { self.gil.released(f) }
    }
}

impl Drop for GilGuard<'_> {
    fn drop(&mut self) {
        // SAFETY: the guard was created by locking on this thread
        unsafe { self.gil.raw.unlock() };
    }
}

struct Relock<'a>(&'a Gil);

impl Drop for Relock<'_> {
    fn drop(&mut self) {
        self.0.raw.lock();
    }
}
