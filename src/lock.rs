//! Reentrant-acquire wrapper shared by the pool, connections, and statements.
//!
//! A statement holds its connection's lock for its whole lifetime, and the
//! connection's own transaction logic acquires the same lock underneath it.
//! [`RecursiveLock`] lets that nesting succeed without self-deadlock while
//! other owners still block on the underlying primitive.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

/// Recover a usable guard even if another thread panicked while holding the
/// lock; all protected state in this crate stays consistent across unwinds.
pub(crate) fn relock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A mutex-like resource that can be locked and unlocked from independent
/// call sites, unlike the scoped `std::sync::MutexGuard`.
pub trait RawLock: Send + Sync {
    /// Block until the lock is held.
    fn lock(&self);
    /// Block up to `timeout`; returns whether the lock was acquired.
    fn lock_timeout(&self, timeout: Duration) -> bool;
    /// Release a held lock.
    fn unlock(&self);
}

/// Straightforward [`RawLock`] built from a flag, a mutex, and a condvar.
#[derive(Default)]
pub struct ManualMutex {
    locked: Mutex<bool>,
    released: Condvar,
}

impl ManualMutex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl RawLock for ManualMutex {
    fn lock(&self) {
        let mut locked = relock(&self.locked);
        while *locked {
            locked = self
                .released
                .wait(locked)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *locked = true;
    }

    fn lock_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut locked = relock(&self.locked);
        while *locked {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self
                .released
                .wait_timeout(locked, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            locked = guard;
        }
        *locked = true;
        true
    }

    fn unlock(&self) {
        let mut locked = relock(&self.locked);
        *locked = false;
        self.released.notify_one();
    }
}

/// Reentrant acquire/release adapter over a [`RawLock`] target.
///
/// An internal signed counter tracks nesting depth: only the 0→1 transition
/// forwards an acquire to the target, and only the 1→0 transition forwards a
/// release. The counter is signed deliberately so an excess of releases can
/// never wrap into a false "still locked" state. With no target bound, every
/// operation is a no-op, which permits default construction before the target
/// is known.
pub struct RecursiveLock {
    target: Mutex<Option<Arc<dyn RawLock>>>,
    count: AtomicI32,
    owner: Mutex<Option<ThreadId>>,
}

impl Default for RecursiveLock {
    fn default() -> Self {
        Self {
            target: Mutex::new(None),
            count: AtomicI32::new(0),
            owner: Mutex::new(None),
        }
    }
}

impl RecursiveLock {
    /// Bind to `target` and immediately acquire it once.
    #[must_use]
    pub fn new(target: Arc<dyn RawLock>) -> Self {
        let lock = Self::unbound();
        *relock(&lock.target) = Some(target);
        lock.acquire();
        lock
    }

    /// Construct without a target; every operation no-ops until
    /// [`RecursiveLock::register`] binds one.
    #[must_use]
    pub fn unbound() -> Self {
        Self::default()
    }

    /// Bind to `target` without acquiring. Used for locks shared by several
    /// nested owners over their lifetimes rather than one scoped holder.
    #[must_use]
    pub fn for_target(target: Arc<dyn RawLock>) -> Self {
        let lock = Self::unbound();
        *relock(&lock.target) = Some(target);
        lock
    }

    /// Bind to a target and acquire it, but only if no target is bound yet.
    pub fn register(&self, target: Arc<dyn RawLock>) {
        {
            let mut bound = relock(&self.target);
            if bound.is_some() {
                return;
            }
            *bound = Some(target);
        }
        self.acquire();
    }

    fn bound_target(&self) -> Option<Arc<dyn RawLock>> {
        relock(&self.target).clone()
    }

    /// Acquire, blocking other owners. Re-entry by the current owner only
    /// bumps the counter.
    pub fn acquire(&self) {
        let Some(target) = self.bound_target() else {
            return;
        };
        let me = thread::current().id();
        if *relock(&self.owner) == Some(me) {
            self.count.fetch_add(1, Ordering::AcqRel);
            return;
        }
        target.lock();
        *relock(&self.owner) = Some(me);
        // Excess releases may have driven the count negative while nobody
        // held the target; a forwarded acquire always starts at depth one so
        // the matching release reaches the target again.
        self.count.store(1, Ordering::Release);
    }

    /// Acquire with a timeout on the initial (non-nested) acquisition.
    /// Returns whether the lock is held afterwards.
    pub fn acquire_timeout(&self, timeout: Duration) -> bool {
        let Some(target) = self.bound_target() else {
            return true;
        };
        let me = thread::current().id();
        if *relock(&self.owner) == Some(me) {
            self.count.fetch_add(1, Ordering::AcqRel);
            return true;
        }
        if !target.lock_timeout(timeout) {
            return false;
        }
        *relock(&self.owner) = Some(me);
        self.count.store(1, Ordering::Release);
        true
    }

    /// Release one level of nesting; forwards to the target only on the 1→0
    /// transition. Releasing below zero never forwards again.
    pub fn release(&self) {
        let Some(target) = self.bound_target() else {
            return;
        };
        let previous = self.count.fetch_sub(1, Ordering::AcqRel);
        if previous == 1 {
            *relock(&self.owner) = None;
            target.unlock();
        }
    }

    /// Current nesting depth; may be negative after unbalanced releases.
    #[must_use]
    pub fn depth(&self) -> i32 {
        self.count.load(Ordering::Acquire)
    }

    /// Scoped acquisition; releases on every exit path.
    #[must_use]
    pub fn guard(&self) -> RecursiveGuard<'_> {
        self.acquire();
        RecursiveGuard { lock: self }
    }
}

impl Drop for RecursiveLock {
    fn drop(&mut self) {
        // However unbalanced the callers were, at most one forwarded release.
        if self.count.load(Ordering::Acquire) > 0 {
            if let Some(target) = self.bound_target() {
                *relock(&self.owner) = None;
                target.unlock();
            }
        }
    }
}

/// RAII handle pairing one acquire with exactly one release.
pub struct RecursiveGuard<'a> {
    lock: &'a RecursiveLock,
}

impl Drop for RecursiveGuard<'_> {
    fn drop(&mut self) {
        self.lock.release();
    }
}
