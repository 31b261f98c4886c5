//! Single-slot async lock guarding credential refresh.

use tokio::sync::watch;

/// Exclusive lock with a "wait without acquiring" operation.
///
/// The locked flag lives in a `watch` channel so non-holders can wait for
/// release without taking the slot themselves.
#[derive(Debug)]
pub struct RefreshLock {
    locked: watch::Sender<bool>,
}

/// Holds the lock; dropping it releases the slot and wakes waiters.
#[must_use = "the lock is released as soon as the guard is dropped"]
#[derive(Debug)]
pub struct RefreshGuard<'a> {
    lock: &'a RefreshLock,
}

impl RefreshLock {
    pub fn new() -> Self {
        let (locked, _) = watch::channel(false);
        Self { locked }
    }

    #[inline]
    pub fn is_locked(&self) -> bool {
        *self.locked.borrow()
    }

    /// Take the lock if it is free.
    pub fn try_acquire(&self) -> Option<RefreshGuard<'_>> {
        let acquired = self.locked.send_if_modified(|locked| {
            if *locked {
                false
            } else {
                *locked = true;
                true
            }
        });
        acquired.then_some(RefreshGuard { lock: self })
    }

    /// Wait until the lock is free, then take it.
    pub async fn acquire(&self) -> RefreshGuard<'_> {
        loop {
            if let Some(guard) = self.try_acquire() {
                return guard;
            }
            self.wait_for_unlock().await;
        }
    }

    /// Wait until no one holds the lock, without taking it.
    pub async fn wait_for_unlock(&self) {
        let mut rx = self.locked.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|locked| !*locked).await;
    }
}

impl Default for RefreshLock {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        self.lock.locked.send_replace(false);
    }
}
