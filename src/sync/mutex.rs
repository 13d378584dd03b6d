/*
 * Scheduler-Integrated Mutex
 *
 * Blocking mutual exclusion built directly on the scheduler's block/wake
 * primitives rather than busy-waiting. `locked` plus an embedded WaitQueue,
 * matching the data model this substrate is specified against: unlocking
 * with waiters present hands ownership straight to the dequeued head
 * (locked never goes false in that case) so there is no window where the
 * mutex reads as free while a waiter is still owed the lock.
 *
 * All bookkeeping (`locked`, the wait queue) is only ever touched with
 * interrupts disabled, which is this kernel's sole mutual-exclusion
 * primitive below the scheduler (single-CPU, so nothing else can run
 * concurrently while interrupts are off).
 *
 * `lock`/`unlock` also add/remove this mutex from the owning thread's
 * mutex queue (§4.2/§4.3) — bookkeeping only, not consulted here for
 * priority inheritance.
 */

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};

use x86_64::instructions::interrupts::without_interrupts;

use crate::scheduler::{SchedulerManager, ThreadId, ThreadManager};
use super::mutex_queue::MutexHandle;
use super::wait_queue::WaitQueue;

struct MutexState {
    locked: bool,
    waiters: WaitQueue,
}

pub struct Mutex<T> {
    state: UnsafeCell<MutexState>,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Sync for Mutex<T> {}
unsafe impl<T: Send> Send for Mutex<T> {}

impl<T> Mutex<T> {
    pub const fn new(value: T) -> Self {
        Self {
            state: UnsafeCell::new(MutexState {
                locked: false,
                waiters: WaitQueue::new(),
            }),
            data: UnsafeCell::new(value),
        }
    }

    #[allow(clippy::mut_from_ref)]
    fn state(&self) -> &mut MutexState {
        unsafe { &mut *self.state.get() }
    }

    /// This mutex's identity in a thread's mutex queue, independent of `T`.
    fn handle(&self) -> MutexHandle {
        MutexHandle(self as *const Self as *const () as usize)
    }

    /// Record this mutex as held by the current thread, per §4.2's mutex
    /// queue (insertion order, not consulted for priority inheritance).
    fn record_ownership(&self) {
        let handle = self.handle();
        without_interrupts(|| {
            ThreadManager::with_current_mut(|t| t.mutex_queue.insert(handle));
        });
    }

    /// Acquire the lock, blocking the calling thread if it's held.
    ///
    /// # Panics
    /// Panics if called from the idle thread, same as the scheduler's
    /// underlying `block_current` (there is nothing else to run it back
    /// in).
    pub fn lock(&self) -> MutexGuard<'_, T> {
        let acquired = self.try_acquire_or_enqueue();
        if !acquired {
            SchedulerManager::block_current();
            SchedulerManager::yield_now();
            // Woken by unlock()'s direct hand-off: we already own the lock.
        }
        self.record_ownership();
        MutexGuard { mutex: self }
    }

    /// Acquire the lock, or give up once `deadline_ms` (on the scheduler's
    /// uptime clock) passes. Returns `None` on timeout.
    pub fn lock_or_timeout(&self, deadline_ms: u64) -> Option<MutexGuard<'_, T>> {
        let acquired = self.try_acquire_or_enqueue();
        if acquired {
            self.record_ownership();
            return Some(MutexGuard { mutex: self });
        }

        SchedulerManager::block_current_until(deadline_ms);
        SchedulerManager::yield_now();

        if SchedulerManager::take_timed_out() {
            let tid = ThreadManager::current_id();
            let still_queued = without_interrupts(|| self.state().waiters.remove(tid));
            if still_queued {
                return None;
            }
            // Lost the race: unlock() already dequeued and handed us the
            // lock right as the deadline fired. Take it rather than drop it.
        }
        self.record_ownership();
        Some(MutexGuard { mutex: self })
    }

    fn try_acquire_or_enqueue(&self) -> bool {
        without_interrupts(|| {
            let state = self.state();
            if !state.locked {
                state.locked = true;
                true
            } else {
                let tid = ThreadManager::current_id();
                let priority = SchedulerManager::current_priority();
                state.waiters.insert(tid, priority);
                false
            }
        })
    }

    fn unlock(&self) {
        without_interrupts(|| {
            let state = self.state();
            match state.waiters.pop_head() {
                Some(tid) => {
                    // Direct hand-off: `locked` stays true, ownership moves
                    // to `tid` without ever reading as unlocked.
                    SchedulerManager::wake(tid);
                }
                None => state.locked = false,
            }
        });
    }

    fn unlock_for(&self, tid: ThreadId) {
        let handle = self.handle();
        without_interrupts(|| {
            ThreadManager::with_thread_mut(tid, |thread| thread.mutex_queue.remove(handle));
        });
        self.unlock();
    }
}

pub struct MutexGuard<'a, T> {
    mutex: &'a Mutex<T>,
}

impl<'a, T> MutexGuard<'a, T> {
    /// Borrow of the mutex this guard locks, for `Condvar::wait` to unlock
    /// and later relock without consuming the guard type itself.
    pub(super) fn mutex_ref(&self) -> &'a Mutex<T> {
        self.mutex
    }
}

impl<'a, T> Deref for MutexGuard<'a, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.mutex.data.get() }
    }
}

impl<'a, T> DerefMut for MutexGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<'a, T> Drop for MutexGuard<'a, T> {
    fn drop(&mut self) {
        self.mutex.unlock_for(ThreadManager::current_id());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uncontended_lock_unlock() {
        // lock()/unlock() record/clear mutex-queue ownership on whatever
        // thread the scheduler considers current, so a scheduler instance
        // must exist even though this test never spawns one of its own.
        SchedulerManager::init();
        let m = Mutex::new(5);
        {
            let mut guard = m.lock();
            assert_eq!(*guard, 5);
            *guard = 6;
        }
        assert_eq!(*m.lock(), 6);
    }
}
