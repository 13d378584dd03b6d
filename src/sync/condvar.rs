/*
 * Condition Variable
 *
 * An embedded wait queue with no lock state of its own. The mutex-paired
 * operations (`wait`, `wait_or_timeout`, `signal`, `broadcast`) give the
 * usual atomic-unlock-and-enqueue guarantee; the `mutexless_*` family is
 * for contexts that already hold their critical section via disabled
 * interrupts instead of a Mutex — the IDE command engine's top half arms a
 * command with interrupts disabled and `mutexless_wait`s on it, and the IRQ
 * handler `mutexless_signal`s the same condvar from interrupt context. That
 * pairing is the sole synchronization between the driver's top and bottom
 * halves (see `drivers::storage::ide::command`/`irq`).
 */

use core::cell::UnsafeCell;

use x86_64::instructions::interrupts::without_interrupts;

use crate::scheduler::{SchedulerManager, ThreadManager};
use super::mutex::{Mutex, MutexGuard};
use super::wait_queue::WaitQueue;

pub struct Condvar {
    waiters: UnsafeCell<WaitQueue>,
}

unsafe impl Sync for Condvar {}
unsafe impl Send for Condvar {}

impl Condvar {
    pub const fn new() -> Self {
        Self {
            waiters: UnsafeCell::new(WaitQueue::new()),
        }
    }

    #[allow(clippy::mut_from_ref)]
    fn waiters(&self) -> &mut WaitQueue {
        unsafe { &mut *self.waiters.get() }
    }

    /// Atomically unlock `guard`'s mutex and enqueue the caller; reacquires
    /// the mutex before returning.
    pub fn wait<'a, T>(&self, guard: MutexGuard<'a, T>) -> MutexGuard<'a, T> {
        let mutex: &'a Mutex<T> = Self::mutex_of(&guard);
        without_interrupts(|| {
            let tid = ThreadManager::current_id();
            let priority = SchedulerManager::current_priority();
            self.waiters().insert(tid, priority);
        });
        // Enqueue happens before the mutex is released (above), so a
        // `signal` can't be lost between unlock and enqueue.
        drop(guard);
        SchedulerManager::block_current();
        SchedulerManager::yield_now();
        mutex.lock()
    }

    /// As `wait`, but gives up at `deadline_ms`. Returns the reacquired
    /// guard plus whether the wait timed out.
    pub fn wait_or_timeout<'a, T>(
        &self,
        guard: MutexGuard<'a, T>,
        deadline_ms: u64,
    ) -> (MutexGuard<'a, T>, bool) {
        let mutex: &'a Mutex<T> = Self::mutex_of(&guard);
        let tid = ThreadManager::current_id();
        without_interrupts(|| {
            let priority = SchedulerManager::current_priority();
            self.waiters().insert(tid, priority);
        });
        drop(guard);
        SchedulerManager::block_current_until(deadline_ms);
        SchedulerManager::yield_now();

        let timed_out = SchedulerManager::take_timed_out();
        if timed_out {
            without_interrupts(|| {
                self.waiters().remove(tid);
            });
        }
        (mutex.lock(), timed_out)
    }

    /// Wake the highest-priority waiter, if any.
    pub fn signal(&self) {
        without_interrupts(|| {
            if let Some(tid) = self.waiters().pop_head() {
                SchedulerManager::wake(tid);
            }
        });
    }

    /// Wake every current waiter.
    pub fn broadcast(&self) {
        without_interrupts(|| {
            for tid in self.waiters().drain_all() {
                SchedulerManager::wake(tid);
            }
        });
    }

    /// Enqueue and block the caller without touching a mutex. Caller must
    /// already have interrupts disabled; that disabled-interrupts window is
    /// itself the critical section. The scheduler's resume path is what
    /// ultimately re-enables interrupts, matching the state they were in
    /// when this was called.
    pub fn mutexless_wait(&self) {
        let tid = ThreadManager::current_id();
        let priority = SchedulerManager::current_priority();
        self.waiters().insert(tid, priority);
        SchedulerManager::block_current();
        // Bypass `yield_now`'s "interrupts must be enabled" guard: this is
        // exactly the case where they're deliberately not.
        unsafe {
            core::arch::asm!("int 0x81", options(nostack));
        }
    }

    /// Wake the head waiter. Safe to call from interrupt context; does not
    /// itself touch the interrupt flag.
    pub fn mutexless_signal(&self) {
        if let Some(tid) = self.waiters().pop_head() {
            SchedulerManager::wake(tid);
        }
    }

    pub fn mutexless_broadcast(&self) {
        for tid in self.waiters().drain_all() {
            SchedulerManager::wake(tid);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.waiters().is_empty()
    }

    /// Low-level enqueue with no blocking and no interrupt handling of its
    /// own. For callers that need to combine "check some other condition,
    /// and if it's not yet true, enqueue" as a single atomic step alongside
    /// their own scheduler-state check (e.g. `ThreadManager::join`, which
    /// must check-and-enqueue under the same disabled-interrupts window
    /// `exit()` uses to set `Terminated` and broadcast, or a wakeup can be
    /// missed between the check and the enqueue).
    pub(crate) fn enqueue(&self, tid: crate::scheduler::ThreadId, priority: crate::scheduler::Priority) {
        self.waiters().insert(tid, priority);
    }

    fn mutex_of<'a, T>(guard: &MutexGuard<'a, T>) -> &'a Mutex<T> {
        guard.mutex_ref()
    }
}

impl Default for Condvar {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::{Priority, ThreadId, ThreadManager, ThreadState};

    fn noop() {}

    fn block(tid: ThreadId) {
        ThreadManager::with_thread_mut(tid, |t| t.state = ThreadState::Blocked);
    }

    fn state_of(tid: ThreadId) -> ThreadState {
        ThreadManager::with_thread(tid, |t| t.state).unwrap()
    }

    #[test]
    fn enqueue_tracks_is_empty() {
        SchedulerManager::init();
        let cv = Condvar::new();
        assert!(cv.is_empty());
        let tid = ThreadManager::spawn(noop, "waiter");
        cv.enqueue(tid, Priority::NORMAL);
        assert!(!cv.is_empty());
    }

    #[test]
    fn mutexless_signal_wakes_highest_priority_waiter_first() {
        SchedulerManager::init();
        SchedulerManager::enable();
        let cv = Condvar::new();
        let low = ThreadManager::spawn(noop, "low");
        let high = ThreadManager::spawn(noop, "high");
        block(low);
        block(high);
        cv.enqueue(low, Priority::MIN);
        cv.enqueue(high, Priority::CRITICAL);

        cv.mutexless_signal();
        assert_eq!(state_of(high), ThreadState::Ready);
        assert_eq!(state_of(low), ThreadState::Blocked);
        assert!(!cv.is_empty());

        cv.mutexless_signal();
        assert_eq!(state_of(low), ThreadState::Ready);
        assert!(cv.is_empty());
    }

    #[test]
    fn mutexless_broadcast_wakes_every_waiter_and_drains_queue() {
        SchedulerManager::init();
        SchedulerManager::enable();
        let cv = Condvar::new();
        let a = ThreadManager::spawn(noop, "a");
        let b = ThreadManager::spawn(noop, "b");
        block(a);
        block(b);
        cv.enqueue(a, Priority::NORMAL);
        cv.enqueue(b, Priority::NORMAL);

        cv.mutexless_broadcast();

        assert!(cv.is_empty());
        assert_eq!(state_of(a), ThreadState::Ready);
        assert_eq!(state_of(b), ThreadState::Ready);
    }
}
