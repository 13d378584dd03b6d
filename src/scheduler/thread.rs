/*
 * Thread Management
 *
 * This module defines the Thread structure and related types
 * for the preemptive scheduler.
 */

use alloc::{boxed::Box, string::String};
use alloc::string::ToString;
use core::fmt;

use super::{InterruptContext, process::ProcessId, types::Priority};
use crate::sync::{Condvar, Mutex, MutexQueue};

/// Thread identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ThreadId(pub usize);

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Thread({})", self.0)
    }
}

/// Thread state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    Ready,
    Running,
    Blocked,
    Terminated,
}

/// Thread structure
///
/// Each thread has its own stack and interrupt context for preemptive scheduling.
/// The interrupt context stores all CPU registers + interrupt frame, allowing
/// threads to be switched at any time via timer interrupts or voluntary yields.
///
/// Threads belong to a Process and share that process's address space.
pub struct Thread {
    pub id: ThreadId,
    pub name: String,
    pub state: ThreadState,
    pub stack: Box<[u8]>,

    // Interrupt-based context for preemptive scheduling
    pub interrupt_context: InterruptContext,

    // CPU time tracking (in milliseconds)
    pub cpu_time_ms: u64,
    pub last_scheduled_time: u64,

    // Sleep tracking - if non-zero, thread is sleeping/blocked until this time.
    // Shared between plain `sleep_ms` and the sync substrate's timed
    // lock/wait variants.
    pub sleep_until_ms: u64,

    // Set by the scheduler's timeout-expiry scan when this thread was woken
    // because its deadline passed while `Blocked`, rather than by an
    // explicit `wake()`. Consumed (and cleared) by the sync primitive that
    // put the thread to sleep, to tell its caller whether it timed out.
    pub timed_out: bool,

    // Scheduling priority. Defaults from the owning process's ProcessType
    // at creation time but may be overridden per-thread.
    pub priority: Priority,

    // Guards `exit_code`/termination bookkeeping; `joiners` is signalled
    // once this thread transitions to `Terminated` so `join()` callers can
    // wait on it instead of polling.
    pub termination_lock: Mutex<()>,
    pub joiners: Condvar,

    // Mutexes currently held by this thread, in acquisition order.
    // Maintained by `Mutex::lock`/`unlock`; not consulted for priority
    // inheritance.
    pub mutex_queue: MutexQueue,

    // Process this thread belongs to
    pub process_id: ProcessId,

    // Exit code (set when thread terminates)
    // For a process's main/last thread, this becomes the process exit code
    pub exit_code: Option<i32>,
}

impl Thread {
    pub fn new(
        id: ThreadId,
        name: String,
        stack: Box<[u8]>,
        interrupt_context: InterruptContext,
        process_id: ProcessId,
        priority: Priority,
    ) -> Self {
        Self {
            id,
            name,
            state: ThreadState::Ready,
            stack,
            interrupt_context,
            cpu_time_ms: 0,
            last_scheduled_time: 0,
            sleep_until_ms: 0,
            timed_out: false,
            priority,
            termination_lock: Mutex::new(()),
            joiners: Condvar::new(),
            mutex_queue: MutexQueue::new(),
            process_id,
            exit_code: None,
        }
    }
}

impl fmt::Debug for Thread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Thread")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state)
            .field("stack_size", &self.stack.len())
            .finish()
    }
}

// ================================================================================================
// THREAD MANAGER
// ================================================================================================

use alloc::vec::Vec;
use core::sync::atomic::Ordering;

/// Thread lifecycle management
///
/// This manager provides namespaced methods for thread operations.
/// All methods internally access the global scheduler singleton using helper functions.
///
/// ThreadManager is a Zero-Sized Type (ZST) that provides organizational structure
/// without any runtime cost. It groups related thread operations under a clear namespace.
pub struct ThreadManager;

impl ThreadManager {
    /// Spawn a new thread in the default kernel process
    ///
    /// This is a convenience function for creating kernel threads without
    /// explicitly managing processes. All threads created this way belong
    /// to the default kernel process (PID 0).
    ///
    /// # Arguments
    /// * `entry_point` - Function to execute in the new thread
    /// * `name` - Human-readable name for the thread
    ///
    /// # Returns
    /// The ThreadId of the newly created thread
    pub fn spawn(entry_point: fn(), name: &str) -> ThreadId {
        super::with_scheduler_mut(|s| s.create_thread(entry_point, name, ProcessId(0)))
    }

    /// Create a thread within a specific process
    ///
    /// This is the process-aware version of spawn, allowing you to
    /// specify which process the thread should belong to.
    ///
    /// # Arguments
    /// * `entry_point` - Function to execute in the new thread
    /// * `name` - Human-readable name for the thread
    /// * `process_id` - ID of the process the thread should belong to
    ///
    /// # Returns
    /// The ThreadId of the newly created thread
    pub fn spawn_in_process(
        entry_point: fn(),
        name: &str,
        process_id: ProcessId,
    ) -> ThreadId {
        super::with_scheduler_mut(|s| s.create_thread(entry_point, name, process_id))
    }

    /// Terminate the current thread with an exit code
    ///
    /// Marks the current thread as Terminated, stores the exit code, and yields.
    /// The thread will not be scheduled again. This is the proper way for a thread
    /// to exit.
    ///
    /// **Cleanup:** Thread resources (stack, etc.) are freed on the next context
    /// switch when cleanup_terminated_threads() runs. If this is the last thread
    /// in a process, the process is marked as zombie with this thread's exit code.
    /// The zombie process remains in memory until reaped by sys_waitpid.
    ///
    /// # Arguments
    /// * `exit_code` - The exit code for the thread (becomes process exit code if last thread)
    ///
    /// # Panics
    /// Panics if called from the idle thread (thread 0).
    pub fn exit(exit_code: i32) -> ! {
        let current_id = ThreadId(super::CURRENT_THREAD_ID.load(Ordering::SeqCst));

        if current_id.0 == 0 {
            panic!("Cannot exit idle thread");
        }

        log::info!(
            "Thread {} ({}) terminating with exit code {}",
            current_id.0,
            super::get_thread_name(current_id).unwrap_or_else(|| "unknown".to_string()),
            exit_code
        );

        // Mark thread as terminated and store exit code
        // CRITICAL: Disable interrupts to prevent timer IRQ deadlock
        x86_64::instructions::interrupts::without_interrupts(|| {
            let mut sched_guard = super::SCHEDULER.lock();
            if let Some(scheduler) = sched_guard.as_mut() {
                if let Some(thread) = scheduler.threads.iter_mut().find(|t| t.id == current_id) {
                    thread.state = ThreadState::Terminated;
                    thread.exit_code = Some(exit_code);

                    // CRITICAL: Remove this thread from ready queue!
                    // The thread may have been added to the ready queue in previous
                    // scheduling cycles. If we don't remove it now, the scheduler
                    // will try to run the terminated thread, causing a page fault
                    // when accessing initrd from the wrong address space.
                    scheduler.ready_queue.retain(|&tid| tid != current_id);

                    // Wake everyone blocked in join(). Same disabled-interrupts
                    // window as the Terminated/exit_code write above, so a
                    // joiner's check-then-enqueue (see `join`) can't race past
                    // this broadcast and miss it.
                    thread.joiners.mutexless_broadcast();
                }
            }
        });

        // CRITICAL: Enable interrupts before yielding!
        // If called from syscall context (via sys_exit), interrupts are disabled by SYSCALL instruction.
        // yield_now() requires interrupts to be enabled to trigger the context switch.
        x86_64::instructions::interrupts::enable();

        // Yield to switch to another thread
        // We will never return here
        super::SchedulerManager::yield_now();

        // Should never reach here
        use crate::utils::debug::irq_log;
        irq_log::irq_log_str("exit_thread: RETURNED FROM yield_now() - THIS IS A BUG!\n");
        loop {
            x86_64::instructions::hlt();
        }
    }

    /// Wait for another thread to terminate and return its exit code.
    ///
    /// Returns `None` if `tid` has already been reaped (no longer present in
    /// the scheduler's thread table) or never existed. Blocks the caller
    /// otherwise, without polling: each attempt checks the target's state
    /// and, if it isn't `Terminated` yet, enqueues the caller onto the
    /// target's `joiners` condvar in the same disabled-interrupts step,
    /// closing the race against `exit()`'s broadcast.
    pub fn join(tid: ThreadId) -> Option<i32> {
        loop {
            enum Outcome {
                Gone,
                Done(Option<i32>),
                Wait,
            }

            let outcome = x86_64::instructions::interrupts::without_interrupts(|| {
                super::with_scheduler_mut(|s| match s.threads.iter_mut().find(|t| t.id == tid) {
                    None => Outcome::Gone,
                    Some(t) if t.state == ThreadState::Terminated => Outcome::Done(t.exit_code),
                    Some(t) => {
                        let joiner = Self::current_id();
                        let priority = t.priority;
                        t.joiners.enqueue(joiner, priority);
                        Outcome::Wait
                    }
                })
            });

            match outcome {
                Outcome::Gone => return None,
                Outcome::Done(code) => return code,
                Outcome::Wait => {
                    super::SchedulerManager::block_current();
                    super::SchedulerManager::yield_now();
                }
            }
        }
    }

    /// Get current thread ID
    ///
    /// Returns the ThreadId of the currently executing thread.
    pub fn current_id() -> ThreadId {
        ThreadId(super::CURRENT_THREAD_ID.load(Ordering::SeqCst))
    }

    /// Execute a closure with access to the current thread
    ///
    /// Provides safe read-only access to the current thread's data.
    /// Returns None if the scheduler is not initialized or thread not found.
    ///
    /// # Arguments
    /// * `f` - Closure that receives a reference to the current thread
    ///
    /// # Returns
    /// The result of the closure, or None if thread not found
    pub fn with_current<F, R>(f: F) -> Option<R>
    where
        F: FnOnce(&Thread) -> R,
    {
        let current_id = ThreadId(super::CURRENT_THREAD_ID.load(Ordering::SeqCst));
        super::with_scheduler(|s| s.threads.iter().find(|t| t.id == current_id).map(f))
    }

    /// Execute a closure with mutable access to the current thread.
    ///
    /// Same lookup as `with_current`, but for callers (e.g. the mutex
    /// queue bookkeeping) that need to mutate the `Thread` in place.
    pub fn with_current_mut<F, R>(f: F) -> Option<R>
    where
        F: FnOnce(&mut Thread) -> R,
    {
        let current_id = ThreadId(super::CURRENT_THREAD_ID.load(Ordering::SeqCst));
        super::with_scheduler_mut(|s| s.threads.iter_mut().find(|t| t.id == current_id).map(f))
    }

    /// Execute a closure with read-only access to an arbitrary thread by id.
    ///
    /// `Scheduler.threads` is `pub(super)` to the scheduler module, so
    /// callers outside it (the sync substrate's mutex/condvar bookkeeping)
    /// go through here rather than reaching into the field directly.
    pub fn with_thread<F, R>(tid: ThreadId, f: F) -> Option<R>
    where
        F: FnOnce(&Thread) -> R,
    {
        super::with_scheduler(|s| s.threads.iter().find(|t| t.id == tid).map(f))
    }

    /// As `with_thread`, but with mutable access.
    pub fn with_thread_mut<F, R>(tid: ThreadId, f: F) -> Option<R>
    where
        F: FnOnce(&mut Thread) -> R,
    {
        super::with_scheduler_mut(|s| s.threads.iter_mut().find(|t| t.id == tid).map(f))
    }

    /// Get statistics for all threads
    ///
    /// Returns a vector of ThreadStats with information about each thread
    /// including CPU time and usage percentage.
    pub fn stats() -> Vec<super::ThreadStats> {
        super::with_scheduler(|scheduler| {
            let total_uptime = crate::utils::timer::uptime_ms();
            if total_uptime == 0 {
                return Vec::new();
            }

            let current_id = ThreadId(super::CURRENT_THREAD_ID.load(Ordering::SeqCst));

            let mut stats = Vec::new();
            for thread in &scheduler.threads {
                let mut cpu_time = thread.cpu_time_ms;

                // If this is the currently running thread, add elapsed time since last scheduled
                if thread.id == current_id && thread.last_scheduled_time > 0 {
                    let current_time = crate::utils::timer::uptime_ms();
                    let elapsed = current_time.saturating_sub(thread.last_scheduled_time);
                    cpu_time = cpu_time.saturating_add(elapsed);
                }

                // Calculate CPU percentage
                let cpu_percent = if total_uptime > 0 {
                    (cpu_time * 100) / total_uptime
                } else {
                    0
                };

                stats.push(super::ThreadStats {
                    id: thread.id,
                    name: thread.name.clone(),
                    state: thread.state,
                    cpu_time_ms: cpu_time,
                    cpu_percent,
                });
            }

            stats
        })
    }
}
