/*
 * Thread Synchronization Substrate
 *
 * Mutexes, condition variables, and the wait/sleep queues they're built on.
 * Everything here is interrupt-discipline-sensitive: a thread only ever
 * leaves a queue via an explicit wake() or the scheduler's timeout scan, and
 * queue membership is only ever mutated with interrupts disabled (the
 * kernel is single-CPU, so "interrupts disabled" is the only critical
 * section primitive available below the scheduler itself).
 *
 * The `mutexless_*` condvar operations are the one piece of this substrate
 * callable from interrupt context (the IDE IRQ bottom half); everything
 * else assumes it runs on a normal thread stack with interrupts enabled at
 * entry.
 */

pub mod condvar;
pub mod mutex;
pub mod mutex_queue;
pub mod sleep_queue;
pub mod wait_queue;

pub use condvar::Condvar;
pub use mutex::{Mutex, MutexGuard};
pub use mutex_queue::{MutexHandle, MutexQueue};
pub use sleep_queue::SleepQueue;
pub use wait_queue::WaitQueue;
