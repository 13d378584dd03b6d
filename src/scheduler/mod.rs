/*
 * Scheduler Subsystem
 *
 * The scheduler subsystem owns threads, processes and the policy/mechanism
 * split used to pick which thread runs next. It is split into:
 *
 *  - types/events/traits: the Scheduler (policy) and KernelSchedCtx
 *    (mechanism) traits that decouple "what to run" from "how to switch".
 *  - scheduler: the mechanism state (threads, processes, ready queue).
 *  - sched_core: per-CPU bookkeeping plus the active policy.
 *  - context: the KernelSchedCtx implementation handed to policies.
 *  - policies: concrete Scheduler implementations (round-robin today).
 *  - thread / process: the kernel-visible Thread/Process handles and the
 *    ThreadManager/ProcessManager facades used by the rest of the kernel.
 *
 * This file is glue: it owns the global scheduler state, the boot/normal
 * mode transition, and the low-level interrupt-driven context switch path
 * (the naked-asm trampolines and `schedule_from_interrupt`).
 */

pub mod context;
pub mod events;
pub mod policies;
pub mod process;
pub mod sched_core;
#[allow(clippy::module_inception)]
pub mod scheduler;
pub mod scheduler_manager;
pub mod thread;
pub mod traits;
pub mod types;

use core::arch::naked_asm;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use alloc::string::String;
use alloc::vec::Vec;
use spin::Mutex;

pub use context::{SchedContext, create_sched_context};
pub use events::SchedEvent;
pub use process::{Process, ProcessId, ProcessManager, ProcessState};
pub use sched_core::{PerCpuSchedState, SchedulerCore};
pub use scheduler::{InterruptContext, InterruptFrame};
pub use scheduler_manager::SchedulerManager;
pub use thread::{Thread, ThreadId, ThreadManager, ThreadState};
pub use traits::{KernelSchedCtx, Scheduler};
pub use types::{BlockReason, CpuId, DispatchDecision, Priority, SchedClass, TimeSliceTicks};

/// Size of each kernel thread's stack.
pub const THREAD_STACK_SIZE: usize = 64 * 1024;

/// Hard bound on the number of live threads. Chosen to keep the scheduler's
/// linear scans and the sync substrate's wait-queue vectors cheap without
/// reaching for a tree structure.
pub const MAX_THREADS: usize = 64;

/// Boot vs. normal scheduling mode.
///
/// During boot, only the processes registered as critical via
/// `SchedulerManager::register_critical` are eligible to run; every other
/// thread sits in the ready queue untouched. Once every critical process has
/// signaled ready the scheduler transitions to `Normal` and all threads
/// compete for the CPU.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SchedulerMode {
    Boot { critical_count: u32, ready_count: u32 },
    Normal,
}

/// Coarse classification of a process, used to derive a default thread
/// priority and to decide boot-mode eligibility.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ProcessType {
    /// Must be ready before the scheduler leaves boot mode.
    Critical,
    /// Kernel-provided service, not required for the boot gate.
    System,
    /// Ordinary thread.
    User,
}

impl ProcessType {
    /// Default scheduling priority for processes of this type.
    pub fn priority(&self) -> u32 {
        match self {
            ProcessType::Critical => Priority::CRITICAL.0 as u32,
            ProcessType::System => Priority::SYSTEM.0 as u32,
            ProcessType::User => Priority::NORMAL.0 as u32,
        }
    }
}

/// Lifecycle state of a process during startup.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ProcessInitState {
    Initializing,
    Ready,
}

/// A kernel subsystem that performs one-time initialization during boot.
///
/// `SchedulerManager` implements this to set up the global scheduler state;
/// other subsystems that need an explicit init step can adopt it too.
pub trait KernelComponent {
    fn init();
}

static SCHEDULER: Mutex<Option<scheduler::Scheduler>> = Mutex::new(None);
static SCHEDULER_CORE: Mutex<Option<SchedulerCore>> = Mutex::new(None);

static CURRENT_THREAD_ID: AtomicUsize = AtomicUsize::new(0);
static SCHEDULER_ENABLED: AtomicBool = AtomicBool::new(false);
static PREEMPTION_DISABLED: AtomicBool = AtomicBool::new(false);

/// Run `f` with shared access to the scheduler's thread/process state.
pub fn with_scheduler<F, R>(f: F) -> R
where
    F: FnOnce(&scheduler::Scheduler) -> R,
{
    let guard = SCHEDULER.lock();
    let sched = guard.as_ref().expect("scheduler not initialized");
    f(sched)
}

/// Run `f` with exclusive access to the scheduler's thread/process state.
pub fn with_scheduler_mut<F, R>(f: F) -> R
where
    F: FnOnce(&mut scheduler::Scheduler) -> R,
{
    let mut guard = SCHEDULER.lock();
    let sched = guard.as_mut().expect("scheduler not initialized");
    f(sched)
}

/// Run `f` with exclusive access to both the scheduler state and the active
/// policy/per-CPU core. Used for anything that needs to report a
/// `SchedEvent` to the policy (block, wake, exit, mode change, ...).
pub fn with_scheduler_and_core<F, R>(f: F) -> R
where
    F: FnOnce(&mut scheduler::Scheduler, &mut SchedulerCore) -> R,
{
    let mut sched_guard = SCHEDULER.lock();
    let mut core_guard = SCHEDULER_CORE.lock();
    let sched = sched_guard.as_mut().expect("scheduler not initialized");
    let core = core_guard.as_mut().expect("scheduler core not initialized");
    f(sched, core)
}

/// Look up a thread's name, if it still exists.
pub fn get_thread_name(tid: ThreadId) -> Option<String> {
    with_scheduler(|s| s.threads.iter().find(|t| t.id == tid).map(|t| t.name.clone()))
}

/// ID of the thread currently executing on the BSP.
pub fn current_thread_id() -> ThreadId {
    ThreadId(CURRENT_THREAD_ID.load(Ordering::SeqCst))
}

/// Whether preemptive scheduling has been enabled (see `SchedulerManager::enable`).
pub fn is_scheduler_enabled() -> bool {
    SCHEDULER_ENABLED.load(Ordering::SeqCst)
}

/// Per-thread runtime statistics, exposed for diagnostics.
#[derive(Debug, Clone)]
pub struct ThreadStats {
    pub id: ThreadId,
    pub name: String,
    pub state: ThreadState,
    pub cpu_time_ms: u64,
}

/// Snapshot of every thread's state, for diagnostics.
pub fn get_thread_stats() -> Vec<ThreadStats> {
    with_scheduler(|s| {
        s.threads
            .iter()
            .map(|t| ThreadStats {
                id: t.id,
                name: t.name.clone(),
                state: t.state,
                cpu_time_ms: t.cpu_time_ms,
            })
            .collect()
    })
}

/// Entry point for the idle thread.
///
/// Runs whenever the policy has no runnable thread to dispatch. Halts the
/// CPU between interrupts to avoid spinning.
pub extern "C" fn idle_thread_main() -> ! {
    loop {
        x86_64::instructions::hlt();
    }
}

/// Core interrupt-driven rescheduling logic.
///
/// Called from both the voluntary-yield (`int 0x81`) and preemptive-timer
/// interrupt trampolines with a pointer to the interrupted thread's saved
/// context. Reports the appropriate event to the active policy, asks it for
/// a dispatch decision, performs the thread switch bookkeeping, and returns
/// a pointer to the context that should be restored (possibly the same one,
/// if nothing else is runnable).
///
/// # Safety
/// `current_ctx_ptr` must point at a valid, live `InterruptContext` saved by
/// the calling trampoline.
#[unsafe(no_mangle)]
extern "C" fn schedule_from_interrupt(current_ctx_ptr: *const InterruptContext) -> *const InterruptContext {
    if PREEMPTION_DISABLED.load(Ordering::SeqCst) || !SCHEDULER_ENABLED.load(Ordering::SeqCst) {
        return current_ctx_ptr;
    }

    let current_id = current_thread_id();

    with_scheduler_and_core(|sched, core| {
        // Persist the interrupted thread's context and reclaim any threads
        // that exited since the last switch.
        if let Some(cur) = sched.get_thread_mut(current_id) {
            if cur.state == ThreadState::Running {
                cur.interrupt_context = unsafe { *current_ctx_ptr };
                cur.state = ThreadState::Ready;
            }
        }
        sched.cleanup_terminated_threads(current_id, false);

        // Natural sleep expiry and timed lock/condvar waits don't generate
        // their own wake event anywhere else; this is the only place that
        // notices a deadline has passed and reports it to the policy.
        let now_ms = crate::utils::timer::uptime_ms();
        let expired = sched.expire_timeouts(now_ms);

        let mut ctx = context::SchedContext::with_core(sched, core, CpuId::BSP);
        for tid in expired {
            core.thread_woke(&mut ctx, tid, BlockReason::Other);
        }
        core.on_tick(&mut ctx, CpuId::BSP);
        let decision = core.reschedule(&mut ctx, CpuId::BSP);

        let next_id = match decision {
            Some(tid) => tid,
            None => {
                // Nothing runnable; keep executing whatever the trampoline
                // interrupted (typically the idle thread).
                if let Some(cur) = sched.get_thread_mut(current_id) {
                    cur.state = ThreadState::Running;
                }
                return current_ctx_ptr;
            }
        };

        if let Some(next) = sched.get_thread_mut(next_id) {
            next.state = ThreadState::Running;
            next.last_scheduled_time = crate::utils::timer::uptime_ms();
            let ptr = &next.interrupt_context as *const InterruptContext;
            CURRENT_THREAD_ID.store(next_id.0, Ordering::SeqCst);
            return ptr;
        }

        current_ctx_ptr
    })
}

/// Voluntary-yield trampoline, entered via `int 0x81`.
///
/// Saves every general-purpose register, hands the saved frame to
/// `schedule_from_interrupt`, restores whichever context it selects, and
/// `iretq`s back out.
#[unsafe(naked)]
pub unsafe extern "C" fn yield_interrupt_handler() {
    naked_asm!(
        "push rax",
        "push rbx",
        "push rcx",
        "push rdx",
        "push rsi",
        "push rdi",
        "push rbp",
        "push r8",
        "push r9",
        "push r10",
        "push r11",
        "push r12",
        "push r13",
        "push r14",
        "push r15",
        "mov rdi, rsp",
        "call {schedule}",
        "mov rsp, rax",
        "pop r15",
        "pop r14",
        "pop r13",
        "pop r12",
        "pop r11",
        "pop r10",
        "pop r9",
        "pop r8",
        "pop rbp",
        "pop rdi",
        "pop rsi",
        "pop rdx",
        "pop rcx",
        "pop rbx",
        "pop rax",
        "iretq",
        schedule = sym schedule_from_interrupt,
    );
}

/// Preemptive timer-tick trampoline, entered on IRQ0.
///
/// Same register save/restore shape as `yield_interrupt_handler`, but also
/// acknowledges the timer interrupt on the PIC before returning.
#[unsafe(naked)]
pub unsafe extern "C" fn preemptive_timer_interrupt_handler() {
    naked_asm!(
        "push rax",
        "push rbx",
        "push rcx",
        "push rdx",
        "push rsi",
        "push rdi",
        "push rbp",
        "push r8",
        "push r9",
        "push r10",
        "push r11",
        "push r12",
        "push r13",
        "push r14",
        "push r15",
        "call {tick}",
        "mov rdi, rsp",
        "call {schedule}",
        "mov rsp, rax",
        "mov al, 0x20",
        "out 0x20, al",
        "pop r15",
        "pop r14",
        "pop r13",
        "pop r12",
        "pop r11",
        "pop r10",
        "pop r9",
        "pop r8",
        "pop rbp",
        "pop rdi",
        "pop rsi",
        "pop rdx",
        "pop rcx",
        "pop rbx",
        "pop rax",
        "iretq",
        tick = sym crate::utils::timer::on_timer_interrupt,
        schedule = sym schedule_from_interrupt,
    );
}
