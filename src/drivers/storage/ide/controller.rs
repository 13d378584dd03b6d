/*
 * Controller and Device Model (C7)
 *
 * One `Controller` per IDE channel (two per PCI function, or two legacy ISA
 * channels with no PCI function at all). Each owns a fixed-capacity pool of
 * `CommandQueueEntry` slots linked by an `i32` freelist — no heap churn on
 * the hot path, matching the original's array-of-structs-plus-intrusive-
 * index-freelist (§11).
 *
 * Command issuing is serialized per controller via `command_lock`: only the
 * entry currently holding it may have its registers programmed, which is
 * what makes "one in-flight command per controller" (§4.9) hold even though
 * the entry pool itself (§13, sized 2) lets a second issuer queue behind it
 * instead of being turned away.
 */

use alloc::string::String;
use alloc::vec::Vec;

use x86_64::instructions::interrupts::without_interrupts;

use crate::sync::{Condvar, Mutex};
use super::config::{IDE_ATAPI_PACKET_LENGTH, IDE_DEVICES_PER_CONTROLLER, MAX_NB_IDE_CMD_QUEUE_ENTRIES};
use super::registers::TaskFile;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Absent,
    Ata,
    Atapi,
    Sata,
    Satapi,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Chs {
    pub cylinders: u16,
    pub heads: u16,
    pub sectors: u16,
}

/// One device slot on a controller. `kind == Absent` for an empty slot;
/// every other field is meaningless until probe (C8) fills it in.
pub struct Device {
    pub slot: usize,
    pub kind: DeviceKind,
    pub serial: String,
    pub firmware: String,
    pub model: String,
    pub chs: Chs,
    pub total_sectors: u64,
    pub chs_total_sectors: Option<u32>,
    pub removable: bool,
    pub hdd: bool,
    pub power_down_capable: bool,
}

impl Device {
    pub fn absent(slot: usize) -> Self {
        Self {
            slot,
            kind: DeviceKind::Absent,
            serial: String::new(),
            firmware: String::new(),
            model: String::new(),
            chs: Chs::default(),
            total_sectors: 0,
            chs_total_sectors: None,
            removable: false,
            hdd: false,
            power_down_capable: false,
        }
    }

    pub fn is_present(&self) -> bool {
        self.kind != DeviceKind::Absent
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandTag {
    ReadSectors,
    WriteSectors,
    FlushCache,
    SendPacket,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketDirection {
    In,
    Out,
}

/// Internal completion classification (§7); collapsed to `IdeError` at the
/// public API boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdeErrorKind {
    BadBlock,
    Uncorrectable,
    IdNotFound,
    Aborted,
    Track0NotFound,
    AddressMarkNotFound,
}

/// Public error taxonomy (§7, §10.2). `NoError` is folded into `Result::Ok`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdeError {
    UnknownError,
}

/// A slot in the controller's fixed command-queue pool. Either on the
/// freelist (`tag.is_none()`) or owned jointly by one issuer thread and the
/// IRQ handler (`refcount == 2`), per §3's invariant; each path decrements
/// exactly once and the entry returns to the freelist iff the count hits 0.
pub struct CommandQueueEntry {
    pub next_free: i32,
    pub refcount: u8,
    pub device_slot: usize,
    pub tag: Option<CommandTag>,
    /// Data-transfer buffer for ReadSectors/WriteSectors/SendPacket. Safety:
    /// valid only while `tag.is_some()`; the owning thread's stack (or a
    /// heap buffer it controls) outlives the wait because the thread is
    /// merely blocked, not destroyed, while the IRQ handler writes through it.
    pub buf: *mut u8,
    pub total_sectors: u32,
    pub sectors_done: u32,
    pub packet: [u8; IDE_ATAPI_PACKET_LENGTH],
    pub packet_bufsz: usize,
    pub packet_offset: usize,
    pub packet_direction: PacketDirection,
    /// Set by the IRQ handler on the terminal interrupt for this entry;
    /// `Controller::wait_for_completion` polls this under the controller's
    /// shared `completion` condvar rather than each entry owning its own.
    pub finished: bool,
    pub error: Option<IdeErrorKind>,
}

unsafe impl Send for CommandQueueEntry {}

impl CommandQueueEntry {
    fn empty(next_free: i32) -> Self {
        Self {
            next_free,
            refcount: 0,
            device_slot: 0,
            tag: None,
            buf: core::ptr::null_mut(),
            total_sectors: 0,
            sectors_done: 0,
            packet: [0; IDE_ATAPI_PACKET_LENGTH],
            packet_bufsz: 0,
            packet_offset: 0,
            packet_direction: PacketDirection::In,
            finished: false,
            error: None,
        }
    }
}

/// Fixed-size entry array plus an `i32` freelist head (`-1` = empty),
/// matching the original's array-plus-intrusive-index-freelist (§11).
pub struct EntryPool {
    entries: Vec<CommandQueueEntry>,
    free_head: i32,
}

impl EntryPool {
    fn new() -> Self {
        let mut entries = Vec::with_capacity(MAX_NB_IDE_CMD_QUEUE_ENTRIES);
        for i in 0..MAX_NB_IDE_CMD_QUEUE_ENTRIES {
            let next = if i + 1 < MAX_NB_IDE_CMD_QUEUE_ENTRIES { i as i32 + 1 } else { -1 };
            entries.push(CommandQueueEntry::empty(next));
        }
        Self { entries, free_head: 0 }
    }

    fn try_pop(&mut self) -> Option<usize> {
        if self.free_head < 0 {
            return None;
        }
        let idx = self.free_head as usize;
        self.free_head = self.entries[idx].next_free;
        self.entries[idx].refcount = 2; // issuer + IRQ handler
        Some(idx)
    }

    fn push(&mut self, idx: usize) {
        let entry = &mut self.entries[idx];
        entry.tag = None;
        entry.buf = core::ptr::null_mut();
        entry.error = None;
        entry.finished = false;
        entry.next_free = self.free_head;
        self.free_head = idx as i32;
    }

    pub fn get(&self, idx: usize) -> &CommandQueueEntry {
        &self.entries[idx]
    }

    pub fn get_mut(&mut self, idx: usize) -> &mut CommandQueueEntry {
        &mut self.entries[idx]
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    fn free_count(&self) -> usize {
        let mut n = 0;
        let mut cur = self.free_head;
        while cur >= 0 {
            n += 1;
            cur = self.entries[cur as usize].next_free;
        }
        n
    }
}

pub struct Controller {
    pub id: usize,
    pub command_base: u16,
    pub control_base: u16,
    pub bus_master_base: u16,
    pub irq: u8,
    pub serial: bool,
    pub enabled: bool,
    pub task_file: Mutex<TaskFile>,
    pub devices: [Device; IDE_DEVICES_PER_CONTROLLER],
    entries: Mutex<EntryPool>,
    freelist_condvar: Condvar,
    /// Serializes whole command episodes so only one entry's registers are
    /// ever being programmed at a time; the pool (sized 2) lets a second
    /// issuer legitimately queue behind the first instead of being refused.
    /// Acquired with ordinary blocking `lock()` *before* interrupts are
    /// disabled for the episode (§4.8 step 2), since the wait for a prior
    /// episode to finish can be arbitrarily long.
    command_lock: Mutex<()>,
    /// Index of the entry currently holding `command_lock`, i.e. the one
    /// the IRQ handler should service. `None` when idle.
    active_entry: Mutex<Option<usize>>,
    /// Signalled by the IRQ handler once the active entry's `finished` flag
    /// is set. One condvar per controller, not per entry: `command_lock`
    /// already guarantees at most one entry is ever being waited on at a
    /// time, so there is nothing for a second condvar to arbitrate.
    completion: Condvar,
}

impl Controller {
    pub fn new(id: usize, command_base: u16, control_base: u16, bus_master_base: u16, irq: u8, serial: bool) -> Self {
        Self {
            id,
            command_base,
            control_base,
            bus_master_base,
            irq,
            serial,
            enabled: false,
            task_file: Mutex::new(TaskFile::new(command_base, control_base)),
            devices: [Device::absent(0), Device::absent(1)],
            entries: Mutex::new(EntryPool::new()),
            freelist_condvar: Condvar::new(),
            command_lock: Mutex::new(()),
            active_entry: Mutex::new(None),
            completion: Condvar::new(),
        }
    }

    /// Allocate a free entry, blocking (via `mutexless_wait`, since the
    /// caller already has interrupts disabled per §4.8 step 2-3) if the pool
    /// is momentarily exhausted.
    pub fn alloc_entry(&self) -> usize {
        loop {
            let got = without_interrupts(|| {
                let mut pool = self.entries.lock();
                pool.try_pop()
            });
            if let Some(idx) = got {
                return idx;
            }
            self.freelist_condvar.mutexless_wait();
        }
    }

    /// Decrement an entry's refcount; return it to the freelist once it
    /// reaches zero and wake anyone waiting on the freelist condvar.
    pub fn free_entry(&self, idx: usize) {
        without_interrupts(|| {
            let mut pool = self.entries.lock();
            let entry = pool.get_mut(idx);
            entry.refcount = entry.refcount.saturating_sub(1);
            if entry.refcount == 0 {
                pool.push(idx);
                self.freelist_condvar.mutexless_signal();
            }
        });
    }

    pub fn with_entry<R>(&self, idx: usize, f: impl FnOnce(&CommandQueueEntry) -> R) -> R {
        without_interrupts(|| f(self.entries.lock().get(idx)))
    }

    pub fn with_entry_mut<R>(&self, idx: usize, f: impl FnOnce(&mut CommandQueueEntry) -> R) -> R {
        without_interrupts(|| f(self.entries.lock().get_mut(idx)))
    }

    /// Acquire exclusive command-issuing rights on this controller, blocking
    /// with interrupts still enabled until any prior episode has released
    /// it. Callers disable interrupts and call `set_active_entry` only
    /// after this returns and the real entry index is known.
    pub fn begin_command(&self) -> crate::sync::MutexGuard<'_, ()> {
        self.command_lock.lock()
    }

    /// Record which entry the IRQ handler should service. Called once the
    /// caller holds `command_lock` and has allocated the real entry.
    pub fn set_active_entry(&self, idx: usize) {
        *self.active_entry.lock() = Some(idx);
    }

    pub fn clear_active_entry(&self) {
        *self.active_entry.lock() = None;
    }

    /// Entry index the IRQ handler should service, if any is currently
    /// armed. Per §4.9, "take the head of that controller's command queue"
    /// — with one-in-flight enforced by `command_lock`, that queue has at
    /// most one member.
    pub fn active_entry(&self) -> Option<usize> {
        *self.active_entry.lock()
    }

    /// Mark `idx` finished (with the terminal error classification, if any)
    /// and wake whoever is blocked in `wait_for_completion`. Called from the
    /// IRQ handler, which already runs with interrupts disabled.
    pub fn complete_entry(&self, idx: usize, error: Option<IdeErrorKind>) {
        {
            let mut pool = self.entries.lock();
            let entry = pool.get_mut(idx);
            entry.finished = true;
            entry.error = error;
        }
        self.completion.mutexless_signal();
    }

    /// Block the issuing thread until `idx` is marked finished. Uses the
    /// interrupts-disabled `mutexless_wait` path: by the time this is
    /// called, the caller has already disabled interrupts for the command
    /// episode (§4.8 step 2).
    pub fn wait_for_completion(&self, idx: usize) {
        loop {
            let done = without_interrupts(|| self.entries.lock().get(idx).finished);
            if done {
                return;
            }
            self.completion.mutexless_wait();
        }
    }

    pub fn free_entry_count(&self) -> usize {
        without_interrupts(|| self.entries.lock().free_count())
    }

    pub fn entry_pool_len(&self) -> usize {
        without_interrupts(|| self.entries.lock().len())
    }

    /// Convenience wrappers matching the shape callers outside this module
    /// reach for: a device index, not a `Controller` plus a slot threaded
    /// through every call.
    pub fn read_sectors(&self, dev_index: usize, lba: u32, count: u16, buf: &mut [u8]) -> Result<(), IdeError> {
        super::command::read_sectors(self, dev_index, lba, buf, count)
    }

    pub fn write_sectors(&self, dev_index: usize, lba: u32, count: u16, buf: &[u8]) -> Result<(), IdeError> {
        super::command::write_sectors(self, dev_index, lba, buf, count)
    }

    pub fn flush(&self, dev_index: usize) -> Result<(), IdeError> {
        super::command::flush(self, dev_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_starts_fully_free() {
        let pool = EntryPool::new();
        assert_eq!(pool.free_count(), MAX_NB_IDE_CMD_QUEUE_ENTRIES);
    }

    #[test]
    fn alloc_then_free_restores_pool() {
        let mut pool = EntryPool::new();
        let a = pool.try_pop().unwrap();
        let b = pool.try_pop().unwrap();
        assert_ne!(a, b);
        assert_eq!(pool.free_count(), MAX_NB_IDE_CMD_QUEUE_ENTRIES - 2);
        pool.push(a);
        pool.push(b);
        assert_eq!(pool.free_count(), MAX_NB_IDE_CMD_QUEUE_ENTRIES);
    }

    #[test]
    fn pool_exhaustion_returns_none() {
        let mut pool = EntryPool::new();
        let mut taken = Vec::new();
        for _ in 0..MAX_NB_IDE_CMD_QUEUE_ENTRIES {
            taken.push(pool.try_pop().unwrap());
        }
        assert!(pool.try_pop().is_none());
    }

    #[test]
    fn refcount_both_paths_must_release() {
        let mut pool = EntryPool::new();
        let idx = pool.try_pop().unwrap();
        assert_eq!(pool.entries[idx].refcount, 2);
        pool.entries[idx].refcount -= 1;
        assert_eq!(pool.free_count(), MAX_NB_IDE_CMD_QUEUE_ENTRIES - 1);
        pool.entries[idx].refcount -= 1;
        assert_eq!(pool.entries[idx].refcount, 0);
        // Caller (free_entry) would push it back here.
        pool.push(idx);
        assert_eq!(pool.free_count(), MAX_NB_IDE_CMD_QUEUE_ENTRIES);
    }
}
