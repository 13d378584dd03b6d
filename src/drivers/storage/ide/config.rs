/*
 * Compile-Time Configuration
 *
 * Fixed knobs for the IDE driver, the same way `scheduler::scheduler` keeps
 * `THREAD_STACK_SIZE`/`MAX_THREADS`/`MAX_PID` as module-level consts rather
 * than a runtime-configurable struct. This kernel has no config files or
 * environment variables, so consts are the whole story.
 */

/// Upper bound on the number of logical controllers PCI attach (C11) will
/// register. Registration stops and logs a warning once full rather than
/// reallocating.
pub const IDE_CONTROLLERS: usize = 4;

/// Two device slots per IDE channel, fixed by the ATA cabling standard.
pub const IDE_DEVICES_PER_CONTROLLER: usize = 2;

/// One command in flight per controller plus one queued behind it, so a
/// second issuer can legitimately block on the freelist and be exercised
/// without the pool degenerating into a single-slot serializer.
pub const MAX_NB_IDE_CMD_QUEUE_ENTRIES: usize = 2;

/// log2(512): every ATA sector this driver handles is 512 bytes.
pub const IDE_LOG2_SECTOR_SIZE: u32 = 9;
pub const SECTOR_SIZE: usize = 1 << IDE_LOG2_SECTOR_SIZE;

/// ATAPI command packets are always 12 bytes (6 words), regardless of the
/// actual SCSI command length within them.
pub const IDE_ATAPI_PACKET_LENGTH: usize = 12;

/// Legacy (non-PCI-routed) IRQ numbers for the two standard ISA channels.
pub const IRQ_PRIMARY: u8 = 14;
pub const IRQ_SECONDARY: u8 = 15;

/// Legacy port defaults, used when a PCI BAR reads back zero (§4.6).
pub const PRIMARY_COMMAND_BASE: u16 = 0x1F0;
pub const PRIMARY_CONTROL_BASE: u16 = 0x3F4;
pub const SECONDARY_COMMAND_BASE: u16 = 0x170;
pub const SECONDARY_CONTROL_BASE: u16 = 0x374;

/// BSY-clear bound used during probe's post-reset wait, counted in poll
/// iterations rather than wall-clock milliseconds: probe runs before
/// interrupts are enabled, and `utils::timer::uptime_ms()` only advances
/// off the timer IRQ, so a wall-clock deadline here could never be
/// reached. Matches the original's `for (j = 30000; ...) ide_delay(base);`
/// reset-wait loop. Spun-up drives can be slow to come out of reset,
/// hence the generous bound.
pub const PROBE_RESET_TIMEOUT_ITERS: u32 = 30_000;

/// Bound for IDENTIFY (DEVICE/PACKET DEVICE) to present its data, same
/// iteration-counted shape and reason as `PROBE_RESET_TIMEOUT_ITERS`;
/// matches the original's `for (j = 1000000; ...)` response wait.
pub const IDENTIFY_TIMEOUT_ITERS: u32 = 1_000_000;
