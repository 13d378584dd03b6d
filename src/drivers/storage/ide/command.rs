/*
 * Command Engine (C9)
 *
 * Every client-facing operation (read/write/flush/ATAPI packet) follows the
 * same shape: disable interrupts, allocate a queue entry, program the
 * task-file registers, `mutexless_wait` for the IRQ handler to signal
 * completion, then read back the error code and free the entry. Writes
 * iterate one IRQ-driven sector at a time (§13's resolved generalization of
 * the original's single-sector-only limitation) and always end with an
 * internal FLUSH CACHE.
 */

use x86_64::instructions::interrupts;

use crate::io::Io;
use super::config::IDE_LOG2_SECTOR_SIZE;
use super::controller::{CommandTag, Controller, Device, IdeError, PacketDirection};

const SECTOR_WORDS: usize = (1 << IDE_LOG2_SECTOR_SIZE) / 2;

fn device_kind_is_atapi(device: &Device) -> bool {
    matches!(device.kind, super::controller::DeviceKind::Atapi | super::controller::DeviceKind::Satapi)
}

/// Read `count` (1..=256, 0 meaning 256) sectors starting at `lba` into
/// `buf`. `buf` must be at least `count.max(1) as usize * 512` bytes (256
/// when `count == 0`).
pub fn read_sectors(controller: &Controller, slot: usize, lba: u32, buf: &mut [u8], count: u16) -> Result<(), IdeError> {
    let n = if count == 0 { 256 } else { count as u32 };
    assert!(buf.len() >= n as usize * (1 << IDE_LOG2_SECTOR_SIZE), "read_sectors: buffer too small");
    run_transfer(controller, slot, lba, buf.as_mut_ptr(), count, CommandTag::ReadSectors)?;
    let _ = n;
    Ok(())
}

/// Write `count` (1..=256, 0 meaning 256) sectors starting at `lba` from
/// `buf`, followed by an internal FLUSH CACHE. Unlike the original driver,
/// `count` need not be 1 (§13): each sector is transferred on its own IRQ,
/// same as the read path and the ATAPI data phase.
pub fn write_sectors(controller: &Controller, slot: usize, lba: u32, buf: &[u8], count: u16) -> Result<(), IdeError> {
    let n = if count == 0 { 256 } else { count as u32 };
    assert!(buf.len() >= n as usize * (1 << IDE_LOG2_SECTOR_SIZE), "write_sectors: buffer too small");
    run_transfer(controller, slot, lba, buf.as_ptr() as *mut u8, count, CommandTag::WriteSectors)?;
    flush(controller, slot)
}

pub fn flush(controller: &Controller, slot: usize) -> Result<(), IdeError> {
    assert!(interrupts::are_enabled(), "flush: caller must have interrupts enabled");
    let _command_guard = controller.begin_command();
    interrupts::disable();

    let idx = controller.alloc_entry();
    controller.set_active_entry(idx);
    controller.with_entry_mut(idx, |e| {
        e.tag = Some(CommandTag::FlushCache);
        e.device_slot = slot;
    });

    {
        let mut tf = controller.task_file.lock();
        tf.select_device(slot);
        tf.delay();
        tf.write_command(super::registers::command::FLUSH_CACHE);
    }

    controller.wait_for_completion(idx);

    let result = read_and_clear_error(controller, idx);
    controller.free_entry(idx);
    controller.clear_active_entry();
    interrupts::enable();
    result
}

/// Shared read/write sector-transfer loop: arms the command, lets the IRQ
/// handler drive the per-sector PIO phases, and waits once for the whole
/// multi-sector transfer's completion signal.
fn run_transfer(controller: &Controller, slot: usize, lba: u32, buf: *mut u8, count: u16, tag: CommandTag) -> Result<(), IdeError> {
    assert!(interrupts::are_enabled(), "IDE command issued with interrupts already disabled");
    let _command_guard = controller.begin_command();
    interrupts::disable();

    let idx = controller.alloc_entry();
    controller.set_active_entry(idx);
    let total = if count == 0 { 256u32 } else { count as u32 };
    controller.with_entry_mut(idx, |e| {
        e.tag = Some(tag);
        e.device_slot = slot;
        e.buf = buf;
        e.total_sectors = total;
        e.sectors_done = 0;
    });

    {
        let mut tf = controller.task_file.lock();
        tf.set_lba(lba, slot);
        tf.set_sector_count(count);
        tf.delay();
        let cmd = match tag {
            CommandTag::ReadSectors => super::registers::command::READ_SECTORS,
            CommandTag::WriteSectors => super::registers::command::WRITE_SECTORS,
            _ => unreachable!("run_transfer only handles read/write"),
        };
        tf.write_command(cmd);

        if tag == CommandTag::WriteSectors {
            // First sector is written by the issuer before the first IRQ;
            // every subsequent sector is written by the IRQ handler itself.
            wait_busy_clear_drq_set(&tf);
            pio_write_sector(&mut tf, buf);
            controller.with_entry_mut(idx, |e| e.sectors_done = 1);
        }
    }

    controller.wait_for_completion(idx);

    let result = read_and_clear_error(controller, idx);
    controller.free_entry(idx);
    controller.clear_active_entry();
    interrupts::enable();
    result
}

/// ATAPI PACKET command (§4.8, §9, §11): writes the 12-byte packet, then
/// drives the byte-count-directed per-IRQ data phase to completion.
pub fn send_packet(
    controller: &Controller,
    slot: usize,
    packet: [u8; super::config::IDE_ATAPI_PACKET_LENGTH],
    buf: &mut [u8],
    direction: PacketDirection,
) -> Result<(), IdeError> {
    assert!(interrupts::are_enabled(), "send_packet: caller must have interrupts enabled");
    let _command_guard = controller.begin_command();
    interrupts::disable();

    let idx = controller.alloc_entry();
    controller.set_active_entry(idx);
    controller.with_entry_mut(idx, |e| {
        e.tag = Some(CommandTag::SendPacket);
        e.device_slot = slot;
        e.packet = packet;
        e.buf = buf.as_mut_ptr();
        e.packet_bufsz = buf.len();
        e.packet_offset = 0;
        e.packet_direction = direction;
    });

    {
        let mut tf = controller.task_file.lock();
        tf.select_device(slot);
        tf.delay();
        tf.write_command(super::registers::command::PACKET);
        wait_busy_clear_drq_set(&tf);
        for chunk in packet.chunks_exact(2) {
            let word = (chunk[0] as u16) | ((chunk[1] as u16) << 8);
            tf.write_data_word(word);
        }
    }

    controller.wait_for_completion(idx);

    let result = read_and_clear_error(controller, idx);
    controller.free_entry(idx);
    controller.clear_active_entry();
    interrupts::enable();
    result
}

/// Unbounded poll for BSY clear / DRQ set, settling via `tf.delay()` between
/// checks, same as the original's `while (BSY || !DRQ) ide_delay(base);`.
/// Not wall-clock-bounded: this runs with interrupts disabled (§4.8), so
/// `utils::timer::uptime_ms()` cannot advance here, and the IDE command
/// path is itself specified as unbounded waits (callers needing a timeout
/// wrap this in an upper-layer policy).
fn wait_busy_clear_drq_set<D: Io<Value = u16>, R: Io<Value = u8>>(tf: &super::registers::TaskFile<D, R>) {
    loop {
        let status = tf.alt_status();
        if !status.contains(super::registers::Status::BSY) && status.contains(super::registers::Status::DRQ) {
            return;
        }
        tf.delay();
    }
}

fn pio_write_sector<D: Io<Value = u16>, R: Io<Value = u8>>(tf: &mut super::registers::TaskFile<D, R>, buf: *mut u8) {
    for i in 0..SECTOR_WORDS {
        let word = unsafe {
            let lo = *buf.add(i * 2) as u16;
            let hi = *buf.add(i * 2 + 1) as u16;
            lo | (hi << 8)
        };
        tf.write_data_word(word);
    }
}

fn read_and_clear_error(controller: &Controller, idx: usize) -> Result<(), IdeError> {
    controller.with_entry(idx, |e| match e.error {
        None => Ok(()),
        Some(_) => Err(IdeError::UnknownError),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;
    use crate::io::SimPort;
    use crate::drivers::storage::ide::registers::TaskFile;

    fn sim_task_file(alt_status: Vec<u8>) -> TaskFile<SimPort<u16>, SimPort<u8>> {
        TaskFile {
            data: SimPort::fixed(0),
            error_features: SimPort::fixed(0),
            sector_count: SimPort::fixed(0),
            lba_low: SimPort::fixed(0),
            lba_mid: SimPort::fixed(0),
            lba_high: SimPort::fixed(0),
            device_head: SimPort::fixed(0),
            status_command: SimPort::fixed(0),
            alt_status_dev_control: SimPort::sequence(alt_status),
        }
    }

    #[test]
    fn wait_busy_clear_drq_set_returns_once_bsy_clears_and_drq_sets() {
        // BSY set, then BSY clear but DRQ not yet set, then both conditions met.
        let tf = sim_task_file(alloc::vec![0x80, 0x00, 0x08]);
        wait_busy_clear_drq_set(&tf);
        assert!(!tf.alt_status().contains(super::super::registers::Status::BSY));
        assert!(tf.alt_status().contains(super::super::registers::Status::DRQ));
    }

    #[test]
    fn wait_busy_clear_drq_set_returns_immediately_when_already_ready() {
        let tf = sim_task_file(alloc::vec![0x08]);
        wait_busy_clear_drq_set(&tf);
    }

    #[test]
    fn pio_write_sector_packs_bytes_into_words_little_endian() {
        let mut tf = sim_task_file(alloc::vec![0x08]);
        let mut buf = alloc::vec![0u8; SECTOR_WORDS * 2];
        for (i, b) in buf.iter_mut().enumerate() {
            *b = i as u8;
        }
        pio_write_sector(&mut tf, buf.as_mut_ptr());
        let written = tf.data.writes();
        assert_eq!(written.len(), SECTOR_WORDS);
        assert_eq!(written[0], 0u16 | (1u16 << 8));
        assert_eq!(written[1], 2u16 | (3u16 << 8));
    }

    #[test]
    fn device_kind_is_atapi_matches_only_atapi_and_satapi() {
        use crate::drivers::storage::ide::controller::DeviceKind;
        let mk = |kind| Device { kind, ..Device::absent(0) };
        assert!(device_kind_is_atapi(&mk(DeviceKind::Atapi)));
        assert!(device_kind_is_atapi(&mk(DeviceKind::Satapi)));
        assert!(!device_kind_is_atapi(&mk(DeviceKind::Ata)));
    }
}
