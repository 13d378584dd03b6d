/*
 * Device Probe (C8)
 *
 * Runs once per controller at boot, synchronously, before interrupts are
 * enabled — `ide::init()` (main.rs Step 7) runs ahead of Step 8's
 * `interrupts::enable()`. `utils::timer::uptime_ms()` only advances off the
 * timer IRQ (see `utils/timer.rs`), so a wall-clock deadline cannot resolve
 * here; waits below are bounded by a poll-iteration count instead, matching
 * the original's `for (j = N; j > 0; j--) { ...; ide_delay(base); }` retry
 * loops rather than a real-time timeout.
 */

use alloc::string::String;
use alloc::vec;

use crate::io::Io;
use super::config::{IDENTIFY_TIMEOUT_ITERS, PROBE_RESET_TIMEOUT_ITERS};
use super::controller::{Chs, Controller, Device, DeviceKind};
use super::registers::{command, DeviceControl, Status, SIG_ATA, SIG_ATAPI, SIG_SATA, SIG_SATAPI};

/// Poll `cond` up to `max_iters` times, settling via `delay` between checks.
/// Returns whether `cond` became true. Used only at boot, before interrupts
/// are enabled and before any thread exists to suspend.
fn wait_iters(max_iters: u32, mut cond: impl FnMut() -> bool, mut delay: impl FnMut()) -> bool {
    for _ in 0..max_iters {
        if cond() {
            return true;
        }
        delay();
    }
    false
}

/// Probe both slots on `controller`, filling in `controller.devices[..]`.
/// Returns whether at least one device was found (callers use this to
/// decide whether to install the IRQ handler and unmask the IRQ).
pub fn probe_controller(controller: &mut Controller) -> bool {
    let mut any_present = false;
    for slot in 0..controller.devices.len() {
        let device = probe_slot(controller, slot);
        any_present |= device.is_present();
        controller.devices[slot] = device;
    }
    any_present
}

fn probe_slot(controller: &Controller, slot: usize) -> Device {
    let mut tf = controller.task_file.lock();

    tf.select_device(slot);
    tf.delay();

    let status = tf.alt_status();
    if status.is_empty() {
        log::debug!("ide{}: slot {} absent (status 0)", controller.id, slot);
        return Device::absent(slot);
    }

    // Software reset: nIEN, then nIEN|SRST, then nIEN again, 5us-ish apart
    // (approximated here with a handful of register settles, since there's
    // no sub-millisecond timer at this point in boot).
    tf.write_device_control(DeviceControl::NIEN);
    tf.delay();
    tf.write_device_control(DeviceControl::NIEN | DeviceControl::SRST);
    tf.delay();
    tf.write_device_control(DeviceControl::NIEN);
    tf.delay();

    if !wait_iters(PROBE_RESET_TIMEOUT_ITERS, || !tf.alt_status().contains(Status::BSY), || tf.delay()) {
        log::warn!("ide{}: slot {} stuck BSY after reset, marking absent", controller.id, slot);
        return Device::absent(slot);
    }

    tf.write_command(command::EXECUTE_DEVICE_DIAGNOSTIC);
    tf.delay();
    let _ = wait_iters(PROBE_RESET_TIMEOUT_ITERS, || !tf.alt_status().contains(Status::BSY), || tf.delay());

    let sig_mid = tf.lba_mid.read();
    let sig_high = tf.lba_high.read();
    let signature = (sig_mid as u16) | ((sig_high as u16) << 8);

    let kind = match signature {
        SIG_ATAPI => DeviceKind::Atapi,
        SIG_SATAPI => DeviceKind::Satapi,
        SIG_SATA => DeviceKind::Sata,
        SIG_ATA => DeviceKind::Ata,
        _ => {
            if tf.alt_status().is_empty() {
                DeviceKind::Absent
            } else {
                DeviceKind::Ata
            }
        }
    };

    if kind == DeviceKind::Absent {
        log::debug!("ide{}: slot {} absent (unrecognized signature, status 0)", controller.id, slot);
        return Device::absent(slot);
    }

    let identify_cmd = match kind {
        DeviceKind::Atapi | DeviceKind::Satapi => command::IDENTIFY_PACKET_DEVICE,
        _ => command::IDENTIFY_DEVICE,
    };

    tf.select_device(slot);
    tf.delay();
    tf.write_command(identify_cmd);

    if !wait_iters(IDENTIFY_TIMEOUT_ITERS, || !tf.alt_status().contains(Status::BSY), || tf.delay()) {
        log::warn!("ide{}: slot {} IDENTIFY timed out, marking absent", controller.id, slot);
        return Device::absent(slot);
    }
    if !tf.alt_status().contains(Status::DRQ) {
        log::warn!("ide{}: slot {} IDENTIFY produced no data, marking absent", controller.id, slot);
        return Device::absent(slot);
    }

    let mut words = vec![0u16; 256];
    for w in words.iter_mut() {
        *w = tf.read_data_word();
    }

    let mut device = parse_identify(&words);
    device.slot = slot;
    device.kind = kind;
    log::info!(
        "ide{}: slot {} = {:?} \"{}\" ({} sectors)",
        controller.id, slot, device.kind, device.model, device.total_sectors
    );
    device
}

/// Byte-swap-and-trim an IDENTIFY string field: byte 2k = high(W[k]),
/// byte 2k+1 = low(W[k]), then trailing ASCII spaces trimmed. Shared by
/// serial/firmware/model parsing (§11) rather than reimplemented per field.
pub fn swap_and_trim(words: &[u16], max_len: usize) -> String {
    let mut bytes = alloc::vec::Vec::with_capacity(words.len() * 2);
    for &w in words {
        bytes.push((w >> 8) as u8);
        bytes.push((w & 0xFF) as u8);
    }
    bytes.truncate(max_len);
    while bytes.last() == Some(&b' ') {
        bytes.pop();
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

fn parse_identify(words: &[u16]) -> Device {
    let serial = swap_and_trim(&words[10..20], 20);
    let firmware = swap_and_trim(&words[23..27], 8);
    let model = swap_and_trim(&words[27..47], 40);

    let cylinders = words[1];
    let heads = words[3];
    let sectors = words[6];

    let total_sectors = (words[60] as u32 | ((words[61] as u32) << 16)) as u64;

    let chs_total_sectors = if words[53] & 0x1 != 0 {
        Some(words[54] as u32 | ((words[55] as u32) << 16))
    } else {
        None
    };

    let capabilities = words[0];
    let removable = capabilities & (1 << 7) != 0;
    let hdd = capabilities & (1 << 6) == 0; // bit clear = fixed/non-removable disk family
    let power_down_capable = capabilities & (1 << 13) != 0;

    Device {
        slot: 0,
        kind: DeviceKind::Absent,
        serial,
        firmware,
        model,
        chs: Chs { cylinders, heads, sectors },
        total_sectors,
        chs_total_sectors,
        removable,
        hdd,
        power_down_capable,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn swap_and_trim_reorders_and_trims() {
        // "AB" packed as one word: high=A(0x41), low=B(0x42) -> word 0x4142
        let words = [0x4142u16, 0x2020]; // "AB" + two trailing spaces
        let s = swap_and_trim(&words, 4);
        assert_eq!(s, "AB");
    }

    #[test]
    fn swap_and_trim_respects_max_len() {
        let words = [0x4142u16, 0x4344];
        let s = swap_and_trim(&words, 3);
        assert_eq!(s, "ABC");
    }

    #[test]
    fn swap_and_trim_all_spaces_is_empty() {
        let words = [0x2020u16, 0x2020];
        assert_eq!(swap_and_trim(&words, 4), "");
    }
}
