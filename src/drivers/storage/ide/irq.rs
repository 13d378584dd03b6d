/*
 * IRQ Handler (C10)
 *
 * Entry: interrupts are already disabled (hardware invariant on IRQ
 * entry). The PIC EOI itself is sent by the IDT handler that calls
 * `handle_irq` (see `arch::x86_64::idt`); this module only owns the
 * ATA-level acknowledgement and completion signalling.
 *
 * This driver is PIO-only (DMA/bus-mastering is a non-goal), so there is
 * no bus-master status register to consult to find which controller is
 * interrupting — each controller is routed to a distinct IRQ number
 * (legacy 14/15, or the PCI-routed line in native mode), and that number
 * is how the dispatch below finds it.
 */

use crate::io::Io;
use super::config::SECTOR_SIZE;
use super::controller::{CommandTag, Controller, IdeErrorKind, PacketDirection};
use super::registers::{ErrorReg, Status};

pub fn handle_irq(irq: u8) {
    let Some(controller) = super::controller_for_irq(irq) else {
        log::error!("ide: IRQ {} claimed by no controller", irq);
        panic!("ide: unhandled IRQ {}", irq);
    };

    let Some(idx) = controller.active_entry() else {
        // Spurious/shared-line IRQ with nothing armed; reading status
        // still deasserts the line.
        controller.task_file.lock().status();
        return;
    };

    let mut tf = controller.task_file.lock();
    tf.delay();
    let status = tf.status();

    if status.contains(Status::ERR) {
        let kind = classify_error(tf.error());
        log::error!("ide{}: entry {} completed with error {:?}", controller.id, idx, kind);
        drop(tf);
        controller.complete_entry(idx, Some(kind));
        return;
    }

    let tag = controller.with_entry(idx, |e| e.tag);
    match tag {
        None => panic!("ide{}: IRQ for entry {} with no command tag armed", controller.id, idx),
        Some(CommandTag::ReadSectors) => handle_read(controller, idx, &mut tf, status),
        Some(CommandTag::WriteSectors) => handle_write(controller, idx, &mut tf, status),
        Some(CommandTag::FlushCache) => controller.complete_entry(idx, None),
        Some(CommandTag::SendPacket) => handle_packet(controller, idx, &mut tf, status),
    }
}

fn classify_error(err: ErrorReg) -> IdeErrorKind {
    if err.contains(ErrorReg::BBK) {
        IdeErrorKind::BadBlock
    } else if err.contains(ErrorReg::UNC) {
        IdeErrorKind::Uncorrectable
    } else if err.contains(ErrorReg::IDNF) {
        IdeErrorKind::IdNotFound
    } else if err.contains(ErrorReg::ABRT) {
        IdeErrorKind::Aborted
    } else if err.contains(ErrorReg::TK0NF) {
        IdeErrorKind::Track0NotFound
    } else if err.contains(ErrorReg::AMNF) {
        IdeErrorKind::AddressMarkNotFound
    } else {
        IdeErrorKind::Aborted
    }
}

/// The whole multi-sector transfer arrives on this single IRQ (matching
/// the source's simplified READ SECTORS model rather than real hardware's
/// one-IRQ-per-sector behavior).
fn handle_read(controller: &Controller, idx: usize, tf: &mut super::registers::TaskFile, status: Status) {
    let (total, buf) = controller.with_entry(idx, |e| (e.total_sectors, e.buf));
    let words = total as usize * (SECTOR_SIZE / 2);
    for i in 0..words {
        let word = tf.read_data_word();
        unsafe {
            *buf.add(i * 2) = (word & 0xFF) as u8;
            *buf.add(i * 2 + 1) = (word >> 8) as u8;
        }
    }
    let _ = status;
    if tf.alt_status().contains(Status::DRQ) {
        controller.complete_entry(idx, Some(IdeErrorKind::Aborted));
    } else {
        controller.complete_entry(idx, None);
    }
}

/// One IRQ per sector: while sectors remain, PIO-write the next one and
/// don't complete; the final IRQ (no sectors left, DRQ clear) completes.
fn handle_write(controller: &Controller, idx: usize, tf: &mut super::registers::TaskFile, status: Status) {
    let (total, done, buf) = controller.with_entry(idx, |e| (e.total_sectors, e.sectors_done, e.buf));

    if done < total {
        if !status.contains(Status::DRQ) {
            controller.complete_entry(idx, Some(IdeErrorKind::Aborted));
            return;
        }
        let sector = unsafe { buf.add(done as usize * SECTOR_SIZE) };
        for i in 0..(SECTOR_SIZE / 2) {
            let word = unsafe {
                let lo = *sector.add(i * 2) as u16;
                let hi = *sector.add(i * 2 + 1) as u16;
                lo | (hi << 8)
            };
            tf.write_data_word(word);
        }
        controller.with_entry_mut(idx, |e| e.sectors_done = done + 1);
        return;
    }

    if status.contains(Status::DRQ) {
        controller.complete_entry(idx, Some(IdeErrorKind::Aborted));
    } else {
        controller.complete_entry(idx, None);
    }
}

/// ATAPI per-IRQ byte-count-directed data phase (§4.9, §11): each IRQ
/// carries up to the byte count in LBA-mid/high, transferred in the
/// packet's fixed direction; DRQ still set afterward means more follows.
fn handle_packet(controller: &Controller, idx: usize, tf: &mut super::registers::TaskFile, _status: Status) {
    let (offset, bufsz, buf, direction) =
        controller.with_entry(idx, |e| (e.packet_offset, e.packet_bufsz, e.buf, e.packet_direction));

    let byte_count = (tf.lba_mid.read() as usize) | ((tf.lba_high.read() as usize) << 8);
    let n = byte_count.min(bufsz.saturating_sub(offset));
    let words = n / 2;

    for i in 0..words {
        match direction {
            PacketDirection::In => {
                let word = tf.read_data_word();
                unsafe {
                    *buf.add(offset + i * 2) = (word & 0xFF) as u8;
                    *buf.add(offset + i * 2 + 1) = (word >> 8) as u8;
                }
            }
            PacketDirection::Out => {
                let word = unsafe {
                    let lo = *buf.add(offset + i * 2) as u16;
                    let hi = *buf.add(offset + i * 2 + 1) as u16;
                    lo | (hi << 8)
                };
                tf.write_data_word(word);
            }
        }
    }

    controller.with_entry_mut(idx, |e| e.packet_offset = offset + words * 2);

    if tf.alt_status().contains(Status::DRQ) {
        // More data expected on a subsequent IRQ; leave the entry armed.
    } else {
        controller.complete_entry(idx, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_error_picks_highest_priority_bit() {
        // BBK takes precedence over every other bit set alongside it.
        let err = ErrorReg::BBK | ErrorReg::UNC | ErrorReg::ABRT;
        assert_eq!(classify_error(err), IdeErrorKind::BadBlock);
    }

    #[test]
    fn classify_error_each_bit_maps_to_its_kind() {
        assert_eq!(classify_error(ErrorReg::BBK), IdeErrorKind::BadBlock);
        assert_eq!(classify_error(ErrorReg::UNC), IdeErrorKind::Uncorrectable);
        assert_eq!(classify_error(ErrorReg::IDNF), IdeErrorKind::IdNotFound);
        assert_eq!(classify_error(ErrorReg::ABRT), IdeErrorKind::Aborted);
        assert_eq!(classify_error(ErrorReg::TK0NF), IdeErrorKind::Track0NotFound);
        assert_eq!(classify_error(ErrorReg::AMNF), IdeErrorKind::AddressMarkNotFound);
    }

    #[test]
    fn classify_error_no_bits_set_falls_back_to_aborted() {
        assert_eq!(classify_error(ErrorReg::empty()), IdeErrorKind::Aborted);
    }

    #[test]
    fn classify_error_mcr_and_mc_fall_back_to_aborted() {
        // MCR/MC (media-change bits) have no dedicated IdeErrorKind variant.
        assert_eq!(classify_error(ErrorReg::MCR), IdeErrorKind::Aborted);
        assert_eq!(classify_error(ErrorReg::MC), IdeErrorKind::Aborted);
    }
}
