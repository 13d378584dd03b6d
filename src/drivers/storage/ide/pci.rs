/*
 * PCI Attach Glue (C11)
 *
 * Minimal config-space access (mechanism #1, ports 0xCF8/0xCFC) — just
 * enough bus x device x function scanning to find mass-storage/IDE
 * functions and derive each channel's port triple. Everything else PCI
 * (bridges, capabilities, MSI) is out of scope; this module only reads
 * what a legacy IDE/PATA-in-compatibility-mode attach needs.
 *
 * Fixes the `&& 0xFF` vs `& 0xFF` class/subclass decode bug noted for the
 * source this was distilled from: every mask below is `&`, not `&&`.
 */

use alloc::vec::Vec;

use crate::io::{Io, Pio};
use super::config::{
    IDE_CONTROLLERS, IRQ_PRIMARY, IRQ_SECONDARY, PRIMARY_COMMAND_BASE, PRIMARY_CONTROL_BASE,
    SECONDARY_COMMAND_BASE, SECONDARY_CONTROL_BASE,
};
use super::controller::Controller;

const CONFIG_ADDRESS: u16 = 0xCF8;
const CONFIG_DATA: u16 = 0xCFC;

const CLASS_MASS_STORAGE: u32 = 0x01;
const SUBCLASS_IDE: u32 = 0x01;
const SUBCLASS_ATA: u32 = 0x05;
const SUBCLASS_SATA: u32 = 0x06;

fn config_address(bus: u8, device: u8, function: u8, offset: u8) -> u32 {
    0x8000_0000
        | ((bus as u32) << 16)
        | ((device as u32) << 11)
        | ((function as u32) << 8)
        | (offset as u32 & 0xFC)
}

fn read_config_u32(bus: u8, device: u8, function: u8, offset: u8) -> u32 {
    let mut addr_port: Pio<u32> = Pio::new(CONFIG_ADDRESS);
    let data_port: Pio<u32> = Pio::new(CONFIG_DATA);
    addr_port.write(config_address(bus, device, function, offset));
    data_port.read()
}

fn read_config_u16(bus: u8, device: u8, function: u8, offset: u8) -> u16 {
    let dword = read_config_u32(bus, device, function, offset & 0xFC);
    let shift = (offset & 0x02) * 8;
    ((dword >> shift) & 0xFFFF) as u16
}

fn read_config_u8(bus: u8, device: u8, function: u8, offset: u8) -> u8 {
    let dword = read_config_u32(bus, device, function, offset & 0xFC);
    let shift = (offset & 0x03) * 8;
    ((dword >> shift) & 0xFF) as u8
}

struct FunctionInfo {
    bus: u8,
    device: u8,
    function: u8,
    class: u8,
    subclass: u8,
    prog_if: u8,
    header_type: u8,
    bars: [u32; 6],
    interrupt_line: u8,
}

fn probe_function(bus: u8, device: u8, function: u8) -> Option<FunctionInfo> {
    let vendor_device = read_config_u32(bus, device, function, 0x00);
    if (vendor_device & 0xFFFF) == 0xFFFF {
        return None;
    }

    let class_reg = read_config_u32(bus, device, function, 0x08);
    let prog_if = ((class_reg >> 8) & 0xFF) as u8;
    let subclass = ((class_reg >> 16) & 0xFF) as u8;
    let class = ((class_reg >> 24) & 0xFF) as u8;

    let header_type = read_config_u8(bus, device, function, 0x0E) & 0x7F;

    let mut bars = [0u32; 6];
    for (i, bar) in bars.iter_mut().enumerate() {
        *bar = read_config_u32(bus, device, function, 0x10 + (i as u8) * 4);
    }

    let interrupt_line = read_config_u8(bus, device, function, 0x3C);

    Some(FunctionInfo { bus, device, function, class, subclass, prog_if, header_type, bars, interrupt_line })
}

fn bar_io_port(bar: u32) -> u16 {
    if bar & 0x1 != 0 {
        (bar & 0xFFFC) as u16
    } else {
        0
    }
}

/// One IDE channel (primary or secondary) carved out of a function's BARs,
/// before it's turned into a registered `Controller`.
struct ChannelSpec {
    command_base: u16,
    control_base: u16,
    bus_master_base: u16,
    irq: u8,
    serial: bool,
}

fn channel_spec(info: &FunctionInfo, primary: bool) -> ChannelSpec {
    let serial = info.subclass == SUBCLASS_SATA;
    // prog-if bit 0 (primary) / bit 2 (secondary): set => channel operates
    // in PCI native mode (BAR-supplied ports, PCI-routed IRQ); clear =>
    // ISA-compatibility mode (fixed legacy ports and IRQ).
    let native_bit = if primary { 0x01 } else { 0x04 };
    let native = info.prog_if & native_bit != 0;

    let (default_command, default_control, legacy_irq) = if primary {
        (PRIMARY_COMMAND_BASE, PRIMARY_CONTROL_BASE, IRQ_PRIMARY)
    } else {
        (SECONDARY_COMMAND_BASE, SECONDARY_CONTROL_BASE, IRQ_SECONDARY)
    };

    let (command_bar, control_bar) = if primary { (info.bars[0], info.bars[1]) } else { (info.bars[2], info.bars[3]) };

    let command_base = if native { bar_io_port(command_bar) } else { 0 };
    let control_base = if native { bar_io_port(control_bar) } else { 0 };
    let command_base = if command_base == 0 { default_command } else { command_base };
    let control_base = if control_base == 0 { default_control } else { control_base };

    let bus_master_base = bar_io_port(info.bars[4]);
    let bus_master_base = if bus_master_base == 0 {
        0
    } else if primary {
        bus_master_base
    } else {
        bus_master_base + 8
    };

    let irq = if native && info.interrupt_line != 0 && info.interrupt_line != 0xFF {
        info.interrupt_line
    } else {
        legacy_irq
    };

    ChannelSpec { command_base, control_base, bus_master_base, irq, serial }
}

/// Scan all 256 buses x 32 devices x 8 functions for IDE functions and
/// register up to `IDE_CONTROLLERS` logical controllers (primary +
/// secondary channel per function), deduplicated by command-block base
/// port. Logs and stops registering once the table is full rather than
/// growing it (§11).
pub fn scan_and_register() -> Vec<Controller> {
    let mut controllers = Vec::new();

    'scan: for bus in 0..=255u16 {
        let bus = bus as u8;
        for device in 0..32u8 {
            for function in 0..8u8 {
                let Some(info) = probe_function(bus, device, function) else { continue };
                if info.header_type != 0x00 {
                    continue;
                }
                if info.class as u32 != CLASS_MASS_STORAGE {
                    continue;
                }
                if !matches!(info.subclass as u32, SUBCLASS_IDE | SUBCLASS_ATA | SUBCLASS_SATA) {
                    continue;
                }

                log::info!(
                    "pci {:02x}:{:02x}.{}: IDE-class function (subclass {:#04x}, prog-if {:#04x})",
                    info.bus, info.device, info.function, info.subclass, info.prog_if
                );

                for primary in [true, false] {
                    let spec = channel_spec(&info, primary);
                    if controllers.iter().any(|c: &Controller| c.command_base == spec.command_base) {
                        continue;
                    }
                    if controllers.len() >= IDE_CONTROLLERS {
                        log::warn!("ide: controller table full ({} entries), dropping further channels", IDE_CONTROLLERS);
                        break 'scan;
                    }
                    let id = controllers.len();
                    controllers.push(Controller::new(
                        id,
                        spec.command_base,
                        spec.control_base,
                        spec.bus_master_base,
                        spec.irq,
                        spec.serial,
                    ));
                }
            }
        }
    }

    controllers
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(class: u8, subclass: u8, prog_if: u8, bars: [u32; 6], interrupt_line: u8) -> FunctionInfo {
        FunctionInfo { bus: 0, device: 0, function: 0, class, subclass, prog_if, header_type: 0, bars, interrupt_line }
    }

    #[test]
    fn compatibility_mode_uses_legacy_ports_and_irq() {
        let info = info(0x01, 0x01, 0x00, [0; 6], 0xFF);
        let primary = channel_spec(&info, true);
        assert_eq!(primary.command_base, PRIMARY_COMMAND_BASE);
        assert_eq!(primary.control_base, PRIMARY_CONTROL_BASE);
        assert_eq!(primary.irq, IRQ_PRIMARY);
        assert!(!primary.serial);

        let secondary = channel_spec(&info, false);
        assert_eq!(secondary.command_base, SECONDARY_COMMAND_BASE);
        assert_eq!(secondary.irq, IRQ_SECONDARY);
    }

    #[test]
    fn native_mode_uses_bar_ports_and_routed_irq() {
        let info = info(0x01, 0x01, 0x01, [0x1F8 | 1, 0x3F0 | 1, 0, 0, 0, 0], 11);
        let primary = channel_spec(&info, true);
        assert_eq!(primary.command_base, 0x1F8);
        assert_eq!(primary.control_base, 0x3F0);
        assert_eq!(primary.irq, 11);
    }

    #[test]
    fn sata_subclass_sets_serial_flag() {
        let info = info(0x01, 0x06, 0x00, [0; 6], 0xFF);
        assert!(channel_spec(&info, true).serial);
    }

    #[test]
    fn bus_master_secondary_offset_is_primary_plus_eight() {
        let info = info(0x01, 0x01, 0x00, [0, 0, 0, 0, 0xC000 | 1, 0], 0xFF);
        assert_eq!(channel_spec(&info, true).bus_master_base, 0xC000);
        assert_eq!(channel_spec(&info, false).bus_master_base, 0xC008);
    }

    #[test]
    fn class_subclass_decode_uses_bitwise_and_not_logical_and() {
        // Pins the fix for the `&& 0xFF` source bug: a class/subclass byte
        // with high bits set must still decode to the masked byte value.
        let class_reg: u32 = 0xFF_06_01_00;
        let prog_if = ((class_reg >> 8) & 0xFF) as u8;
        let subclass = ((class_reg >> 16) & 0xFF) as u8;
        let class = ((class_reg >> 24) & 0xFF) as u8;
        assert_eq!(prog_if, 0x01);
        assert_eq!(subclass, 0x06);
        assert_eq!(class, 0xFF);
    }
}
