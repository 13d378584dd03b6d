/*
 * Block-Device Export (C12)
 *
 * After probe, turn every non-removable hard-disk-flagged ATA device into
 * a plain descriptor the block-device registry (out of scope here; only
 * its contract — a kind, sector size, and length — is consumed) can adopt.
 * Partition parsing happens above this layer.
 */

use alloc::vec::Vec;

use super::controller::{Controller, Device, DeviceKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockDeviceKind {
    Ide,
}

/// One exportable disk. `partition_start`/`partition_length` are always
/// zero here — this driver exposes whole-device geometry only; a
/// partition table is parsed by the layer above.
#[derive(Debug, Clone, Copy)]
pub struct BlockDescriptor {
    pub kind: BlockDeviceKind,
    pub controller_id: usize,
    pub slot: usize,
    pub sector_size_log2: u32,
    pub partition_start: u64,
    pub partition_length: u64,
    pub length: u64,
}

fn exportable(device: &Device) -> bool {
    device.kind == DeviceKind::Ata && device.hdd && !device.removable
}

/// Build descriptors for every exportable device across `controllers`.
pub fn exported_block_devices(controllers: &[Controller]) -> Vec<BlockDescriptor> {
    let mut out = Vec::new();
    for controller in controllers {
        for device in &controller.devices {
            if !exportable(device) {
                continue;
            }
            out.push(BlockDescriptor {
                kind: BlockDeviceKind::Ide,
                controller_id: controller.id,
                slot: device.slot,
                sector_size_log2: super::config::IDE_LOG2_SECTOR_SIZE,
                partition_start: 0,
                partition_length: 0,
                length: device.total_sectors,
            });
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::controller::Chs;

    fn ata_hdd(total_sectors: u64) -> Device {
        Device {
            slot: 0,
            kind: DeviceKind::Ata,
            serial: alloc::string::String::new(),
            firmware: alloc::string::String::new(),
            model: alloc::string::String::new(),
            chs: Chs::default(),
            total_sectors,
            chs_total_sectors: None,
            removable: false,
            hdd: true,
            power_down_capable: false,
        }
    }

    #[test]
    fn removable_device_is_not_exported() {
        let mut d = ata_hdd(1000);
        d.removable = true;
        assert!(!exportable(&d));
    }

    #[test]
    fn atapi_device_is_not_exported() {
        let mut d = ata_hdd(1000);
        d.kind = DeviceKind::Atapi;
        assert!(!exportable(&d));
    }

    #[test]
    fn fixed_ata_hdd_is_exported() {
        assert!(exportable(&ata_hdd(2048)));
    }
}
