/*
 * IDE/PATA Driver
 *
 * Boot-time PCI attach + device probe, then a command engine and IRQ
 * handler usable from ordinary kernel threads once the scheduler is
 * running. `init()` owns the only write to the controller table; every
 * other access in this tree is read-only (§9's "global controller table"
 * design note), read through `controllers()`.
 */

pub mod block;
pub mod command;
pub mod config;
pub mod controller;
pub mod irq;
pub mod pci;
pub mod probe;
pub mod registers;

use alloc::vec::Vec;

use controller::Controller;

/// Populated once by `init()`, read-only afterward. `spin::Once` rather
/// than `crate::sync::Mutex`: the IRQ handler reads this table, and that
/// mutex's `lock()` can block/yield under contention, which a hardware
/// interrupt handler must never do.
static CONTROLLERS: spin::Once<Vec<Controller>> = spin::Once::new();

/// Scan PCI for IDE functions, probe every discovered controller's two
/// device slots, and arm IRQ delivery for controllers with at least one
/// device present. Must run before interrupts are enabled (probe busy-
/// polls; see `probe.rs`).
pub fn init() {
    let mut controllers = pci::scan_and_register();
    if controllers.is_empty() {
        log::warn!("ide: no PCI IDE function found");
    }

    for controller in controllers.iter_mut() {
        let any_present = probe::probe_controller(controller);
        controller.enabled = any_present;
        if any_present {
            for device in &controller.devices {
                if device.is_present() {
                    // Un-mask device-generated interrupts (write 0 to the
                    // control register) now that probe's own nIEN use is
                    // done with this slot, per §4.7 step 7.
                    controller.task_file.lock().write_device_control(registers::DeviceControl::empty());
                }
            }
            log::info!("ide{}: ready, IRQ {} armed", controller.id, controller.irq);
        }
    }

    CONTROLLERS.call_once(|| controllers);
}

fn controllers() -> &'static [Controller] {
    CONTROLLERS.get().map(Vec::as_slice).unwrap_or(&[])
}

/// First enabled controller with at least one device present, if any.
/// Matches the shape the boot-time smoke test reaches for.
pub fn primary_controller() -> Option<&'static Controller> {
    controllers().iter().find(|c| c.enabled && c.devices.iter().any(|d| d.is_present()))
}

pub(crate) fn controller_for_irq(irq: u8) -> Option<&'static Controller> {
    controllers().iter().find(|c| c.irq == irq)
}

/// Every non-removable ATA hard disk across all registered controllers,
/// ready for the block-device registry (out of scope here) to adopt.
pub fn exported_block_devices() -> Vec<block::BlockDescriptor> {
    block::exported_block_devices(controllers())
}
