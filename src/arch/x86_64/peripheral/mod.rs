/*
 * Peripheral Device Management
 *
 * Early, always-on hardware bring-up that happens before the scheduler or
 * any driver subsystem exists: the legacy PIC and the COM2 UART used for
 * debug logging.
 */

pub mod pic;
pub mod uart_16550;

use spin::Mutex;

use crate::io::Pio;
use uart_16550::SerialPort;

/// Mutex-protected static instance of COM2 serial port.
pub static COM2: Mutex<SerialPort<Pio<u8>>> = Mutex::new(SerialPort::<Pio<u8>>::new(0x2F8));

/// Initializes the debug port (COM2) for logging.
///
/// This function should be called early in the boot process before any logging occurs.
pub fn init_debug_port() {
    COM2.lock().init();
}

/// Initializes the remaining peripherals (excluding the debug port).
pub fn init_peripherals() {
    pic::init_pic();
    log::info!("PIC initialization complete");
}
