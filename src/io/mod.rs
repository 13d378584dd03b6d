/*
 * Input/Output System
 *
 * Low-level port I/O primitives for hardware communication. This is the
 * foundation every device driver (serial, PIC, IDE) builds register access
 * on top of.
 */

pub mod pio;

#[cfg(test)]
pub mod sim;

pub use pio::{Io, Pio, ReadOnly};

#[cfg(test)]
pub use sim::SimPort;
