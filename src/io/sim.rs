/*
 * Simulated I/O Port
 *
 * A fake `Io` implementation for unit tests that exercise register-polling
 * code (`command.rs`'s busy-wait loops, `registers::TaskFile`'s accessors)
 * without real hardware. Tests that just need a fixed value use `SimPort::
 * fixed`; tests simulating a register that changes across repeated reads
 * (BSY clearing after N polls) queue a sequence with `SimPort::sequence`
 * and each `read()` advances through it, holding the last value once the
 * queue is drained.
 */

use alloc::vec::Vec;
use core::cell::RefCell;

use super::Io;

pub struct SimPort<T> {
    reads: RefCell<Vec<T>>,
    pos: RefCell<usize>,
    writes: RefCell<Vec<T>>,
}

impl<T: Copy> SimPort<T> {
    /// A port that always reads as `value`.
    pub fn fixed(value: T) -> Self {
        Self::sequence(alloc::vec![value])
    }

    /// A port whose reads walk through `values` in order, then repeat the
    /// last entry forever. `values` must not be empty.
    pub fn sequence(values: Vec<T>) -> Self {
        assert!(!values.is_empty(), "SimPort::sequence needs at least one value");
        Self {
            reads: RefCell::new(values),
            pos: RefCell::new(0),
            writes: RefCell::new(Vec::new()),
        }
    }

    /// Every value passed to `write`, in call order.
    pub fn writes(&self) -> Vec<T> {
        self.writes.borrow().clone()
    }
}

impl<T> Io for SimPort<T>
where
    T: Copy + PartialEq + core::ops::BitAnd<Output = T> + core::ops::BitOr<Output = T> + core::ops::Not<Output = T>,
{
    type Value = T;

    fn read(&self) -> T {
        let reads = self.reads.borrow();
        let mut pos = self.pos.borrow_mut();
        let value = reads[(*pos).min(reads.len() - 1)];
        if *pos < reads.len() - 1 {
            *pos += 1;
        }
        value
    }

    fn write(&mut self, value: T) {
        self.writes.borrow_mut().push(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_always_reads_same_value() {
        let p: SimPort<u8> = SimPort::fixed(0x42);
        assert_eq!(p.read(), 0x42);
        assert_eq!(p.read(), 0x42);
    }

    #[test]
    fn sequence_advances_then_holds_last() {
        let p: SimPort<u8> = SimPort::sequence(alloc::vec![0x80, 0x80, 0x08]);
        assert_eq!(p.read(), 0x80);
        assert_eq!(p.read(), 0x80);
        assert_eq!(p.read(), 0x08);
        assert_eq!(p.read(), 0x08);
    }

    #[test]
    fn write_is_recorded() {
        let mut p: SimPort<u16> = SimPort::fixed(0);
        p.write(0x1234);
        p.write(0x5678);
        assert_eq!(p.writes(), alloc::vec![0x1234, 0x5678]);
    }
}
