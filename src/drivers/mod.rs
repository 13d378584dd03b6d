/*
 * Device Drivers
 *
 * Top-level namespace for hardware drivers. Currently home to the
 * mass-storage stack; sibling driver families (network, display, ...) would
 * live alongside `storage` the same way.
 */

pub mod storage;
