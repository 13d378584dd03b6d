/*
 * BOOTBOOT Protocol Structures
 *
 * Defines the layout of the BOOTBOOT boot information block, which the
 * bootloader maps at the fixed virtual address `BOOTBOOT_CORE` before
 * jumping to `_start`. Only the fields the kernel actually reads are
 * given real meaning; the rest are kept to preserve the protocol's byte
 * layout.
 *
 * See https://gitlab.com/bztsrc/bootboot for the authoritative spec.
 */

/// Virtual address at which the bootloader maps the BOOTBOOT structure
/// and the memory map that follows it.
pub const BOOTBOOT_CORE: usize = 0xffff_ffff_ffe0_0000;

/// Memory map entry types (low 4 bits of `MMapEnt::size`).
pub const MMAP_USED: u32 = 0;
pub const MMAP_FREE: u32 = 1;
pub const MMAP_ACPI: u32 = 2;
pub const MMAP_MMIO: u32 = 3;

/// One entry in the BOOTBOOT memory map.
///
/// `size` packs the region size in its upper bits and the entry type in
/// its low 4 bits; callers must mask it before use (see `memory::phys`).
#[repr(C, packed)]
#[derive(Debug, Clone, Copy)]
pub struct MMapEnt {
    pub ptr: u64,
    pub size: u64,
}

/// The BOOTBOOT information block.
///
/// Mapped by the bootloader at `BOOTBOOT_CORE`; the memory map
/// (`Vec<MMapEnt>` worth of entries) immediately follows the `mmap` field
/// and is accessed via `addr_of!((*bootboot).mmap)` plus an entry count
/// derived from `size`.
#[repr(C, packed)]
pub struct BOOTBOOT {
    pub magic: [u8; 4],
    pub size: u32,
    pub protocol: u8,
    pub fb_type: u8,
    pub numcores: u16,
    pub bspid: u16,
    pub timezone: i16,
    pub datetime: [u8; 8],
    pub initrd_ptr: u64,
    pub initrd_size: u64,
    pub fb_ptr: u64,
    pub fb_size: u32,
    pub fb_width: u32,
    pub fb_height: u32,
    pub fb_scanline: u32,
    pub arch: BootbootArch,
    pub mmap: MMapEnt,
}

#[repr(C)]
pub union BootbootArch {
    pub x86_64: BootbootArchX86_64,
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct BootbootArchX86_64 {
    pub acpi_ptr: u64,
    pub smbi_ptr: u64,
    pub efi_ptr: u64,
    pub mp_ptr: u64,
    pub unused0: u64,
    pub unused1: u64,
    pub unused2: u64,
    pub unused3: u64,
}

// The linker script places the bootloader-mapped BOOTBOOT page at
// `BOOTBOOT_CORE`; `_start`'s naked prologue addresses it the same way
// (`lea rax, [rip + bootboot]`) before Rust code ever runs.
unsafe extern "C" {
    pub static bootboot: BOOTBOOT;
}
