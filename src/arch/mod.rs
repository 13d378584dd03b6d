/*
 * Architecture Support
 *
 * Dispatches to the architecture-specific submodule. CLUU only targets
 * x86_64 today.
 */

#[cfg(target_arch = "x86_64")]
#[macro_use]
pub mod x86_64;
