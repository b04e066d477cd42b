//! The machine-dependent core of a static ELF linker for 32-bit x86.
//!
//! Inputs arrive already parsed, symbol-resolved and laid out; this crate
//! materialises the final bytes. The scan pass
//! ([`x86_32::scan_relocations`]) walks each allocatable section's
//! relocations and records, as atomic flag bits on the shared [`symbols`],
//! which symbols need GOT slots, PLT entries, TLS descriptors or dynamic
//! relocations. After the driver allocates those slots, the apply pass
//! ([`x86_32::apply_reloc_alloc`] and friends) patches relocation sites,
//! emits dynamic-relocation records into pre-reserved ranges, writes the
//! PLT, and performs the TLS and GOT relaxations the scan pass decided on.

pub mod args;
pub mod context;
pub mod elf;
pub mod error;
mod output;
pub mod resolution;
pub mod sections;
pub mod symbols;
pub mod x86_32;
