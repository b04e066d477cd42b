use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;

bitflags::bitflags! {
    /// Resources a symbol was found to need while scanning relocations. The
    /// allocator turns each bit into a slot before the apply phase runs.
    #[derive(Clone, Copy, PartialEq, Eq, Default, Debug)]
    pub struct SymbolFlags: u32 {
        const NEEDS_GOT = 1 << 0;
        const NEEDS_PLT = 1 << 1;

        /// A GOT slot holding the symbol's offset from the thread pointer.
        const NEEDS_GOTTP = 1 << 2;

        /// A pair of GOT slots holding the symbol's module id and
        /// module-relative offset.
        const NEEDS_TLSGD = 1 << 3;

        const NEEDS_TLSDESC = 1 << 4;

        /// The symbol's storage is duplicated into the executable so that
        /// absolute references to it resolve statically.
        const NEEDS_COPY_REL = 1 << 5;

        /// An address-taken imported function; its PLT entry becomes the
        /// symbol's canonical address.
        const NEEDS_CANONICAL_PLT = 1 << 6;

        /// The symbol must appear in `.dynsym` so a symbolic dynamic
        /// relocation can name it.
        const NEEDS_DYNSYM = 1 << 7;
    }
}

/// Scan runs one thread per input file and multiple sections may reference
/// the same symbol, so flag updates are a bitwise OR on an atomic word.
/// Relaxed ordering is enough: the bits carry no pointer publication and the
/// phase ends with a barrier before the allocator reads them.
#[derive(Default, Debug)]
pub struct AtomicSymbolFlags(AtomicU32);

impl AtomicSymbolFlags {
    pub fn empty() -> Self {
        Self(AtomicU32::new(0))
    }

    pub fn fetch_or(&self, flags: SymbolFlags) {
        self.0.fetch_or(flags.bits(), Ordering::Relaxed);
    }

    pub fn get(&self) -> SymbolFlags {
        SymbolFlags::from_bits_retain(self.0.load(Ordering::Relaxed))
    }
}

#[test]
fn test_flag_or_is_idempotent() {
    let flags = AtomicSymbolFlags::empty();
    flags.fetch_or(SymbolFlags::NEEDS_GOT | SymbolFlags::NEEDS_PLT);
    flags.fetch_or(SymbolFlags::NEEDS_GOT);
    assert_eq!(flags.get(), SymbolFlags::NEEDS_GOT | SymbolFlags::NEEDS_PLT);
}
