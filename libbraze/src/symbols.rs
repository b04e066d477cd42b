use crate::context::Context;
use crate::elf::GOT_ENTRY_SIZE;
use crate::resolution::AtomicSymbolFlags;

/// Index of a symbol in `Context::symbols`.
pub type SymbolId = usize;

/// Index of an input file in the driver's file list.
pub type FileId = u32;

/// A resolved symbol. Resolution itself happens upstream; by the time the
/// back-end sees one of these, `address` is final and the slot indices for
/// whatever `flags` requested have been assigned.
#[derive(Debug)]
pub struct Symbol {
    pub name: String,

    /// Virtual address of the definition. For TLS symbols this is the
    /// address within the TLS initialisation image.
    pub address: u32,

    /// `st_size` of the definition.
    pub size: u32,

    /// The file that defines the symbol. `None` means undefined; every
    /// relocation against it is reported.
    pub file: Option<FileId>,

    /// Defined by a shared library rather than the link. Cleared by the
    /// allocator when a copy relocation or canonical PLT entry re-homes the
    /// symbol into the output, at which point references resolve statically.
    pub imported: bool,

    /// An `SHN_ABS` symbol; its value is not an address and never gets a
    /// base relocation.
    pub absolute: bool,

    pub is_func: bool,
    pub is_ifunc: bool,

    /// The definition lived in a COMDAT group that lost deduplication.
    pub discarded: bool,

    pub flags: AtomicSymbolFlags,

    pub got_idx: Option<u32>,
    pub gotplt_idx: Option<u32>,
    pub plt_idx: Option<u32>,
    pub gottp_idx: Option<u32>,
    pub tlsgd_idx: Option<u32>,
    pub tlsdesc_idx: Option<u32>,
    pub dynsym_idx: Option<u32>,
}

impl Symbol {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: 0,
            size: 0,
            file: None,
            imported: false,
            absolute: false,
            is_func: false,
            is_ifunc: false,
            discarded: false,
            flags: AtomicSymbolFlags::empty(),
            got_idx: None,
            gotplt_idx: None,
            plt_idx: None,
            gottp_idx: None,
            tlsgd_idx: None,
            tlsdesc_idx: None,
            dynsym_idx: None,
        }
    }

    /// Non-preemptible and resolvable to a link-time address: the conditions
    /// under which a reference can skip its GOT slot.
    pub fn is_relative(&self) -> bool {
        !self.imported && !self.absolute
    }

    pub fn has_got(&self) -> bool {
        self.got_idx.is_some()
    }

    pub fn has_plt(&self) -> bool {
        self.plt_idx.is_some()
    }

    pub fn has_tlsgd(&self) -> bool {
        self.tlsgd_idx.is_some()
    }

    pub fn has_tlsdesc(&self) -> bool {
        self.tlsdesc_idx.is_some()
    }

    /// The address `S` that relocation formulae use. Imported functions and
    /// ifuncs that grew a PLT entry resolve to it.
    pub fn resolved_addr(&self, ctx: &Context) -> u32 {
        if let Some(plt_idx) = self.plt_idx {
            if self.imported || self.is_ifunc {
                return ctx.plt_addr + crate::elf::PLT_HDR_SIZE as u32
                    + plt_idx * crate::elf::PLT_ENTRY_SIZE as u32;
            }
        }
        self.address
    }

    pub fn gotplt_addr(&self, ctx: &Context) -> Option<u32> {
        self.gotplt_idx
            .map(|idx| ctx.gotplt_addr + idx * GOT_ENTRY_SIZE)
    }
}
