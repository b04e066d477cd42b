use crate::args::Args;
use crate::elf::GOT_ENTRY_SIZE;
use crate::error::Diagnostics;
use crate::symbols::Symbol;
use crate::symbols::SymbolId;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

/// Process-wide link state. Created by the driver, populated by layout and
/// slot allocation, then frozen: the scan and apply phases only take `&self`
/// and the only writable parts are atomics.
pub struct Context {
    pub args: Args,

    /// Address of `.got`. Position-independent code addresses everything
    /// GOT-related relative to this, with `%ebx` holding it at run time.
    pub got_addr: u32,

    /// Address of `.got.plt`.
    pub gotplt_addr: u32,

    /// Address of `.plt`.
    pub plt_addr: u32,

    /// The thread pointer (`%gs` base) the executable will see.
    pub tp_addr: u32,

    /// Start of the TLS block.
    pub tls_begin: u32,

    /// GOT slot index of the module-id/offset pair shared by every
    /// local-dynamic access, once allocated.
    pub tlsld_idx: Option<u32>,

    needs_tlsld: AtomicBool,

    pub symbols: Vec<Symbol>,

    pub diagnostics: Diagnostics,
}

impl Context {
    pub fn new(args: Args) -> Self {
        Self {
            args,
            got_addr: 0,
            gotplt_addr: 0,
            plt_addr: 0,
            tp_addr: 0,
            tls_begin: 0,
            tlsld_idx: None,
            needs_tlsld: AtomicBool::new(false),
            symbols: Vec::new(),
            diagnostics: Diagnostics::new(),
        }
    }

    pub fn symbol(&self, id: SymbolId) -> &Symbol {
        &self.symbols[id]
    }

    pub fn got_slot_addr(&self, idx: u32) -> u32 {
        self.got_addr + idx * GOT_ENTRY_SIZE
    }

    /// Records that some section uses the local-dynamic TLS model, so the
    /// allocator must reserve the shared module-id GOT pair.
    pub fn set_needs_tlsld(&self) {
        self.needs_tlsld.fetch_or(true, Ordering::Relaxed);
    }

    pub fn needs_tlsld(&self) -> bool {
        self.needs_tlsld.load(Ordering::Relaxed)
    }

    pub fn tlsld_addr(&self) -> Option<u32> {
        self.tlsld_idx.map(|idx| self.got_slot_addr(idx))
    }
}
