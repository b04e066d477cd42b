use crate::elf::Rel;
use crate::elf::REL_ENTRY_SIZE;
use crate::error::Result;
use crate::symbols::SymbolId;
use anyhow::ensure;
use linker_utils::elf::shf;
use linker_utils::elf::SectionFlags;
use std::ops::Range;

/// One relocation against an input section: where, what, and against which
/// symbol of the owning file's symbol table. The addend is whatever bytes are
/// at `offset`.
#[derive(Clone, Copy, Debug)]
pub struct Relocation {
    pub offset: u32,
    pub r_type: u32,

    /// Index into the owning file's `symbols`.
    pub symbol: u32,
}

impl Relocation {
    /// Parses the raw content of a `.rel.*` section.
    pub fn parse_table(bytes: &[u8]) -> Result<Vec<Relocation>> {
        ensure!(
            bytes.len() % REL_ENTRY_SIZE as usize == 0,
            "relocation section size {} is not a multiple of {REL_ENTRY_SIZE}",
            bytes.len()
        );
        Ok(bytes
            .chunks_exact(REL_ENTRY_SIZE as usize)
            .map(|chunk| {
                let rel: Rel = bytemuck::pod_read_unaligned(chunk);
                Relocation {
                    offset: rel.r_offset,
                    r_type: rel.r_type(),
                    symbol: rel.r_sym(),
                }
            })
            .collect())
    }
}

/// A contiguous run of bytes from an input object, already placed in the
/// output address space by layout.
#[derive(Debug)]
pub struct InputSection {
    pub name: String,

    pub content: Vec<u8>,

    /// Runtime address of the section's first byte.
    pub address: u32,

    /// Where the section's bytes land in the output buffer.
    pub out_range: Range<usize>,

    pub flags: SectionFlags,

    pub relocations: Vec<Relocation>,

    /// Byte offset of this section's dynamic-relocation window within the
    /// owning file's reservation. Set during scan.
    pub reldyn_offset: u32,

    /// Number of dynamic relocations this section will emit. Set during scan.
    pub num_dynrel: u32,
}

impl InputSection {
    pub fn new(name: impl Into<String>, content: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            content,
            address: 0,
            out_range: 0..0,
            flags: shf::ALLOC,
            relocations: Vec::new(),
            reldyn_offset: 0,
            num_dynrel: 0,
        }
    }

    pub fn is_alloc(&self) -> bool {
        self.flags.contains(shf::ALLOC)
    }

    pub fn is_eh_frame(&self) -> bool {
        self.name == ".eh_frame"
    }
}

/// An input object file, reduced to what relocation processing needs: its
/// sections and the mapping from its local symbol indices to resolved
/// symbols.
#[derive(Debug, Default)]
pub struct ObjectFile {
    pub name: String,

    /// Local symbol table, after resolution: entry `i` is the global symbol
    /// that local symbol `i` resolved to.
    pub symbols: Vec<SymbolId>,

    pub sections: Vec<InputSection>,

    /// Total dynamic relocations this file's sections will emit. Accumulated
    /// during scan; the allocator sizes `.rel.dyn` from it.
    pub num_dynrel: u32,

    /// Byte offset of this file's window in `.rel.dyn`. Assigned by the
    /// allocator after scan.
    pub reldyn_offset: u32,
}

#[test]
fn test_parse_table() {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(bytemuck::bytes_of(&Rel::new(0x40, 2, 3)));
    bytes.extend_from_slice(bytemuck::bytes_of(&Rel::new(0x48, 43, 1)));
    let rels = Relocation::parse_table(&bytes).unwrap();
    assert_eq!(rels.len(), 2);
    assert_eq!(rels[0].offset, 0x40);
    assert_eq!(rels[0].r_type, object::elf::R_386_PC32);
    assert_eq!(rels[1].symbol, 1);
    assert_eq!(rels[1].r_type, object::elf::R_386_GOT32X);

    assert!(Relocation::parse_table(&bytes[..5]).is_err());
}
