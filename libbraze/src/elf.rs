use crate::error::Result;
use anyhow::anyhow;
use anyhow::bail;
use bytemuck::Pod;
use bytemuck::Zeroable;
use linker_utils::elf::x86_32_rel_type_to_string;
use linker_utils::elf::RelocationKind;

pub const GOT_ENTRY_SIZE: u32 = 4;
pub const PLT_ENTRY_SIZE: usize = 16;
pub const PLT_HDR_SIZE: usize = 16;
pub const REL_ENTRY_SIZE: u32 = 8;

/// A raw ELF32 REL record. There is no addend field; the addend lives in the
/// bytes the relocation patches. i386 outputs are always little-endian and we
/// only build on little-endian hosts, so plain integer fields are fine here.
#[derive(Zeroable, Pod, Clone, Copy, Debug)]
#[repr(C)]
pub struct Rel {
    pub r_offset: u32,
    pub r_info: u32,
}

impl Rel {
    pub fn new(offset: u32, r_type: u32, sym: u32) -> Self {
        Self {
            r_offset: offset,
            r_info: (sym << 8) | (r_type & 0xff),
        }
    }

    pub fn r_type(self) -> u32 {
        self.r_info & 0xff
    }

    pub fn r_sym(self) -> u32 {
        self.r_info >> 8
    }
}

/// The dynamic relocations an i386 output can carry, by role. The scanner
/// decides which of these a site needs; slots for GOT/PLT entries are filled
/// by the allocator using the same mapping.
#[derive(Clone, Copy, Debug)]
pub enum DynamicRelocationKind {
    Copy,
    Irelative,
    DtpMod,
    DtpOff,
    TpOff,
    Relative,
    Absolute,
    GotEntry,
    JumpSlot,
    TlsDesc,
}

impl DynamicRelocationKind {
    pub fn r_type(self) -> u32 {
        match self {
            DynamicRelocationKind::Copy => object::elf::R_386_COPY,
            DynamicRelocationKind::Irelative => object::elf::R_386_IRELATIVE,
            DynamicRelocationKind::DtpMod => object::elf::R_386_TLS_DTPMOD32,
            DynamicRelocationKind::DtpOff => object::elf::R_386_TLS_DTPOFF32,
            DynamicRelocationKind::TpOff => object::elf::R_386_TLS_TPOFF,
            DynamicRelocationKind::Relative => object::elf::R_386_RELATIVE,
            DynamicRelocationKind::Absolute => object::elf::R_386_32,
            DynamicRelocationKind::GotEntry => object::elf::R_386_GLOB_DAT,
            DynamicRelocationKind::JumpSlot => object::elf::R_386_JMP_SLOT,
            DynamicRelocationKind::TlsDesc => object::elf::R_386_TLS_DESC,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct RelocationKindInfo {
    pub kind: RelocationKind,
    pub size: usize,
}

impl RelocationKindInfo {
    pub fn from_raw(r_type: u32) -> Result<Self> {
        let (kind, size) = linker_utils::x86_32::relocation_kind_and_size(r_type)
            .ok_or_else(|| {
                anyhow!(
                    "Unsupported relocation type {}",
                    x86_32_rel_type_to_string(r_type)
                )
            })?;
        Ok(Self { kind, size })
    }
}

/// Reads the in-place addend at the start of `loc`, sign-extended from the
/// relocation's field width.
pub fn read_addend(loc: &[u8], rel: RelocationKindInfo) -> i64 {
    match rel.size {
        0 => 0,
        1 => loc[0] as i8 as i64,
        2 => i16::from_le_bytes([loc[0], loc[1]]) as i64,
        4 => i32::from_le_bytes([loc[0], loc[1], loc[2], loc[3]]) as i64,
        _ => unreachable!("relocation field width {}", rel.size),
    }
}

/// Writes the low bits of `value` at the start of `loc`, little-endian, using
/// the relocation's field width. Truncates; range checking is the applier's
/// business, for the types that have it.
pub fn write_addend(loc: &mut [u8], value: i64, rel: RelocationKindInfo) {
    match rel.size {
        0 => {}
        1 => loc[0] = value as u8,
        2 => loc[..2].copy_from_slice(&(value as u16).to_le_bytes()),
        4 => loc[..4].copy_from_slice(&(value as u32).to_le_bytes()),
        _ => unreachable!("relocation field width {}", rel.size),
    }
}

/// Writes dynamic relocations into the window of `.rel.dyn` that the scan
/// phase reserved for one input section. Each section writes at its own
/// pre-computed offset, so concurrently applied sections never contend.
pub struct RelWriter<'out> {
    buf: &'out mut [u8],
    pos: usize,
}

impl<'out> RelWriter<'out> {
    pub fn new(buf: &'out mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn push(&mut self, offset: u32, kind: DynamicRelocationKind, sym: u32) -> Result {
        let end = self.pos + REL_ENTRY_SIZE as usize;
        if end > self.buf.len() {
            bail!("dynamic relocation overflows the space reserved during scan");
        }
        let rel = Rel::new(offset, kind.r_type(), sym);
        self.buf[self.pos..end].copy_from_slice(bytemuck::bytes_of(&rel));
        self.pos = end;
        Ok(())
    }
}

#[test]
fn test_addend_round_trip() {
    let info = RelocationKindInfo::from_raw(object::elf::R_386_PC16).unwrap();
    let mut buf = [0xffu8; 4];
    write_addend(&mut buf, -2, info);
    assert_eq!(buf, [0xfe, 0xff, 0xff, 0xff]);
    assert_eq!(read_addend(&buf, info), -2);
}

#[test]
fn test_write_addend_truncates() {
    let info = RelocationKindInfo::from_raw(object::elf::R_386_8).unwrap();
    let mut buf = [0u8; 4];
    write_addend(&mut buf, 0x1_02, info);
    assert_eq!(buf, [0x02, 0, 0, 0]);
}

#[test]
fn test_rel_info_packing() {
    let rel = Rel::new(0x1000, object::elf::R_386_RELATIVE, 7);
    assert_eq!(rel.r_type(), 8);
    assert_eq!(rel.r_sym(), 7);
    assert_eq!(bytemuck::bytes_of(&rel), [0, 0x10, 0, 0, 8, 7, 0, 0]);
}
