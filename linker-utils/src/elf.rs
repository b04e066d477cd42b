use std::borrow::Cow;
use std::fmt::Display;
use std::ops::BitOr;
use std::ops::BitOrAssign;

/// Section header flags (`sh_flags`). ELF32 stores these as a 32-bit word.
#[derive(Clone, Copy, PartialEq, Eq, Default, Debug)]
pub struct SectionFlags(u32);

/// `SHF_*` values, as `SectionFlags` so that call sites can write
/// `flags.contains(shf::ALLOC)`.
pub mod shf {
    use super::SectionFlags;

    pub const WRITE: SectionFlags = SectionFlags::from_u32(0x1);
    pub const ALLOC: SectionFlags = SectionFlags::from_u32(0x2);
    pub const EXECINSTR: SectionFlags = SectionFlags::from_u32(0x4);
    pub const MERGE: SectionFlags = SectionFlags::from_u32(0x10);
    pub const STRINGS: SectionFlags = SectionFlags::from_u32(0x20);
    pub const INFO_LINK: SectionFlags = SectionFlags::from_u32(0x40);
    pub const GROUP: SectionFlags = SectionFlags::from_u32(0x200);
    pub const TLS: SectionFlags = SectionFlags::from_u32(0x400);
}

impl SectionFlags {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn from_u32(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    #[must_use]
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for SectionFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for SectionFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl Display for SectionFlags {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// What a relocation computes, independently of its encoding. The i386 table
/// in `crate::x86_32` maps raw `R_386_*` values to one of these plus a field
/// width.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RelocationKind {
    /// S + A
    Absolute,

    /// S + A - P
    Relative,

    /// The offset of the symbol's GOT slot within the GOT, plus A.
    Got,

    /// S + A - P, but resolving via the symbol's PLT entry when it has one.
    PltRelative,

    /// S + A - GOT
    GotBaseRelative,

    /// GOT + A - P
    GotBasePc,

    /// S + A - TP
    TpOff,

    /// The absolute address of the symbol's TP-offset GOT slot, plus A.
    GotTpOff,

    /// As `GotTpOff`, but relative to the GOT base.
    GotTpOffGotBase,

    /// The GOT-base-relative address of the symbol's module-id/offset pair.
    /// Always paired with a follow-up relocation that materialises the call.
    TlsGd,

    /// As `TlsGd`, but for the module-local variant.
    TlsLd,

    /// S + A - the start of the TLS block.
    DtpOff,

    /// The GOT-base-relative address of the symbol's TLS descriptor.
    TlsDesc,

    /// Marks the indirect call through a TLS descriptor.
    TlsDescCall,

    /// The symbol's `st_size`, plus A.
    SymbolSize,

    /// No relocation needs to be applied.
    None,
}

pub fn x86_32_rel_type_to_string(r_type: u32) -> Cow<'static, str> {
    use crate::x86_32::rel;

    let s = match r_type {
        rel::R_386_NONE => "R_386_NONE",
        rel::R_386_32 => "R_386_32",
        rel::R_386_PC32 => "R_386_PC32",
        rel::R_386_GOT32 => "R_386_GOT32",
        rel::R_386_PLT32 => "R_386_PLT32",
        rel::R_386_COPY => "R_386_COPY",
        rel::R_386_GLOB_DAT => "R_386_GLOB_DAT",
        rel::R_386_JMP_SLOT => "R_386_JMP_SLOT",
        rel::R_386_RELATIVE => "R_386_RELATIVE",
        rel::R_386_GOTOFF => "R_386_GOTOFF",
        rel::R_386_GOTPC => "R_386_GOTPC",
        rel::R_386_TLS_TPOFF => "R_386_TLS_TPOFF",
        rel::R_386_TLS_IE => "R_386_TLS_IE",
        rel::R_386_TLS_GOTIE => "R_386_TLS_GOTIE",
        rel::R_386_TLS_LE => "R_386_TLS_LE",
        rel::R_386_TLS_GD => "R_386_TLS_GD",
        rel::R_386_TLS_LDM => "R_386_TLS_LDM",
        rel::R_386_16 => "R_386_16",
        rel::R_386_PC16 => "R_386_PC16",
        rel::R_386_8 => "R_386_8",
        rel::R_386_PC8 => "R_386_PC8",
        rel::R_386_TLS_LDO_32 => "R_386_TLS_LDO_32",
        rel::R_386_TLS_DTPMOD32 => "R_386_TLS_DTPMOD32",
        rel::R_386_TLS_DTPOFF32 => "R_386_TLS_DTPOFF32",
        rel::R_386_SIZE32 => "R_386_SIZE32",
        rel::R_386_TLS_GOTDESC => "R_386_TLS_GOTDESC",
        rel::R_386_TLS_DESC_CALL => "R_386_TLS_DESC_CALL",
        rel::R_386_TLS_DESC => "R_386_TLS_DESC",
        rel::R_386_IRELATIVE => "R_386_IRELATIVE",
        rel::R_386_GOT32X => "R_386_GOT32X",
        _ => return Cow::Owned(format!("Unknown relocation type ({r_type})")),
    };
    Cow::Borrowed(s)
}
