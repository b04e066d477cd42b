use crate::elf::RelocationKind;
use crate::relaxation::RelocationModifier;

/// i386 psABI relocation type values.
pub mod rel {
    pub const R_386_NONE: u32 = 0;
    pub const R_386_32: u32 = 1;
    pub const R_386_PC32: u32 = 2;
    pub const R_386_GOT32: u32 = 3;
    pub const R_386_PLT32: u32 = 4;
    pub const R_386_COPY: u32 = 5;
    pub const R_386_GLOB_DAT: u32 = 6;
    pub const R_386_JMP_SLOT: u32 = 7;
    pub const R_386_RELATIVE: u32 = 8;
    pub const R_386_GOTOFF: u32 = 9;
    pub const R_386_GOTPC: u32 = 10;
    pub const R_386_TLS_TPOFF: u32 = 14;
    pub const R_386_TLS_IE: u32 = 15;
    pub const R_386_TLS_GOTIE: u32 = 16;
    pub const R_386_TLS_LE: u32 = 17;
    pub const R_386_TLS_GD: u32 = 18;
    pub const R_386_TLS_LDM: u32 = 19;
    pub const R_386_16: u32 = 20;
    pub const R_386_PC16: u32 = 21;
    pub const R_386_8: u32 = 22;
    pub const R_386_PC8: u32 = 23;
    pub const R_386_TLS_LDO_32: u32 = 32;
    pub const R_386_TLS_DTPMOD32: u32 = 35;
    pub const R_386_TLS_DTPOFF32: u32 = 36;
    pub const R_386_SIZE32: u32 = 38;
    pub const R_386_TLS_GOTDESC: u32 = 39;
    pub const R_386_TLS_DESC_CALL: u32 = 40;
    pub const R_386_TLS_DESC: u32 = 41;
    pub const R_386_IRELATIVE: u32 = 42;
    pub const R_386_GOT32X: u32 = 43;
}

/// Returns what the relocation computes and how many bytes of the output it
/// patches. Addends are stored in the patched field on i386 (REL, not RELA),
/// so the width also governs how the addend is read.
pub fn relocation_kind_and_size(r_type: u32) -> Option<(RelocationKind, usize)> {
    let (kind, size) = match r_type {
        rel::R_386_NONE => (RelocationKind::None, 0),
        rel::R_386_8 => (RelocationKind::Absolute, 1),
        rel::R_386_16 => (RelocationKind::Absolute, 2),
        rel::R_386_32 => (RelocationKind::Absolute, 4),
        rel::R_386_PC8 => (RelocationKind::Relative, 1),
        rel::R_386_PC16 => (RelocationKind::Relative, 2),
        rel::R_386_PC32 => (RelocationKind::Relative, 4),
        rel::R_386_GOT32 | rel::R_386_GOT32X => (RelocationKind::Got, 4),
        rel::R_386_PLT32 => (RelocationKind::PltRelative, 4),
        rel::R_386_GOTOFF => (RelocationKind::GotBaseRelative, 4),
        rel::R_386_GOTPC => (RelocationKind::GotBasePc, 4),
        rel::R_386_TLS_LE => (RelocationKind::TpOff, 4),
        rel::R_386_TLS_IE => (RelocationKind::GotTpOff, 4),
        rel::R_386_TLS_GOTIE => (RelocationKind::GotTpOffGotBase, 4),
        rel::R_386_TLS_GD => (RelocationKind::TlsGd, 4),
        rel::R_386_TLS_LDM => (RelocationKind::TlsLd, 4),
        rel::R_386_TLS_LDO_32 => (RelocationKind::DtpOff, 4),
        rel::R_386_TLS_GOTDESC => (RelocationKind::TlsDesc, 4),
        rel::R_386_TLS_DESC_CALL => (RelocationKind::TlsDescCall, 0),
        rel::R_386_SIZE32 => (RelocationKind::SymbolSize, 4),
        _ => return None,
    };
    Some((kind, size))
}

/// In-place instruction rewrites for the i386 back-end. All of them assume
/// the compiler emitted the code sequence the psABI prescribes for the
/// relocation being relaxed; callers verify the opcode bytes before choosing
/// a kind. The rewritten sequence never exceeds the original footprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelaxationKind {
    /// Transforms a GOT load into a computation of the address it would have
    /// loaded. The transformation will look like
    /// `mov x@GOT(%reg1), %reg2` -> `lea x@GOTOFF(%reg1), %reg2`.
    MovIndirectToLea,

    /// Transform general dynamic (GD) into local exec, for the form whose
    /// follow-up relocation is against `___tls_get_addr` (PLT32/PC32). The
    /// `sub` immediate lands 5 bytes past the original relocation offset.
    TlsGdToLocalExec,

    /// As above, but for the GOT32/GOT32X follow-up form, whose sequence
    /// starts one byte later.
    TlsGdToLocalExecViaGot,

    /// Transform local dynamic (LD) into local exec (PLT32/PC32 follow-up).
    TlsLdToLocalExec,

    /// As above for the GOT32/GOT32X follow-up form; one trailing `nop`
    /// keeps the original footprint.
    TlsLdToLocalExecViaGot,

    /// Transform a TLS-descriptor address load into `lea` of the TP-relative
    /// offset.
    TlsDescToLocalExec,

    /// Replace the indirect call through a TLS descriptor with a 2-byte nop.
    TlsDescCallToNop,

    /// Leave the instruction alone.
    NoOp,
}

impl RelaxationKind {
    pub fn apply(
        self,
        section_bytes: &mut [u8],
        offset_in_section: &mut u64,
        next_modifier: &mut RelocationModifier,
    ) {
        let offset = *offset_in_section as usize;
        match self {
            RelaxationKind::MovIndirectToLea => {
                section_bytes[offset - 2] = 0x8d;
            }
            RelaxationKind::TlsGdToLocalExec => {
                section_bytes[offset - 3..offset + 9].copy_from_slice(&[
                    0x65, 0xa1, 0, 0, 0, 0, // mov %gs:0, %eax
                    0x81, 0xe8, 0, 0, 0, 0, // sub {offset}, %eax
                ]);
                *offset_in_section += 5;
                *next_modifier = RelocationModifier::SkipNextRelocation;
            }
            RelaxationKind::TlsGdToLocalExecViaGot => {
                section_bytes[offset - 2..offset + 10].copy_from_slice(&[
                    0x65, 0xa1, 0, 0, 0, 0, // mov %gs:0, %eax
                    0x81, 0xe8, 0, 0, 0, 0, // sub {offset}, %eax
                ]);
                *offset_in_section += 6;
                *next_modifier = RelocationModifier::SkipNextRelocation;
            }
            RelaxationKind::TlsLdToLocalExec => {
                section_bytes[offset - 2..offset + 9].copy_from_slice(&[
                    0x31, 0xc0, // xor %eax, %eax
                    0x65, 0x8b, 0x00, // mov %gs:(%eax), %eax
                    0x81, 0xe8, 0, 0, 0, 0, // sub {size}, %eax
                ]);
                *offset_in_section += 5;
                *next_modifier = RelocationModifier::SkipNextRelocation;
            }
            RelaxationKind::TlsLdToLocalExecViaGot => {
                section_bytes[offset - 2..offset + 10].copy_from_slice(&[
                    0x31, 0xc0, // xor %eax, %eax
                    0x65, 0x8b, 0x00, // mov %gs:(%eax), %eax
                    0x81, 0xe8, 0, 0, 0, 0, // sub {size}, %eax
                    0x90, // nop
                ]);
                *offset_in_section += 5;
                *next_modifier = RelocationModifier::SkipNextRelocation;
            }
            RelaxationKind::TlsDescToLocalExec => {
                section_bytes[offset - 2..offset + 4].copy_from_slice(&[
                    0x8d, 0x05, 0, 0, 0, 0, // lea {offset}, %eax
                ]);
            }
            RelaxationKind::TlsDescCallToNop => {
                section_bytes[offset..offset + 2].copy_from_slice(&[0x66, 0x90]);
            }
            RelaxationKind::NoOp => {}
        }
    }
}

#[test]
fn test_mov_indirect_to_lea() {
    // mov x@GOT(%ebx), %eax
    let mut bytes = vec![0x8b, 0x83, 0, 0, 0, 0];
    let mut offset = 2;
    let mut modifier = RelocationModifier::Normal;
    RelaxationKind::MovIndirectToLea.apply(&mut bytes, &mut offset, &mut modifier);
    assert_eq!(bytes, [0x8d, 0x83, 0, 0, 0, 0]);
    assert_eq!(offset, 2);
    assert_eq!(modifier, RelocationModifier::Normal);
}

#[test]
fn test_tls_gd_to_local_exec() {
    // lea x@tlsgd(,%ebx,1), %eax; call ___tls_get_addr@plt
    let mut bytes = vec![0x8d, 0x04, 0x1d, 0, 0, 0, 0, 0xe8, 0, 0, 0, 0];
    let mut offset = 3;
    let mut modifier = RelocationModifier::Normal;
    RelaxationKind::TlsGdToLocalExec.apply(&mut bytes, &mut offset, &mut modifier);
    assert_eq!(
        bytes,
        [0x65, 0xa1, 0, 0, 0, 0, 0x81, 0xe8, 0, 0, 0, 0],
        "expected mov %gs:0,%eax; sub $0,%eax"
    );
    assert_eq!(offset, 8);
    assert_eq!(modifier, RelocationModifier::SkipNextRelocation);
}

#[test]
fn test_tls_ld_to_local_exec() {
    // lea x@tlsldm(%ebx), %eax; call ___tls_get_addr@plt
    let mut bytes = vec![0x8d, 0x83, 0, 0, 0, 0, 0xe8, 0, 0, 0, 0];
    let mut offset = 2;
    let mut modifier = RelocationModifier::Normal;
    RelaxationKind::TlsLdToLocalExec.apply(&mut bytes, &mut offset, &mut modifier);
    assert_eq!(
        bytes,
        [0x31, 0xc0, 0x65, 0x8b, 0x00, 0x81, 0xe8, 0, 0, 0, 0],
    );
    assert_eq!(offset, 7);
    assert_eq!(modifier, RelocationModifier::SkipNextRelocation);
}

#[test]
fn test_tls_desc_call_to_nop() {
    let mut bytes = vec![0xff, 0x10]; // call *(%eax)
    let mut offset = 0;
    let mut modifier = RelocationModifier::Normal;
    RelaxationKind::TlsDescCallToNop.apply(&mut bytes, &mut offset, &mut modifier);
    assert_eq!(bytes, [0x66, 0x90]);
    assert_eq!(modifier, RelocationModifier::Normal);
}
