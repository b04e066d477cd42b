//! The i386 back-end. Turns scanned, laid-out input sections into final
//! bytes: patches relocation sites, synthesizes the PLT, and rewrites
//! GOT-indirect and TLS code sequences in place where the output kind lets a
//! more general access model collapse into a cheaper one.
//!
//! Everything here works on ELF32 REL relocations, so addends live in the
//! bytes being patched and are read before they're overwritten.

use crate::args::OutputKind;
use crate::context::Context;
use crate::elf::read_addend;
use crate::elf::write_addend;
use crate::elf::DynamicRelocationKind;
use crate::elf::RelWriter;
use crate::elf::RelocationKindInfo;
use crate::elf::GOT_ENTRY_SIZE;
use crate::elf::PLT_ENTRY_SIZE;
use crate::elf::PLT_HDR_SIZE;
use crate::elf::REL_ENTRY_SIZE;
use crate::error::Result;
use crate::output;
use crate::resolution::SymbolFlags;
use crate::sections::InputSection;
use crate::sections::ObjectFile;
use crate::sections::Relocation;
use crate::symbols::Symbol;
use crate::symbols::SymbolId;
use anyhow::anyhow;
use anyhow::bail;
use anyhow::ensure;
use anyhow::Context as _;
use itertools::Itertools;
use linker_utils::elf::shf;
use linker_utils::elf::x86_32_rel_type_to_string;
use linker_utils::relaxation::RelocationModifier;
use linker_utils::x86_32::RelaxationKind;
use object::elf::*;
use rayon::prelude::*;

const PLT_HDR_PIC: &[u8] = &[
    0xf3, 0x0f, 0x1e, 0xfb, // endbr32
    0x51, // push %ecx
    0x8d, 0x8b, 0, 0, 0, 0, // lea GOTPLT+4(%ebx), %ecx
    0xff, 0x31, // push (%ecx)
    0xff, 0x61, 0x04, // jmp *4(%ecx)
];

const PLT_HDR_NO_PIC: &[u8] = &[
    0xf3, 0x0f, 0x1e, 0xfb, // endbr32
    0x51, // push %ecx
    0xb9, 0, 0, 0, 0, // mov $GOTPLT+4, %ecx
    0xff, 0x31, // push (%ecx)
    0xff, 0x61, 0x04, // jmp *4(%ecx)
    0xcc, // (padding)
];

const PLT_ENTRY_PIC: &[u8] = &[
    0xf3, 0x0f, 0x1e, 0xfb, // endbr32
    0xb9, 0, 0, 0, 0, // mov $reloc_offset, %ecx
    0xff, 0xa3, 0, 0, 0, 0, // jmp *foo@GOT(%ebx)
    0xcc, // (padding)
];

const PLT_ENTRY_NO_PIC: &[u8] = &[
    0xf3, 0x0f, 0x1e, 0xfb, // endbr32
    0xb9, 0, 0, 0, 0, // mov $reloc_offset, %ecx
    0xff, 0x25, 0, 0, 0, 0, // jmp *foo@GOT
    0xcc, // (padding)
];

const PLTGOT_ENTRY_PIC: &[u8] = &[
    0xf3, 0x0f, 0x1e, 0xfb, // endbr32
    0xff, 0xa3, 0, 0, 0, 0, // jmp *foo@GOT(%ebx)
    0xcc, 0xcc, 0xcc, 0xcc, 0xcc, 0xcc, // (padding)
];

const PLTGOT_ENTRY_NO_PIC: &[u8] = &[
    0xf3, 0x0f, 0x1e, 0xfb, // endbr32
    0xff, 0x25, 0, 0, 0, 0, // jmp *foo@GOT
    0xcc, 0xcc, 0xcc, 0xcc, 0xcc, 0xcc, // (padding)
];

const _ASSERTS: () = {
    assert!(PLT_HDR_PIC.len() == PLT_HDR_SIZE);
    assert!(PLT_HDR_NO_PIC.len() == PLT_HDR_SIZE);
    assert!(PLT_ENTRY_PIC.len() == PLT_ENTRY_SIZE);
    assert!(PLT_ENTRY_NO_PIC.len() == PLT_ENTRY_SIZE);
    assert!(PLTGOT_ENTRY_PIC.len() == PLT_ENTRY_SIZE);
    assert!(PLTGOT_ENTRY_NO_PIC.len() == PLT_ENTRY_SIZE);
};

/// Writes the first PLT entry, which pushes the module identifier and tail
/// calls the dynamic linker's resolver through `.got.plt` slots 1 and 2.
/// Position-independent outputs address `.got.plt` relative to `%ebx`, which
/// calling conventions require to hold the `.got` address.
pub fn write_plt_header(ctx: &Context, buf: &mut [u8]) {
    let buf = &mut buf[..PLT_HDR_SIZE];
    if ctx.args.output_kind.is_pic() {
        buf.copy_from_slice(PLT_HDR_PIC);
        let disp = ctx.gotplt_addr.wrapping_sub(ctx.got_addr).wrapping_add(4);
        buf[7..11].copy_from_slice(&disp.to_le_bytes());
    } else {
        buf.copy_from_slice(PLT_HDR_NO_PIC);
        buf[6..10].copy_from_slice(&(ctx.gotplt_addr.wrapping_add(4)).to_le_bytes());
    }
}

/// Writes one lazy PLT entry. `%ecx` receives the byte offset of the
/// symbol's JUMP_SLOT relocation in `.rel.plt`, which is what the resolver
/// stub in the header expects on its stack.
pub fn write_plt_entry(ctx: &Context, buf: &mut [u8], sym: &Symbol) -> Result {
    let buf = &mut buf[..PLT_ENTRY_SIZE];
    let plt_idx = slot(sym.plt_idx, sym, "PLT")?;
    let gotplt_addr = sym
        .gotplt_addr(ctx)
        .with_context(|| format!("no .got.plt slot allocated for `{}`", sym.name))?;
    let reloc_offset = plt_idx * REL_ENTRY_SIZE;
    if ctx.args.output_kind.is_pic() {
        buf.copy_from_slice(PLT_ENTRY_PIC);
        buf[11..15].copy_from_slice(&gotplt_addr.wrapping_sub(ctx.got_addr).to_le_bytes());
    } else {
        buf.copy_from_slice(PLT_ENTRY_NO_PIC);
        buf[11..15].copy_from_slice(&gotplt_addr.to_le_bytes());
    }
    buf[5..9].copy_from_slice(&reloc_offset.to_le_bytes());
    Ok(())
}

/// Writes a non-lazy PLT entry for a symbol that has a GOT slot but no
/// JUMP_SLOT relocation: a plain indirect jump through the GOT.
pub fn write_pltgot_entry(ctx: &Context, buf: &mut [u8], sym: &Symbol) -> Result {
    let buf = &mut buf[..PLT_ENTRY_SIZE];
    let got_addr = ctx.got_slot_addr(slot(sym.got_idx, sym, "GOT")?);
    if ctx.args.output_kind.is_pic() {
        buf.copy_from_slice(PLTGOT_ENTRY_PIC);
        buf[6..10].copy_from_slice(&got_addr.wrapping_sub(ctx.got_addr).to_le_bytes());
    } else {
        buf.copy_from_slice(PLTGOT_ENTRY_NO_PIC);
        buf[6..10].copy_from_slice(&got_addr.to_le_bytes());
    }
    Ok(())
}

/// Lays down `.plt`: the header followed by one entry per symbol, in
/// `plt_idx` order.
#[tracing::instrument(skip_all)]
pub fn write_plt(ctx: &Context, buf: &mut [u8], syms: &[&Symbol]) -> Result {
    ensure!(
        buf.len() == PLT_HDR_SIZE + syms.len() * PLT_ENTRY_SIZE,
        ".plt is {} bytes but {} entries were allocated",
        buf.len(),
        syms.len()
    );
    let (hdr, entries) = buf.split_at_mut(PLT_HDR_SIZE);
    write_plt_header(ctx, hdr);
    for (sym, entry) in syms.iter().zip(entries.chunks_exact_mut(PLT_ENTRY_SIZE)) {
        write_plt_entry(ctx, entry, sym)?;
    }
    Ok(())
}

/// Lays down `.plt.got` (no header).
#[tracing::instrument(skip_all)]
pub fn write_pltgot(ctx: &Context, buf: &mut [u8], syms: &[&Symbol]) -> Result {
    ensure!(
        buf.len() == syms.len() * PLT_ENTRY_SIZE,
        ".plt.got is {} bytes but {} entries were allocated",
        buf.len(),
        syms.len()
    );
    for (sym, entry) in syms.iter().zip(buf.chunks_exact_mut(PLT_ENTRY_SIZE)) {
        write_pltgot_entry(ctx, entry, sym)?;
    }
    Ok(())
}

/// What the scanner decides to do about an absolute or PC-relative
/// reference, given the output kind and what kind of symbol it names.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Action {
    /// The value is a link-time constant; patch and move on.
    Skip,

    /// The reference cannot be expressed in this output kind.
    Error,

    /// Duplicate the imported definition into the executable so absolute
    /// references to it resolve statically.
    CopyRel,

    /// Give the imported function a PLT entry and make that entry its
    /// address everywhere.
    CanonicalPlt,

    Plt,

    /// Symbolic dynamic relocation, resolved at load time.
    DynRel,

    /// `R_386_RELATIVE`: add the load base at load time.
    BaseRel,
}

// Policy tables for the relocation families that may need the dynamic
// linker's help. Rows: shared object, position-independent executable,
// position-dependent executable. Columns: absolute symbol, local symbol,
// imported data, imported function.

/// `R_386_8` / `R_386_16`: too narrow to hold a runtime-computed address, so
/// nothing here may produce a dynamic relocation.
const ABSREL_TABLE: [[Action; 4]; 3] = [
    [Action::Skip, Action::Skip, Action::Error, Action::Error],
    [Action::Skip, Action::Skip, Action::Error, Action::Error],
    [Action::Skip, Action::Skip, Action::CopyRel, Action::CanonicalPlt],
];

/// `R_386_32`: word-sized, so the site itself can be fixed up at load time.
const DYN_ABSREL_TABLE: [[Action; 4]; 3] = [
    [Action::Skip, Action::BaseRel, Action::DynRel, Action::DynRel],
    [Action::Skip, Action::BaseRel, Action::DynRel, Action::DynRel],
    [Action::Skip, Action::Skip, Action::CopyRel, Action::CanonicalPlt],
];

/// `R_386_PC8` / `R_386_PC16` / `R_386_PC32`.
const PCREL_TABLE: [[Action; 4]; 3] = [
    [Action::Error, Action::Skip, Action::Error, Action::Plt],
    [Action::Error, Action::Skip, Action::CopyRel, Action::Plt],
    [Action::Skip, Action::Skip, Action::CopyRel, Action::CanonicalPlt],
];

fn table_row(kind: OutputKind) -> usize {
    match kind {
        OutputKind::SharedObject => 0,
        OutputKind::PieExecutable => 1,
        OutputKind::Executable => 2,
    }
}

fn table_column(sym: &Symbol) -> usize {
    if sym.absolute {
        0
    } else if !sym.imported {
        1
    } else if sym.is_func {
        3
    } else {
        2
    }
}

fn scan_table(
    ctx: &Context,
    sym: &Symbol,
    isec: &InputSection,
    r: &Relocation,
    table: &[[Action; 4]; 3],
    num_dynrel: &mut u32,
) {
    let action = table[table_row(ctx.args.output_kind)][table_column(sym)];
    match action {
        Action::Skip => {}
        Action::Error => ctx.diagnostics.error(anyhow!(
            "{}: relocation {} against `{}` can not be used when making a \
             position-independent output; recompile with -fPIC",
            isec.name,
            x86_32_rel_type_to_string(r.r_type),
            sym.name
        )),
        Action::CopyRel => sym.flags.fetch_or(SymbolFlags::NEEDS_COPY_REL),
        Action::CanonicalPlt => sym.flags.fetch_or(SymbolFlags::NEEDS_CANONICAL_PLT),
        Action::Plt => sym.flags.fetch_or(SymbolFlags::NEEDS_PLT),
        Action::DynRel => {
            if !isec.flags.contains(shf::WRITE) {
                ctx.diagnostics.error(anyhow!(
                    "{}: relocation against `{}` in a read-only section; \
                     recompile with -fPIC",
                    isec.name,
                    sym.name
                ));
            }
            sym.flags.fetch_or(SymbolFlags::NEEDS_DYNSYM);
            *num_dynrel += 1;
        }
        Action::BaseRel => *num_dynrel += 1,
    }
}

/// The GOT32X rewrite only applies to a GOT load, whose opcode sits
/// immediately before the displacement field the relocation patches.
fn is_relaxable_got32x(bytes: &[u8], offset: u32) -> bool {
    offset >= 2 && bytes.get(offset as usize - 2) == Some(&0x8b)
}

fn relax_got32x(ctx: &Context, sym: &Symbol, isec: &InputSection, offset: u32) -> bool {
    ctx.args.relax && sym.is_relative() && is_relaxable_got32x(&isec.content, offset)
}

/// General-dynamic and TLS-descriptor accesses collapse to local-exec when
/// the TP offset is a link-time constant: the output is an executable and
/// the symbol can't be preempted.
fn relax_tls_gd(ctx: &Context, sym: &Symbol) -> bool {
    ctx.args.relax && ctx.args.output_kind.is_executable() && !sym.imported
}

fn relax_tls_ld(ctx: &Context) -> bool {
    ctx.args.relax && ctx.args.output_kind.is_executable()
}

fn relax_tls_desc(ctx: &Context, sym: &Symbol) -> bool {
    relax_tls_gd(ctx, sym)
}

fn slot(idx: Option<u32>, sym: &Symbol, what: &str) -> Result<u32> {
    idx.with_context(|| format!("no {what} slot allocated for `{}`", sym.name))
}

fn relocation_symbol<'ctx>(
    ctx: &'ctx Context,
    symbols: &[SymbolId],
    isec: &InputSection,
    r: &Relocation,
) -> Result<&'ctx Symbol> {
    let id = symbols.get(r.symbol as usize).copied().with_context(|| {
        format!(
            "{}: relocation references symbol {} outside the file's symbol table",
            isec.name, r.symbol
        )
    })?;
    Ok(ctx.symbol(id))
}

/// TLS_GD and TLS_LDM are immediately followed by the relocation for the
/// `___tls_get_addr` call; which one tells us the exact code sequence the
/// compiler emitted. A missing or unexpected follower is a malformed object.
fn paired_follower(isec: &InputSection, i: usize) -> Result<u32> {
    let rel_name = x86_32_rel_type_to_string(isec.relocations[i].r_type);
    let follower = isec.relocations.get(i + 1).with_context(|| {
        format!(
            "{}: {rel_name} must be followed by the relocation for its \
             ___tls_get_addr call",
            isec.name
        )
    })?;
    ensure!(
        matches!(
            follower.r_type,
            R_386_PLT32 | R_386_PC32 | R_386_GOT32 | R_386_GOT32X
        ),
        "{}: {rel_name} is followed by {}, expected PLT32/PC32/GOT32/GOT32X",
        isec.name,
        x86_32_rel_type_to_string(follower.r_type)
    );
    Ok(follower.r_type)
}

/// Byte window each rewrite touches, relative to the relocation offset.
/// Checked before rewriting so a truncated section can't take us out of
/// bounds.
fn relax_in_place(
    kind: RelaxationKind,
    out: &mut [u8],
    offset: &mut u64,
    modifier: &mut RelocationModifier,
    section: &str,
) -> Result {
    let (back, ahead) = match kind {
        RelaxationKind::MovIndirectToLea => (2, 0),
        RelaxationKind::TlsGdToLocalExec => (3, 9),
        RelaxationKind::TlsGdToLocalExecViaGot => (2, 10),
        RelaxationKind::TlsLdToLocalExec => (2, 9),
        RelaxationKind::TlsLdToLocalExecViaGot => (2, 10),
        RelaxationKind::TlsDescToLocalExec => (2, 4),
        RelaxationKind::TlsDescCallToNop => (0, 2),
        RelaxationKind::NoOp => (0, 0),
    };
    ensure!(
        *offset >= back && *offset as usize + ahead <= out.len(),
        "{section}: relaxed instruction sequence at {offset:#x} does not fit \
         in the section"
    );
    kind.apply(out, offset, modifier);
    Ok(())
}

/// Scan pass over one file. Decides, per relocation, what resources its
/// symbol needs, and reserves this file's dynamic-relocation range so the
/// apply pass can emit records at deterministic offsets. Files scan
/// concurrently; sections within a file scan in order so the per-file
/// cursor stays deterministic.
#[tracing::instrument(skip_all, fields(file = %file.name))]
pub fn scan_relocations(ctx: &Context, file: &mut ObjectFile) -> Result {
    let ObjectFile {
        symbols,
        sections,
        num_dynrel,
        ..
    } = file;
    for isec in sections.iter_mut() {
        // Non-allocatable sections can't create dynamic relocations or
        // GOT/PLT slots, so there is nothing to decide for them.
        if !isec.is_alloc() {
            continue;
        }
        scan_section(ctx, symbols, isec, num_dynrel)?;
    }
    Ok(())
}

fn scan_section(
    ctx: &Context,
    symbols: &[SymbolId],
    isec: &mut InputSection,
    num_dynrel: &mut u32,
) -> Result {
    isec.reldyn_offset = *num_dynrel * REL_ENTRY_SIZE;
    let reserved_at_start = *num_dynrel;
    let mut modifier = RelocationModifier::Normal;

    for (i, r) in isec.relocations.iter().enumerate() {
        if modifier == RelocationModifier::SkipNextRelocation {
            modifier = RelocationModifier::Normal;
            continue;
        }
        if r.r_type == R_386_NONE {
            continue;
        }
        let info = RelocationKindInfo::from_raw(r.r_type)?;
        ensure!(
            r.offset as usize + info.size <= isec.content.len(),
            "{}: relocation {} at {:#x} lies outside the section",
            isec.name,
            x86_32_rel_type_to_string(r.r_type),
            r.offset
        );
        let sym = relocation_symbol(ctx, symbols, isec, r)?;
        if sym.file.is_none() {
            ctx.diagnostics.undefined_symbol(&sym.name);
            continue;
        }
        if sym.is_ifunc {
            sym.flags
                .fetch_or(SymbolFlags::NEEDS_GOT | SymbolFlags::NEEDS_PLT);
        }

        match r.r_type {
            R_386_8 | R_386_16 => scan_table(ctx, sym, isec, r, &ABSREL_TABLE, num_dynrel),
            R_386_32 => scan_table(ctx, sym, isec, r, &DYN_ABSREL_TABLE, num_dynrel),
            R_386_PC8 | R_386_PC16 | R_386_PC32 => {
                scan_table(ctx, sym, isec, r, &PCREL_TABLE, num_dynrel);
            }
            R_386_GOT32 | R_386_GOTPC => sym.flags.fetch_or(SymbolFlags::NEEDS_GOT),
            R_386_GOT32X => {
                if !relax_got32x(ctx, sym, isec, r.offset) {
                    sym.flags.fetch_or(SymbolFlags::NEEDS_GOT);
                }
            }
            R_386_PLT32 => {
                if sym.imported {
                    sym.flags.fetch_or(SymbolFlags::NEEDS_PLT);
                }
            }
            R_386_TLS_LE => {
                if !ctx.args.output_kind.is_executable() {
                    ctx.diagnostics.error(anyhow!(
                        "{}: relocation R_386_TLS_LE against `{}` can not be \
                         used when making a shared object; recompile with \
                         -ftls-model=global-dynamic",
                        isec.name,
                        sym.name
                    ));
                }
                sym.flags.fetch_or(SymbolFlags::NEEDS_GOTTP);
            }
            R_386_TLS_IE | R_386_TLS_GOTIE => sym.flags.fetch_or(SymbolFlags::NEEDS_GOTTP),
            R_386_TLS_GD => {
                paired_follower(isec, i)?;
                if relax_tls_gd(ctx, sym) {
                    modifier = RelocationModifier::SkipNextRelocation;
                } else {
                    sym.flags.fetch_or(SymbolFlags::NEEDS_TLSGD);
                }
            }
            R_386_TLS_LDM => {
                paired_follower(isec, i)?;
                if relax_tls_ld(ctx) {
                    modifier = RelocationModifier::SkipNextRelocation;
                } else {
                    ctx.set_needs_tlsld();
                }
            }
            R_386_TLS_GOTDESC => {
                if !relax_tls_desc(ctx, sym) {
                    sym.flags.fetch_or(SymbolFlags::NEEDS_TLSDESC);
                }
            }
            R_386_GOTOFF | R_386_TLS_LDO_32 | R_386_SIZE32 | R_386_TLS_DESC_CALL => {}
            _ => bail!(
                "{}: unknown relocation type {}",
                isec.name,
                x86_32_rel_type_to_string(r.r_type)
            ),
        }
    }

    isec.num_dynrel = *num_dynrel - reserved_at_start;
    Ok(())
}

/// Patches an allocatable section. `out` holds the section's bytes at their
/// final location; `reldyn` is the section's reserved `.rel.dyn` window.
#[tracing::instrument(skip_all, fields(section = %isec.name))]
pub fn apply_reloc_alloc(
    ctx: &Context,
    file: &ObjectFile,
    isec: &InputSection,
    out: &mut [u8],
    reldyn: &mut [u8],
) -> Result {
    let mut dynrel = RelWriter::new(reldyn);
    let mut modifier = RelocationModifier::Normal;
    let got = ctx.got_addr as i64;

    for (i, r) in isec.relocations.iter().enumerate() {
        if modifier == RelocationModifier::SkipNextRelocation {
            modifier = RelocationModifier::Normal;
            continue;
        }
        if r.r_type == R_386_NONE {
            continue;
        }
        let info = RelocationKindInfo::from_raw(r.r_type)?;
        let rel_name = x86_32_rel_type_to_string(r.r_type);
        if isec.is_eh_frame() && !matches!(r.r_type, R_386_32 | R_386_PC32) {
            bail!(
                "{}: unsupported relocation {rel_name} in .eh_frame",
                isec.name
            );
        }
        let sym = relocation_symbol(ctx, &file.symbols, isec, r)?;
        if sym.file.is_none() {
            ctx.diagnostics.undefined_symbol(&sym.name);
            continue;
        }
        let mut offset = u64::from(r.offset);
        ensure!(
            offset as usize + info.size <= out.len(),
            "{}: relocation {rel_name} at {offset:#x} lies outside the section",
            isec.name
        );

        let s = sym.resolved_addr(ctx) as i64;
        let a = read_addend(&out[offset as usize..], info);
        let p = isec.address as i64 + i64::from(r.offset);

        let check = |value: i64, min: i64, max: i64| {
            if value < min || value >= max {
                ctx.diagnostics
                    .range_error(&isec.name, &rel_name, &sym.name, value, min, max);
            }
        };

        let value = match r.r_type {
            R_386_8 => {
                let v = s + a;
                check(v, 0, 1 << 8);
                Some(v)
            }
            R_386_16 => {
                let v = s + a;
                check(v, 0, 1 << 16);
                Some(v)
            }
            R_386_32 => Some(apply_dyn_absrel(ctx, sym, s, a, p, &mut dynrel)?),
            R_386_PC8 => {
                let v = s + a - p;
                check(v, -(1 << 7), 1 << 7);
                Some(v)
            }
            R_386_PC16 => {
                let v = s + a - p;
                check(v, -(1 << 15), 1 << 15);
                Some(v)
            }
            R_386_PC32 | R_386_PLT32 => Some(s + a - p),
            R_386_GOT32 => {
                Some(i64::from(slot(sym.got_idx, sym, "GOT")?) * i64::from(GOT_ENTRY_SIZE) + a)
            }
            R_386_GOT32X => {
                if let Some(idx) = sym.got_idx {
                    Some(i64::from(idx) * i64::from(GOT_ENTRY_SIZE) + a)
                } else {
                    // The scanner verified the mov opcode before deciding to
                    // skip the GOT slot.
                    relax_in_place(
                        RelaxationKind::MovIndirectToLea,
                        out,
                        &mut offset,
                        &mut modifier,
                        &isec.name,
                    )?;
                    Some(s + a - got)
                }
            }
            R_386_GOTOFF => Some(s + a - got),
            R_386_GOTPC => Some(got + a - p),
            R_386_TLS_GOTIE => {
                let addr = ctx.got_slot_addr(slot(sym.gottp_idx, sym, "TP-offset GOT")?);
                Some(i64::from(addr) + a - got)
            }
            R_386_TLS_LE => Some(s + a - i64::from(ctx.tp_addr)),
            R_386_TLS_IE => {
                let addr = ctx.got_slot_addr(slot(sym.gottp_idx, sym, "TP-offset GOT")?);
                Some(i64::from(addr) + a)
            }
            R_386_TLS_GD => {
                if let Some(idx) = sym.tlsgd_idx {
                    Some(i64::from(ctx.got_slot_addr(idx)) + a - got)
                } else {
                    let kind = match paired_follower(isec, i)? {
                        R_386_PLT32 | R_386_PC32 => RelaxationKind::TlsGdToLocalExec,
                        _ => RelaxationKind::TlsGdToLocalExecViaGot,
                    };
                    relax_in_place(kind, out, &mut offset, &mut modifier, &isec.name)?;
                    Some(i64::from(ctx.tp_addr) - s - a)
                }
            }
            R_386_TLS_LDM => {
                if let Some(addr) = ctx.tlsld_addr() {
                    Some(i64::from(addr) + a - got)
                } else {
                    let kind = match paired_follower(isec, i)? {
                        R_386_PLT32 | R_386_PC32 => RelaxationKind::TlsLdToLocalExec,
                        _ => RelaxationKind::TlsLdToLocalExecViaGot,
                    };
                    relax_in_place(kind, out, &mut offset, &mut modifier, &isec.name)?;
                    Some(i64::from(ctx.tp_addr) - i64::from(ctx.tls_begin))
                }
            }
            R_386_TLS_LDO_32 => Some(s + a - i64::from(ctx.tls_begin)),
            R_386_SIZE32 => Some(i64::from(sym.size) + a),
            R_386_TLS_GOTDESC => {
                if let Some(idx) = sym.tlsdesc_idx {
                    Some(i64::from(ctx.got_slot_addr(idx)) + a - got)
                } else {
                    relax_in_place(
                        RelaxationKind::TlsDescToLocalExec,
                        out,
                        &mut offset,
                        &mut modifier,
                        &isec.name,
                    )?;
                    Some(s + a - i64::from(ctx.tp_addr))
                }
            }
            R_386_TLS_DESC_CALL => {
                if !sym.has_tlsdesc() {
                    relax_in_place(
                        RelaxationKind::TlsDescCallToNop,
                        out,
                        &mut offset,
                        &mut modifier,
                        &isec.name,
                    )?;
                }
                None
            }
            _ => bail!(
                "{}: unsupported relocation type {rel_name}",
                isec.name
            ),
        };

        if let Some(value) = value {
            write_addend(&mut out[offset as usize..], value, info);
        }
    }
    Ok(())
}

/// The word-sized absolute case. Whether the site can be patched statically,
/// needs the load base added at run time, or must name the symbol for the
/// dynamic linker follows the same classification the scanner used, so the
/// record lands in the range the scanner reserved.
fn apply_dyn_absrel(
    ctx: &Context,
    sym: &Symbol,
    s: i64,
    a: i64,
    p: i64,
    dynrel: &mut RelWriter,
) -> Result<i64> {
    if sym.is_ifunc && ctx.args.output_kind.is_pic() {
        // The field holds the resolver address; IRELATIVE tells the loader
        // to call it and store the result.
        dynrel.push(p as u32, DynamicRelocationKind::Irelative, 0)?;
        return Ok(i64::from(sym.address) + a);
    }
    if sym.absolute {
        Ok(s + a)
    } else if sym.imported {
        let dynsym_idx = slot(sym.dynsym_idx, sym, "dynamic symbol")?;
        dynrel.push(p as u32, DynamicRelocationKind::Absolute, dynsym_idx)?;
        // REL: the in-place field is the addend the loader adds to S.
        Ok(a)
    } else if ctx.args.output_kind.is_pic() {
        dynrel.push(p as u32, DynamicRelocationKind::Relative, 0)?;
        // REL: the field holds the link-time value; the loader adds the
        // difference between the load base and the link base.
        Ok(s + a)
    } else {
        Ok(s + a)
    }
}

/// Patches a non-allocatable (debug or otherwise non-loaded) section.
/// PC-relative types resolve to `S + A` with no site subtraction; the
/// consumer knows where it read the value from. References to definitions
/// that were discarded with their COMDAT group get a tombstone instead of a
/// dangling address.
#[tracing::instrument(skip_all, fields(section = %isec.name))]
pub fn apply_reloc_nonalloc(
    ctx: &Context,
    file: &ObjectFile,
    isec: &InputSection,
    out: &mut [u8],
) -> Result {
    let got = ctx.got_addr as i64;

    for r in &isec.relocations {
        if r.r_type == R_386_NONE {
            continue;
        }
        let info = RelocationKindInfo::from_raw(r.r_type)?;
        let rel_name = x86_32_rel_type_to_string(r.r_type);
        let sym = relocation_symbol(ctx, &file.symbols, isec, r)?;
        if sym.file.is_none() {
            ctx.diagnostics.undefined_symbol(&sym.name);
            continue;
        }
        let offset = r.offset as usize;
        ensure!(
            offset + info.size <= out.len(),
            "{}: relocation {rel_name} at {offset:#x} lies outside the section",
            isec.name
        );

        let s = sym.resolved_addr(ctx) as i64;
        let a = read_addend(&out[offset..], info);

        let check = |value: i64, min: i64, max: i64| {
            if value < min || value >= max {
                ctx.diagnostics
                    .range_error(&isec.name, &rel_name, &sym.name, value, min, max);
            }
        };

        let value = match r.r_type {
            R_386_8 => {
                let v = s + a;
                check(v, 0, 1 << 8);
                v
            }
            R_386_16 => {
                let v = s + a;
                check(v, 0, 1 << 16);
                v
            }
            R_386_32 => tombstone(sym, isec).unwrap_or(s + a),
            R_386_PC8 => {
                let v = s + a;
                check(v, -(1 << 7), 1 << 7);
                v
            }
            R_386_PC16 => {
                let v = s + a;
                check(v, -(1 << 15), 1 << 15);
                v
            }
            R_386_PC32 => s + a,
            R_386_GOTPC => got + a,
            R_386_GOTOFF => s + a - got,
            R_386_TLS_LDO_32 => {
                tombstone(sym, isec).unwrap_or(s + a - i64::from(ctx.tls_begin))
            }
            R_386_SIZE32 => i64::from(sym.size) + a,
            _ => bail!(
                "{}: unsupported relocation type {rel_name} in a \
                 non-allocatable section",
                isec.name
            ),
        };
        write_addend(&mut out[offset..], value, info);
    }
    Ok(())
}

fn tombstone(sym: &Symbol, isec: &InputSection) -> Option<i64> {
    if !sym.discarded {
        return None;
    }
    // A pair of zeros terminates a list in these two sections, so a dead
    // reference must become -1 there to stay inert.
    if isec.name == ".debug_loc" || isec.name == ".debug_ranges" {
        Some(-1)
    } else {
        Some(0)
    }
}

/// Scan phase driver: one rayon task per input file.
#[tracing::instrument(skip_all)]
pub fn scan_all(ctx: &Context, files: &mut [ObjectFile]) -> Result {
    files
        .par_iter_mut()
        .try_for_each(|file| scan_relocations(ctx, file))
}

/// Apply phase driver. Copies every section's bytes to its place in `buf`
/// and patches them, in parallel, each task owning a disjoint window of the
/// output and of `.rel.dyn`.
#[tracing::instrument(skip_all)]
pub fn apply_all(
    ctx: &Context,
    files: &[ObjectFile],
    buf: &mut [u8],
    reldyn: &mut [u8],
) -> Result {
    struct Task<'a> {
        file: &'a ObjectFile,
        isec: &'a InputSection,
    }

    /// Hands each task its window of `buf`, whichever order the windows
    /// appear in.
    fn carve_in_order<'buf>(
        buf: &'buf mut [u8],
        tasks: &[Task],
        range_of: impl Fn(&Task) -> std::ops::Range<usize>,
    ) -> Result<Vec<&'buf mut [u8]>> {
        let order: Vec<usize> = (0..tasks.len())
            .sorted_by_key(|&i| {
                let r = range_of(&tasks[i]);
                (r.start, r.end)
            })
            .collect();
        let ranges: Vec<_> = order.iter().map(|&i| range_of(&tasks[i])).collect();
        let windows = output::carve(buf, &ranges)?;
        let mut keyed: Vec<(usize, &'buf mut [u8])> = order.into_iter().zip(windows).collect();
        keyed.sort_by_key(|&(i, _)| i);
        Ok(keyed.into_iter().map(|(_, window)| window).collect())
    }

    let tasks: Vec<Task> = files
        .iter()
        .flat_map(|file| {
            file.sections
                .iter()
                .filter(|isec| !isec.content.is_empty())
                .map(move |isec| Task { file, isec })
        })
        .collect();
    for task in &tasks {
        ensure!(
            task.isec.out_range.len() == task.isec.content.len(),
            "{}: output window is {} bytes for {} bytes of content",
            task.isec.name,
            task.isec.out_range.len(),
            task.isec.content.len()
        );
    }

    let out_windows = carve_in_order(buf, &tasks, |task| task.isec.out_range.clone())?;
    let reldyn_windows = carve_in_order(reldyn, &tasks, |task| {
        let start = (task.file.reldyn_offset + task.isec.reldyn_offset) as usize;
        start..start + (task.isec.num_dynrel * REL_ENTRY_SIZE) as usize
    })?;

    tasks
        .par_iter()
        .zip(out_windows)
        .zip(reldyn_windows)
        .try_for_each(|((task, out), reldyn)| {
            out.copy_from_slice(&task.isec.content);
            if task.isec.is_alloc() {
                apply_reloc_alloc(ctx, task.file, task.isec, out, reldyn)
            } else {
                apply_reloc_nonalloc(ctx, task.file, task.isec, out)
            }
        })
}

#[cfg(test)]
fn test_context(output_kind: OutputKind) -> Context {
    let mut ctx = Context::new(crate::args::Args {
        output_kind,
        relax: true,
    });
    ctx.got_addr = 0x3000;
    ctx.gotplt_addr = 0x3024;
    ctx.plt_addr = 0x2000;
    ctx.tp_addr = 0x1000;
    ctx.tls_begin = 0x800;
    ctx
}

#[test]
fn test_plt_templates_start_with_endbr32() {
    for template in [
        PLT_HDR_PIC,
        PLT_HDR_NO_PIC,
        PLT_ENTRY_PIC,
        PLT_ENTRY_NO_PIC,
        PLTGOT_ENTRY_PIC,
        PLTGOT_ENTRY_NO_PIC,
    ] {
        assert_eq!(template.len(), 16);
        assert_eq!(&template[..4], [0xf3, 0x0f, 0x1e, 0xfb]);
    }
}

#[test]
fn test_plt_header_encoding() {
    let mut buf = [0u8; PLT_HDR_SIZE];
    write_plt_header(&test_context(OutputKind::PieExecutable), &mut buf);
    assert_eq!(
        buf,
        // lea 0x28(%ebx),%ecx: .got.plt - .got + 4
        [0xf3, 0x0f, 0x1e, 0xfb, 0x51, 0x8d, 0x8b, 0x28, 0, 0, 0, 0xff, 0x31, 0xff, 0x61, 0x04]
    );

    write_plt_header(&test_context(OutputKind::Executable), &mut buf);
    assert_eq!(
        buf,
        // mov $0x3028,%ecx: absolute .got.plt + 4
        [0xf3, 0x0f, 0x1e, 0xfb, 0x51, 0xb9, 0x28, 0x30, 0, 0, 0xff, 0x31, 0xff, 0x61, 0x04, 0xcc]
    );
}

#[test]
fn test_plt_entry_encoding() {
    let mut sym = Symbol::new("foo");
    sym.plt_idx = Some(3);
    sym.gotplt_idx = Some(2);
    let mut buf = [0u8; PLT_ENTRY_SIZE];

    write_plt_entry(&test_context(OutputKind::PieExecutable), &mut buf, &sym).unwrap();
    assert_eq!(
        buf,
        // reloc_offset 3 * 8 = 0x18, GOT displacement 0x24 + 2 * 4 = 0x2c
        [0xf3, 0x0f, 0x1e, 0xfb, 0xb9, 0x18, 0, 0, 0, 0xff, 0xa3, 0x2c, 0, 0, 0, 0xcc]
    );

    write_plt_entry(&test_context(OutputKind::Executable), &mut buf, &sym).unwrap();
    assert_eq!(
        buf,
        [0xf3, 0x0f, 0x1e, 0xfb, 0xb9, 0x18, 0, 0, 0, 0xff, 0x25, 0x2c, 0x30, 0, 0, 0xcc]
    );
}

#[test]
fn test_pltgot_entry_encoding() {
    let mut sym = Symbol::new("bar");
    sym.got_idx = Some(5);
    let mut buf = [0u8; PLT_ENTRY_SIZE];

    write_pltgot_entry(&test_context(OutputKind::PieExecutable), &mut buf, &sym).unwrap();
    assert_eq!(
        buf,
        [0xf3, 0x0f, 0x1e, 0xfb, 0xff, 0xa3, 0x14, 0, 0, 0, 0xcc, 0xcc, 0xcc, 0xcc, 0xcc, 0xcc]
    );

    write_pltgot_entry(&test_context(OutputKind::Executable), &mut buf, &sym).unwrap();
    assert_eq!(
        buf,
        [0xf3, 0x0f, 0x1e, 0xfb, 0xff, 0x25, 0x14, 0x30, 0, 0, 0xcc, 0xcc, 0xcc, 0xcc, 0xcc, 0xcc]
    );
}

#[test]
fn test_got32x_relax_predicate() {
    assert!(is_relaxable_got32x(&[0x8b, 0x83, 0, 0, 0, 0], 2));
    // Not a GOT load; the GOT slot must stay.
    assert!(!is_relaxable_got32x(&[0xff, 0xb3, 0, 0, 0, 0], 2));
    assert!(!is_relaxable_got32x(&[0x8b, 0x83], 1));
    assert!(!is_relaxable_got32x(&[], 0));
}

#[cfg(test)]
fn test_file(ctx_symbols: usize, relocations: Vec<Relocation>) -> ObjectFile {
    let mut isec = InputSection::new(".text", vec![0u8; 32]);
    isec.flags = shf::ALLOC | shf::EXECINSTR;
    isec.relocations = relocations;
    ObjectFile {
        name: "a.o".to_owned(),
        symbols: (0..ctx_symbols).collect(),
        sections: vec![isec],
        ..Default::default()
    }
}

#[test]
fn test_scan_is_idempotent_on_flags() {
    let mut ctx = test_context(OutputKind::Executable);
    let mut puts = Symbol::new("puts");
    puts.imported = true;
    puts.is_func = true;
    puts.file = Some(1);
    let mut data = Symbol::new("data");
    data.file = Some(0);
    data.address = 0x4000;
    ctx.symbols = vec![puts, data];

    let mut file = test_file(
        2,
        vec![
            Relocation {
                offset: 0,
                r_type: R_386_PLT32,
                symbol: 0,
            },
            Relocation {
                offset: 4,
                r_type: R_386_GOT32,
                symbol: 1,
            },
            Relocation {
                offset: 8,
                r_type: R_386_TLS_IE,
                symbol: 1,
            },
        ],
    );

    scan_relocations(&ctx, &mut file).unwrap();
    assert_eq!(ctx.symbols[0].flags.get(), SymbolFlags::NEEDS_PLT);
    assert_eq!(
        ctx.symbols[1].flags.get(),
        SymbolFlags::NEEDS_GOT | SymbolFlags::NEEDS_GOTTP
    );

    file.num_dynrel = 0;
    scan_relocations(&ctx, &mut file).unwrap();
    assert_eq!(ctx.symbols[0].flags.get(), SymbolFlags::NEEDS_PLT);
    assert_eq!(
        ctx.symbols[1].flags.get(),
        SymbolFlags::NEEDS_GOT | SymbolFlags::NEEDS_GOTTP
    );
    assert!(!ctx.diagnostics.has_errors());
}

#[test]
fn test_tls_gd_without_follower_is_fatal() {
    let mut ctx = test_context(OutputKind::Executable);
    let mut var = Symbol::new("tls_var");
    var.file = Some(0);
    ctx.symbols = vec![var];

    let mut file = test_file(
        1,
        vec![Relocation {
            offset: 8,
            r_type: R_386_TLS_GD,
            symbol: 0,
        }],
    );
    assert!(scan_relocations(&ctx, &mut file).is_err());
}

#[test]
fn test_scan_reserves_dynrel_ranges_per_section() {
    let mut ctx = test_context(OutputKind::SharedObject);
    let mut data = Symbol::new("data");
    data.file = Some(0);
    data.address = 0x4000;
    ctx.symbols = vec![data];

    let rel = |offset| Relocation {
        offset,
        r_type: R_386_32,
        symbol: 0,
    };
    let mut first = InputSection::new(".data", vec![0u8; 16]);
    first.flags = shf::ALLOC | shf::WRITE;
    first.relocations = vec![rel(0), rel(4)];
    let mut second = InputSection::new(".data.rel", vec![0u8; 16]);
    second.flags = shf::ALLOC | shf::WRITE;
    second.relocations = vec![rel(8)];
    let mut file = ObjectFile {
        name: "a.o".to_owned(),
        symbols: vec![0],
        sections: vec![first, second],
        ..Default::default()
    };

    scan_relocations(&ctx, &mut file).unwrap();
    assert_eq!(file.num_dynrel, 3);
    assert_eq!(file.sections[0].reldyn_offset, 0);
    assert_eq!(file.sections[0].num_dynrel, 2);
    assert_eq!(file.sections[1].reldyn_offset, 2 * REL_ENTRY_SIZE);
    assert_eq!(file.sections[1].num_dynrel, 1);
}
