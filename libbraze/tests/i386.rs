//! End-to-end checks of the i386 back-end: scan an input section, emulate
//! the driver's slot allocation, apply, then look at the bytes the way a
//! dynamic linker or disassembler would.

use iced_x86::Decoder;
use iced_x86::DecoderOptions;
use iced_x86::Formatter;
use iced_x86::GasFormatter;
use iced_x86::Mnemonic;
use libbraze::args::Args;
use libbraze::args::OutputKind;
use libbraze::context::Context;
use libbraze::elf::read_addend;
use libbraze::elf::write_addend;
use libbraze::elf::Rel;
use libbraze::elf::RelocationKindInfo;
use libbraze::elf::PLT_ENTRY_SIZE;
use libbraze::elf::PLT_HDR_SIZE;
use libbraze::elf::REL_ENTRY_SIZE;
use libbraze::sections::InputSection;
use libbraze::sections::ObjectFile;
use libbraze::sections::Relocation;
use libbraze::symbols::Symbol;
use libbraze::x86_32;
use linker_utils::elf::shf;
use linker_utils::elf::SectionFlags;
use linker_utils::x86_32::rel;
use rstest::rstest;

fn test_context(output_kind: OutputKind) -> Context {
    let mut ctx = Context::new(Args {
        output_kind,
        relax: true,
    });
    ctx.got_addr = 0x3000;
    ctx.gotplt_addr = 0x3100;
    ctx.plt_addr = 0x2000;
    ctx.tp_addr = 0x1000;
    ctx.tls_begin = 0x800;
    ctx
}

fn defined(name: &str, address: u32) -> Symbol {
    let mut sym = Symbol::new(name);
    sym.file = Some(0);
    sym.address = address;
    sym
}

fn text_section(address: u32, content: Vec<u8>, relocations: Vec<Relocation>) -> InputSection {
    let mut isec = InputSection::new(".text", content);
    isec.address = address;
    isec.flags = shf::ALLOC | shf::EXECINSTR;
    isec.relocations = relocations;
    isec
}

fn one_file(ctx: &Context, isec: InputSection) -> ObjectFile {
    ObjectFile {
        name: "test.o".to_owned(),
        symbols: (0..ctx.symbols.len()).collect(),
        sections: vec![isec],
        ..Default::default()
    }
}

/// Scans, then applies, a single section; returns the patched bytes and the
/// dynamic relocations it emitted.
fn scan_and_apply(ctx: &Context, isec: InputSection) -> (Vec<u8>, Vec<u8>) {
    let mut file = one_file(ctx, isec);
    x86_32::scan_relocations(ctx, &mut file).unwrap();
    let mut out = file.sections[0].content.clone();
    let mut reldyn = vec![0u8; (file.num_dynrel * REL_ENTRY_SIZE) as usize];
    x86_32::apply_reloc_alloc(ctx, &file, &file.sections[0], &mut out, &mut reldyn).unwrap();
    (out, reldyn)
}

fn disassemble(bytes: &[u8], ip: u64) -> Vec<(Mnemonic, String)> {
    let mut decoder = Decoder::with_ip(32, bytes, ip, DecoderOptions::NONE);
    let mut formatter = GasFormatter::new();
    formatter.options_mut().set_uppercase_hex(false);
    let mut out = Vec::new();
    while decoder.can_decode() {
        let instruction = decoder.decode();
        let mut text = String::new();
        formatter.format(&instruction, &mut text);
        out.push((instruction.mnemonic(), text));
    }
    out
}

#[rstest]
#[case(rel::R_386_8, 1)]
#[case(rel::R_386_PC8, 1)]
#[case(rel::R_386_16, 2)]
#[case(rel::R_386_PC16, 2)]
#[case(rel::R_386_32, 4)]
#[case(rel::R_386_PC32, 4)]
#[case(rel::R_386_GOT32, 4)]
#[case(rel::R_386_GOTOFF, 4)]
#[case(rel::R_386_TLS_LE, 4)]
#[case(rel::R_386_TLS_GD, 4)]
fn write_addend_writes_exactly_the_field_width(#[case] r_type: u32, #[case] width: usize) {
    let info = RelocationKindInfo::from_raw(r_type).unwrap();
    assert_eq!(info.size, width);

    let mut buf = [0xaau8; 8];
    write_addend(&mut buf, -1, info);
    assert!(buf[..width].iter().all(|&b| b == 0xff));
    assert!(buf[width..].iter().all(|&b| b == 0xaa));
    assert_eq!(read_addend(&buf, info), -1);

    // Truncation is modulo 2^(8 * width).
    let mut buf = [0u8; 8];
    write_addend(&mut buf, 1 << (8 * width), info);
    assert!(buf.iter().all(|&b| b == 0));
}

#[rstest]
#[case(0x8048000, 0x40, 0x80480C0, -4, 0x7c)]
#[case(0x8048000, 0, 0x8048000, 0, 0)]
// Wraps in two's complement mod 2^32.
#[case(0, 0, 0x8000_0000, 0, 0x8000_0000u32 as i32)]
#[case(0x8000_0000, 0, 0, 0, 0x8000_0000u32 as i32)]
fn pc32_is_s_plus_a_minus_p(
    #[case] base: u32,
    #[case] offset: u32,
    #[case] s: u32,
    #[case] addend: i32,
    #[case] expected: i32,
) {
    let mut ctx = test_context(OutputKind::Executable);
    ctx.symbols = vec![defined("target", s)];
    let mut content = vec![0u8; offset as usize + 4];
    content[offset as usize..].copy_from_slice(&addend.to_le_bytes());
    let isec = text_section(
        base,
        content,
        vec![Relocation {
            offset,
            r_type: rel::R_386_PC32,
            symbol: 0,
        }],
    );
    let (out, _) = scan_and_apply(&ctx, isec);
    let got = i32::from_le_bytes(out[offset as usize..][..4].try_into().unwrap());
    assert_eq!(got, expected);
    assert!(!ctx.diagnostics.has_errors());
}

#[test]
fn gotpc_is_got_plus_a_minus_p() {
    let mut ctx = test_context(OutputKind::Executable);
    ctx.symbols = vec![defined("_GLOBAL_OFFSET_TABLE_", ctx.got_addr)];
    let mut content = vec![0u8; 8];
    content[2..6].copy_from_slice(&3i32.to_le_bytes());
    let isec = text_section(
        0x1000,
        content,
        vec![Relocation {
            offset: 2,
            r_type: rel::R_386_GOTPC,
            symbol: 0,
        }],
    );
    let (out, _) = scan_and_apply(&ctx, isec);
    let got = i32::from_le_bytes(out[2..6].try_into().unwrap());
    // GOT + A - P = 0x3000 + 3 - 0x1002
    assert_eq!(got, 0x2001);
    // GOTPC asks for the GOT to exist.
    assert!(ctx.symbols[0]
        .flags
        .get()
        .contains(libbraze::resolution::SymbolFlags::NEEDS_GOT));
}

#[test]
fn got32x_relaxes_mov_to_lea() {
    let mut ctx = test_context(OutputKind::Executable);
    ctx.symbols = vec![defined("var", 0x4010)];
    // mov var@GOT(%ebx), %eax
    let isec = text_section(
        0x1000,
        vec![0x8b, 0x83, 0, 0, 0, 0],
        vec![Relocation {
            offset: 2,
            r_type: rel::R_386_GOT32X,
            symbol: 0,
        }],
    );
    let (out, _) = scan_and_apply(&ctx, isec);
    assert!(!ctx.symbols[0].flags.get().contains(libbraze::resolution::SymbolFlags::NEEDS_GOT));
    assert_eq!(out[0], 0x8d);
    assert_eq!(out[1], 0x83);
    // S + A - GOT = 0x4010 - 0x3000
    assert_eq!(i32::from_le_bytes(out[2..6].try_into().unwrap()), 0x1010);

    let insns = disassemble(&out, 0x1000);
    assert_eq!(insns[0].0, Mnemonic::Lea);
}

#[test]
fn got32x_without_mov_prefix_keeps_its_got_slot() {
    let mut ctx = test_context(OutputKind::Executable);
    ctx.symbols = vec![defined("var", 0x4010)];
    // push var@GOT(%ebx): not a mov, so no rewrite is possible.
    let isec = text_section(
        0x1000,
        vec![0xff, 0xb3, 0, 0, 0, 0],
        vec![Relocation {
            offset: 2,
            r_type: rel::R_386_GOT32X,
            symbol: 0,
        }],
    );
    let mut file = one_file(&ctx, isec);
    x86_32::scan_relocations(&ctx, &mut file).unwrap();
    assert!(ctx.symbols[0]
        .flags
        .get()
        .contains(libbraze::resolution::SymbolFlags::NEEDS_GOT));

    ctx.symbols[0].got_idx = Some(2);
    let mut out = file.sections[0].content.clone();
    x86_32::apply_reloc_alloc(&ctx, &file, &file.sections[0], &mut out, &mut []).unwrap();
    // Unrelaxed: the field gets G + A and the instruction stays intact.
    assert_eq!(out[..2], [0xff, 0xb3]);
    assert_eq!(i32::from_le_bytes(out[2..6].try_into().unwrap()), 8);
}

#[test]
fn tls_gd_relaxes_to_local_exec_with_plt32_follower() {
    let mut ctx = test_context(OutputKind::Executable);
    let mut tls_var = defined("tls_var", 0x20);
    tls_var.size = 4;
    let mut tls_get_addr = Symbol::new("___tls_get_addr");
    tls_get_addr.file = Some(1);
    tls_get_addr.imported = true;
    tls_get_addr.is_func = true;
    ctx.symbols = vec![tls_var, tls_get_addr];

    // lea tls_var@tlsgd(,%ebx,1), %eax; call ___tls_get_addr@plt
    let content = vec![
        0x8d, 0x04, 0x1d, 0, 0, 0, 0, // lea
        0xe8, 0xfc, 0xff, 0xff, 0xff, // call
    ];
    let isec = text_section(
        0x1000,
        content,
        vec![
            Relocation {
                offset: 3,
                r_type: rel::R_386_TLS_GD,
                symbol: 0,
            },
            Relocation {
                offset: 8,
                r_type: rel::R_386_PLT32,
                symbol: 1,
            },
        ],
    );
    let (out, _) = scan_and_apply(&ctx, isec);

    // The pair collapsed to local-exec, so the follower must not have
    // requested a PLT for ___tls_get_addr.
    assert_eq!(
        ctx.symbols[1].flags.get(),
        libbraze::resolution::SymbolFlags::empty()
    );
    assert_eq!(
        out,
        [0x65, 0xa1, 0, 0, 0, 0, 0x81, 0xe8, 0xe0, 0x0f, 0, 0],
        "expected mov %gs:0,%eax; sub $0xfe0,%eax"
    );

    let insns = disassemble(&out, 0x1000);
    assert_eq!(insns[0].0, Mnemonic::Mov);
    assert_eq!(insns[1].0, Mnemonic::Sub);
    assert!(insns[1].1.contains("0xfe0"), "{}", insns[1].1);
}

#[test]
fn tls_ldm_relaxes_to_local_exec() {
    let mut ctx = test_context(OutputKind::Executable);
    let tls_var = defined("tls_local", 0x810);
    let mut tls_get_addr = Symbol::new("___tls_get_addr");
    tls_get_addr.file = Some(1);
    tls_get_addr.imported = true;
    tls_get_addr.is_func = true;
    ctx.symbols = vec![tls_var, tls_get_addr];

    // lea x@tlsldm(%ebx), %eax; call ___tls_get_addr@plt
    let content = vec![
        0x8d, 0x83, 0, 0, 0, 0, // lea
        0xe8, 0xfc, 0xff, 0xff, 0xff, // call
    ];
    let isec = text_section(
        0x1000,
        content,
        vec![
            Relocation {
                offset: 2,
                r_type: rel::R_386_TLS_LDM,
                symbol: 0,
            },
            Relocation {
                offset: 7,
                r_type: rel::R_386_PLT32,
                symbol: 1,
            },
        ],
    );
    let (out, _) = scan_and_apply(&ctx, isec);
    assert!(!ctx.needs_tlsld());
    assert_eq!(
        out,
        // xor %eax,%eax; mov %gs:(%eax),%eax; sub $(tp - tls_begin),%eax
        [0x31, 0xc0, 0x65, 0x8b, 0x00, 0x81, 0xe8, 0x00, 0x08, 0, 0],
    );
}

#[test]
fn tls_desc_relaxes_to_local_exec() {
    let mut ctx = test_context(OutputKind::Executable);
    ctx.symbols = vec![defined("tls_var", 0x20)];

    // lea tls_var@tlsdesc(%ebx), %eax; call *(%eax)
    let content = vec![0x8d, 0x83, 0, 0, 0, 0, 0xff, 0x10];
    let isec = text_section(
        0x1000,
        content,
        vec![
            Relocation {
                offset: 2,
                r_type: rel::R_386_TLS_GOTDESC,
                symbol: 0,
            },
            Relocation {
                offset: 6,
                r_type: rel::R_386_TLS_DESC_CALL,
                symbol: 0,
            },
        ],
    );
    let (out, _) = scan_and_apply(&ctx, isec);
    // lea (S + A - tp), %eax; 2-byte nop
    assert_eq!(out[..2], [0x8d, 0x05]);
    assert_eq!(
        i32::from_le_bytes(out[2..6].try_into().unwrap()),
        0x20 - 0x1000
    );
    assert_eq!(out[6..], [0x66, 0x90]);
}

#[test]
fn shared_object_keeps_the_general_dynamic_model() {
    let mut ctx = test_context(OutputKind::SharedObject);
    ctx.symbols = vec![
        defined("tls_var", 0x20),
        {
            let mut s = Symbol::new("___tls_get_addr");
            s.file = Some(1);
            s.imported = true;
            s.is_func = true;
            s
        },
    ];

    let content = vec![
        0x8d, 0x04, 0x1d, 0, 0, 0, 0, // lea
        0xe8, 0xfc, 0xff, 0xff, 0xff, // call
    ];
    let isec = text_section(
        0x1000,
        content.clone(),
        vec![
            Relocation {
                offset: 3,
                r_type: rel::R_386_TLS_GD,
                symbol: 0,
            },
            Relocation {
                offset: 8,
                r_type: rel::R_386_PLT32,
                symbol: 1,
            },
        ],
    );
    let mut file = one_file(&ctx, isec);
    x86_32::scan_relocations(&ctx, &mut file).unwrap();
    assert!(ctx.symbols[0]
        .flags
        .get()
        .contains(libbraze::resolution::SymbolFlags::NEEDS_TLSGD));
    assert!(ctx.symbols[1]
        .flags
        .get()
        .contains(libbraze::resolution::SymbolFlags::NEEDS_PLT));

    ctx.symbols[0].tlsgd_idx = Some(4);
    ctx.symbols[1].plt_idx = Some(0);
    ctx.symbols[1].gotplt_idx = Some(3);
    let mut out = content;
    x86_32::apply_reloc_alloc(&ctx, &file, &file.sections[0], &mut out, &mut []).unwrap();
    // The lea still points at the GD descriptor: tlsgd slot offset 4 * 4.
    assert_eq!(i32::from_le_bytes(out[3..7].try_into().unwrap()), 16);
    // The call goes to the PLT entry: S + A - P.
    let plt_entry = (ctx.plt_addr + PLT_HDR_SIZE as u32) as i64;
    assert_eq!(
        i64::from(i32::from_le_bytes(out[8..12].try_into().unwrap())),
        plt_entry - 4 - (0x1000 + 8)
    );
}

#[test]
fn narrow_absolute_relocation_out_of_range_is_reported() {
    let mut ctx = test_context(OutputKind::Executable);
    ctx.symbols = vec![defined("byte_sym", 0x100)];
    let isec = text_section(
        0x1000,
        vec![0u8; 4],
        vec![Relocation {
            offset: 0,
            r_type: rel::R_386_8,
            symbol: 0,
        }],
    );
    let (_, _) = scan_and_apply(&ctx, isec);
    assert!(ctx.diagnostics.has_errors());
    let errors = ctx.diagnostics.take_errors();
    assert_eq!(errors.len(), 1);
    let message = errors[0].to_string();
    assert!(message.contains("256 is not in [0, 256)"), "{message}");
}

#[test]
fn eh_frame_rejects_got_relocations() {
    let mut ctx = test_context(OutputKind::Executable);
    ctx.symbols = vec![defined("f", 0x1000)];
    let mut isec = InputSection::new(".eh_frame", vec![0u8; 8]);
    isec.address = 0x5000;
    isec.relocations = vec![Relocation {
        offset: 0,
        r_type: rel::R_386_GOT32,
        symbol: 0,
    }];
    let file = one_file(&ctx, isec);
    let mut out = vec![0u8; 8];
    let err = x86_32::apply_reloc_alloc(&ctx, &file, &file.sections[0], &mut out, &mut [])
        .unwrap_err();
    assert!(err.to_string().contains(".eh_frame"), "{err}");
}

#[test]
fn undefined_symbols_are_reported_once() {
    let ctx = {
        let mut ctx = test_context(OutputKind::Executable);
        ctx.symbols = vec![Symbol::new("missing")];
        ctx
    };
    let isec = text_section(
        0x1000,
        vec![0u8; 8],
        vec![
            Relocation {
                offset: 0,
                r_type: rel::R_386_PC32,
                symbol: 0,
            },
            Relocation {
                offset: 4,
                r_type: rel::R_386_32,
                symbol: 0,
            },
        ],
    );
    let mut file = one_file(&ctx, isec);
    x86_32::scan_relocations(&ctx, &mut file).unwrap();
    assert!(ctx.diagnostics.has_errors());
    assert_eq!(ctx.diagnostics.take_errors().len(), 1);
}

#[test]
fn imported_function_calls_route_through_the_plt() {
    let mut ctx = test_context(OutputKind::Executable);
    let mut puts = Symbol::new("puts");
    puts.file = Some(1);
    puts.imported = true;
    puts.is_func = true;
    ctx.symbols = vec![puts];

    let mut content = vec![0u8; 9];
    content[0] = 0xe8; // call
    content[1..5].copy_from_slice(&(-4i32).to_le_bytes());
    let isec = text_section(
        0x8048000,
        content,
        vec![Relocation {
            offset: 1,
            r_type: rel::R_386_PLT32,
            symbol: 0,
        }],
    );
    let mut file = one_file(&ctx, isec);
    x86_32::scan_relocations(&ctx, &mut file).unwrap();
    assert!(ctx.symbols[0]
        .flags
        .get()
        .contains(libbraze::resolution::SymbolFlags::NEEDS_PLT));

    ctx.symbols[0].plt_idx = Some(0);
    ctx.symbols[0].gotplt_idx = Some(3);
    let mut out = file.sections[0].content.clone();
    x86_32::apply_reloc_alloc(&ctx, &file, &file.sections[0], &mut out, &mut []).unwrap();
    let value = i32::from_le_bytes(out[1..5].try_into().unwrap());
    let plt_entry = (ctx.plt_addr + PLT_HDR_SIZE as u32) as i64;
    assert_eq!(i64::from(value), plt_entry - 4 - 0x8048001);
}

#[test]
fn pic_plt_entry_disassembles_to_the_abi_sequence() {
    let mut ctx = test_context(OutputKind::PieExecutable);
    let mut puts = Symbol::new("puts");
    puts.plt_idx = Some(3);
    puts.gotplt_idx = Some(3); // 0x3100 + 12 - 0x3000 = 0x10c
    ctx.symbols = vec![puts];

    let mut buf = vec![0u8; PLT_HDR_SIZE + PLT_ENTRY_SIZE];
    x86_32::write_plt(&ctx, &mut buf, &[&ctx.symbols[0]]).unwrap();

    let header = disassemble(&buf[..PLT_HDR_SIZE], ctx.plt_addr as u64);
    let mnemonics: Vec<Mnemonic> = header.iter().map(|(m, _)| *m).collect();
    assert_eq!(
        mnemonics,
        [
            Mnemonic::Endbr32,
            Mnemonic::Push,
            Mnemonic::Lea,
            Mnemonic::Push,
            Mnemonic::Jmp
        ]
    );

    let entry = disassemble(&buf[PLT_HDR_SIZE..], (ctx.plt_addr + 16) as u64);
    assert_eq!(entry[0].0, Mnemonic::Endbr32);
    assert_eq!(entry[1].0, Mnemonic::Mov);
    assert!(entry[1].1.contains("0x18"), "{}", entry[1].1);
    assert_eq!(entry[2].0, Mnemonic::Jmp);
    assert!(entry[2].1.contains("%ebx"), "{}", entry[2].1);
    assert!(entry[2].1.contains("0x10c"), "{}", entry[2].1);
}

#[test]
fn shared_object_data_gets_dynamic_relocations() {
    let mut ctx = test_context(OutputKind::SharedObject);
    let mut imported = Symbol::new("imported_data");
    imported.file = Some(1);
    imported.imported = true;
    imported.dynsym_idx = Some(5);
    ctx.symbols = vec![defined("local_data", 0x4000), imported];

    let mut content = vec![0u8; 8];
    content[..4].copy_from_slice(&8i32.to_le_bytes()); // addend 8
    content[4..].copy_from_slice(&2i32.to_le_bytes()); // addend 2
    let mut isec = InputSection::new(".data", content);
    isec.address = 0x5000;
    isec.flags = shf::ALLOC | shf::WRITE;
    isec.relocations = vec![
        Relocation {
            offset: 0,
            r_type: rel::R_386_32,
            symbol: 0,
        },
        Relocation {
            offset: 4,
            r_type: rel::R_386_32,
            symbol: 1,
        },
    ];

    let (out, reldyn) = scan_and_apply(&ctx, isec);

    // Local symbol: the field holds the link-time value and a RELATIVE
    // relocation rebases it.
    assert_eq!(i32::from_le_bytes(out[..4].try_into().unwrap()), 0x4008);
    // Imported symbol: the field holds only the addend.
    assert_eq!(i32::from_le_bytes(out[4..].try_into().unwrap()), 2);

    assert_eq!(reldyn.len(), 16);
    let first: Rel = bytemuck::pod_read_unaligned(&reldyn[..8]);
    assert_eq!(first.r_offset, 0x5000);
    assert_eq!(first.r_type(), rel::R_386_RELATIVE);
    assert_eq!(first.r_sym(), 0);
    let second: Rel = bytemuck::pod_read_unaligned(&reldyn[8..]);
    assert_eq!(second.r_offset, 0x5004);
    assert_eq!(second.r_type(), rel::R_386_32);
    assert_eq!(second.r_sym(), 5);
}

#[test]
fn non_allocatable_sections_use_simplified_semantics() {
    let mut ctx = test_context(OutputKind::Executable);
    let mut dead = defined("dropped", 0xdead);
    dead.discarded = true;
    ctx.symbols = vec![defined("f", 0x8048100), dead];

    let make = |name: &str, relocations: Vec<Relocation>| {
        let mut isec = InputSection::new(name, vec![0u8; 8]);
        isec.flags = SectionFlags::empty();
        isec.relocations = relocations;
        isec
    };

    // PC32 in a debug section resolves to S + A, with no site subtraction.
    let isec = make(
        ".debug_info",
        vec![
            Relocation {
                offset: 0,
                r_type: rel::R_386_PC32,
                symbol: 0,
            },
            Relocation {
                offset: 4,
                r_type: rel::R_386_32,
                symbol: 1,
            },
        ],
    );
    let file = one_file(&ctx, isec);
    let mut out = vec![0u8; 8];
    x86_32::apply_reloc_nonalloc(&ctx, &file, &file.sections[0], &mut out).unwrap();
    assert_eq!(u32::from_le_bytes(out[..4].try_into().unwrap()), 0x8048100);
    // Reference to a discarded COMDAT definition: tombstoned.
    assert_eq!(u32::from_le_bytes(out[4..].try_into().unwrap()), 0);

    // .debug_ranges uses -1 as its tombstone.
    let isec = make(
        ".debug_ranges",
        vec![Relocation {
            offset: 0,
            r_type: rel::R_386_32,
            symbol: 1,
        }],
    );
    let file = one_file(&ctx, isec);
    let mut out = vec![0u8; 8];
    x86_32::apply_reloc_nonalloc(&ctx, &file, &file.sections[0], &mut out).unwrap();
    assert_eq!(u32::from_le_bytes(out[..4].try_into().unwrap()), u32::MAX);

    // GOT machinery has no business in non-loaded sections.
    let isec = make(
        ".debug_info",
        vec![Relocation {
            offset: 0,
            r_type: rel::R_386_GOT32,
            symbol: 0,
        }],
    );
    let file = one_file(&ctx, isec);
    let mut out = vec![0u8; 8];
    assert!(x86_32::apply_reloc_nonalloc(&ctx, &file, &file.sections[0], &mut out).is_err());
}

#[test]
fn apply_all_patches_disjoint_windows_in_one_buffer() {
    let mut ctx = test_context(OutputKind::Executable);
    ctx.symbols = vec![defined("f", 0x10c0)];

    let mut text = text_section(
        0x1000,
        {
            let mut content = vec![0u8; 8];
            content[0] = 0xe8;
            content[1..5].copy_from_slice(&(-4i32).to_le_bytes());
            content
        },
        vec![Relocation {
            offset: 1,
            r_type: rel::R_386_PC32,
            symbol: 0,
        }],
    );
    text.out_range = 0..8;

    let mut debug = InputSection::new(".debug_info", vec![0u8; 4]);
    debug.flags = SectionFlags::empty();
    debug.relocations = vec![Relocation {
        offset: 0,
        r_type: rel::R_386_32,
        symbol: 0,
    }];
    debug.out_range = 8..12;

    let mut file = ObjectFile {
        name: "test.o".to_owned(),
        symbols: vec![0],
        sections: vec![text, debug],
        ..Default::default()
    };

    x86_32::scan_all(&ctx, std::slice::from_mut(&mut file)).unwrap();
    let mut buf = vec![0xccu8; 12];
    let mut reldyn = vec![];
    x86_32::apply_all(&ctx, std::slice::from_ref(&file), &mut buf, &mut reldyn).unwrap();

    assert_eq!(buf[0], 0xe8);
    // 0x10c0 - 4 - 0x1001
    assert_eq!(i32::from_le_bytes(buf[1..5].try_into().unwrap()), 0xbb);
    assert_eq!(buf[5..8], [0, 0, 0]);
    // Non-allocatable: S + A with no PC bias.
    assert_eq!(u32::from_le_bytes(buf[8..12].try_into().unwrap()), 0x10c0);
    assert!(!ctx.diagnostics.has_errors());
}
