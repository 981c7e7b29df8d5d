//! The disassembler driver proper (spec.md §4.7): walks one kernel's code
//! region instruction by instruction, interleaving labels and, optionally,
//! hexcode/float/code-position annotations.

use std::fmt::Write as _;

use clrx_asm::sourcepos::{SourceArena, SourcePosIndex};
use clrx_gpu::Architecture;
use clrx_isa::{decode, Operand};

use crate::error::Error;
use crate::flags::{DumpFlag, DumpFlags};
use crate::model::{DisassembleInput, KernelView};

/// A label to flush at a given byte offset within a code region: either a
/// kernel entry point (named) or a relocation target with no symbol of its
/// own (numbered, as `L_<offset>`).
struct Label {
    offset: u64,
    text: String,
}

/// Source-position context for the `code-pos` flag: available only when
/// disassembling bytes produced by an assembler run still holding its own
/// [`SourcePosIndex`], not when reading an arbitrary binary off disk.
pub struct CodePosContext<'a> {
    pub arena: &'a SourceArena,
    pub index: &'a SourcePosIndex,
}

/// Disassemble every kernel (and the global data, if requested) in `input`,
/// producing the full textual listing.
pub fn disassemble(
    input: &DisassembleInput,
    architecture: Architecture,
    flags: DumpFlags,
    code_pos: Option<&CodePosContext>,
) -> Result<String, Error> {
    let mut out = String::new();
    writeln!(out, "# format = {}, architecture = {}", container_name(input), architecture.name()).unwrap();

    if flags.contains(DumpFlag::Data) && !input.global_data().is_empty() {
        writeln!(out, ".globaldata").unwrap();
        write_hex_dump(&mut out, input.global_data());
    }

    let relocations = input.relocations();
    let mut cursor = 0u64;
    for kernel in input.kernels() {
        if !kernel.name.is_empty() {
            writeln!(out, ".kernel {}", kernel.name).unwrap();
        }

        if flags.contains(DumpFlag::Setup) || flags.contains(DumpFlag::Config) || flags.contains(DumpFlag::HsaConfig) {
            for line in &kernel.config_lines {
                writeln!(out, "{line}").unwrap();
            }
        }

        if flags.contains(DumpFlag::Metadata) {
            if let Some(metadata) = kernel.metadata {
                writeln!(out, ".metadata \"{metadata}\"").unwrap();
            }
        }

        if flags.contains(DumpFlag::CalNotes) {
            for note in kernel.cal_notes {
                writeln!(out, ".calnote {}, {}", note.note_type, hex_string(&note.data)).unwrap();
            }
        }

        if flags.contains(DumpFlag::Code) {
            let labels = labels_for_region(&kernel);
            disassemble_code(&mut out, kernel.code, architecture, flags, cursor, &labels, relocations, code_pos)?;
        }

        cursor += kernel.code.len() as u64;
    }

    Ok(out)
}

fn container_name(input: &DisassembleInput) -> &'static str {
    match input {
        DisassembleInput::Amd(_) => "amd",
        DisassembleInput::AmdCl2(_) => "amdcl2",
        DisassembleInput::Gallium(_) => "gallium",
        DisassembleInput::Rocm(_) => "rocm",
        DisassembleInput::Raw(_) => "raw",
    }
}

/// Labels visible inside one kernel's code region: just the kernel's own
/// entry point at offset 0 in this repository's minimal ISA table (spec.md
/// §4.7 step 2: "sort labels (numbered + named) by offset" — a fuller opcode
/// table with branch targets would add numbered labels here alongside it).
fn labels_for_region(kernel: &KernelView) -> Vec<Label> {
    let mut labels = Vec::new();
    if !kernel.name.is_empty() {
        labels.push(Label { offset: 0, text: format!("{}:", kernel.name) });
    }
    labels.sort_by_key(|label| label.offset);
    labels
}

fn disassemble_code(
    out: &mut String,
    code: &[u8],
    architecture: Architecture,
    flags: DumpFlags,
    region_start: u64,
    labels: &[Label],
    relocations: &[clrx_formats::common::Relocation],
    code_pos: Option<&CodePosContext>,
) -> Result<(), Error> {
    let mut pc = 0usize;
    let mut next_label = 0usize;

    while pc < code.len() {
        while next_label < labels.len() && labels[next_label].offset <= pc as u64 {
            writeln!(out, "{}", labels[next_label].text).unwrap();
            next_label += 1;
        }

        let decoded = match decode(architecture, &code[pc..], region_start + pc as u64) {
            Ok(decoded) => decoded,
            Err(error) => return Err(Error::Undecodable(region_start + pc as u64, error.to_string())),
        };

        let mut line = String::new();
        if flags.contains(DumpFlag::CodePos) {
            if let Some(context) = code_pos {
                if let Some(pos) = context.index.position_at(region_start + pc as u64) {
                    write!(line, "# {}\n", context.arena.render_chain(pos.source, pos.line, pos.column)).unwrap();
                }
            }
        }
        if flags.contains(DumpFlag::HexCode) {
            write!(line, "/* {} */ ", hex_string(&code[pc..pc + decoded.length])).unwrap();
        }
        write!(line, "{}", decoded.mnemonic).unwrap();
        let operand_text: Vec<String> = decoded
            .operands
            .iter()
            .map(|operand| format_operand(*operand, flags, region_start + pc as u64, decoded.length, relocations))
            .collect();
        if !operand_text.is_empty() {
            write!(line, " {}", operand_text.join(", ")).unwrap();
        }

        writeln!(out, "{line}").unwrap();
        pc += decoded.length;
    }

    while next_label < labels.len() {
        writeln!(out, "{}", labels[next_label].text).unwrap();
        next_label += 1;
    }

    Ok(())
}

/// Render one operand, substituting a symbolic name for a literal when a
/// relocation covers the instruction's bytes (spec.md §4.7 step 3).
fn format_operand(
    operand: Operand,
    flags: DumpFlags,
    instr_offset: u64,
    instr_len: usize,
    relocations: &[clrx_formats::common::Relocation],
) -> String {
    let reloc = relocations
        .iter()
        .find(|relocation| relocation.offset >= instr_offset && relocation.offset < instr_offset + instr_len as u64);

    match operand {
        Operand::Sgpr(code) => format!("s{code}"),
        Operand::Vgpr(code) => format!("v{code}"),
        Operand::Imm(value) => {
            if let Some(relocation) = reloc {
                return symbolic_operand(relocation);
            }
            let mut text = value.to_string();
            if flags.contains(DumpFlag::Floats) {
                let as_float = format_float(value, flags.contains(DumpFlag::BuggyFpLiterals));
                write!(text, " /* {as_float} */").unwrap();
            }
            text
        }
        Operand::WaitCnt { vmcnt, expcnt, lgkmcnt } => {
            let mut parts = Vec::new();
            if let Some(value) = vmcnt {
                parts.push(format!("vmcnt({value})"));
            }
            if let Some(value) = expcnt {
                parts.push(format!("expcnt({value})"));
            }
            if let Some(value) = lgkmcnt {
                parts.push(format!("lgkmcnt({value})"));
            }
            parts.join(" ")
        }
    }
}

/// AMDCL2's fixed relocation-symbol space (spec.md §4.6: "{globaldata=0,
/// rwdata=1, bss=2}"); anything else falls back to a generic `sym<index>`.
fn symbolic_operand(relocation: &clrx_formats::common::Relocation) -> String {
    let base = match relocation.target_symbol_index {
        0 => "globaldata".to_owned(),
        1 => "rwdata".to_owned(),
        2 => "bss".to_owned(),
        other => format!("sym{other}"),
    };
    let suffix = match relocation.kind {
        clrx_formats::common::RelocationKind::Value => String::new(),
        clrx_formats::common::RelocationKind::Low32Bit => "@low32".to_owned(),
        clrx_formats::common::RelocationKind::High32Bit => "@high32".to_owned(),
        clrx_formats::common::RelocationKind::Absolute64 => "@abs64".to_owned(),
        clrx_formats::common::RelocationKind::GotEntry => "@got".to_owned(),
    };
    if relocation.addend != 0 {
        format!("{base}{suffix}+{}", relocation.addend)
    } else {
        format!("{base}{suffix}")
    }
}

/// Reinterpret a 32-bit immediate as a float literal. In `buggy` mode this
/// reproduces the reference disassembler's quirk of printing negative zero
/// without its sign.
fn format_float(bits: i32, buggy: bool) -> String {
    let value = f32::from_bits(bits as u32);
    if buggy && value == 0.0 && value.is_sign_negative() {
        "0.0f".to_owned()
    } else {
        format!("{value}f")
    }
}

fn hex_string(bytes: &[u8]) -> String {
    bytes.iter().map(|byte| format!("{byte:02x}")).collect()
}

fn write_hex_dump(out: &mut String, bytes: &[u8]) {
    for chunk in bytes.chunks(16) {
        writeln!(out, ".byte {}", chunk.iter().map(|byte| format!("{byte:#04x}")).collect::<Vec<_>>().join(", ")).unwrap();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clrx_formats::amd::{AmdKernel, AmdModel, KernelHeader};
    use clrx_isa::{encode, ParsedLine};

    fn sample_model() -> AmdModel {
        let (bytes, _) = encode(
            Architecture::Gcn1_0,
            &ParsedLine { mnemonic: "s_add_u32".into(), operands: vec![Operand::Sgpr(1), Operand::Sgpr(2), Operand::Sgpr(3)] },
        )
        .unwrap();
        let mut code = bytes;
        let (endpgm, _) = encode(Architecture::Gcn1_0, &ParsedLine { mnemonic: "s_endpgm".into(), operands: vec![] }).unwrap();
        code.extend_from_slice(&endpgm);

        AmdModel {
            bits: clrx_elf::Bits::Elf64,
            driver_version: 0,
            global_data: Vec::new(),
            kernels: vec![AmdKernel {
                name: "foo".into(),
                header: KernelHeader { size: code.len() as u32, pgm_rsrc2: 0, reserved: [0; 6] },
                metadata: String::new(),
                cal_notes: Vec::new(),
                code,
            }],
        }
    }

    #[test]
    fn code_flag_emits_mnemonics_and_a_kernel_label() {
        let model = DisassembleInput::Amd(sample_model());
        let text = disassemble(&model, Architecture::Gcn1_0, DumpFlag::Code.into(), None).unwrap();
        assert!(text.contains("foo:"));
        assert!(text.contains("s_add_u32 s1, s2, s3"));
        assert!(text.contains("s_endpgm"));
    }

    #[test]
    fn hexcode_flag_prefixes_each_line_with_its_bytes() {
        let model = DisassembleInput::Amd(sample_model());
        let text = disassemble(&model, Architecture::Gcn1_0, DumpFlag::Code | DumpFlag::HexCode, None).unwrap();
        assert!(text.contains("/* 82010103 */ s_add_u32"));
    }

    #[test]
    fn undecodable_bytes_are_reported_with_their_offset() {
        let mut model = sample_model();
        model.kernels[0].code = vec![0xff, 0xff, 0xff, 0xff];
        let model = DisassembleInput::Amd(model);
        let error = disassemble(&model, Architecture::Gcn1_0, DumpFlag::Code.into(), None).unwrap_err();
        assert!(matches!(error, Error::Undecodable(0, _)));
    }
}
