//! Gallium/Mesa format: a small custom outer header (kernel table with
//! `PROG_INFO` register-usage triples) followed by an inner ELF holding the
//! kernel code and a `.comment` section (spec.md §6 "Gallium/Mesa").

use clrx_elf::header::{section_flags, section_type, symbol_binding, symbol_type};
use clrx_elf::{Bits, ElfBuilder, FileType, ParseFlags, SectionDescriptor, SymbolDescriptor};
use clrx_gpu::bytes::{push_u32le, read_u32le};

use crate::error::Error;

const MAGIC: &[u8; 8] = b"GALLIUM\0";

/// LLVM version encoded as `major * 10000 + minor * 100`, the scheme the
/// reference OpenCL helper uses (e.g. LLVM 3.9 is `30900`). The PROG_INFO
/// entry count and inner-ELF bitness both toggle at this version (spec.md §6,
/// §8 "32/64-bit selection for Gallium inner ELF toggles at LLVM ≥ 3.9").
pub const LLVM_3_9: u32 = 30900;

/// One `PROG_INFO` entry: an SI register address paired with the value the
/// driver should program it to (spec.md glossary: "PROG_INFO").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgInfoEntry {
    pub address: u32,
    pub value: u32,
}

/// A kernel's `PROG_INFO` entries: `NUM_SGPRS`, `NUM_VGPRS`, `FLOAT_MODE`
/// (pre-LLVM-3.9, 3 entries), plus two more once LLVM ≥ 3.9 is selected.
pub type ProgInfo = Vec<ProgInfoEntry>;

/// The legacy (pre-LLVM-3.9) `PROG_INFO` entry count.
pub const PROG_INFO_ENTRIES_LEGACY: usize = 3;
/// The LLVM ≥ 3.9 `PROG_INFO` entry count.
pub const PROG_INFO_ENTRIES_LLVM390: usize = 5;

/// Whether `llvm_version` selects the post-3.9 PROG_INFO/ELF-bitness layout.
pub fn is_llvm390(llvm_version: u32) -> bool {
    llvm_version >= LLVM_3_9
}

/// The `PROG_INFO` entry count `llvm_version` selects.
pub fn prog_info_entries_num(llvm_version: u32) -> usize {
    if is_llvm390(llvm_version) {
        PROG_INFO_ENTRIES_LLVM390
    } else {
        PROG_INFO_ENTRIES_LEGACY
    }
}

/// A fresh all-zero `PROG_INFO` sized for `llvm_version`.
pub fn default_prog_info(llvm_version: u32) -> ProgInfo {
    vec![ProgInfoEntry { address: 0, value: 0 }; prog_info_entries_num(llvm_version)]
}

/// One kernel in a Gallium binary.
#[derive(Debug, Clone)]
pub struct GalliumKernel {
    pub name: String,
    pub prog_info: ProgInfo,
    pub code: Vec<u8>,
}

/// The full in-memory view of a Gallium binary.
#[derive(Debug, Clone)]
pub struct GalliumModel {
    pub bits: Bits,
    /// LLVM version encoded as `major * 10000 + minor * 100`; selects the
    /// PROG_INFO entry count and the inner ELF's default bitness (spec.md §8
    /// scenario 5, "toggles at LLVM ≥ 3.9").
    pub llvm_version: u32,
    pub comment: String,
    pub global_data: Vec<u8>,
    pub kernels: Vec<GalliumKernel>,
}

fn encode_prog_info(info: &[ProgInfoEntry]) -> Vec<u8> {
    let mut bytes = vec![0u8; info.len() * 8];
    for (index, entry) in info.iter().enumerate() {
        let at = index * 8;
        bytes[at..at + 4].copy_from_slice(&entry.address.to_le_bytes());
        bytes[at + 4..at + 8].copy_from_slice(&entry.value.to_le_bytes());
    }
    bytes
}

fn decode_prog_info(bytes: &[u8], entries_num: usize) -> Result<ProgInfo, Error> {
    if bytes.len() < entries_num * 8 {
        return Err(Error::Malformed("truncated PROG_INFO".into()));
    }
    let mut entries = Vec::with_capacity(entries_num);
    for index in 0..entries_num {
        let at = index * 8;
        entries.push(ProgInfoEntry { address: read_u32le(bytes, at), value: read_u32le(bytes, at + 4) });
    }
    Ok(entries)
}

fn build_inner_elf(model: &GalliumModel) -> Result<Vec<u8>, Error> {
    let mut builder = ElfBuilder::new(model.bits, 0, FileType::Relocatable, 0);

    let mut code = Vec::new();
    for kernel in &model.kernels {
        let code_offset = code.len() as u64;
        code.extend_from_slice(&kernel.code);
        builder.add_symbol(SymbolDescriptor {
            name: kernel.name.clone(),
            info: clrx_elf::header::Symbol::make_info(symbol_binding::GLOBAL, symbol_type::FUNC),
            other: 0,
            section_name: Some(".text".into()),
            value: code_offset,
            size: kernel.code.len() as u64,
        });
    }

    builder.add_section(SectionDescriptor {
        name: ".text".into(),
        sh_type: section_type::PROGBITS,
        flags: section_flags::ALLOC | section_flags::EXECINSTR,
        align: 256,
        content: code,
    });
    builder.add_section(SectionDescriptor {
        name: ".rodata".into(),
        sh_type: section_type::PROGBITS,
        flags: section_flags::ALLOC,
        align: 16,
        content: model.global_data.clone(),
    });
    let mut comment = model.comment.as_bytes().to_vec();
    comment.push(0);
    builder.add_section(SectionDescriptor {
        name: ".comment".into(),
        sh_type: section_type::PROGBITS,
        flags: 0,
        align: 1,
        content: comment,
    });

    builder.build().map_err(Error::from)
}

/// Synthesize a Gallium binary: outer kernel table, then the inner ELF. The
/// PROG_INFO entry count written is `model.llvm_version`'s (spec.md §8
/// scenario 5: 3 entries pre-LLVM-3.9, 5 post); the count is also stored in
/// the header so `parse` never needs `llvm_version` supplied out of band.
pub fn emit(model: &GalliumModel) -> Result<Vec<u8>, Error> {
    let entries_num = prog_info_entries_num(model.llvm_version);
    let mut out = Vec::new();
    out.extend_from_slice(MAGIC);
    push_u32le(&mut out, model.kernels.len() as u32);
    push_u32le(&mut out, entries_num as u32);
    for kernel in &model.kernels {
        push_u32le(&mut out, kernel.name.len() as u32);
        out.extend_from_slice(kernel.name.as_bytes());
        out.extend_from_slice(&encode_prog_info(&kernel.prog_info));
    }
    out.extend_from_slice(&build_inner_elf(model)?);
    Ok(out)
}

/// Parse a Gallium binary back into a [`GalliumModel`].
pub fn parse(bytes: &[u8]) -> Result<GalliumModel, Error> {
    if bytes.len() < MAGIC.len() || &bytes[0..MAGIC.len()] != MAGIC {
        return Err(Error::Malformed("missing Gallium magic".into()));
    }
    let mut cursor = MAGIC.len();
    let kernel_count = read_u32le(bytes, cursor) as usize;
    cursor += 4;
    let entries_num = read_u32le(bytes, cursor) as usize;
    cursor += 4;
    let llvm_version = if entries_num >= PROG_INFO_ENTRIES_LLVM390 { LLVM_3_9 } else { 0 };

    let prog_info_size = entries_num * 8;
    let mut prog_infos = Vec::with_capacity(kernel_count);
    for _ in 0..kernel_count {
        let name_len = read_u32le(bytes, cursor) as usize;
        cursor += 4;
        let name = String::from_utf8_lossy(
            bytes
                .get(cursor..cursor + name_len)
                .ok_or_else(|| Error::Malformed("kernel name overruns the outer header".into()))?,
        )
        .into_owned();
        cursor += name_len;
        let prog_info = decode_prog_info(
            bytes
                .get(cursor..cursor + prog_info_size)
                .ok_or_else(|| Error::Malformed("PROG_INFO overruns the outer header".into()))?,
            entries_num,
        )?;
        cursor += prog_info_size;
        prog_infos.push((name, prog_info));
    }

    let inner = clrx_elf::parse(&bytes[cursor..], ParseFlags { section_name_map: true, symbol_name_map: false })?;
    let code_index = inner
        .section_by_name(".text")
        .ok_or_else(|| Error::Malformed("inner ELF missing `.text`".into()))?;
    let code = inner.section_data(code_index)?;
    let global_data = match inner.section_by_name(".rodata") {
        Some(index) => inner.section_data(index)?.to_vec(),
        None => Vec::new(),
    };
    let comment = match inner.section_by_name(".comment") {
        Some(index) => {
            let raw = inner.section_data(index)?;
            let end = raw.iter().position(|&byte| byte == 0).unwrap_or(raw.len());
            String::from_utf8_lossy(&raw[..end]).into_owned()
        }
        None => String::new(),
    };

    let symtab_index = inner
        .sections
        .iter()
        .position(|section| section.sh_type == section_type::SYMTAB)
        .ok_or_else(|| Error::Malformed("inner ELF missing symbol table".into()))?;
    let symbols = inner.symbols(symtab_index)?;

    let mut kernels = Vec::with_capacity(prog_infos.len());
    for (name, prog_info) in prog_infos {
        let symbol = symbols
            .iter()
            .find(|symbol| symbol.name.as_deref() == Some(name.as_str()))
            .ok_or_else(|| Error::Malformed(format!("no symbol for kernel `{name}`")))?;
        let start = symbol.value as usize;
        let end = start + symbol.size as usize;
        let kernel_code = code
            .get(start..end)
            .ok_or_else(|| Error::Malformed(format!("kernel `{name}` code out of bounds")))?
            .to_vec();
        kernels.push(GalliumKernel { name, prog_info, code: kernel_code });
    }

    Ok(GalliumModel { bits: inner.header.bits, llvm_version, comment, global_data, kernels })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(llvm_version: u32) -> GalliumModel {
        GalliumModel {
            bits: Bits::Elf32,
            llvm_version,
            comment: "clover".into(),
            global_data: vec![7, 8, 9],
            kernels: vec![GalliumKernel {
                name: "add".into(),
                prog_info: {
                    let mut info = default_prog_info(llvm_version);
                    info[0] = ProgInfoEntry { address: 0x00a1_0104, value: 2 };
                    info[1] = ProgInfoEntry { address: 0x00a1_0105, value: 4 };
                    info[2] = ProgInfoEntry { address: 0x00a1_0106, value: 0 };
                    info
                },
                code: vec![0x04, 0x3d, 0x15, 0x80],
            }],
        }
    }

    #[test]
    fn emit_then_parse_round_trips() {
        let model = sample(0);
        let bytes = emit(&model).unwrap();
        let parsed = parse(&bytes).unwrap();
        assert_eq!(parsed.comment, model.comment);
        assert_eq!(parsed.global_data, model.global_data);
        assert_eq!(parsed.kernels.len(), 1);
        assert_eq!(parsed.kernels[0].name, "add");
        assert_eq!(parsed.kernels[0].prog_info, model.kernels[0].prog_info);
        assert_eq!(parsed.kernels[0].code, model.kernels[0].code);
    }

    #[test]
    fn llvm390_selects_five_prog_info_entries() {
        let model = sample(LLVM_3_9);
        assert_eq!(model.kernels[0].prog_info.len(), PROG_INFO_ENTRIES_LLVM390);
        let bytes = emit(&model).unwrap();
        let parsed = parse(&bytes).unwrap();
        assert_eq!(parsed.kernels[0].prog_info.len(), PROG_INFO_ENTRIES_LLVM390);
        assert!(is_llvm390(parsed.llvm_version));
    }

    #[test]
    fn pre_llvm390_selects_three_prog_info_entries() {
        let model = sample(0);
        assert_eq!(model.kernels[0].prog_info.len(), PROG_INFO_ENTRIES_LEGACY);
    }

    #[test]
    fn rejects_missing_magic() {
        assert!(matches!(parse(&[0u8; 16]), Err(Error::Malformed(_))));
    }
}
