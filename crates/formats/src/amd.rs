//! AMD Catalyst legacy binary format: a single 32/64-bit ELF carrying a
//! kernel-table section, per-kernel metadata strings, a 32-byte per-kernel
//! header, and CAL notes as typed TLV records (spec.md §6).

use clrx_elf::header::{section_flags, section_type, symbol_binding, symbol_type};
use clrx_elf::{Bits, ElfBuilder, FileType, ParseFlags, ProgramDescriptor, SectionDescriptor, SymbolDescriptor};
use clrx_gpu::bytes::{push_u32le, read_u32le};

use crate::error::Error;

/// One CAL-note TLV record (spec.md glossary: "CAL note").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalNote {
    pub note_type: u32,
    pub data: Vec<u8>,
}

/// The 32-byte per-kernel header AMD Catalyst binaries carry ahead of each
/// kernel's CAL notes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelHeader {
    pub size: u32,
    pub pgm_rsrc2: u32,
    pub reserved: [u32; 6],
}

impl KernelHeader {
    const SIZE: usize = 32;

    fn to_bytes(self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0..4].copy_from_slice(&self.size.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.pgm_rsrc2.to_le_bytes());
        for (index, word) in self.reserved.iter().enumerate() {
            let at = 8 + index * 4;
            bytes[at..at + 4].copy_from_slice(&word.to_le_bytes());
        }
        bytes
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() < Self::SIZE {
            return Err(Error::Malformed("truncated AMD kernel header".into()));
        }
        let mut reserved = [0u32; 6];
        for (index, word) in reserved.iter_mut().enumerate() {
            *word = read_u32le(bytes, 8 + index * 4);
        }
        Ok(Self { size: read_u32le(bytes, 0), pgm_rsrc2: read_u32le(bytes, 4), reserved })
    }
}

/// One kernel within an AMD Catalyst binary.
#[derive(Debug, Clone)]
pub struct AmdKernel {
    pub name: String,
    pub header: KernelHeader,
    pub metadata: String,
    pub cal_notes: Vec<CalNote>,
    pub code: Vec<u8>,
}

/// The full in-memory view of an AMD Catalyst binary.
#[derive(Debug, Clone)]
pub struct AmdModel {
    pub bits: Bits,
    pub driver_version: u32,
    pub global_data: Vec<u8>,
    pub kernels: Vec<AmdKernel>,
}

const SYMBOL_PREFIX: &str = "__OpenCL_";
const SYMBOL_SUFFIX: &str = "_kernel";

fn encode_cal_notes(notes: &[CalNote]) -> Vec<u8> {
    let mut out = Vec::new();
    for note in notes {
        push_u32le(&mut out, note.note_type);
        push_u32le(&mut out, note.data.len() as u32);
        out.extend_from_slice(&note.data);
    }
    out
}

fn decode_cal_notes(bytes: &[u8]) -> Result<Vec<CalNote>, Error> {
    let mut notes = Vec::new();
    let mut cursor = 0usize;
    while cursor < bytes.len() {
        if bytes.len() - cursor < 8 {
            return Err(Error::CalNoteSizeMismatch("trailing bytes too short for a TLV header".into()));
        }
        let note_type = read_u32le(bytes, cursor);
        let size = read_u32le(bytes, cursor + 4) as usize;
        let start = cursor + 8;
        let end = start + size;
        let data = bytes
            .get(start..end)
            .ok_or_else(|| Error::CalNoteSizeMismatch(format!("note of type {note_type} overruns the section")))?
            .to_vec();
        notes.push(CalNote { note_type, data });
        cursor = end;
    }
    Ok(notes)
}

/// Synthesize the exact AMD Catalyst binary layout for `model`.
pub fn emit(model: &AmdModel) -> Result<Vec<u8>, Error> {
    let mut builder = ElfBuilder::new(model.bits, 0, FileType::Executable, 0);

    let mut code = Vec::new();
    let mut kernel_table = Vec::new();
    push_u32le(&mut kernel_table, model.kernels.len() as u32);

    for kernel in &model.kernels {
        let code_offset = code.len() as u64;
        code.extend_from_slice(&kernel.code);

        builder.add_symbol(SymbolDescriptor {
            name: format!("{SYMBOL_PREFIX}{}{SYMBOL_SUFFIX}", kernel.name),
            info: clrx_elf::header::Symbol::make_info(symbol_binding::GLOBAL, symbol_type::FUNC),
            other: 0,
            section_name: Some(".text".into()),
            value: code_offset,
            size: kernel.code.len() as u64,
        });

        let header_name = format!(".amdgpu.header.{}", kernel.name);
        builder.add_section(SectionDescriptor {
            name: header_name,
            sh_type: section_type::PROGBITS,
            flags: 0,
            align: 4,
            content: kernel.header.to_bytes().to_vec(),
        });

        let metadata_name = format!(".amdgpu.metadata.{}", kernel.name);
        let mut metadata_bytes = kernel.metadata.as_bytes().to_vec();
        metadata_bytes.push(0);
        builder.add_section(SectionDescriptor {
            name: metadata_name,
            sh_type: section_type::PROGBITS,
            flags: 0,
            align: 1,
            content: metadata_bytes,
        });

        let calnote_name = format!(".amdgpu.calnotes.{}", kernel.name);
        builder.add_section(SectionDescriptor {
            name: calnote_name,
            sh_type: section_type::NOTE,
            flags: 0,
            align: 4,
            content: encode_cal_notes(&kernel.cal_notes),
        });

        push_u32le(&mut kernel_table, kernel.name.len() as u32);
        kernel_table.extend_from_slice(kernel.name.as_bytes());
    }

    builder.add_section(SectionDescriptor {
        name: ".text".into(),
        sh_type: section_type::PROGBITS,
        flags: section_flags::ALLOC | section_flags::EXECINSTR,
        align: 256,
        content: code,
    });
    builder.add_section(SectionDescriptor {
        name: ".globaldata".into(),
        sh_type: section_type::PROGBITS,
        flags: section_flags::ALLOC | section_flags::WRITE,
        align: 16,
        content: model.global_data.clone(),
    });
    builder.add_section(SectionDescriptor {
        name: ".amdgpu.kerneltable".into(),
        sh_type: section_type::PROGBITS,
        flags: 0,
        align: 4,
        content: kernel_table,
    });
    builder.add_section(SectionDescriptor {
        name: ".amdgpu.driverversion".into(),
        sh_type: section_type::PROGBITS,
        flags: 0,
        align: 4,
        content: model.driver_version.to_le_bytes().to_vec(),
    });
    builder.add_program(ProgramDescriptor { p_type: 1, flags: 5, section_name: ".text".into(), vaddr: 0, align: 0x1000 });

    Ok(builder.build()?)
}

/// Parse an AMD Catalyst binary back into a [`AmdModel`].
pub fn parse(bytes: &[u8]) -> Result<AmdModel, Error> {
    let file = clrx_elf::parse(bytes, ParseFlags { section_name_map: true, symbol_name_map: true })?;

    let text_index = file
        .section_by_name(".text")
        .ok_or_else(|| Error::Malformed("missing `.text` section".into()))?;
    let code = file.section_data(text_index)?;

    let global_data = match file.section_by_name(".globaldata") {
        Some(index) => file.section_data(index)?.to_vec(),
        None => Vec::new(),
    };

    let driver_version = match file.section_by_name(".amdgpu.driverversion") {
        Some(index) => read_u32le(file.section_data(index)?, 0),
        None => 0,
    };

    let mut kernels = Vec::new();
    let symbols = file.symbols(
        file.sections
            .iter()
            .position(|section| section.sh_type == clrx_elf::header::section_type::SYMTAB)
            .ok_or_else(|| Error::Malformed("missing symbol table".into()))?,
    )?;

    for symbol in &symbols {
        let Some(name) = &symbol.name else { continue };
        let Some(kernel_name) = name.strip_prefix(SYMBOL_PREFIX).and_then(|rest| rest.strip_suffix(SYMBOL_SUFFIX))
        else {
            continue;
        };

        let header_section = file
            .section_by_name(&format!(".amdgpu.header.{kernel_name}"))
            .ok_or_else(|| Error::Malformed(format!("missing header section for kernel `{kernel_name}`")))?;
        let header = KernelHeader::from_bytes(file.section_data(header_section)?)?;

        let metadata = match file.section_by_name(&format!(".amdgpu.metadata.{kernel_name}")) {
            Some(index) => {
                let bytes = file.section_data(index)?;
                let end = bytes.iter().position(|&byte| byte == 0).unwrap_or(bytes.len());
                String::from_utf8_lossy(&bytes[..end]).into_owned()
            }
            None => String::new(),
        };

        let cal_notes = match file.section_by_name(&format!(".amdgpu.calnotes.{kernel_name}")) {
            Some(index) => decode_cal_notes(file.section_data(index)?)?,
            None => Vec::new(),
        };

        let start = symbol.value as usize;
        let end = start + symbol.size as usize;
        let kernel_code = code
            .get(start..end)
            .ok_or_else(|| Error::Malformed(format!("kernel `{kernel_name}` code out of bounds")))?
            .to_vec();

        kernels.push(AmdKernel { name: kernel_name.to_owned(), header, metadata, cal_notes, code: kernel_code });
    }

    Ok(AmdModel { bits: file.header.bits, driver_version, global_data, kernels })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> AmdModel {
        AmdModel {
            bits: Bits::Elf64,
            driver_version: 1912,
            global_data: vec![1, 2, 3, 4],
            kernels: vec![AmdKernel {
                name: "foo".into(),
                header: KernelHeader { size: 32, pgm_rsrc2: 0x41, reserved: [0; 6] },
                metadata: ";ARGSTART:__OpenCL_foo_kernel".into(),
                cal_notes: vec![CalNote { note_type: 2, data: vec![9, 9] }],
                code: vec![0x04, 0x3d, 0x15, 0x80],
            }],
        }
    }

    #[test]
    fn emit_then_parse_round_trips() {
        let model = sample();
        let bytes = emit(&model).unwrap();
        let parsed = parse(&bytes).unwrap();
        assert_eq!(parsed.driver_version, model.driver_version);
        assert_eq!(parsed.global_data, model.global_data);
        assert_eq!(parsed.kernels.len(), 1);
        assert_eq!(parsed.kernels[0].name, "foo");
        assert_eq!(parsed.kernels[0].header, model.kernels[0].header);
        assert_eq!(parsed.kernels[0].cal_notes, model.kernels[0].cal_notes);
        assert_eq!(parsed.kernels[0].code, model.kernels[0].code);
    }
}
