//! ROCm format: a single 64-bit ELF with a 256-byte kernel descriptor ahead of
//! each kernel's code, a `.got` section for indirect addressing, and kernel
//! metadata carried as a YAML-like text blob in a `.note` section (spec.md §6
//! "ROCm"). The upstream toolchain emits this metadata as MessagePack in newer
//! code-object versions; this repository always reads/writes the YAML form,
//! which every version's `llvm-readobj --elf-output-style=GNU` can still show.

use clrx_elf::header::{section_flags, section_type, symbol_binding, symbol_type};
use clrx_elf::{Bits, ElfBuilder, FileType, ParseFlags, ProgramDescriptor, SectionDescriptor, SymbolDescriptor};
use clrx_gpu::bytes::{push_u64le, read_u32le, read_u64le};

use crate::error::Error;

/// The fixed-size block the ROCm loader reads to set a kernel's initial
/// register state, queue sizes, and segment sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelDescriptor {
    pub group_segment_fixed_size: u32,
    pub private_segment_fixed_size: u32,
    pub kernarg_size: u32,
    pub kernel_code_entry_byte_offset: i64,
    pub compute_pgm_rsrc1: u32,
    pub compute_pgm_rsrc2: u32,
    pub compute_pgm_rsrc3: u32,
    pub kernel_code_properties: u16,
}

impl KernelDescriptor {
    const SIZE: usize = 256;

    fn to_bytes(self) -> Vec<u8> {
        let mut bytes = vec![0u8; Self::SIZE];
        bytes[0..4].copy_from_slice(&self.group_segment_fixed_size.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.private_segment_fixed_size.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.kernarg_size.to_le_bytes());
        bytes[16..24].copy_from_slice(&self.kernel_code_entry_byte_offset.to_le_bytes());
        bytes[44..48].copy_from_slice(&self.compute_pgm_rsrc3.to_le_bytes());
        bytes[48..52].copy_from_slice(&self.compute_pgm_rsrc1.to_le_bytes());
        bytes[52..56].copy_from_slice(&self.compute_pgm_rsrc2.to_le_bytes());
        bytes[56..58].copy_from_slice(&self.kernel_code_properties.to_le_bytes());
        bytes
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() < Self::SIZE {
            return Err(Error::Malformed("truncated ROCm kernel descriptor".into()));
        }
        Ok(Self {
            group_segment_fixed_size: read_u32le(bytes, 0),
            private_segment_fixed_size: read_u32le(bytes, 4),
            kernarg_size: read_u32le(bytes, 8),
            kernel_code_entry_byte_offset: read_u64le(bytes, 16) as i64,
            compute_pgm_rsrc3: read_u32le(bytes, 44),
            compute_pgm_rsrc1: read_u32le(bytes, 48),
            compute_pgm_rsrc2: read_u32le(bytes, 52),
            kernel_code_properties: clrx_gpu::bytes::read_u16le(bytes, 56),
        })
    }
}

/// One kernel in a ROCm binary.
#[derive(Debug, Clone)]
pub struct RocmKernel {
    pub name: String,
    pub descriptor: KernelDescriptor,
    pub metadata_yaml: String,
    pub code: Vec<u8>,
}

/// The full in-memory view of a ROCm binary.
#[derive(Debug, Clone)]
pub struct RocmModel {
    pub global_data: Vec<u8>,
    pub got_entries: Vec<u64>,
    pub kernels: Vec<RocmKernel>,
}

const DESCRIPTOR_SUFFIX: &str = ".kd";

/// Synthesize a ROCm binary for `model`.
pub fn emit(model: &RocmModel) -> Result<Vec<u8>, Error> {
    let mut builder = ElfBuilder::new(Bits::Elf64, 0xe0, FileType::SharedObject, 0);

    let mut text = Vec::new();
    for kernel in &model.kernels {
        let descriptor_offset = text.len() as u64;
        text.extend_from_slice(&kernel.descriptor.to_bytes());
        let code_offset = text.len() as u64;
        text.extend_from_slice(&kernel.code);

        builder.add_symbol(SymbolDescriptor {
            name: format!("{}{DESCRIPTOR_SUFFIX}", kernel.name),
            info: clrx_elf::header::Symbol::make_info(symbol_binding::GLOBAL, symbol_type::AMDGPU_HSA_KERNEL),
            other: 0,
            section_name: Some(".text".into()),
            value: descriptor_offset,
            size: KernelDescriptor::SIZE as u64,
        });
        builder.add_symbol(SymbolDescriptor {
            name: kernel.name.clone(),
            info: clrx_elf::header::Symbol::make_info(symbol_binding::GLOBAL, symbol_type::FUNC),
            other: 0,
            section_name: Some(".text".into()),
            value: code_offset,
            size: kernel.code.len() as u64,
        });

        let mut metadata = kernel.metadata_yaml.as_bytes().to_vec();
        metadata.push(0);
        builder.add_section(SectionDescriptor {
            name: format!(".note.{}", kernel.name),
            sh_type: section_type::NOTE,
            flags: 0,
            align: 1,
            content: metadata,
        });
    }

    builder.add_section(SectionDescriptor {
        name: ".text".into(),
        sh_type: section_type::PROGBITS,
        flags: section_flags::ALLOC | section_flags::EXECINSTR,
        align: 256,
        content: text,
    });
    builder.add_section(SectionDescriptor {
        name: ".rodata".into(),
        sh_type: section_type::PROGBITS,
        flags: section_flags::ALLOC,
        align: 16,
        content: model.global_data.clone(),
    });

    let mut got = Vec::new();
    for entry in &model.got_entries {
        push_u64le(&mut got, *entry);
    }
    builder.add_section(SectionDescriptor {
        name: ".got".into(),
        sh_type: section_type::PROGBITS,
        flags: section_flags::ALLOC | section_flags::WRITE,
        align: 8,
        content: got,
    });

    builder.add_program(ProgramDescriptor { p_type: 1, flags: 5, section_name: ".text".into(), vaddr: 0, align: 0x1000 });

    builder.build().map_err(Error::from)
}

/// Parse a ROCm binary back into a [`RocmModel`].
pub fn parse(bytes: &[u8]) -> Result<RocmModel, Error> {
    let file = clrx_elf::parse(bytes, ParseFlags { section_name_map: true, symbol_name_map: false })?;

    let text_index = file
        .section_by_name(".text")
        .ok_or_else(|| Error::Malformed("missing `.text` section".into()))?;
    let text = file.section_data(text_index)?;

    let global_data = match file.section_by_name(".rodata") {
        Some(index) => file.section_data(index)?.to_vec(),
        None => Vec::new(),
    };

    let got_entries = match file.section_by_name(".got") {
        Some(index) => file
            .section_data(index)?
            .chunks_exact(8)
            .map(|chunk| read_u64le(chunk, 0))
            .collect(),
        None => Vec::new(),
    };

    let symtab_index = file
        .sections
        .iter()
        .position(|section| section.sh_type == section_type::SYMTAB)
        .ok_or_else(|| Error::Malformed("missing symbol table".into()))?;
    let symbols = file.symbols(symtab_index)?;

    let mut kernels = Vec::new();
    for symbol in &symbols {
        if symbol.sym_type() != symbol_type::AMDGPU_HSA_KERNEL {
            continue;
        }
        let Some(descriptor_name) = &symbol.name else { continue };
        let Some(name) = descriptor_name.strip_suffix(DESCRIPTOR_SUFFIX) else { continue };

        let descriptor_start = symbol.value as usize;
        let descriptor_end = descriptor_start + KernelDescriptor::SIZE;
        let descriptor = KernelDescriptor::from_bytes(
            text.get(descriptor_start..descriptor_end)
                .ok_or_else(|| Error::Malformed(format!("descriptor for kernel `{name}` out of bounds")))?,
        )?;

        let code_symbol = symbols
            .iter()
            .find(|candidate| candidate.name.as_deref() == Some(name))
            .ok_or_else(|| Error::Malformed(format!("no code symbol for kernel `{name}`")))?;
        let code_start = code_symbol.value as usize;
        let code_end = code_start + code_symbol.size as usize;
        let code = text
            .get(code_start..code_end)
            .ok_or_else(|| Error::Malformed(format!("kernel `{name}` code out of bounds")))?
            .to_vec();

        let metadata_yaml = match file.section_by_name(&format!(".note.{name}")) {
            Some(index) => {
                let raw = file.section_data(index)?;
                let end = raw.iter().position(|&byte| byte == 0).unwrap_or(raw.len());
                String::from_utf8_lossy(&raw[..end]).into_owned()
            }
            None => String::new(),
        };

        kernels.push(RocmKernel { name: name.to_owned(), descriptor, metadata_yaml, code });
    }

    Ok(RocmModel { global_data, got_entries, kernels })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> RocmModel {
        RocmModel {
            global_data: vec![1, 1, 2, 3],
            got_entries: vec![0x1000, 0x2000],
            kernels: vec![RocmKernel {
                name: "saxpy".into(),
                descriptor: KernelDescriptor {
                    group_segment_fixed_size: 0,
                    private_segment_fixed_size: 0,
                    kernarg_size: 48,
                    kernel_code_entry_byte_offset: 256,
                    compute_pgm_rsrc1: 0x00c0_0000,
                    compute_pgm_rsrc2: 0x0000_0098,
                    compute_pgm_rsrc3: 0,
                    kernel_code_properties: 0x18,
                },
                metadata_yaml: "---\nkernels:\n  - .name: saxpy\n".into(),
                code: vec![0x04, 0x3d, 0x15, 0x80],
            }],
        }
    }

    #[test]
    fn emit_then_parse_round_trips() {
        let model = sample();
        let bytes = emit(&model).unwrap();
        let parsed = parse(&bytes).unwrap();
        assert_eq!(parsed.global_data, model.global_data);
        assert_eq!(parsed.got_entries, model.got_entries);
        assert_eq!(parsed.kernels.len(), 1);
        assert_eq!(parsed.kernels[0].name, "saxpy");
        assert_eq!(parsed.kernels[0].descriptor, model.kernels[0].descriptor);
        assert_eq!(parsed.kernels[0].metadata_yaml, model.kernels[0].metadata_yaml);
        assert_eq!(parsed.kernels[0].code, model.kernels[0].code);
    }
}
