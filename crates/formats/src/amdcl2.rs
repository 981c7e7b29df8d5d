//! AMDCL2 (AMD OpenCL 2.0) format: an outer ELF whose single `.text` section
//! contains an inner ELF, built from HSA-style kernel setup data plus `RELA`
//! relocations (spec.md §4.2, §6 "AMDCL2").

use clrx_elf::header::{section_flags, section_type, symbol_binding, symbol_type};
use clrx_elf::{Bits, ElfBuilder, FileType, ParseFlags, ProgramDescriptor, SectionDescriptor, SymbolDescriptor};
use clrx_gpu::bytes::read_u32le;

use crate::common::{Relocation, RelocationKind};
use crate::error::Error;

/// Driver version at and above which the default AMDCL2 layout switches to
/// the full HSA kernel code object, on GCN1.1 and later (spec.md §8
/// "AMDCL2 default format flips for driver ≥ 200406 on GCN1.1+").
pub const HSA_CONFIG_DRIVER_VERSION: u32 = 200406;

/// Whether `driver_version` on `architecture` defaults to the full HSA
/// kernel setup layout rather than the legacy one.
pub fn default_hsa_config_mode(driver_version: u32, architecture: clrx_gpu::gpuid::Architecture) -> HsaConfigMode {
    use clrx_gpu::gpuid::Architecture::*;
    let gcn1_1_or_later = !matches!(architecture, Gcn1_0);
    if gcn1_1_or_later && driver_version >= HSA_CONFIG_DRIVER_VERSION {
        HsaConfigMode::Full
    } else {
        HsaConfigMode::Legacy
    }
}

/// Selects the per-kernel setup blob's size and field set (spec.md §6
/// "per-kernel setup blob (128 or 256 bytes depending on HSA config mode)").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HsaConfigMode {
    /// The pre-HSA 128-byte layout: segment sizes, entry offset, PGM_RSRC1/2.
    Legacy,
    /// The full 256-byte HSA kernel code object layout, adding kernarg and
    /// wavefront/workitem sizing fields the HSA runtime reads directly.
    Full,
}

impl HsaConfigMode {
    fn size(self) -> usize {
        match self {
            HsaConfigMode::Legacy => 128,
            HsaConfigMode::Full => 256,
        }
    }
}

/// The per-kernel setup block HSA-style kernels carry ahead of their
/// instructions: private/group segment sizes and the kernel's mode flags,
/// plus (in [`HsaConfigMode::Full`]) the kernarg/wavefront sizing fields the
/// HSA runtime reads from the kernel code object directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelSetup {
    pub mode: HsaConfigMode,
    pub private_segment_size: u32,
    pub group_segment_size: u32,
    pub kernel_code_entry_offset: u64,
    pub compute_pgm_rsrc1: u32,
    pub compute_pgm_rsrc2: u32,
    pub kernel_code_properties: u16,
    /// Only meaningful in [`HsaConfigMode::Full`]; zero in [`HsaConfigMode::Legacy`].
    pub kernarg_segment_byte_size: u64,
    /// Only meaningful in [`HsaConfigMode::Full`]; zero in [`HsaConfigMode::Legacy`].
    pub wavefront_sgpr_count: u16,
    /// Only meaningful in [`HsaConfigMode::Full`]; zero in [`HsaConfigMode::Legacy`].
    pub workitem_vgpr_count: u16,
}

impl KernelSetup {
    fn to_bytes(self) -> Vec<u8> {
        let mut bytes = vec![0u8; self.mode.size()];
        bytes[0..4].copy_from_slice(&self.private_segment_size.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.group_segment_size.to_le_bytes());
        bytes[8..16].copy_from_slice(&self.kernel_code_entry_offset.to_le_bytes());
        bytes[16..20].copy_from_slice(&self.compute_pgm_rsrc1.to_le_bytes());
        bytes[20..24].copy_from_slice(&self.compute_pgm_rsrc2.to_le_bytes());
        bytes[24..26].copy_from_slice(&self.kernel_code_properties.to_le_bytes());
        if self.mode == HsaConfigMode::Full {
            bytes[26..34].copy_from_slice(&self.kernarg_segment_byte_size.to_le_bytes());
            bytes[34..36].copy_from_slice(&self.wavefront_sgpr_count.to_le_bytes());
            bytes[36..38].copy_from_slice(&self.workitem_vgpr_count.to_le_bytes());
        }
        bytes
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        let mode = match bytes.len() {
            len if len >= HsaConfigMode::Full.size() => HsaConfigMode::Full,
            len if len >= HsaConfigMode::Legacy.size() => HsaConfigMode::Legacy,
            _ => return Err(Error::Malformed("truncated AMDCL2 kernel setup".into())),
        };
        let (kernarg_segment_byte_size, wavefront_sgpr_count, workitem_vgpr_count) = if mode == HsaConfigMode::Full {
            (clrx_gpu::bytes::read_u64le(bytes, 26), clrx_gpu::bytes::read_u16le(bytes, 34), clrx_gpu::bytes::read_u16le(bytes, 36))
        } else {
            (0, 0, 0)
        };
        Ok(Self {
            mode,
            private_segment_size: read_u32le(bytes, 0),
            group_segment_size: read_u32le(bytes, 4),
            kernel_code_entry_offset: clrx_gpu::bytes::read_u64le(bytes, 8),
            compute_pgm_rsrc1: read_u32le(bytes, 16),
            compute_pgm_rsrc2: read_u32le(bytes, 20),
            kernel_code_properties: clrx_gpu::bytes::read_u16le(bytes, 24),
            kernarg_segment_byte_size,
            wavefront_sgpr_count,
            workitem_vgpr_count,
        })
    }
}

/// One kernel in an AMDCL2 binary.
#[derive(Debug, Clone)]
pub struct AmdCl2Kernel {
    pub name: String,
    pub setup: KernelSetup,
    pub code: Vec<u8>,
}

/// The full in-memory view of an AMDCL2 binary, as read from (or to be written
/// as) the inner ELF nested in the outer container's `.text` section.
#[derive(Debug, Clone)]
pub struct AmdCl2Model {
    pub bits: Bits,
    pub driver_version: u32,
    pub global_data: Vec<u8>,
    pub rwdata: Vec<u8>,
    pub kernels: Vec<AmdCl2Kernel>,
    pub relocations: Vec<Relocation>,
}

fn reloc_type(kind: RelocationKind) -> u32 {
    match kind {
        RelocationKind::Value => 1,
        RelocationKind::Low32Bit => 2,
        RelocationKind::High32Bit => 3,
        RelocationKind::Absolute64 => 4,
        RelocationKind::GotEntry => 5,
    }
}

fn reloc_kind(raw: u32) -> Result<RelocationKind, Error> {
    Ok(match raw {
        1 => RelocationKind::Value,
        2 => RelocationKind::Low32Bit,
        3 => RelocationKind::High32Bit,
        4 => RelocationKind::Absolute64,
        5 => RelocationKind::GotEntry,
        other => return Err(Error::Malformed(format!("unknown AMDCL2 relocation type {other}"))),
    })
}

/// Build the inner ELF that holds `model`'s kernels, relocations, and data.
fn build_inner(model: &AmdCl2Model) -> Result<Vec<u8>, Error> {
    let mut builder = ElfBuilder::new(model.bits, 0, FileType::SharedObject, 0);

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

        builder.add_section(SectionDescriptor {
            name: format!(".amdgpu.setup.{}", kernel.name),
            sh_type: section_type::PROGBITS,
            flags: 0,
            align: 8,
            content: kernel.setup.to_bytes(),
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
    builder.add_section(SectionDescriptor {
        name: ".data".into(),
        sh_type: section_type::PROGBITS,
        flags: section_flags::ALLOC | section_flags::WRITE,
        align: 16,
        content: model.rwdata.clone(),
    });

    let mut rela = Vec::new();
    for relocation in &model.relocations {
        rela.extend_from_slice(&relocation.offset.to_le_bytes());
        let info = ((relocation.target_symbol_index as u64) << 32) | reloc_type(relocation.kind) as u64;
        rela.extend_from_slice(&info.to_le_bytes());
        rela.extend_from_slice(&relocation.addend.to_le_bytes());
    }
    builder.add_section(SectionDescriptor {
        name: ".rela.text".into(),
        sh_type: section_type::RELA,
        flags: 0,
        align: 8,
        content: rela,
    });

    builder.add_section(SectionDescriptor {
        name: ".amdgpu.driverversion".into(),
        sh_type: section_type::PROGBITS,
        flags: 0,
        align: 4,
        content: model.driver_version.to_le_bytes().to_vec(),
    });
    builder.add_program(ProgramDescriptor { p_type: 1, flags: 5, section_name: ".text".into(), vaddr: 0, align: 0x1000 });

    builder.build().map_err(Error::from)
}

/// Synthesize the outer ELF wrapping the inner ELF built from `model`.
pub fn emit(model: &AmdCl2Model) -> Result<Vec<u8>, Error> {
    let inner = build_inner(model)?;
    let mut outer = ElfBuilder::new(model.bits, 0, FileType::SharedObject, 0);
    outer.add_section(SectionDescriptor {
        name: ".text".into(),
        sh_type: section_type::PROGBITS,
        flags: section_flags::ALLOC,
        align: 4096,
        content: inner,
    });
    outer.build().map_err(Error::from)
}

/// Parse an AMDCL2 binary, unwrapping the outer ELF and reading the inner one.
pub fn parse(bytes: &[u8]) -> Result<AmdCl2Model, Error> {
    let outer = clrx_elf::parse(bytes, ParseFlags { section_name_map: true, symbol_name_map: false })?;
    let inner_index = outer
        .section_by_name(".text")
        .ok_or_else(|| Error::Malformed("outer ELF missing `.text`".into()))?;
    let inner_bytes = outer.section_data(inner_index)?;

    let inner = clrx_elf::parse(inner_bytes, ParseFlags { section_name_map: true, symbol_name_map: false })?;

    let code_index = inner
        .section_by_name(".text")
        .ok_or_else(|| Error::Malformed("inner ELF missing `.text`".into()))?;
    let code = inner.section_data(code_index)?;

    let global_data = match inner.section_by_name(".rodata") {
        Some(index) => inner.section_data(index)?.to_vec(),
        None => Vec::new(),
    };
    let rwdata = match inner.section_by_name(".data") {
        Some(index) => inner.section_data(index)?.to_vec(),
        None => Vec::new(),
    };
    let driver_version = match inner.section_by_name(".amdgpu.driverversion") {
        Some(index) => read_u32le(inner.section_data(index)?, 0),
        None => 0,
    };

    let symtab_index = inner
        .sections
        .iter()
        .position(|section| section.sh_type == section_type::SYMTAB)
        .ok_or_else(|| Error::Malformed("inner ELF missing symbol table".into()))?;
    let symbols = inner.symbols(symtab_index)?;

    let mut kernels = Vec::new();
    for symbol in &symbols {
        let Some(name) = &symbol.name else { continue };
        if symbol.sym_type() != symbol_type::FUNC {
            continue;
        }
        let setup_section = inner
            .section_by_name(&format!(".amdgpu.setup.{name}"))
            .ok_or_else(|| Error::Malformed(format!("missing setup block for kernel `{name}`")))?;
        let setup = KernelSetup::from_bytes(inner.section_data(setup_section)?)?;

        let start = symbol.value as usize;
        let end = start + symbol.size as usize;
        let kernel_code = code
            .get(start..end)
            .ok_or_else(|| Error::Malformed(format!("kernel `{name}` code out of bounds")))?
            .to_vec();

        kernels.push(AmdCl2Kernel { name: name.clone(), setup, code: kernel_code });
    }

    let mut relocations = Vec::new();
    if let Some(rela_index) = inner.section_by_name(".rela.text") {
        for entry in inner.relocations(rela_index)? {
            relocations.push(Relocation {
                section: code_index as u32,
                offset: entry.offset,
                kind: reloc_kind(entry.rel_type)?,
                target_symbol_index: entry.sym,
                addend: entry.addend,
            });
        }
    }

    Ok(AmdCl2Model { bits: inner.header.bits, driver_version, global_data, rwdata, kernels, relocations })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> AmdCl2Model {
        AmdCl2Model {
            bits: Bits::Elf64,
            driver_version: 200406,
            global_data: vec![0xaa, 0xbb],
            rwdata: vec![0, 0, 0, 0],
            kernels: vec![AmdCl2Kernel {
                name: "vecadd".into(),
                setup: KernelSetup {
                    mode: HsaConfigMode::Legacy,
                    private_segment_size: 0,
                    group_segment_size: 256,
                    kernel_code_entry_offset: 0,
                    compute_pgm_rsrc1: 0x00c0_0000,
                    compute_pgm_rsrc2: 0x0000_0090,
                    kernel_code_properties: 0,
                    kernarg_segment_byte_size: 0,
                    wavefront_sgpr_count: 0,
                    workitem_vgpr_count: 0,
                },
                code: vec![0x04, 0x3d, 0x15, 0x80],
            }],
            relocations: vec![Relocation {
                section: 0,
                offset: 0,
                kind: RelocationKind::Low32Bit,
                target_symbol_index: 0,
                addend: 0,
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
        assert_eq!(parsed.rwdata, model.rwdata);
        assert_eq!(parsed.kernels.len(), 1);
        assert_eq!(parsed.kernels[0].name, "vecadd");
        assert_eq!(parsed.kernels[0].setup, model.kernels[0].setup);
        assert_eq!(parsed.kernels[0].code, model.kernels[0].code);
        assert_eq!(parsed.relocations.len(), 1);
        assert_eq!(parsed.relocations[0].kind, RelocationKind::Low32Bit);
    }

    #[test]
    fn full_hsa_config_setup_round_trips_at_256_bytes() {
        let setup = KernelSetup {
            mode: HsaConfigMode::Full,
            private_segment_size: 64,
            group_segment_size: 256,
            kernel_code_entry_offset: 0x100,
            compute_pgm_rsrc1: 0x00c0_0000,
            compute_pgm_rsrc2: 0x0000_0090,
            kernel_code_properties: 3,
            kernarg_segment_byte_size: 48,
            wavefront_sgpr_count: 12,
            workitem_vgpr_count: 8,
        };
        let bytes = setup.to_bytes();
        assert_eq!(bytes.len(), 256);
        assert_eq!(KernelSetup::from_bytes(&bytes).unwrap(), setup);
    }

    #[test]
    fn legacy_setup_round_trips_at_128_bytes() {
        let setup = KernelSetup {
            mode: HsaConfigMode::Legacy,
            private_segment_size: 0,
            group_segment_size: 256,
            kernel_code_entry_offset: 0,
            compute_pgm_rsrc1: 0x00c0_0000,
            compute_pgm_rsrc2: 0x0000_0090,
            kernel_code_properties: 0,
            kernarg_segment_byte_size: 0,
            wavefront_sgpr_count: 0,
            workitem_vgpr_count: 0,
        };
        let bytes = setup.to_bytes();
        assert_eq!(bytes.len(), 128);
        assert_eq!(KernelSetup::from_bytes(&bytes).unwrap(), setup);
    }

    #[test]
    fn driver_version_at_threshold_on_gcn1_1_selects_full_hsa_config() {
        use clrx_gpu::gpuid::Architecture;
        assert_eq!(default_hsa_config_mode(200406, Architecture::Gcn1_1), HsaConfigMode::Full);
        assert_eq!(default_hsa_config_mode(200405, Architecture::Gcn1_1), HsaConfigMode::Legacy);
        assert_eq!(default_hsa_config_mode(200406, Architecture::Gcn1_0), HsaConfigMode::Legacy);
    }
}
