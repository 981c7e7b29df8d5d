//! A uniform view over the five parsed container models, so the driver can
//! walk "the kernels" and "the global data" without a five-way match at every
//! call site (spec.md §4.7 step 1: "emit file/global headers per format").

use clrx_formats::amd::AmdModel;
use clrx_formats::amdcl2::AmdCl2Model;
use clrx_formats::common::Relocation;
use clrx_formats::gallium::GalliumModel;
use clrx_formats::raw::RawModel;
use clrx_formats::rocm::RocmModel;

/// One container's parsed contents, as produced by the matching
/// `clrx_formats::*::parse`.
pub enum DisassembleInput {
    Amd(AmdModel),
    AmdCl2(AmdCl2Model),
    Gallium(GalliumModel),
    Rocm(RocmModel),
    Raw(RawModel),
}

/// One kernel's code plus the directives that describe its launch
/// configuration, already rendered in assembler syntax (spec.md §4.7 step 4:
/// these must round-trip exactly back to the same byte image).
pub struct KernelView<'a> {
    pub name: String,
    pub code: &'a [u8],
    pub config_lines: Vec<String>,
    pub metadata: Option<&'a str>,
    pub cal_notes: &'a [clrx_formats::amd::CalNote],
}

impl DisassembleInput {
    /// The container-global data blob (`.globaldata`/`.rodata`), if the
    /// format has one.
    pub fn global_data(&self) -> &[u8] {
        match self {
            Self::Amd(model) => &model.global_data,
            Self::AmdCl2(model) => &model.global_data,
            Self::Gallium(model) => &model.global_data,
            Self::Rocm(model) => &model.global_data,
            Self::Raw(_) => &[],
        }
    }

    /// Relocations carried by the container, empty for formats that don't
    /// relocate (AMD Catalyst, Gallium, raw).
    pub fn relocations(&self) -> &[Relocation] {
        match self {
            Self::AmdCl2(model) => &model.relocations,
            _ => &[],
        }
    }

    pub fn kernels(&self) -> Vec<KernelView<'_>> {
        match self {
            Self::Amd(model) => model
                .kernels
                .iter()
                .map(|kernel| KernelView {
                    name: kernel.name.clone(),
                    code: &kernel.code,
                    config_lines: vec![format!(".pgmrsrc2 {:#x}", kernel.header.pgm_rsrc2)],
                    metadata: Some(kernel.metadata.as_str()),
                    cal_notes: &kernel.cal_notes,
                })
                .collect(),
            Self::AmdCl2(model) => model
                .kernels
                .iter()
                .map(|kernel| KernelView {
                    name: kernel.name.clone(),
                    code: &kernel.code,
                    config_lines: vec![
                        format!(".setup private={}, group={}, entry={:#x}, rsrc1={:#x}, rsrc2={:#x}",
                            kernel.setup.private_segment_size,
                            kernel.setup.group_segment_size,
                            kernel.setup.kernel_code_entry_offset,
                            kernel.setup.compute_pgm_rsrc1,
                            kernel.setup.compute_pgm_rsrc2),
                    ],
                    metadata: None,
                    cal_notes: &[],
                })
                .collect(),
            Self::Gallium(model) => model
                .kernels
                .iter()
                .map(|kernel| KernelView {
                    name: kernel.name.clone(),
                    code: &kernel.code,
                    config_lines: kernel
                        .prog_info
                        .iter()
                        .map(|entry| format!(".entry {:#x}, {:#x}", entry.address, entry.value))
                        .collect(),
                    metadata: None,
                    cal_notes: &[],
                })
                .collect(),
            Self::Rocm(model) => model
                .kernels
                .iter()
                .map(|kernel| KernelView {
                    name: kernel.name.clone(),
                    code: &kernel.code,
                    config_lines: vec![format!(
                        ".kernel_desc group_segment_size={}, private_segment_size={}, kernarg_size={}, entry_offset={}, rsrc1={:#x}, rsrc2={:#x}, rsrc3={:#x}, properties={:#x}",
                        kernel.descriptor.group_segment_fixed_size,
                        kernel.descriptor.private_segment_fixed_size,
                        kernel.descriptor.kernarg_size,
                        kernel.descriptor.kernel_code_entry_byte_offset,
                        kernel.descriptor.compute_pgm_rsrc1,
                        kernel.descriptor.compute_pgm_rsrc2,
                        kernel.descriptor.compute_pgm_rsrc3,
                        kernel.descriptor.kernel_code_properties,
                    )],
                    metadata: Some(kernel.metadata_yaml.as_str()),
                    cal_notes: &[],
                })
                .collect(),
            Self::Raw(model) => vec![KernelView {
                name: String::new(),
                code: &model.code,
                config_lines: Vec::new(),
                metadata: None,
                cal_notes: &[],
            }],
        }
    }
}
