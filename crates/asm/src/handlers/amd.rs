//! The AMD Catalyst format handler (spec.md §6 "AMD Catalyst"). The
//! simplest of the four: no kcode spans, one code section per kernel, a
//! metadata string and a list of CAL-note TLVs per kernel.

use enumflags2::BitFlags;

use clrx_elf::Bits;
use clrx_formats::amd::{AmdKernel, AmdModel, CalNote, KernelHeader};

use crate::error::Error;
use crate::expr::EvalValue;
use crate::section::{Section, SectionFlags, SectionId, SectionKind, SectionScope};

use super::{split_args, Context, FormatHandler};

#[derive(Debug, Clone, Default)]
struct PendingKernel {
    metadata: String,
    pgm_rsrc2: u32,
    cal_notes: Vec<CalNote>,
    code_section: Option<SectionId>,
}

pub struct AmdHandler {
    bits: Bits,
    driver_version: u32,
    global_data_section: SectionId,
    kernels: Vec<PendingKernel>,
    current_kernel: Option<u32>,
    model: Option<AmdModel>,
}

impl AmdHandler {
    pub fn new(ctx: &mut Context, bits: Bits) -> Self {
        let global_data_section = ctx.sections.add(Section::new(
            SectionId(0),
            ".globaldata",
            SectionScope::Global,
            SectionKind::Data,
            SectionFlags::Writable | SectionFlags::ElfAlloc | SectionFlags::ElfWrite,
        ));
        Self { bits, driver_version: 0, global_data_section, kernels: Vec::new(), current_kernel: None, model: None }
    }
}

impl FormatHandler for AmdHandler {
    fn add_kernel(&mut self, ctx: &mut Context, name: &str) -> Result<u32, Error> {
        let id = ctx.kernels.add(name)?;
        let code_section = ctx.sections.add(Section::new(
            SectionId(0),
            format!(".text.{name}"),
            SectionScope::Kernel(id),
            SectionKind::Code,
            SectionFlags::ElfAlloc | SectionFlags::ElfExec,
        ));
        ctx.kernels.get_mut(id).code_section = Some(code_section);
        self.kernels.push(PendingKernel { code_section: Some(code_section), ..Default::default() });
        Ok(id)
    }

    fn add_section(&mut self, ctx: &mut Context, name: &str, kernel_id: Option<u32>) -> Result<SectionId, Error> {
        let scope = kernel_id.map(SectionScope::Kernel).unwrap_or(SectionScope::Global);
        if ctx.sections.by_name(name, scope).is_some() {
            return Err(Error::Duplicate(name.to_owned()));
        }
        Ok(ctx.sections.add(Section::new(SectionId(0), name, scope, SectionKind::Data, BitFlags::empty())))
    }

    fn get_section_id(&self, ctx: &Context, name: &str, kernel_id: Option<u32>) -> Option<SectionId> {
        let scope = kernel_id.map(SectionScope::Kernel).unwrap_or(SectionScope::Global);
        ctx.sections.by_name(name, scope)
    }

    fn set_current_kernel(&mut self, kernel_id: Option<u32>) {
        self.current_kernel = kernel_id;
    }

    fn set_current_section(&mut self, ctx: &mut Context, section_id: SectionId) {
        ctx.sections.set_current(section_id);
    }

    fn parse_pseudo_op(&mut self, _ctx: &mut Context, name: &str, args: &str) -> Result<bool, Error> {
        match name {
            ".driver_version" => {
                self.driver_version = clrx_gpu::numstr::parse_u64_ranged(args.trim(), u32::MAX as u64)
                    .map_err(|error| Error::DirectiveState(format!("bad driver version `{args}`: {error}")))? as u32;
                Ok(true)
            }
            ".metadata" => {
                let Some(current) = self.current_kernel else {
                    return Err(Error::DirectiveState(".metadata outside a kernel".into()));
                };
                self.kernels[current as usize].metadata = args.trim().trim_matches('"').to_owned();
                Ok(true)
            }
            ".pgmrsrc2" => {
                let Some(current) = self.current_kernel else {
                    return Err(Error::DirectiveState(".pgmrsrc2 outside a kernel".into()));
                };
                let value = clrx_gpu::numstr::parse_u64_ranged(args.trim(), u32::MAX as u64)
                    .map_err(|error| Error::DirectiveState(format!("bad .pgmrsrc2 value: {error}")))?;
                self.kernels[current as usize].pgm_rsrc2 = value as u32;
                Ok(true)
            }
            ".calnote" => {
                let Some(current) = self.current_kernel else {
                    return Err(Error::DirectiveState(".calnote outside a kernel".into()));
                };
                let parts = split_args(args);
                let [note_type, data_hex] = parts.as_slice() else {
                    return Err(Error::DirectiveState(".calnote requires a type and hex payload".into()));
                };
                let note_type = clrx_gpu::numstr::parse_u64_ranged(note_type, u32::MAX as u64)
                    .map_err(|error| Error::DirectiveState(format!("bad CAL note type `{note_type}`: {error}")))?
                    as u32;
                let data = decode_hex(data_hex)?;
                self.kernels[current as usize].cal_notes.push(CalNote { note_type, data });
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn handle_label(&mut self, _ctx: &mut Context, _name: &str) {}

    fn resolve_symbol(&self, _ctx: &Context, _name: &str) -> Option<EvalValue> {
        None
    }

    fn prepare_binary(&mut self, ctx: &Context) -> Result<(), Error> {
        let mut kernels = Vec::with_capacity(self.kernels.len());
        for (index, kernel) in ctx.kernels.iter().enumerate() {
            let pending = &self.kernels[index];
            let code = pending
                .code_section
                .map(|id| ctx.sections.get(id).data.clone())
                .unwrap_or_default();
            kernels.push(AmdKernel {
                name: kernel.name.clone(),
                header: KernelHeader { size: code.len() as u32, pgm_rsrc2: pending.pgm_rsrc2, reserved: [0; 6] },
                metadata: pending.metadata.clone(),
                cal_notes: pending.cal_notes.clone(),
                code,
            });
        }
        self.model = Some(AmdModel {
            bits: self.bits,
            driver_version: self.driver_version,
            global_data: ctx.sections.get(self.global_data_section).data.clone(),
            kernels,
        });
        Ok(())
    }

    fn write_binary(&self) -> Result<Vec<u8>, Error> {
        let model = self.model.as_ref().ok_or_else(|| Error::DirectiveState("prepareBinary not run".into()))?;
        clrx_formats::amd::emit(model)
    }
}

fn decode_hex(text: &str) -> Result<Vec<u8>, Error> {
    let text = text.trim();
    if text.len() % 2 != 0 {
        return Err(Error::DirectiveState("hex payload must have an even number of digits".into()));
    }
    (0..text.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&text[i..i + 2], 16).map_err(|_| Error::DirectiveState(format!("bad hex byte `{}`", &text[i..i + 2]))))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::KernelTable;
    use crate::section::SectionTable;
    use crate::symbol::SymbolTable;

    fn new_ctx() -> (SymbolTable, SectionTable, KernelTable) {
        (SymbolTable::new(), SectionTable::new(), KernelTable::new())
    }

    #[test]
    fn add_kernel_allocates_a_code_section_and_pending_record() {
        let (mut symbols, mut sections, mut kernels) = new_ctx();
        let mut ctx = Context { symbols: &mut symbols, sections: &mut sections, kernels: &mut kernels };
        let mut handler = AmdHandler::new(&mut ctx, Bits::Elf64);

        let id = handler.add_kernel(&mut ctx, "foo").unwrap();
        assert_eq!(id, 0);
        assert!(ctx.kernels.get(0).code_section.is_some());
        assert_eq!(handler.kernels.len(), 1);
    }

    #[test]
    fn metadata_pseudo_op_requires_a_current_kernel() {
        let (mut symbols, mut sections, mut kernels) = new_ctx();
        let mut ctx = Context { symbols: &mut symbols, sections: &mut sections, kernels: &mut kernels };
        let mut handler = AmdHandler::new(&mut ctx, Bits::Elf64);
        assert!(handler.parse_pseudo_op(&mut ctx, ".metadata", "\"x\"").is_err());

        handler.add_kernel(&mut ctx, "foo").unwrap();
        handler.set_current_kernel(Some(0));
        assert!(handler.parse_pseudo_op(&mut ctx, ".metadata", "\"hello\"").unwrap());
        assert_eq!(handler.kernels[0].metadata, "hello");
    }

    #[test]
    fn calnote_pseudo_op_decodes_hex_payload() {
        let (mut symbols, mut sections, mut kernels) = new_ctx();
        let mut ctx = Context { symbols: &mut symbols, sections: &mut sections, kernels: &mut kernels };
        let mut handler = AmdHandler::new(&mut ctx, Bits::Elf64);
        handler.add_kernel(&mut ctx, "foo").unwrap();
        handler.set_current_kernel(Some(0));
        assert!(handler.parse_pseudo_op(&mut ctx, ".calnote", "4, deadbeef").unwrap());
        assert_eq!(handler.kernels[0].cal_notes[0].data, vec![0xde, 0xad, 0xbe, 0xef]);
    }

    #[test]
    fn unknown_pseudo_op_is_not_consumed() {
        let (mut symbols, mut sections, mut kernels) = new_ctx();
        let mut ctx = Context { symbols: &mut symbols, sections: &mut sections, kernels: &mut kernels };
        let mut handler = AmdHandler::new(&mut ctx, Bits::Elf64);
        assert!(!handler.parse_pseudo_op(&mut ctx, ".unknown", "").unwrap());
    }
}
