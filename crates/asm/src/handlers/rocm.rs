//! The ROCm format handler (spec.md §6 "ROCm", §4.6). A Kcode-style handler
//! that additionally tracks globals referenced through the GOT, resolving
//! each one against the symbol table only once `prepareBinary` runs (by
//! which point every definition in the module has been seen).

use enumflags2::BitFlags;

use clrx_formats::common::RegisterUsage;
use clrx_formats::rocm::{KernelDescriptor, RocmKernel, RocmModel};
use clrx_gpu::gpuid::{max_registers_num, Architecture, RegType};

use crate::error::Error;
use crate::expr::EvalValue;
use crate::kcode::KcodeStack;
use crate::section::{Section, SectionId, SectionKind, SectionScope};
use crate::symbol::SymbolLocation;

use super::{split_args, Context, FormatHandler};

#[derive(Debug, Clone)]
struct PendingKernel {
    descriptor: KernelDescriptor,
    metadata_yaml: String,
    code_section: SectionId,
}

pub struct RocmHandler {
    architecture: Architecture,
    global_data_section: SectionId,
    kernels: Vec<PendingKernel>,
    current_kernel: Option<u32>,
    kcode: KcodeStack,
    running_usage: RegisterUsage,
    got_globals: Vec<String>,
    model: Option<RocmModel>,
}

fn empty_descriptor() -> KernelDescriptor {
    KernelDescriptor {
        group_segment_fixed_size: 0,
        private_segment_fixed_size: 0,
        kernarg_size: 0,
        kernel_code_entry_byte_offset: 0,
        compute_pgm_rsrc1: 0,
        compute_pgm_rsrc2: 0,
        compute_pgm_rsrc3: 0,
        kernel_code_properties: 0,
    }
}

impl RocmHandler {
    pub fn new(ctx: &mut Context, architecture: Architecture) -> Self {
        let global_data_section = ctx.sections.add(Section::new(
            SectionId(0),
            ".rodata",
            SectionScope::Global,
            SectionKind::Data,
            BitFlags::empty(),
        ));
        Self {
            architecture,
            global_data_section,
            kernels: Vec::new(),
            current_kernel: None,
            kcode: KcodeStack::new(),
            running_usage: RegisterUsage::default(),
            got_globals: Vec::new(),
            model: None,
        }
    }

    /// Globals referenced by `.globalentry` but never otherwise touched;
    /// exposed so the assembler driver can surface them in its end-of-pass
    /// undefined-symbol diagnostics before `prepareBinary` runs.
    pub fn pending_got_globals(&self) -> &[String] {
        &self.got_globals
    }

    /// Check `count` against the architecture's register cap (spec.md §8
    /// "exactly at the architecture cap assemble succeeds; cap+1 raises an
    /// error").
    fn check_register_cap(&self, kind: &str, reg_type: RegType, count: u16) -> Result<(), Error> {
        let cap = max_registers_num(self.architecture, reg_type, BitFlags::empty());
        if u32::from(count) > cap {
            return Err(Error::RegisterCapExceeded(kind.to_owned(), u32::from(count), cap));
        }
        Ok(())
    }
}

impl FormatHandler for RocmHandler {
    fn add_kernel(&mut self, ctx: &mut Context, name: &str) -> Result<u32, Error> {
        let id = ctx.kernels.add(name)?;
        let code_section = ctx.sections.add(Section::new(
            SectionId(0),
            format!(".text.{name}"),
            SectionScope::Kernel(id),
            SectionKind::Code,
            BitFlags::empty(),
        ));
        ctx.kernels.get_mut(id).code_section = Some(code_section);
        self.kernels.push(PendingKernel { descriptor: empty_descriptor(), metadata_yaml: String::new(), code_section });
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

    fn parse_pseudo_op(&mut self, ctx: &mut Context, name: &str, args: &str) -> Result<bool, Error> {
        match name {
            ".kernel_desc" => {
                let Some(current) = self.current_kernel else {
                    return Err(Error::DirectiveState(".kernel_desc outside a kernel".into()));
                };
                for field in split_args(args) {
                    let (key, value) = field
                        .split_once('=')
                        .ok_or_else(|| Error::DirectiveState(format!("bad .kernel_desc field `{field}`")))?;
                    let value = clrx_gpu::numstr::parse_u64_ranged(value.trim(), u64::MAX)
                        .map_err(|error| Error::DirectiveState(format!("bad .kernel_desc value: {error}")))?;
                    let descriptor = &mut self.kernels[current as usize].descriptor;
                    match key.trim() {
                        "group_segment_size" => descriptor.group_segment_fixed_size = value as u32,
                        "private_segment_size" => descriptor.private_segment_fixed_size = value as u32,
                        "kernarg_size" => descriptor.kernarg_size = value as u32,
                        "entry_offset" => descriptor.kernel_code_entry_byte_offset = value as i64,
                        "rsrc1" => descriptor.compute_pgm_rsrc1 = value as u32,
                        "rsrc2" => descriptor.compute_pgm_rsrc2 = value as u32,
                        "rsrc3" => descriptor.compute_pgm_rsrc3 = value as u32,
                        "properties" => descriptor.kernel_code_properties = value as u16,
                        other => return Err(Error::UnknownDirective(format!(".kernel_desc field `{other}`"))),
                    }
                }
                Ok(true)
            }
            ".metadata" => {
                let Some(current) = self.current_kernel else {
                    return Err(Error::DirectiveState(".metadata outside a kernel".into()));
                };
                self.kernels[current as usize].metadata_yaml = args.trim().trim_matches('"').to_owned();
                Ok(true)
            }
            ".globalentry" => {
                let name = args.trim();
                if name.is_empty() {
                    return Err(Error::DirectiveState(".globalentry requires a symbol name".into()));
                }
                ctx.symbols.reference(name);
                if !self.got_globals.iter().any(|existing| existing == name) {
                    self.got_globals.push(name.to_owned());
                }
                Ok(true)
            }
            ".sgprsnum" => {
                let count = clrx_gpu::numstr::parse_u64_ranged(args.trim(), u16::MAX as u64)
                    .map_err(|error| Error::DirectiveState(format!("bad .sgprsnum: {error}")))? as u16;
                self.check_register_cap("sgprs", RegType::Sgpr, count)?;
                self.running_usage.sgprs = count;
                Ok(true)
            }
            ".vgprsnum" => {
                let count = clrx_gpu::numstr::parse_u64_ranged(args.trim(), u16::MAX as u64)
                    .map_err(|error| Error::DirectiveState(format!("bad .vgprsnum: {error}")))? as u16;
                self.check_register_cap("vgprs", RegType::Vgpr, count)?;
                self.running_usage.vgprs = count;
                Ok(true)
            }
            ".kcode" => {
                let names = split_args(args);
                let mut ids = Vec::with_capacity(names.len());
                for name in &names {
                    let id = ctx.kernels.by_name(name).ok_or_else(|| Error::UndefinedSymbol(name.clone()))?;
                    ids.push(id);
                }
                self.kcode.push(ids);
                Ok(true)
            }
            ".kcodeend" => {
                self.kcode.pop().ok_or_else(|| Error::DirectiveState(".kcodeend without matching .kcode".into()))?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn handle_label(&mut self, ctx: &mut Context, _name: &str) {
        self.kcode.on_label(ctx.kernels, self.running_usage);
    }

    fn resolve_symbol(&self, _ctx: &Context, _name: &str) -> Option<EvalValue> {
        None
    }

    fn prepare_binary(&mut self, ctx: &Context) -> Result<(), Error> {
        let mut got_entries = Vec::with_capacity(self.got_globals.len());
        for name in &self.got_globals {
            let symbol = ctx.symbols.get(name).ok_or_else(|| Error::UndefinedSymbol(name.clone()))?;
            let SymbolLocation::Absolute(value) = symbol.location else {
                return Err(Error::DirectiveState(format!("GOT global `{name}` must resolve to an absolute address")));
            };
            got_entries.push(value as u64);
        }

        let mut kernels = Vec::with_capacity(self.kernels.len());
        for (index, kernel) in ctx.kernels.iter().enumerate() {
            let pending = &self.kernels[index];
            kernels.push(RocmKernel {
                name: kernel.name.clone(),
                descriptor: pending.descriptor,
                metadata_yaml: pending.metadata_yaml.clone(),
                code: ctx.sections.get(pending.code_section).data.clone(),
            });
        }

        self.model = Some(RocmModel {
            global_data: ctx.sections.get(self.global_data_section).data.clone(),
            got_entries,
            kernels,
        });
        Ok(())
    }

    fn write_binary(&self) -> Result<Vec<u8>, Error> {
        let model = self.model.as_ref().ok_or_else(|| Error::DirectiveState("prepareBinary not run".into()))?;
        clrx_formats::rocm::emit(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::KernelTable;
    use crate::section::SectionTable;
    use crate::symbol::SymbolTable;

    fn new_handler() -> (RocmHandler, SymbolTable, SectionTable, KernelTable) {
        let mut symbols = SymbolTable::new();
        let mut sections = SectionTable::new();
        let mut kernels = KernelTable::new();
        let handler = {
            let mut ctx = Context { symbols: &mut symbols, sections: &mut sections, kernels: &mut kernels };
            RocmHandler::new(&mut ctx, Architecture::Gcn1_4)
        };
        (handler, symbols, sections, kernels)
    }

    #[test]
    fn sgprsnum_at_the_cap_succeeds_one_past_fails() {
        let (mut handler, mut symbols, mut sections, mut kernels) = new_handler();
        let mut ctx = Context { symbols: &mut symbols, sections: &mut sections, kernels: &mut kernels };
        // GCN1.4: cap 102, minus 2 (VCC) minus 6 (FLAT) minus 2 (XNACK) = 92.
        assert!(handler.parse_pseudo_op(&mut ctx, ".sgprsnum", "92").unwrap());
        assert!(handler.parse_pseudo_op(&mut ctx, ".sgprsnum", "93").is_err());
    }

    #[test]
    fn globalentry_tracks_unresolved_names_until_prepare() {
        let (mut handler, mut symbols, mut sections, mut kernels) = new_handler();
        let mut ctx = Context { symbols: &mut symbols, sections: &mut sections, kernels: &mut kernels };
        handler.parse_pseudo_op(&mut ctx, ".globalentry", "counter").unwrap();
        assert_eq!(handler.pending_got_globals(), &["counter".to_owned()]);
        assert!(handler.prepare_binary(&ctx).is_err());

        ctx.symbols.define("counter", SymbolLocation::Absolute(0x2000));
        handler.prepare_binary(&ctx).unwrap();
        assert_eq!(handler.model.as_ref().unwrap().got_entries, vec![0x2000]);
    }

    #[test]
    fn kernel_desc_pseudo_op_updates_fields() {
        let (mut handler, mut symbols, mut sections, mut kernels) = new_handler();
        let mut ctx = Context { symbols: &mut symbols, sections: &mut sections, kernels: &mut kernels };
        handler.add_kernel(&mut ctx, "k").unwrap();
        handler.set_current_kernel(Some(0));
        handler.parse_pseudo_op(&mut ctx, ".kernel_desc", "group_segment_size=64, rsrc2=3").unwrap();
        assert_eq!(handler.kernels[0].descriptor.group_segment_fixed_size, 64);
        assert_eq!(handler.kernels[0].descriptor.compute_pgm_rsrc2, 3);
    }
}
