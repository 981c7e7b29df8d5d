//! The AMDCL2 format handler (spec.md §6 "AMDCL2", §4.6). A Kcode-style
//! handler: `.kcode`/`.kcodeend` mirror labels in a shared code section into
//! every selected kernel's register accounting. Carries the relocation
//! symbol map `{globaldata=0, rwdata=1, bss=2}` spec.md §4.6 names.

use enumflags2::BitFlags;

use clrx_elf::Bits;
use clrx_formats::amdcl2::{default_hsa_config_mode, AmdCl2Kernel, AmdCl2Model, HsaConfigMode, KernelSetup};
use clrx_formats::common::{Relocation, RelocationKind, RegisterUsage};
use clrx_gpu::gpuid::{max_registers_num, Architecture, RegType};

use crate::error::Error;
use crate::expr::EvalValue;
use crate::kcode::KcodeStack;
use crate::section::{Section, SectionFlags, SectionId, SectionKind, SectionScope};

use super::{split_args, Context, FormatHandler};

#[derive(Debug, Clone)]
struct PendingKernel {
    setup: KernelSetup,
    code_section: SectionId,
}

pub struct AmdCl2Handler {
    bits: Bits,
    architecture: Architecture,
    driver_version: u32,
    global_data_section: SectionId,
    rwdata_section: SectionId,
    bss_section: SectionId,
    kernels: Vec<PendingKernel>,
    current_kernel: Option<u32>,
    kcode: KcodeStack,
    running_usage: RegisterUsage,
    relocations: Vec<Relocation>,
    model: Option<AmdCl2Model>,
}

fn reloc_symbol_index(name: &str) -> Option<u32> {
    match name {
        "globaldata" => Some(0),
        "rwdata" => Some(1),
        "bss" => Some(2),
        _ => None,
    }
}

fn reloc_kind(name: &str) -> Option<RelocationKind> {
    Some(match name {
        "value" => RelocationKind::Value,
        "low32" => RelocationKind::Low32Bit,
        "high32" => RelocationKind::High32Bit,
        "abs64" => RelocationKind::Absolute64,
        "got" => RelocationKind::GotEntry,
        _ => return None,
    })
}

impl AmdCl2Handler {
    pub fn new(ctx: &mut Context, bits: Bits, architecture: Architecture) -> Self {
        let global_data_section = ctx.sections.add(Section::new(
            SectionId(0),
            ".rodata",
            SectionScope::Global,
            SectionKind::Data,
            SectionFlags::ElfAlloc,
        ));
        let rwdata_section = ctx.sections.add(Section::new(
            SectionId(0),
            ".data",
            SectionScope::Global,
            SectionKind::Data,
            SectionFlags::Writable | SectionFlags::ElfAlloc | SectionFlags::ElfWrite,
        ));
        let bss_section = ctx.sections.add(Section::new(
            SectionId(0),
            ".bss",
            SectionScope::Global,
            SectionKind::Data,
            SectionFlags::Writable | SectionFlags::ElfAlloc | SectionFlags::ElfWrite,
        ));
        Self {
            bits,
            architecture,
            driver_version: 0,
            global_data_section,
            rwdata_section,
            bss_section,
            kernels: Vec::new(),
            current_kernel: None,
            kcode: KcodeStack::new(),
            running_usage: RegisterUsage::default(),
            relocations: Vec::new(),
            model: None,
        }
    }

    /// Check `count` against the architecture's register cap (spec.md §8
    /// "exactly at the architecture cap assemble succeeds; cap+1 raises an
    /// error"), using the default reservation (VCC+FLAT+XNACK all reserved
    /// unless a future `REGCOUNT_NO_*` directive says otherwise).
    fn check_register_cap(&self, kind: &str, reg_type: RegType, count: u16) -> Result<(), Error> {
        let cap = max_registers_num(self.architecture, reg_type, BitFlags::empty());
        if u32::from(count) > cap {
            return Err(Error::RegisterCapExceeded(kind.to_owned(), u32::from(count), cap));
        }
        Ok(())
    }
}

impl FormatHandler for AmdCl2Handler {
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
        let setup = KernelSetup {
            mode: HsaConfigMode::Legacy,
            private_segment_size: 0,
            group_segment_size: 0,
            kernel_code_entry_offset: 0,
            compute_pgm_rsrc1: 0,
            compute_pgm_rsrc2: 0,
            kernel_code_properties: 0,
            kernarg_segment_byte_size: 0,
            wavefront_sgpr_count: 0,
            workitem_vgpr_count: 0,
        };
        self.kernels.push(PendingKernel { setup, code_section });
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
            ".driver_version" => {
                self.driver_version = clrx_gpu::numstr::parse_u64_ranged(args.trim(), u32::MAX as u64)
                    .map_err(|error| Error::DirectiveState(format!("bad driver version: {error}")))? as u32;
                Ok(true)
            }
            ".setup" => {
                let Some(current) = self.current_kernel else {
                    return Err(Error::DirectiveState(".setup outside a kernel".into()));
                };
                for field in split_args(args) {
                    let (key, value) = field
                        .split_once('=')
                        .ok_or_else(|| Error::DirectiveState(format!("bad .setup field `{field}`")))?;
                    let value = clrx_gpu::numstr::parse_u64_ranged(value.trim(), u64::MAX)
                        .map_err(|error| Error::DirectiveState(format!("bad .setup value: {error}")))?;
                    let setup = &mut self.kernels[current as usize].setup;
                    match key.trim() {
                        "private" => setup.private_segment_size = value as u32,
                        "group" => setup.group_segment_size = value as u32,
                        "entry" => setup.kernel_code_entry_offset = value,
                        "rsrc1" => setup.compute_pgm_rsrc1 = value as u32,
                        "rsrc2" => setup.compute_pgm_rsrc2 = value as u32,
                        other => return Err(Error::UnknownDirective(format!(".setup field `{other}`"))),
                    }
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
                    let id = ctx
                        .kernels
                        .by_name(name)
                        .ok_or_else(|| Error::UndefinedSymbol(name.clone()))?;
                    ids.push(id);
                }
                self.kcode.push(ids);
                Ok(true)
            }
            ".kcodeend" => {
                self.kcode
                    .pop()
                    .ok_or_else(|| Error::DirectiveState(".kcodeend without matching .kcode".into()))?;
                Ok(true)
            }
            ".reloc" => {
                let parts = split_args(args);
                let [offset, kind, symbol, addend] = parts.as_slice() else {
                    return Err(Error::DirectiveState(".reloc requires offset, kind, symbol, addend".into()));
                };
                let offset = clrx_gpu::numstr::parse_u64_ranged(offset, u64::MAX)
                    .map_err(|error| Error::DirectiveState(format!("bad .reloc offset: {error}")))?;
                let kind = reloc_kind(kind).ok_or_else(|| Error::DirectiveState(format!("unknown relocation kind `{kind}`")))?;
                let target_symbol_index = reloc_symbol_index(symbol)
                    .ok_or_else(|| Error::DirectiveState(format!("unknown relocation symbol `{symbol}`")))?;
                let addend = clrx_gpu::numstr::parse_i64_ranged(addend, i64::MIN, i64::MAX)
                    .map_err(|error| Error::DirectiveState(format!("bad .reloc addend: {error}")))?;
                let section = ctx.sections.current().map(|id| id.0).unwrap_or(0);
                self.relocations.push(Relocation { section, offset, kind, target_symbol_index, addend });
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
        // The HSA config mode is decided once every `.driver_version` in the
        // source has been seen (spec.md §8 "AMDCL2 default format flips for
        // driver ≥ 200406 on GCN1.1+"), not at `.kernel` time.
        let mode = default_hsa_config_mode(self.driver_version, self.architecture);
        let mut kernels = Vec::with_capacity(self.kernels.len());
        for (index, kernel) in ctx.kernels.iter().enumerate() {
            let pending = &self.kernels[index];
            let mut setup = pending.setup;
            setup.mode = mode;
            kernels.push(AmdCl2Kernel {
                name: kernel.name.clone(),
                setup,
                code: ctx.sections.get(pending.code_section).data.clone(),
            });
        }
        self.model = Some(AmdCl2Model {
            bits: self.bits,
            driver_version: self.driver_version,
            global_data: ctx.sections.get(self.global_data_section).data.clone(),
            rwdata: ctx.sections.get(self.rwdata_section).data.clone(),
            kernels,
            relocations: self.relocations.clone(),
        });
        let _ = self.bss_section;
        Ok(())
    }

    fn write_binary(&self) -> Result<Vec<u8>, Error> {
        let model = self.model.as_ref().ok_or_else(|| Error::DirectiveState("prepareBinary not run".into()))?;
        clrx_formats::amdcl2::emit(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::KernelTable;
    use crate::section::SectionTable;
    use crate::symbol::SymbolTable;

    fn new_handler() -> (AmdCl2Handler, SymbolTable, SectionTable, KernelTable) {
        let mut symbols = SymbolTable::new();
        let mut sections = SectionTable::new();
        let mut kernels = KernelTable::new();
        let handler = {
            let mut ctx = Context { symbols: &mut symbols, sections: &mut sections, kernels: &mut kernels };
            AmdCl2Handler::new(&mut ctx, Bits::Elf64, Architecture::Gcn1_2)
        };
        (handler, symbols, sections, kernels)
    }

    #[test]
    fn setup_pseudo_op_updates_pending_kernel() {
        let (mut handler, mut symbols, mut sections, mut kernels) = new_handler();
        let mut ctx = Context { symbols: &mut symbols, sections: &mut sections, kernels: &mut kernels };
        handler.add_kernel(&mut ctx, "k").unwrap();
        handler.set_current_kernel(Some(0));
        handler.parse_pseudo_op(&mut ctx, ".setup", "private=16, group=256, rsrc1=7").unwrap();
        assert_eq!(handler.kernels[0].setup.private_segment_size, 16);
        assert_eq!(handler.kernels[0].setup.group_segment_size, 256);
        assert_eq!(handler.kernels[0].setup.compute_pgm_rsrc1, 7);
    }

    #[test]
    fn kcode_span_mirrors_register_counts_on_label() {
        let (mut handler, mut symbols, mut sections, mut kernels) = new_handler();
        let mut ctx = Context { symbols: &mut symbols, sections: &mut sections, kernels: &mut kernels };
        handler.add_kernel(&mut ctx, "a").unwrap();
        handler.add_kernel(&mut ctx, "b").unwrap();
        handler.parse_pseudo_op(&mut ctx, ".kcode", "a, b").unwrap();
        handler.parse_pseudo_op(&mut ctx, ".sgprsnum", "12").unwrap();
        handler.parse_pseudo_op(&mut ctx, ".vgprsnum", "8").unwrap();
        handler.handle_label(&mut ctx, "loop_top");
        assert_eq!(ctx.kernels.get(0).registers.sgprs, 12);
        assert_eq!(ctx.kernels.get(1).registers.vgprs, 8);
        handler.parse_pseudo_op(&mut ctx, ".kcodeend", "").unwrap();
        assert!(handler.kcode.current().is_none());
    }

    #[test]
    fn sgprsnum_at_the_cap_succeeds_one_past_fails() {
        let (mut handler, mut symbols, mut sections, mut kernels) = new_handler();
        let mut ctx = Context { symbols: &mut symbols, sections: &mut sections, kernels: &mut kernels };
        // GCN1.2: cap 104, minus 2 (VCC) minus 6 (FLAT) = 96.
        assert!(handler.parse_pseudo_op(&mut ctx, ".sgprsnum", "96").unwrap());
        assert!(handler.parse_pseudo_op(&mut ctx, ".sgprsnum", "97").is_err());
    }

    #[test]
    fn prepare_binary_selects_hsa_config_mode_from_driver_version() {
        let (mut handler, mut symbols, mut sections, mut kernels) = new_handler();
        let mut ctx = Context { symbols: &mut symbols, sections: &mut sections, kernels: &mut kernels };
        handler.add_kernel(&mut ctx, "k").unwrap();
        handler.parse_pseudo_op(&mut ctx, ".driver_version", "200406").unwrap();
        handler.prepare_binary(&ctx).unwrap();
        assert_eq!(handler.model.as_ref().unwrap().kernels[0].setup.mode, HsaConfigMode::Full);
    }

    #[test]
    fn reloc_pseudo_op_resolves_the_symbol_map() {
        let (mut handler, mut symbols, mut sections, mut kernels) = new_handler();
        let mut ctx = Context { symbols: &mut symbols, sections: &mut sections, kernels: &mut kernels };
        handler.parse_pseudo_op(&mut ctx, ".reloc", "0x10, low32, rwdata, 4").unwrap();
        assert_eq!(handler.relocations[0].target_symbol_index, 1);
        assert_eq!(handler.relocations[0].kind, RelocationKind::Low32Bit);
    }
}
