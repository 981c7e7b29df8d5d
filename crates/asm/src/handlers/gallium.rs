//! The Gallium/Mesa format handler (spec.md §6 "Gallium/Mesa", §4.6). A
//! Kcode-style handler with an `inside ∈ {MAINLAYOUT, CONFIG, ARGS, PROGINFO}`
//! state machine gating which pseudo-ops are valid at any point.

use enumflags2::BitFlags;

use clrx_elf::Bits;
use clrx_formats::common::RegisterUsage;
use clrx_formats::gallium::{default_prog_info, is_llvm390, GalliumKernel, GalliumModel, ProgInfo};
use clrx_gpu::gpuid::{max_registers_num, Architecture, RegType};

use crate::error::Error;
use crate::expr::EvalValue;
use crate::kcode::KcodeStack;
use crate::section::{Section, SectionId, SectionKind, SectionScope};

use super::{split_args, Context, FormatHandler};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Inside {
    MainLayout,
    Config,
    Args,
    ProgInfo,
}

#[derive(Debug, Clone)]
struct PendingKernel {
    prog_info: ProgInfo,
    code_section: SectionId,
}

pub struct GalliumHandler {
    bits: Bits,
    architecture: Architecture,
    llvm_version: u32,
    comment: String,
    global_data_section: SectionId,
    kernels: Vec<PendingKernel>,
    current_kernel: Option<u32>,
    kcode: KcodeStack,
    running_usage: RegisterUsage,
    inside: Inside,
    model: Option<GalliumModel>,
}

const NUM_SGPRS: u32 = 0x00b848;
const NUM_VGPRS: u32 = 0x00b84c;
const FLOAT_MODE: u32 = 0x00b8a0;
/// Added to `PROG_INFO` once LLVM ≥ 3.9 is selected (spec.md §8 scenario 5).
const NUM_SPILLED_SGPRS: u32 = 0x00b85c;
const NUM_SPILLED_VGPRS: u32 = 0x00b860;

/// A fresh `PROG_INFO` with the well-known entry addresses filled in,
/// 3 or 5 entries long depending on `llvm_version`.
fn fresh_prog_info(llvm_version: u32) -> ProgInfo {
    let mut info = default_prog_info(llvm_version);
    info[0].address = NUM_SGPRS;
    info[1].address = NUM_VGPRS;
    info[2].address = FLOAT_MODE;
    if is_llvm390(llvm_version) {
        info[3].address = NUM_SPILLED_SGPRS;
        info[4].address = NUM_SPILLED_VGPRS;
    }
    info
}

impl GalliumHandler {
    pub fn new(ctx: &mut Context, bits: Bits, architecture: Architecture, llvm_version: u32) -> Self {
        let global_data_section = ctx.sections.add(Section::new(
            SectionId(0),
            ".rodata",
            SectionScope::Global,
            SectionKind::Data,
            BitFlags::empty(),
        ));
        Self {
            bits,
            architecture,
            llvm_version,
            comment: String::new(),
            global_data_section,
            kernels: Vec::new(),
            current_kernel: None,
            kcode: KcodeStack::new(),
            running_usage: RegisterUsage::default(),
            inside: Inside::MainLayout,
            model: None,
        }
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

impl FormatHandler for GalliumHandler {
    fn add_kernel(&mut self, ctx: &mut Context, name: &str) -> Result<u32, Error> {
        if self.inside != Inside::MainLayout {
            return Err(Error::DirectiveState(".kernel is only valid at the top level".into()));
        }
        let id = ctx.kernels.add(name)?;
        let code_section = ctx.sections.add(Section::new(
            SectionId(0),
            format!(".text.{name}"),
            SectionScope::Kernel(id),
            SectionKind::Code,
            BitFlags::empty(),
        ));
        ctx.kernels.get_mut(id).code_section = Some(code_section);
        let prog_info = fresh_prog_info(self.llvm_version);
        self.kernels.push(PendingKernel { prog_info, code_section });
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
            ".config" => {
                self.inside = Inside::Config;
                Ok(true)
            }
            ".args" => {
                self.inside = Inside::Args;
                Ok(true)
            }
            ".proginfo" => {
                self.inside = Inside::ProgInfo;
                Ok(true)
            }
            ".entry" => {
                if self.inside != Inside::ProgInfo {
                    return Err(Error::DirectiveState(".entry is only valid inside .proginfo".into()));
                }
                let Some(current) = self.current_kernel else {
                    return Err(Error::DirectiveState(".entry outside a kernel".into()));
                };
                let parts = split_args(args);
                let [address, value] = parts.as_slice() else {
                    return Err(Error::DirectiveState(".entry requires an address and a value".into()));
                };
                let address = clrx_gpu::numstr::parse_u64_ranged(address, u32::MAX as u64)
                    .map_err(|error| Error::DirectiveState(format!("bad .entry address: {error}")))? as u32;
                let value = clrx_gpu::numstr::parse_u64_ranged(value, u32::MAX as u64)
                    .map_err(|error| Error::DirectiveState(format!("bad .entry value: {error}")))? as u32;
                let prog_info = &mut self.kernels[current as usize].prog_info;
                match prog_info.iter_mut().find(|entry| entry.address == address) {
                    Some(entry) => entry.value = value,
                    None => return Err(Error::DirectiveState(format!("unknown PROG_INFO address {address:#x}"))),
                }
                Ok(true)
            }
            ".comment" => {
                self.comment = args.trim().trim_matches('"').to_owned();
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
        let mut kernels = Vec::with_capacity(self.kernels.len());
        for (index, kernel) in ctx.kernels.iter().enumerate() {
            let pending = &self.kernels[index];
            kernels.push(GalliumKernel {
                name: kernel.name.clone(),
                prog_info: pending.prog_info.clone(),
                code: ctx.sections.get(pending.code_section).data.clone(),
            });
        }
        self.model = Some(GalliumModel {
            bits: self.bits,
            llvm_version: self.llvm_version,
            comment: self.comment.clone(),
            global_data: ctx.sections.get(self.global_data_section).data.clone(),
            kernels,
        });
        Ok(())
    }

    fn write_binary(&self) -> Result<Vec<u8>, Error> {
        let model = self.model.as_ref().ok_or_else(|| Error::DirectiveState("prepareBinary not run".into()))?;
        clrx_formats::gallium::emit(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::KernelTable;
    use crate::section::SectionTable;
    use crate::symbol::SymbolTable;

    fn new_handler() -> (GalliumHandler, SymbolTable, SectionTable, KernelTable) {
        let mut symbols = SymbolTable::new();
        let mut sections = SectionTable::new();
        let mut kernels = KernelTable::new();
        let handler = {
            let mut ctx = Context { symbols: &mut symbols, sections: &mut sections, kernels: &mut kernels };
            GalliumHandler::new(&mut ctx, Bits::Elf32, Architecture::Gcn1_2, 0)
        };
        (handler, symbols, sections, kernels)
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
    fn llvm390_selects_five_entry_fresh_prog_info() {
        let mut symbols = SymbolTable::new();
        let mut sections = SectionTable::new();
        let mut kernels = KernelTable::new();
        let mut handler = {
            let mut ctx = Context { symbols: &mut symbols, sections: &mut sections, kernels: &mut kernels };
            GalliumHandler::new(&mut ctx, Bits::Elf32, Architecture::Gcn1_2, clrx_formats::gallium::LLVM_3_9)
        };
        let mut ctx = Context { symbols: &mut symbols, sections: &mut sections, kernels: &mut kernels };
        handler.add_kernel(&mut ctx, "k").unwrap();
        assert_eq!(handler.kernels[0].prog_info.len(), 5);
    }

    #[test]
    fn entry_outside_proginfo_state_is_rejected() {
        let (mut handler, mut symbols, mut sections, mut kernels) = new_handler();
        let mut ctx = Context { symbols: &mut symbols, sections: &mut sections, kernels: &mut kernels };
        handler.add_kernel(&mut ctx, "k").unwrap();
        handler.set_current_kernel(Some(0));
        assert!(handler.parse_pseudo_op(&mut ctx, ".entry", "0xb848, 5").is_err());
    }

    #[test]
    fn entry_inside_proginfo_updates_the_matching_slot() {
        let (mut handler, mut symbols, mut sections, mut kernels) = new_handler();
        let mut ctx = Context { symbols: &mut symbols, sections: &mut sections, kernels: &mut kernels };
        handler.add_kernel(&mut ctx, "k").unwrap();
        handler.set_current_kernel(Some(0));
        handler.parse_pseudo_op(&mut ctx, ".proginfo", "").unwrap();
        handler.parse_pseudo_op(&mut ctx, ".entry", "0xb848, 5").unwrap();
        assert_eq!(handler.kernels[0].prog_info[0].value, 5);
    }

    #[test]
    fn kernel_directive_rejected_inside_a_nested_state() {
        let (mut handler, mut symbols, mut sections, mut kernels) = new_handler();
        let mut ctx = Context { symbols: &mut symbols, sections: &mut sections, kernels: &mut kernels };
        handler.parse_pseudo_op(&mut ctx, ".config", "").unwrap();
        assert!(handler.add_kernel(&mut ctx, "k").is_err());
    }
}
