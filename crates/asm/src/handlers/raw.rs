//! The `raw` format handler (spec.md §6 "raw"): no kernel metadata, no CAL
//! notes, no kcode spans. Every kernel's code lands in one shared section
//! and the container is just those bytes, concatenated in assembly order.

use enumflags2::BitFlags;

use clrx_formats::raw::RawModel;

use crate::error::Error;
use crate::expr::EvalValue;
use crate::section::{Section, SectionId, SectionKind, SectionScope};

use super::{Context, FormatHandler};

pub struct RawHandler {
    code_section: SectionId,
    model: Option<RawModel>,
}

impl RawHandler {
    pub fn new(ctx: &mut Context) -> Self {
        let code_section =
            ctx.sections.add(Section::new(SectionId(0), ".text", SectionScope::Global, SectionKind::Code, BitFlags::empty()));
        Self { code_section, model: None }
    }
}

impl FormatHandler for RawHandler {
    fn add_kernel(&mut self, ctx: &mut Context, name: &str) -> Result<u32, Error> {
        let id = ctx.kernels.add(name)?;
        ctx.kernels.get_mut(id).code_section = Some(self.code_section);
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

    fn set_current_kernel(&mut self, _kernel_id: Option<u32>) {}

    fn set_current_section(&mut self, ctx: &mut Context, section_id: SectionId) {
        ctx.sections.set_current(section_id);
    }

    fn parse_pseudo_op(&mut self, _ctx: &mut Context, _name: &str, _args: &str) -> Result<bool, Error> {
        Ok(false)
    }

    fn handle_label(&mut self, _ctx: &mut Context, _name: &str) {}

    fn resolve_symbol(&self, _ctx: &Context, _name: &str) -> Option<EvalValue> {
        None
    }

    fn prepare_binary(&mut self, ctx: &Context) -> Result<(), Error> {
        self.model = Some(RawModel { code: ctx.sections.get(self.code_section).data.clone() });
        Ok(())
    }

    fn write_binary(&self) -> Result<Vec<u8>, Error> {
        let model = self.model.as_ref().ok_or_else(|| Error::DirectiveState("prepareBinary not run".into()))?;
        Ok(clrx_formats::raw::emit(model))
    }
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
    fn empty_module_produces_zero_bytes() {
        let (mut symbols, mut sections, mut kernels) = new_ctx();
        let mut ctx = Context { symbols: &mut symbols, sections: &mut sections, kernels: &mut kernels };
        let mut handler = RawHandler::new(&mut ctx);
        handler.prepare_binary(&ctx).unwrap();
        assert_eq!(handler.write_binary().unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn kernels_share_the_single_code_section() {
        let (mut symbols, mut sections, mut kernels) = new_ctx();
        let mut ctx = Context { symbols: &mut symbols, sections: &mut sections, kernels: &mut kernels };
        let mut handler = RawHandler::new(&mut ctx);
        let a = handler.add_kernel(&mut ctx, "a").unwrap();
        let b = handler.add_kernel(&mut ctx, "b").unwrap();
        assert_eq!(ctx.kernels.get(a).code_section, ctx.kernels.get(b).code_section);
    }
}
