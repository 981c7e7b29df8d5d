//! Format handlers (spec.md §4.6): the uniform surface the assembler drives,
//! with one implementation per container. Kcode-style handlers (AMDCL2,
//! Gallium, ROCm) additionally own a [`crate::kcode::KcodeStack`].

pub mod amd;
pub mod amdcl2;
pub mod gallium;
pub mod raw;
pub mod rocm;

use crate::error::Error;
use crate::expr::EvalValue;
use crate::kernel::KernelTable;
use crate::section::{SectionId, SectionTable};
use crate::symbol::SymbolTable;

/// The assembler state a format handler is allowed to mutate. Borrowed for
/// the duration of a single pseudo-op/label/prepare call; handlers never
/// hold their own copy of symbols/sections/kernels.
pub struct Context<'a> {
    pub symbols: &'a mut SymbolTable,
    pub sections: &'a mut SectionTable,
    pub kernels: &'a mut KernelTable,
}

/// The uniform operation set spec.md §4.6 names, abstracting the four
/// container-specific decisions behind one surface the assembler drives.
pub trait FormatHandler {
    /// `addKernel(name)`: create a kernel record and allocate its default
    /// sections; fails on a duplicate name.
    fn add_kernel(&mut self, ctx: &mut Context, name: &str) -> Result<u32, Error>;

    /// `addSection(name, kernelId)`: create a named section under a kernel
    /// or globally; fails on a duplicate within that scope.
    fn add_section(&mut self, ctx: &mut Context, name: &str, kernel_id: Option<u32>) -> Result<SectionId, Error>;

    /// `getSectionId`: look a previously-added section up by name and scope.
    fn get_section_id(&self, ctx: &Context, name: &str, kernel_id: Option<u32>) -> Option<SectionId>;

    fn set_current_kernel(&mut self, kernel_id: Option<u32>);
    fn set_current_section(&mut self, ctx: &mut Context, section_id: SectionId);

    /// `parsePseudoOp(name, line)`: returns `true` iff this handler
    /// recognizes and consumes the directive.
    fn parse_pseudo_op(&mut self, ctx: &mut Context, name: &str, args: &str) -> Result<bool, Error>;

    /// `handleLabel(name)`: Kcode-style handlers snapshot/restore per-kernel
    /// register accounting here.
    fn handle_label(&mut self, ctx: &mut Context, name: &str);

    /// Optional hook for symbols living in an "unresolvable" pseudo-section;
    /// `None` defers to the ordinary symbol table.
    fn resolve_symbol(&self, _ctx: &Context, _name: &str) -> Option<EvalValue> {
        None
    }

    /// `prepareBinary`: flatten in-memory state into the format codec's
    /// input structure, running final validation.
    fn prepare_binary(&mut self, ctx: &Context) -> Result<(), Error>;

    /// `writeBinary`: invoke the format writer over the state `prepare_binary`
    /// built, producing the final container bytes.
    fn write_binary(&self) -> Result<Vec<u8>, Error>;
}

/// Split a pseudo-op argument line on commas, trimming whitespace, the way
/// every handler's `.kernel a, b, c`-style directives need.
pub fn split_args(args: &str) -> Vec<String> {
    args.split(',').map(|part| part.trim().to_owned()).filter(|part| !part.is_empty()).collect()
}
