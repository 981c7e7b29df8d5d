//! `clrx-disasm` walks a parsed container model back into assembler-syntax
//! text (spec.md §4.7): file/global headers, per-kernel configuration
//! directives, and the instruction stream itself.

#![deny(unused)]
#![deny(warnings)]
#![deny(clippy::all)]

mod driver;
mod error;
mod flags;
mod model;

pub use driver::{disassemble, CodePosContext};
pub use error::Error;
pub use flags::{DumpFlag, DumpFlags};
pub use model::{DisassembleInput, KernelView};
