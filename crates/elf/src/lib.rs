//! `clrx-elf` is a generic 32/64-bit ELF reader and writer, shared by every
//! binary container format this repository reads or synthesizes (spec.md §4.1,
//! §4.2): the outer/inner ELF of AMD Catalyst, AMDCL2, and Gallium binaries, and
//! the single ELF of ROCm binaries.

#![deny(unused)]
#![deny(warnings)]
#![deny(clippy::all)]

pub mod error;
pub mod header;
pub mod reader;
pub mod writer;

pub use error::Error;
pub use header::{Bits, FileHeader, FileType, ProgramHeader, RelaEntry, SectionHeader, Symbol};
pub use reader::{parse, ElfFile, ParseFlags};
pub use writer::{ElfBuilder, ProgramDescriptor, SectionDescriptor, SymbolDescriptor};
