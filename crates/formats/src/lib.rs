//! Container format codecs: the four driver binary formats this repository
//! targets, plus the `raw` pseudo-container (spec.md §4.2, §6).

#![deny(unused)]
#![deny(warnings)]
#![deny(clippy::all)]

pub mod amd;
pub mod amdcl2;
pub mod common;
pub mod error;
pub mod gallium;
pub mod raw;
pub mod rocm;

pub use common::{ContainerKind, KernelInfo, Relocation, RelocationKind, RegisterUsage, Target, driver_table_for};
pub use error::Error;
