//! `clrx-gpu` provides the leaf-level utilities every other `clrx-*` crate builds
//! on: unaligned little-endian byte access, C-style number/string parsing, and the
//! closed GPU device/architecture catalogue.

#![deny(unused)]
#![deny(warnings)]
#![deny(clippy::all)]

pub mod bytes;
pub mod gpuid;
pub mod numstr;

pub use gpuid::{ArchVersion, ArchVersionTable, Architecture, DeviceType, GpuIdError, RegCountFlags, RegType};
pub use numstr::NumParseError;
