//! Types shared by every container format codec: relocations, register
//! accounting, and the result every `parse`/`emit` pair produces or consumes.

use clrx_gpu::{Architecture, DeviceType};

/// A relocation, as spec.md §3 describes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Relocation {
    pub section: u32,
    pub offset: u64,
    pub kind: RelocationKind,
    pub target_symbol_index: u32,
    pub addend: i64,
}

/// The relocation kinds this repository's containers use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelocationKind {
    Value,
    Low32Bit,
    High32Bit,
    Absolute64,
    GotEntry,
}

/// Register-allocation accounting for one kernel (spec.md §3 "Kernel").
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegisterUsage {
    pub sgprs: u16,
    pub vgprs: u16,
    pub uses_vcc: bool,
    pub uses_flat: bool,
    pub uses_xnack: bool,
}

impl RegisterUsage {
    /// Component-wise maximum, used by kcode-span accounting (spec.md §4.6, §8
    /// invariant 5).
    pub fn max(self, other: Self) -> Self {
        Self {
            sgprs: self.sgprs.max(other.sgprs),
            vgprs: self.vgprs.max(other.vgprs),
            uses_vcc: self.uses_vcc || other.uses_vcc,
            uses_flat: self.uses_flat || other.uses_flat,
            uses_xnack: self.uses_xnack || other.uses_xnack,
        }
    }
}

/// Identifies which driver table produced/should produce a device<->triple
/// mapping for a given container kind.
pub fn driver_table_for(kind: ContainerKind) -> clrx_gpu::ArchVersionTable {
    use clrx_gpu::ArchVersionTable::*;
    match kind {
        ContainerKind::Amd => AmdCl2,
        ContainerKind::AmdCl2 => AmdCl2,
        ContainerKind::Gallium => OpenSource,
        ContainerKind::Rocm => Rocm,
        ContainerKind::Raw => AmdCl2,
    }
}

/// Which of the four containers (plus `raw`) is in play.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind {
    Amd,
    AmdCl2,
    Gallium,
    Rocm,
    Raw,
}

/// Shared per-kernel identity the disassembler driver and format handlers both
/// need, independent of which container produced it.
#[derive(Debug, Clone)]
pub struct KernelInfo {
    pub name: String,
    pub registers: RegisterUsage,
    pub code_offset: usize,
    pub code_size: usize,
}

/// Target device/architecture a `parse`d model was produced for, or an `emit`
/// should target.
#[derive(Debug, Clone, Copy)]
pub struct Target {
    pub device: DeviceType,
    pub architecture: Architecture,
    pub is_64_bit: bool,
}

impl Target {
    pub fn new(device: DeviceType) -> Self {
        Self { device, architecture: device.architecture(), is_64_bit: true }
    }
}
