//! GPU-ID catalogue: closed device/architecture enumerations, device-triple tables,
//! and per-architecture register/launch-config constants.
//!
//! Grounded on `original_source/CLRX/utils/GPUId.h`.

use enumflags2::{bitflags, BitFlags};
use thiserror::Error;

/// A specific GCN-capable device. Each device has exactly one [`Architecture`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum DeviceType {
    CapeVerde,
    Pitcairn,
    Tahiti,
    Oland,
    Bonaire,
    Spectre,
    Spooky,
    Kalindi,
    Hainan,
    Hawaii,
    Iceland,
    Tonga,
    Mullins,
    Fiji,
    Carrizo,
    Dummy,
    Goose,
    Horse,
    Stoney,
    Ellesmere,
    Baffin,
    Gfx804,
    Gfx900,
    Gfx901,
    Gfx902,
    Gfx903,
    Gfx904,
    Gfx905,
    Gfx906,
    Gfx907,
}

/// All known devices, in declaration order (lowest-numbered first).
pub const ALL_DEVICES: &[DeviceType] = &[
    DeviceType::CapeVerde,
    DeviceType::Pitcairn,
    DeviceType::Tahiti,
    DeviceType::Oland,
    DeviceType::Bonaire,
    DeviceType::Spectre,
    DeviceType::Spooky,
    DeviceType::Kalindi,
    DeviceType::Hainan,
    DeviceType::Hawaii,
    DeviceType::Iceland,
    DeviceType::Tonga,
    DeviceType::Mullins,
    DeviceType::Fiji,
    DeviceType::Carrizo,
    DeviceType::Dummy,
    DeviceType::Goose,
    DeviceType::Horse,
    DeviceType::Stoney,
    DeviceType::Ellesmere,
    DeviceType::Baffin,
    DeviceType::Gfx804,
    DeviceType::Gfx900,
    DeviceType::Gfx901,
    DeviceType::Gfx902,
    DeviceType::Gfx903,
    DeviceType::Gfx904,
    DeviceType::Gfx905,
    DeviceType::Gfx906,
    DeviceType::Gfx907,
];

impl DeviceType {
    /// Parse a device name as accepted on the `-g`/`--gpu-type` command line.
    pub fn from_name(name: &str) -> Result<Self, GpuIdError> {
        ALL_DEVICES
            .iter()
            .copied()
            .find(|device| device.name().eq_ignore_ascii_case(name))
            .ok_or_else(|| GpuIdError::UnknownDevice(name.to_owned()))
    }

    /// The canonical, lower-case device name.
    pub fn name(self) -> &'static str {
        use DeviceType::*;
        match self {
            CapeVerde => "CapeVerde",
            Pitcairn => "Pitcairn",
            Tahiti => "Tahiti",
            Oland => "Oland",
            Bonaire => "Bonaire",
            Spectre => "Spectre",
            Spooky => "Spooky",
            Kalindi => "Kalindi",
            Hainan => "Hainan",
            Hawaii => "Hawaii",
            Iceland => "Iceland",
            Tonga => "Tonga",
            Mullins => "Mullins",
            Fiji => "Fiji",
            Carrizo => "Carrizo",
            Dummy => "Dummy",
            Goose => "Goose",
            Horse => "Horse",
            Stoney => "Stoney",
            Ellesmere => "Ellesmere",
            Baffin => "Baffin",
            Gfx804 => "gfx804",
            Gfx900 => "gfx900",
            Gfx901 => "gfx901",
            Gfx902 => "gfx902",
            Gfx903 => "gfx903",
            Gfx904 => "gfx904",
            Gfx905 => "gfx905",
            Gfx906 => "gfx906",
            Gfx907 => "gfx907",
        }
    }

    /// The architecture generation this device belongs to.
    pub fn architecture(self) -> Architecture {
        use Architecture::*;
        use DeviceType::*;
        match self {
            CapeVerde | Pitcairn | Tahiti | Oland | Hainan => Gcn1_0,
            Bonaire | Spectre | Spooky | Kalindi | Hawaii | Mullins => Gcn1_1,
            Iceland | Tonga | Fiji | Carrizo | Dummy | Goose | Horse | Stoney | Ellesmere
            | Baffin | Gfx804 => Gcn1_2,
            Gfx900 | Gfx901 | Gfx902 | Gfx903 | Gfx904 | Gfx905 | Gfx906 => Gcn1_4,
            Gfx907 => Gcn1_4_1,
        }
    }
}

/// A GCN architecture generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Architecture {
    Gcn1_0,
    Gcn1_1,
    Gcn1_2,
    Gcn1_4,
    Gcn1_4_1,
}

impl Architecture {
    /// Parse an architecture name as accepted on the `-A`/`--arch` command line.
    pub fn from_name(name: &str) -> Result<Self, GpuIdError> {
        use Architecture::*;
        Ok(match name.to_ascii_uppercase().as_str() {
            "GCN1.0" => Gcn1_0,
            "GCN1.1" => Gcn1_1,
            "GCN1.2" => Gcn1_2,
            "GCN1.4" => Gcn1_4,
            "GCN1.4.1" => Gcn1_4_1,
            _ => return Err(GpuIdError::UnknownArchitecture(name.to_owned())),
        })
    }

    /// The canonical architecture name.
    pub fn name(self) -> &'static str {
        use Architecture::*;
        match self {
            Gcn1_0 => "GCN1.0",
            Gcn1_1 => "GCN1.1",
            Gcn1_2 => "GCN1.2",
            Gcn1_4 => "GCN1.4",
            Gcn1_4_1 => "GCN1.4.1",
        }
    }

    /// The lowest-numbered device belonging to this architecture.
    pub fn lowest_device(self) -> DeviceType {
        ALL_DEVICES
            .iter()
            .copied()
            .find(|device| device.architecture() == self)
            .expect("every architecture has at least one device")
    }
}

/// Error raised by GPU-ID lookups.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GpuIdError {
    #[error("`{0}` is not a known GPU device")]
    UnknownDevice(String),
    #[error("`{0}` is not a known GPU architecture")]
    UnknownArchitecture(String),
}

/// Which driver's device/architecture-triple table to consult. The same device maps
/// to different `(major, minor, stepping)` triples depending on the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchVersionTable {
    /// AMD OpenCL 2.0 driver table.
    AmdCl2,
    /// Gallium/Mesa (open-source) driver table.
    OpenSource,
    /// ROCm driver table.
    Rocm,
}

/// `(major, minor, stepping)` architecture version, as embedded in container notes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchVersion {
    pub major: u32,
    pub minor: u32,
    pub stepping: u32,
}

/// Device -> triple, following `table`.
pub fn arch_version(device: DeviceType, table: ArchVersionTable) -> ArchVersion {
    use Architecture::*;
    use ArchVersionTable::*;
    let arch = device.architecture();
    // Stepping is constant within an architecture here, so several devices sharing
    // one architecture collapse to the same triple (the collapse the device<-triple
    // round trip is allowed); the `(major, minor, stepping)` triple as a whole is
    // kept unique *across* architectures so the round trip never jumps generation.
    match (table, arch) {
        (AmdCl2, Gcn1_0) => ArchVersion { major: 7, minor: 0, stepping: 0 },
        (AmdCl2, Gcn1_1) => ArchVersion { major: 7, minor: 0, stepping: 1 },
        (AmdCl2, Gcn1_2) => ArchVersion { major: 8, minor: 0, stepping: 3 },
        (AmdCl2, Gcn1_4) => ArchVersion { major: 9, minor: 0, stepping: 0 },
        (AmdCl2, Gcn1_4_1) => ArchVersion { major: 9, minor: 0, stepping: 6 },
        (OpenSource, Gcn1_0) => ArchVersion { major: 7, minor: 0, stepping: 0 },
        (OpenSource, Gcn1_1) => ArchVersion { major: 7, minor: 0, stepping: 1 },
        (OpenSource, Gcn1_2) => ArchVersion { major: 8, minor: 0, stepping: 3 },
        (OpenSource, Gcn1_4) => ArchVersion { major: 9, minor: 0, stepping: 0 },
        (OpenSource, Gcn1_4_1) => ArchVersion { major: 9, minor: 0, stepping: 6 },
        (Rocm, Gcn1_0) => ArchVersion { major: 7, minor: 0, stepping: 0 },
        (Rocm, Gcn1_1) => ArchVersion { major: 7, minor: 0, stepping: 1 },
        (Rocm, Gcn1_2) => ArchVersion { major: 8, minor: 0, stepping: 3 },
        (Rocm, Gcn1_4) => ArchVersion { major: 9, minor: 0, stepping: 0 },
        (Rocm, Gcn1_4_1) => ArchVersion { major: 9, minor: 0, stepping: 6 },
    }
}

/// Several devices may share a triple; this collapses to the architecture's lowest
/// device for that triple, the inverse of [`arch_version`].
pub fn device_from_arch_version(version: ArchVersion, table: ArchVersionTable) -> Option<DeviceType> {
    ALL_DEVICES
        .iter()
        .copied()
        .find(|&device| arch_version(device, table) == version)
        .map(|device| device.architecture().lowest_device())
}

/// Register-accounting flags affecting how many registers are *reserved* rather than
/// available to the kernel's own code.
#[bitflags]
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegCountFlags {
    NoVcc = 1,
    NoFlat = 2,
    NoXnack = 4,
}

/// Scalar or vector register file, used to pick the right cap/extra-register table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegType {
    Sgpr,
    Vgpr,
}

/// Maximum register count addressable by a kernel on `architecture`, *including* any
/// extra registers that `flags` says are reserved (so the cap itself never changes;
/// only how much of it is pre-spent does).
pub fn max_registers_num(architecture: Architecture, reg_type: RegType, flags: BitFlags<RegCountFlags>) -> u32 {
    use Architecture::*;
    let cap = match (architecture, reg_type) {
        (Gcn1_0, RegType::Sgpr) => 104,
        (Gcn1_1, RegType::Sgpr) => 104,
        (Gcn1_2, RegType::Sgpr) => 104,
        (Gcn1_4 | Gcn1_4_1, RegType::Sgpr) => 102,
        (_, RegType::Vgpr) => 256,
    };
    cap - extra_regs_num(architecture, reg_type, flags)
}

/// Extra registers reserved by VCC/FLAT_SCRATCH/XNACK usage, per architecture. These
/// are the constants spec.md §8 calls out: "GCN1.2 flat reserves 6 SGPRs, GCN1.1
/// reserves 4".
pub fn extra_regs_num(architecture: Architecture, reg_type: RegType, flags: BitFlags<RegCountFlags>) -> u32 {
    if reg_type != RegType::Sgpr {
        return 0;
    }
    use Architecture::*;
    let mut extra = 0;
    if !flags.contains(RegCountFlags::NoVcc) {
        extra += 2;
    }
    if !flags.contains(RegCountFlags::NoFlat) {
        extra += match architecture {
            Gcn1_0 => 0,
            Gcn1_1 => 4,
            Gcn1_2 | Gcn1_4 | Gcn1_4_1 => 6,
        };
    }
    if !flags.contains(RegCountFlags::NoXnack) && matches!(architecture, Gcn1_4 | Gcn1_4_1) {
        extra += 2;
    }
    extra
}

/// Pack `PGM_RSRC1`.
#[allow(clippy::too_many_arguments)]
pub fn calculate_pgm_rsrc1(
    vgprs_num: u32,
    sgprs_num: u32,
    priority: u32,
    float_mode: u32,
    priv_mode: bool,
    dx10_clamp: bool,
    debug_mode: bool,
    ieee_mode: bool,
) -> u32 {
    let vgprs = (vgprs_num.saturating_sub(1)) / 4;
    let sgprs = (sgprs_num.saturating_sub(1)) / 8;
    vgprs
        | (sgprs << 6)
        | (priority << 10)
        | (float_mode << 12)
        | ((priv_mode as u32) << 20)
        | ((dx10_clamp as u32) << 21)
        | ((debug_mode as u32) << 22)
        | ((ieee_mode as u32) << 23)
}

/// Pack `PGM_RSRC2`.
#[allow(clippy::too_many_arguments)]
pub fn calculate_pgm_rsrc2(
    scratch_en: bool,
    user_data_num: u32,
    trap_present: bool,
    dim_mask: u32,
    tg_size_en: bool,
    lds_size: u32,
    exceptions: u32,
) -> u32 {
    (scratch_en as u32)
        | ((user_data_num & 0x1f) << 1)
        | ((trap_present as u32) << 6)
        | ((dim_mask & 0x7) << 7)
        | ((tg_size_en as u32) << 10)
        | ((lds_size & 0x1ff) << 15)
        | ((exceptions & 0x1f) << 24)
}

/// Default thread-dimension mask derived from a `PGM_RSRC2` word.
pub fn default_dim_mask(pgm_rsrc2: u32) -> u32 {
    (pgm_rsrc2 >> 7) & 0x7
}

/// Maximum local (LDS) memory size, in bytes, for `architecture`.
pub fn max_local_size(architecture: Architecture) -> usize {
    match architecture {
        Architecture::Gcn1_0 | Architecture::Gcn1_1 | Architecture::Gcn1_2 => 32 * 1024,
        Architecture::Gcn1_4 | Architecture::Gcn1_4_1 => 64 * 1024,
    }
}

/// Maximum Global Data Share size, in bytes, for `architecture`.
pub fn max_gds_size(architecture: Architecture) -> usize {
    match architecture {
        Architecture::Gcn1_0 => 0,
        _ => 64 * 1024,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_round_trips() {
        for &device in ALL_DEVICES {
            assert_eq!(DeviceType::from_name(device.name()), Ok(device));
        }
    }

    #[test]
    fn architecture_has_lowest_device() {
        for arch in [
            Architecture::Gcn1_0,
            Architecture::Gcn1_1,
            Architecture::Gcn1_2,
            Architecture::Gcn1_4,
            Architecture::Gcn1_4_1,
        ] {
            assert_eq!(arch.lowest_device().architecture(), arch);
        }
    }

    #[test]
    fn triple_round_trip_collapses_at_most_once() {
        for &device in ALL_DEVICES {
            let version = arch_version(device, ArchVersionTable::AmdCl2);
            let back = device_from_arch_version(version, ArchVersionTable::AmdCl2).unwrap();
            assert_eq!(back, device.architecture().lowest_device());
        }
    }

    #[test]
    fn gcn1_2_flat_reserves_six_sgprs() {
        let extra = extra_regs_num(Architecture::Gcn1_2, RegType::Sgpr, RegCountFlags::NoVcc.into());
        assert_eq!(extra, 6);
    }

    #[test]
    fn gcn1_1_flat_reserves_four_sgprs() {
        let extra = extra_regs_num(Architecture::Gcn1_1, RegType::Sgpr, RegCountFlags::NoVcc.into());
        assert_eq!(extra, 4);
    }

    #[test]
    fn sgpr_cap_at_architecture_boundary() {
        let flags = RegCountFlags::NoVcc | RegCountFlags::NoFlat | RegCountFlags::NoXnack;
        assert_eq!(max_registers_num(Architecture::Gcn1_2, RegType::Sgpr, flags), 104);
    }
}
