use enumflags2::{bitflags, BitFlags};

/// One dump option from spec.md §4.7's flag set. Combined into a [`BitFlags<DumpFlag>`]
/// the same way `clrx-formats`' section flags are combined.
#[bitflags]
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpFlag {
    Code,
    Metadata,
    Data,
    CalNotes,
    Floats,
    HexCode,
    Setup,
    Config,
    HsaConfig,
    HsaLayout,
    CodePos,
    BuggyFpLiterals,
}

/// The flag set a disassembly run is invoked with.
pub type DumpFlags = BitFlags<DumpFlag>;
