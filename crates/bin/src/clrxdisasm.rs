//! `clrxdisasm` is the executable front end of `clrx-disasm`.
//!
//! This crate contains all the implementation to make `clrx-disasm` an
//! executable that reads one of the supported binary containers and prints
//! its disassembly as assembler-syntax text.

mod error;

use std::{env, ffi::OsString, fs, io::Read, path::{Path, PathBuf}, process};

use argh::FromArgs;
use enumflags2::BitFlags;
use error::Error;

use clrx_disasm::{disassemble, DisassembleInput, DumpFlag, DumpFlags};
use clrx_errors::Result;
use clrx_gpu::{Architecture, DeviceType};

/// The `clrxdisasm` command disassembles a binary container back into
/// assembler-syntax text.
#[derive(Debug, FromArgs)]
struct Clrxdisasm {
    /// explain a particular error based on its code (of kind `E...`).
    #[argh(option)]
    explain: Option<String>,

    /// binaries to disassemble.
    #[argh(positional)]
    input_files: Vec<PathBuf>,

    /// print each kernel's metadata string.
    #[argh(switch, short = 'm')]
    metadata: bool,

    /// print the container's global data.
    #[argh(switch, short = 'd')]
    data: bool,

    /// print each kernel's CAL notes (AMD Catalyst only).
    #[argh(switch, short = 'c')]
    cal_notes: bool,

    /// print each kernel's PROGINFO config entries (Gallium/Mesa only).
    #[argh(switch, short = 'C')]
    config: bool,

    /// print each kernel's setup directive (AMDCL2 only).
    #[argh(switch, short = 's')]
    setup: bool,

    /// print each kernel's HSA kernel descriptor fields (ROCm only).
    #[argh(switch, short = 'H')]
    hsa_config: bool,

    /// print the HSA code object's segment layout (ROCm only).
    #[argh(switch, short = 'L')]
    hsa_layout: bool,

    /// print floating-point immediates in instruction operands.
    #[argh(switch, short = 'f')]
    floats: bool,

    /// print the raw encoded bytes alongside each disassembled instruction.
    #[argh(switch, short = 'h')]
    hexcode: bool,

    /// enable every dump option at once.
    #[argh(switch, short = 'a')]
    all: bool,

    /// treat the input as a bare `raw` container, skipping format detection.
    #[argh(switch, short = 'r')]
    raw: bool,

    /// select the target device by name (for example `Tahiti`).
    #[argh(option, short = 'g')]
    gpu_type: Option<String>,

    /// select the target architecture by name (for example `GCN1.2`).
    #[argh(option, short = 'A')]
    arch: Option<String>,

    /// driver version number to assume when the container doesn't record one.
    #[argh(option, short = 't')]
    driver_version: Option<String>,

    /// LLVM version to assume where the selected format records one.
    #[argh(option)]
    llvm_version: Option<String>,

    /// reproduce the reference assembler's floating-point literal rounding bug.
    #[argh(switch)]
    buggy_fplit: bool,
}

impl Clrxdisasm {
    /// Creates a new `Self` type based on [`std::env::args_os`].
    fn new() -> Result<Self, Error> {
        let arguments =
            env::args_os().map(OsString::into_string).collect::<Result<Vec<_>, _>>().map_err(
                |argument| Error::InvalidArgumentEncoding(argument.to_string_lossy().to_string()),
            )?;

        if arguments.is_empty() {
            return Err(Error::ProgramNameIsMissing);
        }

        let command = Path::new(&arguments[0])
            .file_name()
            .and_then(|file_name| file_name.to_str())
            .unwrap_or(&arguments[0]);

        let arguments =
            arguments.iter().skip(1).map(|argument| argument.as_str()).collect::<Vec<_>>();

        match Clrxdisasm::from_args(&[command], &arguments) {
            Ok(clrxdisasm) => Ok(clrxdisasm),
            Err(early_exit) => match early_exit.status {
                Ok(()) => {
                    println!("{}", early_exit.output);

                    process::exit(0);
                }

                Err(()) => Err(Error::CommandLine(early_exit.output.trim().to_string())),
            },
        }
    }

    fn dump_flags(&self) -> DumpFlags {
        if self.all {
            return BitFlags::all();
        }
        let mut flags = DumpFlags::from(DumpFlag::Code);
        let toggles: &[(bool, DumpFlag)] = &[
            (self.metadata, DumpFlag::Metadata),
            (self.data, DumpFlag::Data),
            (self.cal_notes, DumpFlag::CalNotes),
            (self.config, DumpFlag::Config),
            (self.setup, DumpFlag::Setup),
            (self.hsa_config, DumpFlag::HsaConfig),
            (self.hsa_layout, DumpFlag::HsaLayout),
            (self.floats, DumpFlag::Floats),
            (self.hexcode, DumpFlag::HexCode),
            (self.buggy_fplit, DumpFlag::BuggyFpLiterals),
        ];
        for &(enabled, flag) in toggles {
            if enabled {
                flags |= flag;
            }
        }
        flags
    }
}

/// Resolve the target architecture from `-g`/`-A`, defaulting to the lowest
/// GCN generation when neither is given (there's no way to recover the
/// exact device a container was assembled for from its bytes alone).
fn resolve_architecture(gpu_type: Option<&str>, arch: Option<&str>) -> Result<Architecture, Error> {
    if let Some(name) = gpu_type {
        let device = DeviceType::from_name(name).map_err(|error| Error::CommandLine(error.to_string()))?;
        return Ok(device.architecture());
    }
    if let Some(name) = arch {
        return Architecture::from_name(name).map_err(|error| Error::CommandLine(error.to_string()));
    }
    Ok(Architecture::Gcn1_0)
}

/// Parse `bytes` as one of the four container formats, trying each format's
/// reader in turn and falling back to the `raw` pseudo-container, which
/// never fails to parse (spec.md §6). `-r` skips detection entirely.
fn parse_container(bytes: &[u8], force_raw: bool) -> DisassembleInput {
    if force_raw {
        return DisassembleInput::Raw(clrx_formats::raw::parse(bytes));
    }
    if let Ok(model) = clrx_formats::amdcl2::parse(bytes) {
        return DisassembleInput::AmdCl2(model);
    }
    if let Ok(model) = clrx_formats::rocm::parse(bytes) {
        return DisassembleInput::Rocm(model);
    }
    if let Ok(model) = clrx_formats::gallium::parse(bytes) {
        return DisassembleInput::Gallium(model);
    }
    if let Ok(model) = clrx_formats::amd::parse(bytes) {
        return DisassembleInput::Amd(model);
    }
    DisassembleInput::Raw(clrx_formats::raw::parse(bytes))
}

fn read_input(path: &Path) -> Result<Vec<u8>, Error> {
    if path == Path::new("-") {
        let mut bytes = Vec::new();
        std::io::stdin().read_to_end(&mut bytes)?;
        return Ok(bytes);
    }
    Ok(fs::read(path)?)
}

/// Log options the current container readers don't yet consult (`-t`,
/// `--llvm-version`): the containers this crate reads always carry their own
/// driver/LLVM version fields, so there's nothing for these to override yet.
fn trace_cli_options(clrxdisasm: &Clrxdisasm) {
    log::debug!(
        "driver version override = {:?}, llvm version override = {:?}",
        clrxdisasm.driver_version,
        clrxdisasm.llvm_version,
    );
}

fn main() -> Result<()> {
    env_logger::init();
    Error::install_and_configure()?;

    let clrxdisasm = Clrxdisasm::new()?;

    if let Some(error_code) = clrxdisasm.explain {
        println!("{}", Error::explain(&error_code)?);

        return Ok(());
    }

    if clrxdisasm.input_files.is_empty() {
        return Err(Error::CommandLine("at least one input file is required".to_string()).into());
    }

    trace_cli_options(&clrxdisasm);

    let architecture = resolve_architecture(clrxdisasm.gpu_type.as_deref(), clrxdisasm.arch.as_deref())?;
    let flags = clrxdisasm.dump_flags();

    let mut had_error = false;
    for path in &clrxdisasm.input_files {
        let bytes = read_input(path)?;
        let input = parse_container(&bytes, clrxdisasm.raw);
        match disassemble(&input, architecture, flags, None) {
            Ok(text) => print!("{text}"),
            Err(error) => {
                eprintln!("{}: {error}", path.display());
                had_error = true;
            }
        }
    }

    if had_error {
        process::exit(1);
    }

    Ok(())
}
