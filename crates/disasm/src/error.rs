use clrx_errors::error;

error! {
    /// Errors raised while disassembling a parsed container model.
    pub enum Error {
        #[code = E009]
        #[message = "A byte sequence did not decode to any known instruction."]
        #[formatted_message("undecodable bytes at offset {0:#x}: {1}")]
        #[help = "The code region may target a different GCN generation, or be misaligned."]
        Undecodable(u64, String),

        #[transparent]
        Isa(#[from] clrx_isa::IsaError),

        #[transparent]
        Format(#[from] clrx_formats::Error),
    }
}
