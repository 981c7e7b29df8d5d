use clrx_errors::error;

error! {
    /// Errors raised while parsing or emitting a container binary.
    pub enum Error {
        #[code = E006]
        #[message = "A binary-format field overflowed its encoded width."]
        #[formatted_message("field overflow: {0}")]
        #[help = "The value being packed doesn't fit in the container's field width."]
        FieldOverflow(String),

        #[code = E006]
        #[message = "A required binary-format field was never set."]
        #[formatted_message("missing required field: {0}")]
        #[help = "Set it with the corresponding pseudo-op before assembling."]
        MissingField(String),

        #[code = E008]
        #[message = "The container's layout is malformed or internally inconsistent."]
        #[formatted_message("malformed container: {0}")]
        #[help = "The input may be truncated, or not actually this container format."]
        Malformed(String),

        #[code = E006]
        #[message = "A CAL note's declared size didn't match its actual payload."]
        #[formatted_message("CAL note size mismatch: {0}")]
        #[help = "This usually indicates a corrupted or hand-edited binary."]
        CalNoteSizeMismatch(String),

        #[transparent]
        Elf(#[from] clrx_elf::Error),
    }
}
