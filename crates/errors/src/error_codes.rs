macro_rules! register_diagnostics {
    ( $( $error_code:ident => $text:expr ),* $(,)* ) => {
        /// An array of `(error_code, diagnostic)`.
        pub static DIAGNOSTICS: &[(&str, &str)] = &[
            $( (stringify!($error_code), $text) ),*
        ];

        #[cfg(doc)]
        /// This type exists only for documentation purposes. It doesn't exist in the code
        /// otherwise.
        ///
        /// It gives every error code used across the `clrx-*` crates an idiomatic Rust
        /// documentation anchor so that `weld --explain E0..`-style lookups have somewhere
        /// to point to.
        pub enum Diagnostics {
            $(
                #[doc = $text]
                $error_code
            ),*
        }
    };
}

register_diagnostics!(
    E000 => "The given error code is invalid.",
    E001 => "The command-line could not be parsed.",
    E002 => "Lexical or syntactic error while reading assembly source.",
    E003 => "An expression referred to a symbol that stays undefined at the final pass.",
    E004 => "A pseudo-op was not recognized, or used in the wrong assembler state.",
    E005 => "A register-accounting rule was violated (SGPR/VGPR cap exceeded, reserved overlap).",
    E006 => "A binary container field overflowed or a required field was missing.",
    E007 => "An I/O operation (read, write, seek) failed.",
    E008 => "A binary container could not be parsed: its layout is malformed.",
    E009 => "A code region could not be disassembled: the bytes don't decode to any known instruction.",
);
