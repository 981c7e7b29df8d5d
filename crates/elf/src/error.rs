use clrx_errors::error;

error! {
    /// Errors raised while parsing or synthesizing an ELF container.
    pub enum Error {
        #[code = E008]
        #[message = "The ELF header or a referenced table is truncated or malformed."]
        #[formatted_message("malformed ELF: {0}")]
        #[help = "Check that the file wasn't truncated during a previous write."]
        Malformed(String),

        #[code = E008]
        #[message = "A relocation, section link, or symbol referenced a section/table that doesn't exist."]
        #[formatted_message("unresolved reference: {0}")]
        #[help = "This usually means a section index or symbol index is out of bounds."]
        UnresolvedRef(String),

        #[code = E008]
        #[message = "Two sections or symbols were registered under the same name in a map that requires uniqueness."]
        #[formatted_message("duplicate name: {0}")]
        #[help = "Rename one of the conflicting sections/symbols."]
        Duplicate(String),

        #[transparent]
        Io(#[from] std::io::Error),
    }
}
