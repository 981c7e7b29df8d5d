use clrx_errors::error;

error! {
    /// Errors raised while assembling a source file. Most of these are
    /// recorded as diagnostics against a [`crate::sourcepos::SourcePos`]
    /// rather than propagated (spec.md §7: "errors do not short-circuit the
    /// pass"); this type is what gets collected into [`crate::diagnostics::Diagnostic`].
    pub enum Error {
        #[code = E001]
        #[message = "A token could not be lexed."]
        #[formatted_message("lex error: {0}")]
        #[help = "Check for unterminated strings or stray characters."]
        Lex(String),

        #[code = E002]
        #[message = "An expression was malformed."]
        #[formatted_message("expression error: {0}")]
        #[help = "Check operator and operand placement; see the operator precedence table."]
        Expression(String),

        #[code = E003]
        #[message = "A symbol was undefined at the final assembly pass."]
        #[formatted_message("undefined symbol `{0}`")]
        #[help = "Define the symbol with a label or `.set` before the final pass."]
        UndefinedSymbol(String),

        #[code = E003]
        #[message = "A `.set` chain referred back to itself."]
        #[formatted_message("cyclic `.set` involving `{0}`")]
        #[help = "Break the cycle by defining one side as a literal value."]
        CyclicSet(String),

        #[code = E004]
        #[message = "A directive isn't recognized for the active format."]
        #[formatted_message("unknown directive `{0}` for this format")]
        #[help = "Check the directive name and that it applies to the selected container format."]
        UnknownDirective(String),

        #[code = E004]
        #[message = "A directive was used outside the state it requires."]
        #[formatted_message("`{0}` is not valid here")]
        #[help = "Some directives (like `.arg`) are only valid inside a matching block (like `.args`)."]
        DirectiveState(String),

        #[code = E004]
        #[message = "A kernel or section name was declared twice in the same scope."]
        #[formatted_message("duplicate name `{0}`")]
        #[help = "Kernel and section names must be unique within their scope."]
        Duplicate(String),

        #[code = E005]
        #[message = "A register count pseudo-op exceeded the architecture's cap."]
        #[formatted_message("`{0}` register count {1} exceeds the cap of {2}")]
        #[help = "Lower the count, or check whether VCC/FLAT/XNACK reservations were accounted for."]
        RegisterCapExceeded(String, u32, u32),

        #[transparent]
        Isa(#[from] clrx_isa::IsaError),

        #[transparent]
        Format(#[from] clrx_formats::Error),
    }
}
