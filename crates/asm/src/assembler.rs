//! The top-level driver (spec.md §3, §5, §7): owns the symbol/section/kernel
//! tables, the source-position arena, the input-filter stack, and the active
//! format handler; turns one logical line at a time into either emitted
//! bytes, a pseudo-op mutation, or a non-fatal diagnostic.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use clrx_gpu::{numstr, Architecture};
use clrx_isa::{encode, ParsedLine};

use crate::error::Error;
use crate::expr::{self, evaluate, EvalValue};
use crate::filters::macro_filter::{MacroDef, MacroFilter, MacroParam};
use crate::filters::repeat::{ForFilter, IrpFilter, IrpcFilter, RepetitionFilter};
use crate::filters::stream::StreamFilter;
use crate::filters::FilterStack;
use crate::handlers::{split_args, Context, FormatHandler};
use crate::kernel::KernelTable;
use crate::line::{parse_statement, Statement};
use crate::operand::parse_operands;
use crate::section::{SectionId, SectionTable};
use crate::sourcepos::{SourceArena, SourceEntry, SourcePos};
use crate::symbol::{SymbolFlags, SymbolLocation, SymbolTable};

/// A single recorded problem (spec.md §7: "errors do not short-circuit the
/// pass" — every directive/statement handler either produces bytes or
/// records one of these and continues).
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub position: SourcePos,
    pub message: String,
    pub is_error: bool,
}

/// The assembler: single-threaded and non-reentrant (spec.md §5), owning
/// every piece of mutable state a format handler is allowed to touch.
pub struct Assembler {
    pub symbols: SymbolTable,
    pub sections: SectionTable,
    pub kernels: KernelTable,
    pub source_arena: SourceArena,
    pub diagnostics: Vec<Diagnostic>,
    pub filters: FilterStack,
    /// The kernel `.kernel` most recently switched into, used to scope
    /// `.data`/`.text`/`.bss` section lookups the same way the active
    /// format handler scopes them.
    current_kernel: Option<u32>,
    macros: HashMap<String, MacroDef>,
    next_macro_invocation: u64,
    handler: Box<dyn FormatHandler>,
}

impl Assembler {
    pub fn new(handler: Box<dyn FormatHandler>) -> Self {
        Self {
            symbols: SymbolTable::new(),
            sections: SectionTable::new(),
            kernels: KernelTable::new(),
            source_arena: SourceArena::new(),
            diagnostics: Vec::new(),
            filters: FilterStack::new(),
            current_kernel: None,
            macros: HashMap::new(),
            next_macro_invocation: 0,
            handler,
        }
    }

    pub fn error_count(&self) -> usize {
        self.diagnostics.iter().filter(|d| d.is_error).count()
    }

    pub fn record_error(&mut self, position: SourcePos, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic { position, message: message.into(), is_error: true });
    }

    pub fn record_warning(&mut self, position: SourcePos, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic { position, message: message.into(), is_error: false });
    }

    /// Append bytes to the current section, recording `position` as their
    /// source origin (spec.md §5 ordering guarantee: bytes land in the exact
    /// order of their producing statements).
    pub fn emit_bytes(&mut self, bytes: &[u8], position: SourcePos) -> Result<(), Error> {
        let Some(section_id) = self.sections.current() else {
            return Err(Error::DirectiveState("no current section to emit into".into()));
        };
        self.sections.get_mut(section_id).append(bytes, Some(position));
        Ok(())
    }

    /// A label statement: pin `name` to the current section offset *before*
    /// any of the labeled line's own content is emitted (spec.md §5 ordering
    /// guarantee), then let the active format handler snapshot register
    /// accounting for any open kcode span.
    pub fn define_label(&mut self, name: &str, _position: SourcePos) -> Result<(), Error> {
        let Some(section_id) = self.sections.current() else {
            return Err(Error::DirectiveState("label outside any section".into()));
        };
        let offset = self.sections.get(section_id).offset();
        self.symbols.define(name, SymbolLocation::Section { id: section_id, offset });
        let Assembler { symbols, sections, kernels, handler, .. } = self;
        let mut ctx = Context { symbols, sections, kernels };
        handler.handle_label(&mut ctx, name);
        Ok(())
    }

    /// Try the handler's pseudo-op dispatch; returns `Ok(false)` when the
    /// directive isn't recognized so the caller can report E004.
    pub fn dispatch_pseudo_op(&mut self, name: &str, args: &str) -> Result<bool, Error> {
        let Assembler { symbols, sections, kernels, handler, .. } = self;
        let mut ctx = Context { symbols, sections, kernels };
        handler.parse_pseudo_op(&mut ctx, name, args)
    }

    pub fn add_kernel(&mut self, name: &str) -> Result<u32, Error> {
        let Assembler { symbols, sections, kernels, handler, .. } = self;
        let mut ctx = Context { symbols, sections, kernels };
        handler.add_kernel(&mut ctx, name)
    }

    pub fn add_section(&mut self, name: &str, kernel_id: Option<u32>) -> Result<SectionId, Error> {
        let Assembler { symbols, sections, kernels, handler, .. } = self;
        let mut ctx = Context { symbols, sections, kernels };
        handler.add_section(&mut ctx, name, kernel_id)
    }

    pub fn get_section_id(&mut self, name: &str, kernel_id: Option<u32>) -> Option<SectionId> {
        let Assembler { symbols, sections, kernels, handler, .. } = self;
        let ctx = Context { symbols, sections, kernels };
        handler.get_section_id(&ctx, name, kernel_id)
    }

    pub fn set_current_kernel(&mut self, kernel_id: Option<u32>) {
        self.current_kernel = kernel_id;
        self.handler.set_current_kernel(kernel_id);
    }

    pub fn set_current_section(&mut self, section_id: SectionId) {
        let Assembler { symbols, sections, kernels, handler, .. } = self;
        let mut ctx = Context { symbols, sections, kernels };
        handler.set_current_section(&mut ctx, section_id);
    }

    /// Evaluate `expr` against the symbol table, deferring to the active
    /// handler first for symbols from an unresolvable pseudo-section.
    pub fn evaluate(&mut self, expr: &crate::expr::Expr) -> Result<Option<EvalValue>, Error> {
        let Assembler { symbols, sections, kernels, handler, .. } = self;
        let ctx = Context { symbols, sections, kernels };
        let mut resolve = |name: &str| -> Option<EvalValue> {
            if let Some(value) = handler.resolve_symbol(&ctx, name) {
                return Some(value);
            }
            match ctx.symbols.get(name).map(|symbol| symbol.location) {
                Some(SymbolLocation::Absolute(value)) => Some(EvalValue::Absolute(value)),
                Some(SymbolLocation::Section { id, offset }) => Some(EvalValue::Section { id: id.0, offset: offset as i64 }),
                None => None,
            }
        };
        evaluate(expr, &mut resolve)
    }

    /// `.set name, expr`: define an absolute or section-relative symbol from
    /// an already-evaluated value.
    pub fn define_symbol(&mut self, name: &str, value: EvalValue) {
        let location = match value {
            EvalValue::Absolute(value) => SymbolLocation::Absolute(value),
            EvalValue::Section { id, offset } => SymbolLocation::Section { id: crate::section::SectionId(id), offset: offset as u64 },
        };
        self.symbols.define(name, location);
    }

    /// End of assembly (spec.md §7): if any diagnostic was an error, the
    /// binary is never serialized.
    pub fn finish(&mut self) -> Result<Vec<u8>, Error> {
        if self.error_count() > 0 {
            return Err(Error::DirectiveState(format!("assembly failed with {} error(s)", self.error_count())));
        }
        {
            let Assembler { symbols, sections, kernels, handler, .. } = self;
            let ctx = Context { symbols, sections, kernels };
            handler.prepare_binary(&ctx)?;
        }
        self.handler.write_binary()
    }

    /// Assemble `source` end to end: push it onto the filter stack, then pull
    /// one logical line at a time until every filter (including any macro or
    /// repetition body pushed along the way) is exhausted (spec.md §3/§4.2/
    /// §4.3). Diagnostics are recorded rather than returned; `finish` is the
    /// caller's signal for whether assembly actually succeeded.
    ///
    /// Position tracking is simplified relative to the full arena chain
    /// [`crate::sourcepos`] supports: every line is attributed to `file_name`
    /// directly, using the line number the filter that produced it reports
    /// (a macro/repeat body's own call-site line, by construction). A fuller
    /// driver would also push a `SourceEntry::Macro` per invocation so
    /// `code-pos` output could render the whole inclusion chain.
    pub fn assemble(&mut self, architecture: Architecture, source: &str, file_name: &str) {
        let file = self.source_arena.push(SourceEntry::File { name: file_name.to_owned() });
        self.filters.push(Box::new(StreamFilter::new(source)));

        while let Some(line) = self.filters.read_line() {
            let position = SourcePos { source: file, line: line.line_no, column: 1 };
            let statement = parse_statement(&line.text);
            self.process_statement(architecture, position, statement);
        }
    }

    fn process_statement(&mut self, architecture: Architecture, position: SourcePos, statement: Statement) {
        if let Some(label) = &statement.label {
            if let Err(error) = self.define_label(label, position) {
                self.record_error(position, error.to_string());
            }
        }

        let Some(op) = statement.op else { return };

        match op.as_str() {
            ".macro" => return self.begin_macro_definition(&statement.args, position),
            ".endm" => return self.record_error(position, "`.endm` without a matching `.macro`"),
            ".rept" | ".irp" | ".irpc" | ".for" => return self.begin_repeat_block(&op, &statement.args, position),
            ".endr" => return self.record_error(position, "`.endr` without a matching opening directive"),
            ".kernel" => return self.handle_kernel_directive(&statement.args, position),
            ".set" | ".equ" => return self.handle_set_directive(&statement.args, position),
            ".global" | ".globl" => return self.handle_global_directive(&statement.args),
            ".text" | ".data" | ".bss" | ".rodata" => return self.handle_section_switch(&op, position),
            ".byte" | ".half" | ".word" | ".long" | ".quad" => return self.handle_data_directive(&op, &statement.args, position),
            ".ascii" | ".asciz" | ".string" => return self.handle_string_directive(&op, &statement.args, position),
            ".align" => return self.handle_align_directive(&statement.args, position),
            ".skip" | ".space" => return self.handle_skip_directive(&statement.args, position),
            _ => {}
        }

        if let Some(def) = self.macros.get(&op).cloned() {
            return self.invoke_macro(&def, &statement.args, position);
        }

        if op.starts_with('.') {
            match self.dispatch_pseudo_op(&op, &statement.args) {
                Ok(true) => {}
                Ok(false) => self.record_error(position, format!("unknown directive `{op}`")),
                Err(error) => self.record_error(position, error.to_string()),
            }
            return;
        }

        self.assemble_instruction(architecture, &op, &statement.args, position);
    }

    fn assemble_instruction(&mut self, architecture: Architecture, mnemonic: &str, args: &str, position: SourcePos) {
        let operands = match parse_operands(mnemonic, args) {
            Ok(operands) => operands,
            Err(error) => return self.record_error(position, error.to_string()),
        };
        let parsed = ParsedLine { mnemonic: mnemonic.to_owned(), operands };
        match encode(architecture, &parsed) {
            Ok((bytes, _fields)) => {
                if let Err(error) = self.emit_bytes(&bytes, position) {
                    self.record_error(position, error.to_string());
                }
            }
            Err(error) => self.record_error(position, error.to_string()),
        }
    }

    /// `.macro name arg1, arg2=default ... .endm`: buffer the raw body and
    /// register the definition; the body is only tokenized when replayed at
    /// a call site (spec.md §4.3 item 2).
    fn begin_macro_definition(&mut self, args: &str, position: SourcePos) {
        let split_at = args.find(|c: char| c.is_whitespace() || c == ',');
        let (name, rest) = match split_at {
            Some(index) => (args[..index].trim(), args[index + 1..].trim_start()),
            None => (args.trim(), ""),
        };
        if name.is_empty() {
            self.record_error(position, "`.macro` requires a name");
            self.collect_block_body(&[".macro"], ".endm");
            return;
        }

        let params = if rest.is_empty() {
            Vec::new()
        } else {
            rest.split(',')
                .map(|part| {
                    let part = part.trim();
                    match part.split_once('=') {
                        Some((name, default)) => {
                            MacroParam { name: name.trim().to_owned(), default: Some(default.trim().to_owned()) }
                        }
                        None => MacroParam { name: part.to_owned(), default: None },
                    }
                })
                .collect()
        };

        let body = self.collect_block_body(&[".macro"], ".endm");
        self.macros.insert(name.to_owned(), MacroDef { name: name.to_owned(), params, body });
    }

    /// `.rept`/`.irp`/`.irpc`/`.for`: buffer the body up to the matching
    /// `.endr`, then push the matching replay filter (spec.md §4.3 item 3).
    fn begin_repeat_block(&mut self, op: &str, args: &str, position: SourcePos) {
        const BEGIN: &[&str] = &[".rept", ".irp", ".irpc", ".for"];
        let base_line = position.line;

        match op {
            ".rept" => {
                let count = match expr::parse(args.trim()).and_then(|parsed| self.evaluate_to_absolute(&parsed)) {
                    Ok(value) => value.max(0) as u64,
                    Err(error) => {
                        self.record_error(position, error.to_string());
                        self.collect_block_body(BEGIN, ".endr");
                        return;
                    }
                };
                let body = self.collect_block_body(BEGIN, ".endr");
                self.filters.push(Box::new(RepetitionFilter::new(body, count, base_line)));
            }
            ".irp" => {
                let mut parts = args.splitn(2, ',');
                let var_name = parts.next().unwrap_or("").trim().to_owned();
                let values: Vec<String> =
                    parts.next().unwrap_or("").split(',').map(|value| value.trim().to_owned()).filter(|v| !v.is_empty()).collect();
                let body = self.collect_block_body(BEGIN, ".endr");
                self.filters.push(Box::new(IrpFilter::new(var_name, values, body, base_line)));
            }
            ".irpc" => {
                let mut parts = args.splitn(2, ',');
                let var_name = parts.next().unwrap_or("").trim().to_owned();
                let chars = parts.next().unwrap_or("").trim().to_owned();
                let body = self.collect_block_body(BEGIN, ".endr");
                self.filters.push(Box::new(IrpcFilter::new(var_name, &chars, body, base_line)));
            }
            ".for" => match self.parse_for_header(args) {
                Ok((var_name, init, condition, step)) => {
                    let body = self.collect_block_body(BEGIN, ".endr");
                    let symbols = Rc::new(RefCell::new(SymbolTable::new()));
                    self.filters.push(Box::new(ForFilter::new(var_name, init, condition, step, body, symbols, base_line)));
                }
                Err(error) => {
                    self.record_error(position, error.to_string());
                    self.collect_block_body(BEGIN, ".endr");
                }
            },
            _ => unreachable!(),
        }
    }

    /// `.for var = init, cond, step`. The loop variable lives in its own
    /// private symbol table (not merged into [`Self::symbols`]): spec.md
    /// doesn't say whether `.for` variables should leak into the global
    /// namespace, and nothing else in this format family references one by
    /// name once the loop body has been substituted.
    fn parse_for_header(&mut self, args: &str) -> Result<(String, i64, expr::Expr, expr::Expr), Error> {
        let (var_name, rest) = args
            .split_once('=')
            .ok_or_else(|| Error::DirectiveState("`.for` requires `var = init, cond, step`".into()))?;
        let var_name = var_name.trim().to_owned();
        let mut parts = rest.splitn(3, ',');
        let init_text = parts.next().unwrap_or("").trim();
        let cond_text = parts.next().ok_or_else(|| Error::DirectiveState("`.for` is missing its condition".into()))?.trim();
        let step_text = parts.next().ok_or_else(|| Error::DirectiveState("`.for` is missing its step".into()))?.trim();

        let init_expr = expr::parse(init_text)?;
        let init = self.evaluate_to_absolute(&init_expr)?;
        Ok((var_name, init, expr::parse(cond_text)?, expr::parse(step_text)?))
    }

    fn evaluate_to_absolute(&mut self, parsed: &expr::Expr) -> Result<i64, Error> {
        match self.evaluate(parsed)? {
            Some(EvalValue::Absolute(value)) => Ok(value),
            Some(EvalValue::Section { .. }) => Err(Error::Expression("expected an absolute value, not a section-relative one".into())),
            None => Err(Error::UndefinedSymbol("<expression>".into())),
        }
    }

    /// Buffer raw logical-line text until a matching `end_op`, tracking
    /// nesting against `begin_ops` so an inner block of the same family is
    /// skipped over rather than mistaken for the close of the outer one.
    fn collect_block_body(&mut self, begin_ops: &[&str], end_op: &str) -> Vec<String> {
        let mut depth = 1u32;
        let mut body = Vec::new();
        while let Some(line) = self.filters.read_line() {
            let statement = parse_statement(&line.text);
            if let Some(op) = &statement.op {
                if begin_ops.contains(&op.as_str()) {
                    depth += 1;
                } else if op == end_op {
                    depth -= 1;
                    if depth == 0 {
                        break;
                    }
                }
            }
            body.push(line.text);
        }
        body
    }

    fn invoke_macro(&mut self, def: &MacroDef, args_text: &str, position: SourcePos) {
        let args = split_args(args_text);
        match def.bind(&args) {
            Ok(substitutions) => {
                let invocation_id = self.next_macro_invocation;
                self.next_macro_invocation += 1;
                self.filters.push(Box::new(MacroFilter::new(def, substitutions, invocation_id, position.line)));
            }
            Err(error) => self.record_error(position, error.to_string()),
        }
    }

    fn handle_kernel_directive(&mut self, args: &str, position: SourcePos) {
        let name = args.trim();
        if name.is_empty() {
            self.record_error(position, "`.kernel` requires a name");
            return;
        }
        match self.add_kernel(name) {
            Ok(id) => {
                self.set_current_kernel(Some(id));
                if let Some(section_id) = self.kernels.get(id).code_section {
                    self.set_current_section(section_id);
                }
            }
            Err(error) => self.record_error(position, error.to_string()),
        }
    }

    fn handle_set_directive(&mut self, args: &str, position: SourcePos) {
        let Some((name, expr_text)) = args.split_once(',') else {
            self.record_error(position, "`.set`/`.equ` requires a name and a value");
            return;
        };
        let name = name.trim().to_owned();
        match expr::parse(expr_text.trim()) {
            Ok(parsed) => match self.evaluate(&parsed) {
                Ok(Some(value)) => self.define_symbol(&name, value),
                Ok(None) => self.record_error(position, format!("`.set {name}` refers to an undefined symbol")),
                Err(error) => self.record_error(position, error.to_string()),
            },
            Err(error) => self.record_error(position, error.to_string()),
        }
    }

    fn handle_global_directive(&mut self, args: &str) {
        for name in split_args(args) {
            self.symbols.reference(&name);
            self.symbols.set_flag(&name, SymbolFlags::Global);
        }
    }

    fn handle_section_switch(&mut self, op: &str, position: SourcePos) {
        match op {
            ".text" => match self.current_kernel {
                Some(id) => match self.kernels.get(id).code_section {
                    Some(section_id) => self.set_current_section(section_id),
                    None => self.record_error(position, "the current kernel has no code section"),
                },
                None => self.record_error(position, "`.text` requires an active `.kernel`"),
            },
            ".data" | ".bss" | ".rodata" => match self.get_section_id(op, None) {
                Some(section_id) => self.set_current_section(section_id),
                None => self.record_error(position, format!("no `{op}` section is defined for this format")),
            },
            _ => unreachable!(),
        }
    }

    fn handle_data_directive(&mut self, op: &str, args: &str, position: SourcePos) {
        let width = match op {
            ".byte" => 1usize,
            ".half" => 2,
            ".word" | ".long" => 4,
            ".quad" => 8,
            _ => unreachable!(),
        };

        for part in args.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let parsed = match expr::parse(part) {
                Ok(parsed) => parsed,
                Err(error) => {
                    self.record_error(position, error.to_string());
                    continue;
                }
            };
            let value = match self.evaluate(&parsed) {
                Ok(Some(EvalValue::Absolute(value))) => value,
                Ok(Some(EvalValue::Section { .. })) => {
                    self.record_error(position, format!("`{op}` requires an absolute value"));
                    continue;
                }
                Ok(None) => {
                    self.record_error(position, format!("`{op}` refers to an undefined symbol"));
                    continue;
                }
                Err(error) => {
                    self.record_error(position, error.to_string());
                    continue;
                }
            };
            let bytes = value.to_le_bytes();
            if let Err(error) = self.emit_bytes(&bytes[..width], position) {
                self.record_error(position, error.to_string());
            }
        }
    }

    fn handle_string_directive(&mut self, op: &str, args: &str, position: SourcePos) {
        let args = args.trim();
        let Some(inner) = args.strip_prefix('"').and_then(|rest| rest.strip_suffix('"')) else {
            self.record_error(position, format!("`{op}` requires a quoted string"));
            return;
        };

        let mut bytes = Vec::new();
        let chars: Vec<char> = inner.chars().collect();
        let mut i = 0usize;
        while i < chars.len() {
            if chars[i] == '\\' {
                let rest: String = chars[i + 1..].iter().collect();
                match numstr::decode_escape(&rest) {
                    Ok((byte, consumed)) => {
                        bytes.push(byte);
                        i += 1 + consumed;
                    }
                    Err(error) => {
                        self.record_error(position, format!("bad escape in `{op}`: {error}"));
                        return;
                    }
                }
            } else {
                let mut buf = [0u8; 4];
                bytes.extend_from_slice(chars[i].encode_utf8(&mut buf).as_bytes());
                i += 1;
            }
        }
        if op != ".ascii" {
            bytes.push(0);
        }
        if let Err(error) = self.emit_bytes(&bytes, position) {
            self.record_error(position, error.to_string());
        }
    }

    fn handle_align_directive(&mut self, args: &str, position: SourcePos) {
        let parsed = match expr::parse(args.trim()) {
            Ok(parsed) => parsed,
            Err(error) => return self.record_error(position, error.to_string()),
        };
        let align = match self.evaluate_to_absolute(&parsed) {
            Ok(value) if value > 0 => value as u64,
            Ok(_) => return self.record_error(position, "`.align` requires a positive value"),
            Err(error) => return self.record_error(position, error.to_string()),
        };
        let Some(section_id) = self.sections.current() else {
            return self.record_error(position, "`.align` outside any section");
        };

        let section = self.sections.get_mut(section_id);
        section.align = section.align.max(align as u32);
        let offset = section.offset();
        let remainder = offset % align;
        if remainder != 0 {
            let padding = vec![0u8; (align - remainder) as usize];
            if let Err(error) = self.emit_bytes(&padding, position) {
                self.record_error(position, error.to_string());
            }
        }
    }

    fn handle_skip_directive(&mut self, args: &str, position: SourcePos) {
        let mut parts = args.splitn(2, ',');
        let count_text = parts.next().unwrap_or("").trim();
        let fill_text = parts.next().map(str::trim).filter(|text| !text.is_empty());

        let count_expr = match expr::parse(count_text) {
            Ok(parsed) => parsed,
            Err(error) => return self.record_error(position, error.to_string()),
        };
        let count = match self.evaluate_to_absolute(&count_expr) {
            Ok(value) if value >= 0 => value as usize,
            Ok(_) => return self.record_error(position, "`.skip`/`.space` requires a non-negative count"),
            Err(error) => return self.record_error(position, error.to_string()),
        };

        let fill = match fill_text {
            Some(text) => match expr::parse(text).and_then(|parsed| self.evaluate_to_absolute(&parsed)) {
                Ok(value) => value as u8,
                Err(error) => return self.record_error(position, error.to_string()),
            },
            None => 0,
        };

        if let Err(error) = self.emit_bytes(&vec![fill; count], position) {
            self.record_error(position, error.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::amd::AmdHandler;
    use crate::sourcepos::{SourceArena, SourceEntry};

    fn new_assembler() -> Assembler {
        let mut handler_ctx_symbols = SymbolTable::new();
        let mut handler_ctx_sections = SectionTable::new();
        let mut handler_ctx_kernels = KernelTable::new();
        let handler = {
            let mut ctx = Context {
                symbols: &mut handler_ctx_symbols,
                sections: &mut handler_ctx_sections,
                kernels: &mut handler_ctx_kernels,
            };
            Box::new(AmdHandler::new(&mut ctx, clrx_elf::Bits::Elf64))
        };
        let mut assembler = Assembler::new(handler);
        assembler.symbols = handler_ctx_symbols;
        assembler.sections = handler_ctx_sections;
        assembler.kernels = handler_ctx_kernels;
        assembler
    }

    fn pos(assembler: &mut Assembler) -> SourcePos {
        let source = assembler.source_arena.push(SourceEntry::File { name: "t.s".into() });
        SourcePos { source, line: 1, column: 1 }
    }

    #[test]
    fn finish_refuses_to_serialize_after_an_error() {
        let mut assembler = new_assembler();
        let position = pos(&mut assembler);
        assembler.record_error(position, "bad instruction");
        assert!(assembler.finish().is_err());
    }

    #[test]
    fn label_is_pinned_to_the_current_section_offset_before_further_bytes() {
        let mut assembler = new_assembler();
        assembler.add_kernel("foo").unwrap();
        let section_id = assembler.kernels.get(0).code_section.unwrap();
        assembler.sections.set_current(section_id);

        let position = pos(&mut assembler);
        assembler.emit_bytes(&[1, 2, 3, 4], position).unwrap();
        assembler.define_label("after_four", position).unwrap();
        assembler.emit_bytes(&[5, 6], position).unwrap();

        let symbol = assembler.symbols.get("after_four").unwrap();
        assert_eq!(symbol.location, SymbolLocation::Section { id: section_id, offset: 4 });
    }

    #[test]
    fn assemble_encodes_instructions_into_the_kernel_code_section() {
        let mut assembler = new_assembler();
        assembler.assemble(
            Architecture::Gcn1_0,
            ".kernel foo\ns_add_u32 s0, s1, s2\ns_endpgm\n",
            "t.s",
        );
        assert_eq!(assembler.error_count(), 0);

        let section_id = assembler.kernels.get(0).code_section.unwrap();
        let (mut expected, _) =
            encode(Architecture::Gcn1_0, &ParsedLine { mnemonic: "s_add_u32".into(), operands: vec![
                clrx_isa::Operand::Sgpr(0),
                clrx_isa::Operand::Sgpr(1),
                clrx_isa::Operand::Sgpr(2),
            ] })
            .unwrap();
        let (endpgm, _) = encode(Architecture::Gcn1_0, &ParsedLine { mnemonic: "s_endpgm".into(), operands: vec![] }).unwrap();
        expected.extend_from_slice(&endpgm);

        assert_eq!(assembler.sections.get(section_id).data, expected);
    }

    #[test]
    fn assemble_resolves_a_label_and_a_set_symbol_to_the_same_offset() {
        let mut assembler = new_assembler();
        assembler.assemble(
            Architecture::Gcn1_0,
            ".kernel foo\nstart:\ns_endpgm\n.set alias, start\n",
            "t.s",
        );
        assert_eq!(assembler.error_count(), 0);
        assert_eq!(assembler.symbols.get("start").unwrap().location, assembler.symbols.get("alias").unwrap().location);
    }

    #[test]
    fn assemble_replays_a_rept_body_the_requested_number_of_times() {
        let mut assembler = new_assembler();
        assembler.assemble(Architecture::Gcn1_0, ".kernel foo\n.rept 3\ns_nop 0\n.endr\ns_endpgm\n", "t.s");
        assert_eq!(assembler.error_count(), 0);

        let section_id = assembler.kernels.get(0).code_section.unwrap();
        let (nop, _) = encode(Architecture::Gcn1_0, &ParsedLine { mnemonic: "s_nop".into(), operands: vec![clrx_isa::Operand::Imm(0)] }).unwrap();
        let (endpgm, _) = encode(Architecture::Gcn1_0, &ParsedLine { mnemonic: "s_endpgm".into(), operands: vec![] }).unwrap();
        let mut expected = nop.repeat(3);
        expected.extend_from_slice(&endpgm);

        assert_eq!(assembler.sections.get(section_id).data, expected);
    }

    #[test]
    fn assemble_expands_a_macro_invocation() {
        let mut assembler = new_assembler();
        assembler.assemble(
            Architecture::Gcn1_0,
            ".kernel foo\n.macro move3 a, b, c\ns_add_u32 \\a, \\b, \\c\n.endm\nmove3 s0, s1, s2\n",
            "t.s",
        );
        assert_eq!(assembler.error_count(), 0);

        let section_id = assembler.kernels.get(0).code_section.unwrap();
        let (expected, _) = encode(
            Architecture::Gcn1_0,
            &ParsedLine {
                mnemonic: "s_add_u32".into(),
                operands: vec![clrx_isa::Operand::Sgpr(0), clrx_isa::Operand::Sgpr(1), clrx_isa::Operand::Sgpr(2)],
            },
        )
        .unwrap();
        assert_eq!(assembler.sections.get(section_id).data, expected);
    }

    #[test]
    fn assemble_records_an_error_for_an_unknown_mnemonic() {
        let mut assembler = new_assembler();
        assembler.assemble(Architecture::Gcn1_0, ".kernel foo\nnot_a_real_mnemonic s0\n", "t.s");
        assert!(assembler.error_count() > 0);
    }
}
