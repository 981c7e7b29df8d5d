//! Statement parsing: splits one already-preprocessed logical line (spec.md
//! §4.2, "one statement per logical line") into an optional label, an
//! optional pseudo-op-or-mnemonic name, and the remaining argument text.

/// One parsed statement. `op` is `None` for a label-only line (`foo:`) or a
/// blank line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Statement {
    pub label: Option<String>,
    pub op: Option<String>,
    pub args: String,
}

/// Parse `text`. A label is an identifier immediately followed by `:` with
/// no whitespace in between; everything after it is re-scanned for the
/// op name and argument text.
pub fn parse_statement(text: &str) -> Statement {
    let mut rest = text.trim();
    let mut label = None;

    if let Some(colon) = label_colon(rest) {
        let name = rest[..colon].trim();
        if !name.is_empty() {
            label = Some(name.to_owned());
        }
        rest = rest[colon + 1..].trim_start();
    }

    if rest.is_empty() {
        return Statement { label, op: None, args: String::new() };
    }

    let (op, args) = match rest.find(char::is_whitespace) {
        Some(index) => (&rest[..index], rest[index..].trim_start()),
        None => (rest, ""),
    };

    Statement { label, op: Some(op.to_owned()), args: args.to_owned() }
}

/// The index of a label-terminating `:`, if `text` starts with one (a run of
/// non-whitespace characters ending in `:` before the first whitespace gap).
fn label_colon(text: &str) -> Option<usize> {
    for (index, c) in text.char_indices() {
        if c == ':' {
            return Some(index);
        }
        if c.is_whitespace() {
            return None;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_label_op_and_args() {
        let statement = parse_statement("loop: s_add_u32 s0, s1, s2");
        assert_eq!(statement.label.as_deref(), Some("loop"));
        assert_eq!(statement.op.as_deref(), Some("s_add_u32"));
        assert_eq!(statement.args, "s0, s1, s2");
    }

    #[test]
    fn label_only_line_has_no_op() {
        let statement = parse_statement("done:");
        assert_eq!(statement.label.as_deref(), Some("done"));
        assert_eq!(statement.op, None);
    }

    #[test]
    fn directive_without_label() {
        let statement = parse_statement(".set foo, 1");
        assert_eq!(statement.label, None);
        assert_eq!(statement.op.as_deref(), Some(".set"));
        assert_eq!(statement.args, "foo, 1");
    }

    #[test]
    fn blank_line_has_no_op() {
        let statement = parse_statement("   ");
        assert_eq!(statement.op, None);
    }
}
