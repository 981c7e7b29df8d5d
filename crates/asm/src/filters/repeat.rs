//! The repetition family of filters (spec.md §4.3, item 3): `.rept`, `.irp`,
//! `.irpc`, and `.for`. Each replays a stored body, substituting a single
//! loop variable per iteration.

use std::cell::RefCell;
use std::rc::Rc;

use crate::expr::{evaluate, EvalValue, Expr};
use crate::symbol::SymbolTable;

use super::{LineFilter, LogicalLine};

/// `.rept count` / `.endr`: replay `body` exactly `count` times, unchanged.
pub struct RepetitionFilter {
    body: Vec<String>,
    remaining: u64,
    cursor: usize,
    base_line_no: u32,
}

impl RepetitionFilter {
    pub fn new(body: Vec<String>, count: u64, base_line_no: u32) -> Self {
        Self { body, remaining: count, cursor: 0, base_line_no }
    }
}

impl LineFilter for RepetitionFilter {
    fn next_line(&mut self) -> Option<LogicalLine> {
        if self.remaining == 0 {
            return None;
        }
        if self.cursor >= self.body.len() {
            self.cursor = 0;
            self.remaining -= 1;
            if self.remaining == 0 {
                return None;
            }
        }
        let line = self.body[self.cursor].clone();
        self.cursor += 1;
        Some(LogicalLine::new(line, self.base_line_no))
    }
}

/// `.irp var, val1, val2, ...` / `.endr`: replay `body` once per value,
/// substituting every `\var` occurrence with that value.
pub struct IrpFilter {
    body: Vec<String>,
    values: std::vec::IntoIter<String>,
    var_name: String,
    current_value: Option<String>,
    cursor: usize,
    base_line_no: u32,
}

impl IrpFilter {
    pub fn new(var_name: impl Into<String>, values: Vec<String>, body: Vec<String>, base_line_no: u32) -> Self {
        let mut values = values.into_iter();
        let current_value = values.next();
        Self { body, values, var_name: var_name.into(), current_value, cursor: 0, base_line_no }
    }
}

impl LineFilter for IrpFilter {
    fn next_line(&mut self) -> Option<LogicalLine> {
        loop {
            let value = self.current_value.as_ref()?;
            if self.cursor >= self.body.len() {
                self.cursor = 0;
                self.current_value = self.values.next();
                continue;
            }
            let substituted = self.body[self.cursor].replace(&format!("\\{}", self.var_name), value);
            self.cursor += 1;
            return Some(LogicalLine::new(substituted, self.base_line_no));
        }
    }
}

/// `.irpc var, string` / `.endr`: replay `body` once per character of
/// `string`, substituting `\var` with that one-character string.
pub struct IrpcFilter {
    inner: IrpFilter,
}

impl IrpcFilter {
    pub fn new(var_name: impl Into<String>, chars: &str, body: Vec<String>, base_line_no: u32) -> Self {
        let values = chars.chars().map(|c| c.to_string()).collect();
        Self { inner: IrpFilter::new(var_name, values, body, base_line_no) }
    }
}

impl LineFilter for IrpcFilter {
    fn next_line(&mut self) -> Option<LogicalLine> {
        self.inner.next_line()
    }
}

/// `.for var = init, cond, step` / `.endr`: a C-style counted loop whose
/// condition and step are expressions re-evaluated against the live symbol
/// table every iteration, so the loop variable is visible to the body.
pub struct ForFilter {
    body: Vec<String>,
    var_name: String,
    condition: Expr,
    step: Expr,
    symbols: Rc<RefCell<SymbolTable>>,
    cursor: usize,
    finished: bool,
    base_line_no: u32,
}

impl ForFilter {
    pub fn new(
        var_name: impl Into<String>,
        init: i64,
        condition: Expr,
        step: Expr,
        body: Vec<String>,
        symbols: Rc<RefCell<SymbolTable>>,
        base_line_no: u32,
    ) -> Self {
        let var_name = var_name.into();
        symbols.borrow_mut().define(&var_name, crate::symbol::SymbolLocation::Absolute(init));
        Self { body, var_name, condition, step, symbols, cursor: 0, finished: false, base_line_no }
    }

    fn current_value(&self) -> i64 {
        match self.symbols.borrow().get(&self.var_name).map(|symbol| symbol.location) {
            Some(crate::symbol::SymbolLocation::Absolute(value)) => value,
            _ => 0,
        }
    }

    fn condition_holds(&self) -> bool {
        let mut resolve = |name: &str| -> Option<EvalValue> {
            match self.symbols.borrow().get(name).map(|symbol| symbol.location) {
                Some(crate::symbol::SymbolLocation::Absolute(value)) => Some(EvalValue::Absolute(value)),
                Some(crate::symbol::SymbolLocation::Section { id, offset }) => {
                    Some(EvalValue::Section { id: id.0, offset: offset as i64 })
                }
                None => None,
            }
        };
        matches!(evaluate(&self.condition, &mut resolve), Ok(Some(EvalValue::Absolute(value))) if value != 0)
    }

    fn advance(&mut self) {
        let mut resolve = |name: &str| -> Option<EvalValue> {
            match self.symbols.borrow().get(name).map(|symbol| symbol.location) {
                Some(crate::symbol::SymbolLocation::Absolute(value)) => Some(EvalValue::Absolute(value)),
                _ => None,
            }
        };
        if let Ok(Some(EvalValue::Absolute(next))) = evaluate(&self.step, &mut resolve) {
            self.symbols.borrow_mut().define(&self.var_name, crate::symbol::SymbolLocation::Absolute(next));
        }
    }
}

impl LineFilter for ForFilter {
    fn next_line(&mut self) -> Option<LogicalLine> {
        if self.finished || self.body.is_empty() {
            return None;
        }
        if !self.condition_holds() {
            self.finished = true;
            return None;
        }
        let line = self.body[self.cursor].clone();
        self.cursor += 1;
        if self.cursor >= self.body.len() {
            self.cursor = 0;
            self.advance();
            if !self.condition_holds() {
                self.finished = true;
            }
        }
        Some(LogicalLine::new(line, self.base_line_no))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::parse;

    #[test]
    fn repetition_replays_body_exactly_count_times() {
        let mut filter = RepetitionFilter::new(vec!["nop".into()], 3, 1);
        assert_eq!(filter.next_line().unwrap().text, "nop");
        assert_eq!(filter.next_line().unwrap().text, "nop");
        assert_eq!(filter.next_line().unwrap().text, "nop");
        assert!(filter.next_line().is_none());
    }

    #[test]
    fn zero_count_repetition_produces_nothing() {
        let mut filter = RepetitionFilter::new(vec!["nop".into()], 0, 1);
        assert!(filter.next_line().is_none());
    }

    #[test]
    fn irp_substitutes_each_value_in_turn() {
        let mut filter = IrpFilter::new("x", vec!["1".into(), "2".into()], vec!["mov v0, \\x".into()], 1);
        assert_eq!(filter.next_line().unwrap().text, "mov v0, 1");
        assert_eq!(filter.next_line().unwrap().text, "mov v0, 2");
        assert!(filter.next_line().is_none());
    }

    #[test]
    fn irpc_iterates_one_character_at_a_time() {
        let mut filter = IrpcFilter::new("c", "ab", vec![".byte '\\c".into()], 1);
        assert_eq!(filter.next_line().unwrap().text, ".byte 'a");
        assert_eq!(filter.next_line().unwrap().text, ".byte 'b");
        assert!(filter.next_line().is_none());
    }

    #[test]
    fn for_loop_stops_when_condition_fails_and_shares_the_symbol_table() {
        let symbols = Rc::new(RefCell::new(SymbolTable::new()));
        let condition = parse("i < 3").unwrap();
        let step = parse("i + 1").unwrap();
        let mut filter = ForFilter::new("i", 0, condition, step, vec!["nop".into()], symbols.clone(), 1);

        let mut count = 0;
        while filter.next_line().is_some() {
            count += 1;
        }
        assert_eq!(count, 3);
        assert_eq!(filter.current_value(), 3);
    }
}
