//! The macro filter (spec.md §4.3, item 2): replays a stored macro body,
//! substituting `\argname` for the matching call-site argument and `\@` for
//! a per-invocation unique counter.

use std::collections::HashMap;

use crate::sourcepos::MacroSubstitutions;

use super::{LineFilter, LogicalLine};

/// A macro definition captured by `.macro name arg1, arg2=default ... .endm`.
#[derive(Debug, Clone)]
pub struct MacroDef {
    pub name: String,
    pub params: Vec<MacroParam>,
    pub body: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct MacroParam {
    pub name: String,
    pub default: Option<String>,
}

impl MacroDef {
    /// Bind a call site's positional/named arguments to this macro's
    /// parameters, falling back to declared defaults.
    pub fn bind(&self, args: &[String]) -> Result<MacroSubstitutions, crate::error::Error> {
        if args.len() > self.params.len() {
            return Err(crate::error::Error::DirectiveState(format!(
                "macro '{}' takes at most {} argument(s), got {}",
                self.name,
                self.params.len(),
                args.len()
            )));
        }
        let mut values = HashMap::new();
        for (index, param) in self.params.iter().enumerate() {
            let value = args
                .get(index)
                .cloned()
                .or_else(|| param.default.clone())
                .ok_or_else(|| {
                    crate::error::Error::DirectiveState(format!(
                        "macro '{}' missing required argument '{}'",
                        self.name, param.name
                    ))
                })?;
            values.insert(param.name.clone(), value);
        }
        Ok(MacroSubstitutions { values })
    }
}

/// Replays a bound macro body, one substituted line per call.
pub struct MacroFilter {
    lines: std::vec::IntoIter<String>,
    substitutions: MacroSubstitutions,
    invocation_id: u64,
    base_line_no: u32,
}

impl MacroFilter {
    pub fn new(def: &MacroDef, substitutions: MacroSubstitutions, invocation_id: u64, base_line_no: u32) -> Self {
        Self { lines: def.body.clone().into_iter(), substitutions, invocation_id, base_line_no }
    }
}

impl LineFilter for MacroFilter {
    fn next_line(&mut self) -> Option<LogicalLine> {
        let raw = self.lines.next()?;
        Some(LogicalLine::new(expand(&raw, &self.substitutions, self.invocation_id), self.base_line_no))
    }
}

fn expand(line: &str, substitutions: &MacroSubstitutions, invocation_id: u64) -> String {
    let mut out = String::with_capacity(line.len());
    let chars: Vec<char> = line.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == '\\' && i + 1 < chars.len() {
            match chars[i + 1] {
                '@' => {
                    out.push_str(&invocation_id.to_string());
                    i += 2;
                    continue;
                }
                '\\' => {
                    out.push('\\');
                    i += 2;
                    continue;
                }
                c if c.is_alphabetic() || c == '_' => {
                    let start = i + 1;
                    let mut end = start;
                    while end < chars.len() && (chars[end].is_alphanumeric() || chars[end] == '_') {
                        end += 1;
                    }
                    let name: String = chars[start..end].iter().collect();
                    if let Some(value) = substitutions.values.get(&name) {
                        out.push_str(value);
                        i = end;
                        continue;
                    }
                    out.push('\\');
                    i += 1;
                    continue;
                }
                _ => {
                    out.push('\\');
                    i += 1;
                    continue;
                }
            }
        }
        out.push(chars[i]);
        i += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn def(params: &[(&str, Option<&str>)], body: &[&str]) -> MacroDef {
        MacroDef {
            name: "m".into(),
            params: params
                .iter()
                .map(|(name, default)| MacroParam { name: name.to_string(), default: default.map(str::to_string) })
                .collect(),
            body: body.iter().map(|line| line.to_string()).collect(),
        }
    }

    #[test]
    fn substitutes_named_arguments() {
        let d = def(&[("dst", None), ("src", None)], &["mov \\dst, \\src"]);
        let subs = d.bind(&["v0".into(), "v1".into()]).unwrap();
        let mut filter = MacroFilter::new(&d, subs, 1, 10);
        assert_eq!(filter.next_line().unwrap().text, "mov v0, v1");
        assert!(filter.next_line().is_none());
    }

    #[test]
    fn missing_argument_uses_default() {
        let d = def(&[("dst", None), ("imm", Some("0"))], &["mov \\dst, \\imm"]);
        let subs = d.bind(&["v0".into()]).unwrap();
        let mut filter = MacroFilter::new(&d, subs, 1, 10);
        assert_eq!(filter.next_line().unwrap().text, "mov v0, 0");
    }

    #[test]
    fn missing_required_argument_is_an_error() {
        let d = def(&[("dst", None)], &["mov \\dst"]);
        assert!(d.bind(&[]).is_err());
    }

    #[test]
    fn unique_invocation_counter_substitutes_at_sign() {
        let d = def(&[], &["label_\\@:"]);
        let subs = d.bind(&[]).unwrap();
        let mut filter = MacroFilter::new(&d, subs, 7, 10);
        assert_eq!(filter.next_line().unwrap().text, "label_7:");
    }
}
