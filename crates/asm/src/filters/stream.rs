//! The stream filter (spec.md §4.3, item 1): joins backslash-continued
//! physical lines into logical lines, strips `//`/`#` line comments and
//! `/* */` block comments outside of string/char literals, and records a
//! column-translation table so diagnostics can point back at the original
//! text.

use std::collections::VecDeque;

use super::{LineFilter, LogicalLine};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Code,
    SingleQuote,
    DoubleQuote,
    BlockComment,
}

/// Reads an entire source buffer and produces logical lines eagerly; the
/// whole file is available up front the same way the teacher's own line
/// reader works off a fully-buffered input.
pub struct StreamFilter {
    queue: VecDeque<LogicalLine>,
}

impl StreamFilter {
    pub fn new(source: &str) -> Self {
        Self { queue: build_logical_lines(source) }
    }
}

impl LineFilter for StreamFilter {
    fn next_line(&mut self) -> Option<LogicalLine> {
        self.queue.pop_front()
    }
}

fn build_logical_lines(source: &str) -> VecDeque<LogicalLine> {
    let mut out = VecDeque::new();
    let mut mode = Mode::Code;

    let mut text = String::new();
    let mut translate = Vec::new();
    let mut first_line_no = 1u32;
    let mut have_content = false;

    for (physical_index, physical_line) in source.lines().enumerate() {
        let line_no = physical_index as u32 + 1;
        if !have_content {
            first_line_no = line_no;
        }

        let chars: Vec<char> = physical_line.chars().collect();
        let mut i = 0usize;
        let mut continuation = false;

        while i < chars.len() {
            let c = chars[i];
            match mode {
                Mode::BlockComment => {
                    if c == '*' && chars.get(i + 1) == Some(&'/') {
                        mode = Mode::Code;
                        i += 2;
                        continue;
                    }
                    i += 1;
                }
                Mode::SingleQuote | Mode::DoubleQuote => {
                    let quote = if mode == Mode::SingleQuote { '\'' } else { '"' };
                    text.push(c);
                    translate.push(i as u32 + 1);
                    have_content = true;
                    if c == '\\' && i + 1 < chars.len() {
                        text.push(chars[i + 1]);
                        translate.push(i as u32 + 2);
                        i += 2;
                        continue;
                    }
                    if c == quote {
                        mode = Mode::Code;
                    }
                    i += 1;
                }
                Mode::Code => {
                    if c == '/' && chars.get(i + 1) == Some(&'*') {
                        mode = Mode::BlockComment;
                        i += 2;
                        continue;
                    }
                    if c == '/' && chars.get(i + 1) == Some(&'/') {
                        break;
                    }
                    if c == '#' {
                        break;
                    }
                    if c == '\'' {
                        mode = Mode::SingleQuote;
                        text.push(c);
                        translate.push(i as u32 + 1);
                        have_content = true;
                        i += 1;
                        continue;
                    }
                    if c == '"' {
                        mode = Mode::DoubleQuote;
                        text.push(c);
                        translate.push(i as u32 + 1);
                        have_content = true;
                        i += 1;
                        continue;
                    }
                    if c == '\\' && i + 1 == chars.len() {
                        continuation = true;
                        i += 1;
                        continue;
                    }
                    text.push(c);
                    translate.push(i as u32 + 1);
                    have_content = true;
                    i += 1;
                }
            }
        }

        if mode == Mode::BlockComment || continuation {
            continue;
        }

        out.push_back(LogicalLine::with_translation(
            std::mem::take(&mut text),
            first_line_no,
            std::mem::take(&mut translate),
        ));
        have_content = false;
    }

    if have_content || !text.is_empty() {
        out.push_back(LogicalLine::with_translation(text, first_line_no, translate));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines_of(source: &str) -> Vec<String> {
        let mut filter = StreamFilter::new(source);
        let mut out = Vec::new();
        while let Some(line) = filter.next_line() {
            out.push(line.text);
        }
        out
    }

    #[test]
    fn strips_line_comments() {
        assert_eq!(lines_of("mov v0, 1 // comment\nadd v1, 2"), vec!["mov v0, 1 ", "add v1, 2"]);
    }

    #[test]
    fn strips_hash_comments() {
        assert_eq!(lines_of("s_nop 0 # comment"), vec!["s_nop 0 "]);
    }

    #[test]
    fn strips_block_comments_spanning_lines() {
        assert_eq!(lines_of("a /* dropped\nentirely */ b"), vec!["a  b"]);
    }

    #[test]
    fn joins_backslash_continued_lines() {
        assert_eq!(lines_of("mov v0, \\\n1"), vec!["mov v0, 1"]);
    }

    #[test]
    fn preserves_comment_markers_inside_strings() {
        assert_eq!(lines_of(r#".ascii "a // b""#), vec![r#".ascii "a // b""#]);
    }

    #[test]
    fn translation_maps_back_to_original_column() {
        let mut filter = StreamFilter::new("  mov v0 // x");
        let line = filter.next_line().unwrap();
        assert_eq!(line.translate_pos(1), 1);
        assert_eq!(line.translate_pos(3), 3);
    }
}
