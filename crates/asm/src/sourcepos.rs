//! Source-position tracking: an arena of source/macro-substitution records
//! (spec.md §9's "replace intrusive reference counting and parent
//! back-pointers... with arenas keyed by 32-bit ids") plus the chunked
//! per-section offset→position index spec.md §3/§4.3 describes.

use std::collections::HashMap;

/// Id of a record in [`SourceArena`]. Either a root file or a macro expansion,
/// chained to its parent by id instead of a pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceId(u32);

/// One entry in the source arena: either the root input file, or a macro
/// expansion nested inside some parent entry.
#[derive(Debug, Clone)]
pub enum SourceEntry {
    File { name: String },
    Macro { name: String, parent: SourceId, invoked_line: u32, invoked_column: u32 },
}

/// Owns every [`SourceEntry`] ever created during assembly; entries are never
/// freed individually; the whole arena drops with the assembler.
#[derive(Debug, Clone, Default)]
pub struct SourceArena {
    entries: Vec<SourceEntry>,
}

impl SourceArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: SourceEntry) -> SourceId {
        self.entries.push(entry);
        SourceId((self.entries.len() - 1) as u32)
    }

    pub fn get(&self, id: SourceId) -> &SourceEntry {
        &self.entries[id.0 as usize]
    }

    /// Render the full inclusion chain for `id`, root first, as
    /// `file:line:col` / `file:line:col -> macro NAME` segments.
    pub fn render_chain(&self, id: SourceId, line: u32, column: u32) -> String {
        match self.get(id) {
            SourceEntry::File { name } => format!("{name}:{line}:{column}"),
            SourceEntry::Macro { name, parent, invoked_line, invoked_column } => {
                let parent_chain = self.render_chain(*parent, *invoked_line, *invoked_column);
                format!("{parent_chain} -> macro {name}:{line}:{column}")
            }
        }
    }
}

/// A fully-resolved position: which arena entry, plus line/column within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourcePos {
    pub source: SourceId,
    pub line: u32,
    pub column: u32,
}

/// One chunk of the per-section offset→position map: a base byte offset plus
/// a run of positions recorded as 16-bit deltas from the chunk's first entry,
/// as spec.md §3 describes ("chunks carry a base offset and 16-bit deltas").
#[derive(Debug, Clone)]
struct Chunk {
    base_offset: u64,
    first: SourcePos,
    deltas: Vec<(u16, i16, i16)>,
}

/// Per-section, monotonically-increasing byte-offset → source-position index.
#[derive(Debug, Clone, Default)]
pub struct SourcePosIndex {
    chunks: Vec<Chunk>,
    last_offset: u64,
}

impl SourcePosIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that byte offset `offset` (must be >= every previously recorded
    /// offset) corresponds to `pos`.
    pub fn record(&mut self, offset: u64, pos: SourcePos) {
        debug_assert!(offset >= self.last_offset, "source-position index must stay offset-monotonic");
        self.last_offset = offset;
        match self.chunks.last_mut() {
            Some(chunk)
                if pos.source == chunk.first.source
                    && (offset - chunk.base_offset) <= u16::MAX as u64
                    && (pos.line as i64 - chunk.first.line as i64).abs() <= i16::MAX as i64
                    && (pos.column as i64 - chunk.first.column as i64).abs() <= i16::MAX as i64 =>
            {
                chunk.deltas.push((
                    (offset - chunk.base_offset) as u16,
                    (pos.line as i64 - chunk.first.line as i64) as i16,
                    (pos.column as i64 - chunk.first.column as i64) as i16,
                ));
            }
            _ => self.chunks.push(Chunk { base_offset: offset, first: pos, deltas: Vec::new() }),
        }
    }

    /// The position recorded at-or-before `offset`, if any.
    pub fn position_at(&self, offset: u64) -> Option<SourcePos> {
        let chunk = self
            .chunks
            .iter()
            .rev()
            .find(|chunk| chunk.base_offset <= offset)?;
        let mut best = chunk.first;
        let mut best_offset = chunk.base_offset;
        for (delta_offset, delta_line, delta_column) in &chunk.deltas {
            let absolute = chunk.base_offset + *delta_offset as u64;
            if absolute > offset {
                break;
            }
            best_offset = absolute;
            best = SourcePos {
                source: chunk.first.source,
                line: (chunk.first.line as i32 + *delta_line as i32) as u32,
                column: (chunk.first.column as i32 + *delta_column as i32) as u32,
            };
        }
        let _ = best_offset;
        Some(best)
    }
}

/// A named macro invocation's argument substitutions, looked up by `\name`
/// (spec.md §3 "Macro"): a thin companion to [`SourceEntry::Macro`].
#[derive(Debug, Clone, Default)]
pub struct MacroSubstitutions {
    pub values: HashMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_is_offset_monotonic_and_queryable() {
        let mut arena = SourceArena::new();
        let file = arena.push(SourceEntry::File { name: "kernel.s".into() });

        let mut index = SourcePosIndex::new();
        index.record(0, SourcePos { source: file, line: 1, column: 1 });
        index.record(4, SourcePos { source: file, line: 2, column: 1 });
        index.record(8, SourcePos { source: file, line: 3, column: 5 });

        assert_eq!(index.position_at(4).unwrap().line, 2);
        assert_eq!(index.position_at(6).unwrap().line, 2);
        assert_eq!(index.position_at(8).unwrap().column, 5);
    }

    #[test]
    fn macro_chain_renders_through_parent() {
        let mut arena = SourceArena::new();
        let file = arena.push(SourceEntry::File { name: "top.s".into() });
        let macro_id = arena.push(SourceEntry::Macro {
            name: "FOO".into(),
            parent: file,
            invoked_line: 10,
            invoked_column: 1,
        });
        let rendered = arena.render_chain(macro_id, 2, 3);
        assert_eq!(rendered, "top.s:10:1 -> macro FOO:2:3");
    }
}
