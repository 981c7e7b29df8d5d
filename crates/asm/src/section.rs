//! Section model: numbered, growable byte buffers with per-section alignment,
//! relocations, and a source-position index (spec.md §3/§4.5).

use enumflags2::{bitflags, BitFlags};

use clrx_formats::Relocation;

use crate::sourcepos::{SourcePos, SourcePosIndex};

/// A section's numeric id. Stable for the assembler's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SectionId(pub u32);

/// The sentinel denoting the absolute pseudo-section (`ASMSECT_ABS`).
pub const ASMSECT_ABS: SectionId = SectionId(u32::MAX);

/// Which kernel (if any) a section belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionScope {
    Global,
    InnerGlobal,
    Kernel(u32),
}

/// What a section holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionKind {
    Code,
    Data,
    Config,
    Metadata,
    ControlDirective,
}

/// Section flags (spec.md §3 "Section").
#[bitflags]
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionFlags {
    Writable = 1,
    Addressable = 2,
    AbsAddressable = 4,
    Unresolvable = 8,
    ElfAlloc = 16,
    ElfWrite = 32,
    ElfExec = 64,
}

/// One section.
#[derive(Debug, Clone)]
pub struct Section {
    pub id: SectionId,
    pub name: String,
    pub scope: SectionScope,
    pub kind: SectionKind,
    pub flags: BitFlags<SectionFlags>,
    pub data: Vec<u8>,
    pub align: u32,
    pub relocations: Vec<Relocation>,
    pub source_positions: SourcePosIndex,
}

impl Section {
    pub fn new(id: SectionId, name: impl Into<String>, scope: SectionScope, kind: SectionKind, flags: BitFlags<SectionFlags>) -> Self {
        Self {
            id,
            name: name.into(),
            scope,
            kind,
            flags,
            data: Vec::new(),
            align: 1,
            relocations: Vec::new(),
            source_positions: SourcePosIndex::new(),
        }
    }

    /// Current write offset: the number of bytes already emitted.
    pub fn offset(&self) -> u64 {
        self.data.len() as u64
    }

    /// Append `bytes`, optionally recording `pos` as the source position of
    /// the first byte written (spec.md §5: "bytes appear in the section
    /// buffer in the exact order of their producing statements").
    pub fn append(&mut self, bytes: &[u8], pos: Option<SourcePos>) {
        if let Some(pos) = pos {
            self.source_positions.record(self.offset(), pos);
        }
        self.data.extend_from_slice(bytes);
    }
}

/// A numbered collection of sections plus the current-section stack used by
/// `.pushsection`/`.popsection` (spec.md §4.5).
#[derive(Debug, Clone, Default)]
pub struct SectionTable {
    sections: Vec<Section>,
    stack: Vec<SectionId>,
    current: Option<SectionId>,
}

impl SectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, section: Section) -> SectionId {
        let id = SectionId(self.sections.len() as u32);
        let mut section = section;
        section.id = id;
        self.sections.push(section);
        id
    }

    pub fn get(&self, id: SectionId) -> &Section {
        &self.sections[id.0 as usize]
    }

    pub fn get_mut(&mut self, id: SectionId) -> &mut Section {
        &mut self.sections[id.0 as usize]
    }

    pub fn current(&self) -> Option<SectionId> {
        self.current
    }

    pub fn set_current(&mut self, id: SectionId) {
        self.current = Some(id);
    }

    /// `.pushsection`: save the current section on the stack, then switch.
    pub fn push_current(&mut self, new_current: SectionId) {
        if let Some(current) = self.current {
            self.stack.push(current);
        }
        self.current = Some(new_current);
    }

    /// `.popsection`: restore the most recently pushed section.
    pub fn pop_current(&mut self) -> Option<SectionId> {
        let restored = self.stack.pop();
        if restored.is_some() {
            self.current = restored;
        }
        restored
    }

    pub fn by_name(&self, name: &str, scope: SectionScope) -> Option<SectionId> {
        self.sections
            .iter()
            .find(|section| section.name == name && section.scope == scope)
            .map(|section| section.id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Section> {
        self.sections.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_pop_restores_current_section() {
        let mut table = SectionTable::new();
        let text = table.add(Section::new(SectionId(0), ".text", SectionScope::Global, SectionKind::Code, BitFlags::empty()));
        let data = table.add(Section::new(SectionId(0), ".data", SectionScope::Global, SectionKind::Data, BitFlags::empty()));
        table.set_current(text);
        table.push_current(data);
        assert_eq!(table.current(), Some(data));
        table.pop_current();
        assert_eq!(table.current(), Some(text));
    }

    #[test]
    fn append_advances_offset_in_order() {
        let mut section = Section::new(SectionId(0), ".text", SectionScope::Global, SectionKind::Code, BitFlags::empty());
        section.append(&[1, 2, 3], None);
        assert_eq!(section.offset(), 3);
        section.append(&[4], None);
        assert_eq!(section.offset(), 4);
        assert_eq!(section.data, vec![1, 2, 3, 4]);
    }
}
