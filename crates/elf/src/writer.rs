//! ELF builder: accepts a list of section descriptors and resolves section
//! indices, symbol indices, relocation targets, and (optionally) program
//! headers in one pass, producing bit-exact little-endian output.

use clrx_gpu::bytes::{push_u16le, push_u32le, push_u64le, write_u32le, write_u64le};

use crate::error::Error;
use crate::header::{Bits, FileType, ELF_MAGIC};

/// A section to emit. `content` is already-finalized bytes (callers compute this
/// via the format handlers before calling into this builder).
pub struct SectionDescriptor {
    pub name: String,
    pub sh_type: u32,
    pub flags: u64,
    pub align: u64,
    pub content: Vec<u8>,
}

/// A symbol to emit into `.symtab`.
pub struct SymbolDescriptor {
    pub name: String,
    pub info: u8,
    pub other: u8,
    pub section_name: Option<String>,
    pub value: u64,
    pub size: u64,
}

/// A program header to emit, referencing a section by name for its file range.
pub struct ProgramDescriptor {
    pub p_type: u32,
    pub flags: u32,
    pub section_name: String,
    pub vaddr: u64,
    pub align: u64,
}

/// Incrementally-built ELF file.
pub struct ElfBuilder {
    bits: Bits,
    machine: u16,
    file_type: FileType,
    entry: u64,
    sections: Vec<SectionDescriptor>,
    symbols: Vec<SymbolDescriptor>,
    programs: Vec<ProgramDescriptor>,
}

impl ElfBuilder {
    pub fn new(bits: Bits, machine: u16, file_type: FileType, entry: u64) -> Self {
        Self { bits, machine, file_type, entry, sections: Vec::new(), symbols: Vec::new(), programs: Vec::new() }
    }

    pub fn add_section(&mut self, section: SectionDescriptor) -> usize {
        self.sections.push(section);
        self.sections.len() - 1
    }

    pub fn add_symbol(&mut self, symbol: SymbolDescriptor) {
        self.symbols.push(symbol);
    }

    pub fn add_program(&mut self, program: ProgramDescriptor) {
        self.programs.push(program);
    }

    /// Lay out every section, the symbol table (if any symbols were added), the
    /// section-name string table, and the section/program header tables, and
    /// serialize everything to a byte vector.
    pub fn build(self) -> Result<Vec<u8>, Error> {
        let bits = self.bits;
        let mut shstrtab = StringTable::new();
        let null_name = shstrtab.intern("");

        // Section 0 is always SHT_NULL.
        let mut layout: Vec<LaidOutSection> =
            vec![LaidOutSection { name_offset: null_name, sh_type: 0, flags: 0, offset: 0, size: 0, align: 0, link: 0, info: 0, entsize: 0 }];
        let mut name_to_index = std::collections::HashMap::new();

        let mut cursor = bits.header_size() as u64;
        let mut section_bytes: Vec<u8> = Vec::new();

        for (index, section) in self.sections.iter().enumerate() {
            let aligned = align_up(cursor, section.align.max(1));
            let padding = (aligned - cursor) as usize;
            section_bytes.resize(section_bytes.len() + padding, 0);
            let offset = aligned;
            section_bytes.extend_from_slice(&section.content);
            cursor = aligned + section.content.len() as u64;

            let name_offset = shstrtab.intern(&section.name);
            name_to_index.insert(section.name.clone(), index + 1);
            layout.push(LaidOutSection {
                name_offset,
                sh_type: section.sh_type,
                flags: section.flags,
                offset,
                size: section.content.len() as u64,
                align: section.align.max(1),
                link: 0,
                info: 0,
                entsize: 0,
            });
        }

        // Symbol table + its string table, if requested.
        if !self.symbols.is_empty() {
            let mut strtab = StringTable::new();
            strtab.intern("");
            let mut data = Vec::new();
            // Null symbol.
            push_symbol(&mut data, bits, 0, 0, 0, 0, 0);
            for symbol in &self.symbols {
                let name_offset = strtab.intern(&symbol.name);
                let shndx = match &symbol.section_name {
                    Some(name) => *name_to_index
                        .get(name)
                        .ok_or_else(|| Error::UnresolvedRef(format!("section `{name}`")))? as u16,
                    None => 0,
                };
                push_symbol(&mut data, bits, name_offset, symbol.info, symbol.other, shndx, symbol.value);
                // size is appended by push_symbol's caller contract below; patch last entry.
                let last = data.len() - bits.symbol_size();
                match bits {
                    Bits::Elf32 => write_u32le(&mut data, last + 8, symbol.size as u32),
                    Bits::Elf64 => write_u64le(&mut data, last + 16, symbol.size),
                }
            }

            let aligned = align_up(cursor, 8);
            let padding = (aligned - cursor) as usize;
            section_bytes.resize(section_bytes.len() + padding, 0);
            let strtab_offset = aligned;
            let strtab_bytes = strtab.into_bytes();
            section_bytes.extend_from_slice(&strtab_bytes);
            cursor = aligned + strtab_bytes.len() as u64;

            let strtab_name = shstrtab.intern(".strtab");
            let strtab_section_index = layout.len();
            layout.push(LaidOutSection {
                name_offset: strtab_name,
                sh_type: crate::header::section_type::STRTAB,
                flags: 0,
                offset: strtab_offset,
                size: strtab_bytes.len() as u64,
                align: 1,
                link: 0,
                info: 0,
                entsize: 0,
            });

            let aligned = align_up(cursor, 8);
            let padding = (aligned - cursor) as usize;
            section_bytes.resize(section_bytes.len() + padding, 0);
            let symtab_offset = aligned;
            section_bytes.extend_from_slice(&data);
            cursor = aligned + data.len() as u64;

            let symtab_name = shstrtab.intern(".symtab");
            layout.push(LaidOutSection {
                name_offset: symtab_name,
                sh_type: crate::header::section_type::SYMTAB,
                flags: 0,
                offset: symtab_offset,
                size: data.len() as u64,
                align: 8,
                link: strtab_section_index as u32,
                info: 1,
                entsize: bits.symbol_size() as u64,
            });
        }

        // `.shstrtab` itself.
        let aligned = align_up(cursor, 1);
        let shstrtab_offset = aligned;
        let shstrtab_bytes = shstrtab.into_bytes();
        section_bytes.extend_from_slice(&shstrtab_bytes);
        cursor = aligned + shstrtab_bytes.len() as u64;
        let shstrndx = layout.len();
        let shstrtab_name_offset = 0; // interned before the loop as the empty name.
        layout.push(LaidOutSection {
            name_offset: shstrtab_name_offset,
            sh_type: crate::header::section_type::STRTAB,
            flags: 0,
            offset: shstrtab_offset,
            size: shstrtab_bytes.len() as u64,
            align: 1,
            link: 0,
            info: 0,
            entsize: 0,
        });

        let aligned = align_up(cursor, if bits == Bits::Elf64 { 8 } else { 4 });
        let padding = (aligned - cursor) as usize;
        section_bytes.resize(section_bytes.len() + padding, 0);
        let shoff = aligned;

        let phoff = if self.programs.is_empty() { 0 } else { shoff + layout.len() as u64 * bits.section_header_size() as u64 };

        let mut output = vec![0u8; bits.header_size()];
        write_header(
            &mut output,
            bits,
            self.file_type,
            self.machine,
            self.entry,
            phoff,
            shoff,
            self.programs.len() as u16,
            layout.len() as u16,
            shstrndx as u16,
        );
        output.extend_from_slice(&section_bytes);

        for program in &self.programs {
            let section = layout
                .get(*name_to_index.get(&program.section_name).ok_or_else(|| {
                    Error::UnresolvedRef(format!("section `{}`", program.section_name))
                })?)
                .expect("index came from name_to_index, always valid");
            push_program_header(&mut output, bits, program, section.offset, section.size);
        }

        for section in &layout {
            push_section_header(&mut output, bits, section);
        }

        Ok(output)
    }
}

struct LaidOutSection {
    name_offset: u32,
    sh_type: u32,
    flags: u64,
    offset: u64,
    size: u64,
    align: u64,
    link: u32,
    info: u32,
    entsize: u64,
}

struct StringTable {
    bytes: Vec<u8>,
}

impl StringTable {
    fn new() -> Self {
        Self { bytes: Vec::new() }
    }

    fn intern(&mut self, name: &str) -> u32 {
        let offset = self.bytes.len() as u32;
        self.bytes.extend_from_slice(name.as_bytes());
        self.bytes.push(0);
        offset
    }

    fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

fn align_up(value: u64, align: u64) -> u64 {
    if align <= 1 {
        return value;
    }
    (value + align - 1) / align * align
}

fn push_symbol(data: &mut Vec<u8>, bits: Bits, name_offset: u32, info: u8, other: u8, shndx: u16, value: u64) {
    match bits {
        Bits::Elf32 => {
            push_u32le(data, name_offset);
            push_u32le(data, value as u32);
            push_u32le(data, 0); // size, patched by caller
            data.push(info);
            data.push(other);
            push_u16le(data, shndx);
        }
        Bits::Elf64 => {
            push_u32le(data, name_offset);
            data.push(info);
            data.push(other);
            push_u16le(data, shndx);
            push_u64le(data, value);
            push_u64le(data, 0); // size, patched by caller
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn write_header(
    out: &mut [u8],
    bits: Bits,
    file_type: FileType,
    machine: u16,
    entry: u64,
    phoff: u64,
    shoff: u64,
    phnum: u16,
    shnum: u16,
    shstrndx: u16,
) {
    out[0..4].copy_from_slice(&ELF_MAGIC);
    out[4] = bits.class_byte();
    out[5] = 1; // ELFDATA2LSB
    out[6] = 1; // EV_CURRENT
    match bits {
        Bits::Elf32 => {
            write_u16le_in(out, 16, file_type.to_raw());
            write_u16le_in(out, 18, machine);
            write_u32le_in(out, 20, 1);
            write_u32le_in(out, 24, entry as u32);
            write_u32le_in(out, 28, phoff as u32);
            write_u32le_in(out, 32, shoff as u32);
            write_u32le_in(out, 36, 0);
            write_u16le_in(out, 40, bits.header_size() as u16);
            write_u16le_in(out, 42, bits.program_header_size() as u16);
            write_u16le_in(out, 44, phnum);
            write_u16le_in(out, 46, bits.section_header_size() as u16);
            write_u16le_in(out, 48, shnum);
            write_u16le_in(out, 50, shstrndx);
        }
        Bits::Elf64 => {
            write_u16le_in(out, 16, file_type.to_raw());
            write_u16le_in(out, 18, machine);
            write_u32le_in(out, 20, 1);
            write_u64le_in(out, 24, entry);
            write_u64le_in(out, 32, phoff);
            write_u64le_in(out, 40, shoff);
            write_u32le_in(out, 48, 0);
            write_u16le_in(out, 52, bits.header_size() as u16);
            write_u16le_in(out, 54, bits.program_header_size() as u16);
            write_u16le_in(out, 56, phnum);
            write_u16le_in(out, 58, bits.section_header_size() as u16);
            write_u16le_in(out, 60, shnum);
            write_u16le_in(out, 62, shstrndx);
        }
    }
}

fn write_u16le_in(out: &mut [u8], offset: usize, value: u16) {
    out[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}
fn write_u32le_in(out: &mut [u8], offset: usize, value: u32) {
    out[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}
fn write_u64le_in(out: &mut [u8], offset: usize, value: u64) {
    out[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}

fn push_section_header(out: &mut Vec<u8>, bits: Bits, section: &LaidOutSection) {
    match bits {
        Bits::Elf32 => {
            push_u32le(out, section.name_offset);
            push_u32le(out, section.sh_type);
            push_u32le(out, section.flags as u32);
            push_u32le(out, 0); // addr
            push_u32le(out, section.offset as u32);
            push_u32le(out, section.size as u32);
            push_u32le(out, section.link);
            push_u32le(out, section.info);
            push_u32le(out, section.align as u32);
            push_u32le(out, section.entsize as u32);
        }
        Bits::Elf64 => {
            push_u32le(out, section.name_offset);
            push_u32le(out, section.sh_type);
            push_u64le(out, section.flags);
            push_u64le(out, 0); // addr
            push_u64le(out, section.offset);
            push_u64le(out, section.size);
            push_u32le(out, section.link);
            push_u32le(out, section.info);
            push_u64le(out, section.align);
            push_u64le(out, section.entsize);
        }
    }
}

fn push_program_header(out: &mut Vec<u8>, bits: Bits, program: &ProgramDescriptor, offset: u64, filesz: u64) {
    match bits {
        Bits::Elf32 => {
            push_u32le(out, program.p_type);
            push_u32le(out, offset as u32);
            push_u32le(out, program.vaddr as u32);
            push_u32le(out, program.vaddr as u32);
            push_u32le(out, filesz as u32);
            push_u32le(out, filesz as u32);
            push_u32le(out, program.flags);
            push_u32le(out, program.align as u32);
        }
        Bits::Elf64 => {
            push_u32le(out, program.p_type);
            push_u32le(out, program.flags);
            push_u64le(out, offset);
            push_u64le(out, program.vaddr);
            push_u64le(out, program.vaddr);
            push_u64le(out, filesz);
            push_u64le(out, filesz);
            push_u64le(out, program.align);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::section_type;

    #[test]
    fn minimal_build_has_null_section_and_shstrtab() {
        let mut builder = ElfBuilder::new(Bits::Elf64, 0, FileType::Relocatable, 0);
        builder.add_section(SectionDescriptor {
            name: ".data".into(),
            sh_type: section_type::PROGBITS,
            flags: 0,
            align: 4,
            content: vec![1, 2, 3, 4],
        });
        let bytes = builder.build().unwrap();
        assert_eq!(&bytes[0..4], &ELF_MAGIC);
        assert_eq!(bytes[4], Bits::Elf64.class_byte());
    }

    #[test]
    fn unresolved_program_section_is_an_error() {
        let mut builder = ElfBuilder::new(Bits::Elf64, 0, FileType::Relocatable, 0);
        builder.add_program(ProgramDescriptor {
            p_type: 1,
            flags: 0,
            section_name: "missing".into(),
            vaddr: 0,
            align: 4,
        });
        assert!(matches!(builder.build(), Err(Error::UnresolvedRef(_))));
    }
}
