//! Generic 32/64-bit ELF reader: a byte-slice view plus optional lazily-built
//! section/symbol name maps.

use std::collections::HashMap;

use clrx_gpu::bytes::{read_u16le, read_u32le, read_u64le};

use crate::error::Error;
use crate::header::{
    Bits, FileHeader, FileType, ProgramHeader, RelaEntry, SectionHeader, Symbol, ELF_MAGIC,
};

/// Which optional maps [`parse`] should build.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParseFlags {
    pub section_name_map: bool,
    pub symbol_name_map: bool,
}

/// Parsed ELF file: header, section/program tables with resolved names, and the
/// raw bytes so callers can slice out section content on demand.
pub struct ElfFile<'a> {
    pub header: FileHeader,
    pub sections: Vec<SectionHeader>,
    pub programs: Vec<ProgramHeader>,
    pub data: &'a [u8],
    pub section_name_map: Option<HashMap<String, usize>>,
    pub symbol_name_map: Option<HashMap<String, usize>>,
}

impl<'a> ElfFile<'a> {
    /// Bytes of the given section's content.
    pub fn section_data(&self, index: usize) -> Result<&'a [u8], Error> {
        let section = self
            .sections
            .get(index)
            .ok_or_else(|| Error::UnresolvedRef(format!("section #{index}")))?;
        let start = section.offset as usize;
        let end = start + section.size as usize;
        self.data
            .get(start..end)
            .ok_or_else(|| Error::Malformed(format!("section #{index} out of bounds")))
    }

    /// Section index by name, requires `ParseFlags::section_name_map`.
    pub fn section_by_name(&self, name: &str) -> Option<usize> {
        self.section_name_map.as_ref().and_then(|map| map.get(name).copied())
    }

    /// Parse the symbol table at `section_index` (must be `SHT_SYMTAB`).
    pub fn symbols(&self, section_index: usize) -> Result<Vec<Symbol>, Error> {
        let section = self
            .sections
            .get(section_index)
            .ok_or_else(|| Error::UnresolvedRef(format!("section #{section_index}")))?;
        let strtab_index = section.link as usize;
        let data = self.section_data(section_index)?;
        let entsize = self.header.bits.symbol_size();
        let mut symbols = Vec::with_capacity(data.len() / entsize.max(1));
        for chunk in data.chunks_exact(entsize) {
            let symbol = match self.header.bits {
                Bits::Elf32 => Symbol {
                    name_offset: read_u32le(chunk, 0),
                    name: None,
                    info: chunk[12],
                    other: chunk[13],
                    shndx: read_u16le(chunk, 14),
                    value: read_u32le(chunk, 4) as u64,
                    size: read_u32le(chunk, 8) as u64,
                },
                Bits::Elf64 => Symbol {
                    name_offset: read_u32le(chunk, 0),
                    name: None,
                    info: chunk[4],
                    other: chunk[5],
                    shndx: read_u16le(chunk, 6),
                    value: read_u64le(chunk, 8),
                    size: read_u64le(chunk, 16),
                },
            };
            symbols.push(symbol);
        }
        if let Ok(strtab) = self.section_data(strtab_index) {
            for symbol in &mut symbols {
                symbol.name = string_at(strtab, symbol.name_offset as usize);
            }
        }
        Ok(symbols)
    }

    /// Parse a `SHT_RELA` section's entries.
    pub fn relocations(&self, section_index: usize) -> Result<Vec<RelaEntry>, Error> {
        let data = self.section_data(section_index)?;
        let entsize = match self.header.bits {
            Bits::Elf32 => 12,
            Bits::Elf64 => 24,
        };
        let mut out = Vec::with_capacity(data.len() / entsize.max(1));
        for chunk in data.chunks_exact(entsize) {
            out.push(match self.header.bits {
                Bits::Elf32 => {
                    let info = read_u32le(chunk, 4);
                    RelaEntry {
                        offset: read_u32le(chunk, 0) as u64,
                        sym: info >> 8,
                        rel_type: info & 0xff,
                        addend: read_u32le(chunk, 8) as i32 as i64,
                    }
                }
                Bits::Elf64 => {
                    let info = read_u64le(chunk, 8);
                    RelaEntry {
                        offset: read_u64le(chunk, 0),
                        sym: (info >> 32) as u32,
                        rel_type: (info & 0xffff_ffff) as u32,
                        addend: read_u64le(chunk, 16) as i64,
                    }
                }
            });
        }
        Ok(out)
    }
}

fn string_at(strtab: &[u8], offset: usize) -> Option<String> {
    let bytes = strtab.get(offset..)?;
    let end = bytes.iter().position(|&byte| byte == 0)?;
    Some(String::from_utf8_lossy(&bytes[..end]).into_owned())
}

/// Parse an ELF file (32- or 64-bit, detected from the class byte).
pub fn parse<'a>(data: &'a [u8], flags: ParseFlags) -> Result<ElfFile<'a>, Error> {
    if data.len() < 20 || data[0..4] != ELF_MAGIC {
        return Err(Error::Malformed("missing ELF magic".into()));
    }
    let bits = match data[4] {
        1 => Bits::Elf32,
        2 => Bits::Elf64,
        other => return Err(Error::Malformed(format!("unknown EI_CLASS {other}"))),
    };
    if data.len() < bits.header_size() {
        return Err(Error::Malformed("truncated ELF header".into()));
    }

    let os_abi = data[7];
    let abi_version = data[8];

    let header = match bits {
        Bits::Elf32 => FileHeader {
            bits,
            os_abi,
            abi_version,
            file_type: FileType::from_raw(read_u16le(data, 16)),
            machine: read_u16le(data, 18),
            version: read_u32le(data, 20),
            entry: read_u32le(data, 24) as u64,
            phoff: read_u32le(data, 28) as u64,
            shoff: read_u32le(data, 32) as u64,
            flags: read_u32le(data, 36),
            phentsize: read_u16le(data, 42),
            phnum: read_u16le(data, 44),
            shentsize: read_u16le(data, 46),
            shnum: read_u16le(data, 48),
            shstrndx: read_u16le(data, 50),
        },
        Bits::Elf64 => FileHeader {
            bits,
            os_abi,
            abi_version,
            file_type: FileType::from_raw(read_u16le(data, 16)),
            machine: read_u16le(data, 18),
            version: read_u32le(data, 20),
            entry: read_u64le(data, 24),
            phoff: read_u64le(data, 32),
            shoff: read_u64le(data, 40),
            flags: read_u32le(data, 48),
            phentsize: read_u16le(data, 54),
            phnum: read_u16le(data, 56),
            shentsize: read_u16le(data, 58),
            shnum: read_u16le(data, 60),
            shstrndx: read_u16le(data, 62),
        },
    };

    let mut programs = Vec::with_capacity(header.phnum as usize);
    if header.phentsize > 0 {
        let start = header.phoff as usize;
        let table = data
            .get(start..start + header.phentsize as usize * header.phnum as usize)
            .ok_or_else(|| Error::Malformed("program header table out of bounds".into()))?;
        for chunk in table.chunks_exact(header.phentsize as usize) {
            programs.push(parse_program_header(bits, chunk));
        }
    }

    let mut sections = Vec::with_capacity(header.shnum as usize);
    if header.shentsize > 0 {
        let start = header.shoff as usize;
        let table = data
            .get(start..start + header.shentsize as usize * header.shnum as usize)
            .ok_or_else(|| Error::Malformed("section header table out of bounds".into()))?;
        for chunk in table.chunks_exact(header.shentsize as usize) {
            sections.push(parse_section_header(bits, chunk));
        }
    }

    // Resolve section names via the `shstrndx` string table.
    if let Some(shstrtab) = sections.get(header.shstrndx as usize) {
        let start = shstrtab.offset as usize;
        let end = start + shstrtab.size as usize;
        if let Some(strtab) = data.get(start..end) {
            for section in &mut sections {
                section.name = string_at(strtab, section.name_offset as usize);
            }
        }
    }

    let section_name_map = flags.section_name_map.then(|| {
        let mut map = HashMap::new();
        for (index, section) in sections.iter().enumerate() {
            if let Some(name) = &section.name {
                map.insert(name.clone(), index);
            }
        }
        map
    });

    let mut file = ElfFile {
        header,
        sections,
        programs,
        data,
        section_name_map,
        symbol_name_map: None,
    };

    if flags.symbol_name_map {
        let mut map = HashMap::new();
        let symtab_indices: Vec<usize> = file
            .sections
            .iter()
            .enumerate()
            .filter(|(_, section)| section.sh_type == crate::header::section_type::SYMTAB)
            .map(|(index, _)| index)
            .collect();
        for index in symtab_indices {
            for (symbol_index, symbol) in file.symbols(index)?.into_iter().enumerate() {
                if let Some(name) = symbol.name {
                    if map.insert(name.clone(), symbol_index).is_some() {
                        return Err(Error::Duplicate(name));
                    }
                }
            }
        }
        file.symbol_name_map = Some(map);
    }

    Ok(file)
}

fn parse_section_header(bits: Bits, chunk: &[u8]) -> SectionHeader {
    match bits {
        Bits::Elf32 => SectionHeader {
            name_offset: read_u32le(chunk, 0),
            name: None,
            sh_type: read_u32le(chunk, 4),
            flags: read_u32le(chunk, 8) as u64,
            addr: read_u32le(chunk, 12) as u64,
            offset: read_u32le(chunk, 16) as u64,
            size: read_u32le(chunk, 20) as u64,
            link: read_u32le(chunk, 24),
            info: read_u32le(chunk, 28),
            addralign: read_u32le(chunk, 32) as u64,
            entsize: read_u32le(chunk, 36) as u64,
        },
        Bits::Elf64 => SectionHeader {
            name_offset: read_u32le(chunk, 0),
            name: None,
            sh_type: read_u32le(chunk, 4),
            flags: read_u64le(chunk, 8),
            addr: read_u64le(chunk, 16),
            offset: read_u64le(chunk, 24),
            size: read_u64le(chunk, 32),
            link: read_u32le(chunk, 40),
            info: read_u32le(chunk, 44),
            addralign: read_u64le(chunk, 48),
            entsize: read_u64le(chunk, 56),
        },
    }
}

fn parse_program_header(bits: Bits, chunk: &[u8]) -> ProgramHeader {
    match bits {
        Bits::Elf32 => ProgramHeader {
            p_type: read_u32le(chunk, 0),
            offset: read_u32le(chunk, 4) as u64,
            vaddr: read_u32le(chunk, 8) as u64,
            paddr: read_u32le(chunk, 12) as u64,
            filesz: read_u32le(chunk, 16) as u64,
            memsz: read_u32le(chunk, 20) as u64,
            flags: read_u32le(chunk, 24),
            align: read_u32le(chunk, 28) as u64,
        },
        Bits::Elf64 => ProgramHeader {
            p_type: read_u32le(chunk, 0),
            flags: read_u32le(chunk, 4),
            offset: read_u64le(chunk, 8),
            vaddr: read_u64le(chunk, 16),
            paddr: read_u64le(chunk, 24),
            filesz: read_u64le(chunk, 32),
            memsz: read_u64le(chunk, 40),
            align: read_u64le(chunk, 48),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::{ElfBuilder, SectionDescriptor};
    use crate::header::{section_flags, section_type};

    #[test]
    fn round_trips_a_minimal_elf64_object() {
        let mut builder = ElfBuilder::new(Bits::Elf64, 0, FileType::Relocatable, 0x3e);
        builder.add_section(SectionDescriptor {
            name: ".text".into(),
            sh_type: section_type::PROGBITS,
            flags: section_flags::ALLOC | section_flags::EXECINSTR,
            align: 4,
            content: vec![0x90; 16],
        });
        let bytes = builder.build().expect("build");

        let file = parse(&bytes, ParseFlags { section_name_map: true, symbol_name_map: false })
            .expect("parse");
        assert_eq!(file.header.bits, Bits::Elf64);
        let text = file.section_by_name(".text").expect("section present");
        assert_eq!(file.section_data(text).unwrap(), &[0x90; 16][..]);
    }
}
