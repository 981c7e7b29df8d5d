//! Kernel records: per-container state plus the common fields spec.md §3
//! names (display name, register counts, allocation flags, argument names,
//! and the section ids meaningful to that container).

use std::collections::HashSet;

use clrx_formats::RegisterUsage;

use crate::section::SectionId;

/// One kernel, created by `.kernel name` and never renamed or destroyed
/// before the assembler itself.
#[derive(Debug, Clone)]
pub struct Kernel {
    pub id: u32,
    pub name: String,
    pub registers: RegisterUsage,
    pub arg_names: HashSet<String>,
    pub code_section: Option<SectionId>,
    pub data_section: Option<SectionId>,
    pub config_section: Option<SectionId>,
    pub metadata_section: Option<SectionId>,
}

impl Kernel {
    pub fn new(id: u32, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            registers: RegisterUsage::default(),
            arg_names: HashSet::new(),
            code_section: None,
            data_section: None,
            config_section: None,
            metadata_section: None,
        }
    }
}

/// The assembler's kernel list, indexed by id.
#[derive(Debug, Clone, Default)]
pub struct KernelTable {
    kernels: Vec<Kernel>,
}

impl KernelTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new kernel, failing if `name` is already taken.
    pub fn add(&mut self, name: &str) -> Result<u32, crate::error::Error> {
        if self.kernels.iter().any(|kernel| kernel.name == name) {
            return Err(crate::error::Error::Duplicate(name.to_owned()));
        }
        let id = self.kernels.len() as u32;
        self.kernels.push(Kernel::new(id, name));
        Ok(id)
    }

    pub fn get(&self, id: u32) -> &Kernel {
        &self.kernels[id as usize]
    }

    pub fn get_mut(&mut self, id: u32) -> &mut Kernel {
        &mut self.kernels[id as usize]
    }

    pub fn by_name(&self, name: &str) -> Option<u32> {
        self.kernels.iter().find(|kernel| kernel.name == name).map(|kernel| kernel.id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Kernel> {
        self.kernels.iter()
    }

    pub fn len(&self) -> usize {
        self.kernels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kernels.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_kernel_name_is_an_error() {
        let mut table = KernelTable::new();
        table.add("foo").unwrap();
        assert!(matches!(table.add("foo"), Err(crate::error::Error::Duplicate(_))));
    }
}
