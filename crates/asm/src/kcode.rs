//! The kcode-span stack: `.kcode k1, k2` / `.kcodeend` (spec.md §4.6), used by
//! the AMDCL2/Gallium/ROCm format handlers to mirror labels in a shared code
//! section into every selected kernel's register accounting.

use clrx_formats::RegisterUsage;

use crate::kernel::KernelTable;

/// The stack of active kcode selections. `.kcode` pushes a frame naming the
/// kernels a shared code section's labels should update; `.kcodeend` pops it.
#[derive(Debug, Clone, Default)]
pub struct KcodeStack {
    frames: Vec<Vec<u32>>,
}

impl KcodeStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, kernel_ids: Vec<u32>) {
        self.frames.push(kernel_ids);
    }

    pub fn pop(&mut self) -> Option<Vec<u32>> {
        self.frames.pop()
    }

    pub fn current(&self) -> Option<&[u32]> {
        self.frames.last().map(Vec::as_slice)
    }

    /// On a label inside the active span, update every selected kernel's
    /// register counts to the component-wise max of its stored counts and
    /// `running`, the counts observed in the shared code section so far
    /// (spec.md §8 invariant 5).
    pub fn on_label(&self, kernels: &mut KernelTable, running: RegisterUsage) {
        let Some(selected) = self.current() else { return };
        for &kernel_id in selected {
            let kernel = kernels.get_mut(kernel_id);
            kernel.registers = kernel.registers.max(running);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_labels_take_the_component_wise_max() {
        let mut kernels = KernelTable::new();
        let a = kernels.add("a").unwrap();
        let b = kernels.add("b").unwrap();
        kernels.get_mut(a).registers = RegisterUsage { sgprs: 4, vgprs: 2, ..Default::default() };
        kernels.get_mut(b).registers = RegisterUsage { sgprs: 1, vgprs: 8, ..Default::default() };

        let mut stack = KcodeStack::new();
        stack.push(vec![a, b]);

        stack.on_label(&mut kernels, RegisterUsage { sgprs: 6, vgprs: 3, uses_vcc: true, ..Default::default() });
        assert_eq!(kernels.get(a).registers.sgprs, 6);
        assert_eq!(kernels.get(a).registers.vgprs, 3);
        assert!(kernels.get(a).registers.uses_vcc);
        assert_eq!(kernels.get(b).registers.sgprs, 6);
        assert_eq!(kernels.get(b).registers.vgprs, 8);

        stack.on_label(&mut kernels, RegisterUsage { sgprs: 2, vgprs: 20, ..Default::default() });
        assert_eq!(kernels.get(a).registers.vgprs, 20);
        assert_eq!(kernels.get(b).registers.sgprs, 6);

        stack.pop();
        assert!(stack.current().is_none());
    }
}
