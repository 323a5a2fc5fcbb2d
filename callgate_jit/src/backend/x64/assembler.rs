//! x64 assembler for trampoline emission.
//!
//! Instructions are appended to a growable byte buffer. Absolute call
//! targets are not written into the buffer; they are recorded as
//! relocations and patched in when the code is copied to its final address.

use smallvec::SmallVec;

use super::encoder::*;
use super::registers::{Gpr, MemOperand, Xmm};

/// A 64-bit absolute address that must be patched into the code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reloc {
    /// Offset of the 8-byte field inside the code.
    pub offset: usize,
    /// Absolute address to store there.
    pub target: u64,
}

/// Code buffer for emitting x64 instructions.
#[derive(Debug, Default)]
pub struct Assembler {
    code: Vec<u8>,
    relocs: SmallVec<[Reloc; 2]>,
}

impl Assembler {
    /// Create a new assembler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current code size in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.code.len()
    }

    /// Whether nothing has been emitted.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    /// Emit an encoded instruction.
    #[inline]
    pub fn emit(&mut self, inst: EncodedInst) {
        self.code.extend_from_slice(inst.as_slice());
    }

    pub fn mov_rr(&mut self, dst: Gpr, src: Gpr) {
        self.emit(encode_mov_rr(dst, src));
    }

    pub fn mov_rm(&mut self, dst: Gpr, mem: MemOperand) {
        self.emit(encode_mov_rm(dst, &mem));
    }

    pub fn mov_mr(&mut self, mem: MemOperand, src: Gpr) {
        self.emit(encode_mov_mr(&mem, src));
    }

    pub fn movss_rm(&mut self, dst: Xmm, mem: MemOperand) {
        self.emit(encode_movss_rm(dst, &mem));
    }

    pub fn movss_mr(&mut self, mem: MemOperand, src: Xmm) {
        self.emit(encode_movss_mr(&mem, src));
    }

    pub fn movsd_rm(&mut self, dst: Xmm, mem: MemOperand) {
        self.emit(encode_movsd_rm(dst, &mem));
    }

    pub fn movsd_mr(&mut self, mem: MemOperand, src: Xmm) {
        self.emit(encode_movsd_mr(&mem, src));
    }

    pub fn movsx_rb32(&mut self, dst: Gpr, src: Gpr) {
        self.emit(encode_movsx_rb32(dst, src));
    }

    pub fn movsx_rw32(&mut self, dst: Gpr, src: Gpr) {
        self.emit(encode_movsx_rw32(dst, src));
    }

    pub fn sub_ri(&mut self, dst: Gpr, imm: i32) {
        self.emit(encode_sub_ri(dst, imm));
    }

    pub fn add_ri(&mut self, dst: Gpr, imm: i32) {
        self.emit(encode_add_ri(dst, imm));
    }

    pub fn call_r(&mut self, target: Gpr) {
        self.emit(encode_call_r(target));
    }

    pub fn ret(&mut self) {
        self.emit(encode_ret());
    }

    /// `MOV dst, imm64` whose immediate is the absolute address `target`.
    ///
    /// The immediate is left zero in the buffer and recorded as a relocation.
    pub fn mov_abs(&mut self, dst: Gpr, target: u64) {
        let offset = self.code.len() + MOV_RI64_IMM_OFFSET;
        self.emit(encode_mov_ri64(dst, 0));
        self.relocs.push(Reloc { offset, target });
    }

    /// Finish assembly.
    pub fn finish(self) -> AssembledCode {
        AssembledCode {
            code: self.code.into_boxed_slice(),
            relocs: self.relocs,
        }
    }
}

/// Position-dependent machine code plus its relocations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledCode {
    code: Box<[u8]>,
    relocs: SmallVec<[Reloc; 2]>,
}

impl AssembledCode {
    /// Code size in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.code.len()
    }

    /// Whether the code is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    /// Unrelocated bytes. Absolute targets read as zero.
    #[inline]
    pub fn bytes(&self) -> &[u8] {
        &self.code
    }

    /// Relocations in emission order.
    #[inline]
    pub fn relocs(&self) -> &[Reloc] {
        &self.relocs
    }

    /// Copy the code into `dst` (destined for `address`) and patch every
    /// relocation.
    ///
    /// # Panics
    /// Panics if `dst` is not exactly `self.len()` bytes.
    pub fn relocate_into(&self, dst: &mut [u8], address: u64) {
        assert_eq!(dst.len(), self.code.len(), "relocation target size mismatch");
        dst.copy_from_slice(&self.code);
        for reloc in &self.relocs {
            dst[reloc.offset..reloc.offset + 8].copy_from_slice(&reloc.target.to_le_bytes());
        }
        tracing::trace!(
            address = format_args!("{address:#x}"),
            relocs = self.relocs.len(),
            "relocated stub code"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mov_abs_records_reloc() {
        let mut asm = Assembler::new();
        asm.sub_ri(Gpr::Rsp, 8);
        asm.mov_abs(Gpr::Rax, 0xDEAD_BEEF_0000);
        asm.call_r(Gpr::Rax);
        let code = asm.finish();

        assert_eq!(code.relocs(), &[Reloc { offset: 6, target: 0xDEAD_BEEF_0000 }]);
        assert_eq!(&code.bytes()[4..6], &[0x48, 0xB8]);
        assert_eq!(&code.bytes()[6..14], &[0; 8]);
    }

    #[test]
    fn test_relocate_patches_targets() {
        let mut asm = Assembler::new();
        asm.mov_abs(Gpr::Rax, 0x1122_3344_5566_7788);
        asm.call_r(Gpr::Rax);
        asm.mov_abs(Gpr::Rax, 0x99);
        asm.ret();
        let code = asm.finish();

        let mut out = vec![0u8; code.len()];
        code.relocate_into(&mut out, 0x7000);
        assert_eq!(&out[2..10], &0x1122_3344_5566_7788u64.to_le_bytes());
        assert_eq!(&out[14..22], &0x99u64.to_le_bytes());
        assert_eq!(out.last(), Some(&0xC3));
    }

    #[test]
    #[should_panic(expected = "size mismatch")]
    fn test_relocate_rejects_wrong_size() {
        let mut asm = Assembler::new();
        asm.ret();
        let code = asm.finish();
        let mut out = [0u8; 4];
        code.relocate_into(&mut out, 0);
    }
}
