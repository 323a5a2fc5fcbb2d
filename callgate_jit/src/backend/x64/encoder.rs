//! Machine-code encoders for the handful of instructions a stub uses.
//!
//! Every encoder returns an [`EncodedInst`] holding the bytes of one
//! instruction. The layout is always a subset of
//! `[legacy prefix] [REX] [0F] opcode [ModR/M] [SIB] [disp] [imm]`.

use super::registers::{Gpr, MemOperand, Xmm};

// =============================================================================
// Prefix and operand bytes
// =============================================================================

/// The `0100WRXB` prefix byte.
///
/// `w` selects 64-bit operands; `r`, `x` and `b` supply the fourth bit of
/// the ModR/M reg field, the SIB index and the r/m or SIB base.
#[derive(Debug, Clone, Copy)]
pub struct Rex {
    pub w: bool,
    pub r: bool,
    pub x: bool,
    pub b: bool,
}

impl Rex {
    /// Prefix for an instruction whose only extended operand is in r/m.
    #[inline]
    pub const fn b(w: bool, rm: Gpr) -> Self {
        Rex {
            w,
            r: false,
            x: false,
            b: rm.high_bit(),
        }
    }

    /// Prefix for a register-to-register form.
    #[inline]
    pub const fn rr(w: bool, reg: Gpr, rm: Gpr) -> Self {
        Rex {
            w,
            r: reg.high_bit(),
            x: false,
            b: rm.high_bit(),
        }
    }

    /// Prefix for a form with a `[base + disp]` operand.
    #[inline]
    pub const fn rm(w: bool, reg_high: bool, mem: &MemOperand) -> Self {
        Rex {
            w,
            r: reg_high,
            x: false,
            b: mem.base.high_bit(),
        }
    }

    /// A prefix with every bit clear can be left out.
    #[inline]
    pub const fn is_needed(&self) -> bool {
        self.w | self.r | self.x | self.b
    }

    #[inline]
    pub const fn encode(&self) -> u8 {
        0x40 | (self.w as u8) << 3 | (self.r as u8) << 2 | (self.x as u8) << 1 | self.b as u8
    }
}

/// ModR/M addressing mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Mod {
    /// `[base]`
    Indirect = 0b00,
    /// `[base + disp8]`
    IndirectDisp8 = 0b01,
    /// `[base + disp32]`
    IndirectDisp32 = 0b10,
    /// Register operand.
    Direct = 0b11,
}

#[inline]
pub const fn modrm(mode: Mod, reg: u8, rm: u8) -> u8 {
    (mode as u8) << 6 | (reg & 0b111) << 3 | (rm & 0b111)
}

/// SIB byte for a bare base: scale 1, no index.
#[inline]
pub const fn sib_base(base: u8) -> u8 {
    0b00_100_000 | (base & 0b111)
}

// =============================================================================
// Encoded instruction
// =============================================================================

/// Architectural limit on the length of one instruction.
pub const MAX_INST_LEN: usize = 15;

/// Bytes of one encoded instruction, stored inline.
#[derive(Debug, Clone, Copy)]
pub struct EncodedInst {
    bytes: [u8; MAX_INST_LEN],
    len: u8,
}

impl EncodedInst {
    #[inline]
    pub const fn new() -> Self {
        EncodedInst {
            bytes: [0; MAX_INST_LEN],
            len: 0,
        }
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes[..usize::from(self.len)]
    }

    #[inline]
    pub const fn len(&self) -> usize {
        self.len as usize
    }

    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    fn push(&mut self, byte: u8) {
        debug_assert!(usize::from(self.len) < MAX_INST_LEN, "instruction too long");
        self.bytes[usize::from(self.len)] = byte;
        self.len += 1;
    }

    #[inline]
    fn push_rex(&mut self, rex: Rex) {
        if rex.is_needed() {
            self.push(rex.encode());
        }
    }

    #[inline]
    fn extend(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.push(b);
        }
    }
}

impl Default for EncodedInst {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Shared shapes
// =============================================================================

/// `opcode /r` with both operands in registers; `src` goes in reg.
#[inline]
fn encode_rr(opcode: u8, dst: Gpr, src: Gpr, w: bool) -> EncodedInst {
    let mut enc = EncodedInst::new();
    enc.push_rex(Rex::rr(w, src, dst));
    enc.push(opcode);
    enc.push(modrm(Mod::Direct, src.low_bits(), dst.low_bits()));
    enc
}

/// `0F opcode /r` with both operands in registers; `dst` goes in reg.
#[inline]
fn encode_rr_0f(opcode: u8, dst: Gpr, src: Gpr, w: bool) -> EncodedInst {
    let mut enc = EncodedInst::new();
    enc.push_rex(Rex::rr(w, dst, src));
    enc.extend(&[0x0F, opcode]);
    enc.push(modrm(Mod::Direct, dst.low_bits(), src.low_bits()));
    enc
}

/// 64-bit `opcode /digit` on a register with an immediate of 8 or 32 bits.
#[inline]
fn encode_group1(digit: u8, dst: Gpr, imm: i32) -> EncodedInst {
    let mut enc = EncodedInst::new();
    enc.push(Rex::b(true, dst).encode());
    match i8::try_from(imm) {
        Ok(imm8) => {
            enc.push(0x83);
            enc.push(modrm(Mod::Direct, digit, dst.low_bits()));
            enc.push(imm8 as u8);
        }
        Err(_) => {
            enc.push(0x81);
            enc.push(modrm(Mod::Direct, digit, dst.low_bits()));
            enc.extend(&imm.to_le_bytes());
        }
    }
    enc
}

/// Addressing bytes for `[base + disp]` with `reg` in the ModR/M reg field.
fn encode_mem_operand(enc: &mut EncodedInst, reg: u8, mem: &MemOperand) {
    let mode = match mem.disp {
        0 if !mem.base.needs_displacement() => Mod::Indirect,
        _ if mem.disp_fits_i8() => Mod::IndirectDisp8,
        _ => Mod::IndirectDisp32,
    };

    if mem.base.needs_sib_as_base() {
        enc.push(modrm(mode, reg, 0b100));
        enc.push(sib_base(mem.base.low_bits()));
    } else {
        enc.push(modrm(mode, reg, mem.base.low_bits()));
    }

    match mode {
        Mod::IndirectDisp8 => enc.push(mem.disp as i8 as u8),
        Mod::IndirectDisp32 => enc.extend(&mem.disp.to_le_bytes()),
        Mod::Indirect | Mod::Direct => {}
    }
}

/// Integer load or store; the direction is decided by `opcode`.
#[inline]
fn encode_rm(opcode: u8, reg: Gpr, mem: &MemOperand, w: bool) -> EncodedInst {
    let mut enc = EncodedInst::new();
    enc.push_rex(Rex::rm(w, reg.high_bit(), mem));
    enc.push(opcode);
    encode_mem_operand(&mut enc, reg.low_bits(), mem);
    enc
}

/// Scalar SSE load or store. The mandatory prefix must precede REX.
#[inline]
fn encode_sse_mem(prefix: u8, opcode: u8, reg: Xmm, mem: &MemOperand) -> EncodedInst {
    let mut enc = EncodedInst::new();
    enc.push(prefix);
    enc.push_rex(Rex::rm(false, reg.high_bit(), mem));
    enc.extend(&[0x0F, opcode]);
    encode_mem_operand(&mut enc, reg.low_bits(), mem);
    enc
}

// =============================================================================
// Moves
// =============================================================================

/// `mov dst, src`
#[inline]
pub fn encode_mov_rr(dst: Gpr, src: Gpr) -> EncodedInst {
    encode_rr(0x89, dst, src, true)
}

/// `mov dst, qword [mem]`
#[inline]
pub fn encode_mov_rm(dst: Gpr, mem: &MemOperand) -> EncodedInst {
    encode_rm(0x8B, dst, mem, true)
}

/// `mov qword [mem], src`
#[inline]
pub fn encode_mov_mr(mem: &MemOperand, src: Gpr) -> EncodedInst {
    encode_rm(0x89, src, mem, true)
}

/// Offset of the 8-byte immediate within [`encode_mov_ri64`]'s output.
pub const MOV_RI64_IMM_OFFSET: usize = 2;

/// `movabs dst, imm64`
#[inline]
pub fn encode_mov_ri64(dst: Gpr, imm: u64) -> EncodedInst {
    let mut enc = EncodedInst::new();
    enc.push(Rex::b(true, dst).encode());
    enc.push(0xB8 | dst.low_bits());
    enc.extend(&imm.to_le_bytes());
    enc
}

/// `movsx dst32, src8`
#[inline]
pub fn encode_movsx_rb32(dst: Gpr, src: Gpr) -> EncodedInst {
    encode_rr_0f(0xBE, dst, src, false)
}

/// `movsx dst32, src16`
#[inline]
pub fn encode_movsx_rw32(dst: Gpr, src: Gpr) -> EncodedInst {
    encode_rr_0f(0xBF, dst, src, false)
}

// =============================================================================
// Frame adjustment
// =============================================================================

/// `add dst, imm`
#[inline]
pub fn encode_add_ri(dst: Gpr, imm: i32) -> EncodedInst {
    encode_group1(0, dst, imm)
}

/// `sub dst, imm`
#[inline]
pub fn encode_sub_ri(dst: Gpr, imm: i32) -> EncodedInst {
    encode_group1(5, dst, imm)
}

// =============================================================================
// Calls
// =============================================================================

/// `call target`
#[inline]
pub fn encode_call_r(target: Gpr) -> EncodedInst {
    let mut enc = EncodedInst::new();
    enc.push_rex(Rex::b(false, target));
    enc.push(0xFF);
    enc.push(modrm(Mod::Direct, 2, target.low_bits()));
    enc
}

/// `ret`
#[inline]
pub fn encode_ret() -> EncodedInst {
    let mut enc = EncodedInst::new();
    enc.push(0xC3);
    enc
}

// =============================================================================
// Scalar SSE spills
// =============================================================================

/// `movss dst, dword [mem]`
#[inline]
pub fn encode_movss_rm(dst: Xmm, mem: &MemOperand) -> EncodedInst {
    encode_sse_mem(0xF3, 0x10, dst, mem)
}

/// `movss dword [mem], src`
#[inline]
pub fn encode_movss_mr(mem: &MemOperand, src: Xmm) -> EncodedInst {
    encode_sse_mem(0xF3, 0x11, src, mem)
}

/// `movsd dst, qword [mem]`
#[inline]
pub fn encode_movsd_rm(dst: Xmm, mem: &MemOperand) -> EncodedInst {
    encode_sse_mem(0xF2, 0x10, dst, mem)
}

/// `movsd qword [mem], src`
#[inline]
pub fn encode_movsd_mr(mem: &MemOperand, src: Xmm) -> EncodedInst {
    encode_sse_mem(0xF2, 0x11, src, mem)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rex_prefix_bits() {
        assert_eq!(Rex::rr(true, Gpr::Rax, Gpr::Rax).encode(), 0x48);
        assert_eq!(Rex::rr(true, Gpr::R8, Gpr::R9).encode(), 0x4D);
        assert!(!Rex::rr(false, Gpr::Rax, Gpr::Rcx).is_needed());
    }

    #[test]
    fn test_addressing_bytes() {
        assert_eq!(modrm(Mod::Direct, 3, 0), 0xD8);
        assert_eq!(modrm(Mod::IndirectDisp8, 1, 2), 0x4A);
        assert_eq!(sib_base(Gpr::Rsp.low_bits()), 0x24);
    }

    #[test]
    fn test_context_shuffle_moves() {
        assert_eq!(encode_mov_rr(Gpr::Rdi, Gpr::Rdx).as_slice(), &[0x48, 0x89, 0xD7]);
        assert_eq!(encode_mov_rr(Gpr::Rsi, Gpr::Rcx).as_slice(), &[0x48, 0x89, 0xCE]);
        assert_eq!(encode_mov_rr(Gpr::Rdx, Gpr::R8).as_slice(), &[0x4C, 0x89, 0xC2]);
        assert_eq!(encode_mov_rr(Gpr::Rcx, Gpr::R9).as_slice(), &[0x4C, 0x89, 0xC9]);
    }

    #[test]
    fn test_stack_loads() {
        let enc = encode_mov_rm(Gpr::R8, &MemOperand::base_disp(Gpr::Rsp, 8));
        assert_eq!(enc.as_slice(), &[0x4C, 0x8B, 0x44, 0x24, 0x08]);

        let enc = encode_mov_rm(Gpr::R9, &MemOperand::base_disp(Gpr::Rsp, 16));
        assert_eq!(enc.as_slice(), &[0x4C, 0x8B, 0x4C, 0x24, 0x10]);

        let enc = encode_mov_rm(Gpr::Rax, &MemOperand::base(Gpr::Rsp));
        assert_eq!(enc.as_slice(), &[0x48, 0x8B, 0x04, 0x24]);
    }

    #[test]
    fn test_stack_store() {
        let enc = encode_mov_mr(&MemOperand::base(Gpr::Rsp), Gpr::Rax);
        assert_eq!(enc.as_slice(), &[0x48, 0x89, 0x04, 0x24]);
    }

    #[test]
    fn test_rbp_base_gets_zero_disp() {
        let enc = encode_mov_rm(Gpr::Rax, &MemOperand::base(Gpr::Rbp));
        assert_eq!(enc.as_slice(), &[0x48, 0x8B, 0x45, 0x00]);

        let enc = encode_mov_rm(Gpr::Rax, &MemOperand::base_disp(Gpr::Rbp, -8));
        assert_eq!(enc.as_slice(), &[0x48, 0x8B, 0x45, 0xF8]);
    }

    #[test]
    fn test_wide_displacement() {
        let enc = encode_mov_rm(Gpr::Rcx, &MemOperand::base_disp(Gpr::Rax, 0x1000));
        assert_eq!(enc.as_slice(), &[0x48, 0x8B, 0x88, 0x00, 0x10, 0x00, 0x00]);
    }

    #[test]
    fn test_mov_ri64() {
        let enc = encode_mov_ri64(Gpr::Rax, 0x1122_3344_5566_7788);
        assert_eq!(enc.len(), 10);
        assert_eq!(&enc.as_slice()[..2], &[0x48, 0xB8]);
        assert_eq!(
            &enc.as_slice()[MOV_RI64_IMM_OFFSET..],
            &0x1122_3344_5566_7788u64.to_le_bytes()
        );

        let enc = encode_mov_ri64(Gpr::R11, 0);
        assert_eq!(&enc.as_slice()[..2], &[0x49, 0xBB]);
    }

    #[test]
    fn test_stack_adjust() {
        assert_eq!(encode_sub_ri(Gpr::Rsp, 8).as_slice(), &[0x48, 0x83, 0xEC, 0x08]);
        assert_eq!(encode_add_ri(Gpr::Rsp, 24).as_slice(), &[0x48, 0x83, 0xC4, 0x18]);
        assert_eq!(
            encode_sub_ri(Gpr::Rsp, 0x200).as_slice(),
            &[0x48, 0x81, 0xEC, 0x00, 0x02, 0x00, 0x00]
        );
    }

    #[test]
    fn test_call_ret() {
        assert_eq!(encode_call_r(Gpr::Rax).as_slice(), &[0xFF, 0xD0]);
        assert_eq!(encode_call_r(Gpr::R10).as_slice(), &[0x41, 0xFF, 0xD2]);
        assert_eq!(encode_ret().as_slice(), &[0xC3]);
    }

    #[test]
    fn test_sse_spill_reload() {
        let slot = MemOperand::base(Gpr::Rsp);
        assert_eq!(encode_movss_mr(&slot, Xmm::Xmm0).as_slice(), &[0xF3, 0x0F, 0x11, 0x04, 0x24]);
        assert_eq!(encode_movss_rm(Xmm::Xmm0, &slot).as_slice(), &[0xF3, 0x0F, 0x10, 0x04, 0x24]);
        assert_eq!(encode_movsd_mr(&slot, Xmm::Xmm0).as_slice(), &[0xF2, 0x0F, 0x11, 0x04, 0x24]);
        assert_eq!(encode_movsd_rm(Xmm::Xmm0, &slot).as_slice(), &[0xF2, 0x0F, 0x10, 0x04, 0x24]);
    }

    #[test]
    fn test_movsx() {
        assert_eq!(encode_movsx_rb32(Gpr::Rax, Gpr::Rax).as_slice(), &[0x0F, 0xBE, 0xC0]);
        assert_eq!(encode_movsx_rw32(Gpr::Rax, Gpr::Rax).as_slice(), &[0x0F, 0xBF, 0xC0]);
    }
}
