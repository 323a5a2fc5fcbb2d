//! Register names and the argument layouts stubs translate between.
//!
//! Only what a stub touches is modelled: the sixteen integer registers,
//! the eight argument XMM registers, `[base + disp]` operands, and the two
//! argument layouts (managed context and System V).

use std::fmt;

// =============================================================================
// Integer registers
// =============================================================================

/// A 64-bit integer register, discriminant equal to its 4-bit machine number.
///
/// The low three bits go into ModR/M or the opcode byte; the fourth bit
/// lands in a REX extension bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Gpr {
    Rax = 0,
    Rcx = 1,
    Rdx = 2,
    Rbx = 3,
    Rsp = 4,
    Rbp = 5,
    Rsi = 6,
    Rdi = 7,
    R8 = 8,
    R9 = 9,
    R10 = 10,
    R11 = 11,
    R12 = 12,
    R13 = 13,
    R14 = 14,
    R15 = 15,
}

const GPR_NAMES: [&str; 16] = [
    "rax", "rcx", "rdx", "rbx", "rsp", "rbp", "rsi", "rdi", "r8", "r9", "r10", "r11", "r12",
    "r13", "r14", "r15",
];

impl Gpr {
    /// Machine number, 0 through 15.
    #[inline(always)]
    pub const fn encoding(self) -> u8 {
        self as u8
    }

    /// The three bits that fit in a ModR/M field.
    #[inline(always)]
    pub const fn low_bits(self) -> u8 {
        self as u8 & 0b111
    }

    /// Whether the register is one of r8-r15.
    #[inline(always)]
    pub const fn high_bit(self) -> bool {
        self as u8 & 0b1000 != 0
    }

    /// As a base, rsp and r12 cannot be named in r/m directly; a SIB byte
    /// has to follow.
    #[inline(always)]
    pub const fn needs_sib_as_base(self) -> bool {
        self.low_bits() == 0b100
    }

    /// As a base, rbp and r13 with mod=00 would mean RIP/disp32, so a zero
    /// displacement byte is emitted instead.
    #[inline(always)]
    pub const fn needs_displacement(self) -> bool {
        self.low_bits() == 0b101
    }

    /// Assembly name, e.g. `"r9"`.
    pub const fn name(self) -> &'static str {
        GPR_NAMES[self as usize]
    }
}

impl fmt::Display for Gpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// Vector registers
// =============================================================================

/// The XMM registers that can carry a floating-point argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Xmm {
    Xmm0 = 0,
    Xmm1 = 1,
    Xmm2 = 2,
    Xmm3 = 3,
    Xmm4 = 4,
    Xmm5 = 5,
    Xmm6 = 6,
    Xmm7 = 7,
}

impl Xmm {
    #[inline(always)]
    pub const fn encoding(self) -> u8 {
        self as u8
    }

    #[inline(always)]
    pub const fn low_bits(self) -> u8 {
        self as u8 & 0b111
    }

    /// Always false for the argument set; kept so SSE encoders can build a
    /// REX byte the same way integer encoders do.
    #[inline(always)]
    pub const fn high_bit(self) -> bool {
        self as u8 & 0b1000 != 0
    }
}

impl fmt::Display for Xmm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "xmm{}", self.encoding())
    }
}

// =============================================================================
// Stack operands
// =============================================================================

/// `[base + disp]`. Stubs only address their own frame, so there is no
/// index register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemOperand {
    pub base: Gpr,
    pub disp: i32,
}

impl MemOperand {
    /// `[reg]`
    #[inline]
    pub const fn base(reg: Gpr) -> Self {
        MemOperand { base: reg, disp: 0 }
    }

    /// `[reg + disp]`
    #[inline]
    pub const fn base_disp(reg: Gpr, disp: i32) -> Self {
        MemOperand { base: reg, disp }
    }

    /// Whether `disp` can use the one-byte displacement form.
    #[inline]
    pub const fn disp_fits_i8(&self) -> bool {
        self.disp as i8 as i32 == self.disp
    }
}

// =============================================================================
// System V AMD64 argument registers
// =============================================================================

/// Integer argument registers of the native (System V) convention, in order.
pub const SYSV_INT_ARG_REGS: [Gpr; 6] = [Gpr::Rdi, Gpr::Rsi, Gpr::Rdx, Gpr::Rcx, Gpr::R8, Gpr::R9];

/// Floating-point argument registers of the native convention, in order.
pub const SYSV_FLOAT_ARG_REGS: [Xmm; 8] = [
    Xmm::Xmm0,
    Xmm::Xmm1,
    Xmm::Xmm2,
    Xmm::Xmm3,
    Xmm::Xmm4,
    Xmm::Xmm5,
    Xmm::Xmm6,
    Xmm::Xmm7,
];

/// Integer return register.
pub const INT_RETURN_REG: Gpr = Gpr::Rax;

/// Floating-point return register.
pub const FLOAT_RETURN_REG: Xmm = Xmm::Xmm0;

/// Scratch register holding absolute call targets.
///
/// RAX is free at every call site in a stub: it carries no argument (no
/// varargs) and is overwritten by the return value anyway.
pub const CALL_SCRATCH_REG: Gpr = Gpr::Rax;

/// Where a genuine integer argument lives on entry to a stub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgSource {
    /// In a register.
    Reg(Gpr),
    /// In the caller's outgoing stack area, at `[rsp + offset]` on entry.
    Stack(i32),
}

/// Incoming location of each genuine integer argument.
///
/// The managed caller passes two context words (environment and receiver)
/// in the first two integer registers, so real argument `n` arrives in
/// native position `n + 2`; the fifth and sixth spill to the stack just
/// above the return address.
pub const CONTEXT_INT_ARG_SOURCES: [ArgSource; 6] = [
    ArgSource::Reg(Gpr::Rdx),
    ArgSource::Reg(Gpr::Rcx),
    ArgSource::Reg(Gpr::R8),
    ArgSource::Reg(Gpr::R9),
    ArgSource::Stack(8),
    ArgSource::Stack(16),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_machine_numbers() {
        assert_eq!(Gpr::Rax.encoding(), 0);
        assert_eq!(Gpr::R8.low_bits(), 0);
        assert!(Gpr::R8.high_bit());
        assert!(!Gpr::Rdi.high_bit());
    }

    #[test]
    fn test_special_bases() {
        assert!(Gpr::Rsp.needs_sib_as_base());
        assert!(Gpr::R12.needs_sib_as_base());
        assert!(Gpr::Rbp.needs_displacement());
        assert!(Gpr::R13.needs_displacement());
        assert!(!Gpr::Rax.needs_sib_as_base());
    }

    #[test]
    fn test_context_shift_covers_native_registers() {
        // Register sources must be read before they are overwritten: source
        // of slot i is never a destination of a slot j < i.
        for (i, src) in CONTEXT_INT_ARG_SOURCES.iter().enumerate() {
            if let ArgSource::Reg(reg) = src {
                assert!(!SYSV_INT_ARG_REGS[..i].contains(reg), "{reg} clobbered");
            }
        }
    }

    #[test]
    fn test_register_names() {
        assert_eq!(Gpr::R9.to_string(), "r9");
        assert_eq!(Xmm::Xmm7.to_string(), "xmm7");
    }
}
