//! Type classification and fast-path eligibility.
//!
//! A signature is eligible for a compiled stub when every slot is a plain
//! integer or float scalar, the convention is the platform default, and the
//! arguments fit in the native argument registers. Everything else takes the
//! generic call path; that is a verdict, not an error.

use std::fmt;

use callgate_core::{CallingConvention, IntWidth, NativeType, Param, Platform, Signature};
use smallvec::SmallVec;

use crate::backend::x64::registers::{SYSV_FLOAT_ARG_REGS, SYSV_INT_ARG_REGS};

/// Integer arguments the native convention passes in registers.
pub const MAX_INT_ARGS: usize = SYSV_INT_ARG_REGS.len();

/// Float arguments the native convention passes in registers.
pub const MAX_FLOAT_ARGS: usize = SYSV_FLOAT_ARG_REGS.len();

// =============================================================================
// Register classes
// =============================================================================

/// Register file an argument travels in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegisterClass {
    /// General-purpose registers.
    Integer,
    /// SSE registers.
    Float,
}

impl fmt::Display for RegisterClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegisterClass::Integer => f.write_str("integer"),
            RegisterClass::Float => f.write_str("float"),
        }
    }
}

/// Machine-level kind of a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArgKind {
    /// Integer of the given width.
    Int(IntWidth),
    /// Single-precision float.
    F32,
    /// Double-precision float.
    F64,
}

impl ArgKind {
    /// Resolve a parameter slot, or `None` if it cannot be passed in a register.
    pub fn of(param: &Param, platform: &Platform) -> Option<Self> {
        if let Some(width) = param.int_width(platform) {
            return Some(ArgKind::Int(width));
        }
        match param.ty {
            NativeType::F32 => Some(ArgKind::F32),
            NativeType::F64 => Some(ArgKind::F64),
            _ => None,
        }
    }

    /// Register class this kind travels in.
    #[inline]
    pub const fn class(self) -> RegisterClass {
        match self {
            ArgKind::Int(_) => RegisterClass::Integer,
            ArgKind::F32 | ArgKind::F64 => RegisterClass::Float,
        }
    }
}

/// Machine-level kind of a return value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReturnKind {
    /// Nothing is returned.
    Void,
    /// Integer of the given width in `rax`.
    Int(IntWidth),
    /// Single-precision float in `xmm0`.
    F32,
    /// Double-precision float in `xmm0`.
    F64,
}

impl ReturnKind {
    /// Resolve a return slot, or `None` if it cannot be returned in a register.
    pub fn of(param: &Param, platform: &Platform) -> Option<Self> {
        if param.ty == NativeType::Void {
            return Some(ReturnKind::Void);
        }
        ArgKind::of(param, platform).map(|kind| match kind {
            ArgKind::Int(width) => ReturnKind::Int(width),
            ArgKind::F32 => ReturnKind::F32,
            ArgKind::F64 => ReturnKind::F64,
        })
    }

    /// Whether the value comes back in `xmm0`.
    #[inline]
    pub const fn is_float(self) -> bool {
        matches!(self, ReturnKind::F32 | ReturnKind::F64)
    }
}

// =============================================================================
// Verdicts
// =============================================================================

/// Why a signature cannot use a compiled stub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ineligible {
    /// The platform is not System V x86-64.
    Platform(Platform),
    /// A non-default calling convention was requested.
    Convention(CallingConvention),
    /// The return type has no register form.
    Return(NativeType),
    /// A parameter type has no register form.
    Param {
        /// Zero-based parameter position.
        index: usize,
        /// Offending type.
        ty: NativeType,
    },
    /// More integer arguments than integer argument registers.
    TooManyInts(usize),
    /// More float arguments than float argument registers.
    TooManyFloats(usize),
    /// Stub compilation is switched off.
    Disabled,
}

impl fmt::Display for Ineligible {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ineligible::Platform(p) => write!(f, "no stub compiler for {p}"),
            Ineligible::Convention(c) => write!(f, "unsupported calling convention {c:?}"),
            Ineligible::Return(ty) => write!(f, "unsupported return type {ty}"),
            Ineligible::Param { index, ty } => {
                write!(f, "unsupported type {ty} for parameter {index}")
            }
            Ineligible::TooManyInts(n) => {
                write!(f, "{n} integer arguments (limit {MAX_INT_ARGS})")
            }
            Ineligible::TooManyFloats(n) => {
                write!(f, "{n} float arguments (limit {MAX_FLOAT_ARGS})")
            }
            Ineligible::Disabled => f.write_str("stub compilation disabled"),
        }
    }
}

/// An eligible signature, resolved to machine kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classified {
    args: SmallVec<[ArgKind; 8]>,
    ret: ReturnKind,
    int_count: usize,
    float_count: usize,
}

impl Classified {
    /// Parameter kinds in declaration order.
    #[inline]
    pub fn args(&self) -> &[ArgKind] {
        &self.args
    }

    /// Return kind.
    #[inline]
    pub fn ret(&self) -> ReturnKind {
        self.ret
    }

    /// Number of integer-class parameters.
    #[inline]
    pub fn int_count(&self) -> usize {
        self.int_count
    }

    /// Number of float-class parameters.
    #[inline]
    pub fn float_count(&self) -> usize {
        self.float_count
    }
}

/// Decide whether `signature` can be compiled for `platform`.
pub fn classify(signature: &Signature, platform: &Platform) -> Result<Classified, Ineligible> {
    let verdict = classify_inner(signature, platform);
    match &verdict {
        Ok(c) => tracing::trace!(
            %signature,
            ints = c.int_count,
            floats = c.float_count,
            "signature eligible"
        ),
        Err(reason) => tracing::trace!(%signature, %reason, "signature ineligible"),
    }
    verdict
}

fn classify_inner(signature: &Signature, platform: &Platform) -> Result<Classified, Ineligible> {
    if !platform.is_sysv_x86_64() {
        return Err(Ineligible::Platform(*platform));
    }
    if signature.convention() != CallingConvention::Default {
        return Err(Ineligible::Convention(signature.convention()));
    }

    let ret_slot = signature.ret();
    let ret = ReturnKind::of(&ret_slot, platform).ok_or(Ineligible::Return(ret_slot.ty))?;

    let mut args = SmallVec::with_capacity(signature.params().len());
    let (mut int_count, mut float_count) = (0, 0);
    for (index, param) in signature.params().iter().enumerate() {
        let kind = ArgKind::of(param, platform).ok_or(Ineligible::Param { index, ty: param.ty })?;
        match kind.class() {
            RegisterClass::Integer => int_count += 1,
            RegisterClass::Float => float_count += 1,
        }
        args.push(kind);
    }

    if int_count > MAX_INT_ARGS {
        return Err(Ineligible::TooManyInts(int_count));
    }
    if float_count > MAX_FLOAT_ARGS {
        return Err(Ineligible::TooManyFloats(float_count));
    }

    Ok(Classified {
        args,
        ret,
        int_count,
        float_count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use callgate_core::{Cpu, Os};
    use proptest::prelude::*;

    const LINUX: Platform = Platform::new(Cpu::X86_64, Os::Linux, 64, 64);

    #[test]
    fn test_seven_ints_ineligible() {
        let sig = Signature::new(NativeType::I32, [NativeType::I32; 7]);
        assert_eq!(classify(&sig, &LINUX), Err(Ineligible::TooManyInts(7)));
    }

    #[test]
    fn test_nine_floats_ineligible() {
        let sig = Signature::new(NativeType::F64, [NativeType::F32; 9]);
        assert_eq!(classify(&sig, &LINUX), Err(Ineligible::TooManyFloats(9)));
    }

    #[test]
    fn test_register_limits_reachable() {
        let params = [NativeType::I64; 6].into_iter().chain([NativeType::F64; 8]);
        let sig = Signature::new(NativeType::Void, params);
        let c = classify(&sig, &LINUX).unwrap();
        assert_eq!(c.int_count(), 6);
        assert_eq!(c.float_count(), 8);
        assert_eq!(c.ret(), ReturnKind::Void);
    }

    #[test]
    fn test_widths() {
        let sig = Signature::new(
            Param::wide(NativeType::I32),
            [
                Param::new(NativeType::I8),
                Param::new(NativeType::I16),
                Param::new(NativeType::Enum),
                Param::new(NativeType::NativeLong),
                Param::wide(NativeType::I8),
            ],
        );
        let c = classify(&sig, &LINUX).unwrap();
        assert_eq!(
            c.args(),
            &[
                ArgKind::Int(IntWidth::W8),
                ArgKind::Int(IntWidth::W16),
                ArgKind::Int(IntWidth::W32),
                ArgKind::Int(IntWidth::W64),
                ArgKind::Int(IntWidth::W64),
            ]
        );
        assert_eq!(c.ret(), ReturnKind::Int(IntWidth::W64));
    }

    #[test]
    fn test_native_long_follows_platform() {
        let ilp32_long = Platform::new(Cpu::X86_64, Os::Linux, 64, 32);
        let sig = Signature::new(NativeType::NativeLong, [NativeType::NativeLong]);
        let c = classify(&sig, &ilp32_long).unwrap();
        assert_eq!(c.args(), &[ArgKind::Int(IntWidth::W32)]);

        let sig = Signature::new(NativeType::Void, [Param::wide(NativeType::NativeLong)]);
        let c = classify(&sig, &ilp32_long).unwrap();
        assert_eq!(c.args(), &[ArgKind::Int(IntWidth::W64)]);
    }

    #[test]
    fn test_rejected_types() {
        let sig = Signature::new(NativeType::Bool, [NativeType::I32]);
        assert_eq!(classify(&sig, &LINUX), Err(Ineligible::Return(NativeType::Bool)));

        let sig = Signature::new(NativeType::I32, [NativeType::I32, NativeType::Struct]);
        assert_eq!(
            classify(&sig, &LINUX),
            Err(Ineligible::Param { index: 1, ty: NativeType::Struct })
        );

        let sig = Signature::new(NativeType::I32, [NativeType::Void]);
        assert!(matches!(classify(&sig, &LINUX), Err(Ineligible::Param { index: 0, .. })));

        let sig = Signature::new(NativeType::I32, [NativeType::Address]);
        assert!(classify(&sig, &LINUX).is_err());
    }

    #[test]
    fn test_platform_and_convention() {
        let sig = Signature::new(NativeType::I32, [NativeType::I32]);
        let win = Platform::new(Cpu::X86_64, Os::Windows, 64, 32);
        assert_eq!(classify(&sig, &win), Err(Ineligible::Platform(win)));

        let arm = Platform::new(Cpu::Aarch64, Os::Linux, 64, 64);
        assert!(matches!(classify(&sig, &arm), Err(Ineligible::Platform(_))));

        let std = sig.with_convention(CallingConvention::StdCall);
        assert_eq!(
            classify(&std, &LINUX),
            Err(Ineligible::Convention(CallingConvention::StdCall))
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(Ineligible::TooManyInts(7).to_string(), "7 integer arguments (limit 6)");
        assert_eq!(RegisterClass::Float.to_string(), "float");
    }

    proptest! {
        #[test]
        fn eligibility_matches_register_limits(ints in 0usize..10, floats in 0usize..12) {
            let params = std::iter::repeat(NativeType::I32)
                .take(ints)
                .chain(std::iter::repeat(NativeType::F64).take(floats));
            let sig = Signature::new(NativeType::I64, params);
            let verdict = classify(&sig, &LINUX);
            prop_assert_eq!(verdict.is_ok(), ints <= MAX_INT_ARGS && floats <= MAX_FLOAT_ARGS);
        }

        #[test]
        fn classification_is_pure(ints in 0usize..7) {
            let sig = Signature::new(NativeType::F32, std::iter::repeat(NativeType::I16).take(ints));
            prop_assert_eq!(classify(&sig, &LINUX), classify(&sig, &LINUX));
        }
    }
}
