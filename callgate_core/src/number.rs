//! Integer widening and narrowing between declared widths and the 64-bit
//! register width.
//!
//! Stubs and generic invokers move every integer through a 64-bit register.
//! Widening sign-extends (or zero-extends for unsigned kinds) into an `i64`;
//! narrowing truncates back. For every representable value
//! `T::narrow(v.widen()) == v`.

use crate::platform::Platform;
use crate::types::NativeType;

/// Integer width in a native register or memory slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IntWidth {
    /// 8 bits.
    W8,
    /// 16 bits.
    W16,
    /// 32 bits.
    W32,
    /// 64 bits.
    W64,
}

impl IntWidth {
    /// Width in bits.
    #[inline]
    pub const fn bits(self) -> usize {
        match self {
            IntWidth::W8 => 8,
            IntWidth::W16 => 16,
            IntWidth::W32 => 32,
            IntWidth::W64 => 64,
        }
    }

    /// Width in bytes.
    #[inline]
    pub const fn bytes(self) -> usize {
        self.bits() / 8
    }

    /// Look up a width from a bit count.
    #[inline]
    pub const fn from_bits(bits: usize) -> Option<Self> {
        match bits {
            8 => Some(IntWidth::W8),
            16 => Some(IntWidth::W16),
            32 => Some(IntWidth::W32),
            64 => Some(IntWidth::W64),
            _ => None,
        }
    }

    /// Sign-extend the low `self.bits()` bits of `raw` to 64 bits.
    #[inline]
    pub const fn sign_extend(self, raw: i64) -> i64 {
        match self {
            IntWidth::W8 => raw as i8 as i64,
            IntWidth::W16 => raw as i16 as i64,
            IntWidth::W32 => raw as i32 as i64,
            IntWidth::W64 => raw,
        }
    }
}

/// An integer type that can be carried in a 64-bit register.
pub trait NativeInt: Copy {
    /// Declared width.
    const WIDTH: IntWidth;

    /// Widen to the register width.
    fn widen(self) -> i64;

    /// Truncate a register value back to this width.
    fn narrow(value: i64) -> Self;
}

macro_rules! impl_native_int {
    ($($ty:ty => $width:ident),* $(,)?) => {
        $(
            impl NativeInt for $ty {
                const WIDTH: IntWidth = IntWidth::$width;

                #[inline]
                fn widen(self) -> i64 {
                    self as i64
                }

                #[inline]
                fn narrow(value: i64) -> Self {
                    value as $ty
                }
            }
        )*
    };
}

impl_native_int! {
    i8 => W8,
    i16 => W16,
    i32 => W32,
    i64 => W64,
    u8 => W8,
    u16 => W16,
    u32 => W32,
}

/// Widen `value` to the register width.
#[inline]
pub fn widen<T: NativeInt>(value: T) -> i64 {
    value.widen()
}

/// Narrow a register value to `T`.
#[inline]
pub fn narrow<T: NativeInt>(value: i64) -> T {
    T::narrow(value)
}

/// Narrow a register value to a boolean: only bit 0 survives, so the result
/// is always exactly 0 or 1.
#[inline]
pub const fn narrow_bool(value: i64) -> u8 {
    (value & 1) as u8
}

/// Whether a slot is a 32-bit C `long` on `platform`.
pub fn is_long32(ty: NativeType, wide: bool, platform: &Platform) -> bool {
    platform.long_bits() == 32 && ty == NativeType::NativeLong && !wide
}

/// Whether a slot is a 64-bit long: a native long on an LP64 platform, or any
/// long carrying the wide attribute.
pub fn is_long64(ty: NativeType, wide: bool, platform: &Platform) -> bool {
    match ty {
        NativeType::I64 => true,
        NativeType::NativeLong => platform.long_bits() == 64 || wide,
        _ => false,
    }
}

/// Whether a slot travels as a 32-bit (or narrower) integer.
pub fn is_int32(ty: NativeType, wide: bool, platform: &Platform) -> bool {
    match ty {
        NativeType::Bool | NativeType::I8 | NativeType::I16 | NativeType::I32 | NativeType::Enum => {
            !wide
        }
        _ => is_long32(ty, wide, platform),
    }
}
