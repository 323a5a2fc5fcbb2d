//! Native value types and call signatures.
//!
//! The set of types is closed on purpose: the register-passing ABIs only
//! understand a fixed list of scalar kinds, so classification is a `match`
//! rather than an open trait hierarchy.

use std::fmt;

use smallvec::SmallVec;

use crate::number::IntWidth;
use crate::platform::Platform;

// =============================================================================
// Native Types
// =============================================================================

/// A value kind that can appear in a native method signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NativeType {
    /// No value (return position only).
    Void,
    /// Boolean.
    Bool,
    /// Signed 8-bit integer.
    I8,
    /// Signed 16-bit integer.
    I16,
    /// Signed 32-bit integer.
    I32,
    /// Signed 64-bit integer.
    I64,
    /// C `long`; 32 or 64 bits depending on the platform.
    NativeLong,
    /// Enumeration constant, passed as a 32-bit integer.
    Enum,
    /// IEEE-754 single precision.
    F32,
    /// IEEE-754 double precision.
    F64,
    /// Raw native address.
    Address,
    /// Aggregate passed by value.
    Struct,
}

impl NativeType {
    /// Whether values of this type are integers at the ABI level.
    #[inline]
    pub const fn is_integral(self) -> bool {
        matches!(
            self,
            NativeType::I8
                | NativeType::I16
                | NativeType::I32
                | NativeType::I64
                | NativeType::NativeLong
                | NativeType::Enum
        )
    }

    /// Whether values of this type travel in floating-point registers.
    #[inline]
    pub const fn is_float(self) -> bool {
        matches!(self, NativeType::F32 | NativeType::F64)
    }

    /// Resolve the integer width of this type on `platform`.
    ///
    /// `wide` is the forced 64-bit attribute; it overrides the platform width
    /// for every integral type. Returns `None` for non-integral types.
    pub fn int_width(self, wide: bool, platform: &Platform) -> Option<IntWidth> {
        if wide && self.is_integral() {
            return Some(IntWidth::W64);
        }
        match self {
            NativeType::I8 => Some(IntWidth::W8),
            NativeType::I16 => Some(IntWidth::W16),
            NativeType::I32 | NativeType::Enum => Some(IntWidth::W32),
            NativeType::I64 => Some(IntWidth::W64),
            NativeType::NativeLong => IntWidth::from_bits(platform.long_bits()),
            _ => None,
        }
    }
}

impl fmt::Display for NativeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NativeType::Void => "void",
            NativeType::Bool => "bool",
            NativeType::I8 => "i8",
            NativeType::I16 => "i16",
            NativeType::I32 => "i32",
            NativeType::I64 => "i64",
            NativeType::NativeLong => "long",
            NativeType::Enum => "enum",
            NativeType::F32 => "f32",
            NativeType::F64 => "f64",
            NativeType::Address => "address",
            NativeType::Struct => "struct",
        };
        f.write_str(name)
    }
}

// =============================================================================
// Parameters
// =============================================================================

/// A parameter or return slot: a type plus per-slot attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Param {
    /// The value type.
    pub ty: NativeType,
    /// Forced 64-bit integer representation.
    pub wide: bool,
}

impl Param {
    /// A slot with no attributes.
    #[inline]
    pub const fn new(ty: NativeType) -> Self {
        Self { ty, wide: false }
    }

    /// A slot forced to the 64-bit integer representation.
    #[inline]
    pub const fn wide(ty: NativeType) -> Self {
        Self { ty, wide: true }
    }

    /// Resolved integer width, if integral.
    #[inline]
    pub fn int_width(&self, platform: &Platform) -> Option<IntWidth> {
        self.ty.int_width(self.wide, platform)
    }

    /// Single-character descriptor code for this slot.
    fn descriptor_code(&self, platform: &Platform) -> char {
        if let Some(width) = self.int_width(platform) {
            return match width {
                IntWidth::W8 => 'B',
                IntWidth::W16 => 'S',
                IntWidth::W32 => 'I',
                IntWidth::W64 => 'J',
            };
        }
        match self.ty {
            NativeType::Void => 'V',
            NativeType::Bool => 'Z',
            NativeType::F32 => 'F',
            NativeType::F64 => 'D',
            NativeType::Address if platform.address_bits() == 64 => 'J',
            NativeType::Address => 'I',
            _ => 'L',
        }
    }
}

impl From<NativeType> for Param {
    fn from(ty: NativeType) -> Self {
        Param::new(ty)
    }
}

// =============================================================================
// Signatures
// =============================================================================

/// Calling convention requested for a native function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CallingConvention {
    /// The platform's default C convention.
    #[default]
    Default,
    /// Win32 `__stdcall`.
    StdCall,
}

/// A native method signature.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Signature {
    params: SmallVec<[Param; 8]>,
    ret: Param,
    convention: CallingConvention,
}

impl Signature {
    /// Build a signature with the default calling convention.
    pub fn new<P>(ret: impl Into<Param>, params: impl IntoIterator<Item = P>) -> Self
    where
        P: Into<Param>,
    {
        Self {
            params: params.into_iter().map(Into::into).collect(),
            ret: ret.into(),
            convention: CallingConvention::Default,
        }
    }

    /// Replace the calling convention.
    pub fn with_convention(mut self, convention: CallingConvention) -> Self {
        self.convention = convention;
        self
    }

    /// Parameters in declaration order.
    #[inline]
    pub fn params(&self) -> &[Param] {
        &self.params
    }

    /// Return slot.
    #[inline]
    pub fn ret(&self) -> Param {
        self.ret
    }

    /// Requested calling convention.
    #[inline]
    pub fn convention(&self) -> CallingConvention {
        self.convention
    }

    /// JNI-style descriptor, e.g. `(IJF)D`, resolved for `platform`.
    pub fn descriptor(&self, platform: &Platform) -> String {
        let mut out = String::with_capacity(self.params.len() + 3);
        out.push('(');
        for param in &self.params {
            out.push(param.descriptor_code(platform));
        }
        out.push(')');
        out.push(self.ret.descriptor_code(platform));
        out
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            if param.wide {
                write!(f, "wide ")?;
            }
            write!(f, "{}", param.ty)?;
        }
        write!(f, ") -> {}", self.ret.ty)
    }
}
