//! Core types shared by the callgate stub compiler and its callers.
//!
//! This crate holds everything that does not touch machine code:
//! - The closed set of native value types and call signatures
//! - Platform description (CPU, OS, pointer and `long` widths)
//! - Integer widening/narrowing helpers
//! - The by-reference marshaling contract and its scalar implementations

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod byref;
pub mod error;
pub mod number;
pub mod platform;
pub mod types;

pub use byref::{
    Address, AddressByReference, BoolByReference, ByReference, ByteByReference,
    DoubleByReference, FloatByReference, IntByReference, LongLongByReference, NativeLong,
    NativeLongByReference, NativeMemory, ShortByReference,
};
pub use error::MarshalError;
pub use number::IntWidth;
pub use platform::{Cpu, Os, Platform};
pub use types::{CallingConvention, NativeType, Param, Signature};
