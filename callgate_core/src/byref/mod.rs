//! By-reference marshaling of scalar values.
//!
//! A native function that fills in an `int*` or `void**` argument receives
//! the address of a temporary native buffer. The caller marshals the current
//! value into that buffer before the call and unmarshals it afterwards:
//!
//! ```
//! use callgate_core::{ByReference, IntByReference, NativeMemory};
//!
//! let mut r = IntByReference::new(7);
//! let mut buf = [0u8; 4];
//! let mut mem = NativeMemory::host(&mut buf);
//! r.marshal(&mut mem, 0).unwrap();
//! mem.put_i32(0, 42).unwrap(); // native code writes through the pointer
//! r.unmarshal(&mem, 0).unwrap();
//! assert_eq!(r.value(), 42);
//! ```

mod address;
mod memory;
mod scalar;

pub use address::{Address, AddressByReference};
pub use memory::NativeMemory;
pub use scalar::{
    BoolByReference, ByteByReference, DoubleByReference, FloatByReference, IntByReference,
    LongLongByReference, NativeLong, NativeLongByReference, NativeScalar, ScalarByReference,
    ShortByReference,
};

use crate::error::MarshalError;
use crate::platform::Platform;

/// A value passed to native code by address.
pub trait ByReference {
    /// The Rust-side value type.
    type Value;

    /// Size in bytes of the native buffer needed to hold the value.
    fn native_size(&self, platform: &Platform) -> usize;

    /// Copy the current value into `memory` at `offset`.
    fn marshal(&self, memory: &mut NativeMemory<'_>, offset: usize) -> Result<(), MarshalError>;

    /// Replace the current value with the one stored in `memory` at `offset`.
    fn unmarshal(&mut self, memory: &NativeMemory<'_>, offset: usize) -> Result<(), MarshalError>;

    /// The current value.
    fn value(&self) -> Self::Value;
}
