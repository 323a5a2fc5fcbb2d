use std::fmt;

use crate::byref::{ByReference, NativeMemory};
use crate::error::MarshalError;
use crate::platform::Platform;

/// A native address value.
///
/// `Address::NULL` is an ordinary value, distinct from "no address": code
/// that means zero says so explicitly instead of passing a null pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[repr(transparent)]
pub struct Address(u64);

impl Address {
    /// The zero address.
    pub const NULL: Address = Address(0);

    /// Wrap a raw address value.
    #[inline]
    pub const fn new(value: u64) -> Self {
        Address(value)
    }

    /// Raw address value.
    #[inline]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// Whether this is the zero address.
    #[inline]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl<T> From<*const T> for Address {
    fn from(ptr: *const T) -> Self {
        Address(ptr as usize as u64)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// By-reference holder for an address, e.g. a `void**` out-parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AddressByReference {
    value: Address,
}

impl AddressByReference {
    /// Create a reference holding `value`.
    pub const fn new(value: Address) -> Self {
        Self { value }
    }

    /// Create a reference from a raw pointer.
    ///
    /// A null pointer is rejected; pass [`Address::NULL`] to [`Self::new`]
    /// to start from a zero address on purpose.
    pub fn try_from_ptr<T>(ptr: *const T) -> Result<Self, MarshalError> {
        if ptr.is_null() {
            return Err(MarshalError::NullAddress);
        }
        Ok(Self::new(Address::from(ptr)))
    }
}

impl ByReference for AddressByReference {
    type Value = Address;

    fn native_size(&self, platform: &Platform) -> usize {
        platform.address_size()
    }

    fn marshal(&self, memory: &mut NativeMemory<'_>, offset: usize) -> Result<(), MarshalError> {
        memory.put_address(offset, self.value)
    }

    fn unmarshal(&mut self, memory: &NativeMemory<'_>, offset: usize) -> Result<(), MarshalError> {
        self.value = memory.get_address(offset)?;
        Ok(())
    }

    fn value(&self) -> Address {
        self.value
    }
}
