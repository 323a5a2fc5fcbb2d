//! Errors raised by the marshaling layer.

use thiserror::Error;

/// Errors raised while copying values to or from native memory.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MarshalError {
    /// The access `[offset, offset + size)` does not fit in the buffer.
    #[error("access of {size} bytes at offset {offset} exceeds buffer of {len} bytes")]
    OutOfBounds {
        /// Requested offset.
        offset: usize,
        /// Requested access size in bytes.
        size: usize,
        /// Buffer length in bytes.
        len: usize,
    },

    /// A null pointer was supplied where an address value is required.
    ///
    /// Use [`crate::Address::NULL`] to express an intentional zero address.
    #[error("null pointer supplied where an address value is required")]
    NullAddress,

    /// The platform reports a width this crate cannot represent.
    #[error("unsupported native width of {0} bits")]
    UnsupportedWidth(usize),
}
