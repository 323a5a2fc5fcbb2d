//! Bounds-checked view over a native memory buffer.

use crate::byref::Address;
use crate::error::MarshalError;
use crate::platform::Platform;

/// A byte buffer laid out the way native code on `platform` expects.
///
/// All accessors use the host byte order and fail with
/// [`MarshalError::OutOfBounds`] instead of panicking.
#[derive(Debug)]
pub struct NativeMemory<'a> {
    bytes: &'a mut [u8],
    platform: Platform,
}

macro_rules! scalar_accessors {
    ($($get:ident, $put:ident => $ty:ty),* $(,)?) => {
        $(
            #[doc = concat!("Read a `", stringify!($ty), "` at `offset`.")]
            #[inline]
            pub fn $get(&self, offset: usize) -> Result<$ty, MarshalError> {
                const LEN: usize = std::mem::size_of::<$ty>();
                let mut raw = [0u8; LEN];
                raw.copy_from_slice(self.range(offset, LEN)?);
                Ok(<$ty>::from_ne_bytes(raw))
            }

            #[doc = concat!("Write a `", stringify!($ty), "` at `offset`.")]
            #[inline]
            pub fn $put(&mut self, offset: usize, value: $ty) -> Result<(), MarshalError> {
                let raw = value.to_ne_bytes();
                self.range_mut(offset, raw.len())?.copy_from_slice(&raw);
                Ok(())
            }
        )*
    };
}

impl<'a> NativeMemory<'a> {
    /// Wrap `bytes` for `platform`.
    pub fn new(bytes: &'a mut [u8], platform: Platform) -> Self {
        Self { bytes, platform }
    }

    /// Wrap `bytes` for the running process.
    pub fn host(bytes: &'a mut [u8]) -> Self {
        Self::new(bytes, Platform::host())
    }

    /// Platform this view lays values out for.
    #[inline]
    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    /// Buffer length in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the buffer is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Raw bytes.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        self.bytes
    }

    fn range(&self, offset: usize, size: usize) -> Result<&[u8], MarshalError> {
        let len = self.bytes.len();
        offset
            .checked_add(size)
            .and_then(|end| self.bytes.get(offset..end))
            .ok_or(MarshalError::OutOfBounds { offset, size, len })
    }

    fn range_mut(&mut self, offset: usize, size: usize) -> Result<&mut [u8], MarshalError> {
        let len = self.bytes.len();
        offset
            .checked_add(size)
            .and_then(|end| self.bytes.get_mut(offset..end))
            .ok_or(MarshalError::OutOfBounds { offset, size, len })
    }

    scalar_accessors! {
        get_i8, put_i8 => i8,
        get_i16, put_i16 => i16,
        get_i32, put_i32 => i32,
        get_i64, put_i64 => i64,
        get_f32, put_f32 => f32,
        get_f64, put_f64 => f64,
    }

    /// Read a C `long` at `offset`, sign-extended to 64 bits.
    pub fn get_native_long(&self, offset: usize) -> Result<i64, MarshalError> {
        match self.platform.long_bits() {
            32 => self.get_i32(offset).map(i64::from),
            64 => self.get_i64(offset),
            bits => Err(MarshalError::UnsupportedWidth(bits)),
        }
    }

    /// Write a C `long` at `offset`, truncated to the platform width.
    pub fn put_native_long(&mut self, offset: usize, value: i64) -> Result<(), MarshalError> {
        match self.platform.long_bits() {
            32 => self.put_i32(offset, value as i32),
            64 => self.put_i64(offset, value),
            bits => Err(MarshalError::UnsupportedWidth(bits)),
        }
    }

    /// Read a native address at `offset`.
    pub fn get_address(&self, offset: usize) -> Result<Address, MarshalError> {
        match self.platform.address_bits() {
            32 => self.get_i32(offset).map(|v| Address::new(v as u32 as u64)),
            64 => self.get_i64(offset).map(|v| Address::new(v as u64)),
            bits => Err(MarshalError::UnsupportedWidth(bits)),
        }
    }

    /// Write a native address at `offset`.
    pub fn put_address(&mut self, offset: usize, address: Address) -> Result<(), MarshalError> {
        match self.platform.address_bits() {
            32 => self.put_i32(offset, address.value() as u32 as i32),
            64 => self.put_i64(offset, address.value() as i64),
            bits => Err(MarshalError::UnsupportedWidth(bits)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{Cpu, Os};

    #[test]
    fn test_out_of_bounds_is_reported() {
        let mut buf = [0u8; 4];
        let mut mem = NativeMemory::host(&mut buf);
        assert_eq!(
            mem.put_i64(0, 1),
            Err(MarshalError::OutOfBounds {
                offset: 0,
                size: 8,
                len: 4
            })
        );
        assert!(mem.get_i32(1).is_err());
        assert!(mem.get_i8(usize::MAX).is_err());
    }

    #[test]
    fn test_scalars_at_unaligned_offsets() {
        let mut buf = [0u8; 40];
        let mut mem = NativeMemory::host(&mut buf);
        mem.put_i8(1, -5).unwrap();
        mem.put_i16(3, -300).unwrap();
        mem.put_i32(5, i32::MIN).unwrap();
        mem.put_i64(9, -1 << 40).unwrap();
        mem.put_f32(17, 1.5).unwrap();
        mem.put_f64(21, -2.25).unwrap();

        assert_eq!(mem.get_i8(1).unwrap(), -5);
        assert_eq!(mem.get_i16(3).unwrap(), -300);
        assert_eq!(mem.get_i32(5).unwrap(), i32::MIN);
        assert_eq!(mem.get_i64(9).unwrap(), -1 << 40);
        assert_eq!(mem.get_f32(17).unwrap(), 1.5);
        assert_eq!(mem.get_f64(21).unwrap(), -2.25);
        assert!(mem.get_f64(33).is_err());
    }

    #[test]
    fn test_native_long_width() {
        let llp64 = Platform::new(Cpu::X86_64, Os::Windows, 64, 32);
        let mut buf = [0xAAu8; 8];
        let mut mem = NativeMemory::new(&mut buf, llp64);
        mem.put_native_long(0, -2).unwrap();
        assert_eq!(mem.get_native_long(0).unwrap(), -2);
        // Only four bytes are touched.
        assert_eq!(&mem.as_bytes()[4..], &[0xAA; 4]);
    }

    #[test]
    fn test_address_32_bit() {
        let ilp32 = Platform::new(Cpu::X86, Os::Linux, 32, 32);
        let mut buf = [0u8; 4];
        let mut mem = NativeMemory::new(&mut buf, ilp32);
        mem.put_address(0, Address::new(0xDEAD_BEEF)).unwrap();
        assert_eq!(mem.get_address(0).unwrap(), Address::new(0xDEAD_BEEF));
    }
}
