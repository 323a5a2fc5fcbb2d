use crate::byref::{ByReference, NativeMemory};
use crate::error::MarshalError;
use crate::number::narrow_bool;
use crate::platform::Platform;

/// A scalar with a fixed native layout on a given platform.
pub trait NativeScalar: Copy + Default {
    /// Bytes occupied in native memory.
    fn native_size(platform: &Platform) -> usize;

    /// Store `self` at `offset`.
    fn store(self, memory: &mut NativeMemory<'_>, offset: usize) -> Result<(), MarshalError>;

    /// Load a value from `offset`.
    fn load(memory: &NativeMemory<'_>, offset: usize) -> Result<Self, MarshalError>;
}

macro_rules! fixed_scalar {
    ($($ty:ty => $get:ident, $put:ident),* $(,)?) => {
        $(
            impl NativeScalar for $ty {
                #[inline]
                fn native_size(_platform: &Platform) -> usize {
                    std::mem::size_of::<$ty>()
                }

                #[inline]
                fn store(self, memory: &mut NativeMemory<'_>, offset: usize) -> Result<(), MarshalError> {
                    memory.$put(offset, self)
                }

                #[inline]
                fn load(memory: &NativeMemory<'_>, offset: usize) -> Result<Self, MarshalError> {
                    memory.$get(offset)
                }
            }
        )*
    };
}

fixed_scalar! {
    i8 => get_i8, put_i8,
    i16 => get_i16, put_i16,
    i32 => get_i32, put_i32,
    i64 => get_i64, put_i64,
    f32 => get_f32, put_f32,
    f64 => get_f64, put_f64,
}

// Booleans are stored as a 32-bit C int.
impl NativeScalar for bool {
    fn native_size(_platform: &Platform) -> usize {
        4
    }

    fn store(self, memory: &mut NativeMemory<'_>, offset: usize) -> Result<(), MarshalError> {
        memory.put_i32(offset, self as i32)
    }

    fn load(memory: &NativeMemory<'_>, offset: usize) -> Result<Self, MarshalError> {
        let raw = memory.get_i32(offset)?;
        Ok(narrow_bool(i64::from(raw)) != 0)
    }
}

/// A C `long` value: 32 or 64 bits wide depending on the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct NativeLong(pub i64);

impl NativeScalar for NativeLong {
    fn native_size(platform: &Platform) -> usize {
        platform.long_size()
    }

    fn store(self, memory: &mut NativeMemory<'_>, offset: usize) -> Result<(), MarshalError> {
        memory.put_native_long(offset, self.0)
    }

    fn load(memory: &NativeMemory<'_>, offset: usize) -> Result<Self, MarshalError> {
        memory.get_native_long(offset).map(NativeLong)
    }
}

/// By-reference holder for any [`NativeScalar`].
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ScalarByReference<T: NativeScalar> {
    value: T,
}

impl<T: NativeScalar> ScalarByReference<T> {
    /// Create a reference holding `value`.
    pub fn new(value: T) -> Self {
        Self { value }
    }
}

impl<T: NativeScalar> ByReference for ScalarByReference<T> {
    type Value = T;

    fn native_size(&self, platform: &Platform) -> usize {
        T::native_size(platform)
    }

    fn marshal(&self, memory: &mut NativeMemory<'_>, offset: usize) -> Result<(), MarshalError> {
        self.value.store(memory, offset)
    }

    fn unmarshal(&mut self, memory: &NativeMemory<'_>, offset: usize) -> Result<(), MarshalError> {
        self.value = T::load(memory, offset)?;
        Ok(())
    }

    fn value(&self) -> T {
        self.value
    }
}

/// `int8_t*` out-parameter.
pub type ByteByReference = ScalarByReference<i8>;
/// `int16_t*` out-parameter.
pub type ShortByReference = ScalarByReference<i16>;
/// `int32_t*` out-parameter.
pub type IntByReference = ScalarByReference<i32>;
/// `int64_t*` out-parameter.
pub type LongLongByReference = ScalarByReference<i64>;
/// `long*` out-parameter.
pub type NativeLongByReference = ScalarByReference<NativeLong>;
/// `float*` out-parameter.
pub type FloatByReference = ScalarByReference<f32>;
/// `double*` out-parameter.
pub type DoubleByReference = ScalarByReference<f64>;
/// `int*` used as a boolean out-parameter.
pub type BoolByReference = ScalarByReference<bool>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{Cpu, Os};
    use proptest::prelude::*;

    fn round_trip<T>(value: T, offset: usize) -> T
    where
        T: NativeScalar,
    {
        let platform = Platform::host();
        let original = ScalarByReference::new(value);
        let mut buf = vec![0u8; offset + original.native_size(&platform)];
        let mut mem = NativeMemory::new(&mut buf, platform);
        original.marshal(&mut mem, offset).unwrap();

        let mut copy = ScalarByReference::<T>::default();
        copy.unmarshal(&mem, offset).unwrap();
        copy.value()
    }

    #[test]
    fn test_native_sizes() {
        let lp64 = Platform::new(Cpu::X86_64, Os::Linux, 64, 64);
        let llp64 = Platform::new(Cpu::X86_64, Os::Windows, 64, 32);
        assert_eq!(ByteByReference::default().native_size(&lp64), 1);
        assert_eq!(ShortByReference::default().native_size(&lp64), 2);
        assert_eq!(IntByReference::default().native_size(&lp64), 4);
        assert_eq!(LongLongByReference::default().native_size(&llp64), 8);
        assert_eq!(NativeLongByReference::default().native_size(&lp64), 8);
        assert_eq!(NativeLongByReference::default().native_size(&llp64), 4);
        assert_eq!(DoubleByReference::default().native_size(&lp64), 8);
        assert_eq!(BoolByReference::default().native_size(&lp64), 4);
    }

    #[test]
    fn test_bool_reads_low_bit_only() {
        let mut buf = [0u8; 4];
        let mut mem = NativeMemory::host(&mut buf);
        mem.put_i32(0, 0x7FFF_FFFE).unwrap();
        let mut r = BoolByReference::new(true);
        r.unmarshal(&mem, 0).unwrap();
        assert!(!r.value());

        mem.put_i32(0, 3).unwrap();
        r.unmarshal(&mem, 0).unwrap();
        assert!(r.value());
    }

    #[test]
    fn test_marshal_out_of_bounds() {
        let mut buf = [0u8; 2];
        let mut mem = NativeMemory::host(&mut buf);
        let r = IntByReference::new(1);
        assert!(r.marshal(&mut mem, 0).is_err());
    }

    proptest! {
        #[test]
        fn integers_round_trip(a in any::<i8>(), b in any::<i16>(), c in any::<i32>(), d in any::<i64>(), off in 0usize..16) {
            prop_assert_eq!(round_trip(a, off), a);
            prop_assert_eq!(round_trip(b, off), b);
            prop_assert_eq!(round_trip(c, off), c);
            prop_assert_eq!(round_trip(d, off), d);
        }

        #[test]
        fn floats_round_trip_bitwise(f in any::<f32>(), d in any::<f64>(), off in 0usize..16) {
            prop_assert_eq!(round_trip(f, off).to_bits(), f.to_bits());
            prop_assert_eq!(round_trip(d, off).to_bits(), d.to_bits());
        }

        #[test]
        fn bool_round_trip(b in any::<bool>()) {
            prop_assert_eq!(round_trip(b, 0), b);
        }

        #[test]
        fn native_long_round_trip(v in any::<i64>()) {
            let platform = Platform::host();
            prop_assume!(platform.long_bits() == 64 || i32::try_from(v).is_ok());
            prop_assert_eq!(round_trip(NativeLong(v), 0), NativeLong(v));
        }
    }
}
