use std::fmt;

use half::{bf16, f16};

use crate::storage::HostStorage;

// DType — Runtime element type tag
//
// Every array carries a DType. Kernels never see it directly: they go through
// `dispatch_dtype!`, which turns the tag into a concrete Rust type so that an
// operation is written once as generic code and instantiated per element type.
//
//   U8   — unsigned byte
//   I8 / I16 / I32 / I64 — signed integers
//   F16  — IEEE half float
//   BF16 — brain float
//   F32 / F64 — single / double precision

/// Enum of all supported element data types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    U8,
    I8,
    I16,
    I32,
    I64,
    F16,
    BF16,
    F32,
    F64,
}

impl DType {
    /// Every dtype, in declaration order.
    pub const ALL: [DType; 9] = [
        DType::U8,
        DType::I8,
        DType::I16,
        DType::I32,
        DType::I64,
        DType::F16,
        DType::BF16,
        DType::F32,
        DType::F64,
    ];

    /// Size of one element in bytes.
    pub fn size_in_bytes(&self) -> usize {
        match self {
            DType::U8 | DType::I8 => 1,
            DType::I16 | DType::F16 | DType::BF16 => 2,
            DType::I32 | DType::F32 => 4,
            DType::I64 | DType::F64 => 8,
        }
    }

    /// Whether this dtype is a floating-point type.
    pub fn is_float(&self) -> bool {
        matches!(self, DType::F16 | DType::BF16 | DType::F32 | DType::F64)
    }

    /// Whether this is a half-precision type (F16 or BF16).
    pub fn is_half(&self) -> bool {
        matches!(self, DType::F16 | DType::BF16)
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DType::U8 => "uint8",
            DType::I8 => "int8",
            DType::I16 => "int16",
            DType::I32 => "int32",
            DType::I64 => "int64",
            DType::F16 => "float16",
            DType::BF16 => "bfloat16",
            DType::F32 => "float32",
            DType::F64 => "float64",
        };
        write!(f, "{}", s)
    }
}

// WithDType — Bridge between Rust element types and the DType tag
//
// Besides the tag itself, the trait carries the few numeric facts the kernels
// need without knowing the concrete type: NaN detection, the extreme values
// used as reduction identities, exact casting, and the accumulator used when
// summing into this type (half floats sum in f32).

/// Trait implemented by Rust types that can be stored in an array.
pub trait WithDType:
    Copy
    + Send
    + Sync
    + 'static
    + PartialOrd
    + num_traits::NumCast
    + bytemuck::Pod
    + fmt::Debug
{
    /// The corresponding DType enum variant.
    const DTYPE: DType;

    /// Accumulator used when this type is the output of a sum.
    type SumAccum: WithDType;

    fn to_f64(self) -> f64;

    fn from_f64(v: f64) -> Self;

    fn zero() -> Self {
        Self::from_f64(0.0)
    }

    fn one() -> Self {
        Self::from_f64(1.0)
    }

    /// Always false for integer types.
    fn is_nan(self) -> bool {
        false
    }

    /// Most negative finite value, or negative infinity where the type has one.
    fn lowest_or_inf() -> Self;

    /// Largest finite value, or positive infinity where the type has one.
    fn highest_or_inf() -> Self;

    /// `self + next`, wrapping on integer overflow.
    fn accumulate(self, next: Self) -> Self;

    /// Wrap an owned vector into host storage.
    fn into_storage(data: Vec<Self>) -> HostStorage;

    /// Borrow host storage as a typed slice, if the element type matches.
    fn storage_slice(storage: &HostStorage) -> Option<&[Self]>;

    /// Mutably borrow host storage as a typed slice, if the element type matches.
    fn storage_slice_mut(storage: &mut HostStorage) -> Option<&mut [Self]>;
}

/// Convert between element types.
///
/// Exact whenever the value is representable in `U`. Out-of-range values and
/// NaN going into an integer fall back to Rust's saturating float cast.
pub fn cast<T: WithDType, U: WithDType>(v: T) -> U {
    <U as num_traits::NumCast>::from(v).unwrap_or_else(|| U::from_f64(v.to_f64()))
}

macro_rules! impl_storage_access {
    ($variant:ident) => {
        fn into_storage(data: Vec<Self>) -> HostStorage {
            HostStorage::$variant(data)
        }

        fn storage_slice(storage: &HostStorage) -> Option<&[Self]> {
            match storage {
                HostStorage::$variant(v) => Some(v),
                _ => None,
            }
        }

        fn storage_slice_mut(storage: &mut HostStorage) -> Option<&mut [Self]> {
            match storage {
                HostStorage::$variant(v) => Some(v),
                _ => None,
            }
        }
    };
}

macro_rules! impl_with_dtype_int {
    ($ty:ty, $variant:ident) => {
        impl WithDType for $ty {
            const DTYPE: DType = DType::$variant;
            type SumAccum = $ty;

            fn to_f64(self) -> f64 {
                self as f64
            }
            fn from_f64(v: f64) -> Self {
                v as $ty
            }
            fn lowest_or_inf() -> Self {
                <$ty>::MIN
            }
            fn highest_or_inf() -> Self {
                <$ty>::MAX
            }
            fn accumulate(self, next: Self) -> Self {
                self.wrapping_add(next)
            }

            impl_storage_access!($variant);
        }
    };
}

impl_with_dtype_int!(u8, U8);
impl_with_dtype_int!(i8, I8);
impl_with_dtype_int!(i16, I16);
impl_with_dtype_int!(i32, I32);
impl_with_dtype_int!(i64, I64);

impl WithDType for f32 {
    const DTYPE: DType = DType::F32;
    type SumAccum = f32;

    fn to_f64(self) -> f64 {
        self as f64
    }
    fn from_f64(v: f64) -> Self {
        v as f32
    }
    fn is_nan(self) -> bool {
        f32::is_nan(self)
    }
    fn lowest_or_inf() -> Self {
        f32::NEG_INFINITY
    }
    fn highest_or_inf() -> Self {
        f32::INFINITY
    }
    fn accumulate(self, next: Self) -> Self {
        self + next
    }

    impl_storage_access!(F32);
}

impl WithDType for f64 {
    const DTYPE: DType = DType::F64;
    type SumAccum = f64;

    fn to_f64(self) -> f64 {
        self
    }
    fn from_f64(v: f64) -> Self {
        v
    }
    fn is_nan(self) -> bool {
        f64::is_nan(self)
    }
    fn lowest_or_inf() -> Self {
        f64::NEG_INFINITY
    }
    fn highest_or_inf() -> Self {
        f64::INFINITY
    }
    fn accumulate(self, next: Self) -> Self {
        self + next
    }

    impl_storage_access!(F64);
}

// Half floats accumulate sums in f32 and are cast down once at the end.

impl WithDType for f16 {
    const DTYPE: DType = DType::F16;
    type SumAccum = f32;

    fn to_f64(self) -> f64 {
        self.to_f32() as f64
    }
    fn from_f64(v: f64) -> Self {
        f16::from_f64(v)
    }
    fn is_nan(self) -> bool {
        f16::is_nan(self)
    }
    fn lowest_or_inf() -> Self {
        f16::NEG_INFINITY
    }
    fn highest_or_inf() -> Self {
        f16::INFINITY
    }
    fn accumulate(self, next: Self) -> Self {
        self + next
    }

    impl_storage_access!(F16);
}

impl WithDType for bf16 {
    const DTYPE: DType = DType::BF16;
    type SumAccum = f32;

    fn to_f64(self) -> f64 {
        self.to_f32() as f64
    }
    fn from_f64(v: f64) -> Self {
        bf16::from_f64(v)
    }
    fn is_nan(self) -> bool {
        bf16::is_nan(self)
    }
    fn lowest_or_inf() -> Self {
        bf16::NEG_INFINITY
    }
    fn highest_or_inf() -> Self {
        bf16::INFINITY
    }
    fn accumulate(self, next: Self) -> Self {
        self + next
    }

    impl_storage_access!(BF16);
}

/// Instantiate `$body` with `$T` bound to the Rust type behind a runtime dtype.
///
/// ```
/// use tessera_core::{dispatch_dtype, DType, WithDType};
///
/// let bytes = dispatch_dtype!(DType::F32, T => std::mem::size_of::<T>());
/// assert_eq!(bytes, 4);
/// ```
#[macro_export]
macro_rules! dispatch_dtype {
    ($dtype:expr, $T:ident => $body:expr) => {
        match $dtype {
            $crate::DType::U8 => {
                type $T = u8;
                $body
            }
            $crate::DType::I8 => {
                type $T = i8;
                $body
            }
            $crate::DType::I16 => {
                type $T = i16;
                $body
            }
            $crate::DType::I32 => {
                type $T = i32;
                $body
            }
            $crate::DType::I64 => {
                type $T = i64;
                $body
            }
            $crate::DType::F16 => {
                type $T = $crate::half::f16;
                $body
            }
            $crate::DType::BF16 => {
                type $T = $crate::half::bf16;
                $body
            }
            $crate::DType::F32 => {
                type $T = f32;
                $body
            }
            $crate::DType::F64 => {
                type $T = f64;
                $body
            }
        }
    };
}
