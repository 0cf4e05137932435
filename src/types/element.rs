//! Numeric element types that may be stored in a matrix.

use crate::matrix::{AnyMatrix, Matrix};
use crate::models::DType;

/// Trait for matrix elements.
///
/// Implemented for every type listed in [DType]. The associated constant ties the Rust type to
/// its runtime tag, and the conversion helpers let generic code widen values into the `i64` and
/// `f64` accumulators.
pub trait Element:
    Clone
    + Copy
    + PartialEq
    + PartialOrd
    + num_traits::Zero
    + std::fmt::Debug
    + std::ops::Add<Output = Self>
    + std::ops::AddAssign
    + zerocopy::AsBytes
    + zerocopy::FromBytes
    + Send
    + Sync
    + 'static
{
    /// Runtime tag for this type.
    const DTYPE: DType;

    /// Lossy conversion to `i64` (identity for integers that fit).
    fn as_i64(self) -> i64;

    /// Lossy conversion to `f64`.
    fn as_f64(self) -> f64;

    /// Narrowing conversion from `i64`. Callers check the range first.
    fn from_i64(value: i64) -> Self;

    /// Wrap a typed matrix in the matching [AnyMatrix] variant.
    fn into_any(matrix: Matrix<Self>) -> AnyMatrix;
}

macro_rules! impl_element {
    ($t:ty, $dtype:ident) => {
        impl Element for $t {
            const DTYPE: DType = DType::$dtype;

            fn as_i64(self) -> i64 {
                self as i64
            }

            fn as_f64(self) -> f64 {
                self as f64
            }

            fn from_i64(value: i64) -> Self {
                value as $t
            }

            fn into_any(matrix: Matrix<Self>) -> AnyMatrix {
                AnyMatrix::$dtype(matrix)
            }
        }
    };
}

impl_element!(i8, Int8);
impl_element!(i16, Int16);
impl_element!(i32, Int32);
impl_element!(i64, Int64);
impl_element!(u8, Uint8);
impl_element!(u16, Uint16);
impl_element!(u32, Uint32);
impl_element!(u64, Uint64);
impl_element!(f32, Float32);
impl_element!(f64, Float64);

#[cfg(test)]
mod tests {
    use super::*;

    use ndarray::array;

    #[test]
    fn test_dtype_constants() {
        assert_eq!(DType::Int8, i8::DTYPE);
        assert_eq!(DType::Uint64, u64::DTYPE);
        assert_eq!(DType::Float32, f32::DTYPE);
    }

    #[test]
    fn test_conversions() {
        assert_eq!(-3, (-3_i8).as_i64());
        assert_eq!(255.0, 255_u8.as_f64());
        assert_eq!(200_u8, u8::from_i64(200));
        assert_eq!(-1_i8, i8::from_i64(-1));
    }

    #[test]
    fn test_into_any() {
        let matrix = Matrix::Dense(array![[1_u16, 2], [3, 4]]);
        let any = u16::into_any(matrix.clone());
        assert_eq!(DType::Uint16, any.dtype());
        match any {
            AnyMatrix::Uint16(inner) => assert_eq!(matrix, inner),
            other => panic!("unexpected variant {:?}", other.dtype()),
        }
    }
}
