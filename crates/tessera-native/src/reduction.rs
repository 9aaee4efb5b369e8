use std::marker::PhantomData;

use tessera_core::{
    cast, dispatch_dtype, Array, Axes, DType, ReductionKernel, Result, WithDType,
};

use crate::config::NativeConfig;
use crate::reduce::{reduce, ReductionImpl};

// Native reductions
//
// Each reduction is a ReductionImpl (the numeric policy) plus a kernel that
// turns the runtime dtype of its arrays into a concrete instantiation.
//
//   argmax / argmin   (value, index) accumulator, index -1 until the first
//                     element; strict comparison so ties keep the earliest.
//   sum               input and output dtypes chosen independently; the
//                     accumulator is the output's `SumAccum` (f32 for halves).
//   amax / amin       NaN, once seen, is the result.

struct ArgMaxImpl<T>(PhantomData<T>);

impl<T: WithDType> ReductionImpl for ArgMaxImpl<T> {
    type In = T;
    type Out = i64;
    type Accum = (T, i64);

    const ALLOW_KEEPDIMS: bool = false;
    const ALLOW_EMPTY: bool = false;

    fn identity(&self) -> (T, i64) {
        (T::zero(), -1)
    }

    fn map_in(&self, value: T, index: i64) -> (T, i64) {
        (value, index)
    }

    fn reduce(&self, next: (T, i64), accum: &mut (T, i64)) {
        if accum.1 < 0 || accum.0 < next.0 {
            *accum = next;
        }
    }

    fn map_out(&self, accum: (T, i64)) -> i64 {
        accum.1
    }
}

struct ArgMinImpl<T>(PhantomData<T>);

impl<T: WithDType> ReductionImpl for ArgMinImpl<T> {
    type In = T;
    type Out = i64;
    type Accum = (T, i64);

    const ALLOW_KEEPDIMS: bool = false;
    const ALLOW_EMPTY: bool = false;

    fn identity(&self) -> (T, i64) {
        (T::zero(), -1)
    }

    fn map_in(&self, value: T, index: i64) -> (T, i64) {
        (value, index)
    }

    fn reduce(&self, next: (T, i64), accum: &mut (T, i64)) {
        if accum.1 < 0 || accum.0 > next.0 {
            *accum = next;
        }
    }

    fn map_out(&self, accum: (T, i64)) -> i64 {
        accum.1
    }
}

struct SumImpl<I, O>(PhantomData<(I, O)>);

impl<I: WithDType, O: WithDType> ReductionImpl for SumImpl<I, O> {
    type In = I;
    type Out = O;
    type Accum = O::SumAccum;

    fn identity(&self) -> O::SumAccum {
        <O::SumAccum as WithDType>::zero()
    }

    fn map_in(&self, value: I, _index: i64) -> O::SumAccum {
        cast(value)
    }

    fn reduce(&self, next: O::SumAccum, accum: &mut O::SumAccum) {
        *accum = accum.accumulate(next);
    }

    fn map_out(&self, accum: O::SumAccum) -> O {
        cast(accum)
    }
}

struct AMaxImpl<T>(PhantomData<T>);

impl<T: WithDType> ReductionImpl for AMaxImpl<T> {
    type In = T;
    type Out = T;
    type Accum = T;

    fn identity(&self) -> T {
        T::lowest_or_inf()
    }

    fn map_in(&self, value: T, _index: i64) -> T {
        value
    }

    fn reduce(&self, next: T, accum: &mut T) {
        if next.is_nan() || *accum < next {
            *accum = next;
        }
    }

    fn map_out(&self, accum: T) -> T {
        accum
    }
}

struct AMinImpl<T>(PhantomData<T>);

impl<T: WithDType> ReductionImpl for AMinImpl<T> {
    type In = T;
    type Out = T;
    type Accum = T;

    fn identity(&self) -> T {
        T::highest_or_inf()
    }

    fn map_in(&self, value: T, _index: i64) -> T {
        value
    }

    fn reduce(&self, next: T, accum: &mut T) {
        if next.is_nan() || *accum > next {
            *accum = next;
        }
    }

    fn map_out(&self, accum: T) -> T {
        accum
    }
}

/// Index of the maximum over the reduced axes, as i64.
#[derive(Debug, Clone, Default)]
pub struct NativeArgMax {
    config: NativeConfig,
}

impl NativeArgMax {
    pub fn new(config: NativeConfig) -> Self {
        Self { config }
    }
}

impl ReductionKernel for NativeArgMax {
    fn call(&self, a: &Array, axes: &Axes, out: &Array) -> Result<()> {
        dispatch_dtype!(a.dtype(), T => {
            reduce(a, axes, out, &ArgMaxImpl::<T>(PhantomData), &self.config)
        })
    }
}

/// Index of the minimum over the reduced axes, as i64.
#[derive(Debug, Clone, Default)]
pub struct NativeArgMin {
    config: NativeConfig,
}

impl NativeArgMin {
    pub fn new(config: NativeConfig) -> Self {
        Self { config }
    }
}

impl ReductionKernel for NativeArgMin {
    fn call(&self, a: &Array, axes: &Axes, out: &Array) -> Result<()> {
        dispatch_dtype!(a.dtype(), T => {
            reduce(a, axes, out, &ArgMinImpl::<T>(PhantomData), &self.config)
        })
    }
}

/// Sum over the reduced axes. The output dtype may differ from the input's.
#[derive(Debug, Clone, Default)]
pub struct NativeSum {
    config: NativeConfig,
}

impl NativeSum {
    pub fn new(config: NativeConfig) -> Self {
        Self { config }
    }
}

impl ReductionKernel for NativeSum {
    fn call(&self, a: &Array, axes: &Axes, out: &Array) -> Result<()> {
        let (in_dtype, out_dtype): (DType, DType) = (a.dtype(), out.dtype());
        dispatch_dtype!(out_dtype, O => {
            dispatch_dtype!(in_dtype, I => {
                reduce(a, axes, out, &SumImpl::<I, O>(PhantomData), &self.config)
            })
        })
    }
}

/// Maximum over the reduced axes, NaN-propagating.
#[derive(Debug, Clone, Default)]
pub struct NativeAMax {
    config: NativeConfig,
}

impl NativeAMax {
    pub fn new(config: NativeConfig) -> Self {
        Self { config }
    }
}

impl ReductionKernel for NativeAMax {
    fn call(&self, a: &Array, axes: &Axes, out: &Array) -> Result<()> {
        dispatch_dtype!(a.dtype(), T => {
            reduce(a, axes, out, &AMaxImpl::<T>(PhantomData), &self.config)
        })
    }
}

/// Minimum over the reduced axes, NaN-propagating.
#[derive(Debug, Clone, Default)]
pub struct NativeAMin {
    config: NativeConfig,
}

impl NativeAMin {
    pub fn new(config: NativeConfig) -> Self {
        Self { config }
    }
}

impl ReductionKernel for NativeAMin {
    fn call(&self, a: &Array, axes: &Axes, out: &Array) -> Result<()> {
        dispatch_dtype!(a.dtype(), T => {
            reduce(a, axes, out, &AMinImpl::<T>(PhantomData), &self.config)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::half::f16;
    use tessera_core::Device;

    fn matrix() -> Array {
        Array::from_vec(vec![3.0f32, 1.0, 2.0, 4.0, 5.0, 0.0], (3, 2), &Device::Native).unwrap()
    }

    fn axes0() -> Axes {
        Axes::new(&[0], 2).unwrap()
    }

    #[test]
    fn test_argmax_axis0() {
        let out = Array::zeros(2, DType::I64, &Device::Native).unwrap();
        NativeArgMax::default().call(&matrix(), &axes0(), &out).unwrap();
        assert_eq!(out.to_vec::<i64>().unwrap(), vec![2, 1]);
    }

    #[test]
    fn test_argmin_axis0() {
        let out = Array::zeros(2, DType::I64, &Device::Native).unwrap();
        NativeArgMin::default().call(&matrix(), &axes0(), &out).unwrap();
        assert_eq!(out.to_vec::<i64>().unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_sum_axis0() {
        let out = Array::zeros(2, DType::F32, &Device::Native).unwrap();
        NativeSum::default().call(&matrix(), &axes0(), &out).unwrap();
        assert_eq!(out.to_vec::<f32>().unwrap(), vec![10.0, 5.0]);
    }

    #[test]
    fn test_sum_into_wider_dtype() {
        let a = Array::from_vec(vec![i8::MAX, i8::MAX], 2, &Device::Native).unwrap();
        let out = Array::zeros((), DType::I64, &Device::Native).unwrap();
        NativeSum::default()
            .call(&a, &Axes::all(1), &out)
            .unwrap();
        assert_eq!(out.to_vec::<i64>().unwrap(), vec![254]);
    }

    #[test]
    fn test_sum_f16_accumulates_in_f32() {
        // In f16, 2048 + 1 rounds back to 2048 every time.
        let data: Vec<f16> = [2048.0f32, 1.0, 1.0, 1.0, 1.0]
            .iter()
            .map(|&v| f16::from_f32(v))
            .collect();
        let a = Array::from_vec(data, 5, &Device::Native).unwrap();
        let out = Array::zeros((), DType::F16, &Device::Native).unwrap();
        NativeSum::default()
            .call(&a, &Axes::all(1), &out)
            .unwrap();
        assert_eq!(out.to_vec::<f16>().unwrap(), vec![f16::from_f32(2052.0)]);
    }

    #[test]
    fn test_sum_keepdims_and_empty_axis() {
        let a = Array::zeros((2, 0), DType::F64, &Device::Native).unwrap();
        let out = Array::from_vec(vec![7.0f64, 7.0], (2, 1), &Device::Native).unwrap();
        NativeSum::default()
            .call(&a, &Axes::new(&[1], 2).unwrap(), &out)
            .unwrap();
        assert_eq!(out.to_vec::<f64>().unwrap(), vec![0.0, 0.0]);
    }

    #[test]
    fn test_amax_nan_propagates_anywhere() {
        for pos in 0..3 {
            let mut data = vec![1.0f64, 5.0, 2.0];
            data[pos] = f64::NAN;
            let a = Array::from_vec(data, 3, &Device::Native).unwrap();
            let out = Array::zeros((), DType::F64, &Device::Native).unwrap();
            NativeAMax::default()
                .call(&a, &Axes::all(1), &out)
                .unwrap();
            assert!(out.to_vec::<f64>().unwrap()[0].is_nan(), "NaN at {pos}");
        }
    }

    #[test]
    fn test_amin_integers() {
        let a = Array::from_vec(vec![4i32, -3, 9, -3], (2, 2), &Device::Native).unwrap();
        let out = Array::zeros((2, 1), DType::I32, &Device::Native).unwrap();
        NativeAMin::default()
            .call(&a, &Axes::new(&[1], 2).unwrap(), &out)
            .unwrap();
        assert_eq!(out.to_vec::<i32>().unwrap(), vec![-3, -3]);
    }

    #[test]
    #[should_panic(expected = "invalid reduction")]
    fn test_argmax_rejects_keepdims() {
        let out = Array::zeros((1, 2), DType::I64, &Device::Native).unwrap();
        let _ = NativeArgMax::default().call(&matrix(), &axes0(), &out);
    }

    #[test]
    #[should_panic(expected = "zero-sized axis")]
    fn test_argmax_rejects_empty_axis() {
        let a = Array::zeros((0, 2), DType::F32, &Device::Native).unwrap();
        let out = Array::zeros(2, DType::I64, &Device::Native).unwrap();
        let _ = NativeArgMax::default().call(&a, &axes0(), &out);
    }
}
