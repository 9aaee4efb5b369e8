// Linear — y = x · Wᵀ + b
//
//   x: [batch, in_features]
//   W: [out_features, in_features]
//   b: [out_features] (optional)
//   y: [batch, out_features]
//
// Floating-point only. Products are accumulated in f64 and rounded to the
// output dtype once per element. Rows of the output are independent and are
// computed on the rayon pool.

use rayon::prelude::*;

use tessera_core::half::{bf16, f16};
use tessera_core::{Array, DType, Device, Error, LinearKernel, LinearOp, Op, Result, WithDType};

use crate::reduce::write_logical;

#[derive(Debug, Clone, Copy, Default)]
pub struct NativeLinear;

impl LinearKernel for NativeLinear {
    fn supports_dtype(&self, dtype: DType) -> bool {
        dtype.is_float()
    }

    fn call(&self, x: &Array, w: &Array, b: Option<&Array>, out: &Array) -> Result<()> {
        Device::Native.check_compatible(&[x, w, out])?;
        if let Some(b) = b {
            Device::Native.check_compatible(&[b])?;
        }

        assert!(x.rank() == 2 && w.rank() == 2, "linear expects matrices");
        let (batch, in_features) = (x.dims()[0], x.dims()[1]);
        let out_features = w.dims()[0];
        assert_eq!(w.dims()[1], in_features, "inner dimensions differ");
        assert_eq!(out.dims(), &[batch, out_features], "output shape");
        assert!(w.dtype() == x.dtype() && out.dtype() == x.dtype(), "dtypes differ");
        if let Some(b) = b {
            assert_eq!(b.dims(), &[out_features], "bias shape");
            assert_eq!(b.dtype(), x.dtype(), "bias dtype");
        }
        for input in [Some(x), Some(w), b].into_iter().flatten() {
            assert!(!input.shares_storage(out), "linear output aliases an input");
        }

        match x.dtype() {
            DType::F16 => linear_impl::<f16>(x, w, b, out),
            DType::BF16 => linear_impl::<bf16>(x, w, b, out),
            DType::F32 => linear_impl::<f32>(x, w, b, out),
            DType::F64 => linear_impl::<f64>(x, w, b, out),
            dtype => Err(Error::UnsupportedDType {
                dtype,
                op: LinearOp::NAME,
            }),
        }
    }
}

fn linear_impl<T: WithDType>(x: &Array, w: &Array, b: Option<&Array>, out: &Array) -> Result<()> {
    let in_features = x.dims()[1];
    let out_features = w.dims()[0];
    let xs: Vec<f64> = x.to_vec::<T>()?.into_iter().map(|v| v.to_f64()).collect();
    let ws: Vec<f64> = w.to_vec::<T>()?.into_iter().map(|v| v.to_f64()).collect();
    let bias: Option<Vec<f64>> = match b {
        Some(b) => Some(b.to_vec::<T>()?.into_iter().map(|v| v.to_f64()).collect()),
        None => None,
    };

    let mut ys = vec![T::zero(); out.elem_count()];
    if out_features > 0 {
        ys.par_chunks_mut(out_features)
            .enumerate()
            .for_each(|(i, row)| {
                let xi = &xs[i * in_features..(i + 1) * in_features];
                for (j, y) in row.iter_mut().enumerate() {
                    let wj = &ws[j * in_features..(j + 1) * in_features];
                    let mut acc: f64 = xi.iter().zip(wj).map(|(a, b)| a * b).sum();
                    if let Some(bias) = &bias {
                        acc += bias[j];
                    }
                    *y = T::from_f64(acc);
                }
            });
    }
    write_logical(out, &ys)
}
