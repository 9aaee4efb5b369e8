// CUDA Backend Tests — solve and inverse on a real NVIDIA device
//
// Run with: `cargo test -p tessera-cuda --features cuda`
//
// Every test opens CudaAccelerator(0).

#![cfg(feature = "cuda")]

use std::sync::Arc;

use tessera_core::{Accelerator, Array, DType, Device, Error, InverseKernel, SolveKernel};
use tessera_cuda::{CudaAccelerator, CudaInverseKernel, CudaSolveKernel};

fn gpu() -> Device {
    let accel = CudaAccelerator::new(0).expect("CUDA device 0 not available — skip CUDA tests");
    Device::accelerator(Arc::new(accel) as Arc<dyn Accelerator>)
}

fn assert_approx_vec(actual: &[f64], expected: &[f64], tol: f64) {
    assert_eq!(actual.len(), expected.len(), "length mismatch");
    for (i, (a, e)) in actual.iter().zip(expected.iter()).enumerate() {
        assert!((a - e).abs() < tol, "index {i}: {a} != {e} (tol={tol})");
    }
}

// ─────────────────────────────────────────────────────────────────────
// Memory
// ─────────────────────────────────────────────────────────────────────

#[test]
fn test_round_trip_through_device() {
    let dev = gpu();
    let a = Array::from_vec(vec![1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0], (2, 3), &dev).unwrap();
    assert_eq!(a.to_vec::<f32>().unwrap(), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    let t = a.t().unwrap();
    assert_eq!(t.to_vec::<f32>().unwrap(), vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
}

// ─────────────────────────────────────────────────────────────────────
// Solve
// ─────────────────────────────────────────────────────────────────────

#[test]
fn test_solve_diagonal() {
    let dev = gpu();
    let a = Array::from_vec(vec![2.0f64, 0.0, 0.0, 2.0], (2, 2), &dev).unwrap();
    let b = Array::from_vec(vec![4.0f64, 6.0], 2, &dev).unwrap();
    let out = Array::zeros(2, DType::F64, &dev).unwrap();
    CudaSolveKernel.call(&a, &b, &out).unwrap();
    assert_approx_vec(&out.to_f64_vec().unwrap(), &[2.0, 3.0], 1e-12);
}

#[test]
fn test_solve_matrix_rhs_f32() {
    let dev = gpu();
    let a = Array::from_vec(vec![2.0f32, 1.0, 1.0, 3.0], (2, 2), &dev).unwrap();
    let b = Array::from_vec(vec![1.0f32, 2.0, 3.0, 4.0], (2, 2), &dev).unwrap();
    let out = Array::zeros((2, 2), DType::F32, &dev).unwrap();
    CudaSolveKernel.call(&a, &b, &out).unwrap();
    assert_approx_vec(&out.to_f64_vec().unwrap(), &[0.0, 0.4, 1.0, 1.2], 1e-5);
}

#[test]
fn test_solve_singular() {
    let dev = gpu();
    let a = Array::from_vec(vec![1.0f64, 1.0, 1.0, 1.0], (2, 2), &dev).unwrap();
    let b = Array::from_vec(vec![1.0f64, 2.0], 2, &dev).unwrap();
    let out = Array::zeros(2, DType::F64, &dev).unwrap();
    let err = CudaSolveKernel.call(&a, &b, &out).unwrap_err();
    assert!(matches!(err, Error::FactorizationFailed { info: 2 }), "{err}");
}

// ─────────────────────────────────────────────────────────────────────
// Inverse
// ─────────────────────────────────────────────────────────────────────

#[test]
fn test_inverse() {
    let dev = gpu();
    let a = Array::from_vec(vec![4.0f64, 7.0, 2.0, 6.0], (2, 2), &dev).unwrap();
    let out = Array::zeros((2, 2), DType::F64, &dev).unwrap();
    CudaInverseKernel::default().call(&a, &out).unwrap();
    assert_approx_vec(&out.to_f64_vec().unwrap(), &[0.6, -0.7, -0.2, 0.4], 1e-12);
}
