// Dispatch Tests — routines end to end through the process-wide registry
//
// Every test calls `tessera::init()` first; the registry is installed once
// per test binary and shared by all tests.

use std::sync::Arc;

use tessera::prelude::*;
use tessera::{Accelerator, Config, EmulatedAccelerator, KernelRegistry};

fn host<T: tessera::WithDType>(data: Vec<T>, shape: impl Into<Shape>) -> Array {
    Array::from_vec(data, shape, &Device::Native).unwrap()
}

fn emulated() -> (Arc<EmulatedAccelerator>, Device) {
    let accel = Arc::new(EmulatedAccelerator::new(0));
    let device = Device::accelerator(accel.clone() as Arc<dyn Accelerator>);
    (accel, device)
}

fn approx(a: f64, b: f64, tol: f64) -> bool {
    (a - b).abs() < tol
}

// ─────────────────────────────────────────────────────────────────────────────
// Initialization
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn init_is_idempotent() {
    let first = tessera::init().unwrap();
    let second = tessera::init_with(Config::default().with_accelerator_kernels(false)).unwrap();
    assert!(std::ptr::eq(first, second));
    assert!(std::ptr::eq(first, KernelRegistry::global().unwrap()));
}

#[test]
fn default_registry_holds_every_kernel() {
    let registry = tessera::default_registry(&Config::default()).unwrap();
    assert_eq!(
        registry.entries(),
        vec![
            ("amax", BackendKind::Native),
            ("amin", BackendKind::Native),
            ("argmax", BackendKind::Native),
            ("argmin", BackendKind::Native),
            ("inverse", BackendKind::Cuda),
            ("linear", BackendKind::Native),
            ("solve", BackendKind::Cuda),
            ("sum", BackendKind::Native),
        ]
    );

    let native_only = tessera::default_registry(&Config::default().with_accelerator_kernels(false))
        .unwrap();
    assert_eq!(native_only.len(), 6);
}

// ─────────────────────────────────────────────────────────────────────────────
// Reductions
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn reductions_over_rows() {
    tessera::init().unwrap();
    let a = host(vec![3i32, 1, 2, 4, 5, 0], (3, 2));
    assert_eq!(argmax(&a, Some(&[0])).unwrap().to_vec::<i64>().unwrap(), vec![2, 1]);
    assert_eq!(argmin(&a, Some(&[0])).unwrap().to_vec::<i64>().unwrap(), vec![1, 2]);
    assert_eq!(sum(&a, Some(&[0]), false).unwrap().to_vec::<i32>().unwrap(), vec![10, 5]);
    assert_eq!(amax(&a, Some(&[1]), false).unwrap().to_vec::<i32>().unwrap(), vec![3, 4, 5]);
    assert_eq!(amin(&a, Some(&[1]), false).unwrap().to_vec::<i32>().unwrap(), vec![1, 2, 0]);
}

#[test]
fn reducing_every_axis_gives_a_scalar() {
    tessera::init().unwrap();
    let a = host(vec![3i32, 1, 2, 4, 5, 0], (3, 2));
    let idx = argmax(&a, None).unwrap();
    assert_eq!(idx.rank(), 0);
    assert_eq!(idx.to_vec::<i64>().unwrap(), vec![4]);
    let total = sum(&a, None, true).unwrap();
    assert_eq!(total.dims(), &[1, 1]);
    assert_eq!(total.to_vec::<i32>().unwrap(), vec![15]);
}

#[test]
fn sum_as_widens_the_output() {
    tessera::init().unwrap();
    let a = host(vec![200u8, 100, 50], 3);
    let s = sum_as(&a, None, false, DType::I64).unwrap();
    assert_eq!(s.dtype(), DType::I64);
    assert_eq!(s.to_vec::<i64>().unwrap(), vec![350]);
}

#[test]
fn empty_reductions() {
    tessera::init().unwrap();
    let a = Array::zeros((2, 0), DType::F32, &Device::Native).unwrap();
    assert!(matches!(amax(&a, Some(&[1]), false), Err(Error::EmptyReduction { axis: 1 })));
    assert!(matches!(argmin(&a, Some(&[1])), Err(Error::EmptyReduction { axis: 1 })));
    let s = sum(&a, Some(&[1]), false).unwrap();
    assert_eq!(s.to_vec::<f32>().unwrap(), vec![0.0, 0.0]);
}

#[test]
fn amin_propagates_nan() {
    tessera::init().unwrap();
    let a = host(vec![1.0f64, f64::NAN, -3.0, 2.0], (2, 2));
    let out = amin(&a, Some(&[1]), false).unwrap().to_vec::<f64>().unwrap();
    assert!(out[0].is_nan());
    assert_eq!(out[1], -3.0);
}

#[test]
fn reductions_are_not_registered_for_accelerators() {
    tessera::init().unwrap();
    let (_, dev) = emulated();
    let a = Array::from_vec(vec![1.0f32, 2.0], 2, &dev).unwrap();
    assert!(matches!(
        argmax(&a, None),
        Err(Error::UnimplementedForBackend {
            op: "argmax",
            backend: BackendKind::Cuda
        })
    ));
}

// ─────────────────────────────────────────────────────────────────────────────
// Solve / inverse
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn solve_on_native_is_unimplemented_every_time() {
    tessera::init().unwrap();
    let a = host(vec![2.0f64, 0.0, 0.0, 2.0], (2, 2));
    let b = host(vec![4.0f64, 6.0], 2);
    for _ in 0..3 {
        assert!(matches!(
            solve(&a, &b),
            Err(Error::UnimplementedForBackend {
                op: "solve",
                backend: BackendKind::Native
            })
        ));
    }
    assert!(matches!(
        inverse(&a),
        Err(Error::UnimplementedForBackend {
            op: "inverse",
            backend: BackendKind::Native
        })
    ));
}

#[test]
fn solve_and_inverse_on_emulated_device() {
    tessera::init().unwrap();
    let (accel, dev) = emulated();
    let a = Array::from_vec(vec![4.0f64, 7.0, 2.0, 6.0], (2, 2), &dev).unwrap();
    let b = Array::from_vec(vec![1.0f64, 0.0], 2, &dev).unwrap();

    let solution = solve(&a, &b).unwrap();
    assert_eq!(solution.device(), &dev);
    let x = solution.to_vec::<f64>().unwrap();
    drop(solution);
    assert!(approx(x[0], 0.6, 1e-12) && approx(x[1], -0.2, 1e-12), "{x:?}");

    let inv = inverse(&a).unwrap().to_vec::<f64>().unwrap();
    for (got, want) in inv.iter().zip([0.6, -0.7, -0.2, 0.4]) {
        assert!(approx(*got, want, 1e-12), "{inv:?}");
    }
    // Only a and b remain.
    assert_eq!(accel.stats().live_allocations, 2);
}

#[test]
fn unsupported_solve_dtype_allocates_nothing() {
    tessera::init().unwrap();
    let (accel, dev) = emulated();
    let a = Array::from_vec(vec![1i32, 0, 0, 1], (2, 2), &dev).unwrap();
    let b = Array::from_vec(vec![1i32, 1], 2, &dev).unwrap();
    let before = accel.stats().total_allocations;
    assert!(matches!(
        solve(&a, &b),
        Err(Error::UnsupportedDType {
            dtype: DType::I32,
            op: "solve"
        })
    ));
    assert!(matches!(inverse(&a), Err(Error::UnsupportedDType { op: "inverse", .. })));
    assert_eq!(accel.stats().total_allocations, before);
}

#[test]
fn solve_rejects_mixed_devices() {
    tessera::init().unwrap();
    let (_, dev) = emulated();
    let a = Array::from_vec(vec![1.0f64, 0.0, 0.0, 1.0], (2, 2), &dev).unwrap();
    let b = host(vec![1.0f64, 1.0], 2);
    assert!(matches!(solve(&a, &b), Err(Error::DeviceMismatch { .. })));

    let (_, other) = emulated();
    let b = Array::from_vec(vec![1.0f64, 1.0], 2, &other).unwrap();
    assert!(matches!(solve(&a, &b), Err(Error::DeviceMismatch { .. })));
}

// ─────────────────────────────────────────────────────────────────────────────
// Linear
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn linear_with_bias() {
    tessera::init().unwrap();
    let x = host(vec![1.0f32, 2.0, 3.0, 4.0], (2, 2));
    let w = host(vec![1.0f32, 0.0, 0.0, 1.0, 1.0, 1.0], (3, 2));
    let b = host(vec![0.5f32, -0.5, 0.0], 3);
    let y = linear(&x, &w, Some(&b)).unwrap();
    assert_eq!(y.dims(), &[2, 3]);
    assert_eq!(y.to_vec::<f32>().unwrap(), vec![1.5, 1.5, 3.0, 3.5, 3.5, 7.0]);
}

#[test]
fn linear_rejects_integers() {
    tessera::init().unwrap();
    let x = host(vec![1i32, 2], (1, 2));
    let w = host(vec![1i32, 1], (1, 2));
    assert!(matches!(
        linear(&x, &w, None),
        Err(Error::UnsupportedDType {
            dtype: DType::I32,
            op: "linear"
        })
    ));
}
