//! # Tessera
//!
//! Numeric kernels for n-dimensional arrays, dispatched at runtime over the
//! element type and the device the data lives on.
//!
//! This is the top-level facade crate that re-exports everything you need.
//!
//! ## Usage
//!
//! ```rust
//! use tessera::prelude::*;
//!
//! tessera::init().unwrap();
//! let a = Array::from_vec(vec![3i32, 1, 2, 4, 5, 0], (3, 2), &Device::Native).unwrap();
//! let idx = tessera::argmax(&a, Some(&[0])).unwrap();
//! assert_eq!(idx.to_vec::<i64>().unwrap(), vec![2, 1]);
//! ```
//!
//! ## Architecture
//!
//! | Crate | Purpose |
//! |-------|----------|
//! | `tessera-core` | Array, Shape, DType, Layout, kernel registry, routines |
//! | `tessera-native` | CPU reduction engine and kernels, rayon parallelism |
//! | `tessera-cuda` | LU solve and inverse on accelerators (real GPUs behind `cuda`) |

mod config;

pub use config::Config;

/// Re-export core types.
pub use tessera_core::{
    routines::{amax, amin, argmax, argmin, inverse, linear, solve, sum, sum_as},
    Accelerator, Array, BackendKind, DType, Device, Error, KernelRegistry, Layout,
    RegistryBuilder, Result, Shape, WithDType,
};

/// Re-export the native backend.
pub use tessera_native::NativeConfig;

/// Re-export the accelerator backend.
pub use tessera_cuda::EmulatedAccelerator;
#[cfg(feature = "cuda")]
pub use tessera_cuda::CudaAccelerator;

/// Build a registry holding every kernel enabled by `config`.
pub fn default_registry(config: &Config) -> Result<KernelRegistry> {
    let mut builder = KernelRegistry::builder();
    tessera_native::register(&mut builder, &config.native)?;
    if config.accelerator_kernels {
        tessera_cuda::register(&mut builder)?;
    }
    Ok(builder.build())
}

/// Install the default registry process-wide. Idempotent.
pub fn init() -> Result<&'static KernelRegistry> {
    init_with(Config::default())
}

/// Install a registry built from `config`.
///
/// Only the first successful call installs; later calls return the
/// registry already in place and ignore their `config`.
pub fn init_with(config: Config) -> Result<&'static KernelRegistry> {
    if let Some(registry) = KernelRegistry::try_global() {
        log::debug!("kernel registry already installed");
        return Ok(registry);
    }
    Ok(default_registry(&config)?.install())
}

/// Prelude: import this for the most common types.
pub mod prelude {
    pub use crate::{
        amax, amin, argmax, argmin, inverse, linear, solve, sum, sum_as, Array, BackendKind,
        Config, DType, Device, Error, Result, Shape,
    };
}
