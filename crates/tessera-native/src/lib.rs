//! # tessera-native
//!
//! Native (CPU) backend for Tessera.
//!
//! This crate provides:
//! - [`reduce`](reduce::reduce) — the generic reduction engine, driven by a
//!   [`ReductionImpl`](reduce::ReductionImpl) of four hooks
//! - argmax, argmin, sum, amax and amin kernels built on it
//! - a dense `x · Wᵀ + b` kernel
//!
//! [`register`] adds every kernel to a registry under [`BackendKind::Native`].

pub mod config;
pub mod linear;
pub mod reduce;
pub mod reduction;

pub use config::NativeConfig;
pub use linear::NativeLinear;
pub use reduction::{NativeAMax, NativeAMin, NativeArgMax, NativeArgMin, NativeSum};

use tessera_core::{
    AMaxOp, AMinOp, ArgMaxOp, ArgMinOp, BackendKind, LinearOp, RegistryBuilder, Result, SumOp,
};

/// Register every native kernel.
pub fn register(builder: &mut RegistryBuilder, config: &NativeConfig) -> Result<()> {
    let backend = BackendKind::Native;
    builder.register::<ArgMaxOp>(backend, Box::new(NativeArgMax::new(config.clone())))?;
    builder.register::<ArgMinOp>(backend, Box::new(NativeArgMin::new(config.clone())))?;
    builder.register::<SumOp>(backend, Box::new(NativeSum::new(config.clone())))?;
    builder.register::<AMaxOp>(backend, Box::new(NativeAMax::new(config.clone())))?;
    builder.register::<AMinOp>(backend, Box::new(NativeAMin::new(config.clone())))?;
    builder.register::<LinearOp>(backend, Box::new(NativeLinear))?;
    log::debug!("native backend registered (parallel threshold {})", config.parallel_threshold);
    Ok(())
}
