//! # tessera-core
//!
//! Arrays, dtypes, the accelerator interface and the kernel registry for Tessera.
//!
//! This crate provides:
//! - [`Array`] — a strided view of a host or device buffer
//! - [`Shape`] / [`Layout`] / [`Axes`] — shapes, strides and reduction axes
//! - [`DType`] / [`WithDType`] — runtime element types and their Rust types
//! - [`Accelerator`] — the device interface GPU kernels are written against
//! - [`KernelRegistry`] — per-(operation, backend) kernel dispatch
//! - [`routines`] — validated entry points that dispatch through the registry

pub mod accelerator;
pub mod array;
pub mod device;
pub mod dtype;
pub mod error;
pub mod kernel;
pub mod layout;
pub mod registry;
pub mod routines;
pub mod shape;
pub mod storage;

pub use half;

pub use accelerator::{Accelerator, DeviceBuffer, DevicePtr, DeviceScope, DeviceSelection};
pub use array::Array;
pub use device::{BackendKind, Device};
pub use dtype::{cast, DType, WithDType};
pub use error::{Error, Result};
pub use kernel::{
    AMaxOp, AMinOp, ArgMaxOp, ArgMinOp, InverseKernel, InverseOp, LinearKernel, LinearOp, Op,
    ReductionKernel, SolveKernel, SolveOp, SumOp,
};
pub use layout::Layout;
pub use registry::{KernelRegistry, RegistryBuilder};
pub use shape::{Axes, Shape};
pub use storage::{HostStorage, Storage};
