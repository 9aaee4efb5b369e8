// Accelerator backend — LU-based solve and inverse kernels
//
// The kernels in `solve` only talk to an `Accelerator`: memory, copies, a
// transpose, and the getrf/getrs pair. Two accelerators implement it:
//
// - `EmulatedAccelerator` (always built) keeps device memory in host buffers
//   and runs the LU routines on the CPU. It tracks allocations and device
//   selection so the pipeline can be tested without a GPU.
// - `CudaAccelerator` (feature `cuda`) drives an NVIDIA device through
//   cudarc: driver API for memory, cuBLAS for the transpose, cuSOLVER for
//   the factorization.
//
// USAGE:
//   let mut builder = KernelRegistry::builder();
//   tessera_cuda::register(&mut builder)?;
//   let gpu = Device::accelerator(Arc::new(CudaAccelerator::new(0)?));

pub mod emulated;
pub mod solve;

#[cfg(feature = "cuda")]
pub mod cuda;

#[cfg(feature = "cuda")]
pub use cuda::CudaAccelerator;
pub use emulated::{EmulatedAccelerator, MemoryStats};
pub use solve::{CudaInverseKernel, CudaSolveKernel};

use tessera_core::{BackendKind, InverseOp, RegistryBuilder, Result, SolveOp};

/// Register the solve and inverse kernels under [`BackendKind::Cuda`].
pub fn register(builder: &mut RegistryBuilder) -> Result<()> {
    builder.register::<SolveOp>(BackendKind::Cuda, Box::new(CudaSolveKernel))?;
    builder.register::<InverseOp>(BackendKind::Cuda, Box::new(CudaInverseKernel::default()))?;
    log::debug!("cuda backend registered");
    Ok(())
}
