//! Backend abstraction - Multi-backend support
//!
//! Supports both CUDA (GPU) and NdArray (CPU) backends with selection at
//! compile time, plus the device-capability probe that picks the
//! optimal-transport solver variant once at startup.

use burn::backend::Autodiff;

// --------------------------------------------------------------------------------
// BACKEND SELECTION: CUDA (preferred) or NdArray (fallback)
// --------------------------------------------------------------------------------

#[cfg(feature = "cuda")]
pub type DefaultBackend = burn_cuda::Cuda;

#[cfg(all(not(feature = "cuda"), feature = "ndarray"))]
pub type DefaultBackend = burn_ndarray::NdArray;

#[cfg(all(not(feature = "cuda"), not(feature = "ndarray")))]
compile_error!("At least one backend (cuda or ndarray) must be enabled!");

/// The default autodiff backend for training
pub type TrainingBackend = Autodiff<DefaultBackend>;

/// Get the default device
pub fn default_device() -> <DefaultBackend as burn::tensor::backend::Backend>::Device {
    <DefaultBackend as burn::tensor::backend::Backend>::Device::default()
}

/// Get a human-readable name for the current backend
pub fn backend_name() -> &'static str {
    #[cfg(feature = "cuda")]
    {
        "CUDA (GPU)"
    }

    #[cfg(all(not(feature = "cuda"), feature = "ndarray"))]
    {
        "NdArray (CPU)"
    }
}

/// Compute capability available to the assignment solver.
///
/// Probed once at startup and injected where needed; never queried ad hoc
/// during training.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceCapability {
    /// A parallel compute device is available; use the tensor solver.
    Accelerated,
    /// CPU only; use the host-precision solver.
    HostOnly,
}

impl DeviceCapability {
    /// Detect the capability of the compiled backend.
    pub fn detect() -> Self {
        if cfg!(feature = "cuda") {
            DeviceCapability::Accelerated
        } else {
            DeviceCapability::HostOnly
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_name_nonempty() {
        assert!(!backend_name().is_empty());
    }

    #[test]
    #[cfg(not(feature = "cuda"))]
    fn test_cpu_capability() {
        assert_eq!(DeviceCapability::detect(), DeviceCapability::HostOnly);
    }
}
