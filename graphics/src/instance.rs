//! Graphics instance.
//!
//! The [`GraphicsInstance`] owns the GPU backend and creates
//! [`GraphicsDevice`]s on it.

use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::backend::{self, GpuBackend};
use crate::device::{DeviceCapabilities, GraphicsDevice};
use crate::error::GraphicsError;

/// Entry point of the graphics system.
///
/// # Example
///
/// ```ignore
/// let device = GraphicsInstance::new()?.create_device()?;
/// ```
pub struct GraphicsInstance {
    self_ref: Weak<GraphicsInstance>,
    backend: Arc<dyn GpuBackend>,
    devices_created: AtomicUsize,
}

impl GraphicsInstance {
    /// Create an instance on the default backend.
    ///
    /// # Errors
    ///
    /// Returns an error if no backend is enabled.
    pub fn new() -> Result<Arc<Self>, GraphicsError> {
        Ok(Self::with_backend(backend::create_backend()?))
    }

    /// Create an instance on an explicit backend.
    ///
    /// Tests use this to drive a [`DummyBackend`](crate::DummyBackend) in
    /// manual completion mode.
    pub fn with_backend(backend: Arc<dyn GpuBackend>) -> Arc<Self> {
        log::info!("Creating GraphicsInstance (backend: {})", backend.name());
        Arc::new_cyclic(|self_ref| Self {
            self_ref: self_ref.clone(),
            backend,
            devices_created: AtomicUsize::new(0),
        })
    }

    pub(crate) fn backend(&self) -> &Arc<dyn GpuBackend> {
        &self.backend
    }

    /// Name of the adapter devices are created on.
    pub fn adapter_name(&self) -> String {
        format!("{} Adapter", self.backend.name().trim_end_matches(" Backend"))
    }

    /// Create a device with default capabilities.
    pub fn create_device(&self) -> Result<Arc<GraphicsDevice>, GraphicsError> {
        self.create_device_with_capabilities(DeviceCapabilities::default())
    }

    /// Create a device reporting `capabilities`.
    ///
    /// # Errors
    ///
    /// Returns an error if the instance is being dropped.
    pub fn create_device_with_capabilities(
        &self,
        capabilities: DeviceCapabilities,
    ) -> Result<Arc<GraphicsDevice>, GraphicsError> {
        let instance = self.self_ref.upgrade().ok_or_else(|| {
            GraphicsError::InitializationFailed("instance has been dropped".to_string())
        })?;
        let name = self.adapter_name();
        log::info!("Creating device on adapter: {name} ({capabilities:?})");
        self.devices_created.fetch_add(1, Ordering::Relaxed);
        Ok(Arc::new(GraphicsDevice::new(instance, name, capabilities)))
    }

    /// Number of devices created so far.
    pub fn device_count(&self) -> usize {
        self.devices_created.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for GraphicsInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphicsInstance")
            .field("backend", &self.backend.name())
            .field("device_count", &self.device_count())
            .finish()
    }
}

static_assertions::assert_impl_all!(GraphicsInstance: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{CompletionMode, DummyBackend};

    #[test]
    fn test_create_device() {
        let instance = GraphicsInstance::new().unwrap();
        assert_eq!(instance.device_count(), 0);
        let device = instance.create_device().unwrap();
        assert_eq!(device.name(), "Dummy Adapter");
        assert_eq!(instance.device_count(), 1);
        assert!(Arc::ptr_eq(device.instance(), &instance));
    }

    #[test]
    fn test_device_without_compute() {
        let backend = Arc::new(DummyBackend::with_completion(CompletionMode::Manual));
        let instance = GraphicsInstance::with_backend(backend);
        let device = instance
            .create_device_with_capabilities(DeviceCapabilities {
                compute_shaders: false,
                ..Default::default()
            })
            .unwrap();
        assert!(!device.capabilities().compute_shaders);
    }
}
