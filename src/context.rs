//! Device acquisition.
//!
//! A [`GpuContext`] bundles the instance, adapter, device and queue that a
//! single demo run uses for all of its work.  The `new_blocking`
//! constructor hides the asynchronous adapter and device requests behind
//! [`pollster`].  Contexts are never shared between demos; dropping the
//! context releases every device object created through it.

use log::{debug, info};
use wgpu::{Adapter, Device, Features, Instance, Limits, PowerPreference, Queue};

use crate::error::{GpuError, Result};

/// Knobs for [`GpuContext::with_options`].
///
/// `optional_features` are enabled only when the adapter has them;
/// `required_features` fail acquisition with
/// [`GpuError::FeatureUnavailable`] when missing.
#[derive(Debug, Clone)]
pub struct ContextOptions {
    pub power_preference: PowerPreference,
    pub optional_features: Features,
    pub required_features: Features,
    pub limits: Limits,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            power_preference: PowerPreference::HighPerformance,
            optional_features: Features::TIMESTAMP_QUERY,
            required_features: Features::empty(),
            limits: Limits::downlevel_defaults(),
        }
    }
}

/// A GPU context encapsulates all state needed to submit work.
///
/// `Instance`, `Adapter`, `Device` and `Queue` are internally reference
/// counted, so callers may clone them out if they need to.
pub struct GpuContext {
    /// Kept alive for the lifetime of the adapter.
    pub instance: Instance,
    /// The physical device selected for computation.
    pub adapter: Adapter,
    /// Logical device used to create resources and command encoders.
    pub device: Device,
    /// Submission queue for recorded command buffers.
    pub queue: Queue,
}

impl GpuContext {
    /// Acquire a device with [`ContextOptions::default`], blocking the
    /// current thread until the adapter and device requests finish.
    pub fn new_blocking() -> Result<Self> {
        pollster::block_on(Self::new_async())
    }

    /// Asynchronous variant of [`Self::new_blocking`].
    pub async fn new_async() -> Result<Self> {
        Self::with_options(ContextOptions::default()).await
    }

    /// Acquire a device with explicit feature and limit requirements.
    pub async fn with_options(options: ContextOptions) -> Result<Self> {
        let instance = Instance::new(&wgpu::InstanceDescriptor::default());
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: options.power_preference,
                force_fallback_adapter: false,
                compatible_surface: None,
            })
            .await
            .map_err(|e| GpuError::UnsupportedBackend(format!("no suitable adapter: {e}")))?;

        let adapter_info = adapter.get_info();
        info!(
            "selected adapter {} ({:?}, {:?})",
            adapter_info.name, adapter_info.device_type, adapter_info.backend
        );

        // Downlevel backends may lack compute entirely.
        let capabilities = adapter.get_downlevel_capabilities();
        if !capabilities
            .flags
            .contains(wgpu::DownlevelFlags::COMPUTE_SHADERS)
        {
            return Err(GpuError::UnsupportedBackend(
                "adapter does not support compute shaders".into(),
            ));
        }

        let available = adapter.features();
        if !available.contains(options.required_features) {
            return Err(GpuError::FeatureUnavailable(missing_feature_name(
                options.required_features,
                available,
            )));
        }
        let features = options.required_features | (options.optional_features & available);
        debug!("requesting device with features {features:?}");

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("wgpu_by_example_device"),
                required_features: features,
                required_limits: options.limits.using_resolution(adapter.limits()),
                memory_hints: wgpu::MemoryHints::MemoryUsage,
                trace: wgpu::Trace::Off,
            })
            .await
            .map_err(|e| GpuError::UnsupportedBackend(format!("failed to create device: {e}")))?;

        Ok(Self {
            instance,
            adapter,
            device,
            queue,
        })
    }

    /// Whether `feature` was enabled on the device.
    pub fn has_feature(&self, feature: Features) -> bool {
        self.device.features().contains(feature)
    }

    pub fn limits(&self) -> Limits {
        self.device.limits()
    }
}

/// Human-readable name for the first required feature the adapter lacks.
fn missing_feature_name(required: Features, available: Features) -> &'static str {
    const NAMED: [(Features, &str); 3] = [
        (Features::TIMESTAMP_QUERY, "timestamp-query"),
        (Features::BGRA8UNORM_STORAGE, "bgra8unorm-storage"),
        (Features::SHADER_F16, "shader-f16"),
    ];
    NAMED
        .iter()
        .find(|(feature, _)| required.contains(*feature) && !available.contains(*feature))
        .map(|(_, name)| *name)
        .unwrap_or("device feature")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options_only_ask_for_timestamps_optionally() {
        let options = ContextOptions::default();
        assert!(options.required_features.is_empty());
        assert!(options.optional_features.contains(Features::TIMESTAMP_QUERY));
    }

    #[test]
    fn missing_feature_names() {
        assert_eq!(
            missing_feature_name(Features::TIMESTAMP_QUERY, Features::empty()),
            "timestamp-query"
        );
        assert_eq!(
            missing_feature_name(
                Features::TIMESTAMP_QUERY | Features::SHADER_F16,
                Features::TIMESTAMP_QUERY
            ),
            "shader-f16"
        );
        assert_eq!(
            missing_feature_name(Features::empty(), Features::empty()),
            "device feature"
        );
    }
}
