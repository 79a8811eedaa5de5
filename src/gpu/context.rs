//! WGPU Context
//!
//! Headless device bring-up: instance, adapter, device and queue. The
//! mixer never presents to a surface; composited frames leave through
//! buffer readback.

use crate::errors::{MixerError, Result};
use crate::settings::MixerSettings;

/// Create the headless device. Returns the queue pair and whether
/// 16-bit normalized texture formats were enabled.
pub fn create_device(settings: &MixerSettings) -> Result<(wgpu::Device, wgpu::Queue, bool)> {
    let instance = wgpu::Instance::default();

    let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
        power_preference: wgpu::PowerPreference::HighPerformance,
        compatible_surface: None,
        force_fallback_adapter: false,
    }))
    .map_err(|e| MixerError::DeviceLost(format!("Failed to request adapter: {e}")))?;

    let want_16bit = settings.bit_depth.is_16bit_storage();
    let supports_16bit = adapter
        .features()
        .contains(wgpu::Features::TEXTURE_FORMAT_16BIT_NORM);
    if want_16bit && !supports_16bit {
        log::warn!(
            "Adapter lacks 16-bit normalized texture support; falling back to 8-bit attachments"
        );
    }
    let use_16bit = want_16bit && supports_16bit;

    let required_features = if use_16bit {
        wgpu::Features::TEXTURE_FORMAT_16BIT_NORM
    } else {
        wgpu::Features::empty()
    };

    let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
        label: Some("mixer device"),
        required_features,
        required_limits: wgpu::Limits::default(),
        memory_hints: wgpu::MemoryHints::Performance,
        ..Default::default()
    }))
    .map_err(|e| MixerError::DeviceLost(format!("Failed to create device: {e}")))?;

    log::info!(
        "Initialized GPU image mixer device ({})",
        adapter.get_info().name
    );

    Ok((device, queue, use_16bit))
}
