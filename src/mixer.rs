//! Image Mixer Variant and Factory
//!
//! The mixer is a tagged variant over the two backends so call sites
//! monomorphize instead of going through a vtable. Every capability of
//! the visitor API is one match.

use crate::cpu::CpuImageMixer;
use crate::errors::Result;
use crate::frame::pixel_format::PixelFormatDesc;
use crate::frame::transform::{BlendMode, FrameTransform};
use crate::frame::{Frame, VideoFormat};
use crate::gpu::GpuImageMixer;
use crate::settings::{AcceleratorPath, MixerSettings};
use crate::util::future::FrameFuture;

/// An image mixer backed by either the GPU path or the CPU fallback.
pub enum ImageMixer {
    Cpu(CpuImageMixer),
    Gpu(GpuImageMixer),
}

impl ImageMixer {
    /// Open a new layer with the given blend mode.
    pub fn begin_layer(&mut self, blend_mode: BlendMode) {
        match self {
            Self::Cpu(mixer) => mixer.begin_layer(blend_mode),
            Self::Gpu(mixer) => mixer.begin_layer(blend_mode),
        }
    }

    /// Close the current layer.
    pub fn end_layer(&mut self) {
        match self {
            Self::Cpu(mixer) => mixer.end_layer(),
            Self::Gpu(mixer) => mixer.end_layer(),
        }
    }

    /// Compose a transform onto the stack.
    pub fn push(&mut self, transform: &FrameTransform) {
        match self {
            Self::Cpu(mixer) => mixer.push(transform),
            Self::Gpu(mixer) => mixer.push(transform),
        }
    }

    /// Pop the transform stack.
    pub fn pop(&mut self) {
        match self {
            Self::Cpu(mixer) => mixer.pop(),
            Self::Gpu(mixer) => mixer.pop(),
        }
    }

    /// Record a frame under the current transform.
    pub fn visit(&mut self, frame: &Frame) {
        match self {
            Self::Cpu(mixer) => mixer.visit(frame),
            Self::Gpu(mixer) => mixer.visit(frame),
        }
    }

    /// Compose everything recorded since the last render into one
    /// output raster.
    pub fn render(&mut self, format: &VideoFormat) -> Result<FrameFuture> {
        match self {
            Self::Cpu(mixer) => mixer.render(format),
            Self::Gpu(mixer) => mixer.render(format),
        }
    }

    /// Allocate a zeroed frame matching the descriptor.
    #[must_use]
    pub fn create_frame(&self, desc: PixelFormatDesc) -> Frame {
        match self {
            Self::Cpu(mixer) => mixer.create_frame(desc),
            Self::Gpu(mixer) => mixer.create_frame(desc),
        }
    }

    #[must_use]
    pub fn is_gpu(&self) -> bool {
        matches!(self, Self::Gpu(_))
    }
}

/// Build a mixer per the configured accelerator path.
///
/// GPU bring-up failure falls back to the CPU path; when the GPU was
/// requested explicitly the failure is logged as an error rather than
/// silently swallowed.
#[must_use]
pub fn create_image_mixer(settings: &MixerSettings) -> ImageMixer {
    if settings.accelerator != AcceleratorPath::Cpu {
        match GpuImageMixer::new(settings.clone()) {
            Ok(mixer) => return ImageMixer::Gpu(mixer),
            Err(err) => {
                if settings.accelerator == AcceleratorPath::Gpu {
                    log::error!("GPU image mixer unavailable: {err}");
                } else {
                    log::warn!("GPU image mixer unavailable, using CPU fallback: {err}");
                }
            }
        }
    }

    ImageMixer::Cpu(CpuImageMixer::new())
}
