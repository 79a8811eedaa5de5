//! Frame Data Model
//!
//! Source frames, their pixel-format descriptors and geometry, per-frame
//! transforms, and the output video format.
//!
//! A [`Frame`] is cheaply clonable: plane data is shared between the
//! decoding producer and the mixer stack until the render that consumes
//! it completes.

pub mod color;
pub mod geometry;
pub mod pixel_format;
pub mod transform;

use std::sync::Arc;

use smallvec::SmallVec;

use crate::frame::geometry::FrameGeometry;
use crate::frame::pixel_format::{BitDepth, PixelFormatDesc};
use crate::frame::transform::{FieldMode, ImageTransform};

/// A source frame: shared plane byte arrays plus descriptor and geometry.
#[derive(Clone, Debug)]
pub struct Frame {
    desc: PixelFormatDesc,
    planes: SmallVec<[Arc<[u8]>; 4]>,
    geometry: FrameGeometry,
}

impl Frame {
    /// Build a frame from owned plane buffers.
    #[must_use]
    pub fn from_planes(desc: PixelFormatDesc, planes: Vec<Vec<u8>>, geometry: FrameGeometry) -> Self {
        Self {
            desc,
            planes: planes.into_iter().map(Arc::from).collect(),
            geometry,
        }
    }

    /// Allocate a zeroed frame matching the descriptor, with full-frame
    /// geometry. This is the frame-factory capability of the mixer.
    #[must_use]
    pub fn allocate(desc: PixelFormatDesc) -> Self {
        let planes = desc
            .planes
            .iter()
            .map(|plane| Arc::from(vec![0u8; plane.size]))
            .collect();
        Self {
            desc,
            planes,
            geometry: FrameGeometry::full_frame(),
        }
    }

    #[must_use]
    pub fn pixel_format_desc(&self) -> &PixelFormatDesc {
        &self.desc
    }

    #[must_use]
    pub fn geometry(&self) -> &FrameGeometry {
        &self.geometry
    }

    pub fn set_geometry(&mut self, geometry: FrameGeometry) {
        self.geometry = geometry;
    }

    /// Byte data of plane `index`.
    #[must_use]
    pub fn plane_data(&self, index: usize) -> &[u8] {
        &self.planes[index]
    }

    /// Shared handle to plane `index`, for zero-copy hand-off to the
    /// upload path.
    #[must_use]
    pub fn plane_handle(&self, index: usize) -> Arc<[u8]> {
        Arc::clone(&self.planes[index])
    }

    /// Mutable access to plane `index` while the frame is still
    /// exclusively owned (before any clone was handed out).
    pub fn plane_data_mut(&mut self, index: usize) -> Option<&mut [u8]> {
        Arc::get_mut(&mut self.planes[index])
    }

    #[must_use]
    pub fn plane_count(&self) -> usize {
        self.planes.len()
    }
}

/// Description of the output raster one `render` call produces.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VideoFormat {
    pub width: usize,
    pub height: usize,
    /// `PROGRESSIVE` for one full-frame pass, `UPPER`/`LOWER` for the
    /// field the output device expects first.
    pub field_mode: FieldMode,
}

impl VideoFormat {
    #[must_use]
    pub fn new(width: usize, height: usize, field_mode: FieldMode) -> Self {
        Self {
            width,
            height,
            field_mode,
        }
    }

    #[must_use]
    pub fn is_progressive(&self) -> bool {
        self.field_mode == FieldMode::PROGRESSIVE
    }

    /// Byte size of the composited raster at the given depth.
    #[must_use]
    pub fn size_bytes(&self, depth: BitDepth) -> usize {
        self.width * self.height * 4 * depth.bytes_per_component()
    }

    /// Output aspect ratio used by the vertex matrix to keep rotations
    /// angle-true in non-square rasters.
    #[must_use]
    pub fn aspect_ratio(&self) -> f64 {
        self.width as f64 / self.height as f64
    }
}

/// Whether a still item survives de-jittering for an interlaced output.
///
/// Stills carry the same picture on both fields; rendering one on the
/// field matching the output format's own field order makes it jitter
/// vertically, so such items are dropped and the survivors are rendered
/// progressively on the other pass.
#[must_use]
pub fn still_survives_dejitter(transform: &ImageTransform, format_field: FieldMode) -> bool {
    !(transform.is_still && transform.field_mode == format_field)
}
