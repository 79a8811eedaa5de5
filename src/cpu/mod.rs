//! CPU Fallback Path
//!
//! Software compositor for hosts without a usable GPU: 8-bit
//! premultiplied BGRA only, rendered in the exact order the stack
//! recorded, with interlacing as row striding. Non-BGRA and
//! non-target-size sources are converted once per frame through the
//! pooled [`scale`] converter; blending is the exact-rounding src-over
//! kernel in [`blend`], parallelized over row blocks.
//!
//! The fallback omits perspective, chroma keying and non-normal blend
//! modes; those degrade to identity. Hosts that require them must pick
//! the GPU path.

pub mod blend;
pub mod scale;

use std::sync::Arc;

use rayon::prelude::*;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::errors::{MixerError, Result};
use crate::frame::pixel_format::{BitDepth, PixelFormat, PixelFormatDesc};
use crate::frame::transform::{BlendMode, FieldMode, FrameTransform, ImageTransform};
use crate::frame::{Frame, VideoFormat, still_survives_dejitter};
use crate::util::future::FrameFuture;

use self::scale::ScalerPool;

struct CpuItem {
    desc: PixelFormatDesc,
    planes: SmallVec<[Arc<[u8]>; 4]>,
    transform: ImageTransform,
}

/// Software image mixer.
pub struct CpuImageMixer {
    renderer: CpuRenderer,
    transform_stack: Vec<ImageTransform>,
    items: Vec<CpuItem>,
    layer_balance: i64,
    stack_underflow: bool,
}

impl CpuImageMixer {
    #[must_use]
    pub fn new() -> Self {
        log::info!("Initialized SIMD accelerated CPU image mixer");
        Self {
            renderer: CpuRenderer::new(),
            transform_stack: vec![ImageTransform::default()],
            items: Vec::new(),
            layer_balance: 0,
            stack_underflow: false,
        }
    }

    /// Layers are flattened on the CPU path (blend modes are a GPU
    /// feature); only the balance is tracked.
    pub fn begin_layer(&mut self, _blend_mode: BlendMode) {
        self.layer_balance += 1;
    }

    pub fn end_layer(&mut self) {
        self.layer_balance -= 1;
    }

    pub fn push(&mut self, transform: &FrameTransform) {
        let top = self.transform_stack.last().expect("stack is never empty");
        self.transform_stack
            .push(top.combined_with(&transform.image_transform));
    }

    pub fn pop(&mut self) {
        if self.transform_stack.len() > 1 {
            self.transform_stack.pop();
        } else {
            self.stack_underflow = true;
        }
    }

    /// Record a frame under the current transform. Invalid frames are
    /// silently dropped.
    pub fn visit(&mut self, frame: &Frame) {
        let desc = frame.pixel_format_desc();
        if desc.format == PixelFormat::Invalid {
            return;
        }
        if desc.planes.is_empty() || !desc.planes_match_format() {
            return;
        }
        if desc.planes[0].size < 16 {
            return;
        }
        if frame.plane_count() != desc.planes.len() {
            return;
        }
        for (i, plane) in desc.planes.iter().enumerate() {
            if frame.plane_data(i).len() < plane.size {
                return;
            }
        }

        let top = self.transform_stack.last().expect("stack is never empty");
        if top.field_mode.is_empty() {
            return;
        }

        self.items.push(CpuItem {
            desc: desc.clone(),
            planes: (0..frame.plane_count()).map(|i| frame.plane_handle(i)).collect(),
            transform: top.clone(),
        });
    }

    /// Allocate a zeroed frame for a producer to fill.
    #[must_use]
    pub fn create_frame(&self, desc: PixelFormatDesc) -> Frame {
        Frame::allocate(desc)
    }

    /// Compose every recorded item into one output raster.
    pub fn render(&mut self, format: &VideoFormat) -> Result<FrameFuture> {
        if format.width == 0 || format.height == 0 {
            return Err(MixerError::InvalidArgument(
                "output dimensions must be positive".into(),
            ));
        }

        let balanced =
            self.transform_stack.len() == 1 && self.layer_balance == 0 && !self.stack_underflow;
        if !balanced {
            self.transform_stack.truncate(1);
            self.transform_stack[0] = ImageTransform::default();
            self.items.clear();
            self.layer_balance = 0;
            self.stack_underflow = false;
            return Err(MixerError::InvalidState(
                "unbalanced push/pop or begin_layer/end_layer at render".into(),
            ));
        }

        let items = std::mem::take(&mut self.items);
        Ok(self.renderer.render(items, format))
    }
}

impl Default for CpuImageMixer {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Renderer ─────────────────────────────────────────────────────────────────

struct ConvertedItem {
    data: Arc<[u8]>,
    transform: ImageTransform,
}

struct CpuRenderer {
    scalers: ScalerPool,
}

impl CpuRenderer {
    fn new() -> Self {
        Self {
            scalers: ScalerPool::new(),
        }
    }

    fn render(&mut self, items: Vec<CpuItem>, format: &VideoFormat) -> FrameFuture {
        let mut converted = match self.convert(items, format) {
            Ok(converted) => converted,
            Err(err) => return FrameFuture::ready(Err(err)),
        };

        if !format.is_progressive() {
            converted.retain(|item| still_survives_dejitter(&item.transform, format.field_mode));
            for item in &mut converted {
                if item.transform.is_still {
                    item.transform.field_mode = FieldMode::PROGRESSIVE;
                }
            }
        }

        // Sub-threshold opacity contributes nothing on any path.
        converted.retain(|item| item.transform.opacity >= 0.001);

        let mut result = vec![0u8; format.size_bytes(BitDepth::Bit8)];
        if format.is_progressive() {
            Self::draw(&converted, &mut result, format, FieldMode::PROGRESSIVE);
        } else {
            Self::draw(&converted, &mut result, format, FieldMode::UPPER);
            Self::draw(&converted, &mut result, format, FieldMode::LOWER);
        }

        FrameFuture::ready(Ok(result))
    }

    /// Convert every unique source buffer once, reusing pooled scalers.
    /// Target-size premultiplied BGRA8 passes through untouched.
    fn convert(&mut self, items: Vec<CpuItem>, format: &VideoFormat) -> Result<Vec<ConvertedItem>> {
        let mut cache: FxHashMap<usize, Arc<[u8]>> = FxHashMap::default();
        let mut converted = Vec::with_capacity(items.len());

        for item in items {
            let passthrough = item.desc.format == PixelFormat::Bgra
                && item.desc.bit_depth == BitDepth::Bit8
                && !item.desc.is_straight_alpha
                && item.desc.planes[0].width == format.width
                && item.desc.planes[0].height == format.height;

            let data = if passthrough {
                Arc::clone(&item.planes[0])
            } else {
                let cache_key = item.planes[0].as_ptr() as usize;
                if let Some(data) = cache.get(&cache_key) {
                    Arc::clone(data)
                } else {
                    let scaler = self
                        .scalers
                        .acquire(&item.desc, format.width, format.height)?;
                    let plane_refs: Vec<&[u8]> =
                        item.planes.iter().map(|p| p.as_ref()).collect();
                    let data: Arc<[u8]> = Arc::from(scaler.convert(&plane_refs));
                    self.scalers.release(scaler);
                    cache.insert(cache_key, Arc::clone(&data));
                    data
                }
            };

            converted.push(ConvertedItem {
                data,
                transform: item.transform,
            });
        }

        Ok(converted)
    }

    fn draw(items: &[ConvertedItem], dest: &mut [u8], format: &VideoFormat, field: FieldMode) {
        // Mask out fields and drop empty items.
        let field_items: Vec<&ConvertedItem> = items
            .iter()
            .filter(|item| !(item.transform.field_mode & field).is_empty())
            .collect();
        if field_items.is_empty() {
            return;
        }

        let row_bytes = format.width * 4;
        let (start, step) = if field == FieldMode::LOWER {
            (1usize, 2usize)
        } else if field == FieldMode::UPPER {
            (0, 2)
        } else {
            (0, 1)
        };

        dest.par_chunks_exact_mut(row_bytes)
            .enumerate()
            .filter(|(y, _)| *y >= start && (*y - start) % step == 0)
            .for_each(|(y, row)| {
                for item in &field_items {
                    let src = &item.data[y * row_bytes..(y + 1) * row_bytes];
                    blend::blend_row(row, src);
                }
            });
    }
}
