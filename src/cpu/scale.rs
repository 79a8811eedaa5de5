//! Pooled Software Scaler
//!
//! Converts any supported source frame to premultiplied 8-bit BGRA at
//! the output size: pixel-format decode (including planar YCbCr with
//! chroma subsampling and 10/12/16-bit storage), straight-alpha
//! premultiplication, then a bilinear resize when the sizes differ.
//!
//! Scalers are pooled per `(src_width, src_height, src_format)` so a
//! steady stream of frames from one producer reuses one converter; the
//! pool is drained at frame end.

use std::sync::Arc;

use parking_lot::Mutex;
use rayon::prelude::*;
use rustc_hash::FxHashMap;

use crate::errors::{MixerError, Result};
use crate::frame::color;
use crate::frame::pixel_format::{ColorSpace, PixelFormat, PixelFormatDesc};

/// Pool key of a converter.
pub type ScalerKey = (usize, usize, PixelFormat);

/// One source-format-to-BGRA converter.
pub struct SoftwareScaler {
    desc: PixelFormatDesc,
    color_space: ColorSpace,
    dst_width: usize,
    dst_height: usize,
}

impl SoftwareScaler {
    pub fn new(desc: &PixelFormatDesc, dst_width: usize, dst_height: usize) -> Result<Self> {
        if desc.format == PixelFormat::Invalid || desc.planes.is_empty() {
            return Err(MixerError::OperationFailed(
                "cannot construct software scaler for invalid source".into(),
            ));
        }
        if dst_width == 0 || dst_height == 0 {
            return Err(MixerError::InvalidArgument(
                "scaler target dimensions must be positive".into(),
            ));
        }
        Ok(Self {
            desc: desc.clone(),
            color_space: desc.effective_color_space(),
            dst_width,
            dst_height,
        })
    }

    /// Convert the source planes into a target-size premultiplied BGRA
    /// buffer.
    #[must_use]
    pub fn convert(&self, planes: &[&[u8]]) -> Vec<u8> {
        let src_w = self.desc.planes[0].width;
        let src_h = self.desc.planes[0].height;

        let mut bgra = vec![0u8; src_w * src_h * 4];
        bgra.par_chunks_exact_mut(src_w * 4)
            .enumerate()
            .for_each(|(y, row)| {
                for x in 0..src_w {
                    let px = self.decode_pixel(planes, x, y);
                    row[x * 4..x * 4 + 4].copy_from_slice(&px);
                }
            });

        if src_w == self.dst_width && src_h == self.dst_height {
            return bgra;
        }
        bilinear_resize(&bgra, src_w, src_h, self.dst_width, self.dst_height)
    }

    /// Normalized component fetch: plane-local coordinates with nearest
    /// chroma-plane scaling, 16-bit storage rescaled by the depth's
    /// precision factor.
    fn fetch(&self, planes: &[&[u8]], plane_index: usize, x: usize, y: usize, component: usize) -> f32 {
        let plane = &self.desc.planes[plane_index];
        let base = &self.desc.planes[0];

        // Subsampled planes address proportionally.
        let px = if plane.width == base.width {
            x
        } else {
            x * plane.width / base.width
        };
        let py = if plane.height == base.height {
            y
        } else {
            y * plane.height / base.height
        };
        let px = px.min(plane.width.saturating_sub(1));
        let py = py.min(plane.height.saturating_sub(1));

        let component_bytes = self.desc.bit_depth.bytes_per_component();
        let offset = py * plane.linesize + px * plane.stride + component * component_bytes;
        let data = planes[plane_index];

        if component_bytes == 2 {
            let raw = u16::from_le_bytes([data[offset], data[offset + 1]]);
            (f32::from(raw) * self.desc.bit_depth.precision_factor() / 65535.0).clamp(0.0, 1.0)
        } else {
            f32::from(data[offset]) / 255.0
        }
    }

    fn decode_pixel(&self, planes: &[&[u8]], x: usize, y: usize) -> [u8; 4] {
        let f = |i| self.fetch(planes, 0, x, y, i);

        let (rgb, mut a) = match self.desc.format {
            PixelFormat::Gray => {
                let v = f(0);
                ([v, v, v], 1.0)
            }
            PixelFormat::Bgra => ([f(2), f(1), f(0)], f(3)),
            PixelFormat::Rgba => ([f(0), f(1), f(2)], f(3)),
            PixelFormat::Argb => ([f(1), f(2), f(3)], f(0)),
            PixelFormat::Abgr => ([f(3), f(2), f(1)], f(0)),
            PixelFormat::Bgr => ([f(2), f(1), f(0)], 1.0),
            PixelFormat::Rgb => ([f(0), f(1), f(2)], 1.0),
            PixelFormat::Luma => {
                let v = color::expand_luma(f(0));
                ([v, v, v], 1.0)
            }
            PixelFormat::Ycbcr => {
                let y_ = self.fetch(planes, 0, x, y, 0);
                let cb = self.fetch(planes, 1, x, y, 0);
                let cr = self.fetch(planes, 2, x, y, 0);
                (color::ycbcr_to_rgb(y_, cb, cr, self.color_space), 1.0)
            }
            PixelFormat::Ycbcra => {
                let y_ = self.fetch(planes, 0, x, y, 0);
                let cb = self.fetch(planes, 1, x, y, 0);
                let cr = self.fetch(planes, 2, x, y, 0);
                let a = self.fetch(planes, 3, x, y, 0);
                (color::ycbcr_to_rgb(y_, cb, cr, self.color_space), a)
            }
            PixelFormat::Invalid => ([0.0, 0.0, 0.0], 0.0),
        };

        let mut rgb = rgb;
        if self.desc.is_straight_alpha {
            for c in &mut rgb {
                *c *= a;
            }
        }
        a = a.clamp(0.0, 1.0);

        [
            (rgb[2].clamp(0.0, 1.0) * 255.0 + 0.5) as u8,
            (rgb[1].clamp(0.0, 1.0) * 255.0 + 0.5) as u8,
            (rgb[0].clamp(0.0, 1.0) * 255.0 + 0.5) as u8,
            (a * 255.0 + 0.5) as u8,
        ]
    }
}

/// Bilinear BGRA8 resize.
fn bilinear_resize(src: &[u8], src_w: usize, src_h: usize, dst_w: usize, dst_h: usize) -> Vec<u8> {
    let mut dst = vec![0u8; dst_w * dst_h * 4];
    let x_ratio = src_w as f32 / dst_w as f32;
    let y_ratio = src_h as f32 / dst_h as f32;

    dst.par_chunks_exact_mut(dst_w * 4)
        .enumerate()
        .for_each(|(dy, row)| {
            let sy = (dy as f32 + 0.5) * y_ratio - 0.5;
            let y0 = (sy.floor().max(0.0) as usize).min(src_h - 1);
            let y1 = (y0 + 1).min(src_h - 1);
            let fy = (sy - sy.floor()).clamp(0.0, 1.0);

            for dx in 0..dst_w {
                let sx = (dx as f32 + 0.5) * x_ratio - 0.5;
                let x0 = (sx.floor().max(0.0) as usize).min(src_w - 1);
                let x1 = (x0 + 1).min(src_w - 1);
                let fx = (sx - sx.floor()).clamp(0.0, 1.0);

                for c in 0..4 {
                    let p00 = f32::from(src[(y0 * src_w + x0) * 4 + c]);
                    let p10 = f32::from(src[(y0 * src_w + x1) * 4 + c]);
                    let p01 = f32::from(src[(y1 * src_w + x0) * 4 + c]);
                    let p11 = f32::from(src[(y1 * src_w + x1) * 4 + c]);
                    let top = p00 + (p10 - p00) * fx;
                    let bottom = p01 + (p11 - p01) * fx;
                    row[dx * 4 + c] = (top + (bottom - top) * fy + 0.5) as u8;
                }
            }
        });

    dst
}

/// Pool of converters, shared across a render's parallel conversions.
pub struct ScalerPool {
    pools: Mutex<FxHashMap<ScalerKey, Vec<Arc<SoftwareScaler>>>>,
}

impl ScalerPool {
    #[must_use]
    pub fn new() -> Self {
        Self {
            pools: Mutex::new(FxHashMap::default()),
        }
    }

    /// Fetch or build a converter for the given source.
    pub fn acquire(
        &self,
        desc: &PixelFormatDesc,
        dst_width: usize,
        dst_height: usize,
    ) -> Result<Arc<SoftwareScaler>> {
        let key = (
            desc.planes[0].width,
            desc.planes[0].height,
            desc.format,
        );
        if let Some(scaler) = self.pools.lock().get_mut(&key).and_then(Vec::pop) {
            if scaler.dst_width == dst_width && scaler.dst_height == dst_height {
                return Ok(scaler);
            }
        }
        Ok(Arc::new(SoftwareScaler::new(desc, dst_width, dst_height)?))
    }

    pub fn release(&self, scaler: Arc<SoftwareScaler>) {
        let key = (
            scaler.desc.planes[0].width,
            scaler.desc.planes[0].height,
            scaler.desc.format,
        );
        self.pools.lock().entry(key).or_default().push(scaler);
    }
}

impl Default for ScalerPool {
    fn default() -> Self {
        Self::new()
    }
}
