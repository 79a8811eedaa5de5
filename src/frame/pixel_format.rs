//! Pixel Formats and Color Tables
//!
//! Static knowledge about the supported pixel formats: plane layouts,
//! bit-depth precision factors, and the YCbCr decode / luminance
//! coefficient tables for BT.601, BT.709 and BT.2020.
//!
//! Keep the numeric indices in sync with `gpu/image.wgsl`.

use smallvec::SmallVec;

// ─── Pixel formats ────────────────────────────────────────────────────────────

/// Pixel layout of a source frame.
///
/// Packed formats carry a single interleaved plane; `Ycbcr`/`Ycbcra` are
/// planar with one plane per component.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// Single-channel, replicated to RGB with alpha forced to 1.
    Gray = 0,
    Bgra = 1,
    Rgba = 2,
    Argb = 3,
    Abgr = 4,
    /// Planar Y/Cb/Cr, limited range.
    Ycbcr = 5,
    /// Planar Y/Cb/Cr/A, limited range.
    Ycbcra = 6,
    /// Single-channel luma with (Y - 0.065) / 0.859 expansion.
    Luma = 7,
    Bgr = 8,
    Rgb = 9,
    /// Sentinel for frames that must be rejected.
    Invalid = 10,
}

impl PixelFormat {
    /// Number of planes a conformant descriptor carries for this format.
    #[must_use]
    pub fn plane_count(self) -> usize {
        match self {
            Self::Gray | Self::Bgra | Self::Rgba | Self::Argb | Self::Abgr | Self::Luma
            | Self::Bgr | Self::Rgb => 1,
            Self::Ycbcr => 3,
            Self::Ycbcra => 4,
            Self::Invalid => 0,
        }
    }

    /// Index used by the fragment shader's format switch.
    #[must_use]
    pub fn shader_index(self) -> u32 {
        self as u32
    }
}

// ─── Bit depth ────────────────────────────────────────────────────────────────

/// Storage depth of a plane or attachment.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum BitDepth {
    #[default]
    Bit8,
    Bit10,
    Bit12,
    Bit16,
}

impl BitDepth {
    /// Bytes per component in storage. Depths above 8 bits are carried in
    /// 16-bit words.
    #[must_use]
    pub fn bytes_per_component(self) -> usize {
        match self {
            Self::Bit8 => 1,
            Self::Bit10 | Self::Bit12 | Self::Bit16 => 2,
        }
    }

    /// Rescale factor applied per sampled component in the shader.
    ///
    /// Source data for 10/12-bit depths sits in the low bits of a 16-bit
    /// word; sampling normalizes by 65535, so the sample is multiplied
    /// back up to span [0, 1].
    #[must_use]
    pub fn precision_factor(self) -> f32 {
        match self {
            Self::Bit8 | Self::Bit16 => 1.0,
            Self::Bit10 => 64.0,
            Self::Bit12 => 16.0,
        }
    }

    #[must_use]
    pub fn is_16bit_storage(self) -> bool {
        !matches!(self, Self::Bit8)
    }
}

// ─── Color spaces ─────────────────────────────────────────────────────────────

/// YCbCr matrix family of a source frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ColorSpace {
    Bt601 = 0,
    #[default]
    Bt709 = 1,
    Bt2020 = 2,
}

/// Limited-range YCbCr → RGB decode coefficients.
///
/// `r = y_scale·(Y - 16/255) + rv·(Cr - 128/255)` and so on, all on
/// [0, 1]-normalized samples.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct YcbcrCoefficients {
    pub y_scale: f32,
    pub rv: f32,
    pub gu: f32,
    pub gv: f32,
    pub bu: f32,
}

impl ColorSpace {
    /// Index used by the fragment shader's color-space switch.
    #[must_use]
    pub fn shader_index(self) -> u32 {
        self as u32
    }

    /// Decode coefficients for limited-range planar YCbCr.
    #[must_use]
    pub fn ycbcr_coefficients(self) -> YcbcrCoefficients {
        match self {
            Self::Bt601 => YcbcrCoefficients {
                y_scale: 1.164,
                rv: 1.596,
                gu: -0.391,
                gv: -0.813,
                bu: 2.018,
            },
            Self::Bt709 => YcbcrCoefficients {
                y_scale: 1.164,
                rv: 1.793,
                gu: -0.213,
                gv: -0.534,
                bu: 2.115,
            },
            Self::Bt2020 => YcbcrCoefficients {
                y_scale: 1.164,
                rv: 1.6787,
                gu: -0.1873,
                gv: -0.6504,
                bu: 2.1418,
            },
        }
    }

    /// RGB luminance weights for this space (CSB and chroma grey transfer).
    #[must_use]
    pub fn luma_weights(self) -> [f32; 3] {
        match self {
            Self::Bt601 => [0.299, 0.587, 0.114],
            Self::Bt709 => [0.2126, 0.7152, 0.0722],
            Self::Bt2020 => [0.2627, 0.6780, 0.0593],
        }
    }

    /// Height heuristic used when a frame descriptor does not name its
    /// color space: SD content is BT.601, anything taller is BT.709.
    #[must_use]
    pub fn from_height(height: usize) -> Self {
        if height > 700 { Self::Bt709 } else { Self::Bt601 }
    }
}

// ─── Plane and descriptor ─────────────────────────────────────────────────────

/// One plane of a source frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Plane {
    pub width: usize,
    pub height: usize,
    /// Bytes per pixel within this plane.
    pub stride: usize,
    /// Bytes per row.
    pub linesize: usize,
    /// Total byte size of the plane.
    pub size: usize,
}

impl Plane {
    #[must_use]
    pub fn new(width: usize, height: usize, stride: usize) -> Self {
        Self {
            width,
            height,
            stride,
            linesize: width * stride,
            size: width * height * stride,
        }
    }
}

/// Full description of a source frame's pixel data.
#[derive(Clone, Debug, PartialEq)]
pub struct PixelFormatDesc {
    pub format: PixelFormat,
    pub planes: SmallVec<[Plane; 4]>,
    /// Explicit matrix family; `None` falls back to the height heuristic.
    pub color_space: Option<ColorSpace>,
    /// Whether alpha is straight (not premultiplied into RGB).
    pub is_straight_alpha: bool,
    pub bit_depth: BitDepth,
}

impl PixelFormatDesc {
    #[must_use]
    pub fn new(format: PixelFormat) -> Self {
        Self {
            format,
            planes: SmallVec::new(),
            color_space: None,
            is_straight_alpha: false,
            bit_depth: BitDepth::Bit8,
        }
    }

    /// Single-plane premultiplied 8-bit BGRA descriptor, the mixer's
    /// canonical working format.
    #[must_use]
    pub fn bgra(width: usize, height: usize) -> Self {
        let mut desc = Self::new(PixelFormat::Bgra);
        desc.planes.push(Plane::new(width, height, 4));
        desc
    }

    /// Whether the plane list matches what the format requires.
    #[must_use]
    pub fn planes_match_format(&self) -> bool {
        self.planes.len() == self.format.plane_count()
    }

    /// Effective color space: the descriptor's own when set, otherwise
    /// the height heuristic over the first plane.
    #[must_use]
    pub fn effective_color_space(&self) -> ColorSpace {
        self.color_space.unwrap_or_else(|| {
            ColorSpace::from_height(self.planes.first().map_or(0, |p| p.height))
        })
    }
}
