//! Image Transforms
//!
//! The per-frame transform record pushed onto the mixer stack: fill
//! geometry, crops, perspective pin, color correction, chroma key, blend
//! mode and interlace intent.
//!
//! Transforms compose down the stack. Geometry composes through the
//! transform resolver's matrix machinery; the *color values* compose
//! through [`ImageTransform::combined_with`], a lattice that keeps every
//! nested restriction in force (multiplicative opacity/CSB/gamma,
//! max/min bounds for levels and chroma, OR for flags, AND for field
//! modes).

use bitflags::bitflags;
use glam::DVec2;

bitflags! {
    /// Interlace intent, treated as a bit set so that masking an item by
    /// a pass's field is a plain AND: `UPPER & LOWER` is empty, and
    /// `PROGRESSIVE` survives either field.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct FieldMode: u8 {
        const UPPER = 1;
        const LOWER = 2;
        const PROGRESSIVE = 3;
    }
}

impl Default for FieldMode {
    fn default() -> Self {
        Self::PROGRESSIVE
    }
}

/// Photoshop-style blend mode of a layer.
///
/// Discriminants are the fragment shader's switch indices; ordering is
/// used by the composition lattice (`max` wins down the stack).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BlendMode {
    #[default]
    Normal = 0,
    Lighten,
    Darken,
    Multiply,
    Average,
    Add,
    Subtract,
    Difference,
    Negation,
    Exclusion,
    Screen,
    Overlay,
    HardLight,
    ColorDodge,
    ColorBurn,
    LinearDodge,
    LinearBurn,
    LinearLight,
    VividLight,
    PinLight,
    HardMix,
    Reflect,
    Glow,
    Phoenix,
    Hue,
    Saturation,
    Color,
    Luminosity,
}

impl BlendMode {
    #[must_use]
    pub fn shader_index(self) -> u32 {
        self as u32
    }
}

/// Final fore/back combination rule of a draw.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Keyer {
    /// `fore + (1 - fore.a) · back`
    #[default]
    Linear = 0,
    /// `fore + back`
    Additive = 1,
}

/// Levels adjustment: input range with gamma, mapped to an output range.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Levels {
    pub min_input: f64,
    pub max_input: f64,
    pub min_output: f64,
    pub max_output: f64,
    pub gamma: f64,
}

impl Default for Levels {
    fn default() -> Self {
        Self {
            min_input: 0.0,
            max_input: 1.0,
            min_output: 0.0,
            max_output: 1.0,
            gamma: 1.0,
        }
    }
}

/// Chroma-key settings.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ChromaKey {
    pub enable: bool,
    /// Output the alpha map instead of the keyed image.
    pub show_mask: bool,
    /// Target hue in degrees, [0, 360).
    pub target_hue: f64,
    pub hue_width: f64,
    pub min_saturation: f64,
    pub min_brightness: f64,
    pub softness: f64,
    /// Spill-suppression hue range in degrees.
    pub spill_suppress: f64,
    pub spill_suppress_saturation: f64,
}

impl Default for ChromaKey {
    fn default() -> Self {
        // Neutral values under the composition lattice: fields that
        // compose with `max` start at 0, the one composing with `min`
        // starts at 1.
        Self {
            enable: false,
            show_mask: false,
            target_hue: 0.0,
            hue_width: 0.0,
            min_saturation: 0.0,
            min_brightness: 0.0,
            softness: 0.0,
            spill_suppress: 0.0,
            spill_suppress_saturation: 1.0,
        }
    }
}

/// Four-corner perspective pin: absolute positions of the unit square's
/// corners after pinning.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Corners {
    pub ul: DVec2,
    pub ur: DVec2,
    pub ll: DVec2,
    pub lr: DVec2,
}

impl Default for Corners {
    fn default() -> Self {
        Self {
            ul: DVec2::new(0.0, 0.0),
            ur: DVec2::new(1.0, 0.0),
            ll: DVec2::new(0.0, 1.0),
            lr: DVec2::new(1.0, 1.0),
        }
    }
}

impl Corners {
    /// Whether the pin leaves the unit square untouched.
    #[must_use]
    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }
}

/// Axis-aligned post-transform crop, in [0, 1]² output space.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CropRect {
    pub ul: DVec2,
    pub lr: DVec2,
}

impl Default for CropRect {
    fn default() -> Self {
        Self {
            ul: DVec2::new(0.0, 0.0),
            lr: DVec2::new(1.0, 1.0),
        }
    }
}

/// The full per-frame transform record.
#[derive(Clone, Debug, PartialEq)]
pub struct ImageTransform {
    pub opacity: f64,
    pub brightness: f64,
    pub saturation: f64,
    pub contrast: f64,
    pub levels: Levels,
    pub chroma: ChromaKey,

    /// Anchor point subtracted before scale/rotation.
    pub anchor: DVec2,
    pub fill_scale: DVec2,
    pub fill_translation: DVec2,
    /// Rotation in radians.
    pub angle: f64,

    /// Axis-aligned pre-transform crop: translation and scale of the
    /// clip window in the node's own space.
    pub clip_translation: DVec2,
    pub clip_scale: DVec2,
    /// Axis-aligned post-transform crop.
    pub crop: CropRect,
    /// Four-corner perspective pin.
    pub perspective: Corners,

    pub field_mode: FieldMode,
    pub is_key: bool,
    pub is_mix: bool,
    pub is_still: bool,
    pub invert: bool,
    /// Gates clip/crop/perspective: flattening transforms leave it off so
    /// that wrapping a frame does not re-apply crops.
    pub enable_geometry_modifiers: bool,

    pub blend_mode: BlendMode,
    pub layer_depth: i32,
}

impl Default for ImageTransform {
    fn default() -> Self {
        Self {
            opacity: 1.0,
            brightness: 1.0,
            saturation: 1.0,
            contrast: 1.0,
            levels: Levels::default(),
            chroma: ChromaKey::default(),
            anchor: DVec2::ZERO,
            fill_scale: DVec2::ONE,
            fill_translation: DVec2::ZERO,
            angle: 0.0,
            clip_translation: DVec2::ZERO,
            clip_scale: DVec2::ONE,
            crop: CropRect::default(),
            perspective: Corners::default(),
            field_mode: FieldMode::PROGRESSIVE,
            is_key: false,
            is_mix: false,
            is_still: false,
            invert: false,
            enable_geometry_modifiers: false,
            blend_mode: BlendMode::Normal,
            layer_depth: 0,
        }
    }
}

impl ImageTransform {
    /// Compose this transform's non-geometry values with a nested one.
    ///
    /// Geometry fields (anchor, scales, translations, angle, crops,
    /// perspective) follow a separate flow through the transform
    /// resolver's matrix steps and are deliberately untouched here.
    #[must_use]
    pub fn combined_with(&self, other: &Self) -> Self {
        let mut out = self.clone();

        out.opacity *= other.opacity;
        out.brightness *= other.brightness;
        out.contrast *= other.contrast;
        out.saturation *= other.saturation;

        out.levels.min_input = out.levels.min_input.max(other.levels.min_input);
        out.levels.max_input = out.levels.max_input.min(other.levels.max_input);
        out.levels.min_output = out.levels.min_output.max(other.levels.min_output);
        out.levels.max_output = out.levels.max_output.min(other.levels.max_output);
        out.levels.gamma *= other.levels.gamma;

        out.chroma.enable |= other.chroma.enable;
        out.chroma.show_mask |= other.chroma.show_mask;
        out.chroma.target_hue = out.chroma.target_hue.max(other.chroma.target_hue);
        out.chroma.min_saturation = out.chroma.min_saturation.max(other.chroma.min_saturation);
        out.chroma.min_brightness = out.chroma.min_brightness.max(other.chroma.min_brightness);
        out.chroma.hue_width = out.chroma.hue_width.max(other.chroma.hue_width);
        out.chroma.softness = out.chroma.softness.max(other.chroma.softness);
        out.chroma.spill_suppress = out.chroma.spill_suppress.max(other.chroma.spill_suppress);
        out.chroma.spill_suppress_saturation = out
            .chroma
            .spill_suppress_saturation
            .min(other.chroma.spill_suppress_saturation);

        out.is_key |= other.is_key;
        out.invert |= other.invert;
        out.is_mix |= other.is_mix;
        out.is_still |= other.is_still;
        out.blend_mode = out.blend_mode.max(other.blend_mode);
        out.layer_depth += other.layer_depth;
        out.field_mode &= other.field_mode;

        out
    }
}

/// The record producers push onto the mixer stack. Wraps the image
/// transform so the visitor API stays stable if per-frame data beyond
/// image compositing (e.g. audio levels) is routed through the same
/// stack by a host.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FrameTransform {
    pub image_transform: ImageTransform,
}

impl FrameTransform {
    #[must_use]
    pub fn new(image_transform: ImageTransform) -> Self {
        Self { image_transform }
    }
}
