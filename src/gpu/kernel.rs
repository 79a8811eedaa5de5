//! Image Kernel Frontend
//!
//! Turns one item's descriptor, transforms and geometry into the final
//! vertex sequence and uniform block of a draw, or nothing when the item
//! cannot contribute pixels (sub-threshold opacity, clipped away,
//! wholly off screen).
//!
//! Everything here is pure so the uniform packing and culling rules are
//! testable without a device; the pass planner attaches texture handles
//! afterwards.

use crate::frame::geometry::{Coord, FrameGeometry, ScaleMode};
use crate::frame::pixel_format::PixelFormatDesc;
use crate::frame::transform::{BlendMode, FieldMode, ImageTransform, Keyer};
use crate::gpu::pipeline::{ShaderFlags, UniformBlock};
use crate::transform::{DrawTransforms, is_outside_screen};

/// Identity threshold for opacity, levels and CSB gating.
pub const EPSILON: f64 = 0.001;

/// Device-independent description of one draw.
pub struct DrawSpec<'a> {
    pub pix_desc: &'a PixelFormatDesc,
    pub transforms: &'a DrawTransforms,
    pub geometry: &'a FrameGeometry,
    pub blend_mode: BlendMode,
    pub keyer: Keyer,
    pub has_local_key: bool,
    pub has_layer_key: bool,
    pub aspect_ratio: f64,
    pub target_width: usize,
    pub target_height: usize,
    /// Field of the current pass, already masked into the item.
    pub field_mode: FieldMode,
}

/// Extra fill scale that realizes a non-stretch scale mode, or `None`
/// when the geometry already maps 1:1.
#[must_use]
pub fn scale_mode_transform(
    mode: ScaleMode,
    plane_width: usize,
    plane_height: usize,
    target_width: usize,
    target_height: usize,
) -> Option<ImageTransform> {
    if mode == ScaleMode::Stretch || plane_width == 0 || plane_height == 0 {
        return None;
    }

    let width_scale = target_width as f64 / plane_width as f64;
    let height_scale = target_height as f64 / plane_height as f64;

    let mut transform = ImageTransform::default();
    match mode {
        ScaleMode::Fit => {
            let target_scale = width_scale.min(height_scale);
            transform.fill_scale.x *= target_scale / width_scale;
            transform.fill_scale.y *= target_scale / height_scale;
        }
        ScaleMode::Fill => {
            let target_scale = width_scale.max(height_scale);
            transform.fill_scale.x *= target_scale / width_scale;
            transform.fill_scale.y *= target_scale / height_scale;
        }
        ScaleMode::Original => {
            transform.fill_scale.x /= width_scale;
            transform.fill_scale.y /= height_scale;
        }
        ScaleMode::HFill => {
            transform.fill_scale.y *= width_scale / height_scale;
        }
        ScaleMode::VFill => {
            transform.fill_scale.x *= height_scale / width_scale;
        }
        ScaleMode::Stretch => unreachable!(),
    }

    Some(transform)
}

/// Resolve geometry and pack uniforms for one draw.
///
/// Returns `None` when the draw would contribute no pixels.
#[must_use]
pub fn build_draw(
    spec: &DrawSpec<'_>,
    chroma_enabled: bool,
    blend_modes_enabled: bool,
) -> Option<(Vec<Coord>, UniformBlock)> {
    if spec.pix_desc.planes.is_empty() {
        return None;
    }
    if spec.transforms.image_transform.opacity < EPSILON {
        return None;
    }
    if spec.geometry.coords().is_empty() {
        return None;
    }

    let first_plane = spec.pix_desc.planes[0];

    let rewritten;
    let transforms = match scale_mode_transform(
        spec.geometry.mode(),
        first_plane.width,
        first_plane.height,
        spec.target_width,
        spec.target_height,
    ) {
        Some(extra) => {
            rewritten = spec.transforms.combine_transform(&extra, spec.aspect_ratio);
            &rewritten
        }
        None => spec.transforms,
    };

    let coords = transforms.transform_coords(spec.geometry.coords());

    // Skip drawing when everything ends up outside the screen.
    if coords.len() < 3 || is_outside_screen(&coords) {
        return None;
    }

    let image = &transforms.image_transform;
    let mut uniforms = UniformBlock::default();
    let mut flags = ShaderFlags::empty();

    let factor = spec.pix_desc.bit_depth.precision_factor();
    for slot in uniforms.precision_factor.iter_mut().take(spec.pix_desc.planes.len()) {
        *slot = factor;
    }

    uniforms.color_space_index = spec.pix_desc.effective_color_space().shader_index();
    uniforms.pixel_format = spec.pix_desc.format.shader_index();

    if spec.pix_desc.is_straight_alpha {
        flags |= ShaderFlags::IS_STRAIGHT_ALPHA;
    }
    if spec.has_local_key {
        flags |= ShaderFlags::HAS_LOCAL_KEY;
    }
    if spec.has_layer_key {
        flags |= ShaderFlags::HAS_LAYER_KEY;
    }

    // A key item is a matte: always fully opaque into the key
    // accumulator, always normal blending.
    uniforms.opacity = if image.is_key { 1.0 } else { image.opacity as f32 };

    if chroma_enabled && image.chroma.enable {
        flags |= ShaderFlags::CHROMA;
        if image.chroma.show_mask {
            flags |= ShaderFlags::CHROMA_SHOW_MASK;
        }
        uniforms.chroma_target_hue = (image.chroma.target_hue / 360.0) as f32;
        uniforms.chroma_hue_width = image.chroma.hue_width as f32;
        uniforms.chroma_min_saturation = image.chroma.min_saturation as f32;
        uniforms.chroma_min_brightness = image.chroma.min_brightness as f32;
        uniforms.chroma_softness = 1.0 + image.chroma.softness as f32;
        uniforms.chroma_spill_suppress = (image.chroma.spill_suppress / 360.0) as f32;
        uniforms.chroma_spill_suppress_saturation =
            image.chroma.spill_suppress_saturation as f32;
    }

    let blend_mode = if image.is_key || !blend_modes_enabled {
        BlendMode::Normal
    } else {
        spec.blend_mode
    };
    uniforms.blend_mode = blend_mode.shader_index();
    uniforms.keyer = spec.keyer as u32;

    if image.invert {
        flags |= ShaderFlags::INVERT;
    }

    if image.levels.min_input > EPSILON
        || image.levels.max_input < 1.0 - EPSILON
        || image.levels.min_output > EPSILON
        || image.levels.max_output < 1.0 - EPSILON
        || (image.levels.gamma - 1.0).abs() > EPSILON
    {
        flags |= ShaderFlags::LEVELS;
        uniforms.min_input = image.levels.min_input as f32;
        uniforms.max_input = image.levels.max_input as f32;
        uniforms.min_output = image.levels.min_output as f32;
        uniforms.max_output = image.levels.max_output as f32;
        uniforms.gamma = image.levels.gamma as f32;
    }

    if (image.brightness - 1.0).abs() > EPSILON
        || (image.saturation - 1.0).abs() > EPSILON
        || (image.contrast - 1.0).abs() > EPSILON
    {
        flags |= ShaderFlags::CSB;
        uniforms.brt = image.brightness as f32;
        uniforms.sat = image.saturation as f32;
        uniforms.con = image.contrast as f32;
    }

    uniforms.flags = flags.bits();
    uniforms.field_mode = u32::from(spec.field_mode.bits());

    Some((coords, uniforms))
}
