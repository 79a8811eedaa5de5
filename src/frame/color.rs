//! Reference Pixel Math
//!
//! Scalar reference implementations of the per-pixel operations the
//! fragment shader performs: YCbCr decode, levels, contrast/saturation/
//! brightness, and the chroma-key scoring with spill suppression.
//!
//! The WGSL module in `gpu/image.wgsl` mirrors these functions
//! operation-for-operation; the CPU scaler uses the decode path directly.
//! Hues here are normalized to [0, 1) turns, matching the shader.

use crate::frame::pixel_format::ColorSpace;

// ─── YCbCr decode ─────────────────────────────────────────────────────────────

/// Decode one limited-range YCbCr sample ([0, 1] normalized) to RGB.
#[must_use]
pub fn ycbcr_to_rgb(y: f32, cb: f32, cr: f32, space: ColorSpace) -> [f32; 3] {
    let c = space.ycbcr_coefficients();
    let y = c.y_scale * (y - 16.0 / 255.0);
    let cb = cb - 128.0 / 255.0;
    let cr = cr - 128.0 / 255.0;
    [
        (y + c.rv * cr).clamp(0.0, 1.0),
        (y + c.gu * cb + c.gv * cr).clamp(0.0, 1.0),
        (y + c.bu * cb).clamp(0.0, 1.0),
    ]
}

/// Expand a full-swing luma sample: `(y - 0.065) / 0.859`.
#[must_use]
pub fn expand_luma(y: f32) -> f32 {
    ((y - 0.065) / 0.859).clamp(0.0, 1.0)
}

// ─── Levels ───────────────────────────────────────────────────────────────────

/// Levels control: input range with gamma, remapped to an output range.
#[must_use]
pub fn levels_control(
    c: f32,
    min_input: f32,
    gamma: f32,
    max_input: f32,
    min_output: f32,
    max_output: f32,
) -> f32 {
    let ranged = ((c - min_input) / (max_input - min_input)).clamp(0.0, 1.0);
    let gamma_corrected = ranged.powf(1.0 / gamma);
    min_output + (max_output - min_output) * gamma_corrected
}

// ─── Contrast, saturation, brightness ─────────────────────────────────────────

/// CSB on premultiplied RGBA. Unpremultiplies around the adjustment,
/// mixes toward the luminance for desaturation and toward mid grey for
/// contrast.
#[must_use]
pub fn contrast_saturation_brightness(
    rgba: [f32; 4],
    brt: f32,
    sat: f32,
    con: f32,
    luma_weights: [f32; 3],
) -> [f32; 3] {
    let a = rgba[3];
    let mut rgb = [rgba[0], rgba[1], rgba[2]];
    if a > 0.0 {
        for c in &mut rgb {
            *c /= a;
        }
    }

    let brt_color = [rgb[0] * brt, rgb[1] * brt, rgb[2] * brt];
    let intensity = brt_color[0] * luma_weights[0]
        + brt_color[1] * luma_weights[1]
        + brt_color[2] * luma_weights[2];

    let mut out = [0.0f32; 3];
    for i in 0..3 {
        let sat_color = intensity + (brt_color[i] - intensity) * sat;
        let con_color = 0.5 + (sat_color - 0.5) * con;
        out[i] = con_color * a;
    }
    out
}

// ─── HSV ──────────────────────────────────────────────────────────────────────

/// RGB → HSV with hue in [0, 1) turns.
#[must_use]
pub fn rgb_to_hsv(rgb: [f32; 3]) -> [f32; 3] {
    let [r, g, b] = rgb;
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let hue = if delta == 0.0 {
        0.0
    } else if (max - r).abs() < f32::EPSILON {
        (((g - b) / delta).rem_euclid(6.0)) / 6.0
    } else if (max - g).abs() < f32::EPSILON {
        ((b - r) / delta + 2.0) / 6.0
    } else {
        ((r - g) / delta + 4.0) / 6.0
    };

    let saturation = if max == 0.0 { 0.0 } else { delta / max };
    [hue, saturation, max]
}

/// HSV → RGB with hue in [0, 1) turns.
#[must_use]
pub fn hsv_to_rgb(hsv: [f32; 3]) -> [f32; 3] {
    let [h, s, v] = hsv;
    let h6 = h.rem_euclid(1.0) * 6.0;
    let c = v * s;
    let x = c * (1.0 - (h6.rem_euclid(2.0) - 1.0).abs());
    let m = v - c;
    let (r, g, b) = match h6 as u32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    [r + m, g + m, b + m]
}

// ─── Chroma key ───────────────────────────────────────────────────────────────

/// Shader-side chroma parameters, pre-normalized the way the uniform
/// block carries them (hues in turns, softness offset by one).
#[derive(Clone, Copy, Debug)]
pub struct ChromaParams {
    pub target_hue: f32,
    pub hue_width: f32,
    pub min_saturation: f32,
    pub min_brightness: f32,
    pub softness: f32,
    pub spill_suppress: f32,
    pub spill_suppress_saturation: f32,
}

/// Circular distance between two hues in turns, in [0, 0.5].
#[must_use]
pub fn angle_diff(a: f32, b: f32) -> f32 {
    0.5 - ((a - b).abs() - 0.5).abs()
}

/// Signed circular difference in turns, in [-0.5, 0.5].
#[must_use]
pub fn angle_diff_directional(a: f32, b: f32) -> f32 {
    let diff = a - b;
    if diff < -0.5 {
        diff + 1.0
    } else if diff > 0.5 {
        diff - 1.0
    } else {
        diff
    }
}

fn distance_below(actual: f32, target: f32) -> f32 {
    (target - actual).min(0.0)
}

/// Keying distance of a pixel from the target color.
#[must_use]
pub fn color_distance(hsv: [f32; 3], p: &ChromaParams) -> f32 {
    let hue_diff = angle_diff(hsv[0], p.target_hue) * 2.0;
    let saturation_diff = distance_below(hsv[1], p.min_saturation);
    let brightness_diff = distance_below(hsv[2], p.min_brightness);

    let saturation_brightness_score = brightness_diff.max(saturation_diff);
    let hue_score = hue_diff - p.hue_width;

    -hue_score * saturation_brightness_score
}

fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

/// The alpha-map curve over the keying distance.
#[must_use]
pub fn chroma_alpha(hsv: [f32; 3], p: &ChromaParams) -> f32 {
    let d = color_distance(hsv, p) * -2.0 + 1.0;
    1.0 - smoothstep(1.0, p.softness, d)
}

/// Rotate hues near the target away from it and attenuate saturation.
#[must_use]
pub fn suppress_spill(mut hsv: [f32; 3], p: &ChromaParams) -> [f32; 3] {
    if p.spill_suppress <= 0.0 {
        return hsv;
    }
    let diff = angle_diff_directional(hsv[0], p.target_hue);
    let distance = diff.abs() / p.spill_suppress;
    if distance < 1.0 {
        hsv[0] = if diff < 0.0 {
            p.target_hue - p.spill_suppress
        } else {
            p.target_hue + p.spill_suppress
        };
        hsv[1] *= (distance + p.spill_suppress_saturation).min(1.0);
    }
    hsv
}

/// Full chroma pass over one premultiplied RGBA pixel.
#[must_use]
pub fn chroma_key(rgba: [f32; 4], p: &ChromaParams, show_mask: bool) -> [f32; 4] {
    let hsv = rgb_to_hsv([rgba[0], rgba[1], rgba[2]]);
    let alpha = chroma_alpha(hsv, p);
    let rgb = hsv_to_rgb(suppress_spill(hsv, p));

    if show_mask {
        return [alpha, alpha, alpha, 1.0];
    }
    [rgb[0] * alpha, rgb[1] * alpha, rgb[2] * alpha, alpha]
}
