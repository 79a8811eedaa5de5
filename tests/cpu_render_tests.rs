//! CPU Compositor Tests
//!
//! Tests for:
//! - Identity passthrough (byte-for-byte)
//! - Exact-rounding src-over blending, SIMD vs scalar
//! - Opacity-style blending through premultiplied sources
//! - Draw order
//! - Interlaced field striding and still handling
//! - Field-union law for progressive items
//! - Software scaler decode paths

use vidmix::cpu::CpuImageMixer;
use vidmix::cpu::blend::{blend_row, blend_row_scalar};
use vidmix::cpu::scale::SoftwareScaler;
use vidmix::frame::pixel_format::{ColorSpace, PixelFormat, PixelFormatDesc, Plane};
use vidmix::frame::transform::{FieldMode, FrameTransform, ImageTransform};
use vidmix::frame::{Frame, VideoFormat};
use vidmix::FrameGeometry;

const W: usize = 64;
const H: usize = 36;

fn solid_frame(bgra: [u8; 4]) -> Frame {
    solid_frame_sized(W, H, bgra)
}

fn solid_frame_sized(width: usize, height: usize, bgra: [u8; 4]) -> Frame {
    let desc = PixelFormatDesc::bgra(width, height);
    let mut data = vec![0u8; width * height * 4];
    for px in data.chunks_exact_mut(4) {
        px.copy_from_slice(&bgra);
    }
    Frame::from_planes(desc, vec![data], FrameGeometry::full_frame())
}

fn render(mixer: &mut CpuImageMixer, field_mode: FieldMode) -> Vec<u8> {
    mixer
        .render(&VideoFormat::new(W, H, field_mode))
        .expect("render")
        .wait()
        .expect("composite")
}

fn visit_with(mixer: &mut CpuImageMixer, frame: &Frame, transform: ImageTransform) {
    mixer.push(&FrameTransform::new(transform));
    mixer.visit(frame);
    mixer.pop();
}

// ============================================================================
// Passthrough and blending
// ============================================================================

#[test]
fn identity_passthrough_is_byte_exact() {
    let mut mixer = CpuImageMixer::new();
    let frame = solid_frame([32, 64, 128, 255]);
    mixer.visit(&frame);

    let out = render(&mut mixer, FieldMode::PROGRESSIVE);
    assert_eq!(out.as_slice(), frame.plane_data(0));
}

#[test]
fn opaque_frame_replaces_background() {
    let mut mixer = CpuImageMixer::new();
    mixer.visit(&solid_frame([0, 0, 255, 255]));
    mixer.visit(&solid_frame([10, 20, 30, 255]));

    let out = render(&mut mixer, FieldMode::PROGRESSIVE);
    for px in out.chunks_exact(4) {
        assert_eq!(px, [10, 20, 30, 255]);
    }
}

#[test]
fn half_transparent_green_over_red() {
    let mut mixer = CpuImageMixer::new();
    // Opaque red background, then premultiplied 50% green.
    mixer.visit(&solid_frame([0, 0, 255, 255]));
    mixer.visit(&solid_frame([0, 128, 0, 128]));

    let out = render(&mut mixer, FieldMode::PROGRESSIVE);
    for px in out.chunks_exact(4) {
        assert!(px[0] <= 1); // blue
        assert!((i16::from(px[1]) - 128).abs() <= 1); // green
        assert!((i16::from(px[2]) - 127).abs() <= 1); // red
        assert_eq!(px[3], 255);
    }
}

#[test]
fn sub_threshold_opacity_contributes_nothing() {
    let mut mixer = CpuImageMixer::new();
    let mut transform = ImageTransform::default();
    transform.opacity = 0.0005;
    visit_with(&mut mixer, &solid_frame([255, 255, 255, 255]), transform);

    let out = render(&mut mixer, FieldMode::PROGRESSIVE);
    assert!(out.iter().all(|&b| b == 0));
}

// ============================================================================
// Blend kernel
// ============================================================================

#[test]
fn opaque_source_wins_exactly() {
    // With source alpha 255 the divide-by-255 term cancels the
    // destination completely, for every destination value.
    for d in 0..=255u8 {
        let mut dst = [d, d, d, 255];
        let src = [200, 100, 50, 255];
        blend_row_scalar(&mut dst, &src);
        assert_eq!(dst, src);
    }
}

#[test]
fn transparent_source_leaves_destination() {
    for d in 0..=255u8 {
        let mut dst = [d, d, d, d];
        let src = [0, 0, 0, 0];
        blend_row_scalar(&mut dst, &src);
        assert_eq!(dst, [d, d, d, d]);
    }
}

#[test]
fn overflow_guard_clamps_bad_premultiplied_sources() {
    // Red 255 over alpha 254 is out of premultiplied range; the guard
    // clamps it instead of wrapping.
    let mut dst = [255u8, 255, 255, 255];
    let src = [0u8, 0, 255, 254];
    blend_row_scalar(&mut dst, &src);
    assert_eq!(dst[3], 255);
    assert!(dst[2] >= 254);
}

#[test]
fn simd_matches_scalar() {
    // Two full SIMD lanes plus a scalar tail.
    let mut dst_simd: Vec<u8> = (0..36u32).map(|i| (i * 7 % 256) as u8).collect();
    let src: Vec<u8> = (0..36u32)
        .map(|i| ((i * 13 + 5) % 256) as u8)
        .collect();
    // Force valid premultiplied alpha by clamping to each pixel's alpha.
    let src: Vec<u8> = src
        .chunks_exact(4)
        .flat_map(|px| {
            let a = px[3];
            [px[0].min(a), px[1].min(a), px[2].min(a), a]
        })
        .collect();

    let mut dst_scalar = dst_simd.clone();
    blend_row(&mut dst_simd, &src);
    blend_row_scalar(&mut dst_scalar, &src);
    assert_eq!(dst_simd, dst_scalar);
}

#[test]
fn blend_matches_float_reference_within_one_lsb() {
    for sa in [0u8, 1, 63, 127, 128, 200, 254, 255] {
        for d in [0u8, 1, 50, 127, 200, 255] {
            for s in [0u8, 30, 100, 200, 255] {
                let s = s.min(sa);
                let mut dst = [d, d, d, d];
                blend_row_scalar(&mut dst, &[s, s, s, sa]);

                let reference =
                    f32::from(s) + f32::from(d) * (1.0 - f32::from(sa) / 255.0);
                assert!(
                    (f32::from(dst[0]) - reference).abs() <= 1.0,
                    "s={s} d={d} a={sa}: got {} want {reference}",
                    dst[0]
                );
            }
        }
    }
}

// ============================================================================
// Interlacing
// ============================================================================

#[test]
fn fields_stride_alternate_rows() {
    let mut mixer = CpuImageMixer::new();

    let mut upper = ImageTransform::default();
    upper.field_mode = FieldMode::UPPER;
    visit_with(&mut mixer, &solid_frame([10, 10, 10, 255]), upper);

    let mut lower = ImageTransform::default();
    lower.field_mode = FieldMode::LOWER;
    visit_with(&mut mixer, &solid_frame([20, 20, 20, 255]), lower);

    let out = render(&mut mixer, FieldMode::UPPER);
    for (y, row) in out.chunks_exact(W * 4).enumerate() {
        let expected = if y % 2 == 0 { 10 } else { 20 };
        assert!(
            row.chunks_exact(4).all(|px| px[0] == expected),
            "row {y} should be {expected}"
        );
    }
}

#[test]
fn still_on_matching_field_shows_nothing_on_that_field() {
    let mut mixer = CpuImageMixer::new();

    // An interlaced still arrives as one copy per field; the copy on the
    // field matching the output format de-jitters away and the other is
    // rendered progressively.
    let mut matching = ImageTransform::default();
    matching.is_still = true;
    matching.field_mode = FieldMode::UPPER;
    visit_with(&mut mixer, &solid_frame([99, 99, 99, 255]), matching);

    let mut other = ImageTransform::default();
    other.is_still = true;
    other.field_mode = FieldMode::LOWER;
    visit_with(&mut mixer, &solid_frame([50, 50, 50, 255]), other);

    let out = render(&mut mixer, FieldMode::UPPER);
    for px in out.chunks_exact(4) {
        assert_eq!(px[0], 50, "surviving still covers every row");
    }
}

#[test]
fn progressive_items_fill_both_fields() {
    // For progressive content the union of the upper and lower passes
    // equals one progressive pass.
    let mut interlaced = CpuImageMixer::new();
    interlaced.visit(&solid_frame([77, 66, 55, 255]));
    let fields = render(&mut interlaced, FieldMode::UPPER);

    let mut progressive = CpuImageMixer::new();
    progressive.visit(&solid_frame([77, 66, 55, 255]));
    let full = render(&mut progressive, FieldMode::PROGRESSIVE);

    assert_eq!(fields, full);
}

// ============================================================================
// Software scaler
// ============================================================================

#[test]
fn scaler_resizes_solid_color() {
    let desc = PixelFormatDesc::bgra(8, 8);
    let scaler = SoftwareScaler::new(&desc, 16, 16).expect("scaler");

    let src = vec![200u8; 8 * 8 * 4];
    let out = scaler.convert(&[&src]);
    assert_eq!(out.len(), 16 * 16 * 4);
    assert!(out.iter().all(|&b| b == 200));
}

#[test]
fn scaler_premultiplies_straight_rgba() {
    let mut desc = PixelFormatDesc::new(PixelFormat::Rgba);
    desc.planes.push(Plane::new(4, 4, 4));
    desc.is_straight_alpha = true;

    let mut src = Vec::new();
    for _ in 0..16 {
        src.extend_from_slice(&[255, 0, 0, 128]); // straight red at 50%
    }

    let scaler = SoftwareScaler::new(&desc, 4, 4).expect("scaler");
    let out = scaler.convert(&[&src]);
    for px in out.chunks_exact(4) {
        assert!(px[0] <= 1); // blue
        assert!(px[1] <= 1); // green
        assert!((i16::from(px[2]) - 128).abs() <= 1); // premultiplied red
        assert_eq!(px[3], 128);
    }
}

#[test]
fn scaler_decodes_ycbcr_extremes() {
    let mut desc = PixelFormatDesc::new(PixelFormat::Ycbcr);
    desc.planes.push(Plane::new(4, 4, 1));
    desc.planes.push(Plane::new(4, 4, 1));
    desc.planes.push(Plane::new(4, 4, 1));
    desc.color_space = Some(ColorSpace::Bt709);

    let white = scalar_ycbcr(&desc, 235);
    for px in white.chunks_exact(4) {
        assert!(px[0] >= 254 && px[1] >= 254 && px[2] >= 254);
        assert_eq!(px[3], 255);
    }

    let black = scalar_ycbcr(&desc, 16);
    for px in black.chunks_exact(4) {
        assert!(px[0] <= 1 && px[1] <= 1 && px[2] <= 1);
    }
}

fn scalar_ycbcr(desc: &PixelFormatDesc, luma: u8) -> Vec<u8> {
    let y = vec![luma; 16];
    let cb = vec![128u8; 16];
    let cr = vec![128u8; 16];
    let scaler = SoftwareScaler::new(desc, 4, 4).expect("scaler");
    scaler.convert(&[&y, &cb, &cr])
}

#[test]
fn non_bgra_sources_composite_through_conversion() {
    let mut mixer = CpuImageMixer::new();

    let mut desc = PixelFormatDesc::new(PixelFormat::Rgba);
    desc.planes.push(Plane::new(W, H, 4));
    let mut data = vec![0u8; W * H * 4];
    for px in data.chunks_exact_mut(4) {
        px.copy_from_slice(&[128, 64, 32, 255]); // RGBA
    }
    mixer.visit(&Frame::from_planes(desc, vec![data], FrameGeometry::full_frame()));

    let out = render(&mut mixer, FieldMode::PROGRESSIVE);
    for px in out.chunks_exact(4) {
        assert_eq!(px, [32, 64, 128, 255]); // BGRA
    }
}

#[test]
fn smaller_sources_are_scaled_to_the_output() {
    let mut mixer = CpuImageMixer::new();
    mixer.visit(&solid_frame_sized(W / 2, H / 2, [7, 8, 9, 255]));

    let out = render(&mut mixer, FieldMode::PROGRESSIVE);
    for px in out.chunks_exact(4) {
        assert_eq!(px, [7, 8, 9, 255]);
    }
}
