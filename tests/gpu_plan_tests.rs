//! GPU Planning and Uniform Packing Tests
//!
//! Tests for:
//! - Pass grouping by target attachment
//! - Draw building: culling, scale modes, uniform packing
//! - Shader flag assignments and uniform block layout
//! - Texture pool keys and formats
//!
//! Everything here is the device-independent half of the GPU path; no
//! adapter is required.

use slotmap::SlotMap;
use smallvec::SmallVec;
use vidmix::frame::geometry::{Coord, FrameGeometry, ScaleMode};
use vidmix::frame::pixel_format::{BitDepth, ColorSpace, PixelFormat, PixelFormatDesc, Plane};
use vidmix::frame::transform::{BlendMode, FieldMode, ImageTransform, Keyer};
use vidmix::gpu::kernel::{DrawSpec, build_draw, scale_mode_transform};
use vidmix::gpu::pass::{DrawRecord, plan_passes};
use vidmix::gpu::pipeline::{ShaderFlags, UniformBlock, attachment_format};
use vidmix::gpu::texture::{TextureDesc, TextureKey, TextureKind};
use vidmix::transform::DrawTransforms;

fn keys(count: usize) -> Vec<TextureKey> {
    let mut arena: SlotMap<TextureKey, ()> = SlotMap::with_key();
    (0..count).map(|_| arena.insert(())).collect()
}

fn record(target: TextureKey) -> DrawRecord {
    DrawRecord {
        target,
        planes: SmallVec::new(),
        local_key: None,
        layer_key: None,
        coords: Vec::new(),
        uniforms: UniformBlock::default(),
    }
}

fn hd_desc() -> PixelFormatDesc {
    PixelFormatDesc::bgra(1920, 1080)
}

fn spec<'a>(
    desc: &'a PixelFormatDesc,
    transforms: &'a DrawTransforms,
    geometry: &'a FrameGeometry,
) -> DrawSpec<'a> {
    DrawSpec {
        pix_desc: desc,
        transforms,
        geometry,
        blend_mode: BlendMode::Normal,
        keyer: Keyer::Linear,
        has_local_key: false,
        has_layer_key: false,
        aspect_ratio: 16.0 / 9.0,
        target_width: 1920,
        target_height: 1080,
        field_mode: FieldMode::PROGRESSIVE,
    }
}

// ============================================================================
// Pass planning
// ============================================================================

#[test]
fn adjacent_same_target_draws_share_a_pass() {
    let k = keys(2);
    let records = vec![record(k[0]), record(k[0]), record(k[1]), record(k[0])];

    let groups = plan_passes(&records);
    assert_eq!(groups.len(), 3);
    assert_eq!(groups[0].target, k[0]);
    assert_eq!(groups[0].records, 0..2);
    assert_eq!(groups[1].target, k[1]);
    assert_eq!(groups[1].records, 2..3);
    assert_eq!(groups[2].target, k[0]);
    assert_eq!(groups[2].records, 3..4);
}

#[test]
fn empty_record_list_plans_no_passes() {
    assert!(plan_passes(&[]).is_empty());
}

// ============================================================================
// Draw building
// ============================================================================

#[test]
fn default_draw_produces_full_quad() {
    let desc = hd_desc();
    let transforms = DrawTransforms::default();
    let geometry = FrameGeometry::full_frame();

    let (coords, uniforms) =
        build_draw(&spec(&desc, &transforms, &geometry), true, true).expect("draw");
    assert_eq!(coords.len(), 4);
    assert_eq!(uniforms.pixel_format, PixelFormat::Bgra.shader_index());
    assert_eq!(uniforms.opacity, 1.0);
    assert_eq!(uniforms.flags, 0);
    assert_eq!(uniforms.blend_mode, 0);
}

#[test]
fn sub_threshold_opacity_culls_draw() {
    let desc = hd_desc();
    let mut transforms = DrawTransforms::default();
    transforms.image_transform.opacity = 0.0005;
    let geometry = FrameGeometry::full_frame();

    assert!(build_draw(&spec(&desc, &transforms, &geometry), true, true).is_none());
}

#[test]
fn offscreen_geometry_culls_draw() {
    let desc = hd_desc();
    let mut transform = ImageTransform::default();
    transform.fill_translation = glam::DVec2::new(3.0, 0.0);
    let transforms = DrawTransforms::default().combine_transform(&transform, 16.0 / 9.0);
    let geometry = FrameGeometry::full_frame();

    assert!(build_draw(&spec(&desc, &transforms, &geometry), true, true).is_none());
}

#[test]
fn key_items_force_full_opacity_and_normal_blend() {
    let desc = hd_desc();
    let mut transforms = DrawTransforms::default();
    transforms.image_transform.is_key = true;
    transforms.image_transform.opacity = 0.5;
    let geometry = FrameGeometry::full_frame();

    let mut s = spec(&desc, &transforms, &geometry);
    s.blend_mode = BlendMode::Screen;
    let (_, uniforms) = build_draw(&s, true, true).expect("draw");
    assert_eq!(uniforms.opacity, 1.0);
    assert_eq!(uniforms.blend_mode, BlendMode::Normal.shader_index());
}

#[test]
fn disabled_blend_modes_degrade_to_normal() {
    let desc = hd_desc();
    let transforms = DrawTransforms::default();
    let geometry = FrameGeometry::full_frame();

    let mut s = spec(&desc, &transforms, &geometry);
    s.blend_mode = BlendMode::Overlay;
    let (_, uniforms) = build_draw(&s, true, false).expect("draw");
    assert_eq!(uniforms.blend_mode, BlendMode::Normal.shader_index());
}

#[test]
fn chroma_uniforms_are_normalized() {
    let desc = hd_desc();
    let mut transforms = DrawTransforms::default();
    transforms.image_transform.chroma.enable = true;
    transforms.image_transform.chroma.target_hue = 120.0;
    transforms.image_transform.chroma.softness = 0.1;
    transforms.image_transform.chroma.spill_suppress = 40.0;
    let geometry = FrameGeometry::full_frame();

    let (_, uniforms) = build_draw(&spec(&desc, &transforms, &geometry), true, true).expect("draw");
    let flags = ShaderFlags::from_bits(uniforms.flags).expect("valid flags");
    assert!(flags.contains(ShaderFlags::CHROMA));
    assert!((uniforms.chroma_target_hue - 120.0 / 360.0).abs() < 1e-6);
    assert!((uniforms.chroma_softness - 1.1).abs() < 1e-6);
    assert!((uniforms.chroma_spill_suppress - 40.0 / 360.0).abs() < 1e-6);
}

#[test]
fn chroma_gate_disables_evaluation() {
    let desc = hd_desc();
    let mut transforms = DrawTransforms::default();
    transforms.image_transform.chroma.enable = true;
    let geometry = FrameGeometry::full_frame();

    let (_, uniforms) = build_draw(&spec(&desc, &transforms, &geometry), false, true).expect("draw");
    assert!(!ShaderFlags::from_bits(uniforms.flags)
        .expect("valid flags")
        .contains(ShaderFlags::CHROMA));
}

#[test]
fn levels_and_csb_flags_gate_on_epsilon() {
    let desc = hd_desc();
    let geometry = FrameGeometry::full_frame();

    // Identity settings leave the flags clear.
    let transforms = DrawTransforms::default();
    let (_, uniforms) = build_draw(&spec(&desc, &transforms, &geometry), true, true).expect("draw");
    let flags = ShaderFlags::from_bits(uniforms.flags).expect("valid flags");
    assert!(!flags.contains(ShaderFlags::LEVELS));
    assert!(!flags.contains(ShaderFlags::CSB));

    let mut transforms = DrawTransforms::default();
    transforms.image_transform.levels.gamma = 2.0;
    transforms.image_transform.brightness = 1.5;
    let (_, uniforms) = build_draw(&spec(&desc, &transforms, &geometry), true, true).expect("draw");
    let flags = ShaderFlags::from_bits(uniforms.flags).expect("valid flags");
    assert!(flags.contains(ShaderFlags::LEVELS));
    assert!(flags.contains(ShaderFlags::CSB));
    assert_eq!(uniforms.gamma, 2.0);
    assert_eq!(uniforms.brt, 1.5);
}

#[test]
fn straight_alpha_and_keys_set_flags() {
    let mut desc = hd_desc();
    desc.is_straight_alpha = true;
    let transforms = DrawTransforms::default();
    let geometry = FrameGeometry::full_frame();

    let mut s = spec(&desc, &transforms, &geometry);
    s.has_local_key = true;
    s.has_layer_key = true;
    let (_, uniforms) = build_draw(&s, true, true).expect("draw");
    let flags = ShaderFlags::from_bits(uniforms.flags).expect("valid flags");
    assert!(flags.contains(ShaderFlags::IS_STRAIGHT_ALPHA));
    assert!(flags.contains(ShaderFlags::HAS_LOCAL_KEY));
    assert!(flags.contains(ShaderFlags::HAS_LAYER_KEY));
}

#[test]
fn field_mode_reaches_the_uniforms() {
    let desc = hd_desc();
    let transforms = DrawTransforms::default();
    let geometry = FrameGeometry::full_frame();

    let mut s = spec(&desc, &transforms, &geometry);
    s.field_mode = FieldMode::LOWER;
    let (_, uniforms) = build_draw(&s, true, true).expect("draw");
    assert_eq!(uniforms.field_mode, u32::from(FieldMode::LOWER.bits()));
}

#[test]
fn sd_ycbcr_defaults_to_bt601() {
    let mut desc = PixelFormatDesc::new(PixelFormat::Ycbcr);
    desc.planes.push(Plane::new(720, 576, 1));
    desc.planes.push(Plane::new(360, 288, 1));
    desc.planes.push(Plane::new(360, 288, 1));
    let transforms = DrawTransforms::default();
    let geometry = FrameGeometry::full_frame();

    let (_, uniforms) = build_draw(&spec(&desc, &transforms, &geometry), true, true).expect("draw");
    assert_eq!(uniforms.color_space_index, ColorSpace::Bt601.shader_index());
}

#[test]
fn precision_factors_follow_plane_depth() {
    let mut desc = PixelFormatDesc::new(PixelFormat::Ycbcr);
    desc.bit_depth = BitDepth::Bit10;
    desc.planes.push(Plane::new(1920, 1080, 2));
    desc.planes.push(Plane::new(960, 540, 2));
    desc.planes.push(Plane::new(960, 540, 2));
    let transforms = DrawTransforms::default();
    let geometry = FrameGeometry::full_frame();

    let (_, uniforms) = build_draw(&spec(&desc, &transforms, &geometry), true, true).expect("draw");
    assert_eq!(uniforms.precision_factor, [64.0, 64.0, 64.0, 1.0]);
}

// ============================================================================
// Scale modes
// ============================================================================

#[test]
fn scale_mode_fit_letterboxes() {
    let t = scale_mode_transform(ScaleMode::Fit, 960, 1080, 1920, 1080).expect("transform");
    assert!((t.fill_scale.x - 0.5).abs() < 1e-12);
    assert!((t.fill_scale.y - 1.0).abs() < 1e-12);
}

#[test]
fn scale_mode_fill_covers() {
    let t = scale_mode_transform(ScaleMode::Fill, 960, 1080, 1920, 1080).expect("transform");
    assert!((t.fill_scale.x - 1.0).abs() < 1e-12);
    assert!((t.fill_scale.y - 2.0).abs() < 1e-12);
}

#[test]
fn scale_mode_original_maps_one_to_one() {
    let t = scale_mode_transform(ScaleMode::Original, 960, 540, 1920, 1080).expect("transform");
    assert!((t.fill_scale.x - 0.5).abs() < 1e-12);
    assert!((t.fill_scale.y - 0.5).abs() < 1e-12);
}

#[test]
fn scale_mode_axis_fills_equalize_one_axis() {
    let h = scale_mode_transform(ScaleMode::HFill, 960, 1080, 1920, 1080).expect("transform");
    assert!((h.fill_scale.y - 2.0).abs() < 1e-12);

    let v = scale_mode_transform(ScaleMode::VFill, 960, 1080, 1920, 1080).expect("transform");
    assert!((v.fill_scale.x - 0.5).abs() < 1e-12);
}

#[test]
fn stretch_needs_no_rewrite() {
    assert!(scale_mode_transform(ScaleMode::Stretch, 960, 540, 1920, 1080).is_none());
    assert!(scale_mode_transform(ScaleMode::Fit, 0, 540, 1920, 1080).is_none());
}

// ============================================================================
// Uniform block and texture keys
// ============================================================================

#[test]
fn uniform_block_layout_matches_shader() {
    // 4 words + vec4 + 17 floats + flags/field/padding, 16-byte aligned.
    assert_eq!(std::mem::size_of::<UniformBlock>(), 112);
    assert_eq!(std::mem::size_of::<UniformBlock>() % 16, 0);
}

#[test]
fn shader_flag_bits_are_stable() {
    assert_eq!(ShaderFlags::IS_STRAIGHT_ALPHA.bits(), 1);
    assert_eq!(ShaderFlags::HAS_LOCAL_KEY.bits(), 2);
    assert_eq!(ShaderFlags::HAS_LAYER_KEY.bits(), 4);
    assert_eq!(ShaderFlags::INVERT.bits(), 8);
    assert_eq!(ShaderFlags::LEVELS.bits(), 16);
    assert_eq!(ShaderFlags::CSB.bits(), 32);
    assert_eq!(ShaderFlags::CHROMA.bits(), 64);
    assert_eq!(ShaderFlags::CHROMA_SHOW_MASK.bits(), 128);
}

#[test]
fn attachment_formats_by_depth() {
    assert_eq!(
        attachment_format(BitDepth::Bit8),
        wgpu::TextureFormat::Rgba8Unorm
    );
    assert_eq!(
        attachment_format(BitDepth::Bit10),
        wgpu::TextureFormat::Rgba16Unorm
    );
    assert_eq!(
        attachment_format(BitDepth::Bit16),
        wgpu::TextureFormat::Rgba16Unorm
    );
}

#[test]
fn texture_desc_formats_and_sizes() {
    let plane = TextureDesc {
        width: 1920,
        height: 1080,
        components: 1,
        depth: BitDepth::Bit8,
        kind: TextureKind::Plane,
    };
    assert_eq!(plane.format(), wgpu::TextureFormat::R8Unorm);
    assert_eq!(plane.bytes_per_pixel(), 1);

    let wide_plane = TextureDesc {
        components: 4,
        depth: BitDepth::Bit10,
        ..plane
    };
    assert_eq!(wide_plane.format(), wgpu::TextureFormat::Rgba16Unorm);
    assert_eq!(wide_plane.bytes_per_pixel(), 8);

    // Attachments are always four channels, whatever their logical
    // component count.
    let matte = TextureDesc {
        components: 1,
        kind: TextureKind::Attachment,
        ..plane
    };
    assert_eq!(matte.format(), wgpu::TextureFormat::Rgba8Unorm);
    assert_eq!(matte.bytes_per_pixel(), 4);
}

#[test]
fn custom_fans_survive_draw_building() {
    let desc = hd_desc();
    let transforms = DrawTransforms::default();
    // A pentagon fan inside the screen.
    let geometry = FrameGeometry::new(
        vec![
            Coord::new(0.5, 0.1, 0.5, 0.0),
            Coord::new(0.9, 0.4, 1.0, 0.4),
            Coord::new(0.75, 0.9, 0.8, 1.0),
            Coord::new(0.25, 0.9, 0.2, 1.0),
            Coord::new(0.1, 0.4, 0.0, 0.4),
        ],
        ScaleMode::Stretch,
    );

    let (coords, _) = build_draw(&spec(&desc, &transforms, &geometry), true, true).expect("draw");
    assert_eq!(coords.len(), 5);
}
