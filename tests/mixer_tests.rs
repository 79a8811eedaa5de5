//! Mixer Stack Tests
//!
//! Tests for:
//! - Visitor API balance invariants (push/pop, begin/end layer)
//! - Silent rejection rules in visit
//! - Transform color-value composition lattice
//! - Field-mode masking and still de-jittering
//! - Frame factory
//!
//! Runs entirely on the CPU mixer; no GPU device is required.

use vidmix::cpu::CpuImageMixer;
use vidmix::frame::pixel_format::{PixelFormat, PixelFormatDesc, Plane};
use vidmix::frame::transform::{
    BlendMode, FieldMode, FrameTransform, ImageTransform,
};
use vidmix::frame::{Frame, VideoFormat, still_survives_dejitter};
use vidmix::{AcceleratorPath, MixerError, MixerSettings, create_image_mixer};

fn solid_frame(width: usize, height: usize, bgra: [u8; 4]) -> Frame {
    let desc = PixelFormatDesc::bgra(width, height);
    let mut data = vec![0u8; width * height * 4];
    for px in data.chunks_exact_mut(4) {
        px.copy_from_slice(&bgra);
    }
    Frame::from_planes(desc, vec![data], vidmix::FrameGeometry::full_frame())
}

fn format_1080p() -> VideoFormat {
    VideoFormat::new(64, 36, FieldMode::PROGRESSIVE)
}

// ============================================================================
// Balance invariants
// ============================================================================

#[test]
fn balanced_sequence_renders() {
    let mut mixer = CpuImageMixer::new();
    mixer.begin_layer(BlendMode::Normal);
    mixer.push(&FrameTransform::default());
    mixer.visit(&solid_frame(64, 36, [1, 2, 3, 255]));
    mixer.pop();
    mixer.end_layer();

    let future = mixer.render(&format_1080p()).expect("balanced render");
    let bytes = future.wait().expect("composite");
    assert_eq!(bytes.len(), 64 * 36 * 4);
}

#[test]
fn unbalanced_push_fails_render() {
    let mut mixer = CpuImageMixer::new();
    mixer.push(&FrameTransform::default());

    let err = mixer.render(&format_1080p()).unwrap_err();
    assert!(matches!(err, MixerError::InvalidState(_)));

    // The failed render resets the stack; the next tick is clean.
    assert!(mixer.render(&format_1080p()).is_ok());
}

#[test]
fn unbalanced_layers_fail_render() {
    let mut mixer = CpuImageMixer::new();
    mixer.begin_layer(BlendMode::Normal);

    let err = mixer.render(&format_1080p()).unwrap_err();
    assert!(matches!(err, MixerError::InvalidState(_)));
}

#[test]
fn pop_underflow_fails_render() {
    let mut mixer = CpuImageMixer::new();
    mixer.pop();

    let err = mixer.render(&format_1080p()).unwrap_err();
    assert!(matches!(err, MixerError::InvalidState(_)));
}

#[test]
fn zero_size_format_is_invalid() {
    let mut mixer = CpuImageMixer::new();
    let err = mixer
        .render(&VideoFormat::new(0, 36, FieldMode::PROGRESSIVE))
        .unwrap_err();
    assert!(matches!(err, MixerError::InvalidArgument(_)));
}

// ============================================================================
// Visit rejection rules
// ============================================================================

fn render_bytes(mixer: &mut CpuImageMixer) -> Vec<u8> {
    mixer
        .render(&format_1080p())
        .expect("render")
        .wait()
        .expect("composite")
}

#[test]
fn invalid_format_frames_are_dropped_silently() {
    let mut mixer = CpuImageMixer::new();
    let desc = PixelFormatDesc::new(PixelFormat::Invalid);
    let frame = Frame::from_planes(desc, vec![], vidmix::FrameGeometry::full_frame());
    mixer.visit(&frame);

    assert!(render_bytes(&mut mixer).iter().all(|&b| b == 0));
}

#[test]
fn empty_plane_list_is_dropped() {
    let mut mixer = CpuImageMixer::new();
    let desc = PixelFormatDesc::new(PixelFormat::Bgra);
    let frame = Frame::from_planes(desc, vec![], vidmix::FrameGeometry::full_frame());
    mixer.visit(&frame);

    assert!(render_bytes(&mut mixer).iter().all(|&b| b == 0));
}

#[test]
fn tiny_planes_are_dropped() {
    let mut mixer = CpuImageMixer::new();
    let mut desc = PixelFormatDesc::new(PixelFormat::Bgra);
    desc.planes.push(Plane::new(2, 1, 4));
    let frame = Frame::from_planes(desc, vec![vec![0u8; 8]], vidmix::FrameGeometry::full_frame());
    mixer.visit(&frame);

    assert!(render_bytes(&mut mixer).iter().all(|&b| b == 0));
}

#[test]
fn empty_field_mode_drops_frames() {
    let mut mixer = CpuImageMixer::new();

    let mut upper = ImageTransform::default();
    upper.field_mode = FieldMode::UPPER;
    let mut lower = ImageTransform::default();
    lower.field_mode = FieldMode::LOWER;

    // UPPER & LOWER composes to empty, so the visit must drop.
    mixer.push(&FrameTransform::new(upper));
    mixer.push(&FrameTransform::new(lower));
    mixer.visit(&solid_frame(64, 36, [255, 255, 255, 255]));
    mixer.pop();
    mixer.pop();

    assert!(render_bytes(&mut mixer).iter().all(|&b| b == 0));
}

// ============================================================================
// Composition lattice
// ============================================================================

#[test]
fn opacity_and_csb_multiply() {
    let mut a = ImageTransform::default();
    a.opacity = 0.5;
    a.brightness = 2.0;
    let mut b = ImageTransform::default();
    b.opacity = 0.5;
    b.brightness = 0.5;

    let combined = a.combined_with(&b);
    assert!((combined.opacity - 0.25).abs() < 1e-12);
    assert!((combined.brightness - 1.0).abs() < 1e-12);
}

#[test]
fn levels_narrow_down_the_stack() {
    let mut a = ImageTransform::default();
    a.levels.min_input = 0.1;
    a.levels.max_input = 0.9;
    let mut b = ImageTransform::default();
    b.levels.min_input = 0.2;
    b.levels.max_input = 0.95;
    b.levels.gamma = 2.0;

    let combined = a.combined_with(&b);
    assert!((combined.levels.min_input - 0.2).abs() < 1e-12);
    assert!((combined.levels.max_input - 0.9).abs() < 1e-12);
    assert!((combined.levels.gamma - 2.0).abs() < 1e-12);
}

#[test]
fn flags_or_and_blend_mode_maxes() {
    let mut a = ImageTransform::default();
    a.is_key = true;
    let mut b = ImageTransform::default();
    b.invert = true;
    b.blend_mode = BlendMode::Screen;

    let combined = a.combined_with(&b);
    assert!(combined.is_key);
    assert!(combined.invert);
    assert_eq!(combined.blend_mode, BlendMode::Screen);
}

#[test]
fn field_modes_and_down_the_stack() {
    let mut a = ImageTransform::default();
    a.field_mode = FieldMode::PROGRESSIVE;
    let mut b = ImageTransform::default();
    b.field_mode = FieldMode::UPPER;

    assert_eq!(a.combined_with(&b).field_mode, FieldMode::UPPER);

    let mut c = ImageTransform::default();
    c.field_mode = FieldMode::LOWER;
    assert!(b.combined_with(&c).field_mode.is_empty());
}

#[test]
fn chroma_enable_propagates_with_settings() {
    let mut inner = ImageTransform::default();
    inner.chroma.enable = true;
    inner.chroma.target_hue = 120.0;
    inner.chroma.hue_width = 0.05;

    // An enclosing default transform must not disturb the settings.
    let combined = ImageTransform::default().combined_with(&inner);
    assert!(combined.chroma.enable);
    assert!((combined.chroma.target_hue - 120.0).abs() < 1e-12);
    assert!((combined.chroma.hue_width - 0.05).abs() < 1e-12);
}

// ============================================================================
// Still de-jittering
// ============================================================================

#[test]
fn still_on_matching_field_is_dropped() {
    let mut still = ImageTransform::default();
    still.is_still = true;
    still.field_mode = FieldMode::UPPER;

    assert!(!still_survives_dejitter(&still, FieldMode::UPPER));
    assert!(still_survives_dejitter(&still, FieldMode::LOWER));
}

#[test]
fn moving_items_always_survive() {
    let mut moving = ImageTransform::default();
    moving.field_mode = FieldMode::UPPER;

    assert!(still_survives_dejitter(&moving, FieldMode::UPPER));
    assert!(still_survives_dejitter(&moving, FieldMode::LOWER));
}

// ============================================================================
// Factory and frame allocation
// ============================================================================

#[test]
fn cpu_path_can_be_forced() {
    let settings = MixerSettings {
        accelerator: AcceleratorPath::Cpu,
        ..MixerSettings::default()
    };
    let mixer = create_image_mixer(&settings);
    assert!(!mixer.is_gpu());
}

#[test]
fn create_frame_allocates_descriptor_planes() {
    let mixer = CpuImageMixer::new();
    let mut desc = PixelFormatDesc::new(PixelFormat::Ycbcra);
    desc.planes.push(Plane::new(64, 36, 1));
    desc.planes.push(Plane::new(32, 18, 1));
    desc.planes.push(Plane::new(32, 18, 1));
    desc.planes.push(Plane::new(64, 36, 1));

    let frame = mixer.create_frame(desc);
    assert_eq!(frame.plane_count(), 4);
    assert_eq!(frame.plane_data(0).len(), 64 * 36);
    assert_eq!(frame.plane_data(1).len(), 32 * 18);
    assert!(frame.plane_data(0).iter().all(|&b| b == 0));
}
