//! Shader & Pipeline Objects
//!
//! One WGSL module drives every draw; two concrete render pipelines are
//! built per device, selected at draw time by the attachment bit depth
//! (8-bit and, when the device supports 16-bit normalized formats,
//! 16-bit). Pipelines are device-scoped and built once on the render
//! thread; there is no process-wide shader state.
//!
//! Hardware blending is disabled: the fragment stage composes against a
//! background snapshot itself so that every blend mode and keyer runs in
//! full float precision.

use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};

use crate::frame::pixel_format::BitDepth;

bitflags! {
    /// Bit assignments of [`UniformBlock::flags`].
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct ShaderFlags: u32 {
        const IS_STRAIGHT_ALPHA = 1 << 0;
        const HAS_LOCAL_KEY = 1 << 1;
        const HAS_LAYER_KEY = 1 << 2;
        const INVERT = 1 << 3;
        const LEVELS = 1 << 4;
        const CSB = 1 << 5;
        const CHROMA = 1 << 6;
        const CHROMA_SHOW_MASK = 1 << 7;
    }
}

/// Per-draw uniform block. Field order and padding must match the
/// `Uniforms` struct in `image.wgsl`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct UniformBlock {
    pub color_space_index: u32,
    pub blend_mode: u32,
    pub keyer: u32,
    pub pixel_format: u32,
    pub precision_factor: [f32; 4],
    pub opacity: f32,
    pub min_input: f32,
    pub max_input: f32,
    pub gamma: f32,
    pub min_output: f32,
    pub max_output: f32,
    pub brt: f32,
    pub sat: f32,
    pub con: f32,
    pub chroma_target_hue: f32,
    pub chroma_hue_width: f32,
    pub chroma_min_saturation: f32,
    pub chroma_min_brightness: f32,
    pub chroma_softness: f32,
    pub chroma_spill_suppress: f32,
    pub chroma_spill_suppress_saturation: f32,
    pub flags: u32,
    pub field_mode: u32,
    pub _pad0: u32,
    pub _pad1: u32,
}

impl Default for UniformBlock {
    fn default() -> Self {
        Self {
            color_space_index: 0,
            blend_mode: 0,
            keyer: 0,
            pixel_format: 0,
            precision_factor: [1.0; 4],
            opacity: 1.0,
            min_input: 0.0,
            max_input: 0.0,
            gamma: 0.0,
            min_output: 0.0,
            max_output: 0.0,
            brt: 0.0,
            sat: 0.0,
            con: 0.0,
            chroma_target_hue: 0.0,
            chroma_hue_width: 0.0,
            chroma_min_saturation: 0.0,
            chroma_min_brightness: 0.0,
            chroma_softness: 0.0,
            chroma_spill_suppress: 0.0,
            chroma_spill_suppress_saturation: 0.0,
            flags: 0,
            field_mode: 0,
            _pad0: 0,
            _pad1: 0,
        }
    }
}

/// Uniform-ring slot alignment; also the dynamic-offset granularity.
pub const UNIFORM_STRIDE: u64 = 256;

/// Bytes per vertex: position (2) + texture coordinate (4) floats.
pub const VERTEX_STRIDE: u64 = 6 * 4;

#[must_use]
pub fn attachment_format(depth: BitDepth) -> wgpu::TextureFormat {
    if depth.is_16bit_storage() {
        wgpu::TextureFormat::Rgba16Unorm
    } else {
        wgpu::TextureFormat::Rgba8Unorm
    }
}

/// The device-scoped pipeline pair plus the bind group layouts and
/// sampler every draw shares.
pub struct ImagePipeline {
    pub uniform_layout: wgpu::BindGroupLayout,
    pub texture_layout: wgpu::BindGroupLayout,
    pub plane_sampler: wgpu::Sampler,
    pipeline_8bit: wgpu::RenderPipeline,
    pipeline_16bit: Option<wgpu::RenderPipeline>,
}

impl ImagePipeline {
    /// Build the module, layouts and pipelines. `with_16bit` requires
    /// the device to have `TEXTURE_FORMAT_16BIT_NORM` enabled.
    #[must_use]
    pub fn new(device: &wgpu::Device, with_16bit: bool) -> Self {
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("image mixer shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("image.wgsl").into()),
        });

        let uniform_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("mixer uniforms"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: true,
                    min_binding_size: wgpu::BufferSize::new(std::mem::size_of::<UniformBlock>() as u64),
                },
                count: None,
            }],
        });

        let texture_entry = |binding: u32| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        };

        let texture_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("mixer textures"),
            entries: &[
                texture_entry(0),
                texture_entry(1),
                texture_entry(2),
                texture_entry(3),
                wgpu::BindGroupLayoutEntry {
                    binding: 4,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
                texture_entry(5),
                texture_entry(6),
                texture_entry(7),
            ],
        });

        let plane_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("mixer plane sampler"),
            address_mode_u: wgpu::AddressMode::Repeat,
            address_mode_v: wgpu::AddressMode::Repeat,
            address_mode_w: wgpu::AddressMode::Repeat,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("mixer pipeline layout"),
            bind_group_layouts: &[&uniform_layout, &texture_layout],
            push_constant_ranges: &[],
        });

        let build = |format: wgpu::TextureFormat| {
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("mixer pipeline"),
                layout: Some(&layout),
                vertex: wgpu::VertexState {
                    module: &module,
                    entry_point: Some("vs_main"),
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                    buffers: &[wgpu::VertexBufferLayout {
                        array_stride: VERTEX_STRIDE,
                        step_mode: wgpu::VertexStepMode::Vertex,
                        attributes: &[
                            wgpu::VertexAttribute {
                                format: wgpu::VertexFormat::Float32x2,
                                offset: 0,
                                shader_location: 0,
                            },
                            wgpu::VertexAttribute {
                                format: wgpu::VertexFormat::Float32x4,
                                offset: 8,
                                shader_location: 1,
                            },
                        ],
                    }],
                },
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    cull_mode: None,
                    ..Default::default()
                },
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                fragment: Some(wgpu::FragmentState {
                    module: &module,
                    entry_point: Some("fs_main"),
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                    targets: &[Some(wgpu::ColorTargetState {
                        format,
                        // Blending happens in the fragment stage.
                        blend: None,
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                }),
                multiview: None,
                cache: None,
            })
        };

        let pipeline_8bit = build(wgpu::TextureFormat::Rgba8Unorm);
        let pipeline_16bit = with_16bit.then(|| build(wgpu::TextureFormat::Rgba16Unorm));

        Self {
            uniform_layout,
            texture_layout,
            plane_sampler,
            pipeline_8bit,
            pipeline_16bit,
        }
    }

    /// Pipeline for the given attachment depth. Falls back to the 8-bit
    /// pipeline when 16-bit attachments are unsupported.
    #[must_use]
    pub fn select(&self, depth: BitDepth) -> &wgpu::RenderPipeline {
        if depth.is_16bit_storage() {
            self.pipeline_16bit.as_ref().unwrap_or(&self.pipeline_8bit)
        } else {
            &self.pipeline_8bit
        }
    }

    /// Whether 16-bit attachments are available on this device.
    #[must_use]
    pub fn has_16bit(&self) -> bool {
        self.pipeline_16bit.is_some()
    }
}
