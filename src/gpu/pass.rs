//! Render-Pass Planner and Frame Contexts
//!
//! Walks the ordered draw records of one output frame, groups adjacent
//! draws targeting the same attachment into passes, and encodes them.
//!
//! Within a pass the fragment stage reads the pixels already written to
//! the target (blend modes, keyer composition). wgpu exposes no
//! same-attachment read, so the planner snapshots the target into a
//! pooled texture before each draw that needs its current content; the
//! first draw after an attachment's clear reads a shared black texture
//! instead. The default output attachment is cleared exactly once per
//! output frame; freshly issued intermediate attachments are cleared on
//! their first use.
//!
//! A small ring of [`FrameContext`]s keeps up to three frames in
//! flight; acquiring a context waits on its previous submission with a
//! one-second timeout.

use std::ops::Range;
use std::time::Duration;

use smallvec::SmallVec;

use crate::errors::Result;
use crate::frame::geometry::Coord;
use crate::frame::pixel_format::BitDepth;
use crate::gpu::pipeline::{ImagePipeline, UNIFORM_STRIDE, UniformBlock};
use crate::gpu::texture::{TextureDesc, TextureKey, TextureKind, TexturePool};
use crate::util::fence::SubmissionFence;
use crate::util::scratch::ScratchArena;

/// How long a context-acquire may wait on the oldest in-flight frame.
pub const FENCE_TIMEOUT: Duration = Duration::from_secs(1);

/// Number of frames that may be in flight at once.
pub const FRAME_CONTEXTS: usize = 3;

/// One draw, fully resolved: geometry, uniforms and texture handles.
pub struct DrawRecord {
    pub target: TextureKey,
    pub planes: SmallVec<[TextureKey; 4]>,
    pub local_key: Option<TextureKey>,
    pub layer_key: Option<TextureKey>,
    pub coords: Vec<Coord>,
    pub uniforms: UniformBlock,
}

/// A contiguous run of draws targeting one attachment.
#[derive(Debug, PartialEq, Eq)]
pub struct PassGroup {
    pub target: TextureKey,
    pub records: Range<usize>,
}

/// Group adjacent same-target draws into passes. A new pass starts
/// exactly when the target attachment changes.
#[must_use]
pub fn plan_passes(records: &[DrawRecord]) -> Vec<PassGroup> {
    let mut groups: Vec<PassGroup> = Vec::new();
    for (index, record) in records.iter().enumerate() {
        match groups.last_mut() {
            Some(group) if group.target == record.target => {
                group.records.end = index + 1;
            }
            _ => groups.push(PassGroup {
                target: record.target,
                records: index..index + 1,
            }),
        }
    }
    groups
}

/// Readback of the default attachment appended to the frame's command
/// stream.
pub struct ReadbackPlan<'a> {
    pub buffer: &'a wgpu::Buffer,
    pub bytes_per_row: u32,
}

/// Per-frame GPU state: grown vertex/index/uniform buffers, the fence of
/// the last submission, and every pooled texture that submission still
/// references.
#[derive(Default)]
pub struct FrameContext {
    pub fence: Option<SubmissionFence>,
    pub in_flight: Vec<TextureKey>,
    pub scratch: ScratchArena,
    vertex_buffer: Option<wgpu::Buffer>,
    vertex_capacity: u64,
    index_buffer: Option<wgpu::Buffer>,
    index_capacity: u64,
    uniform_buffer: Option<wgpu::Buffer>,
    uniform_capacity: u64,
    uniform_bind_group: Option<wgpu::BindGroup>,
}

impl FrameContext {
    /// Reclaim this context for a new frame: wait for its previous
    /// submission (bounded) and return its textures to the pool.
    pub fn begin_frame(&mut self, textures: &mut TexturePool) -> Result<()> {
        if let Some(fence) = self.fence.take() {
            if let Err(err) = fence.wait_timeout(FENCE_TIMEOUT) {
                // Keep the fence so the next acquire retries instead of
                // recycling textures the GPU may still read.
                self.fence = Some(fence);
                return Err(err);
            }
        }
        for key in self.in_flight.drain(..) {
            textures.release(key);
        }
        self.scratch.reset();
        Ok(())
    }

    fn ensure_vertex_buffer(&mut self, device: &wgpu::Device, size: u64) {
        if self.vertex_capacity < size {
            let capacity = size.next_power_of_two();
            self.vertex_buffer = Some(device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("mixer vertex buffer"),
                size: capacity,
                usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            }));
            self.vertex_capacity = capacity;
        }
    }

    fn ensure_index_buffer(&mut self, device: &wgpu::Device, size: u64) {
        if self.index_capacity < size {
            let capacity = size.next_power_of_two();
            self.index_buffer = Some(device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("mixer index buffer"),
                size: capacity,
                usage: wgpu::BufferUsages::INDEX | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            }));
            self.index_capacity = capacity;
        }
    }

    fn ensure_uniform_buffer(&mut self, device: &wgpu::Device, pipeline: &ImagePipeline, size: u64) {
        if self.uniform_capacity < size {
            let capacity = size.next_power_of_two().max(UNIFORM_STRIDE);
            let buffer = device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("mixer uniform ring"),
                size: capacity,
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });
            self.uniform_bind_group = Some(device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("mixer uniform bind group"),
                layout: &pipeline.uniform_layout,
                entries: &[wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                        buffer: &buffer,
                        offset: 0,
                        size: wgpu::BufferSize::new(std::mem::size_of::<UniformBlock>() as u64),
                    }),
                }],
            }));
            self.uniform_buffer = Some(buffer);
            self.uniform_capacity = capacity;
        }
    }
}

/// Encode and submit one output frame's draw records.
///
/// Returns the submission fence. Snapshot textures acquired here are
/// parked on the context until the fence signals.
pub fn commit(
    records: &[DrawRecord],
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    pipeline: &ImagePipeline,
    textures: &mut TexturePool,
    ctx: &mut FrameContext,
    black_view: &wgpu::TextureView,
    width: u32,
    height: u32,
    depth: BitDepth,
    readback: Option<&ReadbackPlan<'_>>,
    readback_source: TextureKey,
) -> Result<SubmissionFence> {
    // ── Assemble vertex and index data ─────────────────────────────────
    // Triangle fans arrive from the resolver; the hardware draws indexed
    // triangle lists, so each fan of n vertices becomes n-2 triangles.
    let scratch = std::mem::take(&mut ctx.scratch);
    let mut draw_ranges: Vec<Range<u32>> = Vec::with_capacity(records.len());
    {
        let mut vertex_data = scratch.vec::<f32>();
        let mut index_data = scratch.vec::<u32>();
        let mut uniform_data = scratch.vec::<u8>();

        for record in records {
            let base = (vertex_data.len() / 6) as u32;
            for coord in &record.coords {
                vertex_data.push(coord.vertex_x as f32);
                vertex_data.push(coord.vertex_y as f32);
                vertex_data.push(coord.texture_x as f32);
                vertex_data.push(coord.texture_y as f32);
                vertex_data.push(coord.texture_r as f32);
                vertex_data.push(coord.texture_q as f32);
            }

            let index_start = index_data.len() as u32;
            for i in 1..record.coords.len() as u32 - 1 {
                index_data.push(base);
                index_data.push(base + i);
                index_data.push(base + i + 1);
            }
            draw_ranges.push(index_start..index_data.len() as u32);

            uniform_data.extend_from_slice(bytemuck::bytes_of(&record.uniforms));
            uniform_data.resize(uniform_data.len().next_multiple_of(UNIFORM_STRIDE as usize), 0);
        }

        if !vertex_data.is_empty() {
            ctx.ensure_vertex_buffer(device, (vertex_data.len() * 4) as u64);
            ctx.ensure_index_buffer(device, (index_data.len() * 4) as u64);
            ctx.ensure_uniform_buffer(device, pipeline, uniform_data.len() as u64);

            queue.write_buffer(
                ctx.vertex_buffer.as_ref().expect("ensured above"),
                0,
                bytemuck::cast_slice(&vertex_data),
            );
            queue.write_buffer(
                ctx.index_buffer.as_ref().expect("ensured above"),
                0,
                bytemuck::cast_slice(&index_data),
            );
            queue.write_buffer(
                ctx.uniform_buffer.as_ref().expect("ensured above"),
                0,
                &uniform_data,
            );
        }
    }
    ctx.scratch = scratch;

    // ── Encode passes ──────────────────────────────────────────────────
    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("mixer frame encoder"),
    });

    let snapshot_desc = TextureDesc {
        width,
        height,
        components: 4,
        depth,
        kind: TextureKind::Attachment,
    };

    for group in plan_passes(records) {
        for index in group.records {
            let record = &records[index];

            // Snapshot the target for the fragment stage's background
            // read, unless the target is still untouched this frame (it
            // is about to be cleared, so the background is black).
            let target_written = textures
                .get(record.target)
                .is_some_and(|r| !r.needs_clear);

            let snapshot = if target_written {
                let key = textures.acquire(device, snapshot_desc);
                let src = textures.get(record.target).expect("target is live");
                let dst = textures.get(key).expect("just acquired");
                encoder.copy_texture_to_texture(
                    src.texture.as_image_copy(),
                    dst.texture.as_image_copy(),
                    wgpu::Extent3d {
                        width,
                        height,
                        depth_or_array_layers: 1,
                    },
                );
                ctx.in_flight.push(key);
                Some(key)
            } else {
                None
            };

            let view_of = |key: Option<TextureKey>| {
                key.and_then(|k| textures.get(k))
                    .map_or(black_view, |r| &r.view)
            };

            let plane_view = |slot: usize| view_of(record.planes.get(slot).copied());

            let texture_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("mixer draw textures"),
                layout: &pipeline.texture_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(plane_view(0)),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::TextureView(plane_view(1)),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: wgpu::BindingResource::TextureView(plane_view(2)),
                    },
                    wgpu::BindGroupEntry {
                        binding: 3,
                        resource: wgpu::BindingResource::TextureView(plane_view(3)),
                    },
                    wgpu::BindGroupEntry {
                        binding: 4,
                        resource: wgpu::BindingResource::Sampler(&pipeline.plane_sampler),
                    },
                    wgpu::BindGroupEntry {
                        binding: 5,
                        resource: wgpu::BindingResource::TextureView(view_of(snapshot)),
                    },
                    wgpu::BindGroupEntry {
                        binding: 6,
                        resource: wgpu::BindingResource::TextureView(view_of(record.local_key)),
                    },
                    wgpu::BindGroupEntry {
                        binding: 7,
                        resource: wgpu::BindingResource::TextureView(view_of(record.layer_key)),
                    },
                ],
            });

            let load = if target_written {
                wgpu::LoadOp::Load
            } else {
                wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT)
            };
            if let Some(target) = textures.get_mut(record.target) {
                target.needs_clear = false;
            }

            let target_view = &textures.get(record.target).expect("target is live").view;
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("mixer draw"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: target_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load,
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                ..Default::default()
            });

            pass.set_pipeline(pipeline.select(depth));
            pass.set_bind_group(
                0,
                ctx.uniform_bind_group.as_ref().expect("ensured above"),
                &[(index as u64 * UNIFORM_STRIDE) as u32],
            );
            pass.set_bind_group(1, &texture_bind_group, &[]);
            pass.set_vertex_buffer(0, ctx.vertex_buffer.as_ref().expect("ensured above").slice(..));
            pass.set_index_buffer(
                ctx.index_buffer.as_ref().expect("ensured above").slice(..),
                wgpu::IndexFormat::Uint32,
            );
            pass.draw_indexed(draw_ranges[index].clone(), 0, 0..1);
        }
    }

    // ── Readback of the output attachment ──────────────────────────────
    if let Some(plan) = readback {
        // Every draw may have been culled; the output still has to be a
        // defined (black) frame.
        if textures.get(readback_source).is_some_and(|r| r.needs_clear) {
            let view = &textures.get(readback_source).expect("output is live").view;
            drop(encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("mixer clear"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                ..Default::default()
            }));
            if let Some(record) = textures.get_mut(readback_source) {
                record.needs_clear = false;
            }
        }

        let source = textures.get(readback_source).expect("output is live");
        encoder.copy_texture_to_buffer(
            source.texture.as_image_copy(),
            wgpu::TexelCopyBufferInfo {
                buffer: plan.buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(plan.bytes_per_row),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
    }

    queue.submit(std::iter::once(encoder.finish()));
    let fence = SubmissionFence::after_submit(device, queue);
    ctx.fence = Some(fence.clone());
    Ok(fence)
}
