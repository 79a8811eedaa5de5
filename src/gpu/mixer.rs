//! GPU Mixer Stack and Render Driver
//!
//! Implements the visitor API over the render device: producers push
//! transforms and frames, `render` drives a full-frame composite.
//!
//! Plane uploads are dispatched to the render thread at `visit` time so
//! they overlap with the rest of the tick; the render task later finds
//! the textures already resident. Geometry is resolved at render time,
//! when the output format (and with it the aspect ratio) is known.
//!
//! Layer routing per field pass:
//!
//! ```text
//! is_key item ──▶ local_key matte (accumulated)
//! is_mix item ──▶ local_mix accumulator (additive keyer)
//! fill item   ──▶ layer output, consuming local_key + layer_key
//! layer end   ──▶ local_key becomes next layer's layer_key
//! non-normal blend layers composite through an intermediate attachment
//! ```

use std::sync::Arc;

use smallvec::SmallVec;

use crate::errors::{MixerError, Result};
use crate::frame::geometry::FrameGeometry;
use crate::frame::pixel_format::{BitDepth, PixelFormat, PixelFormatDesc};
use crate::frame::transform::{BlendMode, FieldMode, FrameTransform, ImageTransform, Keyer};
use crate::frame::{Frame, VideoFormat, still_survives_dejitter};
use crate::gpu::buffer::BufferUsage;
use crate::gpu::device::{DeviceState, RenderDevice};
use crate::gpu::kernel::{DrawSpec, build_draw};
use crate::gpu::pass::{self, DrawRecord, ReadbackPlan};
use crate::gpu::texture::{TextureDesc, TextureKey, TextureKind, TexturePool};
use crate::settings::MixerSettings;
use crate::util::future::{AsyncHandle, FrameFuture, FramePromise, promise};

// ─── Stack bookkeeping ────────────────────────────────────────────────────────

/// One node of the pushed-transform chain. Items snapshot the chain head
/// so geometry can be resolved later against the output format.
struct TransformNode {
    parent: Option<Arc<TransformNode>>,
    transform: ImageTransform,
}

struct StackEntry {
    /// Color-value composition of the chain, for visit-time checks.
    composed: ImageTransform,
    node: Option<Arc<TransformNode>>,
}

struct GpuItem {
    desc: PixelFormatDesc,
    textures: AsyncHandle<SmallVec<[TextureKey; 4]>>,
    node: Option<Arc<TransformNode>>,
    geometry: FrameGeometry,
}

struct GpuLayer {
    blend_mode: BlendMode,
    items: Vec<GpuItem>,
}

/// Item with uploaded textures and fully resolved transforms; what the
/// field passes actually consume.
#[derive(Clone)]
struct ResolvedItem {
    desc: PixelFormatDesc,
    planes: SmallVec<[TextureKey; 4]>,
    transforms: crate::transform::DrawTransforms,
    geometry: FrameGeometry,
}

#[derive(Clone)]
struct ResolvedLayer {
    blend_mode: BlendMode,
    items: Vec<ResolvedItem>,
}

// ─── Mixer ────────────────────────────────────────────────────────────────────

/// GPU-accelerated image mixer.
pub struct GpuImageMixer {
    device: RenderDevice,
    settings: MixerSettings,
    transform_stack: Vec<StackEntry>,
    layers: Vec<GpuLayer>,
    layer_balance: i64,
    stack_underflow: bool,
}

impl GpuImageMixer {
    pub fn new(settings: MixerSettings) -> Result<Self> {
        let device = RenderDevice::new(&settings)?;
        log::info!("Initialized GPU accelerated image mixer");
        Ok(Self {
            device,
            settings,
            transform_stack: vec![StackEntry {
                composed: ImageTransform::default(),
                node: None,
            }],
            layers: Vec::new(),
            layer_balance: 0,
            stack_underflow: false,
        })
    }

    pub fn begin_layer(&mut self, blend_mode: BlendMode) {
        self.layers.push(GpuLayer {
            blend_mode,
            items: Vec::new(),
        });
        self.layer_balance += 1;
    }

    pub fn end_layer(&mut self) {
        self.layer_balance -= 1;
    }

    pub fn push(&mut self, transform: &FrameTransform) {
        let top = self.transform_stack.last().expect("stack is never empty");
        let node = Arc::new(TransformNode {
            parent: top.node.clone(),
            transform: transform.image_transform.clone(),
        });
        let composed = top.composed.combined_with(&transform.image_transform);
        self.transform_stack.push(StackEntry {
            composed,
            node: Some(node),
        });
    }

    pub fn pop(&mut self) {
        if self.transform_stack.len() > 1 {
            self.transform_stack.pop();
        } else {
            self.stack_underflow = true;
        }
    }

    /// Record a frame under the current transform. Invalid frames are
    /// silently dropped per the real-time best-effort contract.
    pub fn visit(&mut self, frame: &Frame) {
        let desc = frame.pixel_format_desc();
        if desc.format == PixelFormat::Invalid {
            return;
        }
        if desc.planes.is_empty() || !desc.planes_match_format() {
            return;
        }
        if desc.planes[0].size < 16 {
            return;
        }
        if frame.plane_count() != desc.planes.len() {
            return;
        }
        for (i, plane) in desc.planes.iter().enumerate() {
            if frame.plane_data(i).len() < plane.size {
                return;
            }
        }

        let top = self.transform_stack.last().expect("stack is never empty");
        if top.composed.field_mode.is_empty() {
            return;
        }

        // Start the plane uploads right away; the render task will find
        // them resident.
        let upload_desc = desc.clone();
        let planes: Vec<Arc<[u8]>> = (0..frame.plane_count())
            .map(|i| frame.plane_handle(i))
            .collect();
        let (keys_promise, keys_handle) = promise();
        self.device.dispatch(move |state| {
            keys_promise.resolve(state.upload_frame_planes(&upload_desc, &planes));
        });

        let item = GpuItem {
            desc: desc.clone(),
            textures: keys_handle,
            node: top.node.clone(),
            geometry: frame.geometry().clone(),
        };

        if self.layers.is_empty() {
            // Layerless producers get an implicit normal layer.
            self.layers.push(GpuLayer {
                blend_mode: BlendMode::Normal,
                items: Vec::new(),
            });
        }
        self.layers
            .last_mut()
            .expect("just ensured non-empty")
            .items
            .push(item);
    }

    /// Allocate a zeroed frame for a producer to fill.
    #[must_use]
    pub fn create_frame(&self, desc: PixelFormatDesc) -> Frame {
        Frame::allocate(desc)
    }

    /// Compose every recorded layer into one output raster.
    pub fn render(&mut self, format: &VideoFormat) -> Result<FrameFuture> {
        if format.width == 0 || format.height == 0 {
            return Err(MixerError::InvalidArgument(
                "output dimensions must be positive".into(),
            ));
        }

        let balanced =
            self.transform_stack.len() == 1 && self.layer_balance == 0 && !self.stack_underflow;
        if !balanced {
            self.reset();
            return Err(MixerError::InvalidState(
                "unbalanced push/pop or begin_layer/end_layer at render".into(),
            ));
        }

        let layers = std::mem::take(&mut self.layers);

        if self.device.is_lost() {
            self.release_items(layers);
            return Ok(self.reinitialize());
        }

        let (promise, future) = FrameFuture::pair();
        let format = *format;
        let chroma_enabled = self.settings.chroma_key;
        let blend_modes_enabled = self.settings.blend_modes;
        // The upload tasks of every visited frame precede this task in
        // the inbox, so the texture handles resolve without waiting.
        self.device.dispatch(move |state| {
            let resolved = resolve_layers(layers, &format);
            render_frame(
                state,
                resolved,
                &format,
                chroma_enabled,
                blend_modes_enabled,
                promise,
            );
        });

        Ok(future)
    }

    fn reset(&mut self) {
        self.transform_stack.truncate(1);
        self.transform_stack[0] = StackEntry {
            composed: ImageTransform::default(),
            node: None,
        };
        let layers = std::mem::take(&mut self.layers);
        self.release_items(layers);
        self.layer_balance = 0;
        self.stack_underflow = false;
    }

    /// One automatic re-initialization after device loss. The current
    /// frame is dropped either way; only subsequent frames can succeed.
    fn reinitialize(&mut self) -> FrameFuture {
        log::error!("GPU device lost; attempting re-initialization");
        match RenderDevice::new(&self.settings) {
            Ok(device) => {
                self.device = device;
                FrameFuture::ready(Err(MixerError::OperationFailed(
                    "device re-initialized; frame dropped".into(),
                )))
            }
            Err(err) => FrameFuture::ready(Err(MixerError::OperationFailed(format!(
                "device re-initialization failed: {err}"
            )))),
        }
    }

    fn release_items(&self, layers: Vec<GpuLayer>) {
        for layer in layers {
            for item in layer.items {
                let handle = item.textures;
                self.device.dispatch(move |state| {
                    if let Some(keys) = handle.try_take() {
                        for key in keys {
                            state.textures.release(key);
                        }
                    }
                });
            }
        }
    }
}

impl Drop for GpuImageMixer {
    fn drop(&mut self) {
        let layers = std::mem::take(&mut self.layers);
        self.release_items(layers);
    }
}

/// Materialize recorded layers: take the uploaded texture keys, fold
/// the transform chains against the output aspect ratio, and de-jitter
/// stills for interlaced outputs.
fn resolve_layers(layers: Vec<GpuLayer>, format: &VideoFormat) -> Vec<ResolvedLayer> {
    let aspect = format.aspect_ratio();
    let mut resolved: Vec<ResolvedLayer> = layers
        .into_iter()
        .map(|layer| ResolvedLayer {
            blend_mode: layer.blend_mode,
            items: layer
                .items
                .into_iter()
                .filter_map(|item| {
                    Some(ResolvedItem {
                        desc: item.desc,
                        planes: item.textures.try_take()?,
                        transforms: resolve_transforms(item.node.as_deref(), aspect),
                        geometry: item.geometry,
                    })
                })
                .collect(),
        })
        .collect();

    if !format.is_progressive() {
        for layer in &mut resolved {
            layer.items.retain(|item| {
                still_survives_dejitter(&item.transforms.image_transform, format.field_mode)
            });
            for item in &mut layer.items {
                if item.transforms.image_transform.is_still {
                    item.transforms.image_transform.field_mode = FieldMode::PROGRESSIVE;
                }
            }
        }
    }

    resolved
}

/// Fold a pushed-transform chain into resolver state, outermost first.
fn resolve_transforms(
    node: Option<&TransformNode>,
    aspect_ratio: f64,
) -> crate::transform::DrawTransforms {
    let mut chain = Vec::new();
    let mut cursor = node;
    while let Some(n) = cursor {
        chain.push(&n.transform);
        cursor = n.parent.as_deref();
    }

    let mut transforms = crate::transform::DrawTransforms::default();
    for transform in chain.into_iter().rev() {
        transforms = transforms.combine_transform(transform, aspect_ratio);
    }
    transforms
}

// ─── Render driver (render thread) ────────────────────────────────────────────

fn render_frame(
    state: &mut DeviceState,
    layers: Vec<ResolvedLayer>,
    format: &VideoFormat,
    chroma_enabled: bool,
    blend_modes_enabled: bool,
    promise: FramePromise,
) {
    let depth = state.bit_depth;
    let plane_keys: Vec<TextureKey> = layers
        .iter()
        .flat_map(|l| l.items.iter().flat_map(|i| i.planes.iter().copied()))
        .collect();

    if layers.iter().all(|layer| layer.items.is_empty()) {
        // Bypass the GPU with an empty frame.
        for key in plane_keys {
            state.textures.release(key);
        }
        promise.resolve(Ok(vec![0; format.size_bytes(depth)]));
        return;
    }

    let ctx_index = match state.acquire_context() {
        Ok(index) => index,
        Err(err) => {
            for key in plane_keys {
                state.textures.release(key);
            }
            promise.resolve(Err(err));
            return;
        }
    };

    let width = format.width as u32;
    let height = format.height as u32;

    let attachment_desc = |components: u32| TextureDesc {
        width,
        height,
        components,
        depth,
        kind: TextureKind::Attachment,
    };

    let mut attachments: Vec<TextureKey> = Vec::new();
    let mut records: Vec<DrawRecord> = Vec::new();

    let default_attachment = state.textures.acquire(&state.device, attachment_desc(4));
    attachments.push(default_attachment);

    {
        let DeviceState {
            device, textures, ..
        } = state;
        let mut driver = FieldDriver {
            device,
            textures,
            records: &mut records,
            attachments: &mut attachments,
            attachment_desc: &attachment_desc,
            default_attachment,
            format,
            depth,
            chroma_enabled,
            blend_modes_enabled,
        };

        if format.is_progressive() {
            driver.draw_field(layers, FieldMode::PROGRESSIVE);
        } else {
            driver.draw_field(layers.clone(), FieldMode::UPPER);
            driver.draw_field(layers, FieldMode::LOWER);
        }
    }

    // ── Submit and read back ───────────────────────────────────────────
    let row_bytes = width * 4 * depth.bytes_per_component() as u32;
    let bytes_per_row = row_bytes.next_multiple_of(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT);
    let readback_buffer = state.buffers.acquire(
        &state.device,
        u64::from(bytes_per_row) * u64::from(height),
        BufferUsage::Readback,
    );

    let commit_result = {
        let DeviceState {
            device,
            queue,
            pipeline,
            textures,
            contexts,
            black_view,
            ..
        } = state;
        let ctx = &mut contexts[ctx_index];

        ctx.in_flight.extend(plane_keys);
        ctx.in_flight.extend(attachments.iter().copied());

        pass::commit(
            &records,
            device,
            queue,
            pipeline,
            textures,
            ctx,
            black_view,
            width,
            height,
            depth,
            Some(&ReadbackPlan {
                buffer: &readback_buffer.buffer,
                bytes_per_row,
            }),
            default_attachment,
        )
    };

    match commit_result {
        Ok(_fence) => {
            state.register_readback(readback_buffer, promise, height, bytes_per_row, row_bytes);
        }
        Err(err) => {
            state.buffers.release(readback_buffer);
            promise.resolve(Err(err));
        }
    }
}

/// Per-field draw routing; borrows the pool so attachments can be
/// created on demand.
struct FieldDriver<'a> {
    device: &'a wgpu::Device,
    textures: &'a mut TexturePool,
    records: &'a mut Vec<DrawRecord>,
    attachments: &'a mut Vec<TextureKey>,
    attachment_desc: &'a dyn Fn(u32) -> TextureDesc,
    default_attachment: TextureKey,
    format: &'a VideoFormat,
    depth: BitDepth,
    chroma_enabled: bool,
    blend_modes_enabled: bool,
}

impl FieldDriver<'_> {
    fn acquire_attachment(&mut self, components: u32) -> TextureKey {
        let key = self
            .textures
            .acquire(self.device, (self.attachment_desc)(components));
        self.attachments.push(key);
        key
    }

    fn draw_field(&mut self, mut layers: Vec<ResolvedLayer>, field: FieldMode) {
        let mut layer_key: Option<TextureKey> = None;

        for layer in &mut layers {
            // Mask out fields and drop items that end up empty.
            for item in &mut layer.items {
                item.transforms.image_transform.field_mode &= field;
            }
            layer
                .items
                .retain(|item| !item.transforms.image_transform.field_mode.is_empty());
            if layer.items.is_empty() {
                continue;
            }

            let mut local_key: Option<TextureKey> = None;
            let mut local_mix: Option<TextureKey> = None;

            if layer.blend_mode != BlendMode::Normal && self.blend_modes_enabled {
                // Blended layers composite through their own attachment.
                let layer_texture = self.acquire_attachment(4);

                for item in layer.items.drain(..) {
                    self.draw_item(item, layer_texture, &layer_key, &mut local_key, &mut local_mix, field);
                }

                self.draw_attachment(local_mix.take(), layer_texture, BlendMode::Normal, field);
                self.draw_attachment(Some(layer_texture), self.default_attachment, layer.blend_mode, field);
            } else {
                // Fast path: straight onto the target.
                for item in layer.items.drain(..) {
                    self.draw_item(
                        item,
                        self.default_attachment,
                        &layer_key,
                        &mut local_key,
                        &mut local_mix,
                        field,
                    );
                }

                self.draw_attachment(local_mix.take(), self.default_attachment, BlendMode::Normal, field);
            }

            // The matte accumulated here keys the next layer.
            layer_key = local_key;
        }
    }

    fn draw_item(
        &mut self,
        item: ResolvedItem,
        target: TextureKey,
        layer_key: &Option<TextureKey>,
        local_key: &mut Option<TextureKey>,
        local_mix: &mut Option<TextureKey>,
        field: FieldMode,
    ) {
        let image = &item.transforms.image_transform;

        if image.is_key {
            let key_texture = match *local_key {
                Some(key) => key,
                None => {
                    let key = self.acquire_attachment(1);
                    *local_key = Some(key);
                    key
                }
            };
            self.push_record(&item, key_texture, None, None, Keyer::Linear, field);
        } else if image.is_mix {
            let mix_texture = match *local_mix {
                Some(key) => key,
                None => {
                    let key = self.acquire_attachment(4);
                    *local_mix = Some(key);
                    key
                }
            };
            self.push_record(
                &item,
                mix_texture,
                local_key.take(),
                *layer_key,
                Keyer::Additive,
                field,
            );
        } else {
            // Pending mix output composites under this item.
            self.draw_attachment(local_mix.take(), target, BlendMode::Normal, field);
            self.push_record(&item, target, local_key.take(), *layer_key, Keyer::Linear, field);
        }
    }

    fn push_record(
        &mut self,
        item: &ResolvedItem,
        target: TextureKey,
        local_key: Option<TextureKey>,
        layer_key: Option<TextureKey>,
        keyer: Keyer,
        field: FieldMode,
    ) {
        let spec = DrawSpec {
            pix_desc: &item.desc,
            transforms: &item.transforms,
            geometry: &item.geometry,
            // Item draws always blend normal; layer blend modes apply
            // when the layer attachment composites onto the target.
            blend_mode: BlendMode::Normal,
            keyer,
            has_local_key: local_key.is_some(),
            has_layer_key: layer_key.is_some(),
            aspect_ratio: self.format.aspect_ratio(),
            target_width: self.format.width,
            target_height: self.format.height,
            field_mode: item.transforms.image_transform.field_mode & field,
        };

        if let Some((coords, uniforms)) = build_draw(&spec, self.chroma_enabled, self.blend_modes_enabled)
        {
            self.records.push(DrawRecord {
                target,
                planes: item.planes.clone(),
                local_key,
                layer_key,
                coords,
                uniforms,
            });
        }
    }

    /// Draw one full-frame attachment onto another (mix flushes and
    /// layer composites).
    fn draw_attachment(
        &mut self,
        source: Option<TextureKey>,
        target: TextureKey,
        blend_mode: BlendMode,
        field: FieldMode,
    ) {
        let Some(source) = source else { return };

        let mut desc = PixelFormatDesc::bgra(self.format.width, self.format.height);
        // Attachments hold full-range data at storage depth; no
        // precision rescale applies.
        desc.bit_depth = if self.depth.is_16bit_storage() {
            BitDepth::Bit16
        } else {
            BitDepth::Bit8
        };

        let transforms = crate::transform::DrawTransforms::default();
        let geometry = FrameGeometry::full_frame();
        let spec = DrawSpec {
            pix_desc: &desc,
            transforms: &transforms,
            geometry: &geometry,
            blend_mode,
            keyer: Keyer::Linear,
            has_local_key: false,
            has_layer_key: false,
            aspect_ratio: self.format.aspect_ratio(),
            target_width: self.format.width,
            target_height: self.format.height,
            field_mode: field,
        };

        if let Some((coords, uniforms)) = build_draw(&spec, self.chroma_enabled, self.blend_modes_enabled)
        {
            self.records.push(DrawRecord {
                target,
                planes: SmallVec::from_slice(&[source]),
                local_key: None,
                layer_key: None,
                coords,
                uniforms,
            });
        }
    }
}
