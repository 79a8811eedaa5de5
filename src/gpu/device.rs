//! Render Thread and Device State
//!
//! The device context runs on one dedicated thread. All command
//! recording, submission and fence management happen there; callers post
//! boxed tasks through a bounded channel and receive futures.
//!
//! ```text
//!  producers ──send──▶ [flume inbox, 256] ──▶ render thread
//!                                              │  upload planes
//!                                              │  encode + submit frames
//!                                              │  pump readbacks
//!                                              ▼
//!                                         FrameFuture resolution
//! ```
//!
//! A full inbox suspends the sender, which is the mixer's backpressure.
//! Between tasks the thread pumps the device so map callbacks run and
//! pending readbacks resolve; a readback that exceeds its deadline fails
//! only its own frame.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use smallvec::SmallVec;

use crate::errors::{MixerError, Result};
use crate::frame::pixel_format::{BitDepth, PixelFormatDesc};
use crate::gpu::buffer::{BufferPool, BufferUsage, PooledBuffer};
use crate::gpu::context;
use crate::gpu::pass::{FENCE_TIMEOUT, FRAME_CONTEXTS, FrameContext};
use crate::gpu::pipeline::ImagePipeline;
use crate::gpu::texture::{TextureDesc, TextureKey, TextureKind, TexturePool};
use crate::settings::MixerSettings;
use crate::util::fence::SubmissionFence;
use crate::util::future::FramePromise;

/// Capacity of the render thread's inbox.
const INBOX_CAPACITY: usize = 256;

/// Work posted to the render thread.
pub type Task = Box<dyn FnOnce(&mut DeviceState) + Send + 'static>;

/// Everything the render thread owns.
pub struct DeviceState {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub pipeline: ImagePipeline,
    pub textures: TexturePool,
    pub buffers: BufferPool,
    pub contexts: Vec<FrameContext>,
    current_context: usize,
    pub black_view: wgpu::TextureView,
    _black_texture: wgpu::Texture,
    /// Effective attachment depth (settings depth, or 8-bit when the
    /// adapter cannot do better).
    pub bit_depth: BitDepth,
    pending_readbacks: Vec<PendingReadback>,
    pending_staging: Vec<(SubmissionFence, PooledBuffer)>,
    consecutive_fence_timeouts: u32,
    /// Shared with the owning [`RenderDevice`]; set when the queue stops
    /// making progress or reports an unrecoverable error.
    lost: Arc<AtomicBool>,
}

struct PendingReadback {
    buffer: Option<PooledBuffer>,
    mapped: Arc<AtomicBool>,
    promise: Option<FramePromise>,
    started: Instant,
    height: u32,
    bytes_per_row: u32,
    row_bytes: u32,
}

impl DeviceState {
    fn new(
        device: wgpu::Device,
        queue: wgpu::Queue,
        use_16bit: bool,
        settings: &MixerSettings,
        lost: Arc<AtomicBool>,
    ) -> Self {
        let pipeline = ImagePipeline::new(&device, use_16bit);

        let black_texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("mixer black texture"),
            size: wgpu::Extent3d {
                width: 1,
                height: 1,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        queue.write_texture(
            black_texture.as_image_copy(),
            &[0, 0, 0, 0],
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(4),
                rows_per_image: Some(1),
            },
            wgpu::Extent3d {
                width: 1,
                height: 1,
                depth_or_array_layers: 1,
            },
        );
        let black_view = black_texture.create_view(&wgpu::TextureViewDescriptor::default());

        let bit_depth = if use_16bit { settings.bit_depth } else { BitDepth::Bit8 };

        Self {
            device,
            queue,
            pipeline,
            textures: TexturePool::new(),
            buffers: BufferPool::new(),
            contexts: (0..FRAME_CONTEXTS).map(|_| FrameContext::default()).collect(),
            current_context: 0,
            black_view,
            _black_texture: black_texture,
            bit_depth,
            pending_readbacks: Vec::new(),
            pending_staging: Vec::new(),
            consecutive_fence_timeouts: 0,
            lost,
        }
    }

    /// Rotate to the next frame context, waiting on its previous
    /// submission with the pool's fence timeout.
    pub fn acquire_context(&mut self) -> Result<usize> {
        self.current_context = (self.current_context + 1) % self.contexts.len();
        match self.contexts[self.current_context].begin_frame(&mut self.textures) {
            Ok(()) => {
                self.consecutive_fence_timeouts = 0;
                Ok(self.current_context)
            }
            Err(err) => {
                self.note_fence_timeout();
                Err(err)
            }
        }
    }

    /// Repeated fence timeouts mean the queue stopped making progress;
    /// treat that as device loss so the owner can re-initialize.
    fn note_fence_timeout(&mut self) {
        self.consecutive_fence_timeouts += 1;
        if self.consecutive_fence_timeouts >= 2 {
            self.lost.store(true, Ordering::Release);
        }
    }

    /// Upload every plane of a frame, expanding 3-component packed rows
    /// to 4 components.
    ///
    /// Returns the plane texture keys. Staging buffers recycle once the
    /// upload's fence signals.
    pub fn upload_frame_planes(
        &mut self,
        desc: &PixelFormatDesc,
        planes: &[Arc<[u8]>],
    ) -> SmallVec<[TextureKey; 4]> {
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("mixer plane upload"),
            });
        let mut keys = SmallVec::new();
        let mut staging_buffers = Vec::with_capacity(planes.len());

        for (plane, data) in desc.planes.iter().zip(planes) {
            // Plane stride is bytes per pixel; storage widens 3-component
            // rows to 4.
            let component_bytes = desc.bit_depth.bytes_per_component();
            let components = plane.stride / component_bytes;
            let storage_components = if components == 3 { 4 } else { components };
            let unpadded_bpr = (plane.width * storage_components * component_bytes) as u32;
            let padded_bpr = unpadded_bpr.next_multiple_of(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT);
            let staging_size = u64::from(padded_bpr) * plane.height as u64;

            let staging = self
                .buffers
                .acquire(&self.device, staging_size, BufferUsage::Upload);
            {
                let mut mapped = staging.buffer.slice(..).get_mapped_range_mut();
                for y in 0..plane.height {
                    let src_row = &data[y * plane.linesize..(y + 1) * plane.linesize];
                    let dst_row = &mut mapped[y * padded_bpr as usize..][..unpadded_bpr as usize];
                    if components == 3 {
                        // Expand to 4 components with opaque alpha.
                        let c = component_bytes;
                        for x in 0..plane.width {
                            let src = &src_row[x * 3 * c..(x * 3 + 3) * c];
                            let dst = &mut dst_row[x * 4 * c..(x + 1) * 4 * c];
                            dst[..3 * c].copy_from_slice(src);
                            for byte in &mut dst[3 * c..] {
                                *byte = 0xFF;
                            }
                        }
                    } else {
                        dst_row.copy_from_slice(src_row);
                    }
                }
            }
            staging.buffer.unmap();

            let key = self.textures.acquire(
                &self.device,
                TextureDesc {
                    width: plane.width as u32,
                    height: plane.height as u32,
                    components: storage_components as u32,
                    depth: desc.bit_depth,
                    kind: TextureKind::Plane,
                },
            );

            let record = self.textures.get(key).expect("just acquired");
            encoder.copy_buffer_to_texture(
                wgpu::TexelCopyBufferInfo {
                    buffer: &staging.buffer,
                    layout: wgpu::TexelCopyBufferLayout {
                        offset: 0,
                        bytes_per_row: Some(padded_bpr),
                        rows_per_image: Some(plane.height as u32),
                    },
                },
                record.texture.as_image_copy(),
                wgpu::Extent3d {
                    width: plane.width as u32,
                    height: plane.height as u32,
                    depth_or_array_layers: 1,
                },
            );

            staging_buffers.push(staging);
            keys.push(key);
        }

        self.queue.submit(std::iter::once(encoder.finish()));
        let fence = SubmissionFence::after_submit(&self.device, &self.queue);
        for staging in staging_buffers {
            self.pending_staging.push((fence.clone(), staging));
        }

        keys
    }

    /// Register an in-flight readback; its promise resolves in
    /// [`DeviceState::pump`] once the map callback fires.
    pub fn register_readback(
        &mut self,
        buffer: PooledBuffer,
        promise: FramePromise,
        height: u32,
        bytes_per_row: u32,
        row_bytes: u32,
    ) {
        let mapped = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&mapped);
        buffer
            .buffer
            .slice(..)
            .map_async(wgpu::MapMode::Read, move |result| {
                if result.is_ok() {
                    flag.store(true, Ordering::Release);
                }
            });

        self.pending_readbacks.push(PendingReadback {
            buffer: Some(buffer),
            mapped,
            promise: Some(promise),
            started: Instant::now(),
            height,
            bytes_per_row,
            row_bytes,
        });
    }

    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.pending_readbacks.is_empty() || !self.pending_staging.is_empty()
    }

    /// Drive map callbacks, resolve finished readbacks and recycle
    /// staging buffers whose uploads completed.
    pub fn pump(&mut self) {
        if !self.has_pending() {
            return;
        }
        let _ = self.device.poll(wgpu::PollType::Poll);

        let mut index = 0;
        while index < self.pending_readbacks.len() {
            let entry = &mut self.pending_readbacks[index];

            if entry.mapped.load(Ordering::Acquire) {
                let pooled = entry.buffer.take().expect("buffer present until resolved");
                let mut bytes =
                    Vec::with_capacity(entry.row_bytes as usize * entry.height as usize);
                {
                    let data = pooled.buffer.slice(..).get_mapped_range();
                    for y in 0..entry.height {
                        let start = (y * entry.bytes_per_row) as usize;
                        bytes.extend_from_slice(&data[start..start + entry.row_bytes as usize]);
                    }
                }
                pooled.buffer.unmap();
                self.buffers.release(pooled);

                if let Some(promise) = self.pending_readbacks[index].promise.take() {
                    promise.resolve(Ok(bytes));
                }
                self.pending_readbacks.swap_remove(index);
                continue;
            }

            if entry.started.elapsed() > FENCE_TIMEOUT {
                if let Some(promise) = entry.promise.take() {
                    promise.resolve(Err(MixerError::ResourceExhausted(
                        "timeout waiting for frame readback".into(),
                    )));
                    self.note_fence_timeout();
                }
                // The buffer stays parked until its map completes so the
                // GPU never sees it recycled out from under a copy.
            }

            index += 1;
        }

        let mut index = 0;
        while index < self.pending_staging.len() {
            if self.pending_staging[index].0.is_signaled() {
                let (_, staging) = self.pending_staging.swap_remove(index);
                self.buffers.release(staging);
            } else {
                index += 1;
            }
        }
    }

    /// Block until every pending readback either resolved or timed out.
    pub fn drain_pending(&mut self) {
        let deadline = Instant::now() + FENCE_TIMEOUT;
        while self.has_pending() && Instant::now() < deadline {
            self.pump();
            std::thread::sleep(Duration::from_micros(200));
        }
    }
}

/// Handle to the render thread.
pub struct RenderDevice {
    tx: Option<flume::Sender<Task>>,
    thread: Option<std::thread::JoinHandle<()>>,
    lost: Arc<AtomicBool>,
}

impl RenderDevice {
    /// Create the device and spawn its render thread.
    pub fn new(settings: &MixerSettings) -> Result<Self> {
        let (device, queue, use_16bit) = context::create_device(settings)?;

        let lost = Arc::new(AtomicBool::new(false));
        let lost_flag = Arc::clone(&lost);
        device.on_uncaptured_error(Box::new(move |error| {
            log::error!("GPU error: {error}");
            if matches!(error, wgpu::Error::OutOfMemory { .. } | wgpu::Error::Internal { .. }) {
                lost_flag.store(true, Ordering::Release);
            }
        }));

        let mut state = DeviceState::new(device, queue, use_16bit, settings, Arc::clone(&lost));
        let (tx, rx) = flume::bounded::<Task>(INBOX_CAPACITY);

        let thread = std::thread::Builder::new()
            .name("mixer-render".into())
            .spawn(move || {
                loop {
                    let task = if state.has_pending() {
                        match rx.recv_timeout(Duration::from_millis(1)) {
                            Ok(task) => Some(task),
                            Err(flume::RecvTimeoutError::Timeout) => None,
                            Err(flume::RecvTimeoutError::Disconnected) => break,
                        }
                    } else {
                        match rx.recv() {
                            Ok(task) => Some(task),
                            Err(_) => break,
                        }
                    };
                    if let Some(task) = task {
                        task(&mut state);
                    }
                    state.pump();
                }
                state.drain_pending();
            })
            .map_err(|e| MixerError::OperationFailed(format!("Failed to spawn render thread: {e}")))?;

        Ok(Self {
            tx: Some(tx),
            thread: Some(thread),
            lost,
        })
    }

    /// Post work to the render thread. Blocks while the inbox is full.
    pub fn dispatch<F>(&self, task: F)
    where
        F: FnOnce(&mut DeviceState) + Send + 'static,
    {
        if let Some(tx) = &self.tx {
            let _ = tx.send(Box::new(task));
        }
    }

    /// Whether the device reported an unrecoverable error.
    #[must_use]
    pub fn is_lost(&self) -> bool {
        self.lost.load(Ordering::Acquire)
    }
}

impl Drop for RenderDevice {
    fn drop(&mut self) {
        self.tx.take();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
