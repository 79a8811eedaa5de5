//! Staging Buffer Pool
//!
//! Host-visible buffers for plane uploads and attachment readback, keyed
//! by `(size, usage)`. Upload buffers come out of the pool already
//! mapped; releasing one schedules a re-map so the next handout is
//! write-ready without blocking, which is the wgpu rendition of the
//! persistently-mapped staging the pipeline expects.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use rustc_hash::FxHashMap;

/// Direction of a staging buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BufferUsage {
    /// Host → device (plane uploads). Mapped for writing while pooled.
    Upload,
    /// Device → host (attachment readback). Mapped on fence signal.
    Readback,
}

/// One pooled staging buffer.
pub struct PooledBuffer {
    pub buffer: wgpu::Buffer,
    pub size: u64,
    pub usage: BufferUsage,
    /// For upload buffers: whether the post-release re-map completed.
    mapped: Arc<AtomicBool>,
}

impl PooledBuffer {
    #[must_use]
    pub fn is_mapped(&self) -> bool {
        self.mapped.load(Ordering::Acquire)
    }
}

/// Pool of staging buffers keyed by `(size, usage)`.
pub struct BufferPool {
    free: FxHashMap<(u64, BufferUsage), Vec<PooledBuffer>>,
}

impl BufferPool {
    #[must_use]
    pub fn new() -> Self {
        Self {
            free: FxHashMap::default(),
        }
    }

    /// Hand out a buffer of exactly `size` bytes.
    ///
    /// Upload buffers are guaranteed mapped and writable on return.
    pub fn acquire(&mut self, device: &wgpu::Device, size: u64, usage: BufferUsage) -> PooledBuffer {
        if let Some(bucket) = self.free.get_mut(&(size, usage)) {
            // Prefer a buffer whose re-map already completed.
            if let Some(pos) = bucket
                .iter()
                .position(|b| usage == BufferUsage::Readback || b.is_mapped())
            {
                return bucket.swap_remove(pos);
            }
        }

        let (wgpu_usage, mapped_at_creation) = match usage {
            BufferUsage::Upload => (
                wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::MAP_WRITE,
                true,
            ),
            BufferUsage::Readback => (
                wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
                false,
            ),
        };

        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("mixer staging buffer"),
            size,
            usage: wgpu_usage,
            mapped_at_creation,
        });

        PooledBuffer {
            buffer,
            size,
            usage,
            mapped: Arc::new(AtomicBool::new(mapped_at_creation)),
        }
    }

    /// Return a buffer to the pool.
    ///
    /// The buffer must no longer be referenced by in-flight GPU work.
    /// Upload buffers get their re-map scheduled here; readback buffers
    /// are expected back unmapped.
    pub fn release(&mut self, pooled: PooledBuffer) {
        if pooled.usage == BufferUsage::Upload {
            pooled.mapped.store(false, Ordering::Release);
            let flag = Arc::clone(&pooled.mapped);
            pooled
                .buffer
                .slice(..)
                .map_async(wgpu::MapMode::Write, move |result| {
                    if result.is_ok() {
                        flag.store(true, Ordering::Release);
                    }
                });
        }
        self.free
            .entry((pooled.size, pooled.usage))
            .or_default()
            .push(pooled);
    }

    /// Drop every pooled buffer.
    pub fn clear_free(&mut self) {
        self.free.clear();
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}
