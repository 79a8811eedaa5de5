//! GPU Texture Arena
//!
//! Pooled textures for plane uploads and render attachments.
//!
//! # Design
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                    TexturePool                      │
//! │                                                     │
//! │  arena: SlotMap<TextureKey, TextureRecord>          │
//! │  free:  FxHashMap<TextureDesc, Vec<TextureKey>>     │
//! │                                                     │
//! │  acquire() → TextureKey   (fresh generation)        │
//! │  release(TextureKey)      (back to the free bucket) │
//! │  get(TextureKey)          (None for stale keys)     │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! Draw records and in-flight frame contexts hold plain [`TextureKey`]s
//! instead of reference-counted texture handles; the pool owns every
//! texture. Recycling removes and re-inserts the arena record, so a key
//! that outlived its handout resolves to `None` instead of aliasing the
//! next user of the same texture.
//!
//! The pool lives on the render thread; the task channel provides all
//! cross-thread ordering.

use rustc_hash::FxHashMap;
use slotmap::SlotMap;

use crate::frame::pixel_format::BitDepth;

slotmap::new_key_type! {
    /// Generational handle to a pooled texture.
    pub struct TextureKey;
}

/// What a pooled texture is for. Plane textures are sampled uploads;
/// attachments are render targets that are also sampled and copied out.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TextureKind {
    Plane,
    Attachment,
}

/// Recycling key of a pooled texture.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TextureDesc {
    pub width: u32,
    pub height: u32,
    /// Component count. For planes this selects the storage format
    /// (three-component sources are expanded to four at upload); for
    /// attachments it is the logical channel count only — attachment
    /// storage is always four-channel so one pipeline serves every
    /// target.
    pub components: u32,
    pub depth: BitDepth,
    pub kind: TextureKind,
}

impl TextureDesc {
    #[must_use]
    pub fn format(&self) -> wgpu::TextureFormat {
        let wide = self.depth.is_16bit_storage();
        match self.kind {
            TextureKind::Attachment => {
                if wide {
                    wgpu::TextureFormat::Rgba16Unorm
                } else {
                    wgpu::TextureFormat::Rgba8Unorm
                }
            }
            TextureKind::Plane => match (self.components, wide) {
                (1, false) => wgpu::TextureFormat::R8Unorm,
                (2, false) => wgpu::TextureFormat::Rg8Unorm,
                (4, false) => wgpu::TextureFormat::Rgba8Unorm,
                (1, true) => wgpu::TextureFormat::R16Unorm,
                (2, true) => wgpu::TextureFormat::Rg16Unorm,
                (4, true) => wgpu::TextureFormat::Rgba16Unorm,
                _ => unreachable!("unsupported component count {}", self.components),
            },
        }
    }

    #[must_use]
    pub fn usage(&self) -> wgpu::TextureUsages {
        match self.kind {
            TextureKind::Plane => {
                wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST
            }
            TextureKind::Attachment => {
                wgpu::TextureUsages::RENDER_ATTACHMENT
                    | wgpu::TextureUsages::TEXTURE_BINDING
                    | wgpu::TextureUsages::COPY_SRC
                    | wgpu::TextureUsages::COPY_DST
            }
        }
    }

    /// Bytes per pixel as stored on the GPU.
    #[must_use]
    pub fn bytes_per_pixel(&self) -> u32 {
        let components = match self.kind {
            TextureKind::Attachment => 4,
            TextureKind::Plane => self.components,
        };
        components * self.depth.bytes_per_component() as u32
    }
}

/// One pooled texture with its pre-built view.
pub struct TextureRecord {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub desc: TextureDesc,
    /// Whether the next pass using this texture as a target still has to
    /// clear it.
    pub needs_clear: bool,
}

/// Arena-backed texture pool.
pub struct TexturePool {
    arena: SlotMap<TextureKey, TextureRecord>,
    free: FxHashMap<TextureDesc, Vec<TextureKey>>,
}

impl TexturePool {
    #[must_use]
    pub fn new() -> Self {
        Self {
            arena: SlotMap::with_key(),
            free: FxHashMap::default(),
        }
    }

    /// Hand out a texture matching `desc`, recycling a free one when
    /// possible. The returned key always carries a fresh generation.
    pub fn acquire(&mut self, device: &wgpu::Device, desc: TextureDesc) -> TextureKey {
        if let Some(key) = self.free.get_mut(&desc).and_then(Vec::pop) {
            // Re-insert to bump the generation so stale keys die.
            let mut record = self
                .arena
                .remove(key)
                .expect("free list entries are always live");
            record.needs_clear = true;
            return self.arena.insert(record);
        }

        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("mixer pooled texture"),
            size: wgpu::Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: desc.format(),
            usage: desc.usage(),
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        self.arena.insert(TextureRecord {
            texture,
            view,
            desc,
            needs_clear: true,
        })
    }

    /// Return a texture to its free bucket. Stale keys are ignored.
    pub fn release(&mut self, key: TextureKey) {
        if let Some(record) = self.arena.get(key) {
            self.free.entry(record.desc).or_default().push(key);
        }
    }

    #[must_use]
    pub fn get(&self, key: TextureKey) -> Option<&TextureRecord> {
        self.arena.get(key)
    }

    pub fn get_mut(&mut self, key: TextureKey) -> Option<&mut TextureRecord> {
        self.arena.get_mut(key)
    }

    /// Drop every free texture (periodic GC after resolution changes).
    pub fn clear_free(&mut self) {
        for (_, keys) in self.free.drain() {
            for key in keys {
                self.arena.remove(key);
            }
        }
    }

    /// Total number of textures managed by the pool.
    #[must_use]
    pub fn total_texture_count(&self) -> usize {
        self.arena.len()
    }
}

impl Default for TexturePool {
    fn default() -> Self {
        Self::new()
    }
}
