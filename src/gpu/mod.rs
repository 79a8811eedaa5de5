//! GPU Compositing Path
//!
//! Layered architecture over one headless wgpu device:
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │                GpuImageMixer                │
//! │        (visitor API, render driver)         │
//! ├─────────────────────────────────────────────┤
//! │     kernel      │      pass planner         │
//! │ (draw building) │ (grouping, snapshots)     │
//! ├─────────────────────────────────────────────┤
//! │  TexturePool  │  BufferPool  │ ImagePipeline│
//! ├─────────────────────────────────────────────┤
//! │        RenderDevice (dedicated thread)      │
//! └─────────────────────────────────────────────┘
//! ```

pub mod buffer;
pub mod context;
pub mod device;
pub mod kernel;
pub mod mixer;
pub mod pass;
pub mod pipeline;
pub mod texture;

pub use mixer::GpuImageMixer;
