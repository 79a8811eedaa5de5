//! Mixer Settings Configuration
//!
//! Configuration surface of the mixer core. The crate does not parse
//! configuration files; hosts populate [`MixerSettings`] from whatever
//! configuration layer they use and hand it to
//! [`create_image_mixer`](crate::mixer::create_image_mixer).
//!
//! | Field | Description | Default |
//! |-------|-------------|---------|
//! | `accelerator` | GPU/CPU path selection | `Auto` |
//! | `blend_modes` | Enable non-normal blend modes | `true` |
//! | `bit_depth` | Attachment bit depth | `Bit8` |
//! | `chroma_key` | Gate chroma-key evaluation | `true` |

use crate::frame::pixel_format::BitDepth;

/// Which compositing backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceleratorPath {
    /// Require the GPU path. Falls back to CPU with an error log if the
    /// device cannot be created.
    Gpu,
    /// Try the GPU path, silently fall back to CPU.
    Auto,
    /// Same as [`AcceleratorPath::Auto`].
    Default,
    /// Force the CPU fallback path.
    Cpu,
}

/// Configuration options for the mixer core.
#[derive(Debug, Clone)]
pub struct MixerSettings {
    /// Backend selection.
    pub accelerator: AcceleratorPath,

    /// Enable non-normal blend modes.
    ///
    /// When disabled, every layer's blend mode degrades to `normal` and
    /// layers take the direct-to-target fast path.
    pub blend_modes: bool,

    /// Bit depth of intermediate and output attachments.
    ///
    /// Depths above 8 bits require 16-bit normalized texture support on
    /// the GPU; the CPU fallback is always 8-bit.
    pub bit_depth: BitDepth,

    /// Gate chroma-key evaluation.
    ///
    /// When disabled, the chroma settings of incoming transforms are
    /// ignored entirely.
    pub chroma_key: bool,
}

impl Default for MixerSettings {
    fn default() -> Self {
        Self {
            accelerator: AcceleratorPath::Auto,
            blend_modes: true,
            bit_depth: BitDepth::Bit8,
            chroma_key: true,
        }
    }
}
