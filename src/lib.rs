#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::too_many_arguments)]

pub mod cpu;
pub mod errors;
pub mod frame;
pub mod gpu;
pub mod mixer;
pub mod settings;
pub mod transform;
pub mod util;

pub use errors::{MixerError, Result};
pub use frame::geometry::{Coord, FrameGeometry, ScaleMode};
pub use frame::pixel_format::{BitDepth, ColorSpace, PixelFormat, PixelFormatDesc, Plane};
pub use frame::transform::{
    BlendMode, ChromaKey, Corners, CropRect, FieldMode, FrameTransform, ImageTransform, Keyer,
    Levels,
};
pub use frame::{Frame, VideoFormat};
pub use mixer::{ImageMixer, create_image_mixer};
pub use settings::{AcceleratorPath, MixerSettings};
pub use util::future::FrameFuture;
