//! Frame Geometry
//!
//! Geometry attached to a source frame: a triangle fan of vertex /
//! texture coordinates plus a scale mode describing how the frame maps
//! into the output raster when their aspect ratios differ.

/// One vertex of a frame's triangle fan.
///
/// `texture_q` carries the perspective-correction factor; the resolver
/// premultiplies `texture_x`/`texture_y` by it and the fragment stage
/// divides it back out. `texture_r` is carried through for layout
/// compatibility but not interpolated against.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Coord {
    pub vertex_x: f64,
    pub vertex_y: f64,
    pub texture_x: f64,
    pub texture_y: f64,
    pub texture_r: f64,
    pub texture_q: f64,
}

impl Coord {
    #[must_use]
    pub fn new(vertex_x: f64, vertex_y: f64, texture_x: f64, texture_y: f64) -> Self {
        Self {
            vertex_x,
            vertex_y,
            texture_x,
            texture_y,
            texture_r: 0.0,
            texture_q: 1.0,
        }
    }
}

/// How a frame's natural size maps into the output raster.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ScaleMode {
    /// Stretch to fill the output, ignoring aspect ratio.
    #[default]
    Stretch,
    /// Uniform scale so the whole frame fits inside the output.
    Fit,
    /// Uniform scale so the frame covers the whole output.
    Fill,
    /// 1:1 pixel mapping.
    Original,
    /// Equalize the horizontal scale.
    HFill,
    /// Equalize the vertical scale.
    VFill,
}

/// Triangle-fan geometry of a frame.
#[derive(Clone, Debug, PartialEq)]
pub struct FrameGeometry {
    coords: Vec<Coord>,
    mode: ScaleMode,
}

impl FrameGeometry {
    /// A custom triangle fan.
    #[must_use]
    pub fn new(coords: Vec<Coord>, mode: ScaleMode) -> Self {
        Self { coords, mode }
    }

    /// The default full-screen textured quad.
    #[must_use]
    pub fn full_frame() -> Self {
        Self {
            coords: vec![
                Coord::new(0.0, 0.0, 0.0, 0.0),
                Coord::new(1.0, 0.0, 1.0, 0.0),
                Coord::new(1.0, 1.0, 1.0, 1.0),
                Coord::new(0.0, 1.0, 0.0, 1.0),
            ],
            mode: ScaleMode::Stretch,
        }
    }

    /// Full-screen quad with a non-default scale mode.
    #[must_use]
    pub fn full_frame_scaled(mode: ScaleMode) -> Self {
        let mut geometry = Self::full_frame();
        geometry.mode = mode;
        geometry
    }

    #[must_use]
    pub fn coords(&self) -> &[Coord] {
        &self.coords
    }

    #[must_use]
    pub fn mode(&self) -> ScaleMode {
        self.mode
    }
}

impl Default for FrameGeometry {
    fn default() -> Self {
        Self::full_frame()
    }
}
