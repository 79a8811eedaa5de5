//! Transform-and-Crop Resolver
//!
//! Folds a stack of nested transforms into final vertex and texture
//! coordinates for one item. The pipeline per item:
//!
//! 1. Compose nested affines into per-step vertex matrices. A *step* is a
//!    segment of the stack between perspective boundaries; perspective is
//!    a per-vertex perturbation and cannot be folded into a matrix, so a
//!    non-default pin starts a new step.
//! 2. Accumulate clip quads (pre-transform of their node) and crop quads
//!    (post-transform) on the step they belong to.
//! 3. At resolve time, walk steps innermost to outermost applying each
//!    step's matrix and perspective to the vertices and every accumulated
//!    region, fill perspective-correct `q` for quads, then clip the
//!    polygon against every region edge, interpolating texture
//!    coordinates and `q` along cut edges.
//!
//! All math is `f64` (glam `DMat3`/`DVec3`, column-vector convention).

use glam::{DMat3, DVec2, DVec3};

use crate::frame::geometry::Coord;
use crate::frame::transform::{Corners, ImageTransform};

/// Sidedness epsilon for the edge classifier.
const EPSILON: f64 = 0.001;

/// Less than a pixel at 8K; duplicate-vertex pruning threshold.
const PIXEL_EPSILON: f64 = 0.0001;

// ─── Vertex matrix ────────────────────────────────────────────────────────────

/// Affine that maps a node's geometry coordinates into its parent's.
///
/// Anchor is applied first, then scale and rotation in aspect-corrected
/// space, translation last.
#[must_use]
pub fn vertex_matrix(transform: &ImageTransform, aspect_ratio: f64) -> DMat3 {
    let anchor = DMat3::from_translation(-transform.anchor);
    let aspect = DMat3::from_scale(DVec2::new(1.0, 1.0 / aspect_ratio));
    let aspect_inv = DMat3::from_scale(DVec2::new(1.0, aspect_ratio));
    let scale = DMat3::from_scale(transform.fill_scale);
    let rotation = DMat3::from_angle(transform.angle);
    let translation = DMat3::from_translation(transform.fill_translation);

    translation * aspect_inv * rotation * scale * aspect * anchor
}

// ─── Crop regions ─────────────────────────────────────────────────────────────

/// An axis-aligned rectangle lifted to a homogeneous quad so enclosing
/// transforms can carry it along.
#[derive(Clone, Debug)]
pub struct DrawCropRegion {
    /// Corners in ul, ur, lr, ll order.
    pub coords: [DVec3; 4],
}

impl DrawCropRegion {
    #[must_use]
    pub fn new(left: f64, top: f64, right: f64, bottom: f64) -> Self {
        Self {
            coords: [
                DVec3::new(left, top, 1.0),
                DVec3::new(right, top, 1.0),
                DVec3::new(right, bottom, 1.0),
                DVec3::new(left, bottom, 1.0),
            ],
        }
    }

    pub fn apply_transform(&mut self, matrix: &DMat3) {
        for coord in &mut self.coords {
            *coord = *matrix * *coord;
        }
    }
}

// ─── Transform steps ──────────────────────────────────────────────────────────

/// One perspective-delimited segment of the transform stack.
#[derive(Clone, Debug)]
pub struct TransformStep {
    pub perspective: Corners,
    pub crop_regions: Vec<DrawCropRegion>,
    pub vertex_matrix: DMat3,
}

impl TransformStep {
    #[must_use]
    pub fn identity() -> Self {
        Self {
            perspective: Corners::default(),
            crop_regions: Vec::new(),
            vertex_matrix: DMat3::IDENTITY,
        }
    }

    #[must_use]
    pub fn with_perspective(perspective: Corners) -> Self {
        Self {
            perspective,
            crop_regions: Vec::new(),
            vertex_matrix: DMat3::IDENTITY,
        }
    }
}

/// The resolved transform state an item carries out of the mixer stack.
#[derive(Clone, Debug)]
pub struct DrawTransforms {
    pub image_transform: ImageTransform,
    pub steps: Vec<TransformStep>,
}

impl Default for DrawTransforms {
    fn default() -> Self {
        Self {
            image_transform: ImageTransform::default(),
            steps: vec![TransformStep::identity()],
        }
    }
}

impl DrawTransforms {
    fn current(&self) -> &TransformStep {
        self.steps.last().expect("steps are never empty")
    }

    fn current_mut(&mut self) -> &mut TransformStep {
        self.steps.last_mut().expect("steps are never empty")
    }

    /// Compose a nested transform into this state.
    ///
    /// Clip quads are captured in the coordinate space *before* this
    /// node's matrix; crop quads after it. A non-default perspective pin
    /// splits off a new step so inner and outer perspectives never mix
    /// into one affine.
    #[must_use]
    pub fn combine_transform(&self, transform: &ImageTransform, aspect_ratio: f64) -> Self {
        let mut out = self.clone();

        let transform_before = out.current().vertex_matrix;
        let new_matrix = vertex_matrix(transform, aspect_ratio);

        out.image_transform = out.image_transform.combined_with(transform);
        out.current_mut().vertex_matrix = transform_before * new_matrix;

        if transform.enable_geometry_modifiers {
            let mut new_clip = DrawCropRegion::new(
                transform.clip_translation.x,
                transform.clip_translation.y,
                transform.clip_translation.x + transform.clip_scale.x,
                transform.clip_translation.y + transform.clip_scale.y,
            );
            new_clip.apply_transform(&transform_before);
            out.current_mut().crop_regions.push(new_clip);

            if !transform.perspective.is_default() {
                out.steps
                    .push(TransformStep::with_perspective(transform.perspective));
            }

            let mut new_crop = DrawCropRegion::new(
                transform.crop.ul.x,
                transform.crop.ul.y,
                transform.crop.lr.x,
                transform.crop.lr.y,
            );
            new_crop.apply_transform(&out.current().vertex_matrix);
            out.current_mut().crop_regions.push(new_crop);
        }

        out
    }

    /// Resolve an item's fan coordinates through every step and crop.
    ///
    /// Returns an empty vector when the geometry is clipped away
    /// entirely or degenerates below three vertices.
    #[must_use]
    pub fn transform_coords(&self, coords: &[Coord]) -> Vec<Coord> {
        let mut cropped: Vec<WrappedVertex> = coords.iter().map(WrappedVertex::from).collect();
        let mut transformed_regions: Vec<DrawCropRegion> = Vec::new();

        for step in self.steps.iter().rev() {
            for coord in &mut cropped {
                transform_vertex(step, &mut coord.vertex);
            }

            // Regions accumulated by inner steps ride along through this
            // step's matrix and perspective.
            for region in &mut transformed_regions {
                for corner in &mut region.coords {
                    transform_vertex(step, corner);
                }
            }

            // This step's own regions only see its perspective; their
            // matrix was already folded in at combine time.
            for region in &step.crop_regions {
                let mut new_region = region.clone();
                for corner in &mut new_region.coords {
                    apply_perspective_to_vertex(corner, &step.perspective);
                }
                transformed_regions.push(new_region);
            }
        }

        fill_texture_q_for_quad(&mut cropped);

        for crop_region in &transformed_regions {
            for l in 0..4 {
                let from_point = crop_region.coords[l];
                let to_point = crop_region.coords[(l + 1) % 4];

                let left_of_line: Vec<bool> = cropped
                    .iter()
                    .map(|c| point_is_to_left_of_line(&from_point, &to_point, &c.vertex))
                    .collect();
                let left_count = left_of_line.iter().filter(|&&v| v).count();

                if left_count == 0 {
                    // Line has no effect, skip.
                    continue;
                }
                if left_count == cropped.len() {
                    // All vertices outside; shape has no geometry.
                    return Vec::new();
                }

                let mut new_coords = Vec::with_capacity(cropped.len() * 2);
                for j in 0..cropped.len() {
                    if !left_of_line[j] {
                        new_coords.push(cropped[j].clone());
                        continue;
                    }

                    let prev = if j == 0 { cropped.len() - 1 } else { j - 1 };
                    let next = if j == cropped.len() - 1 { 0 } else { j + 1 };

                    if left_of_line[prev] && left_of_line[next] {
                        // Vertex and both of its edges are outside, skip.
                        continue;
                    }

                    if !left_of_line[prev] {
                        if let Some(vertex) = intersect_crop_line(
                            &to_point,
                            &from_point,
                            &cropped[prev].vertex,
                            &cropped[j].vertex,
                        ) {
                            let mut new_coord = WrappedVertex::at(vertex);
                            crop_texture_for_vertex(&cropped[prev], &cropped[j], &mut new_coord);
                            new_coords.push(new_coord);
                        }
                    }

                    if !left_of_line[next] {
                        if let Some(vertex) = intersect_crop_line(
                            &to_point,
                            &from_point,
                            &cropped[j].vertex,
                            &cropped[next].vertex,
                        ) {
                            let mut new_coord = WrappedVertex::at(vertex);
                            crop_texture_for_vertex(&cropped[j], &cropped[next], &mut new_coord);
                            new_coords.push(new_coord);
                        }
                    }
                }

                cropped = new_coords;
            }

            // Prune duplicate coords left behind by the clip.
            let mut pruned = Vec::with_capacity(cropped.len());
            for j in 0..cropped.len() {
                let prev = if j == 0 { cropped.len() - 1 } else { j - 1 };
                let delta = cropped[j].vertex - cropped[prev].vertex;
                if delta.x.abs() > PIXEL_EPSILON || delta.y.abs() > PIXEL_EPSILON {
                    pruned.push(cropped[j].clone());
                }
            }
            if pruned.len() < 3 {
                return Vec::new();
            }
            cropped = pruned;
        }

        cropped.iter().map(WrappedVertex::as_coord).collect()
    }
}

// ─── Perspective ──────────────────────────────────────────────────────────────

/// Per-vertex bilinear perturbation of the four-corner pin.
///
/// Corner coordinates are the absolute pinned positions of the unit
/// square; the accumulation order (ul, then ur/ll cross terms, then lr)
/// matters only to floating-point precision.
pub fn apply_perspective_to_vertex(vertex: &mut DVec3, p: &Corners) {
    let x = vertex.x;
    let y = vertex.y;

    // ul: x' = (1-y)·a + (1 - a·(1-y))·x
    vertex.x += (1.0 - y) * p.ul.x + (1.0 - p.ul.x + p.ul.x * y) * x - x;
    vertex.y += (1.0 - x) * p.ul.y + (1.0 - p.ul.y + p.ul.y * x) * y - y;

    // ur/ll: x' = x·(a·(1-y) + y)
    vertex.x += x * (p.ur.x * (1.0 - y) + y) - x;
    vertex.y += y * (p.ll.y * (1.0 - x) + x) - y;

    // ur/ll: x' = y·a + x·(1 - a·y)
    vertex.x += y * p.ll.x + x * (1.0 - p.ll.x * y) - x;
    vertex.y += x * p.ur.y + y * (1.0 - p.ur.y * x) - y;

    // lr: x' = x·(y·a + (1-y))
    vertex.x += x * (y * p.lr.x + (1.0 - y)) - x;
    vertex.y += y * (x * p.lr.y + (1.0 - x)) - y;
}

fn transform_vertex(step: &TransformStep, vertex: &mut DVec3) {
    *vertex = step.vertex_matrix * *vertex;
    // Perspective depends on the vertex position, so it cannot be part of
    // the shared matrix.
    apply_perspective_to_vertex(vertex, &step.perspective);
}

// ─── Vertex wrapper ───────────────────────────────────────────────────────────

#[derive(Clone, Debug)]
struct WrappedVertex {
    vertex: DVec3,
    texture_x: f64,
    texture_y: f64,
    texture_r: f64,
    texture_q: f64,
}

impl From<&Coord> for WrappedVertex {
    fn from(coord: &Coord) -> Self {
        Self {
            vertex: DVec3::new(coord.vertex_x, coord.vertex_y, 1.0),
            texture_x: coord.texture_x,
            texture_y: coord.texture_y,
            texture_r: coord.texture_r,
            texture_q: coord.texture_q,
        }
    }
}

impl WrappedVertex {
    fn at(vertex: DVec3) -> Self {
        Self {
            vertex,
            texture_x: 0.0,
            texture_y: 0.0,
            texture_r: 0.0,
            texture_q: 1.0,
        }
    }

    fn as_coord(&self) -> Coord {
        Coord {
            vertex_x: self.vertex.x,
            vertex_y: self.vertex.y,
            texture_x: self.texture_x,
            texture_y: self.texture_y,
            texture_r: self.texture_r,
            texture_q: self.texture_q,
        }
    }
}

// ─── Clipping helpers ─────────────────────────────────────────────────────────

/// Cross-product sidedness test; "left" of a region edge means outside.
fn point_is_to_left_of_line(line_1: &DVec3, line_2: &DVec3, vertex: &DVec3) -> bool {
    (line_2.x - line_1.x) * (vertex.y - line_1.y) - (line_2.y - line_1.y) * (vertex.x - line_1.x)
        < -EPSILON
}

/// Intersection of the segment `p0`→`p1` with the (infinite) crop edge
/// `crop0`→`crop1`. `None` when the segment does not reach the line.
fn intersect_crop_line(crop0: &DVec3, crop1: &DVec3, p0: &DVec3, p1: &DVec3) -> Option<DVec3> {
    let s1_x = crop1.x - crop0.x;
    let s1_y = crop1.y - crop0.y;
    let s2_x = p1.x - p0.x;
    let s2_y = p1.y - p0.y;

    let denom = -s2_x * s1_y + s1_x * s2_y;
    let s = (-s1_y * (crop0.x - p0.x) + s1_x * (crop0.y - p0.y)) / denom;
    let t = (s2_x * (crop0.y - p0.y) - s2_y * (crop0.x - p0.x)) / denom;

    if (0.0..=1.0).contains(&s) {
        Some(DVec3::new(crop0.x + t * s1_x, crop0.y + t * s1_y, 1.0))
    } else {
        None
    }
}

/// Interpolate texture coordinates and `q` for a vertex cut into the
/// edge `line_a`→`line_b`, by projection onto the edge.
fn crop_texture_for_vertex(line_a: &WrappedVertex, line_b: &WrappedVertex, vertex: &mut WrappedVertex) {
    let delta_point = vertex.vertex - line_a.vertex;
    let delta_line = line_b.vertex - line_a.vertex;

    let dot_product = delta_point.x * delta_line.x + delta_point.y * delta_line.y;
    let line_len_squared = delta_line.x * delta_line.x + delta_line.y * delta_line.y;

    if line_len_squared == 0.0 {
        vertex.texture_x = line_a.texture_x;
        vertex.texture_y = line_a.texture_y;
        return;
    }

    let dist_delta = dot_product / line_len_squared;

    vertex.texture_x = line_a.texture_x + dist_delta * (line_b.texture_x - line_a.texture_x);
    vertex.texture_y = line_a.texture_y + dist_delta * (line_b.texture_y - line_a.texture_y);
    vertex.texture_q = line_a.texture_q + dist_delta * (line_b.texture_q - line_a.texture_q);
}

fn hypotenuse(a: DVec3, x: f64, y: f64) -> f64 {
    let dx = x - a.x;
    let dy = y - a.y;
    (dx * dx + dy * dy).sqrt()
}

fn calc_q(close_diagonal: f64, distant_diagonal: f64) -> f64 {
    (close_diagonal + distant_diagonal) / distant_diagonal
}

/// Perspective-correct texture interpolation weights for a quad, from
/// the intersection of its diagonals.
///
/// The s,t gate doubles as a degeneracy detector: non-convex or
/// self-intersecting quads have no interior diagonal intersection and
/// keep affine interpolation (q = 1) instead of receiving undefined
/// coordinates.
fn fill_texture_q_for_quad(coords: &mut [WrappedVertex]) {
    if coords.len() != 4 {
        return;
    }

    let s1_x = coords[2].vertex.x - coords[0].vertex.x;
    let s1_y = coords[2].vertex.y - coords[0].vertex.y;
    let s2_x = coords[3].vertex.x - coords[1].vertex.x;
    let s2_y = coords[3].vertex.y - coords[1].vertex.y;

    let denom = -s2_x * s1_y + s1_x * s2_y;
    let s = (-s1_y * (coords[0].vertex.x - coords[1].vertex.x)
        + s1_x * (coords[0].vertex.y - coords[1].vertex.y))
        / denom;
    let t = (s2_x * (coords[0].vertex.y - coords[1].vertex.y)
        - s2_y * (coords[0].vertex.x - coords[1].vertex.x))
        / denom;

    if (0.0..=1.0).contains(&s) && (0.0..=1.0).contains(&t) {
        let ix = coords[0].vertex.x + t * s1_x;
        let iy = coords[0].vertex.y + t * s1_y;

        let d0 = hypotenuse(coords[3].vertex, ix, iy);
        let d1 = hypotenuse(coords[2].vertex, ix, iy);
        let d2 = hypotenuse(coords[1].vertex, ix, iy);
        let d3 = hypotenuse(coords[0].vertex, ix, iy);

        let q_values = [
            calc_q(d3, d1), // ul
            calc_q(d2, d0), // ur
            calc_q(d1, d3), // lr
            calc_q(d0, d2), // ll
        ];

        for (coord, q) in coords.iter_mut().zip(q_values) {
            coord.texture_q = q;
            coord.texture_x *= q;
            coord.texture_y *= q;
        }
    }
}

// ─── Screen culling ───────────────────────────────────────────────────────────

/// Whether every vertex lies on one far side of the unit output square.
#[must_use]
pub fn is_outside_screen(coords: &[Coord]) -> bool {
    coords.iter().all(|c| c.vertex_x < 0.0)
        || coords.iter().all(|c| c.vertex_x > 1.0)
        || coords.iter().all(|c| c.vertex_y < 0.0)
        || coords.iter().all(|c| c.vertex_y > 1.0)
}
