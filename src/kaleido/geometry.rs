use kurbo::{Affine, Point, Vec2};

use crate::types::Scale;

const EDGE_EPSILON: f64 = 1e-9;

/// Size of the sampled equilateral triangle: base `W` and height `H`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TriangleGeometry {
    pub base: f64,
    pub height: f64,
}

impl TriangleGeometry {
    pub fn from_frame(frame_width: u32, frame_height: u32, scale: Scale) -> Self {
        let base = f64::from(frame_width.min(frame_height)) * scale.get();
        Self::from_base(base)
    }

    pub fn from_base(base: f64) -> Self {
        let height = base / 2.0 * 60f64.to_radians().tan();
        Self { base, height }
    }

    pub fn vertices(&self) -> [Point; 3] {
        [
            Point::new(self.base / 2.0, 0.0),
            Point::new(self.base, self.height),
            Point::new(0.0, self.height),
        ]
    }

    pub fn pixel_size(&self) -> (u32, u32) {
        (to_pixels(self.base), to_pixels(self.height))
    }

    /// Geometric size of the repeat tile, `3W x 2H`.
    pub fn pattern_size(&self) -> (f64, f64) {
        (self.base * 3.0, self.height * 2.0)
    }

    pub fn pattern_pixel_size(&self) -> (u32, u32) {
        let (width, height) = self.pattern_size();
        (to_pixels(width), to_pixels(height))
    }

    /// Inclusive point-in-triangle test; points on an edge count as inside.
    pub fn contains(&self, point: Point) -> bool {
        let [a, b, c] = self.vertices();
        edge(a, b, point) >= -EDGE_EPSILON
            && edge(b, c, point) >= -EDGE_EPSILON
            && edge(c, a, point) >= -EDGE_EPSILON
    }

    /// Whether the unit pixel square at `(x, y)` shares a positive area with
    /// the triangle. Separating-axis test over the square's axes and the
    /// triangle's edge normals.
    pub fn pixel_overlaps(&self, x: u32, y: u32) -> bool {
        let (x0, y0) = (f64::from(x), f64::from(y));
        let (x1, y1) = (x0 + 1.0, y0 + 1.0);
        if x1 <= 0.0 || x0 >= self.base || y1 <= 0.0 || y0 >= self.height {
            return false;
        }

        let corners = [
            Point::new(x0, y0),
            Point::new(x1, y0),
            Point::new(x1, y1),
            Point::new(x0, y1),
        ];
        let [a, b, c] = self.vertices();
        [(a, b), (b, c), (c, a)].iter().all(|&(from, to)| {
            corners
                .iter()
                .any(|&corner| edge(from, to, corner) > EDGE_EPSILON)
        })
    }
}

fn edge(from: Point, to: Point, point: Point) -> f64 {
    (to - from).cross(point - from)
}

fn to_pixels(size: f64) -> u32 {
    size.round().max(1.0) as u32
}

/// One stamp of the triangle inside the repeat tile.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Placement {
    pub rotate_deg: f64,
    pub mirror_y: bool,
    /// Translation in units of `W`.
    pub translate_w: f64,
    /// Translation in units of `H`.
    pub translate_h: f64,
}

const fn place(rotate_deg: f64, mirror_y: bool, translate_w: f64, translate_h: f64) -> Placement {
    Placement {
        rotate_deg,
        mirror_y,
        translate_w,
        translate_h,
    }
}

/// Draw order matters: later stamps win on shared edges.
pub const PLACEMENTS: [Placement; 14] = [
    place(0.0, false, 0.0, 0.0),
    place(0.0, true, 0.0, 0.0),
    place(0.0, false, 1.5, 1.0),
    place(0.0, true, 1.5, 1.0),
    place(120.0, false, 0.0, 0.0),
    place(120.0, true, 0.0, 0.0),
    place(120.0, false, 0.0, -2.0),
    place(120.0, true, 0.0, 2.0),
    place(120.0, false, 1.5, 1.0),
    place(240.0, false, 0.0, 0.0),
    place(240.0, true, 0.0, 0.0),
    place(240.0, false, 0.0, 2.0),
    place(240.0, true, 0.0, -2.0),
    place(240.0, true, 1.5, 1.0),
];

impl Placement {
    /// Maps triangle-image coordinates into repeat-tile coordinates.
    ///
    /// The stamp pivots on `origin = (W, H)`, the vertex shared by the first
    /// two placements: move to the origin, rotate, mirror, translate, then
    /// draw the image offset by `-origin`.
    pub fn transform(&self, geometry: &TriangleGeometry) -> Affine {
        let origin = Vec2::new(geometry.base, geometry.height);
        let offset = Vec2::new(
            self.translate_w * geometry.base,
            self.translate_h * geometry.height,
        );
        let mirror = if self.mirror_y { -1.0 } else { 1.0 };

        Affine::translate(origin)
            * Affine::rotate(self.rotate_deg.to_radians())
            * Affine::scale_non_uniform(1.0, mirror)
            * Affine::translate(offset)
            * Affine::translate(-origin)
    }
}
