use kurbo::{Affine, Point, Rect};
use rayon::prelude::*;

use super::{
    geometry::{PLACEMENTS, TriangleGeometry},
    triangle::TriangleTile,
};

/// The seamless repeat unit: 14 stamped copies of one triangle.
#[derive(Clone, Debug)]
pub struct PatternTile {
    pub rgba: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub geometry: TriangleGeometry,
}

struct Stamp {
    inverse: Affine,
    bounds: Rect,
}

pub fn compose_pattern(triangle: &TriangleTile) -> PatternTile {
    let geometry = triangle.geometry;
    let (width, height) = geometry.pattern_pixel_size();
    let stamps: Vec<Stamp> = PLACEMENTS
        .iter()
        .map(|placement| {
            let transform = placement.transform(&geometry);
            Stamp {
                inverse: transform.inverse(),
                bounds: stamp_bounds(transform, &geometry),
            }
        })
        .collect();

    let stride = width as usize * 4;
    let mut rgba = vec![0u8; stride * height as usize];
    rgba.par_chunks_mut(stride)
        .enumerate()
        .for_each(|(y, row)| {
            let cy = y as f64 + 0.5;
            for (x, px) in row.chunks_exact_mut(4).enumerate() {
                let center = Point::new(x as f64 + 0.5, cy);
                for stamp in &stamps {
                    if !stamp.bounds.contains(center) {
                        continue;
                    }
                    let source = stamp.inverse * center;
                    if geometry.contains(source) {
                        blend_over(px, sample(triangle, source));
                    }
                }
            }
        });

    PatternTile {
        rgba,
        width,
        height,
        geometry,
    }
}

fn stamp_bounds(transform: Affine, geometry: &TriangleGeometry) -> Rect {
    let [a, b, c] = geometry.vertices().map(|v| transform * v);
    Rect::from_points(a, b).union_pt(c).inflate(1.0, 1.0)
}

/// Nearest texel, clamped to the buffer.
fn sample(triangle: &TriangleTile, point: Point) -> [u8; 4] {
    let x = (point.x.floor().max(0.0) as u32).min(triangle.width - 1);
    let y = (point.y.floor().max(0.0) as u32).min(triangle.height - 1);
    let idx = ((y * triangle.width + x) * 4) as usize;
    [
        triangle.rgba[idx],
        triangle.rgba[idx + 1],
        triangle.rgba[idx + 2],
        triangle.rgba[idx + 3],
    ]
}

fn blend_over(dst: &mut [u8], src: [u8; 4]) {
    let src_a = u32::from(src[3]);
    if src_a == 255 {
        dst.copy_from_slice(&src);
        return;
    }
    if src_a == 0 {
        return;
    }

    let dst_a = u32::from(dst[3]);
    let inv = 255 - src_a;
    let out_a = src_a * 255 + dst_a * inv;
    for c in 0..3 {
        let premul = u32::from(src[c]) * src_a * 255 + u32::from(dst[c]) * dst_a * inv;
        dst[c] = ((premul + out_a / 2) / out_a) as u8;
    }
    dst[3] = ((out_a + 127) / 255) as u8;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kaleido::triangle::extract_triangle;
    use crate::types::{Frame, Scale};

    fn gradient_frame(width: u32, height: u32) -> Frame {
        let mut rgba = Vec::with_capacity(width as usize * height as usize * 4);
        for y in 0..height {
            for x in 0..width {
                rgba.extend_from_slice(&[(x % 256) as u8, (y % 256) as u8, 128, 255]);
            }
        }
        Frame::new(rgba, width, height)
    }

    fn pixel(pattern: &PatternTile, x: u32, y: u32) -> [u8; 4] {
        let idx = ((y * pattern.width + x) * 4) as usize;
        [
            pattern.rgba[idx],
            pattern.rgba[idx + 1],
            pattern.rgba[idx + 2],
            pattern.rgba[idx + 3],
        ]
    }

    #[test]
    fn pattern_dimensions_are_three_by_two() {
        let triangle =
            extract_triangle(&gradient_frame(200, 240), Scale::new(0.5)).expect("extract");
        let pattern = compose_pattern(&triangle);
        assert_eq!(pattern.geometry.pattern_size(), (300.0, triangle.geometry.height * 2.0));
        assert_eq!((pattern.width, pattern.height), (300, 173));
        assert_eq!(pattern.rgba.len(), 300 * 173 * 4);
    }

    #[test]
    fn composition_is_deterministic() {
        let triangle =
            extract_triangle(&gradient_frame(160, 120), Scale::new(0.7)).expect("extract");
        let first = compose_pattern(&triangle);
        let second = compose_pattern(&triangle);
        assert_eq!(first.rgba, second.rgba);
    }

    #[test]
    fn opaque_input_yields_opaque_tile() {
        let triangle =
            extract_triangle(&gradient_frame(200, 200), Scale::new(0.5)).expect("extract");
        let pattern = compose_pattern(&triangle);
        for y in 0..pattern.height {
            for x in 0..pattern.width {
                assert_eq!(pixel(&pattern, x, y)[3], 255, "hole at ({x}, {y})");
            }
        }
    }

    #[test]
    fn tile_wraps_without_a_seam() {
        let triangle =
            extract_triangle(&gradient_frame(100, 100), Scale::new(1.0)).expect("extract");
        let pattern = compose_pattern(&triangle);
        let last = pattern.width - 1;
        // Neighbouring texels of a gradient differ by at most a few steps.
        let tolerance = 6i32;
        let mut worst = 0;
        for y in 0..pattern.height {
            let right = pixel(&pattern, last, y);
            let left = pixel(&pattern, 0, y);
            for c in 0..4 {
                worst = worst.max((i32::from(right[c]) - i32::from(left[c])).abs());
            }
        }
        assert!(worst <= tolerance, "seam difference {worst}");
    }

    #[test]
    fn blend_over_composites_straight_alpha() {
        let mut dst = [0u8, 0, 255, 255];
        blend_over(&mut dst, [255, 0, 0, 255]);
        assert_eq!(dst, [255, 0, 0, 255]);

        let mut dst = [0u8, 0, 255, 255];
        blend_over(&mut dst, [255, 0, 0, 0]);
        assert_eq!(dst, [0, 0, 255, 255]);

        let mut dst = [0u8, 0, 0, 0];
        blend_over(&mut dst, [200, 100, 50, 128]);
        assert_eq!(dst, [200, 100, 50, 128]);
    }
}
