use anyhow::{Context, Result};
use fast_image_resize as fir;
use rayon::prelude::*;

use super::geometry::TriangleGeometry;
use crate::types::{Frame, Scale};

/// Square-bounded sample of the frame, transparent outside the triangle.
#[derive(Clone, Debug)]
pub struct TriangleTile {
    pub rgba: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub geometry: TriangleGeometry,
}

/// Region of the frame (in frame pixels) that lands in the triangle buffer.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SampleWindow {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl SampleWindow {
    /// The window starts at the offset that centers a square on the shorter
    /// axis and spans the triangle's size in frame pixels.
    pub fn for_frame(
        frame_width: u32,
        frame_height: u32,
        geometry: &TriangleGeometry,
        scale: Scale,
    ) -> Self {
        let (fw, fh) = (f64::from(frame_width), f64::from(frame_height));
        let left = ((fw - fh) / 2.0).max(0.0);
        let top = ((fh - fw) / 2.0).max(0.0);
        Self {
            left,
            top,
            width: (geometry.base / scale.get()).min(fw - left),
            height: (geometry.height / scale.get()).min(fh - top),
        }
    }
}

pub fn extract_triangle(frame: &Frame, scale: Scale) -> Result<TriangleTile> {
    let geometry = TriangleGeometry::from_frame(frame.width, frame.height, scale);
    let (width, height) = geometry.pixel_size();
    let window = SampleWindow::for_frame(frame.width, frame.height, &geometry, scale);

    let src_image =
        fir::images::ImageRef::new(frame.width, frame.height, &frame.rgba, fir::PixelType::U8x4)?;
    let mut dst_image = fir::images::Image::new(width, height, fir::PixelType::U8x4);
    let mut resizer = fir::Resizer::new();
    let resize_options = fir::ResizeOptions::new()
        .crop(window.left, window.top, window.width, window.height)
        .resize_alg(fir::ResizeAlg::Interpolation(fir::FilterType::Bilinear));
    resizer
        .resize(&src_image, &mut dst_image, Some(&resize_options))
        .context("triangle resample failed")?;

    let mut rgba = dst_image.into_vec();
    apply_triangle_mask(&mut rgba, width, &geometry);

    Ok(TriangleTile {
        rgba,
        width,
        height,
        geometry,
    })
}

/// Clears every texel whose square does not touch the triangle.
fn apply_triangle_mask(rgba: &mut [u8], width: u32, geometry: &TriangleGeometry) {
    let stride = width as usize * 4;
    rgba.par_chunks_mut(stride)
        .enumerate()
        .for_each(|(y, row)| {
            for (x, px) in row.chunks_exact_mut(4).enumerate() {
                if !geometry.pixel_overlaps(x as u32, y as u32) {
                    px.copy_from_slice(&[0, 0, 0, 0]);
                }
            }
        });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid_frame(width: u32, height: u32, color: [u8; 4]) -> Frame {
        let rgba = color
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * 4)
            .collect();
        Frame::new(rgba, width, height)
    }

    fn texel(tile: &TriangleTile, x: u32, y: u32) -> [u8; 4] {
        let idx = ((y * tile.width + x) * 4) as usize;
        [
            tile.rgba[idx],
            tile.rgba[idx + 1],
            tile.rgba[idx + 2],
            tile.rgba[idx + 3],
        ]
    }

    #[test]
    fn window_centers_on_the_shorter_axis() {
        let scale = Scale::new(0.5);
        let landscape = TriangleGeometry::from_frame(640, 480, scale);
        let window = SampleWindow::for_frame(640, 480, &landscape, scale);
        assert_eq!(window.left, 80.0);
        assert_eq!(window.top, 0.0);
        assert!((window.width - 480.0).abs() < 1e-9);

        let portrait = TriangleGeometry::from_frame(480, 640, scale);
        let window = SampleWindow::for_frame(480, 640, &portrait, scale);
        assert_eq!(window.left, 0.0);
        assert_eq!(window.top, 80.0);
    }

    #[test]
    fn tile_size_follows_geometry() {
        let frame = solid_frame(320, 200, [10, 20, 30, 255]);
        let tile = extract_triangle(&frame, Scale::new(0.5)).expect("extract");
        assert_eq!(tile.geometry.base, 100.0);
        assert_eq!((tile.width, tile.height), (100, 87));
        assert_eq!(tile.rgba.len(), 100 * 87 * 4);
    }

    #[test]
    fn outside_of_triangle_is_transparent() {
        let frame = solid_frame(200, 200, [200, 100, 50, 255]);
        let tile = extract_triangle(&frame, Scale::new(0.5)).expect("extract");

        assert_eq!(texel(&tile, 0, 0), [0, 0, 0, 0]);
        assert_eq!(texel(&tile, 99, 0), [0, 0, 0, 0]);
        assert_eq!(texel(&tile, 5, 40), [0, 0, 0, 0]);
        assert_eq!(texel(&tile, 50, 60), [200, 100, 50, 255]);
        assert_eq!(texel(&tile, 0, 86), [200, 100, 50, 255]);

        for y in 0..tile.height {
            for x in 0..tile.width {
                let alpha = texel(&tile, x, y)[3];
                assert_eq!(alpha == 255, tile.geometry.pixel_overlaps(x, y), "texel ({x}, {y})");
            }
        }
    }

    #[test]
    fn upscaled_sample_stays_inside_the_frame() {
        let frame = solid_frame(40, 30, [1, 2, 3, 255]);
        let tile = extract_triangle(&frame, Scale::new(2.0)).expect("extract");
        assert_eq!((tile.width, tile.height), (60, 52));
        assert_eq!(texel(&tile, 30, 40), [1, 2, 3, 255]);
    }

    #[test]
    fn extraction_is_deterministic() {
        let rgba = (0..64u32 * 48 * 4).map(|v| (v * 7 % 251) as u8).collect();
        let frame = Frame::new(rgba, 64, 48);
        let first = extract_triangle(&frame, Scale::new(0.8)).expect("extract");
        let second = extract_triangle(&frame, Scale::new(0.8)).expect("extract");
        assert_eq!(first.rgba, second.rgba);
    }
}
