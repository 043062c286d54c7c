use rayon::prelude::*;

use super::pattern::PatternTile;
use crate::error::RenderError;

/// Viewport-sized buffer the repeat tile is painted into.
#[derive(Clone, Debug)]
pub struct OutputSurface {
    rgba: Vec<u8>,
    width: u32,
    height: u32,
    filled: bool,
}

impl OutputSurface {
    pub fn new(width: u32, height: u32) -> Result<Self, RenderError> {
        if width == 0 || height == 0 {
            return Err(RenderError::InvariantViolation(format!(
                "output surface must not be empty (got {width}x{height})"
            )));
        }
        Ok(Self {
            rgba: vec![0u8; width as usize * height as usize * 4],
            width,
            height,
            filled: false,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn rgba(&self) -> &[u8] {
        &self.rgba
    }

    /// True once at least one complete fill has landed.
    pub fn is_filled(&self) -> bool {
        self.filled
    }

    /// Repeats `pattern` across the whole surface starting at the origin.
    pub fn fill_with(&mut self, pattern: &PatternTile) {
        let pattern_stride = pattern.width as usize * 4;
        let stride = self.width as usize * 4;
        let pattern_height = pattern.height as usize;

        self.rgba
            .par_chunks_mut(stride)
            .enumerate()
            .for_each(|(y, row)| {
                let start = (y % pattern_height) * pattern_stride;
                let source = &pattern.rgba[start..start + pattern_stride];
                for chunk in row.chunks_mut(pattern_stride) {
                    chunk.copy_from_slice(&source[..chunk.len()]);
                }
            });
        self.filled = true;
    }

    /// Copies the `width x height` region at the origin. Whatever lies past
    /// the surface edge stays transparent.
    pub fn crop_origin(&self, width: u32, height: u32) -> Vec<u8> {
        let out_stride = width as usize * 4;
        let copy_len = width.min(self.width) as usize * 4;
        let stride = self.width as usize * 4;

        let mut out = vec![0u8; out_stride * height as usize];
        for (dst, src) in out
            .chunks_exact_mut(out_stride)
            .zip(self.rgba.chunks_exact(stride))
        {
            dst[..copy_len].copy_from_slice(&src[..copy_len]);
        }
        out
    }
}
