//! Frame → triangle → repeat tile → surface.

pub mod geometry;
pub mod pattern;
pub mod surface;
pub mod triangle;

pub use pattern::{PatternTile, compose_pattern};
pub use surface::OutputSurface;
pub use triangle::extract_triangle;

use anyhow::Result;

use crate::types::{Frame, Scale};

/// Runs both stages for one frame.
pub fn build_pattern(frame: &Frame, scale: Scale) -> Result<PatternTile> {
    let triangle = extract_triangle(frame, scale)?;
    Ok(compose_pattern(&triangle))
}
