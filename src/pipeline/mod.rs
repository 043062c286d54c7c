#[cfg(feature = "camera-nokhwa")]
pub mod camera;
#[cfg(feature = "camera-nokhwa")]
pub mod rgba_converter;
pub mod source;

// Re-exports for convenience
#[cfg(feature = "camera-nokhwa")]
pub use camera::{CameraProvider, available_cameras};
pub use source::{SourceProvider, SourceSlot, StillImageProvider};
