use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::{
    error::{AcquisitionError, AcquisitionErrorKind},
    types::{FacingMode, Frame},
};

/// Anything that hands out sequential RGBA frames.
pub trait FrameSource {
    /// Native size, once known.
    fn resolution(&self) -> Option<(u32, u32)>;

    /// The newest frame since the previous call, if any arrived.
    fn latest_frame(&mut self) -> Option<Frame>;

    /// False once the source stopped or paused for good.
    fn is_active(&self) -> bool;

    /// Stops capture and frees the device. Idempotent.
    fn release(&mut self);
}

pub trait SourceProvider {
    fn acquire(&mut self, facing: FacingMode) -> Result<Box<dyn FrameSource>, AcquisitionError>;
}

/// Owns at most one live source.
pub struct SourceSlot {
    provider: Box<dyn SourceProvider>,
    active: Option<Box<dyn FrameSource>>,
}

impl SourceSlot {
    pub fn new(provider: Box<dyn SourceProvider>) -> Self {
        Self {
            provider,
            active: None,
        }
    }

    /// Releases the current source before acquiring the next one, so two
    /// capture sessions are never open at once. On failure the slot is left
    /// empty.
    pub fn switch(&mut self, facing: FacingMode) -> Result<(), AcquisitionError> {
        self.release();
        log::info!("acquiring {facing}-facing frame source");
        let source = self.provider.acquire(facing)?;
        if let Some((width, height)) = source.resolution() {
            log::info!("frame source ready at {width}x{height}");
        }
        self.active = Some(source);
        Ok(())
    }

    pub fn release(&mut self) {
        if let Some(mut source) = self.active.take() {
            source.release();
        }
    }

    pub fn source_mut(&mut self) -> Option<&mut (dyn FrameSource + 'static)> {
        self.active.as_deref_mut()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_none()
    }
}

impl Drop for SourceSlot {
    fn drop(&mut self) {
        self.release();
    }
}

/// Serves one decoded image as an endless feed.
pub struct StillImageSource {
    frame: Frame,
    delivered: bool,
    active: bool,
}

impl StillImageSource {
    pub fn new(frame: Frame) -> Self {
        Self {
            frame,
            delivered: false,
            active: true,
        }
    }

    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let decoded = image::open(path)
            .with_context(|| format!("failed to decode image {}", path.display()))?
            .to_rgba8();
        let (width, height) = decoded.dimensions();
        Ok(Self::new(Frame::new(decoded.into_raw(), width, height)))
    }
}

impl FrameSource for StillImageSource {
    fn resolution(&self) -> Option<(u32, u32)> {
        Some((self.frame.width, self.frame.height))
    }

    fn latest_frame(&mut self) -> Option<Frame> {
        if !self.active || self.delivered {
            return None;
        }
        self.delivered = true;
        Some(self.frame.clone())
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn release(&mut self) {
        self.active = false;
    }
}

#[derive(Clone, Debug)]
pub struct StillImageProvider {
    path: PathBuf,
}

impl StillImageProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SourceProvider for StillImageProvider {
    fn acquire(&mut self, facing: FacingMode) -> Result<Box<dyn FrameSource>, AcquisitionError> {
        log::debug!("still image source ignores {facing} facing");
        if !self.path.exists() {
            return Err(AcquisitionError::new(
                AcquisitionErrorKind::NotFound,
                format!("image {} does not exist", self.path.display()),
            ));
        }
        let source = StillImageSource::open(&self.path)
            .map_err(|err| {
                AcquisitionError::new(AcquisitionErrorKind::Unavailable, format!("{err:#}"))
            })?;
        Ok(Box::new(source))
    }
}
