use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use anyhow::{Result, anyhow};
use crossbeam_channel::{Receiver, Sender, bounded};
use nokhwa::{
    Camera,
    pixel_format::RgbFormat,
    query,
    utils::{
        ApiBackend, CameraIndex, CameraInfo, FrameFormat, RequestedFormat, RequestedFormatType,
    },
};

use super::{
    rgba_converter,
    source::{FrameSource, SourceProvider},
};
use crate::{
    error::AcquisitionError,
    types::{FacingMode, Frame},
};

// Prefer pixel formats that are widely supported on macOS (the built-in cameras
// often reject YUYV even though Nokhwa reports it).
const PREFERRED_PIXEL_FORMATS: &[FrameFormat] = &[
    FrameFormat::RAWRGB,
    FrameFormat::RAWBGR,
    FrameFormat::GRAY,
    FrameFormat::YUYV,
    FrameFormat::NV12,
    FrameFormat::MJPEG,
];

// About one second of failed reads before the device is treated as gone.
const MAX_CONSECUTIVE_READ_FAILURES: u32 = 50;
const READ_RETRY_DELAY: Duration = Duration::from_millis(20);

const FRONT_KEYWORDS: &[&str] = &["front", "user", "facetime", "integrated", "built-in"];
const BACK_KEYWORDS: &[&str] = &["back", "rear", "environment", "world"];

fn requested_formats() -> [RequestedFormat<'static>; 3] {
    [
        // Display refresh is the consumer, so favour frame rate over size.
        RequestedFormat::with_formats(
            RequestedFormatType::AbsoluteHighestFrameRate,
            PREFERRED_PIXEL_FORMATS,
        ),
        RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate),
        RequestedFormat::new::<RgbFormat>(RequestedFormatType::None),
    ]
}

#[derive(Clone, Debug)]
pub struct CameraDevice {
    pub index: CameraIndex,
    pub label: String,
}

impl CameraDevice {
    fn matches_any(&self, keywords: &[&str]) -> bool {
        let label = self.label.to_ascii_lowercase();
        keywords.iter().any(|keyword| label.contains(keyword))
    }
}

#[derive(Debug)]
pub struct CameraStream {
    stop: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl CameraStream {
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for CameraStream {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Consecutive frame read failures on one stream.
#[derive(Debug)]
struct ReadFailures {
    consecutive: u32,
    limit: u32,
}

impl ReadFailures {
    fn new(limit: u32) -> Self {
        Self {
            consecutive: 0,
            limit,
        }
    }

    /// Returns true once the limit is reached.
    fn record(&mut self) -> bool {
        self.consecutive += 1;
        self.consecutive >= self.limit
    }

    fn reset(&mut self) {
        self.consecutive = 0;
    }
}

pub fn available_cameras() -> Result<Vec<CameraDevice>> {
    let cameras = query(ApiBackend::Auto)?;
    Ok(cameras
        .into_iter()
        .map(|info| CameraDevice {
            index: info.index().clone(),
            label: format_camera_label(&info),
        })
        .collect())
}

fn format_camera_label(info: &CameraInfo) -> String {
    info.human_name()
}

/// Chooses a device for `facing` by label, falling back to the first device
/// for front and the last one for back.
pub fn select_camera(devices: &[CameraDevice], facing: FacingMode) -> Option<&CameraDevice> {
    let (wanted, other) = match facing {
        FacingMode::Front => (FRONT_KEYWORDS, BACK_KEYWORDS),
        FacingMode::Back => (BACK_KEYWORDS, FRONT_KEYWORDS),
    };
    if let Some(device) = devices.iter().find(|d| d.matches_any(wanted)) {
        return Some(device);
    }

    let mut unlabeled = devices.iter().filter(|d| !d.matches_any(other));
    match facing {
        FacingMode::Front => unlabeled.next().or_else(|| devices.first()),
        FacingMode::Back => unlabeled.last().or_else(|| devices.last()),
    }
}

fn build_camera(index: CameraIndex) -> Result<Camera> {
    let mut last_err = None;

    for requested in requested_formats() {
        match Camera::new(index.clone(), requested) {
            Ok(mut camera) => match camera.open_stream() {
                Ok(()) => return Ok(camera),
                Err(err) => last_err = Some(err.into()),
            },
            Err(err) => last_err = Some(err.into()),
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow!("failed to open camera with any supported format")))
}

pub fn start_camera_stream(index: CameraIndex, frame_tx: Sender<Frame>) -> Result<CameraStream> {
    // Fail fast before spawning the capture thread; the probe is dropped
    // (and the device closed) before the thread reopens it.
    drop(build_camera(index.clone())?);

    let stop = Arc::new(AtomicBool::new(false));
    let stop_flag = stop.clone();
    let running = Arc::new(AtomicBool::new(true));
    let running_flag = running.clone();

    let handle = thread::spawn(move || {
        let mut camera = match build_camera(index) {
            Ok(cam) => cam,
            Err(err) => {
                log::error!("failed to open camera: {err:?}");
                running_flag.store(false, Ordering::SeqCst);
                return;
            }
        };

        let mut failures = ReadFailures::new(MAX_CONSECUTIVE_READ_FAILURES);
        while !stop_flag.load(Ordering::Relaxed) {
            let frame_start = Instant::now();
            let buffer = match camera.frame() {
                Ok(buffer) => {
                    failures.reset();
                    buffer
                }
                Err(err) => {
                    if failures.record() {
                        log::error!(
                            "camera stopped delivering frames after {} failed reads: {err:?}",
                            failures.consecutive
                        );
                        break;
                    }
                    log::warn!(
                        "camera frame read failed (after {:?}): {err:?}",
                        frame_start.elapsed()
                    );
                    thread::sleep(READ_RETRY_DELAY);
                    continue;
                }
            };

            let frame = match rgba_converter::convert_camera_frame(&buffer) {
                Ok(frame) => frame,
                Err(err) => {
                    log::warn!("failed to decode camera frame {err:?}");
                    continue;
                }
            };

            // The render loop only wants the newest frame; drop when it lags.
            let _ = frame_tx.try_send(frame);
        }

        if let Err(err) = camera.stop_stream() {
            log::warn!("failed to stop camera stream: {err:?}");
        }
        running_flag.store(false, Ordering::SeqCst);
    });

    Ok(CameraStream {
        stop,
        running,
        handle: Some(handle),
    })
}

/// Live camera feed backed by a capture thread.
pub struct CameraSource {
    stream: Option<CameraStream>,
    frame_rx: Receiver<Frame>,
    resolution: Option<(u32, u32)>,
}

impl FrameSource for CameraSource {
    fn resolution(&self) -> Option<(u32, u32)> {
        self.resolution
    }

    fn latest_frame(&mut self) -> Option<Frame> {
        let mut frame = self.frame_rx.try_recv().ok()?;
        while let Ok(newer) = self.frame_rx.try_recv() {
            frame = newer;
        }
        self.resolution = Some((frame.width, frame.height));
        Some(frame)
    }

    fn is_active(&self) -> bool {
        self.stream.as_ref().is_some_and(CameraStream::is_running)
    }

    fn release(&mut self) {
        if let Some(stream) = self.stream.take() {
            log::info!("stopping camera stream");
            stream.stop();
        }
    }
}

impl Drop for CameraSource {
    fn drop(&mut self) {
        self.release();
    }
}

/// Opens cameras by facing mode, or always the same device when pinned.
#[derive(Clone, Debug, Default)]
pub struct CameraProvider {
    pinned: Option<u32>,
}

impl CameraProvider {
    pub fn pinned(index: u32) -> Self {
        Self {
            pinned: Some(index),
        }
    }

    fn resolve(&self, facing: FacingMode) -> Result<CameraDevice, AcquisitionError> {
        if let Some(index) = self.pinned {
            return Ok(CameraDevice {
                index: CameraIndex::Index(index),
                label: format!("camera #{index}"),
            });
        }

        let devices = available_cameras().map_err(|err| AcquisitionError::from_backend(&err))?;
        select_camera(&devices, facing)
            .cloned()
            .ok_or_else(|| AcquisitionError::not_found(facing))
    }
}

impl SourceProvider for CameraProvider {
    fn acquire(&mut self, facing: FacingMode) -> Result<Box<dyn FrameSource>, AcquisitionError> {
        let device = self.resolve(facing)?;
        log::info!("opening camera {}", device.label);

        let (frame_tx, frame_rx) = bounded(2);
        let stream = start_camera_stream(device.index, frame_tx)
            .map_err(|err| AcquisitionError::from_backend(&err))?;

        Ok(Box::new(CameraSource {
            stream: Some(stream),
            frame_rx,
            resolution: None,
        }))
    }
}
