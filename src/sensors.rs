//! Video capture device access.

use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use rscam::{Camera, Config};

/// Capture format requested from the device.
const FORMAT: &[u8] = b"MJPG";

/// Capture device selection. Resolution and frame rate default to the
/// highest values the device reports for the format.
#[derive(Debug, Clone)]
pub struct CameraConfig {
    pub device: String,
    pub resolution: Option<(u32, u32)>,
    pub frame_rate: Option<(u32, u32)>,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: "/dev/video0".into(),
            resolution: None,
            frame_rate: None,
        }
    }
}

/// Started camera producing a lazy, non-restartable sequence of frames.
///
/// The device handle is exclusive while this value lives and is released by
/// drop, whichever way the consuming loop terminates.
pub struct CameraSource {
    cam: Camera,
    device: String,
}

impl CameraSource {
    /// Open and start the device once. Fails if the device is missing or
    /// already held by another stream.
    pub fn open(config: &CameraConfig) -> Result<Self> {
        let mut cam = Camera::new(&config.device)
            .with_context(|| format!("could not open camera {}", config.device))?;

        let resolution = config
            .resolution
            .map(Ok)
            .unwrap_or_else(|| get_max_resolution(&cam, FORMAT))?;
        let frame_rate = config
            .frame_rate
            .map(Ok)
            .unwrap_or_else(|| get_max_frame_rate(&cam, FORMAT, resolution))?;

        cam.start(&Config {
            interval: frame_rate,
            resolution,
            format: FORMAT,
            ..Default::default()
        })
        .map_err(|e| anyhow!("could not start capture on {}: {}", config.device, e))?;

        log::info!(
            "capturing {} at {}x{}, {}/{} fps",
            config.device,
            resolution.0,
            resolution.1,
            frame_rate.1,
            frame_rate.0,
        );

        Ok(Self {
            cam,
            device: config.device.clone(),
        })
    }

    /// Block for the next frame and decode it. `None` signals end-of-stream;
    /// any capture or decode failure ends the sequence permanently.
    fn capture_rgb(&mut self) -> Option<RgbImage> {
        let frame = match self.cam.capture() {
            Ok(frame) => frame,
            Err(err) => {
                log::error!("capture on {} failed: {}", self.device, err);
                return None;
            }
        };

        match image::load_from_memory(&frame[..]) {
            Ok(image) => Some(image.to_rgb8()),
            Err(err) => {
                log::error!("could not decode frame from {}: {}", self.device, err);
                None
            }
        }
    }
}

impl Iterator for CameraSource {
    type Item = RgbImage;

    fn next(&mut self) -> Option<RgbImage> {
        self.capture_rgb()
    }
}

/// Get the maximum supported resolution for the given format.
fn get_max_resolution(cam: &Camera, format: &[u8]) -> Result<(u32, u32)> {
    let resolution_info = cam
        .resolutions(format)
        .map_err(|e| anyhow!("could not query resolutions: {}", e))?;
    log::debug!("Found resolutions: {:?}", &resolution_info);
    match resolution_info {
        rscam::ResolutionInfo::Discretes(resolutions) => resolutions
            .iter()
            .map(|res| (res, res.0 * res.1))
            .max_by(|a, b| a.1.cmp(&b.1))
            .map(|res| *res.0),
        rscam::ResolutionInfo::Stepwise {
            min: _,
            max,
            step: _,
        } => Some(max),
    }
    .ok_or_else(|| anyhow!("no resolution found"))
}

/// Get the maximum supported frame rate for the given format and resolution.
fn get_max_frame_rate(cam: &Camera, format: &[u8], resolution: (u32, u32)) -> Result<(u32, u32)> {
    let interval_info = cam
        .intervals(format, resolution)
        .map_err(|e| anyhow!("could not query frame rates: {}", e))?;
    log::debug!("Found frame rates: {:?}", &interval_info);
    match interval_info {
        rscam::IntervalInfo::Discretes(frame_rates) => frame_rates
            .iter()
            .map(|(denominator, numerator)| ((denominator, numerator), numerator / denominator))
            .max_by(|a, b| a.1.cmp(&b.1))
            .map(|((&d, &n), _)| (d, n)),
        rscam::IntervalInfo::Stepwise {
            min: _,
            max,
            step: _,
        } => Some(max),
    }
    .ok_or_else(|| anyhow!("no frame rate found"))
}
