use std::io::Cursor;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use image::{codecs::jpeg::JpegEncoder, imageops::FilterType, DynamicImage};
use serde::Deserialize;
use xcap::Monitor;

use crate::error::AnalysisError;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CaptureMode {
    #[default]
    Full,
}

/// Grabs the desktop as a base64 JPEG.
#[async_trait]
pub trait CaptureProvider: Send + Sync {
    async fn capture(&self, mode: CaptureMode) -> Result<String, AnalysisError>;
}

/// Primary-monitor capture through `xcap`.
pub struct DesktopCaptureProvider {
    max_width: u32,
    max_height: u32,
    jpeg_quality: u8,
}

impl DesktopCaptureProvider {
    pub fn new(max_width: u32, max_height: u32, jpeg_quality: u8) -> Self {
        Self {
            max_width,
            max_height,
            jpeg_quality,
        }
    }
}

#[async_trait]
impl CaptureProvider for DesktopCaptureProvider {
    async fn capture(&self, mode: CaptureMode) -> Result<String, AnalysisError> {
        let CaptureMode::Full = mode;
        let (max_width, max_height, quality) = (self.max_width, self.max_height, self.jpeg_quality);

        let started = std::time::Instant::now();
        let encoded = tokio::task::spawn_blocking(move || {
            grab_primary_screen(max_width, max_height, quality)
        })
        .await
        .map_err(|err| AnalysisError::NoScreenSource(format!("capture worker failed: {err}")))?
        .map_err(|err| {
            log_warn!("screen capture failed: {err:#}");
            AnalysisError::NoScreenSource(format!("{err:#}"))
        })?;

        log_info!(
            "Screenshot: {} base64 bytes, capture_time={}ms",
            encoded.len(),
            started.elapsed().as_millis()
        );
        Ok(encoded)
    }
}

fn grab_primary_screen(max_width: u32, max_height: u32, quality: u8) -> Result<String> {
    let monitors = Monitor::all().context("Failed to enumerate monitors")?;
    let primary = pick_primary(monitors, |m| m.is_primary().unwrap_or(false)).context("No monitors found")?;
    let raw = primary
        .capture_image()
        .context("Failed to capture image; screen recording permission may be missing")?;

    encode_jpeg_base64(DynamicImage::ImageRgba8(raw), max_width, max_height, quality)
}

/// The monitor flagged primary, else the first one listed.
fn pick_primary<T>(mut monitors: Vec<T>, is_primary: impl Fn(&T) -> bool) -> Option<T> {
    if monitors.is_empty() {
        return None;
    }
    let index = monitors.iter().position(|m| is_primary(m)).unwrap_or(0);
    Some(monitors.swap_remove(index))
}

/// Downscales to fit inside the bounds (aspect preserved) and encodes as JPEG.
pub fn encode_jpeg_base64(
    image: DynamicImage,
    max_width: u32,
    max_height: u32,
    quality: u8,
) -> Result<String> {
    if image.width() == 0 || image.height() == 0 {
        bail!("Captured empty screenshot - possible permission issue or no display");
    }

    let image = if image.width() > max_width || image.height() > max_height {
        image.resize(max_width, max_height, FilterType::Triangle)
    } else {
        image
    };

    let rgb = image.to_rgb8();
    let mut jpeg = Cursor::new(Vec::new());
    JpegEncoder::new_with_quality(&mut jpeg, quality)
        .encode_image(&rgb)
        .context("JPEG encoding failed")?;

    Ok(BASE64.encode(jpeg.into_inner()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, RgbaImage};

    fn decode(encoded: &str) -> DynamicImage {
        let bytes = BASE64.decode(encoded).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8], "expected JPEG SOI marker");
        image::load_from_memory(&bytes).unwrap()
    }

    #[test]
    fn large_frames_are_downscaled_with_aspect_ratio() {
        let frame = DynamicImage::ImageRgba8(RgbaImage::new(2400, 1350));
        let encoded = encode_jpeg_base64(frame, 1920, 1080, 85).unwrap();
        assert_eq!(decode(&encoded).dimensions(), (1920, 1080));
    }

    #[test]
    fn small_frames_keep_their_size() {
        let frame = DynamicImage::ImageRgba8(RgbaImage::new(640, 400));
        let encoded = encode_jpeg_base64(frame, 1920, 1080, 85).unwrap();
        assert_eq!(decode(&encoded).dimensions(), (640, 400));
    }

    #[test]
    fn empty_frame_is_rejected() {
        let frame = DynamicImage::ImageRgba8(RgbaImage::new(0, 0));
        assert!(encode_jpeg_base64(frame, 1920, 1080, 85).is_err());
    }

    #[test]
    fn primary_monitor_is_preferred_over_list_order() {
        let picked = pick_primary(vec![("left", false), ("main", true)], |m| m.1);
        assert_eq!(picked, Some(("main", true)));
    }

    #[test]
    fn first_monitor_is_used_without_a_primary_flag() {
        let picked = pick_primary(vec![("a", false), ("b", false)], |m| m.1);
        assert_eq!(picked, Some(("a", false)));
        assert_eq!(pick_primary(Vec::<(&str, bool)>::new(), |m| m.1), None);
    }

    #[tokio::test]
    #[ignore = "requires a graphical display and screen recording permission"]
    async fn captures_primary_monitor() {
        let provider = DesktopCaptureProvider::new(1920, 1080, 85);
        let encoded = provider.capture(CaptureMode::Full).await.unwrap();
        assert!(!encoded.is_empty());
    }
}
