//! Keeps the overlay out of screen recordings and shares.
//!
//! The OS-level display affinity is preferred. When it cannot be set the
//! toolkit's content protection is used instead, which blanks the window in
//! captures rather than omitting it. Neither failing stops startup.

use log::{info, warn};
use serde::Serialize;

use crate::error::ErrorKind;

use super::SurfaceHost;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum AffinityResult {
    Excluded,
    ContentProtected,
    Failed,
}

/// Strategy recorded on the surface when it is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum CaptureAffinityStrategy {
    NativeExclude,
    ContentProtectionFallback,
    Unavailable,
}

impl From<AffinityResult> for CaptureAffinityStrategy {
    fn from(result: AffinityResult) -> Self {
        match result {
            AffinityResult::Excluded => CaptureAffinityStrategy::NativeExclude,
            AffinityResult::ContentProtected => CaptureAffinityStrategy::ContentProtectionFallback,
            AffinityResult::Failed => CaptureAffinityStrategy::Unavailable,
        }
    }
}

impl CaptureAffinityStrategy {
    /// Only the native exclusion leaves the surface out of a screen grab
    /// entirely; everything else still needs the hide/restore dance.
    pub fn omits_surface_from_capture(self) -> bool {
        matches!(self, CaptureAffinityStrategy::NativeExclude)
    }
}

pub fn apply_capture_affinity(host: &dyn SurfaceHost) -> AffinityResult {
    let native_err = match host.exclude_from_capture() {
        Ok(()) => {
            info!("Hide from capture: enabled");
            return AffinityResult::Excluded;
        }
        Err(err) => err,
    };

    warn!(
        "{:?}: native capture exclusion failed ({native_err:#}); trying content protection",
        ErrorKind::AffinityUnavailable
    );

    match host.set_content_protected(true) {
        Ok(()) => {
            info!("Hide from capture: using content protection fallback");
            AffinityResult::ContentProtected
        }
        Err(err) => {
            warn!(
                "{:?}: content protection failed ({err:#}); overlay will appear in captures",
                ErrorKind::AffinityUnavailable
            );
            AffinityResult::Failed
        }
    }
}
