pub mod affinity;
pub mod click_through;
pub mod commands;
pub mod tauri_host;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{bail, Result};
use log::{info, warn};

use crate::{
    events::{BoundaryEvent, EventSink},
    settings::{Position, SettingsStore, Size},
};

pub use affinity::{apply_capture_affinity, CaptureAffinityStrategy};
pub use click_through::InputTransparencyController;
pub use tauri_host::TauriSurfaceHost;

/// Gap kept between the overlay and the right edge of the work area.
pub const RIGHT_MARGIN: i32 = 20;
/// Vertical offset used when no position has been persisted.
pub const TOP_OFFSET: i32 = 60;

/// Window operations the overlay needs from the platform.
pub trait SurfaceHost: Send + Sync {
    fn show(&self) -> Result<()>;
    fn hide(&self) -> Result<()>;
    fn focus(&self) -> Result<()>;
    fn set_ignore_cursor_events(&self, ignore: bool, forward: bool) -> Result<()>;
    /// OS-level exclusion from screen capture and recording.
    fn exclude_from_capture(&self) -> Result<()>;
    /// Toolkit-level content protection, the coarser fallback.
    fn set_content_protected(&self, enabled: bool) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeometryChange {
    Moved(Position),
    Resized(Size),
}

/// Where the overlay opens: the persisted position when both coordinates are
/// non-negative, otherwise the top-right corner of the work area.
pub fn initial_placement(position: Position, size: Size, work_area_width: u32) -> (Position, Size) {
    if position.is_placed() {
        return (position, size);
    }

    let x = work_area_width as i32 - size.width as i32 - RIGHT_MARGIN;
    (Position { x, y: TOP_OFFSET }, size)
}

struct OverlaySurface {
    host: Arc<dyn SurfaceHost>,
    visible: bool,
    click_through: bool,
    affinity: CaptureAffinityStrategy,
}

/// Owns the single overlay surface. Every method is a silent no-op until
/// [`DisplaySurfaceController::attach`] has run.
pub struct DisplaySurfaceController {
    surface: Mutex<Option<OverlaySurface>>,
    settings: Arc<SettingsStore>,
    events: Arc<dyn EventSink>,
}

impl DisplaySurfaceController {
    pub fn new(settings: Arc<SettingsStore>, events: Arc<dyn EventSink>) -> Self {
        Self {
            surface: Mutex::new(None),
            settings,
            events,
        }
    }

    pub fn initial_placement(&self, work_area_width: u32) -> (Position, Size) {
        initial_placement(self.settings.position(), self.settings.size(), work_area_width)
    }

    /// Registers the freshly created window. Capture affinity is applied here,
    /// once, and the chosen strategy is recorded for the capture policy.
    pub fn attach(&self, host: Arc<dyn SurfaceHost>) -> Result<CaptureAffinityStrategy> {
        if self.lock().is_some() {
            bail!("overlay surface already created");
        }

        let affinity = CaptureAffinityStrategy::from(apply_capture_affinity(host.as_ref()));

        let mut guard = self.lock();
        if guard.is_some() {
            bail!("overlay surface already created");
        }
        *guard = Some(OverlaySurface {
            host,
            visible: false,
            click_through: false,
            affinity,
        });
        Ok(affinity)
    }

    pub fn detach(&self) {
        if self.lock().take().is_some() {
            info!("overlay surface released");
        }
    }

    pub fn is_created(&self) -> bool {
        self.lock().is_some()
    }

    pub fn is_visible(&self) -> bool {
        self.lock().as_ref().is_some_and(|surface| surface.visible)
    }

    pub fn is_click_through(&self) -> bool {
        self.lock().as_ref().is_some_and(|surface| surface.click_through)
    }

    /// `None` until the surface exists.
    pub fn capture_affinity(&self) -> Option<CaptureAffinityStrategy> {
        self.lock().as_ref().map(|surface| surface.affinity)
    }

    pub fn show(&self) {
        let Some((host, flipped)) = self.set_visible(true) else {
            return;
        };
        if flipped {
            log_host_error("show", host.show());
        }
        log_host_error("focus", host.focus());
        if flipped {
            self.events.emit(BoundaryEvent::VisibilityChanged(true));
        }
    }

    pub fn hide(&self) {
        let Some((host, flipped)) = self.set_visible(false) else {
            return;
        };
        if flipped {
            log_host_error("hide", host.hide());
            self.events.emit(BoundaryEvent::VisibilityChanged(false));
        }
    }

    /// The single entry point every trigger uses to flip visibility.
    /// Returns the new visibility, or `None` before the surface exists.
    pub fn toggle_visibility(&self) -> Option<bool> {
        let visible = self.lock().as_ref()?.visible;
        if visible {
            self.hide();
        } else {
            self.show();
        }
        Some(!visible)
    }

    /// Persists the new geometry before returning.
    pub fn on_geometry_changed(&self, change: GeometryChange) {
        let result = match change {
            GeometryChange::Moved(position) => self.settings.set_position(position),
            GeometryChange::Resized(size) => self.settings.set_size(size),
        };
        if let Err(err) = result {
            warn!("failed to persist overlay geometry {change:?}: {err:#}");
        }
    }

    /// Hides the window for a screen grab without changing the logical
    /// visibility. The returned guard puts it back when dropped.
    pub fn conceal_for_capture(&self) -> CaptureConcealment<'_> {
        let host = self
            .lock()
            .as_ref()
            .filter(|surface| surface.visible)
            .map(|surface| surface.host.clone());

        if let Some(host) = &host {
            log_host_error("hide for capture", host.hide());
        }

        CaptureConcealment {
            controller: self,
            host,
        }
    }

    /// Returns false when there is no surface to apply the mode to.
    pub(crate) fn apply_click_through(&self, enabled: bool, forward: bool) -> bool {
        let host = {
            let mut guard = self.lock();
            let Some(surface) = guard.as_mut() else {
                return false;
            };
            surface.click_through = enabled;
            surface.host.clone()
        };
        log_host_error("set ignore cursor events", host.set_ignore_cursor_events(enabled, forward));
        true
    }

    fn set_visible(&self, visible: bool) -> Option<(Arc<dyn SurfaceHost>, bool)> {
        let mut guard = self.lock();
        let surface = guard.as_mut()?;
        let flipped = surface.visible != visible;
        surface.visible = visible;
        Some((surface.host.clone(), flipped))
    }

    fn lock(&self) -> MutexGuard<'_, Option<OverlaySurface>> {
        self.surface.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Restores a window hidden by [`DisplaySurfaceController::conceal_for_capture`].
pub struct CaptureConcealment<'a> {
    controller: &'a DisplaySurfaceController,
    host: Option<Arc<dyn SurfaceHost>>,
}

impl CaptureConcealment<'_> {
    pub fn is_concealed(&self) -> bool {
        self.host.is_some()
    }
}

impl Drop for CaptureConcealment<'_> {
    fn drop(&mut self) {
        let Some(host) = self.host.take() else {
            return;
        };
        // The user may have hidden the overlay while the grab was running.
        if self.controller.is_visible() {
            log_host_error("restore after capture", host.show());
        }
    }
}

fn log_host_error(action: &str, result: Result<()>) {
    if let Err(err) = result {
        warn!("overlay {action} failed: {err:#}");
    }
}
