use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use log::info;

use crate::events::{BoundaryEvent, EventSink};

use super::DisplaySurfaceController;

/// Decides whether pointer input reaches the overlay or falls through to the
/// window underneath.
pub struct InputTransparencyController {
    surface: Arc<DisplaySurfaceController>,
    events: Arc<dyn EventSink>,
    startup_applied: AtomicBool,
}

impl InputTransparencyController {
    pub fn new(surface: Arc<DisplaySurfaceController>, events: Arc<dyn EventSink>) -> Self {
        Self {
            surface,
            events,
            startup_applied: AtomicBool::new(false),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.surface.is_click_through()
    }

    /// Returns false before the surface exists.
    pub fn set_click_through(&self, enabled: bool, forward_events: bool) -> bool {
        if !self.surface.apply_click_through(enabled, forward_events) {
            return false;
        }
        info!("click-through {}", if enabled { "enabled" } else { "disabled" });
        self.events.emit(BoundaryEvent::ClickThroughChanged(enabled));
        true
    }

    pub fn toggle(&self) -> Option<bool> {
        if !self.surface.is_created() {
            return None;
        }
        let next = !self.is_enabled();
        self.set_click_through(next, true).then_some(next)
    }

    /// Runs on the first finished page load only. Without a credential the
    /// overlay must stay clickable so the key can be typed in.
    pub fn apply_startup_policy(&self, has_credential: bool) {
        if self.startup_applied.swap(true, Ordering::SeqCst) {
            return;
        }
        if !self.set_click_through(has_credential, true) {
            self.startup_applied.store(false, Ordering::SeqCst);
        }
    }

    pub fn on_credential_set(&self, previous: &str, current: &str) {
        if previous.is_empty() && !current.is_empty() {
            self.set_click_through(true, true);
        }
    }
}
