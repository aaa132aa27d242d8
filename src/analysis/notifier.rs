use std::sync::{
    atomic::{AtomicI32, Ordering},
    Mutex, PoisonError,
};

use anyhow::{Context, Result};
use log::debug;
use tauri::AppHandle;
use tauri_plugin_notification::NotificationExt;

pub type NotificationId = i32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub title: String,
    pub body: String,
    pub silent: bool,
}

impl Notice {
    pub fn analyzing() -> Self {
        Self {
            title: "Truly".into(),
            body: "Analyzing screen...".into(),
            silent: true,
        }
    }

    pub fn complete() -> Self {
        Self {
            title: "Truly".into(),
            body: "Analysis complete. Open the overlay to see the answer.".into(),
            silent: true,
        }
    }
}

/// OS notification center.
pub trait Notifier: Send + Sync {
    fn post(&self, notice: &Notice) -> Result<NotificationId>;
    fn close(&self, id: NotificationId);
}

/// Holds at most one outstanding "analyzing" notification.
#[derive(Default)]
pub struct PendingNotificationSlot {
    slot: Mutex<Option<NotificationId>>,
}

impl PendingNotificationSlot {
    /// Stores `id` and hands back whatever it displaced.
    pub fn replace(&self, id: NotificationId) -> Option<NotificationId> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(id)
    }

    pub fn take(&self) -> Option<NotificationId> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}

pub struct TauriNotifier {
    app_handle: AppHandle,
    next_id: AtomicI32,
}

impl TauriNotifier {
    pub fn new(app_handle: AppHandle) -> Self {
        Self {
            app_handle,
            next_id: AtomicI32::new(1),
        }
    }
}

impl Notifier for TauriNotifier {
    fn post(&self, notice: &Notice) -> Result<NotificationId> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut builder = self
            .app_handle
            .notification()
            .builder()
            .id(id)
            .title(&notice.title)
            .body(&notice.body);
        if notice.silent {
            builder = builder.silent();
        }
        builder.show().context("failed to show notification")?;
        Ok(id)
    }

    fn close(&self, id: NotificationId) {
        // Desktop notification centers expire toasts on their own; the plugin
        // offers no retraction there.
        debug!("releasing notification {id}");
    }
}
