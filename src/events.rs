use log::warn;
use tauri::{AppHandle, Emitter};

use crate::analysis::CycleSnapshot;

pub const TRIGGER_CAPTURE: &str = "trigger-capture";
pub const OPEN_SETTINGS: &str = "open-settings";
pub const CLICK_THROUGH_CHANGED: &str = "click-through-changed";
pub const VISIBILITY_CHANGED: &str = "visibility-changed";
pub const CYCLE_STATE_CHANGED: &str = "cycle-state-changed";

/// Events pushed from the core to the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub enum BoundaryEvent {
    TriggerCapture,
    OpenSettings,
    ClickThroughChanged(bool),
    VisibilityChanged(bool),
    CycleStateChanged(CycleSnapshot),
}

impl BoundaryEvent {
    pub fn name(&self) -> &'static str {
        match self {
            BoundaryEvent::TriggerCapture => TRIGGER_CAPTURE,
            BoundaryEvent::OpenSettings => OPEN_SETTINGS,
            BoundaryEvent::ClickThroughChanged(_) => CLICK_THROUGH_CHANGED,
            BoundaryEvent::VisibilityChanged(_) => VISIBILITY_CHANGED,
            BoundaryEvent::CycleStateChanged(_) => CYCLE_STATE_CHANGED,
        }
    }
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: BoundaryEvent);
}

pub struct TauriEventSink {
    app_handle: AppHandle,
}

impl TauriEventSink {
    pub fn new(app_handle: AppHandle) -> Self {
        Self { app_handle }
    }
}

impl EventSink for TauriEventSink {
    fn emit(&self, event: BoundaryEvent) {
        let name = event.name();
        let result = match event {
            BoundaryEvent::TriggerCapture | BoundaryEvent::OpenSettings => {
                self.app_handle.emit(name, ())
            }
            BoundaryEvent::ClickThroughChanged(enabled) => self.app_handle.emit(name, enabled),
            BoundaryEvent::VisibilityChanged(visible) => self.app_handle.emit(name, visible),
            BoundaryEvent::CycleStateChanged(snapshot) => self.app_handle.emit(name, snapshot),
        };

        if let Err(err) = result {
            warn!("failed to emit {name}: {err}");
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::{BoundaryEvent, EventSink};

    #[derive(Default)]
    pub struct RecordingSink {
        events: Mutex<Vec<BoundaryEvent>>,
    }

    impl RecordingSink {
        pub fn events(&self) -> Vec<BoundaryEvent> {
            self.events.lock().unwrap().clone()
        }

        pub fn count(&self, pred: impl Fn(&BoundaryEvent) -> bool) -> usize {
            self.events.lock().unwrap().iter().filter(|e| pred(e)).count()
        }
    }

    impl EventSink for RecordingSink {
        fn emit(&self, event: BoundaryEvent) {
            self.events.lock().unwrap().push(event);
        }
    }
}
