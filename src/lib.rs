mod analysis;
mod command_surface;
mod error;
mod events;
mod settings;
mod settings_commands;
mod surface;
mod utils;

use std::sync::Arc;

use analysis::{
    commands::{ask_model, capture_screen, get_cycle_state, notify_cycle_complete, run_cycle},
    AnalysisConfig, AnalysisOrchestrator, Collaborators, DesktopCaptureProvider, GeminiClient,
    TauriNotifier,
};
use events::{EventSink, TauriEventSink};
use log::{info, warn};
use settings::SettingsStore;
use settings_commands::{get_credential, set_credential};
use surface::{
    commands::{hide_overlay, set_click_through, toggle_click_through, toggle_overlay},
    tauri_host::{build_overlay_window, geometry_change, work_area_width, OVERLAY_LABEL},
    DisplaySurfaceController, InputTransparencyController, TauriSurfaceHost,
};
use tauri::{AppHandle, Manager, RunEvent};

pub(crate) struct AppState {
    pub(crate) settings: Arc<SettingsStore>,
    pub(crate) surface: Arc<DisplaySurfaceController>,
    pub(crate) click_through: Arc<InputTransparencyController>,
    pub(crate) analysis: AnalysisOrchestrator,
    pub(crate) events: Arc<dyn EventSink>,
}

impl AppState {
    /// Stores the credential and lets the click-through policy react to a
    /// first-time set. A failed write keeps the in-memory value.
    pub(crate) fn set_credential(&self, credential: String) {
        let previous = self.settings.credential();
        if let Err(err) = self.settings.set_credential(credential.clone()) {
            warn!("failed to persist credential: {err:#}");
        }
        self.click_through.on_credential_set(&previous, &credential);
    }

    fn teardown(&self) {
        self.analysis.shutdown();
        self.surface.detach();
    }
}

/// Builds the overlay window, wires its geometry events into the surface
/// controller and shows it.
fn create_overlay(app: &AppHandle) -> anyhow::Result<()> {
    let state = app.state::<AppState>();
    let (position, size) = state.surface.initial_placement(work_area_width(app));

    let loaded_handle = app.clone();
    let window = build_overlay_window(app, position, size, move || {
        if let Some(state) = loaded_handle.try_state::<AppState>() {
            let has_credential = !state.settings.credential().is_empty();
            state.click_through.apply_startup_policy(has_credential);
        }
    })?;

    let event_handle = app.clone();
    window.on_window_event(move |event| {
        let Some(state) = event_handle.try_state::<AppState>() else {
            return;
        };
        let scale_factor = event_handle
            .get_webview_window(OVERLAY_LABEL)
            .and_then(|window| window.scale_factor().ok())
            .unwrap_or(1.0);
        if let Some(change) = geometry_change(event, scale_factor) {
            state.surface.on_geometry_changed(change);
        }
    });

    let strategy = state.surface.attach(Arc::new(TauriSurfaceHost::new(window)))?;
    info!(
        "overlay created at ({}, {}) {}x{}, capture affinity {strategy:?}",
        position.x, position.y, size.width, size.height
    );

    state.surface.show();
    Ok(())
}

#[cfg_attr(mobile, tauri::mobile_entry_point)]
pub fn run() {
    // RUST_LOG overrides the default level
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("Truly starting up...");

    tauri::Builder::default()
        .plugin(tauri_plugin_notification::init())
        .plugin(command_surface::shortcut_plugin())
        .setup(|app| {
            let result = (|| -> anyhow::Result<()> {
                let app_data_dir = app
                    .path()
                    .app_data_dir()
                    .map_err(|err| anyhow::anyhow!(err))?;
                std::fs::create_dir_all(&app_data_dir)?;

                let settings_path = app_data_dir.join("settings.json");
                let settings = Arc::new(SettingsStore::new(settings_path)?);

                let handle = app.handle().clone();
                let events: Arc<dyn EventSink> = Arc::new(TauriEventSink::new(handle.clone()));
                let config = AnalysisConfig::from_env();

                let surface = Arc::new(DisplaySurfaceController::new(
                    settings.clone(),
                    events.clone(),
                ));
                let click_through = Arc::new(InputTransparencyController::new(
                    surface.clone(),
                    events.clone(),
                ));

                let collaborators = Collaborators {
                    capture: Arc::new(DesktopCaptureProvider::new(
                        config.capture_max_width,
                        config.capture_max_height,
                        config.jpeg_quality,
                    )),
                    client: Arc::new(GeminiClient::new(config.api_base.clone())?),
                    notifier: Arc::new(TauriNotifier::new(handle.clone())),
                    events: events.clone(),
                };
                let analysis = AnalysisOrchestrator::new(
                    surface.clone(),
                    settings.clone(),
                    config,
                    collaborators,
                );

                app.manage(AppState {
                    settings,
                    surface,
                    click_through,
                    analysis,
                    events,
                });

                create_overlay(&handle)?;
                command_surface::install(&handle)?;

                Ok(())
            })();

            result.map_err(|err| err.into())
        })
        .invoke_handler(tauri::generate_handler![
            hide_overlay,
            toggle_overlay,
            set_click_through,
            toggle_click_through,
            get_credential,
            set_credential,
            get_cycle_state,
            capture_screen,
            ask_model,
            run_cycle,
            notify_cycle_complete,
        ])
        .build(tauri::generate_context!())
        .expect("error while building tauri application")
        .run(|app, event| {
            if let RunEvent::Exit = event {
                command_surface::uninstall(app);
                if let Some(state) = app.try_state::<AppState>() {
                    state.teardown();
                }
                info!("Truly shut down");
            }
        });
}
