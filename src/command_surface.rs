//! Global hotkeys and the tray menu. Both funnel into [`dispatch`].

use log::{info, warn};
use tauri::{
    menu::{Menu, MenuItem, PredefinedMenuItem},
    plugin::TauriPlugin,
    tray::{MouseButton, MouseButtonState, TrayIconBuilder, TrayIconEvent},
    AppHandle, Manager, Wry,
};
use tauri_plugin_global_shortcut::{
    Code, GlobalShortcutExt, Modifiers, Shortcut, ShortcutState,
};

use crate::{
    events::BoundaryEvent,
    AppState,
};

const TRAY_ID: &str = "truly-tray";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceCommand {
    ToggleVisibility,
    ToggleClickThrough,
    QuickAnalyze,
    OpenSettings,
    Quit,
}

impl SurfaceCommand {
    fn menu_id(self) -> &'static str {
        match self {
            SurfaceCommand::ToggleVisibility => "toggle",
            SurfaceCommand::ToggleClickThrough => "click-through",
            SurfaceCommand::QuickAnalyze => "analyze",
            SurfaceCommand::OpenSettings => "settings",
            SurfaceCommand::Quit => "quit",
        }
    }

    fn from_menu_id(id: &str) -> Option<Self> {
        [
            SurfaceCommand::ToggleVisibility,
            SurfaceCommand::ToggleClickThrough,
            SurfaceCommand::QuickAnalyze,
            SurfaceCommand::OpenSettings,
            SurfaceCommand::Quit,
        ]
        .into_iter()
        .find(|command| command.menu_id() == id)
    }
}

fn primary_modifier() -> Modifiers {
    if cfg!(target_os = "macos") {
        Modifiers::SUPER
    } else {
        Modifiers::CONTROL
    }
}

fn hotkey_label(key: &str) -> String {
    let primary = if cfg!(target_os = "macos") { "Cmd" } else { "Ctrl" };
    format!("{primary}+Shift+{key}")
}

pub fn shortcut_bindings() -> [(Shortcut, SurfaceCommand); 3] {
    let modifiers = Some(primary_modifier() | Modifiers::SHIFT);
    [
        (
            Shortcut::new(modifiers, Code::Space),
            SurfaceCommand::ToggleVisibility,
        ),
        (
            Shortcut::new(modifiers, Code::KeyX),
            SurfaceCommand::ToggleClickThrough,
        ),
        (
            Shortcut::new(modifiers, Code::KeyQ),
            SurfaceCommand::QuickAnalyze,
        ),
    ]
}

pub fn command_for_shortcut(shortcut: &Shortcut) -> Option<SurfaceCommand> {
    shortcut_bindings()
        .into_iter()
        .find(|(bound, _)| bound == shortcut)
        .map(|(_, command)| command)
}

/// Plugin whose handler routes key-down events of the bound hotkeys.
pub fn shortcut_plugin() -> TauriPlugin<Wry> {
    tauri_plugin_global_shortcut::Builder::new()
        .with_handler(|app, shortcut, event| {
            if event.state != ShortcutState::Pressed {
                return;
            }
            if let Some(command) = command_for_shortcut(shortcut) {
                dispatch(app, command);
            }
        })
        .build()
}

pub fn dispatch(app: &AppHandle, command: SurfaceCommand) {
    let Some(state) = app.try_state::<AppState>() else {
        warn!("{command:?} ignored: app state not ready");
        return;
    };

    match command {
        SurfaceCommand::ToggleVisibility => {
            state.surface.toggle_visibility();
        }
        SurfaceCommand::ToggleClickThrough => {
            state.click_through.toggle();
        }
        SurfaceCommand::QuickAnalyze => state.analysis.quick_trigger(),
        SurfaceCommand::OpenSettings => {
            state.surface.show();
            state.events.emit(BoundaryEvent::OpenSettings);
        }
        SurfaceCommand::Quit => app.exit(0),
    }
}

/// Registers the hotkeys and builds the tray icon. A hotkey already owned by
/// another application is logged and skipped.
pub fn install(app: &AppHandle) -> anyhow::Result<()> {
    for (shortcut, command) in shortcut_bindings() {
        match app.global_shortcut().register(shortcut) {
            Ok(()) => info!("registered {command:?} hotkey"),
            Err(err) => warn!("could not register {command:?} hotkey: {err}"),
        }
    }

    build_tray(app)?;
    Ok(())
}

pub fn uninstall(app: &AppHandle) {
    if let Err(err) = app.global_shortcut().unregister_all() {
        warn!("failed to unregister hotkeys: {err}");
    }
}

fn build_tray(app: &AppHandle) -> tauri::Result<()> {
    let item = |command: SurfaceCommand, label: String| {
        MenuItem::with_id(app, command.menu_id(), label, true, None::<&str>)
    };

    let toggle = item(
        SurfaceCommand::ToggleVisibility,
        format!("Show/Hide ({})", hotkey_label("Space")),
    )?;
    let click_through = item(
        SurfaceCommand::ToggleClickThrough,
        format!("Toggle Click-Through ({})", hotkey_label("X")),
    )?;
    let analyze = item(
        SurfaceCommand::QuickAnalyze,
        format!("Analyze Screen ({})", hotkey_label("Q")),
    )?;
    let settings = item(SurfaceCommand::OpenSettings, "Settings".to_string())?;
    let quit = item(SurfaceCommand::Quit, "Quit".to_string())?;

    let menu = Menu::with_items(
        app,
        &[
            &toggle,
            &click_through,
            &analyze,
            &PredefinedMenuItem::separator(app)?,
            &settings,
            &PredefinedMenuItem::separator(app)?,
            &quit,
        ],
    )?;

    let mut builder = TrayIconBuilder::with_id(TRAY_ID)
        .tooltip("Truly AI")
        .menu(&menu)
        .show_menu_on_left_click(false)
        .on_menu_event(|app, event| {
            if let Some(command) = SurfaceCommand::from_menu_id(event.id.as_ref()) {
                dispatch(app, command);
            }
        })
        .on_tray_icon_event(|tray, event| {
            if let TrayIconEvent::Click {
                button: MouseButton::Left,
                button_state: MouseButtonState::Up,
                ..
            } = event
            {
                dispatch(tray.app_handle(), SurfaceCommand::ToggleVisibility);
            }
        });

    if let Some(icon) = app.default_window_icon() {
        builder = builder.icon(icon.clone());
    }

    builder.build(app)?;
    Ok(())
}
