use anyhow::{Context, Result};
use tauri::{
    webview::PageLoadEvent, AppHandle, PhysicalPosition, PhysicalSize, WebviewUrl, WebviewWindow,
    WebviewWindowBuilder, WindowEvent,
};

use crate::settings::{Position, Size};

use super::{GeometryChange, SurfaceHost};

pub const OVERLAY_LABEL: &str = "overlay";

const FALLBACK_WORK_AREA_WIDTH: u32 = 1920;

/// [`SurfaceHost`] backed by the overlay webview window.
pub struct TauriSurfaceHost {
    window: WebviewWindow,
}

impl TauriSurfaceHost {
    pub fn new(window: WebviewWindow) -> Self {
        Self { window }
    }
}

impl SurfaceHost for TauriSurfaceHost {
    fn show(&self) -> Result<()> {
        self.window.show().context("failed to show overlay")
    }

    fn hide(&self) -> Result<()> {
        self.window.hide().context("failed to hide overlay")
    }

    fn focus(&self) -> Result<()> {
        self.window.set_focus().context("failed to focus overlay")
    }

    fn set_ignore_cursor_events(&self, ignore: bool, _forward: bool) -> Result<()> {
        // Tauri forwards nothing while ignoring; hover effects are handled by
        // the page toggling the mode itself.
        self.window
            .set_ignore_cursor_events(ignore)
            .context("failed to change cursor event handling")
    }

    fn exclude_from_capture(&self) -> Result<()> {
        native::exclude_from_capture(&self.window)
    }

    fn set_content_protected(&self, enabled: bool) -> Result<()> {
        self.window
            .set_content_protected(enabled)
            .context("failed to enable content protection")
    }
}

/// Logical width of the primary monitor's work area.
pub fn work_area_width(app: &AppHandle) -> u32 {
    match app.primary_monitor() {
        Ok(Some(monitor)) => {
            let area = monitor.work_area();
            (f64::from(area.size.width) / monitor.scale_factor()) as u32
        }
        _ => FALLBACK_WORK_AREA_WIDTH,
    }
}

/// Frameless, transparent, always-on-top overlay. Created hidden; the caller
/// decides when to show it.
pub fn build_overlay_window<F>(
    app: &AppHandle,
    position: Position,
    size: Size,
    on_loaded: F,
) -> Result<WebviewWindow>
where
    F: Fn() + Send + Sync + 'static,
{
    WebviewWindowBuilder::new(app, OVERLAY_LABEL, WebviewUrl::App("index.html".into()))
        .title("Truly")
        .inner_size(f64::from(size.width), f64::from(size.height))
        .position(f64::from(position.x), f64::from(position.y))
        .decorations(false)
        .transparent(true)
        .always_on_top(true)
        .skip_taskbar(true)
        .resizable(true)
        .shadow(false)
        .visible(false)
        .on_page_load(move |_window, payload| {
            if payload.event() == PageLoadEvent::Finished {
                on_loaded();
            }
        })
        .build()
        .context("failed to create overlay window")
}

/// Translates a platform window event into a geometry change in logical units.
pub fn geometry_change(event: &WindowEvent, scale_factor: f64) -> Option<GeometryChange> {
    match event {
        WindowEvent::Moved(position) => Some(GeometryChange::Moved(logical_position(
            *position,
            scale_factor,
        ))),
        WindowEvent::Resized(size) => Some(GeometryChange::Resized(logical_size(*size, scale_factor))),
        _ => None,
    }
}

fn logical_position(position: PhysicalPosition<i32>, scale_factor: f64) -> Position {
    let logical = position.to_logical::<f64>(scale_factor);
    Position {
        x: logical.x.round() as i32,
        y: logical.y.round() as i32,
    }
}

fn logical_size(size: PhysicalSize<u32>, scale_factor: f64) -> Size {
    let logical = size.to_logical::<f64>(scale_factor);
    Size {
        width: logical.width.round() as u32,
        height: logical.height.round() as u32,
    }
}

#[cfg(windows)]
mod native {
    use anyhow::{anyhow, bail, Context, Result};
    use raw_window_handle::{HasWindowHandle, RawWindowHandle};
    use tauri::WebviewWindow;
    use windows::Win32::Foundation::HWND;
    use windows::Win32::UI::WindowsAndMessaging::{
        SetWindowDisplayAffinity, WDA_EXCLUDEFROMCAPTURE,
    };

    pub fn exclude_from_capture(window: &WebviewWindow) -> Result<()> {
        let handle = window
            .window_handle()
            .map_err(|err| anyhow!("native window handle unavailable: {err}"))?;
        let RawWindowHandle::Win32(win32) = handle.as_raw() else {
            bail!("overlay is not backed by a Win32 window");
        };
        let hwnd = HWND(win32.hwnd.get() as *mut std::ffi::c_void);

        // Requires Windows 10 2004; older builds reject the flag.
        unsafe { SetWindowDisplayAffinity(hwnd, WDA_EXCLUDEFROMCAPTURE) }
            .context("SetWindowDisplayAffinity(WDA_EXCLUDEFROMCAPTURE) failed")
    }
}

#[cfg(not(windows))]
mod native {
    use anyhow::{bail, Result};
    use tauri::WebviewWindow;

    pub fn exclude_from_capture(_window: &WebviewWindow) -> Result<()> {
        bail!("display affinity is only available on Windows")
    }
}
