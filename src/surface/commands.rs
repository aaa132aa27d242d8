use tauri::State;

use crate::AppState;

#[tauri::command]
pub fn hide_overlay(state: State<'_, AppState>) {
    state.surface.hide();
}

#[tauri::command]
pub fn toggle_overlay(state: State<'_, AppState>) -> Option<bool> {
    state.surface.toggle_visibility()
}

#[tauri::command]
pub fn set_click_through(state: State<'_, AppState>, ignore: bool) {
    state.click_through.set_click_through(ignore, true);
}

#[tauri::command]
pub fn toggle_click_through(state: State<'_, AppState>) -> Option<bool> {
    state.click_through.toggle()
}
