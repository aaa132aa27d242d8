//! Tauri commands for the stored API credential

use tauri::State;

use crate::AppState;

#[tauri::command]
pub fn get_credential(state: State<'_, AppState>) -> String {
    state.settings.credential()
}

#[tauri::command]
pub fn set_credential(state: State<'_, AppState>, credential: String) -> bool {
    state.set_credential(credential.trim().to_string());
    true
}
