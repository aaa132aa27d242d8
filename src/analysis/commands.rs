use tauri::State;

use crate::{
    analysis::{AnalysisOrchestrator, CaptureMode, CycleSnapshot},
    AppState,
};

fn orchestrator_from_state(state: &State<'_, AppState>) -> AnalysisOrchestrator {
    state.analysis.clone()
}

#[tauri::command]
pub async fn get_cycle_state(state: State<'_, AppState>) -> Result<CycleSnapshot, String> {
    let orchestrator = orchestrator_from_state(&state);
    Ok(orchestrator.snapshot().await)
}

#[tauri::command]
pub async fn capture_screen(
    state: State<'_, AppState>,
    mode: Option<CaptureMode>,
) -> Result<String, String> {
    let orchestrator = orchestrator_from_state(&state);
    orchestrator
        .capture_screen(mode.unwrap_or_default())
        .await
        .map_err(|e| e.to_string())
}

#[tauri::command]
pub async fn ask_model(
    state: State<'_, AppState>,
    question: Option<String>,
    image: Option<String>,
) -> Result<String, String> {
    let orchestrator = orchestrator_from_state(&state);
    orchestrator
        .ask_model(question.as_deref().unwrap_or_default(), image)
        .await
        .map_err(|e| e.to_string())
}

/// Runs the whole cycle in the core, including completion cleanup.
#[tauri::command]
pub async fn run_cycle(
    state: State<'_, AppState>,
    question: Option<String>,
) -> Result<String, String> {
    let orchestrator = orchestrator_from_state(&state);
    orchestrator.run_cycle(question).await.map_err(|e| e.to_string())
}

#[tauri::command]
pub fn notify_cycle_complete(state: State<'_, AppState>) {
    state.analysis.notify_cycle_complete();
}
