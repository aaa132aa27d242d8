pub mod capture;
pub mod commands;
pub mod config;
pub mod model;
pub mod notifier;
pub mod orchestrator;
pub mod state;

pub use capture::{CaptureMode, DesktopCaptureProvider};
pub use config::AnalysisConfig;
pub use model::GeminiClient;
pub use notifier::TauriNotifier;
pub use orchestrator::{AnalysisOrchestrator, Collaborators};
pub use state::CycleSnapshot;
