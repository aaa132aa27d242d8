use std::time::Duration;

use log::warn;

pub const DEFAULT_MODELS: &[&str] = &["gemini-2.0-flash", "gemini-1.5-flash"];
pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// What happens when a trigger arrives while a cycle is still running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlapPolicy {
    /// Cycles run independently; whichever finishes last owns the result.
    LastWriterWins,
    /// A second trigger is rejected with `CycleInProgress`.
    SingleFlight,
}

/// Tunables for the capture/analyze cycle.
#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    /// Tried strictly in order until one answers.
    pub models: Vec<String>,
    /// Upper bound on a single endpoint attempt; `None` waits forever.
    pub model_timeout: Option<Duration>,
    pub overlap_policy: OverlapPolicy,
    /// Time given to the compositor to drop the hidden overlay before grabbing.
    pub settle_delay: Duration,
    pub capture_max_width: u32,
    pub capture_max_height: u32,
    pub jpeg_quality: u8,
    pub api_base: String,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            models: DEFAULT_MODELS.iter().map(|m| m.to_string()).collect(),
            model_timeout: Some(Duration::from_secs(60)),
            overlap_policy: OverlapPolicy::LastWriterWins,
            settle_delay: Duration::from_millis(100),
            capture_max_width: 1920,
            capture_max_height: 1080,
            jpeg_quality: 85,
            api_base: DEFAULT_API_BASE.to_string(),
        }
    }
}

impl AnalysisConfig {
    /// Defaults with `TRULY_*` environment overrides applied.
    pub fn from_env() -> Self {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(models) = lookup("TRULY_MODELS") {
            let models: Vec<String> = models
                .split(',')
                .map(str::trim)
                .filter(|m| !m.is_empty())
                .map(String::from)
                .collect();
            if models.is_empty() {
                warn!("TRULY_MODELS is empty; keeping default model chain");
            } else {
                self.models = models;
            }
        }

        if let Some(raw) = lookup("TRULY_MODEL_TIMEOUT_SECS") {
            match raw.trim().parse::<u64>() {
                Ok(0) => self.model_timeout = None,
                Ok(secs) => self.model_timeout = Some(Duration::from_secs(secs)),
                Err(_) => warn!("ignoring invalid TRULY_MODEL_TIMEOUT_SECS={raw:?}"),
            }
        }

        if let Some(raw) = lookup("TRULY_OVERLAP_POLICY") {
            match raw.trim().to_ascii_lowercase().as_str() {
                "single-flight" | "single_flight" => self.overlap_policy = OverlapPolicy::SingleFlight,
                "last-writer-wins" | "last_writer_wins" => {
                    self.overlap_policy = OverlapPolicy::LastWriterWins
                }
                _ => warn!("ignoring unknown TRULY_OVERLAP_POLICY={raw:?}"),
            }
        }

        if let Some(base) = lookup("TRULY_API_BASE") {
            self.api_base = base.trim_end_matches('/').to_string();
        }

        self
    }
}
