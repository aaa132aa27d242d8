use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{
    error::AnalysisError,
    events::{BoundaryEvent, EventSink},
    settings::SettingsStore,
    surface::DisplaySurfaceController,
};

use super::{
    capture::{CaptureMode, CaptureProvider},
    config::{AnalysisConfig, OverlapPolicy},
    model::{FallbackChain, InferenceClient, InferenceRequest, ModelEndpoint},
    notifier::{Notice, Notifier, PendingNotificationSlot},
    state::{CycleSnapshot, CycleState},
};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

/// External services a cycle talks to.
pub struct Collaborators {
    pub capture: Arc<dyn CaptureProvider>,
    pub client: Arc<dyn InferenceClient>,
    pub notifier: Arc<dyn Notifier>,
    pub events: Arc<dyn EventSink>,
}

/// Drives one capture -> inference -> present round trip at a time
/// (or several, under [`OverlapPolicy::LastWriterWins`]).
#[derive(Clone)]
pub struct AnalysisOrchestrator {
    state: Arc<Mutex<CycleState>>,
    surface: Arc<DisplaySurfaceController>,
    settings: Arc<SettingsStore>,
    capture: Arc<dyn CaptureProvider>,
    client: Arc<dyn InferenceClient>,
    notifier: Arc<dyn Notifier>,
    events: Arc<dyn EventSink>,
    pending: Arc<PendingNotificationSlot>,
    chain: Arc<FallbackChain>,
    config: Arc<AnalysisConfig>,
    in_flight: Arc<AtomicUsize>,
}

impl AnalysisOrchestrator {
    pub fn new(
        surface: Arc<DisplaySurfaceController>,
        settings: Arc<SettingsStore>,
        config: AnalysisConfig,
        collaborators: Collaborators,
    ) -> Self {
        let endpoints = config.models.iter().map(ModelEndpoint::new).collect();
        let chain = FallbackChain::new(endpoints, config.model_timeout);

        Self {
            state: Arc::new(Mutex::new(CycleState::new())),
            surface,
            settings,
            capture: collaborators.capture,
            client: collaborators.client,
            notifier: collaborators.notifier,
            events: collaborators.events,
            pending: Arc::new(PendingNotificationSlot::default()),
            chain: Arc::new(chain),
            config: Arc::new(config),
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub async fn snapshot(&self) -> CycleSnapshot {
        self.state.lock().await.snapshot()
    }

    /// Quick-analyze trigger. Posts the "analyzing" notification when the
    /// overlay is hidden and asks the presentation layer to start a cycle.
    pub fn quick_trigger(&self) {
        self.post_pending_if_hidden();
        self.events.emit(BoundaryEvent::TriggerCapture);
    }

    /// Full cycle: capture, ask the fallback chain, publish, clean up.
    /// The completion cleanup runs here, so callers must not also call
    /// [`Self::notify_cycle_complete`] for the same cycle.
    pub async fn run_cycle(&self, question: Option<String>) -> Result<String, AnalysisError> {
        let Some(_flight) = self.enter_flight() else {
            log_warn!("trigger ignored: a cycle is already running");
            return Err(AnalysisError::CycleInProgress);
        };

        let cycle_id = Uuid::new_v4().to_string();
        let credential = self.settings.credential();

        if credential.is_empty() {
            let err = AnalysisError::NoCredential;
            self.transition(|state| {
                state.begin_failed(cycle_id.clone(), question, &err, Utc::now());
                true
            })
            .await;
            self.events.emit(BoundaryEvent::OpenSettings);
            return self.finish(&cycle_id, Err(err)).await;
        }

        log_info!("cycle {cycle_id} started");
        self.transition(|state| {
            state.begin(cycle_id.clone(), question.clone(), Utc::now());
            true
        })
        .await;

        let image = match self.capture_screen(CaptureMode::Full).await {
            Ok(image) => image,
            Err(err) => {
                self.transition(|state| state.fail(&cycle_id, &err, Utc::now()))
                    .await;
                return self.finish(&cycle_id, Err(err)).await;
            }
        };

        self.transition(|state| state.analyzing(&cycle_id)).await;

        let request = InferenceRequest::new(question.as_deref().unwrap_or_default(), Some(image));
        let outcome = self.chain.ask(self.client.as_ref(), &credential, &request).await;

        match &outcome {
            Ok(text) => {
                let text = text.clone();
                self.transition(|state| state.succeed(&cycle_id, text, Utc::now()))
                    .await;
            }
            Err(err) => {
                self.transition(|state| state.fail(&cycle_id, err, Utc::now()))
                    .await;
            }
        }

        log_info!("cycle {cycle_id} finished: ok={}", outcome.is_ok());
        self.finish(&cycle_id, outcome).await
    }

    /// Screen grab under the capture policy chosen at surface creation.
    pub async fn capture_screen(&self, mode: CaptureMode) -> Result<String, AnalysisError> {
        let excluded = self
            .surface
            .capture_affinity()
            .is_some_and(|strategy| strategy.omits_surface_from_capture());

        if excluded {
            log_debug!("overlay excluded from capture; grabbing in place");
            return self.capture.capture(mode).await;
        }

        let concealment = self.surface.conceal_for_capture();
        if concealment.is_concealed() {
            tokio::time::sleep(self.config.settle_delay).await;
        }
        let result = self.capture.capture(mode).await;
        drop(concealment);
        result
    }

    pub async fn ask_model(
        &self,
        question: &str,
        image: Option<String>,
    ) -> Result<String, AnalysisError> {
        let credential = self.settings.credential();
        let request = InferenceRequest::new(question, image);
        self.chain.ask(self.client.as_ref(), &credential, &request).await
    }

    /// Cleanup shared by successful and failed cycles.
    pub fn notify_cycle_complete(&self) {
        if let Some(id) = self.pending.take() {
            self.notifier.close(id);
        }

        if self.surface.is_visible() {
            return;
        }

        if let Err(err) = self.notifier.post(&Notice::complete()) {
            log_warn!("failed to post completion notification: {err:#}");
        }
    }

    /// Closes any outstanding notification during teardown.
    pub fn shutdown(&self) {
        if let Some(id) = self.pending.take() {
            self.notifier.close(id);
        }
    }

    fn post_pending_if_hidden(&self) {
        if self.surface.is_visible() {
            return;
        }

        match self.notifier.post(&Notice::analyzing()) {
            Ok(id) => {
                if let Some(previous) = self.pending.replace(id) {
                    self.notifier.close(previous);
                }
            }
            Err(err) => log_warn!("failed to post progress notification: {err:#}"),
        }
    }

    async fn finish(
        &self,
        cycle_id: &str,
        outcome: Result<String, AnalysisError>,
    ) -> Result<String, AnalysisError> {
        self.notify_cycle_complete();
        self.transition(|state| state.settle(cycle_id)).await;
        outcome
    }

    /// Broadcasts the snapshot only when `apply` reports a change; a cycle
    /// overtaken by a newer one stays silent.
    async fn transition(&self, apply: impl FnOnce(&mut CycleState) -> bool) {
        let snapshot = {
            let mut state = self.state.lock().await;
            if !apply(&mut state) {
                log_debug!("dropping update from a superseded cycle");
                return;
            }
            state.snapshot()
        };
        self.events.emit(BoundaryEvent::CycleStateChanged(snapshot));
    }

    fn enter_flight(&self) -> Option<FlightGuard> {
        match self.config.overlap_policy {
            OverlapPolicy::LastWriterWins => {
                self.in_flight.fetch_add(1, Ordering::SeqCst);
            }
            OverlapPolicy::SingleFlight => {
                self.in_flight
                    .compare_exchange(0, 1, Ordering::SeqCst, Ordering::SeqCst)
                    .ok()?;
            }
        }
        Some(FlightGuard {
            counter: self.in_flight.clone(),
        })
    }
}

struct FlightGuard {
    counter: Arc<AtomicUsize>,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::analysis::model::testing::ScriptedClient;
    use crate::analysis::model::AUTO_DEDUCE_PROMPT;
    use crate::analysis::notifier::testing::FakeNotifier;
    use crate::analysis::state::CyclePhase;
    use crate::error::ErrorKind;
    use crate::events::testing::RecordingSink;
    use crate::surface::testing::{FakeHost, HostCall};
    use crate::surface::CaptureAffinityStrategy;

    struct FakeCapture {
        result: Result<String, AnalysisError>,
        host: Arc<FakeHost>,
        calls: AtomicUsize,
        host_calls_at_capture: StdMutex<Vec<HostCall>>,
        delay: Option<Duration>,
    }

    impl FakeCapture {
        fn new(host: Arc<FakeHost>, result: Result<String, AnalysisError>) -> Self {
            Self {
                result,
                host,
                calls: AtomicUsize::new(0),
                host_calls_at_capture: StdMutex::new(Vec::new()),
                delay: None,
            }
        }
    }

    #[async_trait]
    impl CaptureProvider for FakeCapture {
        async fn capture(&self, _mode: CaptureMode) -> Result<String, AnalysisError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.host_calls_at_capture.lock().unwrap() = self.host.visibility_calls();
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.result.clone()
        }
    }

    struct Harness {
        orchestrator: AnalysisOrchestrator,
        surface: Arc<DisplaySurfaceController>,
        settings: Arc<SettingsStore>,
        host: Arc<FakeHost>,
        capture: Arc<FakeCapture>,
        client: Arc<ScriptedClient>,
        notifier: Arc<FakeNotifier>,
        sink: Arc<RecordingSink>,
    }

    struct Options {
        native_exclude: bool,
        credential: &'static str,
        visible: bool,
        capture: Result<String, AnalysisError>,
        script: Vec<Result<&'static str, &'static str>>,
        policy: OverlapPolicy,
        capture_delay: Option<Duration>,
        echo: bool,
    }

    impl Default for Options {
        fn default() -> Self {
            Self {
                native_exclude: false,
                credential: "key",
                visible: true,
                capture: Ok("SU1H".into()),
                script: vec![Ok("answer")],
                policy: OverlapPolicy::LastWriterWins,
                capture_delay: None,
                echo: false,
            }
        }
    }

    fn harness(options: Options) -> Harness {
        let sink = Arc::new(RecordingSink::default());
        let settings = Arc::new(SettingsStore::in_memory());
        if !options.credential.is_empty() {
            settings.set_credential(options.credential.into()).unwrap();
        }

        let surface = Arc::new(DisplaySurfaceController::new(settings.clone(), sink.clone()));
        let host = Arc::new(FakeHost::new(options.native_exclude, false));
        surface.attach(host.clone()).unwrap();
        if options.visible {
            surface.show();
        }
        host.clear();

        let mut capture = FakeCapture::new(host.clone(), options.capture);
        capture.delay = options.capture_delay;
        let capture = Arc::new(capture);
        let client = Arc::new(if options.echo {
            ScriptedClient::echo()
        } else {
            ScriptedClient::new(options.script)
        });
        let notifier = Arc::new(FakeNotifier::default());

        let config = AnalysisConfig {
            models: vec!["primary".into(), "backup".into()],
            overlap_policy: options.policy,
            ..AnalysisConfig::default()
        };

        let orchestrator = AnalysisOrchestrator::new(
            surface.clone(),
            settings.clone(),
            config,
            Collaborators {
                capture: capture.clone(),
                client: client.clone(),
                notifier: notifier.clone(),
                events: sink.clone(),
            },
        );

        Harness {
            orchestrator,
            surface,
            settings,
            host,
            capture,
            client,
            notifier,
            sink,
        }
    }

    fn snapshots(sink: &RecordingSink) -> Vec<CycleSnapshot> {
        sink.events()
            .into_iter()
            .filter_map(|event| match event {
                BoundaryEvent::CycleStateChanged(snapshot) => Some(snapshot),
                _ => None,
            })
            .collect()
    }

    fn phases(sink: &RecordingSink) -> Vec<CyclePhase> {
        snapshots(sink).into_iter().map(|snapshot| snapshot.phase).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn successful_cycle_walks_every_phase() {
        let h = harness(Options::default());
        let text = h.orchestrator.run_cycle(None).await.unwrap();

        assert_eq!(text, "answer");
        assert_eq!(
            phases(&h.sink),
            vec![
                CyclePhase::Capturing,
                CyclePhase::Analyzing,
                CyclePhase::Succeeded,
                CyclePhase::Idle,
            ]
        );
        let snapshot = h.orchestrator.snapshot().await;
        assert_eq!(snapshot.response.as_deref(), Some("answer"));
        assert!(snapshot.finished_at.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn empty_question_sends_auto_deduce_prompt_with_image() {
        let h = harness(Options::default());
        h.orchestrator.run_cycle(Some("  ".into())).await.unwrap();

        let request = &h.client.requests()[0];
        assert_eq!(request.prompt, AUTO_DEDUCE_PROMPT);
        assert_eq!(request.image.as_deref(), Some("SU1H"));
    }

    #[tokio::test(start_paused = true)]
    async fn missing_credential_fails_without_any_attempt() {
        let h = harness(Options {
            credential: "",
            ..Options::default()
        });

        let err = h.orchestrator.run_cycle(None).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::NoCredential);
        assert!(h.client.models_called().is_empty());
        assert_eq!(h.capture.calls.load(Ordering::SeqCst), 0);
        assert_eq!(phases(&h.sink), vec![CyclePhase::Failed, CyclePhase::Idle]);
        assert_eq!(h.sink.count(|e| *e == BoundaryEvent::OpenSettings), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn fallback_endpoint_answer_is_presented() {
        let h = harness(Options {
            script: vec![Err("primary down"), Ok("from backup")],
            ..Options::default()
        });

        let text = h.orchestrator.run_cycle(None).await.unwrap();

        assert_eq!(text, "from backup");
        assert_eq!(h.client.models_called(), vec!["primary", "backup"]);
        assert!(phases(&h.sink).contains(&CyclePhase::Succeeded));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_chain_fails_with_last_detail() {
        let h = harness(Options {
            script: vec![Err("primary down"), Err("backup rate limited")],
            ..Options::default()
        });

        let err = h.orchestrator.run_cycle(None).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::AllModelsFailed);
        assert!(err.to_string().contains("backup rate limited"));
        let snapshot = h.orchestrator.snapshot().await;
        assert!(snapshot.response.unwrap().starts_with("Error: All models failed"));
        assert!(phases(&h.sink).contains(&CyclePhase::Failed));
    }

    #[tokio::test(start_paused = true)]
    async fn excluded_surface_is_never_hidden_for_capture() {
        let h = harness(Options {
            native_exclude: true,
            ..Options::default()
        });
        assert_eq!(
            h.surface.capture_affinity(),
            Some(CaptureAffinityStrategy::NativeExclude)
        );

        h.orchestrator.run_cycle(None).await.unwrap();

        assert!(h.host.visibility_calls().is_empty());
        assert!(h.surface.is_visible());
    }

    #[tokio::test(start_paused = true)]
    async fn unprotected_surface_is_hidden_during_capture_and_restored() {
        let h = harness(Options::default());
        assert_eq!(
            h.surface.capture_affinity(),
            Some(CaptureAffinityStrategy::Unavailable)
        );

        h.orchestrator.run_cycle(None).await.unwrap();

        assert_eq!(
            *h.capture.host_calls_at_capture.lock().unwrap(),
            vec![HostCall::Hide]
        );
        assert_eq!(h.host.visibility_calls(), vec![HostCall::Hide, HostCall::Show]);
        assert!(h.surface.is_visible());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_capture_still_restores_once() {
        let h = harness(Options {
            capture: Err(AnalysisError::NoScreenSource("no monitors".into())),
            ..Options::default()
        });

        let err = h.orchestrator.run_cycle(None).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::NoScreenSource);
        assert_eq!(h.host.visibility_calls(), vec![HostCall::Hide, HostCall::Show]);
        assert!(h.client.models_called().is_empty());
        assert_eq!(
            phases(&h.sink),
            vec![CyclePhase::Capturing, CyclePhase::Failed, CyclePhase::Idle]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn hidden_surface_is_left_alone_during_capture() {
        let h = harness(Options {
            visible: false,
            ..Options::default()
        });
        h.orchestrator.run_cycle(None).await.unwrap();
        assert!(h.host.visibility_calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn completion_notification_only_when_hidden() {
        let hidden = harness(Options {
            visible: false,
            ..Options::default()
        });
        hidden.orchestrator.run_cycle(None).await.unwrap();
        assert_eq!(hidden.notifier.posted_bodies(), vec![Notice::complete().body]);

        let visible = harness(Options::default());
        visible.orchestrator.run_cycle(None).await.unwrap();
        assert!(visible.notifier.posted().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_cycle_clears_pending_notification() {
        let h = harness(Options {
            visible: false,
            script: vec![Err("a"), Err("b")],
            ..Options::default()
        });

        h.orchestrator.quick_trigger();
        let pending_id = h.notifier.posted()[0].0;
        h.orchestrator.run_cycle(None).await.unwrap_err();

        assert!(h.notifier.closed().contains(&pending_id));
        assert_eq!(h.notifier.posted_bodies().last(), Some(&Notice::complete().body));
        assert!(h.notifier.open().iter().all(|id| *id != pending_id));
    }

    #[tokio::test(start_paused = true)]
    async fn notify_cycle_complete_clears_pending_even_when_visible() {
        let h = harness(Options {
            visible: false,
            ..Options::default()
        });
        h.orchestrator.quick_trigger();
        h.surface.show();

        h.orchestrator.notify_cycle_complete();

        assert_eq!(h.notifier.closed(), vec![1]);
        assert_eq!(h.notifier.posted().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn quick_trigger_notifies_only_when_hidden() {
        let visible = harness(Options::default());
        visible.orchestrator.quick_trigger();
        assert!(visible.notifier.posted().is_empty());
        assert_eq!(visible.sink.count(|e| *e == BoundaryEvent::TriggerCapture), 1);

        let hidden = harness(Options {
            visible: false,
            ..Options::default()
        });
        hidden.orchestrator.quick_trigger();
        assert_eq!(hidden.notifier.posted_bodies(), vec![Notice::analyzing().body]);
        assert_eq!(hidden.sink.count(|e| *e == BoundaryEvent::TriggerCapture), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_quick_triggers_keep_one_pending_notification() {
        let h = harness(Options {
            visible: false,
            ..Options::default()
        });
        h.orchestrator.quick_trigger();
        h.orchestrator.quick_trigger();

        assert_eq!(h.notifier.closed(), vec![1]);
        assert_eq!(h.notifier.open(), vec![2]);
    }

    #[tokio::test(start_paused = true)]
    async fn ask_model_without_capture_uses_chain() {
        let h = harness(Options {
            script: vec![Err("nope"), Ok("text only")],
            ..Options::default()
        });
        let text = h.orchestrator.ask_model("hello", None).await.unwrap();
        assert_eq!(text, "text only");
        assert_eq!(h.client.requests()[1].image, None);
    }

    #[tokio::test(start_paused = true)]
    async fn ask_model_without_credential_is_rejected() {
        let h = harness(Options::default());
        h.settings.set_credential(String::new()).unwrap();
        let err = h.orchestrator.ask_model("", None).await.unwrap_err();
        assert_eq!(err, AnalysisError::NoCredential);
        assert!(h.client.models_called().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn single_flight_rejects_overlapping_trigger() {
        let h = harness(Options {
            policy: OverlapPolicy::SingleFlight,
            capture_delay: Some(Duration::from_secs(1)),
            ..Options::default()
        });

        let first = {
            let orchestrator = h.orchestrator.clone();
            tokio::spawn(async move { orchestrator.run_cycle(None).await })
        };
        tokio::task::yield_now().await;

        let second = h.orchestrator.run_cycle(None).await;
        assert_eq!(second, Err(AnalysisError::CycleInProgress));
        assert_eq!(first.await.unwrap().unwrap(), "answer");

        let third = h.orchestrator.run_cycle(None).await;
        assert!(third.is_err(), "script is exhausted after one answer");
        assert_ne!(third, Err(AnalysisError::CycleInProgress));
    }

    #[tokio::test(start_paused = true)]
    async fn last_writer_wins_lets_cycles_overlap() {
        let h = harness(Options {
            capture_delay: Some(Duration::from_secs(1)),
            echo: true,
            ..Options::default()
        });

        let (a, b) = tokio::join!(
            h.orchestrator.run_cycle(Some("first?".into())),
            h.orchestrator.run_cycle(Some("second?".into())),
        );

        assert_eq!(a.unwrap(), "first?");
        assert_eq!(b.unwrap(), "second?");
        assert_eq!(h.client.models_called().len(), 2);

        let published = snapshots(&h.sink);
        let last_success = published
            .iter()
            .rposition(|s| s.phase == CyclePhase::Succeeded)
            .expect("the newest cycle publishes its answer");
        assert!(
            published[..last_success]
                .iter()
                .all(|s| s.phase != CyclePhase::Idle),
            "idle reported while a cycle was still running: {published:?}"
        );
        for success in published.iter().filter(|s| s.phase == CyclePhase::Succeeded) {
            assert_eq!(success.response, success.question);
        }
        assert_eq!(published.last().map(|s| s.phase), Some(CyclePhase::Idle));

        let snapshot = h.orchestrator.snapshot().await;
        assert_eq!(snapshot.phase, CyclePhase::Idle);
        assert_eq!(snapshot.response.as_deref(), Some("second?"));
    }
}
