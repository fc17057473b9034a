use std::{sync::Arc, time::Duration};

use parking_lot::Mutex;
use tokio::{
    task::JoinHandle,
    time::{sleep, Instant},
};
use tokio_util::sync::CancellationToken;

use crate::{
    ai::ClassificationService,
    config::PipelineConfig,
    domain::{ActivityKind, ElementKind, NodeId, PipelineStatus, PlaybackState, PolicySettings},
    infrastructure::{
        activity::{ActivityLog, ActivitySink},
        auth::AuthProvider,
        settings_store::SettingsStore,
    },
    page::{ChangeFeed, EnforcementUi, PageSurface, VisibilityFeed},
};

use super::{
    enforcement::EnforcementController,
    error::PipelineError,
    policy::{host_of, DomainPolicy},
    processor::BatchProcessor,
    queue::{ProcessingQueue, QueueItem},
    registry::ElementRegistry,
    reporter::DetectionReporter,
    sampler::VideoSampler,
    watcher::{Candidate, ElementWatcher, WatchSink},
};

/// Everything the pipeline needs from the outside world.
pub struct Collaborators {
    pub page: Arc<dyn PageSurface>,
    pub changes: Arc<dyn ChangeFeed>,
    pub visibility: Arc<dyn VisibilityFeed>,
    pub classifier: Arc<dyn ClassificationService>,
    pub settings: Arc<dyn SettingsStore>,
    pub auth: Arc<dyn AuthProvider>,
    pub activity: Arc<dyn ActivitySink>,
    pub ui: Arc<dyn EnforcementUi>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitOutcome {
    Started,
    AlreadyRunning,
    NotAuthenticated,
    Disabled,
    DomainRestricted,
    /// A stop or reset arrived while init was waiting.
    Superseded,
}

/// Images go to the queue, videos to the sampler.
struct PipelineRouter {
    queue: Arc<ProcessingQueue<QueueItem>>,
    sampler: Arc<VideoSampler>,
}

impl WatchSink for PipelineRouter {
    fn candidates(&self, candidates: Vec<Candidate>) {
        let now = Instant::now();
        let mut images = Vec::new();
        for candidate in candidates {
            match candidate.kind {
                ElementKind::Image => images.push(QueueItem {
                    handle: candidate.handle,
                    node: candidate.node,
                    priority: candidate.priority,
                    enqueued_at: now,
                }),
                ElementKind::Video => self.sampler.admit(candidate.node, &candidate.snapshot),
            }
        }
        let added = self.queue.enqueue(images);
        if added > 0 {
            tracing::debug!(target: "queue", added, depth = self.queue.len(), "images enqueued");
        }
    }

    fn playback(&self, node: NodeId, state: PlaybackState) {
        self.sampler.on_playback(node, state);
    }

    fn removed(&self, node: NodeId) {
        self.sampler.removed(node);
    }
}

struct RunState {
    running: bool,
    /// Cleared by an explicit stop or a disabling settings update.
    enabled: bool,
    /// Bumped by every halt so an init suspended across it gives up.
    epoch: u64,
    generation: Option<CancellationToken>,
    processor: Option<JoinHandle<()>>,
    pending_restart: Option<JoinHandle<()>>,
    settings: Option<PolicySettings>,
    domain: Option<String>,
}

pub struct Orchestrator {
    page: Arc<dyn PageSurface>,
    settings_store: Arc<dyn SettingsStore>,
    auth: Arc<dyn AuthProvider>,
    registry: Arc<ElementRegistry>,
    queue: Arc<ProcessingQueue<QueueItem>>,
    processor: Arc<BatchProcessor>,
    watcher: Arc<ElementWatcher>,
    sampler: Arc<VideoSampler>,
    enforcement: Arc<EnforcementController>,
    reporter: Arc<DetectionReporter>,
    activity: Arc<ActivityLog>,
    restart_cooldown: Duration,
    state: Mutex<RunState>,
}

impl Orchestrator {
    pub fn new(collaborators: Collaborators, config: &PipelineConfig) -> Arc<Self> {
        let Collaborators {
            page,
            changes,
            visibility,
            classifier,
            settings,
            auth,
            activity,
            ui,
        } = collaborators;

        let activity = Arc::new(ActivityLog::new(activity));
        let enforcement = Arc::new(EnforcementController::new(ui, activity.clone()));
        let reporter = Arc::new(DetectionReporter::new(enforcement.clone(), activity.clone()));
        let registry = Arc::new(ElementRegistry::new());
        let queue = Arc::new(ProcessingQueue::new());
        let processor = Arc::new(BatchProcessor::new(
            queue.clone(),
            registry.clone(),
            page.clone(),
            classifier.clone(),
            auth.clone(),
            reporter.clone(),
            config,
        ));
        let sampler = Arc::new(VideoSampler::new(
            page.clone(),
            classifier,
            auth.clone(),
            reporter.clone(),
            registry.clone(),
            config.sampler.clone(),
        ));
        let watcher = Arc::new(ElementWatcher::new(
            page.clone(),
            changes,
            visibility,
            registry.clone(),
            config.watcher.clone(),
        ));

        Arc::new(Self {
            page,
            settings_store: settings,
            auth,
            registry,
            queue,
            processor,
            watcher,
            sampler,
            enforcement,
            reporter,
            activity,
            restart_cooldown: config.restart_cooldown,
            state: Mutex::new(RunState {
                running: false,
                enabled: true,
                epoch: 0,
                generation: None,
                processor: None,
                pending_restart: None,
                settings: None,
                domain: None,
            }),
        })
    }

    pub fn enforcement(&self) -> &Arc<EnforcementController> {
        &self.enforcement
    }

    /// Starts the pipeline if the user is signed in, detection is enabled and
    /// the page's domain passes the policy.
    pub async fn init(self: &Arc<Self>) -> InitOutcome {
        self.init_with(None).await
    }

    async fn init_with(self: &Arc<Self>, settings: Option<PolicySettings>) -> InitOutcome {
        let epoch = {
            let state = self.state.lock();
            if state.running {
                return InitOutcome::AlreadyRunning;
            }
            state.epoch
        };

        if !self.auth.is_authenticated().await {
            tracing::info!(target: "orchestrator", "not authenticated; detection not started");
            return InitOutcome::NotAuthenticated;
        }
        let settings = match settings {
            Some(settings) => settings,
            None => self.load_settings().await,
        };
        let location = self.page.location();

        let mut state = self.state.lock();
        if state.epoch != epoch {
            return InitOutcome::Superseded;
        }
        if state.running {
            return InitOutcome::AlreadyRunning;
        }
        state.enabled = settings.detection_enabled;
        if !settings.detection_enabled {
            tracing::info!(target: "orchestrator", "detection disabled in settings");
            return InitOutcome::Disabled;
        }
        let policy = DomainPolicy::from_settings(&settings);
        if !policy.is_allowed(&location) {
            tracing::info!(target: "orchestrator", %location, "domain restricted; detection not started");
            return InitOutcome::DomainRestricted;
        }

        let generation = CancellationToken::new();
        let domain = host_of(&location);
        self.registry.clear_membership();
        self.reporter.reconfigure(settings.thresholds);
        self.activity.set_context(domain.clone(), settings.privacy_mode);
        state.processor = Some(self.processor.clone().spawn(generation.clone()));
        self.sampler.activate(&generation);
        state.running = true;
        state.generation = Some(generation.clone());
        state.domain = domain.clone();
        drop(state);

        let router = Arc::new(PipelineRouter {
            queue: self.queue.clone(),
            sampler: self.sampler.clone(),
        });
        self.watcher.start(policy, router, &generation);
        self.activity.record(ActivityKind::PageVisit {
            url: Some(location),
        });
        tracing::info!(
            target: "orchestrator",
            domain = domain.as_deref().unwrap_or("-"),
            "detection started"
        );
        InitOutcome::Started
    }

    async fn load_settings(&self) -> PolicySettings {
        match self.settings_store.load().await {
            Ok(settings) => {
                let settings = checked(settings);
                self.state.lock().settings = Some(settings.clone());
                settings
            }
            Err(err) => {
                let fallback = self.state.lock().settings.clone();
                tracing::warn!(
                    target: "orchestrator",
                    error = %err,
                    cached = fallback.is_some(),
                    "failed to load settings; using last known values"
                );
                fallback.unwrap_or_default()
            }
        }
    }

    pub async fn start(self: &Arc<Self>) -> InitOutcome {
        self.state.lock().enabled = true;
        self.init().await
    }

    /// Halts everything and marks detection as switched off.
    pub fn stop(&self) {
        self.halt();
        self.state.lock().enabled = false;
    }

    /// Cancels every task and timer of the current generation. Idempotent.
    fn halt(&self) {
        let mut state = self.state.lock();
        state.epoch += 1;
        if let Some(generation) = state.generation.take() {
            generation.cancel();
        }
        if let Some(task) = state.processor.take() {
            task.abort();
        }
        if let Some(task) = state.pending_restart.take() {
            task.abort();
        }
        let was_running = std::mem::replace(&mut state.running, false);
        drop(state);

        self.watcher.stop();
        let dropped = self.queue.clear();
        self.sampler.stop_all();
        self.enforcement.force_close();
        if was_running {
            tracing::info!(target: "orchestrator", dropped, "detection stopped");
        }
    }

    /// Halts now and starts again after the restart cooldown.
    pub fn reset(self: &Arc<Self>) {
        self.halt();
        self.schedule_restart();
    }

    /// The host moved to a new document. Node ids restart there, so nothing
    /// remembered about the old page may suppress analysis of the new one.
    pub fn on_navigated(self: &Arc<Self>) {
        self.halt();
        let forgotten = self.registry.forget_page();
        tracing::debug!(target: "orchestrator", forgotten, "previous page forgotten");
        self.schedule_restart();
    }

    fn schedule_restart(self: &Arc<Self>) {
        let orchestrator = Arc::clone(self);
        let cooldown = self.restart_cooldown;
        let task = tokio::spawn(async move {
            sleep(cooldown).await;
            if !orchestrator.state.lock().enabled {
                return;
            }
            let outcome = orchestrator.init().await;
            tracing::debug!(target: "orchestrator", ?outcome, "restart after reset");
        });
        self.state.lock().pending_restart = Some(task);
        tracing::info!(target: "orchestrator", ?cooldown, "pipeline reset");
    }

    pub async fn on_auth_changed(self: &Arc<Self>, authenticated: bool) -> Option<InitOutcome> {
        tracing::info!(target: "orchestrator", authenticated, "auth state changed");
        if authenticated {
            let should_start = {
                let state = self.state.lock();
                state.enabled && !state.running
            };
            if should_start {
                return Some(self.init().await);
            }
        } else {
            self.halt();
        }
        None
    }

    pub async fn on_settings_updated(self: &Arc<Self>, settings: PolicySettings) -> InitOutcome {
        let settings = checked(settings);
        if let Err(err) = self.settings_store.save(&settings).await {
            tracing::warn!(target: "orchestrator", error = %err, "failed to persist settings");
        }
        self.state.lock().settings = Some(settings.clone());

        if settings.detection_enabled {
            self.halt();
            self.state.lock().enabled = true;
            self.init_with(Some(settings)).await
        } else {
            self.stop();
            InitOutcome::Disabled
        }
    }

    pub async fn on_page_visibility(self: &Arc<Self>, visible: bool) -> Option<InitOutcome> {
        if !visible {
            tracing::debug!(target: "orchestrator", "page hidden; pausing");
            self.halt();
            return None;
        }
        let should_start = {
            let state = self.state.lock();
            state.enabled && !state.running
        };
        if should_start {
            Some(self.init().await)
        } else {
            None
        }
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    pub fn status(&self) -> PipelineStatus {
        let (enabled, domain) = {
            let state = self.state.lock();
            (state.enabled, state.domain.clone())
        };
        PipelineStatus {
            queue_depth: self.queue.len(),
            active_videos: self.sampler.active_sessions(),
            enabled,
            observing: self.watcher.is_observing(),
            tracked_elements: self.registry.len(),
            modal_visible: self.enforcement.is_showing(),
            domain: domain.or_else(|| host_of(&self.page.location())),
        }
    }

    /// Tasks and timers still owned by the pipeline.
    pub fn active_tasks(&self) -> usize {
        let owned = {
            let state = self.state.lock();
            [&state.processor, &state.pending_restart]
                .into_iter()
                .flatten()
                .filter(|task| !task.is_finished())
                .count()
        };
        owned + self.watcher.active_tasks() + self.sampler.active_sessions()
    }
}

/// Malformed settings degrade to the safe defaults.
fn checked(settings: PolicySettings) -> PolicySettings {
    if settings.is_valid() {
        return settings;
    }
    let err = PipelineError::InvalidConfig("risk thresholds must lie within 0..=1".to_string());
    tracing::warn!(target: "settings", error = %err, "falling back to safe defaults");
    PolicySettings::default()
}

#[cfg(test)]
mod tests {
    use crate::{
        detection::testing::{
            explicit_result, image_snapshot, safe_result, video_snapshot, FakeClassifier,
            FakePage, MemorySettingsStore, RecordingSink, RecordingUi, UiEvent,
        },
        domain::{EnforcementAction, RiskLevel},
        infrastructure::auth::HostAuth,
        page::{BroadcastFeed, DomChange},
    };

    use super::*;

    struct Fixture {
        page: Arc<FakePage>,
        changes: Arc<BroadcastFeed<DomChange>>,
        classifier: Arc<FakeClassifier>,
        settings: Arc<MemorySettingsStore>,
        auth: Arc<HostAuth>,
        sink: Arc<RecordingSink>,
        ui: Arc<RecordingUi>,
        orchestrator: Arc<Orchestrator>,
    }

    impl Fixture {
        fn new(result: crate::domain::ClassificationResult) -> Self {
            Self::with_settings(result, PolicySettings::first_run())
        }

        fn with_settings(
            result: crate::domain::ClassificationResult,
            settings: PolicySettings,
        ) -> Self {
            let page = Arc::new(FakePage::new("https://www.example.com/gallery"));
            let changes = Arc::new(BroadcastFeed::new());
            let classifier = Arc::new(FakeClassifier::new(result));
            let settings = Arc::new(MemorySettingsStore::new(settings));
            let auth = Arc::new(HostAuth::new(true));
            let sink = Arc::new(RecordingSink::default());
            let ui = Arc::new(RecordingUi::default());
            let orchestrator = Orchestrator::new(
                Collaborators {
                    page: page.clone(),
                    changes: changes.clone(),
                    visibility: Arc::new(BroadcastFeed::<NodeId>::new()),
                    classifier: classifier.clone(),
                    settings: settings.clone(),
                    auth: auth.clone(),
                    activity: sink.clone(),
                    ui: ui.clone(),
                },
                &PipelineConfig::default(),
            );
            Self {
                page,
                changes,
                classifier,
                settings,
                auth,
                sink,
                ui,
                orchestrator,
            }
        }
    }

    async fn settle(duration: Duration) {
        sleep(duration).await;
    }

    #[tokio::test(start_paused = true)]
    async fn small_images_are_skipped_and_large_ones_submitted_once() {
        let fixture = Fixture::new(safe_result());
        fixture.page.put(NodeId(1), image_snapshot(50, 50, Some("/icon.png")));
        fixture.page.put(NodeId(2), image_snapshot(500, 500, Some("/photo.jpg")));

        assert_eq!(fixture.orchestrator.init().await, InitOutcome::Started);
        settle(Duration::from_secs(5)).await;

        let calls = fixture.classifier.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!((calls[0].width, calls[0].height), (224, 224));
        assert_eq!(calls[0].source_url.as_deref(), Some("/photo.jpg"));

        fixture.orchestrator.reset();
        settle(Duration::from_secs(5)).await;
        assert!(fixture.orchestrator.is_running());
        fixture.changes.publish(DomChange::Inserted(vec![NodeId(2)]));
        settle(Duration::from_secs(5)).await;
        assert_eq!(fixture.classifier.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_then_stop_leaves_nothing_running() {
        let fixture = Fixture::new(safe_result());
        fixture.page.put(NodeId(1), video_snapshot(640, 360, PlaybackState::Playing));
        fixture.orchestrator.init().await;
        assert!(fixture.orchestrator.active_tasks() > 0);

        fixture.orchestrator.reset();
        fixture.orchestrator.stop();
        assert_eq!(fixture.orchestrator.active_tasks(), 0);

        settle(Duration::from_secs(5)).await;
        assert!(!fixture.orchestrator.is_running());
        assert_eq!(fixture.orchestrator.active_tasks(), 0);
        assert_eq!(fixture.changes.subscriber_count(), 0);
        fixture.orchestrator.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn waits_for_authentication() {
        let fixture = Fixture::new(safe_result());
        fixture.auth.set(false);
        assert_eq!(fixture.orchestrator.init().await, InitOutcome::NotAuthenticated);
        assert!(!fixture.orchestrator.status().observing);

        fixture.auth.set(true);
        assert_eq!(
            fixture.orchestrator.on_auth_changed(true).await,
            Some(InitOutcome::Started)
        );
        assert!(fixture.orchestrator.status().observing);

        fixture.auth.set(false);
        assert_eq!(fixture.orchestrator.on_auth_changed(false).await, None);
        assert!(!fixture.orchestrator.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn respects_settings_and_domain_policy() {
        let mut disabled = PolicySettings::first_run();
        disabled.detection_enabled = false;
        let fixture = Fixture::with_settings(safe_result(), disabled);
        assert_eq!(fixture.orchestrator.init().await, InitOutcome::Disabled);

        let mut denied = PolicySettings::first_run();
        denied.denied_domains = vec!["example.com".into()];
        let fixture = Fixture::with_settings(safe_result(), denied);
        assert_eq!(fixture.orchestrator.init().await, InitOutcome::DomainRestricted);
        assert!(!fixture.orchestrator.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn unreadable_settings_fall_back_to_safe_defaults() {
        let fixture = Fixture::new(safe_result());
        fixture.settings.set_failing(true);
        assert_eq!(fixture.orchestrator.init().await, InitOutcome::Disabled);

        fixture.settings.set_failing(false);
        assert_eq!(fixture.orchestrator.start().await, InitOutcome::Started);

        // Cached values win over the safe defaults once known.
        fixture.orchestrator.stop();
        fixture.settings.set_failing(true);
        assert_eq!(fixture.orchestrator.start().await, InitOutcome::Started);
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_settings_disable_detection() {
        let mut broken = PolicySettings::first_run();
        broken.thresholds.explicit = 7.5;
        let fixture = Fixture::with_settings(safe_result(), broken);
        assert_eq!(fixture.orchestrator.init().await, InitOutcome::Disabled);
        assert!(!fixture.orchestrator.status().enabled);
    }

    #[tokio::test(start_paused = true)]
    async fn pauses_while_hidden() {
        let fixture = Fixture::new(safe_result());
        fixture.orchestrator.init().await;

        fixture.orchestrator.on_page_visibility(false).await;
        assert!(!fixture.orchestrator.status().observing);
        assert!(fixture.orchestrator.status().enabled);

        assert_eq!(
            fixture.orchestrator.on_page_visibility(true).await,
            Some(InitOutcome::Started)
        );
        assert!(fixture.orchestrator.status().observing);
    }

    #[tokio::test(start_paused = true)]
    async fn settings_update_persists_and_restarts() {
        let fixture = Fixture::new(safe_result());
        fixture.orchestrator.init().await;

        let mut off = PolicySettings::first_run();
        off.detection_enabled = false;
        assert_eq!(
            fixture.orchestrator.on_settings_updated(off.clone()).await,
            InitOutcome::Disabled
        );
        assert!(!fixture.orchestrator.is_running());
        assert!(!fixture.orchestrator.status().enabled);

        let mut on = PolicySettings::first_run();
        on.privacy_mode = true;
        assert_eq!(
            fixture.orchestrator.on_settings_updated(on.clone()).await,
            InitOutcome::Started
        );
        assert_eq!(fixture.settings.saved(), vec![off, on]);

        let visit = fixture.sink.events().into_iter().last().unwrap();
        assert_eq!(visit.kind, ActivityKind::PageVisit { url: None });
        assert_eq!(visit.domain.as_deref(), Some("www.example.com"));
    }

    #[tokio::test(start_paused = true)]
    async fn risky_image_opens_modal_and_stop_closes_it() {
        let fixture = Fixture::new(explicit_result());
        fixture.orchestrator.init().await;
        fixture.page.put(NodeId(5), image_snapshot(800, 600, Some("/x.jpg")));
        fixture.changes.publish(DomChange::Inserted(vec![NodeId(5)]));
        settle(Duration::from_secs(5)).await;

        let status = fixture.orchestrator.status();
        assert!(status.modal_visible);
        assert_eq!(status.domain.as_deref(), Some("www.example.com"));
        assert_eq!(
            fixture.orchestrator.enforcement().act(EnforcementAction::Dismiss),
            Err(crate::detection::enforcement::EnforcementError::ActionNotAllowed {
                action: EnforcementAction::Dismiss,
                level: RiskLevel::High,
            })
        );

        fixture.orchestrator.stop();
        fixture.orchestrator.stop();
        assert_eq!(
            fixture.ui.events(),
            vec![UiEvent::Present(RiskLevel::High), UiEvent::Dismiss]
        );
        assert!(fixture.sink.events().iter().any(|event| matches!(
            event.kind,
            ActivityKind::ContentDetected { level: RiskLevel::High, .. }
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn playing_video_is_sampled_to_a_decision() {
        let fixture = Fixture::new(explicit_result());
        fixture.page.put(NodeId(8), video_snapshot(1280, 720, PlaybackState::Playing));
        fixture.orchestrator.init().await;
        assert_eq!(fixture.orchestrator.status().active_videos, 1);

        settle(Duration::from_secs(10)).await;
        assert_eq!(fixture.classifier.call_count(), 5);
        assert!(fixture.orchestrator.status().modal_visible);
        assert_eq!(fixture.orchestrator.status().active_videos, 0);
    }
}
