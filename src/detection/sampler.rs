//! Per-video sampling sessions. Each playing video gets its own task that
//! grabs a frame every few animation ticks and votes on the result until the
//! tally decides or the video stops.

use std::{collections::HashMap, sync::Arc};

use parking_lot::Mutex;
use tokio::{
    task::JoinHandle,
    time::{interval, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::{
    ai::ClassificationService,
    config::SamplerConfig,
    domain::{ElementSnapshot, NodeId, PlaybackState},
    infrastructure::auth::AuthProvider,
    page::PageSurface,
};

use super::{
    error::PipelineError, media, registry::ElementRegistry, reporter::DetectionReporter,
    risk::Assessment,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteOutcome {
    Pending,
    Decided,
    Reset,
}

/// Positive/negative frame votes. Evaluated on every vote once the decision
/// window is reached; counters never exceed the reset window.
#[derive(Debug, Clone, PartialEq)]
pub struct VoteTally {
    positives: u32,
    negatives: u32,
    decision_window: u32,
    reset_window: u32,
    positive_ratio: f32,
}

impl VoteTally {
    pub fn new(config: &SamplerConfig) -> Self {
        Self {
            positives: 0,
            negatives: 0,
            decision_window: config.decision_window.max(1),
            reset_window: config.reset_window.max(config.decision_window.max(1)),
            positive_ratio: config.positive_ratio,
        }
    }

    pub fn record(&mut self, positive: bool) -> VoteOutcome {
        if positive {
            self.positives += 1;
        } else {
            self.negatives += 1;
        }

        let total = self.total();
        if total < self.decision_window {
            return VoteOutcome::Pending;
        }
        if self.positives as f32 / total as f32 > self.positive_ratio {
            return VoteOutcome::Decided;
        }
        if total >= self.reset_window {
            self.positives = 0;
            self.negatives = 0;
            return VoteOutcome::Reset;
        }
        VoteOutcome::Pending
    }

    pub fn counts(&self) -> (u32, u32) {
        (self.positives, self.negatives)
    }

    pub fn total(&self) -> u32 {
        self.positives + self.negatives
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Sampling,
    Decided,
}

struct SessionTask {
    id: u64,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl SessionTask {
    fn discard(self) {
        self.cancel.cancel();
        self.task.abort();
    }
}

struct VideoEntry {
    state: SessionState,
    session: Option<SessionTask>,
}

#[derive(Default)]
struct SamplerState {
    parent: Option<CancellationToken>,
    entries: HashMap<NodeId, VideoEntry>,
    next_session: u64,
}

enum SessionEnd {
    Decided {
        assessment: Assessment,
        source_url: Option<String>,
    },
    Stopped,
    Stale,
    Cancelled,
}

pub struct VideoSampler {
    page: Arc<dyn PageSurface>,
    classifier: Arc<dyn ClassificationService>,
    auth: Arc<dyn AuthProvider>,
    reporter: Arc<DetectionReporter>,
    registry: Arc<ElementRegistry>,
    config: SamplerConfig,
    state: Mutex<SamplerState>,
}

impl VideoSampler {
    pub fn new(
        page: Arc<dyn PageSurface>,
        classifier: Arc<dyn ClassificationService>,
        auth: Arc<dyn AuthProvider>,
        reporter: Arc<DetectionReporter>,
        registry: Arc<ElementRegistry>,
        config: SamplerConfig,
    ) -> Self {
        Self {
            page,
            classifier,
            auth,
            reporter,
            registry,
            config,
            state: Mutex::new(SamplerState::default()),
        }
    }

    /// Sessions started from now on are children of `parent`.
    pub fn activate(&self, parent: &CancellationToken) {
        self.state.lock().parent = Some(parent.clone());
    }

    pub fn admit(self: &Arc<Self>, node: NodeId, snapshot: &ElementSnapshot) {
        {
            let mut state = self.state.lock();
            if state.entries.contains_key(&node) {
                return;
            }
            state.entries.insert(
                node,
                VideoEntry {
                    state: SessionState::Idle,
                    session: None,
                },
            );
        }
        tracing::debug!(target: "sampler", %node, playing = snapshot.is_playing(), "video admitted");
        if snapshot.is_playing() {
            self.start(node);
        }
    }

    pub fn on_playback(self: &Arc<Self>, node: NodeId, playback: PlaybackState) {
        match playback {
            PlaybackState::Playing => self.start(node),
            PlaybackState::Paused | PlaybackState::Ended => self.discard(node),
        }
    }

    pub fn removed(&self, node: NodeId) {
        let entry = self.state.lock().entries.remove(&node);
        if let Some(session) = entry.and_then(|entry| entry.session) {
            session.discard();
            tracing::debug!(target: "sampler", %node, "video removed; session discarded");
        }
    }

    /// Cancels every session and forgets every video.
    pub fn stop_all(&self) {
        let mut state = self.state.lock();
        state.parent = None;
        let mut discarded = 0;
        for (_, entry) in state.entries.drain() {
            if let Some(session) = entry.session {
                session.discard();
                discarded += 1;
            }
        }
        if discarded > 0 {
            tracing::info!(target: "sampler", discarded, "video sessions stopped");
        }
    }

    pub fn active_sessions(&self) -> usize {
        self.state
            .lock()
            .entries
            .values()
            .filter(|entry| entry.session.is_some())
            .count()
    }

    pub fn session_state(&self, node: NodeId) -> Option<SessionState> {
        self.state.lock().entries.get(&node).map(|entry| entry.state)
    }

    fn start(self: &Arc<Self>, node: NodeId) {
        let mut state = self.state.lock();
        let Some(parent) = state.parent.clone().filter(|token| !token.is_cancelled()) else {
            return;
        };
        let id = state.next_session;
        let Some(entry) = state.entries.get_mut(&node) else {
            return;
        };
        if entry.state != SessionState::Idle {
            return;
        }

        let cancel = parent.child_token();
        let sampler = Arc::clone(self);
        let task_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            let end = sampler.sample_until_decided(node, &task_cancel).await;
            sampler.finish(node, id, end);
        });
        entry.state = SessionState::Sampling;
        entry.session = Some(SessionTask { id, cancel, task });
        state.next_session += 1;
        tracing::debug!(target: "sampler", %node, session = id, "sampling started");
    }

    /// Drops the running session; the votes go with it.
    fn discard(&self, node: NodeId) {
        let mut state = self.state.lock();
        let Some(entry) = state.entries.get_mut(&node) else {
            return;
        };
        if let Some(session) = entry.session.take() {
            session.discard();
            entry.state = SessionState::Idle;
            tracing::debug!(target: "sampler", %node, "playback stopped; session discarded");
        }
    }

    async fn sample_until_decided(&self, node: NodeId, cancel: &CancellationToken) -> SessionEnd {
        let mut ticker = interval(self.config.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let every = self.config.sample_every_ticks.max(1);
        let mut tally = VoteTally::new(&self.config);
        let mut strongest: Option<Assessment> = None;
        let mut ticks = 0u32;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return SessionEnd::Cancelled,
                _ = ticker.tick() => {}
            }
            ticks += 1;
            if ticks < every {
                continue;
            }
            ticks = 0;

            let Some(snapshot) = self.page.inspect(node) else {
                return SessionEnd::Stale;
            };
            if !snapshot.is_playing() {
                return SessionEnd::Stopped;
            }

            let assessment = match self.sample(node, &snapshot, cancel).await {
                Ok(Some(assessment)) => assessment,
                Ok(None) => return SessionEnd::Cancelled,
                Err(PipelineError::StaleElement(_)) => return SessionEnd::Stale,
                Err(PipelineError::AuthExpired) => {
                    tracing::debug!(target: "sampler", %node, "not authenticated; frame skipped");
                    continue;
                }
                Err(err) => {
                    tracing::warn!(target: "sampler", %node, error = %err, "frame sample failed");
                    continue;
                }
            };

            let positive = assessment.level.is_positive();
            if positive
                && strongest.map_or(true, |best| {
                    (assessment.level, assessment.confidence) > (best.level, best.confidence)
                })
            {
                strongest = Some(assessment);
            }

            match tally.record(positive) {
                VoteOutcome::Pending => {}
                VoteOutcome::Reset => {
                    strongest = None;
                    tracing::debug!(target: "sampler", %node, "vote window reset");
                }
                VoteOutcome::Decided => {
                    let (positives, negatives) = tally.counts();
                    tracing::info!(target: "sampler", %node, positives, negatives, "video decided");
                    return SessionEnd::Decided {
                        assessment: strongest.unwrap_or(assessment),
                        source_url: snapshot.source().map(str::to_string),
                    };
                }
            }
        }
    }

    async fn sample(
        &self,
        node: NodeId,
        snapshot: &ElementSnapshot,
        cancel: &CancellationToken,
    ) -> Result<Option<Assessment>, PipelineError> {
        if !self.auth.is_authenticated().await {
            return Err(PipelineError::AuthExpired);
        }
        let frame = self.page.capture_frame(node).await?;
        let prepared = media::prepare(
            &frame,
            self.config.max_image_side,
            snapshot.source().map(str::to_string),
        )?;
        let result = tokio::select! {
            result = self.classifier.classify(&prepared) => result?,
            _ = cancel.cancelled() => return Ok(None),
        };
        Ok(Some(self.reporter.assess(&result)))
    }

    fn finish(&self, node: NodeId, id: u64, end: SessionEnd) {
        let mut state = self.state.lock();
        let Some(entry) = state.entries.get_mut(&node) else {
            return;
        };
        if entry.session.as_ref().map(|session| session.id) != Some(id) {
            return;
        }
        entry.session = None;

        match end {
            SessionEnd::Decided {
                assessment,
                source_url,
            } => {
                entry.state = SessionState::Decided;
                drop(state);
                self.registry.mark_submitted(node);
                self.reporter.report(source_url.as_deref(), &assessment);
            }
            SessionEnd::Stale => {
                state.entries.remove(&node);
            }
            SessionEnd::Stopped | SessionEnd::Cancelled => entry.state = SessionState::Idle,
        }
    }
}
