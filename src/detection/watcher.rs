//! Keeps the set of eligible media elements in sync with the page. Feeds in,
//! candidates out; nothing here talks to the classifier.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::{
    sync::broadcast::{self, error::RecvError},
    task::JoinHandle,
    time::{sleep, sleep_until, Instant},
};
use tokio_util::sync::CancellationToken;

use crate::{
    config::WatcherConfig,
    domain::{ElementKind, ElementSnapshot, NodeId, PlaybackState},
    page::{ChangeFeed, DomChange, PageSurface, VisibilityFeed},
};

use super::{
    media::is_image_source,
    policy::DomainPolicy,
    registry::{ElementHandle, ElementRegistry},
};

pub const INSERTED_PRIORITY: u8 = 0;
pub const VISIBLE_PRIORITY: u8 = 1;

/// An element that passed every eligibility check and was admitted.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub handle: ElementHandle,
    pub node: NodeId,
    pub kind: ElementKind,
    pub priority: u8,
    pub snapshot: ElementSnapshot,
}

/// Receives the watcher's output.
pub trait WatchSink: Send + Sync {
    fn candidates(&self, candidates: Vec<Candidate>);
    fn playback(&self, node: NodeId, state: PlaybackState);
    fn removed(&self, node: NodeId);
}

#[derive(Clone)]
struct WatchContext {
    policy: Arc<DomainPolicy>,
    sink: Arc<dyn WatchSink>,
    parent: CancellationToken,
}

#[derive(Default)]
struct WatchRun {
    cancel: Option<CancellationToken>,
    tasks: Vec<JoinHandle<()>>,
    context: Option<WatchContext>,
}

pub struct ElementWatcher {
    page: Arc<dyn PageSurface>,
    changes: Arc<dyn ChangeFeed>,
    visibility: Arc<dyn VisibilityFeed>,
    registry: Arc<ElementRegistry>,
    config: WatcherConfig,
    run: Mutex<WatchRun>,
}

impl ElementWatcher {
    pub fn new(
        page: Arc<dyn PageSurface>,
        changes: Arc<dyn ChangeFeed>,
        visibility: Arc<dyn VisibilityFeed>,
        registry: Arc<ElementRegistry>,
        config: WatcherConfig,
    ) -> Self {
        Self {
            page,
            changes,
            visibility,
            registry,
            config,
            run: Mutex::new(WatchRun::default()),
        }
    }

    /// Subscribes to both feeds, scans the elements already in the page and
    /// keeps observing until stopped or until `parent` is cancelled.
    pub fn start(
        self: &Arc<Self>,
        policy: DomainPolicy,
        sink: Arc<dyn WatchSink>,
        parent: &CancellationToken,
    ) {
        self.stop();
        let context = WatchContext {
            policy: Arc::new(policy),
            sink,
            parent: parent.clone(),
        };
        self.run.lock().context = Some(context.clone());
        self.begin(context);
    }

    fn begin(self: &Arc<Self>, context: WatchContext) {
        let cancel = context.parent.child_token();
        let changes = self.changes.subscribe();
        let visibility = self.visibility.subscribe();

        self.scan(&context);

        let watcher = Arc::clone(self);
        let task_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            watcher
                .observe(changes, visibility, context, task_cancel)
                .await
        });

        let mut run = self.run.lock();
        run.tasks.retain(|task| !task.is_finished());
        run.tasks.push(task);
        run.cancel = Some(cancel);
        tracing::info!(target: "watcher", tracked = self.registry.len(), "observing page");
    }

    /// Detaches all observation. Membership is kept.
    pub fn stop(&self) {
        let mut run = self.run.lock();
        if let Some(cancel) = run.cancel.take() {
            cancel.cancel();
            tracing::debug!(target: "watcher", "observation stopped");
        }
        for task in run.tasks.drain(..) {
            task.abort();
        }
    }

    /// Stops, forgets every member and starts again after the cooldown.
    /// Standalone restart of the watcher alone; a pipeline reset goes through
    /// the orchestrator, which restarts every component.
    pub fn reset(self: &Arc<Self>) {
        self.stop();
        self.registry.clear_membership();

        let Some(context) = self.run.lock().context.clone() else {
            tracing::debug!(target: "watcher", "reset before first start; nothing to restart");
            return;
        };
        let watcher = Arc::clone(self);
        let cooldown = self.config.restart_cooldown;
        let parent = context.parent.clone();
        let task = tokio::spawn(async move {
            tokio::select! {
                _ = sleep(cooldown) => watcher.begin(context),
                _ = parent.cancelled() => {}
            }
        });
        self.run.lock().tasks.push(task);
        tracing::info!(target: "watcher", ?cooldown, "watcher reset");
    }

    pub fn is_observing(&self) -> bool {
        self.run
            .lock()
            .cancel
            .as_ref()
            .is_some_and(|cancel| !cancel.is_cancelled())
    }

    pub fn active_tasks(&self) -> usize {
        self.run
            .lock()
            .tasks
            .iter()
            .filter(|task| !task.is_finished())
            .count()
    }

    async fn observe(
        &self,
        mut changes: broadcast::Receiver<DomChange>,
        mut visibility: broadcast::Receiver<NodeId>,
        context: WatchContext,
        cancel: CancellationToken,
    ) {
        loop {
            let deadline = self.registry.next_awaiting_deadline();
            tokio::select! {
                _ = cancel.cancelled() => break,
                change = changes.recv() => match change {
                    Ok(change) => self.apply_change(change, &context),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(target: "watcher", skipped, "change feed lagged; rescanning page");
                        self.resync(&context);
                    }
                    Err(RecvError::Closed) => break,
                },
                node = visibility.recv() => match node {
                    Ok(node) => self.on_visible(node, &context),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(target: "watcher", skipped, "visibility feed lagged; rescanning page");
                        self.resync(&context);
                    }
                    Err(RecvError::Closed) => break,
                },
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    for node in self.registry.expire_awaiting(Instant::now()) {
                        tracing::debug!(target: "watcher", %node, "no source appeared; stopped waiting");
                    }
                }
            }
        }
        tracing::debug!(target: "watcher", "observer loop ended");
    }

    fn scan(&self, context: &WatchContext) {
        let candidates: Vec<_> = self
            .page
            .media_elements()
            .into_iter()
            .filter_map(|node| self.evaluate(node, INSERTED_PRIORITY, context))
            .collect();
        if !candidates.is_empty() {
            tracing::debug!(target: "watcher", count = candidates.len(), "scan found candidates");
            context.sink.candidates(candidates);
        }
    }

    /// Rebuilds what skipped feed events would have told us from the page
    /// itself: detached members, pending lazy sources, playback, new nodes.
    fn resync(&self, context: &WatchContext) {
        for (node, kind) in self.registry.members() {
            let Some(snapshot) = self.page.inspect(node) else {
                self.registry.release(node);
                context.sink.removed(node);
                continue;
            };
            match kind {
                ElementKind::Video => context.sink.playback(node, snapshot.playback),
                ElementKind::Image if self.registry.is_awaiting_source(node) => {
                    self.on_source_changed(node, context)
                }
                ElementKind::Image => {}
            }
        }
        self.scan(context);
    }

    fn apply_change(&self, change: DomChange, context: &WatchContext) {
        match change {
            DomChange::Inserted(nodes) => {
                let candidates: Vec<_> = nodes
                    .into_iter()
                    .filter_map(|node| self.evaluate(node, INSERTED_PRIORITY, context))
                    .collect();
                if !candidates.is_empty() {
                    context.sink.candidates(candidates);
                }
            }
            DomChange::Removed(node) => {
                if self.registry.release(node) {
                    tracing::trace!(target: "watcher", %node, "member removed from page");
                }
                context.sink.removed(node);
            }
            DomChange::SourceChanged(node) => self.on_source_changed(node, context),
            DomChange::Playback(node, state) => context.sink.playback(node, state),
        }
    }

    fn on_visible(&self, node: NodeId, context: &WatchContext) {
        if let Some(candidate) = self.evaluate(node, VISIBLE_PRIORITY, context) {
            context.sink.candidates(vec![candidate]);
        }
    }

    fn on_source_changed(&self, node: NodeId, context: &WatchContext) {
        if !self.registry.is_awaiting_source(node) {
            if let Some(candidate) = self.evaluate(node, INSERTED_PRIORITY, context) {
                context.sink.candidates(vec![candidate]);
            }
            return;
        }

        let Some(snapshot) = self.page.inspect(node) else {
            self.registry.release(node);
            return;
        };
        if !snapshot.source().is_some_and(is_image_source) {
            return;
        }
        let Some(handle) = self.registry.resolve_awaiting(node, Instant::now()) else {
            return;
        };

        if self.is_eligible(&snapshot, context) {
            tracing::debug!(target: "watcher", %node, "lazy source resolved");
            context.sink.candidates(vec![Candidate {
                handle,
                node,
                kind: ElementKind::Image,
                priority: INSERTED_PRIORITY,
                snapshot,
            }]);
        } else {
            // Let a later visibility entry evaluate it from scratch.
            self.registry.release(node);
        }
    }

    fn evaluate(&self, node: NodeId, priority: u8, context: &WatchContext) -> Option<Candidate> {
        if self.registry.contains(node) {
            return None;
        }
        let snapshot = self.page.inspect(node)?;
        let kind = snapshot.kind()?;
        if !self.is_eligible(&snapshot, context) {
            return None;
        }

        if kind == ElementKind::Image && !snapshot.source().is_some_and(is_image_source) {
            let deadline = Instant::now() + self.config.lazy_source_timeout;
            if self.registry.admit(node, kind, Some(deadline)).is_some() {
                tracing::debug!(target: "watcher", %node, "waiting for lazy source");
            }
            return None;
        }

        let handle = self.registry.admit(node, kind, None)?;
        Some(Candidate {
            handle,
            node,
            kind,
            priority,
            snapshot,
        })
    }

    fn is_eligible(&self, snapshot: &ElementSnapshot, context: &WatchContext) -> bool {
        let min = self.config.min_element_size;
        snapshot.visible
            && snapshot.width >= min
            && snapshot.height >= min
            && context.policy.is_allowed(&self.page.location())
    }
}
