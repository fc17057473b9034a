//! In-memory doubles for the capability traits.

use std::{
    collections::{HashMap, VecDeque},
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use image::{DynamicImage, RgbImage};
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::{
    ai::{ClassificationService, ServiceError},
    detection::{media::PreparedImage, ModalView, PipelineError},
    domain::{
        ActivityEvent, ClassificationResult, ElementSnapshot, NodeId, PlaybackState,
        PolicySettings, Prediction, RiskLevel,
    },
    infrastructure::{
        activity::ActivitySink,
        settings_store::{SettingsError, SettingsStore},
    },
    page::{EnforcementUi, PageSurface},
};

pub fn image_snapshot(width: u32, height: u32, source: Option<&str>) -> ElementSnapshot {
    ElementSnapshot {
        tag: "IMG".to_string(),
        width,
        height,
        visible: true,
        source: source.map(str::to_string),
        playback: PlaybackState::Paused,
    }
}

pub fn video_snapshot(width: u32, height: u32, playback: PlaybackState) -> ElementSnapshot {
    ElementSnapshot {
        tag: "VIDEO".to_string(),
        width,
        height,
        visible: true,
        source: Some("https://cdn.example.com/clip.mp4".to_string()),
        playback,
    }
}

pub fn explicit_result() -> ClassificationResult {
    ClassificationResult {
        predictions: vec![Prediction::new("Porn", 0.92), Prediction::new("Neutral", 0.05)],
        confidence: 0.92,
    }
}

pub fn safe_result() -> ClassificationResult {
    ClassificationResult {
        predictions: vec![Prediction::new("Neutral", 0.97), Prediction::new("Porn", 0.01)],
        confidence: 0.97,
    }
}

#[derive(Default)]
struct PageState {
    location: String,
    order: Vec<NodeId>,
    nodes: HashMap<NodeId, ElementSnapshot>,
}

pub struct FakePage {
    state: Mutex<PageState>,
    loads: AtomicUsize,
}

impl FakePage {
    pub fn new(location: &str) -> Self {
        Self {
            state: Mutex::new(PageState {
                location: location.to_string(),
                ..PageState::default()
            }),
            loads: AtomicUsize::new(0),
        }
    }

    pub fn put(&self, node: NodeId, snapshot: ElementSnapshot) {
        let mut state = self.state.lock();
        if state.nodes.insert(node, snapshot).is_none() {
            state.order.push(node);
        }
    }

    pub fn update(&self, node: NodeId, apply: impl FnOnce(&mut ElementSnapshot)) {
        if let Some(snapshot) = self.state.lock().nodes.get_mut(&node) {
            apply(snapshot);
        }
    }

    pub fn detach(&self, node: NodeId) {
        let mut state = self.state.lock();
        state.nodes.remove(&node);
        state.order.retain(|existing| *existing != node);
    }

    pub fn navigate(&self, location: &str) {
        self.state.lock().location = location.to_string();
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    fn render(&self, node: NodeId) -> Result<DynamicImage, PipelineError> {
        let snapshot = self.inspect(node).ok_or(PipelineError::StaleElement(node))?;
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(DynamicImage::ImageRgb8(RgbImage::new(
            snapshot.width.max(1),
            snapshot.height.max(1),
        )))
    }
}

#[async_trait]
impl PageSurface for FakePage {
    fn location(&self) -> String {
        self.state.lock().location.clone()
    }

    fn media_elements(&self) -> Vec<NodeId> {
        self.state.lock().order.clone()
    }

    fn inspect(&self, node: NodeId) -> Option<ElementSnapshot> {
        self.state.lock().nodes.get(&node).cloned()
    }

    async fn load_image(&self, node: NodeId) -> Result<DynamicImage, PipelineError> {
        self.render(node)
    }

    async fn capture_frame(&self, node: NodeId) -> Result<DynamicImage, PipelineError> {
        self.render(node)
    }
}

#[derive(Debug, Clone)]
pub struct ClassifyCall {
    pub width: u32,
    pub height: u32,
    pub source_url: Option<String>,
    pub at: Instant,
}

/// Answers with scripted responses first, then with the fallback.
pub struct FakeClassifier {
    fallback: Mutex<ClassificationResult>,
    scripted: Mutex<VecDeque<Result<ClassificationResult, ServiceError>>>,
    latency: Duration,
    calls: Mutex<Vec<ClassifyCall>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeClassifier {
    pub fn new(fallback: ClassificationResult) -> Self {
        Self::with_latency(fallback, Duration::from_millis(50))
    }

    pub fn with_latency(fallback: ClassificationResult, latency: Duration) -> Self {
        Self {
            fallback: Mutex::new(fallback),
            scripted: Mutex::new(VecDeque::new()),
            latency,
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn script(&self, response: Result<ClassificationResult, ServiceError>) {
        self.scripted.lock().push_back(response);
    }

    pub fn set_fallback(&self, result: ClassificationResult) {
        *self.fallback.lock() = result;
    }

    pub fn calls(&self) -> Vec<ClassifyCall> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClassificationService for FakeClassifier {
    async fn classify(&self, image: &PreparedImage) -> Result<ClassificationResult, ServiceError> {
        self.calls.lock().push(ClassifyCall {
            width: image.width,
            height: image.height,
            source_url: image.source_url.clone(),
            at: Instant::now(),
        });
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        tokio::time::sleep(self.latency).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let scripted = self.scripted.lock().pop_front();
        scripted.unwrap_or_else(|| Ok(self.fallback.lock().clone()))
    }
}

#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<ActivityEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<ActivityEvent> {
        self.events.lock().clone()
    }
}

impl ActivitySink for RecordingSink {
    fn log(&self, event: ActivityEvent) {
        self.events.lock().push(event);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiEvent {
    Present(RiskLevel),
    Dismiss,
    CloseTab,
}

#[derive(Default)]
pub struct RecordingUi {
    events: Mutex<Vec<UiEvent>>,
    presented: Mutex<Vec<ModalView>>,
}

impl RecordingUi {
    pub fn events(&self) -> Vec<UiEvent> {
        self.events.lock().clone()
    }

    pub fn presented(&self) -> Vec<ModalView> {
        self.presented.lock().clone()
    }
}

impl EnforcementUi for RecordingUi {
    fn present(&self, view: &ModalView) {
        self.events.lock().push(UiEvent::Present(view.level));
        self.presented.lock().push(view.clone());
    }

    fn dismiss(&self) {
        self.events.lock().push(UiEvent::Dismiss);
    }

    fn close_tab(&self) {
        self.events.lock().push(UiEvent::CloseTab);
    }
}

pub struct MemorySettingsStore {
    current: Mutex<PolicySettings>,
    saved: Mutex<Vec<PolicySettings>>,
    failing: AtomicBool,
}

impl MemorySettingsStore {
    pub fn new(settings: PolicySettings) -> Self {
        Self {
            current: Mutex::new(settings),
            saved: Mutex::new(Vec::new()),
            failing: AtomicBool::new(false),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn saved(&self) -> Vec<PolicySettings> {
        self.saved.lock().clone()
    }

    fn check(&self) -> Result<(), SettingsError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(SettingsError::Io(std::io::Error::other("store offline")));
        }
        Ok(())
    }
}

#[async_trait]
impl SettingsStore for MemorySettingsStore {
    async fn load(&self) -> Result<PolicySettings, SettingsError> {
        self.check()?;
        Ok(self.current.lock().clone())
    }

    async fn save(&self, settings: &PolicySettings) -> Result<(), SettingsError> {
        self.check()?;
        *self.current.lock() = settings.clone();
        self.saved.lock().push(settings.clone());
        Ok(())
    }
}
