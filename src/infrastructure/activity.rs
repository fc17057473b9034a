use std::sync::Arc;

use parking_lot::RwLock;
use reqwest::Client;

use crate::domain::{ActivityEvent, ActivityKind};

/// Fire-and-forget destination for activity events. Must never block or fail
/// the caller.
pub trait ActivitySink: Send + Sync {
    fn log(&self, event: ActivityEvent);
}

/// Posts events to the backend's `/log` endpoint on a detached task.
#[derive(Clone)]
pub struct HttpActivitySink {
    http: Client,
    endpoint: String,
    api_token: Option<String>,
}

impl HttpActivitySink {
    pub fn new(http: Client, base_url: &str, api_token: Option<String>) -> Self {
        Self {
            http,
            endpoint: format!("{base_url}/log"),
            api_token,
        }
    }
}

impl ActivitySink for HttpActivitySink {
    fn log(&self, event: ActivityEvent) {
        let Some(token) = self.api_token.clone() else {
            tracing::debug!(target: "activity", "no api token; activity event dropped");
            return;
        };
        let http = self.http.clone();
        let endpoint = self.endpoint.clone();
        tokio::spawn(async move {
            let result = http
                .post(&endpoint)
                .bearer_auth(token)
                .json(&event)
                .send()
                .await
                .and_then(|response| response.error_for_status());
            if let Err(err) = result {
                tracing::warn!(target: "activity", error = %err, "failed to deliver activity event");
            }
        });
    }
}

#[derive(Debug, Clone, Default)]
struct ActivityContext {
    domain: Option<String>,
    privacy_mode: bool,
}

/// Stamps events with the page domain and applies privacy mode before
/// handing them to the sink.
pub struct ActivityLog {
    sink: Arc<dyn ActivitySink>,
    context: RwLock<ActivityContext>,
}

impl ActivityLog {
    pub fn new(sink: Arc<dyn ActivitySink>) -> Self {
        Self {
            sink,
            context: RwLock::new(ActivityContext::default()),
        }
    }

    pub fn set_context(&self, domain: Option<String>, privacy_mode: bool) {
        *self.context.write() = ActivityContext {
            domain,
            privacy_mode,
        };
    }

    pub fn record(&self, mut kind: ActivityKind) {
        let context = self.context.read().clone();
        if context.privacy_mode {
            match &mut kind {
                ActivityKind::PageVisit { url } => *url = None,
                ActivityKind::ContentDetected { source_url, .. } => *source_url = None,
                ActivityKind::ModalShown { .. } | ActivityKind::ModalAction { .. } => {}
            }
        }
        self.sink.log(ActivityEvent::new(kind, context.domain));
    }
}

#[cfg(test)]
mod tests {
    use crate::{detection::testing::RecordingSink, domain::RiskLevel};

    use super::*;

    #[test]
    fn privacy_mode_strips_urls() {
        let sink = Arc::new(RecordingSink::default());
        let log = ActivityLog::new(sink.clone());
        log.set_context(Some("site.com".into()), true);
        log.record(ActivityKind::ContentDetected {
            level: RiskLevel::High,
            confidence: 0.9,
            source_url: Some("https://site.com/a.png".into()),
        });

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].domain.as_deref(), Some("site.com"));
        assert!(matches!(
            &events[0].kind,
            ActivityKind::ContentDetected { source_url: None, .. }
        ));
    }

    #[test]
    fn urls_kept_without_privacy_mode() {
        let sink = Arc::new(RecordingSink::default());
        let log = ActivityLog::new(sink.clone());
        log.record(ActivityKind::PageVisit {
            url: Some("https://site.com".into()),
        });
        assert!(matches!(
            &sink.events()[0].kind,
            ActivityKind::PageVisit { url: Some(_) }
        ));
    }
}
