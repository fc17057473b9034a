use std::sync::Arc;

use parking_lot::RwLock;

use crate::{
    domain::{ActivityKind, ClassificationResult, RiskThresholds},
    infrastructure::activity::ActivityLog,
};

use super::{
    enforcement::{EnforcementController, ShowOutcome},
    risk::{Assessment, RiskClassifier},
};

/// Turns classifier output into activity events and, above the configured
/// floor, an enforcement request.
pub struct DetectionReporter {
    classifier: RwLock<RiskClassifier>,
    enforcement: Arc<EnforcementController>,
    activity: Arc<ActivityLog>,
}

impl DetectionReporter {
    pub fn new(enforcement: Arc<EnforcementController>, activity: Arc<ActivityLog>) -> Self {
        Self {
            classifier: RwLock::new(RiskClassifier::default()),
            enforcement,
            activity,
        }
    }

    pub fn reconfigure(&self, thresholds: RiskThresholds) {
        *self.classifier.write() = RiskClassifier::new(thresholds);
    }

    pub fn assess(&self, result: &ClassificationResult) -> Assessment {
        self.classifier.read().assess(result)
    }

    pub fn report_image(&self, source_url: Option<&str>, result: &ClassificationResult) -> Assessment {
        let assessment = self.assess(result);
        self.report(source_url, &assessment);
        assessment
    }

    /// Reports an already-aggregated decision, e.g. a video vote.
    pub fn report(&self, source_url: Option<&str>, assessment: &Assessment) -> Option<ShowOutcome> {
        tracing::debug!(
            target: "classifier",
            level = %assessment.level,
            confidence = assessment.confidence,
            "content assessed"
        );
        self.activity.record(ActivityKind::ContentDetected {
            level: assessment.level,
            confidence: assessment.confidence,
            source_url: source_url.map(str::to_string),
        });
        let enforce = self.classifier.read().should_enforce(assessment.level);
        enforce.then(|| self.enforcement.show(assessment, source_url))
    }
}
