use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;

use crate::{
    domain::{ActivityKind, EnforcementAction, RiskLevel},
    infrastructure::activity::ActivityLog,
    page::EnforcementUi,
};

use super::risk::Assessment;

const CATEGORY_DISPLAY_FLOOR: f32 = 0.1;
const URL_DISPLAY_LIMIT: usize = 50;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryView {
    pub name: &'static str,
    pub percent: u32,
}

/// Everything the UI needs to render the warning.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModalView {
    pub level: RiskLevel,
    pub description: &'static str,
    pub color: &'static str,
    pub confidence_percent: u32,
    pub categories: Vec<CategoryView>,
    pub source_url: Option<String>,
    pub actions: Vec<EnforcementAction>,
    pub mandatory: bool,
}

impl ModalView {
    pub fn new(assessment: &Assessment, source_url: Option<&str>) -> Self {
        let level = assessment.level;
        Self {
            level,
            description: level.description(),
            color: level.color(),
            confidence_percent: percent(assessment.confidence),
            categories: assessment
                .scores
                .named()
                .into_iter()
                .filter(|(_, value)| *value > CATEGORY_DISPLAY_FLOOR)
                .map(|(name, value)| CategoryView {
                    name,
                    percent: percent(value),
                })
                .collect(),
            source_url: source_url.map(truncate_url),
            actions: level.available_actions().to_vec(),
            mandatory: level.requires_mandatory_action(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModalVisibility {
    Hidden,
    Showing,
}

#[derive(Debug, Clone)]
pub struct ModalState {
    pub visibility: ModalVisibility,
    pub current: Option<ModalView>,
    pub dismissible: bool,
}

impl ModalState {
    fn hidden() -> Self {
        Self {
            visibility: ModalVisibility::Hidden,
            current: None,
            dismissible: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShowOutcome {
    Shown,
    Ignored,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnforcementError {
    #[error("no modal is showing")]
    NotShowing,
    #[error("{action} is not available for {level} risk")]
    ActionNotAllowed {
        action: EnforcementAction,
        level: RiskLevel,
    },
}

/// Owns the single warning modal.
pub struct EnforcementController {
    ui: Arc<dyn EnforcementUi>,
    activity: Arc<ActivityLog>,
    state: Mutex<ModalState>,
}

impl EnforcementController {
    pub fn new(ui: Arc<dyn EnforcementUi>, activity: Arc<ActivityLog>) -> Self {
        Self {
            ui,
            activity,
            state: Mutex::new(ModalState::hidden()),
        }
    }

    pub fn show(&self, assessment: &Assessment, source_url: Option<&str>) -> ShowOutcome {
        let view = {
            let mut state = self.state.lock();
            if state.visibility == ModalVisibility::Showing {
                tracing::info!(
                    target: "enforcement",
                    level = %assessment.level,
                    "modal already showing; ignoring"
                );
                return ShowOutcome::Ignored;
            }
            let view = ModalView::new(assessment, source_url);
            *state = ModalState {
                visibility: ModalVisibility::Showing,
                current: Some(view.clone()),
                dismissible: !view.mandatory,
            };
            view
        };

        self.ui.present(&view);
        self.activity.record(ActivityKind::ModalShown { level: view.level });
        tracing::info!(
            target: "enforcement",
            level = %view.level,
            mandatory = view.mandatory,
            "modal shown"
        );
        ShowOutcome::Shown
    }

    /// Applies a user action. The action is logged before the modal closes.
    pub fn act(&self, action: EnforcementAction) -> Result<(), EnforcementError> {
        let mut state = self.state.lock();
        let level = match (&state.visibility, &state.current) {
            (ModalVisibility::Showing, Some(view)) => view.level,
            _ => return Err(EnforcementError::NotShowing),
        };
        if !level.available_actions().contains(&action) {
            tracing::warn!(target: "enforcement", %action, %level, "rejected modal action");
            return Err(EnforcementError::ActionNotAllowed { action, level });
        }

        self.activity.record(ActivityKind::ModalAction { action, level });
        tracing::info!(target: "enforcement", %action, %level, "modal action");
        *state = ModalState::hidden();
        drop(state);

        self.ui.dismiss();
        if action == EnforcementAction::CloseTab {
            self.ui.close_tab();
        }
        Ok(())
    }

    /// Click on the backdrop. Only non-mandatory modals close this way.
    pub fn outside_click(&self) -> bool {
        self.dismiss_if_allowed("outside click")
    }

    pub fn escape(&self) -> bool {
        self.dismiss_if_allowed("escape")
    }

    fn dismiss_if_allowed(&self, trigger: &'static str) -> bool {
        let dismissible = {
            let state = self.state.lock();
            state.visibility == ModalVisibility::Showing && state.dismissible
        };
        if !dismissible {
            tracing::debug!(target: "enforcement", trigger, "dismissal not permitted");
            return false;
        }
        self.act(EnforcementAction::Dismiss).is_ok()
    }

    /// Closes without an action, used when the pipeline stops.
    pub fn force_close(&self) {
        let was_showing = {
            let mut state = self.state.lock();
            let was_showing = state.visibility == ModalVisibility::Showing;
            *state = ModalState::hidden();
            was_showing
        };
        if was_showing {
            self.ui.dismiss();
            tracing::info!(target: "enforcement", "modal force closed");
        }
    }

    pub fn is_showing(&self) -> bool {
        self.state.lock().visibility == ModalVisibility::Showing
    }

    pub fn state(&self) -> ModalState {
        self.state.lock().clone()
    }
}

fn percent(value: f32) -> u32 {
    (value.clamp(0.0, 1.0) * 100.0).round() as u32
}

fn truncate_url(url: &str) -> String {
    if url.chars().count() <= URL_DISPLAY_LIMIT {
        return url.to_string();
    }
    let mut truncated: String = url.chars().take(URL_DISPLAY_LIMIT).collect();
    truncated.push_str("...");
    truncated
}
