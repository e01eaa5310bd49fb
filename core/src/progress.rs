//! Progress Tracker: folds the canonical Event stream into a per-session ordered
//! snapshot suitable for rendering as one chat message. Grounded on the Python
//! original's `ProgressState` (`actions` ordered dict, `resume_line`, `context_line`).

use std::collections::HashMap;
use std::time::Instant;

use crate::model::{Action, ActionKind, ActionPhase, Event, ResumeToken};

const DEFAULT_MAX_ACTIONS: usize = 5;
const HARD_CAP_MAX_ACTIONS: usize = 50;

#[derive(Debug, Clone)]
pub struct ActionState {
    pub action: Action,
    pub display_phase: ActionPhase,
    pub ok: Option<bool>,
    pub first_seen: Instant,
    pub last_update: Instant,
}

/// One session's live progress view. Insert-preserves-order, update-replaces-record:
/// an action keeps its original position even after a Completed event updates it.
#[derive(Debug)]
pub struct ProgressState {
    pub engine: String,
    pub resume: Option<ResumeToken>,
    pub meta: HashMap<String, serde_json::Value>,
    order: Vec<String>,
    actions: HashMap<String, ActionState>,
    pub title: String,
    pub done: bool,
    pub final_answer: Option<String>,
    pub final_error: Option<String>,
}

impl ProgressState {
    pub fn new(engine: impl Into<String>) -> Self {
        Self {
            engine: engine.into(),
            resume: None,
            meta: HashMap::new(),
            order: Vec::new(),
            actions: HashMap::new(),
            title: String::new(),
            done: false,
            final_answer: None,
            final_error: None,
        }
    }

    pub fn apply(&mut self, event: &Event) {
        match event {
            Event::Started { resume, title, meta, .. } => {
                self.resume = resume.clone();
                self.title = title.clone();
                self.meta = meta.clone();
            }
            Event::Action { action, phase, ok } => {
                if action.kind == ActionKind::Turn {
                    return;
                }
                let now = Instant::now();
                if let Some(existing) = self.actions.get_mut(&action.id) {
                    existing.action = action.clone();
                    existing.display_phase = *phase;
                    existing.ok = *ok;
                    existing.last_update = now;
                } else {
                    self.order.push(action.id.clone());
                    self.actions.insert(
                        action.id.clone(),
                        ActionState { action: action.clone(), display_phase: *phase, ok: *ok, first_seen: now, last_update: now },
                    );
                }
            }
            Event::Completed { ok, answer, resume, error, .. } => {
                self.done = true;
                self.resume = resume.clone().or_else(|| self.resume.clone());
                if *ok {
                    self.final_answer = Some(answer.clone());
                } else {
                    self.final_error = Some(error.clone().unwrap_or_else(|| "unknown error".to_string()));
                }
            }
        }
    }

    /// Ordered, newest-first-bounded view of the actions to render. `max_actions` is
    /// clamped to the hard cap regardless of config.
    pub fn visible_actions(&self, max_actions: usize) -> Vec<&ActionState> {
        let cap = max_actions.min(HARD_CAP_MAX_ACTIONS).max(1);
        let start = self.order.len().saturating_sub(cap);
        self.order[start..].iter().filter_map(|id| self.actions.get(id)).collect()
    }

    pub fn resume_line(&self) -> Option<String> {
        self.resume.as_ref().map(|r| r.to_resume_line())
    }

    pub fn context_line(&self) -> String {
        format!("{} action{}", self.order.len(), if self.order.len() == 1 { "" } else { "s" })
    }
}

pub fn default_max_actions() -> usize {
    DEFAULT_MAX_ACTIONS
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Action;

    #[test]
    fn update_replaces_in_place_preserving_order() {
        let mut state = ProgressState::new("claude");
        let a1 = Action::new("1", ActionKind::Tool, "first");
        let a2 = Action::new("2", ActionKind::Tool, "second");
        state.apply(&Event::Action { action: a1, phase: ActionPhase::Started, ok: None });
        state.apply(&Event::Action { action: a2, phase: ActionPhase::Started, ok: None });

        let updated = Action::new("1", ActionKind::Tool, "first (updated)");
        state.apply(&Event::Action { action: updated, phase: ActionPhase::Completed, ok: Some(true) });

        let visible = state.visible_actions(10);
        assert_eq!(visible[0].action.id, "1");
        assert_eq!(visible[0].action.title, "first (updated)");
        assert_eq!(visible[0].display_phase, ActionPhase::Completed);
        assert_eq!(visible[1].action.id, "2");
    }

    #[test]
    fn turn_actions_are_ignored() {
        let mut state = ProgressState::new("claude");
        let turn = Action::new("t1", ActionKind::Turn, "turn");
        state.apply(&Event::Action { action: turn, phase: ActionPhase::Started, ok: None });
        assert!(state.visible_actions(10).is_empty());
    }

    #[test]
    fn visible_actions_bounded_by_max() {
        let mut state = ProgressState::new("claude");
        for i in 0..10 {
            let a = Action::new(i.to_string(), ActionKind::Tool, format!("action {}", i));
            state.apply(&Event::Action { action: a, phase: ActionPhase::Started, ok: None });
        }
        let visible = state.visible_actions(3);
        assert_eq!(visible.len(), 3);
        assert_eq!(visible[2].action.id, "9");
    }
}
