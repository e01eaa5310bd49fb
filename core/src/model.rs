//! Canonical data model shared by the Runner, Translator, Coordinator, and Bridge.
//! These types are vendor-agnostic: the Translator's whole job is mapping a specific
//! agent's wire format onto this shape.

use std::collections::HashMap;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Opaque resume handle. `value` is the vendor's own session identifier; this crate
/// never interprets it beyond passing it back on the next `--resume`-style invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeToken {
    pub engine: String,
    pub value: String,
}

impl ResumeToken {
    pub fn new(engine: impl Into<String>, value: impl Into<String>) -> Self {
        Self { engine: engine.into(), value: value.into() }
    }

    /// Render as the "<engine> resume <id>" line the Bridge recognizes on re-entry.
    pub fn to_resume_line(&self) -> String {
        format!("{} resume {}", self.engine, self.value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Command,
    FileChange,
    Tool,
    WebSearch,
    Subagent,
    Note,
    Warning,
    Turn,
}

/// A unit of agent-visible work. Identity is `id`; an action is started at most once
/// and completed at most once — the Translator and Progress Tracker both rely on this.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub id: String,
    pub kind: ActionKind,
    pub title: String,
    #[serde(default)]
    pub detail: HashMap<String, Value>,
}

impl Action {
    pub fn new(id: impl Into<String>, kind: ActionKind, title: impl Into<String>) -> Self {
        Self { id: id.into(), kind, title: title.into(), detail: HashMap::new() }
    }

    pub fn with_detail(mut self, key: &str, value: Value) -> Self {
        self.detail.insert(key.to_string(), value);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionPhase {
    Started,
    Updated,
    Completed,
}

/// Canonical output of the Event Translator. Every session produces
/// `StartedEvent ≺ 0..n ActionEvent ≺ CompletedEvent` in stream order.
#[derive(Debug, Clone)]
pub enum Event {
    Started {
        engine: String,
        resume: Option<ResumeToken>,
        title: String,
        meta: HashMap<String, Value>,
    },
    Action {
        action: Action,
        phase: ActionPhase,
        ok: Option<bool>,
    },
    Completed {
        ok: bool,
        answer: String,
        resume: Option<ResumeToken>,
        error: Option<String>,
        usage: Option<Value>,
    },
}

impl Event {
    pub fn completed_ok(answer: impl Into<String>, resume: Option<ResumeToken>) -> Self {
        Event::Completed { ok: true, answer: answer.into(), resume, error: None, usage: None }
    }

    pub fn completed_err(error: impl Into<String>, resume: Option<ResumeToken>) -> Self {
        Event::Completed { ok: false, answer: String::new(), resume, error: Some(error.into()), usage: None }
    }
}

/// Per-session, Runner-owned mutable state. Never shared across sessions or read by
/// anything outside the Runner's own stream loop and the Translator it calls into.
#[derive(Debug, Default)]
pub struct StreamState {
    pub pending_actions: HashMap<String, Action>,
    pub last_assistant_text: Option<String>,
    pub last_tool_use_id: Option<String>,
    pub auto_approve_queue: Vec<String>,
    pub auto_deny_queue: Vec<(String, String)>,
    pub control_action_for_tool: HashMap<String, String>,
    pub pending_control_requests: HashMap<String, (Value, Instant)>,
    pub resumed: bool,
    pub auto_approve_exit_plan_mode: bool,
    pub outline_text: Option<String>,
    pub max_text_len_since_cooldown: usize,
    pub note_seq: u64,
    pub session_id: Option<String>,
    pub initial_resume: Option<ResumeToken>,
}

impl StreamState {
    pub fn new(initial_resume: Option<ResumeToken>) -> Self {
        Self { resumed: initial_resume.is_some(), initial_resume, ..Default::default() }
    }

    /// Best resume token known so far: a session-id found on the stream beats the
    /// token this run was invoked with.
    pub fn best_resume(&self, engine: &str) -> Option<ResumeToken> {
        self.session_id
            .as_ref()
            .map(|s| ResumeToken::new(engine, s.clone()))
            .or_else(|| self.initial_resume.clone())
    }
}

/// Outline-length threshold (chars) at which a plan outline is considered "written"
/// for the purposes of the cooldown bypass (spec §4.7 / §8).
pub const OUTLINE_MIN_CHARS: usize = 200;
/// Embedded-outline truncation budget (chars) when the synthetic warning quotes it.
pub const OUTLINE_EMBED_MAX_CHARS: usize = 1500;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resume_line_round_trips() {
        let t = ResumeToken::new("claude", "abc-123");
        assert_eq!(t.to_resume_line(), "claude resume abc-123");
    }

    #[test]
    fn best_resume_prefers_session_id_over_initial() {
        let mut state = StreamState::new(Some(ResumeToken::new("claude", "old")));
        assert_eq!(state.best_resume("claude").unwrap().value, "old");
        state.session_id = Some("new".to_string());
        assert_eq!(state.best_resume("claude").unwrap().value, "new");
    }
}
