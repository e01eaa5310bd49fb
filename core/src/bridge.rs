//! Bridge/Dispatch: the seam between an IM channel and the Runner. Resolves which
//! engine to run, strips/extracts resume lines, injects the preamble, renders a
//! session's progress to an anchor message, and routes inline-keyboard taps to the
//! Plan-Mode Coordinator. Grounded on the teacher's `im/worker.rs` (busy-set, lazy
//! agent start) and the Python original's `telegram/commands/claude_control.py`
//! (callback_data parsing, toast-ack).

use std::path::PathBuf;
use std::sync::{Arc, Mutex, OnceLock};

use dashmap::DashMap;
use regex::Regex;
use tokio_util::sync::CancellationToken;

use crate::config::{self, Config};
use crate::coordinator;
use crate::cost::CostTracker;
use crate::editor::SessionEditor;
use crate::im::transport::ImTransport;
use crate::log::prefix;
use crate::model::{Event, ResumeToken};
use crate::persistence::overrides::ChatPrefsStore;
use crate::persistence::resume_store::ResumeStore;
use crate::progress::ProgressState;
use crate::registry::SessionCoordinator;
use crate::runner::{claude::ClaudeRunner, RunConfig, Runner};

fn resume_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b(\w+)\s+resume\s+(\S+)\b").unwrap())
}

/// Extract the last `<engine> resume <id>` occurrence (later one wins if the user
/// pasted more than one) and return the text with it stripped.
fn extract_resume_line(text: &str) -> (String, Option<ResumeToken>) {
    let re = resume_line_re();
    let Some(last) = re.find_iter(text).last() else {
        return (text.to_string(), None);
    };
    let caps = re.captures(last.as_str()).unwrap();
    let token = ResumeToken::new(caps[1].to_string(), caps[2].to_string());
    let mut stripped = String::with_capacity(text.len());
    stripped.push_str(&text[..last.start()]);
    stripped.push_str(&text[last.end()..]);
    (stripped.trim().to_string(), Some(token))
}

pub struct Bridge<T: ImTransport> {
    coord: SessionCoordinator,
    prefs: ChatPrefsStore,
    resume_store: Mutex<ResumeStore>,
    cost: CostTracker,
    editors: DashMap<String, SessionEditor>,
    busy: DashMap<String, CancellationToken>,
    transport: Arc<T>,
    runner: Arc<dyn Runner>,
}

impl<T: ImTransport + 'static> Bridge<T> {
    pub fn new(transport: Arc<T>, working_dir: PathBuf) -> Self {
        let resume_store = ResumeStore::open(&working_dir).expect("open resume store");
        Self {
            coord: SessionCoordinator::spawn(),
            prefs: ChatPrefsStore::new(working_dir.join("chat_prefs.json")),
            resume_store: Mutex::new(resume_store),
            cost: CostTracker::new(),
            editors: DashMap::new(),
            busy: DashMap::new(),
            transport,
            runner: Arc::new(ClaudeRunner),
        }
    }

    pub fn is_busy(&self, channel_id: &str) -> bool {
        self.busy.contains_key(channel_id)
    }

    /// The per-chat engine-override store, for channel front ends to drive commands
    /// (e.g. `/planmode`) that read or write a chat's override directly.
    pub fn chat_prefs(&self) -> &ChatPrefsStore {
        &self.prefs
    }

    /// Sweep stale session-registry entries. Called from the cron trigger tick.
    pub fn sweep_stale(&self) {
        self.coord.sweep_stale();
    }

    /// Cancel the in-flight run for a channel, if any. Returns true if something was
    /// actually running.
    pub fn cancel(&self, channel_id: &str) -> bool {
        if let Some((_, token)) = self.busy.remove(channel_id) {
            token.cancel();
            true
        } else {
            false
        }
    }

    pub async fn handle_message(self: &Arc<Self>, channel_id: String, chat_id: String, owner_id: String, text: String) {
        if self.is_busy(&channel_id) {
            let _ = self.transport.send(&channel_id, "Please wait for the current task to finish.").await;
            return;
        }

        let config = config::ensure_loaded();
        if self.cost.is_blocked(&chat_id, &config.cost_budget) {
            let _ = self.transport.send(&channel_id, "Daily cost budget exceeded — try again tomorrow.").await;
            return;
        }

        let (stripped_text, explicit_resume) = extract_resume_line(&text);
        let chat_prefs = self.prefs.get(&chat_id);
        let engine = chat_prefs.engine.clone().unwrap_or_else(|| config.default_engine.clone());

        let resume = explicit_resume.or_else(|| {
            self.resume_store
                .lock()
                .unwrap()
                .get(&chat_id, &owner_id, &engine)
                .ok()
                .flatten()
                .map(|value| ResumeToken::new(engine.clone(), value))
        });

        let prompt = build_prompt(&stripped_text, config, &chat_prefs);
        let engine_cfg = {
            let mut cfg = config.engine(&engine);
            if let Some(mode) = &chat_prefs.permission_mode {
                cfg.permission_mode = Some(mode.clone());
            }
            cfg
        };
        let run_config = RunConfig::from_engine(&engine, &engine_cfg, config.working_dir.clone());

        let cancel = CancellationToken::new();
        self.busy.insert(channel_id.clone(), cancel.clone());

        let bridge = Arc::clone(self);
        tokio::spawn(async move {
            bridge.run_session(channel_id, chat_id, owner_id, engine, prompt, resume, run_config, cancel).await;
        });
    }

    async fn run_session(
        self: Arc<Self>,
        channel_id: String,
        chat_id: String,
        owner_id: String,
        engine: String,
        prompt: String,
        resume: Option<ResumeToken>,
        run_config: RunConfig,
        cancel: CancellationToken,
    ) {
        let config = config::ensure_loaded();
        let editor = self
            .editors
            .entry(channel_id.clone())
            .or_insert_with(|| SessionEditor::spawn(Arc::clone(&self.transport), channel_id.clone(), config.overflow_policy))
            .clone();

        let mut progress = ProgressState::new(&engine);
        let mut rx = self.runner.run(prompt, resume, run_config, self.coord.clone(), cancel.clone()).await;

        while let Some(event) = rx.recv().await {
            progress.apply(&event);
            let keyboard = match &event {
                Event::Action { action, .. } => action.detail.get("inline_keyboard").and_then(extract_keyboard),
                _ => None,
            };
            let mut rendered = render(&progress, config.max_actions);

            if let Event::Completed { resume, usage, .. } = &event {
                if let Some(r) = resume {
                    let _ = self.resume_store.lock().unwrap().set(&chat_id, &owner_id, &engine, &r.value);
                }
                if let Some(cost) = usage.as_ref().and_then(|u| u.get("total_cost_usd")).and_then(|v| v.as_f64()) {
                    if let crate::cost::BudgetCheck::Warn { pct_used } = self.cost.record(&chat_id, cost, &config.cost_budget) {
                        eprintln!("{} chat_id={} event=cost_budget_warning pct_used={:.2}", prefix("bridge"), chat_id, pct_used);
                        rendered.push_str(&format!("\n\n⚠ {:.0}% of daily cost budget used.", pct_used * 100.0));
                    }
                }
            }

            editor.update(rendered, keyboard);
        }

        self.busy.remove(&channel_id);
    }

    pub async fn handle_callback(&self, channel_id: String, callback_query_id: String, data: String) {
        let Some(rest) = data.strip_prefix("claude_control:") else {
            eprintln!("{} event=unrecognized_callback data={}", prefix("bridge"), data);
            return;
        };
        let Some((action, target)) = rest.split_once(':') else {
            return;
        };

        let toast = if let Some(session_id) = target.strip_prefix("da:") {
            match action {
                "approve" => {
                    coordinator::on_synthetic_approve(&self.coord, session_id).await;
                    "Plan approved"
                }
                "deny" => {
                    coordinator::on_synthetic_deny(&self.coord, session_id).await;
                    "Plan denied"
                }
                _ => "Unknown action",
            }
        } else {
            let request_id = target;
            match action {
                "approve" => match coordinator::on_approve(&self.coord, request_id).await {
                    coordinator::ButtonOutcome::Sent => "Approved",
                    coordinator::ButtonOutcome::Gone => "This request is no longer active",
                },
                "deny" => match coordinator::on_deny(&self.coord, request_id).await {
                    coordinator::ButtonOutcome::Sent => "Denied",
                    coordinator::ButtonOutcome::Gone => "This request is no longer active",
                },
                "discuss" => match coordinator::on_pause_and_outline(&self.coord, request_id).await {
                    coordinator::ButtonOutcome::Sent => "Paused — write the outline now",
                    coordinator::ButtonOutcome::Gone => "This request is no longer active",
                },
                _ => "Unknown action",
            }
        };

        let _ = self.transport.answer_callback_query(&callback_query_id, Some(toast)).await;
        let _ = channel_id;
    }
}

fn build_prompt(text: &str, config: &Config, _chat_prefs: &crate::persistence::overrides::ChatPrefs) -> String {
    if config.preamble.enabled {
        if let Some(preamble) = &config.preamble.text {
            return format!("{}\n\n{}", preamble, text);
        }
    }
    text.to_string()
}

fn extract_keyboard(value: &serde_json::Value) -> Option<crate::im::transport::Keyboard> {
    let rows = value.get("buttons")?.as_array()?;
    let mut keyboard = Vec::with_capacity(rows.len());
    for row in rows {
        let row = row.as_array()?;
        let mut buttons = Vec::with_capacity(row.len());
        for button in row {
            let text = button.get("text")?.as_str()?.to_string();
            let callback_data = button.get("callback_data")?.as_str()?.to_string();
            buttons.push(crate::im::transport::KeyboardButton { text, callback_data });
        }
        keyboard.push(buttons);
    }
    Some(keyboard)
}

fn render(progress: &ProgressState, max_actions: usize) -> String {
    let mut out = format!("Started: {}\n", progress.title);
    for state in progress.visible_actions(max_actions) {
        let marker = match state.display_phase {
            crate::model::ActionPhase::Completed => match state.ok {
                Some(true) => "✓",
                Some(false) => "✗",
                None => "·",
            },
            _ => "…",
        };
        out.push_str(&format!("{} {}\n", marker, state.action.title));
    }
    if let Some(answer) = &progress.final_answer {
        out.push_str(&format!("\n{}\n", answer));
    }
    if let Some(error) = &progress.final_error {
        out.push_str(&format!("\nError: {}\n", error));
    }
    out.push_str(&format!("\n{}", progress.context_line()));
    if let Some(line) = progress.resume_line() {
        out.push('\n');
        out.push_str(&line);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_resume_line_wins_and_is_stripped() {
        let text = "claude resume old-id\nplease continue\nclaude resume new-id";
        let (stripped, token) = extract_resume_line(text);
        assert_eq!(token.unwrap().value, "new-id");
        assert!(!stripped.contains("resume"));
        assert!(stripped.contains("please continue"));
    }

    #[test]
    fn no_resume_line_leaves_text_untouched() {
        let (stripped, token) = extract_resume_line("just a prompt");
        assert_eq!(stripped, "just a prompt");
        assert!(token.is_none());
    }
}
