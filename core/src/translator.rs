//! Event Translator + Control Protocol: maps one decoded stdout line from the Claude
//! Code CLI onto the canonical `Event` stream, and classifies `control_request`
//! lines into auto-approve / auto-deny / interactive. Grounded on the teacher's
//! `agent/claude_sdk.rs` (`parse_content_blocks`, `handle_control_request`) and the
//! Python original's `translate_claude_event()` classification cascade.

use serde_json::{json, Value};

use crate::model::{Action, ActionKind, ActionPhase, Event, ResumeToken, StreamState, OUTLINE_EMBED_MAX_CHARS, OUTLINE_MIN_CHARS};
use crate::registry::{CooldownStatus, SessionCoordinator};

const TOOLS_REQUIRING_INTERACTION: &[&str] = &["ExitPlanMode", "AskUserQuestion"];

pub const DISCUSS_ESCALATION_MESSAGE_PREFIX: &str =
    "Paused to let you review. The plan will be asked again in";
pub const OUTLINE_WAIT_MESSAGE: &str =
    "Plan outlined above — use the buttons to approve or deny before continuing.";

/// Build the plain "User denied" / custom deny text used on the wire.
fn default_deny_message() -> &'static str {
    "User denied"
}

fn tool_use_action(id: &str, name: &str, input: &Value) -> Action {
    Action::new(id, ActionKind::Tool, name).with_detail("input", input.clone())
}

fn control_response_line(request_id: &str, approve: bool, input: Option<&Value>, deny_message: Option<&str>) -> String {
    let inner = if approve {
        json!({
            "behavior": "allow",
            "updatedInput": input.cloned().unwrap_or(Value::Null),
        })
    } else {
        json!({
            "behavior": "deny",
            "message": deny_message.unwrap_or_else(default_deny_message),
        })
    };
    json!({
        "type": "control_response",
        "response": { "subtype": "success", "request_id": request_id, "response": inner },
    })
    .to_string()
}

/// Inline-keyboard button: `{text, callback_data}`.
fn button(text: &str, callback_data: String) -> Value {
    json!({ "text": text, "callback_data": callback_data })
}

fn discuss_escalation_message(window_secs: u64) -> String {
    format!("{} {}s.", DISCUSS_ESCALATION_MESSAGE_PREFIX, window_secs)
}

/// Pure-ish mapping + classification for one decoded stdout line. Mutates `state`
/// and may talk to the coordinator for cooldown/approval lookups (control_request
/// handling needs those); everything else is a pure function of `state`.
pub async fn translate_claude_event(
    line: &Value,
    engine: &str,
    state: &mut StreamState,
    coord: &SessionCoordinator,
) -> Vec<Event> {
    let msg_type = line.get("type").and_then(Value::as_str).unwrap_or("");
    match msg_type {
        "system" => translate_system_init(line, engine, state),
        "assistant" => translate_assistant(line, state, coord).await,
        "user" => translate_tool_result(line, state),
        "result" => translate_result(line, engine, state),
        "control_request" => translate_control_request(line, state, coord).await,
        _ => Vec::new(),
    }
}

fn translate_system_init(line: &Value, engine: &str, state: &mut StreamState) -> Vec<Event> {
    let session_id = line.get("session_id").and_then(Value::as_str).map(str::to_string);
    if let Some(ref sid) = session_id {
        state.session_id = Some(sid.clone());
    }
    let resume = state.best_resume(engine);
    vec![Event::Started {
        engine: engine.to_string(),
        resume,
        title: engine.to_string(),
        meta: Default::default(),
    }]
}

async fn translate_assistant(line: &Value, state: &mut StreamState, coord: &SessionCoordinator) -> Vec<Event> {
    let mut events = Vec::new();
    let Some(blocks) = line.pointer("/message/content").and_then(Value::as_array) else {
        return events;
    };
    for block in blocks {
        let bt = block.get("type").and_then(Value::as_str).unwrap_or("");
        match bt {
            "tool_use" => {
                let id = block.get("id").and_then(Value::as_str).unwrap_or("tool_0").to_string();
                let name = block.get("name").and_then(Value::as_str).unwrap_or("unknown").to_string();
                let input = block.get("input").cloned().unwrap_or(Value::Null);
                let action = tool_use_action(&id, &name, &input);
                state.pending_actions.insert(id.clone(), action.clone());
                state.last_tool_use_id = Some(id);
                events.push(Event::Action { action, phase: ActionPhase::Started, ok: None });
            }
            "thinking" => {
                if let Some(text) = block.get("thinking").and_then(Value::as_str) {
                    if !text.trim().is_empty() {
                        state.note_seq += 1;
                        let action = Action::new(format!("note-{}", state.note_seq), ActionKind::Note, "thinking");
                        events.push(Event::Action { action, phase: ActionPhase::Completed, ok: Some(true) });
                    }
                }
            }
            "text" => {
                if let Some(text) = block.get("text").and_then(Value::as_str) {
                    state.last_assistant_text = Some(text.to_string());
                    let session_id = state.session_id.clone().unwrap_or_default();
                    if coord.is_outline_pending(&session_id).await {
                        state.max_text_len_since_cooldown = state.max_text_len_since_cooldown.max(text.chars().count());
                        if text.chars().count() >= OUTLINE_MIN_CHARS {
                            state.outline_text = Some(text.to_string());
                        }
                    }
                }
            }
            _ => {}
        }
    }
    events
}

fn translate_tool_result(line: &Value, state: &mut StreamState) -> Vec<Event> {
    let mut events = Vec::new();
    let Some(blocks) = line.pointer("/message/content").and_then(Value::as_array) else {
        return events;
    };
    for block in blocks {
        if block.get("type").and_then(Value::as_str) != Some("tool_result") {
            continue;
        }
        let tool_use_id = block.get("tool_use_id").and_then(Value::as_str).unwrap_or("").to_string();
        let is_error = block.get("is_error").and_then(Value::as_bool).unwrap_or(false);
        let ok = Some(!is_error);

        let action = state.pending_actions.remove(&tool_use_id).unwrap_or_else(|| {
            Action::new(tool_use_id.clone(), ActionKind::Tool, "tool result")
        });
        events.push(Event::Action { action, phase: ActionPhase::Completed, ok });

        if let Some(warning_action_id) = state.control_action_for_tool.remove(&tool_use_id) {
            let warning = Action::new(warning_action_id, ActionKind::Warning, "permission request");
            events.push(Event::Action { action: warning, phase: ActionPhase::Completed, ok });
        }
    }
    events
}

fn translate_result(line: &Value, engine: &str, state: &mut StreamState) -> Vec<Event> {
    let is_error = line.get("is_error").and_then(Value::as_bool).unwrap_or(false);
    let answer = line
        .get("result")
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| state.last_assistant_text.clone())
        .unwrap_or_default();
    if let Some(sid) = line.get("session_id").and_then(Value::as_str) {
        state.session_id = Some(sid.to_string());
    }
    let resume = state.best_resume(engine);
    let usage = line.get("usage").cloned();
    vec![Event::Completed { ok: !is_error, answer, resume, error: if is_error { Some("result reported error".into()) } else { None }, usage }]
}

/// Control-request classification cascade (spec §4.3, in the exact rule order).
async fn translate_control_request(line: &Value, state: &mut StreamState, coord: &SessionCoordinator) -> Vec<Event> {
    let request_id = line.get("request_id").and_then(Value::as_str).unwrap_or("").to_string();
    let subtype = line.pointer("/request/subtype").and_then(Value::as_str).unwrap_or("");
    let session_id = state.session_id.clone().unwrap_or_default();

    // Rule 1: unconditional auto-approve subtypes.
    if matches!(subtype, "initialize" | "hook_callback" | "mcp_message" | "rewind_files" | "interrupt") {
        state.auto_approve_queue.push(request_id);
        return Vec::new();
    }

    if subtype != "can_use_tool" {
        // Unknown subtype: approve rather than block the agent indefinitely.
        state.auto_approve_queue.push(request_id);
        return Vec::new();
    }

    let tool_name = line.pointer("/request/tool_name").and_then(Value::as_str).unwrap_or("");
    let tool_input = line.pointer("/request/input").cloned().unwrap_or(Value::Null);

    // Rule 2: any tool outside the interactive set is auto-approved.
    if !TOOLS_REQUIRING_INTERACTION.contains(&tool_name) {
        state.auto_approve_queue.push(request_id);
        return Vec::new();
    }

    // Rule 3: ExitPlanMode while running in "auto" permission mode.
    if tool_name == "ExitPlanMode" && state.auto_approve_exit_plan_mode {
        state.auto_approve_queue.push(request_id);
        return Vec::new();
    }

    if tool_name == "ExitPlanMode" {
        // Rule 4: already discuss-approved.
        if coord.is_discuss_approved(&session_id).await {
            coord.remove_discuss_approved(&session_id);
            coord.clear_cooldown(&session_id);
            state.auto_approve_queue.push(request_id);
            return Vec::new();
        }

        // Rule 5: inside an active discuss cooldown — branch on outline detection.
        // An expired cooldown does NOT take the bypass (spec §4.7): the click count
        // is preserved for the next `set_cooldown` escalation, but the request falls
        // through to rule 6's interactive keyboard.
        let cooldown_status = coord.check_cooldown(&session_id).await;
        if let CooldownStatus::Active { window_secs } = cooldown_status {
            let outline_detected = state.max_text_len_since_cooldown >= OUTLINE_MIN_CHARS;
            let deny_message = if outline_detected {
                OUTLINE_WAIT_MESSAGE.to_string()
            } else {
                discuss_escalation_message(window_secs)
            };
            state.auto_deny_queue.push((request_id, deny_message));
            state.max_text_len_since_cooldown = 0;
            coord.remove_outline_pending(&session_id);

            let mut title = "Plan outlined — approve to proceed".to_string();
            if outline_detected {
                if let Some(outline) = state.outline_text.take() {
                    let truncated: String = outline.chars().take(OUTLINE_EMBED_MAX_CHARS).collect();
                    let ellipsis = if outline.chars().count() > OUTLINE_EMBED_MAX_CHARS { "…" } else { "" };
                    title = format!("Plan outline:\n{}{}", truncated, ellipsis);
                }
            }

            let keyboard = json!({ "buttons": [[
                button("Approve Plan", format!("claude_control:approve:da:{}", session_id)),
                button("Deny", format!("claude_control:deny:da:{}", session_id)),
            ]] });
            let action = Action::new(format!("da-warning-{}", session_id), ActionKind::Warning, title)
                .with_detail("request_type", json!("DiscussApproval"))
                .with_detail("inline_keyboard", keyboard);
            return vec![Event::Action { action, phase: ActionPhase::Started, ok: None }];
        }

        // Rule 6: interactive ExitPlanMode (no bypass applies).
        coord.register_request(request_id.clone(), session_id.clone(), tool_input);
        let action_id = format!("warning-{}", request_id);
        if let Some(tool_use_id) = state.last_tool_use_id.clone() {
            state.control_action_for_tool.insert(tool_use_id, action_id.clone());
        }
        let keyboard = json!({ "buttons": [
            [button("Approve", format!("claude_control:approve:{}", request_id)), button("Deny", format!("claude_control:deny:{}", request_id))],
            [button("Pause & Outline Plan", format!("claude_control:discuss:{}", request_id))],
        ] });
        let action = Action::new(action_id, ActionKind::Warning, "Exit plan mode?")
            .with_detail("inline_keyboard", keyboard);
        return vec![Event::Action { action, phase: ActionPhase::Started, ok: None }];
    }

    // AskUserQuestion: always interactive (no bypass defined for it).
    coord.register_request(request_id.clone(), session_id.clone(), tool_input.clone());
    let question = tool_input.get("question").and_then(Value::as_str).unwrap_or("").to_string();
    coord.register_ask_question(&request_id, &question);
    let action_id = format!("warning-{}", request_id);
    if let Some(tool_use_id) = state.last_tool_use_id.clone() {
        state.control_action_for_tool.insert(tool_use_id, action_id.clone());
    }
    let keyboard = json!({ "buttons": [[
        button("Approve", format!("claude_control:approve:{}", request_id)),
        button("Deny", format!("claude_control:deny:{}", request_id)),
    ]] });
    let action = Action::new(action_id, ActionKind::Warning, question)
        .with_detail("inline_keyboard", keyboard);
    vec![Event::Action { action, phase: ActionPhase::Started, ok: None }]
}

/// Build the stdin line for an approve/deny decision. Used both for queued
/// auto-approve/deny (Runner flushes these itself) and for interactive decisions
/// resolved later through the registry.
pub fn build_response_line(request_id: &str, approve: bool, input: Option<&Value>, deny_message: Option<&str>) -> String {
    control_response_line(request_id, approve, input, deny_message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ActionKind;

    fn init_line(session_id: &str) -> Value {
        json!({ "type": "system", "subtype": "init", "session_id": session_id })
    }

    #[tokio::test]
    async fn bash_tool_auto_approved_without_warning() {
        let coord = SessionCoordinator::spawn();
        let mut state = StreamState::new(None);
        translate_claude_event(&init_line("S1"), "claude", &mut state, &coord).await;

        let tool_use = json!({
            "type": "assistant",
            "message": { "content": [{ "type": "tool_use", "id": "T1", "name": "Bash", "input": { "cmd": "ls" } }] }
        });
        let events = translate_claude_event(&tool_use, "claude", &mut state, &coord).await;
        assert_eq!(events.len(), 1);

        let req = json!({
            "type": "control_request",
            "request_id": "R1",
            "request": { "subtype": "can_use_tool", "tool_name": "Bash", "input": { "cmd": "ls" } }
        });
        let events = translate_claude_event(&req, "claude", &mut state, &coord).await;
        assert!(events.is_empty());
        assert_eq!(state.auto_approve_queue, vec!["R1".to_string()]);
    }

    #[tokio::test]
    async fn exit_plan_mode_requires_interaction_by_default() {
        let coord = SessionCoordinator::spawn();
        let mut state = StreamState::new(None);
        translate_claude_event(&init_line("S2"), "claude", &mut state, &coord).await;

        let req = json!({
            "type": "control_request",
            "request_id": "R2",
            "request": { "subtype": "can_use_tool", "tool_name": "ExitPlanMode", "input": {} }
        });
        let events = translate_claude_event(&req, "claude", &mut state, &coord).await;
        assert_eq!(events.len(), 1);
        if let Event::Action { action, .. } = &events[0] {
            assert_eq!(action.kind, ActionKind::Warning);
        } else {
            panic!("expected an action event");
        }
        assert!(state.auto_approve_queue.is_empty());
        assert!(state.auto_deny_queue.is_empty());
    }

    #[tokio::test]
    async fn outline_199_chars_does_not_bypass_200_does() {
        let coord = SessionCoordinator::spawn();
        let mut state = StreamState::new(None);
        translate_claude_event(&init_line("S3"), "claude", &mut state, &coord).await;
        coord.set_cooldown("S3").await;
        coord.insert_outline_pending("S3");

        let short_text = json!({ "type": "assistant", "message": { "content": [{ "type": "text", "text": "a".repeat(199) }] } });
        translate_claude_event(&short_text, "claude", &mut state, &coord).await;
        assert!(state.outline_text.is_none());

        let long_text = json!({ "type": "assistant", "message": { "content": [{ "type": "text", "text": "a".repeat(200) }] } });
        translate_claude_event(&long_text, "claude", &mut state, &coord).await;
        assert!(state.outline_text.is_some());
    }
}
