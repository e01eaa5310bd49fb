//! Plan-Mode Coordinator: the high-level operations a Bridge callback handler calls
//! when a user taps an inline-keyboard button. Sits on top of `SessionCoordinator`
//! (storage) and `translator` (wire encoding); owns no state of its own. Grounded on
//! the Python original's `planmode.py` button handlers.

use crate::registry::SessionCoordinator;
use crate::translator::build_response_line;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ButtonOutcome {
    /// Control response written to the session's stdin.
    Sent,
    /// Request id was unknown or its session had already gone away.
    Gone,
}

/// User tapped "Approve" on an interactive ExitPlanMode/AskUserQuestion request.
pub async fn on_approve(coord: &SessionCoordinator, request_id: &str) -> ButtonOutcome {
    let input = coord.take_input(request_id).await;
    let line = build_response_line(request_id, true, input.as_ref(), None);
    send(coord, request_id, line).await
}

/// User tapped "Deny".
pub async fn on_deny(coord: &SessionCoordinator, request_id: &str) -> ButtonOutcome {
    let _ = coord.take_input(request_id).await;
    let line = build_response_line(request_id, false, None, None);
    send(coord, request_id, line).await
}

/// User tapped "Pause & Outline Plan": start (or escalate) the discuss cooldown and
/// deny the current request so the model is told to produce an outline first.
pub async fn on_pause_and_outline(coord: &SessionCoordinator, request_id: &str) -> ButtonOutcome {
    let Some(session_id) = coord.session_for_request(request_id).await else {
        return ButtonOutcome::Gone;
    };
    coord.set_cooldown(&session_id).await;
    let line = build_response_line(request_id, false, None, Some("Paused — outline the plan in plain text first."));
    send(coord, request_id, line).await
}

/// User tapped the synthetic "Approve Plan" button rendered after an outline
/// (`da:{session_id}` — never routes through stdin directly, just flips the
/// discuss-approved flag so the next ExitPlanMode control_request sails through).
pub async fn on_synthetic_approve(coord: &SessionCoordinator, session_id: &str) {
    coord.insert_discuss_approved(session_id);
}

/// User tapped the synthetic "Deny" button after an outline: clear pending state so
/// the cooldown math starts fresh next time.
pub async fn on_synthetic_deny(coord: &SessionCoordinator, session_id: &str) {
    coord.remove_outline_pending(session_id);
    coord.clear_cooldown(session_id);
}

async fn send(coord: &SessionCoordinator, request_id: &str, line: String) -> ButtonOutcome {
    match coord.send_control_response(request_id, line).await {
        Ok(()) => ButtonOutcome::Sent,
        Err(_) => ButtonOutcome::Gone,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn synthetic_approve_sets_discuss_approved_flag() {
        let coord = SessionCoordinator::spawn();
        on_synthetic_approve(&coord, "sess-1").await;
        assert!(coord.is_discuss_approved("sess-1").await);
    }

    #[tokio::test]
    async fn approve_on_gone_request_reports_gone() {
        let coord = SessionCoordinator::spawn();
        let outcome = on_approve(&coord, "never-registered").await;
        assert_eq!(outcome, ButtonOutcome::Gone);
    }

    #[tokio::test]
    async fn approve_on_live_request_sends_to_stdin() {
        let coord = SessionCoordinator::spawn();
        let (stdin_tx, mut stdin_rx) = tokio::sync::mpsc::unbounded_channel::<String>();
        coord.register_session("s1".into(), stdin_tx);
        coord.register_request("r1".into(), "s1".into(), json!({"a": 1}));
        let outcome = on_approve(&coord, "r1").await;
        assert_eq!(outcome, ButtonOutcome::Sent);
        assert!(stdin_rx.try_recv().is_ok());
    }
}
