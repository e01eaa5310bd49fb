//! SessionCoordinator: a single actor task owning every process-wide registry from
//! spec §3. All access goes through message-passing so registries are never touched
//! from two tasks at once — the §9 "preferred design" over one-mutex-per-registry.
//! Grounded on the teacher's `dashmap`-backed `Registry` in `session.rs`, generalized
//! from a single map to the full set of session/request registries, and on the
//! Python original's module-level dicts in `runners/claude.py`.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::log::prefix;

const HANDLED_REQUESTS_CAP: usize = 100;
const STALE_SESSION_SECS: u64 = 3600;

/// One queued auto-approve/deny line already formatted as a control_response; kept
/// here only transiently while an interactive request waits on the registry to
/// resolve it to a session/stdin.
#[derive(Debug, Clone)]
pub enum Decision {
    Approve,
    Deny { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendControlError {
    NotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CooldownStatus {
    /// No cooldown on record for this session.
    Clear,
    /// Cooldown window active; escalation message should quote `window_secs`.
    Active { window_secs: u64 },
    /// Window elapsed, but the click-count is preserved for the next escalation.
    Expired,
}

struct RunnerEntry {
    stdin_tx: mpsc::UnboundedSender<String>,
    registered_at: Instant,
}

#[derive(Default)]
struct Registries {
    active_runners: HashMap<String, RunnerEntry>,
    request_to_session: HashMap<String, String>,
    request_to_input: HashMap<String, Value>,
    handled_requests: HashSet<String>,
    handled_order: VecDeque<String>,
    discuss_cooldown: HashMap<String, (Instant, u32)>,
    discuss_approved: HashSet<String>,
    outline_pending: HashSet<String>,
    pending_ask_requests: HashMap<String, String>,
}

enum Cmd {
    RegisterSession { session_id: String, stdin_tx: mpsc::UnboundedSender<String> },
    UnregisterSession { session_id: String },
    RegisterRequest { request_id: String, session_id: String, input: Value },
    TakeInput { request_id: String, reply: oneshot::Sender<Option<Value>> },
    SessionForRequest { request_id: String, reply: oneshot::Sender<Option<String>> },
    SendControlResponse { request_id: String, line: String, reply: oneshot::Sender<Result<(), SendControlError>> },
    SweepStale,
    SetCooldown { session_id: String, reply: oneshot::Sender<u64> },
    CheckCooldown { session_id: String, reply: oneshot::Sender<CooldownStatus> },
    ClearCooldown { session_id: String },
    InsertOutlinePending { session_id: String },
    RemoveOutlinePending { session_id: String },
    IsOutlinePending { session_id: String, reply: oneshot::Sender<bool> },
    InsertDiscussApproved { session_id: String },
    IsDiscussApproved { session_id: String, reply: oneshot::Sender<bool> },
    RemoveDiscussApproved { session_id: String },
    RegisterAskQuestion { request_id: String, question: String },
    TakeAskQuestion { request_id: String, reply: oneshot::Sender<Option<String>> },
}

/// Cloneable handle to the coordinator actor. Cheap to clone (wraps an mpsc sender).
#[derive(Clone)]
pub struct SessionCoordinator {
    tx: mpsc::UnboundedSender<Cmd>,
}

impl SessionCoordinator {
    pub fn spawn() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Cmd>();
        tokio::spawn(async move {
            let mut reg = Registries::default();
            while let Some(cmd) = rx.recv().await {
                handle_cmd(&mut reg, cmd);
            }
        });
        Self { tx }
    }

    pub fn register_session(&self, session_id: String, stdin_tx: mpsc::UnboundedSender<String>) {
        let _ = self.tx.send(Cmd::RegisterSession { session_id, stdin_tx });
    }

    pub fn unregister_session(&self, session_id: String) {
        let _ = self.tx.send(Cmd::UnregisterSession { session_id });
    }

    pub fn register_request(&self, request_id: String, session_id: String, input: Value) {
        let _ = self.tx.send(Cmd::RegisterRequest { request_id, session_id, input });
    }

    /// Pop the original tool input for an "allow" response. Consumes the entry.
    pub async fn take_input(&self, request_id: &str) -> Option<Value> {
        let (reply, rx) = oneshot::channel();
        let _ = self.tx.send(Cmd::TakeInput { request_id: request_id.to_string(), reply });
        rx.await.ok().flatten()
    }

    /// Look up the session a pending request belongs to, without consuming it.
    pub async fn session_for_request(&self, request_id: &str) -> Option<String> {
        let (reply, rx) = oneshot::channel();
        let _ = self.tx.send(Cmd::SessionForRequest { request_id: request_id.to_string(), reply });
        rx.await.ok().flatten()
    }

    /// Resolve `request_id` to its session's stdin and write `line`. Idempotent on
    /// duplicate delivery (returns Ok without writing again).
    pub async fn send_control_response(&self, request_id: &str, line: String) -> Result<(), SendControlError> {
        let (reply, rx) = oneshot::channel();
        let _ = self.tx.send(Cmd::SendControlResponse { request_id: request_id.to_string(), line, reply });
        rx.await.unwrap_or(Err(SendControlError::NotFound))
    }

    pub fn sweep_stale(&self) {
        let _ = self.tx.send(Cmd::SweepStale);
    }

    /// Record a "Pause & Outline Plan" click; returns the new cooldown window in seconds.
    pub async fn set_cooldown(&self, session_id: &str) -> u64 {
        let (reply, rx) = oneshot::channel();
        let _ = self.tx.send(Cmd::SetCooldown { session_id: session_id.to_string(), reply });
        rx.await.unwrap_or(30)
    }

    pub async fn check_cooldown(&self, session_id: &str) -> CooldownStatus {
        let (reply, rx) = oneshot::channel();
        let _ = self.tx.send(Cmd::CheckCooldown { session_id: session_id.to_string(), reply });
        rx.await.unwrap_or(CooldownStatus::Clear)
    }

    pub fn clear_cooldown(&self, session_id: &str) {
        let _ = self.tx.send(Cmd::ClearCooldown { session_id: session_id.to_string() });
    }

    pub fn insert_outline_pending(&self, session_id: &str) {
        let _ = self.tx.send(Cmd::InsertOutlinePending { session_id: session_id.to_string() });
    }

    pub fn remove_outline_pending(&self, session_id: &str) {
        let _ = self.tx.send(Cmd::RemoveOutlinePending { session_id: session_id.to_string() });
    }

    pub async fn is_outline_pending(&self, session_id: &str) -> bool {
        let (reply, rx) = oneshot::channel();
        let _ = self.tx.send(Cmd::IsOutlinePending { session_id: session_id.to_string(), reply });
        rx.await.unwrap_or(false)
    }

    pub fn insert_discuss_approved(&self, session_id: &str) {
        let _ = self.tx.send(Cmd::InsertDiscussApproved { session_id: session_id.to_string() });
    }

    pub async fn is_discuss_approved(&self, session_id: &str) -> bool {
        let (reply, rx) = oneshot::channel();
        let _ = self.tx.send(Cmd::IsDiscussApproved { session_id: session_id.to_string(), reply });
        rx.await.unwrap_or(false)
    }

    pub fn remove_discuss_approved(&self, session_id: &str) {
        let _ = self.tx.send(Cmd::RemoveDiscussApproved { session_id: session_id.to_string() });
    }

    pub fn register_ask_question(&self, request_id: &str, question: &str) {
        let _ = self
            .tx
            .send(Cmd::RegisterAskQuestion { request_id: request_id.to_string(), question: question.to_string() });
    }

    pub async fn take_ask_question(&self, request_id: &str) -> Option<String> {
        let (reply, rx) = oneshot::channel();
        let _ = self.tx.send(Cmd::TakeAskQuestion { request_id: request_id.to_string(), reply });
        rx.await.ok().flatten()
    }
}

fn cooldown_window_secs(count: u32) -> u64 {
    (30u64 * count as u64).min(120)
}

fn handle_cmd(reg: &mut Registries, cmd: Cmd) {
    match cmd {
        Cmd::RegisterSession { session_id, stdin_tx } => {
            reg.active_runners.insert(session_id, RunnerEntry { stdin_tx, registered_at: Instant::now() });
        }
        Cmd::UnregisterSession { session_id } => {
            reg.active_runners.remove(&session_id);
        }
        Cmd::RegisterRequest { request_id, session_id, input } => {
            reg.request_to_session.insert(request_id.clone(), session_id);
            reg.request_to_input.insert(request_id, input);
        }
        Cmd::TakeInput { request_id, reply } => {
            let _ = reply.send(reg.request_to_input.remove(&request_id));
        }
        Cmd::SessionForRequest { request_id, reply } => {
            let _ = reply.send(reg.request_to_session.get(&request_id).cloned());
        }
        Cmd::SendControlResponse { request_id, line, reply } => {
            let result = send_control_response_inner(reg, &request_id, &line);
            let _ = reply.send(result);
        }
        Cmd::SweepStale => {
            let cutoff = Duration::from_secs(STALE_SESSION_SECS);
            let now = Instant::now();
            reg.active_runners.retain(|id, entry| {
                let keep = now.duration_since(entry.registered_at) < cutoff;
                if !keep {
                    eprintln!("{} session={} event=swept_stale", prefix("registry"), id);
                }
                keep
            });
        }
        Cmd::SetCooldown { session_id, reply } => {
            let entry = reg.discuss_cooldown.entry(session_id.clone()).or_insert((Instant::now(), 0));
            entry.1 += 1;
            entry.0 = Instant::now();
            let window = cooldown_window_secs(entry.1);
            reg.outline_pending.insert(session_id);
            let _ = reply.send(window);
        }
        Cmd::CheckCooldown { session_id, reply } => {
            let status = match reg.discuss_cooldown.get_mut(&session_id) {
                None => CooldownStatus::Clear,
                Some((ts, count)) => {
                    let window = cooldown_window_secs(*count);
                    if ts.elapsed().as_secs() > window {
                        // Count survives so the next click escalates further (spec §9).
                        *ts = Instant::now() - Duration::from_secs(window + 1);
                        CooldownStatus::Expired
                    } else {
                        CooldownStatus::Active { window_secs: window }
                    }
                }
            };
            let _ = reply.send(status);
        }
        Cmd::ClearCooldown { session_id } => {
            reg.discuss_cooldown.remove(&session_id);
        }
        Cmd::InsertOutlinePending { session_id } => {
            reg.outline_pending.insert(session_id);
        }
        Cmd::RemoveOutlinePending { session_id } => {
            reg.outline_pending.remove(&session_id);
        }
        Cmd::IsOutlinePending { session_id, reply } => {
            let _ = reply.send(reg.outline_pending.contains(&session_id));
        }
        Cmd::InsertDiscussApproved { session_id } => {
            reg.discuss_approved.insert(session_id);
        }
        Cmd::IsDiscussApproved { session_id, reply } => {
            let _ = reply.send(reg.discuss_approved.contains(&session_id));
        }
        Cmd::RemoveDiscussApproved { session_id } => {
            reg.discuss_approved.remove(&session_id);
        }
        Cmd::RegisterAskQuestion { request_id, question } => {
            reg.pending_ask_requests.insert(request_id, question);
        }
        Cmd::TakeAskQuestion { request_id, reply } => {
            let _ = reply.send(reg.pending_ask_requests.remove(&request_id));
        }
    }
}

fn send_control_response_inner(reg: &mut Registries, request_id: &str, line: &str) -> Result<(), SendControlError> {
    let session_id = match reg.request_to_session.get(request_id) {
        Some(s) => s.clone(),
        None => {
            if reg.handled_requests.contains(request_id) {
                return Ok(());
            }
            return Err(SendControlError::NotFound);
        }
    };

    let Some(entry) = reg.active_runners.get(&session_id) else {
        reg.request_to_session.remove(request_id);
        reg.request_to_input.remove(request_id);
        return Err(SendControlError::NotFound);
    };

    let send_ok = entry.stdin_tx.send(line.to_string()).is_ok();
    reg.request_to_session.remove(request_id);
    mark_handled(reg, request_id.to_string());
    if send_ok {
        Ok(())
    } else {
        Err(SendControlError::NotFound)
    }
}

fn mark_handled(reg: &mut Registries, request_id: String) {
    if reg.handled_requests.insert(request_id.clone()) {
        reg.handled_order.push_back(request_id);
    }
    if reg.handled_requests.len() > HANDLED_REQUESTS_CAP {
        // Cleared wholesale, not LRU-evicted — matches the Python original's
        // behaviour; only recent requests get duplicate suppression (spec §9).
        reg.handled_requests.clear();
        reg.handled_order.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn duplicate_approve_writes_stdin_once() {
        let coord = SessionCoordinator::spawn();
        let (stdin_tx, mut stdin_rx) = mpsc::unbounded_channel::<String>();
        coord.register_session("sess-1".into(), stdin_tx);
        coord.register_request("req-1".into(), "sess-1".into(), serde_json::json!({}));

        assert!(coord.send_control_response("req-1", "line-a".into()).await.is_ok());
        assert!(coord.send_control_response("req-1", "line-b".into()).await.is_ok());

        let first = stdin_rx.try_recv().unwrap();
        assert_eq!(first, "line-a");
        assert!(stdin_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn send_to_inactive_session_fails() {
        let coord = SessionCoordinator::spawn();
        coord.register_request("req-x".into(), "ghost-session".into(), serde_json::json!({}));
        let res = coord.send_control_response("req-x", "line".into()).await;
        assert_eq!(res, Err(SendControlError::NotFound));
    }

    #[tokio::test]
    async fn unknown_request_fails_not_found() {
        let coord = SessionCoordinator::spawn();
        let res = coord.send_control_response("never-seen", "line".into()).await;
        assert_eq!(res, Err(SendControlError::NotFound));
    }

    #[tokio::test]
    async fn cooldown_escalates_and_caps_at_120() {
        let coord = SessionCoordinator::spawn();
        assert_eq!(coord.set_cooldown("s").await, 30);
        assert_eq!(coord.set_cooldown("s").await, 60);
        assert_eq!(coord.set_cooldown("s").await, 90);
        assert_eq!(coord.set_cooldown("s").await, 120);
        assert_eq!(coord.set_cooldown("s").await, 120);
    }

    #[tokio::test]
    async fn clear_cooldown_is_idempotent() {
        let coord = SessionCoordinator::spawn();
        coord.set_cooldown("s").await;
        coord.clear_cooldown("s");
        coord.clear_cooldown("s");
        assert_eq!(coord.check_cooldown("s").await, CooldownStatus::Clear);
    }
}
