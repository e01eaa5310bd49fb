//! Progress Editor: renders a session's `ProgressState` into one scrolling "anchor"
//! chat message, rate-limited and coalesced so only the latest snapshot is ever sent.
//! A second, ephemeral message carries the Approve/Deny keyboard while one is pending
//! and is deleted outright (not edited down) once the keyboard is no longer needed.
//! Grounded on `im/daemon.rs`'s per-channel send daemon and rate-limit constants.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use crate::config::OverflowPolicy;
use crate::im::transport::{ImTransport, Keyboard};

const MIN_EDIT_INTERVAL: Duration = Duration::from_secs(1);
const OVERFLOW_TRIM_CHARS: usize = 3500;

#[derive(Debug, Clone)]
pub struct RenderSnapshot {
    pub text: String,
    pub keyboard: Option<Keyboard>,
}

/// Trim or split an overlong render. Trim keeps header (first line) and footer (last
/// two lines: context + resume line) and drops from the middle; split hands back
/// multiple messages instead, each under `OVERFLOW_TRIM_CHARS`.
pub fn apply_overflow(text: &str, policy: OverflowPolicy) -> Vec<String> {
    if text.len() <= OVERFLOW_TRIM_CHARS {
        return vec![text.to_string()];
    }
    match policy {
        OverflowPolicy::Split => crate::im::transport::chunk_message(text, OVERFLOW_TRIM_CHARS),
        OverflowPolicy::Trim => {
            let lines: Vec<&str> = text.lines().collect();
            if lines.len() < 4 {
                let mut truncated: String = text.chars().take(OVERFLOW_TRIM_CHARS).collect();
                truncated.push('…');
                return vec![truncated];
            }
            let header = lines[0];
            let footer = &lines[lines.len().saturating_sub(2)..];
            let mut body_budget = OVERFLOW_TRIM_CHARS.saturating_sub(header.len() + footer.join("\n").len() + 20);
            let mut body = String::new();
            for line in &lines[1..lines.len().saturating_sub(2)] {
                if line.len() + 1 > body_budget {
                    break;
                }
                body_budget -= line.len() + 1;
                body.push_str(line);
                body.push('\n');
            }
            vec![format!("{}\n{}…(truncated)…\n{}", header, body, footer.join("\n"))]
        }
    }
}

/// Handle for a single session's editor task. Cheap to clone.
#[derive(Clone)]
pub struct SessionEditor {
    tx: watch::Sender<RenderSnapshot>,
}

impl SessionEditor {
    pub fn spawn<T: ImTransport + 'static>(transport: Arc<T>, channel_id: String, overflow: OverflowPolicy) -> Self {
        let (tx, rx) = watch::channel(RenderSnapshot { text: String::new(), keyboard: None });
        tokio::spawn(run(rx, transport, channel_id, overflow));
        Self { tx }
    }

    /// Push the latest snapshot. If the daemon is mid-edit, intermediate pushes made
    /// while it's busy are coalesced away — only the last one before it next looks wins.
    pub fn update(&self, text: String, keyboard: Option<Keyboard>) {
        let _ = self.tx.send(RenderSnapshot { text, keyboard });
    }
}

async fn run<T: ImTransport>(
    mut rx: watch::Receiver<RenderSnapshot>,
    transport: Arc<T>,
    channel_id: String,
    overflow: OverflowPolicy,
) {
    let mut anchor_id: Option<i32> = None;
    let mut notice_id: Option<i32> = None;
    let mut last_edit: Option<Instant> = None;

    while rx.changed().await.is_ok() {
        let snapshot = rx.borrow_and_update().clone();

        if let Some(last) = last_edit {
            let elapsed = last.elapsed();
            if elapsed < MIN_EDIT_INTERVAL {
                tokio::time::sleep(MIN_EDIT_INTERVAL - elapsed).await;
            }
        }

        let parts = apply_overflow(&snapshot.text, overflow);
        let body = parts.first().cloned().unwrap_or_default();

        match anchor_id {
            None => {
                if let Ok(Some(mid)) = transport.send(&channel_id, &body).await {
                    anchor_id = Some(mid);
                }
            }
            Some(mid) => {
                let _ = transport.edit_message(&channel_id, mid, &body).await;
            }
        }
        last_edit = Some(Instant::now());

        match (&snapshot.keyboard, notice_id) {
            (Some(keyboard), None) => {
                if let Ok(Some(mid)) = transport.send_with_keyboard(&channel_id, "Action required", keyboard).await {
                    notice_id = Some(mid);
                }
            }
            (Some(keyboard), Some(mid)) => {
                let _ = transport.edit_with_keyboard(&channel_id, mid, "Action required", Some(keyboard)).await;
            }
            (None, Some(mid)) => {
                // Keyboard resolved (approved/denied/outlined) — delete the ephemeral
                // notice rather than leave a stale "Action required" with no buttons.
                let _ = transport.delete_message(&channel_id, mid).await;
                notice_id = None;
            }
            (None, None) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_passes_through_unmodified() {
        let text = "Started: claude\n1 action\nclaude resume abc";
        assert_eq!(apply_overflow(text, OverflowPolicy::Trim), vec![text.to_string()]);
    }

    #[test]
    fn trim_keeps_header_and_footer() {
        let mut body = String::from("Started: claude\n");
        for i in 0..500 {
            body.push_str(&format!("action {}\n", i));
        }
        body.push_str("3 actions\nclaude resume abc");
        let out = apply_overflow(&body, OverflowPolicy::Trim);
        assert_eq!(out.len(), 1);
        assert!(out[0].starts_with("Started: claude"));
        assert!(out[0].ends_with("claude resume abc"));
        assert!(out[0].len() <= OVERFLOW_TRIM_CHARS + 64);
    }

    #[test]
    fn split_produces_multiple_chunks_under_budget() {
        let body = "x".repeat(OVERFLOW_TRIM_CHARS * 3);
        let out = apply_overflow(&body, OverflowPolicy::Split);
        assert!(out.len() >= 3);
        assert!(out.iter().all(|c| c.len() <= OVERFLOW_TRIM_CHARS));
    }
}
