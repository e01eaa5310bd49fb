//! Claude Code CLI Runner: spawns `claude --output-format stream-json [--input-format
//! stream-json]`, drives the bidirectional control-channel protocol, and translates
//! stdout into canonical Events. Grounded on the teacher's `agent/claude_sdk.rs`
//! (spawn/writer-task/reader-task shape) and the Python original's `ClaudeRunner`
//! (`_iter_jsonl_events`, `_drain_auto_approve`, `_drain_auto_deny`, `stream_end_events`).

use std::collections::VecDeque;
use std::process::Stdio;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::log::prefix;
use crate::model::{Event, ResumeToken, StreamState};
use crate::registry::SessionCoordinator;
use crate::translator::{build_response_line, translate_claude_event};

use super::{RunConfig, Runner};

const STDERR_CAPTURE_LINES: usize = 20;
const EVENT_CHANNEL_CAP: usize = 256;
const CANCEL_GRACE: Duration = Duration::from_secs(5);

pub struct ClaudeRunner;

#[async_trait::async_trait]
impl Runner for ClaudeRunner {
    fn name(&self) -> &'static str {
        "claude"
    }

    async fn run(
        &self,
        prompt: String,
        resume: Option<ResumeToken>,
        config: RunConfig,
        coord: SessionCoordinator,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<Event> {
        let (out_tx, out_rx) = mpsc::channel::<Event>(EVENT_CHANNEL_CAP);
        tokio::spawn(async move {
            if let Err(e) = drive(prompt, resume, config, coord, cancel, out_tx.clone()).await {
                let _ = out_tx.send(Event::completed_err(e, None)).await;
            }
        });
        out_rx
    }
}

fn build_command(config: &RunConfig, resume: &Option<ResumeToken>) -> Command {
    let mut cmd = Command::new("claude");
    cmd.arg("--output-format").arg("stream-json").arg("--verbose");

    if let Some(mode) = &config.permission_mode {
        cmd.arg("--input-format").arg("stream-json");
        cmd.arg("--permission-mode").arg(mode);
    }
    if !config.allowed_tools.is_empty() {
        cmd.arg("--allowedTools").arg(config.allowed_tools.join(","));
    }
    if let Some(r) = resume {
        cmd.arg("--resume").arg(&r.value);
    }
    cmd.current_dir(&config.cwd);
    if config.subscription_billing {
        cmd.env_remove("ANTHROPIC_API_KEY");
    }
    cmd.kill_on_drop(true);
    cmd
}

async fn drive(
    prompt: String,
    resume: Option<ResumeToken>,
    config: RunConfig,
    coord: SessionCoordinator,
    cancel: CancellationToken,
    out_tx: mpsc::Sender<Event>,
) -> Result<(), String> {
    let control_channel = config.permission_mode.is_some();
    let engine = config.engine.clone();
    let mut cmd = build_command(&config, &resume);

    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    cmd.stdin(if control_channel { Stdio::piped() } else { Stdio::null() });
    if !control_channel {
        cmd.arg("-p").arg(&prompt);
    }

    let mut child = cmd.spawn().map_err(|e| format!("failed to spawn claude: {}", e))?;
    let stdout = child.stdout.take().ok_or("no stdout")?;
    let stderr = child.stderr.take().ok_or("no stderr")?;

    // Writer task: drains queued lines onto the child's stdin. This sender *is* the
    // captured stdin handle registered into the SessionRegistry — never a field a
    // concurrent session on the same engine could overwrite.
    let (stdin_tx, mut stdin_rx) = mpsc::unbounded_channel::<String>();
    if control_channel {
        let mut child_stdin = child.stdin.take().ok_or("no stdin")?;
        tokio::spawn(async move {
            while let Some(line) = stdin_rx.recv().await {
                if child_stdin.write_all(line.as_bytes()).await.is_err() {
                    break;
                }
                if child_stdin.write_all(b"\n").await.is_err() {
                    break;
                }
                let _ = child_stdin.flush().await;
            }
        });

        let init = json!({
            "type": "control_request",
            "request_id": "req_init",
            "request": { "subtype": "initialize", "hooks": Value::Null, "agents": Value::Null }
        });
        let _ = stdin_tx.send(init.to_string());
        let user_msg = json!({
            "type": "user",
            "message": { "role": "user", "content": prompt },
            "parent_tool_use_id": Value::Null,
        });
        let _ = stdin_tx.send(user_msg.to_string());
    }

    let stderr_tail = std::sync::Arc::new(tokio::sync::Mutex::new(VecDeque::<String>::with_capacity(STDERR_CAPTURE_LINES)));
    let stderr_tail_w = stderr_tail.clone();
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let mut buf = stderr_tail_w.lock().await;
            if buf.len() >= STDERR_CAPTURE_LINES {
                buf.pop_front();
            }
            buf.push_back(line);
        }
    });

    let mut state = StreamState::new(resume.clone());
    state.auto_approve_exit_plan_mode = config.permission_mode.as_deref() == Some("auto");
    let mut started_yielded = false;
    let mut completed_yielded = false;
    let mut reader = BufReader::new(stdout).lines();

    loop {
        let line = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                drop(stdin_tx);
                let _ = tokio::time::timeout(CANCEL_GRACE, child.wait()).await;
                let _ = child.start_kill();
                if let Some(sid) = &state.session_id {
                    coord.unregister_session(sid.clone());
                }
                let resume_tok = state.best_resume(&engine);
                let _ = out_tx.send(Event::Completed {
                    ok: false,
                    answer: String::new(),
                    resume: resume_tok,
                    error: Some("cancelled".to_string()),
                    usage: None,
                }).await;
                return Ok(());
            }
            line = reader.next_line() => line,
        };

        let Ok(line) = line else {
            eprintln!("{} event=stdout_read_error", prefix("runner"));
            break;
        };
        let Some(line) = line else {
            break; // EOF
        };
        if line.trim().is_empty() {
            continue;
        }

        let value: Value = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                eprintln!("{} event=decode_error error={} line_excerpt={}", prefix("runner"), e, &line[..line.len().min(200)]);
                continue;
            }
        };

        let events = translate_claude_event(&value, &engine, &mut state, &coord).await;
        for event in events {
            if let Event::Started { .. } = &event {
                if !started_yielded {
                    started_yielded = true;
                    if let Some(sid) = &state.session_id {
                        coord.register_session(sid.clone(), stdin_tx.clone());
                    }
                }
            }
            if matches!(event, Event::Completed { .. }) {
                completed_yielded = true;
            }
            if out_tx.send(event).await.is_err() {
                return Ok(()); // consumer gone
            }
        }

        // Liveness-critical: flush queued control responses even if this line
        // yielded zero canonical events (spec §4.1 rule 4).
        flush_queues(&mut state, &stdin_tx);

        if completed_yielded {
            break; // stop reading stdout immediately; children may hold the pipe open
        }
    }

    if let Some(sid) = &state.session_id {
        coord.unregister_session(sid.clone());
    }

    if !completed_yielded {
        let status = child.wait().await.map_err(|e| format!("wait failed: {}", e))?;
        let resume_tok = state.best_resume(&engine);
        if status.success() {
            let answer = state.last_assistant_text.clone().unwrap_or_default();
            let _ = out_tx.send(Event::completed_ok(answer, resume_tok)).await;
        } else {
            let stderr_excerpt = stderr_tail.lock().await.iter().cloned().collect::<Vec<_>>().join("\n");
            let session_excerpt = state.session_id.clone().unwrap_or_else(|| "none".to_string());
            let rc_desc = match status.code() {
                Some(code) => format!("rc={}", code),
                None => {
                    use std::os::unix::process::ExitStatusExt;
                    match status.signal() {
                        Some(sig) => format!("signal {}", sig),
                        None => "rc=-1".to_string(),
                    }
                }
            };
            let error = format!(
                "claude failed ({}).\nsession: {}\nstderr: {}",
                rc_desc,
                session_excerpt,
                stderr_excerpt,
            );
            let _ = out_tx.send(Event::completed_err(error, resume_tok)).await;
        }
    }

    Ok(())
}

fn flush_queues(state: &mut StreamState, stdin_tx: &mpsc::UnboundedSender<String>) {
    for request_id in state.auto_approve_queue.drain(..) {
        let line = build_response_line(&request_id, true, None, None);
        let _ = stdin_tx.send(line);
    }
    for (request_id, message) in state.auto_deny_queue.drain(..) {
        let line = build_response_line(&request_id, false, None, Some(&message));
        let _ = stdin_tx.send(line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_mode_has_no_permission_mode_flag() {
        let config = RunConfig {
            engine: "claude".to_string(),
            permission_mode: None,
            allowed_tools: vec![],
            cwd: std::env::temp_dir(),
            subscription_billing: false,
        };
        let cmd = build_command(&config, &None);
        let args: Vec<String> = cmd.as_std().get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert!(!args.contains(&"--permission-mode".to_string()));
    }

    #[test]
    fn control_channel_mode_carries_permission_mode() {
        let config = RunConfig {
            engine: "claude".to_string(),
            permission_mode: Some("plan".to_string()),
            allowed_tools: vec![],
            cwd: std::env::temp_dir(),
            subscription_billing: false,
        };
        let cmd = build_command(&config, &None);
        let args: Vec<String> = cmd.as_std().get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert!(args.windows(2).any(|w| w == ["--permission-mode", "plan"]));
    }
}
