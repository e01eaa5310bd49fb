//! Subprocess Runner: spawns an agent CLI and exposes a lazy sequence of canonical
//! Events over a channel. One `Runner` implementation per engine; this crate ships
//! the Claude Code CLI engine (`claude.rs`), grounded on the teacher's
//! `agent/claude_sdk.rs` and the Python original's `ClaudeRunner`.

pub mod claude;

use std::path::PathBuf;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::model::{Event, ResumeToken};
use crate::registry::SessionCoordinator;

/// Resolved launch configuration for one run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub engine: String,
    pub permission_mode: Option<String>,
    pub allowed_tools: Vec<String>,
    pub cwd: PathBuf,
    /// Remove the API-key env var from the child when billing is subscription-based.
    pub subscription_billing: bool,
}

impl RunConfig {
    pub fn from_engine(engine: &str, cfg: &EngineConfig, cwd: PathBuf) -> Self {
        Self {
            engine: engine.to_string(),
            permission_mode: cfg.permission_mode.clone(),
            allowed_tools: cfg.allowed_tools.clone(),
            cwd,
            subscription_billing: false,
        }
    }
}

/// A single agent invocation: spawn/resume, stream canonical Events, terminate on
/// consumer cancellation. Implementations must be non-restartable — a fresh `run`
/// call spawns a fresh subprocess.
#[async_trait::async_trait]
pub trait Runner: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(
        &self,
        prompt: String,
        resume: Option<ResumeToken>,
        config: RunConfig,
        coord: SessionCoordinator,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<Event>;
}
