//! Global config singleton. Load settings once; the server binary and tests both call
//! `ensure_loaded()` so the first caller does the work, later callers get the same instance.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Once;
use std::sync::OnceLock;

/// Root directory for config: settings.json lives next to the workspace manifest.
fn config_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("..")
}

/// Install rustls default crypto provider once (required before any TLS use, e.g. reqwest/teloxide).
fn ensure_rustls_provider() {
    static ONCE: Once = Once::new();
    ONCE.call_once(|| {
        rustls::crypto::aws_lc_rs::default_provider()
            .install_default()
            .expect("rustls default crypto provider");
    });
}

static CONFIG: OnceLock<Config> = OnceLock::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    Compact,
    Verbose,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
    Trim,
    Split,
}

#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    /// `plan | auto | acceptEdits | bypassPermissions | null`. None = legacy (one-shot) mode.
    pub permission_mode: Option<String>,
    pub allowed_tools: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct PreambleConfig {
    pub enabled: bool,
    pub text: Option<String>,
}

impl Default for PreambleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            text: Some(
                "You are running inside a chat-bridge: the user sees only the messages \
                 you produce, not a terminal. There is no interactive TTY."
                    .to_string(),
            ),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CostBudgetConfig {
    pub max_per_run: Option<f64>,
    pub max_per_day: Option<f64>,
    pub warn_at_pct: f64,
    pub auto_cancel: bool,
}

impl Default for CostBudgetConfig {
    fn default() -> Self {
        Self { max_per_run: None, max_per_day: None, warn_at_pct: 0.8, auto_cancel: false }
    }
}

/// Cached config, loaded once from settings.json + environment overrides.
pub struct Config {
    pub telegram_bot_token: Option<String>,
    pub default_engine: String,
    pub engines: HashMap<String, EngineConfig>,
    pub verbosity: Verbosity,
    pub max_actions: usize,
    pub preamble: PreambleConfig,
    pub cost_budget: CostBudgetConfig,
    pub overflow_policy: OverflowPolicy,
    /// Root for job working directories. Default: ~/test (matches the teacher's default).
    pub working_dir: PathBuf,
    /// Bind address for the Trigger Ingest webhook server.
    pub webhook_bind: String,
    /// Cron tick interval for Trigger Ingest, in seconds.
    pub cron_tick_secs: u64,
}

pub fn ensure_loaded() -> &'static Config {
    ensure_rustls_provider();
    CONFIG.get_or_init(|| {
        let path = config_root().join("settings.json");
        load_settings_from(&path)
    })
}

fn load_settings_from(path: &std::path::Path) -> Config {
    let root: serde_json::Value = std::fs::read_to_string(path)
        .ok()
        .and_then(|data| serde_json::from_str(&data).ok())
        .unwrap_or(serde_json::Value::Null);

    let telegram_bot_token = std::env::var("TELEGRAM_BOT_TOKEN")
        .ok()
        .filter(|s| !s.is_empty())
        .or_else(|| {
            root.get("channels")
                .and_then(|c| c.get("telegram"))
                .and_then(|t| t.get("bot_token"))
                .and_then(|v| v.as_str())
                .map(str::to_string)
        })
        .filter(|s| !s.is_empty());

    let default_engine = root
        .get("default_engine")
        .and_then(|v| v.as_str())
        .unwrap_or("claude")
        .to_string();

    let mut engines = HashMap::new();
    if let Some(obj) = root.get("engines").and_then(|v| v.as_object()) {
        for (name, cfg) in obj {
            let permission_mode = cfg
                .get("permission_mode")
                .and_then(|v| v.as_str())
                .map(str::to_string);
            let allowed_tools = cfg
                .get("allowed_tools")
                .and_then(|v| v.as_array())
                .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
                .unwrap_or_default();
            engines.insert(name.clone(), EngineConfig { permission_mode, allowed_tools });
        }
    }
    engines.entry(default_engine.clone()).or_default();

    let verbosity = match root.get("progress").and_then(|p| p.get("verbosity")).and_then(|v| v.as_str()) {
        Some("verbose") => Verbosity::Verbose,
        _ => Verbosity::Compact,
    };
    let max_actions = root
        .get("progress")
        .and_then(|p| p.get("max_actions"))
        .and_then(|v| v.as_u64())
        .map(|n| n as usize)
        .unwrap_or(5)
        .min(50);

    let preamble = root
        .get("preamble")
        .map(|p| PreambleConfig {
            enabled: p.get("enabled").and_then(|v| v.as_bool()).unwrap_or(true),
            text: p.get("text").and_then(|v| v.as_str()).map(str::to_string),
        })
        .unwrap_or_default();

    let cost_budget = root
        .get("cost_budget")
        .map(|c| CostBudgetConfig {
            max_per_run: c.get("max_per_run").and_then(|v| v.as_f64()),
            max_per_day: c.get("max_per_day").and_then(|v| v.as_f64()),
            warn_at_pct: c.get("warn_at_pct").and_then(|v| v.as_f64()).unwrap_or(0.8),
            auto_cancel: c.get("auto_cancel").and_then(|v| v.as_bool()).unwrap_or(false),
        })
        .unwrap_or_default();

    let overflow_policy = match root.get("overflow_policy").and_then(|v| v.as_str()) {
        Some("split") => OverflowPolicy::Split,
        _ => OverflowPolicy::Trim,
    };

    let working_dir = root
        .get("working_dir")
        .and_then(|v| v.as_str())
        .map(|s| PathBuf::from(s.trim()))
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(default_working_dir);

    let webhook_bind = root
        .get("trigger_ingest")
        .and_then(|t| t.get("webhook_bind"))
        .and_then(|v| v.as_str())
        .unwrap_or("127.0.0.1:8787")
        .to_string();
    let cron_tick_secs = root
        .get("trigger_ingest")
        .and_then(|t| t.get("cron_tick_secs"))
        .and_then(|v| v.as_u64())
        .unwrap_or(60);

    Config {
        telegram_bot_token,
        default_engine,
        engines,
        verbosity,
        max_actions,
        preamble,
        cost_budget,
        overflow_policy,
        working_dir,
        webhook_bind,
        cron_tick_secs,
    }
}

fn default_working_dir() -> PathBuf {
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| "/tmp".into());
    PathBuf::from(home).join("test")
}

impl Default for Config {
    fn default() -> Self {
        let default_engine = "claude".to_string();
        let mut engines = HashMap::new();
        engines.insert(default_engine.clone(), EngineConfig::default());
        Self {
            telegram_bot_token: None,
            default_engine,
            engines,
            verbosity: Verbosity::Compact,
            max_actions: 5,
            preamble: PreambleConfig::default(),
            cost_budget: CostBudgetConfig::default(),
            overflow_policy: OverflowPolicy::Trim,
            working_dir: default_working_dir(),
            webhook_bind: "127.0.0.1:8787".to_string(),
            cron_tick_secs: 60,
        }
    }
}

impl Config {
    pub fn engine(&self, name: &str) -> EngineConfig {
        self.engines.get(name).cloned().unwrap_or_default()
    }
}
