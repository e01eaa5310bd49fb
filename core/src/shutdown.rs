//! Process-wide shutdown flag: set once on SIGINT/SIGTERM, observed by the dispatch
//! loop to stop accepting new work while in-flight sessions drain. Grounded on the
//! teacher's signal handling in `server/src/main.rs`, generalized to both signals.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::log::prefix;

const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Clone)]
pub struct ShutdownFlag {
    flag: Arc<AtomicBool>,
}

impl ShutdownFlag {
    pub fn new() -> Self {
        Self { flag: Arc::new(AtomicBool::new(false)) }
    }

    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Idempotent: calling this more than once (e.g. a second SIGTERM) is harmless.
    pub fn set(&self) {
        if !self.flag.swap(true, Ordering::SeqCst) {
            eprintln!("{} event=shutdown_requested", prefix("shutdown"));
        }
    }

    pub fn drain_timeout(&self) -> Duration {
        DEFAULT_DRAIN_TIMEOUT
    }
}

impl Default for ShutdownFlag {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawns a task that sets `flag` on SIGINT or SIGTERM and returns immediately.
pub fn install_signal_handlers(flag: ShutdownFlag) {
    tokio::spawn(async move {
        let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                eprintln!("{} event=sigterm_handler_failed error={}", prefix("shutdown"), e);
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => flag.set(),
            _ = sigterm.recv() => flag.set(),
        }
    });
}

/// Resolves once `flag` is set. Polls rather than using a notify primitive since
/// `set()` can be called from a plain signal-handler task with no receiver to wake.
pub async fn wait_for_shutdown(flag: &ShutdownFlag) {
    let mut ticker = tokio::time::interval(Duration::from_millis(200));
    loop {
        ticker.tick().await;
        if flag.is_set() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_is_idempotent_and_observable() {
        let flag = ShutdownFlag::new();
        assert!(!flag.is_set());
        flag.set();
        flag.set();
        assert!(flag.is_set());
    }
}
