//! untether server binary: Telegram dispatcher + Trigger Ingest webhook + cron sweep.

use common::config;
use common::shutdown::{self, ShutdownFlag};

fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let _ = config::ensure_loaded();
    let shutdown_flag = ShutdownFlag::new();
    shutdown::install_signal_handlers(shutdown_flag.clone());

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(server::run(shutdown_flag))
}
