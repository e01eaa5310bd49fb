//! untether server: Trigger Ingest webhook, cron sweep, and the Telegram dispatcher,
//! all sharing one `common::bridge::Bridge`.

mod webhook;

pub use webhook::run_webhook_server;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use common::config;
use common::im::telegram::{self, TelegramTransport};
use common::log::prefix;
use common::shutdown::{self, ShutdownFlag};

/// Boot the Telegram dispatcher, the Trigger Ingest webhook, and the cron sweep loop,
/// all against one shared `Bridge`. Runs until the shutdown flag is observed.
pub async fn run(shutdown: ShutdownFlag) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config = config::ensure_loaded();
    let webhook_addr: SocketAddr = config
        .webhook_bind
        .parse()
        .map_err(|e| format!("invalid webhook_bind {:?}: {}", config.webhook_bind, e))?;
    let cron_tick = Duration::from_secs(config.cron_tick_secs.max(1));

    let Some((bot, bridge)) = telegram::bootstrap().await else {
        eprintln!("{} event=telegram_disabled", prefix("server"));
        return Ok(());
    };

    let dispatcher = {
        let bot = bot.clone();
        let bridge = Arc::clone(&bridge);
        tokio::spawn(async move { telegram::run_dispatcher(bot, bridge).await })
    };

    let webhook = {
        let bridge = Arc::clone(&bridge);
        tokio::spawn(async move { run_webhook_server(webhook_addr, bridge).await })
    };

    let cron = {
        let bridge = Arc::clone(&bridge);
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(cron_tick);
            loop {
                ticker.tick().await;
                if shutdown.is_set() {
                    break;
                }
                bridge.sweep_stale();
            }
        })
    };

    tokio::select! {
        res = dispatcher => {
            if let Err(e) = res {
                eprintln!("{} event=dispatcher_panicked error={}", prefix("server"), e);
            }
        }
        res = webhook => {
            match res {
                Ok(Err(e)) => eprintln!("{} event=webhook_failed error={}", prefix("server"), e),
                Err(e) => eprintln!("{} event=webhook_panicked error={}", prefix("server"), e),
                Ok(Ok(())) => {}
            }
        }
        _ = shutdown::wait_for_shutdown(&shutdown) => {
            eprintln!("{} event=shutdown_requested", prefix("server"));
        }
    }
    cron.abort();
    Ok(())
}
