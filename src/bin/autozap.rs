//! AutoZap bot
//!
//! Watches Nostr relays for reposts of one note and pays every reposting
//! actor through LNbits, at most once per rate-limit window.
//!
//! Usage:
//!   cargo run --release --bin autozap
//!
//! Configuration is read from the environment (or `.env`), see `AppConfig`.

use autozap::config::AppConfig;
use autozap::monitor::{MonitorHandle, MonitorLoop};
use autozap::payment_core::{Ledger, LnbitsClient, PaymentDispatcher};
use autozap::relay_core::{EventFilter, RelayPool};
use log::{error, info, warn};
use std::process::ExitCode;

fn init_logger(filter: &str) {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter))
        .target(env_logger::Target::Stderr)
        .try_init()
        .ok();
}

/// Route SIGINT and SIGTERM to a graceful drain.
fn spawn_signal_handlers(handle: MonitorHandle) {
    let ctrl_c = handle.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("⚠️  Received CTRL+C, shutting down...");
                ctrl_c.request_shutdown();
            }
            Err(err) => error!("❌ Failed to listen for CTRL+C: {}", err),
        }
    });

    #[cfg(unix)]
    tokio::spawn(async move {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                info!("⚠️  Received SIGTERM, shutting down...");
                handle.request_shutdown();
            }
            Err(err) => error!("❌ Failed to listen for SIGTERM: {}", err),
        }
    });
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            init_logger("info");
            error!("❌ Configuration error: {}", e);
            return ExitCode::from(1);
        }
    };
    init_logger(&config.rust_log);

    // NOTE: Workaround for rustls issue
    if rustls::crypto::aws_lc_rs::default_provider().install_default().is_err() {
        warn!("⚠️  rustls crypto provider already installed");
    }

    info!("🚀 Starting AutoZap");
    info!("📊 Configuration:");
    info!("   ├─ Note: {}", config.target_note_id);
    info!("   ├─ LNbits: {}", config.lnbits_url);
    info!("   ├─ Relays: {}", config.relay_urls.join(", "));
    info!("   ├─ Amount: {} sats", config.payment_amount);
    info!("   ├─ Rate limit: {}h", config.rate_limit_hours);
    info!("   ├─ Kinds: {:?} | Tags: {:?}", config.accepted_kinds, config.reference_tags);
    info!("   ├─ Require comment: {}", config.require_comment);
    info!("   └─ Database: {}", config.db_path);

    let ledger = match Ledger::open(&config.db_path) {
        Ok(ledger) => ledger,
        Err(e) => {
            error!("❌ Failed to open ledger {}: {}", config.db_path, e);
            return ExitCode::from(1);
        }
    };
    info!("✅ Ledger ready");

    let backend = match LnbitsClient::new(&config.lnbits_config()) {
        Ok(backend) => backend,
        Err(e) => {
            error!("❌ Failed to build LNbits client: {}", e);
            return ExitCode::from(1);
        }
    };

    let filter = EventFilter::new(config.target_note_id.clone(), config.filter_config());
    let dispatcher = PaymentDispatcher::new(ledger, backend, config.dispatch_config());
    let (monitor, handle) = MonitorLoop::new(RelayPool::default(), filter, dispatcher, config.monitor_config());

    spawn_signal_handlers(handle);
    info!("🔄 Press CTRL+C to shutdown gracefully");

    match monitor.run().await {
        Ok(stats) => {
            info!("✅ AutoZap stopped ({} payments this session)", stats.paid);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("❌ AutoZap stopped: {}", e);
            ExitCode::from(e.exit_code())
        }
    }
}
