//! Catalog Sync - sealed product stock & pricing daemon
//!
//! Refreshes catalog prices from the batch pricing service on a schedule and
//! persists the catalog to a JSON store with rotating backups.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use catalog_sync::sync::refresh_due;
use catalog_sync::web::SharedReport;
use catalog_sync::{CatalogStore, PriceApi, PriceApiConfig, RefreshGate, SyncEngine};
use clap::Parser;
use tokio::time::interval;

/// Minimum gap between refresh runs, shared by the daemon and the web UI
const REFRESH_COOLDOWN: Duration = Duration::from_secs(300);

/// Catalog sync daemon - refreshes prices into a JSON catalog store
#[derive(Parser, Debug)]
#[command(name = "catalog_sync")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the catalog store file
    #[arg(short, long, default_value_t = default_store_path())]
    store: String,

    /// Run one sync and exit (default: run continuously)
    #[arg(long, default_value_t = false)]
    once: bool,

    /// Check interval in hours when running continuously
    #[arg(long, default_value_t = 6)]
    interval_hours: u64,

    /// Refresh items whose last observation is older than this many hours
    #[arg(long, default_value_t = 24)]
    max_age_hours: i64,

    /// Enable the web UI on the given port (default: disabled)
    #[arg(long)]
    web_port: Option<u16>,

    /// Write the catalog as CSV to the given path and exit
    #[arg(long)]
    export_csv: Option<PathBuf>,
}

/// Returns the default store path: ~/.local/share/catalog_sync/catalog.json
fn default_store_path() -> String {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("catalog_sync")
        .join("catalog.json")
        .to_string_lossy()
        .to_string()
}

#[tokio::main]
async fn main() {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let store_path = PathBuf::from(&args.store);

    log::info!("Starting catalog_sync...");
    log::info!("Store path: {}", store_path.display());

    // Ensure parent directory exists
    if let Some(parent) = store_path.parent() {
        if !parent.exists() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                log::error!("Failed to create store directory: {}", e);
                std::process::exit(1);
            }
            log::info!("Created directory: {}", parent.display());
        }
    }

    let store = CatalogStore::new(&store_path);

    // One-shot CSV export needs no pricing service
    if let Some(path) = args.export_csv.as_deref() {
        let catalog = store.read();
        let result = std::fs::File::create(&path)
            .map_err(catalog_sync::Error::from)
            .and_then(|file| catalog_sync::export::write_csv(file, &catalog.items));
        match result {
            Ok(()) => {
                log::info!("Exported {} items to {}", catalog.items.len(), path.display());
                return;
            }
            Err(e) => {
                log::error!("CSV export failed: {}", e);
                std::process::exit(1);
            }
        }
    }

    let config = match PriceApiConfig::from_env() {
        Some(config) => config,
        None => {
            log::error!("CATALOG_SYNC_API_URL and CATALOG_SYNC_API_KEY must be set");
            std::process::exit(1);
        }
    };

    let engine = Arc::new(SyncEngine::new(store, PriceApi::new(config)));
    let gate = Arc::new(RefreshGate::new(REFRESH_COOLDOWN));
    let last_report: SharedReport = Arc::new(Mutex::new(None));

    // Spawn web server if --web-port specified
    if let Some(port) = args.web_port {
        let web_engine = Arc::clone(&engine);
        let web_gate = Arc::clone(&gate);
        let web_report = Arc::clone(&last_report);
        let max_age_hours = args.max_age_hours;
        tokio::spawn(async move {
            if let Err(e) =
                catalog_sync::web::serve(web_engine, web_gate, web_report, max_age_hours, port).await
            {
                log::error!("Web server error: {}", e);
            }
        });
    }

    if args.once {
        run_sync(&engine, &gate, &last_report, args.max_age_hours).await;
    } else {
        log::info!(
            "Running in daemon mode, checking every {} hour(s)",
            args.interval_hours
        );
        run_daemon(&engine, &gate, &last_report, &args).await;
    }
}

/// Run the sync daemon - refreshes on startup, then on every tick
async fn run_daemon(
    engine: &Arc<SyncEngine>,
    gate: &Arc<RefreshGate>,
    last_report: &SharedReport,
    args: &Args,
) {
    let check_interval = Duration::from_secs(args.interval_hours.max(1) * 3600);
    let mut ticker = interval(check_interval);

    // Run immediately on startup
    run_sync(engine, gate, last_report, args.max_age_hours).await;

    loop {
        ticker.tick().await;
        log::info!("Scheduled check triggered");
        run_sync(engine, gate, last_report, args.max_age_hours).await;
    }
}

/// Run a single sync operation through the shared gate
async fn run_sync(
    engine: &Arc<SyncEngine>,
    gate: &Arc<RefreshGate>,
    last_report: &SharedReport,
    max_age_hours: i64,
) {
    if !gate.try_begin() {
        log::info!("A refresh ran moments ago, skipping this one");
        return;
    }

    match engine.sync(refresh_due(max_age_hours)).await {
        Ok(report) => {
            log::info!(
                "Sync completed: {} processed, {} updated, {} skipped, {} errored",
                report.processed,
                report.updated,
                report.skipped,
                report.errored
            );
            for restock in &report.restocks {
                log::info!(
                    "Restock: {} {} -> {} (+{})",
                    restock.identity,
                    restock.old_quantity,
                    restock.new_quantity,
                    restock.delta
                );
            }
            *last_report.lock().unwrap() = Some(report);
        }
        Err(e) => {
            log::error!("Sync failed: {}", e);
        }
    }
}
