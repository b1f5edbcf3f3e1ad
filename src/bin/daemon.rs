//! `kilnd` — long-running daemon: opens the database, starts the sandbox
//! pools and job queue workers, and (when the `gateway` feature is
//! enabled) serves the HTTP/SSE surface.

use std::path::PathBuf;
use std::sync::OnceLock;

use kiln_core::config;
use kiln_core::Core;

static LOG_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();

#[tokio::main]
async fn main() {
    let config_path = config::default_config_path().ok();
    let app_config = match config_path.as_deref() {
        Some(path) if path.exists() => match config::load_config(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("failed to load config at {}: {e}, falling back to defaults", path.display());
                config::load_default_config()
            }
        },
        _ => config::load_default_config(),
    };

    init_logging(&app_config.logging.log_level);

    let core = match Core::init(app_config).await {
        Ok(core) => core,
        Err(e) => {
            tracing::error!(error = %e, "failed to start kiln core");
            std::process::exit(1);
        }
    };

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "kilnd started");

    #[cfg(feature = "gateway")]
    {
        let state = kiln_core::gateway::GatewayState {
            db: core.db.clone(),
            queue: core.queue.clone(),
            relay: core.relay.clone(),
            token_resolver: core.static_token_resolver(),
        };
        let bind_addr = core.config.gateway.bind_addr.clone();
        if let Err(e) = kiln_core::gateway::start_gateway(&bind_addr, state).await {
            tracing::error!(error = %e, "gateway exited with error");
            std::process::exit(1);
        }
    }

    #[cfg(not(feature = "gateway"))]
    {
        tracing::info!("gateway feature disabled; running queue workers only");
        std::future::pending::<()>().await;
    }
}

/// Daily rolling file under `~/.kiln/logs/`, verbosity from the config's
/// `log_level` unless `RUST_LOG` is set.
fn init_logging(configured_level: &str) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let log_dir = log_dir();
    let _ = std::fs::create_dir_all(&log_dir);

    let file_appender = tracing_appender::rolling::daily(&log_dir, "kilnd.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let _ = LOG_GUARD.set(guard);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(configured_level.to_string()));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false),
        )
        .try_init()
        .ok();
}

fn log_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".kiln")
        .join("logs")
}
