use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use relay_coordinator::{
    Broadcaster, CoordinatorConfig, LogNotifier, Notifier, SessionCoordinator, WebhookNotifier,
};
use relay_core::executor::CommandExecutor;
use relay_core::session::SessionStatus;
use relay_executor::{HttpExecutor, MockExecutor, MockOutcome};
use relay_store::{MemoryStore, SessionStore, SqliteStore};

#[derive(Parser)]
#[command(
    name = "relay",
    about = "Relays commands and responses between remote clients and a command executor"
)]
struct Args {
    /// Port to listen on.
    #[arg(long, default_value_t = 9790)]
    port: u16,

    /// SQLite database path. Defaults to ~/.relay/relay.db.
    #[arg(long)]
    db: Option<PathBuf>,

    /// Keep all state in memory instead of SQLite (lost on restart).
    #[arg(long)]
    in_memory: bool,

    /// Command executor endpoint. Without it, a canned executor that
    /// completes every command is used (handy for local runs).
    #[arg(long)]
    executor_url: Option<String>,

    /// Upper bound on one executor round, in seconds.
    #[arg(long, default_value_t = 120)]
    executor_timeout_secs: u64,

    /// Webhook for question and terminal-status notifications.
    #[arg(long)]
    notify_url: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!("starting relay server");

    let store: Arc<dyn SessionStore> = if args.in_memory {
        tracing::info!("using in-memory session store");
        Arc::new(MemoryStore::new())
    } else {
        let db_path = args
            .db
            .unwrap_or_else(|| dirs_home().join(".relay").join("relay.db"));
        let store = SqliteStore::open(&db_path)?;
        tracing::info!(path = %db_path.display(), "using SQLite session store");
        Arc::new(store)
    };

    let executor: Arc<dyn CommandExecutor> = match &args.executor_url {
        Some(url) => {
            tracing::info!(endpoint = %url, "using HTTP command executor");
            Arc::new(HttpExecutor::new(url.clone()))
        }
        None => {
            tracing::warn!("no --executor-url given, every command completes immediately");
            Arc::new(MockExecutor::always(MockOutcome::finished(
                "No executor is configured; command acknowledged.",
                SessionStatus::Completed,
            )))
        }
    };

    let notifier: Arc<dyn Notifier> = match &args.notify_url {
        Some(url) => Arc::new(WebhookNotifier::new(url.clone())),
        None => Arc::new(LogNotifier),
    };

    let broadcaster = Arc::new(Broadcaster::new(Arc::clone(&store), 256));
    let coordinator = Arc::new(SessionCoordinator::new(
        store,
        broadcaster,
        executor,
        notifier,
        CoordinatorConfig {
            executor_timeout: Duration::from_secs(args.executor_timeout_secs),
            ..Default::default()
        },
    ));

    let config = relay_server::ServerConfig {
        port: args.port,
        ..Default::default()
    };
    let handle = relay_server::start(config, coordinator).await?;
    tracing::info!(port = handle.port, "relay server ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");

    Ok(())
}

fn dirs_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}
