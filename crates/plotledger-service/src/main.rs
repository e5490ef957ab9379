use clap::{Parser, ValueEnum};
use plotledger_core::StoreConfig;
use plotledger_service::{build_router, ServiceConfig, ServiceState};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StorageMode {
    Auto,
    Memory,
    Postgres,
}

#[derive(Debug, Parser)]
#[command(name = "plotledgerd", version, about = "plotledger billing REST service")]
struct Cli {
    /// REST socket address to bind, e.g. 127.0.0.1:8095
    #[arg(long, default_value = "127.0.0.1:8095", env = "PLOTLEDGER_LISTEN")]
    listen: SocketAddr,
    /// Billing persistence backend. `auto` picks postgres when a database url is configured.
    #[arg(long, value_enum, default_value_t = StorageMode::Auto, env = "PLOTLEDGER_STORAGE")]
    storage: StorageMode,
    /// PostgreSQL url for charges, invoices, payments, and the journal.
    #[arg(long, env = "PLOTLEDGER_DATABASE_URL")]
    database_url: Option<String>,
    /// Max PostgreSQL pool connections.
    #[arg(long, default_value_t = 5, env = "PLOTLEDGER_PG_MAX_CONNECTIONS")]
    pg_max_connections: u32,
    /// JSON file with tenant users and plot ownerships.
    #[arg(long, env = "PLOTLEDGER_DIRECTORY_SEED")]
    directory_seed: Option<PathBuf>,
    /// Shared secret for payment webhook signatures. Unset disables verification.
    #[arg(long, env = "PLOTLEDGER_WEBHOOK_SECRET", hide_env_values = true)]
    webhook_secret: Option<String>,
    /// Base URL the checkout links point at.
    #[arg(long, default_value = "http://127.0.0.1:8095", env = "PLOTLEDGER_CHECKOUT_BASE_URL")]
    checkout_base_url: String,
    /// Provider name stored on payments and webhook events.
    #[arg(long, default_value = "mockpay", env = "PLOTLEDGER_PROVIDER")]
    provider: String,
    /// Upper bound on plots billed by one charge.
    #[arg(long, default_value_t = 5_000, env = "PLOTLEDGER_MAX_PARTICIPANTS")]
    max_participants: usize,
}

fn resolve_storage(cli: &Cli) -> anyhow::Result<StoreConfig> {
    let resolved_url = cli
        .database_url
        .clone()
        .or_else(|| std::env::var("DATABASE_URL").ok());

    let storage = match cli.storage {
        StorageMode::Memory => StoreConfig::Memory,
        StorageMode::Postgres => {
            let database_url = resolved_url.ok_or_else(|| {
                anyhow::anyhow!("storage=postgres requires --database-url or DATABASE_URL")
            })?;
            StoreConfig::Postgres {
                database_url,
                max_connections: cli.pg_max_connections,
            }
        }
        StorageMode::Auto => match resolved_url {
            Some(database_url) => StoreConfig::Postgres {
                database_url,
                max_connections: cli.pg_max_connections,
            },
            None => StoreConfig::Memory,
        },
    };

    Ok(storage)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("plotledger_service=info,info")),
        )
        .init();

    let cli = Cli::parse();
    let storage = resolve_storage(&cli)?;
    info!(storage = storage.label(), "billing storage selected");
    let config = ServiceConfig {
        storage,
        directory_seed: cli.directory_seed,
        provider_name: cli.provider,
        checkout_base_url: cli.checkout_base_url,
        webhook_secret: cli.webhook_secret,
        max_participants: cli.max_participants,
    };
    let state = ServiceState::bootstrap(config).await?;
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(cli.listen).await?;
    info!("plotledger-service REST listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
