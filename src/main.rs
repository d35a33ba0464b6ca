use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use khyati::auth::Auth;
use khyati::config::{Cli, Config};
use khyati::db::{self, KvStore};
use khyati::routes;
use khyati::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Parse CLI args and load config
    let cli = Cli::parse();
    let data_dir = Config::data_dir(&cli);
    std::fs::create_dir_all(&data_dir)?;
    tracing::info!("Data directory: {}", data_dir.display());

    let config = Config::load(&cli)?;

    // Initialize database
    let pool = db::create_pool(config.db_path())?;
    db::run_migrations(&pool)?;
    let kv = KvStore::new(pool);

    // Pick the auth backend once; failures fall back to the demo store
    let auth = Auth::from_config(
        &config.remote,
        &config.auth,
        kv,
        config.site.content_dir.as_deref(),
    )
    .await;
    let status = auth.status().clone();
    match &status.init_error {
        Some(err) => tracing::warn!("Auth backend: {} ({})", status.backend, err),
        None => tracing::info!("Auth backend: {}", status.backend),
    }

    // Build app state
    let state = AppState::new(config.clone(), Arc::new(auth));
    state.start();

    let app = routes::app(state);

    // Start server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    tracing::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
