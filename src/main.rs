mod config;
mod db;
mod frame;
mod routes;
mod services;
mod state;

use std::sync::Arc;

use services::account::{AccountStore, MemoryAccountStore, PgAccountStore};
use services::catalog::Catalog;

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt::init();

    let config = config::AppConfig::from_env();

    let catalog = Catalog::load(&config.catalog_path).expect("raid catalog load failed");
    let (seasons, stages, bosses) = catalog.counts();
    tracing::info!(path = %config.catalog_path.display(), seasons, stages, bosses, "raid catalog loaded");

    let accounts: Arc<dyn AccountStore> = if let Some(database_url) = &config.database_url {
        let pool = db::init_pool(database_url, config.db_max_connections)
            .await
            .expect("database init failed");
        Arc::new(PgAccountStore::new(pool))
    } else {
        let season_id = catalog.first_season_id().unwrap_or(1);
        tracing::warn!(
            session_key = %config.dev_session_key,
            season_id,
            "DATABASE_URL not set; using in-memory accounts with a single dev account"
        );
        Arc::new(MemoryAccountStore::with_dev_account(&config.dev_session_key, season_id))
    };

    let state = state::AppState::new(accounts, Arc::new(catalog), config.raid_session_ttl_secs);

    let app = routes::app(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port))
        .await
        .expect("failed to bind");

    tracing::info!(port = config.port, "raidhall listening");
    axum::serve(listener, app).await.expect("server failed");
}
