use std::sync::Arc;

use axum::serve;
use moor_registry::api::routes::create_router;
use moor_registry::config::AppConfig;
use moor_registry::seed;
use moor_registry::store::PostgresStore;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    use env_logger::Builder;
    use log::LevelFilter;

    Builder::new()
        .filter_level(LevelFilter::Info)
        .filter_module("sqlx", LevelFilter::Warn)
        .init();

    let config = AppConfig::load()?;
    log::info!(
        "configuration loaded: server={}:{}",
        config.server.host,
        config.server.port
    );

    log::info!("connecting to PostgreSQL");
    let database_url = config.database_url()?;
    let postgres_store = PostgresStore::new(&database_url).await?;

    log::info!("running schema migrations");
    postgres_store.migrate().await?;

    let store = Arc::new(postgres_store);

    if std::env::var("LOAD_SEED_DATA").unwrap_or_default() == "true" {
        log::info!("loading seed data");
        seed::load_seed_data(&*store).await?;
    }

    let app = create_router().with_state(store);
    let bind_address = config.server_address();
    let listener = TcpListener::bind(&bind_address).await?;
    log::info!("registry server running on http://{}", bind_address);

    serve(listener, app).await?;

    Ok(())
}
