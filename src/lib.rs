pub mod api;
pub mod config;
pub mod error;
pub mod logic;
pub mod model;
pub mod seed;
pub mod store;

pub use api::handlers;
pub use api::routes;

pub use error::RegistryError;

pub use logic::{can_delete, checked_delete, dependent_collections, CollectionName, DeleteCheck};

pub use model::*;

pub use seed::load_seed_data;

pub use store::{MemoryStore, PostgresStore, Store};

/// Full startup path for integration testing: env, logging, config,
/// Postgres, schema, router.
pub async fn run_server() -> anyhow::Result<()> {
    use axum::serve;
    use std::sync::Arc;
    use tokio::net::TcpListener;

    dotenvy::dotenv().ok();

    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();

    let config = crate::config::AppConfig::load()?;

    let database_url = config.database_url()?;
    let postgres_store = crate::store::PostgresStore::new(&database_url).await?;
    postgres_store.migrate().await?;

    let store = Arc::new(postgres_store);
    let app = crate::api::routes::create_router().with_state(store);

    let bind_address = config.server_address();
    let listener = TcpListener::bind(&bind_address).await?;

    serve(listener, app).await?;

    Ok(())
}
