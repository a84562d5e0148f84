use crate::{adapters::persistence::PostgresPersistence, infra::db::init_db};

pub mod app;
pub mod billing_hooks;
pub mod config;
pub mod correlation_cache;
pub mod db;
pub mod error;
pub mod http_client;
pub mod setup;
pub mod stripe_client;

pub async fn postgres_persistence(database_url: &str) -> anyhow::Result<PostgresPersistence> {
    let pool = init_db(database_url).await?;
    let persistence = PostgresPersistence::new(pool);
    Ok(persistence)
}
