//! Postgres + pgvector persistence for snapshots and agent work.

pub mod agent_store;
pub mod schema;
pub mod snapshot_store;

pub use agent_store::AgentStore;
pub use schema::*;
pub use snapshot_store::SnapshotStore;

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;
use tracing::info;

/// Shared handle over the relational + vector store.
#[derive(Clone)]
pub struct ContextStore {
    pub snapshots: SnapshotStore,
    pub agents: AgentStore,
    pool: PgPool,
}

impl ContextStore {
    /// Connect with a bounded pool and apply the idempotent schema.
    pub async fn connect(database_url: &str, acquire_timeout: Duration) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(acquire_timeout)
            .connect(database_url)
            .await?;

        sqlx::raw_sql(schema::SCHEMA_SQL).execute(&pool).await?;
        info!("Store connected, schema applied");

        Ok(Self {
            snapshots: SnapshotStore::new(pool.clone()),
            agents: AgentStore::new(pool.clone()),
            pool,
        })
    }

    /// Wrap an existing pool; used when the schema is managed externally.
    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            snapshots: SnapshotStore::new(pool.clone()),
            agents: AgentStore::new(pool.clone()),
            pool,
        }
    }

    pub async fn ping(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").execute(&self.pool).await.map(|_| ())
    }

    /// Drain the pool during shutdown.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
