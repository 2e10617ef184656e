use async_trait::async_trait;
use mrqueue::{ItemPurger, QueueStorage, StoreError, StoreResult, TxManager};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use std::sync::Arc;
use tracing::{debug, info};

use crate::{
    broken::PgBrokenArchive,
    completed::PgCompletedArchive,
    error::PgQueueResult,
    items::PgItemStore,
    purger::PgTablePurger,
    tables::{QueueTables, TableInfo},
};

/// Pool-backed transaction manager for the queue tables
#[derive(Clone)]
pub struct PgBackend {
    pool: PgPool,
    tables: QueueTables,
}

impl PgBackend {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            tables: QueueTables::default(),
        }
    }

    /// Open a small pool against `url`
    pub async fn connect(url: &str) -> PgQueueResult<Self> {
        let pool = PgPoolOptions::new().max_connections(10).connect(url).await?;
        Ok(Self::new(pool))
    }

    pub fn with_tables(mut self, tables: QueueTables) -> Self {
        self.tables = tables;
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn tables(&self) -> &QueueTables {
        &self.tables
    }

    /// Storage with both archives enabled
    pub fn storage(&self) -> QueueStorage<PgBackend> {
        QueueStorage::new(Arc::new(self.clone()), Arc::new(PgItemStore::new(&self.tables.items)))
            .with_completed_archive(Arc::new(PgCompletedArchive::new(&self.tables.completed)))
            .with_broken_archive(Arc::new(PgBrokenArchive::new(&self.tables.broken)))
    }

    /// Purger for an application table keyed by the same IDs
    pub fn purger(&self, table: &TableInfo) -> Arc<dyn ItemPurger<PgBackend>> {
        Arc::new(PgTablePurger::new(table))
    }

    /// Create the queue tables and their indexes if they are missing
    pub async fn install_schema(&self) -> PgQueueResult<()> {
        let statements = schema_statements(&self.tables);
        let mut tx = self.pool.begin().await?;
        for statement in &statements {
            debug!("Executing schema statement: {}", statement);
            sqlx::query(statement).execute(&mut *tx).await?;
        }
        tx.commit().await?;

        info!("Installed queue schema in {}", self.tables.items.name());
        Ok(())
    }

    /// Drop the queue tables
    pub async fn drop_schema(&self) -> PgQueueResult<()> {
        for table in [&self.tables.items, &self.tables.completed, &self.tables.broken] {
            sqlx::query(&format!("DROP TABLE IF EXISTS {}", table.name()))
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }
}

fn schema_statements(tables: &QueueTables) -> Vec<String> {
    let (items, items_pk) = (tables.items.name(), tables.items.primary_key());
    let (completed, completed_pk) = (tables.completed.name(), tables.completed.primary_key());
    let (broken, broken_pk) = (tables.broken.name(), tables.broken.primary_key());

    vec![
        format!(
            r#"
CREATE TABLE IF NOT EXISTS {items} (
    {items_pk} BIGINT PRIMARY KEY,
    remaining_attempts INTEGER NOT NULL CHECK (remaining_attempts >= 0),
    item_status SMALLINT NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
)"#
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS {} ON {items} (item_status, updated_at)",
            tables.items.index_name("status_updated_idx")
        ),
        format!(
            r#"
CREATE TABLE IF NOT EXISTS {completed} (
    {completed_pk} BIGINT PRIMARY KEY,
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
)"#
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS {} ON {completed} (updated_at)",
            tables.completed.index_name("updated_idx")
        ),
        format!(
            r#"
CREATE TABLE IF NOT EXISTS {broken} (
    {broken_pk} BIGINT NOT NULL,
    error_message TEXT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
)"#
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS {} ON {broken} ({broken_pk}, created_at)",
            tables.broken.index_name("item_created_idx")
        ),
    ]
}

#[async_trait]
impl TxManager for PgBackend {
    type Tx = Transaction<'static, Postgres>;

    async fn begin(&self) -> StoreResult<Self::Tx> {
        self.pool.begin().await.map_err(StoreError::backend)
    }

    async fn commit(&self, tx: Self::Tx) -> StoreResult<()> {
        tx.commit().await.map_err(StoreError::backend)
    }

    async fn rollback(&self, tx: Self::Tx) -> StoreResult<()> {
        tx.rollback().await.map_err(StoreError::backend)
    }
}
