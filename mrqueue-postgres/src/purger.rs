use async_trait::async_trait;
use mrqueue::{ItemId, ItemPurger, StoreResult};
use sqlx::{Postgres, Transaction};

use crate::{
    backend::PgBackend,
    error::{db_err, to_db_ids},
    tables::TableInfo,
};

/// Deletes application rows keyed by the queue's item IDs
pub struct PgTablePurger {
    delete: String,
}

impl PgTablePurger {
    pub fn new(table: &TableInfo) -> Self {
        Self {
            delete: format!("DELETE FROM {} WHERE {} = ANY($1)", table.name(), table.primary_key()),
        }
    }
}

#[async_trait]
impl ItemPurger<PgBackend> for PgTablePurger {
    async fn purge(&self, tx: &mut Transaction<'static, Postgres>, ids: &[ItemId]) -> StoreResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(&self.delete)
            .bind(to_db_ids(ids)?)
            .execute(&mut **tx)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected())
    }
}
