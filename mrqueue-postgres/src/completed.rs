use async_trait::async_trait;
use mrqueue::{CompletedArchive, ItemId, StoreResult};
use sqlx::{Postgres, Transaction};
use std::time::Duration;

use crate::{
    backend::PgBackend,
    error::{db_err, from_db_ids, to_db_id},
    items::seconds,
    tables::TableInfo,
};

/// Committed item IDs with the time they were committed
pub struct PgCompletedArchive {
    insert: String,
    delete_expired: String,
}

impl PgCompletedArchive {
    pub fn new(table: &TableInfo) -> Self {
        let (t, pk) = (table.name(), table.primary_key());

        Self {
            insert: format!("INSERT INTO {t} ({pk}, updated_at) VALUES ($1, NOW())"),
            delete_expired: format!(
                r#"
WITH expired AS (
    SELECT {pk} AS item_id
    FROM {t}
    WHERE updated_at <= NOW() - make_interval(secs => $1)
    ORDER BY updated_at ASC, {pk} ASC
    LIMIT $2
    FOR UPDATE SKIP LOCKED
)
DELETE FROM {t} AS c
USING expired
WHERE c.{pk} = expired.item_id
RETURNING expired.item_id
"#
            ),
        }
    }
}

#[async_trait]
impl CompletedArchive<PgBackend> for PgCompletedArchive {
    async fn insert(&self, tx: &mut Transaction<'static, Postgres>, id: ItemId) -> StoreResult<()> {
        sqlx::query(&self.insert)
            .bind(to_db_id(id)?)
            .execute(&mut **tx)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn delete_expired(
        &self,
        tx: &mut Transaction<'static, Postgres>,
        expiry: Duration,
        limit: u32,
    ) -> StoreResult<Vec<ItemId>> {
        let raw: Vec<i64> = sqlx::query_scalar(&self.delete_expired)
            .bind(seconds(expiry))
            .bind(i64::from(limit))
            .fetch_all(&mut **tx)
            .await
            .map_err(db_err)?;
        Ok(from_db_ids(raw)?)
    }
}
