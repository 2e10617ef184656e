use async_trait::async_trait;
use mrqueue::{BrokenArchive, ItemId, ItemWithError, StoreResult};
use sqlx::{Postgres, Transaction};
use std::time::Duration;

use crate::{
    backend::PgBackend,
    error::{db_err, from_db_ids, to_db_id},
    items::seconds,
    tables::TableInfo,
};

/// Error log of failed attempts, one row per failure
///
/// An item's rows expire together, once its newest row is older than
/// the expiry window.
pub struct PgBrokenArchive {
    insert: String,
    delete_expired: String,
}

impl PgBrokenArchive {
    pub fn new(table: &TableInfo) -> Self {
        let (t, pk) = (table.name(), table.primary_key());

        Self {
            insert: format!(
                r#"
INSERT INTO {t} ({pk}, error_message, created_at)
SELECT src.id, src.message, NOW()
FROM UNNEST($1::BIGINT[], $2::TEXT[]) AS src(id, message)
"#
            ),
            delete_expired: format!(
                r#"
WITH expired AS (
    SELECT {pk} AS item_id
    FROM {t}
    GROUP BY {pk}
    HAVING MAX(created_at) <= NOW() - make_interval(secs => $1)
    ORDER BY MAX(created_at) ASC, {pk} ASC
    LIMIT $2
),
deleted AS (
    DELETE FROM {t} AS b
    USING expired
    WHERE b.{pk} = expired.item_id
    RETURNING b.{pk} AS item_id
)
SELECT DISTINCT item_id FROM deleted
"#
            ),
        }
    }
}

#[async_trait]
impl BrokenArchive<PgBackend> for PgBrokenArchive {
    async fn insert(&self, tx: &mut Transaction<'static, Postgres>, rows: &[ItemWithError]) -> StoreResult<()> {
        if rows.is_empty() {
            return Ok(());
        }

        let ids = rows.iter().map(|row| to_db_id(row.id)).collect::<Result<Vec<_>, _>>()?;
        let messages: Vec<String> = rows.iter().map(|row| row.error.clone()).collect();

        sqlx::query(&self.insert)
            .bind(ids)
            .bind(messages)
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
