use async_trait::async_trait;
use mrqueue::{Item, ItemId, ItemStatus, ItemStore, StoreResult};
use sqlx::{Postgres, Transaction};
use std::time::Duration;

use crate::{
    backend::PgBackend,
    error::{db_err, from_db_ids, to_db_id, to_db_ids, PgQueueError},
    tables::TableInfo,
};

/// Active queue rows: `(pk, remaining_attempts, item_status, updated_at)`
///
/// `updated_at` doubles as the visibility time for READY rows, which is
/// how a ready delay is stored.
pub struct PgItemStore {
    insert: String,
    claim_ready: String,
    release_to_ready: String,
    delete_if_status: String,
    demote_to_retry: String,
    sweep_timeout: String,
    sweep_retry: String,
    delete_exhausted: String,
}

impl PgItemStore {
    pub fn new(table: &TableInfo) -> Self {
        let (t, pk) = (table.name(), table.primary_key());

        Self {
            insert: format!(
                r#"
INSERT INTO {t} ({pk}, remaining_attempts, item_status, updated_at)
SELECT src.id, src.attempts, $4, NOW() + make_interval(secs => src.delay)
FROM UNNEST($1::BIGINT[], $2::INTEGER[], $3::DOUBLE PRECISION[]) AS src(id, attempts, delay)
"#
            ),
            claim_ready: format!(
                r#"
WITH ready AS (
    SELECT {pk} AS item_id
    FROM {t}
    WHERE item_status = $1 AND updated_at <= NOW()
    ORDER BY updated_at ASC, {pk} ASC
    LIMIT $3
    FOR UPDATE SKIP LOCKED
)
UPDATE {t} AS q
SET item_status = $2, updated_at = NOW()
FROM ready
WHERE q.{pk} = ready.item_id
RETURNING ready.item_id
"#
            ),
            release_to_ready: format!(
                r#"
UPDATE {t}
SET item_status = $3, updated_at = NOW()
WHERE {pk} = ANY($1) AND item_status = $2
"#
            ),
            delete_if_status: format!("DELETE FROM {t} WHERE {pk} = $1 AND item_status = $2"),
            demote_to_retry: format!(
                r#"
UPDATE {t}
SET item_status = $3, remaining_attempts = GREATEST(remaining_attempts - 1, 0), updated_at = NOW()
WHERE {pk} = $1 AND item_status = $2
"#
            ),
            sweep_timeout: format!(
                r#"
WITH stuck AS (
    SELECT {pk} AS item_id
    FROM {t}
    WHERE item_status = $1 AND updated_at < NOW() - make_interval(secs => $2)
    ORDER BY updated_at ASC, {pk} ASC
    LIMIT $4
    FOR UPDATE SKIP LOCKED
)
UPDATE {t} AS q
SET item_status = $3, updated_at = NOW()
FROM stuck
WHERE q.{pk} = stuck.item_id
RETURNING stuck.item_id
"#
            ),
            sweep_retry: format!(
                r#"
WITH due AS (
    SELECT {pk} AS item_id
    FROM {t}
    WHERE item_status = $1
      AND updated_at <= NOW() - make_interval(secs => $2)
      AND remaining_attempts > 0
    ORDER BY updated_at ASC, {pk} ASC
    LIMIT $4
    FOR UPDATE SKIP LOCKED
)
UPDATE {t} AS q
SET item_status = $3, updated_at = NOW()
FROM due
WHERE q.{pk} = due.item_id
RETURNING due.item_id
"#
            ),
            delete_exhausted: format!(
                r#"
WITH exhausted AS (
    SELECT {pk} AS item_id
    FROM {t}
    WHERE item_status = $1 AND remaining_attempts = 0
    ORDER BY updated_at ASC, {pk} ASC
    LIMIT $2
    FOR UPDATE SKIP LOCKED
)
DELETE FROM {t} AS q
USING exhausted
WHERE q.{pk} = exhausted.item_id
RETURNING exhausted.item_id
"#
            ),
        }
    }

    async fn fetch_ids(
        tx: &mut Transaction<'static, Postgres>,
        query: sqlx::query::QueryScalar<'_, Postgres, i64, sqlx::postgres::PgArguments>,
    ) -> StoreResult<Vec<ItemId>> {
        let raw = query.fetch_all(&mut **tx).await.map_err(db_err)?;
        Ok(from_db_ids(raw)?)
    }
}

pub(crate) fn seconds(d: Duration) -> f64 {
    d.as_secs_f64()
}

#[async_trait]
impl ItemStore<PgBackend> for PgItemStore {
    async fn insert(&self, tx: &mut Transaction<'static, Postgres>, items: &[Item]) -> StoreResult<()> {
        if items.is_empty() {
            return Ok(());
        }

        let mut ids = Vec::with_capacity(items.len());
        let mut attempts = Vec::with_capacity(items.len());
        let mut delays = Vec::with_capacity(items.len());
        for item in items {
            ids.push(to_db_id(item.id)?);
            attempts.push(
                i32::try_from(item.retry_attempts).map_err(|_| PgQueueError::AttemptsOutOfRange(item.retry_attempts))?,
            );
            delays.push(seconds(item.ready_delay));
        }

        sqlx::query(&self.insert)
            .bind(ids)
            .bind(attempts)
            .bind(delays)
            .bind(ItemStatus::Ready.as_code())
            .execute(&mut **tx)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn claim_ready_batch(&self, tx: &mut Transaction<'static, Postgres>, limit: u32) -> StoreResult<Vec<ItemId>> {
        let query = sqlx::query_scalar(&self.claim_ready)
            .bind(ItemStatus::Ready.as_code())
            .bind(ItemStatus::Processing.as_code())
            .bind(i64::from(limit));
        Self::fetch_ids(tx, query).await
    }

    async fn release_to_ready(&self, tx: &mut Transaction<'static, Postgres>, ids: &[ItemId]) -> StoreResult<u64> {
        let result = sqlx::query(&self.release_to_ready)
            .bind(to_db_ids(ids)?)
            .bind(ItemStatus::Processing.as_code())
            .bind(ItemStatus::Ready.as_code())
            .execute(&mut **tx)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected())
    }

    async fn delete_if_status(
        &self,
        tx: &mut Transaction<'static, Postgres>,
        id: ItemId,
        status: ItemStatus,
    ) -> StoreResult<u64> {
        let result = sqlx::query(&self.delete_if_status)
            .bind(to_db_id(id)?)
            .bind(status.as_code())
            .execute(&mut **tx)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected())
    }

    async fn demote_processing_to_retry(&self, tx: &mut Transaction<'static, Postgres>, id: ItemId) -> StoreResult<u64> {
        let result = sqlx::query(&self.demote_to_retry)
            .bind(to_db_id(id)?)
            .bind(ItemStatus::Processing.as_code())
            .bind(ItemStatus::Retry.as_code())
            .execute(&mut **tx)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected())
    }

    async fn sweep_processing_to_retry_by_timeout(
        &self,
        tx: &mut Transaction<'static, Postgres>,
        timeout: Duration,
        limit: u32,
    ) -> StoreResult<Vec<ItemId>> {
        let query = sqlx::query_scalar(&self.sweep_timeout)
            .bind(ItemStatus::Processing.as_code())
            .bind(seconds(timeout))
            .bind(ItemStatus::Retry.as_code())
            .bind(i64::from(limit));
        Self::fetch_ids(tx, query).await
    }

    async fn sweep_retry_to_ready(
        &self,
        tx: &mut Transaction<'static, Postgres>,
        delay: Duration,
        limit: u32,
    ) -> StoreResult<Vec<ItemId>> {
        let query = sqlx::query_scalar(&self.sweep_retry)
            .bind(ItemStatus::Retry.as_code())
            .bind(seconds(delay))
            .bind(ItemStatus::Ready.as_code())
            .bind(i64::from(limit));
        Self::fetch_ids(tx, query).await
    }

    async fn delete_retry_exhausted(&self, tx: &mut Transaction<'static, Postgres>, limit: u32) -> StoreResult<Vec<ItemId>> {
        let query = sqlx::query_scalar(&self.delete_exhausted)
            .bind(ItemStatus::Retry.as_code())
            .bind(i64::from(limit));
        Self::fetch_ids(tx, query).await
    }
}
