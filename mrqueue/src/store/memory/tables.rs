use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use crate::{
    error::{StoreError, StoreResult},
    store::{BrokenArchive, CompletedArchive, ItemStore},
    types::{Item, ItemId, ItemStatus, ItemWithError},
};

use super::storage::{BrokenEntry, ItemRow, MemoryBackend, MemoryTx};

fn to_chrono(d: Duration) -> StoreResult<chrono::Duration> {
    chrono::Duration::from_std(d).map_err(StoreError::backend)
}

/// `now - d`, saturating at the earliest representable time
fn before(now: DateTime<Utc>, d: Duration) -> StoreResult<DateTime<Utc>> {
    Ok(now.checked_sub_signed(to_chrono(d)?).unwrap_or(DateTime::<Utc>::MIN_UTC))
}

/// IDs of rows matching `filter`, oldest `updated_at` first, at most `limit`
fn select_oldest<F>(rows: &BTreeMap<ItemId, ItemRow>, limit: u32, filter: F) -> Vec<ItemId>
where
    F: Fn(&ItemRow) -> bool,
{
    let mut picked: Vec<(DateTime<Utc>, ItemId)> = rows
        .iter()
        .filter(|(_, row)| filter(row))
        .map(|(id, row)| (row.updated_at, *id))
        .collect();
    picked.sort_unstable();
    picked.truncate(limit as usize);
    picked.into_iter().map(|(_, id)| id).collect()
}

fn transition(tx: &mut MemoryTx, ids: &[ItemId], to: ItemStatus) {
    let now = tx.now();
    for id in ids {
        if let Some(row) = tx.state().item(*id).cloned() {
            tx.put_item(
                *id,
                ItemRow {
                    status: to,
                    updated_at: now,
                    ..row
                },
            );
        }
    }
}

/// Item table of the in-memory engine
#[derive(Debug, Default, Clone, Copy)]
pub struct MemoryItemStore;

#[async_trait]
impl ItemStore<MemoryBackend> for MemoryItemStore {
    async fn insert(&self, tx: &mut MemoryTx, items: &[Item]) -> StoreResult<()> {
        let now = tx.now();

        let mut seen = HashSet::with_capacity(items.len());
        for item in items {
            if tx.state().items.contains_key(&item.id) || !seen.insert(item.id) {
                return Err(StoreError::message(format!("duplicate key: item {}", item.id)));
            }
        }

        for item in items {
            let visible_at = now
                .checked_add_signed(to_chrono(item.ready_delay)?)
                .unwrap_or(DateTime::<Utc>::MAX_UTC);
            tx.put_item(
                item.id,
                ItemRow {
                    status: ItemStatus::Ready,
                    remaining_attempts: item.retry_attempts,
                    updated_at: visible_at,
                },
            );
        }
        Ok(())
    }

    async fn claim_ready_batch(&self, tx: &mut MemoryTx, limit: u32) -> StoreResult<Vec<ItemId>> {
        let now = tx.now();
        let ids = select_oldest(&tx.state().items, limit, |row| {
            row.status == ItemStatus::Ready && row.updated_at <= now
        });
        transition(tx, &ids, ItemStatus::Processing);
        Ok(ids)
    }

    async fn release_to_ready(&self, tx: &mut MemoryTx, ids: &[ItemId]) -> StoreResult<u64> {
        let still_processing: Vec<ItemId> = ids
            .iter()
            .copied()
            .filter(|id| tx.state().status_of(*id) == Some(ItemStatus::Processing))
            .collect();
        transition(tx, &still_processing, ItemStatus::Ready);
        Ok(still_processing.len() as u64)
    }

    async fn delete_if_status(&self, tx: &mut MemoryTx, id: ItemId, status: ItemStatus) -> StoreResult<u64> {
        if tx.state().items.get(&id).is_some_and(|row| row.status == status) {
            tx.remove_item(id);
            Ok(1)
        } else {
            Ok(0)
        }
    }

    async fn demote_processing_to_retry(&self, tx: &mut MemoryTx, id: ItemId) -> StoreResult<u64> {
        let now = tx.now();
        match tx.state().item(id).cloned() {
            Some(row) if row.status == ItemStatus::Processing => {
                tx.put_item(
                    id,
                    ItemRow {
                        status: ItemStatus::Retry,
                        remaining_attempts: row.remaining_attempts.saturating_sub(1),
                        updated_at: now,
                    },
                );
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn sweep_processing_to_retry_by_timeout(
        &self,
        tx: &mut MemoryTx,
        timeout: Duration,
        limit: u32,
    ) -> StoreResult<Vec<ItemId>> {
        let deadline = before(tx.now(), timeout)?;
        let ids = select_oldest(&tx.state().items, limit, |row| {
            row.status == ItemStatus::Processing && row.updated_at < deadline
        });
        transition(tx, &ids, ItemStatus::Retry);
        Ok(ids)
    }

    async fn sweep_retry_to_ready(&self, tx: &mut MemoryTx, delay: Duration, limit: u32) -> StoreResult<Vec<ItemId>> {
        let deadline = before(tx.now(), delay)?;
        let ids = select_oldest(&tx.state().items, limit, |row| {
            row.status == ItemStatus::Retry && row.updated_at <= deadline && row.remaining_attempts > 0
        });
        transition(tx, &ids, ItemStatus::Ready);
        Ok(ids)
    }

    async fn delete_retry_exhausted(&self, tx: &mut MemoryTx, limit: u32) -> StoreResult<Vec<ItemId>> {
        let ids = select_oldest(&tx.state().items, limit, |row| {
            row.status == ItemStatus::Retry && row.remaining_attempts == 0
        });
        for id in &ids {
            tx.remove_item(*id);
        }
        Ok(ids)
    }
}

/// Completed archive of the in-memory engine
#[derive(Debug, Default, Clone, Copy)]
pub struct MemoryCompletedArchive;

#[async_trait]
impl CompletedArchive<MemoryBackend> for MemoryCompletedArchive {
    async fn insert(&self, tx: &mut MemoryTx, id: ItemId) -> StoreResult<()> {
        let now = tx.now();
        if tx.state().is_completed(id) {
            return Err(StoreError::message(format!("duplicate key: completed item {id}")));
        }
        tx.put_completed(id, now);
        Ok(())
    }

    async fn delete_expired(&self, tx: &mut MemoryTx, expiry: Duration, limit: u32) -> StoreResult<Vec<ItemId>> {
        let deadline = before(tx.now(), expiry)?;

        let mut expired: Vec<(DateTime<Utc>, ItemId)> = tx
            .state()
            .completed
            .iter()
            .filter(|(_, at)| **at <= deadline)
            .map(|(id, at)| (*at, *id))
            .collect();
        expired.sort_unstable();
        expired.truncate(limit as usize);

        Ok(expired
            .into_iter()
            .map(|(_, id)| {
                tx.remove_completed(id);
                id
            })
            .collect())
    }
}

/// Broken archive of the in-memory engine
#[derive(Debug, Default, Clone, Copy)]
pub struct MemoryBrokenArchive;

#[async_trait]
impl BrokenArchive<MemoryBackend> for MemoryBrokenArchive {
    async fn insert(&self, tx: &mut MemoryTx, rows: &[ItemWithError]) -> StoreResult<()> {
        let now = tx.now();
        for row in rows {
            tx.push_broken(BrokenEntry {
                id: row.id,
                error: row.error.clone(),
                created_at: now,
            });
        }
        Ok(())
    }

    async fn delete_expired(&self, tx: &mut MemoryTx, expiry: Duration, limit: u32) -> StoreResult<Vec<ItemId>> {
        let deadline = before(tx.now(), expiry)?;

        let mut expired: Vec<(DateTime<Utc>, ItemId)> = tx
            .state()
            .broken
            .iter()
            .filter_map(|(id, entries)| entries.iter().map(|entry| entry.created_at).max().map(|at| (at, *id)))
            .filter(|(at, _)| *at <= deadline)
            .collect();
        expired.sort_unstable();
        expired.truncate(limit as usize);

        let ids: Vec<ItemId> = expired.into_iter().map(|(_, id)| id).collect();
        for id in &ids {
            tx.remove_broken(*id);
        }
        Ok(ids)
    }
}
