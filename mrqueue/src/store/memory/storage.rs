use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::trace;

use crate::{
    clock::{Clock, SystemClock},
    error::StoreResult,
    store::{QueueStorage, TxManager},
    types::{ItemId, ItemStatus},
};

use super::tables::{MemoryBrokenArchive, MemoryCompletedArchive, MemoryItemStore};

/// Active queue row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemRow {
    pub status: ItemStatus,
    pub remaining_attempts: u32,
    /// Visibility time for READY rows, last transition time otherwise
    pub updated_at: DateTime<Utc>,
}

/// Entry of the broken archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokenEntry {
    pub id: ItemId,
    pub error: String,
    pub created_at: DateTime<Utc>,
}

/// All tables of the in-memory engine
#[derive(Debug, Clone, Default)]
pub struct MemoryState {
    pub(crate) items: BTreeMap<ItemId, ItemRow>,
    pub(crate) completed: BTreeMap<ItemId, DateTime<Utc>>,
    /// Broken entries grouped by item, oldest first
    pub(crate) broken: BTreeMap<ItemId, Vec<BrokenEntry>>,
}

impl MemoryState {
    pub fn item(&self, id: ItemId) -> Option<&ItemRow> {
        self.items.get(&id)
    }

    pub fn status_of(&self, id: ItemId) -> Option<ItemStatus> {
        self.items.get(&id).map(|row| row.status)
    }

    pub fn attempts_of(&self, id: ItemId) -> Option<u32> {
        self.items.get(&id).map(|row| row.remaining_attempts)
    }

    pub fn items_in(&self, status: ItemStatus) -> Vec<ItemId> {
        self.items
            .iter()
            .filter(|(_, row)| row.status == status)
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    pub fn is_completed(&self, id: ItemId) -> bool {
        self.completed.contains_key(&id)
    }

    pub fn completed_ids(&self) -> Vec<ItemId> {
        self.completed.keys().copied().collect()
    }

    /// Broken entries recorded for one item, oldest first
    pub fn broken_entries(&self, id: ItemId) -> Vec<&BrokenEntry> {
        self.broken.get(&id).map(|entries| entries.iter().collect()).unwrap_or_default()
    }

    pub fn broken_count(&self) -> usize {
        self.broken.values().map(Vec::len).sum()
    }
}

/// Prior values of every row a unit of work touched
///
/// Only the first write to a row is recorded, so replaying the log
/// restores the state seen at `begin`.
#[derive(Debug, Default)]
struct UndoLog {
    items: BTreeMap<ItemId, Option<ItemRow>>,
    completed: BTreeMap<ItemId, Option<DateTime<Utc>>>,
    broken: BTreeMap<ItemId, Option<Vec<BrokenEntry>>>,
}

impl UndoLog {
    fn replay(self, state: &mut MemoryState) {
        restore(&mut state.items, self.items);
        restore(&mut state.completed, self.completed);
        restore(&mut state.broken, self.broken);
    }
}

fn restore<V>(table: &mut BTreeMap<ItemId, V>, prior: BTreeMap<ItemId, Option<V>>) {
    for (id, value) in prior {
        match value {
            Some(value) => {
                table.insert(id, value);
            }
            None => {
                table.remove(&id);
            }
        }
    }
}

/// Unit of work of the in-memory engine
///
/// Holds the table lock for its whole lifetime, so units of work are fully
/// serialised. Writes go straight to the tables and record the prior value
/// of each touched row; the log is replayed unless the unit is committed,
/// so rollback costs are proportional to the rows written.
pub struct MemoryTx {
    state: OwnedMutexGuard<MemoryState>,
    undo: Option<UndoLog>,
    now: DateTime<Utc>,
}

impl MemoryTx {
    /// Time of the unit of work, read once at `begin`
    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn state(&self) -> &MemoryState {
        &self.state
    }

    pub(crate) fn put_item(&mut self, id: ItemId, row: ItemRow) {
        if let Some(undo) = &mut self.undo {
            undo.items.entry(id).or_insert_with(|| self.state.items.get(&id).cloned());
        }
        self.state.items.insert(id, row);
    }

    pub(crate) fn remove_item(&mut self, id: ItemId) -> Option<ItemRow> {
        if let Some(undo) = &mut self.undo {
            undo.items.entry(id).or_insert_with(|| self.state.items.get(&id).cloned());
        }
        self.state.items.remove(&id)
    }

    pub(crate) fn put_completed(&mut self, id: ItemId, at: DateTime<Utc>) {
        if let Some(undo) = &mut self.undo {
            undo.completed.entry(id).or_insert_with(|| self.state.completed.get(&id).copied());
        }
        self.state.completed.insert(id, at);
    }

    pub(crate) fn remove_completed(&mut self, id: ItemId) {
        if let Some(undo) = &mut self.undo {
            undo.completed.entry(id).or_insert_with(|| self.state.completed.get(&id).copied());
        }
        self.state.completed.remove(&id);
    }

    pub(crate) fn push_broken(&mut self, entry: BrokenEntry) {
        if let Some(undo) = &mut self.undo {
            undo.broken
                .entry(entry.id)
                .or_insert_with(|| self.state.broken.get(&entry.id).cloned());
        }
        self.state.broken.entry(entry.id).or_default().push(entry);
    }

    pub(crate) fn remove_broken(&mut self, id: ItemId) {
        if let Some(undo) = &mut self.undo {
            undo.broken.entry(id).or_insert_with(|| self.state.broken.get(&id).cloned());
        }
        self.state.broken.remove(&id);
    }
}

impl Drop for MemoryTx {
    fn drop(&mut self) {
        if let Some(undo) = self.undo.take() {
            undo.replay(&mut self.state);
        }
    }
}

/// In-memory storage engine for tests and single-process use
#[derive(Clone)]
pub struct MemoryBackend {
    state: Arc<Mutex<MemoryState>>,
    clock: Arc<dyn Clock>,
}

impl MemoryBackend {
    /// Create a new in-memory backend on the wall clock
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create a backend reading time from `clock`
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState::default())),
            clock,
        }
    }

    /// Storage with the item table and both archives
    pub fn storage(&self) -> QueueStorage<MemoryBackend> {
        QueueStorage::new(Arc::new(self.clone()), Arc::new(MemoryItemStore))
            .with_completed_archive(Arc::new(MemoryCompletedArchive))
            .with_broken_archive(Arc::new(MemoryBrokenArchive))
    }

    /// Copy of all tables (test helper)
    pub async fn snapshot(&self) -> MemoryState {
        self.state.lock().await.clone()
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TxManager for MemoryBackend {
    type Tx = MemoryTx;

    async fn begin(&self) -> StoreResult<MemoryTx> {
        let state = self.state.clone().lock_owned().await;
        Ok(MemoryTx {
            state,
            undo: Some(UndoLog::default()),
            now: self.clock.now(),
        })
    }

    async fn commit(&self, mut tx: MemoryTx) -> StoreResult<()> {
        tx.undo = None;
        trace!("Committed in-memory unit of work");
        Ok(())
    }

    async fn rollback(&self, tx: MemoryTx) -> StoreResult<()> {
        drop(tx);
        trace!("Rolled back in-memory unit of work");
        Ok(())
    }
}
