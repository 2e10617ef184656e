use mrqueue::{ItemId, StoreError};
use thiserror::Error;

pub type PgQueueResult<T> = Result<T, PgQueueError>;

#[derive(Error, Debug)]
pub enum PgQueueError {
    #[error("invalid SQL identifier: {0:?}")]
    InvalidIdentifier(String),

    #[error("item id {0} does not fit in BIGINT")]
    IdOutOfRange(u64),

    #[error("negative item id {0} in queue table")]
    NegativeId(i64),

    #[error("retry attempts {0} do not fit in INTEGER")]
    AttemptsOutOfRange(u32),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl From<PgQueueError> for StoreError {
    fn from(err: PgQueueError) -> Self {
        StoreError::backend(err)
    }
}

pub(crate) fn db_err(err: sqlx::Error) -> StoreError {
    StoreError::backend(PgQueueError::Database(err))
}

pub(crate) fn to_db_id(id: ItemId) -> Result<i64, PgQueueError> {
    i64::try_from(id.get()).map_err(|_| PgQueueError::IdOutOfRange(id.get()))
}

pub(crate) fn to_db_ids(ids: &[ItemId]) -> Result<Vec<i64>, PgQueueError> {
    ids.iter().map(|id| to_db_id(*id)).collect()
}

pub(crate) fn from_db_ids(raw: Vec<i64>) -> Result<Vec<ItemId>, PgQueueError> {
    raw.into_iter()
        .map(|id| u64::try_from(id).map(ItemId).map_err(|_| PgQueueError::NegativeId(id)))
        .collect()
}
