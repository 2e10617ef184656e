//! Runs against a live database when `MRQUEUE_TEST_DATABASE_URL` is set;
//! each test works in its own randomly named tables.

use std::sync::Arc;
use std::time::Duration;

use mrqueue::{
    BoxError, Changer, Cleaner, Consumer, Item, ItemId, ItemStatus, ItemStore, NoPreCommit, NoopEmitter, Producer,
    Queue, TxManager,
};
use mrqueue_postgres::{PgBackend, PgItemStore, QueueTables, TableInfo};

async fn create_backend() -> Option<PgBackend> {
    let Ok(url) = std::env::var("MRQUEUE_TEST_DATABASE_URL") else {
        eprintln!("MRQUEUE_TEST_DATABASE_URL not set, skipping");
        return None;
    };
    let suffix: u32 = rand::random();
    let tables = QueueTables::with_prefix(&format!("mrqueue_test_{suffix}")).unwrap();
    let backend = PgBackend::connect(&url).await.unwrap().with_tables(tables);
    backend.install_schema().await.unwrap();
    Some(backend)
}

fn create_queue(backend: &PgBackend) -> Queue<PgBackend> {
    Queue::new(backend.storage()).with_events(Arc::new(NoopEmitter))
}

async fn status_of(backend: &PgBackend, id: u64) -> Option<(i16, i32)> {
    let sql = format!(
        "SELECT item_status, remaining_attempts FROM {} WHERE item_id = $1",
        backend.tables().items.name()
    );
    sqlx::query_as(&sql)
        .bind(id as i64)
        .fetch_optional(backend.pool())
        .await
        .unwrap()
}

async fn count(backend: &PgBackend, table: &TableInfo) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table.name()))
        .fetch_one(backend.pool())
        .await
        .unwrap()
}

#[test_log::test(tokio::test)]
async fn test_claim_commit_and_reject() {
    let Some(backend) = create_backend().await else { return };
    let queue = create_queue(&backend);

    let items: Vec<Item> = (1..=3u64).map(|id| Item::new(id, 2)).collect();
    queue.producer().appends(&items).await.unwrap();
    queue
        .producer()
        .append(Item::new(4u64, 1).with_ready_delay(Duration::from_secs(3600)))
        .await
        .unwrap();

    let consumer = queue.consumer();
    let mut claimed = consumer.read_items(10).await.unwrap();
    claimed.sort();
    assert_eq!(claimed, vec![ItemId(1), ItemId(2), ItemId(3)]);
    assert!(consumer.read_items(10).await.unwrap().is_empty());

    consumer.commit(ItemId(1), Box::new(NoPreCommit)).await.unwrap();
    let cause: BoxError = "downstream refused".into();
    consumer.reject(ItemId(2), &*cause).await.unwrap();
    consumer.cancel_items(&[ItemId(3)]).await.unwrap();

    assert_eq!(status_of(&backend, 1).await, None);
    assert_eq!(status_of(&backend, 2).await, Some((ItemStatus::Retry.as_code(), 1)));
    assert_eq!(status_of(&backend, 3).await, Some((ItemStatus::Ready.as_code(), 2)));
    assert_eq!(count(&backend, &backend.tables().completed).await, 1);
    assert_eq!(count(&backend, &backend.tables().broken).await, 1);

    // Committing twice loses the status guard
    let err = consumer.commit(ItemId(1), Box::new(NoPreCommit)).await.unwrap_err();
    assert!(err.is_status_mismatch());
    assert_eq!(count(&backend, &backend.tables().completed).await, 1);

    backend.drop_schema().await.unwrap();
}

#[test_log::test(tokio::test)]
async fn test_claims_skip_locked_rows() {
    let Some(backend) = create_backend().await else { return };
    let queue = create_queue(&backend);
    let items: Vec<Item> = (1..=4u64).map(|id| Item::new(id, 1)).collect();
    queue.producer().appends(&items).await.unwrap();

    let store = PgItemStore::new(&backend.tables().items);
    let mut first = backend.begin().await.unwrap();
    let mut held = store.claim_ready_batch(&mut first, 2).await.unwrap();
    held.sort();
    assert_eq!(held, vec![ItemId(1), ItemId(2)]);

    // The open transaction still locks 1 and 2
    let mut others = queue.consumer().read_items(10).await.unwrap();
    others.sort();
    assert_eq!(others, vec![ItemId(3), ItemId(4)]);

    backend.rollback(first).await.unwrap();
    let mut released = queue.consumer().read_items(10).await.unwrap();
    released.sort();
    assert_eq!(released, vec![ItemId(1), ItemId(2)]);

    backend.drop_schema().await.unwrap();
}

#[test_log::test(tokio::test)]
async fn test_sweeps_and_cleanup() {
    let Some(backend) = create_backend().await else { return };
    let queue = create_queue(&backend);
    queue
        .producer()
        .appends(&[Item::new(1u64, 2), Item::new(2u64, 1)])
        .await
        .unwrap();

    let consumer = queue.consumer();
    consumer.read_items(10).await.unwrap();
    let cause: BoxError = "bad payload".into();
    consumer.reject(ItemId(2), &*cause).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let changer = queue
        .changer()
        .with_retry_timeout(Duration::ZERO)
        .with_retry_delay(Duration::ZERO);
    assert_eq!(
        changer.change_processing_to_retry_by_timeout(10).await.unwrap(),
        vec![ItemId(1)]
    );
    // Timeout recovery keeps the attempt budget
    assert_eq!(status_of(&backend, 1).await, Some((ItemStatus::Retry.as_code(), 2)));

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(changer.change_retry_to_ready(10).await.unwrap(), vec![ItemId(1)]);

    let cleaner = queue
        .cleaner()
        .with_broken_expiry(Duration::ZERO)
        .with_completed_expiry(Duration::ZERO);
    assert_eq!(cleaner.remove_items_without_attempts(10).await.unwrap(), vec![ItemId(2)]);

    // Item 1 has a timeout entry and item 2 a rejection entry
    let mut broken = cleaner.remove_broken_items(10).await.unwrap();
    broken.sort();
    assert_eq!(broken, vec![ItemId(1), ItemId(2)]);
    assert_eq!(count(&backend, &backend.tables().broken).await, 0);

    backend.drop_schema().await.unwrap();
}

#[test_log::test(tokio::test)]
async fn test_purger_removes_application_rows() {
    let Some(backend) = create_backend().await else { return };
    let orders = TableInfo::new(format!("{}_orders", backend.tables().items.name()), "item_id").unwrap();
    sqlx::query(&format!("CREATE TABLE {} (item_id BIGINT PRIMARY KEY)", orders.name()))
        .execute(backend.pool())
        .await
        .unwrap();
    sqlx::query(&format!("INSERT INTO {} (item_id) VALUES (1), (2)", orders.name()))
        .execute(backend.pool())
        .await
        .unwrap();

    let queue = create_queue(&backend).with_purger(backend.purger(&orders));
    queue.producer().append(Item::new(1u64, 1)).await.unwrap();
    let consumer = queue.consumer();
    consumer.read_items(1).await.unwrap();
    consumer.commit(ItemId(1), Box::new(NoPreCommit)).await.unwrap();

    let removed = queue
        .cleaner()
        .with_completed_expiry(Duration::ZERO)
        .remove_completed_items(10)
        .await
        .unwrap();
    assert_eq!(removed, vec![ItemId(1)]);
    assert_eq!(count(&backend, &orders).await, 1);

    sqlx::query(&format!("DROP TABLE {}", orders.name()))
        .execute(backend.pool())
        .await
        .unwrap();
    backend.drop_schema().await.unwrap();
}
