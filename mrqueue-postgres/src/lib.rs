//! PostgreSQL storage for mrqueue
//!
//! Every queue component runs its statements inside one `sqlx` transaction,
//! so `NOW()` is fixed per unit of work. Claims and recovery sweeps lock rows
//! with `FOR UPDATE SKIP LOCKED`, which lets any number of consumers poll the
//! same table without handing out an item twice.
//!
//! ```rust,no_run
//! use mrqueue::prelude::*;
//! use mrqueue_postgres::PgBackend;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = PgBackend::connect("postgres://localhost/app").await?;
//! backend.install_schema().await?;
//!
//! let queue = Queue::new(backend.storage());
//! queue.producer().append(Item::new(7u64, 3)).await?;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod broken;
pub mod completed;
pub mod error;
pub mod items;
pub mod purger;
pub mod tables;

pub use backend::PgBackend;
pub use broken::PgBrokenArchive;
pub use completed::PgCompletedArchive;
pub use error::{PgQueueError, PgQueueResult};
pub use items::PgItemStore;
pub use purger::PgTablePurger;
pub use tables::{QueueTables, TableInfo};
