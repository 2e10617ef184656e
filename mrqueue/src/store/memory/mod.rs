pub mod storage;
pub mod tables;

pub use storage::{BrokenEntry, ItemRow, MemoryBackend, MemoryState, MemoryTx};
pub use tables::{MemoryBrokenArchive, MemoryCompletedArchive, MemoryItemStore};
