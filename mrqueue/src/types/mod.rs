pub mod events;
pub mod ids;
pub mod item;
pub mod status;

pub use events::{EventData, QueueEvent};
pub use ids::ItemId;
pub use item::{Item, ItemWithError};
pub use status::{ItemStatus, UnknownStatus};
