pub mod manager;
pub mod priority_queue;
pub mod tier;

pub use manager::{ManagerStatus, QueueSnapshot, TierManager};
pub use priority_queue::{PriorityQueue, QueueEntry};
pub use tier::{TierKind, TierMetrics};
