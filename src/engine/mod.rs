mod extract;
pub mod lifecycle;
mod partition;
pub mod state;

pub use extract::extract_domain;
pub use lifecycle::{GcReport, Lifecycle, RunOutcome, RunStats, ValidationPlan};
pub use partition::{shard_of, Partitioner};
pub use state::{Count, DeleteCounter, NotWrittenCounter, ShardState, WriteCounter};
