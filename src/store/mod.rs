//! Durable state shared between runs: rule files, counter maps and the
//! retry queue. Every write is atomic or append-under-lock.

mod counters;
mod files;
mod layout;
mod retry;
mod shards;

pub use counters::{decode, encode, CounterStore};
pub use files::{parse_lines, read_lines, write_atomic, write_lines, FileLock, LockMode};
pub use layout::StoreLayout;
pub use retry::RetryQueue;
pub use shards::Store;
