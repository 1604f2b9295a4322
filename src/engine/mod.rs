pub mod bucket;
mod db;
mod entry;
mod shard;

pub use bucket::{transition, Admission, BucketParams, BucketState, RetryAfter, Transition};
pub use db::ShardedDb;
pub use entry::{BucketEntry, Entry};
pub use shard::Shard;
