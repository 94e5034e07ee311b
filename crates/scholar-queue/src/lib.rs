//! scholar-queue — C7: fire-and-forget enqueue of background jobs.

pub mod job;
pub mod queue;

pub use job::Job;
pub use queue::{InMemoryTaskQueue, NoopTaskQueue, RedisTaskQueue, TaskQueue};
