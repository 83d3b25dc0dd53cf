//! Job queue and status events.
//!
//! Jobs are delivered through [`JobQueue`], backed either by an in-process
//! [`MemoryQueue`] or by Redis Streams with consumer groups ([`RedisQueue`]).
//! Each committed job transition is handed to a [`StatusReporter`].

pub mod error;
pub mod job;
pub mod progress;
pub mod queue;

pub use error::{QueueError, QueueResult};
pub use job::{Delivery, QueueMessage};
pub use progress::{BroadcastReporter, RedisStatusPublisher, StatusReporter};
pub use queue::{JobQueue, MemoryQueue, QueueConfig, RedisQueue};
