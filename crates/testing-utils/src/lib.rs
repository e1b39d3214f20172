//! Testing utilities for the scheduler workspace
//!
//! Hand-rolled mocks and builders used by unit and integration tests,
//! so tests never need a real database, broker or cache.

pub mod builders;
pub mod executors;
pub mod mocks;

pub use builders::TaskBuilder;
pub use executors::{FailingExecutor, RecordingExecutor, SchedulingExecutor, SilentExecutor, SlowExecutor};
pub use mocks::{MockAsyncTaskManager, MockLockCache, MockMessageQueue, MockTaskStore};
