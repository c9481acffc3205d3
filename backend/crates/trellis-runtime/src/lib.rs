//! Sandboxed tenant runtime for Trellis servers.
//!
//! A single-threaded, tick-driven execution environment that runs tenant task
//! code against a frozen clock and a deterministic per-tick random generator.
//! The host pumps batches of inbound tasks in through [`Runtime::run_tasks`]
//! and receives a batch of outbound host messages back; everything in between
//! (task dispatch, subtask tracking, cancellation, timers) is owned by this
//! crate.

pub mod clock;
pub mod context;
pub mod dynamic_sql;
pub mod error;
pub mod outbox;
pub mod prng;
pub mod scheduler;
pub mod subtask;

pub use clock::TickClock;
pub use context::Context;
pub use error::{Result, RuntimeError, TaskError};
pub use outbox::{OutMessage, Outbox};
pub use scheduler::{InboxSlot, InboxTarget, Runtime, TaskFn, TaskFuture, TaskResult};
pub use subtask::SubtaskFuture;
