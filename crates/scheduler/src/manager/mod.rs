//! The task queue manager: owns every queue sharing one scheduler thread and
//! decides which task runs next.
//!
//! Each queue keeps three stages of work:
//!
//! - an **incoming** queue of immediate tasks, in post order,
//! - a **delayed** heap keyed by run time then post order,
//! - a **work** queue of runnable tasks, sorted by enqueue order.
//!
//! Reloading (pumping) moves due delayed tasks and then incoming tasks into
//! the work queue. Selection looks only at the front of each enabled queue's
//! work queue.

mod core;
mod execution;
mod selection;


pub use self::core::{ManagerObserver, TaskQueueManager};
pub(crate) use self::core::{lock, ManagerInner};
