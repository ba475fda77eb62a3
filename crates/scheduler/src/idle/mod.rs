//! Idle-time scheduling: idle periods, their deadlines, and the runner idle
//! tasks are posted through.

mod idle_helper;
mod idle_task_runner;


pub use idle_helper::{IdleHelper, IdleHelperDelegate, IdlePeriodState, LongIdleDecision};
pub use idle_task_runner::{IdleTask, IdleTaskRunner, IdleTaskRunnerDelegate};
