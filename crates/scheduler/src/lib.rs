pub mod config;
pub mod deadline;
pub mod error;
pub mod helper;
pub mod idle;
pub mod manager;
pub mod metrics;
pub mod policy;
pub mod task_queue;
pub mod throttling;
pub mod time;
pub mod time_domain;
pub mod worker;

pub use config::SchedulerConfig;
pub use error::SchedulerError;
pub use helper::SchedulerHelper;
pub use idle::{IdleHelper, IdlePeriodState, IdleTaskRunner};
pub use manager::TaskQueueManager;
pub use metrics::SchedulerMetrics;
pub use policy::{
    BeginFrameArgs, InputEvent, InputEventState, InputEventType, InterventionReporter,
    NavigatingFrameType, PolicySnapshot, RailMode, RailModeObserver, RendererScheduler, UseCase,
};
pub use task_queue::{QueuePriority, TaskObserver, TaskQueue, TaskQueueSpec};
pub use throttling::ThrottlingHelper;
pub use time::{RealClock, SimulatedClock, TickClock, TimeTicks};
pub use time_domain::{TimeDomain, TimeDomainKind};
pub use worker::WorkerScheduler;
