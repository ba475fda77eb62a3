//! Renderer policy engine: decides per-queue enablement, priority and time
//! domain from input, frame and lifecycle signals.

pub mod estimators;
pub mod types;
pub mod user_model;

mod runner;

pub use estimators::{IdleTimeEstimator, RollingDurationHistory, TaskCostEstimator};
pub use runner::{
    should_prioritize_input_event, InterventionReporter, RailModeObserver, RendererScheduler,
};
pub use types::{
    BeginFrameArgs, ExpensiveTaskPolicy, InputEvent, InputEventState, InputEventType,
    NavigatingFrameType, Policy, PolicySnapshot, RailMode, TaskQueuePolicy, TimeDomainType,
    UseCase,
};
pub use user_model::UserModel;
