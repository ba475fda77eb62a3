//! Renderer scheduler runner -- turns input, frame and lifecycle signals
//! into task queue policy.
//!
//! Split into focused submodules:
//! - `core`: RendererScheduler struct, constructor, queue accessors, observers
//! - `input`: input event hooks, use case classification, yielding hints
//! - `policy`: policy computation and application, idle delegate, blocked-task interventions
//! - `lifecycle`: frame, visibility, backgrounding, navigation and virtual time hooks

mod core;
mod input;
mod lifecycle;
mod policy;
#[cfg(test)]
mod tests;

pub use self::core::{InterventionReporter, RailModeObserver, RendererScheduler};
pub use self::input::should_prioritize_input_event;
