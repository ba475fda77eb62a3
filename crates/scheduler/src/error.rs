//! Scheduler error types.

use thiserror::Error;

/// Errors surfaced by the administrative parts of the scheduler.
///
/// Posting, enabling and re-prioritising queues never fail; they degrade to
/// no-ops. Only configuration and explicit lookups report errors.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("task queue not registered: {0}")]
    QueueNotRegistered(String),

    #[error("time domain not registered: {0}")]
    TimeDomainNotRegistered(String),

    #[error("task queue manager is shut down")]
    Shutdown,

    #[error("config error: {0}")]
    Config(String),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("config I/O error: {0}")]
    ConfigIo(#[from] std::io::Error),
}
