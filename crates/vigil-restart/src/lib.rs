//! Restart orchestration for the vigil health monitor.
//!
//! The [`Orchestrator`] executes the ordered recovery procedures —
//! individual node, full layer, full metagraph — through the
//! [`CommandPort`], gated by a cooldown and a rolling-hour rate limit.
//! Procedures run serially; the monitor loop never starts a new tick
//! while one is in flight.

mod command;
mod orchestrator;

pub use command::{CommandError, CommandPort, CommandTemplates, SshExecutor};
pub use orchestrator::{Orchestrator, Outcome, RestartPolicy, SkipReason, StepWaits};
