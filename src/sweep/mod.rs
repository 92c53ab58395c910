//! Activity detection, sweeping and the monitoring loop
//!
//! - `probe`: has an account ever been used on a backend
//! - `sweeper`: move a balance minus the fee reserve to the destination
//! - `scheduler`: warm-up, initial scan and the periodic sweep rounds

pub mod probe;
pub mod scheduler;
pub mod sweeper;

pub use probe::{ActivityProbe, ActivityResult};
pub use scheduler::{MonitorState, RoundStats, ScheduleController, ScheduleSettings, WatchEntry};
pub use sweeper::{BalanceSweeper, SweepOutcome, SweepSettings};
