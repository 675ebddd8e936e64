//! Logging setup and health reporting.

mod health;
mod logging;

pub use health::{stale_after, HealthReport, HealthState};
pub use logging::setup_logging;
