/// Monitoring and drift cycles with their scheduler
pub mod cycles;
pub mod runner;
pub mod triggers;

pub use cycles::{
    batch_metrics, run_with_deadline, Cycle, CycleOutcome, DriftCycle, DriftSettings,
    MonitoringCycle, MonitoringSettings,
};
pub use runner::Scheduler;
pub use triggers::{DailyAt, Schedule, ScheduleTrigger, WeeklyAt};
