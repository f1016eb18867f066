// Background Jobs Service
//
// Scheduled work for the automation engine: the minute tick that drives
// time-based triggers and durable delays, per-definition cron jobs, and
// execution-history retention. Jobs are scheduled with tokio-cron-scheduler.

pub mod scheduler;

pub use scheduler::{AutomationScheduler, JobError, JobResult};
