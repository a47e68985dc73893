pub mod engine;
pub mod local;
pub mod schedule;
pub mod scheduler;
pub mod service;
pub mod transfer;
pub mod window;

pub use engine::{CycleReport, FileOutcome, FolderReport, SyncEngine};
pub use schedule::CronSchedule;
pub use scheduler::{CycleRunner, Scheduler};
pub use service::SyncService;
pub use window::{local_midnight, select_today, RunContext};
