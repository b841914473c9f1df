//! Sprint mode: dependency-aware parallel task execution

mod detectors;
mod plan;
mod scheduler;
mod worker;

pub use detectors::{DetectorTrip, LoopDetectors};
pub use plan::{SprintPlan, Task, TaskStatus, salvage_plan_json};
pub use scheduler::{SprintReport, SprintScheduler};
pub use worker::{SPRINT_TASK_COMPLETE, SPRINT_TASK_FAILED, WorkerOutcome};
