// Scheduler node: lifecycle, periodic duties, trigger firing and job runs

pub mod coordinator;
pub mod duty;
pub mod lifecycle;
pub mod node;
pub mod pool;
pub mod runner;

pub use coordinator::{plan_firing, ExecutionCoordinator, FireOutcome, FirePlan};
pub use lifecycle::{Lifecycle, NodeState};
pub use node::{IntegrityReport, SchedulerNode};
pub use pool::WorkerPool;
pub use runner::{JobRunner, RunOutcome, RunSource};
