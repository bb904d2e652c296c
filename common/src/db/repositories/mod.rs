// Repository layer for database operations

pub mod job;
pub mod log;
pub mod node;
pub mod queries;
pub mod trigger;

pub use job::JobRepository;
pub use log::LogRepository;
pub use node::NodeRepository;
pub use trigger::TriggerRepository;
