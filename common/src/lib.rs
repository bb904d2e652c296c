// Common library for the cluster scheduler: models, storage, executors and the scheduler node

pub mod admin;
pub mod bootstrap;
pub mod cache;
pub mod config;
pub mod db;
pub mod errors;
pub mod executor;
pub mod listener;
pub mod models;
pub mod registry;
pub mod retry;
pub mod schedule;
pub mod scheduler;
pub mod store;
pub mod telemetry;
