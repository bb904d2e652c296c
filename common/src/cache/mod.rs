// In-process caches refreshed by the periodic duties

pub mod membership;
pub mod window;

pub use membership::ClusterMembershipCache;
pub use window::{InFlightGuard, ReentryGuard, TriggerWindowCache};
