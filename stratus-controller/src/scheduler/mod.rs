//! Scheduling core
//!
//! The [`ResourceManager`] picks one cluster per job and the [`ReScheduler`]
//! corrects assignments that never started. The [`JobTracker`] records how
//! executions end and the [`RegistryRefresher`] keeps resource snapshots
//! current.

pub mod manager;
pub mod placement;
pub mod refresher;
pub mod rescheduler;
pub mod scoring;
pub mod tracker;

pub use manager::ResourceManager;
pub use placement::{ClusterPlacement, Placement};
pub use refresher::RegistryRefresher;
pub use rescheduler::ReScheduler;
pub use tracker::JobTracker;
