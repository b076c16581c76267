//! Deployment lifecycle: queue, status, log and the pipeline

pub mod log;
pub mod pipeline;
pub mod queue;
pub mod status;

pub use log::DeploymentLog;
pub use pipeline::DeploymentPipeline;
pub use queue::{DeploymentQueue, QueueSignal};
pub use status::DeploymentStatusManager;
