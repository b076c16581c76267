//! Records shared between the control plane and the deployment engine

pub mod models;

pub use models::application::*;
pub use models::deployment::*;
pub use models::environment::*;
