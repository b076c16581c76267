//! Container rollout and traffic cutover

pub mod canary;
pub mod controller;
pub mod fsm;
pub mod health;
pub mod traefik;

pub use canary::{CanaryManager, CanaryProgress, CanaryTick};
pub use controller::RolloutController;
pub use fsm::{RolloutEvent, RolloutFsm, RolloutOutcome, RolloutStage};
pub use traefik::ProxyOptions;
