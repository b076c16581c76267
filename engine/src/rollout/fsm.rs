//! Finite state machine of a container rollout

use serde::{Deserialize, Serialize};

/// Rollout stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RolloutStage {
    /// Image being built or pulled
    Building,

    /// Replacement container starting
    StartingNew,

    /// Waiting for the replacement to report healthy
    HealthChecking,

    /// Replacement healthy, retiring the previous container
    Promoting,

    /// Replacement failed, removing it and keeping the previous container
    RollingBack,

    /// Finished, see [`RolloutOutcome`]
    Done,
}

impl std::fmt::Display for RolloutStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RolloutStage::Building => "building",
            RolloutStage::StartingNew => "starting new container",
            RolloutStage::HealthChecking => "health checking",
            RolloutStage::Promoting => "promoting",
            RolloutStage::RollingBack => "rolling back",
            RolloutStage::Done => "done",
        };
        f.write_str(name)
    }
}

/// Rollout event
#[derive(Debug, Clone)]
pub enum RolloutEvent {
    /// Image available on the host
    ImageReady,

    /// Replacement container created and started
    Started,

    /// Replacement could not be started
    StartFailed(String),

    /// Replacement reported healthy
    Healthy,

    /// Replacement unhealthy or timed out
    Unhealthy(String),

    /// Health checks do not apply (swarm)
    HealthSkipped,

    /// Promotion or rollback finished
    Completed,
}

/// How a finished rollout ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RolloutOutcome {
    Promoted,
    RolledBack,
}

/// Rollout FSM
#[derive(Debug, Clone)]
pub struct RolloutFsm {
    stage: RolloutStage,
    error: Option<String>,
    outcome: Option<RolloutOutcome>,
}

impl RolloutFsm {
    pub fn new() -> Self {
        Self {
            stage: RolloutStage::Building,
            error: None,
            outcome: None,
        }
    }

    pub fn stage(&self) -> RolloutStage {
        self.stage
    }

    /// Failure reason that caused a rollback
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn outcome(&self) -> Option<RolloutOutcome> {
        self.outcome
    }

    /// Process an event and transition stage
    pub fn process(&mut self, event: RolloutEvent) -> Result<RolloutStage, String> {
        let next = match (self.stage, &event) {
            (RolloutStage::Building, RolloutEvent::ImageReady) => RolloutStage::StartingNew,

            (RolloutStage::StartingNew, RolloutEvent::Started) => RolloutStage::HealthChecking,
            (RolloutStage::StartingNew, RolloutEvent::StartFailed(err)) => {
                self.error = Some(err.clone());
                RolloutStage::RollingBack
            }

            (RolloutStage::HealthChecking, RolloutEvent::Healthy)
            | (RolloutStage::HealthChecking, RolloutEvent::HealthSkipped) => RolloutStage::Promoting,
            (RolloutStage::HealthChecking, RolloutEvent::Unhealthy(err)) => {
                self.error = Some(err.clone());
                RolloutStage::RollingBack
            }

            (RolloutStage::Promoting, RolloutEvent::Completed) => {
                self.outcome = Some(RolloutOutcome::Promoted);
                RolloutStage::Done
            }
            (RolloutStage::RollingBack, RolloutEvent::Completed) => {
                self.outcome = Some(RolloutOutcome::RolledBack);
                RolloutStage::Done
            }

            (stage, event) => {
                return Err(format!("Invalid rollout transition: {:?} -> {:?}", stage, event));
            }
        };

        self.stage = next;
        Ok(next)
    }
}

impl Default for RolloutFsm {
    fn default() -> Self {
        Self::new()
    }
}
