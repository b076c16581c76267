//! Cooperative cancellation

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::errors::EngineError;

/// Sleep quantum; bounds how long a cancelled deployment keeps sleeping
const TICK: Duration = Duration::from_secs(1);

/// Cancellation flag shared between a running deployment and its canceller
#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
    cancelled: Arc<AtomicBool>,
}

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Fail with `Cancelled` once the flag is set
    pub fn check(&self) -> Result<(), EngineError> {
        if self.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        Ok(())
    }

    /// Sleep in one second ticks, checking the flag between ticks
    pub async fn sleep(&self, duration: Duration) -> Result<(), EngineError> {
        let mut remaining = duration;
        loop {
            self.check()?;
            if remaining.is_zero() {
                return Ok(());
            }
            let tick = remaining.min(TICK);
            tokio::time::sleep(tick).await;
            remaining -= tick;
        }
    }
}
