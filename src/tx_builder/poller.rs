//! Status Poller
//!
//! Bounded polling of a submitted bundle's status. The poller is an explicit
//! state machine:
//!
//! ```text
//! Polling{0} --empty--> Polling{1} --empty--> ... --empty--> Exhausted{max}
//!     |                     |
//!     +------payload--------+--------------------------> Landed
//! ```
//!
//! The delay between attempts goes through [`Sleeper`] so tests can run the
//! machine without waiting. A relay error during an attempt counts as an
//! empty response.

use crate::metrics::metrics;
use crate::tx_builder::bundle::{BundleId, BundleRelay, BundleStatus};
use crate::tx_builder::errors::BundleError;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Inter-attempt delay
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Real delay on the tokio timer
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Poller state
#[derive(Debug, Clone, PartialEq)]
pub enum PollState {
    /// `attempt` empty responses seen so far
    Polling { attempt: u32 },
    Landed { status: Value },
    Exhausted { attempts: u32 },
}

impl PollState {
    pub fn initial() -> Self {
        PollState::Polling { attempt: 0 }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, PollState::Polling { .. })
    }

    /// Bundle status this state corresponds to
    pub fn bundle_status(&self) -> BundleStatus {
        match self {
            PollState::Polling { attempt: 0 } => BundleStatus::Submitted,
            PollState::Polling { .. } => BundleStatus::NotYetVisible,
            PollState::Landed { .. } => BundleStatus::Landed,
            PollState::Exhausted { .. } => BundleStatus::Failed,
        }
    }

    /// Transition on one status response
    ///
    /// Terminal states absorb every response.
    pub fn step(self, response: Option<Value>, max_attempts: u32) -> PollState {
        match self {
            PollState::Polling { attempt } => match response {
                Some(status) => PollState::Landed { status },
                None => {
                    let attempt = attempt + 1;
                    if attempt >= max_attempts {
                        PollState::Exhausted { attempts: attempt }
                    } else {
                        PollState::Polling { attempt }
                    }
                }
            },
            terminal => terminal,
        }
    }
}

/// Terminal result of polling
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Landed(Value),
    Exhausted { attempts: u32 },
}

impl PollOutcome {
    pub fn is_landed(&self) -> bool {
        matches!(self, PollOutcome::Landed(_))
    }

    /// Landed status payload, or `StatusTimeout` once attempts ran out
    pub fn into_landed(self) -> Result<Value, BundleError> {
        match self {
            PollOutcome::Landed(status) => Ok(status),
            PollOutcome::Exhausted { attempts } => Err(BundleError::StatusTimeout { attempts }),
        }
    }
}

/// Polls the relay for a bundle until it lands or attempts run out
pub struct StatusPoller {
    max_attempts: u32,
    delay: Duration,
    inflight_probe: bool,
    sleeper: Arc<dyn Sleeper>,
}

impl StatusPoller {
    /// `max_attempts` below 1 is raised to 1
    pub fn new(max_attempts: u32, delay: Duration, sleeper: Arc<dyn Sleeper>) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
            inflight_probe: false,
            sleeper,
        }
    }

    /// Also log the relay's in-flight status after every empty attempt
    pub fn with_inflight_probe(mut self, enabled: bool) -> Self {
        self.inflight_probe = enabled;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub async fn poll(&self, relay: &dyn BundleRelay, bundle_id: &BundleId) -> PollOutcome {
        let mut state = PollState::initial();

        loop {
            let attempt = match &state {
                PollState::Polling { attempt } => *attempt + 1,
                PollState::Landed { status } => return PollOutcome::Landed(status.clone()),
                PollState::Exhausted { attempts } => {
                    warn!(bundle_id = %bundle_id, attempts, "Bundle status polling exhausted");
                    return PollOutcome::Exhausted {
                        attempts: *attempts,
                    };
                }
            };

            metrics().poll_attempts.inc();
            let response = match relay.get_bundle_status(bundle_id).await {
                Ok(response) => response,
                Err(e) => {
                    warn!(bundle_id = %bundle_id, attempt, error = %e, "Bundle status request failed");
                    None
                }
            };

            match &response {
                Some(status) => {
                    info!(bundle_id = %bundle_id, attempt, status = %status, "Bundle landed");
                }
                None => {
                    debug!(
                        bundle_id = %bundle_id,
                        attempt,
                        max_attempts = self.max_attempts,
                        "Bundle not visible yet"
                    );
                }
            }

            state = state.step(response, self.max_attempts);

            if let PollState::Polling { .. } = state {
                if self.inflight_probe {
                    self.probe_inflight(relay, bundle_id).await;
                }
                self.sleeper.sleep(self.delay).await;
            }
        }
    }

    async fn probe_inflight(&self, relay: &dyn BundleRelay, bundle_id: &BundleId) {
        match relay.get_inflight_status(bundle_id).await {
            Ok(Some(status)) => debug!(bundle_id = %bundle_id, status = %status, "In-flight status"),
            Ok(None) => debug!(bundle_id = %bundle_id, "No in-flight status"),
            Err(e) => debug!(bundle_id = %bundle_id, error = %e, "In-flight status request failed"),
        }
    }
}
