//! Readiness gating for the store subprocess.

use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info};

use crate::cancel::Cancellation;
use crate::store::{KvStore, ServerInfo, StoreError};

use super::ORCHESTRATOR_TARGET;

const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// How long and how often to probe the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessPolicy {
    /// Total budget before giving up.
    pub timeout: Duration,
    /// Delay before each probe.
    pub interval: Duration,
    /// Treat "nothing is listening yet" as not ready instead of failing.
    pub tolerate_unreachable: bool,
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            interval: DEFAULT_INTERVAL,
            tolerate_unreachable: true,
        }
    }
}

impl ReadinessPolicy {
    /// Default cadence with a custom budget.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Self::default()
        }
    }
}

/// Failures while waiting for the store to answer.
#[derive(Debug, Error)]
pub enum ReadinessError {
    /// No probe reported a version within the budget.
    #[error("store did not become ready within {timeout:?}")]
    TimedOut {
        /// Budget that elapsed.
        timeout: Duration,
    },
    /// The invocation was cancelled while waiting.
    #[error("cancelled while waiting for the store")]
    Cancelled,
    /// A probe failed in a way that retrying will not fix.
    #[error("store status probe failed: {0}")]
    Probe(#[source] StoreError),
}

/// Probes `store` once per interval until it reports a version.
///
/// # Errors
///
/// Returns [`ReadinessError::Cancelled`] as soon as `cancel` fires,
/// [`ReadinessError::TimedOut`] once the budget is spent and
/// [`ReadinessError::Probe`] for a probe error the policy does not tolerate.
pub fn wait_for_ready(
    store: &dyn KvStore,
    cancel: &Cancellation,
    policy: &ReadinessPolicy,
) -> Result<ServerInfo, ReadinessError> {
    let deadline = Instant::now() + policy.timeout;
    let mut attempts = 0_u32;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if cancel.wait_timeout(policy.interval.min(remaining)) {
            return Err(ReadinessError::Cancelled);
        }
        attempts += 1;
        match store.status() {
            Ok(info) if info.is_ready() => {
                info!(
                    target: ORCHESTRATOR_TARGET,
                    version = %info.version,
                    attempts,
                    "store is ready"
                );
                return Ok(info);
            }
            Ok(_) => debug!(target: ORCHESTRATOR_TARGET, attempts, "store answered without a version"),
            Err(error) if policy.tolerate_unreachable && error.is_unavailable() => {
                debug!(target: ORCHESTRATOR_TARGET, attempts, %error, "store not reachable yet");
            }
            Err(error) => return Err(ReadinessError::Probe(error)),
        }
        if Instant::now() >= deadline {
            return Err(ReadinessError::TimedOut {
                timeout: policy.timeout,
            });
        }
    }
}
