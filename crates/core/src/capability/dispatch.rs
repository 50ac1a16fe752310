use std::thread;
use std::time::{Duration, Instant};

use crate::capability::{AbilityResult, CapabilityProvider, ProviderError};
use crate::domain::state::TicketState;

/// Retry, deadline and backoff settings applied to every ability call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DispatchPolicy {
    /// Total attempts per ability, including the first one
    pub max_attempts: u32,
    /// Per-attempt deadline, checked once the call returns
    pub timeout: Duration,
    /// Delay before the first retry
    pub backoff_base: Duration,
    /// Multiplier applied to the delay after each further failure
    pub backoff_multiplier: u32,
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            timeout: Duration::from_millis(5_000),
            backoff_base: Duration::from_millis(200),
            backoff_multiplier: 2,
        }
    }
}

impl DispatchPolicy {
    /// Delay to wait after the `failed_attempt`-th failure (1-based).
    pub fn backoff_for(&self, failed_attempt: u32) -> Duration {
        let exponent = failed_attempt.saturating_sub(1);
        self.backoff_base.saturating_mul(self.backoff_multiplier.saturating_pow(exponent))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DispatchReport {
    pub attempts: u32,
    pub result: Result<AbilityResult, ProviderError>,
}

impl DispatchReport {
    /// The provider's answer for the dispatched ability, if the call succeeded.
    pub fn value(&self, ability: &str) -> Option<&str> {
        self.result.as_ref().ok().and_then(|result| result.get(ability)).map(String::as_str)
    }
}

/// Calls `ability` on `provider`, retrying retryable failures with exponential backoff.
///
/// The deadline cannot interrupt a synchronous call; an answer that arrives late is
/// discarded and counted as a failed attempt.
pub fn dispatch(
    provider: &dyn CapabilityProvider,
    ability: &str,
    state: &TicketState,
    policy: &DispatchPolicy,
) -> DispatchReport {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempts = 0;

    loop {
        attempts += 1;
        let started = Instant::now();
        let result = provider
            .execute(ability, state)
            .and_then(|result| check_deadline(provider, ability, started, policy, result))
            .and_then(|result| check_presence(provider, ability, result));

        match result {
            Ok(result) => return DispatchReport { attempts, result: Ok(result) },
            Err(error) if error.is_retryable() && attempts < max_attempts => {
                let delay = policy.backoff_for(attempts);
                if !delay.is_zero() {
                    thread::sleep(delay);
                }
            }
            Err(error) => return DispatchReport { attempts, result: Err(error) },
        }
    }
}

fn check_deadline(
    provider: &dyn CapabilityProvider,
    ability: &str,
    started: Instant,
    policy: &DispatchPolicy,
    result: AbilityResult,
) -> Result<AbilityResult, ProviderError> {
    if started.elapsed() > policy.timeout {
        return Err(ProviderError::DeadlineExceeded {
            provider: provider.id(),
            ability: ability.to_string(),
            timeout_ms: u64::try_from(policy.timeout.as_millis()).unwrap_or(u64::MAX),
        });
    }
    Ok(result)
}

fn check_presence(
    provider: &dyn CapabilityProvider,
    ability: &str,
    result: AbilityResult,
) -> Result<AbilityResult, ProviderError> {
    if result.contains_key(ability) {
        Ok(result)
    } else {
        Err(ProviderError::MissingResult { provider: provider.id(), ability: ability.to_string() })
    }
}
