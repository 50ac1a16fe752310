//! Test doubles for the capability boundary.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::capability::{AbilityResult, CapabilityProvider, ProviderError, ProviderId};
use crate::domain::state::TicketState;

#[derive(Clone, Debug)]
enum Script {
    FailTimes(u32),
    FailAlways,
    Reject,
    AnswerEmpty,
    Answer(String),
    Delay(Duration),
}

/// Provider double whose behaviour is scripted per ability.
///
/// Abilities without a script answer like the stub provider. Every call is recorded,
/// including failed ones.
#[derive(Clone, Debug)]
pub struct ScriptedProvider {
    id: ProviderId,
    scripts: HashMap<String, Script>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl ScriptedProvider {
    pub fn new(id: ProviderId) -> Self {
        Self { id, scripts: HashMap::new(), calls: Arc::new(Mutex::new(Vec::new())) }
    }

    /// The first `times` calls for `ability` fail as unavailable.
    pub fn failing_times(mut self, ability: &str, times: u32) -> Self {
        self.scripts.insert(ability.to_string(), Script::FailTimes(times));
        self
    }

    pub fn failing_always(mut self, ability: &str) -> Self {
        self.scripts.insert(ability.to_string(), Script::FailAlways);
        self
    }

    pub fn rejecting(mut self, ability: &str) -> Self {
        self.scripts.insert(ability.to_string(), Script::Reject);
        self
    }

    pub fn answering_empty(mut self, ability: &str) -> Self {
        self.scripts.insert(ability.to_string(), Script::AnswerEmpty);
        self
    }

    /// Every call for `ability` sleeps for `delay` before answering normally.
    pub fn delaying(mut self, ability: &str, delay: Duration) -> Self {
        self.scripts.insert(ability.to_string(), Script::Delay(delay));
        self
    }

    pub fn answering(mut self, ability: &str, value: impl Into<String>) -> Self {
        self.scripts.insert(ability.to_string(), Script::Answer(value.into()));
        self
    }

    pub fn calls(&self) -> Vec<String> {
        match self.calls.lock() {
            Ok(calls) => calls.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn calls_for(&self, ability: &str) -> usize {
        self.calls().iter().filter(|call| call.as_str() == ability).count()
    }

    fn record(&self, ability: &str) -> usize {
        let mut calls = match self.calls.lock() {
            Ok(calls) => calls,
            Err(poisoned) => poisoned.into_inner(),
        };
        calls.push(ability.to_string());
        calls.iter().filter(|call| call.as_str() == ability).count()
    }

    fn unavailable(&self, ability: &str) -> ProviderError {
        ProviderError::Unavailable {
            provider: self.id,
            ability: ability.to_string(),
            reason: "scripted outage".to_string(),
        }
    }
}

impl CapabilityProvider for ScriptedProvider {
    fn id(&self) -> ProviderId {
        self.id
    }

    fn execute(&self, ability: &str, _state: &TicketState) -> Result<AbilityResult, ProviderError> {
        let call_number = self.record(ability);
        let answer = |value: String| -> Result<AbilityResult, ProviderError> {
            Ok(AbilityResult::from([(ability.to_string(), value)]))
        };
        let default_value =
            format!("{}_result_for_{ability}", self.id.as_str().to_ascii_lowercase());

        match self.scripts.get(ability) {
            None => answer(default_value),
            Some(Script::FailTimes(times)) if call_number <= *times as usize => {
                Err(self.unavailable(ability))
            }
            Some(Script::FailTimes(_)) => answer(default_value),
            Some(Script::FailAlways) => Err(self.unavailable(ability)),
            Some(Script::Reject) => Err(ProviderError::Rejected {
                provider: self.id,
                ability: ability.to_string(),
                reason: "scripted rejection".to_string(),
            }),
            Some(Script::AnswerEmpty) => Ok(AbilityResult::new()),
            Some(Script::Answer(value)) => answer(value.clone()),
            Some(Script::Delay(delay)) => {
                thread::sleep(*delay);
                answer(default_value)
            }
        }
    }
}
