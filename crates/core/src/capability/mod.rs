//! Capability providers: the external services that execute abilities.
//!
//! Two provider identities exist, `COMMON` and `ATLAS`. Each is bound to its own endpoint
//! so a deployment can route them independently, and both sit behind the
//! [`CapabilityProvider`] trait so the executor never branches on which one it is talking to.

pub mod dispatch;

use std::collections::BTreeMap;
use std::fmt;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::state::TicketState;

pub use dispatch::{dispatch, DispatchPolicy, DispatchReport};

/// `{ability name -> opaque result string}` as returned by a provider.
pub type AbilityResult = BTreeMap<String, String>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProviderId {
    Common,
    Atlas,
}

impl ProviderId {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Common => "COMMON",
            Self::Atlas => "ATLAS",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "COMMON" => Some(Self::Common),
            "ATLAS" => Some(Self::Atlas),
            _ => None,
        }
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug)]
pub struct ProviderEndpoint {
    pub id: ProviderId,
    pub address: String,
    pub api_key: Option<SecretString>,
}

impl ProviderEndpoint {
    pub fn new(id: ProviderId, address: impl Into<String>) -> Self {
        Self { id, address: address.into(), api_key: None }
    }

    pub fn with_api_key(mut self, api_key: SecretString) -> Self {
        self.api_key = Some(api_key);
        self
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("provider {provider} is unavailable for `{ability}`: {reason}")]
    Unavailable { provider: ProviderId, ability: String, reason: String },
    #[error("provider {provider} exceeded the {timeout_ms}ms deadline for `{ability}`")]
    DeadlineExceeded { provider: ProviderId, ability: String, timeout_ms: u64 },
    #[error("provider {provider} rejected `{ability}`: {reason}")]
    Rejected { provider: ProviderId, ability: String, reason: String },
    #[error("provider {provider} returned no result for `{ability}`")]
    MissingResult { provider: ProviderId, ability: String },
    #[error("provider slot {slot} was given a client that reports itself as {reported}")]
    IdentityMismatch { slot: ProviderId, reported: ProviderId },
}

impl ProviderError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable { .. } | Self::DeadlineExceeded { .. })
    }

    pub fn error_class(&self) -> &'static str {
        match self {
            Self::Unavailable { .. } => "provider_unavailable",
            Self::DeadlineExceeded { .. } => "deadline_exceeded",
            Self::Rejected { .. } => "rejected",
            Self::MissingResult { .. } => "missing_result",
            Self::IdentityMismatch { .. } => "identity_mismatch",
        }
    }
}

pub trait CapabilityProvider: Send + Sync {
    fn id(&self) -> ProviderId;

    fn execute(&self, ability: &str, state: &TicketState) -> Result<AbilityResult, ProviderError>;
}

/// Stand-in client that acknowledges every ability without contacting its endpoint.
///
/// Answers `{ability: "<provider>_result_for_<ability>"}`.
#[derive(Clone, Debug)]
pub struct StubProvider {
    endpoint: ProviderEndpoint,
}

impl StubProvider {
    pub fn new(endpoint: ProviderEndpoint) -> Self {
        Self { endpoint }
    }
}

impl CapabilityProvider for StubProvider {
    fn id(&self) -> ProviderId {
        self.endpoint.id
    }

    fn execute(&self, ability: &str, _state: &TicketState) -> Result<AbilityResult, ProviderError> {
        let prefix = self.endpoint.id.as_str().to_ascii_lowercase();
        Ok(AbilityResult::from([(ability.to_string(), format!("{prefix}_result_for_{ability}"))]))
    }
}

/// One client per provider identity, chosen at startup.
pub struct ProviderSet {
    common: Box<dyn CapabilityProvider>,
    atlas: Box<dyn CapabilityProvider>,
}

impl ProviderSet {
    pub fn new<C, A>(common: C, atlas: A) -> Result<Self, ProviderError>
    where
        C: CapabilityProvider + 'static,
        A: CapabilityProvider + 'static,
    {
        for (slot, reported) in [(ProviderId::Common, common.id()), (ProviderId::Atlas, atlas.id())]
        {
            if slot != reported {
                return Err(ProviderError::IdentityMismatch { slot, reported });
            }
        }

        Ok(Self { common: Box::new(common), atlas: Box::new(atlas) })
    }

    pub fn stub(common: ProviderEndpoint, atlas: ProviderEndpoint) -> Result<Self, ProviderError> {
        Self::new(StubProvider::new(common), StubProvider::new(atlas))
    }

    pub fn get(&self, id: ProviderId) -> &dyn CapabilityProvider {
        match id {
            ProviderId::Common => self.common.as_ref(),
            ProviderId::Atlas => self.atlas.as_ref(),
        }
    }
}

impl fmt::Debug for ProviderSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderSet")
            .field("common", &self.common.id())
            .field("atlas", &self.atlas.id())
            .finish()
    }
}

impl Default for ProviderSet {
    fn default() -> Self {
        Self {
            common: Box::new(StubProvider::new(ProviderEndpoint::new(
                ProviderId::Common,
                "local://common",
            ))),
            atlas: Box::new(StubProvider::new(ProviderEndpoint::new(
                ProviderId::Atlas,
                "local://atlas",
            ))),
        }
    }
}
