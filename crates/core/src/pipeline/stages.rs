use std::fmt;

use serde::{Deserialize, Serialize};

use crate::capability::ProviderId;
use crate::decision::DecisionBranch;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageName {
    Intake,
    Understand,
    Prepare,
    Ask,
    Wait,
    Retrieve,
    Decide,
    Update,
    Create,
    Do,
    Complete,
}

impl StageName {
    /// Every stage in execution order.
    pub const ALL: [StageName; 11] = [
        Self::Intake,
        Self::Understand,
        Self::Prepare,
        Self::Ask,
        Self::Wait,
        Self::Retrieve,
        Self::Decide,
        Self::Update,
        Self::Create,
        Self::Do,
        Self::Complete,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Intake => "INTAKE",
            Self::Understand => "UNDERSTAND",
            Self::Prepare => "PREPARE",
            Self::Ask => "ASK",
            Self::Wait => "WAIT",
            Self::Retrieve => "RETRIEVE",
            Self::Decide => "DECIDE",
            Self::Update => "UPDATE",
            Self::Create => "CREATE",
            Self::Do => "DO",
            Self::Complete => "COMPLETE",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim().to_ascii_uppercase();
        Self::ALL.into_iter().find(|stage| stage.as_str() == value)
    }

    /// Zero-based position in the canonical order.
    pub fn position(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionMode {
    Deterministic,
    NonDeterministic,
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deterministic => "deterministic",
            Self::NonDeterministic => "non-deterministic",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "deterministic" => Some(Self::Deterministic),
            "non-deterministic" => Some(Self::NonDeterministic),
            _ => None,
        }
    }
}

/// When a binding is dispatched. Only DECIDE may use anything but `Always`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchCondition {
    Always,
    AutoSolve,
    Escalate,
}

impl DispatchCondition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Always => "always",
            Self::AutoSolve => "auto_solve",
            Self::Escalate => "escalate",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "always" => Some(Self::Always),
            "auto_solve" => Some(Self::AutoSolve),
            "escalate" => Some(Self::Escalate),
            _ => None,
        }
    }

    /// Whether a binding with this condition runs given the branch taken so far.
    pub fn admits(&self, branch: Option<DecisionBranch>) -> bool {
        match self {
            Self::Always => true,
            Self::AutoSolve => branch == Some(DecisionBranch::AutoSolve),
            Self::Escalate => branch == Some(DecisionBranch::Escalate),
        }
    }
}

impl fmt::Display for DispatchCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbilityBinding {
    pub ability: String,
    pub provider: ProviderId,
    pub condition: DispatchCondition,
}

impl AbilityBinding {
    pub fn new(ability: impl Into<String>, provider: ProviderId) -> Self {
        Self { ability: ability.into(), provider, condition: DispatchCondition::Always }
    }

    pub fn when(mut self, condition: DispatchCondition) -> Self {
        self.condition = condition;
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageDefinition {
    pub name: StageName,
    pub mode: ExecutionMode,
    pub abilities: Vec<AbilityBinding>,
}

impl StageDefinition {
    pub fn new(name: StageName, mode: ExecutionMode, abilities: Vec<AbilityBinding>) -> Self {
        Self { name, mode, abilities }
    }

    /// Bindings to dispatch once `branch` is known, in declaration order.
    pub fn bindings_for(
        &self,
        branch: Option<DecisionBranch>,
    ) -> impl Iterator<Item = &AbilityBinding> + '_ {
        self.abilities.iter().filter(move |binding| binding.condition.admits(branch))
    }
}

/// Stage table entry as written in configuration files. Every field is a plain string so
/// that validation can name the offending value.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageSpec {
    pub name: String,
    pub mode: String,
    #[serde(default)]
    pub abilities: Vec<BindingSpec>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingSpec {
    pub ability: String,
    pub provider: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<String>,
}

impl From<&StageDefinition> for StageSpec {
    fn from(stage: &StageDefinition) -> Self {
        Self {
            name: stage.name.as_str().to_string(),
            mode: stage.mode.as_str().to_string(),
            abilities: stage
                .abilities
                .iter()
                .map(|binding| BindingSpec {
                    ability: binding.ability.clone(),
                    provider: binding.provider.as_str().to_string(),
                    when: match binding.condition {
                        DispatchCondition::Always => None,
                        condition => Some(condition.as_str().to_string()),
                    },
                })
                .collect(),
        }
    }
}
