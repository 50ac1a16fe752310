use thiserror::Error;

use crate::capability::ProviderId;
use crate::pipeline::stages::{
    AbilityBinding, DispatchCondition, ExecutionMode, StageDefinition, StageName, StageSpec,
};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("unknown stage `{0}`")]
    UnknownStage(String),
    #[error("stage {stage} binds `{ability}` to unknown provider `{provider}`")]
    UnknownProvider { stage: StageName, ability: String, provider: String },
    #[error("stage {stage} declares unknown execution mode `{mode}`")]
    UnknownMode { stage: StageName, mode: String },
    #[error("stage {stage} binding `{ability}` has unknown branch condition `{condition}`")]
    UnknownCondition { stage: StageName, ability: String, condition: String },
    #[error("stage {0} is defined more than once")]
    DuplicateStage(StageName),
    #[error("stage {0} is missing from the registry")]
    MissingStage(StageName),
    #[error("stage {found} appears where {expected} was expected")]
    OutOfOrder { expected: StageName, found: StageName },
    #[error("stage {0} has a binding with an empty ability name")]
    EmptyAbilityName(StageName),
    #[error("stage {stage} binding `{ability}` is branch-conditioned; only DECIDE may branch")]
    ConditionOutsideDecide { stage: StageName, ability: String },
    #[error("DECIDE has no ability for the {0} branch")]
    MissingBranch(DispatchCondition),
    #[error("stage {stage} must be {expected}")]
    ModeMismatch { stage: StageName, expected: &'static str },
}

/// The validated, ordered stage table. Built once at startup and shared read-only.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StageRegistry {
    stages: Vec<StageDefinition>,
}

impl StageRegistry {
    /// Validates `stages` against the fixed pipeline shape.
    ///
    /// Every stage appears exactly once in canonical order, ability names are non-empty,
    /// only DECIDE is non-deterministic, and only DECIDE carries branch conditions, with at
    /// least one binding for each branch.
    pub fn new(stages: Vec<StageDefinition>) -> Result<Self, RegistryError> {
        for (index, stage) in stages.iter().enumerate() {
            if stages[..index].iter().any(|earlier| earlier.name == stage.name) {
                return Err(RegistryError::DuplicateStage(stage.name));
            }
        }
        for expected in StageName::ALL {
            if !stages.iter().any(|stage| stage.name == expected) {
                return Err(RegistryError::MissingStage(expected));
            }
        }
        for (expected, stage) in StageName::ALL.into_iter().zip(&stages) {
            if stage.name != expected {
                return Err(RegistryError::OutOfOrder { expected, found: stage.name });
            }
        }

        for stage in &stages {
            validate_stage(stage)?;
        }

        Ok(Self { stages })
    }

    pub fn canonical() -> Self {
        Self { stages: canonical_stages() }
    }

    pub fn from_specs(specs: &[StageSpec]) -> Result<Self, RegistryError> {
        let stages = specs.iter().map(stage_from_spec).collect::<Result<Vec<_>, _>>()?;
        Self::new(stages)
    }

    pub fn stages(&self) -> &[StageDefinition] {
        &self.stages
    }

    pub fn stage(&self, name: StageName) -> &StageDefinition {
        &self.stages[name.position()]
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn to_specs(&self) -> Vec<StageSpec> {
        self.stages.iter().map(StageSpec::from).collect()
    }
}

impl Default for StageRegistry {
    fn default() -> Self {
        Self::canonical()
    }
}

fn validate_stage(stage: &StageDefinition) -> Result<(), RegistryError> {
    let is_decide = stage.name == StageName::Decide;
    let expected_mode =
        if is_decide { ExecutionMode::NonDeterministic } else { ExecutionMode::Deterministic };
    if stage.mode != expected_mode {
        return Err(RegistryError::ModeMismatch { stage: stage.name, expected: expected_mode.as_str() });
    }

    for binding in &stage.abilities {
        if binding.ability.trim().is_empty() {
            return Err(RegistryError::EmptyAbilityName(stage.name));
        }
        if !is_decide && binding.condition != DispatchCondition::Always {
            return Err(RegistryError::ConditionOutsideDecide {
                stage: stage.name,
                ability: binding.ability.clone(),
            });
        }
    }

    if is_decide {
        for branch in [DispatchCondition::AutoSolve, DispatchCondition::Escalate] {
            if !stage.abilities.iter().any(|binding| binding.condition == branch) {
                return Err(RegistryError::MissingBranch(branch));
            }
        }
    }

    Ok(())
}

fn stage_from_spec(spec: &StageSpec) -> Result<StageDefinition, RegistryError> {
    let name =
        StageName::parse(&spec.name).ok_or_else(|| RegistryError::UnknownStage(spec.name.clone()))?;
    let mode = ExecutionMode::parse(&spec.mode)
        .ok_or_else(|| RegistryError::UnknownMode { stage: name, mode: spec.mode.clone() })?;

    let mut abilities = Vec::with_capacity(spec.abilities.len());
    for binding in &spec.abilities {
        let provider = ProviderId::parse(&binding.provider).ok_or_else(|| {
            RegistryError::UnknownProvider {
                stage: name,
                ability: binding.ability.clone(),
                provider: binding.provider.clone(),
            }
        })?;
        let condition = match binding.when.as_deref() {
            None => DispatchCondition::Always,
            Some(when) => DispatchCondition::parse(when).ok_or_else(|| {
                RegistryError::UnknownCondition {
                    stage: name,
                    ability: binding.ability.clone(),
                    condition: when.to_string(),
                }
            })?,
        };
        abilities.push(AbilityBinding { ability: binding.ability.trim().to_string(), provider, condition });
    }

    Ok(StageDefinition::new(name, mode, abilities))
}

fn canonical_stages() -> Vec<StageDefinition> {
    use DispatchCondition::{AutoSolve, Escalate};
    use ExecutionMode::{Deterministic, NonDeterministic};
    use ProviderId::{Atlas, Common};

    fn bind(ability: &str, provider: ProviderId) -> AbilityBinding {
        AbilityBinding::new(ability, provider)
    }

    vec![
        StageDefinition::new(StageName::Intake, Deterministic, vec![bind("accept_payload", Common)]),
        StageDefinition::new(
            StageName::Understand,
            Deterministic,
            vec![bind("parse_request_text", Common), bind("extract_entities", Atlas)],
        ),
        StageDefinition::new(
            StageName::Prepare,
            Deterministic,
            vec![
                bind("normalize_fields", Common),
                bind("enrich_records", Atlas),
                bind("add_flags_calculations", Common),
            ],
        ),
        StageDefinition::new(StageName::Ask, Deterministic, vec![bind("clarify_question", Atlas)]),
        StageDefinition::new(
            StageName::Wait,
            Deterministic,
            vec![bind("extract_answer", Atlas), bind("store_answer", Common)],
        ),
        StageDefinition::new(
            StageName::Retrieve,
            Deterministic,
            vec![bind("knowledge_base_search", Atlas), bind("store_data", Common)],
        ),
        StageDefinition::new(
            StageName::Decide,
            NonDeterministic,
            vec![
                bind("solution_evaluation", Common).when(AutoSolve),
                bind("escalation_decision", Atlas).when(Escalate),
                bind("update_payload", Common),
            ],
        ),
        StageDefinition::new(
            StageName::Update,
            Deterministic,
            vec![bind("update_ticket", Atlas), bind("close_ticket", Atlas)],
        ),
        StageDefinition::new(
            StageName::Create,
            Deterministic,
            vec![bind("response_generation", Common)],
        ),
        StageDefinition::new(
            StageName::Do,
            Deterministic,
            vec![bind("execute_api_calls", Atlas), bind("trigger_notifications", Atlas)],
        ),
        StageDefinition::new(StageName::Complete, Deterministic, vec![bind("output_payload", Common)]),
    ]
}

#[cfg(test)]
mod tests {
    use crate::capability::ProviderId;
    use crate::pipeline::stages::{DispatchCondition, ExecutionMode, StageName, StageSpec};

    use super::{RegistryError, StageRegistry};

    fn canonical_specs() -> Vec<StageSpec> {
        StageRegistry::canonical().to_specs()
    }

    #[test]
    fn canonical_registry_is_valid_and_ordered() {
        let registry = StageRegistry::canonical();
        let revalidated = StageRegistry::new(registry.stages().to_vec()).expect("canonical is valid");

        assert_eq!(revalidated, registry);
        assert_eq!(registry.len(), 11);
        let names: Vec<_> = registry.stages().iter().map(|stage| stage.name).collect();
        assert_eq!(names, StageName::ALL.to_vec());
        assert_eq!(registry.stage(StageName::Decide).mode, ExecutionMode::NonDeterministic);
        assert_eq!(registry.stage(StageName::Update).abilities[0].provider, ProviderId::Atlas);
    }

    #[test]
    fn specs_round_trip_into_the_same_registry() {
        let registry = StageRegistry::from_specs(&canonical_specs()).expect("specs are valid");
        assert_eq!(registry, StageRegistry::canonical());
    }

    #[test]
    fn missing_and_duplicate_stages_are_rejected() {
        let mut specs = canonical_specs();
        specs.remove(3);
        assert_eq!(
            StageRegistry::from_specs(&specs),
            Err(RegistryError::MissingStage(StageName::Ask))
        );

        let mut specs = canonical_specs();
        specs.push(specs[0].clone());
        assert_eq!(
            StageRegistry::from_specs(&specs),
            Err(RegistryError::DuplicateStage(StageName::Intake))
        );
    }

    #[test]
    fn out_of_order_stages_are_rejected() {
        let mut specs = canonical_specs();
        specs.swap(0, 1);
        assert_eq!(
            StageRegistry::from_specs(&specs),
            Err(RegistryError::OutOfOrder { expected: StageName::Intake, found: StageName::Understand })
        );
    }

    #[test]
    fn unknown_provider_is_rejected_with_context() {
        let mut specs = canonical_specs();
        specs[1].abilities[1].provider = "ZEUS".to_string();

        let error = StageRegistry::from_specs(&specs).expect_err("ZEUS is not a provider");
        assert_eq!(
            error,
            RegistryError::UnknownProvider {
                stage: StageName::Understand,
                ability: "extract_entities".to_string(),
                provider: "ZEUS".to_string(),
            }
        );
    }

    #[test]
    fn empty_ability_names_are_rejected() {
        let mut specs = canonical_specs();
        specs[4].abilities[0].ability = "  ".to_string();
        assert_eq!(
            StageRegistry::from_specs(&specs),
            Err(RegistryError::EmptyAbilityName(StageName::Wait))
        );
    }

    #[test]
    fn branch_conditions_are_reserved_for_decide() {
        let mut specs = canonical_specs();
        specs[7].abilities[0].when = Some("escalate".to_string());
        assert!(matches!(
            StageRegistry::from_specs(&specs),
            Err(RegistryError::ConditionOutsideDecide { stage: StageName::Update, .. })
        ));

        let mut specs = canonical_specs();
        specs[6].abilities.retain(|binding| binding.when.as_deref() != Some("escalate"));
        assert_eq!(
            StageRegistry::from_specs(&specs),
            Err(RegistryError::MissingBranch(DispatchCondition::Escalate))
        );
    }

    #[test]
    fn decide_must_be_the_only_non_deterministic_stage() {
        let mut specs = canonical_specs();
        specs[2].mode = "non-deterministic".to_string();
        assert_eq!(
            StageRegistry::from_specs(&specs),
            Err(RegistryError::ModeMismatch { stage: StageName::Prepare, expected: "deterministic" })
        );

        let mut specs = canonical_specs();
        specs[6].mode = "sometimes".to_string();
        assert!(matches!(
            StageRegistry::from_specs(&specs),
            Err(RegistryError::UnknownMode { stage: StageName::Decide, .. })
        ));
    }
}
