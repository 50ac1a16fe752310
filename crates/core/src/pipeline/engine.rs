use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::audit::{AuditCategory, AuditContext, AuditOutcome, AuditSink};
use crate::capability::{dispatch, DispatchPolicy, ProviderError, ProviderSet};
use crate::decision::{self, DecisionBranch, ScoreSource};
use crate::domain::state::{AbilityRecord, DegradedReason, DispatchOutcome, TicketState};
use crate::domain::ticket::{
    CustomerInfo, FinalPayload, Intent, Priority, TicketStatus, UNASSIGNED_TICKET_ID,
};
use crate::errors::DomainError;
use crate::knowledge::{KeywordKnowledgeBase, KnowledgeBase};
use crate::pipeline::registry::StageRegistry;
use crate::pipeline::stages::{AbilityBinding, StageDefinition, StageName};
use crate::reply::draft_reply;

const ACTOR: &str = "pipeline";
/// Ability whose result UPDATE inspects under [`UpdatePolicy::Verify`].
pub const UPDATE_TICKET_ABILITY: &str = "update_ticket";

/// How UPDATE treats the status DECIDE already set.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdatePolicy {
    /// Re-assert DECIDE's status without looking at provider output.
    #[default]
    Restate,
    /// Compare the `update_ticket` result against DECIDE's status and flag disagreement.
    Verify,
}

impl UpdatePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Restate => "restate",
            Self::Verify => "verify",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "restate" => Some(Self::Restate),
            "verify" => Some(Self::Verify),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PipelineError {
    #[error("stage {stage} violated a ticket invariant: {source}")]
    Invariant { stage: StageName, source: DomainError },
}

impl PipelineError {
    pub fn stage(&self) -> StageName {
        match self {
            Self::Invariant { stage, .. } => *stage,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct PipelineOutcome {
    pub run_id: String,
    pub payload: FinalPayload,
    pub state: TicketState,
}

struct Run {
    state: TicketState,
    branch: Option<DecisionBranch>,
    audit: AuditContext,
    payload: Option<FinalPayload>,
}

/// Drives one ticket through every registered stage, in order, exactly once.
///
/// The executor itself is immutable and cheap to clone; everything it shares between runs
/// sits behind `Arc`. Each run owns its own [`TicketState`].
#[derive(Clone)]
pub struct PipelineExecutor {
    registry: Arc<StageRegistry>,
    providers: Arc<ProviderSet>,
    knowledge: Arc<dyn KnowledgeBase>,
    dispatch_policy: DispatchPolicy,
    update_policy: UpdatePolicy,
}

impl PipelineExecutor {
    pub fn new(registry: StageRegistry, providers: ProviderSet) -> Self {
        Self {
            registry: Arc::new(registry),
            providers: Arc::new(providers),
            knowledge: Arc::new(KeywordKnowledgeBase::default()),
            dispatch_policy: DispatchPolicy::default(),
            update_policy: UpdatePolicy::default(),
        }
    }

    pub fn with_knowledge(mut self, knowledge: Arc<dyn KnowledgeBase>) -> Self {
        self.knowledge = knowledge;
        self
    }

    pub fn with_dispatch_policy(mut self, policy: DispatchPolicy) -> Self {
        self.dispatch_policy = policy;
        self
    }

    pub fn with_update_policy(mut self, policy: UpdatePolicy) -> Self {
        self.update_policy = policy;
        self
    }

    pub fn registry(&self) -> &StageRegistry {
        &self.registry
    }

    pub fn dispatch_policy(&self) -> &DispatchPolicy {
        &self.dispatch_policy
    }

    pub fn update_policy(&self) -> UpdatePolicy {
        self.update_policy
    }

    pub fn run<R, S>(
        &self,
        customer: CustomerInfo,
        scores: &mut R,
        sink: &S,
    ) -> Result<PipelineOutcome, PipelineError>
    where
        R: ScoreSource + ?Sized,
        S: AuditSink + ?Sized,
    {
        self.run_with_id(customer, Uuid::new_v4().to_string(), scores, sink)
    }

    /// Same as [`run`](Self::run) with a caller-chosen run id, used as the correlation id
    /// of every audit event the run emits.
    pub fn run_with_id<R, S>(
        &self,
        customer: CustomerInfo,
        run_id: impl Into<String>,
        scores: &mut R,
        sink: &S,
    ) -> Result<PipelineOutcome, PipelineError>
    where
        R: ScoreSource + ?Sized,
        S: AuditSink + ?Sized,
    {
        let run_id = run_id.into();
        let audit = AuditContext::new(customer.ticket_id(), run_id.clone(), ACTOR);
        let mut run = Run { state: TicketState::new(customer), branch: None, audit, payload: None };

        sink.emit(
            run.audit
                .event("pipeline.run_started", AuditCategory::Run, AuditOutcome::Success)
                .with_metadata("stages", self.registry.len().to_string())
                .with_metadata("update_policy", self.update_policy.as_str()),
        );

        for stage in self.registry.stages() {
            if let Err(source) = self.run_stage(stage, &mut run, scores, sink) {
                let error = PipelineError::Invariant { stage: stage.name, source };
                sink.emit(
                    run.audit
                        .event("pipeline.run_failed", AuditCategory::Run, AuditOutcome::Failed)
                        .with_metadata("stage", stage.name.as_str())
                        .with_metadata("error", error.to_string()),
                );
                return Err(error);
            }
        }

        let Run { state, audit, payload, .. } = run;
        let payload = payload.ok_or_else(|| PipelineError::Invariant {
            stage: StageName::Complete,
            source: DomainError::InvariantViolation("final payload was not assembled".to_string()),
        })?;

        let outcome =
            if state.is_degraded() { AuditOutcome::Degraded } else { AuditOutcome::Success };
        sink.emit(
            audit
                .event("pipeline.run_completed", AuditCategory::Run, outcome)
                .with_metadata("status", payload.status.as_str())
                .with_metadata("degraded_markers", state.degraded().len().to_string()),
        );

        Ok(PipelineOutcome { run_id, payload, state })
    }

    fn run_stage<R, S>(
        &self,
        stage: &StageDefinition,
        run: &mut Run,
        scores: &mut R,
        sink: &S,
    ) -> Result<(), DomainError>
    where
        R: ScoreSource + ?Sized,
        S: AuditSink + ?Sized,
    {
        let degraded_before = run.state.degraded().len();
        sink.emit(
            run.audit
                .event("pipeline.stage_started", AuditCategory::Stage, AuditOutcome::Success)
                .with_metadata("stage", stage.name.as_str())
                .with_metadata("mode", stage.mode.as_str()),
        );

        self.before_dispatch(stage.name, run, scores, sink)?;
        let branch = run.branch;
        for binding in stage.bindings_for(branch) {
            self.dispatch_binding(stage.name, binding, run, sink);
        }
        self.after_dispatch(stage.name, run, sink)?;
        run.state.complete_stage(stage.name);

        let outcome = if run.state.degraded().len() > degraded_before {
            AuditOutcome::Degraded
        } else {
            AuditOutcome::Success
        };
        sink.emit(
            run.audit
                .event("pipeline.stage_completed", AuditCategory::Stage, outcome)
                .with_metadata("stage", stage.name.as_str()),
        );
        Ok(())
    }

    fn before_dispatch<R, S>(
        &self,
        stage: StageName,
        run: &mut Run,
        scores: &mut R,
        sink: &S,
    ) -> Result<(), DomainError>
    where
        R: ScoreSource + ?Sized,
        S: AuditSink + ?Sized,
    {
        match stage {
            StageName::Intake => {
                let priority = Priority::from_input(run.state.customer().priority.as_deref());
                run.state.set_priority(priority)?;

                let missing = run.state.customer().missing_required_fields();
                for field in missing {
                    run.state.mark_degraded(stage, DegradedReason::MissingField { field });
                    let event = run.audit.event(
                        "intake.field_missing",
                        AuditCategory::Intake,
                        AuditOutcome::Degraded,
                    );
                    sink.emit(event.with_metadata("field", field.as_str()));
                }
            }
            StageName::Understand => {
                let intent = Intent::classify(run.state.customer().query().unwrap_or_default());
                run.state.set_intent(intent)?;
            }
            StageName::Retrieve => {
                let answer =
                    run.state.customer().query().and_then(|query| self.knowledge.lookup(query));
                let hit = answer.is_some();
                run.state.record_kb_answer(answer)?;
                let event = run.audit.event(
                    "pipeline.knowledge_searched",
                    AuditCategory::Stage,
                    AuditOutcome::Success,
                );
                sink.emit(event.with_metadata("hit", hit.to_string()));
            }
            StageName::Decide => {
                let decision = decision::evaluate(run.state.kb_answer(), scores);
                run.state.apply_decision(&decision)?;
                run.branch = Some(decision.branch);
                sink.emit(
                    run.audit
                        .event(
                            "pipeline.decision_made",
                            AuditCategory::Decision,
                            AuditOutcome::Success,
                        )
                        .with_metadata("score", decision.score.to_string())
                        .with_metadata("branch", decision.branch.as_str())
                        .with_metadata("status", decision.status().as_str()),
                );
            }
            _ => {}
        }
        Ok(())
    }

    fn after_dispatch<S>(
        &self,
        stage: StageName,
        run: &mut Run,
        sink: &S,
    ) -> Result<(), DomainError>
    where
        S: AuditSink + ?Sized,
    {
        match stage {
            StageName::Update => self.apply_update_policy(run, sink),
            StageName::Create => {
                let reply = draft_reply(
                    run.state.customer().name(),
                    run.state.can_auto_solve(),
                    run.state.kb_answer(),
                );
                run.state.set_reply(reply)
            }
            StageName::Complete => {
                let status = run.state.ticket_status();
                if !status.is_terminal() {
                    return Err(DomainError::InvariantViolation(format!(
                        "ticket reached COMPLETE with non-terminal status {}",
                        status.as_str()
                    )));
                }
                let reply = run.state.reply().ok_or_else(|| {
                    DomainError::InvariantViolation(
                        "reply was not drafted before COMPLETE".to_string(),
                    )
                })?;
                let ticket_id = run
                    .state
                    .customer()
                    .ticket_id()
                    .map(|id| id.0)
                    .unwrap_or_else(|| UNASSIGNED_TICKET_ID.to_string());

                run.payload = Some(FinalPayload { ticket_id, status, reply: reply.to_string() });
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn apply_update_policy<S>(&self, run: &mut Run, sink: &S) -> Result<(), DomainError>
    where
        S: AuditSink + ?Sized,
    {
        let kept = run.state.ticket_status();

        if self.update_policy == UpdatePolicy::Verify {
            if let Some(reported) = reported_update_status(&run.state) {
                if reported.is_terminal() && reported != kept {
                    run.state.mark_degraded(
                        StageName::Update,
                        DegradedReason::StatusDisagreement { reported, kept },
                    );
                    sink.emit(
                        run.audit
                            .event(
                                "pipeline.status_disagreement",
                                AuditCategory::Decision,
                                AuditOutcome::Degraded,
                            )
                            .with_metadata("reported", reported.as_str())
                            .with_metadata("kept", kept.as_str()),
                    );
                }
            }
        }

        run.state.transition_status(kept)
    }

    fn dispatch_binding<S>(
        &self,
        stage: StageName,
        binding: &AbilityBinding,
        run: &mut Run,
        sink: &S,
    ) where
        S: AuditSink + ?Sized,
    {
        let provider = self.providers.get(binding.provider);
        let report = dispatch(provider, &binding.ability, &run.state, &self.dispatch_policy);
        let value = report.value(&binding.ability).map(str::to_string);

        match report.result {
            Ok(_) => {
                run.state.push_ability(AbilityRecord {
                    stage,
                    ability: binding.ability.clone(),
                    provider: binding.provider,
                    outcome: DispatchOutcome::Completed,
                    attempts: report.attempts,
                    result: value,
                    error: None,
                });
                sink.emit(
                    run.audit
                        .event(
                            "pipeline.ability_dispatched",
                            AuditCategory::Ability,
                            AuditOutcome::Success,
                        )
                        .with_metadata("stage", stage.as_str())
                        .with_metadata("ability", binding.ability.clone())
                        .with_metadata("provider", binding.provider.as_str())
                        .with_metadata("attempts", report.attempts.to_string()),
                );
            }
            Err(error) => {
                run.state.push_ability(AbilityRecord {
                    stage,
                    ability: binding.ability.clone(),
                    provider: binding.provider,
                    outcome: DispatchOutcome::Failed,
                    attempts: report.attempts,
                    result: None,
                    error: Some(error.to_string()),
                });
                run.state.mark_degraded(
                    stage,
                    DegradedReason::DispatchExhausted {
                        ability: binding.ability.clone(),
                        provider: binding.provider,
                        error: error.to_string(),
                    },
                );
                let outcome = match error {
                    ProviderError::Rejected { .. } => AuditOutcome::Rejected,
                    _ => AuditOutcome::Failed,
                };
                sink.emit(
                    run.audit
                        .event("pipeline.ability_failed", AuditCategory::Ability, outcome)
                        .with_metadata("stage", stage.as_str())
                        .with_metadata("ability", binding.ability.clone())
                        .with_metadata("provider", binding.provider.as_str())
                        .with_metadata("attempts", report.attempts.to_string())
                        .with_metadata("error_class", error.error_class())
                        .with_metadata("error", error.to_string()),
                );
            }
        }
    }
}

impl Default for PipelineExecutor {
    fn default() -> Self {
        Self::new(StageRegistry::canonical(), ProviderSet::default())
    }
}

impl std::fmt::Debug for PipelineExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineExecutor")
            .field("stages", &self.registry.len())
            .field("providers", &self.providers)
            .field("dispatch_policy", &self.dispatch_policy)
            .field("update_policy", &self.update_policy)
            .finish()
    }
}

fn reported_update_status(state: &TicketState) -> Option<TicketStatus> {
    state
        .ability_log()
        .iter()
        .rev()
        .find(|record| {
            record.stage == StageName::Update
                && record.ability == UPDATE_TICKET_ABILITY
                && record.outcome == DispatchOutcome::Completed
        })
        .and_then(|record| record.result.as_deref())
        .and_then(TicketStatus::parse)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use crate::audit::{AuditOutcome, InMemoryAuditSink, NoopAuditSink};
    use crate::capability::{DispatchPolicy, ProviderId, ProviderSet};
    use crate::decision::FixedScoreSource;
    use crate::domain::state::{DegradedReason, DispatchOutcome};
    use crate::domain::ticket::{CustomerInfo, Intent, Priority, RequiredField, TicketStatus};
    use crate::pipeline::registry::StageRegistry;
    use crate::pipeline::stages::StageName;
    use crate::testing::ScriptedProvider;

    use super::{PipelineExecutor, UpdatePolicy};

    fn customer(name: &str, query: &str, ticket_id: &str) -> CustomerInfo {
        CustomerInfo {
            name: Some(name.to_string()),
            email: Some("customer@example.com".to_string()),
            query: Some(query.to_string()),
            priority: Some("High".to_string()),
            ticket_id: Some(ticket_id.to_string()),
            ..CustomerInfo::default()
        }
    }

    fn executor_with(common: ScriptedProvider, atlas: ScriptedProvider) -> PipelineExecutor {
        let providers = ProviderSet::new(common, atlas).expect("scripted identities match");
        PipelineExecutor::new(StageRegistry::canonical(), providers).with_dispatch_policy(
            DispatchPolicy { backoff_base: Duration::ZERO, ..DispatchPolicy::default() },
        )
    }

    fn abilities(outcome: &super::PipelineOutcome) -> Vec<&str> {
        outcome.state.ability_log().iter().map(|record| record.ability.as_str()).collect()
    }

    #[test]
    fn every_stage_runs_once_in_registry_order() {
        let sink = InMemoryAuditSink::default();
        let outcome = PipelineExecutor::default()
            .run(customer("Alice", "refund please", "TCK-1"), &mut FixedScoreSource::always(95), &sink)
            .expect("run succeeds");

        assert_eq!(outcome.state.stages_completed(), StageName::ALL.as_slice());
        let started: Vec<_> = sink
            .events()
            .into_iter()
            .filter(|event| event.event_type == "pipeline.stage_started")
            .filter_map(|event| event.metadata.get("stage").cloned())
            .collect();
        let expected: Vec<_> = StageName::ALL.iter().map(|stage| stage.as_str().to_string()).collect();
        assert_eq!(started, expected);
        assert!(sink.events().iter().all(|event| event.correlation_id == outcome.run_id));
    }

    #[test]
    fn ability_log_substitutes_the_branch_ability() {
        let executor = PipelineExecutor::default();
        let prefix = [
            "accept_payload",
            "parse_request_text",
            "extract_entities",
            "normalize_fields",
            "enrich_records",
            "add_flags_calculations",
            "clarify_question",
            "extract_answer",
            "store_answer",
            "knowledge_base_search",
            "store_data",
        ];
        let suffix = [
            "update_payload",
            "update_ticket",
            "close_ticket",
            "response_generation",
            "execute_api_calls",
            "trigger_notifications",
            "output_payload",
        ];

        let solved = executor
            .run(customer("Alice", "refund", "TCK-1"), &mut FixedScoreSource::always(95), &NoopAuditSink)
            .expect("auto-solve run");
        let expected: Vec<_> =
            prefix.iter().chain(&["solution_evaluation"]).chain(&suffix).copied().collect();
        assert_eq!(abilities(&solved), expected);

        let escalated = executor
            .run(customer("Bob", "printer", "TCK-2"), &mut FixedScoreSource::always(70), &NoopAuditSink)
            .expect("escalation run");
        let expected: Vec<_> =
            prefix.iter().chain(&["escalation_decision"]).chain(&suffix).copied().collect();
        assert_eq!(abilities(&escalated), expected);

        let decide = escalated
            .state
            .ability_log()
            .iter()
            .find(|record| record.ability == "escalation_decision")
            .expect("escalation ability dispatched");
        assert_eq!(decide.provider, ProviderId::Atlas);
        assert_eq!(decide.result.as_deref(), Some("atlas_result_for_escalation_decision"));
    }

    #[test]
    fn refund_request_about_an_order_is_resolved_with_the_refund_answer() {
        let outcome = PipelineExecutor::default()
            .run(
                customer("Alice Smith", "I want a refund for my last order.", "TCK-1001"),
                &mut FixedScoreSource::always(95),
                &NoopAuditSink,
            )
            .expect("run succeeds");

        assert_eq!(outcome.payload.ticket_id, "TCK-1001");
        assert_eq!(outcome.payload.status, TicketStatus::Resolved);
        assert!(outcome.payload.reply.starts_with("Hello Alice Smith,\n"));
        assert!(outcome.payload.reply.contains("Refunds are processed within 5-7 business days."));
        assert!(!outcome.payload.reply.contains("escalated"));
        assert_eq!(outcome.state.intent(), Some(Intent::RefundRequest));
        assert_eq!(outcome.state.priority(), Some(Priority::High));
        assert_eq!(outcome.state.solution_score(), Some(95));
        assert!(outcome.state.can_auto_solve());
        assert!(!outcome.state.is_degraded());
    }

    #[test]
    fn unanswered_query_is_escalated() {
        let outcome = PipelineExecutor::default()
            .run(
                customer("Bob", "my printer is broken", "TCK-2002"),
                &mut FixedScoreSource::always(70),
                &NoopAuditSink,
            )
            .expect("run succeeds");

        assert_eq!(outcome.payload.status, TicketStatus::Escalated);
        assert!(outcome.payload.reply.contains("escalated to our support team"));
        assert_eq!(outcome.state.kb_answer(), None);
        assert_eq!(outcome.state.intent(), Some(Intent::GeneralQuery));
        assert!(!outcome.state.can_auto_solve());
    }

    #[test]
    fn missing_fields_degrade_without_failing() {
        let sink = InMemoryAuditSink::default();
        let input = CustomerInfo { query: Some("password reset".to_string()), ..CustomerInfo::default() };

        let outcome = PipelineExecutor::default()
            .run(input, &mut FixedScoreSource::always(92), &sink)
            .expect("missing fields are tolerated");

        assert!(outcome.payload.reply.starts_with("Hello there,\n"));
        assert_eq!(outcome.payload.ticket_id, "UNASSIGNED");
        assert_eq!(outcome.payload.status, TicketStatus::Resolved);
        assert_eq!(outcome.state.priority(), Some(Priority::Normal));

        let missing: Vec<_> = outcome
            .state
            .degraded()
            .iter()
            .map(|marker| (marker.stage, marker.reason.clone()))
            .collect();
        assert_eq!(
            missing,
            vec![
                (StageName::Intake, DegradedReason::MissingField { field: RequiredField::TicketId }),
                (StageName::Intake, DegradedReason::MissingField { field: RequiredField::Name }),
            ]
        );
        assert_eq!(sink.event_types().iter().filter(|kind| *kind == "intake.field_missing").count(), 2);
    }

    #[test]
    fn exhausted_dispatch_is_recorded_and_the_run_continues() {
        let sink = InMemoryAuditSink::default();
        let atlas = ScriptedProvider::new(ProviderId::Atlas).failing_always("enrich_records");
        let executor = executor_with(ScriptedProvider::new(ProviderId::Common), atlas.clone());

        let outcome = executor
            .run(customer("Carol", "where is my order", "TCK-3"), &mut FixedScoreSource::always(99), &sink)
            .expect("provider failures do not abort the run");

        let failed = outcome
            .state
            .ability_log()
            .iter()
            .find(|record| record.ability == "enrich_records")
            .expect("failed ability is logged");
        assert_eq!(failed.outcome, DispatchOutcome::Failed);
        assert_eq!(failed.attempts, 3);
        assert!(failed.error.is_some());
        assert_eq!(atlas.calls_for("enrich_records"), 3);

        assert_eq!(outcome.state.degraded().len(), 1);
        assert_eq!(outcome.state.degraded()[0].stage, StageName::Prepare);
        assert!(matches!(
            outcome.state.degraded()[0].reason,
            DegradedReason::DispatchExhausted { provider: ProviderId::Atlas, .. }
        ));
        assert_eq!(outcome.state.stages_completed().len(), 11);
        assert_eq!(outcome.payload.status, TicketStatus::Resolved);

        let completed = sink.events().into_iter().last().expect("run completion event");
        assert_eq!(completed.event_type, "pipeline.run_completed");
        assert_eq!(completed.outcome, AuditOutcome::Degraded);
    }

    #[test]
    fn late_ability_results_degrade_the_stage_and_the_run_completes() {
        let atlas = ScriptedProvider::new(ProviderId::Atlas)
            .delaying("close_ticket", Duration::from_millis(20));
        let executor = executor_with(ScriptedProvider::new(ProviderId::Common), atlas.clone())
            .with_dispatch_policy(DispatchPolicy {
                max_attempts: 2,
                timeout: Duration::from_millis(5),
                backoff_base: Duration::ZERO,
                ..DispatchPolicy::default()
            });

        let outcome = executor
            .run(
                customer("Erin", "refund please", "TCK-7"),
                &mut FixedScoreSource::always(96),
                &NoopAuditSink,
            )
            .expect("late answers do not abort the run");

        let late = outcome
            .state
            .ability_log()
            .iter()
            .find(|record| record.ability == "close_ticket")
            .expect("late ability is logged");
        assert_eq!(late.outcome, DispatchOutcome::Failed);
        assert_eq!(late.attempts, 2);
        assert_eq!(late.result, None);
        assert_eq!(atlas.calls_for("close_ticket"), 2);

        assert_eq!(outcome.state.degraded().len(), 1);
        assert_eq!(outcome.state.degraded()[0].stage, StageName::Update);
        assert!(matches!(
            &outcome.state.degraded()[0].reason,
            DegradedReason::DispatchExhausted { ability, provider: ProviderId::Atlas, .. }
                if ability == "close_ticket"
        ));
        assert_eq!(outcome.state.stages_completed(), StageName::ALL.as_slice());
        assert_eq!(outcome.payload.status, TicketStatus::Resolved);
        assert!(outcome.payload.reply.contains("Refunds are processed"));
    }

    #[test]
    fn rejected_abilities_are_reported_as_rejected() {
        let sink = InMemoryAuditSink::default();
        let common = ScriptedProvider::new(ProviderId::Common).rejecting("store_answer");
        let executor = executor_with(common, ScriptedProvider::new(ProviderId::Atlas));

        let outcome = executor
            .run(customer("Finn", "password help", "TCK-8"), &mut FixedScoreSource::always(92), &sink)
            .expect("rejections do not abort the run");

        let failed: Vec<_> = sink
            .events()
            .into_iter()
            .filter(|event| event.event_type == "pipeline.ability_failed")
            .collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].outcome, AuditOutcome::Rejected);
        assert_eq!(failed[0].metadata.get("error_class").map(String::as_str), Some("rejected"));
        assert_eq!(failed[0].metadata.get("attempts").map(String::as_str), Some("1"));
        assert!(outcome.state.is_degraded());
    }

    #[test]
    fn transient_failures_recover_within_the_retry_budget() {
        let atlas = ScriptedProvider::new(ProviderId::Atlas).failing_times("update_ticket", 1);
        let executor = executor_with(ScriptedProvider::new(ProviderId::Common), atlas);

        let outcome = executor
            .run(customer("Dan", "refund", "TCK-4"), &mut FixedScoreSource::always(90), &NoopAuditSink)
            .expect("run succeeds");

        let update = outcome
            .state
            .ability_log()
            .iter()
            .find(|record| record.ability == "update_ticket")
            .expect("update_ticket logged");
        assert_eq!(update.outcome, DispatchOutcome::Completed);
        assert_eq!(update.attempts, 2);
        assert!(!outcome.state.is_degraded());
    }

    #[test]
    fn verify_policy_flags_disagreement_and_keeps_the_decided_status() {
        let sink = InMemoryAuditSink::default();
        let atlas = ScriptedProvider::new(ProviderId::Atlas).answering("update_ticket", "Resolved");
        let executor = executor_with(ScriptedProvider::new(ProviderId::Common), atlas)
            .with_update_policy(UpdatePolicy::Verify);

        let outcome = executor
            .run(customer("Eve", "my printer is broken", "TCK-5"), &mut FixedScoreSource::always(75), &sink)
            .expect("disagreement does not fail the run");

        assert_eq!(outcome.payload.status, TicketStatus::Escalated);
        assert_eq!(outcome.state.degraded().len(), 1);
        assert_eq!(outcome.state.degraded()[0].stage, StageName::Update);
        assert_eq!(
            outcome.state.degraded()[0].reason,
            DegradedReason::StatusDisagreement {
                reported: TicketStatus::Resolved,
                kept: TicketStatus::Escalated,
            }
        );
        assert!(sink.event_types().contains(&"pipeline.status_disagreement".to_string()));
    }

    #[test]
    fn restate_policy_ignores_provider_status() {
        let atlas = ScriptedProvider::new(ProviderId::Atlas).answering("update_ticket", "Resolved");
        let executor = executor_with(ScriptedProvider::new(ProviderId::Common), atlas);

        let outcome = executor
            .run(customer("Eve", "my printer is broken", "TCK-5"), &mut FixedScoreSource::always(75), &NoopAuditSink)
            .expect("run succeeds");

        assert_eq!(executor.update_policy(), UpdatePolicy::Restate);
        assert_eq!(outcome.payload.status, TicketStatus::Escalated);
        assert!(!outcome.state.is_degraded());
    }

    #[test]
    fn verify_policy_accepts_matching_status() {
        let atlas = ScriptedProvider::new(ProviderId::Atlas).answering("update_ticket", "resolved");
        let executor = executor_with(ScriptedProvider::new(ProviderId::Common), atlas)
            .with_update_policy(UpdatePolicy::Verify);

        let outcome = executor
            .run(customer("Finn", "refund", "TCK-6"), &mut FixedScoreSource::always(97), &NoopAuditSink)
            .expect("run succeeds");

        assert_eq!(outcome.payload.status, TicketStatus::Resolved);
        assert!(!outcome.state.is_degraded());
    }

    #[test]
    fn decision_event_carries_score_and_branch() {
        let sink = InMemoryAuditSink::default();
        PipelineExecutor::default()
            .run_with_id(
                customer("Gus", "order status", "TCK-7"),
                "run-fixed",
                &mut FixedScoreSource::always(40),
                &sink,
            )
            .expect("run succeeds");

        let decision = sink
            .events()
            .into_iter()
            .find(|event| event.event_type == "pipeline.decision_made")
            .expect("decision event emitted");
        assert_eq!(decision.correlation_id, "run-fixed");
        assert_eq!(decision.metadata.get("score").map(String::as_str), Some("90"));
        assert_eq!(decision.metadata.get("branch").map(String::as_str), Some("auto_solve"));
        assert_eq!(decision.ticket_id.map(|id| id.0).as_deref(), Some("TCK-7"));
    }

    #[test]
    fn injected_knowledge_base_drives_the_decision() {
        let executor = PipelineExecutor::default().with_knowledge(Arc::new(|query: &str| {
            query.contains("vpn").then(|| "Restart the VPN client.".to_string())
        }));

        let outcome = executor
            .run(customer("Hana", "vpn is down", "TCK-8"), &mut FixedScoreSource::always(10), &NoopAuditSink)
            .expect("run succeeds");

        assert_eq!(outcome.state.kb_answer(), Some("Restart the VPN client."));
        assert_eq!(outcome.payload.status, TicketStatus::Resolved);
        assert!(outcome.payload.reply.contains("Restart the VPN client."));
    }
}
