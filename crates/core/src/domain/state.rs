use serde::Serialize;

use crate::capability::ProviderId;
use crate::decision::Decision;
use crate::domain::ticket::{CustomerInfo, Intent, Priority, RequiredField, TicketStatus};
use crate::errors::DomainError;
use crate::pipeline::StageName;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchOutcome {
    Completed,
    Failed,
}

/// One ability call as observed by the executor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AbilityRecord {
    pub stage: StageName,
    pub ability: String,
    pub provider: ProviderId,
    pub outcome: DispatchOutcome,
    pub attempts: u32,
    pub result: Option<String>,
    pub error: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DegradedReason {
    MissingField { field: RequiredField },
    DispatchExhausted { ability: String, provider: ProviderId, error: String },
    StatusDisagreement { reported: TicketStatus, kept: TicketStatus },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DegradedMarker {
    pub stage: StageName,
    pub reason: DegradedReason,
}

/// The single mutable record threaded through one pipeline run.
///
/// Designated fields are write-once: a second write returns
/// [`DomainError::FieldAlreadySet`] instead of silently overwriting the earlier value.
/// `ticket_status` is the exception, it follows [`TicketStatus::transition_to`].
#[derive(Clone, Debug, Serialize)]
pub struct TicketState {
    customer: CustomerInfo,
    priority: Option<Priority>,
    intent: Option<Intent>,
    kb_answer: Option<String>,
    #[serde(skip)]
    kb_searched: bool,
    solution_score: Option<u8>,
    can_auto_solve: bool,
    ticket_status: TicketStatus,
    reply: Option<String>,
    ability_log: Vec<AbilityRecord>,
    degraded: Vec<DegradedMarker>,
    stages_completed: Vec<StageName>,
}

impl TicketState {
    pub fn new(customer: CustomerInfo) -> Self {
        Self {
            customer,
            priority: None,
            intent: None,
            kb_answer: None,
            kb_searched: false,
            solution_score: None,
            can_auto_solve: false,
            ticket_status: TicketStatus::Open,
            reply: None,
            ability_log: Vec::new(),
            degraded: Vec::new(),
            stages_completed: Vec::new(),
        }
    }

    pub fn customer(&self) -> &CustomerInfo {
        &self.customer
    }

    pub fn priority(&self) -> Option<Priority> {
        self.priority
    }

    pub fn intent(&self) -> Option<Intent> {
        self.intent
    }

    pub fn kb_answer(&self) -> Option<&str> {
        self.kb_answer.as_deref()
    }

    pub fn solution_score(&self) -> Option<u8> {
        self.solution_score
    }

    pub fn can_auto_solve(&self) -> bool {
        self.can_auto_solve
    }

    pub fn ticket_status(&self) -> TicketStatus {
        self.ticket_status
    }

    pub fn reply(&self) -> Option<&str> {
        self.reply.as_deref()
    }

    pub fn ability_log(&self) -> &[AbilityRecord] {
        &self.ability_log
    }

    pub fn degraded(&self) -> &[DegradedMarker] {
        &self.degraded
    }

    pub fn is_degraded(&self) -> bool {
        !self.degraded.is_empty()
    }

    pub fn stages_completed(&self) -> &[StageName] {
        &self.stages_completed
    }

    pub fn set_priority(&mut self, priority: Priority) -> Result<(), DomainError> {
        set_once(&mut self.priority, priority, "priority")
    }

    pub fn set_intent(&mut self, intent: Intent) -> Result<(), DomainError> {
        set_once(&mut self.intent, intent, "intent")
    }

    /// Records the knowledge lookup outcome. A miss is a valid outcome and is recorded too,
    /// so a second lookup is rejected either way.
    pub fn record_kb_answer(&mut self, answer: Option<String>) -> Result<(), DomainError> {
        if self.kb_searched {
            return Err(DomainError::FieldAlreadySet { field: "kb_answer" });
        }
        self.kb_searched = true;
        self.kb_answer = answer;
        Ok(())
    }

    /// Stores the DECIDE outcome and moves the ticket to its terminal status.
    pub fn apply_decision(&mut self, decision: &Decision) -> Result<(), DomainError> {
        set_once(&mut self.solution_score, decision.score, "solution_score")?;
        self.can_auto_solve = decision.can_auto_solve();
        self.ticket_status.transition_to(decision.status())
    }

    pub fn transition_status(&mut self, next: TicketStatus) -> Result<(), DomainError> {
        self.ticket_status.transition_to(next)
    }

    pub fn set_reply(&mut self, reply: String) -> Result<(), DomainError> {
        set_once(&mut self.reply, reply, "reply")
    }

    pub fn push_ability(&mut self, record: AbilityRecord) {
        self.ability_log.push(record);
    }

    pub fn mark_degraded(&mut self, stage: StageName, reason: DegradedReason) {
        self.degraded.push(DegradedMarker { stage, reason });
    }

    pub fn complete_stage(&mut self, stage: StageName) {
        self.stages_completed.push(stage);
    }
}

fn set_once<T>(slot: &mut Option<T>, value: T, field: &'static str) -> Result<(), DomainError> {
    if slot.is_some() {
        return Err(DomainError::FieldAlreadySet { field });
    }
    *slot = Some(value);
    Ok(())
}
