use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::DomainError;

/// Placeholder used in the final payload when the input carried no ticket identifier.
pub const UNASSIGNED_TICKET_ID: &str = "UNASSIGNED";

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TicketId(pub String);

/// The input record a front end hands to the pipeline.
///
/// Every field is optional at the boundary; blank strings are treated the same as absent
/// ones so that form submissions with empty inputs degrade instead of failing.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CustomerInfo {
    pub name: Option<String>,
    pub email: Option<String>,
    pub query: Option<String>,
    pub priority: Option<String>,
    pub ticket_id: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequiredField {
    Name,
    Query,
    TicketId,
}

impl RequiredField {
    pub const ALL: [RequiredField; 3] = [Self::Query, Self::TicketId, Self::Name];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::Query => "query",
            Self::TicketId => "ticket_id",
        }
    }
}

impl CustomerInfo {
    pub fn name(&self) -> Option<&str> {
        non_blank(self.name.as_deref())
    }

    pub fn query(&self) -> Option<&str> {
        non_blank(self.query.as_deref())
    }

    pub fn ticket_id(&self) -> Option<TicketId> {
        non_blank(self.ticket_id.as_deref()).map(|id| TicketId(id.to_string()))
    }

    pub fn field(&self, field: RequiredField) -> Option<&str> {
        match field {
            RequiredField::Name => self.name(),
            RequiredField::Query => self.query(),
            RequiredField::TicketId => non_blank(self.ticket_id.as_deref()),
        }
    }

    pub fn missing_required_fields(&self) -> Vec<RequiredField> {
        RequiredField::ALL.into_iter().filter(|field| self.field(*field).is_none()).collect()
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Normal,
    Medium,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Self::Low),
            "normal" => Some(Self::Normal),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }

    /// Unknown or missing priorities fall back to `Normal`.
    pub fn from_input(value: Option<&str>) -> Self {
        value.and_then(Self::parse).unwrap_or(Self::Normal)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    RefundRequest,
    DeliveryIssue,
    AccountIssue,
    GeneralQuery,
}

const INTENT_KEYWORDS: [(&str, Intent); 3] = [
    ("refund", Intent::RefundRequest),
    ("order", Intent::DeliveryIssue),
    ("password", Intent::AccountIssue),
];

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RefundRequest => "refund_request",
            Self::DeliveryIssue => "delivery_issue",
            Self::AccountIssue => "account_issue",
            Self::GeneralQuery => "general_query",
        }
    }

    pub fn classify(query: &str) -> Self {
        let query = query.to_lowercase();
        INTENT_KEYWORDS
            .iter()
            .find(|(keyword, _)| query.contains(keyword))
            .map(|(_, intent)| *intent)
            .unwrap_or(Self::GeneralQuery)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TicketStatus {
    Open,
    Resolved,
    Escalated,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "Open",
            Self::Resolved => "Resolved",
            Self::Escalated => "Escalated",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "open" => Some(Self::Open),
            "resolved" => Some(Self::Resolved),
            "escalated" => Some(Self::Escalated),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Resolved | Self::Escalated)
    }

    /// Open moves to exactly one terminal status; a terminal status may only be restated.
    pub fn can_transition_to(&self, next: TicketStatus) -> bool {
        matches!(
            (self, next),
            (Self::Open, Self::Resolved)
                | (Self::Open, Self::Escalated)
                | (Self::Resolved, Self::Resolved)
                | (Self::Escalated, Self::Escalated)
        )
    }

    pub fn transition_to(&mut self, next: TicketStatus) -> Result<(), DomainError> {
        if self.can_transition_to(next) {
            *self = next;
            return Ok(());
        }

        Err(DomainError::InvalidStatusTransition { from: *self, to: next })
    }
}

/// The terminal record emitted by the COMPLETE stage.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalPayload {
    pub ticket_id: String,
    pub status: TicketStatus,
    pub reply: String,
}
