pub mod audit;
pub mod capability;
pub mod config;
pub mod decision;
pub mod domain;
pub mod errors;
pub mod knowledge;
pub mod pipeline;
pub mod reply;
pub mod testing;

pub use audit::{AuditEvent, AuditSink, InMemoryAuditSink, NoopAuditSink};
pub use capability::{
    CapabilityProvider, DispatchPolicy, ProviderEndpoint, ProviderError, ProviderId, ProviderSet,
    StubProvider,
};
pub use decision::{Decision, DecisionBranch, FixedScoreSource, ScoreSource, SeededScoreSource};
pub use domain::state::TicketState;
pub use domain::ticket::{CustomerInfo, FinalPayload, TicketId, TicketStatus};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use knowledge::{KeywordKnowledgeBase, KnowledgeBase};
pub use pipeline::{PipelineExecutor, PipelineOutcome, StageName, StageRegistry, UpdatePolicy};
