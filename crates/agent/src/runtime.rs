use std::sync::Arc;

use supportflow_core::audit::AuditSink;
use supportflow_core::capability::{ProviderId, ProviderSet};
use supportflow_core::config::AppConfig;
use supportflow_core::decision::{ScoreSource, SeededScoreSource};
use supportflow_core::domain::ticket::CustomerInfo;
use supportflow_core::errors::ApplicationError;
use supportflow_core::pipeline::{PipelineExecutor, PipelineOutcome};

use crate::observer::TracingAuditSink;

/// Runs tickets through a shared, read-only pipeline.
#[derive(Clone)]
pub struct AgentRuntime {
    executor: PipelineExecutor,
    seed: Option<u64>,
    sink: Arc<dyn AuditSink>,
}

impl AgentRuntime {
    pub fn new(executor: PipelineExecutor, seed: Option<u64>) -> Self {
        Self { executor, seed, sink: Arc::new(TracingAuditSink) }
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, ApplicationError> {
        let registry = config
            .registry()
            .map_err(|error| ApplicationError::Configuration(error.to_string()))?;
        let providers = ProviderSet::stub(
            config.provider_endpoint(ProviderId::Common),
            config.provider_endpoint(ProviderId::Atlas),
        )
        .map_err(|error| ApplicationError::Configuration(error.to_string()))?;

        let executor = PipelineExecutor::new(registry, providers)
            .with_knowledge(Arc::new(config.knowledge_base()))
            .with_dispatch_policy(config.dispatch_policy())
            .with_update_policy(config.decision.update_policy);

        tracing::info!(
            event_name = "agent.runtime.ready",
            correlation_id = "bootstrap",
            stages = executor.registry().len(),
            common_endpoint = %config.providers.common.endpoint,
            atlas_endpoint = %config.providers.atlas.endpoint,
            update_policy = executor.update_policy().as_str(),
            seeded = config.decision.seed.is_some(),
            "agent runtime initialized"
        );

        Ok(Self::new(executor, config.decision.seed))
    }

    pub fn with_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn executor(&self) -> &PipelineExecutor {
        &self.executor
    }

    pub fn seed(&self) -> Option<u64> {
        self.seed
    }

    /// Runs one ticket, drawing DECIDE's score from the configured seed or from entropy.
    pub fn handle_ticket(
        &self,
        customer: CustomerInfo,
    ) -> Result<PipelineOutcome, ApplicationError> {
        let mut scores = score_source(self.seed);
        self.handle_ticket_with(customer, &mut scores)
    }

    pub fn handle_ticket_with<R>(
        &self,
        customer: CustomerInfo,
        scores: &mut R,
    ) -> Result<PipelineOutcome, ApplicationError>
    where
        R: ScoreSource + ?Sized,
    {
        Ok(self.executor.run(customer, scores, self.sink.as_ref())?)
    }

    /// Runs every ticket on its own blocking task. Results keep the input order.
    ///
    /// With a seed, ticket `i` draws from `seed + i`, so a batch replays identically.
    pub async fn handle_batch(
        &self,
        tickets: Vec<CustomerInfo>,
    ) -> Vec<Result<PipelineOutcome, ApplicationError>> {
        let mut handles = Vec::with_capacity(tickets.len());
        for (index, customer) in tickets.into_iter().enumerate() {
            let executor = self.executor.clone();
            let sink = Arc::clone(&self.sink);
            let seed = self.seed.map(|seed| seed.wrapping_add(index as u64));
            handles.push(tokio::task::spawn_blocking(move || {
                let mut scores = score_source(seed);
                executor.run(customer, &mut scores, sink.as_ref())
            }));
        }

        let mut results = Vec::with_capacity(handles.len());
        for (index, handle) in handles.into_iter().enumerate() {
            let result = match handle.await {
                Ok(outcome) => outcome.map_err(ApplicationError::from),
                Err(error) => {
                    tracing::warn!(
                        event_name = "agent.batch.worker_failed",
                        correlation_id = "batch",
                        ticket_index = index,
                        error = %error,
                        "ticket worker did not complete"
                    );
                    Err(ApplicationError::Integration(format!(
                        "ticket worker {index} did not complete: {error}"
                    )))
                }
            };
            results.push(result);
        }
        results
    }
}

impl Default for AgentRuntime {
    fn default() -> Self {
        Self::new(PipelineExecutor::default(), None)
    }
}

fn score_source(seed: Option<u64>) -> SeededScoreSource {
    match seed {
        Some(seed) => SeededScoreSource::seeded(seed),
        None => SeededScoreSource::from_entropy(),
    }
}
