use std::collections::BTreeMap;

use supportflow_core::audit::{AuditEvent, AuditOutcome, AuditSink};

/// Forwards pipeline audit events to `tracing`.
///
/// Successful events log at `info`; degraded, rejected and failed ones at `warn`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, event: AuditEvent) {
        let ticket_id = event.ticket_id.as_ref().map(|id| id.0.as_str()).unwrap_or("unassigned");
        let metadata = render_metadata(&event.metadata);

        match event.outcome {
            AuditOutcome::Success => tracing::info!(
                event_name = %event.event_type,
                correlation_id = %event.correlation_id,
                ticket_id,
                category = ?event.category,
                actor = %event.actor,
                metadata = %metadata,
                "pipeline event"
            ),
            AuditOutcome::Degraded | AuditOutcome::Rejected | AuditOutcome::Failed => {
                tracing::warn!(
                    event_name = %event.event_type,
                    correlation_id = %event.correlation_id,
                    ticket_id,
                    category = ?event.category,
                    actor = %event.actor,
                    outcome = ?event.outcome,
                    metadata = %metadata,
                    "pipeline event"
                )
            }
        }
    }
}

fn render_metadata(metadata: &BTreeMap<String, String>) -> String {
    metadata.iter().map(|(key, value)| format!("{key}={value}")).collect::<Vec<_>>().join(" ")
}
