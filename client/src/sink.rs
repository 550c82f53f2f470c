use gridlock_core::{EventSink, GovernanceEvent};

/// Forwards engine events to the tracing pipeline as JSON lines.
pub struct TracingSink;

impl EventSink for TracingSink {
    fn publish(&self, event: GovernanceEvent) {
        match serde_json::to_string(&event) {
            Ok(json) => tracing::info!(target: "gridlock::event", event = %json),
            Err(err) => tracing::warn!("failed to serialize event: {err}"),
        }
    }
}
