//! Structured events, one per engine state transition. Delivery is a
//! platform concern; sinks are fire-and-forget.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::dispute::ResolutionKind;
use crate::release::ReleaseKind;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GovernanceEvent {
    ContractFunded {
        contract_id: String,
        amount: u64,
        balance: u64,
    },
    MilestoneVerified {
        project_id: String,
        milestone_id: String,
        verified: bool,
        confidence: f64,
    },
    MilestoneReleased {
        contract_id: String,
        milestone_id: String,
        amount: u64,
        settlement_ref: String,
    },
    ProposalCreated {
        proposal_id: String,
        contract_id: String,
        proposer: String,
    },
    ProposalApproved {
        proposal_id: String,
        signer: String,
        current: u32,
        required: u32,
    },
    ProposalRejected {
        proposal_id: String,
        actor: String,
    },
    ProposalExecuted {
        proposal_id: String,
        contract_id: String,
    },
    ReleaseInitiated {
        release_id: String,
        contract_id: String,
        kind: ReleaseKind,
    },
    ReleaseApproved {
        release_id: String,
        approver: String,
        current: u32,
        required: u32,
    },
    ReleaseExecuted {
        release_id: String,
        contract_id: String,
        amount: Option<u64>,
        settlement_ref: Option<String>,
    },
    ReleaseCancelled {
        release_id: String,
        actor: String,
    },
    DisputeOpened {
        dispute_id: String,
        contract_id: String,
        initiator: String,
    },
    EvidenceSubmitted {
        dispute_id: String,
        submitted_by: String,
        file_name: String,
    },
    ArbitratorAssigned {
        dispute_id: String,
        arbitrator: String,
    },
    DisputeResolved {
        dispute_id: String,
        resolution: ResolutionKind,
    },
}

/// Fire-and-forget event consumer. Implementations must not fail the
/// calling operation.
pub trait EventSink {
    fn publish(&self, event: GovernanceEvent);
}

/// Drops everything.
pub struct NullSink;

impl EventSink for NullSink {
    fn publish(&self, _event: GovernanceEvent) {}
}

/// Records events in memory; used by tests to assert on transitions.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<GovernanceEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<GovernanceEvent> {
        self.events.lock().expect("event sink mutex poisoned").clone()
    }
}

impl EventSink for MemorySink {
    fn publish(&self, event: GovernanceEvent) {
        self.events.lock().expect("event sink mutex poisoned").push(event);
    }
}
