//! Dispute and arbitration: the escalation path that can force a
//! resolution past normal milestone verification.
//!
//! A `FundRelease` resolution goes through the same release primitive
//! as the emergency workflow; there is no second enforcement path.
//! `ContractTermination` is the one sanctioned override of the
//! multi-sig/time-lock gate, restricted to the assigned arbitrator.

use serde::{Deserialize, Serialize};

use crate::error::GovernanceError;
use crate::event::{EventSink, GovernanceEvent};
use crate::release::{apply_release, ReleaseKind};
use crate::settlement::SettlementAgent;
use crate::store::GovernanceStore;
use crate::Result;

/// Upper bound on a single evidence item.
pub const MAX_EVIDENCE_BYTES: u64 = 10 * 1024 * 1024;
/// File extensions accepted as evidence.
pub const ALLOWED_EVIDENCE_TYPES: &[&str] = &["pdf", "png", "jpg", "jpeg", "mp4", "csv", "json"];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DisputeStatus {
    Open,
    UnderReview,
    ArbitrationAssigned,
    Resolved,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionKind {
    FundRelease,
    ContractModification,
    ContractTermination,
    NoAction,
}

/// An immutable, append-only evidence item owned by its dispute.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Evidence {
    pub submitted_by: String,
    pub file_name: String,
    /// Lower-cased file extension; must be allow-listed.
    pub file_type: String,
    pub size_bytes: u64,
    /// Where the platform stored the file.
    pub uri: String,
    pub submitted_at: i64,
}

/// The arbitrator's verdict.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Resolution {
    pub kind: ResolutionKind,
    /// Required for `FundRelease`.
    pub amount: Option<u64>,
    /// Required for `FundRelease`.
    pub recipient: Option<String>,
    pub notes: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Dispute {
    pub id: String,
    pub contract_id: String,
    pub milestone_id: Option<String>,
    pub initiator: String,
    pub respondent: String,
    pub summary: String,
    pub status: DisputeStatus,
    pub evidence: Vec<Evidence>,
    pub arbitrator: Option<String>,
    pub resolution: Option<Resolution>,
    pub opened_at: i64,
    pub resolved_at: Option<i64>,
    pub version: u64,
}

/// Drives a dispute from open through arbitration to resolution.
pub struct DisputeWorkflow<'a, S: ?Sized, A: ?Sized> {
    store: &'a S,
    settlement: &'a A,
    events: &'a dyn EventSink,
}

impl<'a, S, A> DisputeWorkflow<'a, S, A>
where
    S: GovernanceStore + ?Sized,
    A: SettlementAgent + ?Sized,
{
    pub fn new(store: &'a S, settlement: &'a A, events: &'a dyn EventSink) -> Self {
        Self {
            store,
            settlement,
            events,
        }
    }

    pub fn open(
        &self,
        contract_id: &str,
        milestone_id: Option<&str>,
        initiator: &str,
        respondent: &str,
        summary: &str,
        now: i64,
    ) -> Result<Dispute> {
        // existence check; disputes may target stopped contracts too
        self.store.contract(contract_id)?;
        if initiator.trim().is_empty() || respondent.trim().is_empty() {
            return Err(GovernanceError::ValidationFailed(
                "initiator and respondent required".into(),
            ));
        }
        if initiator == respondent {
            return Err(GovernanceError::ValidationFailed(
                "initiator cannot dispute themselves".into(),
            ));
        }
        if summary.trim().is_empty() {
            return Err(GovernanceError::ValidationFailed(
                "dispute summary required".into(),
            ));
        }

        let dispute = Dispute {
            id: self.store.allocate_id("dsp")?,
            contract_id: contract_id.to_string(),
            milestone_id: milestone_id.map(str::to_string),
            initiator: initiator.to_string(),
            respondent: respondent.to_string(),
            summary: summary.to_string(),
            status: DisputeStatus::Open,
            evidence: Vec::new(),
            arbitrator: None,
            resolution: None,
            opened_at: now,
            resolved_at: None,
            version: 0,
        };
        self.store.insert_dispute(dispute.clone())?;
        self.events.publish(GovernanceEvent::DisputeOpened {
            dispute_id: dispute.id.clone(),
            contract_id: contract_id.to_string(),
            initiator: initiator.to_string(),
        });
        Ok(dispute)
    }

    /// Append an evidence item. The first submission moves the dispute
    /// from `Open` to `UnderReview`.
    pub fn submit_evidence(&self, dispute_id: &str, evidence: Evidence) -> Result<Dispute> {
        if evidence.file_name.trim().is_empty() {
            return Err(GovernanceError::ValidationFailed(
                "evidence file name required".into(),
            ));
        }
        if evidence.size_bytes == 0 || evidence.size_bytes > MAX_EVIDENCE_BYTES {
            return Err(GovernanceError::ValidationFailed(format!(
                "evidence size must be within 1..={MAX_EVIDENCE_BYTES} bytes"
            )));
        }
        let file_type = evidence.file_type.to_lowercase();
        if !ALLOWED_EVIDENCE_TYPES.contains(&file_type.as_str()) {
            return Err(GovernanceError::ValidationFailed(format!(
                "evidence type {file_type:?} is not allowed"
            )));
        }

        let mut dispute = self.store.dispute(dispute_id)?;
        match dispute.status {
            DisputeStatus::Open | DisputeStatus::UnderReview | DisputeStatus::ArbitrationAssigned => {}
            DisputeStatus::Resolved => {
                return Err(GovernanceError::InvalidState(format!(
                    "dispute {dispute_id} is resolved; evidence is closed"
                )))
            }
        }
        let submitted_by = evidence.submitted_by.clone();
        let file_name = evidence.file_name.clone();
        dispute.evidence.push(Evidence { file_type, ..evidence });
        if dispute.status == DisputeStatus::Open {
            dispute.status = DisputeStatus::UnderReview;
        }
        self.store.update_dispute(&dispute)?;
        self.events.publish(GovernanceEvent::EvidenceSubmitted {
            dispute_id: dispute_id.to_string(),
            submitted_by,
            file_name,
        });
        Ok(dispute)
    }

    /// Assign a neutral arbitrator to a dispute under review.
    pub fn assign_arbitrator(&self, dispute_id: &str, arbitrator: &str) -> Result<Dispute> {
        let mut dispute = self.store.dispute(dispute_id)?;
        if dispute.status != DisputeStatus::UnderReview {
            return Err(GovernanceError::InvalidState(format!(
                "dispute {dispute_id} is {:?}, not UnderReview",
                dispute.status
            )));
        }
        if arbitrator.trim().is_empty()
            || arbitrator == dispute.initiator
            || arbitrator == dispute.respondent
        {
            return Err(GovernanceError::ValidationFailed(
                "arbitrator must be a neutral third party".into(),
            ));
        }
        dispute.arbitrator = Some(arbitrator.to_string());
        dispute.status = DisputeStatus::ArbitrationAssigned;
        self.store.update_dispute(&dispute)?;
        self.events.publish(GovernanceEvent::ArbitratorAssigned {
            dispute_id: dispute_id.to_string(),
            arbitrator: arbitrator.to_string(),
        });
        Ok(dispute)
    }

    /// Record the arbitrator's verdict and enforce it.
    pub fn resolve(
        &self,
        dispute_id: &str,
        arbitrator: &str,
        resolution: Resolution,
        now: i64,
    ) -> Result<Dispute> {
        let mut dispute = self.store.dispute(dispute_id)?;
        if dispute.status != DisputeStatus::ArbitrationAssigned {
            return Err(GovernanceError::InvalidState(format!(
                "dispute {dispute_id} is {:?}, not ArbitrationAssigned",
                dispute.status
            )));
        }
        if dispute.arbitrator.as_deref() != Some(arbitrator) {
            return Err(GovernanceError::Unauthorized {
                actor: arbitrator.to_string(),
                action: format!("resolve dispute {dispute_id}"),
            });
        }

        match resolution.kind {
            ResolutionKind::FundRelease => {
                let amount = resolution.amount.ok_or_else(|| {
                    GovernanceError::ValidationFailed(
                        "fund release resolution requires an amount".into(),
                    )
                })?;
                let recipient = resolution.recipient.as_deref().ok_or_else(|| {
                    GovernanceError::ValidationFailed(
                        "fund release resolution requires a recipient".into(),
                    )
                })?;
                apply_release(
                    self.store,
                    self.settlement,
                    &dispute.contract_id,
                    ReleaseKind::DisputeResolution,
                    Some(amount),
                    recipient,
                    &resolution.notes,
                    None,
                    now,
                )?;
            }
            ResolutionKind::ContractTermination => {
                let mut contract = self.store.contract(&dispute.contract_id)?;
                contract.cancel()?;
                self.store.update_contract(&contract)?;
            }
            ResolutionKind::ContractModification | ResolutionKind::NoAction => {
                // recorded on the dispute only; any contract change goes
                // through the normal proposal path
            }
        }

        let kind = resolution.kind;
        dispute.resolution = Some(resolution);
        dispute.status = DisputeStatus::Resolved;
        dispute.resolved_at = Some(now);
        self.store.update_dispute(&dispute)?;
        self.events.publish(GovernanceEvent::DisputeResolved {
            dispute_id: dispute_id.to_string(),
            resolution: kind,
        });
        Ok(dispute)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::{ContractStatus, EscrowContract};
    use crate::event::MemorySink;
    use crate::settlement::MockSettlementAgent;
    use crate::store::MemoryStore;

    fn setup(balance: u64) -> MemoryStore {
        let store = MemoryStore::new();
        let mut contract =
            EscrowContract::new("esc-1", "proj-1", vec!["a".into(), "b".into()], 2, 0).unwrap();
        contract.credit(balance).unwrap();
        store.insert_contract(contract).unwrap();
        store
    }

    fn evidence(ext: &str, size: u64) -> Evidence {
        Evidence {
            submitted_by: "funder-9".into(),
            file_name: format!("production-report.{ext}"),
            file_type: ext.into(),
            size_bytes: size,
            uri: format!("s3://evidence/production-report.{ext}"),
            submitted_at: 5,
        }
    }

    fn workflow<'a>(
        store: &'a MemoryStore,
        settlement: &'a MockSettlementAgent,
        sink: &'a MemorySink,
    ) -> DisputeWorkflow<'a, MemoryStore, MockSettlementAgent> {
        DisputeWorkflow::new(store, settlement, sink)
    }

    #[test]
    fn evidence_moves_open_to_under_review() {
        let store = setup(1000);
        let sink = MemorySink::new();
        let settlement = MockSettlementAgent;
        let wf = workflow(&store, &settlement, &sink);
        let d = wf
            .open("esc-1", Some("ms-1"), "funder-9", "installer-2", "panels never commissioned", 0)
            .unwrap();
        assert_eq!(d.status, DisputeStatus::Open);
        let d = wf.submit_evidence(&d.id, evidence("pdf", 1024)).unwrap();
        assert_eq!(d.status, DisputeStatus::UnderReview);
        assert_eq!(d.evidence.len(), 1);
    }

    #[test]
    fn evidence_bounds_are_enforced() {
        let store = setup(1000);
        let sink = MemorySink::new();
        let settlement = MockSettlementAgent;
        let wf = workflow(&store, &settlement, &sink);
        let d = wf
            .open("esc-1", None, "funder-9", "installer-2", "output shortfall", 0)
            .unwrap();
        assert!(wf.submit_evidence(&d.id, evidence("exe", 1024)).is_err());
        assert!(wf
            .submit_evidence(&d.id, evidence("pdf", MAX_EVIDENCE_BYTES + 1))
            .is_err());
        // extension matching is case-insensitive
        assert!(wf.submit_evidence(&d.id, evidence("PDF", 1024)).is_ok());
    }

    #[test]
    fn arbitrator_must_be_neutral_and_assigned() {
        let store = setup(1000);
        let sink = MemorySink::new();
        let settlement = MockSettlementAgent;
        let wf = workflow(&store, &settlement, &sink);
        let d = wf
            .open("esc-1", None, "funder-9", "installer-2", "output shortfall", 0)
            .unwrap();
        // not yet under review
        assert!(wf.assign_arbitrator(&d.id, "arb-1").is_err());
        wf.submit_evidence(&d.id, evidence("csv", 64)).unwrap();
        assert!(wf.assign_arbitrator(&d.id, "funder-9").is_err());
        let d = wf.assign_arbitrator(&d.id, "arb-1").unwrap();
        assert_eq!(d.status, DisputeStatus::ArbitrationAssigned);

        // only the assigned arbitrator resolves
        let verdict = Resolution {
            kind: ResolutionKind::NoAction,
            amount: None,
            recipient: None,
            notes: "claims unsubstantiated".into(),
        };
        assert!(matches!(
            wf.resolve(&d.id, "arb-2", verdict.clone(), 10),
            Err(GovernanceError::Unauthorized { .. })
        ));
        let d = wf.resolve(&d.id, "arb-1", verdict, 10).unwrap();
        assert_eq!(d.status, DisputeStatus::Resolved);
        assert_eq!(d.resolved_at, Some(10));
    }

    #[test]
    fn fund_release_uses_the_release_primitive() {
        let store = setup(1000);
        let sink = MemorySink::new();
        let settlement = MockSettlementAgent;
        let wf = workflow(&store, &settlement, &sink);
        let d = wf
            .open("esc-1", Some("ms-2"), "funder-9", "installer-2", "output shortfall", 0)
            .unwrap();
        wf.submit_evidence(&d.id, evidence("csv", 64)).unwrap();
        wf.assign_arbitrator(&d.id, "arb-1").unwrap();
        wf.resolve(
            &d.id,
            "arb-1",
            Resolution {
                kind: ResolutionKind::FundRelease,
                amount: Some(400),
                recipient: Some("funder-9".into()),
                notes: "refund for undelivered capacity".into(),
            },
            10,
        )
        .unwrap();
        assert_eq!(store.contract("esc-1").unwrap().balance, 600);
    }

    #[test]
    fn fund_release_beyond_balance_leaves_contract_unchanged() {
        let store = setup(300);
        let sink = MemorySink::new();
        let settlement = MockSettlementAgent;
        let wf = workflow(&store, &settlement, &sink);
        let d = wf
            .open("esc-1", None, "funder-9", "installer-2", "output shortfall", 0)
            .unwrap();
        wf.submit_evidence(&d.id, evidence("csv", 64)).unwrap();
        wf.assign_arbitrator(&d.id, "arb-1").unwrap();
        let err = wf
            .resolve(
                &d.id,
                "arb-1",
                Resolution {
                    kind: ResolutionKind::FundRelease,
                    amount: Some(500),
                    recipient: Some("funder-9".into()),
                    notes: "refund".into(),
                },
                10,
            )
            .unwrap_err();
        assert_eq!(
            err,
            GovernanceError::BalanceExceeded { requested: 500, available: 300 }
        );
        let contract = store.contract("esc-1").unwrap();
        assert_eq!(contract.balance, 300);
        assert_eq!(contract.status, ContractStatus::Active);
        // the dispute stays resolvable
        assert_eq!(
            store.dispute(&d.id).unwrap().status,
            DisputeStatus::ArbitrationAssigned
        );
    }

    #[test]
    fn termination_bypasses_the_multisig_gate() {
        let store = setup(1000);
        let sink = MemorySink::new();
        let settlement = MockSettlementAgent;
        let wf = workflow(&store, &settlement, &sink);
        let d = wf
            .open("esc-1", None, "funder-9", "installer-2", "abandoned site", 0)
            .unwrap();
        wf.submit_evidence(&d.id, evidence("jpg", 64)).unwrap();
        wf.assign_arbitrator(&d.id, "arb-1").unwrap();
        wf.resolve(
            &d.id,
            "arb-1",
            Resolution {
                kind: ResolutionKind::ContractTermination,
                amount: None,
                recipient: None,
                notes: "project abandoned".into(),
            },
            10,
        )
        .unwrap();
        assert_eq!(
            store.contract("esc-1").unwrap().status,
            ContractStatus::Cancelled
        );
    }
}
