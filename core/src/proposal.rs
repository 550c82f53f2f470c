//! Multi-signature proposals for sensitive contract changes.
//!
//! A proposal snapshots its contract's threshold at creation time, so a
//! minority proposer can never weaken its own approval bar. Expiry is
//! checked lazily on every read, approval, and execution; there is no
//! background sweep.

use serde::{Deserialize, Serialize};

use crate::error::GovernanceError;
use crate::event::{EventSink, GovernanceEvent};
use crate::store::GovernanceStore;
use crate::timelock::{OperationKind, TimeLockRegistry};
use crate::Result;

/// Default proposal lifetime.
pub const DEFAULT_PROPOSAL_EXPIRY_SECS: i64 = 48 * 60 * 60;
/// Hard cap on proposal lifetimes.
pub const MAX_PROPOSAL_EXPIRY_SECS: i64 = 7 * 24 * 60 * 60;

/// One recorded approval: who signed, and when.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Approval {
    pub signer: String,
    pub approved_at: i64,
}

/// A contract parameter a proposal may change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "parameter", rename_all = "snake_case")]
pub enum ContractParameter {
    RequiredSignatures { count: u32 },
    AddSigner { signer: String },
    RemoveSigner { signer: String },
}

/// What a proposal does when executed. One variant per proposal type,
/// so execution is an exhaustive match rather than payload inspection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ProposalAction {
    ParameterChange { change: ContractParameter },
    ContractSuspension { reason: String },
}

impl ProposalAction {
    fn operation_kind(&self) -> OperationKind {
        match self {
            Self::ParameterChange { .. } => OperationKind::ParameterChange,
            Self::ContractSuspension { .. } => OperationKind::ContractSuspension,
        }
    }

    fn validate(&self) -> Result<()> {
        match self {
            Self::ParameterChange { change } => match change {
                ContractParameter::RequiredSignatures { count: 0 } => Err(
                    GovernanceError::ValidationFailed("threshold must be at least 1".into()),
                ),
                ContractParameter::AddSigner { signer }
                | ContractParameter::RemoveSigner { signer }
                    if signer.trim().is_empty() =>
                {
                    Err(GovernanceError::ValidationFailed(
                        "signer identity must be non-blank".into(),
                    ))
                }
                _ => Ok(()),
            },
            Self::ContractSuspension { reason } => {
                if reason.trim().is_empty() {
                    Err(GovernanceError::ValidationFailed(
                        "suspension reason required".into(),
                    ))
                } else {
                    Ok(())
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ProposalStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
    Executed,
}

/// A proposal collecting signatures against a per-contract threshold.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MultiSigProposal {
    pub id: String,
    pub contract_id: String,
    pub action: ProposalAction,
    pub proposer: String,
    pub created_at: i64,
    pub expires_at: i64,
    /// Contract threshold snapshotted at creation.
    pub required_signatures: u32,
    /// Ordered approvals; a signer appears at most once.
    pub approvals: Vec<Approval>,
    /// Delay lock attached the moment the threshold is reached.
    pub timelock_id: Option<String>,
    pub status: ProposalStatus,
    pub version: u64,
}

impl MultiSigProposal {
    pub fn current_approvals(&self) -> u32 {
        self.approvals.len() as u32
    }

    pub fn has_approved(&self, signer: &str) -> bool {
        self.approvals.iter().any(|a| a.signer == signer)
    }

    /// Lazy expiry: only a still-pending proposal can expire. Approval
    /// is one-way and independent of expiry.
    fn refresh_expiry(&mut self, now: i64) -> bool {
        if self.status == ProposalStatus::Pending && now >= self.expires_at {
            self.status = ProposalStatus::Expired;
            true
        } else {
            false
        }
    }
}

/// Creates proposals, collects signatures, and executes approved,
/// matured changes. Stateless; all state lives in the store.
pub struct ProposalManager<'a, S: ?Sized> {
    store: &'a S,
    events: &'a dyn EventSink,
}

impl<'a, S: GovernanceStore + ?Sized> ProposalManager<'a, S> {
    pub fn new(store: &'a S, events: &'a dyn EventSink) -> Self {
        Self { store, events }
    }

    pub fn create(
        &self,
        contract_id: &str,
        action: ProposalAction,
        proposer: &str,
        expiry_secs: Option<i64>,
        now: i64,
    ) -> Result<MultiSigProposal> {
        action.validate()?;
        let contract = self.store.contract(contract_id)?;
        contract.ensure_signer(proposer, "create a proposal")?;
        if !contract.holds_funds() {
            return Err(GovernanceError::InvalidState(format!(
                "contract {contract_id} no longer accepts proposals"
            )));
        }
        let expiry = expiry_secs.unwrap_or(DEFAULT_PROPOSAL_EXPIRY_SECS);
        if expiry <= 0 || expiry > MAX_PROPOSAL_EXPIRY_SECS {
            return Err(GovernanceError::ValidationFailed(format!(
                "proposal expiry must be within 1..={MAX_PROPOSAL_EXPIRY_SECS} seconds"
            )));
        }

        let proposal = MultiSigProposal {
            id: self.store.allocate_id("prop")?,
            contract_id: contract_id.to_string(),
            action,
            proposer: proposer.to_string(),
            created_at: now,
            expires_at: now + expiry,
            required_signatures: contract.required_signatures,
            approvals: Vec::new(),
            timelock_id: None,
            status: ProposalStatus::Pending,
            version: 0,
        };
        self.store.insert_proposal(proposal.clone())?;
        self.events.publish(GovernanceEvent::ProposalCreated {
            proposal_id: proposal.id.clone(),
            contract_id: contract_id.to_string(),
            proposer: proposer.to_string(),
        });
        Ok(proposal)
    }

    /// Fetch a proposal, persisting a lazy expiry transition if one
    /// occurred.
    pub fn proposal(&self, id: &str, now: i64) -> Result<MultiSigProposal> {
        let mut proposal = self.store.proposal(id)?;
        if proposal.refresh_expiry(now) {
            self.store.update_proposal(&proposal)?;
        }
        Ok(proposal)
    }

    /// Record one signer's approval. Flips the proposal to `Approved`
    /// the instant the snapshot threshold is reached, and starts the
    /// execution delay.
    pub fn approve(&self, id: &str, signer: &str, now: i64) -> Result<MultiSigProposal> {
        let mut proposal = self.proposal(id, now)?;
        let contract = self.store.contract(&proposal.contract_id)?;
        contract.ensure_signer(signer, "approve a proposal")?;
        match proposal.status {
            ProposalStatus::Pending | ProposalStatus::Approved => {}
            status => {
                return Err(GovernanceError::InvalidState(format!(
                    "proposal {id} is {status:?} and no longer accepts signatures"
                )))
            }
        }
        if proposal.has_approved(signer) {
            return Err(GovernanceError::DuplicateAction(format!(
                "{signer} already approved proposal {id}"
            )));
        }

        proposal.approvals.push(Approval {
            signer: signer.to_string(),
            approved_at: now,
        });
        if proposal.status == ProposalStatus::Pending
            && proposal.current_approvals() >= proposal.required_signatures
        {
            proposal.status = ProposalStatus::Approved;
            let lock = TimeLockRegistry::new(self.store).create(
                &proposal.contract_id,
                proposal.action.operation_kind(),
                &proposal.proposer,
                None,
                now,
            )?;
            proposal.timelock_id = Some(lock.id);
        }
        self.store.update_proposal(&proposal)?;
        self.events.publish(GovernanceEvent::ProposalApproved {
            proposal_id: id.to_string(),
            signer: signer.to_string(),
            current: proposal.current_approvals(),
            required: proposal.required_signatures,
        });
        Ok(proposal)
    }

    /// Explicit terminal rejection, available to the proposer before
    /// approval.
    pub fn reject(&self, id: &str, actor: &str, now: i64) -> Result<MultiSigProposal> {
        let mut proposal = self.proposal(id, now)?;
        if actor != proposal.proposer {
            return Err(GovernanceError::Unauthorized {
                actor: actor.to_string(),
                action: format!("reject proposal {id}"),
            });
        }
        if proposal.status != ProposalStatus::Pending {
            return Err(GovernanceError::InvalidState(format!(
                "proposal {id} is {:?}, not Pending",
                proposal.status
            )));
        }
        proposal.status = ProposalStatus::Rejected;
        self.store.update_proposal(&proposal)?;
        self.events.publish(GovernanceEvent::ProposalRejected {
            proposal_id: id.to_string(),
            actor: actor.to_string(),
        });
        Ok(proposal)
    }

    /// Apply an approved proposal's effect once its delay lock matured.
    /// The threshold and the time lock are independent gates.
    pub fn execute(&self, id: &str, executor: &str, now: i64) -> Result<MultiSigProposal> {
        let mut proposal = self.proposal(id, now)?;
        let mut contract = self.store.contract(&proposal.contract_id)?;
        contract.ensure_signer(executor, "execute a proposal")?;
        match proposal.status {
            ProposalStatus::Approved => {}
            ProposalStatus::Pending => {
                return Err(GovernanceError::InsufficientApprovals {
                    current: proposal.current_approvals(),
                    required: proposal.required_signatures,
                })
            }
            status => {
                return Err(GovernanceError::InvalidState(format!(
                    "proposal {id} is {status:?} and cannot be executed"
                )))
            }
        }

        let registry = TimeLockRegistry::new(self.store);
        let timelock_id = proposal.timelock_id.clone().ok_or_else(|| {
            GovernanceError::InvalidState(format!("proposal {id} has no delay lock"))
        })?;
        let lock = self.store.timelock(&timelock_id)?;
        if !lock.is_matured(now) {
            return Err(GovernanceError::TimeLockNotMatured {
                id: timelock_id,
                remaining_secs: lock.remaining_secs(now),
            });
        }

        match &proposal.action {
            ProposalAction::ParameterChange { change } => {
                contract.apply_parameter(change)?;
            }
            ProposalAction::ContractSuspension { .. } => {
                contract.suspend()?;
            }
        }
        self.store.update_contract(&contract)?;
        registry.mark_executed(&timelock_id)?;

        proposal.status = ProposalStatus::Executed;
        self.store.update_proposal(&proposal)?;
        self.events.publish(GovernanceEvent::ProposalExecuted {
            proposal_id: id.to_string(),
            contract_id: proposal.contract_id.clone(),
        });
        Ok(proposal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::{ContractStatus, EscrowContract};
    use crate::event::MemorySink;
    use crate::store::MemoryStore;
    use crate::timelock::DEFAULT_DELAY_SECS;

    fn setup() -> MemoryStore {
        let store = MemoryStore::new();
        let contract = EscrowContract::new(
            "esc-1",
            "proj-1",
            vec!["a".into(), "b".into(), "c".into()],
            2,
            0,
        )
        .unwrap();
        store.insert_contract(contract).unwrap();
        store
    }

    fn raise_threshold() -> ProposalAction {
        ProposalAction::ParameterChange {
            change: ContractParameter::RequiredSignatures { count: 3 },
        }
    }

    #[test]
    fn threshold_is_snapshotted_from_contract() {
        let store = setup();
        let sink = MemorySink::new();
        let manager = ProposalManager::new(&store, &sink);
        let p = manager.create("esc-1", raise_threshold(), "a", None, 0).unwrap();
        assert_eq!(p.required_signatures, 2);
        assert_eq!(p.status, ProposalStatus::Pending);
    }

    #[test]
    fn non_signer_cannot_create_or_approve() {
        let store = setup();
        let sink = MemorySink::new();
        let manager = ProposalManager::new(&store, &sink);
        assert!(matches!(
            manager.create("esc-1", raise_threshold(), "mallory", None, 0),
            Err(GovernanceError::Unauthorized { .. })
        ));
        let p = manager.create("esc-1", raise_threshold(), "a", None, 0).unwrap();
        assert!(matches!(
            manager.approve(&p.id, "mallory", 1),
            Err(GovernanceError::Unauthorized { .. })
        ));
    }

    #[test]
    fn duplicate_approval_is_rejected() {
        let store = setup();
        let sink = MemorySink::new();
        let manager = ProposalManager::new(&store, &sink);
        let p = manager.create("esc-1", raise_threshold(), "a", None, 0).unwrap();
        manager.approve(&p.id, "a", 1).unwrap();
        assert!(matches!(
            manager.approve(&p.id, "a", 2),
            Err(GovernanceError::DuplicateAction(_))
        ));
    }

    #[test]
    fn approval_flips_at_threshold_and_starts_delay() {
        let store = setup();
        let sink = MemorySink::new();
        let manager = ProposalManager::new(&store, &sink);
        let p = manager.create("esc-1", raise_threshold(), "a", None, 0).unwrap();
        let p = manager.approve(&p.id, "a", 1).unwrap();
        assert_eq!(p.status, ProposalStatus::Pending);
        assert!(p.timelock_id.is_none());
        let p = manager.approve(&p.id, "b", 2).unwrap();
        assert_eq!(p.status, ProposalStatus::Approved);
        let lock = store.timelock(p.timelock_id.as_ref().unwrap()).unwrap();
        assert_eq!(lock.execution_time, 2 + DEFAULT_DELAY_SECS);
    }

    #[test]
    fn execution_gates_are_independent() {
        let store = setup();
        let sink = MemorySink::new();
        let manager = ProposalManager::new(&store, &sink);
        let p = manager.create("esc-1", raise_threshold(), "a", None, 0).unwrap();
        manager.approve(&p.id, "a", 1).unwrap();

        // threshold not met, even far in the future
        assert_eq!(
            manager.execute(&p.id, "a", DEFAULT_PROPOSAL_EXPIRY_SECS - 1).unwrap_err(),
            GovernanceError::InsufficientApprovals { current: 1, required: 2 }
        );

        let p = manager.approve(&p.id, "b", 2).unwrap();
        // approved, but delay not elapsed
        assert!(matches!(
            manager.execute(&p.id, "a", 3).unwrap_err(),
            GovernanceError::TimeLockNotMatured { .. }
        ));

        let p = manager.execute(&p.id, "a", 2 + DEFAULT_DELAY_SECS).unwrap();
        assert_eq!(p.status, ProposalStatus::Executed);
        assert_eq!(store.contract("esc-1").unwrap().required_signatures, 3);
    }

    #[test]
    fn pending_proposal_expires_lazily() {
        let store = setup();
        let sink = MemorySink::new();
        let manager = ProposalManager::new(&store, &sink);
        let p = manager
            .create("esc-1", raise_threshold(), "a", Some(100), 0)
            .unwrap();
        manager.approve(&p.id, "a", 1).unwrap();
        // lazy expiry surfaces on the next touch
        assert!(matches!(
            manager.approve(&p.id, "b", 100),
            Err(GovernanceError::InvalidState(_))
        ));
        assert_eq!(
            store.proposal(&p.id).unwrap().status,
            ProposalStatus::Expired
        );
    }

    #[test]
    fn approved_proposal_survives_expiry_timestamp() {
        let store = setup();
        let sink = MemorySink::new();
        let manager = ProposalManager::new(&store, &sink);
        let p = manager
            .create("esc-1", raise_threshold(), "a", Some(100), 0)
            .unwrap();
        manager.approve(&p.id, "a", 1).unwrap();
        manager.approve(&p.id, "b", 2).unwrap();
        // approval is one-way; the expiry timestamp no longer applies
        let p = manager.execute(&p.id, "c", 2 + DEFAULT_DELAY_SECS).unwrap();
        assert_eq!(p.status, ProposalStatus::Executed);
    }

    #[test]
    fn suspension_proposal_suspends_contract() {
        let store = setup();
        let sink = MemorySink::new();
        let manager = ProposalManager::new(&store, &sink);
        let action = ProposalAction::ContractSuspension {
            reason: "inverter fraud investigation".into(),
        };
        let p = manager.create("esc-1", action, "a", None, 0).unwrap();
        manager.approve(&p.id, "a", 1).unwrap();
        manager.approve(&p.id, "b", 2).unwrap();
        manager.execute(&p.id, "a", 2 + DEFAULT_DELAY_SECS).unwrap();
        assert_eq!(
            store.contract("esc-1").unwrap().status,
            ContractStatus::EmergencyStopped
        );
    }

    #[test]
    fn only_proposer_rejects() {
        let store = setup();
        let sink = MemorySink::new();
        let manager = ProposalManager::new(&store, &sink);
        let p = manager.create("esc-1", raise_threshold(), "a", None, 0).unwrap();
        assert!(matches!(
            manager.reject(&p.id, "b", 1),
            Err(GovernanceError::Unauthorized { .. })
        ));
        let p = manager.reject(&p.id, "a", 1).unwrap();
        assert_eq!(p.status, ProposalStatus::Rejected);
        assert!(manager.approve(&p.id, "b", 2).is_err());
    }
}
