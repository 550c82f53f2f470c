//! Fund releases: the normal verified-milestone payout and the
//! emergency workflow that moves escrowed funds (or suspends a
//! contract) outside the milestone path, gated simultaneously by the
//! contract's signature threshold and a mandatory time lock.

use serde::{Deserialize, Serialize};

use crate::error::GovernanceError;
use crate::event::{EventSink, GovernanceEvent};
use crate::proposal::Approval;
use crate::settlement::{SettlementAgent, SettlementReceipt, SettlementRequest};
use crate::store::GovernanceStore;
use crate::timelock::{OperationKind, TimeLockRegistry, TimeLockStatus, MAX_EMERGENCY_DELAY_SECS};
use crate::verify::VerificationResult;
use crate::Result;

/// Reasons are audit records; one-word justifications are rejected.
pub const MIN_REASON_LEN: usize = 10;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseKind {
    /// Release `amount`, keep the contract active.
    Partial,
    /// Release the whole balance and complete the contract.
    Full,
    /// Stop the contract without moving funds.
    Suspend,
    /// Fund movement forced by an arbitration resolution.
    DisputeResolution,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ReleaseStatus {
    Pending,
    Approved,
    Executed,
    Cancelled,
}

/// A stakeholder-initiated emergency action against one contract.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmergencyRelease {
    pub id: String,
    pub contract_id: String,
    pub kind: ReleaseKind,
    /// Required for `Partial`; absent otherwise.
    pub amount: Option<u64>,
    pub recipient: String,
    pub reason: String,
    pub proposer: String,
    pub timelock_id: String,
    /// Mirrors the contract's threshold at initiation.
    pub required_approvals: u32,
    pub approvals: Vec<Approval>,
    pub status: ReleaseStatus,
    /// Opaque settlement reference once executed.
    pub settlement_ref: Option<String>,
    pub cancel_reason: Option<String>,
    pub created_at: i64,
    pub executed_at: Option<i64>,
    pub cancelled_at: Option<i64>,
    pub version: u64,
}

impl EmergencyRelease {
    pub fn current_approvals(&self) -> u32 {
        self.approvals.len() as u32
    }

    pub fn has_approved(&self, signer: &str) -> bool {
        self.approvals.iter().any(|a| a.signer == signer)
    }
}

/// The one release primitive: validates the balance against the
/// contract's *current* state, mutates it per the release kind, and
/// hands fund-moving kinds to the settlement collaborator. Milestone
/// payouts, the emergency workflow, and dispute resolution all go
/// through here.
///
/// The contract commit happens before the settlement call: the
/// store's version check is the serialization point for concurrent
/// releases against one contract, and a losing caller must fail
/// before any external fund movement. A settlement failure after the
/// commit surfaces to the caller; the engine never retries it.
#[allow(clippy::too_many_arguments)]
pub(crate) fn apply_release<S, A>(
    store: &S,
    settlement: &A,
    contract_id: &str,
    kind: ReleaseKind,
    amount: Option<u64>,
    recipient: &str,
    memo: &str,
    milestone_id: Option<&str>,
    now: i64,
) -> Result<Option<SettlementReceipt>>
where
    S: GovernanceStore + ?Sized,
    A: SettlementAgent + ?Sized,
{
    let mut contract = store.contract(contract_id)?;
    if !contract.holds_funds() {
        return Err(GovernanceError::InvalidState(format!(
            "contract {contract_id} is {:?} and holds no governable funds",
            contract.status
        )));
    }
    if let Some(milestone) = milestone_id {
        if contract.released_milestones.iter().any(|m| m == milestone) {
            return Err(GovernanceError::DuplicateAction(format!(
                "milestone {milestone} was already released"
            )));
        }
        contract.released_milestones.push(milestone.to_string());
    }

    let settled_amount = match kind {
        ReleaseKind::Partial | ReleaseKind::DisputeResolution => {
            let amount = amount.ok_or_else(|| {
                GovernanceError::ValidationFailed("release amount required".into())
            })?;
            contract.debit(amount)?;
            Some(amount)
        }
        ReleaseKind::Full => {
            let amount = contract.balance;
            contract.balance = 0;
            contract.complete()?;
            Some(amount)
        }
        ReleaseKind::Suspend => {
            contract.suspend()?;
            None
        }
    };

    store.update_contract(&contract)?;

    let receipt = match settled_amount {
        Some(amount) => Some(settlement.settle(
            &SettlementRequest {
                contract_id: contract_id.to_string(),
                recipient: recipient.to_string(),
                amount,
                memo: memo.to_string(),
            },
            now,
        )?),
        None => None,
    };
    Ok(receipt)
}

/// Pay out a verified milestone claim. This is the normal release
/// path: no multi-sig threshold and no time lock, just a verified
/// result, a bounded amount, and at most one payout per milestone.
#[allow(clippy::too_many_arguments)]
pub fn release_milestone<S, A>(
    store: &S,
    settlement: &A,
    events: &dyn EventSink,
    contract_id: &str,
    verification: &VerificationResult,
    amount: u64,
    recipient: &str,
    now: i64,
) -> Result<SettlementReceipt>
where
    S: GovernanceStore + ?Sized,
    A: SettlementAgent + ?Sized,
{
    if !verification.verified {
        return Err(GovernanceError::InvalidState(format!(
            "milestone {} is not verified",
            verification.milestone_id
        )));
    }
    if amount == 0 {
        return Err(GovernanceError::ValidationFailed(
            "release amount must be non-zero".into(),
        ));
    }
    if recipient.trim().is_empty() {
        return Err(GovernanceError::ValidationFailed(
            "recipient required".into(),
        ));
    }

    let receipt = match apply_release(
        store,
        settlement,
        contract_id,
        ReleaseKind::Partial,
        Some(amount),
        recipient,
        &format!("milestone {}", verification.milestone_id),
        Some(&verification.milestone_id),
        now,
    )? {
        Some(receipt) => receipt,
        None => {
            return Err(GovernanceError::Settlement(
                "milestone release produced no receipt".into(),
            ))
        }
    };
    events.publish(GovernanceEvent::MilestoneReleased {
        contract_id: contract_id.to_string(),
        milestone_id: verification.milestone_id.clone(),
        amount,
        settlement_ref: receipt.reference.clone(),
    });
    Ok(receipt)
}

/// Orchestrates initiate / approve / execute / cancel for emergency
/// releases. Stateless; all state lives in the store.
pub struct ReleaseWorkflow<'a, S: ?Sized, A: ?Sized> {
    store: &'a S,
    settlement: &'a A,
    events: &'a dyn EventSink,
}

impl<'a, S, A> ReleaseWorkflow<'a, S, A>
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

    #[allow(clippy::too_many_arguments)]
    pub fn initiate(
        &self,
        contract_id: &str,
        kind: ReleaseKind,
        amount: Option<u64>,
        recipient: &str,
        reason: &str,
        delay_secs: Option<i64>,
        proposer: &str,
        now: i64,
    ) -> Result<EmergencyRelease> {
        let contract = self.store.contract(contract_id)?;
        contract.ensure_signer(proposer, "initiate an emergency release")?;
        if !contract.holds_funds() {
            return Err(GovernanceError::InvalidState(format!(
                "contract {contract_id} is {:?} and holds no governable funds",
                contract.status
            )));
        }
        if recipient.trim().is_empty() {
            return Err(GovernanceError::ValidationFailed(
                "recipient required".into(),
            ));
        }
        if reason.trim().len() < MIN_REASON_LEN {
            return Err(GovernanceError::ValidationFailed(format!(
                "reason must be at least {MIN_REASON_LEN} characters"
            )));
        }
        match kind {
            ReleaseKind::Partial => {
                let amount = amount.ok_or_else(|| {
                    GovernanceError::ValidationFailed(
                        "partial release requires an amount".into(),
                    )
                })?;
                if amount == 0 {
                    return Err(GovernanceError::ValidationFailed(
                        "release amount must be non-zero".into(),
                    ));
                }
                if amount > contract.balance {
                    return Err(GovernanceError::BalanceExceeded {
                        requested: amount,
                        available: contract.balance,
                    });
                }
            }
            ReleaseKind::Full | ReleaseKind::Suspend => {
                if amount.is_some() {
                    return Err(GovernanceError::ValidationFailed(format!(
                        "{kind:?} releases carry no amount"
                    )));
                }
            }
            ReleaseKind::DisputeResolution => {
                return Err(GovernanceError::ValidationFailed(
                    "dispute resolutions are created by the arbitration workflow".into(),
                ));
            }
        }
        if let Some(delay) = delay_secs {
            if delay <= 0 || delay > MAX_EMERGENCY_DELAY_SECS {
                return Err(GovernanceError::ValidationFailed(format!(
                    "emergency delay must be within 1..={MAX_EMERGENCY_DELAY_SECS} seconds"
                )));
            }
        }

        let lock = TimeLockRegistry::new(self.store).create(
            contract_id,
            OperationKind::EmergencyRelease,
            proposer,
            delay_secs,
            now,
        )?;
        let release = EmergencyRelease {
            id: self.store.allocate_id("rel")?,
            contract_id: contract_id.to_string(),
            kind,
            amount,
            recipient: recipient.to_string(),
            reason: reason.to_string(),
            proposer: proposer.to_string(),
            timelock_id: lock.id,
            required_approvals: contract.required_signatures,
            approvals: Vec::new(),
            status: ReleaseStatus::Pending,
            settlement_ref: None,
            cancel_reason: None,
            created_at: now,
            executed_at: None,
            cancelled_at: None,
            version: 0,
        };
        self.store.insert_release(release.clone())?;
        self.events.publish(GovernanceEvent::ReleaseInitiated {
            release_id: release.id.clone(),
            contract_id: contract_id.to_string(),
            kind,
        });
        Ok(release)
    }

    pub fn approve(&self, release_id: &str, signer: &str, now: i64) -> Result<EmergencyRelease> {
        let mut release = self.store.release(release_id)?;
        let contract = self.store.contract(&release.contract_id)?;
        contract.ensure_signer(signer, "approve an emergency release")?;
        match release.status {
            ReleaseStatus::Pending | ReleaseStatus::Approved => {}
            status => {
                return Err(GovernanceError::InvalidState(format!(
                    "release {release_id} is {status:?} and no longer accepts approvals"
                )))
            }
        }
        if release.has_approved(signer) {
            return Err(GovernanceError::DuplicateAction(format!(
                "{signer} already approved release {release_id}"
            )));
        }

        release.approvals.push(Approval {
            signer: signer.to_string(),
            approved_at: now,
        });
        if release.status == ReleaseStatus::Pending
            && release.current_approvals() >= release.required_approvals
        {
            release.status = ReleaseStatus::Approved;
        }
        self.store.update_release(&release)?;
        self.events.publish(GovernanceEvent::ReleaseApproved {
            release_id: release_id.to_string(),
            approver: signer.to_string(),
            current: release.current_approvals(),
            required: release.required_approvals,
        });
        Ok(release)
    }

    /// Execute an approved, matured release. The approval threshold
    /// and the time lock are checked independently; satisfying one
    /// never waives the other. The balance is re-validated here, since
    /// it may have shrunk since initiation.
    ///
    /// The release is claimed (lock consumed, record marked
    /// `Executed`) before the settlement collaborator is invoked, so
    /// of two concurrent executors at most one reaches the external
    /// fund movement; the loser fails the version check first.
    pub fn execute(&self, release_id: &str, executor: &str, now: i64) -> Result<EmergencyRelease> {
        let release = self.store.release(release_id)?;
        let contract = self.store.contract(&release.contract_id)?;
        contract.ensure_signer(executor, "execute an emergency release")?;
        match release.status {
            ReleaseStatus::Approved => {}
            ReleaseStatus::Pending => {
                return Err(GovernanceError::InsufficientApprovals {
                    current: release.current_approvals(),
                    required: release.required_approvals,
                })
            }
            status => {
                return Err(GovernanceError::InvalidState(format!(
                    "release {release_id} is {status:?} and cannot be executed"
                )))
            }
        }
        let lock = self.store.timelock(&release.timelock_id)?;
        if !lock.is_matured(now) {
            return Err(GovernanceError::TimeLockNotMatured {
                id: release.timelock_id.clone(),
                remaining_secs: lock.remaining_secs(now),
            });
        }
        // a doomed release must not consume its lock
        if let Some(amount) = release.amount {
            if amount > contract.balance {
                return Err(GovernanceError::BalanceExceeded {
                    requested: amount,
                    available: contract.balance,
                });
            }
        }

        // claim: the lock's version check serializes concurrent
        // executors, and the record is terminal before any side effect
        TimeLockRegistry::new(self.store).mark_executed(&release.timelock_id)?;
        let mut release = self.store.release(release_id)?;
        release.status = ReleaseStatus::Executed;
        release.executed_at = Some(now);
        self.store.update_release(&release)?;

        let receipt = apply_release(
            self.store,
            self.settlement,
            &release.contract_id,
            release.kind,
            release.amount,
            &release.recipient,
            &release.reason,
            None,
            now,
        )?;

        let mut release = self.store.release(release_id)?;
        release.settlement_ref = receipt.as_ref().map(|r| r.reference.clone());
        self.store.update_release(&release)?;
        let release = self.store.release(release_id)?;
        self.events.publish(GovernanceEvent::ReleaseExecuted {
            release_id: release_id.to_string(),
            contract_id: release.contract_id.clone(),
            amount: receipt.as_ref().map(|r| r.amount),
            settlement_ref: release.settlement_ref.clone(),
        });
        Ok(release)
    }

    /// Terminal cancellation, allowed any time before execution. A
    /// reason is an audit requirement.
    pub fn cancel(
        &self,
        release_id: &str,
        actor: &str,
        reason: &str,
        now: i64,
    ) -> Result<EmergencyRelease> {
        let mut release = self.store.release(release_id)?;
        let contract = self.store.contract(&release.contract_id)?;
        contract.ensure_signer(actor, "cancel an emergency release")?;
        if reason.trim().is_empty() {
            return Err(GovernanceError::ValidationFailed(
                "cancellation reason required".into(),
            ));
        }
        match release.status {
            ReleaseStatus::Pending | ReleaseStatus::Approved => {}
            status => {
                return Err(GovernanceError::InvalidState(format!(
                    "release {release_id} is {status:?} and cannot be cancelled"
                )))
            }
        }
        release.status = ReleaseStatus::Cancelled;
        release.cancel_reason = Some(format!("{actor}: {reason}"));
        release.cancelled_at = Some(now);
        self.store.update_release(&release)?;

        let registry = TimeLockRegistry::new(self.store);
        let lock = self.store.timelock(&release.timelock_id)?;
        if lock.status == TimeLockStatus::Pending {
            registry.cancel(&release.timelock_id, actor, reason)?;
        }

        self.events.publish(GovernanceEvent::ReleaseCancelled {
            release_id: release_id.to_string(),
            actor: actor.to_string(),
        });
        Ok(release)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;

    use super::*;
    use crate::contract::{ContractStatus, EscrowContract};
    use crate::event::NullSink;
    use crate::settlement::MockSettlementAgent;
    use crate::store::MemoryStore;
    use crate::verify::VerificationResult;

    fn setup(balance: u64) -> MemoryStore {
        let store = MemoryStore::new();
        let mut contract = EscrowContract::new(
            "esc-1",
            "proj-1",
            vec!["a".into(), "b".into(), "c".into()],
            2,
            0,
        )
        .unwrap();
        contract.credit(balance).unwrap();
        store.insert_contract(contract).unwrap();
        store
    }

    fn verified(milestone: &str) -> VerificationResult {
        VerificationResult {
            milestone_id: milestone.into(),
            verified: true,
            confidence: 0.95,
            consistency: 0.99,
            anomaly_count: 0,
            sources: vec!["feed-1".into()],
            computed_at: 50,
            failures: Vec::new(),
        }
    }

    const REASON: &str = "installer insolvency, court order 17/2026";

    #[test]
    fn initiate_validates_request() {
        let store = setup(1000);
        let settlement = MockSettlementAgent;
        let wf = ReleaseWorkflow::new(&store, &settlement, &NullSink);

        // amount required for partial
        assert!(matches!(
            wf.initiate("esc-1", ReleaseKind::Partial, None, "payee", REASON, None, "a", 0),
            Err(GovernanceError::ValidationFailed(_))
        ));
        // amount above balance
        assert_eq!(
            wf.initiate("esc-1", ReleaseKind::Partial, Some(1001), "payee", REASON, None, "a", 0)
                .unwrap_err(),
            GovernanceError::BalanceExceeded { requested: 1001, available: 1000 }
        );
        // reason too short
        assert!(matches!(
            wf.initiate("esc-1", ReleaseKind::Partial, Some(10), "payee", "short", None, "a", 0),
            Err(GovernanceError::ValidationFailed(_))
        ));
        // recipient required
        assert!(matches!(
            wf.initiate("esc-1", ReleaseKind::Partial, Some(10), " ", REASON, None, "a", 0),
            Err(GovernanceError::ValidationFailed(_))
        ));
        // delay above the emergency cap
        assert!(matches!(
            wf.initiate(
                "esc-1",
                ReleaseKind::Partial,
                Some(10),
                "payee",
                REASON,
                Some(MAX_EMERGENCY_DELAY_SECS + 1),
                "a",
                0
            ),
            Err(GovernanceError::ValidationFailed(_))
        ));
        // non-signer proposer
        assert!(matches!(
            wf.initiate("esc-1", ReleaseKind::Partial, Some(10), "payee", REASON, None, "x", 0),
            Err(GovernanceError::Unauthorized { .. })
        ));
        // dispute resolutions never start here
        assert!(matches!(
            wf.initiate("esc-1", ReleaseKind::DisputeResolution, Some(10), "payee", REASON, None, "a", 0),
            Err(GovernanceError::ValidationFailed(_))
        ));
    }

    #[test]
    fn partial_release_happy_path() {
        // threshold 2 of [a, b, c], releasing 500 of 1000 with a 3600s delay
        let store = setup(1000);
        let settlement = MockSettlementAgent;
        let wf = ReleaseWorkflow::new(&store, &settlement, &NullSink);

        let rel = wf
            .initiate("esc-1", ReleaseKind::Partial, Some(500), "payee", REASON, Some(3600), "a", 0)
            .unwrap();
        assert_eq!(rel.required_approvals, 2);

        let rel = wf.approve(&rel.id, "a", 10).unwrap();
        assert_eq!(rel.current_approvals(), 1);
        assert_eq!(rel.status, ReleaseStatus::Pending);

        let rel = wf.approve(&rel.id, "b", 20).unwrap();
        assert_eq!(rel.current_approvals(), 2);
        assert_eq!(rel.status, ReleaseStatus::Approved);

        // fully approved but immature
        assert!(matches!(
            wf.execute(&rel.id, "a", 3599).unwrap_err(),
            GovernanceError::TimeLockNotMatured { .. }
        ));

        let rel = wf.execute(&rel.id, "a", 3600).unwrap();
        assert_eq!(rel.status, ReleaseStatus::Executed);
        assert!(rel.settlement_ref.is_some());
        let contract = store.contract("esc-1").unwrap();
        assert_eq!(contract.balance, 500);
        assert_eq!(contract.status, ContractStatus::Active);

        // terminal: re-execution rejected
        assert!(matches!(
            wf.execute(&rel.id, "a", 9999).unwrap_err(),
            GovernanceError::InvalidState(_)
        ));
    }

    #[test]
    fn concurrent_executors_settle_once() {
        struct CountingAgent(AtomicUsize);
        impl SettlementAgent for CountingAgent {
            fn settle(
                &self,
                request: &SettlementRequest,
                now: i64,
            ) -> crate::Result<SettlementReceipt> {
                self.0.fetch_add(1, Ordering::SeqCst);
                MockSettlementAgent.settle(request, now)
            }
        }

        let store = setup(1000);
        let agent = CountingAgent(AtomicUsize::new(0));
        let release_id = {
            let wf = ReleaseWorkflow::new(&store, &agent, &NullSink);
            let rel = wf
                .initiate("esc-1", ReleaseKind::Partial, Some(500), "payee", REASON, Some(60), "a", 0)
                .unwrap();
            wf.approve(&rel.id, "a", 1).unwrap();
            wf.approve(&rel.id, "b", 2).unwrap();
            rel.id
        };

        let barrier = Barrier::new(2);
        let results: Vec<crate::Result<EmergencyRelease>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..2)
                .map(|_| {
                    scope.spawn(|| {
                        let wf = ReleaseWorkflow::new(&store, &agent, &NullSink);
                        barrier.wait();
                        wf.execute(&release_id, "c", 60)
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        // exactly one executor wins; the loser fails before the
        // settlement collaborator is ever invoked
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert_eq!(agent.0.load(Ordering::SeqCst), 1);
        assert_eq!(store.contract("esc-1").unwrap().balance, 500);
        let rel = store.release(&release_id).unwrap();
        assert_eq!(rel.status, ReleaseStatus::Executed);
        assert!(rel.settlement_ref.is_some());
    }

    #[test]
    fn execute_needs_threshold_even_when_matured() {
        let store = setup(1000);
        let settlement = MockSettlementAgent;
        let wf = ReleaseWorkflow::new(&store, &settlement, &NullSink);
        let rel = wf
            .initiate("esc-1", ReleaseKind::Partial, Some(100), "payee", REASON, Some(60), "a", 0)
            .unwrap();
        wf.approve(&rel.id, "a", 1).unwrap();
        assert_eq!(
            wf.execute(&rel.id, "a", 100_000).unwrap_err(),
            GovernanceError::InsufficientApprovals { current: 1, required: 2 }
        );
    }

    #[test]
    fn balance_is_revalidated_at_execution() {
        let store = setup(1000);
        let settlement = MockSettlementAgent;
        let wf = ReleaseWorkflow::new(&store, &settlement, &NullSink);

        let first = wf
            .initiate("esc-1", ReleaseKind::Partial, Some(800), "payee", REASON, Some(60), "a", 0)
            .unwrap();
        let second = wf
            .initiate("esc-1", ReleaseKind::Partial, Some(800), "payee", REASON, Some(60), "a", 0)
            .unwrap();
        for rel in [&first, &second] {
            wf.approve(&rel.id, "a", 1).unwrap();
            wf.approve(&rel.id, "b", 2).unwrap();
        }
        wf.execute(&first.id, "a", 100).unwrap();
        // both passed validation at initiation; only one balance exists
        assert_eq!(
            wf.execute(&second.id, "a", 200).unwrap_err(),
            GovernanceError::BalanceExceeded { requested: 800, available: 200 }
        );
        // the doomed release kept its lock and stays approved
        let second = store.release(&second.id).unwrap();
        assert_eq!(second.status, ReleaseStatus::Approved);
        assert_eq!(
            store.timelock(&second.timelock_id).unwrap().status,
            TimeLockStatus::Pending
        );
    }

    #[test]
    fn full_release_completes_contract() {
        let store = setup(750);
        let settlement = MockSettlementAgent;
        let wf = ReleaseWorkflow::new(&store, &settlement, &NullSink);
        let rel = wf
            .initiate("esc-1", ReleaseKind::Full, None, "payee", REASON, Some(60), "a", 0)
            .unwrap();
        wf.approve(&rel.id, "a", 1).unwrap();
        wf.approve(&rel.id, "b", 2).unwrap();
        wf.execute(&rel.id, "a", 60).unwrap();
        let contract = store.contract("esc-1").unwrap();
        assert_eq!(contract.balance, 0);
        assert_eq!(contract.status, ContractStatus::Completed);
    }

    #[test]
    fn suspend_release_stops_contract_without_moving_funds() {
        let store = setup(750);
        let settlement = MockSettlementAgent;
        let wf = ReleaseWorkflow::new(&store, &settlement, &NullSink);
        let rel = wf
            .initiate("esc-1", ReleaseKind::Suspend, None, "payee", REASON, Some(60), "a", 0)
            .unwrap();
        wf.approve(&rel.id, "a", 1).unwrap();
        wf.approve(&rel.id, "b", 2).unwrap();
        let rel = wf.execute(&rel.id, "a", 60).unwrap();
        assert!(rel.settlement_ref.is_none());
        let contract = store.contract("esc-1").unwrap();
        assert_eq!(contract.balance, 750);
        assert_eq!(contract.status, ContractStatus::EmergencyStopped);
    }

    #[test]
    fn cancel_is_terminal_and_needs_a_reason() {
        let store = setup(1000);
        let settlement = MockSettlementAgent;
        let wf = ReleaseWorkflow::new(&store, &settlement, &NullSink);
        let rel = wf
            .initiate("esc-1", ReleaseKind::Partial, Some(100), "payee", REASON, Some(60), "a", 0)
            .unwrap();
        assert!(matches!(
            wf.cancel(&rel.id, "b", "", 1),
            Err(GovernanceError::ValidationFailed(_))
        ));
        let rel = wf.cancel(&rel.id, "b", "figures disputed", 7).unwrap();
        assert_eq!(rel.status, ReleaseStatus::Cancelled);
        assert_eq!(rel.cancelled_at, Some(7));
        assert!(wf.approve(&rel.id, "c", 8).is_err());
        assert!(wf.execute(&rel.id, "a", 100_000).is_err());
        // linked lock was cancelled alongside
        let lock = store.timelock(&rel.timelock_id).unwrap();
        assert_eq!(lock.status, TimeLockStatus::Cancelled);
    }

    #[test]
    fn milestone_releases_at_most_once() {
        let store = setup(1000);
        let agent = MockSettlementAgent;
        let result = verified("ms-q3");

        let receipt =
            release_milestone(&store, &agent, &NullSink, "esc-1", &result, 400, "installer-2", 50)
                .unwrap();
        assert_eq!(receipt.amount, 400);
        let contract = store.contract("esc-1").unwrap();
        assert_eq!(contract.balance, 600);
        assert!(contract.released_milestones.contains(&"ms-q3".to_string()));

        // the same milestone never pays twice
        assert!(matches!(
            release_milestone(&store, &agent, &NullSink, "esc-1", &result, 100, "installer-2", 60),
            Err(GovernanceError::DuplicateAction(_))
        ));
        // a different milestone still releases
        release_milestone(&store, &agent, &NullSink, "esc-1", &verified("ms-q4"), 100, "installer-2", 70)
            .unwrap();
        assert_eq!(store.contract("esc-1").unwrap().balance, 500);
    }

    #[test]
    fn unverified_milestone_never_releases() {
        let store = setup(1000);
        let mut result = verified("ms-q3");
        result.verified = false;
        assert!(matches!(
            release_milestone(&store, &MockSettlementAgent, &NullSink, "esc-1", &result, 400, "payee", 50),
            Err(GovernanceError::InvalidState(_))
        ));
        let contract = store.contract("esc-1").unwrap();
        assert_eq!(contract.balance, 1000);
        assert!(contract.released_milestones.is_empty());
    }

    #[test]
    fn milestone_release_respects_balance() {
        let store = setup(300);
        assert_eq!(
            release_milestone(
                &store,
                &MockSettlementAgent,
                &NullSink,
                "esc-1",
                &verified("ms-q3"),
                500,
                "payee",
                50
            )
            .unwrap_err(),
            GovernanceError::BalanceExceeded { requested: 500, available: 300 }
        );
        // nothing committed, so the milestone remains claimable
        let contract = store.contract("esc-1").unwrap();
        assert_eq!(contract.balance, 300);
        assert!(contract.released_milestones.is_empty());
    }
}
