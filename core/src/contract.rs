//! Escrow contract records: signer sets, balances, lifecycle status.

use serde::{Deserialize, Serialize};

use crate::error::GovernanceError;
use crate::proposal::ContractParameter;
use crate::Result;

/// Lifecycle of an escrow contract.
///
/// Transitions are monotonic except `Active -> EmergencyStopped`,
/// which may still reach `Completed` via a full release.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ContractStatus {
    /// Holding funds; releases and proposals are accepted.
    Active,
    /// All funds released; terminal.
    Completed,
    /// Suspended by an emergency action; funds still held.
    EmergencyStopped,
    /// Terminated (e.g., by arbitration); terminal.
    Cancelled,
}

/// The on-platform record holding a project's raised funds and the
/// rules for releasing them.
///
/// Mutated only through the release primitive or parameter-change
/// execution; every update goes through the store's optimistic
/// version check.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EscrowContract {
    pub id: String,
    /// Project that owns this contract; oracle feeds are bound per project.
    pub project_id: String,
    /// Authorized signer identities.
    pub signers: Vec<String>,
    /// Minimum approvals required for sensitive actions.
    pub required_signatures: u32,
    /// Current escrowed balance, in minor units. Never negative.
    pub balance: u64,
    /// Milestones already paid out; a milestone releases at most once.
    #[serde(default)]
    pub released_milestones: Vec<String>,
    pub status: ContractStatus,
    pub created_at: i64,
    /// Optimistic concurrency version, bumped by the store on update.
    pub version: u64,
}

impl EscrowContract {
    pub fn new(
        id: impl Into<String>,
        project_id: impl Into<String>,
        signers: Vec<String>,
        required_signatures: u32,
        created_at: i64,
    ) -> Result<Self> {
        let contract = Self {
            id: id.into(),
            project_id: project_id.into(),
            signers,
            required_signatures,
            balance: 0,
            released_milestones: Vec::new(),
            status: ContractStatus::Active,
            created_at,
            version: 0,
        };
        contract.validate_signer_set()?;
        Ok(contract)
    }

    fn validate_signer_set(&self) -> Result<()> {
        if self.signers.is_empty() || self.signers.iter().any(|s| s.trim().is_empty()) {
            return Err(GovernanceError::ValidationFailed(
                "signer set must be non-empty with non-blank identities".into(),
            ));
        }
        let mut unique = self.signers.clone();
        unique.sort();
        unique.dedup();
        if unique.len() != self.signers.len() {
            return Err(GovernanceError::ValidationFailed(
                "signer set contains duplicates".into(),
            ));
        }
        if self.required_signatures == 0 || self.required_signatures as usize > self.signers.len() {
            return Err(GovernanceError::ValidationFailed(format!(
                "threshold {} out of range for {} signers",
                self.required_signatures,
                self.signers.len()
            )));
        }
        Ok(())
    }

    /// Set-membership check supplied by the contract record itself.
    pub fn is_signer(&self, identity: &str) -> bool {
        self.signers.iter().any(|s| s == identity)
    }

    pub fn ensure_signer(&self, identity: &str, action: &str) -> Result<()> {
        if self.is_signer(identity) {
            Ok(())
        } else {
            Err(GovernanceError::Unauthorized {
                actor: identity.to_string(),
                action: action.to_string(),
            })
        }
    }

    /// True while the contract still holds funds under governance.
    pub fn holds_funds(&self) -> bool {
        matches!(
            self.status,
            ContractStatus::Active | ContractStatus::EmergencyStopped
        )
    }

    /// Add funds (project contributions).
    pub fn credit(&mut self, amount: u64) -> Result<()> {
        if amount == 0 {
            return Err(GovernanceError::ValidationFailed(
                "contribution amount must be non-zero".into(),
            ));
        }
        if self.status != ContractStatus::Active {
            return Err(GovernanceError::InvalidState(format!(
                "contract {} is not accepting contributions",
                self.id
            )));
        }
        self.balance = self
            .balance
            .checked_add(amount)
            .ok_or(GovernanceError::Overflow)?;
        Ok(())
    }

    /// Remove funds as part of a release.
    pub fn debit(&mut self, amount: u64) -> Result<()> {
        if amount > self.balance {
            return Err(GovernanceError::BalanceExceeded {
                requested: amount,
                available: self.balance,
            });
        }
        self.balance -= amount;
        Ok(())
    }

    /// `Active -> EmergencyStopped`.
    pub fn suspend(&mut self) -> Result<()> {
        if self.status != ContractStatus::Active {
            return Err(GovernanceError::InvalidState(format!(
                "cannot suspend contract {} from {:?}",
                self.id, self.status
            )));
        }
        self.status = ContractStatus::EmergencyStopped;
        Ok(())
    }

    /// Terminal transition after a full release.
    pub fn complete(&mut self) -> Result<()> {
        if !self.holds_funds() {
            return Err(GovernanceError::InvalidState(format!(
                "cannot complete contract {} from {:?}",
                self.id, self.status
            )));
        }
        self.status = ContractStatus::Completed;
        Ok(())
    }

    /// Terminal termination, reached only through arbitration.
    pub fn cancel(&mut self) -> Result<()> {
        if !self.holds_funds() {
            return Err(GovernanceError::InvalidState(format!(
                "cannot cancel contract {} from {:?}",
                self.id, self.status
            )));
        }
        self.status = ContractStatus::Cancelled;
        Ok(())
    }

    /// Apply an approved, matured parameter change.
    pub fn apply_parameter(&mut self, change: &ContractParameter) -> Result<()> {
        match change {
            ContractParameter::RequiredSignatures { count } => {
                if *count == 0 || *count as usize > self.signers.len() {
                    return Err(GovernanceError::ValidationFailed(format!(
                        "threshold {} out of range for {} signers",
                        count,
                        self.signers.len()
                    )));
                }
                self.required_signatures = *count;
            }
            ContractParameter::AddSigner { signer } => {
                if signer.trim().is_empty() {
                    return Err(GovernanceError::ValidationFailed(
                        "signer identity must be non-blank".into(),
                    ));
                }
                if self.is_signer(signer) {
                    return Err(GovernanceError::DuplicateAction(format!(
                        "{signer} is already a signer"
                    )));
                }
                self.signers.push(signer.clone());
            }
            ContractParameter::RemoveSigner { signer } => {
                if !self.is_signer(signer) {
                    return Err(GovernanceError::NotFound {
                        kind: "signer",
                        id: signer.clone(),
                    });
                }
                if self.signers.len() - 1 < self.required_signatures as usize {
                    return Err(GovernanceError::ValidationFailed(format!(
                        "removing {signer} would leave fewer signers than the threshold {}",
                        self.required_signatures
                    )));
                }
                self.signers.retain(|s| s != signer);
            }
        }
        Ok(())
    }
}
