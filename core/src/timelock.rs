//! Time-locked operations: a mandatory delay between approval of a
//! sensitive action and its execution.
//!
//! Maturity and expiry are computed lazily from the `now` passed into
//! each call; there is no background scheduler. Every record's
//! lifecycle is independent, so the registry needs nothing beyond the
//! store's standard mutation safety.

use serde::{Deserialize, Serialize};

use crate::error::GovernanceError;
use crate::store::GovernanceStore;
use crate::Result;

/// Default delay before a sensitive operation may execute.
pub const DEFAULT_DELAY_SECS: i64 = 24 * 60 * 60;
/// Hard cap on emergency release delays.
pub const MAX_EMERGENCY_DELAY_SECS: i64 = 7 * 24 * 60 * 60;
/// Grace period after `execution_time` before a lock may be marked
/// `Expired` for housekeeping.
pub const EXPIRY_GRACE_SECS: i64 = 30 * 24 * 60 * 60;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TimeLockStatus {
    Pending,
    Executed,
    Cancelled,
    /// Housekeeping state for locks that were never executed or
    /// cancelled; behaves like `Cancelled` for maturity checks.
    Expired,
}

/// The delayed operation a lock gates.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    EmergencyRelease,
    ParameterChange,
    ContractSuspension,
}

/// A scheduled-but-delayed operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimeLock {
    pub id: String,
    pub contract_id: String,
    pub operation: OperationKind,
    pub proposer: String,
    pub created_at: i64,
    /// `created_at + delay`; execution is allowed at or after this.
    pub execution_time: i64,
    pub status: TimeLockStatus,
    pub cancel_reason: Option<String>,
    pub version: u64,
}

impl TimeLock {
    /// True iff still `Pending` and the delay has fully elapsed.
    pub fn is_matured(&self, now: i64) -> bool {
        self.status == TimeLockStatus::Pending && now >= self.execution_time
    }

    /// Seconds left before maturity; zero once matured.
    pub fn remaining_secs(&self, now: i64) -> i64 {
        (self.execution_time - now).max(0)
    }
}

/// Registry of time locks over the storage collaborator.
pub struct TimeLockRegistry<'a, S: ?Sized> {
    store: &'a S,
}

impl<'a, S: GovernanceStore + ?Sized> TimeLockRegistry<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Schedule an operation `delay_secs` (default 24h) into the future.
    /// Callers enforce their own maximum delay.
    pub fn create(
        &self,
        contract_id: &str,
        operation: OperationKind,
        proposer: &str,
        delay_secs: Option<i64>,
        now: i64,
    ) -> Result<TimeLock> {
        let delay = delay_secs.unwrap_or(DEFAULT_DELAY_SECS);
        if delay <= 0 {
            return Err(GovernanceError::ValidationFailed(
                "time lock delay must be positive".into(),
            ));
        }
        let lock = TimeLock {
            id: self.store.allocate_id("tl")?,
            contract_id: contract_id.to_string(),
            operation,
            proposer: proposer.to_string(),
            created_at: now,
            execution_time: now + delay,
            status: TimeLockStatus::Pending,
            cancel_reason: None,
            version: 0,
        };
        self.store.insert_timelock(lock.clone())?;
        Ok(lock)
    }

    pub fn is_matured(&self, id: &str, now: i64) -> Result<bool> {
        Ok(self.store.timelock(id)?.is_matured(now))
    }

    /// Cancel a still-pending lock. A cancellation reason is an audit
    /// requirement.
    pub fn cancel(&self, id: &str, canceller: &str, reason: &str) -> Result<TimeLock> {
        if reason.trim().is_empty() {
            return Err(GovernanceError::ValidationFailed(
                "cancellation reason required".into(),
            ));
        }
        let mut lock = self.store.timelock(id)?;
        if lock.status != TimeLockStatus::Pending {
            return Err(GovernanceError::InvalidState(format!(
                "time lock {id} is {:?}, not Pending",
                lock.status
            )));
        }
        lock.status = TimeLockStatus::Cancelled;
        lock.cancel_reason = Some(format!("{canceller}: {reason}"));
        self.store.update_timelock(&lock)?;
        Ok(lock)
    }

    /// Terminal transition once the underlying effect has been applied.
    /// Callers must already have verified maturity; a second call is
    /// rejected with `InvalidState`.
    pub fn mark_executed(&self, id: &str) -> Result<TimeLock> {
        let mut lock = self.store.timelock(id)?;
        if lock.status != TimeLockStatus::Pending {
            return Err(GovernanceError::InvalidState(format!(
                "time lock {id} is {:?}, not Pending",
                lock.status
            )));
        }
        lock.status = TimeLockStatus::Executed;
        self.store.update_timelock(&lock)?;
        Ok(lock)
    }

    /// Housekeeping: retire a pending lock that sat unexecuted past its
    /// grace period.
    pub fn mark_expired(&self, id: &str, now: i64) -> Result<TimeLock> {
        let mut lock = self.store.timelock(id)?;
        if lock.status != TimeLockStatus::Pending {
            return Err(GovernanceError::InvalidState(format!(
                "time lock {id} is {:?}, not Pending",
                lock.status
            )));
        }
        if now < lock.execution_time + EXPIRY_GRACE_SECS {
            return Err(GovernanceError::InvalidState(format!(
                "time lock {id} is still within its grace period"
            )));
        }
        lock.status = TimeLockStatus::Expired;
        self.store.update_timelock(&lock)?;
        Ok(lock)
    }
}
