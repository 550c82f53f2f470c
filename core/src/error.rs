use thiserror::Error;

/// Governance engine errors.
///
/// Every rejected action carries enough context (current vs. required
/// approvals, remaining lock time, balances) for a caller to show
/// actionable state. None of these are retried inside the engine.
#[derive(Debug, Error, PartialEq)]
pub enum GovernanceError {
    /// A referenced record does not exist.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Actor is not in the contract's authorized signer set
    /// (or not the assigned arbitrator, for dispute resolution).
    #[error("{actor} is not authorized to {action}")]
    Unauthorized { actor: String, action: String },

    /// Action attempted from a transition-incompatible status.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Malformed or out-of-range request.
    #[error("validation failed: {0}")]
    ValidationFailed(String),

    /// Execution attempted before the signature threshold was met.
    #[error("insufficient approvals: {current} of {required}")]
    InsufficientApprovals { current: u32, required: u32 },

    /// Execution attempted before the linked time lock matured.
    #[error("time lock {id} not matured: {remaining_secs}s remaining")]
    TimeLockNotMatured { id: String, remaining_secs: i64 },

    /// Release amount exceeds the contract's current balance.
    #[error("amount {requested} exceeds contract balance {available}")]
    BalanceExceeded { requested: u64, available: u64 },

    /// Signer already approved, or the record already exists.
    #[error("duplicate action: {0}")]
    DuplicateAction(String),

    /// Optimistic version check failed; the record changed underneath
    /// the caller. Re-read and retry at the call site if appropriate.
    #[error("concurrent modification of {kind} {id}")]
    Conflict { kind: &'static str, id: String },

    /// Balance arithmetic overflowed.
    #[error("arithmetic overflow")]
    Overflow,

    /// Settlement collaborator failure, surfaced verbatim.
    #[error("settlement failed: {0}")]
    Settlement(String),
}
