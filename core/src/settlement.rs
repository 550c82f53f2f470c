//! Settlement collaborator: turns an approved, matured release
//! decision into an opaque transaction handle. Broadcasting is an
//! external concern; failures surface to the caller and are never
//! retried inside the engine.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::Result;

/// An approved, matured fund movement ready for submission.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SettlementRequest {
    pub contract_id: String,
    pub recipient: String,
    pub amount: u64,
    /// Audit note carried through to the settlement layer.
    pub memo: String,
}

/// Confirmation from the settlement layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SettlementReceipt {
    /// Opaque transaction reference.
    pub reference: String,
    pub amount: u64,
    pub settled_at: i64,
}

pub trait SettlementAgent {
    fn settle(&self, request: &SettlementRequest, now: i64) -> Result<SettlementReceipt>;
}

/// Deterministic stand-in used by tests and the CLI: the reference is
/// a digest of the request, so identical requests are identifiable.
#[derive(Debug, Default)]
pub struct MockSettlementAgent;

impl SettlementAgent for MockSettlementAgent {
    fn settle(&self, request: &SettlementRequest, now: i64) -> Result<SettlementReceipt> {
        let mut hasher = Sha256::new();
        hasher.update(request.contract_id.as_bytes());
        hasher.update(request.recipient.as_bytes());
        hasher.update(request.amount.to_le_bytes());
        hasher.update(now.to_le_bytes());
        Ok(SettlementReceipt {
            reference: hex::encode(&hasher.finalize()[..16]),
            amount: request.amount,
            settled_at: now,
        })
    }
}
