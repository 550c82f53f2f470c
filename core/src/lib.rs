/// Escrow contract records, signer sets, balances, lifecycle
pub mod contract;
/// Dispute filing, evidence, arbitration, resolution
pub mod dispute;
/// Structured events emitted on every state transition
pub mod event;
/// JSON load/save helpers for snapshots and policies
pub mod interface;
/// Oracle feeds, signed data points, freshness-filtered aggregation
pub mod oracle;
/// Multi-signature proposals over governance actions
pub mod proposal;
/// Emergency release workflow and the shared fund-movement path
pub mod release;
/// Settlement collaborator seam
pub mod settlement;
/// Storage collaborator seam and the in-memory ledger
pub mod store;
/// Time-locked operation registry
pub mod timelock;
/// Milestone verification over aggregated oracle batches
pub mod verify;

pub mod error;
use error::GovernanceError;

pub type Result<T> = std::result::Result<T, GovernanceError>;

pub use contract::{ContractStatus, EscrowContract};
pub use dispute::{Dispute, DisputeStatus, DisputeWorkflow, Evidence, Resolution, ResolutionKind};
pub use event::{EventSink, GovernanceEvent, MemorySink, NullSink};
pub use oracle::{aggregate, OracleBatch, OracleDataPoint, OracleFeed};
pub use proposal::{ContractParameter, MultiSigProposal, ProposalAction, ProposalManager, ProposalStatus};
pub use release::{
    release_milestone, EmergencyRelease, ReleaseKind, ReleaseStatus, ReleaseWorkflow,
};
pub use settlement::{MockSettlementAgent, SettlementAgent, SettlementReceipt, SettlementRequest};
pub use store::{GovernanceStore, Ledger, MemoryStore};
pub use timelock::{OperationKind, TimeLock, TimeLockRegistry, TimeLockStatus};
pub use verify::{verify_batch, verify_milestone, VerificationPolicy, VerificationResult};
