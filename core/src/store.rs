//! Storage collaborator: CRUD-by-key plus the filter queries the
//! engine needs. The engine never assumes a storage technology; the
//! in-memory implementation here backs tests and the CLI's ledger
//! snapshots.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::contract::EscrowContract;
use crate::dispute::Dispute;
use crate::error::GovernanceError;
use crate::oracle::{OracleDataPoint, OracleFeed};
use crate::proposal::MultiSigProposal;
use crate::release::EmergencyRelease;
use crate::timelock::TimeLock;
use crate::Result;

/// Repository interface over the platform's record store.
///
/// `update_*` methods are compare-and-swap on the record's `version`:
/// the caller passes back the version it read, and a mismatch returns
/// `Conflict`. That serializes concurrent mutations per record, which
/// is the engine's at-most-one-in-flight rule.
pub trait GovernanceStore {
    /// Mint a fresh record identity with the given prefix.
    fn allocate_id(&self, prefix: &str) -> Result<String>;

    fn insert_contract(&self, contract: EscrowContract) -> Result<()>;
    fn contract(&self, id: &str) -> Result<EscrowContract>;
    fn update_contract(&self, contract: &EscrowContract) -> Result<()>;

    fn insert_feed(&self, feed: OracleFeed) -> Result<()>;
    fn feeds_for_project(&self, project_id: &str) -> Result<Vec<OracleFeed>>;
    /// Append-only; points are immutable once recorded.
    fn append_point(&self, point: OracleDataPoint) -> Result<()>;
    /// Most recent `limit` points for a feed, newest first.
    fn recent_points(&self, feed_id: &str, limit: usize) -> Result<Vec<OracleDataPoint>>;

    fn insert_timelock(&self, lock: TimeLock) -> Result<()>;
    fn timelock(&self, id: &str) -> Result<TimeLock>;
    fn update_timelock(&self, lock: &TimeLock) -> Result<()>;

    fn insert_proposal(&self, proposal: MultiSigProposal) -> Result<()>;
    fn proposal(&self, id: &str) -> Result<MultiSigProposal>;
    fn update_proposal(&self, proposal: &MultiSigProposal) -> Result<()>;

    fn insert_release(&self, release: EmergencyRelease) -> Result<()>;
    fn release(&self, id: &str) -> Result<EmergencyRelease>;
    fn update_release(&self, release: &EmergencyRelease) -> Result<()>;

    fn insert_dispute(&self, dispute: Dispute) -> Result<()>;
    fn dispute(&self, id: &str) -> Result<Dispute>;
    fn update_dispute(&self, dispute: &Dispute) -> Result<()>;
}

/// Everything the engine persists, as one serializable unit. Doubles
/// as the CLI's on-disk snapshot format.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Ledger {
    pub contracts: HashMap<String, EscrowContract>,
    pub feeds: HashMap<String, OracleFeed>,
    pub points: Vec<OracleDataPoint>,
    pub timelocks: HashMap<String, TimeLock>,
    pub proposals: HashMap<String, MultiSigProposal>,
    pub releases: HashMap<String, EmergencyRelease>,
    pub disputes: HashMap<String, Dispute>,
    /// Monotonic counter behind `allocate_id`.
    pub next_id: u64,
}

/// In-memory `GovernanceStore`. One mutex guards the whole ledger;
/// record-level serialization is the version check, not the lock.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Ledger>,
}

trait Versioned {
    fn id(&self) -> &str;
    fn version(&self) -> u64;
    fn bump(&mut self);
}

macro_rules! impl_versioned {
    ($($ty:ty),+) => {$(
        impl Versioned for $ty {
            fn id(&self) -> &str {
                &self.id
            }
            fn version(&self) -> u64 {
                self.version
            }
            fn bump(&mut self) {
                self.version += 1;
            }
        }
    )+};
}

impl_versioned!(EscrowContract, TimeLock, MultiSigProposal, EmergencyRelease, Dispute);

fn insert_record<T: Versioned>(
    table: &mut HashMap<String, T>,
    record: T,
    kind: &'static str,
) -> Result<()> {
    if table.contains_key(record.id()) {
        return Err(GovernanceError::DuplicateAction(format!(
            "{kind} {} already exists",
            record.id()
        )));
    }
    table.insert(record.id().to_string(), record);
    Ok(())
}

fn fetch_record<T: Clone>(
    table: &HashMap<String, T>,
    id: &str,
    kind: &'static str,
) -> Result<T> {
    table.get(id).cloned().ok_or_else(|| GovernanceError::NotFound {
        kind,
        id: id.to_string(),
    })
}

fn update_record<T: Versioned + Clone>(
    table: &mut HashMap<String, T>,
    record: &T,
    kind: &'static str,
) -> Result<()> {
    match table.get_mut(record.id()) {
        None => Err(GovernanceError::NotFound {
            kind,
            id: record.id().to_string(),
        }),
        Some(current) if current.version() != record.version() => Err(GovernanceError::Conflict {
            kind,
            id: record.id().to_string(),
        }),
        Some(current) => {
            let mut next = record.clone();
            next.bump();
            *current = next;
            Ok(())
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_ledger(ledger: Ledger) -> Self {
        Self {
            inner: Mutex::new(ledger),
        }
    }

    /// Clone the current ledger state, e.g. to persist a snapshot.
    pub fn snapshot(&self) -> Ledger {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Ledger> {
        // a poisoned ledger mutex means a panic mid-mutation; nothing
        // sensible can continue from there
        self.inner.lock().expect("ledger mutex poisoned")
    }
}

impl GovernanceStore for MemoryStore {
    fn allocate_id(&self, prefix: &str) -> Result<String> {
        let mut ledger = self.lock();
        ledger.next_id += 1;
        Ok(format!("{prefix}-{:06}", ledger.next_id))
    }

    fn insert_contract(&self, contract: EscrowContract) -> Result<()> {
        insert_record(&mut self.lock().contracts, contract, "contract")
    }

    fn contract(&self, id: &str) -> Result<EscrowContract> {
        fetch_record(&self.lock().contracts, id, "contract")
    }

    fn update_contract(&self, contract: &EscrowContract) -> Result<()> {
        update_record(&mut self.lock().contracts, contract, "contract")
    }

    fn insert_feed(&self, feed: OracleFeed) -> Result<()> {
        let mut ledger = self.lock();
        if ledger.feeds.contains_key(&feed.id) {
            return Err(GovernanceError::DuplicateAction(format!(
                "feed {} already exists",
                feed.id
            )));
        }
        ledger.feeds.insert(feed.id.clone(), feed);
        Ok(())
    }

    fn feeds_for_project(&self, project_id: &str) -> Result<Vec<OracleFeed>> {
        let mut feeds: Vec<_> = self
            .lock()
            .feeds
            .values()
            .filter(|f| f.project_id == project_id)
            .cloned()
            .collect();
        feeds.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(feeds)
    }

    fn append_point(&self, point: OracleDataPoint) -> Result<()> {
        self.lock().points.push(point);
        Ok(())
    }

    fn recent_points(&self, feed_id: &str, limit: usize) -> Result<Vec<OracleDataPoint>> {
        let mut points: Vec<_> = self
            .lock()
            .points
            .iter()
            .filter(|p| p.feed_id == feed_id)
            .cloned()
            .collect();
        points.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        points.truncate(limit);
        Ok(points)
    }

    fn insert_timelock(&self, lock: TimeLock) -> Result<()> {
        insert_record(&mut self.lock().timelocks, lock, "time lock")
    }

    fn timelock(&self, id: &str) -> Result<TimeLock> {
        fetch_record(&self.lock().timelocks, id, "time lock")
    }

    fn update_timelock(&self, lock: &TimeLock) -> Result<()> {
        update_record(&mut self.lock().timelocks, lock, "time lock")
    }

    fn insert_proposal(&self, proposal: MultiSigProposal) -> Result<()> {
        insert_record(&mut self.lock().proposals, proposal, "proposal")
    }

    fn proposal(&self, id: &str) -> Result<MultiSigProposal> {
        fetch_record(&self.lock().proposals, id, "proposal")
    }

    fn update_proposal(&self, proposal: &MultiSigProposal) -> Result<()> {
        update_record(&mut self.lock().proposals, proposal, "proposal")
    }

    fn insert_release(&self, release: EmergencyRelease) -> Result<()> {
        insert_record(&mut self.lock().releases, release, "release")
    }

    fn release(&self, id: &str) -> Result<EmergencyRelease> {
        fetch_record(&self.lock().releases, id, "release")
    }

    fn update_release(&self, release: &EmergencyRelease) -> Result<()> {
        update_record(&mut self.lock().releases, release, "release")
    }

    fn insert_dispute(&self, dispute: Dispute) -> Result<()> {
        insert_record(&mut self.lock().disputes, dispute, "dispute")
    }

    fn dispute(&self, id: &str) -> Result<Dispute> {
        fetch_record(&self.lock().disputes, id, "dispute")
    }

    fn update_dispute(&self, dispute: &Dispute) -> Result<()> {
        update_record(&mut self.lock().disputes, dispute, "dispute")
    }
}
