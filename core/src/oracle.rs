//! Oracle feeds, immutable data points, and cross-feed aggregation.

use serde::{Deserialize, Serialize};
use serde_with::hex::Hex;
use serde_with::serde_as;

use crate::store::GovernanceStore;
use crate::Result;

/// How many recent points each feed contributes by default.
pub const DEFAULT_POINTS_PER_FEED: usize = 10;

/// An external data source reporting real-world measurements
/// (e.g., energy produced) for one project.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OracleFeed {
    pub id: String,
    pub project_id: String,
    /// A feed whose latest point is older than this window is excluded
    /// from aggregation wholesale.
    pub max_staleness_secs: i64,
    /// Ed25519 key the feed signs points with, if it signs at all.
    #[serde_as(as = "Option<Hex>")]
    pub public_key: Option<[u8; 32]>,
    pub active: bool,
}

/// A single measurement from a feed. Immutable once recorded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OracleDataPoint {
    pub feed_id: String,
    pub value: f64,
    /// Feed-reported confidence in `[0, 1]`.
    pub confidence: f64,
    pub timestamp: i64,
    /// Hex-encoded ed25519 signature over [`Self::canonical_message`].
    pub signature: Option<String>,
}

impl OracleDataPoint {
    /// The byte message a feed signs: feed id, IEEE-754 value bits,
    /// and timestamp, all little-endian.
    pub fn canonical_message(&self) -> Vec<u8> {
        let mut msg = Vec::with_capacity(self.feed_id.len() + 16);
        msg.extend_from_slice(self.feed_id.as_bytes());
        msg.extend_from_slice(&self.value.to_bits().to_le_bytes());
        msg.extend_from_slice(&self.timestamp.to_le_bytes());
        msg
    }
}

/// Why a feed contributed nothing to a batch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum FeedExclusion {
    /// Feed is administratively disabled.
    Inactive,
    /// Feed has no recorded points.
    NoData,
    /// Latest point is older than the feed's max-staleness window.
    Stale { latest: i64 },
    /// The store could not serve this feed's points.
    Unavailable,
}

/// Result of merging recent points across a project's feeds.
///
/// An empty batch is not an aggregation error; the verifier reports it
/// as the distinct no-data condition.
#[derive(Debug, Clone)]
pub struct OracleBatch {
    pub milestone_id: String,
    /// Merged points, each tagged with its source feed.
    pub points: Vec<OracleDataPoint>,
    /// Feeds that contributed at least one point.
    pub feeds: Vec<OracleFeed>,
    /// Feeds excluded from this batch, with the reason.
    pub excluded: Vec<(String, FeedExclusion)>,
}

impl OracleBatch {
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Identities of contributing feeds.
    pub fn sources(&self) -> Vec<String> {
        self.feeds.iter().map(|f| f.id.clone()).collect()
    }
}

/// Collect each active feed's recent points for a milestone.
///
/// A missing, stale, or unreachable feed is excluded, never fatal;
/// absence of one feed must not abort the whole batch.
pub fn aggregate<S>(
    store: &S,
    project_id: &str,
    milestone_id: &str,
    points_per_feed: usize,
    now: i64,
) -> Result<OracleBatch>
where
    S: GovernanceStore + ?Sized,
{
    let mut batch = OracleBatch {
        milestone_id: milestone_id.to_string(),
        points: Vec::new(),
        feeds: Vec::new(),
        excluded: Vec::new(),
    };

    for feed in store.feeds_for_project(project_id)? {
        if !feed.active {
            batch.excluded.push((feed.id, FeedExclusion::Inactive));
            continue;
        }
        let points = match store.recent_points(&feed.id, points_per_feed) {
            Ok(points) => points,
            Err(_) => {
                batch.excluded.push((feed.id, FeedExclusion::Unavailable));
                continue;
            }
        };
        let Some(latest) = points.iter().map(|p| p.timestamp).max() else {
            batch.excluded.push((feed.id, FeedExclusion::NoData));
            continue;
        };
        if now - latest > feed.max_staleness_secs {
            batch.excluded.push((feed.id, FeedExclusion::Stale { latest }));
            continue;
        }
        batch.points.extend(points);
        batch.feeds.push(feed);
    }

    Ok(batch)
}
