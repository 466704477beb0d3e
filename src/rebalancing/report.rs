//! Outcome of a migration pass.

use super::plan::{BucketMove, MigrationPlan};
use crate::error::{Error, Result};
use crate::types::{BucketId, NodeId};
use serde::Serialize;
use uuid::Uuid;

/// Storage step a migration was performing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStep {
    List,
    Count,
    Copy,
    Verify,
    Drop,
}

impl std::fmt::Display for MigrationStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MigrationStep::List => "list",
            MigrationStep::Count => "count",
            MigrationStep::Copy => "copy",
            MigrationStep::Verify => "verify",
            MigrationStep::Drop => "drop",
        };
        f.write_str(name)
    }
}

/// Why a bucket failed to relocate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FailureReason {
    /// A store call exceeded the step timeout.
    Timeout { step: MigrationStep },
    /// A store call returned an error.
    Store(String),
    /// The destination does not hold what the source held.
    CountMismatch { expected: u64, actual: u64 },
    /// The source node's collections could not be enumerated.
    ListFailed(String),
    /// The bucket's worker ended without reporting.
    Aborted,
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::Timeout { step } => write!(f, "{} timed out", step),
            FailureReason::Store(msg) => write!(f, "store error: {}", msg),
            FailureReason::CountMismatch { expected, actual } => {
                write!(f, "count mismatch: expected {}, found {}", expected, actual)
            }
            FailureReason::ListFailed(msg) => write!(f, "listing failed: {}", msg),
            FailureReason::Aborted => write!(f, "aborted"),
        }
    }
}

/// A bucket whose data stayed on its previous owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BucketFailure {
    pub bucket: BucketId,
    pub from: NodeId,
    pub to: NodeId,
    /// Collection being processed when the bucket failed, if any.
    pub collection: Option<String>,
    pub reason: FailureReason,
}

impl BucketFailure {
    pub fn new(mv: BucketMove, collection: Option<String>, reason: FailureReason) -> Self {
        Self {
            bucket: mv.bucket,
            from: mv.from,
            to: mv.to,
            collection,
            reason,
        }
    }

    pub fn bucket_move(&self) -> BucketMove {
        BucketMove::new(self.bucket, self.from, self.to)
    }
}

/// Result of one migration pass.
///
/// Partial failure is data, not an error: the report lists which buckets
/// moved and which stayed put. [`MigrationReport::into_result`] converts it
/// for callers that want `MigrationPartialFailure` as an `Err`.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationReport {
    /// Identifies this pass.
    pub id: Uuid,
    /// Buckets the pass was asked to relocate.
    pub planned: Vec<BucketId>,
    /// Buckets whose data now lives only on the new owner.
    pub moved: Vec<BucketId>,
    pub failed: Vec<BucketFailure>,
    pub collections_moved: u64,
    pub documents_moved: u64,
    pub duration_ms: u64,
}

impl MigrationReport {
    /// Empty report for a pass with nothing to do.
    pub fn empty() -> Self {
        Self::for_buckets(Vec::new())
    }

    pub(crate) fn for_buckets(planned: Vec<BucketId>) -> Self {
        Self {
            id: Uuid::new_v4(),
            planned,
            moved: Vec::new(),
            failed: Vec::new(),
            collections_moved: 0,
            documents_moved: 0,
            duration_ms: 0,
        }
    }

    /// Report marking every bucket of a plan as moved.
    pub fn succeeded(plan: &MigrationPlan) -> Self {
        let buckets = plan.buckets();
        Self {
            moved: buckets.clone(),
            ..Self::for_buckets(buckets)
        }
    }

    /// Record a failed bucket, withdrawing it from `moved`.
    pub fn record_failure(&mut self, failure: BucketFailure) {
        self.moved.retain(|&bucket| bucket != failure.bucket);
        self.failed.push(failure);
        self.failed.sort_by_key(|failure| failure.bucket);
    }

    pub(crate) fn record_moved(&mut self, bucket: BucketId, collections: u64, documents: u64) {
        self.moved.push(bucket);
        self.moved.sort_unstable();
        self.collections_moved += collections;
        self.documents_moved += documents;
    }

    /// Failed buckets, ascending.
    pub fn failed_buckets(&self) -> Vec<BucketId> {
        let mut buckets: Vec<BucketId> = self.failed.iter().map(|f| f.bucket).collect();
        buckets.dedup();
        buckets
    }

    /// Whether every planned bucket moved.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    /// `Err(MigrationPartialFailure)` when any bucket failed.
    pub fn into_result(self) -> Result<Self> {
        if self.is_complete() {
            Ok(self)
        } else {
            Err(Error::MigrationPartialFailure {
                failed: self.failed_buckets(),
            })
        }
    }
}
