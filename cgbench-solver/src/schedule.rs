//! Runtime scheduling of host parallel regions.
//!
//! Each parallel loop is tagged with a [`CallSite`]. Before the loop runs,
//! a [`PolicySource`] picks a policy index for the site; the index decodes
//! into a thread count, a schedule kind and a chunk size. [`PolicyCache`]
//! remembers the last policy applied at each site and keeps one thread
//! pool per thread count, so switching policies never rebuilds a pool.

use crate::error::CgError;
use rayon::iter::{IndexedParallelIterator, MaxLen, MinLen};
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

/// Thread counts a policy may request; 0 means the default pool.
pub const THREAD_COUNTS: [usize; 6] = [0, 1, 2, 4, 8, 16];
/// Schedule kinds a policy may request.
pub const SCHEDULE_KINDS: [ScheduleKind; 3] =
    [ScheduleKind::Static, ScheduleKind::Dynamic, ScheduleKind::Guided];
/// Chunk sizes a policy may request; 0 means no explicit chunk.
pub const CHUNK_SIZES: [usize; 9] = [0, 1, 4, 8, 32, 64, 128, 256, 512];

/// Total number of policy indices.
pub const NUM_POLICIES: usize = THREAD_COUNTS.len() * SCHEDULE_KINDS.len() * CHUNK_SIZES.len();

/// Parallel loops of the benchmark that consult the policy source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CallSite {
    MatrixCompaction,
    Spmv,
    Dot,
    Axpy,
    DirectionUpdate,
    ResidualNorm,
    Normalize,
}

impl CallSite {
    pub const ALL: [CallSite; 7] = [
        CallSite::MatrixCompaction,
        CallSite::Spmv,
        CallSite::Dot,
        CallSite::Axpy,
        CallSite::DirectionUpdate,
        CallSite::ResidualNorm,
        CallSite::Normalize,
    ];

    /// Stable name used by policy models.
    pub fn as_str(&self) -> &'static str {
        match self {
            CallSite::MatrixCompaction => "matrix_compaction",
            CallSite::Spmv => "spmv",
            CallSite::Dot => "dot",
            CallSite::Axpy => "axpy",
            CallSite::DirectionUpdate => "direction_update",
            CallSite::ResidualNorm => "residual_norm",
            CallSite::Normalize => "normalize",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        CallSite::ALL.into_iter().find(|s| s.as_str() == name)
    }
}

impl fmt::Display for CallSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ScheduleKind {
    /// Near-equal contiguous blocks, one per thread.
    Static,
    /// Small fixed-size pieces handed out on demand.
    Dynamic,
    /// Adaptive splitting with a lower bound on piece size.
    Guided,
}

/// Decoded scheduling parameters of one parallel region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SchedulePolicy {
    /// Worker threads, 0 for the default pool.
    pub threads: usize,
    pub kind: ScheduleKind,
    /// Chunk size, 0 for none.
    pub chunk: usize,
}

impl SchedulePolicy {
    /// Decodes a policy index: chunk varies fastest, then schedule kind,
    /// then thread count. Out-of-range indices wrap.
    pub fn from_index(index: usize) -> Self {
        let index = index % NUM_POLICIES;
        let chunk_idx = index % CHUNK_SIZES.len();
        let kind_idx = (index / CHUNK_SIZES.len()) % SCHEDULE_KINDS.len();
        let threads_idx = index / (CHUNK_SIZES.len() * SCHEDULE_KINDS.len());
        Self {
            threads: THREAD_COUNTS[threads_idx],
            kind: SCHEDULE_KINDS[kind_idx],
            chunk: CHUNK_SIZES[chunk_idx],
        }
    }
}

impl Default for SchedulePolicy {
    fn default() -> Self {
        Self::from_index(0)
    }
}

/// Supplies a policy index for a call site, given the region's feature
/// (its iteration count).
pub trait PolicySource: fmt::Debug + Send + Sync {
    fn policy_index(&self, site: CallSite, feature: f64) -> usize;
}

/// The same policy everywhere.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedPolicy(pub usize);

impl PolicySource for FixedPolicy {
    fn policy_index(&self, _site: CallSite, _feature: f64) -> usize {
        self.0
    }
}

/// Fixed per-site policies parsed from a model string of the form
/// `StaticRegion,<site>=<index>,...`. The key `policy` sets the index for
/// sites not listed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StaticRegionModel {
    default_index: usize,
    sites: HashMap<CallSite, usize>,
}

impl StaticRegionModel {
    pub fn parse(model: &str) -> Result<Self, CgError> {
        let mut parts = model.split(',').map(str::trim);
        match parts.next() {
            Some("StaticRegion") => {}
            other => {
                return Err(CgError::InvalidConfig(format!(
                    "unsupported policy model '{}'",
                    other.unwrap_or_default()
                )))
            }
        }

        let mut parsed = Self::default();
        for entry in parts.filter(|p| !p.is_empty()) {
            let (key, value) = entry.split_once('=').ok_or_else(|| {
                CgError::InvalidConfig(format!("policy entry '{}' is not key=value", entry))
            })?;
            let index: usize = value.trim().parse().map_err(|_| {
                CgError::InvalidConfig(format!("policy index '{}' is not a number", value))
            })?;
            if index >= NUM_POLICIES {
                return Err(CgError::InvalidConfig(format!(
                    "policy index {} out of range (0..{})",
                    index, NUM_POLICIES
                )));
            }
            match key.trim() {
                "policy" => parsed.default_index = index,
                name => {
                    let site = CallSite::from_name(name).ok_or_else(|| {
                        CgError::InvalidConfig(format!("unknown call site '{}'", name))
                    })?;
                    parsed.sites.insert(site, index);
                }
            }
        }
        Ok(parsed)
    }
}

impl PolicySource for StaticRegionModel {
    fn policy_index(&self, site: CallSite, _feature: f64) -> usize {
        self.sites.get(&site).copied().unwrap_or(self.default_index)
    }
}

/// Scheduling view handed to the body of a parallel region.
#[derive(Debug, Clone, Copy)]
pub struct Region {
    pub policy: SchedulePolicy,
    /// Threads of the pool the region runs in.
    pub threads: usize,
}

impl Region {
    /// Applies the policy's splitting bounds to an indexed parallel
    /// iterator.
    pub fn tune<I: IndexedParallelIterator>(&self, iter: I) -> MaxLen<MinLen<I>> {
        let chunk = self.policy.chunk.max(1);
        let (min_len, max_len) = match self.policy.kind {
            ScheduleKind::Static if self.policy.chunk == 0 => {
                (iter.len().div_ceil(self.threads.max(1)).max(1), usize::MAX)
            }
            ScheduleKind::Static | ScheduleKind::Dynamic => (chunk, chunk),
            ScheduleKind::Guided => (chunk, usize::MAX),
        };
        iter.with_min_len(min_len).with_max_len(max_len)
    }
}

/// Per-call-site record of applied policies plus the thread pools they use.
#[derive(Debug)]
pub struct PolicyCache {
    source: Box<dyn PolicySource>,
    default_threads: Option<usize>,
    applied: Mutex<HashMap<CallSite, SchedulePolicy>>,
    pools: Mutex<HashMap<usize, Arc<ThreadPool>>>,
}

impl Default for PolicyCache {
    fn default() -> Self {
        Self::new(Box::new(FixedPolicy::default()), None)
    }
}

impl PolicyCache {
    /// `default_threads` sizes the pool used by policies that do not pick a
    /// thread count; `None` uses rayon's global pool.
    pub fn new(source: Box<dyn PolicySource>, default_threads: Option<usize>) -> Self {
        Self {
            source,
            default_threads,
            applied: Mutex::new(HashMap::new()),
            pools: Mutex::new(HashMap::new()),
        }
    }

    /// Last policy applied at `site`, if the site has run.
    pub fn applied(&self, site: CallSite) -> Option<SchedulePolicy> {
        self.applied
            .lock()
            .ok()
            .and_then(|applied| applied.get(&site).copied())
    }

    fn resolve(&self, site: CallSite, len: usize) -> SchedulePolicy {
        let policy = SchedulePolicy::from_index(self.source.policy_index(site, len as f64));
        if let Ok(mut applied) = self.applied.lock() {
            if applied.insert(site, policy) != Some(policy) {
                log::debug!("Policy for {} set to {:?}", site, policy);
            }
        }
        policy
    }

    fn pool(&self, threads: usize) -> Result<Option<Arc<ThreadPool>>, CgError> {
        let threads = match (threads, self.default_threads) {
            (0, None) => return Ok(None),
            (0, Some(default)) => default,
            (n, _) => n,
        };
        let mut pools = self
            .pools
            .lock()
            .map_err(|_| CgError::InvalidConfig("thread pool cache poisoned".to_string()))?;
        if let Some(pool) = pools.get(&threads) {
            return Ok(Some(Arc::clone(pool)));
        }
        log::debug!("Building thread pool with {} threads", threads);
        let pool = Arc::new(
            ThreadPoolBuilder::new()
                .num_threads(threads)
                .thread_name(move |i| format!("cgbench-{}-{}", threads, i))
                .build()?,
        );
        pools.insert(threads, Arc::clone(&pool));
        Ok(Some(pool))
    }

    /// Runs `body` as the parallel region `site` over `len` iterations,
    /// inside the pool its policy selects.
    pub fn region<R, F>(&self, site: CallSite, len: usize, body: F) -> Result<R, CgError>
    where
        R: Send,
        F: FnOnce(&Region) -> R + Send,
    {
        let policy = self.resolve(site, len);
        match self.pool(policy.threads)? {
            Some(pool) => {
                let region = Region {
                    policy,
                    threads: pool.current_num_threads(),
                };
                Ok(pool.install(|| body(&region)))
            }
            None => {
                let region = Region {
                    policy,
                    threads: rayon::current_num_threads(),
                };
                Ok(body(&region))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rayon::prelude::*;

    #[test]
    fn test_policy_index_decoding() {
        assert_eq!(
            SchedulePolicy::from_index(0),
            SchedulePolicy {
                threads: 0,
                kind: ScheduleKind::Static,
                chunk: 0
            }
        );
        // chunk fastest, then kind, then threads
        let p = SchedulePolicy::from_index(1 + 9 * 2 + 27 * 3);
        assert_eq!(p.chunk, 1);
        assert_eq!(p.kind, ScheduleKind::Guided);
        assert_eq!(p.threads, 4);
        assert_eq!(SchedulePolicy::from_index(NUM_POLICIES), SchedulePolicy::from_index(0));
    }

    #[test]
    fn test_static_region_model_parsing() {
        let model = StaticRegionModel::parse("StaticRegion,policy=3,spmv=10").unwrap();
        assert_eq!(model.policy_index(CallSite::Spmv, 0.0), 10);
        assert_eq!(model.policy_index(CallSite::Dot, 0.0), 3);

        assert!(StaticRegionModel::parse("DecisionTree,spmv=1").is_err());
        assert!(StaticRegionModel::parse("StaticRegion,nowhere=1").is_err());
        assert!(StaticRegionModel::parse("StaticRegion,spmv=x").is_err());
        assert!(StaticRegionModel::parse("StaticRegion,spmv=100000").is_err());
    }

    #[test]
    fn test_region_records_applied_policy() {
        let cache = PolicyCache::new(Box::new(FixedPolicy(27 + 9 + 4)), None);
        assert_eq!(cache.applied(CallSite::Dot), None);

        let sum = cache
            .region(CallSite::Dot, 1000, |region| {
                region
                    .tune((0..1000usize).into_par_iter())
                    .sum::<usize>()
            })
            .unwrap();
        assert_eq!(sum, 999 * 1000 / 2);

        let applied = cache.applied(CallSite::Dot).unwrap();
        assert_eq!(applied.threads, 1);
        assert_eq!(applied.kind, ScheduleKind::Dynamic);
        assert_eq!(applied.chunk, 32);
    }

    #[test]
    fn test_region_runs_in_requested_pool() {
        let cache = PolicyCache::new(Box::new(FixedPolicy(27 * 2)), None);
        let threads = cache
            .region(CallSite::Axpy, 10, |_| rayon::current_num_threads())
            .unwrap();
        assert_eq!(threads, 2);

        let cache = PolicyCache::new(Box::new(FixedPolicy(0)), Some(3));
        let threads = cache
            .region(CallSite::Axpy, 10, |_| rayon::current_num_threads())
            .unwrap();
        assert_eq!(threads, 3);
    }
}
