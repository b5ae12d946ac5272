//! CPU id sets and the textual forms the cpuset controller understands.
//!
//! Two string shapes appear throughout: the cgroup range form (`"0,3-5,7"`)
//! accepted by [`parse_buckets`], and the flat comma list (`"0,3,4,5,7"`)
//! produced by [`CpuSet::to_cpu_string`] when pinning individual CPUs.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

/// Inclusive range of CPU ids. `[start_cpu, end_cpu]` both belong to the
/// bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuBucket {
    pub start_cpu: usize,
    pub end_cpu: usize,
}

impl CpuBucket {
    pub fn new(start_cpu: usize, end_cpu: usize) -> Self {
        Self { start_cpu, end_cpu }
    }

    /// Number of CPUs covered by the bucket.
    pub fn len(&self) -> usize {
        self.end_cpu - self.start_cpu + 1
    }

    pub fn is_empty(&self) -> bool {
        self.end_cpu < self.start_cpu
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CpuSetParseError {
    #[error("invalid cpu id {0:?}")]
    InvalidCpuId(String),
    #[error("invalid cpu range {0:?}")]
    InvalidRange(String),
}

/// Parses a cgroup-style cpuset string (`"0,3-5,7"`) into buckets, in input
/// order. An empty or whitespace-only string is an empty list.
pub fn parse_buckets(cpuset: &str) -> Result<Vec<CpuBucket>, CpuSetParseError> {
    let trimmed = cpuset.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    let mut buckets = Vec::new();
    for part in trimmed.split(',') {
        let part = part.trim();
        let mut bounds = part.splitn(2, '-');
        let start = bounds
            .next()
            .unwrap_or_default()
            .parse::<usize>()
            .map_err(|_| CpuSetParseError::InvalidCpuId(part.to_string()))?;
        let end = match bounds.next() {
            Some(raw) => raw
                .parse::<usize>()
                .map_err(|_| CpuSetParseError::InvalidCpuId(part.to_string()))?,
            None => start,
        };
        if end < start {
            return Err(CpuSetParseError::InvalidRange(part.to_string()));
        }
        buckets.push(CpuBucket::new(start, end));
    }
    Ok(buckets)
}

/// Set of CPU ids. Iteration is always in ascending id order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuSet(BTreeSet<usize>);

impl CpuSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Expands a bucket list into the set of covered CPU ids.
    pub fn from_buckets(buckets: &[CpuBucket]) -> Self {
        let mut set = Self::new();
        for bucket in buckets {
            for cpu in bucket.start_cpu..=bucket.end_cpu {
                set.add(cpu);
            }
        }
        set
    }

    pub fn from_cpuset_string(cpuset: &str) -> Result<Self, CpuSetParseError> {
        Ok(Self::from_buckets(&parse_buckets(cpuset)?))
    }

    pub fn contains(&self, cpu: usize) -> bool {
        self.0.contains(&cpu)
    }

    pub fn add(&mut self, cpu: usize) {
        self.0.insert(cpu);
    }

    pub fn remove(&mut self, cpu: usize) {
        self.0.remove(&cpu);
    }

    /// In-place union with `other`.
    pub fn merge(&mut self, other: &CpuSet) {
        self.0.extend(other.0.iter().copied());
    }

    /// In-place difference: removes every CPU present in `other`.
    pub fn remove_all(&mut self, other: &CpuSet) {
        for cpu in &other.0 {
            self.0.remove(cpu);
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// CPU ids in ascending order.
    pub fn sorted(&self) -> Vec<usize> {
        self.0.iter().copied().collect()
    }

    /// Flat comma list (`"0,3,4"`), empty string for the empty set.
    pub fn to_cpu_string(&self) -> String {
        self.0
            .iter()
            .map(|cpu| cpu.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Compresses the set into a sorted list of inclusive ranges.
    pub fn to_bucket_list(&self) -> Vec<CpuBucket> {
        let mut buckets: Vec<CpuBucket> = Vec::new();
        for &cpu in &self.0 {
            match buckets.last_mut() {
                Some(last) if last.end_cpu + 1 == cpu => last.end_cpu = cpu,
                _ => buckets.push(CpuBucket::new(cpu, cpu)),
            }
        }
        buckets
    }
}

impl FromIterator<usize> for CpuSet {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for CpuSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_cpu_string())
    }
}
