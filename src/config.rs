use std::fmt;
use std::ops::Range;

use num_traits::Float;

use crate::error::ApError;
use crate::preference::Preference;

/// Run parameters for a clustering system.
///
/// `damping` is the convex-combination factor applied to successive message
/// updates; `send_each` the reporting cadence in iterations;
/// `enough_iterations` how long the exemplar set must hold before the run is
/// declared converged; `max_iterations` the safety cap on total iterations;
/// `shards` how many dispatcher/aggregator pairs partition the graph;
/// `threads` the size of the worker pool the actors run on.
#[derive(Debug, Clone)]
pub struct ApConfig<F>
where
    F: Float + Send + Sync,
{
    pub damping: F,
    pub preference: Preference<F>,
    pub shards: usize,
    pub threads: usize,
    pub send_each: u64,
    pub enough_iterations: u64,
    pub max_iterations: u64,
    pub workers: Vec<WorkerAddress>,
}

impl<F> Default for ApConfig<F>
where
    F: Float + Send + Sync,
{
    fn default() -> Self {
        Self {
            damping: F::from(0.5).unwrap(),
            preference: Preference::Median,
            shards: 4,
            threads: 4,
            send_each: 1,
            enough_iterations: 10,
            max_iterations: 1000,
            workers: vec![WorkerAddress::local()],
        }
    }
}

impl<F> ApConfig<F>
where
    F: Float + Send + Sync,
{
    pub fn validate(&self) -> Result<(), ApError> {
        if self.damping < F::zero() || self.damping >= F::one() {
            return Err(ApError::Config(
                "damping must lie in [0, 1)".to_string(),
            ));
        }
        if self.shards < 1 {
            return Err(ApError::Config("at least one shard is required".to_string()));
        }
        if self.threads < 1 {
            return Err(ApError::Config(
                "at least one worker thread is required".to_string(),
            ));
        }
        if self.send_each < 1 {
            return Err(ApError::Config(
                "send_each must be at least 1".to_string(),
            ));
        }
        if self.max_iterations < 1 {
            return Err(ApError::Config(
                "max_iterations must be at least 1".to_string(),
            ));
        }
        if self.workers.is_empty() {
            return Err(ApError::Config(
                "at least one worker address is required".to_string(),
            ));
        }
        Ok(())
    }
}

/// Opaque address of a worker a shard can be placed on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerAddress(String);

impl WorkerAddress {
    pub fn new<A: Into<String>>(address: A) -> Self {
        Self(address.into())
    }

    /// The in-process worker.
    pub fn local() -> Self {
        Self("local".to_string())
    }
}

impl fmt::Display for WorkerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Partition of the point index space into contiguous shards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Topology {
    points: usize,
    shards: usize,
}

impl Topology {
    pub fn new(points: usize, shards: usize) -> Result<Self, ApError> {
        if points == 0 {
            return Err(ApError::InvalidInput(
                "cannot partition an empty graph".to_string(),
            ));
        }
        if shards == 0 || shards > points {
            return Err(ApError::InvalidInput(format!(
                "{} shards cannot partition {} points without an empty shard",
                shards, points
            )));
        }
        Ok(Self { points, shards })
    }

    pub fn points(&self) -> usize {
        self.points
    }

    pub fn shards(&self) -> usize {
        self.shards
    }

    /// Balanced contiguous index ranges: the first `points % shards` shards
    /// take one extra point.
    pub fn ranges(&self) -> Vec<Range<usize>> {
        let base = self.points / self.shards;
        let extra = self.points % self.shards;
        let mut ranges = Vec::with_capacity(self.shards);
        let mut from = 0;
        for shard in 0..self.shards {
            let len = if shard < extra { base + 1 } else { base };
            ranges.push(from..from + len);
            from += len;
        }
        ranges
    }
}

/// Explicit shard-to-worker placement map, assigned round-robin over the
/// configured worker list.
#[derive(Debug, Clone)]
pub struct Placement {
    assignments: Vec<WorkerAddress>,
}

impl Placement {
    pub fn round_robin(shards: usize, workers: &[WorkerAddress]) -> Self {
        let assignments = (0..shards)
            .map(|shard| workers[shard % workers.len()].clone())
            .collect();
        Self { assignments }
    }

    pub fn worker(&self, shard: usize) -> &WorkerAddress {
        &self.assignments[shard]
    }
}
