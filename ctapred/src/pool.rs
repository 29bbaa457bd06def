//! Fan-out/fan-in over contiguous partitions of a read-only input.
//!
//! Each partition is handed to a pure compute function on its own worker. Workers share no
//! mutable state; their results are collected in partition order once every worker is done.
//! A panicking worker fails the whole job.

use std::any::Any;
use std::ops::Range;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rayon::prelude::*;

use crate::error::{Error, Result};

/// Shared flag used to cancel a running job.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {

    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once the token has been triggered.
    pub fn check(&self) -> Result<()> {
        match self.is_cancelled() {
            true => Err(Error::Cancelled),
            false => Ok(()),
        }
    }
}

/// Resolves a requested worker count, where -1 means every available processing unit.
pub fn resolve_worker_count(requested: i64) -> Result<usize> {

    match requested {
        -1 => Ok(std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)),
        n if n >= 1 => Ok(n as usize),
        n => Err(Error::Parameter(format!("worker count must be -1 or at least 1, got {}", n))),
    }
}

/// Splits `0..len` into at most `parts` contiguous, non-overlapping, non-empty ranges whose
/// sizes differ by at most one.
pub fn partition(len: usize, parts: usize) -> Vec<Range<usize>> {

    let parts = parts.max(1).min(len);
    if parts == 0 {
        return Vec::new();
    }

    let base = len / parts;
    let extra = len % parts;

    let mut ranges: Vec<Range<usize>> = Vec::with_capacity(parts);
    let mut start = 0;
    for i in 0..parts {
        let size = base + if i < extra { 1 } else { 0 };
        ranges.push(start..start + size);
        start += size;
    }

    return ranges;
}

pub struct WorkerPool {
    workers: usize,
    pool: rayon::ThreadPool,
}

impl WorkerPool {

    pub fn new(workers: usize) -> Result<Self> {

        let workers = workers.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("ctapred-worker-{}", i))
            .build()
            .map_err(|e| Error::WorkerFailure(format!("failed to build thread pool: {}", e)))?;

        return Ok(Self { workers, pool });
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Partitions `0..len` into one range per worker and runs `compute` on each.
    pub fn map_partitions<T, F>(&self, len: usize, compute: F) -> Result<Vec<T>>
    where
        T: Send,
        F: Fn(Range<usize>) -> Result<T> + Sync,
    {
        self.run(partition(len, self.workers), compute)
    }

    /// Runs `compute` once per partition and merges the results in partition order.
    ///
    /// The first failing partition (in partition order) decides the job's error; results of the
    /// other partitions are discarded.
    pub fn run<T, F>(&self, partitions: Vec<Range<usize>>, compute: F) -> Result<Vec<T>>
    where
        T: Send,
        F: Fn(Range<usize>) -> Result<T> + Sync,
    {
        let results: Vec<Result<T>> = self.pool.install(|| {
            partitions
                .into_par_iter()
                .map(|range| {
                    let label = format!("{:?}", range);
                    match panic::catch_unwind(AssertUnwindSafe(|| compute(range))) {
                        Ok(result) => result,
                        Err(payload) => Err(Error::WorkerFailure(format!(
                            "partition {} panicked: {}",
                            label,
                            panic_message(&payload)
                        ))),
                    }
                })
                .collect()
        });

        return results.into_iter().collect();
    }
}

fn panic_message(payload: &Box<dyn Any + Send>) -> String {

    if let Some(s) = payload.downcast_ref::<&str>() {
        return s.to_string();
    }
    if let Some(s) = payload.downcast_ref::<String>() {
        return s.clone();
    }
    return "unknown panic".to_string();
}

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn partitions_cover_input_evenly() {

        for len in [0usize, 1, 2, 7, 64, 1000] {
            for parts in [1usize, 2, 3, 8, 13] {
                let ranges = partition(len, parts);

                let covered: Vec<usize> = ranges.iter().flat_map(|r| r.clone()).collect();
                assert_eq!(covered, (0..len).collect::<Vec<_>>());
                assert!(ranges.iter().all(|r| !r.is_empty()));
                assert!(ranges.len() <= parts);

                let sizes: Vec<usize> = ranges.iter().map(|r| r.len()).collect();
                if let (Some(min), Some(max)) = (sizes.iter().min(), sizes.iter().max()) {
                    assert!(max - min <= 1);
                }
            }
        }
    }

    #[test]
    fn worker_count_resolution() {

        assert!(resolve_worker_count(-1).unwrap() >= 1);
        assert_eq!(resolve_worker_count(4).unwrap(), 4);
        assert!(matches!(resolve_worker_count(0), Err(Error::Parameter(_))));
        assert!(matches!(resolve_worker_count(-2), Err(Error::Parameter(_))));
    }

    #[test]
    fn results_come_back_in_partition_order() {

        let pool = WorkerPool::new(4).unwrap();
        let sums = pool.map_partitions(100, |range| Ok(range.sum::<usize>())).unwrap();

        assert_eq!(sums.len(), 4);
        assert_eq!(sums.iter().sum::<usize>(), (0..100).sum::<usize>());
        assert_eq!(sums[0], (0..25).sum::<usize>());
    }

    #[test]
    fn panicking_worker_fails_the_job() {

        let pool = WorkerPool::new(3).unwrap();
        let result = pool.map_partitions(9, |range| {
            if range.contains(&4) {
                panic!("boom");
            }
            Ok(range.len())
        });

        match result {
            Err(Error::WorkerFailure(msg)) => assert!(msg.contains("boom")),
            other => panic!("expected worker failure, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn cancel_token() {

        let token = CancelToken::new();
        let shared = token.clone();
        assert!(token.check().is_ok());

        shared.cancel();
        assert!(matches!(token.check(), Err(Error::Cancelled)));
    }
}
