//! Fork-join reduction over element ranges.
//!
//! Kernels are written against a single mutable accumulator. [`map_reduce`]
//! hands every worker its own accumulator and a contiguous range of element
//! indices; the caller combines the returned accumulators. No accumulator is
//! shared between workers.

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::error::{FemError, Result};

/// Build a bounded worker pool; `n_threads == 0` uses rayon's default.
pub fn build_pool(n_threads: usize) -> Result<ThreadPool> {
    ThreadPoolBuilder::new()
        .num_threads(n_threads)
        .build()
        .map_err(|e| FemError::InvalidConfig(format!("cannot build thread pool: {e}")))
}

/// Run `body(acc, e)` for every `e` in `0..n` on `pool`.
///
/// # Arguments
/// * `pool` - Worker pool; one range per worker thread
/// * `n` - Number of items
/// * `init` - Builds a fresh accumulator for a range
/// * `body` - Per-item kernel
///
/// # Returns
/// One accumulator per non-empty range, in range order.
pub fn map_reduce<A, I, F>(pool: &ThreadPool, n: usize, init: I, body: F) -> Vec<A>
where
    A: Send,
    I: Fn() -> A + Sync,
    F: Fn(&mut A, usize) + Sync,
{
    if n == 0 {
        return Vec::new();
    }
    let n_ranges = pool.current_num_threads().clamp(1, n);
    let range_len = n.div_ceil(n_ranges);

    pool.install(|| {
        (0..n_ranges)
            .into_par_iter()
            .filter_map(|r| {
                let start = r * range_len;
                let end = ((r + 1) * range_len).min(n);
                if start >= end {
                    return None;
                }
                let mut acc = init();
                for e in start..end {
                    body(&mut acc, e);
                }
                Some(acc)
            })
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn visits_every_index_once() {
        let pool = build_pool(3).unwrap();
        let parts = map_reduce(&pool, 10, Vec::new, |acc: &mut Vec<usize>, e| acc.push(e));
        assert!(parts.len() <= 3);
        let all: Vec<usize> = parts.into_iter().flatten().collect();
        assert_eq!(all, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn sums_match_sequential() {
        let pool = build_pool(4).unwrap();
        let parts = map_reduce(&pool, 1000, || 0.0f64, |acc, e| *acc += e as f64);
        let total: f64 = parts.into_iter().sum();
        assert_eq!(total, 499500.0);
    }

    #[test]
    fn single_thread_and_empty_range() {
        let pool = build_pool(1).unwrap();
        assert_eq!(map_reduce(&pool, 5, || 0usize, |acc, _| *acc += 1), vec![5]);
        assert!(map_reduce(&pool, 0, || 0usize, |acc, _| *acc += 1).is_empty());
    }
}
