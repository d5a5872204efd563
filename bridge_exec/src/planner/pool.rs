//! Bounded worker pool used by planners to evaluate candidates in parallel.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{num::NonZeroUsize, thread};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A fixed number of worker threads.
///
/// Work submitted through [`WorkerPool::map`] is split into at most `num_threads` contiguous
/// chunks, each evaluated on its own scoped thread. The call blocks until every chunk is done.
#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    num_threads: NonZeroUsize,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl WorkerPool {
    /// Create a pool with the given number of threads. Zero is treated as one.
    pub fn new(num_threads: usize) -> Self {
        Self {
            num_threads: NonZeroUsize::new(num_threads).unwrap_or(NonZeroUsize::MIN),
        }
    }

    pub fn num_threads(&self) -> usize {
        self.num_threads.get()
    }

    /// Apply `f` to every item, returning the results in item order.
    pub fn map<T, R, F>(&self, items: &[T], f: F) -> Vec<R>
    where
        T: Sync,
        R: Send,
        F: Fn(&T) -> R + Sync,
    {
        if items.is_empty() {
            return Vec::new();
        }

        // Run small jobs inline rather than paying for a thread
        if self.num_threads() == 1 || items.len() == 1 {
            return items.iter().map(&f).collect();
        }

        let chunk_size = (items.len() + self.num_threads() - 1) / self.num_threads();
        let f = &f;

        thread::scope(|s| {
            let handles: Vec<_> = items
                .chunks(chunk_size)
                .map(|chunk| s.spawn(move || chunk.iter().map(f).collect::<Vec<R>>()))
                .collect();

            handles
                .into_iter()
                .flat_map(|h| match h.join() {
                    Ok(r) => r,
                    Err(e) => std::panic::resume_unwind(e),
                })
                .collect()
        })
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(thread::available_parallelism().map_or(1, NonZeroUsize::get))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_map_preserves_order() {
        let items: Vec<usize> = (0..103).collect();

        for threads in [0, 1, 2, 4, 7, 200].iter() {
            let pool = WorkerPool::new(*threads);
            let out = pool.map(&items, |i| i * 2);
            assert_eq!(out, items.iter().map(|i| i * 2).collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_zero_threads_is_one() {
        assert_eq!(WorkerPool::new(0).num_threads(), 1);
    }

    #[test]
    fn test_concurrency_bounded() {
        let pool = WorkerPool::new(3);
        let active = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);

        let items: Vec<u32> = (0..30).collect();
        pool.map(&items, |_| {
            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(std::time::Duration::from_millis(1));
            active.fetch_sub(1, Ordering::SeqCst);
        });

        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[test]
    fn test_empty() {
        let out: Vec<u8> = WorkerPool::new(4).map(&[] as &[u8], |_| 0);
        assert!(out.is_empty());
    }
}
