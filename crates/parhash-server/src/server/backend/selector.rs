use portable_atomic::{AtomicUsize, Ordering};

/// Round-robin cursor over a fixed number of backends.
///
/// One selector is owned by each service instance and shared by every
/// concurrent `ParallelHash` call. Each [`next`](Self::next) is a single atomic
/// read-modify-write, so no two callers can observe the same pre-increment
/// value and the aggregate assignment stays cyclic regardless of how calls
/// interleave.
#[derive(Debug)]
pub struct RoundRobinSelector {
    cursor: AtomicUsize,
    len: usize,
}

impl RoundRobinSelector {
    /// Creates a selector over `len` backends, starting at index 0.
    ///
    /// # Panics
    ///
    /// Panics if `len` is zero. [`ServerConfig`](crate::server::config::ServerConfig)
    /// guarantees at least one backend.
    pub fn new(len: usize) -> Self {
        assert!(len > 0, "round-robin selector needs at least one backend");
        Self {
            cursor: AtomicUsize::new(0),
            len,
        }
    }

    /// Returns the next backend index in `[0, len)` and advances the cursor.
    pub fn next(&self) -> usize {
        // The closure always returns `Some`, so `fetch_update` cannot fail.
        match self
            .cursor
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| {
                Some((cur + 1) % self.len)
            }) {
            Ok(prev) | Err(prev) => prev,
        }
    }

    /// The index the next call to [`next`](Self::next) will hand out.
    pub fn current(&self) -> usize {
        self.cursor.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn cycles_in_order_and_wraps() {
        let selector = RoundRobinSelector::new(3);
        let picks: Vec<_> = (0..7).map(|_| selector.next()).collect();
        assert_eq!(picks, [0, 1, 2, 0, 1, 2, 0]);
        assert_eq!(selector.current(), 1);
    }

    #[test]
    fn single_backend_always_selected() {
        let selector = RoundRobinSelector::new(1);
        assert!((0..16).all(|_| selector.next() == 0));
        assert_eq!(selector.current(), 0);
    }

    #[test]
    fn concurrent_callers_share_the_cycle_evenly() {
        const THREADS: usize = 8;
        const PER_THREAD: usize = 10_000;
        const BACKENDS: usize = 3;

        let selector = Arc::new(RoundRobinSelector::new(BACKENDS));
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let selector = Arc::clone(&selector);
                thread::spawn(move || {
                    let mut counts = [0_usize; BACKENDS];
                    for _ in 0..PER_THREAD {
                        counts[selector.next()] += 1;
                    }
                    counts
                })
            })
            .collect();

        let mut totals = [0_usize; BACKENDS];
        for handle in handles {
            let counts = handle.join().expect("selector thread panicked");
            for (total, count) in totals.iter_mut().zip(counts) {
                *total += count;
            }
        }

        let picks = THREADS * PER_THREAD;
        let floor = picks / BACKENDS;
        assert_eq!(totals.iter().sum::<usize>(), picks);
        assert!(totals.iter().all(|&n| n == floor || n == floor + 1));
        assert_eq!(selector.current(), picks % BACKENDS);
    }
}
