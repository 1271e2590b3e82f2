//! Bounded worker parallelism for per-file operations.
//!
//! A [`Parallelism`] value caps how many OS threads fan out over a work
//! list. The cap is owned state handed into the core rather than a hidden
//! global, so tests can pin it without touching the process.

use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::thread;

use tracing::warn;

/// The maximum number of concurrently running per-file tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Parallelism(NonZeroUsize);

impl Parallelism {
    /// Cap at `n` workers. A request for 0 is clamped to 1 with a warning.
    #[must_use]
    pub fn new(n: usize) -> Self {
        match NonZeroUsize::new(n) {
            Some(n) => Self(n),
            None => {
                warn!("requested parallelism of 0, capping at 1");
                Self(NonZeroUsize::MIN)
            }
        }
    }

    #[must_use]
    pub fn get(self) -> usize {
        self.0.get()
    }

    #[must_use]
    pub fn is_parallel(self) -> bool {
        self.get() > 1
    }
}

impl Default for Parallelism {
    /// Hardware concurrency, with a floor of 1.
    fn default() -> Self {
        let n = thread::available_parallelism().map_or(1, NonZeroUsize::get);
        Self::new(n)
    }
}

/// Run `f` over every item, with at most `cap` items in flight.
///
/// Workers pull from a shared queue. The first error stops further items
/// from being picked up, but tasks already running are left to finish; the
/// first error is the one returned.
///
/// # Errors
///
/// Returns the first error produced by `f`.
pub fn for_each_bounded<T, E, F>(cap: Parallelism, items: Vec<T>, f: F) -> Result<(), E>
where
    T: Send,
    E: Send,
    F: Fn(T) -> Result<(), E> + Sync,
{
    if items.is_empty() {
        return Ok(());
    }
    let workers = cap.get().min(items.len());
    let queue = Mutex::new(items.into_iter().collect::<VecDeque<T>>());
    let first_error: Mutex<Option<E>> = Mutex::new(None);

    thread::scope(|scope| {
        for _ in 0..workers {
            scope.spawn(|| loop {
                if first_error.lock().expect("error slot poisoned").is_some() {
                    break;
                }
                let item = queue.lock().expect("work queue poisoned").pop_front();
                let Some(item) = item else {
                    break;
                };
                if let Err(error) = f(item) {
                    let mut slot = first_error.lock().expect("error slot poisoned");
                    if slot.is_none() {
                        *slot = Some(error);
                    }
                    break;
                }
            });
        }
    });

    match first_error.into_inner().expect("error slot poisoned") {
        Some(error) => Err(error),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn zero_is_clamped_to_one() {
        assert_eq!(Parallelism::new(0).get(), 1);
        assert!(!Parallelism::new(0).is_parallel());
    }

    #[test]
    fn default_is_at_least_one() {
        assert!(Parallelism::default().get() >= 1);
    }

    #[test]
    fn runs_every_item() {
        let counter = AtomicUsize::new(0);
        let items: Vec<usize> = (0..64).collect();
        for_each_bounded(Parallelism::new(4), items, |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<(), ()>(())
        })
        .expect("no task fails");
        assert_eq!(counter.load(Ordering::SeqCst), 64);
    }

    #[test]
    fn propagates_the_first_error() {
        let items: Vec<usize> = (0..16).collect();
        let result = for_each_bounded(Parallelism::new(1), items, |i| {
            if i == 3 {
                Err(i)
            } else {
                Ok(())
            }
        });
        assert_eq!(result, Err(3));
    }

    #[test]
    fn stops_picking_up_work_after_an_error() {
        let started = AtomicUsize::new(0);
        let items: Vec<usize> = (0..100).collect();
        let result = for_each_bounded(Parallelism::new(1), items, |i| {
            started.fetch_add(1, Ordering::SeqCst);
            if i == 0 {
                Err("boom")
            } else {
                Ok(())
            }
        });
        assert_eq!(result, Err("boom"));
        assert_eq!(started.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn empty_work_list_is_a_no_op() {
        for_each_bounded(Parallelism::new(4), Vec::<u8>::new(), |_| Err(()))
            .expect("nothing to run");
    }
}
