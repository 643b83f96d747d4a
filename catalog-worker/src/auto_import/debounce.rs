//! Per-path debounce timers.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// A path waiting for its quiet period to elapse
#[derive(Debug, Clone, Copy)]
struct Pending {
    deadline: Instant,
    arrival: u64,
}

/// Coalesces bursts of filesystem events into one ready notification per
/// path. Each new event for a path pushes its deadline back; removal cancels
/// it.
#[derive(Debug)]
pub struct Debouncer {
    delay: Duration,
    pending: HashMap<PathBuf, Pending>,
    arrivals: u64,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: HashMap::new(),
            arrivals: 0,
        }
    }

    /// (Re)arm the timer for `path`.
    pub fn observe(&mut self, path: PathBuf, now: Instant) {
        let deadline = now + self.delay;
        match self.pending.get_mut(&path) {
            Some(pending) => pending.deadline = deadline,
            None => {
                self.arrivals += 1;
                self.pending.insert(
                    path,
                    Pending {
                        deadline,
                        arrival: self.arrivals,
                    },
                );
            }
        }
    }

    /// Drop a pending path. Returns whether anything was pending.
    pub fn cancel(&mut self, path: &Path) -> bool {
        self.pending.remove(path).is_some()
    }

    /// Earliest deadline among pending paths
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|p| p.deadline).min()
    }

    /// Remove and return every path whose deadline has passed, earliest
    /// deadline first (first arrival on ties).
    pub fn drain_ready(&mut self, now: Instant) -> Vec<PathBuf> {
        let mut ready: Vec<(PathBuf, Pending)> = Vec::new();
        self.pending.retain(|path, pending| {
            if pending.deadline <= now {
                ready.push((path.clone(), *pending));
                false
            } else {
                true
            }
        });

        ready.sort_by_key(|(_, p)| (p.deadline, p.arrival));
        ready.into_iter().map(|(path, _)| path).collect()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
