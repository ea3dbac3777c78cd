//! Retention of finished runs.

use super::AsyncRun;
use crate::utils::Timestamp;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How long, and how many, finished runs are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    /// Terminal runs older than this are removed.
    pub retention: Duration,
    /// Upper bound on tracked runs; oldest-completed terminal runs go first.
    pub max_runs: usize,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            retention: Duration::from_secs(3600),
            max_runs: 500,
        }
    }
}

impl RetentionPolicy {
    /// Creates a policy.
    #[must_use]
    pub fn new(retention: Duration, max_runs: usize) -> Self {
        Self {
            retention,
            max_runs,
        }
    }

    /// Ids of the runs to evict at `now`.
    ///
    /// First every terminal run completed longer than `retention` ago, then,
    /// while the remaining count exceeds `max_runs`, the terminal runs that
    /// completed earliest. Queued and running runs are never selected, so
    /// the cap can be exceeded when they alone are over it.
    #[must_use]
    pub fn select_evictions<'a, I>(&self, runs: I, now: Timestamp) -> Vec<String>
    where
        I: IntoIterator<Item = &'a AsyncRun>,
    {
        let retention = chrono::Duration::from_std(self.retention).unwrap_or(chrono::Duration::MAX);
        let cutoff = now.checked_sub_signed(retention);

        let mut total = 0usize;
        let mut expired = Vec::new();
        let mut finished: Vec<(Timestamp, &str)> = Vec::new();
        for run in runs {
            total += 1;
            if !run.is_terminal() {
                continue;
            }
            let completed_at = run.completed_at.unwrap_or(run.created_at);
            if cutoff.is_some_and(|cutoff| completed_at < cutoff) {
                expired.push(run.id.clone());
            } else {
                finished.push((completed_at, &run.id));
            }
        }

        let mut remaining = total - expired.len();
        if remaining > self.max_runs {
            finished.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(b.1)));
            for (_, id) in finished {
                if remaining <= self.max_runs {
                    break;
                }
                expired.push(id.to_string());
                remaining -= 1;
            }
        }
        expired
    }
}
