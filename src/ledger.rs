use std::collections::{HashMap, HashSet};

use tracing::warn;

use crate::store::TaskHandle;

#[derive(Debug, Clone, Default)]
pub struct TimeLedger {
    seconds: HashMap<TaskHandle, f64>,
}

impl TimeLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn accrue(&mut self, active: &[TaskHandle], period: f64) {
        let mut seen = HashSet::with_capacity(active.len());
        let unique = active
            .iter()
            .copied()
            .filter(|handle| seen.insert(*handle))
            .collect::<Vec<_>>();
        if unique.is_empty() {
            return;
        }

        let share = period / unique.len() as f64;
        for handle in unique {
            match self.seconds.get_mut(&handle) {
                Some(total) => *total += share,
                None => warn!(%handle, "tick addressed to a task with no ledger entry"),
            }
        }
    }

    pub fn adjust(&mut self, handle: TaskHandle, delta: f64) {
        match self.seconds.get_mut(&handle) {
            Some(total) => *total = (*total + delta).max(0.0),
            None => warn!(%handle, delta, "adjustment addressed to a task with no ledger entry"),
        }
    }

    pub fn seconds_of(&self, handle: TaskHandle) -> f64 {
        self.seconds.get(&handle).copied().unwrap_or(0.0)
    }

    pub fn contains(&self, handle: TaskHandle) -> bool {
        self.seconds.contains_key(&handle)
    }

    pub fn reset(&mut self, handle: TaskHandle) {
        self.seconds.insert(handle, 0.0);
    }

    /// Installs a value read from disk. Negative and non-finite values are
    /// stored as zero.
    pub fn set(&mut self, handle: TaskHandle, seconds: f64) {
        let seconds = if seconds.is_finite() { seconds.max(0.0) } else { 0.0 };
        self.seconds.insert(handle, seconds);
    }

    pub fn remove(&mut self, handle: TaskHandle) -> Option<f64> {
        self.seconds.remove(&handle)
    }

    pub fn reset_all(&mut self) {
        for total in self.seconds.values_mut() {
            *total = 0.0;
        }
    }

    pub fn total(&self) -> f64 {
        self.seconds.values().sum()
    }
}

pub fn format_hms(seconds: f64) -> String {
    let whole = if seconds.is_finite() && seconds > 0.0 {
        seconds.trunc() as u64
    } else {
        0
    };
    let hours = whole / 3600;
    let minutes = (whole % 3600) / 60;
    let secs = whole % 60;
    format!("{hours}:{minutes}:{secs}")
}
