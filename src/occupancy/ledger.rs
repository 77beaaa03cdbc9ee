//! Debounce and release ledgers.
//!
//! Both ledgers map a sensor endpoint id to the epoch-millis timestamp of a
//! transition still waiting for confirmation:
//! - debounce: a `0 → 1` edge shown optimistically on the control point
//! - release: an operator release received while the sensor still read `1`
//!
//! Entries are only created and removed by the reconcilers. Every operation
//! touching both maps takes the single lock once, so a concurrent occupancy
//! and release evaluation for the same endpoint never observes a half-applied
//! update.

use parking_lot::Mutex;
use std::collections::HashMap;

/// Milliseconds between two timestamps. Not clamped: a clock going
/// backwards yields a negative interval, which satisfies any window.
pub fn elapsed_millis(last_millis: i64, now_millis: i64) -> i64 {
    now_millis - last_millis
}

/// True if an entry recorded at `recorded_millis` is still inside the window.
pub fn within_window(recorded_millis: i64, now_millis: i64, window_millis: i64) -> bool {
    elapsed_millis(recorded_millis, now_millis) < window_millis
}

#[derive(Debug, Default)]
struct Entries {
    debounce: HashMap<String, i64>,
    release: HashMap<String, i64>,
}

/// Which ledger held the entry that confirmed a vacancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerKind {
    Debounce,
    Release,
}

/// A ledger entry found to confirm a vacancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Confirmation {
    pub kind: LedgerKind,
    pub recorded_at: i64,
}

#[derive(Debug, Default)]
pub struct Ledgers {
    entries: Mutex<Entries>,
}

impl Ledgers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_rising_edge(&self, endpoint: &str, now_millis: i64) {
        self.entries
            .lock()
            .debounce
            .insert(endpoint.to_string(), now_millis);
    }

    /// Arm a release and drop any pending debounce entry in one step.
    pub fn arm_release(&self, endpoint: &str, now_millis: i64) {
        let mut entries = self.entries.lock();
        entries.release.insert(endpoint.to_string(), now_millis);
        entries.debounce.remove(endpoint);
    }

    /// Drop both entries of an endpoint.
    pub fn clear(&self, endpoint: &str) {
        let mut entries = self.entries.lock();
        entries.debounce.remove(endpoint);
        entries.release.remove(endpoint);
    }

    /// Find the entry confirming a `1 → 0` transition at `now_millis`.
    ///
    /// A debounce entry takes precedence: when one exists the release ledger
    /// is not consulted, even if the debounce entry is too old.
    pub fn vacancy_confirmation(
        &self,
        endpoint: &str,
        now_millis: i64,
        window_millis: i64,
    ) -> Option<Confirmation> {
        let entries = self.entries.lock();
        if let Some(&recorded_at) = entries.debounce.get(endpoint) {
            return within_window(recorded_at, now_millis, window_millis).then_some(Confirmation {
                kind: LedgerKind::Debounce,
                recorded_at,
            });
        }
        entries.release.get(endpoint).and_then(|&recorded_at| {
            within_window(recorded_at, now_millis, window_millis).then_some(Confirmation {
                kind: LedgerKind::Release,
                recorded_at,
            })
        })
    }

    /// Remove a confirming entry, unless it was replaced in the meantime.
    pub fn settle(&self, endpoint: &str, confirmation: Confirmation) -> bool {
        let mut entries = self.entries.lock();
        let map = match confirmation.kind {
            LedgerKind::Debounce => &mut entries.debounce,
            LedgerKind::Release => &mut entries.release,
        };
        if map.get(endpoint) == Some(&confirmation.recorded_at) {
            map.remove(endpoint);
            true
        } else {
            false
        }
    }

    pub fn debounce_entry(&self, endpoint: &str) -> Option<i64> {
        self.entries.lock().debounce.get(endpoint).copied()
    }

    pub fn release_entry(&self, endpoint: &str) -> Option<i64> {
        self.entries.lock().release.get(endpoint).copied()
    }

    /// Number of (debounce, release) entries.
    pub fn len(&self) -> (usize, usize) {
        let entries = self.entries.lock();
        (entries.debounce.len(), entries.release.len())
    }
}
