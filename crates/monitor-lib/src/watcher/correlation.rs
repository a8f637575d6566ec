//! Deduplication and start/die correlation state
//!
//! Holds the three structures shared by event tasks: ids with an observed
//! start, ids with an observed die, and the details captured at start.
//! Callers wrap it in a single mutex and never hold that lock across I/O.
//!
//! Entries are evicted when a die is correlated, when they outlive the
//! retention window, and oldest-first once `max_tracked` ids are held.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

/// Details captured when a workload container starts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartInfo {
    pub pid: i64,
    pub name: String,
    pub work_dir: String,
}

#[derive(Debug)]
pub struct CorrelationState {
    started: HashMap<String, Instant>,
    died: HashMap<String, Instant>,
    captured: HashMap<String, (StartInfo, Instant)>,
    retention: Duration,
    max_tracked: usize,
}

impl CorrelationState {
    pub fn new(retention: Duration, max_tracked: usize) -> Self {
        Self {
            started: HashMap::new(),
            died: HashMap::new(),
            captured: HashMap::new(),
            retention,
            max_tracked: max_tracked.max(1),
        }
    }

    /// Mark a start; false if the id is already marked started
    pub fn mark_started(&mut self, id: &str, now: Instant) -> bool {
        if self.started.contains_key(id) {
            return false;
        }
        // A restarted container is tracked from scratch
        self.died.remove(id);
        self.started.insert(id.to_string(), now);
        self.prune(now);
        true
    }

    /// Mark a die; false if the id is already marked died
    pub fn mark_died(&mut self, id: &str, now: Instant) -> bool {
        if self.died.contains_key(id) {
            return false;
        }
        self.died.insert(id.to_string(), now);
        self.prune(now);
        true
    }

    /// Store the details captured at start; false if a die overtook it
    ///
    /// A die marked after this start has already been handled without a
    /// capture, so the late details are discarded instead of lingering.
    pub fn record_start(&mut self, id: &str, info: StartInfo, now: Instant) -> bool {
        if self.died.contains_key(id) {
            self.started.remove(id);
            return false;
        }
        self.captured.insert(id.to_string(), (info, now));
        self.prune(now);
        true
    }

    /// Remove and return the captured start; the start mark is released either way
    pub fn take_start(&mut self, id: &str) -> Option<StartInfo> {
        self.started.remove(id);
        self.captured.remove(id).map(|(info, _)| info)
    }

    /// Number of distinct ids held in any structure
    pub fn tracked(&self) -> usize {
        self.started
            .keys()
            .chain(self.died.keys())
            .chain(self.captured.keys())
            .collect::<HashSet<_>>()
            .len()
    }

    fn prune(&mut self, now: Instant) {
        let retention = self.retention;
        let fresh = |at: Instant| now.saturating_duration_since(at) <= retention;
        self.started.retain(|_, at| fresh(*at));
        self.died.retain(|_, at| fresh(*at));
        self.captured.retain(|_, (_, at)| fresh(*at));

        let tracked = self.tracked();
        if tracked <= self.max_tracked {
            return;
        }

        let mut newest: HashMap<&str, Instant> = HashMap::new();
        let stamps = self
            .started
            .iter()
            .chain(self.died.iter())
            .chain(self.captured.iter().map(|(id, (_, at))| (id, at)));
        for (id, at) in stamps {
            let entry = newest.entry(id.as_str()).or_insert(*at);
            if *at > *entry {
                *entry = *at;
            }
        }

        let mut by_age: Vec<(Instant, String)> = newest
            .into_iter()
            .map(|(id, at)| (at, id.to_string()))
            .collect();
        by_age.sort();

        for (_, id) in by_age.into_iter().take(tracked - self.max_tracked) {
            self.started.remove(&id);
            self.died.remove(&id);
            self.captured.remove(&id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(pid: i64) -> StartInfo {
        StartInfo {
            pid,
            name: "nxf-a".to_string(),
            work_dir: "/work".to_string(),
        }
    }

    fn state() -> CorrelationState {
        CorrelationState::new(Duration::from_secs(60), 100)
    }

    #[test]
    fn test_duplicate_marks_rejected() {
        let mut state = state();
        let now = Instant::now();

        assert!(state.mark_started("a", now));
        assert!(!state.mark_started("a", now));
        assert!(state.mark_died("a", now));
        assert!(!state.mark_died("a", now));
    }

    #[test]
    fn test_take_start_evicts_entry() {
        let mut state = state();
        let now = Instant::now();

        state.mark_started("a", now);
        assert!(state.record_start("a", info(42), now));
        state.mark_died("a", now);

        assert_eq!(state.take_start("a"), Some(info(42)));
        assert_eq!(state.take_start("a"), None);
        // Only the die mark remains, so a duplicate die is still rejected
        assert_eq!(state.tracked(), 1);
        assert!(!state.mark_died("a", now));
    }

    #[test]
    fn test_orphan_die_has_no_start() {
        let mut state = state();
        let now = Instant::now();

        assert!(state.mark_died("b", now));
        assert_eq!(state.take_start("b"), None);
    }

    #[test]
    fn test_orphan_die_releases_start_mark() {
        let mut state = state();
        let now = Instant::now();

        assert!(state.mark_started("a", now));
        assert!(state.mark_died("a", now));
        assert_eq!(state.take_start("a"), None);
        assert_eq!(state.tracked(), 1);
    }

    #[test]
    fn test_start_captured_after_die_is_discarded() {
        let mut state = state();
        let now = Instant::now();

        state.mark_started("a", now);
        state.mark_died("a", now);
        assert_eq!(state.take_start("a"), None);

        assert!(!state.record_start("a", info(42), now));
        assert_eq!(state.take_start("a"), None);
        // Only the die mark is left
        assert_eq!(state.tracked(), 1);
    }

    #[test]
    fn test_restart_clears_die_mark() {
        let mut state = state();
        let now = Instant::now();

        state.mark_started("a", now);
        state.record_start("a", info(1), now);
        state.mark_died("a", now);
        state.take_start("a");

        assert!(state.mark_started("a", now));
        state.record_start("a", info(2), now);
        assert!(state.mark_died("a", now));
        assert_eq!(state.take_start("a").map(|i| i.pid), Some(2));
    }

    #[test]
    fn test_retention_prunes_stale_entries() {
        let mut state = CorrelationState::new(Duration::from_secs(10), 100);
        let t0 = Instant::now();

        state.mark_started("old", t0);
        state.record_start("old", info(1), t0);
        state.mark_started("new", t0 + Duration::from_secs(30));

        assert_eq!(state.tracked(), 1);
        assert_eq!(state.take_start("old"), None);
        assert!(state.mark_started("old", t0 + Duration::from_secs(31)));
    }

    #[test]
    fn test_capacity_evicts_oldest_first() {
        let mut state = CorrelationState::new(Duration::from_secs(3600), 2);
        let t0 = Instant::now();

        state.mark_started("a", t0);
        state.mark_started("b", t0 + Duration::from_secs(1));
        state.mark_started("c", t0 + Duration::from_secs(2));

        assert_eq!(state.tracked(), 2);
        assert!(state.mark_started("a", t0 + Duration::from_secs(3)));
        assert!(!state.mark_started("c", t0 + Duration::from_secs(3)));
    }
}
