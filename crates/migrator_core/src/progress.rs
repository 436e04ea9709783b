use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::model::{ThreadId, WorkUnit};

/// Durable record of which threads are done or failed.
///
/// An id is in at most one of the two sets. Marking an id that is already in
/// the target set changes nothing; marking it into the other set moves it, so
/// the latest outcome wins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressState {
    #[serde(default)]
    last_thread_id: ThreadId,
    #[serde(rename = "completed_threads", default)]
    completed: BTreeSet<ThreadId>,
    #[serde(rename = "failed_threads", default)]
    failed: BTreeSet<ThreadId>,
    /// Unix seconds of the last persisted mutation.
    #[serde(default)]
    last_updated: i64,
}

impl ProgressState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_thread_id(&self) -> ThreadId {
        self.last_thread_id
    }

    pub fn completed(&self) -> &BTreeSet<ThreadId> {
        &self.completed
    }

    pub fn failed(&self) -> &BTreeSet<ThreadId> {
        &self.failed
    }

    pub fn last_updated(&self) -> i64 {
        self.last_updated
    }

    pub fn is_completed(&self, id: ThreadId) -> bool {
        self.completed.contains(&id)
    }

    /// Returns `true` when the state changed.
    pub fn mark_completed(&mut self, id: ThreadId) -> bool {
        if self.completed.contains(&id) {
            return false;
        }
        self.failed.remove(&id);
        self.completed.insert(id);
        self.last_thread_id = id;
        true
    }

    /// Returns `true` when the state changed.
    pub fn mark_failed(&mut self, id: ThreadId) -> bool {
        if self.failed.contains(&id) {
            return false;
        }
        self.completed.remove(&id);
        self.failed.insert(id);
        true
    }

    /// Drops every candidate already completed. Failed threads stay pending.
    pub fn filter_pending(&self, candidates: Vec<WorkUnit>) -> Vec<WorkUnit> {
        candidates
            .into_iter()
            .filter(|unit| !self.completed.contains(&unit.id))
            .collect()
    }

    pub fn set_resume_from(&mut self, id: ThreadId) {
        self.last_thread_id = id;
    }

    pub fn touch(&mut self, unix_seconds: i64) {
        self.last_updated = unix_seconds;
    }

    /// Repairs files written by older tools that listed an id in both sets.
    /// Completion wins.
    pub fn normalize(&mut self) {
        let completed = &self.completed;
        self.failed.retain(|id| !completed.contains(id));
    }
}

#[cfg(test)]
mod tests {
    use super::ProgressState;

    #[test]
    fn failure_then_success_moves_between_sets() {
        let mut state = ProgressState::new();
        assert!(state.mark_failed(9));
        assert!(state.mark_completed(9));
        assert!(state.failed().is_empty());
        assert!(state.is_completed(9));
        assert_eq!(state.last_thread_id(), 9);
    }

    #[test]
    fn failing_does_not_advance_last_thread() {
        let mut state = ProgressState::new();
        state.mark_completed(3);
        state.mark_failed(8);
        assert_eq!(state.last_thread_id(), 3);
    }

    #[test]
    fn normalize_prefers_completion() {
        let mut state: ProgressState = serde_json::from_str(
            r#"{"last_thread_id":2,"completed_threads":[1,2],"failed_threads":[2,3],"last_updated":0}"#,
        )
        .unwrap();
        state.normalize();
        assert_eq!(state.failed().iter().copied().collect::<Vec<_>>(), vec![3]);
        assert_eq!(state.completed().len(), 2);
    }
}
