//! Shared progress bookkeeping for concurrent transcriptions.
//!
//! A [`TaskStore`] is a cheaply cloneable handle to one table of task
//! records. Each task has exactly one writer, its [`TaskHandle`], while any
//! number of readers take cloned [`TaskSnapshot`]s.

use crate::traits::ProgressListener;
use crate::types::TranscriptionSummary;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Identifier of a task within one store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TaskId(u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed)
    }
}

/// Point-in-time copy of a task record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub id: TaskId,
    pub label: String,
    pub state: TaskState,
    pub percent: u8,
    pub message: String,
    pub summary: Option<TranscriptionSummary>,
    pub error: Option<String>,
}

#[derive(Debug, Default)]
struct Tasks {
    next_id: u64,
    records: HashMap<TaskId, TaskSnapshot>,
}

/// Table of task records shared between workers and observers.
#[derive(Clone, Debug, Default)]
pub struct TaskStore {
    tasks: Arc<RwLock<Tasks>>,
}

impl TaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    // A panicking writer leaves at most one record half-updated; the
    // table itself stays usable.
    fn read(&self) -> RwLockReadGuard<'_, Tasks> {
        self.tasks.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Tasks> {
        self.tasks.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new pending task.
    pub fn create(&self, label: impl Into<String>) -> TaskId {
        let mut tasks = self.write();
        let id = TaskId(tasks.next_id);
        tasks.next_id += 1;

        tasks.records.insert(
            id,
            TaskSnapshot {
                id,
                label: label.into(),
                state: TaskState::Pending,
                percent: 0,
                message: "queued".to_string(),
                summary: None,
                error: None,
            },
        );

        id
    }

    /// Writer handle for a task created by this store.
    pub fn handle(&self, id: TaskId) -> TaskHandle {
        TaskHandle {
            store: self.clone(),
            id,
        }
    }

    /// Record progress. Returns `false` if the task is unknown or finished.
    ///
    /// Percentages are clamped to 100 and never move backwards.
    pub fn update(&self, id: TaskId, percent: u8, message: &str) -> bool {
        let mut tasks = self.write();
        let Some(record) = tasks.records.get_mut(&id) else {
            return false;
        };
        if record.state.is_terminal() {
            return false;
        }

        record.state = TaskState::Processing;
        record.percent = record.percent.max(percent.min(100));
        record.message = message.to_string();
        true
    }

    /// Mark a task as completed. Returns `false` if unknown or finished.
    pub fn complete(&self, id: TaskId, summary: TranscriptionSummary) -> bool {
        let mut tasks = self.write();
        let Some(record) = tasks.records.get_mut(&id) else {
            return false;
        };
        if record.state.is_terminal() {
            return false;
        }

        record.state = TaskState::Completed;
        record.percent = 100;
        record.message = "completed".to_string();
        record.summary = Some(summary);
        true
    }

    /// Mark a task as failed. Returns `false` if unknown or finished.
    pub fn fail(&self, id: TaskId, error: impl fmt::Display) -> bool {
        let mut tasks = self.write();
        let Some(record) = tasks.records.get_mut(&id) else {
            return false;
        };
        if record.state.is_terminal() {
            return false;
        }

        record.state = TaskState::Failed;
        record.message = "failed".to_string();
        record.error = Some(error.to_string());
        true
    }

    pub fn snapshot(&self, id: TaskId) -> Option<TaskSnapshot> {
        self.read().records.get(&id).cloned()
    }

    /// Snapshots of all tasks in creation order.
    pub fn snapshots(&self) -> Vec<TaskSnapshot> {
        let mut all: Vec<_> = self.read().records.values().cloned().collect();
        all.sort_by_key(|s| s.id);
        all
    }

    pub fn remove(&self, id: TaskId) -> Option<TaskSnapshot> {
        self.write().records.remove(&id)
    }

    /// Whether every task has reached a terminal state.
    pub fn all_finished(&self) -> bool {
        self.read().records.values().all(|s| s.state.is_terminal())
    }
}

/// Single writer for one task.
#[derive(Debug)]
pub struct TaskHandle {
    store: TaskStore,
    id: TaskId,
}

impl TaskHandle {
    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn complete(self, summary: TranscriptionSummary) -> bool {
        self.store.complete(self.id, summary)
    }

    pub fn fail(self, error: impl fmt::Display) -> bool {
        self.store.fail(self.id, error)
    }
}

impl ProgressListener for TaskHandle {
    fn on_progress(&self, percent: u8, message: &str) {
        self.store.update(self.id, percent, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn summary() -> TranscriptionSummary {
        TranscriptionSummary {
            total_frames: 100,
            duration_secs: 2.3,
            note_count: 4,
        }
    }

    #[test]
    fn new_task_is_pending() {
        let store = TaskStore::new();

        let id = store.create("a.wav");
        let snap = store.snapshot(id).unwrap();

        assert_eq!(snap.state, TaskState::Pending);
        assert_eq!(snap.percent, 0);
        assert_eq!(snap.label, "a.wav");
    }

    #[test]
    fn progress_never_decreases() {
        let store = TaskStore::new();
        let id = store.create("a.wav");

        assert!(store.update(id, 40, "features"));
        assert!(store.update(id, 20, "late update"));
        let snap = store.snapshot(id).unwrap();

        assert_eq!(snap.state, TaskState::Processing);
        assert_eq!(snap.percent, 40);
        assert_eq!(snap.message, "late update");

        store.update(id, 250, "overflow");
        assert_eq!(store.snapshot(id).unwrap().percent, 100);
    }

    #[test]
    fn terminal_states_are_final() {
        let store = TaskStore::new();
        let id = store.create("a.wav");

        assert!(store.complete(id, summary()));
        assert!(!store.update(id, 50, "after completion"));
        assert!(!store.fail(id, "too late"));

        let snap = store.snapshot(id).unwrap();
        assert_eq!(snap.state, TaskState::Completed);
        assert_eq!(snap.percent, 100);
        assert_eq!(snap.summary, Some(summary()));
        assert_eq!(snap.error, None);
    }

    #[test]
    fn failure_keeps_progress_and_records_error() {
        let store = TaskStore::new();
        let id = store.create("a.wav");

        store.update(id, 30, "inference");
        assert!(store.fail(id, "model raised"));

        let snap = store.snapshot(id).unwrap();
        assert_eq!(snap.state, TaskState::Failed);
        assert_eq!(snap.percent, 30);
        assert_eq!(snap.error.as_deref(), Some("model raised"));
        assert!(store.all_finished());
    }

    #[test]
    fn unknown_and_removed_tasks() {
        let store = TaskStore::new();
        let id = store.create("a.wav");

        assert!(store.remove(id).is_some());
        assert!(store.snapshot(id).is_none());
        assert!(!store.update(id, 10, "gone"));
        assert!(store.remove(id).is_none());
    }

    #[test]
    fn snapshots_in_creation_order() {
        let store = TaskStore::new();
        let ids: Vec<_> = (0..5).map(|i| store.create(format!("{i}.wav"))).collect();

        let listed: Vec<_> = store.snapshots().into_iter().map(|s| s.id).collect();

        assert_eq!(listed, ids);
    }

    #[test]
    fn handles_update_from_worker_threads() {
        let store = TaskStore::new();
        let handles: Vec<_> = (0..4)
            .map(|i| store.handle(store.create(format!("{i}.wav"))))
            .collect();

        let workers: Vec<_> = handles
            .into_iter()
            .map(|handle| {
                thread::spawn(move || {
                    for percent in (0..=90).step_by(10) {
                        handle.on_progress(percent, "working");
                    }
                    handle.complete(summary())
                })
            })
            .collect();

        for worker in workers {
            assert!(worker.join().unwrap());
        }

        assert!(store.all_finished());
        assert!(
            store
                .snapshots()
                .iter()
                .all(|s| s.state == TaskState::Completed && s.percent == 100)
        );
    }

    #[test]
    fn snapshot_serializes_state_in_lowercase() {
        let store = TaskStore::new();
        let id = store.create("a.wav");

        let json = serde_json::to_value(store.snapshot(id).unwrap()).unwrap();

        assert_eq!(json["state"], "pending");
    }
}
