//! # Enrichment Tasks
//!
//! Per-point status bookkeeping for the coordinate/region pass.
//!
//! An [`EnrichmentTask`] holds one [`SubTask`] per point. A sub-task starts
//! `Pending` and ends `Succeeded` or `Failed`; failures keep the error text
//! and whether a later retry may succeed. Status codes for external storage:
//!
//! | Status | Code |
//! |--------|------|
//! | Pending | 0 |
//! | Succeeded | 1 |
//! | Failed | -1 |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EnrichError;

/// Lifecycle of a single point's enrichment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubTaskStatus {
    Pending,
    Succeeded,
    Failed,
}

impl SubTaskStatus {
    /// Integer code used by external status tables.
    pub fn code(self) -> i32 {
        match self {
            SubTaskStatus::Pending => 0,
            SubTaskStatus::Succeeded => 1,
            SubTaskStatus::Failed => -1,
        }
    }

    /// Parse a stored status code. Legacy rows use 2 for failure.
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(SubTaskStatus::Pending),
            1 => Some(SubTaskStatus::Succeeded),
            -1 | 2 => Some(SubTaskStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, SubTaskStatus::Pending)
    }
}

/// Outcome of enriching one point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubTask {
    /// Index of the point this sub-task covers
    pub index: u32,
    pub status: SubTaskStatus,
    /// Error text when failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Whether re-running this point may succeed
    #[serde(default)]
    pub retriable: bool,
}

impl SubTask {
    pub fn pending(index: u32) -> Self {
        Self {
            index,
            status: SubTaskStatus::Pending,
            error: None,
            retriable: false,
        }
    }

    pub fn succeeded(index: u32) -> Self {
        Self {
            status: SubTaskStatus::Succeeded,
            ..Self::pending(index)
        }
    }

    pub fn failed(index: u32, error: &EnrichError) -> Self {
        Self {
            index,
            status: SubTaskStatus::Failed,
            error: Some(error.to_string()),
            retriable: error.is_retriable(),
        }
    }

    pub fn from_result<T>(index: u32, result: &Result<T, EnrichError>) -> Self {
        match result {
            Ok(_) => Self::succeeded(index),
            Err(e) => Self::failed(index, e),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.status == SubTaskStatus::Failed
    }
}

/// A batch of per-point sub-tasks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentTask {
    pub created_at: DateTime<Utc>,
    pub sub_tasks: Vec<SubTask>,
}

impl EnrichmentTask {
    /// A task with `count` pending sub-tasks, indexed 0..count.
    pub fn new(count: usize) -> Self {
        Self::from_indices((0..count).map(|i| i as u32))
    }

    /// A task with one pending sub-task per given point index.
    pub fn from_indices(indices: impl IntoIterator<Item = u32>) -> Self {
        Self {
            created_at: Utc::now(),
            sub_tasks: indices.into_iter().map(SubTask::pending).collect(),
        }
    }

    /// A task from already-decided sub-tasks.
    pub fn from_sub_tasks(sub_tasks: Vec<SubTask>) -> Self {
        Self {
            created_at: Utc::now(),
            sub_tasks,
        }
    }

    pub fn total(&self) -> usize {
        self.sub_tasks.len()
    }

    fn count(&self, status: SubTaskStatus) -> usize {
        self.sub_tasks.iter().filter(|s| s.status == status).count()
    }

    pub fn succeeded(&self) -> usize {
        self.count(SubTaskStatus::Succeeded)
    }

    pub fn failed(&self) -> usize {
        self.count(SubTaskStatus::Failed)
    }

    pub fn pending(&self) -> usize {
        self.count(SubTaskStatus::Pending)
    }

    /// Fraction of sub-tasks in a terminal state. An empty task is complete.
    pub fn progress(&self) -> f64 {
        if self.sub_tasks.is_empty() {
            return 1.0;
        }
        (self.succeeded() + self.failed()) as f64 / self.total() as f64
    }

    pub fn is_complete(&self) -> bool {
        self.sub_tasks.iter().all(|s| s.status.is_terminal())
    }

    /// Sub-task for a point index.
    pub fn get(&self, index: u32) -> Option<&SubTask> {
        self.sub_tasks.iter().find(|s| s.index == index)
    }

    /// Replace the sub-task with the same point index. Returns false when the
    /// task has no such point.
    pub fn record(&mut self, outcome: SubTask) -> bool {
        match self.sub_tasks.iter_mut().find(|s| s.index == outcome.index) {
            Some(slot) => {
                *slot = outcome;
                true
            }
            None => false,
        }
    }

    pub fn failures(&self) -> impl Iterator<Item = &SubTask> {
        self.sub_tasks.iter().filter(|s| s.is_failed())
    }

    /// Failed sub-tasks worth re-dispatching.
    pub fn retriable_failures(&self) -> impl Iterator<Item = &SubTask> {
        self.failures().filter(|s| s.retriable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(SubTaskStatus::Pending.code(), 0);
        assert_eq!(SubTaskStatus::Succeeded.code(), 1);
        assert_eq!(SubTaskStatus::Failed.code(), -1);
        assert_eq!(SubTaskStatus::from_code(2), Some(SubTaskStatus::Failed));
        assert_eq!(SubTaskStatus::from_code(7), None);
        for status in [SubTaskStatus::Pending, SubTaskStatus::Succeeded, SubTaskStatus::Failed] {
            assert_eq!(SubTaskStatus::from_code(status.code()), Some(status));
        }
    }

    #[test]
    fn test_progress_counts_terminal_sub_tasks() {
        let mut task = EnrichmentTask::new(4);
        assert_eq!(task.progress(), 0.0);
        assert!(!task.is_complete());

        task.record(SubTask::succeeded(0));
        task.record(SubTask::failed(
            2,
            &EnrichError::RegionCodeIndexCorrupt {
                code: "1".to_string(),
            },
        ));
        assert_eq!(task.progress(), 0.5);
        assert_eq!(task.succeeded(), 1);
        assert_eq!(task.failed(), 1);
        assert_eq!(task.pending(), 2);

        task.record(SubTask::succeeded(1));
        task.record(SubTask::succeeded(3));
        assert!(task.is_complete());
        assert_eq!(task.progress(), 1.0);
    }

    #[test]
    fn test_empty_task_is_complete() {
        let task = EnrichmentTask::new(0);
        assert_eq!(task.progress(), 1.0);
        assert!(task.is_complete());
    }

    #[test]
    fn test_record_unknown_index() {
        let mut task = EnrichmentTask::from_indices([10, 11]);
        assert!(!task.record(SubTask::succeeded(3)));
        assert!(task.record(SubTask::succeeded(11)));
        assert_eq!(task.get(11).unwrap().status, SubTaskStatus::Succeeded);
    }

    #[test]
    fn test_retriable_failures() {
        let mut task = EnrichmentTask::new(3);
        task.record(SubTask::failed(
            0,
            &EnrichError::PoolExhausted {
                max_connections: 5,
                waited_ms: 10,
            },
        ));
        task.record(SubTask::failed(
            1,
            &EnrichError::RegionCodeIndexCorrupt {
                code: "x".to_string(),
            },
        ));

        let retriable: Vec<u32> = task.retriable_failures().map(|s| s.index).collect();
        assert_eq!(retriable, vec![0]);
        assert_eq!(task.failures().count(), 2);
        assert!(task.get(0).unwrap().error.as_deref().unwrap().contains("exhausted"));
    }

    #[test]
    fn test_from_result() {
        let ok: Result<(), EnrichError> = Ok(());
        assert_eq!(SubTask::from_result(5, &ok), SubTask::succeeded(5));

        let err: Result<(), EnrichError> = Err(EnrichError::Io {
            message: "disk".to_string(),
        });
        let sub = SubTask::from_result(5, &err);
        assert!(sub.is_failed());
        assert!(sub.retriable);
    }

    #[test]
    fn test_serialized_status_is_lowercase() {
        let json = serde_json::to_string(&SubTask::succeeded(1)).unwrap();
        assert!(json.contains("\"succeeded\""));
        assert!(!json.contains("error"));
    }
}
