//! Store contract (§4.7, C7): durable persistence of Task and Finding rows.

pub mod sqlite;

pub use sqlite::SqliteStore;

use crate::error::Result;
use crate::model::{Finding, FindingDraft, NewTask, ShortResult, Task, ValidationStatus};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Durable persistence of Task and Finding rows. `replace_task_findings`
/// must run in one transaction so partial writes cannot break I3.
pub trait Store: Send + Sync {
    fn insert_task(&self, task: NewTask) -> Result<Task>;
    fn bulk_insert_tasks(&self, tasks: Vec<NewTask>) -> Result<Vec<Task>>;

    /// True if any Task already exists for this project — PlanningEngine
    /// uses this for its no-duplicate resume precondition (§4.8, §8).
    fn tasks_exist_for_project(&self, project_id: &str) -> Result<bool>;

    fn list_tasks_for_project(&self, project_id: &str) -> Result<Vec<Task>>;
    fn get_task(&self, task_id: i64) -> Result<Option<Task>>;

    /// Only ReasoningLoop writes `result`/`short_result`/`scan_record` (I7).
    fn update_task_result(&self, task_id: i64, result_json: &str) -> Result<()>;
    fn set_task_short_result(&self, task_id: i64, value: ShortResult) -> Result<()>;
    fn update_task_scan_record(&self, task_id: i64, scan_record_json: &str) -> Result<()>;

    /// Atomically delete all Findings for `task_id` then insert the given
    /// drafts, in one transaction (§4.5 SPLIT, §4.7).
    fn replace_task_findings(
        &self,
        task_id: i64,
        findings: Vec<crate::model::FindingDraft>,
    ) -> Result<Vec<Finding>>;

    fn list_findings_for_task(&self, task_id: i64) -> Result<Vec<Finding>>;

    /// Findings with `dedup_status != delete` and
    /// `validation_status ∈ {empty, pending}` (§4.6 selection).
    fn list_findings_for_validation(&self, project_id: &str) -> Result<Vec<Finding>>;

    /// Only Validator writes `validation_status`/`validation_record` (I7).
    fn update_finding_validation(
        &self,
        finding_id: i64,
        status: ValidationStatus,
        record: &serde_json::Value,
    ) -> Result<()>;

    fn list_findings_for_export(&self, project_id: &str) -> Result<Vec<Finding>>;
}

/// Decorates a `Store` so every call is retried once after a fixed backoff
/// before propagating its error; a second failure also cancels `cancel` so
/// `PipelineDriver::run` stops scheduling new project work rather than only
/// marking the current project aborted (§7: "StoreError is retried once with
/// backoff; second failure bubbles up and stops the driver").
pub struct RetryingStore<'a> {
    inner: &'a dyn Store,
    cancel: CancellationToken,
    backoff: Duration,
}

impl<'a> RetryingStore<'a> {
    pub fn new(inner: &'a dyn Store, cancel: CancellationToken, backoff: Duration) -> Self {
        Self { inner, cancel, backoff }
    }

    fn retry<T>(&self, op: &'static str, f: impl Fn() -> Result<T>) -> Result<T> {
        match f() {
            Ok(v) => Ok(v),
            Err(first_err) => {
                tracing::warn!(op, error = %first_err, "store call failed, retrying once after backoff");
                std::thread::sleep(self.backoff);
                match f() {
                    Ok(v) => Ok(v),
                    Err(second_err) => {
                        tracing::error!(op, error = %second_err, "store call failed twice, stopping driver");
                        self.cancel.cancel();
                        Err(second_err)
                    }
                }
            }
        }
    }
}

impl<'a> Store for RetryingStore<'a> {
    fn insert_task(&self, task: NewTask) -> Result<Task> {
        self.retry("insert_task", || self.inner.insert_task(task.clone()))
    }

    fn bulk_insert_tasks(&self, tasks: Vec<NewTask>) -> Result<Vec<Task>> {
        self.retry("bulk_insert_tasks", || self.inner.bulk_insert_tasks(tasks.clone()))
    }

    fn tasks_exist_for_project(&self, project_id: &str) -> Result<bool> {
        self.retry("tasks_exist_for_project", || self.inner.tasks_exist_for_project(project_id))
    }

    fn list_tasks_for_project(&self, project_id: &str) -> Result<Vec<Task>> {
        self.retry("list_tasks_for_project", || self.inner.list_tasks_for_project(project_id))
    }

    fn get_task(&self, task_id: i64) -> Result<Option<Task>> {
        self.retry("get_task", || self.inner.get_task(task_id))
    }

    fn update_task_result(&self, task_id: i64, result_json: &str) -> Result<()> {
        self.retry("update_task_result", || self.inner.update_task_result(task_id, result_json))
    }

    fn set_task_short_result(&self, task_id: i64, value: ShortResult) -> Result<()> {
        self.retry("set_task_short_result", || self.inner.set_task_short_result(task_id, value))
    }

    fn update_task_scan_record(&self, task_id: i64, scan_record_json: &str) -> Result<()> {
        self.retry("update_task_scan_record", || {
            self.inner.update_task_scan_record(task_id, scan_record_json)
        })
    }

    fn replace_task_findings(&self, task_id: i64, findings: Vec<FindingDraft>) -> Result<Vec<Finding>> {
        self.retry("replace_task_findings", || self.inner.replace_task_findings(task_id, findings.clone()))
    }

    fn list_findings_for_task(&self, task_id: i64) -> Result<Vec<Finding>> {
        self.retry("list_findings_for_task", || self.inner.list_findings_for_task(task_id))
    }

    fn list_findings_for_validation(&self, project_id: &str) -> Result<Vec<Finding>> {
        self.retry("list_findings_for_validation", || self.inner.list_findings_for_validation(project_id))
    }

    fn update_finding_validation(
        &self,
        finding_id: i64,
        status: ValidationStatus,
        record: &serde_json::Value,
    ) -> Result<()> {
        self.retry("update_finding_validation", || {
            self.inner.update_finding_validation(finding_id, status, record)
        })
    }

    fn list_findings_for_export(&self, project_id: &str) -> Result<Vec<Finding>> {
        self.retry("list_findings_for_export", || self.inner.list_findings_for_export(project_id))
    }
}

#[cfg(test)]
mod retry_tests {
    use super::*;
    use crate::model::ShortResult;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// A `Store` stub that fails its first N calls to `get_task`, then
    /// delegates to an in-memory map.
    struct FlakyStore {
        remaining_failures: AtomicUsize,
        tasks: Mutex<std::collections::HashMap<i64, Task>>,
    }

    impl Store for FlakyStore {
        fn insert_task(&self, _task: NewTask) -> Result<Task> {
            unimplemented!()
        }
        fn bulk_insert_tasks(&self, _tasks: Vec<NewTask>) -> Result<Vec<Task>> {
            unimplemented!()
        }
        fn tasks_exist_for_project(&self, _project_id: &str) -> Result<bool> {
            unimplemented!()
        }
        fn list_tasks_for_project(&self, _project_id: &str) -> Result<Vec<Task>> {
            unimplemented!()
        }
        fn get_task(&self, task_id: i64) -> Result<Option<Task>> {
            let remaining = self.remaining_failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.remaining_failures.store(remaining - 1, Ordering::SeqCst);
                return Err(crate::error::AuditError::Store(rusqlite::Error::QueryReturnedNoRows));
            }
            Ok(self.tasks.lock().unwrap().get(&task_id).cloned())
        }
        fn update_task_result(&self, _task_id: i64, _result_json: &str) -> Result<()> {
            unimplemented!()
        }
        fn set_task_short_result(&self, _task_id: i64, _value: ShortResult) -> Result<()> {
            unimplemented!()
        }
        fn update_task_scan_record(&self, _task_id: i64, _scan_record_json: &str) -> Result<()> {
            unimplemented!()
        }
        fn replace_task_findings(&self, _task_id: i64, _findings: Vec<FindingDraft>) -> Result<Vec<Finding>> {
            unimplemented!()
        }
        fn list_findings_for_task(&self, _task_id: i64) -> Result<Vec<Finding>> {
            unimplemented!()
        }
        fn list_findings_for_validation(&self, _project_id: &str) -> Result<Vec<Finding>> {
            unimplemented!()
        }
        fn update_finding_validation(
            &self,
            _finding_id: i64,
            _status: ValidationStatus,
            _record: &serde_json::Value,
        ) -> Result<()> {
            unimplemented!()
        }
        fn list_findings_for_export(&self, _project_id: &str) -> Result<Vec<Finding>> {
            unimplemented!()
        }
    }

    #[test]
    fn a_single_failure_is_retried_and_recovers_without_cancelling() {
        let inner = FlakyStore { remaining_failures: AtomicUsize::new(1), tasks: Mutex::new(Default::default()) };
        let cancel = CancellationToken::new();
        let retrying = RetryingStore::new(&inner, cancel.clone(), Duration::from_millis(1));

        let result = retrying.get_task(42).unwrap();
        assert_eq!(result, None);
        assert!(!cancel.is_cancelled());
    }

    #[test]
    fn two_consecutive_failures_cancel_and_propagate() {
        let inner = FlakyStore { remaining_failures: AtomicUsize::new(2), tasks: Mutex::new(Default::default()) };
        let cancel = CancellationToken::new();
        let retrying = RetryingStore::new(&inner, cancel.clone(), Duration::from_millis(1));

        let result = retrying.get_task(42);
        assert!(result.is_err());
        assert!(cancel.is_cancelled());
    }
}
