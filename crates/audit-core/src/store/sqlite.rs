//! SqliteStore — WAL-mode SQLite persistence for Task/Finding rows.
//!
//! Grounded on the teacher's `ManifoldStore` (WAL pragmas, idempotent
//! `migrate()`, one connection behind a mutex for serialized writers with
//! concurrent readers via WAL).

use crate::error::Result;
use crate::model::{
    DedupStatus, Finding, FindingDraft, NewTask, ShortResult, Task, ValidationStatus,
};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;
use uuid::Uuid;

/// SQLite-backed `Store` implementation. The connection is wrapped in a
/// `Mutex` because `rusqlite::Connection` is `!Sync`; WAL mode still lets
/// readers proceed concurrently with the single writer at the SQLite level,
/// and every write here is short-lived (no AgentExecutor call ever happens
/// while this mutex is held — see §5).
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database at `path` in WAL mode and run migrations.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        Self::configure(&conn)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    /// In-memory store, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::configure(&conn)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    fn configure(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )?;
        Ok(())
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS project_task (
                id                  INTEGER PRIMARY KEY AUTOINCREMENT,
                uuid                TEXT NOT NULL UNIQUE,
                project_id          TEXT NOT NULL,
                name                TEXT NOT NULL,
                content             TEXT NOT NULL DEFAULT '',
                rule                TEXT NOT NULL,
                rule_key            TEXT NOT NULL,
                result              TEXT NOT NULL DEFAULT '',
                contract_code       TEXT NOT NULL DEFAULT '',
                start_line          INTEGER NOT NULL DEFAULT 0,
                end_line            INTEGER NOT NULL DEFAULT 0,
                relative_file_path  TEXT NOT NULL DEFAULT '',
                absolute_file_path  TEXT NOT NULL DEFAULT '',
                recommendation      TEXT NOT NULL DEFAULT '',
                business_flow_code  TEXT NOT NULL DEFAULT '',
                scan_record         TEXT NOT NULL DEFAULT '',
                short_result        TEXT NOT NULL DEFAULT '',
                \"group\"             TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_task_project ON project_task(project_id);
            CREATE INDEX IF NOT EXISTS idx_task_group ON project_task(project_id, \"group\");

            CREATE TABLE IF NOT EXISTS project_finding (
                id                        INTEGER PRIMARY KEY AUTOINCREMENT,
                uuid                      TEXT NOT NULL UNIQUE,
                project_id                TEXT NOT NULL,
                task_id                   INTEGER NOT NULL,
                task_uuid                 TEXT NOT NULL,
                rule_key                  TEXT NOT NULL,
                finding_json              TEXT NOT NULL,
                task_name                 TEXT NOT NULL,
                task_content              TEXT NOT NULL,
                task_business_flow_code   TEXT NOT NULL,
                task_contract_code        TEXT NOT NULL,
                task_start_line           INTEGER NOT NULL,
                task_end_line             INTEGER NOT NULL,
                task_relative_file_path   TEXT NOT NULL,
                task_absolute_file_path   TEXT NOT NULL,
                task_rule                 TEXT NOT NULL,
                task_group                TEXT NOT NULL,
                dedup_status              TEXT NOT NULL DEFAULT '',
                validation_status         TEXT NOT NULL DEFAULT '',
                validation_record         TEXT,
                FOREIGN KEY(task_id) REFERENCES project_task(id)
            );
            CREATE INDEX IF NOT EXISTS idx_finding_task ON project_finding(task_id);
            CREATE INDEX IF NOT EXISTS idx_finding_project_status
                ON project_finding(project_id, validation_status, dedup_status);
            ",
        )?;
        Ok(())
    }

    fn row_to_task(row: &rusqlite::Row) -> rusqlite::Result<Task> {
        let rule_raw: String = row.get("rule")?;
        let uuid_raw: String = row.get("uuid")?;
        let short_result_raw: String = row.get("short_result")?;
        Ok(Task {
            id: row.get("id")?,
            uuid: Uuid::parse_str(&uuid_raw).unwrap_or_default(),
            project_id: row.get("project_id")?,
            name: row.get("name")?,
            content: row.get("content")?,
            rule: serde_json::from_str(&rule_raw).unwrap_or(serde_json::Value::Null),
            rule_key: row.get("rule_key")?,
            result: row.get("result")?,
            contract_code: row.get("contract_code")?,
            start_line: row.get("start_line")?,
            end_line: row.get("end_line")?,
            relative_file_path: row.get("relative_file_path")?,
            absolute_file_path: row.get("absolute_file_path")?,
            recommendation: row.get("recommendation")?,
            business_flow_code: row.get("business_flow_code")?,
            scan_record: row.get("scan_record")?,
            short_result: ShortResult::from_db_str(&short_result_raw),
            group: row.get("group")?,
        })
    }

    fn row_to_finding(row: &rusqlite::Row) -> rusqlite::Result<Finding> {
        let finding_json_raw: String = row.get("finding_json")?;
        let task_rule_raw: String = row.get("task_rule")?;
        let uuid_raw: String = row.get("uuid")?;
        let task_uuid_raw: String = row.get("task_uuid")?;
        let dedup_raw: String = row.get("dedup_status")?;
        let validation_raw: String = row.get("validation_status")?;
        let validation_record_raw: Option<String> = row.get("validation_record")?;
        Ok(Finding {
            id: row.get("id")?,
            uuid: Uuid::parse_str(&uuid_raw).unwrap_or_default(),
            project_id: row.get("project_id")?,
            task_id: row.get("task_id")?,
            task_uuid: Uuid::parse_str(&task_uuid_raw).unwrap_or_default(),
            rule_key: row.get("rule_key")?,
            finding_json: serde_json::from_str(&finding_json_raw).unwrap_or(serde_json::Value::Null),
            task_name: row.get("task_name")?,
            task_content: row.get("task_content")?,
            task_business_flow_code: row.get("task_business_flow_code")?,
            task_contract_code: row.get("task_contract_code")?,
            task_start_line: row.get("task_start_line")?,
            task_end_line: row.get("task_end_line")?,
            task_relative_file_path: row.get("task_relative_file_path")?,
            task_absolute_file_path: row.get("task_absolute_file_path")?,
            task_rule: serde_json::from_str(&task_rule_raw).unwrap_or(serde_json::Value::Null),
            task_group: row.get("task_group")?,
            dedup_status: DedupStatus::from_db_str(&dedup_raw),
            validation_status: ValidationStatus::from_db_str(&validation_raw),
            validation_record: validation_record_raw
                .and_then(|raw| serde_json::from_str(&raw).ok()),
        })
    }

    fn insert_task_locked(conn: &Connection, task: &NewTask) -> Result<Task> {
        let task_uuid = Uuid::new_v4();
        let rule_raw = serde_json::to_string(&task.rule)?;
        conn.execute(
            "INSERT INTO project_task
             (uuid, project_id, name, content, rule, rule_key, result, contract_code,
              start_line, end_line, relative_file_path, absolute_file_path,
              recommendation, business_flow_code, scan_record, short_result, \"group\")
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, '', ?7, ?8, ?9, ?10, ?11, '', ?12, '', '', ?13)",
            params![
                task_uuid.to_string(),
                task.project_id,
                task.name,
                task.content,
                rule_raw,
                task.rule_key,
                task.contract_code,
                task.start_line,
                task.end_line,
                task.relative_file_path,
                task.absolute_file_path,
                task.business_flow_code,
                task.group,
            ],
        )?;
        let id = conn.last_insert_rowid();
        Ok(Task {
            id,
            uuid: task_uuid,
            project_id: task.project_id.clone(),
            name: task.name.clone(),
            content: task.content.clone(),
            rule: task.rule.clone(),
            rule_key: task.rule_key.clone(),
            result: String::new(),
            contract_code: task.contract_code.clone(),
            start_line: task.start_line,
            end_line: task.end_line,
            relative_file_path: task.relative_file_path.clone(),
            absolute_file_path: task.absolute_file_path.clone(),
            recommendation: String::new(),
            business_flow_code: task.business_flow_code.clone(),
            scan_record: String::new(),
            short_result: ShortResult::Empty,
            group: task.group.clone(),
        })
    }
}

impl super::Store for SqliteStore {
    fn insert_task(&self, task: NewTask) -> Result<Task> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        Self::insert_task_locked(&conn, &task)
    }

    fn bulk_insert_tasks(&self, tasks: Vec<NewTask>) -> Result<Vec<Task>> {
        let mut conn = self.conn.lock().expect("store mutex poisoned");
        let tx = conn.transaction()?;
        let mut inserted = Vec::with_capacity(tasks.len());
        for task in &tasks {
            inserted.push(Self::insert_task_locked(&tx, task)?);
        }
        tx.commit()?;
        Ok(inserted)
    }

    fn tasks_exist_for_project(&self, project_id: &str) -> Result<bool> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM project_task WHERE project_id = ?1",
            params![project_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn list_tasks_for_project(&self, project_id: &str) -> Result<Vec<Task>> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT * FROM project_task WHERE project_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![project_id], Self::row_to_task)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    fn get_task(&self, task_id: i64) -> Result<Option<Task>> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.query_row(
            "SELECT * FROM project_task WHERE id = ?1",
            params![task_id],
            Self::row_to_task,
        )
        .optional()
        .map_err(Into::into)
    }

    fn update_task_result(&self, task_id: i64, result_json: &str) -> Result<()> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute(
            "UPDATE project_task SET result = ?1 WHERE id = ?2",
            params![result_json, task_id],
        )?;
        Ok(())
    }

    fn set_task_short_result(&self, task_id: i64, value: ShortResult) -> Result<()> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute(
            "UPDATE project_task SET short_result = ?1 WHERE id = ?2",
            params![value.as_db_str(), task_id],
        )?;
        Ok(())
    }

    fn update_task_scan_record(&self, task_id: i64, scan_record_json: &str) -> Result<()> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute(
            "UPDATE project_task SET scan_record = ?1 WHERE id = ?2",
            params![scan_record_json, task_id],
        )?;
        Ok(())
    }

    fn replace_task_findings(&self, task_id: i64, findings: Vec<FindingDraft>) -> Result<Vec<Finding>> {
        let mut conn = self.conn.lock().expect("store mutex poisoned");
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM project_finding WHERE task_id = ?1", params![task_id])?;

        let mut out = Vec::with_capacity(findings.len());
        for draft in findings {
            let finding_uuid = Uuid::new_v4();
            let finding_json_raw = serde_json::to_string(&draft.finding_json)?;
            let task_rule_raw = serde_json::to_string(&draft.task_rule)?;
            tx.execute(
                "INSERT INTO project_finding
                 (uuid, project_id, task_id, task_uuid, rule_key, finding_json,
                  task_name, task_content, task_business_flow_code, task_contract_code,
                  task_start_line, task_end_line, task_relative_file_path,
                  task_absolute_file_path, task_rule, task_group,
                  dedup_status, validation_status, validation_record)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, '', '', NULL)",
                params![
                    finding_uuid.to_string(),
                    draft.project_id,
                    task_id,
                    draft.task_uuid.to_string(),
                    draft.rule_key,
                    finding_json_raw,
                    draft.task_name,
                    draft.task_content,
                    draft.task_business_flow_code,
                    draft.task_contract_code,
                    draft.task_start_line,
                    draft.task_end_line,
                    draft.task_relative_file_path,
                    draft.task_absolute_file_path,
                    task_rule_raw,
                    draft.task_group,
                ],
            )?;
            let id = tx.last_insert_rowid();
            out.push(Finding {
                id,
                uuid: finding_uuid,
                project_id: draft.project_id,
                task_id,
                task_uuid: draft.task_uuid,
                rule_key: draft.rule_key,
                finding_json: draft.finding_json,
                task_name: draft.task_name,
                task_content: draft.task_content,
                task_business_flow_code: draft.task_business_flow_code,
                task_contract_code: draft.task_contract_code,
                task_start_line: draft.task_start_line,
                task_end_line: draft.task_end_line,
                task_relative_file_path: draft.task_relative_file_path,
                task_absolute_file_path: draft.task_absolute_file_path,
                task_rule: draft.task_rule,
                task_group: draft.task_group,
                dedup_status: DedupStatus::Empty,
                validation_status: ValidationStatus::Empty,
                validation_record: None,
            });
        }
        tx.commit()?;
        Ok(out)
    }

    fn list_findings_for_task(&self, task_id: i64) -> Result<Vec<Finding>> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut stmt = conn.prepare("SELECT * FROM project_finding WHERE task_id = ?1 ORDER BY id ASC")?;
        let rows = stmt.query_map(params![task_id], Self::row_to_finding)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    fn list_findings_for_validation(&self, project_id: &str) -> Result<Vec<Finding>> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT * FROM project_finding
             WHERE project_id = ?1
               AND dedup_status != 'delete'
               AND (validation_status = '' OR validation_status = 'pending')
             ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![project_id], Self::row_to_finding)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    fn update_finding_validation(
        &self,
        finding_id: i64,
        status: ValidationStatus,
        record: &serde_json::Value,
    ) -> Result<()> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let record_raw = serde_json::to_string(record)?;
        conn.execute(
            "UPDATE project_finding SET validation_status = ?1, validation_record = ?2 WHERE id = ?3",
            params![status.as_db_str(), record_raw, finding_id],
        )?;
        Ok(())
    }

    fn list_findings_for_export(&self, project_id: &str) -> Result<Vec<Finding>> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT * FROM project_finding WHERE project_id = ?1 AND dedup_status != 'delete' ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![project_id], Self::row_to_finding)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }
}
