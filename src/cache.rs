use anyhow::Context;
use rusqlite::{Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::events::{ChangeBus, ChangeEvent};
use crate::model::{parse_id, StudentId, StudentRecord};
use crate::reconcile::Tombstones;

pub const CACHE_FILE: &str = "portal-cache.sqlite3";
pub const DEFAULT_ID_COUNTER: i64 = 1001;

pub mod keys {
    pub const STUDENTS: &str = "students";
    pub const DELETED_STUDENT_IDS: &str = "deletedStudentIds";
    pub const STUDENT_ID_COUNTER: &str = "studentIdCounter";
    pub const CURRENT_STUDENT: &str = "currentStudent";
    pub const ADMIN_IMPERSONATING: &str = "adminImpersonating";
    pub const ADMIN_LOGIN_REASON: &str = "adminLoginReason";
    pub const ADMIN_IMPERSONATION_LOG: &str = "adminImpersonationLog";
    pub const ADMIN_LOGGED_IN: &str = "adminLoggedIn";
    pub const ANNOUNCEMENTS: &str = "announcements";
    pub const STUDY_MATERIALS: &str = "studyMaterials";
    pub const STUDY_SCHEDULES: &str = "studySchedules";
    pub const IMPORTANT_DATES: &str = "importantDates";
    pub const ATTENDANCE_RECORDS: &str = "attendanceRecords";
    pub const TEST_RECORDS: &str = "testRecords";

    pub const ALL: &[&str] = &[
        STUDENTS,
        DELETED_STUDENT_IDS,
        STUDENT_ID_COUNTER,
        CURRENT_STUDENT,
        ADMIN_IMPERSONATING,
        ADMIN_LOGIN_REASON,
        ADMIN_IMPERSONATION_LOG,
        ADMIN_LOGGED_IN,
        ANNOUNCEMENTS,
        STUDY_MATERIALS,
        STUDY_SCHEDULES,
        IMPORTANT_DATES,
        ATTENDANCE_RECORDS,
        TEST_RECORDS,
    ];
}

/// Persistent key/value store shared by every sidecar that opens the same
/// workspace. Values are JSON text; each key carries a revision and the id of
/// the instance that last wrote it.
pub struct LocalCache {
    conn: Connection,
    path: Option<PathBuf>,
    instance_id: String,
    bus: ChangeBus,
}

impl LocalCache {
    pub fn open(workspace: &Path) -> anyhow::Result<Self> {
        std::fs::create_dir_all(workspace).with_context(|| {
            format!("failed to create workspace {}", workspace.to_string_lossy())
        })?;
        let path = workspace.join(CACHE_FILE);
        let conn = Connection::open(&path)
            .with_context(|| format!("failed to open cache {}", path.to_string_lossy()))?;
        conn.busy_timeout(Duration::from_secs(5))?;
        let mut cache = Self::with_connection(conn)?;
        cache.path = Some(path);
        Ok(cache)
    }

    pub fn open_in_memory() -> anyhow::Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> anyhow::Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS kv(
                k TEXT PRIMARY KEY,
                v TEXT NOT NULL,
                revision INTEGER NOT NULL,
                writer TEXT NOT NULL
            )",
            [],
        )
        .context("failed to create kv table")?;
        Ok(Self {
            conn,
            path: None,
            instance_id: uuid::Uuid::new_v4().to_string(),
            bus: ChangeBus::new(),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn bus(&self) -> &ChangeBus {
        &self.bus
    }

    /// Raw value for `key`. A stored `null` (removed key) reads as `None`;
    /// text that is not JSON is logged and also reads as `None`.
    pub fn get_json(&self, key: &str) -> anyhow::Result<Option<Value>> {
        let raw: Option<String> = self
            .conn
            .query_row("SELECT v FROM kv WHERE k = ?", [key], |r| r.get(0))
            .optional()
            .with_context(|| format!("failed to read cache key {}", key))?;
        let Some(raw) = raw else {
            return Ok(None);
        };
        match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Null) => Ok(None),
            Ok(v) => Ok(Some(v)),
            Err(e) => {
                tracing::warn!(key, error = %e, "cache value is not valid JSON; using default");
                Ok(None)
            }
        }
    }

    pub fn set_json(&self, key: &str, value: &Value) -> anyhow::Result<i64> {
        let text = serde_json::to_string(value).context("failed to serialize cache value")?;
        let revision: i64 = self
            .conn
            .query_row(
                "INSERT INTO kv(k, v, revision, writer) VALUES(?, ?, 1, ?)
                 ON CONFLICT(k) DO UPDATE SET
                   v = excluded.v,
                   revision = kv.revision + 1,
                   writer = excluded.writer
                 RETURNING revision",
                (key, &text, &self.instance_id),
                |r| r.get(0),
            )
            .with_context(|| format!("failed to write cache key {}", key))?;
        self.bus.publish(ChangeEvent {
            key: key.to_string(),
            revision,
            origin: self.instance_id.clone(),
        });
        Ok(revision)
    }

    pub fn remove(&self, key: &str) -> anyhow::Result<i64> {
        self.set_json(key, &Value::Null)
    }

    pub fn revision(&self, key: &str) -> anyhow::Result<i64> {
        let rev: Option<i64> = self
            .conn
            .query_row("SELECT revision FROM kv WHERE k = ?", [key], |r| r.get(0))
            .optional()?;
        Ok(rev.unwrap_or(0))
    }

    /// `(key, revision, writer)` for every stored key.
    pub fn revisions(&self) -> anyhow::Result<Vec<(String, i64, String)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT k, revision, writer FROM kv ORDER BY k")?;
        let rows = stmt
            .query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Typed read that falls back to `T::default()` when the key is missing or
    /// holds a value of the wrong shape.
    pub fn get_or_default<T>(&self, key: &str) -> anyhow::Result<T>
    where
        T: DeserializeOwned + Default,
    {
        let Some(v) = self.get_json(key)? else {
            return Ok(T::default());
        };
        match serde_json::from_value(v) {
            Ok(t) => Ok(t),
            Err(e) => {
                tracing::warn!(key, error = %e, "malformed cache value; using default");
                Ok(T::default())
            }
        }
    }

    pub fn put<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> anyhow::Result<i64> {
        let v = serde_json::to_value(value).context("failed to serialize cache value")?;
        self.set_json(key, &v)
    }

    /// Student list. Individual malformed entries are dropped rather than
    /// discarding the whole list.
    pub fn students(&self) -> anyhow::Result<Vec<StudentRecord>> {
        let Some(v) = self.get_json(keys::STUDENTS)? else {
            return Ok(Vec::new());
        };
        let Value::Array(items) = v else {
            tracing::warn!("cached students is not an array; using empty list");
            return Ok(Vec::new());
        };
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            match serde_json::from_value::<StudentRecord>(item) {
                Ok(s) => out.push(s),
                Err(e) => tracing::warn!(error = %e, "skipping malformed cached student"),
            }
        }
        Ok(out)
    }

    pub fn set_students(&self, students: &[StudentRecord]) -> anyhow::Result<i64> {
        self.put(keys::STUDENTS, students)
    }

    pub fn tombstones(&self) -> anyhow::Result<Tombstones> {
        let Some(Value::Array(items)) = self.get_json(keys::DELETED_STUDENT_IDS)? else {
            return Ok(Tombstones::default());
        };
        let mut t = Tombstones::default();
        for item in items {
            match item {
                Value::String(s) => t.insert(s),
                other => match parse_id(&other) {
                    Some(id) => t.insert(id.to_string()),
                    None => tracing::warn!(value = %other, "ignoring malformed tombstone"),
                },
            }
        }
        Ok(t)
    }

    pub fn set_tombstones(&self, t: &Tombstones) -> anyhow::Result<i64> {
        self.put(keys::DELETED_STUDENT_IDS, t.as_slice())
    }

    /// Stored as a decimal string. Anything unparseable reads as the default.
    pub fn id_counter(&self) -> anyhow::Result<i64> {
        let v = self.get_json(keys::STUDENT_ID_COUNTER)?;
        // A saturated counter sits one above the largest accepted id.
        let saturated = |v: &Value| {
            let n = v.as_i64().or_else(|| v.as_str()?.trim().parse::<i64>().ok());
            n.filter(|n| *n == i64::MAX)
        };
        Ok(v.as_ref()
            .and_then(|v| parse_id(v).or_else(|| saturated(v)))
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_ID_COUNTER))
    }

    /// Writes `candidate` only when it is larger than the stored counter.
    /// Returns the counter value in effect afterwards.
    pub fn advance_id_counter(&self, candidate: i64) -> anyhow::Result<i64> {
        let current = self.id_counter()?;
        if candidate > current {
            self.set_json(
                keys::STUDENT_ID_COUNTER,
                &Value::String(candidate.to_string()),
            )?;
            return Ok(candidate);
        }
        Ok(current)
    }

    pub fn current_student(&self) -> anyhow::Result<Option<StudentRecord>> {
        let Some(v) = self.get_json(keys::CURRENT_STUDENT)? else {
            return Ok(None);
        };
        match serde_json::from_value(v) {
            Ok(s) => Ok(Some(s)),
            Err(e) => {
                tracing::warn!(error = %e, "malformed session record; treating as logged out");
                Ok(None)
            }
        }
    }

    pub fn current_student_id(&self) -> anyhow::Result<Option<StudentId>> {
        Ok(self.current_student()?.map(|s| s.id))
    }

    pub fn flag(&self, key: &str) -> anyhow::Result<bool> {
        Ok(matches!(self.get_json(key)?, Some(Value::Bool(true))))
    }

    pub fn set_flag(&self, key: &str, on: bool) -> anyhow::Result<i64> {
        if on {
            self.set_json(key, &Value::Bool(true))
        } else {
            self.remove(key)
        }
    }
}
