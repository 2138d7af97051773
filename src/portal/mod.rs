//! The portal service: every mutation the admin and student dashboards can
//! make, expressed over one `LocalCache` and one `StudentDirectory`.

mod attendance;
mod content;
mod marks;
mod session;
mod students;

pub use attendance::{AttendanceMark, AttendanceSummary, AttendanceView};
pub use content::{
    default_schedule, matches_class, normalize_class_name, DaySchedule, NewAnnouncement,
    NewImportantDate, NewMaterial, PortalStats, STANDARD_CLASSES,
};
pub use marks::{grade, MarkEntry, MarksSummary, TestHeader, TestView};
pub use session::{DashboardSummary, MonthAttendance, PollOutcome, SessionView};
pub use students::{generate_credentials, generate_password, Credentials};

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use std::cell::Cell;
use tokio::sync::broadcast::{self, error::TryRecvError};

use crate::cache::LocalCache;
use crate::directory::{DirectoryError, StudentDirectory};
use crate::events::{ChangeEvent, RevisionWatcher};
use crate::model::StudentRecord;
use crate::reconcile::{self, ReconcileReport};

#[derive(Debug, thiserror::Error)]
pub enum PortalError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("invalid credentials")]
    Unauthorized,
    #[error("a submission is already in progress")]
    Busy,
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

pub type PortalResult<T> = Result<T, PortalError>;

/// Which side of a durable write took effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum WritePath {
    Remote,
    Local,
}

impl WritePath {
    pub fn message(self, what: &str) -> String {
        match self {
            Self::Remote => format!("{} saved successfully", what),
            Self::Local => format!("{} saved locally", what),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Saved<T> {
    pub value: T,
    pub path: WritePath,
}

pub(crate) fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn today() -> String {
    Utc::now().date_naive().format("%Y-%m-%d").to_string()
}

/// Clears the in-flight flag when the submission finishes, however it ends.
struct InFlight<'a>(&'a Cell<bool>);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a Cell<bool>) -> PortalResult<Self> {
        if flag.replace(true) {
            return Err(PortalError::Busy);
        }
        Ok(Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

pub struct Portal {
    cache: LocalCache,
    directory: Box<dyn StudentDirectory>,
    creating: Cell<bool>,
    watcher: RevisionWatcher,
    own_writes: broadcast::Receiver<ChangeEvent>,
}

impl Portal {
    pub fn new(cache: LocalCache, directory: Box<dyn StudentDirectory>) -> anyhow::Result<Self> {
        let mut watcher = RevisionWatcher::new();
        for (key, revision, _) in cache.revisions()? {
            watcher.mark_seen(&key, revision);
        }
        let own_writes = cache.bus().subscribe();
        let portal = Self {
            cache,
            directory,
            creating: Cell::new(false),
            watcher,
            own_writes,
        };
        portal.ensure_defaults()?;
        Ok(portal)
    }

    pub fn cache(&self) -> &LocalCache {
        &self.cache
    }

    pub fn directory(&self) -> &dyn StudentDirectory {
        self.directory.as_ref()
    }

    /// Attempts `remote`; if it fails for any reason runs `local` instead.
    /// Neither branch is retried.
    pub(crate) fn durable<R, T>(
        &self,
        what: &str,
        remote: impl FnOnce(&dyn StudentDirectory) -> Result<R, DirectoryError>,
        on_remote: impl FnOnce(&LocalCache, R) -> PortalResult<T>,
        local: impl FnOnce(&LocalCache) -> PortalResult<T>,
    ) -> PortalResult<Saved<T>> {
        match remote(self.directory.as_ref()) {
            Ok(r) => Ok(Saved {
                value: on_remote(&self.cache, r)?,
                path: WritePath::Remote,
            }),
            Err(e) => {
                if e.is_unavailable() {
                    tracing::warn!(what, error = %e, "directory write failed; saving locally");
                } else {
                    tracing::info!(what, error = %e, "directory rejected write; applying locally");
                }
                Ok(Saved {
                    value: local(&self.cache)?,
                    path: WritePath::Local,
                })
            }
        }
    }

    /// The student-list form of `durable`: whichever path ran, finish by
    /// reconciling against the directory and re-syncing the session copy.
    pub(crate) fn durable_student_write<R, T>(
        &self,
        what: &str,
        remote: impl FnOnce(&dyn StudentDirectory) -> Result<R, DirectoryError>,
        on_remote: impl FnOnce(&LocalCache, R) -> PortalResult<T>,
        local: impl FnOnce(&LocalCache) -> PortalResult<T>,
    ) -> PortalResult<Saved<T>> {
        let saved = self.durable(what, remote, on_remote, local)?;
        self.sync_students()?;
        Ok(saved)
    }

    /// Fetch and reconcile. `None` when the directory could not be read.
    pub fn sync_students(&self) -> PortalResult<Option<ReconcileReport>> {
        let report = reconcile::refresh(&self.cache, self.directory.as_ref())?;
        self.sync_session()?;
        Ok(report)
    }

    /// Overwrites the session copy with the student list's version of the same
    /// record when they differ. Returns the session record in effect.
    pub(crate) fn sync_session(&self) -> PortalResult<Option<StudentRecord>> {
        let Some(current) = self.cache.current_student()? else {
            return Ok(None);
        };
        let students = self.cache.students()?;
        match students.into_iter().find(|s| s.id == current.id) {
            Some(updated) if updated != current => {
                self.cache
                    .put(crate::cache::keys::CURRENT_STUDENT, &updated)?;
                tracing::debug!(id = updated.id, "session record refreshed from student list");
                Ok(Some(updated))
            }
            _ => Ok(Some(current)),
        }
    }

    /// Marks every revision this portal wrote since the last call as seen,
    /// so the watcher only ever advances past it. Returns how many were drained.
    pub(crate) fn drain_own_writes(&mut self) -> usize {
        let mut drained = 0;
        loop {
            match self.own_writes.try_recv() {
                Ok(ev) => {
                    self.watcher.mark_seen(&ev.key, ev.revision);
                    drained += 1;
                }
                Err(TryRecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "change bus lagged; relying on writer ids");
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }
        drained
    }

    pub(crate) fn watcher_mut(&mut self) -> &mut RevisionWatcher {
        &mut self.watcher
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::directory::fake::{OfflineDirectory, ScriptedDirectory};
    use std::rc::Rc;

    /// Lets a test keep a handle on the scripted directory the portal owns.
    pub struct Shared(pub Rc<ScriptedDirectory>);

    impl StudentDirectory for Shared {
        fn call(
            &self,
            method: reqwest::Method,
            path: &str,
            body: Option<&serde_json::Value>,
        ) -> Result<serde_json::Value, DirectoryError> {
            self.0.call(method, path, body)
        }
    }

    pub fn offline_portal() -> Portal {
        let cache = LocalCache::open_in_memory().expect("cache");
        Portal::new(cache, Box::new(OfflineDirectory)).expect("portal")
    }

    pub fn scripted_portal() -> (Portal, Rc<ScriptedDirectory>) {
        let dir = Rc::new(ScriptedDirectory::new());
        let cache = LocalCache::open_in_memory().expect("cache");
        let portal = Portal::new(cache, Box::new(Shared(dir.clone()))).expect("portal");
        (portal, dir)
    }

    pub fn student(v: serde_json::Value) -> StudentRecord {
        serde_json::from_value(v).expect("student json")
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use serde_json::json;

    #[test]
    fn in_flight_guard_rejects_reentry_and_releases() {
        let flag = Cell::new(false);
        {
            let _g = InFlight::acquire(&flag).expect("first");
            assert!(matches!(InFlight::acquire(&flag), Err(PortalError::Busy)));
        }
        assert!(!flag.get());
        assert!(InFlight::acquire(&flag).is_ok());
    }

    #[test]
    fn durable_falls_back_once_when_remote_fails() {
        let portal = offline_portal();
        let saved = portal
            .durable(
                "thing",
                |d| d.list_students().map(|_| ()),
                |_, _| Ok("remote"),
                |_| Ok("local"),
            )
            .expect("write");
        assert_eq!(saved.value, "local");
        assert_eq!(saved.path, WritePath::Local);
        assert_eq!(saved.path.message("Student"), "Student saved locally");
    }

    #[test]
    fn session_copy_follows_the_student_list() {
        let portal = offline_portal();
        let cache = portal.cache();
        cache
            .set_students(&[student(json!({ "id": 1001, "name": "New name" }))])
            .expect("students");
        cache
            .put(
                crate::cache::keys::CURRENT_STUDENT,
                &student(json!({ "id": 1001, "name": "Old name" })),
            )
            .expect("session");
        let s = portal.sync_session().expect("sync").expect("session");
        assert_eq!(s.name, "New name");
        assert_eq!(
            cache.current_student().expect("read").expect("some").name,
            "New name"
        );
    }
}
