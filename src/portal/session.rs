use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

use super::{now_iso, Portal, PortalError, PortalResult};
use crate::cache::keys;
use crate::directory::DirectoryError;
use crate::model::{
    percentage, AttendanceStatus, ImpersonationLogEntry, StudentId, StudentRecord,
};
use crate::validate::parse_month;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub current_student: Option<StudentRecord>,
    pub impersonating: bool,
    pub login_reason: Option<String>,
    pub admin_logged_in: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthAttendance {
    pub month: String,
    pub present: i64,
    pub total: i64,
    pub percentage: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSummary {
    pub student_id: StudentId,
    pub month: String,
    pub attendance_percentage: i64,
    pub present_days: i64,
    pub total_days: i64,
    pub total_tests: usize,
    pub test_average: i64,
    /// Up to six months, newest first.
    pub monthly: Vec<MonthAttendance>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollOutcome {
    /// Keys written by another process since the last poll.
    pub changed: Vec<String>,
    pub session_ended: bool,
    pub current_student: Option<StudentRecord>,
}

fn summarize(student: &StudentRecord, month: &str) -> DashboardSummary {
    let in_month: Vec<_> = student
        .attendance
        .iter()
        .filter(|a| a.date.get(..7) == Some(month))
        .collect();
    let total_days = in_month.len() as i64;
    let present_days = in_month
        .iter()
        .filter(|a| a.status == AttendanceStatus::Present)
        .count() as i64;

    let marks: i64 = student.test_results.iter().map(|t| t.marks).sum();
    let possible: i64 = student.test_results.iter().map(|t| t.total_marks).sum();

    let mut by_month: BTreeMap<String, (i64, i64)> = BTreeMap::new();
    for a in &student.attendance {
        let Some(key) = a.date.get(..7) else {
            continue;
        };
        let e = by_month.entry(key.to_string()).or_default();
        e.1 += 1;
        if a.status == AttendanceStatus::Present {
            e.0 += 1;
        }
    }
    let monthly = by_month
        .into_iter()
        .rev()
        .take(6)
        .map(|(month, (present, total))| MonthAttendance {
            month,
            present,
            total,
            percentage: percentage(present, total),
        })
        .collect();

    DashboardSummary {
        student_id: student.id,
        month: month.to_string(),
        attendance_percentage: percentage(present_days, total_days),
        present_days,
        total_days,
        total_tests: student.test_results.len(),
        test_average: percentage(marks, possible),
        monthly,
    }
}

impl Portal {
    /// No local fallback: any failure is reported as bad credentials.
    pub fn admin_login(&self, username: &str, password: &str) -> PortalResult<Value> {
        match self.directory.login_admin(username, password) {
            Ok(v) => {
                self.cache.set_flag(keys::ADMIN_LOGGED_IN, true)?;
                tracing::info!(username, "admin logged in");
                Ok(v)
            }
            Err(e) => {
                tracing::warn!(username, error = %e, "admin login failed");
                Err(PortalError::Unauthorized)
            }
        }
    }

    fn start_session(&self, mut list: Vec<StudentRecord>, idx: usize) -> PortalResult<StudentRecord> {
        list[idx].last_login = Some(now_iso());
        let record = list[idx].clone();
        self.cache.set_students(&list)?;
        self.cache.put(keys::CURRENT_STUDENT, &record)?;
        Ok(record)
    }

    /// Directory first. When the directory cannot be reached the cached
    /// credentials are checked instead; a 401 is final.
    pub fn student_login(&self, username: &str, password: &str) -> PortalResult<StudentRecord> {
        let list = self.cache.students()?;
        match self.directory.login_student(username, password) {
            Ok(identity) => {
                let idx = list
                    .iter()
                    .position(|s| s.id == identity.id || s.username == identity.username);
                match idx {
                    Some(idx) => self.start_session(list, idx),
                    None => {
                        let minimal: StudentRecord = serde_json::from_value(serde_json::json!({
                            "id": identity.id,
                            "username": identity.username,
                            "name": identity.name,
                        }))
                        .map_err(anyhow::Error::from)?;
                        self.cache.put(keys::CURRENT_STUDENT, &minimal)?;
                        Ok(minimal)
                    }
                }
            }
            Err(DirectoryError::Unauthorized) => Err(PortalError::Unauthorized),
            Err(e) => {
                tracing::warn!(error = %e, "directory login failed; checking cached credentials");
                let idx = list
                    .iter()
                    .position(|s| s.username == username && s.password == password)
                    .ok_or(PortalError::Unauthorized)?;
                self.start_session(list, idx)
            }
        }
    }

    /// Admin "login as student".
    pub fn impersonate(&self, id: StudentId, reason: Option<&str>) -> PortalResult<StudentRecord> {
        let list = self.cache.students()?;
        let idx = list
            .iter()
            .position(|s| s.id == id)
            .ok_or_else(|| PortalError::NotFound("Student not found".to_string()))?;
        let record = self.start_session(list, idx)?;
        self.cache.set_flag(keys::ADMIN_IMPERSONATING, true)?;
        match reason.filter(|r| !r.is_empty()) {
            Some(r) => self.cache.put(keys::ADMIN_LOGIN_REASON, r)?,
            None => self.cache.remove(keys::ADMIN_LOGIN_REASON)?,
        };
        tracing::info!(id, "admin impersonating student");
        Ok(record)
    }

    pub fn end_impersonation(&self) -> PortalResult<ImpersonationLogEntry> {
        let entry = ImpersonationLogEntry {
            id: uuid::Uuid::new_v4().to_string(),
            action: "end_impersonation".to_string(),
            time: now_iso(),
            student_id: self.cache.current_student_id()?,
            note: "Returned to admin via UI".to_string(),
        };
        let mut log: Vec<ImpersonationLogEntry> =
            self.cache.get_or_default(keys::ADMIN_IMPERSONATION_LOG)?;
        log.push(entry.clone());
        self.cache.put(keys::ADMIN_IMPERSONATION_LOG, &log)?;
        self.cache.remove(keys::ADMIN_IMPERSONATING)?;
        self.cache.remove(keys::ADMIN_LOGIN_REASON)?;
        self.cache.remove(keys::CURRENT_STUDENT)?;
        Ok(entry)
    }

    pub fn current_session(&self) -> PortalResult<SessionView> {
        let current_student = self.sync_session()?;
        let login_reason = match self.cache.get_json(keys::ADMIN_LOGIN_REASON)? {
            Some(Value::String(s)) => Some(s),
            _ => None,
        };
        Ok(SessionView {
            current_student,
            impersonating: self.cache.flag(keys::ADMIN_IMPERSONATING)?,
            login_reason,
            admin_logged_in: self.cache.flag(keys::ADMIN_LOGGED_IN)?,
        })
    }

    /// Student logout. While impersonating only the impersonation markers go;
    /// otherwise the session record is removed.
    pub fn logout_student(&self) -> PortalResult<()> {
        if self.cache.flag(keys::ADMIN_IMPERSONATING)? {
            self.cache.remove(keys::ADMIN_IMPERSONATING)?;
            self.cache.remove(keys::ADMIN_LOGIN_REASON)?;
        } else {
            self.cache.remove(keys::CURRENT_STUDENT)?;
        }
        Ok(())
    }

    pub fn logout_admin(&self) -> PortalResult<()> {
        self.cache.remove(keys::ADMIN_LOGGED_IN)?;
        Ok(())
    }

    /// Summary for the logged-in student. `month` is `YYYY-MM`, defaulting to
    /// the current month.
    pub fn dashboard(&self, month: Option<&str>) -> PortalResult<DashboardSummary> {
        let month = match month {
            Some(m) => {
                let (y, mo) = parse_month(m).map_err(PortalError::Validation)?;
                format!("{:04}-{:02}", y, mo)
            }
            None => Utc::now().format("%Y-%m").to_string(),
        };
        let student = self
            .sync_session()?
            .ok_or_else(|| PortalError::NotFound("no student is logged in".to_string()))?;
        Ok(summarize(&student, &month))
    }

    /// Cross-process change check: reports keys other sidecars wrote since the
    /// last poll and re-syncs the session copy when the student list moved.
    pub fn poll_events(&mut self) -> PortalResult<PollOutcome> {
        self.drain_own_writes();
        let current = self.cache.revisions()?;
        let self_id = self.cache.instance_id().to_string();
        let changes = self.watcher_mut().observe(current, &self_id);
        let changed: Vec<String> = changes.into_iter().map(|c| c.key).collect();

        let mut session_ended = false;
        let mut current_student = self.cache.current_student()?;
        if changed.iter().any(|k| k == keys::CURRENT_STUDENT) && current_student.is_none() {
            session_ended = true;
        }
        if changed.iter().any(|k| k == keys::STUDENTS) && current_student.is_some() {
            current_student = self.sync_session()?;
        }
        if !changed.is_empty() {
            tracing::debug!(?changed, session_ended, "external cache changes");
        }
        Ok(PollOutcome {
            changed,
            session_ended,
            current_student,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::cache::LocalCache;
    use crate::directory::fake::OfflineDirectory;
    use serde_json::json;

    fn seeded_offline() -> Portal {
        let portal = offline_portal();
        portal
            .cache()
            .set_students(&[student(json!({
                "id": 1001, "name": "Rahul", "class": "10th",
                "username": "rahul2024", "password": "rahul123"
            }))])
            .expect("seed");
        portal
    }

    #[test]
    fn offline_login_checks_cache_and_stamps_last_login() {
        let portal = seeded_offline();
        let s = portal.student_login("rahul2024", "rahul123").expect("login");
        assert!(s.last_login.is_some());
        assert_eq!(portal.student(1001).expect("s").last_login, s.last_login);
        assert_eq!(portal.cache().current_student_id().expect("id"), Some(1001));

        assert!(matches!(
            portal.student_login("rahul2024", "nope"),
            Err(PortalError::Unauthorized)
        ));
    }

    #[test]
    fn server_401_is_final() {
        let (portal, dir) = scripted_portal();
        portal
            .cache()
            .set_students(&[student(json!({ "id": 1001, "username": "u", "password": "secret1" }))])
            .expect("seed");
        dir.reply("POST /api/students/login", Err(DirectoryError::Unauthorized));
        assert!(matches!(
            portal.student_login("u", "secret1"),
            Err(PortalError::Unauthorized)
        ));
        assert!(portal.cache().current_student().expect("s").is_none());
    }

    #[test]
    fn server_login_without_cached_record_stores_identity() {
        let (portal, dir) = scripted_portal();
        dir.reply(
            "POST /api/students/login",
            Ok(json!({ "id": 1009, "username": "neha", "name": "Neha" })),
        );
        let s = portal.student_login("neha", "whatever").expect("login");
        assert_eq!(s.id, 1009);
        assert_eq!(s.name, "Neha");
        assert!(s.attendance.is_empty());
    }

    #[test]
    fn admin_login_has_no_local_fallback() {
        let portal = offline_portal();
        assert!(matches!(
            portal.admin_login("admin", "admin123"),
            Err(PortalError::Unauthorized)
        ));
        assert!(!portal.cache().flag(keys::ADMIN_LOGGED_IN).expect("flag"));
    }

    #[test]
    fn impersonation_round_trip_writes_audit_entry() {
        let portal = seeded_offline();
        portal.impersonate(1001, Some("checking marks")).expect("impersonate");
        let view = portal.current_session().expect("view");
        assert!(view.impersonating);
        assert_eq!(view.login_reason.as_deref(), Some("checking marks"));

        let entry = portal.end_impersonation().expect("end");
        assert_eq!(entry.student_id, Some(1001));
        let view = portal.current_session().expect("view");
        assert!(!view.impersonating);
        assert!(view.current_student.is_none());
        let log: Vec<ImpersonationLogEntry> = portal
            .cache()
            .get_or_default(keys::ADMIN_IMPERSONATION_LOG)
            .expect("log");
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].action, "end_impersonation");
    }

    #[test]
    fn logout_while_impersonating_keeps_the_student_record() {
        let portal = seeded_offline();
        portal.impersonate(1001, None).expect("impersonate");
        portal.logout_student().expect("logout");
        assert!(portal.cache().current_student().expect("s").is_some());
        portal.logout_student().expect("logout");
        assert!(portal.cache().current_student().expect("s").is_none());
    }

    #[test]
    fn dashboard_summarizes_month_and_tests() {
        let portal = offline_portal();
        let s = student(json!({
            "id": 1, "name": "A",
            "attendance": [
                { "date": "2025-03-01", "status": "Present" },
                { "date": "2025-03-02", "status": "Absent" },
                { "date": "2025-03-03", "status": "Present" },
                { "date": "2025-02-10", "status": "Present" }
            ],
            "testResults": [
                { "testName": "T1", "subject": "M", "date": "2025-03-01", "marks": 40, "totalMarks": 50, "percentage": 80 },
                { "testName": "T2", "subject": "M", "date": "2025-03-05", "marks": 15, "totalMarks": 25, "percentage": 60 }
            ]
        }));
        portal.cache().set_students(&[s.clone()]).expect("seed");
        portal.cache().put(keys::CURRENT_STUDENT, &s).expect("session");
        let d = portal.dashboard(Some("2025-03")).expect("dashboard");
        assert_eq!(d.total_days, 3);
        assert_eq!(d.present_days, 2);
        assert_eq!(d.attendance_percentage, 67);
        assert_eq!(d.test_average, 73);
        assert_eq!(d.monthly.len(), 2);
        assert_eq!(d.monthly[0].month, "2025-03");
    }

    #[test]
    fn dashboard_without_session_is_not_found() {
        let portal = offline_portal();
        assert!(matches!(portal.dashboard(None), Err(PortalError::NotFound(_))));
    }

    fn shared_workspace(prefix: &str) -> std::path::PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time")
            .as_nanos();
        std::env::temp_dir().join(format!("{}-{}", prefix, nanos))
    }

    fn open_offline(workspace: &std::path::Path) -> Portal {
        let cache = LocalCache::open(workspace).expect("cache");
        Portal::new(cache, Box::new(OfflineDirectory)).expect("portal")
    }

    #[test]
    fn own_writes_are_drained_and_never_reported() {
        let mut portal = seeded_offline();
        assert_eq!(portal.cache().bus().subscriber_count(), 1);
        portal.impersonate(1001, Some("check")).expect("impersonate");
        let outcome = portal.poll_events().expect("poll");
        assert!(outcome.changed.is_empty());
        assert!(!outcome.session_ended);
        assert_eq!(portal.drain_own_writes(), 0);
    }

    #[test]
    fn lagging_behind_the_bus_still_polls_cleanly() {
        let mut portal = seeded_offline();
        for i in 0..300 {
            portal
                .cache()
                .put(keys::ADMIN_LOGIN_REASON, &format!("reason {}", i))
                .expect("put");
        }
        let outcome = portal.poll_events().expect("poll");
        assert!(outcome.changed.is_empty());
    }

    #[test]
    fn second_portal_on_the_same_file_sees_foreign_writes() {
        let workspace = shared_workspace("coachd-poll-unit");
        let writer = open_offline(&workspace);
        let mut reader = open_offline(&workspace);
        assert!(reader.poll_events().expect("poll").changed.is_empty());

        writer
            .cache()
            .set_students(&[student(json!({ "id": 1001, "username": "a", "password": "secret1" }))])
            .expect("write");
        writer.impersonate(1001, None).expect("impersonate");
        let outcome = reader.poll_events().expect("poll");
        assert!(outcome.changed.iter().any(|k| k == keys::STUDENTS));
        assert_eq!(outcome.current_student.map(|s| s.id), Some(1001));

        writer.end_impersonation().expect("end");
        let outcome = reader.poll_events().expect("poll");
        assert!(outcome.session_ended);

        drop(writer);
        drop(reader);
        let _ = std::fs::remove_dir_all(workspace);
    }
}
