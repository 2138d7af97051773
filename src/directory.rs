use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::time::Duration;

use crate::model::{
    parse_id, Announcement, AttendanceRecord, LoginIdentity, StudentId, StudentProfile,
    StudentRecord, StudyMaterial, TestRecord,
};

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("student directory unreachable: {0}")]
    Unreachable(String),
    #[error("student directory returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("not found")]
    NotFound,
    #[error("invalid credentials")]
    Unauthorized,
    #[error("unexpected response from student directory: {0}")]
    Malformed(String),
}

impl DirectoryError {
    /// Transport failures, 5xx/4xx other than 401/404, and garbage payloads.
    pub fn is_unavailable(&self) -> bool {
        !matches!(self, Self::NotFound | Self::Unauthorized)
    }
}

fn decode<T: DeserializeOwned>(v: Value, what: &str) -> Result<T, DirectoryError> {
    serde_json::from_value(v).map_err(|e| DirectoryError::Malformed(format!("{}: {}", what, e)))
}

/// Array payload whose items are decoded one by one; undecodable items are
/// skipped. A non-array payload is `Malformed`.
fn decode_list<T: DeserializeOwned>(v: Value, what: &str) -> Result<Vec<T>, DirectoryError> {
    let Value::Array(items) = v else {
        return Err(DirectoryError::Malformed(format!("{} is not an array", what)));
    };
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        match serde_json::from_value(item) {
            Ok(t) => out.push(t),
            Err(e) => tracing::warn!(error = %e, what, "skipping malformed remote item"),
        }
    }
    Ok(out)
}

fn id_of(v: &Value, what: &str) -> Result<i64, DirectoryError> {
    v.get("id")
        .and_then(parse_id)
        .ok_or_else(|| DirectoryError::Malformed(format!("{} response has no id", what)))
}

/// The Remote Student Directory. Implementors provide `call`; the typed
/// operations are built on top of it.
pub trait StudentDirectory {
    fn call(&self, method: Method, path: &str, body: Option<&Value>)
        -> Result<Value, DirectoryError>;

    fn list_students(&self) -> Result<Vec<StudentRecord>, DirectoryError> {
        let v = self.call(Method::GET, "/api/students", None)?;
        decode_list(v, "student list")
    }

    /// Returns the server-assigned id.
    fn create_student(&self, profile: &StudentProfile) -> Result<StudentId, DirectoryError> {
        let body = json!({
            "name": profile.name,
            "class": profile.class,
            "username": profile.username,
            "password": profile.password,
            "phone": profile.phone,
            "email": profile.email,
            "address": profile.address,
        });
        let v = self.call(Method::POST, "/api/students", Some(&body))?;
        id_of(&v, "create student")
    }

    fn update_student(
        &self,
        id: StudentId,
        profile: &StudentProfile,
    ) -> Result<StudentRecord, DirectoryError> {
        let mut body = serde_json::to_value(profile)
            .map_err(|e| DirectoryError::Malformed(e.to_string()))?;
        if body.get("status").is_none() {
            body["status"] = json!("Active");
        }
        let v = self.call(Method::PUT, &format!("/api/students/{}", id), Some(&body))?;
        decode(v, "updated student")
    }

    fn delete_student(&self, id: StudentId) -> Result<(), DirectoryError> {
        self.call(Method::DELETE, &format!("/api/students/{}", id), None)?;
        Ok(())
    }

    fn login_student(
        &self,
        username: &str,
        password: &str,
    ) -> Result<LoginIdentity, DirectoryError> {
        let body = json!({ "username": username, "password": password });
        let v = self.call(Method::POST, "/api/students/login", Some(&body))?;
        decode(v, "login response")
    }

    fn login_admin(&self, username: &str, password: &str) -> Result<Value, DirectoryError> {
        let body = json!({ "username": username, "password": password });
        self.call(Method::POST, "/api/admin/login", Some(&body))
    }

    fn list_announcements(&self) -> Result<Vec<Announcement>, DirectoryError> {
        let v = self.call(Method::GET, "/api/announcements", None)?;
        decode_list(v, "announcement list")
    }

    fn create_announcement(&self, a: &Announcement) -> Result<i64, DirectoryError> {
        let body = json!({
            "title": a.title,
            "content": a.content,
            "date": a.date,
            "priority": a.priority,
        });
        let v = self.call(Method::POST, "/api/announcements", Some(&body))?;
        id_of(&v, "create announcement")
    }

    fn delete_announcement(&self, id: i64) -> Result<(), DirectoryError> {
        self.call(Method::DELETE, &format!("/api/announcements/{}", id), None)?;
        Ok(())
    }

    fn list_materials(&self) -> Result<Vec<StudyMaterial>, DirectoryError> {
        let v = self.call(Method::GET, "/api/study_materials", None)?;
        decode_list(v, "study material list")
    }

    fn create_material(&self, m: &StudyMaterial) -> Result<i64, DirectoryError> {
        let body = json!({
            "title": m.title,
            "subject": m.subject,
            "class": m.class,
            "type": m.kind,
            "description": m.description,
            "fileName": m.file_name,
            "fileSize": m.file_size,
            "link": m.link,
        });
        let v = self.call(Method::POST, "/api/study_materials", Some(&body))?;
        id_of(&v, "create study material")
    }

    fn delete_material(&self, id: i64) -> Result<(), DirectoryError> {
        self.call(Method::DELETE, &format!("/api/study_materials/{}", id), None)?;
        Ok(())
    }

    fn post_attendance_record(&self, r: &AttendanceRecord) -> Result<(), DirectoryError> {
        let body = json!({
            "date": r.date,
            "class": r.class,
            "present": r.present,
            "absent": r.absent,
            "total": r.total,
        });
        self.call(Method::POST, "/api/attendance_records", Some(&body))?;
        Ok(())
    }

    fn post_test_record(&self, r: &TestRecord) -> Result<(), DirectoryError> {
        let body = json!({
            "testName": r.test_name,
            "subject": r.subject,
            "class": r.class,
            "date": r.date,
            "totalMarks": r.total_marks,
            "totalStudents": r.total_students,
            "averagePercentage": r.average_percentage,
        });
        self.call(Method::POST, "/api/test_results", Some(&body))?;
        Ok(())
    }
}

/// HTTP client for `coach-server`. Without a configured timeout a stalled
/// request blocks until the server answers or the connection drops.
pub struct HttpDirectory {
    base_url: String,
    client: reqwest::blocking::Client,
}

impl HttpDirectory {
    pub fn new(base_url: &str, timeout: Option<Duration>) -> anyhow::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("http client build failed: {e}"))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl StudentDirectory for HttpDirectory {
    fn call(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value, DirectoryError> {
        let url = format!("{}{}", self.base_url, path);
        let mut req = self.client.request(method.clone(), &url);
        if let Some(b) = body {
            req = req.json(b);
        }
        let resp = req
            .send()
            .map_err(|e| DirectoryError::Unreachable(e.to_string()))?;
        let status = resp.status().as_u16();
        let text = resp
            .text()
            .map_err(|e| DirectoryError::Unreachable(e.to_string()))?;
        tracing::debug!(%method, path, status, "directory call");
        match status {
            200..=299 => {
                if text.trim().is_empty() {
                    return Ok(Value::Null);
                }
                serde_json::from_str(&text)
                    .map_err(|e| DirectoryError::Malformed(format!("{} {}: {}", method, path, e)))
            }
            401 => Err(DirectoryError::Unauthorized),
            404 => Err(DirectoryError::NotFound),
            _ => Err(DirectoryError::Status { status, body: text }),
        }
    }
}

#[cfg(test)]
pub mod fake {
    //! Scripted directory for library tests.
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;

    #[derive(Default)]
    pub struct ScriptedDirectory {
        replies: RefCell<VecDeque<(String, Result<Value, DirectoryError>)>>,
        pub calls: RefCell<Vec<(String, Option<Value>)>>,
    }

    impl ScriptedDirectory {
        pub fn new() -> Self {
            Self::default()
        }

        /// Queue a reply for the next call whose `"METHOD /path"` starts with `route`.
        pub fn reply(&self, route: &str, result: Result<Value, DirectoryError>) -> &Self {
            self.replies
                .borrow_mut()
                .push_back((route.to_string(), result));
            self
        }

        pub fn routes_called(&self) -> Vec<String> {
            self.calls.borrow().iter().map(|(r, _)| r.clone()).collect()
        }
    }

    /// Every call is unreachable, so every mutation takes the local path.
    pub struct OfflineDirectory;

    impl StudentDirectory for OfflineDirectory {
        fn call(
            &self,
            method: Method,
            path: &str,
            _body: Option<&Value>,
        ) -> Result<Value, DirectoryError> {
            Err(DirectoryError::Unreachable(format!(
                "no directory configured for {} {}",
                method, path
            )))
        }
    }

    impl StudentDirectory for ScriptedDirectory {
        fn call(
            &self,
            method: Method,
            path: &str,
            body: Option<&Value>,
        ) -> Result<Value, DirectoryError> {
            let route = format!("{} {}", method, path);
            self.calls.borrow_mut().push((route.clone(), body.cloned()));
            let mut replies = self.replies.borrow_mut();
            let idx = replies.iter().position(|(r, _)| route.starts_with(r.as_str()));
            match idx.and_then(|i| replies.remove(i)) {
                Some((_, result)) => result,
                None => Err(DirectoryError::Unreachable(format!("unscripted {}", route))),
            }
        }
    }
}
