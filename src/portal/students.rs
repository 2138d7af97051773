use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::Serialize;

use super::{today, InFlight, Portal, PortalError, PortalResult, Saved};
use crate::cache::{keys, LocalCache};
use crate::directory::DirectoryError;
use crate::model::{StudentId, StudentProfile, StudentRecord, MAX_ID};
use crate::reconcile::{next_counter, overlay};
use crate::validate::{validate_profile, MIN_PASSWORD_LEN};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

pub fn generate_password() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect()
}

pub fn generate_credentials(name: &str) -> Credentials {
    let base: String = name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect();
    let suffix: u32 = rand::thread_rng().gen_range(100..1000);
    Credentials {
        username: format!("{}{}", base, suffix),
        password: generate_password(),
    }
}

fn upsert(list: &mut Vec<StudentRecord>, record: StudentRecord) {
    match list.iter_mut().find(|s| s.id == record.id) {
        Some(existing) => *existing = record,
        None => list.push(record),
    }
}

/// Rewrites the session copy when it belongs to `record`.
fn follow_session(cache: &LocalCache, record: &StudentRecord) -> anyhow::Result<()> {
    if cache.current_student_id()? == Some(record.id) {
        cache.put(keys::CURRENT_STUDENT, record)?;
    }
    Ok(())
}

impl Portal {
    pub fn students(&self) -> PortalResult<Vec<StudentRecord>> {
        Ok(self.cache.students()?)
    }

    pub fn student(&self, id: StudentId) -> PortalResult<StudentRecord> {
        self.cache
            .students()?
            .into_iter()
            .find(|s| s.id == id)
            .ok_or_else(|| PortalError::NotFound(format!("student {} not found", id)))
    }

    /// Creates a student. The directory assigns the id when reachable;
    /// otherwise the record is stored locally under the next counter value.
    /// A second call while one is running fails with `Busy`.
    pub fn create_student(&self, profile: StudentProfile) -> PortalResult<Saved<StudentRecord>> {
        let _guard = InFlight::acquire(&self.creating)?;
        let mut profile = profile.trimmed();
        profile.status = None;
        validate_profile(&profile, &self.cache.students()?, None).map_err(PortalError::Validation)?;

        let created_at = today();
        let saved = self.durable_student_write(
            "Student",
            |d| d.create_student(&profile),
            |cache, id| {
                let mut tombstones = cache.tombstones()?;
                if tombstones.remove_id(id) {
                    tracing::info!(id, "server reused a deleted id; lifting tombstone");
                    cache.set_tombstones(&tombstones)?;
                }
                let record = StudentRecord::new(id, &profile, created_at.clone());
                let mut list = cache.students()?;
                upsert(&mut list, record.clone());
                cache.set_students(&list)?;
                Ok(record)
            },
            |cache| {
                let mut list = cache.students()?;
                let id = cache.id_counter()?.max(next_counter(&list));
                if id > MAX_ID {
                    return Err(PortalError::Validation(
                        "No student ids left; remove unused records first".to_string(),
                    ));
                }
                let record = StudentRecord::new(id, &profile, created_at.clone());
                list.push(record.clone());
                cache.set_students(&list)?;
                cache.advance_id_counter(id.saturating_add(1))?;
                Ok(record)
            },
        )?;

        let id = saved.value.id;
        let value = self
            .cache
            .students()?
            .into_iter()
            .find(|s| s.id == id)
            .unwrap_or(saved.value);
        tracing::info!(id, path = ?saved.path, "student created");
        Ok(Saved {
            value,
            path: saved.path,
        })
    }

    /// Updates profile fields. The session copy follows when it is the same
    /// student.
    pub fn update_student(
        &self,
        id: StudentId,
        profile: StudentProfile,
    ) -> PortalResult<Saved<StudentRecord>> {
        let mut profile = profile.trimmed();
        let students = self.cache.students()?;
        let Some(existing) = students.iter().find(|s| s.id == id).cloned() else {
            return Err(PortalError::NotFound(format!("student {} not found", id)));
        };
        if profile.status.is_none() {
            profile.status = Some(existing.status);
        }
        validate_profile(&profile, &students, Some(id)).map_err(PortalError::Validation)?;

        let saved = self.durable_student_write(
            "Student",
            |d| d.update_student(id, &profile),
            |cache, server: StudentRecord| {
                let mut list = cache.students()?;
                let local = list.iter().find(|s| s.id == id).cloned().unwrap_or_else(|| existing.clone());
                let merged = overlay(server, &local);
                upsert(&mut list, merged.clone());
                cache.set_students(&list)?;
                follow_session(cache, &merged)?;
                Ok(merged)
            },
            |cache| {
                let mut list = cache.students()?;
                let Some(s) = list.iter_mut().find(|s| s.id == id) else {
                    return Err(PortalError::NotFound(format!("student {} not found", id)));
                };
                s.apply_profile(&profile);
                let updated = s.clone();
                cache.set_students(&list)?;
                follow_session(cache, &updated)?;
                Ok(updated)
            },
        )?;
        tracing::info!(id, path = ?saved.path, "student updated");
        Ok(saved)
    }

    /// Removes the student locally and remembers the id as deleted, whether
    /// or not the directory accepted the delete. A directory 404 is ignored.
    pub fn delete_student(&self, id: StudentId) -> PortalResult<Saved<()>> {
        let apply = |cache: &LocalCache| -> PortalResult<()> {
            let mut list = cache.students()?;
            let before = list.len();
            list.retain(|s| s.id != id);
            if list.len() != before {
                cache.set_students(&list)?;
            }
            let mut tombstones = cache.tombstones()?;
            tombstones.insert_id(id);
            cache.set_tombstones(&tombstones)?;
            if cache.current_student_id()? == Some(id) {
                cache.remove(keys::CURRENT_STUDENT)?;
            }
            Ok(())
        };
        let saved = self.durable_student_write(
            "Student deletion",
            |d| match d.delete_student(id) {
                Err(DirectoryError::NotFound) => {
                    tracing::debug!(id, "directory has no such student; treating delete as done");
                    Ok(())
                }
                other => other,
            },
            |cache, ()| apply(cache),
            |cache| apply(cache),
        )?;
        tracing::info!(id, path = ?saved.path, "student deleted");
        Ok(saved)
    }

    /// Sets a new password, generating one when none is given.
    pub fn reset_password(
        &self,
        id: StudentId,
        password: Option<String>,
    ) -> PortalResult<Saved<StudentRecord>> {
        let password = password.unwrap_or_else(generate_password);
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(PortalError::Validation(format!(
                "Password must be at least {} characters long",
                MIN_PASSWORD_LEN
            )));
        }
        let mut profile = self.student(id)?.profile();
        profile.password = password;
        self.update_student(id, profile)
    }

    /// Lifts a tombstone so the directory's copy may reappear on the next sync.
    pub fn untombstone(&self, id: StudentId) -> PortalResult<bool> {
        let mut tombstones = self.cache.tombstones()?;
        let removed = tombstones.remove_id(id);
        if removed {
            self.cache.set_tombstones(&tombstones)?;
        }
        Ok(removed)
    }
}
