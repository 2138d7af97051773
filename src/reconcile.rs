//! Merging the Remote Student Directory's snapshot into the local cache.
//!
//! The server is authoritative for profile fields. The cache is authoritative
//! for `attendance`, `testResults` and `lastLogin`, which never leave the
//! client. Ids deleted locally are remembered as tombstones so a stale server
//! copy cannot bring them back.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::cache::LocalCache;
use crate::directory::StudentDirectory;
use crate::model::{StudentId, StudentRecord};

/// Locally deleted student ids, stored as strings in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tombstones(Vec<String>);

impl Tombstones {
    pub fn insert(&mut self, key: String) {
        if !self.0.contains(&key) {
            self.0.push(key);
        }
    }

    pub fn insert_id(&mut self, id: StudentId) {
        self.insert(id.to_string());
    }

    /// Returns true when the id was present.
    pub fn remove_id(&mut self, id: StudentId) -> bool {
        let key = id.to_string();
        let before = self.0.len();
        self.0.retain(|k| *k != key);
        self.0.len() != before
    }

    pub fn contains(&self, id: StudentId) -> bool {
        let key = id.to_string();
        self.0.iter().any(|k| *k == key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }
}

impl<S: Into<String>> FromIterator<S> for Tombstones {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut t = Tombstones::default();
        for s in iter {
            t.insert(s.into());
        }
        t
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    pub students: Vec<StudentRecord>,
    /// Remote records that had a local counterpart.
    pub merged: usize,
    pub remote_only: usize,
    pub local_only: usize,
    /// Records dropped because their id is tombstoned.
    pub suppressed: usize,
}

/// Server copy with the client-owned fields carried over from `local`.
pub fn overlay(remote: StudentRecord, local: &StudentRecord) -> StudentRecord {
    let mut out = remote;
    if !local.attendance.is_empty() {
        out.attendance = local.attendance.clone();
    }
    if !local.test_results.is_empty() {
        out.test_results = local.test_results.clone();
    }
    if local.last_login.is_some() {
        out.last_login = local.last_login.clone();
    }
    out
}

/// Remote records come first in server order, followed by local-only records
/// in cache order. A remote id that appears more than once keeps the position
/// of its first occurrence and the content of its last; the duplicate rows are
/// collapsed into one rather than emitted side by side, so the list stays keyed
/// by id and a second reconcile is a no-op.
pub fn merge_students(
    local: &[StudentRecord],
    remote: Vec<StudentRecord>,
    tombstones: &Tombstones,
) -> MergeOutcome {
    let mut local_by_id: HashMap<StudentId, &StudentRecord> = HashMap::with_capacity(local.len());
    for l in local {
        local_by_id.entry(l.id).or_insert(l);
    }

    let mut students: Vec<StudentRecord> = Vec::with_capacity(remote.len() + local.len());
    let mut position: HashMap<StudentId, usize> = HashMap::new();
    let mut merged = 0;
    let mut remote_only = 0;
    let mut suppressed = 0;

    for r in remote {
        if tombstones.contains(r.id) {
            suppressed += 1;
            continue;
        }
        let id = r.id;
        let local_match = local_by_id.get(&id).copied();
        let record = match local_match {
            Some(l) => overlay(r, l),
            None => r,
        };
        match position.get(&id) {
            Some(&idx) => {
                tracing::debug!(id, "duplicate id in remote student list; keeping last");
                students[idx] = record;
            }
            None => {
                if local_match.is_some() {
                    merged += 1;
                } else {
                    remote_only += 1;
                }
                position.insert(id, students.len());
                students.push(record);
            }
        }
    }

    let mut local_only = 0;
    let mut emitted: HashSet<StudentId> = position.keys().copied().collect();
    for l in local {
        if emitted.contains(&l.id) {
            continue;
        }
        if tombstones.contains(l.id) {
            tracing::warn!(id = l.id, "tombstoned student still in local list; dropping");
            suppressed += 1;
            emitted.insert(l.id);
            continue;
        }
        emitted.insert(l.id);
        local_only += 1;
        students.push(l.clone());
    }

    MergeOutcome {
        students,
        merged,
        remote_only,
        local_only,
        suppressed,
    }
}

/// `max(1000, max id) + 1`, saturating at `i64::MAX`.
pub fn next_counter(students: &[StudentRecord]) -> i64 {
    students
        .iter()
        .map(|s| s.id)
        .fold(1000, i64::max)
        .saturating_add(1)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    pub students: usize,
    pub merged: usize,
    pub remote_only: usize,
    pub local_only: usize,
    pub suppressed: usize,
    pub counter: i64,
}

/// Merges `remote` into the cached list and persists the result and counter.
pub fn apply_remote(
    cache: &LocalCache,
    remote: Vec<StudentRecord>,
) -> anyhow::Result<ReconcileReport> {
    let local = cache.students()?;
    let tombstones = cache.tombstones()?;
    let outcome = merge_students(&local, remote, &tombstones);

    // An unchanged list is not rewritten so other sidecars see no change event.
    if outcome.students != local {
        cache.set_students(&outcome.students)?;
    }
    let counter = cache.advance_id_counter(next_counter(&outcome.students))?;

    let report = ReconcileReport {
        students: outcome.students.len(),
        merged: outcome.merged,
        remote_only: outcome.remote_only,
        local_only: outcome.local_only,
        suppressed: outcome.suppressed,
        counter,
    };
    tracing::info!(
        students = report.students,
        merged = report.merged,
        remote_only = report.remote_only,
        local_only = report.local_only,
        suppressed = report.suppressed,
        counter = report.counter,
        "reconciled students"
    );
    Ok(report)
}

/// Fetches the remote list and reconciles. A failed or malformed fetch leaves
/// the cache untouched and returns `None`.
pub fn refresh(
    cache: &LocalCache,
    directory: &dyn StudentDirectory,
) -> anyhow::Result<Option<ReconcileReport>> {
    match directory.list_students() {
        Ok(remote) => apply_remote(cache, remote).map(Some),
        Err(e) => {
            tracing::warn!(error = %e, "student directory unavailable; keeping cached list");
            Ok(None)
        }
    }
}
