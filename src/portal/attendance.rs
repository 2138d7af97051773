use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::{now_iso, Portal, PortalError, PortalResult};
use crate::cache::keys;
use crate::model::{
    percentage, AttendanceEntry, AttendanceRecord, AttendanceStatus, StudentId, StudentRecord,
};
use crate::validate::{parse_date, parse_month};

/// One student's row in an attendance batch.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceMark {
    pub student_id: StudentId,
    pub status: AttendanceStatus,
    #[serde(default)]
    pub remarks: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceSummary {
    pub updated: usize,
    /// Ids in the batch that are not students of the class.
    pub skipped: Vec<StudentId>,
    pub record: AttendanceRecord,
    pub aggregate_posted: bool,
}

/// Per (date, class) roll-up computed from the cached entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceView {
    pub date: String,
    #[serde(rename = "class")]
    pub class: String,
    pub present: i64,
    pub absent: i64,
    pub total: i64,
    pub percentage: i64,
}

fn in_month(date: &str, month: Option<&str>) -> bool {
    month.map_or(true, |m| date.get(..7) == Some(m))
}

struct Applied {
    updated: usize,
    skipped: Vec<StudentId>,
    statuses: HashMap<StudentId, AttendanceStatus>,
}

/// Replaces each marked student's entry for `date`. Later marks for the same
/// student in one batch win.
fn apply_marks(
    students: &mut [StudentRecord],
    class: &str,
    date: &str,
    marks: &[AttendanceMark],
    subject: Option<&str>,
) -> Applied {
    let marked_at = now_iso();
    let mut statuses = HashMap::new();
    let mut skipped = Vec::new();
    for mark in marks {
        let Some(student) = students
            .iter_mut()
            .find(|s| s.id == mark.student_id && s.class == class)
        else {
            skipped.push(mark.student_id);
            continue;
        };
        student.attendance.retain(|a| a.date != date);
        student.attendance.push(AttendanceEntry {
            date: date.to_string(),
            status: mark.status,
            remarks: mark.remarks.trim().to_string(),
            marked_by: Some("Admin".to_string()),
            marked_at: Some(marked_at.clone()),
            subject: subject.map(str::to_string),
        });
        statuses.insert(student.id, mark.status);
    }
    Applied {
        updated: statuses.len(),
        skipped,
        statuses,
    }
}

impl Portal {
    /// Records a class's attendance for one day, persists the whole list once,
    /// then posts the class aggregate. The post never undoes the local write.
    pub fn submit_attendance(
        &self,
        class: &str,
        date: &str,
        marks: &[AttendanceMark],
    ) -> PortalResult<AttendanceSummary> {
        if class.trim().is_empty() {
            return Err(PortalError::Validation("Please select class and date".to_string()));
        }
        parse_date(date).map_err(PortalError::Validation)?;

        let mut students = self.cache.students()?;
        let applied = apply_marks(&mut students, class, date, marks, Some("All"));
        if applied.updated > 0 {
            self.cache.set_students(&students)?;
            self.sync_session()?;
        }

        let present = applied
            .statuses
            .values()
            .filter(|s| **s == AttendanceStatus::Present)
            .count() as i64;
        let total = applied.statuses.len() as i64;
        let mut record = AttendanceRecord {
            id: None,
            date: date.to_string(),
            class: class.to_string(),
            present,
            absent: total - present,
            total,
        };
        let mut records: Vec<AttendanceRecord> = self.cache.get_or_default(keys::ATTENDANCE_RECORDS)?;
        match records
            .iter_mut()
            .find(|r| r.date == record.date && r.class == record.class)
        {
            Some(existing) => {
                record.id = existing.id;
                *existing = record.clone();
            }
            None => records.push(record.clone()),
        }
        self.cache.put(keys::ATTENDANCE_RECORDS, &records)?;

        let aggregate_posted = match self.directory.post_attendance_record(&record) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, class, date, "attendance aggregate not posted; saved locally only");
                false
            }
        };
        tracing::info!(class, date, updated = applied.updated, "attendance submitted");
        Ok(AttendanceSummary {
            updated: applied.updated,
            skipped: applied.skipped,
            record,
            aggregate_posted,
        })
    }

    /// Edits entries for an existing (date, class) without posting an aggregate.
    pub fn save_attendance_details(
        &self,
        class: &str,
        date: &str,
        marks: &[AttendanceMark],
    ) -> PortalResult<usize> {
        parse_date(date).map_err(PortalError::Validation)?;
        let mut students = self.cache.students()?;
        let applied = apply_marks(&mut students, class, date, marks, None);
        if applied.updated > 0 {
            self.cache.set_students(&students)?;
            self.sync_session()?;
        }
        Ok(applied.updated)
    }

    /// Newest first; ties keep the order the entries were first seen.
    pub fn attendance_records(
        &self,
        class: Option<&str>,
        month: Option<&str>,
    ) -> PortalResult<Vec<AttendanceView>> {
        if let Some(m) = month {
            parse_month(m).map_err(PortalError::Validation)?;
        }
        let students = self.cache.students()?;
        let mut index: HashMap<(String, String), usize> = HashMap::new();
        let mut views: Vec<AttendanceView> = Vec::new();
        for s in &students {
            if class.is_some_and(|c| c != s.class) {
                continue;
            }
            for a in &s.attendance {
                if !in_month(&a.date, month) {
                    continue;
                }
                let key = (a.date.clone(), s.class.clone());
                let idx = *index.entry(key).or_insert_with(|| {
                    views.push(AttendanceView {
                        date: a.date.clone(),
                        class: s.class.clone(),
                        present: 0,
                        absent: 0,
                        total: 0,
                        percentage: 0,
                    });
                    views.len() - 1
                });
                let v = &mut views[idx];
                v.total += 1;
                if a.status == AttendanceStatus::Present {
                    v.present += 1;
                } else {
                    v.absent += 1;
                }
            }
        }
        for v in &mut views {
            v.percentage = percentage(v.present, v.total);
        }
        views.sort_by(|a, b| b.date.cmp(&a.date));
        Ok(views)
    }
}
