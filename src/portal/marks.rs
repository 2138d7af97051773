use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::{now_iso, Portal, PortalError, PortalResult};
use crate::cache::keys;
use crate::model::{percentage, StudentId, TestRecord, TestResultEntry};
use crate::validate::{parse_date, parse_month};

pub fn grade(percentage: i64) -> &'static str {
    match percentage {
        p if p >= 90 => "A+",
        p if p >= 80 => "A",
        p if p >= 70 => "B",
        p if p >= 60 => "C",
        p if p >= 50 => "D",
        p if p >= 40 => "E",
        _ => "F",
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestHeader {
    pub test_name: String,
    pub subject: String,
    pub date: String,
    pub total_marks: i64,
    #[serde(rename = "class")]
    pub class: String,
}

/// `marks: None` is a blank input and leaves the student untouched.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkEntry {
    pub student_id: StudentId,
    #[serde(default)]
    pub marks: Option<i64>,
    #[serde(default)]
    pub remarks: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarksSummary {
    pub updated: usize,
    pub skipped: Vec<StudentId>,
    pub record: TestRecord,
    pub aggregate_posted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestView {
    pub test_name: String,
    pub subject: String,
    pub date: String,
    #[serde(rename = "class")]
    pub class: String,
    pub total_marks: i64,
    pub total_students: i64,
    pub average_percentage: i64,
    pub grade: &'static str,
}

fn mean_rounded(values: &[i64]) -> i64 {
    if values.is_empty() {
        return 0;
    }
    let sum: i64 = values.iter().sum();
    (sum as f64 / values.len() as f64 + 0.5).floor() as i64
}

impl Portal {
    /// Records one test for a class. Every entered mark is range-checked
    /// before anything is written; one bad mark rejects the batch.
    pub fn submit_marks(
        &self,
        header: &TestHeader,
        entries: &[MarkEntry],
    ) -> PortalResult<MarksSummary> {
        let test_name = header.test_name.trim();
        if test_name.is_empty()
            || header.subject.is_empty()
            || header.date.is_empty()
            || header.class.is_empty()
            || header.total_marks <= 0
        {
            return Err(PortalError::Validation(
                "Please fill in all required fields".to_string(),
            ));
        }
        parse_date(&header.date).map_err(PortalError::Validation)?;

        let mut students = self.cache.students()?;
        let mut skipped = Vec::new();
        let mut accepted: Vec<(usize, i64, &MarkEntry)> = Vec::new();
        for entry in entries {
            let Some(marks) = entry.marks else {
                continue;
            };
            let Some(idx) = students
                .iter()
                .position(|s| s.id == entry.student_id && s.class == header.class)
            else {
                skipped.push(entry.student_id);
                continue;
            };
            if !(0..=header.total_marks).contains(&marks) {
                return Err(PortalError::Validation(format!(
                    "Invalid marks for {}. Marks should be between 0 and {}",
                    students[idx].name, header.total_marks
                )));
            }
            accepted.push((idx, marks, entry));
        }
        if accepted.is_empty() {
            return Err(PortalError::Validation(
                "Please enter marks for at least one student".to_string(),
            ));
        }

        let added_at = now_iso();
        let mut by_student: HashMap<StudentId, i64> = HashMap::new();
        for (idx, marks, entry) in accepted {
            let s = &mut students[idx];
            s.test_results
                .retain(|t| !t.same_test(test_name, &header.subject, &header.date));
            let pct = percentage(marks, header.total_marks);
            s.test_results.push(TestResultEntry {
                test_name: test_name.to_string(),
                subject: header.subject.clone(),
                date: header.date.clone(),
                marks,
                total_marks: header.total_marks,
                percentage: pct,
                remarks: entry.remarks.trim().to_string(),
                added_by: Some("Admin".to_string()),
                added_at: Some(added_at.clone()),
            });
            by_student.insert(s.id, pct);
        }
        self.cache.set_students(&students)?;
        self.sync_session()?;

        let percentages: Vec<i64> = by_student.values().copied().collect();
        let record = TestRecord {
            id: None,
            test_name: test_name.to_string(),
            subject: header.subject.clone(),
            class: header.class.clone(),
            date: header.date.clone(),
            total_marks: header.total_marks,
            total_students: percentages.len() as i64,
            average_percentage: mean_rounded(&percentages),
        };
        let mut records: Vec<TestRecord> = self.cache.get_or_default(keys::TEST_RECORDS)?;
        records.retain(|r| {
            !(r.test_name == record.test_name
                && r.subject == record.subject
                && r.date == record.date
                && r.class == record.class)
        });
        records.push(record.clone());
        self.cache.put(keys::TEST_RECORDS, &records)?;

        let aggregate_posted = match self.directory.post_test_record(&record) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, test = test_name, "test aggregate not posted; saved locally only");
                false
            }
        };
        tracing::info!(test = test_name, class = %header.class, updated = by_student.len(), "marks submitted");
        Ok(MarksSummary {
            updated: by_student.len(),
            skipped,
            record,
            aggregate_posted,
        })
    }

    /// Removes the test from every student. Returns how many entries went.
    pub fn delete_test(&self, test_name: &str, subject: &str, date: &str) -> PortalResult<usize> {
        let mut students = self.cache.students()?;
        let mut removed = 0;
        for s in &mut students {
            let before = s.test_results.len();
            s.test_results.retain(|t| !t.same_test(test_name, subject, date));
            removed += before - s.test_results.len();
        }
        if removed > 0 {
            self.cache.set_students(&students)?;
            self.sync_session()?;
        }
        let mut records: Vec<TestRecord> = self.cache.get_or_default(keys::TEST_RECORDS)?;
        let before = records.len();
        records.retain(|r| !(r.test_name == test_name && r.subject == subject && r.date == date));
        if records.len() != before {
            self.cache.put(keys::TEST_RECORDS, &records)?;
        }
        Ok(removed)
    }

    /// One row per (test, subject, date, class), newest first.
    pub fn test_records(
        &self,
        class: Option<&str>,
        subject: Option<&str>,
        month: Option<&str>,
    ) -> PortalResult<Vec<TestView>> {
        if let Some(m) = month {
            parse_month(m).map_err(PortalError::Validation)?;
        }
        let students = self.cache.students()?;
        let mut index: HashMap<(String, String, String, String), usize> = HashMap::new();
        let mut groups: Vec<(TestView, Vec<i64>)> = Vec::new();
        for s in &students {
            if class.is_some_and(|c| c != s.class) {
                continue;
            }
            for t in &s.test_results {
                if subject.is_some_and(|sub| sub != t.subject) {
                    continue;
                }
                if month.is_some_and(|m| t.date.get(..7) != Some(m)) {
                    continue;
                }
                let key = (
                    t.test_name.clone(),
                    t.subject.clone(),
                    t.date.clone(),
                    s.class.clone(),
                );
                let idx = *index.entry(key).or_insert_with(|| {
                    groups.push((
                        TestView {
                            test_name: t.test_name.clone(),
                            subject: t.subject.clone(),
                            date: t.date.clone(),
                            class: s.class.clone(),
                            total_marks: t.total_marks,
                            total_students: 0,
                            average_percentage: 0,
                            grade: "F",
                        },
                        Vec::new(),
                    ));
                    groups.len() - 1
                });
                groups[idx].1.push(t.percentage);
            }
        }
        let mut views: Vec<TestView> = groups
            .into_iter()
            .map(|(mut v, pcts)| {
                v.total_students = pcts.len() as i64;
                v.average_percentage = mean_rounded(&pcts);
                v.grade = grade(v.average_percentage);
                v
            })
            .collect();
        views.sort_by(|a, b| b.date.cmp(&a.date));
        Ok(views)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use serde_json::json;

    fn header(name: &str, date: &str) -> TestHeader {
        TestHeader {
            test_name: name.into(),
            subject: "Mathematics".into(),
            date: date.into(),
            total_marks: 50,
            class: "10th".into(),
        }
    }

    fn entry(id: StudentId, marks: Option<i64>) -> MarkEntry {
        MarkEntry {
            student_id: id,
            marks,
            remarks: String::new(),
        }
    }

    fn seeded() -> Portal {
        let portal = offline_portal();
        portal
            .cache()
            .set_students(&[
                student(json!({ "id": 1, "name": "A", "class": "10th" })),
                student(json!({ "id": 2, "name": "B", "class": "10th" })),
            ])
            .expect("seed");
        portal
    }

    #[test]
    fn grade_boundaries() {
        assert_eq!(grade(90), "A+");
        assert_eq!(grade(89), "A");
        assert_eq!(grade(70), "B");
        assert_eq!(grade(40), "E");
        assert_eq!(grade(39), "F");
    }

    #[test]
    fn resubmitting_a_test_replaces_the_entry() {
        let portal = seeded();
        portal
            .submit_marks(&header("Unit 1", "2025-02-01"), &[entry(1, Some(40))])
            .expect("first");
        let summary = portal
            .submit_marks(&header("Unit 1", "2025-02-01"), &[entry(1, Some(45)), entry(2, None)])
            .expect("second");
        assert_eq!(summary.updated, 1);
        let s = portal.student(1).expect("s");
        assert_eq!(s.test_results.len(), 1);
        assert_eq!(s.test_results[0].marks, 45);
        assert_eq!(s.test_results[0].percentage, 90);
        assert!(portal.student(2).expect("s").test_results.is_empty());
    }

    #[test]
    fn one_out_of_range_mark_rejects_the_batch() {
        let portal = seeded();
        let err = portal
            .submit_marks(&header("Unit 1", "2025-02-01"), &[entry(1, Some(30)), entry(2, Some(51))])
            .expect_err("out of range");
        assert!(matches!(err, PortalError::Validation(m) if m.contains("Invalid marks for B")));
        assert!(portal.student(1).expect("s").test_results.is_empty());
    }

    #[test]
    fn at_least_one_mark_is_required() {
        let portal = seeded();
        let err = portal
            .submit_marks(&header("Unit 1", "2025-02-01"), &[entry(1, None)])
            .expect_err("empty");
        assert!(matches!(err, PortalError::Validation(_)));
    }

    #[test]
    fn aggregate_and_records_use_rounded_mean() {
        let portal = seeded();
        let summary = portal
            .submit_marks(&header("Unit 1", "2025-02-01"), &[entry(1, Some(45)), entry(2, Some(36))])
            .expect("submit");
        assert_eq!(summary.record.total_students, 2);
        assert_eq!(summary.record.average_percentage, 81);
        portal
            .submit_marks(&header("Unit 2", "2025-03-01"), &[entry(1, Some(10))])
            .expect("submit");

        let views = portal.test_records(None, None, None).expect("views");
        assert_eq!(views.len(), 2);
        assert_eq!(views[0].test_name, "Unit 2");
        assert_eq!(views[1].average_percentage, 81);
        assert_eq!(views[1].grade, "A");

        let feb = portal.test_records(Some("10th"), Some("Mathematics"), Some("2025-02")).expect("feb");
        assert_eq!(feb.len(), 1);
    }

    #[test]
    fn delete_test_removes_from_everyone() {
        let portal = seeded();
        portal
            .submit_marks(&header("Unit 1", "2025-02-01"), &[entry(1, Some(45)), entry(2, Some(36))])
            .expect("submit");
        let removed = portal
            .delete_test("Unit 1", "Mathematics", "2025-02-01")
            .expect("delete");
        assert_eq!(removed, 2);
        assert!(portal.test_records(None, None, None).expect("views").is_empty());
        let records: Vec<TestRecord> = portal.cache().get_or_default(keys::TEST_RECORDS).expect("r");
        assert!(records.is_empty());
    }
}
