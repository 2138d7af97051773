use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

pub type StudentId = i64;

/// Reads `null` (SQLite NULL columns come back that way) as the type's default.
fn null_default<'de, D, T>(d: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(d)?.unwrap_or_default())
}

/// Ids arrive as JSON numbers from the server but older caches hold numeric strings.
fn lenient_id<'de, D>(d: D) -> Result<StudentId, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Value::deserialize(d)?;
    parse_id(&v).ok_or_else(|| serde::de::Error::custom(format!("invalid student id: {}", v)))
}

fn lenient_opt_id<'de, D>(d: D) -> Result<Option<StudentId>, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Option::<Value>::deserialize(d)?;
    Ok(v.as_ref().and_then(parse_id))
}

/// Largest id accepted from outside. Keeps `id + 1` representable so the id
/// counter can always move past it.
pub const MAX_ID: StudentId = i64::MAX - 1;

/// Integral value of a number or numeric string. Fractions are truncated;
/// anything outside `i64` or above `MAX_ID` is rejected rather than clamped.
pub fn parse_id(v: &Value) -> Option<StudentId> {
    let id = match v {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .map(f64::trunc)
                .filter(|f| f.is_finite() && *f >= i64::MIN as f64 && *f < i64::MAX as f64)
                .map(|f| f as i64)
        }),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }?;
    (id <= MAX_ID).then_some(id)
}

fn lenient_i64<'de, D>(d: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Option::<Value>::deserialize(d)?;
    Ok(v.as_ref().and_then(parse_id).unwrap_or(0))
}

/// Timestamps are only meaningful when non-empty; `""` and `null` both mean "never".
fn non_empty_string<'de, D>(d: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Option::<String>::deserialize(d)?;
    Ok(v.filter(|s| !s.is_empty()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StudentStatus {
    #[default]
    Active,
    Inactive,
}

impl StudentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "Active",
            Self::Inactive => "Inactive",
        }
    }

    pub fn parse(s: &str) -> Self {
        if s.trim().eq_ignore_ascii_case("inactive") {
            Self::Inactive
        } else {
            Self::Active
        }
    }
}

impl Serialize for StudentStatus {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for StudentStatus {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let v = Option::<String>::deserialize(d)?;
        Ok(v.map(|s| Self::parse(&s)).unwrap_or_default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttendanceStatus {
    Present,
    Absent,
}

impl AttendanceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Present => "Present",
            Self::Absent => "Absent",
        }
    }

    /// Anything other than "Present" counts as an absence.
    pub fn parse(s: &str) -> Self {
        if s == "Present" {
            Self::Present
        } else {
            Self::Absent
        }
    }
}

impl Serialize for AttendanceStatus {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for AttendanceStatus {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let v = Option::<String>::deserialize(d)?;
        Ok(Self::parse(v.as_deref().unwrap_or("")))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceEntry {
    pub date: String,
    pub status: AttendanceStatus,
    #[serde(default, deserialize_with = "null_default")]
    pub remarks: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marked_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marked_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResultEntry {
    pub test_name: String,
    #[serde(default, deserialize_with = "null_default")]
    pub subject: String,
    #[serde(default, deserialize_with = "null_default")]
    pub date: String,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub marks: i64,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub total_marks: i64,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub percentage: i64,
    #[serde(default, deserialize_with = "null_default")]
    pub remarks: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub added_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub added_at: Option<String>,
}

impl TestResultEntry {
    pub fn same_test(&self, test_name: &str, subject: &str, date: &str) -> bool {
        self.test_name == test_name && self.subject == subject && self.date == date
    }
}

/// `round(marks / total * 100)`, rounding halves upward.
pub fn percentage(marks: i64, total_marks: i64) -> i64 {
    if total_marks <= 0 {
        return 0;
    }
    (marks as f64 / total_marks as f64 * 100.0 + 0.5).floor() as i64
}

/// A student as held in the local cache. Remote rows deserialize into the same
/// shape with empty `attendance` and `test_results`. Fields this crate does not
/// model are kept in `extra` so a round trip through the cache never drops them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRecord {
    #[serde(deserialize_with = "lenient_id")]
    pub id: StudentId,
    #[serde(default, deserialize_with = "null_default")]
    pub name: String,
    #[serde(rename = "class", default, deserialize_with = "null_default")]
    pub class: String,
    #[serde(default, deserialize_with = "null_default")]
    pub username: String,
    #[serde(default, deserialize_with = "null_default")]
    pub password: String,
    #[serde(default, deserialize_with = "null_default")]
    pub phone: String,
    #[serde(default, deserialize_with = "null_default")]
    pub email: String,
    #[serde(default, deserialize_with = "null_default")]
    pub address: String,
    #[serde(default)]
    pub status: StudentStatus,
    #[serde(default, deserialize_with = "non_empty_string")]
    pub created_at: Option<String>,
    #[serde(default, deserialize_with = "non_empty_string")]
    pub last_login: Option<String>,
    #[serde(default, deserialize_with = "null_default")]
    pub attendance: Vec<AttendanceEntry>,
    #[serde(default, deserialize_with = "null_default")]
    pub test_results: Vec<TestResultEntry>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl StudentRecord {
    pub fn new(id: StudentId, profile: &StudentProfile, created_at: String) -> Self {
        Self {
            id,
            name: profile.name.clone(),
            class: profile.class.clone(),
            username: profile.username.clone(),
            password: profile.password.clone(),
            phone: profile.phone.clone(),
            email: profile.email.clone(),
            address: profile.address.clone(),
            status: profile.status.unwrap_or_default(),
            created_at: Some(created_at),
            last_login: None,
            attendance: Vec::new(),
            test_results: Vec::new(),
            extra: Map::new(),
        }
    }

    pub fn key(&self) -> String {
        self.id.to_string()
    }

    pub fn profile(&self) -> StudentProfile {
        StudentProfile {
            name: self.name.clone(),
            class: self.class.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            phone: self.phone.clone(),
            email: self.email.clone(),
            address: self.address.clone(),
            status: Some(self.status),
        }
    }

    pub fn apply_profile(&mut self, profile: &StudentProfile) {
        self.name = profile.name.clone();
        self.class = profile.class.clone();
        self.username = profile.username.clone();
        self.password = profile.password.clone();
        self.phone = profile.phone.clone();
        self.email = profile.email.clone();
        self.address = profile.address.clone();
        if let Some(status) = profile.status {
            self.status = status;
        }
    }
}

/// The profile fields the Remote Student Directory knows about.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentProfile {
    #[serde(default, deserialize_with = "null_default")]
    pub name: String,
    #[serde(rename = "class", default, deserialize_with = "null_default")]
    pub class: String,
    #[serde(default, deserialize_with = "null_default")]
    pub username: String,
    #[serde(default, deserialize_with = "null_default")]
    pub password: String,
    #[serde(default, deserialize_with = "null_default")]
    pub phone: String,
    #[serde(default, deserialize_with = "null_default")]
    pub email: String,
    #[serde(default, deserialize_with = "null_default")]
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<StudentStatus>,
}

impl StudentProfile {
    pub fn trimmed(mut self) -> Self {
        self.name = self.name.trim().to_string();
        self.class = self.class.trim().to_string();
        self.username = self.username.trim().to_string();
        self.phone = self.phone.trim().to_string();
        self.email = self.email.trim().to_string();
        self.address = self.address.trim().to_string();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginIdentity {
    #[serde(deserialize_with = "lenient_id")]
    pub id: StudentId,
    #[serde(default, deserialize_with = "null_default")]
    pub username: String,
    #[serde(default, deserialize_with = "null_default")]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Announcement {
    #[serde(default, deserialize_with = "lenient_opt_id")]
    pub id: Option<i64>,
    #[serde(default, deserialize_with = "null_default")]
    pub title: String,
    #[serde(default, deserialize_with = "null_default")]
    pub content: String,
    #[serde(default, deserialize_with = "null_default")]
    pub date: String,
    #[serde(default = "default_priority", deserialize_with = "priority_or_default")]
    pub priority: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

fn default_priority() -> String {
    "normal".to_string()
}

fn priority_or_default<'de, D>(d: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Option::<String>::deserialize(d)?;
    Ok(v.filter(|s| !s.is_empty()).unwrap_or_else(default_priority))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudyMaterial {
    #[serde(default, deserialize_with = "lenient_opt_id")]
    pub id: Option<i64>,
    #[serde(default, deserialize_with = "null_default")]
    pub title: String,
    #[serde(default, deserialize_with = "null_default")]
    pub subject: String,
    #[serde(rename = "class", default, deserialize_with = "null_default")]
    pub class: String,
    #[serde(rename = "type", default, deserialize_with = "null_default")]
    pub kind: String,
    #[serde(default, deserialize_with = "null_default")]
    pub description: String,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub file_size: Option<Value>,
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub downloads: i64,
    #[serde(default, deserialize_with = "null_default")]
    pub upload_date: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportantDate {
    pub id: i64,
    pub title: String,
    pub date: String,
    #[serde(default, deserialize_with = "null_default")]
    pub description: String,
    #[serde(rename = "type", default, deserialize_with = "null_default")]
    pub kind: String,
    #[serde(default = "default_priority", deserialize_with = "priority_or_default")]
    pub priority: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

/// Class-level attendance aggregate posted to the server after a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient_opt_id")]
    pub id: Option<i64>,
    pub date: String,
    #[serde(rename = "class")]
    pub class: String,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub present: i64,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub absent: i64,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub total: i64,
}

/// Class-level test aggregate posted to the server after a marks batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestRecord {
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient_opt_id")]
    pub id: Option<i64>,
    pub test_name: String,
    pub subject: String,
    #[serde(rename = "class")]
    pub class: String,
    pub date: String,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub total_marks: i64,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub total_students: i64,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub average_percentage: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImpersonationLogEntry {
    pub id: String,
    pub action: String,
    pub time: String,
    pub student_id: Option<StudentId>,
    pub note: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn remote_row_with_nulls_parses_with_empty_history() {
        let row = json!({
            "id": 1001,
            "name": "Rahul Sharma",
            "class": "10th",
            "username": "rahul2024",
            "password": "rahul123",
            "phone": null,
            "email": null,
            "address": null,
            "status": null,
            "createdAt": "2024-01-15",
            "lastLogin": null
        });
        let s: StudentRecord = serde_json::from_value(row).expect("parse row");
        assert_eq!(s.id, 1001);
        assert_eq!(s.phone, "");
        assert_eq!(s.status, StudentStatus::Active);
        assert!(s.last_login.is_none());
        assert!(s.attendance.is_empty());
        assert!(s.test_results.is_empty());
        assert!(s.extra.is_empty());
    }

    #[test]
    fn string_ids_and_unknown_fields_survive() {
        let row = json!({ "id": "1005", "name": "A", "rollNo": 7 });
        let s: StudentRecord = serde_json::from_value(row).expect("parse");
        assert_eq!(s.id, 1005);
        let back = serde_json::to_value(&s).expect("serialize");
        assert_eq!(back["rollNo"], json!(7));
        assert_eq!(back["id"], json!(1005));
        assert_eq!(back["class"], json!(""));
    }

    #[test]
    fn missing_id_is_rejected() {
        let r: Result<StudentRecord, _> = serde_json::from_value(json!({ "name": "x" }));
        assert!(r.is_err());
    }

    #[test]
    fn ids_without_room_for_a_successor_are_rejected() {
        assert_eq!(parse_id(&json!(MAX_ID)), Some(MAX_ID));
        assert_eq!(parse_id(&json!(i64::MAX)), None);
        assert_eq!(parse_id(&json!(u64::MAX)), None);
        assert_eq!(parse_id(&json!(1e30)), None);
        assert_eq!(parse_id(&json!(i64::MAX.to_string())), None);
        assert_eq!(parse_id(&json!(1005.9)), Some(1005));
        let r: Result<StudentRecord, _> = serde_json::from_value(json!({ "id": 1e30 }));
        assert!(r.is_err());
    }

    #[test]
    fn attendance_status_outside_present_counts_as_absent() {
        let e: AttendanceEntry =
            serde_json::from_value(json!({ "date": "2025-01-01", "status": "Late" })).expect("parse");
        assert_eq!(e.status, AttendanceStatus::Absent);
    }

    #[test]
    fn percentage_rounds_half_up() {
        assert_eq!(percentage(45, 50), 90);
        assert_eq!(percentage(1, 8), 13);
        assert_eq!(percentage(1, 3), 33);
        assert_eq!(percentage(5, 0), 0);
    }
}
