use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{now_iso, today, Portal, PortalError, PortalResult, Saved};
use crate::cache::{keys, LocalCache};
use crate::directory::DirectoryError;
use crate::model::{Announcement, ImportantDate, StudyMaterial};
use crate::validate::parse_date;

pub const STANDARD_CLASSES: [&str; 6] = [
    "9th",
    "10th",
    "11th Science",
    "11th Commerce",
    "12th Science",
    "12th Commerce",
];

const PRIORITIES: [&str; 3] = ["normal", "important", "urgent"];

/// A class's weekly timetable. Days without an entry are omitted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaySchedule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monday: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tuesday: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wednesday: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thursday: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub friday: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saturday: Option<String>,
}

impl DaySchedule {
    fn days_mut(&mut self) -> [&mut Option<String>; 6] {
        [
            &mut self.monday,
            &mut self.tuesday,
            &mut self.wednesday,
            &mut self.thursday,
            &mut self.friday,
            &mut self.saturday,
        ]
    }

    /// Trims every day and drops blank ones.
    fn cleaned(mut self) -> Self {
        for day in self.days_mut() {
            *day = day
                .take()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty());
        }
        self
    }

    fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

pub fn default_schedule() -> DaySchedule {
    DaySchedule {
        monday: Some("Mathematics - 4:00 PM to 6:00 PM".to_string()),
        tuesday: Some("Physics - 4:00 PM to 6:00 PM".to_string()),
        wednesday: Some("Chemistry - 4:00 PM to 6:00 PM".to_string()),
        thursday: Some("Revision - 4:00 PM to 6:00 PM".to_string()),
        friday: Some("Test - 4:00 PM to 6:00 PM".to_string()),
        saturday: Some("Doubt Session - 10:00 AM to 12:00 PM".to_string()),
    }
}

fn default_schedules() -> BTreeMap<String, DaySchedule> {
    STANDARD_CLASSES
        .iter()
        .map(|c| (c.to_string(), default_schedule()))
        .collect()
}

/// Lowercase, without "grade", whitespace or a trailing ordinal suffix.
pub fn normalize_class_name(s: &str) -> String {
    let x: String = s
        .trim()
        .to_lowercase()
        .replace("grade", "")
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    for suffix in ["st", "nd", "rd", "th"] {
        if let Some(stripped) = x.strip_suffix(suffix) {
            return stripped.to_string();
        }
    }
    x
}

pub fn matches_class(material_class: &str, student_class: &str) -> bool {
    if material_class.is_empty() {
        return false;
    }
    if material_class.eq_ignore_ascii_case("all") {
        return true;
    }
    let a = normalize_class_name(material_class);
    let b = normalize_class_name(student_class);
    a == b || a.contains(&b) || b.contains(&a)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAnnouncement {
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub priority: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMaterial {
    pub title: String,
    pub subject: String,
    #[serde(rename = "class")]
    pub class: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub file_size: Option<serde_json::Value>,
    #[serde(default)]
    pub link: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewImportantDate {
    pub title: String,
    pub date: String,
    pub description: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub priority: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PortalStats {
    pub total_students: usize,
    pub total_announcements: usize,
    pub total_materials: usize,
    pub class_distribution: BTreeMap<String, usize>,
    pub logins_today: usize,
}

fn priority_or_default(p: Option<String>) -> PortalResult<String> {
    let p = p
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "normal".to_string());
    if !PRIORITIES.contains(&p.as_str()) {
        return Err(PortalError::Validation(format!("unknown priority: {}", p)));
    }
    Ok(p)
}

/// Local ids are epoch milliseconds, bumped past any id already present.
fn local_id(existing: impl Iterator<Item = i64>) -> i64 {
    let now = Utc::now().timestamp_millis();
    existing.map(|id| id.saturating_add(1)).fold(now, i64::max)
}

fn tolerate_missing(r: Result<(), DirectoryError>) -> Result<(), DirectoryError> {
    match r {
        Err(DirectoryError::NotFound) => Ok(()),
        other => other,
    }
}

impl Portal {
    /// Seeds the default schedules the first time a cache is opened.
    pub(crate) fn ensure_defaults(&self) -> anyhow::Result<()> {
        if self.cache.get_json(keys::STUDY_SCHEDULES)?.is_none() {
            self.cache.put(keys::STUDY_SCHEDULES, &default_schedules())?;
            tracing::info!("seeded default study schedules");
        }
        Ok(())
    }

    // Announcements

    /// The directory's list replaces the cache when it is a non-empty array.
    pub fn announcements(&self) -> PortalResult<Vec<Announcement>> {
        match self.directory.list_announcements() {
            Ok(remote) if !remote.is_empty() => {
                self.cache.put(keys::ANNOUNCEMENTS, &remote)?;
                Ok(remote)
            }
            Ok(_) => Ok(self.cache.get_or_default(keys::ANNOUNCEMENTS)?),
            Err(e) => {
                tracing::debug!(error = %e, "announcements from cache");
                Ok(self.cache.get_or_default(keys::ANNOUNCEMENTS)?)
            }
        }
    }

    /// Newest first.
    pub fn add_announcement(&self, input: NewAnnouncement) -> PortalResult<Saved<Announcement>> {
        let title = input.title.trim().to_string();
        let content = input.content.trim().to_string();
        let date = input
            .date
            .filter(|d| !d.trim().is_empty())
            .unwrap_or_else(today);
        if title.is_empty() || content.is_empty() {
            return Err(PortalError::Validation(
                "Please fill in all required fields".to_string(),
            ));
        }
        parse_date(&date).map_err(PortalError::Validation)?;
        let draft = Announcement {
            id: None,
            title,
            content,
            date,
            priority: priority_or_default(input.priority)?,
            created_by: Some("Admin".to_string()),
            created_at: Some(now_iso()),
        };

        let store = |cache: &LocalCache, id: Option<i64>| -> PortalResult<Announcement> {
            let mut list: Vec<Announcement> = cache.get_or_default(keys::ANNOUNCEMENTS)?;
            let mut a = draft.clone();
            a.id = Some(id.unwrap_or_else(|| local_id(list.iter().filter_map(|x| x.id))));
            list.insert(0, a.clone());
            cache.put(keys::ANNOUNCEMENTS, &list)?;
            Ok(a)
        };
        self.durable(
            "Announcement",
            |d| d.create_announcement(&draft),
            |cache, id| store(cache, Some(id)),
            |cache| store(cache, None),
        )
    }

    pub fn delete_announcement(&self, id: i64) -> PortalResult<Saved<()>> {
        let remove = |cache: &LocalCache| -> PortalResult<()> {
            let mut list: Vec<Announcement> = cache.get_or_default(keys::ANNOUNCEMENTS)?;
            let before = list.len();
            list.retain(|a| a.id != Some(id));
            if list.len() == before {
                return Err(PortalError::NotFound(format!("announcement {} not found", id)));
            }
            cache.put(keys::ANNOUNCEMENTS, &list)?;
            Ok(())
        };
        self.durable(
            "Announcement deletion",
            |d| tolerate_missing(d.delete_announcement(id)),
            |cache, ()| match remove(cache) {
                Err(PortalError::NotFound(_)) => Ok(()),
                other => other,
            },
            |cache| remove(cache),
        )
    }

    // Study materials

    pub fn materials(&self) -> PortalResult<Vec<StudyMaterial>> {
        match self.directory.list_materials() {
            Ok(remote) if !remote.is_empty() => {
                self.cache.put(keys::STUDY_MATERIALS, &remote)?;
                Ok(remote)
            }
            Ok(_) => Ok(self.cache.get_or_default(keys::STUDY_MATERIALS)?),
            Err(e) => {
                tracing::debug!(error = %e, "study materials from cache");
                Ok(self.cache.get_or_default(keys::STUDY_MATERIALS)?)
            }
        }
    }

    pub fn materials_for_class(&self, class: &str) -> PortalResult<Vec<StudyMaterial>> {
        let list: Vec<StudyMaterial> = self.cache.get_or_default(keys::STUDY_MATERIALS)?;
        Ok(list
            .into_iter()
            .filter(|m| matches_class(&m.class, class))
            .collect())
    }

    pub fn add_material(&self, input: NewMaterial) -> PortalResult<Saved<StudyMaterial>> {
        let title = input.title.trim().to_string();
        if title.is_empty() || input.subject.is_empty() || input.class.is_empty() || input.kind.is_empty()
        {
            return Err(PortalError::Validation(
                "Please fill in all required fields".to_string(),
            ));
        }
        let draft = StudyMaterial {
            id: None,
            title,
            subject: input.subject,
            class: input.class,
            kind: input.kind,
            description: input.description.trim().to_string(),
            file_name: input.file_name.filter(|s| !s.is_empty()),
            file_size: input.file_size,
            link: input.link.map(|s| s.trim().to_string()).filter(|s| !s.is_empty()),
            downloads: 0,
            upload_date: today(),
        };
        let store = |cache: &LocalCache, id: Option<i64>| -> PortalResult<StudyMaterial> {
            let mut list: Vec<StudyMaterial> = cache.get_or_default(keys::STUDY_MATERIALS)?;
            let mut m = draft.clone();
            m.id = Some(id.unwrap_or_else(|| local_id(list.iter().filter_map(|x| x.id))));
            list.insert(0, m.clone());
            cache.put(keys::STUDY_MATERIALS, &list)?;
            Ok(m)
        };
        self.durable(
            "Study material",
            |d| d.create_material(&draft),
            |cache, id| store(cache, Some(id)),
            |cache| store(cache, None),
        )
    }

    pub fn delete_material(&self, id: i64) -> PortalResult<Saved<()>> {
        let remove = |cache: &LocalCache| -> PortalResult<()> {
            let mut list: Vec<StudyMaterial> = cache.get_or_default(keys::STUDY_MATERIALS)?;
            let before = list.len();
            list.retain(|m| m.id != Some(id));
            if list.len() == before {
                return Err(PortalError::NotFound(format!("study material {} not found", id)));
            }
            cache.put(keys::STUDY_MATERIALS, &list)?;
            Ok(())
        };
        self.durable(
            "Study material deletion",
            |d| tolerate_missing(d.delete_material(id)),
            |cache, ()| match remove(cache) {
                Err(PortalError::NotFound(_)) => Ok(()),
                other => other,
            },
            |cache| remove(cache),
        )
    }

    /// Counts a download and returns the material so the caller can open its
    /// link or file.
    pub fn download_material(&self, id: i64) -> PortalResult<StudyMaterial> {
        let mut list: Vec<StudyMaterial> = self.cache.get_or_default(keys::STUDY_MATERIALS)?;
        let m = list
            .iter_mut()
            .find(|m| m.id == Some(id))
            .ok_or_else(|| PortalError::NotFound("Material not found!".to_string()))?;
        m.downloads += 1;
        let out = m.clone();
        self.cache.put(keys::STUDY_MATERIALS, &list)?;
        Ok(out)
    }

    // Study schedules

    pub fn schedules(&self) -> PortalResult<BTreeMap<String, DaySchedule>> {
        Ok(self.cache.get_or_default(keys::STUDY_SCHEDULES)?)
    }

    pub fn save_schedule(&self, class: &str, schedule: DaySchedule) -> PortalResult<DaySchedule> {
        if class.trim().is_empty() {
            return Err(PortalError::Validation("Please select a class first".to_string()));
        }
        let schedule = schedule.cleaned();
        if schedule.is_empty() {
            return Err(PortalError::Validation(
                "Please enter schedule for at least one day".to_string(),
            ));
        }
        let mut all = self.schedules()?;
        all.insert(class.to_string(), schedule.clone());
        self.cache.put(keys::STUDY_SCHEDULES, &all)?;
        Ok(schedule)
    }

    pub fn delete_schedule(&self, class: &str) -> PortalResult<()> {
        let mut all = self.schedules()?;
        if all.remove(class).is_none() {
            return Err(PortalError::NotFound(format!("no schedule for {}", class)));
        }
        self.cache.put(keys::STUDY_SCHEDULES, &all)?;
        Ok(())
    }

    pub fn copy_schedule(&self, from: &str, to: &str) -> PortalResult<()> {
        if to.trim().is_empty() {
            return Err(PortalError::Validation("target class is required".to_string()));
        }
        let mut all = self.schedules()?;
        let source = all
            .get(from)
            .cloned()
            .ok_or_else(|| PortalError::NotFound("Source schedule not found!".to_string()))?;
        all.insert(to.to_string(), source);
        self.cache.put(keys::STUDY_SCHEDULES, &all)?;
        Ok(())
    }

    pub fn copy_schedule_to_all(&self, from: &str) -> PortalResult<()> {
        let mut all = self.schedules()?;
        let source = all.get(from).cloned().ok_or_else(|| {
            PortalError::NotFound("Please save the schedule for the selected class first".to_string())
        })?;
        for class in STANDARD_CLASSES {
            all.insert(class.to_string(), source.clone());
        }
        self.cache.put(keys::STUDY_SCHEDULES, &all)?;
        Ok(())
    }

    /// Replaces every schedule with the defaults for the standard classes.
    pub fn reset_schedules(&self) -> PortalResult<BTreeMap<String, DaySchedule>> {
        let all = default_schedules();
        self.cache.put(keys::STUDY_SCHEDULES, &all)?;
        Ok(all)
    }

    // Important dates (local only)

    /// Sorted by date.
    pub fn important_dates(&self) -> PortalResult<Vec<ImportantDate>> {
        let mut list: Vec<ImportantDate> = self.cache.get_or_default(keys::IMPORTANT_DATES)?;
        list.sort_by(|a, b| a.date.cmp(&b.date));
        Ok(list)
    }

    pub fn add_important_date(&self, input: NewImportantDate) -> PortalResult<ImportantDate> {
        let title = input.title.trim().to_string();
        let description = input.description.trim().to_string();
        if title.is_empty() || input.date.is_empty() || description.is_empty() || input.kind.is_empty() {
            return Err(PortalError::Validation(
                "Please fill in all required fields".to_string(),
            ));
        }
        parse_date(&input.date).map_err(PortalError::Validation)?;
        let mut list: Vec<ImportantDate> = self.cache.get_or_default(keys::IMPORTANT_DATES)?;
        let entry = ImportantDate {
            id: local_id(list.iter().map(|d| d.id)),
            title,
            date: input.date,
            description,
            kind: input.kind,
            priority: priority_or_default(input.priority)?,
            created_by: Some("Admin".to_string()),
            created_at: Some(now_iso()),
        };
        list.push(entry.clone());
        self.cache.put(keys::IMPORTANT_DATES, &list)?;
        Ok(entry)
    }

    pub fn delete_important_date(&self, id: i64) -> PortalResult<()> {
        let mut list: Vec<ImportantDate> = self.cache.get_or_default(keys::IMPORTANT_DATES)?;
        let before = list.len();
        list.retain(|d| d.id != id);
        if list.len() == before {
            return Err(PortalError::NotFound(format!("important date {} not found", id)));
        }
        self.cache.put(keys::IMPORTANT_DATES, &list)?;
        Ok(())
    }

    // Dashboard counters

    pub fn stats(&self) -> PortalResult<PortalStats> {
        let students = self.cache.students()?;
        let announcements: Vec<Announcement> = self.cache.get_or_default(keys::ANNOUNCEMENTS)?;
        let materials: Vec<StudyMaterial> = self.cache.get_or_default(keys::STUDY_MATERIALS)?;
        let today = Utc::now().date_naive();

        let mut class_distribution = BTreeMap::new();
        for s in &students {
            *class_distribution.entry(s.class.clone()).or_insert(0) += 1;
        }
        let logins_today = students
            .iter()
            .filter_map(|s| s.last_login.as_deref())
            .filter_map(|t| DateTime::parse_from_rfc3339(t).ok())
            .filter(|t| t.with_timezone(&Utc).date_naive() == today)
            .count();

        Ok(PortalStats {
            total_students: students.len(),
            total_announcements: announcements.len(),
            total_materials: materials.len(),
            class_distribution,
            logins_today,
        })
    }
}
