use chrono::{Datelike, NaiveDate};

use crate::model::{StudentId, StudentProfile, StudentRecord};

pub const MIN_PASSWORD_LEN: usize = 6;

pub fn is_valid_phone(phone: &str) -> bool {
    phone.len() == 10 && phone.bytes().all(|b| b.is_ascii_digit())
}

/// Checks a create/update form before any network call. Username uniqueness is
/// only checked against `visible`, the currently cached list; `editing` is the
/// record being updated, which may keep its own username.
pub fn validate_profile(
    profile: &StudentProfile,
    visible: &[StudentRecord],
    editing: Option<StudentId>,
) -> Result<(), String> {
    if profile.name.is_empty()
        || profile.class.is_empty()
        || profile.username.is_empty()
        || profile.password.is_empty()
    {
        return Err("Please fill in all required fields".to_string());
    }
    if profile.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(format!(
            "Password must be at least {} characters long",
            MIN_PASSWORD_LEN
        ));
    }
    if !profile.phone.is_empty() && !is_valid_phone(&profile.phone) {
        return Err("Please enter a valid 10-digit phone number".to_string());
    }
    let taken = visible
        .iter()
        .any(|s| s.username == profile.username && Some(s.id) != editing);
    if taken {
        return Err("Username already exists. Please choose another one.".to_string());
    }
    Ok(())
}

/// Accepts `YYYY-MM-DD` only.
pub fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| format!("invalid date: {} (expected YYYY-MM-DD)", raw))
}

/// Accepts `YYYY-MM`.
pub fn parse_month(raw: &str) -> Result<(i32, u32), String> {
    let t = raw.trim();
    NaiveDate::parse_from_str(&format!("{}-01", t), "%Y-%m-%d")
        .map(|d| (d.year(), d.month()))
        .map_err(|_| format!("invalid month: {} (expected YYYY-MM)", raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn profile() -> StudentProfile {
        StudentProfile {
            name: "Priya".into(),
            class: "10th".into(),
            username: "priya10".into(),
            password: "secret1".into(),
            ..Default::default()
        }
    }

    fn existing() -> Vec<StudentRecord> {
        vec![serde_json::from_value(json!({ "id": 1001, "username": "rahul2024" })).expect("s")]
    }

    #[test]
    fn accepts_a_complete_profile() {
        assert!(validate_profile(&profile(), &existing(), None).is_ok());
    }

    #[test]
    fn rejects_missing_fields_and_short_passwords() {
        let mut p = profile();
        p.class.clear();
        assert!(validate_profile(&p, &[], None).is_err());

        let mut p = profile();
        p.password = "12345".into();
        let msg = validate_profile(&p, &[], None).expect_err("short password");
        assert!(msg.contains("at least 6"));
    }

    #[test]
    fn phone_must_be_ten_digits_when_present() {
        let mut p = profile();
        p.phone = "98765".into();
        assert!(validate_profile(&p, &[], None).is_err());
        p.phone = "98765abcde".into();
        assert!(validate_profile(&p, &[], None).is_err());
        p.phone = "9876543210".into();
        assert!(validate_profile(&p, &[], None).is_ok());
    }

    #[test]
    fn username_must_be_unique_except_for_self() {
        let mut p = profile();
        p.username = "rahul2024".into();
        assert!(validate_profile(&p, &existing(), None).is_err());
        assert!(validate_profile(&p, &existing(), Some(1001)).is_ok());
    }

    #[test]
    fn dates_and_months_parse_strictly() {
        assert!(parse_date("2025-03-10").is_ok());
        assert!(parse_date("10/03/2025").is_err());
        assert_eq!(parse_month("2025-03").expect("month"), (2025, 3));
        assert!(parse_month("2025-13").is_err());
    }
}
