use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// ========== PROFILE ==========
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Volunteer,
    Management,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Volunteer => "volunteer",
            Role::Management => "management",
        }
    }

    /// Unknown role strings yield `None`; callers decide whether to skip the record.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "volunteer" => Some(Role::Volunteer),
            "management" => Some(Role::Management),
            _ => None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct VolunteerProfile {
    pub user_id: String,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub topics_can_teach: Vec<String>,
    pub total_attendance_days: u32,
    pub referred_by: Option<String>,
    pub referral_count: u32,
    pub rewards: Vec<String>,
    pub created_at: String,
}

impl VolunteerProfile {
    /// Fresh profile as written at signup
    pub fn new_volunteer(user_id: &str, name: &str, email: &str, referred_by: Option<String>) -> Self {
        Self {
            user_id: user_id.to_string(),
            name: name.to_string(),
            email: email.to_string(),
            role: Role::Volunteer,
            topics_can_teach: Vec::new(),
            total_attendance_days: 0,
            referred_by,
            referral_count: 0,
            rewards: Vec::new(),
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn is_management(&self) -> bool {
        self.role == Role::Management
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateProfileRequest {
    pub name: String,
    pub email: String,
    pub referral_code: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateProfileRequest {
    pub name: Option<String>,
    pub topics_can_teach: Option<Vec<String>>,
}

// ========== ATTENDANCE ==========
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct AttendanceEvent {
    pub volunteer_id: String,
    pub date: NaiveDate,
    pub camp: String,
    pub marked_by: Option<String>,
    pub marked_at: Option<String>,
}

impl AttendanceEvent {
    pub fn new(volunteer_id: &str, date: NaiveDate, camp: &str) -> Self {
        Self {
            volunteer_id: volunteer_id.to_string(),
            date,
            camp: camp.trim().to_string(),
            marked_by: None,
            marked_at: None,
        }
    }

    /// Two events are the same attendance if they share volunteer, date and camp
    pub fn same_slot(&self, other: &AttendanceEvent) -> bool {
        self.volunteer_id == other.volunteer_id && self.date == other.date && self.camp == other.camp
    }
}

#[derive(Debug, Deserialize)]
pub struct MarkAttendanceRequest {
    pub volunteer_id: String,
    pub date: NaiveDate,
    pub camp: String,
}

#[derive(Debug, Serialize)]
pub struct MarkAttendanceResponse {
    pub attendance: AttendanceEvent,
    pub total_attendance_days: u32,
    pub referral_bonus_awarded: bool,
}

// ========== SCHEDULE ==========
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Schedule {
    pub schedule_id: String,
    pub date: NaiveDate,
    pub camp: String,
    pub topics: Vec<String>,
    pub created_by: String,
    pub created_at: String,
    pub last_updated: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateScheduleRequest {
    pub date: NaiveDate,
    pub camp: String,
    pub topics: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateScheduleRequest {
    pub topics: Vec<String>,
}

// ========== STUDENT ==========
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct StudentRecord {
    pub student_id: String,
    pub volunteer_id: String,
    pub student_name: String,
    pub camp: String,
    pub topics_taught: Vec<String>,
    pub date_added: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateStudentRequest {
    pub student_name: String,
    pub camp: String,
    #[serde(default)]
    pub topics_taught: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateStudentRequest {
    pub topics_taught: Vec<String>,
}

/// Trim topics, drop empties and duplicates, keep first-seen order
pub fn normalize_topics(topics: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(topics.len());
    for topic in topics {
        let topic = topic.trim();
        if !topic.is_empty() && !out.iter().any(|t| t == topic) {
            out.push(topic.to_string());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_topics() {
        let raw = vec![
            " Algebra ".to_string(),
            "".to_string(),
            "Storytelling".to_string(),
            "Algebra".to_string(),
            "   ".to_string(),
        ];
        assert_eq!(normalize_topics(&raw), vec!["Algebra", "Storytelling"]);
    }

    #[test]
    fn test_role_parse() {
        assert_eq!(Role::parse("volunteer"), Some(Role::Volunteer));
        assert_eq!(Role::parse(" management"), Some(Role::Management));
        assert_eq!(Role::parse("admin"), None);
        assert_eq!(Role::Management.as_str(), "management");
    }

    #[test]
    fn test_same_slot() {
        let date = NaiveDate::from_ymd_opt(2024, 7, 1).unwrap();
        let a = AttendanceEvent::new("v1", date, "Camp 1");
        let b = AttendanceEvent::new("v1", date, " Camp 1 ");
        let c = AttendanceEvent::new("v1", date, "Camp 2");
        assert!(a.same_slot(&b));
        assert!(!a.same_slot(&c));
    }

    #[test]
    fn test_mark_attendance_request_parses_iso_date() {
        let req: MarkAttendanceRequest =
            serde_json::from_str(r#"{"volunteer_id":"v1","date":"2024-07-01","camp":"Camp 1"}"#).unwrap();
        assert_eq!(req.date, NaiveDate::from_ymd_opt(2024, 7, 1).unwrap());
    }
}
