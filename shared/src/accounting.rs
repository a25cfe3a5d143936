use crate::errors::AccountingError;
use crate::types::{AttendanceEvent, VolunteerProfile};

/// Attendance days at which the referring volunteer is rewarded
pub const REFERRAL_THRESHOLD: u32 = 30;

/// Result of applying one attendance event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttendanceOutcome {
    pub volunteer: VolunteerProfile,
    /// Present only when a referral bonus was awarded
    pub referrer: Option<VolunteerProfile>,
    pub reward: Option<String>,
    /// Non-fatal; the increment still commits
    pub warning: Option<AccountingError>,
}

impl AttendanceOutcome {
    pub fn bonus_awarded(&self) -> bool {
        self.referrer.is_some()
    }
}

/// Referrer id to look up if the next attendance event lands exactly on the threshold.
pub fn referral_bonus_due(volunteer: &VolunteerProfile) -> Option<&str> {
    let referrer_id = volunteer.referred_by.as_deref()?;
    let next = volunteer.total_attendance_days.checked_add(1)?;
    (next == REFERRAL_THRESHOLD).then_some(referrer_id)
}

pub fn reward_text(volunteer_name: &str) -> String {
    format!(
        "Referral Bonus for {} reaching {} days attendance",
        volunteer_name, REFERRAL_THRESHOLD
    )
}

/// Apply one attendance event to a volunteer and, at the threshold crossing,
/// to the referring volunteer.
///
/// `existing` holds the attendance events already recorded for the volunteer;
/// a matching (volunteer, date, camp) slot rejects the event before anything
/// changes. The bonus fires only when the incremented total equals
/// [`REFERRAL_THRESHOLD`], so it is awarded at most once per referral.
pub fn record_attendance(
    event: &AttendanceEvent,
    volunteer: &VolunteerProfile,
    existing: &[AttendanceEvent],
    referrer: Option<&VolunteerProfile>,
) -> Result<AttendanceOutcome, AccountingError> {
    if existing.iter().any(|e| e.same_slot(event)) {
        return Err(AccountingError::DuplicateAttendance {
            volunteer_id: event.volunteer_id.clone(),
            date: event.date.to_string(),
            camp: event.camp.clone(),
        });
    }

    if event.volunteer_id != volunteer.user_id {
        return Err(AccountingError::ProfileNotFound(event.volunteer_id.clone()));
    }

    let next_total = volunteer
        .total_attendance_days
        .checked_add(1)
        .ok_or_else(|| AccountingError::CounterOverflow(volunteer.user_id.clone()))?;
    let referrer_id = referral_bonus_due(volunteer).map(str::to_string);

    let mut updated = volunteer.clone();
    updated.total_attendance_days = next_total;

    let mut outcome = AttendanceOutcome {
        volunteer: updated,
        referrer: None,
        reward: None,
        warning: None,
    };

    let Some(referrer_id) = referrer_id else {
        return Ok(outcome);
    };

    match referrer.filter(|r| r.user_id == referrer_id && r.user_id != volunteer.user_id) {
        Some(referrer) => {
            let reward = reward_text(&volunteer.name);
            let mut rewarded = referrer.clone();
            rewarded.referral_count = rewarded.referral_count.saturating_add(1);
            rewarded.rewards.push(reward.clone());
            outcome.referrer = Some(rewarded);
            outcome.reward = Some(reward);
        }
        None => {
            outcome.warning = Some(AccountingError::ReferrerNotFound {
                volunteer_id: volunteer.user_id.clone(),
                referrer_id,
            });
        }
    }

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 7, day).unwrap()
    }

    fn volunteer(id: &str, name: &str, days: u32, referred_by: Option<&str>) -> VolunteerProfile {
        let mut p = VolunteerProfile::new_volunteer(id, name, &format!("{id}@ldl.org"), referred_by.map(String::from));
        p.total_attendance_days = days;
        p
    }

    #[test]
    fn test_increments_by_exactly_one() {
        let a = volunteer("a", "Amy", 4, None);
        let event = AttendanceEvent::new("a", date(1), "Camp 1");

        let outcome = record_attendance(&event, &a, &[], None).unwrap();
        assert_eq!(outcome.volunteer.total_attendance_days, 5);
        assert!(outcome.referrer.is_none());
        assert!(outcome.warning.is_none());
    }

    #[test]
    fn test_referral_bonus_at_threshold() {
        let a = volunteer("a", "Amy", 29, Some("r"));
        let r = volunteer("r", "Ravi", 50, None);
        let event = AttendanceEvent::new("a", date(2), "Camp 1");

        let outcome = record_attendance(&event, &a, &[], Some(&r)).unwrap();
        assert_eq!(outcome.volunteer.total_attendance_days, 30);

        let rewarded = outcome.referrer.expect("bonus should fire");
        assert_eq!(rewarded.referral_count, 1);
        assert_eq!(rewarded.rewards.len(), 1);
        assert!(rewarded.rewards[0].contains("Amy"));
        assert!(rewarded.rewards[0].contains("30"));
        // Referrer's own attendance is untouched
        assert_eq!(rewarded.total_attendance_days, 50);
    }

    #[test]
    fn test_no_bonus_past_threshold() {
        let r = volunteer("r", "Ravi", 0, None);
        for days in [30, 31, 45] {
            let a = volunteer("a", "Amy", days, Some("r"));
            let event = AttendanceEvent::new("a", date(3), "Camp 1");
            let outcome = record_attendance(&event, &a, &[], Some(&r)).unwrap();
            assert!(!outcome.bonus_awarded(), "bonus re-fired at {days}");
            assert!(outcome.warning.is_none());
        }
    }

    #[test]
    fn test_bonus_fires_once_after_repaired_jump() {
        // Counter repaired to 29 with only 28 events on record; the next event lands on 30.
        let r = volunteer("r", "Ravi", 0, None);
        let a = volunteer("a", "Amy", 29, Some("r"));

        let first = record_attendance(&AttendanceEvent::new("a", date(4), "Camp 1"), &a, &[], Some(&r)).unwrap();
        assert!(first.bonus_awarded());

        let second = record_attendance(
            &AttendanceEvent::new("a", date(5), "Camp 1"),
            &first.volunteer,
            &[],
            first.referrer.as_ref(),
        )
        .unwrap();
        assert!(!second.bonus_awarded());
        assert_eq!(second.volunteer.total_attendance_days, 31);
    }

    #[test]
    fn test_no_bonus_without_referral() {
        let a = volunteer("a", "Amy", 29, None);
        let event = AttendanceEvent::new("a", date(6), "Camp 2");
        let outcome = record_attendance(&event, &a, &[], None).unwrap();
        assert_eq!(outcome.volunteer.total_attendance_days, 30);
        assert!(!outcome.bonus_awarded());
    }

    #[test]
    fn test_missing_referrer_is_a_warning() {
        let a = volunteer("a", "Amy", 29, Some("ghost"));
        let event = AttendanceEvent::new("a", date(7), "Camp 1");

        let outcome = record_attendance(&event, &a, &[], None).unwrap();
        assert_eq!(outcome.volunteer.total_attendance_days, 30);
        assert_eq!(
            outcome.warning,
            Some(AccountingError::ReferrerNotFound {
                volunteer_id: "a".into(),
                referrer_id: "ghost".into(),
            })
        );
    }

    #[test]
    fn test_wrong_referrer_profile_is_not_rewarded() {
        let a = volunteer("a", "Amy", 29, Some("r"));
        let other = volunteer("x", "Xavi", 3, None);
        let event = AttendanceEvent::new("a", date(8), "Camp 1");

        let outcome = record_attendance(&event, &a, &[], Some(&other)).unwrap();
        assert!(!outcome.bonus_awarded());
        assert!(matches!(outcome.warning, Some(AccountingError::ReferrerNotFound { .. })));
    }

    #[test]
    fn test_self_referral_is_not_rewarded() {
        let a = volunteer("a", "Amy", 29, Some("a"));
        let event = AttendanceEvent::new("a", date(9), "Camp 1");

        let outcome = record_attendance(&event, &a, &[], Some(&a)).unwrap();
        assert!(!outcome.bonus_awarded());
        assert!(outcome.warning.is_some());
    }

    #[test]
    fn test_duplicate_rejected_without_mutation() {
        let a = volunteer("a", "Amy", 12, None);
        let event = AttendanceEvent::new("a", date(10), "Camp 1");
        let existing = vec![event.clone()];

        let err = record_attendance(&event, &a, &existing, None).unwrap_err();
        assert!(matches!(err, AccountingError::DuplicateAttendance { .. }));
        assert_eq!(a.total_attendance_days, 12);
    }

    #[test]
    fn test_same_date_other_camp_is_not_duplicate() {
        let a = volunteer("a", "Amy", 12, None);
        let existing = vec![AttendanceEvent::new("a", date(10), "Camp 1")];
        let event = AttendanceEvent::new("a", date(10), "Camp 2");

        let outcome = record_attendance(&event, &a, &existing, None).unwrap();
        assert_eq!(outcome.volunteer.total_attendance_days, 13);
    }

    #[test]
    fn test_event_for_other_volunteer_is_profile_not_found() {
        let a = volunteer("a", "Amy", 1, None);
        let event = AttendanceEvent::new("b", date(11), "Camp 1");
        assert_eq!(
            record_attendance(&event, &a, &[], None).unwrap_err(),
            AccountingError::ProfileNotFound("b".into())
        );
    }

    #[test]
    fn test_total_never_decreases_across_sequence() {
        let mut a = volunteer("a", "Amy", 0, Some("r"));
        let mut r = volunteer("r", "Ravi", 0, None);
        let mut recorded: Vec<AttendanceEvent> = Vec::new();
        let mut bonuses = 0;

        for day in 1..=31u32 {
            let event = AttendanceEvent::new("a", date(day), "Camp 1");
            let before = a.total_attendance_days;
            let outcome = record_attendance(&event, &a, &recorded, Some(&r)).unwrap();
            assert_eq!(outcome.volunteer.total_attendance_days, before + 1);
            if let Some(rewarded) = outcome.referrer {
                bonuses += 1;
                r = rewarded;
            }
            a = outcome.volunteer;
            recorded.push(event);
        }

        assert_eq!(a.total_attendance_days, 31);
        assert_eq!(bonuses, 1);
        assert_eq!(r.referral_count, 1);
    }

    #[test]
    fn test_counter_overflow_rejected() {
        let a = volunteer("a", "Amy", u32::MAX, None);
        let event = AttendanceEvent::new("a", date(12), "Camp 1");

        assert_eq!(
            record_attendance(&event, &a, &[], None).unwrap_err(),
            AccountingError::CounterOverflow("a".into())
        );
        assert_eq!(a.total_attendance_days, u32::MAX);
    }

    #[test]
    fn test_referral_bonus_due() {
        assert_eq!(referral_bonus_due(&volunteer("a", "Amy", 29, Some("r"))), Some("r"));
        assert_eq!(referral_bonus_due(&volunteer("a", "Amy", 28, Some("r"))), None);
        assert_eq!(referral_bonus_due(&volunteer("a", "Amy", 29, None)), None);
        assert_eq!(referral_bonus_due(&volunteer("a", "Amy", u32::MAX, Some("r"))), None);
    }
}
