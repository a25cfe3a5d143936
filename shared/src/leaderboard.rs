use std::cmp::Ordering;

use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client as DynamoClient;
use lambda_http::{Body, Error, Response};
use serde::{Deserialize, Serialize};

use crate::profiles::fetch_all_profiles;
use crate::responses;
use crate::types::{Role, VolunteerProfile};

const SNAPSHOT_PK: &str = "LEADERBOARD";
const SNAPSHOT_SK: &str = "CURRENT";

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Gold,
    Silver,
    Bronze,
}

impl Tier {
    pub fn for_position(position: usize) -> Option<Self> {
        match position {
            0 => Some(Tier::Gold),
            1 => Some(Tier::Silver),
            2 => Some(Tier::Bronze),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankedProfile<'a> {
    pub profile: &'a VolunteerProfile,
    pub position: usize,
    pub tier: Option<Tier>,
}

/// What the leaderboard exposes per volunteer
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct LeaderboardEntry {
    pub position: usize,
    pub tier: Option<Tier>,
    pub user_id: String,
    pub name: String,
    pub email: String,
    pub total_attendance_days: u32,
}

impl From<&RankedProfile<'_>> for LeaderboardEntry {
    fn from(ranked: &RankedProfile<'_>) -> Self {
        Self {
            position: ranked.position,
            tier: ranked.tier,
            user_id: ranked.profile.user_id.clone(),
            name: ranked.profile.name.clone(),
            email: ranked.profile.email.clone(),
            total_attendance_days: ranked.profile.total_attendance_days,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct LeaderboardSnapshot {
    pub generated_at: String,
    pub entries: Vec<LeaderboardEntry>,
}

fn compare(a: &VolunteerProfile, b: &VolunteerProfile) -> Ordering {
    b.total_attendance_days
        .cmp(&a.total_attendance_days)
        .then_with(|| a.name.cmp(&b.name))
        .then_with(|| a.user_id.cmp(&b.user_id))
}

/// Rank volunteers by attendance, most first.
///
/// Ties break on name, then user id, so repeated calls over the same
/// snapshot always agree. Management profiles are left out.
pub fn rank(profiles: &[VolunteerProfile]) -> Vec<RankedProfile<'_>> {
    let mut volunteers: Vec<&VolunteerProfile> = profiles
        .iter()
        .filter(|p| p.role == Role::Volunteer)
        .collect();
    volunteers.sort_by(|a, b| compare(a, b));

    volunteers
        .into_iter()
        .enumerate()
        .map(|(position, profile)| RankedProfile {
            profile,
            position,
            tier: Tier::for_position(position),
        })
        .collect()
}

pub fn build_snapshot(profiles: &[VolunteerProfile]) -> LeaderboardSnapshot {
    LeaderboardSnapshot {
        generated_at: chrono::Utc::now().to_rfc3339(),
        entries: rank(profiles).iter().map(LeaderboardEntry::from).collect(),
    }
}

/// Persist the ranked snapshot so reads don't rescan every profile
pub async fn store_snapshot(
    client: &DynamoClient,
    table_name: &str,
    snapshot: &LeaderboardSnapshot,
) -> Result<(), Error> {
    client
        .put_item()
        .table_name(table_name)
        .item("PK", AttributeValue::S(SNAPSHOT_PK.to_string()))
        .item("SK", AttributeValue::S(SNAPSHOT_SK.to_string()))
        .item("entity_type", AttributeValue::S("leaderboard".to_string()))
        .item("entries", AttributeValue::S(serde_json::to_string(&snapshot.entries)?))
        .item("generated_at", AttributeValue::S(snapshot.generated_at.clone()))
        .send()
        .await?;

    tracing::info!("Leaderboard snapshot stored with {} entries", snapshot.entries.len());
    Ok(())
}

pub async fn load_snapshot(
    client: &DynamoClient,
    table_name: &str,
) -> Result<Option<LeaderboardSnapshot>, Error> {
    let result = client
        .get_item()
        .table_name(table_name)
        .key("PK", AttributeValue::S(SNAPSHOT_PK.to_string()))
        .key("SK", AttributeValue::S(SNAPSHOT_SK.to_string()))
        .send()
        .await?;

    let Some(item) = result.item() else {
        return Ok(None);
    };

    let entries = item
        .get("entries")
        .and_then(|v| v.as_s().ok())
        .and_then(|s| serde_json::from_str::<Vec<LeaderboardEntry>>(s).ok());
    let Some(entries) = entries else {
        tracing::warn!("Leaderboard snapshot unreadable, ranking live");
        return Ok(None);
    };

    Ok(Some(LeaderboardSnapshot {
        generated_at: item
            .get("generated_at")
            .and_then(|v| v.as_s().ok())
            .map(|s| s.to_string())
            .unwrap_or_default(),
        entries,
    }))
}

/// Re-rank from the full profile set and persist the result
pub async fn refresh_snapshot(client: &DynamoClient, table_name: &str) -> Result<LeaderboardSnapshot, Error> {
    let profiles = fetch_all_profiles(client, table_name).await?;
    let snapshot = build_snapshot(&profiles);
    store_snapshot(client, table_name, &snapshot).await?;
    Ok(snapshot)
}

/// GET /leaderboard
pub async fn get_leaderboard(client: &DynamoClient, table_name: &str) -> Result<Response<Body>, Error> {
    let snapshot = match load_snapshot(client, table_name).await? {
        Some(snapshot) => snapshot,
        None => {
            let profiles = fetch_all_profiles(client, table_name).await?;
            build_snapshot(&profiles)
        }
    };

    responses::ok(&snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(id: &str, name: &str, days: u32) -> VolunteerProfile {
        let mut p = VolunteerProfile::new_volunteer(id, name, "", None);
        p.total_attendance_days = days;
        p
    }

    fn names(ranked: &[RankedProfile<'_>]) -> Vec<String> {
        ranked.iter().map(|r| r.profile.name.clone()).collect()
    }

    #[test]
    fn test_empty_input() {
        assert!(rank(&[]).is_empty());
    }

    #[test]
    fn test_ties_break_alphabetically() {
        let profiles = vec![profile("1", "Bob", 10), profile("2", "Amy", 10), profile("3", "Zoe", 20)];
        let ranked = rank(&profiles);
        assert_eq!(names(&ranked), vec!["Zoe", "Amy", "Bob"]);
        assert_eq!(ranked[0].profile.total_attendance_days, 20);
    }

    #[test]
    fn test_management_excluded() {
        let mut boss = profile("m", "Mona", 99);
        boss.role = Role::Management;
        let profiles = vec![boss, profile("1", "Amy", 1), profile("2", "Bob", 2)];

        let ranked = rank(&profiles);
        assert_eq!(ranked.len(), 2);
        assert!(ranked.iter().all(|r| r.profile.role == Role::Volunteer));
    }

    #[test]
    fn test_tiers_only_on_top_three() {
        let profiles: Vec<_> = (0..5).map(|i| profile(&i.to_string(), &format!("V{i}"), 10 - i)).collect();
        let tiers: Vec<_> = rank(&profiles).iter().map(|r| r.tier).collect();
        assert_eq!(
            tiers,
            vec![Some(Tier::Gold), Some(Tier::Silver), Some(Tier::Bronze), None, None]
        );
    }

    #[test]
    fn test_fewer_than_three() {
        let profiles = vec![profile("1", "Amy", 3), profile("2", "Bob", 5)];
        let ranked = rank(&profiles);
        assert_eq!(ranked[0].tier, Some(Tier::Gold));
        assert_eq!(ranked[1].tier, Some(Tier::Silver));
        assert_eq!(ranked[1].position, 1);
    }

    #[test]
    fn test_missing_name_sorts_first_among_ties() {
        let profiles = vec![profile("1", "Amy", 4), profile("2", "", 4)];
        assert_eq!(names(&rank(&profiles)), vec!["", "Amy"]);
    }

    #[test]
    fn test_identical_name_and_days_order_by_id() {
        let profiles = vec![profile("b", "Sam", 7), profile("a", "Sam", 7)];
        let first = rank(&profiles);
        let again = rank(&profiles);
        assert_eq!(first[0].profile.user_id, "a");
        assert_eq!(first, again);
    }

    #[test]
    fn test_adjacent_order_invariant() {
        let profiles = vec![
            profile("1", "Kim", 3),
            profile("2", "Ann", 8),
            profile("3", "Lee", 3),
            profile("4", "Bea", 8),
            profile("5", "Cal", 0),
        ];
        let ranked = rank(&profiles);
        for pair in ranked.windows(2) {
            let (a, b) = (pair[0].profile, pair[1].profile);
            assert!(a.total_attendance_days >= b.total_attendance_days);
            if a.total_attendance_days == b.total_attendance_days {
                assert!(a.name <= b.name);
            }
        }
    }

    #[test]
    fn test_rank_leaves_input_untouched() {
        let profiles = vec![profile("1", "Bob", 1), profile("2", "Amy", 2)];
        let before = profiles.clone();
        let _ = rank(&profiles);
        assert_eq!(profiles, before);
    }

    #[test]
    fn test_snapshot_entries() {
        let profiles = vec![profile("1", "Bob", 1), profile("2", "Amy", 2)];
        let snap = build_snapshot(&profiles);
        assert_eq!(snap.entries.len(), 2);
        assert_eq!(snap.entries[0].user_id, "2");
        assert_eq!(snap.entries[0].tier, Some(Tier::Gold));

        let json = serde_json::to_value(&snap.entries[0]).unwrap();
        assert_eq!(json["tier"], "Gold");
    }
}
