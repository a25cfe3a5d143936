use std::collections::HashMap;

use aws_sdk_dynamodb::error::BuildError;
use aws_sdk_dynamodb::operation::transact_write_items::TransactWriteItemsError;
use aws_sdk_dynamodb::types::{AttributeValue, Put, TransactWriteItem, Update};
use aws_sdk_dynamodb::Client as DynamoClient;
use chrono::NaiveDate;
use lambda_http::{Body, Error, Response};
use thiserror::Error as ThisError;

use crate::accounting::{record_attendance, referral_bonus_due, AttendanceOutcome};
use crate::config::Config;
use crate::errors::{AccountingError, ApiError};
use crate::profiles::{fetch_profile_item, profile_from_item, profile_pk, require_management, string_list, Item};
use crate::responses;
use crate::types::{AttendanceEvent, MarkAttendanceRequest, MarkAttendanceResponse};

#[derive(ThisError, Debug)]
pub enum CommitError {
    #[error(transparent)]
    Accounting(#[from] AccountingError),

    #[error("attendance for {0} kept conflicting with concurrent updates")]
    Contention(String),

    #[error("store error: {0}")]
    Store(#[from] Error),
}

pub fn attendance_pk(volunteer_id: &str) -> String {
    format!("ATTENDANCE#{}", volunteer_id)
}

/// Sort key carries the whole (date, camp) slot so the store enforces uniqueness
pub fn attendance_sk(date: NaiveDate, camp: &str) -> String {
    format!("DATE#{}#CAMP#{}", date, camp)
}

pub fn attendance_to_item(event: &AttendanceEvent) -> Item {
    let mut item = HashMap::new();
    item.insert("PK".to_string(), AttributeValue::S(attendance_pk(&event.volunteer_id)));
    item.insert("SK".to_string(), AttributeValue::S(attendance_sk(event.date, &event.camp)));
    item.insert("entity_type".to_string(), AttributeValue::S("attendance".to_string()));
    item.insert("volunteer_id".to_string(), AttributeValue::S(event.volunteer_id.clone()));
    item.insert("date".to_string(), AttributeValue::S(event.date.to_string()));
    item.insert("camp".to_string(), AttributeValue::S(event.camp.clone()));
    if let Some(marked_by) = &event.marked_by {
        item.insert("marked_by".to_string(), AttributeValue::S(marked_by.clone()));
    }
    if let Some(marked_at) = &event.marked_at {
        item.insert("marked_at".to_string(), AttributeValue::S(marked_at.clone()));
    }
    item
}

pub fn attendance_from_item(item: &Item) -> Option<AttendanceEvent> {
    let get = |key: &str| item.get(key).and_then(|v| v.as_s().ok()).map(|s| s.to_string());

    Some(AttendanceEvent {
        volunteer_id: get("volunteer_id")?,
        date: get("date")?.parse().ok()?,
        camp: get("camp")?,
        marked_by: get("marked_by"),
        marked_at: get("marked_at"),
    })
}

/// Condition that an attribute still holds the raw value that was read, or is
/// still absent. Corrupt stored values are matched as-is so the write replaces them.
fn unchanged_since_read(attr: &str, placeholder: &str, read: &Item, values: &mut Item) -> String {
    match read.get(attr) {
        Some(raw) => {
            values.insert(placeholder.to_string(), raw.clone());
            format!("{} = {}", attr, placeholder)
        }
        None => format!("attribute_not_exists({})", attr),
    }
}

/// Transaction for one attendance event.
///
/// Item 0 puts the attendance record only if the slot is free. Item 1 sets the
/// volunteer's counter, guarded on the stored value that was read. Item 2,
/// present only when a bonus was awarded, sets the referrer's count and reward
/// list under the same kind of guard.
pub fn commit_items(
    table_name: &str,
    event: &AttendanceEvent,
    outcome: &AttendanceOutcome,
    volunteer_read: &Item,
    referrer_read: Option<&Item>,
) -> Result<Vec<TransactWriteItem>, BuildError> {
    let mut items = Vec::with_capacity(3);

    let put = Put::builder()
        .table_name(table_name)
        .set_item(Some(attendance_to_item(event)))
        .condition_expression("attribute_not_exists(PK)")
        .build()?;
    items.push(TransactWriteItem::builder().put(put).build());

    let volunteer_pk = profile_pk(&outcome.volunteer.user_id);
    let mut values = HashMap::new();
    values.insert(
        ":next".to_string(),
        AttributeValue::N(outcome.volunteer.total_attendance_days.to_string()),
    );
    let guard = unchanged_since_read("total_attendance_days", ":expected", volunteer_read, &mut values);
    let volunteer_update = Update::builder()
        .table_name(table_name)
        .key("PK", AttributeValue::S(volunteer_pk.clone()))
        .key("SK", AttributeValue::S(volunteer_pk))
        .update_expression("SET total_attendance_days = :next")
        .condition_expression(format!("attribute_exists(PK) AND {}", guard))
        .set_expression_attribute_values(Some(values))
        .build()?;
    items.push(TransactWriteItem::builder().update(volunteer_update).build());

    if let Some(referrer) = &outcome.referrer {
        let empty = Item::new();
        let read = referrer_read.unwrap_or(&empty);
        let referrer_pk = profile_pk(&referrer.user_id);

        let mut values = HashMap::new();
        values.insert(":count".to_string(), AttributeValue::N(referrer.referral_count.to_string()));
        values.insert(":rewards".to_string(), string_list(&referrer.rewards));
        let count_guard = unchanged_since_read("referral_count", ":count_read", read, &mut values);
        let rewards_guard = unchanged_since_read("rewards", ":rewards_read", read, &mut values);

        let referrer_update = Update::builder()
            .table_name(table_name)
            .key("PK", AttributeValue::S(referrer_pk.clone()))
            .key("SK", AttributeValue::S(referrer_pk))
            .update_expression("SET referral_count = :count, rewards = :rewards")
            .condition_expression(format!(
                "attribute_exists(PK) AND {} AND {}",
                count_guard, rewards_guard
            ))
            .set_expression_attribute_values(Some(values))
            .build()?;
        items.push(TransactWriteItem::builder().update(referrer_update).build());
    }

    Ok(items)
}

const CONDITION_FAILED: &str = "ConditionalCheckFailed";
const TRANSACTION_CONFLICT: &str = "TransactionConflict";

/// Why an attendance transaction was cancelled
#[derive(Debug, Clone, PartialEq, Eq)]
enum Cancellation {
    /// The attendance slot already exists
    Duplicate,
    /// A guarded value moved since it was read; re-read and try again
    Conflict,
    /// Only the referrer update was refused; commit again without the bonus
    ReferrerRejected(String),
    /// The store refused the attendance or volunteer write outright
    Rejected(String),
}

fn is_retryable(code: &str) -> bool {
    code == CONDITION_FAILED || code == TRANSACTION_CONFLICT
}

/// Classify per-item cancellation reason codes, indexed like [`commit_items`]
fn classify_cancellation(codes: &[Option<&str>]) -> Cancellation {
    let failed = |index: usize| {
        codes
            .get(index)
            .copied()
            .flatten()
            .filter(|code| *code != "None")
    };

    if failed(0) == Some(CONDITION_FAILED) {
        return Cancellation::Duplicate;
    }
    for index in 0..2 {
        if let Some(code) = failed(index).filter(|code| !is_retryable(code)) {
            return Cancellation::Rejected(code.to_string());
        }
    }
    match failed(2).filter(|code| !is_retryable(code)) {
        Some(code) => Cancellation::ReferrerRejected(code.to_string()),
        None => Cancellation::Conflict,
    }
}

/// Conflicted commits allowed before giving up
#[derive(Debug)]
struct RetryBudget {
    remaining: u32,
}

impl RetryBudget {
    fn new(attempts: u32) -> Self {
        Self {
            remaining: attempts.max(1),
        }
    }

    /// Record one conflicted attempt; false once none are left
    fn spend(&mut self) -> bool {
        self.remaining = self.remaining.saturating_sub(1);
        self.remaining > 0
    }
}

async fn fetch_slot(
    client: &DynamoClient,
    table_name: &str,
    event: &AttendanceEvent,
) -> Result<Vec<AttendanceEvent>, Error> {
    let result = client
        .get_item()
        .table_name(table_name)
        .key("PK", AttributeValue::S(attendance_pk(&event.volunteer_id)))
        .key("SK", AttributeValue::S(attendance_sk(event.date, &event.camp)))
        .consistent_read(true)
        .send()
        .await?;

    Ok(result.item().and_then(attendance_from_item).into_iter().collect())
}

/// Read-modify-write of one attendance event inside a single transaction,
/// retried while concurrent writers move the guarded values underneath us.
pub async fn commit_attendance(
    client: &DynamoClient,
    config: &Config,
    event: &AttendanceEvent,
) -> Result<AttendanceOutcome, CommitError> {
    let table_name = config.table_name.as_str();
    let mut budget = RetryBudget::new(config.attendance_commit_attempts);
    let mut skip_bonus = false;
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;

        let not_found = || AccountingError::ProfileNotFound(event.volunteer_id.clone());
        let volunteer_item = fetch_profile_item(client, table_name, &event.volunteer_id)
            .await?
            .ok_or_else(not_found)?;
        let volunteer = profile_from_item(&volunteer_item).ok_or_else(not_found)?;
        let existing = fetch_slot(client, table_name, event).await?;

        let referrer_item = match referral_bonus_due(&volunteer) {
            Some(referrer_id) if !skip_bonus => fetch_profile_item(client, table_name, referrer_id).await?,
            _ => None,
        };
        let referrer = referrer_item.as_ref().and_then(profile_from_item);

        let outcome = record_attendance(event, &volunteer, &existing, referrer.as_ref())?;
        let items = commit_items(table_name, event, &outcome, &volunteer_item, referrer_item.as_ref())
            .map_err(Error::from)?;

        let result = client
            .transact_write_items()
            .set_transact_items(Some(items))
            .send()
            .await;

        let cancelled = match result {
            Ok(_) => {
                if let Some(warning) = &outcome.warning {
                    tracing::warn!("Attendance committed without referral bonus: {}", warning);
                }
                return Ok(outcome);
            }
            Err(e) => match e.into_service_error() {
                TransactWriteItemsError::TransactionCanceledException(cancelled) => cancelled,
                other => return Err(CommitError::Store(other.into())),
            },
        };

        let codes: Vec<Option<&str>> = cancelled.cancellation_reasons().iter().map(|r| r.code()).collect();
        match classify_cancellation(&codes) {
            Cancellation::Duplicate => {
                return Err(AccountingError::DuplicateAttendance {
                    volunteer_id: event.volunteer_id.clone(),
                    date: event.date.to_string(),
                    camp: event.camp.clone(),
                }
                .into());
            }
            Cancellation::Conflict => {
                if !budget.spend() {
                    return Err(CommitError::Contention(event.volunteer_id.clone()));
                }
                tracing::warn!(
                    "Attendance commit attempt {} for {} conflicted ({:?}), retrying",
                    attempt,
                    event.volunteer_id,
                    codes
                );
            }
            Cancellation::ReferrerRejected(code) => {
                tracing::warn!(
                    "Referrer update for {} rejected ({}), committing without bonus",
                    event.volunteer_id,
                    code
                );
                skip_bonus = true;
            }
            Cancellation::Rejected(code) => {
                return Err(CommitError::Store(
                    format!("attendance transaction rejected: {}", code).into(),
                ));
            }
        }
    }
}

fn commit_error_response(err: CommitError) -> Result<Response<Body>, Error> {
    match err {
        CommitError::Accounting(e) => {
            tracing::info!("Attendance rejected: {}", e);
            ApiError::from(e).into_response()
        }
        CommitError::Contention(volunteer_id) => {
            tracing::error!("Gave up marking attendance for {} after repeated conflicts", volunteer_id);
            ApiError::Conflict("Attendance was updated concurrently, please try again.".to_string())
                .into_response()
        }
        CommitError::Store(e) => Err(e),
    }
}

/// POST /attendance (management only)
pub async fn mark_attendance(
    client: &DynamoClient,
    config: &Config,
    user_id: &str,
    body: &[u8],
) -> Result<Response<Body>, Error> {
    if let Err(e) = require_management(client, &config.table_name, user_id).await? {
        return e.into_response();
    }

    let req: MarkAttendanceRequest = match serde_json::from_slice(body) {
        Ok(req) => req,
        Err(e) => return ApiError::BadRequest(format!("Invalid request body: {}", e)).into_response(),
    };

    if req.volunteer_id.trim().is_empty() || req.camp.trim().is_empty() {
        return ApiError::BadRequest("Please select a volunteer and a camp.".to_string()).into_response();
    }

    let mut event = AttendanceEvent::new(req.volunteer_id.trim(), req.date, &req.camp);
    event.marked_by = Some(user_id.to_string());
    event.marked_at = Some(chrono::Utc::now().to_rfc3339());

    let outcome = match commit_attendance(client, config, &event).await {
        Ok(outcome) => outcome,
        Err(e) => return commit_error_response(e),
    };

    tracing::info!(
        "Attendance marked for {} on {} at {} (total {})",
        event.volunteer_id,
        event.date,
        event.camp,
        outcome.volunteer.total_attendance_days
    );
    if let Some(referrer) = &outcome.referrer {
        tracing::info!("Referral bonus awarded to {}", referrer.user_id);
    }

    responses::created(&MarkAttendanceResponse {
        total_attendance_days: outcome.volunteer.total_attendance_days,
        referral_bonus_awarded: outcome.bonus_awarded(),
        attendance: event,
    })
}

/// GET /attendance?volunteer_id= (volunteers may only list their own)
pub async fn list_attendance(
    client: &DynamoClient,
    table_name: &str,
    user_id: &str,
    volunteer_id: Option<&str>,
) -> Result<Response<Body>, Error> {
    let target = volunteer_id.unwrap_or(user_id);
    if target != user_id {
        if let Err(e) = require_management(client, table_name, user_id).await? {
            return e.into_response();
        }
    }

    let result = client
        .query()
        .table_name(table_name)
        .key_condition_expression("PK = :pk AND begins_with(SK, :sk_prefix)")
        .expression_attribute_values(":pk", AttributeValue::S(attendance_pk(target)))
        .expression_attribute_values(":sk_prefix", AttributeValue::S("DATE#".to_string()))
        .send()
        .await?;

    let events: Vec<AttendanceEvent> = result.items().iter().filter_map(attendance_from_item).collect();
    responses::ok(&events)
}
