use std::collections::HashMap;

use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client as DynamoClient;
use chrono::NaiveDate;
use lambda_http::{Body, Error, Response};

use crate::errors::ApiError;
use crate::profiles::{require_management, string_list, Item};
use crate::responses;
use crate::types::{normalize_topics, CreateScheduleRequest, Schedule, UpdateScheduleRequest};

fn schedule_pk(date: NaiveDate) -> String {
    format!("SCHEDULE#{}", date)
}

fn schedule_sk(schedule_id: &str) -> String {
    format!("SCHEDULE#{}", schedule_id)
}

fn schedule_from_item(item: &Item) -> Option<Schedule> {
    let get = |key: &str| item.get(key).and_then(|v| v.as_s().ok()).map(|s| s.to_string());

    let schedule_id = get("SK")?.strip_prefix("SCHEDULE#")?.to_string();
    let topics = match item.get("topics") {
        Some(AttributeValue::L(values)) => values
            .iter()
            .filter_map(|v| v.as_s().ok())
            .cloned()
            .collect(),
        _ => Vec::new(),
    };

    Some(Schedule {
        schedule_id,
        date: get("date")?.parse().ok()?,
        camp: get("camp").unwrap_or_default(),
        topics,
        created_by: get("created_by").unwrap_or_default(),
        created_at: get("created_at").unwrap_or_default(),
        last_updated: get("last_updated"),
    })
}

/// Stored camps are trimmed on write; requested names are trimmed to match
fn same_camp(stored: &str, requested: &str) -> bool {
    stored == requested.trim()
}

fn schedule_for_camp<'a>(schedules: &'a [Schedule], camp: &str) -> Option<&'a Schedule> {
    schedules.iter().find(|s| same_camp(&s.camp, camp))
}

/// Deduplicated topics published for one date and camp
pub fn topics_for_day(schedules: &[Schedule], date: NaiveDate, camp: &str) -> Vec<String> {
    let topics: Vec<String> = schedules
        .iter()
        .filter(|s| s.date == date && same_camp(&s.camp, camp))
        .flat_map(|s| s.topics.iter().cloned())
        .collect();
    normalize_topics(&topics)
}

fn parse_date(raw: Option<&str>) -> Result<NaiveDate, ApiError> {
    raw.ok_or_else(|| ApiError::BadRequest("Missing date query parameter".to_string()))?
        .parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid date: {}", e)))
}

async fn query_schedules(
    client: &DynamoClient,
    table_name: &str,
    date: NaiveDate,
) -> Result<Vec<Schedule>, Error> {
    let result = client
        .query()
        .table_name(table_name)
        .key_condition_expression("PK = :pk AND begins_with(SK, :sk_prefix)")
        .expression_attribute_values(":pk", AttributeValue::S(schedule_pk(date)))
        .expression_attribute_values(":sk_prefix", AttributeValue::S("SCHEDULE#".to_string()))
        .send()
        .await?;

    Ok(result.items().iter().filter_map(schedule_from_item).collect())
}

/// Publish a schedule (management only)
pub async fn create_schedule(
    client: &DynamoClient,
    table_name: &str,
    user_id: &str,
    body: &[u8],
) -> Result<Response<Body>, Error> {
    if let Err(e) = require_management(client, table_name, user_id).await? {
        return e.into_response();
    }

    let req: CreateScheduleRequest = match serde_json::from_slice(body) {
        Ok(req) => req,
        Err(e) => return ApiError::BadRequest(format!("Invalid request body: {}", e)).into_response(),
    };

    let topics = normalize_topics(&req.topics);
    if topics.is_empty() {
        return ApiError::BadRequest("Please enter at least one topic.".to_string()).into_response();
    }
    let camp = req.camp.trim().to_string();
    if camp.is_empty() {
        return ApiError::BadRequest("Camp is required".to_string()).into_response();
    }

    let existing = query_schedules(client, table_name, req.date).await?;
    if let Some(current) = schedule_for_camp(&existing, &camp) {
        tracing::info!("Schedule {} already covers {} at {}", current.schedule_id, req.date, camp);
        return ApiError::Conflict(
            "Schedule for this date and camp already exists. Please update it instead.".to_string(),
        )
        .into_response();
    }

    let schedule = Schedule {
        schedule_id: uuid::Uuid::new_v4().to_string(),
        date: req.date,
        camp,
        topics,
        created_by: user_id.to_string(),
        created_at: chrono::Utc::now().to_rfc3339(),
        last_updated: None,
    };

    client
        .put_item()
        .table_name(table_name)
        .item("PK", AttributeValue::S(schedule_pk(schedule.date)))
        .item("SK", AttributeValue::S(schedule_sk(&schedule.schedule_id)))
        .item("entity_type", AttributeValue::S("schedule".to_string()))
        .item("date", AttributeValue::S(schedule.date.to_string()))
        .item("camp", AttributeValue::S(schedule.camp.clone()))
        .item("topics", string_list(&schedule.topics))
        .item("created_by", AttributeValue::S(schedule.created_by.clone()))
        .item("created_at", AttributeValue::S(schedule.created_at.clone()))
        .send()
        .await?;

    tracing::info!("Schedule {} published for {} at {}", schedule.schedule_id, schedule.date, schedule.camp);
    responses::created(&schedule)
}

/// List schedules for a date, optionally one camp
pub async fn list_schedules(
    client: &DynamoClient,
    table_name: &str,
    date: Option<&str>,
    camp: Option<&str>,
) -> Result<Response<Body>, Error> {
    let date = match parse_date(date) {
        Ok(date) => date,
        Err(e) => return e.into_response(),
    };

    let mut schedules = query_schedules(client, table_name, date).await?;
    if let Some(camp) = camp {
        schedules.retain(|s| same_camp(&s.camp, camp));
    }

    responses::ok(&schedules)
}

/// Topics volunteers can pick from for a date and camp
pub async fn list_topics(
    client: &DynamoClient,
    table_name: &str,
    date: Option<&str>,
    camp: Option<&str>,
) -> Result<Response<Body>, Error> {
    let date = match parse_date(date) {
        Ok(date) => date,
        Err(e) => return e.into_response(),
    };
    let Some(camp) = camp else {
        return ApiError::BadRequest("Missing camp query parameter".to_string()).into_response();
    };

    let schedules = query_schedules(client, table_name, date).await?;
    responses::ok(&topics_for_day(&schedules, date, camp))
}

/// Replace a schedule's topics (management only)
pub async fn update_schedule(
    client: &DynamoClient,
    table_name: &str,
    user_id: &str,
    schedule_id: &str,
    date: Option<&str>,
    body: &[u8],
) -> Result<Response<Body>, Error> {
    if let Err(e) = require_management(client, table_name, user_id).await? {
        return e.into_response();
    }
    let date = match parse_date(date) {
        Ok(date) => date,
        Err(e) => return e.into_response(),
    };

    let req: UpdateScheduleRequest = match serde_json::from_slice(body) {
        Ok(req) => req,
        Err(e) => return ApiError::BadRequest(format!("Invalid request body: {}", e)).into_response(),
    };
    let topics = normalize_topics(&req.topics);
    if topics.is_empty() {
        return ApiError::BadRequest("Please enter at least one topic.".to_string()).into_response();
    }

    let mut values = HashMap::new();
    values.insert(":topics".to_string(), string_list(&topics));
    values.insert(":now".to_string(), AttributeValue::S(chrono::Utc::now().to_rfc3339()));

    let result = client
        .update_item()
        .table_name(table_name)
        .key("PK", AttributeValue::S(schedule_pk(date)))
        .key("SK", AttributeValue::S(schedule_sk(schedule_id)))
        .update_expression("SET topics = :topics, last_updated = :now")
        .condition_expression("attribute_exists(PK)")
        .set_expression_attribute_values(Some(values))
        .return_values(aws_sdk_dynamodb::types::ReturnValue::AllNew)
        .send()
        .await;

    let output = match result {
        Ok(output) => output,
        Err(e) => {
            let service_err = e.into_service_error();
            if service_err.is_conditional_check_failed_exception() {
                return ApiError::NotFound("Schedule not found".to_string()).into_response();
            }
            return Err(service_err.into());
        }
    };

    match output.attributes().and_then(schedule_from_item) {
        Some(schedule) => responses::ok(&schedule),
        None => ApiError::NotFound("Schedule not found".to_string()).into_response(),
    }
}

/// Delete a schedule (management only)
pub async fn delete_schedule(
    client: &DynamoClient,
    table_name: &str,
    user_id: &str,
    schedule_id: &str,
    date: Option<&str>,
) -> Result<Response<Body>, Error> {
    if let Err(e) = require_management(client, table_name, user_id).await? {
        return e.into_response();
    }
    let date = match parse_date(date) {
        Ok(date) => date,
        Err(e) => return e.into_response(),
    };

    client
        .delete_item()
        .table_name(table_name)
        .key("PK", AttributeValue::S(schedule_pk(date)))
        .key("SK", AttributeValue::S(schedule_sk(schedule_id)))
        .send()
        .await?;

    tracing::info!("Schedule {} deleted", schedule_id);
    responses::ok(&serde_json::json!({"deleted": schedule_id}))
}
