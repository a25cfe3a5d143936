use std::collections::HashMap;

use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client as DynamoClient;
use lambda_http::{Body, Error, Response};

use crate::errors::ApiError;
use crate::responses;
use crate::types::{normalize_topics, CreateProfileRequest, Role, UpdateProfileRequest, VolunteerProfile};

pub type Item = HashMap<String, AttributeValue>;

pub fn profile_pk(user_id: &str) -> String {
    format!("USER#{}", user_id)
}

// ---------- sanitizing adapter ----------

fn string_attr(item: &Item, key: &str) -> Option<String> {
    item.get(key).and_then(|v| v.as_s().ok()).map(|s| s.to_string())
}

/// Missing, negative or non-numeric counters read as 0
fn count_attr(item: &Item, key: &str) -> u32 {
    item.get(key)
        .and_then(|v| v.as_n().ok())
        .and_then(|n| n.trim().parse::<u32>().ok())
        .unwrap_or(0)
}

/// Accepts a list of strings or a string set; anything else reads as empty
fn string_list_attr(item: &Item, key: &str) -> Vec<String> {
    match item.get(key) {
        Some(AttributeValue::L(values)) => values
            .iter()
            .filter_map(|v| v.as_s().ok())
            .map(|s| s.to_string())
            .collect(),
        Some(AttributeValue::Ss(values)) => values.clone(),
        _ => Vec::new(),
    }
}

/// Build a profile from a raw store item.
///
/// Returns `None` when the item has no id or no recognizable role, so one
/// corrupt record is skipped instead of failing the whole listing.
pub fn profile_from_item(item: &Item) -> Option<VolunteerProfile> {
    let user_id = string_attr(item, "user_id").or_else(|| {
        string_attr(item, "PK").and_then(|pk| pk.strip_prefix("USER#").map(str::to_string))
    })?;
    if user_id.is_empty() {
        return None;
    }

    let role = string_attr(item, "role").as_deref().and_then(Role::parse);
    let Some(role) = role else {
        tracing::warn!("Skipping profile {} with unrecognized role", user_id);
        return None;
    };

    let referred_by = string_attr(item, "referred_by").filter(|r| !r.is_empty() && *r != user_id);

    Some(VolunteerProfile {
        name: string_attr(item, "name").unwrap_or_default(),
        email: string_attr(item, "email").unwrap_or_default(),
        role,
        topics_can_teach: normalize_topics(&string_list_attr(item, "topics_can_teach")),
        total_attendance_days: count_attr(item, "total_attendance_days"),
        referred_by,
        referral_count: count_attr(item, "referral_count"),
        rewards: string_list_attr(item, "rewards"),
        created_at: string_attr(item, "created_at").unwrap_or_default(),
        user_id,
    })
}

pub fn string_list(values: &[String]) -> AttributeValue {
    AttributeValue::L(values.iter().cloned().map(AttributeValue::S).collect())
}

pub fn profile_to_item(profile: &VolunteerProfile) -> Item {
    let pk = profile_pk(&profile.user_id);
    let mut item = HashMap::new();
    item.insert("PK".to_string(), AttributeValue::S(pk.clone()));
    item.insert("SK".to_string(), AttributeValue::S(pk));
    item.insert("entity_type".to_string(), AttributeValue::S("profile".to_string()));
    item.insert("user_id".to_string(), AttributeValue::S(profile.user_id.clone()));
    item.insert("name".to_string(), AttributeValue::S(profile.name.clone()));
    item.insert("email".to_string(), AttributeValue::S(profile.email.clone()));
    item.insert("role".to_string(), AttributeValue::S(profile.role.as_str().to_string()));
    item.insert("topics_can_teach".to_string(), string_list(&profile.topics_can_teach));
    item.insert(
        "total_attendance_days".to_string(),
        AttributeValue::N(profile.total_attendance_days.to_string()),
    );
    item.insert(
        "referral_count".to_string(),
        AttributeValue::N(profile.referral_count.to_string()),
    );
    item.insert("rewards".to_string(), string_list(&profile.rewards));
    item.insert("created_at".to_string(), AttributeValue::S(profile.created_at.clone()));
    if let Some(referrer) = &profile.referred_by {
        item.insert("referred_by".to_string(), AttributeValue::S(referrer.clone()));
    }
    item
}

// ---------- store access ----------

/// Point read of one profile
pub async fn fetch_profile(
    client: &DynamoClient,
    table_name: &str,
    user_id: &str,
) -> Result<Option<VolunteerProfile>, Error> {
    Ok(fetch_profile_item(client, table_name, user_id)
        .await?
        .as_ref()
        .and_then(profile_from_item))
}

/// Raw profile item, before sanitizing. Conditional writes compare against these values.
pub async fn fetch_profile_item(
    client: &DynamoClient,
    table_name: &str,
    user_id: &str,
) -> Result<Option<Item>, Error> {
    let pk = profile_pk(user_id);

    let result = client
        .get_item()
        .table_name(table_name)
        .key("PK", AttributeValue::S(pk.clone()))
        .key("SK", AttributeValue::S(pk))
        .consistent_read(true)
        .send()
        .await?;

    Ok(result.item().cloned())
}

/// Full profile set, following scan pagination
pub async fn fetch_all_profiles(
    client: &DynamoClient,
    table_name: &str,
) -> Result<Vec<VolunteerProfile>, Error> {
    let mut profiles = Vec::new();
    let mut start_key: Option<Item> = None;

    loop {
        let result = client
            .scan()
            .table_name(table_name)
            .filter_expression("entity_type = :type")
            .expression_attribute_values(":type", AttributeValue::S("profile".to_string()))
            .set_exclusive_start_key(start_key.take())
            .send()
            .await?;

        profiles.extend(result.items().iter().filter_map(profile_from_item));

        match result.last_evaluated_key() {
            Some(key) if !key.is_empty() => start_key = Some(key.clone()),
            _ => break,
        }
    }

    tracing::info!("Loaded {} profiles", profiles.len());
    Ok(profiles)
}

/// Caller must be management
pub async fn require_management(
    client: &DynamoClient,
    table_name: &str,
    user_id: &str,
) -> Result<Result<VolunteerProfile, ApiError>, Error> {
    Ok(match fetch_profile(client, table_name, user_id).await? {
        Some(profile) if profile.is_management() => Ok(profile),
        Some(_) => Err(ApiError::Forbidden("Management role required".to_string())),
        None => Err(ApiError::NotFound("Profile not found".to_string())),
    })
}

/// Referral codes are referrer user ids; unknown codes and self-referrals are dropped
async fn resolve_referral(
    client: &DynamoClient,
    table_name: &str,
    user_id: &str,
    code: Option<&str>,
) -> Result<Option<String>, Error> {
    let Some(code) = code.map(str::trim).filter(|c| !c.is_empty()) else {
        return Ok(None);
    };

    if code == user_id {
        tracing::warn!("User {} tried to refer themselves, ignoring code", user_id);
        return Ok(None);
    }

    match fetch_profile(client, table_name, code).await? {
        Some(referrer) => Ok(Some(referrer.user_id)),
        None => {
            tracing::warn!("Invalid referral code {} for user {}, signing up without referrer", code, user_id);
            Ok(None)
        }
    }
}

// ---------- handlers ----------

/// Create the caller's profile after identity-provider signup.
/// Called once; a second call is rejected so `referred_by` cannot be rewritten.
pub async fn create_profile(
    client: &DynamoClient,
    table_name: &str,
    user_id: &str,
    body: &[u8],
) -> Result<Response<Body>, Error> {
    let req: CreateProfileRequest = match serde_json::from_slice(body) {
        Ok(req) => req,
        Err(e) => return ApiError::BadRequest(format!("Invalid request body: {}", e)).into_response(),
    };

    if req.name.trim().is_empty() || req.email.trim().is_empty() {
        return ApiError::BadRequest("Name and email are required".to_string()).into_response();
    }

    let referred_by = resolve_referral(client, table_name, user_id, req.referral_code.as_deref()).await?;
    let profile = VolunteerProfile::new_volunteer(user_id, req.name.trim(), req.email.trim(), referred_by);

    let result = client
        .put_item()
        .table_name(table_name)
        .set_item(Some(profile_to_item(&profile)))
        .condition_expression("attribute_not_exists(PK)")
        .send()
        .await;

    if let Err(e) = result {
        let service_err = e.into_service_error();
        if service_err.is_conditional_check_failed_exception() {
            return ApiError::Conflict("Profile already exists".to_string()).into_response();
        }
        return Err(service_err.into());
    }

    tracing::info!("Profile created for {} (referred_by: {:?})", user_id, profile.referred_by);
    responses::created(&profile)
}

/// Get the caller's profile
pub async fn get_profile(
    client: &DynamoClient,
    table_name: &str,
    user_id: &str,
) -> Result<Response<Body>, Error> {
    match fetch_profile(client, table_name, user_id).await? {
        Some(profile) => responses::ok(&profile),
        None => ApiError::NotFound("Profile not found".to_string()).into_response(),
    }
}

/// Update the caller's name and teaching topics
pub async fn update_profile(
    client: &DynamoClient,
    table_name: &str,
    user_id: &str,
    body: &[u8],
) -> Result<Response<Body>, Error> {
    let req: UpdateProfileRequest = match serde_json::from_slice(body) {
        Ok(req) => req,
        Err(e) => return ApiError::BadRequest(format!("Invalid request body: {}", e)).into_response(),
    };
    let pk = profile_pk(user_id);

    let mut update_expr = vec![];
    let mut expr_names = HashMap::new();
    let mut expr_values = HashMap::new();

    if let Some(name) = req.name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty()) {
        update_expr.push("#name = :name");
        expr_names.insert("#name".to_string(), "name".to_string());
        expr_values.insert(":name".to_string(), AttributeValue::S(name));
    }

    if let Some(topics) = req.topics_can_teach {
        update_expr.push("topics_can_teach = :topics");
        expr_values.insert(":topics".to_string(), string_list(&normalize_topics(&topics)));
    }

    if !update_expr.is_empty() {
        let result = client
            .update_item()
            .table_name(table_name)
            .key("PK", AttributeValue::S(pk.clone()))
            .key("SK", AttributeValue::S(pk))
            .update_expression(format!("SET {}", update_expr.join(", ")))
            .condition_expression("attribute_exists(PK)")
            .set_expression_attribute_names((!expr_names.is_empty()).then_some(expr_names))
            .set_expression_attribute_values(Some(expr_values))
            .send()
            .await;

        if let Err(e) = result {
            let service_err = e.into_service_error();
            if service_err.is_conditional_check_failed_exception() {
                return ApiError::NotFound("Profile not found".to_string()).into_response();
            }
            return Err(service_err.into());
        }
    }

    get_profile(client, table_name, user_id).await
}

/// All profiles, for management's volunteer picker
pub async fn list_profiles(
    client: &DynamoClient,
    table_name: &str,
    user_id: &str,
) -> Result<Response<Body>, Error> {
    if let Err(e) = require_management(client, table_name, user_id).await? {
        return e.into_response();
    }

    let profiles = fetch_all_profiles(client, table_name).await?;
    responses::ok(&profiles)
}
