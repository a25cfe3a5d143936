use aws_lambda_events::event::dynamodb::{Event, EventRecord};
use aws_sdk_dynamodb::Client as DynamoClient;
use ldl_shared::config::Config;
use ldl_shared::leaderboard::refresh_snapshot;
use lambda_runtime::{run, service_fn, Error, LambdaEvent};
use serde_json::Value;

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .without_time()
        .init();

    run(service_fn(function_handler)).await
}

async fn function_handler(event: LambdaEvent<Event>) -> Result<(), Error> {
    tracing::info!("DynamoDB Stream event received with {} records", event.payload.records.len());

    let profile_changes = event
        .payload
        .records
        .iter()
        .filter(|record| touches_profile(record))
        .count();

    // Attendance, schedule, student and snapshot writes never move the ranking
    if profile_changes == 0 {
        return Ok(());
    }

    let aws_config = aws_config::load_from_env().await;
    let dynamo_client = DynamoClient::new(&aws_config);
    let config = Config::from_env();

    let snapshot = refresh_snapshot(&dynamo_client, &config.table_name).await?;
    tracing::info!(
        "Leaderboard refreshed after {} profile change(s): {} volunteers ranked",
        profile_changes,
        snapshot.entries.len()
    );

    Ok(())
}

fn touches_profile(record: &EventRecord) -> bool {
    let keys = match serde_json::to_value(&record.change.keys) {
        Ok(keys) => keys,
        Err(e) => {
            tracing::warn!("Unreadable keys on {} record: {}", record.event_name, e);
            return false;
        }
    };

    match (key_string(&keys, "PK"), key_string(&keys, "SK")) {
        (Some(pk), Some(sk)) => is_profile_key(pk, sk),
        _ => false,
    }
}

/// Key attribute as a plain string; stream images may carry either `"x"` or `{"S": "x"}`
fn key_string<'a>(keys: &'a Value, name: &str) -> Option<&'a str> {
    let attr = keys.get(name)?;
    attr.as_str().or_else(|| attr.get("S").and_then(Value::as_str))
}

fn is_profile_key(pk: &str, sk: &str) -> bool {
    pk.starts_with("USER#") && pk == sk
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_key_string_shapes() {
        let plain = json!({"PK": "USER#v1"});
        let typed = json!({"PK": {"S": "USER#v1"}});
        let numeric = json!({"PK": {"N": "7"}});

        assert_eq!(key_string(&plain, "PK"), Some("USER#v1"));
        assert_eq!(key_string(&typed, "PK"), Some("USER#v1"));
        assert_eq!(key_string(&numeric, "PK"), None);
        assert_eq!(key_string(&plain, "SK"), None);
    }

    #[test]
    fn test_is_profile_key() {
        assert!(is_profile_key("USER#v1", "USER#v1"));
        // Students live under the volunteer's partition
        assert!(!is_profile_key("USER#v1", "STUDENT#s1"));
        assert!(!is_profile_key("ATTENDANCE#v1", "DATE#2024-07-01#CAMP#Camp 1"));
        assert!(!is_profile_key("LEADERBOARD", "LEADERBOARD"));
    }
}
