pub mod types;
pub mod config;
pub mod errors;
pub mod responses;
pub mod accounting;
pub mod leaderboard;
pub mod profiles;
pub mod attendance;
pub mod schedules;
pub mod students;

use aws_sdk_dynamodb::Client as DynamoClient;
use config::Config;
use std::sync::Arc;

/// Shared application state
pub struct AppState {
    pub dynamo_client: DynamoClient,
    pub config: Config,
}

impl AppState {
    pub fn new(dynamo_client: DynamoClient, config: Config) -> Arc<Self> {
        Arc::new(Self {
            dynamo_client,
            config,
        })
    }
}
