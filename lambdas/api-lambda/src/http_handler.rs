use ldl_shared::errors::ApiError;
use ldl_shared::{attendance, leaderboard, profiles, responses, schedules, students, AppState};
use lambda_http::{http::Method, Body, Error, Request, RequestExt, Response};
use std::sync::Arc;

/// Caller id from the JWT authorizer `sub` claim. `X-User-Id` is honoured only
/// when no claim is present and the dev header is enabled in config.
fn caller_id(event: &Request, allow_header: bool) -> Option<String> {
    let claim = event
        .request_context_ref()
        .and_then(|ctx| ctx.authorizer())
        .and_then(|auth| auth.jwt.as_ref())
        .and_then(|jwt| jwt.claims.get("sub"))
        .map(|s| s.to_string());

    claim
        .or_else(|| {
            allow_header
                .then(|| event.headers().get("X-User-Id"))
                .flatten()
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string())
        })
        .filter(|id| !id.trim().is_empty())
}

fn query_param<'a>(event: &'a Request, name: &str) -> Option<&'a str> {
    event
        .query_string_parameters_ref()
        .and_then(|params| params.first(name))
}

/// Main Lambda handler - routes requests to profile, attendance, schedule and student endpoints
pub(crate) async fn function_handler(
    event: Request,
    state: Arc<AppState>,
) -> Result<Response<Body>, Error> {
    let method = event.method();
    let path = event.uri().path();
    let body = event.body();
    tracing::info!("API Lambda invoked - Method: {} Path: {}", method, path);

    // Handle CORS preflight
    if method == Method::OPTIONS {
        return responses::preflight();
    }

    let Some(user_id) = caller_id(&event, state.config.allow_identity_header) else {
        tracing::warn!("No caller identity on {} {}", method, path);
        return ApiError::Unauthorized.into_response();
    };

    let client = &state.dynamo_client;
    let table_name = state.config.table_name.as_str();
    let parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    match (method, parts.as_slice()) {
        // --- PROFILES ---
        // POST /profiles - create own profile after signup
        (&Method::POST, ["profiles"]) => {
            profiles::create_profile(client, table_name, &user_id, body).await
        }
        // GET /profiles - every profile (management)
        (&Method::GET, ["profiles"]) => profiles::list_profiles(client, table_name, &user_id).await,
        (&Method::GET, ["profiles", "me"]) => profiles::get_profile(client, table_name, &user_id).await,
        (&Method::PATCH, ["profiles", "me"]) => {
            profiles::update_profile(client, table_name, &user_id, body).await
        }

        // --- LEADERBOARD ---
        (&Method::GET, ["leaderboard"]) => leaderboard::get_leaderboard(client, table_name).await,
        (_, ["leaderboard"]) => responses::method_not_allowed(),

        // --- ATTENDANCE ---
        // POST /attendance - mark attendance (management)
        (&Method::POST, ["attendance"]) => {
            attendance::mark_attendance(client, &state.config, &user_id, body).await
        }
        // GET /attendance?volunteer_id= - attendance history
        (&Method::GET, ["attendance"]) => {
            attendance::list_attendance(client, table_name, &user_id, query_param(&event, "volunteer_id"))
                .await
        }

        // --- SCHEDULES ---
        (&Method::GET, ["schedules"]) => {
            schedules::list_schedules(
                client,
                table_name,
                query_param(&event, "date"),
                query_param(&event, "camp"),
            )
            .await
        }
        (&Method::GET, ["schedules", "topics"]) => {
            schedules::list_topics(
                client,
                table_name,
                query_param(&event, "date"),
                query_param(&event, "camp"),
            )
            .await
        }
        (&Method::POST, ["schedules"]) => {
            schedules::create_schedule(client, table_name, &user_id, body).await
        }
        // PATCH /schedules/{id}?date= - replace topics (management)
        (&Method::PATCH, ["schedules", schedule_id]) => {
            schedules::update_schedule(
                client,
                table_name,
                &user_id,
                schedule_id,
                query_param(&event, "date"),
                body,
            )
            .await
        }
        // DELETE /schedules/{id}?date= - delete schedule (management)
        (&Method::DELETE, ["schedules", schedule_id]) => {
            schedules::delete_schedule(client, table_name, &user_id, schedule_id, query_param(&event, "date"))
                .await
        }

        // --- STUDENTS ---
        (&Method::GET, ["students"]) => students::list_students(client, table_name, &user_id).await,
        (&Method::POST, ["students"]) => {
            students::create_student(client, table_name, &user_id, body).await
        }
        (&Method::PATCH, ["students", student_id]) => {
            students::update_student(client, table_name, &user_id, student_id, body).await
        }

        _ => {
            tracing::warn!("No route matched - Method: {} Path: {}", method, path);
            responses::not_found()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_dynamodb::config::{BehaviorVersion, Region};
    use aws_sdk_dynamodb::Client as DynamoClient;
    use lambda_http::aws_lambda_events::apigw::{
        ApiGatewayRequestAuthorizer, ApiGatewayRequestAuthorizerJwtDescription, ApiGatewayV2httpRequestContext,
    };
    use lambda_http::http::HeaderValue;
    use lambda_http::request::RequestContext;
    use ldl_shared::config::Config;
    use std::collections::HashMap;

    // Client is never reached by these routes; no credentials or network needed
    fn test_state(allow_identity_header: bool) -> Arc<AppState> {
        let conf = aws_sdk_dynamodb::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("us-east-1"))
            .build();
        let config = Config {
            allow_identity_header,
            ..Config::default()
        };
        AppState::new(DynamoClient::from_conf(conf), config)
    }

    fn request(method: Method, path: &str, user_id: Option<&'static str>) -> Request {
        let mut request = Request::default();
        *request.method_mut() = method;
        *request.uri_mut() = path.parse().unwrap();
        if let Some(user_id) = user_id {
            request
                .headers_mut()
                .insert("X-User-Id", HeaderValue::from_static(user_id));
        }
        request
    }

    fn with_sub_claim(request: Request, sub: &str) -> Request {
        let mut claims = HashMap::new();
        claims.insert("sub".to_string(), sub.to_string());
        let context = ApiGatewayV2httpRequestContext {
            authorizer: Some(ApiGatewayRequestAuthorizer {
                jwt: Some(ApiGatewayRequestAuthorizerJwtDescription {
                    claims,
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        };
        request.with_request_context(RequestContext::ApiGatewayV2(context))
    }

    #[tokio::test]
    async fn test_cors_preflight() {
        let response = function_handler(request(Method::OPTIONS, "/attendance", None), test_state(false))
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(
            response.headers().get("Access-Control-Allow-Origin").unwrap(),
            "*"
        );
    }

    #[tokio::test]
    async fn test_missing_identity_is_unauthorized() {
        let response = function_handler(request(Method::GET, "/profiles/me", None), test_state(true))
            .await
            .unwrap();
        assert_eq!(response.status(), 401);
    }

    #[tokio::test]
    async fn test_identity_header_ignored_by_default() {
        let response = function_handler(request(Method::GET, "/profiles/me", Some("m1")), test_state(false))
            .await
            .unwrap();
        assert_eq!(response.status(), 401);
    }

    #[tokio::test]
    async fn test_unknown_route() {
        let response = function_handler(request(Method::GET, "/projects", Some("u1")), test_state(true))
            .await
            .unwrap();
        assert_eq!(response.status(), 404);
    }

    #[tokio::test]
    async fn test_leaderboard_is_read_only() {
        let event = with_sub_claim(request(Method::POST, "/leaderboard", None), "u1");
        let response = function_handler(event, test_state(false)).await.unwrap();
        assert_eq!(response.status(), 405);
    }

    #[test]
    fn test_caller_id_from_header() {
        assert_eq!(
            caller_id(&request(Method::GET, "/", Some("abc")), true),
            Some("abc".to_string())
        );
        assert_eq!(caller_id(&request(Method::GET, "/", Some("abc")), false), None);
        assert_eq!(caller_id(&request(Method::GET, "/", Some(" ")), true), None);
        assert_eq!(caller_id(&request(Method::GET, "/", None), true), None);
    }

    #[test]
    fn test_jwt_claim_wins_over_header() {
        let event = with_sub_claim(request(Method::POST, "/attendance", Some("m1")), "v1");
        assert_eq!(caller_id(&event, true), Some("v1".to_string()));
        assert_eq!(caller_id(&event, false), Some("v1".to_string()));
    }
}
