use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client as DynamoClient;
use lambda_http::{Body, Error, Response};

use crate::errors::ApiError;
use crate::profiles::{profile_pk, string_list, Item};
use crate::responses;
use crate::types::{normalize_topics, CreateStudentRequest, StudentRecord, UpdateStudentRequest};

fn student_sk(student_id: &str) -> String {
    format!("STUDENT#{}", student_id)
}

fn student_from_item(volunteer_id: &str, item: &Item) -> Option<StudentRecord> {
    let get = |key: &str| item.get(key).and_then(|v| v.as_s().ok()).map(|s| s.to_string());

    let student_id = get("SK")?.strip_prefix("STUDENT#")?.to_string();
    let topics_taught = match item.get("topics_taught") {
        Some(AttributeValue::L(values)) => values
            .iter()
            .filter_map(|v| v.as_s().ok())
            .cloned()
            .collect(),
        _ => Vec::new(),
    };

    Some(StudentRecord {
        student_id,
        volunteer_id: volunteer_id.to_string(),
        student_name: get("student_name").unwrap_or_default(),
        camp: get("camp").unwrap_or_default(),
        topics_taught,
        date_added: get("date_added").unwrap_or_default(),
    })
}

/// Log a student taught by the calling volunteer
pub async fn create_student(
    client: &DynamoClient,
    table_name: &str,
    user_id: &str,
    body: &[u8],
) -> Result<Response<Body>, Error> {
    let req: CreateStudentRequest = match serde_json::from_slice(body) {
        Ok(req) => req,
        Err(e) => return ApiError::BadRequest(format!("Invalid request body: {}", e)).into_response(),
    };

    let student_name = req.student_name.trim().to_string();
    let camp = req.camp.trim().to_string();
    if student_name.is_empty() || camp.is_empty() {
        return ApiError::BadRequest("Student name and camp are required".to_string()).into_response();
    }

    let student = StudentRecord {
        student_id: uuid::Uuid::new_v4().to_string(),
        volunteer_id: user_id.to_string(),
        student_name,
        camp,
        topics_taught: normalize_topics(&req.topics_taught),
        date_added: chrono::Utc::now().to_rfc3339(),
    };

    client
        .put_item()
        .table_name(table_name)
        .item("PK", AttributeValue::S(profile_pk(user_id)))
        .item("SK", AttributeValue::S(student_sk(&student.student_id)))
        .item("entity_type", AttributeValue::S("student".to_string()))
        .item("student_name", AttributeValue::S(student.student_name.clone()))
        .item("camp", AttributeValue::S(student.camp.clone()))
        .item("topics_taught", string_list(&student.topics_taught))
        .item("date_added", AttributeValue::S(student.date_added.clone()))
        .send()
        .await?;

    tracing::info!("Student {} added by {}", student.student_id, user_id);
    responses::created(&student)
}

/// Students logged by the calling volunteer
pub async fn list_students(
    client: &DynamoClient,
    table_name: &str,
    user_id: &str,
) -> Result<Response<Body>, Error> {
    let result = client
        .query()
        .table_name(table_name)
        .key_condition_expression("PK = :pk AND begins_with(SK, :sk_prefix)")
        .expression_attribute_values(":pk", AttributeValue::S(profile_pk(user_id)))
        .expression_attribute_values(":sk_prefix", AttributeValue::S("STUDENT#".to_string()))
        .send()
        .await?;

    let students: Vec<StudentRecord> = result
        .items()
        .iter()
        .filter_map(|item| student_from_item(user_id, item))
        .collect();

    responses::ok(&students)
}

/// Replace the topics taught to one of the caller's students
pub async fn update_student(
    client: &DynamoClient,
    table_name: &str,
    user_id: &str,
    student_id: &str,
    body: &[u8],
) -> Result<Response<Body>, Error> {
    let req: UpdateStudentRequest = match serde_json::from_slice(body) {
        Ok(req) => req,
        Err(e) => return ApiError::BadRequest(format!("Invalid request body: {}", e)).into_response(),
    };

    let result = client
        .update_item()
        .table_name(table_name)
        .key("PK", AttributeValue::S(profile_pk(user_id)))
        .key("SK", AttributeValue::S(student_sk(student_id)))
        .update_expression("SET topics_taught = :topics")
        .condition_expression("attribute_exists(PK)")
        .expression_attribute_values(":topics", string_list(&normalize_topics(&req.topics_taught)))
        .return_values(aws_sdk_dynamodb::types::ReturnValue::AllNew)
        .send()
        .await;

    let output = match result {
        Ok(output) => output,
        Err(e) => {
            let service_err = e.into_service_error();
            if service_err.is_conditional_check_failed_exception() {
                return ApiError::NotFound("Student not found".to_string()).into_response();
            }
            return Err(service_err.into());
        }
    };

    match output.attributes().and_then(|item| student_from_item(user_id, item)) {
        Some(student) => responses::ok(&student),
        None => ApiError::NotFound("Student not found".to_string()).into_response(),
    }
}
