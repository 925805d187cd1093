use async_trait::async_trait;
use aws_sdk_dynamodb::error::DisplayErrorContext;
use aws_sdk_dynamodb::types::{AttributeValue, DeleteRequest, ReturnValue, WriteRequest};
use aws_sdk_dynamodb::Client as DynamoClient;
use std::collections::HashMap;

use crate::repository::{AvailabilityStore, FieldMask, RepositoryError, UserRepository};
use crate::types::{normalize_email, User, UserAvailability, UserPatch};

const PROFILE_SK: &str = "PROFILE";

/// Every stored user attribute except the password hash
const PUBLIC_ATTRIBUTES: [&str; 12] = [
    "id",
    "email",
    "admin",
    "name",
    "birthdate",
    "certified",
    "eligible",
    "chief",
    "cohort",
    "gender",
    "availability",
    "created_at",
];

// DynamoDB allows max 25 items per batch write
const BATCH_SIZE: usize = 25;
const MAX_BATCH_ATTEMPTS: u64 = 5;

fn user_pk(email: &str) -> String {
    format!("USER#{}", normalize_email(email))
}

fn availability_pk(user_id: &str) -> String {
    format!("AVAILABILITY#{}", user_id)
}

fn storage_error<E: std::error::Error>(err: E) -> RepositoryError {
    let message = DisplayErrorContext(err).to_string();
    tracing::error!("DynamoDB request failed: {}", message);
    RepositoryError::Storage(message)
}

fn availability_value(availability: &[UserAvailability]) -> AttributeValue {
    AttributeValue::L(
        availability
            .iter()
            .map(|a| {
                AttributeValue::M(HashMap::from([(
                    "date".to_string(),
                    AttributeValue::S(a.date.clone()),
                )]))
            })
            .collect(),
    )
}

fn user_to_item(user: &User) -> HashMap<String, AttributeValue> {
    let mut item = HashMap::from([
        ("PK".to_string(), AttributeValue::S(user_pk(&user.email))),
        ("SK".to_string(), AttributeValue::S(PROFILE_SK.to_string())),
        ("id".to_string(), AttributeValue::S(user.id.clone())),
        ("email".to_string(), AttributeValue::S(user.email.clone())),
        ("admin".to_string(), AttributeValue::Bool(user.admin)),
        ("name".to_string(), AttributeValue::S(user.name.clone())),
        ("birthdate".to_string(), AttributeValue::S(user.birthdate.clone())),
        ("certified".to_string(), AttributeValue::Bool(user.certified)),
        ("eligible".to_string(), AttributeValue::Bool(user.eligible)),
        ("chief".to_string(), AttributeValue::Bool(user.chief)),
        ("cohort".to_string(), AttributeValue::S(user.cohort.clone())),
        ("gender".to_string(), AttributeValue::S(user.gender.clone())),
        ("availability".to_string(), availability_value(&user.availability)),
        ("created_at".to_string(), AttributeValue::S(user.created_at.clone())),
    ]);
    if let Some(password) = &user.password {
        item.insert("password".to_string(), AttributeValue::S(password.clone()));
    }
    item
}

fn user_from_item(item: &HashMap<String, AttributeValue>) -> Result<User, RepositoryError> {
    let string = |key: &str| item.get(key).and_then(|v| v.as_s().ok()).map(|s| s.to_string());
    let flag = |key: &str| item.get(key).and_then(|v| v.as_bool().ok()).copied().unwrap_or(false);

    let id = string("id").ok_or_else(|| RepositoryError::Malformed("missing id".to_string()))?;
    let email = string("email")
        .ok_or_else(|| RepositoryError::Malformed(format!("user {} has no email", id)))?;

    let availability = item
        .get("availability")
        .and_then(|v| v.as_l().ok())
        .map(|entries| {
            entries
                .iter()
                .filter_map(|entry| entry.as_m().ok())
                .filter_map(|m| m.get("date").and_then(|d| d.as_s().ok()))
                .map(|date| UserAvailability { date: date.to_string() })
                .collect()
        })
        .unwrap_or_default();

    Ok(User {
        id,
        email,
        password: string("password"),
        admin: flag("admin"),
        name: string("name").unwrap_or_default(),
        birthdate: string("birthdate").unwrap_or_default(),
        certified: flag("certified"),
        eligible: flag("eligible"),
        chief: flag("chief"),
        cohort: string("cohort").unwrap_or_default(),
        gender: string("gender").unwrap_or_default(),
        availability,
        created_at: string("created_at").unwrap_or_default(),
    })
}

/// Projection expression plus attribute names for a mask. `None` reads the
/// whole item.
fn projection(mask: FieldMask) -> Option<(String, HashMap<String, String>)> {
    match mask {
        FieldMask::Full => None,
        FieldMask::WithoutPassword => {
            let names: HashMap<String, String> = PUBLIC_ATTRIBUTES
                .iter()
                .map(|attr| (format!("#{}", attr), attr.to_string()))
                .collect();
            let expression = PUBLIC_ATTRIBUTES
                .iter()
                .map(|attr| format!("#{}", attr))
                .collect::<Vec<_>>()
                .join(", ");
            Some((expression, names))
        }
    }
}

#[derive(Debug)]
struct UpdateParts {
    expression: String,
    names: HashMap<String, String>,
    values: HashMap<String, AttributeValue>,
}

/// `SET` expression for every field the patch carries. `None` if it carries none.
fn update_parts(changes: &UserPatch) -> Option<UpdateParts> {
    let mut fields: Vec<(&str, AttributeValue)> = Vec::new();

    if let Some(password) = &changes.password {
        fields.push(("password", AttributeValue::S(password.clone())));
    }
    if let Some(admin) = changes.admin {
        fields.push(("admin", AttributeValue::Bool(admin)));
    }
    if let Some(name) = &changes.name {
        fields.push(("name", AttributeValue::S(name.clone())));
    }
    if let Some(birthdate) = &changes.birthdate {
        fields.push(("birthdate", AttributeValue::S(birthdate.clone())));
    }
    if let Some(certified) = changes.certified {
        fields.push(("certified", AttributeValue::Bool(certified)));
    }
    if let Some(eligible) = changes.eligible {
        fields.push(("eligible", AttributeValue::Bool(eligible)));
    }
    if let Some(chief) = changes.chief {
        fields.push(("chief", AttributeValue::Bool(chief)));
    }
    if let Some(cohort) = &changes.cohort {
        fields.push(("cohort", AttributeValue::S(cohort.clone())));
    }
    if let Some(gender) = &changes.gender {
        fields.push(("gender", AttributeValue::S(gender.clone())));
    }
    if let Some(availability) = &changes.availability {
        fields.push(("availability", availability_value(availability)));
    }

    if fields.is_empty() {
        return None;
    }

    let mut update_expr = Vec::with_capacity(fields.len());
    let mut names = HashMap::new();
    let mut values = HashMap::new();
    for (attr, value) in fields {
        update_expr.push(format!("#{attr} = :{attr}"));
        names.insert(format!("#{attr}"), attr.to_string());
        values.insert(format!(":{attr}"), value);
    }

    Some(UpdateParts {
        expression: format!("SET {}", update_expr.join(", ")),
        names,
        values,
    })
}

/// Users stored as `PK=USER#<email>, SK=PROFILE` items
#[derive(Clone)]
pub struct DynamoUserRepository {
    client: DynamoClient,
    table_name: String,
}

impl DynamoUserRepository {
    pub fn new(client: DynamoClient, table_name: impl Into<String>) -> Self {
        Self {
            client,
            table_name: table_name.into(),
        }
    }
}

#[async_trait]
impl UserRepository for DynamoUserRepository {
    async fn find_by_email(
        &self,
        email: &str,
        mask: FieldMask,
    ) -> Result<Option<User>, RepositoryError> {
        let mut request = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .key("PK", AttributeValue::S(user_pk(email)))
            .key("SK", AttributeValue::S(PROFILE_SK.to_string()));

        if let Some((expression, names)) = projection(mask) {
            request = request
                .projection_expression(expression)
                .set_expression_attribute_names(Some(names));
        }

        let result = request.send().await.map_err(storage_error)?;
        result.item().map(user_from_item).transpose()
    }

    async fn find_all(&self, mask: FieldMask) -> Result<Vec<User>, RepositoryError> {
        let mut users = Vec::new();
        let mut start_key: Option<HashMap<String, AttributeValue>> = None;

        loop {
            let mut request = self
                .client
                .scan()
                .table_name(&self.table_name)
                .filter_expression("SK = :sk")
                .expression_attribute_values(":sk", AttributeValue::S(PROFILE_SK.to_string()))
                .set_exclusive_start_key(start_key.take());

            if let Some((expression, names)) = projection(mask) {
                request = request
                    .projection_expression(expression)
                    .set_expression_attribute_names(Some(names));
            }

            let page = request.send().await.map_err(storage_error)?;
            for item in page.items() {
                users.push(user_from_item(item)?);
            }

            match page.last_evaluated_key() {
                Some(key) if !key.is_empty() => start_key = Some(key.clone()),
                _ => break,
            }
        }

        users.sort_by(|a, b| a.email.cmp(&b.email));
        Ok(users)
    }

    async fn insert(&self, mut user: User) -> Result<User, RepositoryError> {
        user.email = normalize_email(&user.email);

        let result = self
            .client
            .put_item()
            .table_name(&self.table_name)
            .set_item(Some(user_to_item(&user)))
            .condition_expression("attribute_not_exists(PK)")
            .send()
            .await;

        match result {
            Ok(_) => Ok(user),
            Err(e)
                if e
                    .as_service_error()
                    .is_some_and(|se| se.is_conditional_check_failed_exception()) =>
            {
                Err(RepositoryError::DuplicateKey(user.email))
            }
            Err(e) => Err(storage_error(e)),
        }
    }

    async fn update_by_email(
        &self,
        email: &str,
        changes: &UserPatch,
    ) -> Result<Option<User>, RepositoryError> {
        let Some(parts) = update_parts(changes) else {
            return self.find_by_email(email, FieldMask::WithoutPassword).await;
        };

        let result = self
            .client
            .update_item()
            .table_name(&self.table_name)
            .key("PK", AttributeValue::S(user_pk(email)))
            .key("SK", AttributeValue::S(PROFILE_SK.to_string()))
            .update_expression(parts.expression)
            .set_expression_attribute_names(Some(parts.names))
            .set_expression_attribute_values(Some(parts.values))
            .condition_expression("attribute_exists(PK)")
            .return_values(ReturnValue::AllNew)
            .send()
            .await;

        match result {
            Ok(output) => Ok(output
                .attributes()
                .map(user_from_item)
                .transpose()?
                .map(User::without_password)),
            Err(e)
                if e
                    .as_service_error()
                    .is_some_and(|se| se.is_conditional_check_failed_exception()) =>
            {
                Ok(None)
            }
            Err(e) => Err(storage_error(e)),
        }
    }

    async fn delete_by_email(&self, email: &str) -> Result<bool, RepositoryError> {
        let output = self
            .client
            .delete_item()
            .table_name(&self.table_name)
            .key("PK", AttributeValue::S(user_pk(email)))
            .key("SK", AttributeValue::S(PROFILE_SK.to_string()))
            .return_values(ReturnValue::AllOld)
            .send()
            .await
            .map_err(storage_error)?;

        Ok(output.attributes().is_some_and(|old| !old.is_empty()))
    }
}

/// Availability stored as `PK=AVAILABILITY#<user id>, SK=DATE#<date>` items
#[derive(Clone)]
pub struct DynamoAvailabilityStore {
    client: DynamoClient,
    table_name: String,
}

impl DynamoAvailabilityStore {
    pub fn new(client: DynamoClient, table_name: impl Into<String>) -> Self {
        Self {
            client,
            table_name: table_name.into(),
        }
    }

    async fn keys_for(&self, user_id: &str) -> Result<Vec<HashMap<String, AttributeValue>>, RepositoryError> {
        let mut keys = Vec::new();
        let mut start_key: Option<HashMap<String, AttributeValue>> = None;

        loop {
            let page = self
                .client
                .query()
                .table_name(&self.table_name)
                .key_condition_expression("PK = :pk")
                .expression_attribute_values(":pk", AttributeValue::S(availability_pk(user_id)))
                .projection_expression("PK, SK")
                .set_exclusive_start_key(start_key.take())
                .send()
                .await
                .map_err(storage_error)?;

            keys.extend(page.items().iter().cloned());

            match page.last_evaluated_key() {
                Some(key) if !key.is_empty() => start_key = Some(key.clone()),
                _ => break,
            }
        }

        Ok(keys)
    }
}

#[async_trait]
impl AvailabilityStore for DynamoAvailabilityStore {
    async fn delete_all_for_user(&self, user_id: &str) -> Result<usize, RepositoryError> {
        let keys = self.keys_for(user_id).await?;

        for chunk in keys.chunks(BATCH_SIZE) {
            let delete_requests = chunk
                .iter()
                .map(|key| {
                    DeleteRequest::builder()
                        .set_key(Some(key.clone()))
                        .build()
                        .map(|request| WriteRequest::builder().delete_request(request).build())
                        .map_err(|e| RepositoryError::Storage(e.to_string()))
                })
                .collect::<Result<Vec<_>, _>>()?;

            let mut attempts = 0;
            let mut unprocessed = Some(delete_requests);

            while let Some(requests) = unprocessed.take() {
                attempts += 1;
                if attempts > MAX_BATCH_ATTEMPTS {
                    return Err(RepositoryError::Storage(format!(
                        "{} availability records for {} left undeleted",
                        requests.len(),
                        user_id
                    )));
                }

                let result = self
                    .client
                    .batch_write_item()
                    .request_items(&self.table_name, requests)
                    .send()
                    .await
                    .map_err(storage_error)?;

                unprocessed = result
                    .unprocessed_items()
                    .and_then(|items| items.get(&self.table_name))
                    .filter(|items| !items.is_empty())
                    .cloned();

                if let Some(pending) = &unprocessed {
                    tracing::info!(
                        "Retrying {} unprocessed availability deletes (attempt {})",
                        pending.len(),
                        attempts
                    );
                    tokio::time::sleep(tokio::time::Duration::from_millis(100 * attempts)).await;
                }
            }
        }

        Ok(keys.len())
    }
}
