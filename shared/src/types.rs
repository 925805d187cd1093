use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ManageError;

// ========== USER ==========
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct User {
    pub id: String,
    pub email: String,
    /// Argon2 hash in storage, plaintext only on the response that set it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    pub admin: bool,
    pub name: String,
    pub birthdate: String,
    pub certified: bool,
    pub eligible: bool,
    pub chief: bool,
    pub cohort: String,
    pub gender: String,
    pub availability: Vec<UserAvailability>,
    pub created_at: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct UserAvailability {
    pub date: String,
}

impl User {
    /// Fully defaulted record for `email`, overlaid with whatever `payload` sets.
    pub fn from_payload(email: &str, payload: &UserPatch) -> Self {
        let mut user = Self {
            id: uuid::Uuid::new_v4().to_string(),
            email: normalize_email(email),
            password: None,
            admin: false,
            name: String::new(),
            birthdate: String::new(),
            certified: false,
            eligible: false,
            chief: false,
            cohort: String::new(),
            gender: String::new(),
            availability: Vec::new(),
            created_at: chrono::Utc::now().to_rfc3339(),
        };
        user.apply(payload);
        user
    }

    /// Overwrite every field the patch sets. Email and id are never touched.
    pub fn apply(&mut self, changes: &UserPatch) {
        if let Some(password) = &changes.password {
            self.password = Some(password.clone());
        }
        if let Some(admin) = changes.admin {
            self.admin = admin;
        }
        if let Some(name) = &changes.name {
            self.name = name.clone();
        }
        if let Some(birthdate) = &changes.birthdate {
            self.birthdate = birthdate.clone();
        }
        if let Some(certified) = changes.certified {
            self.certified = certified;
        }
        if let Some(eligible) = changes.eligible {
            self.eligible = eligible;
        }
        if let Some(chief) = changes.chief {
            self.chief = chief;
        }
        if let Some(cohort) = &changes.cohort {
            self.cohort = cohort.clone();
        }
        if let Some(gender) = &changes.gender {
            self.gender = gender.clone();
        }
        if let Some(availability) = &changes.availability {
            self.availability = availability.clone();
        }
    }

    pub fn without_password(mut self) -> Self {
        self.password = None;
        self
    }

    pub fn with_password(mut self, plaintext: Option<String>) -> Self {
        self.password = plaintext;
        self
    }
}

/// Partial user payload. Unknown keys are ignored; `email` is accepted on the
/// wire but never written because it is the record key.
#[derive(Debug, Default, Deserialize, Clone, PartialEq, Eq)]
pub struct UserPatch {
    pub email: Option<String>,
    pub password: Option<String>,
    pub admin: Option<bool>,
    pub name: Option<String>,
    pub birthdate: Option<String>,
    pub certified: Option<bool>,
    pub eligible: Option<bool>,
    pub chief: Option<bool>,
    pub cohort: Option<String>,
    pub gender: Option<String>,
    pub availability: Option<Vec<UserAvailability>>,
}

impl UserPatch {
    /// True when no writable field is set.
    pub fn is_empty(&self) -> bool {
        self.password.is_none()
            && self.admin.is_none()
            && self.name.is_none()
            && self.birthdate.is_none()
            && self.certified.is_none()
            && self.eligible.is_none()
            && self.chief.is_none()
            && self.cohort.is_none()
            && self.gender.is_none()
            && self.availability.is_none()
    }
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

// ========== ACTION ==========
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    Get,
    Create,
    Update,
    Delete,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Get => "GET",
            Action::Create => "CREATE",
            Action::Update => "UPDATE",
            Action::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = ManageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GET" => Ok(Action::Get),
            "CREATE" => Ok(Action::Create),
            "UPDATE" => Ok(Action::Update),
            "DELETE" => Ok(Action::Delete),
            _ => Err(ManageError::bad_request("Missing action")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionRequest {
    pub action: Action,
    /// Always lowercased; `None` when absent or blank.
    pub target_email: Option<String>,
    pub payload: UserPatch,
}

/// Body of `POST /users/manage`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManageRequestBody {
    action: Option<String>,
    target_email: Option<String>,
    user_payload: Option<UserPatch>,
}

impl ActionRequest {
    pub fn new(action: Action, target_email: Option<&str>, payload: UserPatch) -> Self {
        Self {
            action,
            target_email: target_email
                .map(normalize_email)
                .filter(|email| !email.is_empty()),
            payload,
        }
    }

    pub fn list() -> Self {
        Self::new(Action::Get, None, UserPatch::default())
    }

    pub fn from_body(body: &[u8]) -> Result<Self, ManageError> {
        let body: ManageRequestBody = serde_json::from_slice(body)
            .map_err(|e| ManageError::bad_request(format!("Invalid request body: {}", e)))?;

        let action = body
            .action
            .as_deref()
            .ok_or_else(|| ManageError::bad_request("Missing action"))?
            .parse()?;

        Ok(Self::new(
            action,
            body.target_email.as_deref(),
            body.user_payload.unwrap_or_default(),
        ))
    }
}

// ========== RESPONSE ==========
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum UserPayload {
    One(User),
    Many(Vec<User>),
}

#[derive(Debug, Serialize, Clone, Default, PartialEq, Eq)]
pub struct ActionResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<UserPayload>,
    /// Side conditions that did not fail the action, e.g. a failed cascade
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl ActionResponse {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn one(user: User) -> Self {
        Self {
            user: Some(UserPayload::One(user)),
            warnings: Vec::new(),
        }
    }

    pub fn many(users: Vec<User>) -> Self {
        Self {
            user: Some(UserPayload::Many(users)),
            warnings: Vec::new(),
        }
    }

    pub fn user(&self) -> Option<&User> {
        match &self.user {
            Some(UserPayload::One(user)) => Some(user),
            _ => None,
        }
    }

    pub fn users(&self) -> Option<&[User]> {
        match &self.user {
            Some(UserPayload::Many(users)) => Some(users),
            _ => None,
        }
    }
}
