//! Permission gate: decides whether an auth context may run an action and
//! which user fields it may write while doing so.

use std::collections::BTreeSet;

use crate::auth::AuthContext;
use crate::types::{normalize_email, Action, UserPatch};

pub const NOT_AUTHORIZED: &str = "Not authorized";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum UserField {
    Password,
    Admin,
    Name,
    Birthdate,
    Certified,
    Eligible,
    Chief,
    Cohort,
    Gender,
    Availability,
}

impl UserField {
    pub const ALL: [UserField; 10] = [
        UserField::Password,
        UserField::Admin,
        UserField::Name,
        UserField::Birthdate,
        UserField::Certified,
        UserField::Eligible,
        UserField::Chief,
        UserField::Cohort,
        UserField::Gender,
        UserField::Availability,
    ];

    /// Fields a user may change on their own record
    pub const SELF_SERVICE: [UserField; 3] =
        [UserField::Password, UserField::Cohort, UserField::Gender];
}

/// Set of writable fields
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FieldWhitelist(BTreeSet<UserField>);

impl FieldWhitelist {
    /// Read-only: nothing writable
    pub fn none() -> Self {
        Self::default()
    }

    pub fn all() -> Self {
        Self(UserField::ALL.into_iter().collect())
    }

    pub fn self_service() -> Self {
        Self(UserField::SELF_SERVICE.into_iter().collect())
    }

    pub fn contains(&self, field: UserField) -> bool {
        self.0.contains(&field)
    }

    /// Copy of `patch` with every field outside the whitelist dropped.
    pub fn apply(&self, patch: &UserPatch) -> UserPatch {
        fn keep<T: Clone>(allowed: bool, value: &Option<T>) -> Option<T> {
            if allowed {
                value.clone()
            } else {
                None
            }
        }

        UserPatch {
            email: None,
            password: keep(self.contains(UserField::Password), &patch.password),
            admin: keep(self.contains(UserField::Admin), &patch.admin),
            name: keep(self.contains(UserField::Name), &patch.name),
            birthdate: keep(self.contains(UserField::Birthdate), &patch.birthdate),
            certified: keep(self.contains(UserField::Certified), &patch.certified),
            eligible: keep(self.contains(UserField::Eligible), &patch.eligible),
            chief: keep(self.contains(UserField::Chief), &patch.chief),
            cohort: keep(self.contains(UserField::Cohort), &patch.cohort),
            gender: keep(self.contains(UserField::Gender), &patch.gender),
            availability: keep(self.contains(UserField::Availability), &patch.availability),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow(FieldWhitelist),
    Deny(&'static str),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow(_))
    }
}

/// Evaluate the tier rules in order; the first rule that matches decides.
pub fn decide(context: &AuthContext, action: Action, target_email: Option<&str>) -> Decision {
    let target = target_email.map(normalize_email);

    match context {
        AuthContext::AdminOverride => {
            // The override carries no identity, so this never matches today.
            let targets_self = context
                .self_email()
                .zip(target.as_deref())
                .is_some_and(|(own, target)| own == target);
            if targets_self && matches!(action, Action::Update | Action::Delete) {
                return Decision::Deny(NOT_AUTHORIZED);
            }

            match action {
                Action::Get => Decision::Allow(FieldWhitelist::none()),
                Action::Create | Action::Update | Action::Delete => {
                    Decision::Allow(FieldWhitelist::all())
                }
            }
        }
        AuthContext::Authorized { user } => {
            if action == Action::Get {
                return Decision::Allow(FieldWhitelist::none());
            }

            if action == Action::Update && target.as_deref() == Some(user.email.as_str()) {
                return Decision::Allow(FieldWhitelist::self_service());
            }

            if user.admin {
                return Decision::Allow(FieldWhitelist::all());
            }

            Decision::Deny(NOT_AUTHORIZED)
        }
        AuthContext::Unauthorized => Decision::Deny(NOT_AUTHORIZED),
    }
}
