use hmac::{Hmac, Mac};
use lambda_http::{Request, RequestExt};
use sha2::Sha256;
use std::sync::Arc;
use thiserror::Error;

use crate::repository::{FieldMask, RepositoryError, UserRepository};
use crate::types::{normalize_email, User};

pub const OVERRIDE_HEADER: &str = "X-Admin-Override";
pub const USER_EMAIL_HEADER: &str = "X-User-Email";

const OVERRIDE_TAG_CONTEXT: &[u8] = b"emt-admin-override";

type HmacSha256 = Hmac<Sha256>;

/// Authorization tier of one request. Built once by [`AuthResolver`] and
/// never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthContext {
    Unauthorized,
    /// Caller's own record, password always stripped
    Authorized { user: User },
    /// System-level override, not tied to any user record
    AdminOverride,
}

impl AuthContext {
    pub fn authorized(user: User) -> Self {
        AuthContext::Authorized {
            user: user.without_password(),
        }
    }

    /// Email of the identity behind the context, if it has one
    pub fn self_email(&self) -> Option<&str> {
        match self {
            AuthContext::Authorized { user } => Some(user.email.as_str()),
            AuthContext::Unauthorized | AuthContext::AdminOverride => None,
        }
    }

    pub fn tier(&self) -> &'static str {
        match self {
            AuthContext::Unauthorized => "unauthorized",
            AuthContext::Authorized { user } if user.admin => "admin",
            AuthContext::Authorized { .. } => "user",
            AuthContext::AdminOverride => "override",
        }
    }
}

/// Raw credentials pulled off a request, not yet verified
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub email: Option<String>,
    pub override_key: Option<String>,
}

impl Credentials {
    /// Identity comes from the JWT authorizer's `email` claim. The
    /// `X-User-Email` header is only honoured when `trust_identity_header`
    /// is set, for local development without API Gateway.
    pub fn from_request(event: &Request, trust_identity_header: bool) -> Self {
        let header = |name: &str| {
            event
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        };

        let claim_email = event
            .request_context_ref()
            .and_then(|ctx| ctx.authorizer())
            .and_then(|auth| auth.jwt.as_ref())
            .and_then(|jwt| jwt.claims.get("email"))
            .map(|s| s.to_string());

        let email = claim_email.or_else(|| {
            if trust_identity_header {
                header(USER_EMAIL_HEADER)
            } else {
                None
            }
        });

        Self {
            email,
            override_key: header(OVERRIDE_HEADER),
        }
    }
}

#[derive(Debug, Error)]
pub enum AuthResolutionError {
    #[error("identity lookup failed: {0}")]
    Lookup(#[from] RepositoryError),
}

/// Maps credentials onto exactly one [`AuthContext`]
#[derive(Clone)]
pub struct AuthResolver {
    users: Arc<dyn UserRepository>,
    override_key: Option<String>,
}

impl AuthResolver {
    pub fn new(users: Arc<dyn UserRepository>, override_key: Option<String>) -> Self {
        Self {
            users,
            override_key: override_key.filter(|k| !k.is_empty()),
        }
    }

    pub async fn resolve(&self, credentials: &Credentials) -> Result<AuthContext, AuthResolutionError> {
        if let Some(presented) = credentials.override_key.as_deref() {
            return Ok(match self.override_key.as_deref() {
                Some(expected) if override_key_matches(presented, expected) => {
                    tracing::info!("Admin override accepted");
                    AuthContext::AdminOverride
                }
                _ => {
                    tracing::warn!("Rejected admin override key");
                    AuthContext::Unauthorized
                }
            });
        }

        let Some(email) = credentials.email.as_deref().map(normalize_email) else {
            return Ok(AuthContext::Unauthorized);
        };

        match self.users.find_by_email(&email, FieldMask::WithoutPassword).await? {
            Some(user) => Ok(AuthContext::authorized(user)),
            None => {
                tracing::warn!("No user record for authenticated identity {}", email);
                Ok(AuthContext::Unauthorized)
            }
        }
    }

    /// Resolution failures degrade to `Unauthorized`, never to a higher tier.
    pub async fn resolve_or_unauthorized(&self, credentials: &Credentials) -> AuthContext {
        match self.resolve(credentials).await {
            Ok(context) => context,
            Err(e) => {
                tracing::error!("Auth resolution failed, treating as unauthorized: {}", e);
                AuthContext::Unauthorized
            }
        }
    }
}

/// Constant-time comparison of override keys
fn override_key_matches(presented: &str, expected: &str) -> bool {
    let Ok(mut expected_mac) = HmacSha256::new_from_slice(expected.as_bytes()) else {
        return false;
    };
    expected_mac.update(OVERRIDE_TAG_CONTEXT);
    let expected_tag = expected_mac.finalize().into_bytes();

    let Ok(mut presented_mac) = HmacSha256::new_from_slice(presented.as_bytes()) else {
        return false;
    };
    presented_mac.update(OVERRIDE_TAG_CONTEXT);
    presented_mac.verify_slice(&expected_tag).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryUserRepository;
    use crate::types::UserPatch;
    use async_trait::async_trait;

    async fn resolver_with(email: &str, override_key: Option<&str>) -> AuthResolver {
        let repo = MemoryUserRepository::new();
        let payload = UserPatch {
            password: Some("stored-hash".into()),
            ..Default::default()
        };
        repo.insert(User::from_payload(email, &payload)).await.unwrap();
        AuthResolver::new(Arc::new(repo), override_key.map(String::from))
    }

    #[tokio::test]
    async fn test_no_credentials_is_unauthorized() {
        let resolver = resolver_with("a@x.com", Some("secret")).await;
        let ctx = resolver.resolve(&Credentials::default()).await.unwrap();
        assert_eq!(ctx, AuthContext::Unauthorized);
    }

    #[tokio::test]
    async fn test_known_identity_is_authorized_without_password() {
        let resolver = resolver_with("a@x.com", None).await;
        let creds = Credentials {
            email: Some("A@X.com".into()),
            override_key: None,
        };

        match resolver.resolve(&creds).await.unwrap() {
            AuthContext::Authorized { user } => {
                assert_eq!(user.email, "a@x.com");
                assert!(user.password.is_none());
            }
            other => panic!("unexpected context {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unknown_identity_is_unauthorized() {
        let resolver = resolver_with("a@x.com", None).await;
        let creds = Credentials {
            email: Some("ghost@x.com".into()),
            override_key: None,
        };
        assert_eq!(resolver.resolve(&creds).await.unwrap(), AuthContext::Unauthorized);
    }

    #[tokio::test]
    async fn test_override_key_must_match() {
        let resolver = resolver_with("a@x.com", Some("secret")).await;

        let good = Credentials {
            email: None,
            override_key: Some("secret".into()),
        };
        assert_eq!(resolver.resolve(&good).await.unwrap(), AuthContext::AdminOverride);

        // A wrong key never falls through to the identity
        let bad = Credentials {
            email: Some("a@x.com".into()),
            override_key: Some("secreT".into()),
        };
        assert_eq!(resolver.resolve(&bad).await.unwrap(), AuthContext::Unauthorized);
    }

    #[tokio::test]
    async fn test_override_disabled_without_configured_key() {
        let resolver = resolver_with("a@x.com", Some("")).await;
        let creds = Credentials {
            email: None,
            override_key: Some("".into()),
        };
        assert_eq!(resolver.resolve(&creds).await.unwrap(), AuthContext::Unauthorized);
    }

    struct BrokenRepository;

    #[async_trait]
    impl UserRepository for BrokenRepository {
        async fn find_by_email(&self, _: &str, _: FieldMask) -> Result<Option<User>, RepositoryError> {
            Err(RepositoryError::Storage("connection reset".into()))
        }
        async fn find_all(&self, _: FieldMask) -> Result<Vec<User>, RepositoryError> {
            Err(RepositoryError::Storage("connection reset".into()))
        }
        async fn insert(&self, _: User) -> Result<User, RepositoryError> {
            Err(RepositoryError::Storage("connection reset".into()))
        }
        async fn update_by_email(&self, _: &str, _: &UserPatch) -> Result<Option<User>, RepositoryError> {
            Err(RepositoryError::Storage("connection reset".into()))
        }
        async fn delete_by_email(&self, _: &str) -> Result<bool, RepositoryError> {
            Err(RepositoryError::Storage("connection reset".into()))
        }
    }

    #[tokio::test]
    async fn test_lookup_failure_degrades_to_unauthorized() {
        let resolver = AuthResolver::new(Arc::new(BrokenRepository), None);
        let creds = Credentials {
            email: Some("a@x.com".into()),
            override_key: None,
        };

        assert!(resolver.resolve(&creds).await.is_err());
        assert_eq!(resolver.resolve_or_unauthorized(&creds).await, AuthContext::Unauthorized);
    }

    #[test]
    fn test_credentials_from_headers() {
        let mut request = Request::default();
        request
            .headers_mut()
            .insert(USER_EMAIL_HEADER, "dev@x.com".parse().unwrap());
        request
            .headers_mut()
            .insert(OVERRIDE_HEADER, "key".parse().unwrap());

        let trusted = Credentials::from_request(&request, true);
        assert_eq!(trusted.email.as_deref(), Some("dev@x.com"));
        assert_eq!(trusted.override_key.as_deref(), Some("key"));

        let untrusted = Credentials::from_request(&request, false);
        assert_eq!(untrusted.email, None);
    }

    #[test]
    fn test_tier_names() {
        let admin = UserPatch {
            admin: Some(true),
            ..Default::default()
        };
        assert_eq!(AuthContext::Unauthorized.tier(), "unauthorized");
        assert_eq!(AuthContext::AdminOverride.tier(), "override");
        assert_eq!(
            AuthContext::authorized(User::from_payload("a@x.com", &admin)).tier(),
            "admin"
        );
        assert_eq!(AuthContext::AdminOverride.self_email(), None);
    }
}
