use emt_shared::{
    auth::{AuthContext, AuthResolver, Credentials},
    error::ManageError,
    manage::UserManager,
    types::ActionRequest,
    AppState,
};
use lambda_http::{
    http::{Method, StatusCode},
    Body, Error, Request, Response,
};
use std::sync::Arc;

/// Main Lambda handler - builds per-request services and dispatches
pub(crate) async fn function_handler(
    event: Request,
    state: Arc<AppState>,
) -> Result<Response<Body>, Error> {
    let (resolver, manager) = state.services();
    dispatch(&event, &resolver, &manager, state.config.trust_identity_header).await
}

async fn dispatch(
    event: &Request,
    resolver: &AuthResolver,
    manager: &UserManager,
    trust_identity_header: bool,
) -> Result<Response<Body>, Error> {
    let method = event.method();
    let path = event.uri().path();
    tracing::info!("Users Lambda invoked - Method: {} Path: {}", method, path);

    // Handle CORS preflight
    if method == Method::OPTIONS {
        return Ok(Response::builder()
            .status(StatusCode::OK)
            .header("Access-Control-Allow-Origin", "*")
            .header("Access-Control-Allow-Methods", "GET,POST,OPTIONS")
            .header(
                "Access-Control-Allow-Headers",
                "Content-Type,Authorization,X-Admin-Override",
            )
            .body(Body::Empty)
            .map_err(Box::new)?);
    }

    let is_manage = match (method, path) {
        (&Method::GET, "/users") => false,
        (&Method::POST, "/users/manage") => true,
        _ => return not_found(),
    };

    let credentials = Credentials::from_request(event, trust_identity_header);
    let context = resolver.resolve_or_unauthorized(&credentials).await;

    let request = if is_manage {
        match ActionRequest::from_body(event.body()) {
            Ok(request) => request,
            // Anonymous callers learn nothing about the body format
            Err(_) if context == AuthContext::Unauthorized => {
                return error_response(&ManageError::unauthorized("Not authorized"))
            }
            Err(e) => return error_response(&e),
        }
    } else {
        ActionRequest::list()
    };

    match manager.handle(&context, request).await {
        Ok(data) => json_response(
            StatusCode::OK,
            &serde_json::json!({ "message": "Success", "data": data }),
        ),
        Err(e) => error_response(&e),
    }
}

fn error_response(err: &ManageError) -> Result<Response<Body>, Error> {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    json_response(
        status,
        &serde_json::json!({ "error": err.error_code(), "message": err.message() }),
    )
}

fn json_response(status: StatusCode, body: &serde_json::Value) -> Result<Response<Body>, Error> {
    Ok(Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .body(body.to_string().into())
        .map_err(Box::new)?)
}

fn not_found() -> Result<Response<Body>, Error> {
    json_response(
        StatusCode::NOT_FOUND,
        &serde_json::json!({ "error": "Not found" }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use emt_shared::memory::{MemoryAvailabilityStore, MemoryUserRepository};
    use emt_shared::password::Argon2Passwords;
    use emt_shared::repository::UserRepository;
    use emt_shared::types::{User, UserPatch};

    const OVERRIDE_KEY: &str = "override-key";

    async fn services() -> (AuthResolver, UserManager) {
        let users = Arc::new(MemoryUserRepository::new());
        let admin = UserPatch {
            admin: Some(true),
            ..Default::default()
        };
        users
            .insert(User::from_payload("admin@x.com", &admin))
            .await
            .unwrap();
        users
            .insert(User::from_payload("user@x.com", &UserPatch::default()))
            .await
            .unwrap();

        let resolver = AuthResolver::new(users.clone(), Some(OVERRIDE_KEY.to_string()));
        let manager = UserManager::new(
            users,
            Arc::new(MemoryAvailabilityStore::new()),
            Arc::new(Argon2Passwords::default()),
        );
        (resolver, manager)
    }

    fn request(method: &str, uri: &str, headers: &[(&str, &str)], body: &str) -> Request {
        let mut builder = lambda_http::http::Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn body_json(response: &Response<Body>) -> serde_json::Value {
        serde_json::from_slice(response.body()).unwrap()
    }

    #[tokio::test]
    async fn test_list_as_user_strips_passwords() {
        let (resolver, manager) = services().await;
        let event = request("GET", "/users", &[("X-User-Email", "user@x.com")], "");

        let response = dispatch(&event, &resolver, &manager, true).await.unwrap();
        assert_eq!(response.status(), 200);

        let json = body_json(&response);
        assert_eq!(json["message"], "Success");
        let users = json["data"]["user"].as_array().unwrap();
        assert_eq!(users.len(), 2);
        assert!(users.iter().all(|u| u.get("password").is_none()));
    }

    #[tokio::test]
    async fn test_anonymous_gets_401() {
        let (resolver, manager) = services().await;

        let list = request("GET", "/users", &[], "");
        let response = dispatch(&list, &resolver, &manager, true).await.unwrap();
        assert_eq!(response.status(), 401);
        assert_eq!(body_json(&response)["error"], "Unauthorized");

        let garbage = request("POST", "/users/manage", &[], "{not json");
        let response = dispatch(&garbage, &resolver, &manager, true).await.unwrap();
        assert_eq!(response.status(), 401);
    }

    #[tokio::test]
    async fn test_identity_header_ignored_unless_trusted() {
        let (resolver, manager) = services().await;
        let event = request("GET", "/users", &[("X-User-Email", "user@x.com")], "");

        let response = dispatch(&event, &resolver, &manager, false).await.unwrap();
        assert_eq!(response.status(), 401);
    }

    #[tokio::test]
    async fn test_manage_create_via_override() {
        let (resolver, manager) = services().await;
        let event = request(
            "POST",
            "/users/manage",
            &[("X-Admin-Override", OVERRIDE_KEY)],
            r#"{"action":"CREATE","targetEmail":"New@X.com","userPayload":{"name":"New"}}"#,
        );

        let response = dispatch(&event, &resolver, &manager, false).await.unwrap();
        assert_eq!(response.status(), 200);

        let user = &body_json(&response)["data"]["user"];
        assert_eq!(user["email"], "new@x.com");
        assert_eq!(user["name"], "New");
        assert!(!user["password"].as_str().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_action_is_400_for_known_caller() {
        let (resolver, manager) = services().await;
        let event = request(
            "POST",
            "/users/manage",
            &[("X-User-Email", "admin@x.com")],
            r#"{"targetEmail":"user@x.com"}"#,
        );

        let response = dispatch(&event, &resolver, &manager, true).await.unwrap();
        assert_eq!(response.status(), 400);
        assert_eq!(body_json(&response)["message"], "Missing action");
    }

    #[tokio::test]
    async fn test_override_delete_missing_is_404() {
        let (resolver, manager) = services().await;
        let event = request(
            "POST",
            "/users/manage",
            &[("X-Admin-Override", OVERRIDE_KEY)],
            r#"{"action":"DELETE","targetEmail":"ghost@x.com"}"#,
        );

        let response = dispatch(&event, &resolver, &manager, false).await.unwrap();
        assert_eq!(response.status(), 404);
    }

    #[tokio::test]
    async fn test_unknown_route_and_preflight() {
        let (resolver, manager) = services().await;

        let unknown = request("DELETE", "/users", &[], "");
        let response = dispatch(&unknown, &resolver, &manager, false).await.unwrap();
        assert_eq!(response.status(), 404);

        let preflight = request("OPTIONS", "/users/manage", &[], "");
        let response = dispatch(&preflight, &resolver, &manager, false).await.unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(response.headers()["Access-Control-Allow-Origin"], "*");
    }
}
