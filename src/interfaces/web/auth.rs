use axum::{
    Json,
    body::Body,
    extract::State,
    http::{Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::warn;

use super::{AppState, CallerId};

fn unauthorized(message: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({ "success": false, "error": message })),
    )
        .into_response()
}

/// Resolve `Authorization: Bearer <token>` to a user and expose it to
/// handlers as a [`CallerId`] extension.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let raw_token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(|s| s.trim().to_string());

    let Some(raw_token) = raw_token.filter(|t| !t.is_empty()) else {
        return unauthorized("Missing or invalid Authorization header. Use: Bearer <token>");
    };

    match state.store.resolve_api_token(&raw_token).await {
        Ok(Some(user_id)) => {
            req.extensions_mut().insert(CallerId(user_id));
            next.run(req).await
        }
        Ok(None) => unauthorized("Invalid or unauthorized API token"),
        Err(e) => {
            warn!("Token lookup failed: {}", e);
            unauthorized("Invalid or unauthorized API token")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interfaces::web::test_state;
    use axum::{Extension, Router, middleware, routing::get};
    use tower::util::ServiceExt;

    fn protected_app(state: AppState) -> Router {
        Router::new()
            .route(
                "/api/whoami",
                get(|Extension(CallerId(user)): Extension<CallerId>| async move { user }),
            )
            .layer(middleware::from_fn_with_state(state.clone(), require_auth))
            .with_state(state)
    }

    async fn call(app: Router, auth: Option<String>) -> (StatusCode, String) {
        let mut builder = Request::builder().uri("/api/whoami");
        if let Some(value) = auth {
            builder = builder.header("authorization", value);
        }
        let resp = app
            .oneshot(builder.body(Body::empty()).expect("request should build"))
            .await
            .expect("oneshot should succeed");
        let status = resp.status();
        let body = axum::body::to_bytes(resp.into_body(), 64 * 1024)
            .await
            .unwrap();
        (status, String::from_utf8_lossy(&body).to_string())
    }

    #[tokio::test]
    async fn missing_header_is_rejected() {
        let state = test_state();
        let (status, body) = call(protected_app(state), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body.contains("\"success\":false"));
    }

    #[tokio::test]
    async fn unknown_token_is_rejected() {
        let state = test_state();
        let (status, _) = call(protected_app(state), Some("Bearer fpk_unknown".into())).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn valid_token_resolves_caller() {
        let state = test_state();
        let (token, _) = state.store.create_api_token("alice", "t").await.unwrap();
        let (status, body) = call(protected_app(state), Some(format!("Bearer {}", token))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "alice");
    }

    #[tokio::test]
    async fn non_bearer_scheme_is_rejected() {
        let state = test_state();
        let (token, _) = state.store.create_api_token("alice", "t").await.unwrap();
        let (status, _) = call(protected_app(state), Some(format!("Basic {}", token))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}
