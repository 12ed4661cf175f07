use axum::{
    Json, Router,
    body::Body,
    http::{HeaderValue, Method, Request, header},
    middleware,
    middleware::Next,
    routing::{delete, get, post},
};
use tower_http::cors::CorsLayer;

use super::AppState;
use super::auth;
use super::handlers::{autobump, autorestock, tokens};

fn build_localhost_cors(api_host: &str, api_port: u16) -> CorsLayer {
    let mut hosts = vec![api_host.to_string()];
    for local in ["127.0.0.1", "localhost"] {
        if !hosts.iter().any(|h| h == local) {
            hosts.push(local.to_string());
        }
    }
    let origins: Vec<HeaderValue> = hosts
        .iter()
        .map(|host| format!("http://{}:{}", host, api_port))
        .filter_map(|o| o.parse().ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

pub fn build_api_router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/api/health", get(health))
        .layer(middleware::from_fn(security_headers));

    let authed_routes = Router::new()
        .route("/api/plus/autobump/set", post(autobump::set_autobump))
        .route("/api/plus/autobump/force_check", post(autobump::force_check))
        .route("/api/plus/autobump/status", get(autobump::get_status))
        .route("/api/plus/autobump/disable", post(autobump::disable))
        .route(
            "/api/plus/autorestock/fetch_offers",
            post(autorestock::fetch_offers),
        )
        .route("/api/plus/autorestock/set", post(autorestock::set_autorestock))
        .route("/api/plus/autorestock/status", get(autorestock::get_status))
        .route("/api/plus/autorestock/disable", post(autorestock::disable))
        .route(
            "/api/tokens",
            get(tokens::list_tokens).post(tokens::create_token),
        )
        .route("/api/tokens/{token_id}", delete(tokens::delete_token))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_auth,
        ))
        .layer(middleware::from_fn(security_headers))
        .layer(build_localhost_cors(&state.api_host, state.api_port))
        .with_state(state);

    public_routes.merge(authed_routes)
}

async fn security_headers(req: Request<Body>, next: Next) -> axum::response::Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static("default-src 'none'"),
    );
    response
}
