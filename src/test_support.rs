//! In-process fake marketplace for engine and client tests.

use axum::{
    Router,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use url::Url;

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub cookie: Option<String>,
    pub content_type: Option<String>,
    pub referer: Option<String>,
    pub origin: Option<String>,
    pub user_agent: Option<String>,
    pub accept_language: Option<String>,
    pub x_requested_with: Option<String>,
    pub form: HashMap<String, String>,
}

#[derive(Debug)]
pub struct MockState {
    /// node id -> HTML of `/lots/{node}/trade`
    pub trade_pages: HashMap<String, String>,
    /// node id -> body returned by `/lots/raise`
    pub raise_responses: HashMap<String, String>,
    /// offer id -> HTML of `/lots/offerEdit?offer=N`
    pub offer_pages: HashMap<String, String>,
    pub save_status: u16,
    pub login_redirect: bool,
    pub requests: Vec<RecordedRequest>,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            trade_pages: HashMap::new(),
            raise_responses: HashMap::new(),
            offer_pages: HashMap::new(),
            save_status: 200,
            login_redirect: false,
            requests: Vec::new(),
        }
    }
}

type Shared = Arc<Mutex<MockState>>;

pub struct MockMarketplace {
    pub base_url: Url,
    state: Shared,
}

impl MockMarketplace {
    pub async fn start(state: MockState) -> Self {
        let state: Shared = Arc::new(Mutex::new(state));
        let app = Router::new()
            .route("/lots/{node}/trade", get(serve_trade_page))
            .route("/lots/raise", post(serve_raise))
            .route("/lots/offerEdit", get(serve_offer_edit))
            .route("/lots/offerSave", post(serve_offer_save))
            .route("/account/login", get(serve_login_page))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock marketplace");
        let addr = listener.local_addr().expect("mock marketplace addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self {
            base_url: Url::parse(&format!("http://{}", addr)).expect("mock url"),
            state,
        }
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.lock().unwrap().requests.clone()
    }

    pub fn posts_to(&self, path: &str) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == "POST" && r.path == path)
            .collect()
    }
}

fn header_value(headers: &HeaderMap, name: header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn record(state: &Shared, method: &str, path: &str, headers: &HeaderMap, body: &str) {
    let form = url::form_urlencoded::parse(body.as_bytes())
        .into_owned()
        .collect();
    state.lock().unwrap().requests.push(RecordedRequest {
        method: method.to_string(),
        path: path.to_string(),
        cookie: header_value(headers, header::COOKIE),
        content_type: header_value(headers, header::CONTENT_TYPE),
        referer: header_value(headers, header::REFERER),
        origin: header_value(headers, header::ORIGIN),
        user_agent: header_value(headers, header::USER_AGENT),
        accept_language: header_value(headers, header::ACCEPT_LANGUAGE),
        x_requested_with: header_value(
            headers,
            header::HeaderName::from_static("x-requested-with"),
        ),
        form,
    });
}

fn html(body: String) -> Response {
    ([(header::CONTENT_TYPE, "text/html; charset=utf-8")], body).into_response()
}

async fn serve_trade_page(
    State(state): State<Shared>,
    Path(node): Path<String>,
    headers: HeaderMap,
) -> Response {
    record(&state, "GET", &format!("/lots/{}/trade", node), &headers, "");
    let guard = state.lock().unwrap();
    if guard.login_redirect {
        return Redirect::to("/account/login").into_response();
    }
    match guard.trade_pages.get(&node) {
        Some(page) => html(page.clone()),
        None => (StatusCode::NOT_FOUND, "not found").into_response(),
    }
}

async fn serve_raise(State(state): State<Shared>, headers: HeaderMap, body: String) -> Response {
    record(&state, "POST", "/lots/raise", &headers, &body);
    let node = url::form_urlencoded::parse(body.as_bytes())
        .find(|(k, _)| k == "node_id")
        .map(|(_, v)| v.into_owned())
        .unwrap_or_default();
    let guard = state.lock().unwrap();
    if guard.login_redirect {
        return Redirect::to("/account/login").into_response();
    }
    let reply = guard
        .raise_responses
        .get(&node)
        .cloned()
        .unwrap_or_else(|| r#"{"error":false,"msg":"Предложения подняты"}"#.to_string());
    let content_type = if reply.trim_start().starts_with('{') {
        "application/json"
    } else {
        "text/html; charset=utf-8"
    };
    ([(header::CONTENT_TYPE, content_type)], reply).into_response()
}

async fn serve_offer_edit(
    State(state): State<Shared>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    let offer = query.get("offer").cloned().unwrap_or_default();
    record(
        &state,
        "GET",
        &format!("/lots/offerEdit?offer={}", offer),
        &headers,
        "",
    );
    let guard = state.lock().unwrap();
    if guard.login_redirect {
        return Redirect::to("/account/login").into_response();
    }
    match guard.offer_pages.get(&offer) {
        Some(page) => html(page.clone()),
        None => (StatusCode::NOT_FOUND, "not found").into_response(),
    }
}

async fn serve_offer_save(State(state): State<Shared>, headers: HeaderMap, body: String) -> Response {
    record(&state, "POST", "/lots/offerSave", &headers, &body);
    let status = state.lock().unwrap().save_status;
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, r#"{"done":true}"#).into_response()
}

async fn serve_login_page() -> Response {
    html("<html><body>Войти</body></html>".to_string())
}

/// Offer edit page with the given stock and flags.
pub fn offer_edit_page(offer_id: &str, node_id: &str, secrets: &str, active: bool, auto: bool) -> String {
    let escaped = secrets
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;");
    format!(
        r#"<html><body><form action="/lots/offerSave" method="post">
<input type="hidden" name="csrf_token" value="csrf-{offer_id}">
<input type="hidden" name="offer_id" value="{offer_id}">
<input type="hidden" name="node_id" value="{node_id}">
<input type="text" name="fields[summary][ru]" value="Offer {offer_id}">
<textarea name="secrets" class="form-control">{escaped}</textarea>
<input type="checkbox" name="auto_delivery"{auto}>
<input type="checkbox" name="active"{active}>
</form></body></html>"#,
        auto = if auto { " checked" } else { "" },
        active = if active { " checked" } else { "" },
    )
}

/// Listing page with a raise button for `game_id`.
pub fn trade_page(game_id: &str, node_id: &str, offers: &[&str]) -> String {
    let links: String = offers
        .iter()
        .map(|o| format!(r#"<a href="/lots/offerEdit?node={node_id}&amp;offer={o}" class="tc-item">x</a>"#))
        .collect();
    format!(
        r#"<html><body data-app-data="{{&quot;csrf-token&quot;:&quot;csrf-{node_id}&quot;}}">
<button class="btn js-lot-raise" data-game="{game_id}" data-node="{node_id}">Поднять</button>
{links}
</body></html>"#
    )
}
