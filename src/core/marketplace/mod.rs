use reqwest::Client;
use reqwest::StatusCode;
use reqwest::cookie::Jar;
use reqwest::header::{
    ACCEPT_LANGUAGE, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue, ORIGIN, REFERER,
    USER_AGENT,
};
use std::sync::Arc;
use tracing::debug;
use url::Url;

use crate::config::MarketplaceSettings;
use crate::core::vault::GoldenKey;

pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";
pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded; charset=UTF-8";

static X_REQUESTED_WITH: HeaderName = HeaderName::from_static("x-requested-with");

#[derive(Debug, thiserror::Error)]
pub enum MarketError {
    #[error("session lost")]
    SessionLost,
    #[error("{0}")]
    Transport(#[from] reqwest::Error),
    #[error("server returned {0}")]
    Server(StatusCode),
    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

/// A fetched page after redirects.
#[derive(Debug, Clone)]
pub struct Page {
    pub url: Url,
    pub status: StatusCode,
    pub body: String,
}

impl Page {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

/// Short-lived HTTP session bound to one golden key. Built per dispatch
/// and dropped with it.
pub struct MarketplaceSession {
    client: Client,
    base: Url,
}

impl MarketplaceSession {
    pub fn open(key: &GoldenKey, settings: &MarketplaceSettings) -> Result<Self, MarketError> {
        // Host-only cookie: the jar never sends it to another domain.
        let jar = Arc::new(Jar::default());
        jar.add_cookie_str(
            &format!("golden_key={}; Path=/", key.expose()),
            &settings.base_url,
        );

        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_USER_AGENT));
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("ru,en;q=0.9"));
        if let Ok(origin) =
            HeaderValue::from_str(&settings.base_url.origin().ascii_serialization())
        {
            headers.insert(ORIGIN, origin);
        }
        headers.insert(
            X_REQUESTED_WITH.clone(),
            HeaderValue::from_static("XMLHttpRequest"),
        );

        let client = Client::builder()
            .cookie_provider(jar)
            .default_headers(headers)
            .timeout(settings.timeout)
            .danger_accept_invalid_certs(settings.insecure_tls)
            .build()?;

        Ok(Self {
            client,
            base: settings.base_url.clone(),
        })
    }

    pub fn url(&self, path: &str) -> Result<Url, MarketError> {
        Ok(self.base.join(path)?)
    }

    pub async fn get(&self, path: &str) -> Result<Page, MarketError> {
        let url = self.url(path)?;
        debug!("GET {}", url.path());
        let response = self.client.get(url).send().await?;
        read_page(response).await
    }

    /// POST an urlencoded form, with `referer` set to the page the form
    /// came from.
    pub async fn post_form(
        &self,
        path: &str,
        referer: &Url,
        fields: &[(&str, &str)],
    ) -> Result<Page, MarketError> {
        let url = self.url(path)?;
        let body = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(fields.iter())
            .finish();

        debug!("POST {}", url.path());
        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, FORM_CONTENT_TYPE)
            .header(REFERER, referer.as_str())
            .body(body)
            .send()
            .await?;
        read_page(response).await
    }
}

/// Any landing on a login page means the golden key no longer works.
async fn read_page(response: reqwest::Response) -> Result<Page, MarketError> {
    let url = response.url().clone();
    if url.as_str().contains("login") {
        return Err(MarketError::SessionLost);
    }
    let status = response.status();
    let body = response.text().await?;
    Ok(Page { url, status, body })
}
