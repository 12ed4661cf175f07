use anyhow::{Context, Result, anyhow};
use std::time::Duration;
use url::Url;

pub const DEFAULT_DATABASE_URL: &str = "sqlite://funpay-plus.db";
pub const DEFAULT_MARKETPLACE_URL: &str = "https://funpay.com";
pub const DEFAULT_API_HOST: &str = "127.0.0.1";
pub const DEFAULT_API_PORT: u16 = 8080;

/// Per-request timeout for every marketplace call.
pub const MARKETPLACE_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone)]
pub struct MarketplaceSettings {
    pub base_url: Url,
    pub insecure_tls: bool,
    pub timeout: Duration,
}

impl MarketplaceSettings {
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            insecure_tls: false,
            timeout: MARKETPLACE_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub database_url: String,
    pub encryption_key: Option<String>,
    pub api_host: String,
    pub api_port: u16,
    pub marketplace: MarketplaceSettings,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let api_port = match non_empty("API_PORT") {
            Some(raw) => raw
                .trim()
                .parse::<u16>()
                .with_context(|| format!("API_PORT is not a valid port: {}", raw))?,
            None => DEFAULT_API_PORT,
        };

        let base_url = match non_empty("FUNPAY_BASE_URL") {
            Some(raw) => Url::parse(raw.trim())
                .with_context(|| format!("FUNPAY_BASE_URL is not a valid url: {}", raw))?,
            None => Url::parse(DEFAULT_MARKETPLACE_URL)?,
        };
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(anyhow!(
                "FUNPAY_BASE_URL must be http or https, got {}",
                base_url.scheme()
            ));
        }

        let insecure_tls = non_empty("FUNPAY_INSECURE_TLS")
            .map(|v| parse_flag(&v))
            .unwrap_or(false);

        Ok(Self {
            database_url: non_empty("DATABASE_URL")
                .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            encryption_key: non_empty("DATA_ENCRYPTION_KEY"),
            api_host: non_empty("API_HOST").unwrap_or_else(|| DEFAULT_API_HOST.to_string()),
            api_port,
            marketplace: MarketplaceSettings {
                insecure_tls,
                ..MarketplaceSettings::new(base_url)
            },
        })
    }

    /// Filesystem path (or `:memory:`) behind `DATABASE_URL`.
    pub fn database_path(&self) -> &str {
        let url = self.database_url.as_str();
        url.strip_prefix("sqlite://")
            .or_else(|| url.strip_prefix("sqlite:"))
            .unwrap_or(url)
    }
}

fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings_from(vars: &[(&str, &str)]) -> Result<Settings> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|name| map.get(name).cloned())
    }

    #[test]
    fn defaults_apply_when_environment_is_empty() {
        let settings = settings_from(&[]).unwrap();
        assert_eq!(settings.database_url, DEFAULT_DATABASE_URL);
        assert_eq!(settings.database_path(), "funpay-plus.db");
        assert_eq!(settings.api_host, "127.0.0.1");
        assert_eq!(settings.api_port, 8080);
        assert!(settings.encryption_key.is_none());
        assert!(!settings.marketplace.insecure_tls);
        assert_eq!(settings.marketplace.base_url.as_str(), "https://funpay.com/");
        assert_eq!(settings.marketplace.timeout, Duration::from_secs(15));
    }

    #[test]
    fn reads_all_variables() {
        let settings = settings_from(&[
            ("DATABASE_URL", "sqlite:///var/lib/plus/tasks.db"),
            ("DATA_ENCRYPTION_KEY", "secret"),
            ("API_HOST", "0.0.0.0"),
            ("API_PORT", "9000"),
            ("FUNPAY_BASE_URL", "http://127.0.0.1:4000"),
            ("FUNPAY_INSECURE_TLS", "yes"),
        ])
        .unwrap();
        assert_eq!(settings.database_path(), "/var/lib/plus/tasks.db");
        assert_eq!(settings.encryption_key.as_deref(), Some("secret"));
        assert_eq!(settings.api_host, "0.0.0.0");
        assert_eq!(settings.api_port, 9000);
        assert!(settings.marketplace.insecure_tls);
        assert_eq!(
            settings.marketplace.base_url.as_str(),
            "http://127.0.0.1:4000/"
        );
    }

    #[test]
    fn blank_encryption_key_counts_as_missing() {
        let settings = settings_from(&[("DATA_ENCRYPTION_KEY", "   ")]).unwrap();
        assert!(settings.encryption_key.is_none());
    }

    #[test]
    fn rejects_invalid_port() {
        let err = settings_from(&[("API_PORT", "eighty")]).unwrap_err();
        assert!(err.to_string().contains("API_PORT"));
    }

    #[test]
    fn rejects_non_http_marketplace_url() {
        assert!(settings_from(&[("FUNPAY_BASE_URL", "ftp://funpay.com")]).is_err());
        assert!(settings_from(&[("FUNPAY_BASE_URL", "not a url")]).is_err());
    }

    #[test]
    fn plain_database_path_is_kept() {
        let settings = settings_from(&[("DATABASE_URL", ":memory:")]).unwrap();
        assert_eq!(settings.database_path(), ":memory:");
    }
}
