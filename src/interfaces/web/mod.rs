pub(crate) mod auth;
mod handlers;
mod router;

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::MarketplaceSettings;
use crate::core::lifecycle::LifecycleComponent;
use crate::core::store::TaskStore;
use crate::core::vault::CredentialVault;

pub use router::build_api_router;

/// Identity of the authenticated caller, set by [`auth::require_auth`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerId(pub String);

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) store: TaskStore,
    pub(crate) vault: Arc<CredentialVault>,
    pub(crate) marketplace: MarketplaceSettings,
    pub(crate) api_host: String,
    pub(crate) api_port: u16,
}

pub struct ApiServerConfig {
    pub store: TaskStore,
    pub vault: Arc<CredentialVault>,
    pub marketplace: MarketplaceSettings,
    pub api_host: String,
    pub api_port: u16,
}

pub struct ApiServer {
    state: AppState,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl ApiServer {
    pub fn new(config: ApiServerConfig) -> Self {
        Self {
            state: AppState {
                store: config.store,
                vault: config.vault,
                marketplace: config.marketplace,
                api_host: config.api_host,
                api_port: config.api_port,
            },
            cancel: CancellationToken::new(),
            handle: None,
        }
    }
}

#[async_trait]
impl LifecycleComponent for ApiServer {
    async fn on_init(&mut self) -> Result<()> {
        info!("API Server Interface initializing...");
        Ok(())
    }

    async fn on_start(&mut self) -> Result<()> {
        let addr = format!("{}:{}", self.state.api_host, self.state.api_port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("binding API server to {}", addr))?;
        let app = build_api_router(self.state.clone());
        let shutdown = self.cancel.clone().cancelled_owned();

        info!("API Server running at http://{addr}");
        self.handle = Some(tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown)
                .await
            {
                tracing::error!("API Server crashed: {}", e);
            }
        }));
        Ok(())
    }

    async fn on_shutdown(&mut self) -> Result<()> {
        info!("API Server Interface shutting down...");
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            if tokio::time::timeout(Duration::from_secs(5), handle)
                .await
                .is_err()
            {
                warn!("API Server did not stop in time");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn test_state() -> AppState {
    AppState {
        store: TaskStore::in_memory().expect("in-memory store"),
        vault: Arc::new(CredentialVault::from_key([7u8; 32])),
        marketplace: MarketplaceSettings::new(
            url::Url::parse("http://127.0.0.1:1").expect("static url"),
        ),
        api_host: "127.0.0.1".to_string(),
        api_port: 17890,
    }
}
