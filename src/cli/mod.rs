mod tokens;

use anyhow::{Context, Result, anyhow};
use console::style;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use crate::config::Settings;
use crate::core::engine::bump::BumpEngine;
use crate::core::engine::restock::RestockEngine;
use crate::core::engine::{Engine, EngineKind};
use crate::core::lifecycle::{LifecycleManager, SharedComponent};
use crate::core::scheduler::{AutomationWorker, Dispatcher, LoopPolicy};
use crate::core::store::TaskStore;
use crate::core::terminal::{self, GuideSection, print_warn};
use crate::core::vault::CredentialVault;
use crate::interfaces::web::{ApiServer, ApiServerConfig};

fn print_help() {
    terminal::print_banner();

    GuideSection::new("Core")
        .command("serve", "Run the API server and both automation workers")
        .print();

    GuideSection::new("Access")
        .command("token create", "Mint an API token for a user")
        .command("token list", "List a user's API tokens")
        .command("token revoke", "Revoke an API token")
        .print();

    GuideSection::new("Environment")
        .text("DATABASE_URL          sqlite path (default: sqlite://funpay-plus.db)")
        .text("DATA_ENCRYPTION_KEY   key material for stored golden keys")
        .text("API_HOST / API_PORT   listen address (default: 127.0.0.1:8080)")
        .text("FUNPAY_BASE_URL       marketplace origin (default: https://funpay.com)")
        .text("RUST_LOG              log filter (default: info)")
        .print();

    println!(
        "\n{} funpay-plus [serve|token|help] [--api-host <host>] [--api-port <port>]\n",
        style("Usage:").bold()
    );
}

pub(crate) fn parse_api_server_flags(
    args: &[String],
    start: usize,
    mut api_host: String,
    mut api_port: u16,
) -> Result<(String, u16)> {
    let mut i = start;
    while i < args.len() {
        match args[i].as_str() {
            "--api-port" => {
                if let Some(raw) = args.get(i + 1) {
                    api_port = raw
                        .parse()
                        .with_context(|| format!("--api-port is not a valid port: {}", raw))?;
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--api-host" => {
                if let Some(host) = args.get(i + 1) {
                    api_host = host.clone();
                    i += 2;
                } else {
                    i += 1;
                }
            }
            _ => i += 1,
        }
    }
    Ok((api_host, api_port))
}

fn worker<E: Engine>(
    engine: E,
    store: &TaskStore,
    vault: &Arc<CredentialVault>,
    settings: &Settings,
) -> SharedComponent {
    let policy = LoopPolicy::for_kind(engine.kind());
    let dispatcher = Dispatcher::new(
        engine,
        policy,
        store.clone(),
        vault.clone(),
        settings.marketplace.clone(),
    );
    Arc::new(Mutex::new(AutomationWorker::new(dispatcher)))
}

async fn serve(args: &[String], start: usize) -> Result<()> {
    crate::logging::init();

    let mut settings = Settings::from_env()?;
    (settings.api_host, settings.api_port) =
        parse_api_server_flags(args, start, settings.api_host, settings.api_port)?;

    let store = TaskStore::open(settings.database_path())
        .with_context(|| format!("opening database {}", settings.database_url))?;
    let vault = Arc::new(CredentialVault::from_material(
        settings.encryption_key.as_deref(),
    ));
    if vault.is_ephemeral() {
        print_warn("DATA_ENCRYPTION_KEY is not set; stored golden keys will not survive a restart.");
    }
    if settings.marketplace.insecure_tls {
        print_warn("FUNPAY_INSECURE_TLS is on; marketplace certificates are not verified.");
    }

    let mut lifecycle = LifecycleManager::new();
    lifecycle.attach(Arc::new(Mutex::new(store.clone())));
    lifecycle.attach(Arc::new(Mutex::new(ApiServer::new(ApiServerConfig {
        store: store.clone(),
        vault: vault.clone(),
        marketplace: settings.marketplace.clone(),
        api_host: settings.api_host.clone(),
        api_port: settings.api_port,
    }))));
    lifecycle.attach(worker(BumpEngine, &store, &vault, &settings));
    lifecycle.attach(worker(RestockEngine::default(), &store, &vault, &settings));

    lifecycle.start().await?;
    info!(state = ?lifecycle.state(), "Lifecycle started");

    GuideSection::new("funpay-plus running")
        .status(
            "API Endpoint",
            &format!("http://{}:{}", settings.api_host, settings.api_port),
        )
        .status("Marketplace", settings.marketplace.base_url.as_str())
        .status(
            "Workers",
            &format!("{}, {}", EngineKind::Bump, EngineKind::Restock),
        )
        .blank()
        .info(&format!(
            "Press {} to stop.",
            style("Ctrl+C").bold().yellow()
        ))
        .print();
    println!();

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");
    lifecycle.shutdown().await
}

pub async fn run_main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    run_command(&args).await
}

async fn run_command(args: &[String]) -> Result<()> {
    let cmd = args.get(1).map(String::as_str).unwrap_or("serve");

    match cmd {
        "serve" => serve(args, 2).await,
        flag if flag.starts_with("--api-") => serve(args, 1).await,
        "token" => tokens::run_token_command(args).await,
        "help" | "--help" | "-h" => {
            print_help();
            Ok(())
        }
        other => {
            print_help();
            Err(anyhow!("Unknown command: {}", other))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn api_flags_override_defaults() {
        let argv = args(&["funpay-plus", "serve", "--api-port", "9000", "--api-host", "0.0.0.0"]);
        let (host, port) = parse_api_server_flags(&argv, 2, "127.0.0.1".into(), 8080).unwrap();
        assert_eq!(host, "0.0.0.0");
        assert_eq!(port, 9000);
    }

    #[test]
    fn missing_flags_keep_defaults() {
        let argv = args(&["funpay-plus", "serve", "--api-port"]);
        let (host, port) = parse_api_server_flags(&argv, 2, "127.0.0.1".into(), 8080).unwrap();
        assert_eq!(host, "127.0.0.1");
        assert_eq!(port, 8080);
    }

    #[tokio::test]
    async fn unknown_command_fails() {
        let err = run_command(&args(&["funpay-plus", "frobnicate"]))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("frobnicate"));
    }

    #[tokio::test]
    async fn help_succeeds() {
        assert!(run_command(&args(&["funpay-plus", "help"])).await.is_ok());
    }

    #[test]
    fn invalid_port_is_an_error() {
        let argv = args(&["funpay-plus", "--api-port", "nope"]);
        assert!(parse_api_server_flags(&argv, 1, "127.0.0.1".into(), 8080).is_err());
    }
}
