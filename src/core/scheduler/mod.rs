use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::MarketplaceSettings;
use crate::core::engine::status::truncate_chars;
use crate::core::engine::{Engine, EngineKind, Outcome};
use crate::core::lifecycle::LifecycleComponent;
use crate::core::marketplace::MarketplaceSession;
use crate::core::store::{TaskRow, TaskStore, unix_now};
use crate::core::vault::CredentialVault;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Pacing of one worker loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopPolicy {
    pub start_delay: Duration,
    /// Tasks claimed per pass.
    pub batch: usize,
    /// Written to `next_run_at` before a dispatch starts.
    pub reservation: Option<Duration>,
    /// Pause after a pass that did work.
    pub after_pass: Duration,
    /// Pause after a pass that found nothing due.
    pub idle: Duration,
    /// Pause after the pass itself failed (store errors).
    pub crash_pause: Duration,
}

impl LoopPolicy {
    pub fn bump() -> Self {
        Self {
            start_delay: Duration::from_secs(3),
            batch: 1,
            reservation: Some(Duration::from_secs(900)),
            after_pass: Duration::from_secs(1),
            idle: Duration::from_secs(2),
            crash_pause: Duration::from_secs(5),
        }
    }

    pub fn restock() -> Self {
        Self {
            start_delay: Duration::from_secs(10),
            batch: usize::MAX,
            reservation: None,
            after_pass: Duration::from_secs(20),
            idle: Duration::from_secs(20),
            crash_pause: Duration::from_secs(30),
        }
    }

    pub fn for_kind(kind: EngineKind) -> Self {
        match kind {
            EngineKind::Bump => Self::bump(),
            EngineKind::Restock => Self::restock(),
        }
    }
}

/// Claims due tasks for one engine and runs them one after another.
pub struct Dispatcher<E: Engine> {
    engine: Arc<E>,
    policy: LoopPolicy,
    store: TaskStore,
    vault: Arc<CredentialVault>,
    marketplace: MarketplaceSettings,
}

impl<E: Engine> Dispatcher<E> {
    pub fn new(
        engine: E,
        policy: LoopPolicy,
        store: TaskStore,
        vault: Arc<CredentialVault>,
        marketplace: MarketplaceSettings,
    ) -> Self {
        Self {
            engine: Arc::new(engine),
            policy,
            store,
            vault,
            marketplace,
        }
    }

    pub fn kind(&self) -> EngineKind {
        self.engine.kind()
    }

    /// One claim-and-dispatch pass. Returns the number of tasks run.
    pub async fn run_pass(&self, cancel: &CancellationToken) -> Result<usize> {
        let tasks = self
            .store
            .claim(self.kind(), unix_now(), self.policy.batch)
            .await?;

        let mut ran = 0;
        for task in tasks {
            if cancel.is_cancelled() {
                break;
            }
            self.process_task(&task, cancel).await?;
            ran += 1;
        }
        Ok(ran)
    }

    /// Reserve, dispatch and persist one task. Returns `None` when the
    /// dispatch was interrupted by shutdown; the reservation then stands.
    pub async fn process_task(
        &self,
        task: &TaskRow,
        cancel: &CancellationToken,
    ) -> Result<Option<Outcome>> {
        let kind = self.kind();
        self.store
            .mark_dispatched(kind, &task.user_id, unix_now(), self.policy.reservation)
            .await?;

        let Some(outcome) = self.dispatch(task, cancel).await else {
            info!(user_id = %task.user_id, engine = %kind, "dispatch interrupted by shutdown");
            return Ok(None);
        };

        info!(
            user_id = %task.user_id,
            engine = %kind,
            status = %outcome.status,
            next_delay = ?outcome.next_delay,
            "dispatch finished"
        );
        self.store
            .record_outcome(kind, &task.user_id, &outcome, unix_now())
            .await?;
        Ok(Some(outcome))
    }

    async fn dispatch(&self, task: &TaskRow, cancel: &CancellationToken) -> Option<Outcome> {
        let kind = self.kind();
        let key = match self.vault.open_golden_key(&task.encrypted_key) {
            Ok(key) => key,
            Err(e) => {
                warn!(user_id = %task.user_id, engine = %kind, "cannot decrypt credential: {}", e);
                return Some(Outcome::decrypt_failed());
            }
        };

        let target = match self.engine.parse_target(&task.target) {
            Ok(target) => target,
            Err(e) => {
                warn!(user_id = %task.user_id, engine = %kind, "bad task config: {:#}", e);
                return Some(Outcome::config_error(&format!("{:#}", e)));
            }
        };

        let session = match MarketplaceSession::open(&key, &self.marketplace) {
            Ok(session) => session,
            Err(e) => return Some(Outcome::from_market_error(&e)),
        };

        let engine = self.engine.clone();
        let mut handle: JoinHandle<Outcome> =
            tokio::spawn(async move { engine.dispatch(&session, &target).await });

        let mut outcome = tokio::select! {
            joined = &mut handle => match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(user_id = %task.user_id, engine = %kind, "dispatch crashed: {}", e);
                    Outcome::crash(&crash_reason(e))
                }
            },
            _ = cancel.cancelled() => {
                handle.abort();
                return None;
            }
        };

        outcome.status = key.redact(&outcome.status);
        Some(outcome)
    }

    async fn run_loop(self: Arc<Self>, cancel: CancellationToken) {
        let kind = self.kind();
        info!("{} worker started", kind);

        if pause(&cancel, self.policy.start_delay).await {
            loop {
                let delay = match self.run_pass(&cancel).await {
                    Ok(0) => self.policy.idle,
                    Ok(ran) => {
                        debug!(engine = %kind, ran, "pass complete");
                        self.policy.after_pass
                    }
                    Err(e) => {
                        error!(engine = %kind, "worker pass failed: {:#}", e);
                        self.policy.crash_pause
                    }
                };
                if cancel.is_cancelled() || !pause(&cancel, delay).await {
                    break;
                }
            }
        }

        info!("{} worker stopped", kind);
    }
}

/// Sleep unless cancelled first. Returns false on cancellation.
async fn pause(cancel: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => true,
        _ = cancel.cancelled() => false,
    }
}

fn crash_reason(err: JoinError) -> String {
    let reason = if err.is_panic() {
        let payload = err.into_panic();
        if let Some(s) = payload.downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "panic".to_string()
        }
    } else {
        "cancelled".to_string()
    };
    truncate_chars(&reason, 80)
}

/// Background loop for one engine, started and stopped by the lifecycle
/// manager.
pub struct AutomationWorker<E: Engine> {
    dispatcher: Arc<Dispatcher<E>>,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl<E: Engine> AutomationWorker<E> {
    pub fn new(dispatcher: Dispatcher<E>) -> Self {
        Self {
            dispatcher: Arc::new(dispatcher),
            cancel: CancellationToken::new(),
            handle: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

#[async_trait]
impl<E: Engine> LifecycleComponent for AutomationWorker<E> {
    async fn on_start(&mut self) -> Result<()> {
        if !self.is_running() {
            let dispatcher = self.dispatcher.clone();
            let cancel = self.cancel.clone();
            self.handle = Some(tokio::spawn(dispatcher.run_loop(cancel)));
        }
        Ok(())
    }

    async fn on_shutdown(&mut self) -> Result<()> {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            if tokio::time::timeout(SHUTDOWN_GRACE, handle).await.is_err() {
                warn!("{} worker did not stop in time", self.dispatcher.kind());
            }
        }
        Ok(())
    }
}
