use crate::application::bootstrap::bootstrap_workspace;
use crate::application::cultivation::{
    CultivationController, CultivationSettings, ReconcileOutcome, StopOutcome, ToggleOutcome,
};
use crate::application::error::ClientError;
use crate::application::notifications::{NotificationId, NotificationQueue};
use crate::application::scheduler::TaskScheduler;
use crate::application::session::{Registration, RestoreOutcome, SessionManager};
use crate::domain::models::{CultivationState, Session, Severity};
use crate::domain::offline_reward::OfflineRewardSummary;
use crate::infrastructure::config::ClientConfig;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::game_api::{GameApiClient, ReqwestGameApiClient};
use crate::infrastructure::snapshot_repository::{SnapshotRepository, SqliteSnapshotRepository};
use crate::infrastructure::token_store::{KeyringTokenStore, TokenStore, DEFAULT_KEYRING_ACCOUNT};
use chrono::Utc;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

pub type DefaultGameClient =
    GameClient<KeyringTokenStore, ReqwestGameApiClient, SqliteSnapshotRepository>;

/// Composition root. Wires the session, cultivation and notification
/// components together and records every command in `logs/commands.log`.
pub struct GameClient<S, C, R>
where
    S: TokenStore + 'static,
    C: GameApiClient + 'static,
    R: SnapshotRepository + 'static,
{
    session: Arc<SessionManager<S, C>>,
    cultivation: Arc<CultivationController<S, C, R>>,
    notifications: Arc<NotificationQueue>,
    scheduler: Arc<TaskScheduler>,
    snapshots: Arc<R>,
    logs_dir: PathBuf,
    log_guard: Mutex<()>,
}

impl DefaultGameClient {
    /// Bootstraps `workspace_root` and builds the keyring/HTTP/SQLite stack.
    /// Must be called inside a Tokio runtime.
    pub fn open(workspace_root: impl AsRef<Path>) -> Result<Self, InfraError> {
        let bootstrap = bootstrap_workspace(workspace_root.as_ref())?;
        let config = bootstrap.config;
        let token_store = Arc::new(KeyringTokenStore::new(
            config.keyring_service.clone(),
            DEFAULT_KEYRING_ACCOUNT,
        ));
        let api = Arc::new(ReqwestGameApiClient::new(
            &config.base_url,
            config.request_timeout(),
        )?);
        let snapshots = Arc::new(SqliteSnapshotRepository::new(&bootstrap.database_path));

        let client = Self::with_components(token_store, api, snapshots, &config, bootstrap.logs_dir);
        client.log_info("open", &format!("workspace={}", bootstrap.workspace_root.display()));
        Ok(client)
    }
}

impl<S, C, R> GameClient<S, C, R>
where
    S: TokenStore + 'static,
    C: GameApiClient + 'static,
    R: SnapshotRepository + 'static,
{
    pub fn with_components(
        token_store: Arc<S>,
        api: Arc<C>,
        snapshots: Arc<R>,
        config: &ClientConfig,
        logs_dir: PathBuf,
    ) -> Self {
        let scheduler = Arc::new(TaskScheduler::new());
        let notifications = Arc::new(NotificationQueue::new(config.notification_duration()));
        let session = Arc::new(SessionManager::new(token_store, Arc::clone(&api)));
        let cultivation = Arc::new(CultivationController::new(
            Arc::clone(&session),
            api,
            Arc::clone(&snapshots),
            Arc::clone(&notifications),
            Arc::clone(&scheduler),
            CultivationSettings::from(config),
        ));
        notifications.start(&scheduler);

        Self {
            session,
            cultivation,
            notifications,
            scheduler,
            snapshots,
            logs_dir,
            log_guard: Mutex::new(()),
        }
    }

    pub fn session(&self) -> Session {
        self.session.session()
    }

    pub fn cultivation_state(&self) -> CultivationState {
        self.cultivation.state()
    }

    pub fn session_manager(&self) -> &Arc<SessionManager<S, C>> {
        &self.session
    }

    pub fn cultivation(&self) -> &Arc<CultivationController<S, C, R>> {
        &self.cultivation
    }

    pub fn notifications(&self) -> &Arc<NotificationQueue> {
        &self.notifications
    }

    /// Restores the stored session and, when it is still valid, reconciles
    /// cultivation state with the server.
    pub async fn restore_session(&self) -> Result<RestoreOutcome, ClientError> {
        let outcome = self.session.restore().await;
        match &outcome {
            RestoreOutcome::Restored(_) => {
                self.log_info("restore_session", "restored");
                self.initialize_cultivation("restore_session").await?;
            }
            RestoreOutcome::NoSession => self.log_info("restore_session", "no stored session"),
            RestoreOutcome::Discarded { reason } => {
                self.log_error("restore_session", &format!("discarded: {reason}"))
            }
        }
        Ok(outcome)
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<Session, ClientError> {
        let session = match self.session.login(username, password).await {
            Ok(session) => session,
            Err(error) => {
                self.notifications
                    .notify(format!("Login failed: {error}"), Severity::Error);
                return Err(self.command_error("login", error));
            }
        };
        self.log_info("login", &format!("user={username}"));
        self.notifications
            .notify(format!("Welcome, {username}"), Severity::Success);
        self.initialize_cultivation("login").await?;
        Ok(session)
    }

    pub async fn register(&self, registration: Registration) -> Result<String, ClientError> {
        let username = registration.username.clone();
        match self.session.register(registration).await {
            Ok(message) => {
                self.log_info("register", &format!("user={username}"));
                self.notifications
                    .notify("Registration succeeded, please log in", Severity::Success);
                Ok(message)
            }
            Err(error) => {
                self.notifications
                    .notify(format!("Registration failed: {error}"), Severity::Error);
                Err(self.command_error("register", error))
            }
        }
    }

    pub async fn logout(&self) {
        self.cultivation.deactivate();
        self.session.logout().await;
        if let Err(error) = self.snapshots.clear() {
            self.log_error("logout", &format!("failed to clear snapshot: {error}"));
        }
        self.log_info("logout", "logged out");
        self.notifications.notify("Logged out", Severity::Info);
    }

    pub async fn start_cultivation(&self) -> Result<(), ClientError> {
        let result = self.cultivation.start().await;
        self.finish("start_cultivation", result)
    }

    pub async fn stop_cultivation(&self) -> Result<StopOutcome, ClientError> {
        let result = self.cultivation.stop().await;
        self.finish("stop_cultivation", result)
    }

    pub async fn toggle_cultivation(&self) -> Result<ToggleOutcome, ClientError> {
        let result = self.cultivation.toggle().await;
        self.finish("toggle_cultivation", result)
    }

    pub async fn claim_offline_rewards(&self) -> Result<OfflineRewardSummary, ClientError> {
        let result = self.cultivation.claim_offline_rewards().await;
        self.finish("claim_offline_rewards", result)
    }

    pub fn dismiss_notification(&self, id: NotificationId) -> bool {
        self.notifications.dismiss(id)
    }

    /// Synchronous shutdown: disarms timers, persists the local snapshot and
    /// cancels background work. In-flight requests are not awaited.
    pub fn teardown(&self) {
        self.cultivation.teardown();
        self.notifications.shutdown();
        self.scheduler.shutdown();
        self.log_info("teardown", "background tasks cancelled");
    }

    async fn initialize_cultivation(&self, command: &str) -> Result<(), ClientError> {
        match self.cultivation.initialize().await {
            Ok(outcome) => {
                if outcome != ReconcileOutcome::Idle {
                    self.log_info(command, &format!("cultivation reconciled: {outcome:?}"));
                }
                Ok(())
            }
            Err(error @ ClientError::InconsistentServerState(_)) => {
                self.log_error(command, &error.to_string());
                Ok(())
            }
            Err(error) => {
                let error = self.notify_auth_expiry(error);
                Err(self.command_error(command, error))
            }
        }
    }

    fn finish<T>(&self, command: &str, result: Result<T, ClientError>) -> Result<T, ClientError> {
        match result {
            Ok(value) => {
                self.log_info(command, "ok");
                Ok(value)
            }
            Err(error) => {
                let error = self.notify_auth_expiry(error);
                Err(self.command_error(command, error))
            }
        }
    }

    fn notify_auth_expiry(&self, error: ClientError) -> ClientError {
        if error.is_auth_expired() {
            self.notifications
                .notify("Session expired, please log in again", Severity::Warning);
        }
        error
    }

    pub fn command_error(&self, command: &str, error: ClientError) -> ClientError {
        self.log_error(command, &error.to_string());
        error
    }

    pub fn log_info(&self, command: &str, message: &str) {
        self.append_log("info", command, message);
    }

    pub fn log_error(&self, command: &str, message: &str) {
        self.append_log("error", command, message);
    }

    fn append_log(&self, level: &str, command: &str, message: &str) {
        let Ok(_guard) = self.log_guard.lock() else {
            return;
        };
        let path = self.logs_dir.join("commands.log");
        let payload = serde_json::json!({
            "timestamp": Utc::now().to_rfc3339(),
            "level": level,
            "command": command,
            "message": message,
        });

        if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
            let _ = writeln!(file, "{}", payload);
        }
    }
}
