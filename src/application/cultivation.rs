use crate::application::error::{accept, ClientError};
use crate::application::notifications::NotificationQueue;
use crate::application::scheduler::{TaskHandle, TaskScheduler};
use crate::application::session::SessionManager;
use crate::domain::models::{
    CultivationPhase, CultivationState, LocalSnapshot, PlayerProfile, Severity,
};
use crate::domain::offline_reward::{summarize_offline_reward, OfflineRewardSummary, RewardTotals};
use crate::infrastructure::config::ClientConfig;
use crate::infrastructure::game_api::GameApiClient;
use crate::infrastructure::snapshot_repository::SnapshotRepository;
use crate::infrastructure::token_store::TokenStore;
use chrono::{DateTime, Utc};
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;

#[derive(Debug, Clone)]
pub struct CultivationSettings {
    pub tick_interval: Duration,
    pub refresh_every_ticks: u64,
    pub snapshot_max_age: chrono::Duration,
    pub offline_hint_after: chrono::Duration,
}

impl Default for CultivationSettings {
    fn default() -> Self {
        Self::from(&ClientConfig::default())
    }
}

impl From<&ClientConfig> for CultivationSettings {
    fn from(config: &ClientConfig) -> Self {
        Self {
            tick_interval: config.tick_interval(),
            refresh_every_ticks: config.refresh_every_ticks.max(1),
            snapshot_max_age: config.snapshot_max_age(),
            offline_hint_after: chrono::Duration::seconds(60),
        }
    }
}

/// How `initialize` brought local state in line with the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    AlreadyInitialized,
    Idle,
    /// The server still had a session from an earlier run; it was stopped.
    StaleSessionStopped,
    /// Stopping the leftover session failed; the server state was reset.
    StaleSessionReset,
    /// The profile could not be read; local state assumes idle.
    Degraded { reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    /// The server was already idle; nothing was sent.
    AlreadyIdle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleOutcome {
    Started,
    Stopped(StopOutcome),
}

#[derive(Debug, Clone, Copy)]
enum Command {
    Start,
    Stop,
    Reset,
}

impl Command {
    fn failure_message(self) -> &'static str {
        match self {
            Self::Start => "Failed to start cultivation",
            Self::Stop => "Failed to stop cultivation",
            Self::Reset => "Failed to reset cultivation",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RefreshKind {
    AfterStart,
    Periodic,
}

type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

struct OperationGuard<'a>(&'a AtomicBool);

impl Drop for OperationGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Cultivation state machine (`Uninitialized -> Idle <-> Cultivating`).
///
/// Local state only moves on a confirmed server response or a defensive
/// correction. Every transition bumps an epoch; background refreshes carry
/// the epoch they were started under and are ignored once it is stale.
pub struct CultivationController<S, C, R>
where
    S: TokenStore + 'static,
    C: GameApiClient + 'static,
    R: SnapshotRepository + 'static,
{
    session: Arc<SessionManager<S, C>>,
    api: Arc<C>,
    snapshots: Arc<R>,
    notifications: Arc<NotificationQueue>,
    scheduler: Arc<TaskScheduler>,
    settings: CultivationSettings,
    state: watch::Sender<CultivationState>,
    epoch: AtomicU64,
    generation: AtomicU64,
    busy: AtomicBool,
    last_level: AtomicU32,
    timer: Mutex<Option<TaskHandle>>,
    now_provider: NowProvider,
}

impl<S, C, R> CultivationController<S, C, R>
where
    S: TokenStore + 'static,
    C: GameApiClient + 'static,
    R: SnapshotRepository + 'static,
{
    pub fn new(
        session: Arc<SessionManager<S, C>>,
        api: Arc<C>,
        snapshots: Arc<R>,
        notifications: Arc<NotificationQueue>,
        scheduler: Arc<TaskScheduler>,
        settings: CultivationSettings,
    ) -> Self {
        let (state, _) = watch::channel(CultivationState::uninitialized());
        Self {
            session,
            api,
            snapshots,
            notifications,
            scheduler,
            settings,
            state,
            epoch: AtomicU64::new(0),
            generation: AtomicU64::new(0),
            busy: AtomicBool::new(false),
            last_level: AtomicU32::new(0),
            timer: Mutex::new(None),
            now_provider: Arc::new(Utc::now),
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn state(&self) -> CultivationState {
        self.state.borrow().clone()
    }

    pub fn phase(&self) -> CultivationPhase {
        self.state.borrow().phase
    }

    pub fn subscribe(&self) -> watch::Receiver<CultivationState> {
        self.state.subscribe()
    }

    pub fn is_timer_armed(&self) -> bool {
        self.timer_slot()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    fn begin(&self) -> Result<OperationGuard<'_>, ClientError> {
        if self.busy.swap(true, Ordering::AcqRel) {
            return Err(ClientError::OperationInProgress);
        }
        Ok(OperationGuard(&self.busy))
    }

    fn timer_slot(&self) -> MutexGuard<'_, Option<TaskHandle>> {
        self.timer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fails once the controller has been deactivated since `generation` was read.
    fn ensure_generation(&self, generation: u64) -> Result<(), ClientError> {
        if self.generation.load(Ordering::Acquire) != generation {
            return Err(ClientError::NotAuthenticated);
        }
        Ok(())
    }

    /// Single transition out of `Uninitialized`: reads the server snapshot
    /// and corrects any leftover cultivation session before going idle.
    pub async fn initialize(self: &Arc<Self>) -> Result<ReconcileOutcome, ClientError> {
        if !self.session.is_authenticated() {
            return Err(ClientError::NotAuthenticated);
        }
        let _guard = self.begin()?;
        if self.phase() != CultivationPhase::Uninitialized {
            return Ok(ReconcileOutcome::AlreadyInitialized);
        }
        let generation = self.generation.load(Ordering::Acquire);

        self.offer_offline_hint();

        let profile = match self.fetch_profile().await {
            Ok(profile) => profile,
            Err(ClientError::AuthExpired) => return Err(ClientError::AuthExpired),
            Err(error) => {
                self.ensure_generation(generation)?;
                tracing::warn!(%error, "profile unavailable during initialization, assuming idle");
                self.enter_idle();
                return Ok(ReconcileOutcome::Degraded {
                    reason: error.to_string(),
                });
            }
        };
        self.ensure_generation(generation)?;
        self.last_level.store(profile.level, Ordering::Release);

        if !profile.is_cultivating {
            self.enter_idle();
            return Ok(ReconcileOutcome::Idle);
        }

        tracing::info!("server reports a leftover cultivation session, stopping it");
        let stop_error = match self.command(Command::Stop).await {
            Ok(()) => {
                self.ensure_generation(generation)?;
                self.enter_idle();
                return Ok(ReconcileOutcome::StaleSessionStopped);
            }
            Err(ClientError::AuthExpired) => return Err(ClientError::AuthExpired),
            Err(error) => error,
        };

        tracing::warn!(error = %stop_error, "stopping leftover session failed, resetting");
        let reset = self.command(Command::Reset).await;
        if let Err(ClientError::AuthExpired) = reset {
            return Err(ClientError::AuthExpired);
        }
        self.ensure_generation(generation)?;
        match reset {
            Ok(()) => {
                self.enter_idle();
                self.notifications
                    .notify("Cultivation state was reset", Severity::Info);
                Ok(ReconcileOutcome::StaleSessionReset)
            }
            Err(reset_error) => {
                self.enter_idle();
                let error = ClientError::InconsistentServerState(format!(
                    "stop failed ({stop_error}); reset failed ({reset_error})"
                ));
                tracing::error!(%error, "forced local idle state");
                self.notifications.notify(error.to_string(), Severity::Warning);
                Err(error)
            }
        }
    }

    pub async fn start(self: &Arc<Self>) -> Result<(), ClientError> {
        let _guard = self.begin()?;
        match self.phase() {
            CultivationPhase::Uninitialized => return Err(ClientError::NotInitialized),
            CultivationPhase::Cultivating => return Err(ClientError::AlreadyCultivating),
            CultivationPhase::Idle => {}
        }
        let generation = self.generation.load(Ordering::Acquire);

        let profile = match self.fetch_profile().await {
            Ok(profile) => profile,
            Err(error) => return Err(self.report_failure("Failed to start cultivation", error)),
        };
        self.ensure_generation(generation)?;

        if profile.is_cultivating {
            self.enter_cultivating();
            self.notifications
                .notify("Already cultivating, timer resumed", Severity::Info);
            return Err(ClientError::AlreadyCultivating);
        }

        if let Err(error) = self.command(Command::Start).await {
            return Err(self.report_failure(Command::Start.failure_message(), error));
        }
        self.ensure_generation(generation)?;

        let epoch = self.enter_cultivating();
        self.notifications
            .notify("Cultivation started", Severity::Success);
        self.spawn_refresh(epoch, RefreshKind::AfterStart);
        Ok(())
    }

    pub async fn stop(self: &Arc<Self>) -> Result<StopOutcome, ClientError> {
        let _guard = self.begin()?;
        if self.phase() == CultivationPhase::Uninitialized {
            return Err(ClientError::NotInitialized);
        }
        let generation = self.generation.load(Ordering::Acquire);

        let profile = match self.fetch_profile().await {
            Ok(profile) => profile,
            Err(error) => {
                if self.ensure_generation(generation).is_ok() {
                    self.enter_idle();
                }
                return Err(self.report_failure(Command::Stop.failure_message(), error));
            }
        };
        self.ensure_generation(generation)?;

        if !profile.is_cultivating {
            self.enter_idle();
            return Ok(StopOutcome::AlreadyIdle);
        }

        let result = self.command(Command::Stop).await;
        if let Err(ClientError::AuthExpired) = result {
            return Err(ClientError::AuthExpired);
        }
        self.ensure_generation(generation)?;
        self.enter_idle();
        if let Err(error) = result {
            return Err(self.report_failure(Command::Stop.failure_message(), error));
        }

        self.notifications
            .notify("Cultivation stopped", Severity::Info);
        if let Err(error) = self.fetch_profile().await {
            tracing::warn!(%error, "profile refresh after stop failed");
        }
        Ok(StopOutcome::Stopped)
    }

    pub async fn toggle(self: &Arc<Self>) -> Result<ToggleOutcome, ClientError> {
        if self.phase() == CultivationPhase::Cultivating {
            self.stop().await.map(ToggleOutcome::Stopped)
        } else {
            self.start().await.map(|()| ToggleOutcome::Started)
        }
    }

    pub async fn claim_offline_rewards(&self) -> Result<OfflineRewardSummary, ClientError> {
        let generation = self.generation.load(Ordering::Acquire);
        let token = self.session.access_token()?;
        let response = accept(
            self.api.claim_offline_rewards(&token).await,
            "Failed to claim offline rewards",
        );
        let payload = match response {
            Ok(response) => response.data.unwrap_or_default(),
            Err(ClientError::AuthExpired) => {
                return Err(self.handle_unauthorized(
                    &token,
                    generation,
                    "offline reward claim returned 401",
                ));
            }
            Err(error) => {
                return Err(self.report_failure("Failed to claim offline rewards", error));
            }
        };

        let summary = summarize_offline_reward(
            payload.offline_seconds(),
            RewardTotals {
                exp: payload.exp(),
                spirit_stones: payload.spirit_stones(),
            },
        );
        if summary.is_claimed() {
            self.notifications.notify(summary.to_string(), Severity::Success);
            if let Err(error) = self.fetch_profile().await {
                tracing::warn!(%error, "profile refresh after reward claim failed");
            }
        } else {
            self.notifications.notify(summary.to_string(), Severity::Info);
        }
        Ok(summary)
    }

    /// Returns to `Uninitialized` after logout or credential expiry so the
    /// next login reconciles again.
    pub fn deactivate(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.disarm_timer();
        self.epoch.fetch_add(1, Ordering::AcqRel);
        self.last_level.store(0, Ordering::Release);
        self.state.send_replace(CultivationState::uninitialized());
    }

    /// Disarms the timer and records a best-effort local snapshot.
    pub fn teardown(&self) {
        self.disarm_timer();
        let session = self.session.session();
        if !session.authenticated {
            return;
        }
        let state = self.state();
        let snapshot = LocalSnapshot {
            timestamp: (self.now_provider)(),
            player: session.player,
            is_cultivating: state.is_cultivating(),
            local_elapsed_seconds: state.local_elapsed_seconds,
        };
        if let Err(error) = self.snapshots.save(&snapshot) {
            tracing::warn!(%error, "failed to persist local snapshot");
        }
    }

    fn report_failure(&self, context: &str, error: ClientError) -> ClientError {
        if !error.is_auth_expired() {
            self.notifications
                .notify(format!("{context}: {error}"), Severity::Error);
        }
        error
    }

    async fn fetch_profile(&self) -> Result<PlayerProfile, ClientError> {
        let generation = self.generation.load(Ordering::Acquire);
        let result = self.session.refresh_profile().await;
        if matches!(result, Err(ClientError::AuthExpired)) {
            self.deactivate_after_expiry(generation);
        }
        result
    }

    /// Expires the session for a 401 on `token` and deactivates, unless the
    /// token or the controller generation has moved on since the request.
    fn handle_unauthorized(&self, token: &str, generation: u64, reason: &str) -> ClientError {
        let error = self.session.expire_token(token, reason);
        if error.is_auth_expired() {
            self.deactivate_after_expiry(generation);
        }
        error
    }

    /// A changed generation means a deactivation already happened after the
    /// request was issued, possibly followed by a newer login.
    fn deactivate_after_expiry(&self, generation: u64) {
        if self.generation.load(Ordering::Acquire) == generation || !self.session.is_authenticated() {
            self.deactivate();
        }
    }

    async fn command(&self, command: Command) -> Result<(), ClientError> {
        let generation = self.generation.load(Ordering::Acquire);
        let token = self.session.access_token()?;
        let response = match command {
            Command::Start => self.api.start_cultivation(&token).await,
            Command::Stop => self.api.stop_cultivation(&token).await,
            Command::Reset => self.api.reset_cultivation(&token).await,
        };
        match accept(response, command.failure_message()) {
            Ok(_) => Ok(()),
            Err(ClientError::AuthExpired) => Err(self.handle_unauthorized(
                &token,
                generation,
                "cultivation command returned 401",
            )),
            Err(error) => Err(error),
        }
    }

    fn enter_idle(&self) {
        self.disarm_timer();
        self.epoch.fetch_add(1, Ordering::AcqRel);
        self.state.send_replace(CultivationState::idle());
    }

    fn enter_cultivating(self: &Arc<Self>) -> u64 {
        self.disarm_timer();
        let epoch = self.epoch.fetch_add(1, Ordering::AcqRel) + 1;
        self.state
            .send_replace(CultivationState::cultivating_since((self.now_provider)()));
        self.arm_timer(epoch);
        epoch
    }

    fn disarm_timer(&self) {
        if let Some(handle) = self.timer_slot().take() {
            handle.cancel();
        }
    }

    fn arm_timer(self: &Arc<Self>, epoch: u64) {
        let controller = Arc::downgrade(self);
        let interval_ms = self.settings.tick_interval.as_millis() as u64;
        let refresh_every = self.settings.refresh_every_ticks;
        let handle = self
            .scheduler
            .spawn_periodic(self.settings.tick_interval, move |tick| {
                let Some(controller) = controller.upgrade() else {
                    return ControlFlow::Break(());
                };
                if controller.epoch() != epoch {
                    return ControlFlow::Break(());
                }
                controller.state.send_modify(|state| {
                    if state.is_cultivating() {
                        state.local_elapsed_seconds = tick * interval_ms / 1000;
                    }
                });
                if tick % refresh_every == 0 {
                    controller.spawn_refresh(epoch, RefreshKind::Periodic);
                }
                ControlFlow::Continue(())
            });
        if let Some(previous) = self.timer_slot().replace(handle) {
            previous.cancel();
        }
    }

    fn spawn_refresh(self: &Arc<Self>, epoch: u64, kind: RefreshKind) {
        let controller = Arc::downgrade(self);
        self.scheduler.spawn_once(async move {
            let Some(controller) = controller.upgrade() else {
                return;
            };
            controller.background_refresh(epoch, kind).await;
        });
    }

    /// Best-effort refresh. Never fails, and only changes phase when the
    /// server reports idle while the same cultivating epoch is still current.
    async fn background_refresh(&self, epoch: u64, kind: RefreshKind) {
        let profile = match self.fetch_profile().await {
            Ok(profile) => profile,
            Err(ClientError::AuthExpired) => {
                self.notifications
                    .notify("Session expired, please log in again", Severity::Warning);
                return;
            }
            Err(error) => {
                tracing::debug!(%error, ?kind, "background profile refresh failed");
                return;
            }
        };

        let previous = self.last_level.swap(profile.level, Ordering::AcqRel);
        if previous != 0 && profile.level > previous {
            self.notifications.notify(
                format!("Breakthrough! Reached level {} ({})", profile.level, profile.realm),
                Severity::Success,
            );
        }

        if kind == RefreshKind::Periodic
            && !profile.is_cultivating
            && self.epoch() == epoch
            && !self.busy.load(Ordering::Acquire)
            && self.phase() == CultivationPhase::Cultivating
        {
            tracing::info!("server reports cultivation ended, converging to idle");
            self.enter_idle();
            self.notifications
                .notify("Cultivation was stopped on the server", Severity::Info);
        }
    }

    /// Posts a hint when the previous run was cultivating; never changes state.
    fn offer_offline_hint(&self) {
        let snapshot = match self.snapshots.load() {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => return,
            Err(error) => {
                tracing::debug!(%error, "local snapshot unreadable");
                return;
            }
        };
        let now = (self.now_provider)();
        if snapshot.is_stale_at(now, self.settings.snapshot_max_age) {
            if let Err(error) = self.snapshots.clear() {
                tracing::debug!(%error, "failed to clear stale snapshot");
            }
            return;
        }
        let offline = now - snapshot.timestamp;
        if snapshot.is_cultivating && offline > self.settings.offline_hint_after {
            self.notifications.notify(
                format!(
                    "Offline cultivation detected: {} minutes since your last session",
                    offline.num_minutes()
                ),
                Severity::Info,
            );
        }
    }
}

impl<S, C, R> Drop for CultivationController<S, C, R>
where
    S: TokenStore + 'static,
    C: GameApiClient + 'static,
    R: SnapshotRepository + 'static,
{
    fn drop(&mut self) {
        self.disarm_timer();
    }
}
