use crate::domain::models::{LoginPayload, OfflineRewardPayload, PlayerProfile, User};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::game_api::{Ack, ApiResponse, GameApiClient, LoginRequest, RegisterRequest};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

#[derive(Debug, Clone)]
pub enum FakeReply<T> {
    Ok(T),
    Rejected(String),
    Unauthorized,
    NetworkError,
}

impl<T> FakeReply<T> {
    fn into_response(self) -> Result<ApiResponse<T>, InfraError> {
        match self {
            Self::Ok(data) => Ok(ApiResponse::ok(data)),
            Self::Rejected(message) => Ok(ApiResponse::rejected(message, 400)),
            Self::Unauthorized => Ok(ApiResponse::unauthorized()),
            Self::NetworkError => Err(InfraError::Transport("connection refused".to_string())),
        }
    }

    fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }
}

#[derive(Debug)]
struct Scripted<T> {
    reply: FakeReply<T>,
    gate: Option<Arc<Notify>>,
}

#[derive(Debug)]
struct EndpointState<T> {
    script: VecDeque<Scripted<T>>,
    fallback: FakeReply<T>,
}

/// One fake endpoint: scripted one-shot replies first, then the fallback.
#[derive(Debug)]
pub struct Endpoint<T> {
    state: Mutex<EndpointState<T>>,
    calls: AtomicUsize,
}

impl<T: Clone> Endpoint<T> {
    fn new(fallback: FakeReply<T>) -> Self {
        Self {
            state: Mutex::new(EndpointState {
                script: VecDeque::new(),
                fallback,
            }),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set(&self, reply: FakeReply<T>) {
        let mut state = self.state.lock().expect("endpoint mutex poisoned");
        state.script.clear();
        state.fallback = reply;
    }

    pub fn push(&self, reply: FakeReply<T>) {
        let mut state = self.state.lock().expect("endpoint mutex poisoned");
        state.script.push_back(Scripted { reply, gate: None });
    }

    /// Queues a reply that is held back until the returned gate is notified.
    pub fn push_gated(&self, reply: FakeReply<T>) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        let mut state = self.state.lock().expect("endpoint mutex poisoned");
        state.script.push_back(Scripted {
            reply,
            gate: Some(Arc::clone(&gate)),
        });
        gate
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn respond(&self) -> (FakeReply<T>, bool) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let (reply, gate, scripted) = {
            let mut state = self.state.lock().expect("endpoint mutex poisoned");
            match state.script.pop_front() {
                Some(next) => (next.reply, next.gate, true),
                None => (state.fallback.clone(), None, false),
            }
        };
        if let Some(gate) = gate {
            gate.notified().await;
        }
        (reply, scripted)
    }
}

/// In-process stand-in for the game server. Unless a profile reply is
/// scripted, `isCultivating` mirrors the start/stop/reset calls that succeeded.
#[derive(Debug)]
pub struct FakeGameApi {
    pub login: Endpoint<LoginPayload>,
    pub register: Endpoint<serde_json::Value>,
    pub logout: Endpoint<serde_json::Value>,
    pub validate: Endpoint<serde_json::Value>,
    pub current_user: Endpoint<User>,
    pub profile: Endpoint<PlayerProfile>,
    pub start: Endpoint<serde_json::Value>,
    pub stop: Endpoint<serde_json::Value>,
    pub reset: Endpoint<serde_json::Value>,
    pub claim: Endpoint<OfflineRewardPayload>,
    pub server_cultivating: AtomicBool,
    tokens_seen: Mutex<Vec<String>>,
}

pub fn sample_user() -> User {
    User {
        id: 1,
        username: "lin".to_string(),
        email: Some("lin@example.com".to_string()),
    }
}

pub fn sample_profile(is_cultivating: bool) -> PlayerProfile {
    PlayerProfile {
        id: 10,
        nickname: "Lin".to_string(),
        level: 3,
        exp: 40,
        exp_to_next: 300,
        realm: "Qi Refining".to_string(),
        spirit_stones: 1_000,
        is_cultivating,
        ..PlayerProfile::default()
    }
}

pub fn login_payload(token: &str) -> LoginPayload {
    LoginPayload {
        token: token.to_string(),
        user: sample_user(),
        player: Some(sample_profile(false)),
    }
}

fn ack() -> FakeReply<serde_json::Value> {
    FakeReply::Ok(serde_json::Value::Null)
}

impl Default for FakeGameApi {
    fn default() -> Self {
        Self {
            login: Endpoint::new(FakeReply::Ok(login_payload("token-1"))),
            register: Endpoint::new(ack()),
            logout: Endpoint::new(ack()),
            validate: Endpoint::new(ack()),
            current_user: Endpoint::new(FakeReply::Ok(sample_user())),
            profile: Endpoint::new(FakeReply::Ok(sample_profile(false))),
            start: Endpoint::new(ack()),
            stop: Endpoint::new(ack()),
            reset: Endpoint::new(ack()),
            claim: Endpoint::new(FakeReply::Ok(OfflineRewardPayload::default())),
            server_cultivating: AtomicBool::new(false),
            tokens_seen: Mutex::new(Vec::new()),
        }
    }
}

impl FakeGameApi {
    pub fn cultivating_on_server() -> Self {
        let api = Self::default();
        api.server_cultivating.store(true, Ordering::SeqCst);
        api
    }

    pub fn is_server_cultivating(&self) -> bool {
        self.server_cultivating.load(Ordering::SeqCst)
    }

    pub fn tokens_seen(&self) -> Vec<String> {
        self.tokens_seen.lock().expect("tokens mutex poisoned").clone()
    }

    fn saw(&self, token: &str) {
        self.tokens_seen
            .lock()
            .expect("tokens mutex poisoned")
            .push(token.to_string());
    }

    async fn command(
        &self,
        endpoint: &Endpoint<serde_json::Value>,
        access_token: &str,
        cultivating_after: bool,
    ) -> Result<Ack, InfraError> {
        self.saw(access_token);
        let (reply, _) = endpoint.respond().await;
        if reply.is_ok() {
            self.server_cultivating.store(cultivating_after, Ordering::SeqCst);
        }
        reply.into_response()
    }
}

#[async_trait]
impl GameApiClient for FakeGameApi {
    async fn login(&self, _request: LoginRequest) -> Result<ApiResponse<LoginPayload>, InfraError> {
        self.login.respond().await.0.into_response()
    }

    async fn register(&self, _request: RegisterRequest) -> Result<Ack, InfraError> {
        self.register.respond().await.0.into_response()
    }

    async fn logout(&self, access_token: &str) -> Result<Ack, InfraError> {
        self.saw(access_token);
        self.logout.respond().await.0.into_response()
    }

    async fn validate_token(&self, access_token: &str) -> Result<Ack, InfraError> {
        self.saw(access_token);
        self.validate.respond().await.0.into_response()
    }

    async fn current_user(&self, access_token: &str) -> Result<ApiResponse<User>, InfraError> {
        self.saw(access_token);
        self.current_user.respond().await.0.into_response()
    }

    async fn player_profile(
        &self,
        access_token: &str,
    ) -> Result<ApiResponse<PlayerProfile>, InfraError> {
        self.saw(access_token);
        let (reply, scripted) = self.profile.respond().await;
        let reply = match reply {
            FakeReply::Ok(mut profile) if !scripted => {
                profile.is_cultivating = self.is_server_cultivating();
                FakeReply::Ok(profile)
            }
            other => other,
        };
        reply.into_response()
    }

    async fn start_cultivation(&self, access_token: &str) -> Result<Ack, InfraError> {
        self.command(&self.start, access_token, true).await
    }

    async fn stop_cultivation(&self, access_token: &str) -> Result<Ack, InfraError> {
        self.command(&self.stop, access_token, false).await
    }

    async fn reset_cultivation(&self, access_token: &str) -> Result<Ack, InfraError> {
        self.command(&self.reset, access_token, false).await
    }

    async fn claim_offline_rewards(
        &self,
        access_token: &str,
    ) -> Result<ApiResponse<OfflineRewardPayload>, InfraError> {
        self.saw(access_token);
        self.claim.respond().await.0.into_response()
    }
}
