use crate::domain::models::{LoginPayload, OfflineRewardPayload, PlayerProfile, User};
use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

const LOGIN_PATH: &[&str] = &["auth", "login"];
const REGISTER_PATH: &[&str] = &["auth", "register"];
const LOGOUT_PATH: &[&str] = &["auth", "logout"];
const VALIDATE_PATH: &[&str] = &["auth", "validate"];
const CURRENT_USER_PATH: &[&str] = &["auth", "me"];
const PROFILE_PATH: &[&str] = &["player", "profile"];
const CULTIVATE_PATH: &[&str] = &["player", "cultivate"];
const STOP_CULTIVATION_PATH: &[&str] = &["player", "cultivate", "stop"];
const RESET_CULTIVATION_PATH: &[&str] = &["player", "reset-cultivation"];
const CLAIM_OFFLINE_REWARDS_PATH: &[&str] = &["player", "claim-offline-rewards"];

/// `{success, data, message}` envelope returned by every endpoint.
///
/// Non-2xx replies are folded into `success == false` with the HTTP status
/// kept in `status`, so callers can tell an expired credential (401) from an
/// ordinary rejection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub message: Option<String>,
    pub data: Option<T>,
    pub status: u16,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            message: None,
            data: Some(data),
            status: 200,
        }
    }

    pub fn rejected(message: impl Into<String>, status: u16) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            data: None,
            status,
        }
    }

    pub fn unauthorized() -> Self {
        Self::rejected("HTTP 401", 401)
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status == StatusCode::UNAUTHORIZED.as_u16()
    }
}

/// Acknowledgement with no payload the client cares about.
pub type Ack = ApiResponse<serde_json::Value>;

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    message: Option<String>,
    data: Option<T>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegisterRequest {
    pub username: String,
    pub nickname: String,
    pub email: String,
    pub password: String,
}

/// Remote game service. Authenticated calls take the bearer token per call;
/// `Err` is reserved for transport and decoding failures.
#[async_trait]
pub trait GameApiClient: Send + Sync {
    async fn login(&self, request: LoginRequest) -> Result<ApiResponse<LoginPayload>, InfraError>;

    async fn register(&self, request: RegisterRequest) -> Result<Ack, InfraError>;

    async fn logout(&self, access_token: &str) -> Result<Ack, InfraError>;

    async fn validate_token(&self, access_token: &str) -> Result<Ack, InfraError>;

    async fn current_user(&self, access_token: &str) -> Result<ApiResponse<User>, InfraError>;

    async fn player_profile(&self, access_token: &str)
        -> Result<ApiResponse<PlayerProfile>, InfraError>;

    async fn start_cultivation(&self, access_token: &str) -> Result<Ack, InfraError>;

    async fn stop_cultivation(&self, access_token: &str) -> Result<Ack, InfraError>;

    async fn reset_cultivation(&self, access_token: &str) -> Result<Ack, InfraError>;

    async fn claim_offline_rewards(
        &self,
        access_token: &str,
    ) -> Result<ApiResponse<OfflineRewardPayload>, InfraError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestGameApiClient {
    client: Client,
    base_url: Url,
}

impl ReqwestGameApiClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, InfraError> {
        let base_url = Url::parse(base_url)
            .map_err(|error| InfraError::InvalidConfig(format!("invalid api base url: {error}")))?;
        if base_url.cannot_be_a_base() {
            return Err(InfraError::InvalidConfig(
                "api base URL cannot be a base".to_string(),
            ));
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| InfraError::Transport(format!("failed building http client: {error}")))?;
        Ok(Self { client, base_url })
    }

    fn endpoint(&self, path: &[&str]) -> Result<Url, InfraError> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                InfraError::InvalidConfig("api base URL cannot be a base".to_string())
            })?;
            segments.pop_if_empty();
            segments.extend(path);
        }
        Ok(url)
    }

    async fn send<T, B>(
        &self,
        method: Method,
        path: &[&str],
        access_token: Option<&str>,
        body: Option<&B>,
    ) -> Result<ApiResponse<T>, InfraError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized + Sync,
    {
        let endpoint = self.endpoint(path)?;
        let label = path.join("/");
        let mut request = self.client.request(method, endpoint);
        if let Some(token) = access_token {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|error| InfraError::Transport(format!("network error calling /{label}: {error}")))?;

        let status = response.status();
        let body = response.text().await.map_err(|error| {
            InfraError::Transport(format!("failed reading /{label} response: {error}"))
        })?;

        if !status.is_success() {
            return Ok(ApiResponse::rejected(
                failure_message(status, &body),
                status.as_u16(),
            ));
        }

        let parsed = serde_json::from_str::<Envelope<T>>(&body).map_err(|error| {
            InfraError::Transport(format!("invalid /{label} payload: {error}; body={body}"))
        })?;
        Ok(ApiResponse {
            success: parsed.success,
            message: parsed.message,
            data: parsed.data,
            status: status.as_u16(),
        })
    }
}

fn failure_message(status: StatusCode, body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| {
            value
                .get("message")
                .and_then(serde_json::Value::as_str)
                .map(str::trim)
                .filter(|message| !message.is_empty())
                .map(ToOwned::to_owned)
        })
        .unwrap_or_else(|| format!("HTTP {}", status.as_u16()))
}

#[async_trait]
impl GameApiClient for ReqwestGameApiClient {
    async fn login(&self, request: LoginRequest) -> Result<ApiResponse<LoginPayload>, InfraError> {
        self.send(Method::POST, LOGIN_PATH, None, Some(&request)).await
    }

    async fn register(&self, request: RegisterRequest) -> Result<Ack, InfraError> {
        self.send(Method::POST, REGISTER_PATH, None, Some(&request)).await
    }

    async fn logout(&self, access_token: &str) -> Result<Ack, InfraError> {
        self.send::<_, ()>(Method::POST, LOGOUT_PATH, Some(access_token), None)
            .await
    }

    async fn validate_token(&self, access_token: &str) -> Result<Ack, InfraError> {
        self.send::<_, ()>(Method::GET, VALIDATE_PATH, Some(access_token), None)
            .await
    }

    async fn current_user(&self, access_token: &str) -> Result<ApiResponse<User>, InfraError> {
        self.send::<_, ()>(Method::GET, CURRENT_USER_PATH, Some(access_token), None)
            .await
    }

    async fn player_profile(
        &self,
        access_token: &str,
    ) -> Result<ApiResponse<PlayerProfile>, InfraError> {
        self.send::<_, ()>(Method::GET, PROFILE_PATH, Some(access_token), None)
            .await
    }

    async fn start_cultivation(&self, access_token: &str) -> Result<Ack, InfraError> {
        self.send::<_, ()>(Method::POST, CULTIVATE_PATH, Some(access_token), None)
            .await
    }

    async fn stop_cultivation(&self, access_token: &str) -> Result<Ack, InfraError> {
        self.send::<_, ()>(Method::POST, STOP_CULTIVATION_PATH, Some(access_token), None)
            .await
    }

    async fn reset_cultivation(&self, access_token: &str) -> Result<Ack, InfraError> {
        self.send::<_, ()>(Method::POST, RESET_CULTIVATION_PATH, Some(access_token), None)
            .await
    }

    async fn claim_offline_rewards(
        &self,
        access_token: &str,
    ) -> Result<ApiResponse<OfflineRewardPayload>, InfraError> {
        self.send::<_, ()>(
            Method::POST,
            CLAIM_OFFLINE_REWARDS_PATH,
            Some(access_token),
            None,
        )
        .await
    }
}
