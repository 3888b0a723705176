use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: i64,
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// Authoritative player state as reported by `GET /player/profile`.
///
/// Numeric fields the server omits fall back to the values a freshly
/// created character has.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PlayerProfile {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub nickname: String,
    #[serde(default = "default_level")]
    pub level: u32,
    #[serde(default)]
    pub exp: i64,
    #[serde(default = "default_exp_to_next")]
    pub exp_to_next: i64,
    #[serde(default)]
    pub realm: String,
    #[serde(default)]
    pub spirit_stones: i64,
    #[serde(default)]
    pub cultivation_points: i64,
    #[serde(default)]
    pub total_cultivation_time: i64,
    #[serde(default)]
    pub is_cultivating: bool,
}

fn default_level() -> u32 {
    1
}

fn default_exp_to_next() -> i64 {
    100
}

impl Default for PlayerProfile {
    fn default() -> Self {
        Self {
            id: 0,
            nickname: String::new(),
            level: default_level(),
            exp: 0,
            exp_to_next: default_exp_to_next(),
            realm: String::new(),
            spirit_stones: 0,
            cultivation_points: 0,
            total_cultivation_time: 0,
            is_cultivating: false,
        }
    }
}

/// `data` of a successful `POST /auth/login`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoginPayload {
    pub token: String,
    pub user: User,
    #[serde(default)]
    pub player: Option<PlayerProfile>,
}

/// `data` of `POST /player/claim-offline-rewards`. Amounts are clamped at zero.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct OfflineRewardPayload {
    #[serde(default)]
    pub offline_duration: i64,
    #[serde(default)]
    pub exp_gained: i64,
    #[serde(default)]
    pub spirit_stones_gained: i64,
}

impl OfflineRewardPayload {
    pub fn offline_seconds(&self) -> u64 {
        self.offline_duration.max(0) as u64
    }

    pub fn exp(&self) -> u64 {
        self.exp_gained.max(0) as u64
    }

    pub fn spirit_stones(&self) -> u64 {
        self.spirit_stones_gained.max(0) as u64
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq, Default)]
pub struct Session {
    pub token: Option<String>,
    pub user: Option<User>,
    pub player: Option<PlayerProfile>,
    pub authenticated: bool,
    pub authenticated_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.authenticated {
            match self.token.as_deref() {
                Some(token) if !token.trim().is_empty() => {}
                _ => return Err("session.token must be present when authenticated".to_string()),
            }
            if self.user.is_none() {
                return Err("session.user must be present when authenticated".to_string());
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CultivationPhase {
    Uninitialized,
    Idle,
    Cultivating,
}

impl CultivationPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Idle => "idle",
            Self::Cultivating => "cultivating",
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CultivationState {
    pub phase: CultivationPhase,
    pub local_elapsed_seconds: u64,
    pub started_at: Option<DateTime<Utc>>,
}

impl CultivationState {
    pub fn uninitialized() -> Self {
        Self {
            phase: CultivationPhase::Uninitialized,
            local_elapsed_seconds: 0,
            started_at: None,
        }
    }

    pub fn idle() -> Self {
        Self {
            phase: CultivationPhase::Idle,
            local_elapsed_seconds: 0,
            started_at: None,
        }
    }

    pub fn cultivating_since(started_at: DateTime<Utc>) -> Self {
        Self {
            phase: CultivationPhase::Cultivating,
            local_elapsed_seconds: 0,
            started_at: Some(started_at),
        }
    }

    pub fn is_cultivating(&self) -> bool {
        self.phase == CultivationPhase::Cultivating
    }

    pub fn validate(&self) -> Result<(), String> {
        match self.phase {
            CultivationPhase::Cultivating => {
                if self.started_at.is_none() {
                    return Err("cultivation.started_at must be set while cultivating".to_string());
                }
            }
            CultivationPhase::Idle | CultivationPhase::Uninitialized => {
                if self.local_elapsed_seconds != 0 {
                    return Err("cultivation.local_elapsed_seconds must be 0 unless cultivating"
                        .to_string());
                }
                if self.started_at.is_some() {
                    return Err("cultivation.started_at must be empty unless cultivating".to_string());
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationRequest {
    pub message: String,
    pub severity: Severity,
    pub display_duration: Duration,
}

impl NotificationRequest {
    pub fn new(message: impl Into<String>, severity: Severity, display_duration: Duration) -> Self {
        Self {
            message: message.into(),
            severity,
            display_duration,
        }
    }
}

/// Best-effort local hint about the previous run. Never authoritative.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LocalSnapshot {
    pub timestamp: DateTime<Utc>,
    pub player: Option<PlayerProfile>,
    pub is_cultivating: bool,
    pub local_elapsed_seconds: u64,
}

impl LocalSnapshot {
    pub fn is_stale_at(&self, now: DateTime<Utc>, max_age: chrono::Duration) -> bool {
        now - self.timestamp > max_age
    }
}
