//! Session and cultivation state for the cultivation game client.
//!
//! [`GameClient`] is the entry point: it restores or establishes a session,
//! reconciles cultivation state with the server and serializes user-facing
//! notifications.

pub mod application;
pub mod domain;
pub mod infrastructure;

#[cfg(test)]
mod test_support;

pub use application::client::{DefaultGameClient, GameClient};
pub use application::cultivation::{
    CultivationController, CultivationSettings, ReconcileOutcome, StopOutcome, ToggleOutcome,
};
pub use application::error::ClientError;
pub use application::notifications::{
    DismissReason, NotificationEvent, NotificationId, NotificationQueue,
};
pub use application::session::{Registration, RestoreOutcome, SessionManager};
pub use domain::models::{
    CultivationPhase, CultivationState, NotificationRequest, PlayerProfile, Session, Severity, User,
};
pub use domain::offline_reward::{summarize_offline_reward, OfflineRewardSummary, RewardTotals};
pub use infrastructure::error::InfraError;
