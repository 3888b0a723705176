use crate::application::error::{accept, accept_data, ClientError};
use crate::domain::models::{PlayerProfile, Session, User};
use crate::infrastructure::game_api::{GameApiClient, LoginRequest, RegisterRequest};
use crate::infrastructure::token_store::TokenStore;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreOutcome {
    Restored(Session),
    NoSession,
    /// A stored token existed but could not be confirmed; it has been removed.
    Discarded { reason: String },
}

#[derive(Debug, Clone)]
pub struct Registration {
    pub username: String,
    pub nickname: String,
    pub email: String,
    pub password: String,
}

type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Owns the authentication lifecycle and is the only writer of the stored
/// token. Every transition is published on a `watch` channel.
pub struct SessionManager<S, C>
where
    S: TokenStore,
    C: GameApiClient,
{
    token_store: Arc<S>,
    api: Arc<C>,
    state: watch::Sender<Session>,
    now_provider: NowProvider,
}

impl<S, C> SessionManager<S, C>
where
    S: TokenStore,
    C: GameApiClient,
{
    pub fn new(token_store: Arc<S>, api: Arc<C>) -> Self {
        let (state, _) = watch::channel(Session::anonymous());
        Self {
            token_store,
            api,
            state,
            now_provider: Arc::new(Utc::now),
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn session(&self) -> Session {
        self.state.borrow().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.borrow().authenticated
    }

    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.state.subscribe()
    }

    /// Current bearer token, re-read from the store on every call.
    pub fn access_token(&self) -> Result<String, ClientError> {
        if !self.is_authenticated() {
            return Err(ClientError::NotAuthenticated);
        }
        match self.token_store.load_token()? {
            Some(token) => Ok(token),
            None => {
                self.expire("stored token disappeared");
                Err(ClientError::NotAuthenticated)
            }
        }
    }

    /// Resumes a previous session from the stored token. Fails closed: any
    /// problem confirming the token removes it and leaves the session
    /// unauthenticated.
    pub async fn restore(&self) -> RestoreOutcome {
        let token = match self.token_store.load_token() {
            Ok(Some(token)) => token,
            Ok(None) => {
                self.state.send_replace(Session::anonymous());
                return RestoreOutcome::NoSession;
            }
            Err(error) => return self.discard(error.to_string()),
        };

        match self.confirm(&token).await {
            Ok((user, player)) => {
                let session = self.authenticated_session(token, user, Some(player));
                self.state.send_replace(session.clone());
                tracing::info!(user = %session_username(&session), "session restored");
                RestoreOutcome::Restored(session)
            }
            Err(error) => self.discard(error.to_string()),
        }
    }

    async fn confirm(&self, token: &str) -> Result<(User, PlayerProfile), ClientError> {
        accept(self.api.validate_token(token).await, "Token validation failed")?;
        let user = accept_data(self.api.current_user(token).await, "Failed to load current user")?;
        let player = accept_data(
            self.api.player_profile(token).await,
            "Failed to load player profile",
        )?;
        Ok((user, player))
    }

    fn discard(&self, reason: String) -> RestoreOutcome {
        tracing::warn!(%reason, "discarding stored session");
        if let Err(error) = self.token_store.delete_token() {
            tracing::warn!(%error, "failed to delete stored token");
        }
        self.state.send_replace(Session::anonymous());
        RestoreOutcome::Discarded { reason }
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<Session, ClientError> {
        let payload = accept_data(
            self.api
                .login(LoginRequest {
                    username: username.to_string(),
                    password: password.to_string(),
                })
                .await,
            "Login failed",
        )?;
        if payload.token.trim().is_empty() {
            return Err(ClientError::remote("Login failed: response carried no token"));
        }

        self.token_store.save_token(&payload.token)?;

        let player = match payload.player {
            Some(player) => Some(player),
            None => match accept_data(
                self.api.player_profile(&payload.token).await,
                "Failed to load player profile",
            ) {
                Ok(player) => Some(player),
                Err(error) => {
                    tracing::warn!(%error, "profile unavailable after login");
                    None
                }
            },
        };

        let session = self.authenticated_session(payload.token, payload.user, player);
        self.state.send_replace(session.clone());
        tracing::info!(user = %session_username(&session), "logged in");
        Ok(session)
    }

    /// Creates an account. The session is left as it is; callers log in
    /// afterwards.
    pub async fn register(&self, registration: Registration) -> Result<String, ClientError> {
        let response = accept(
            self.api
                .register(RegisterRequest {
                    username: registration.username,
                    nickname: registration.nickname,
                    email: registration.email,
                    password: registration.password,
                })
                .await,
            "Registration failed",
        )?;
        Ok(response
            .message
            .unwrap_or_else(|| "Registration succeeded".to_string()))
    }

    /// Best-effort remote logout followed by an unconditional local clear.
    pub async fn logout(&self) {
        match self.token_store.load_token() {
            Ok(Some(token)) => match self.api.logout(&token).await {
                Ok(response) if response.success => {}
                Ok(response) => tracing::warn!(
                    status = response.status,
                    message = response.message.as_deref().unwrap_or(""),
                    "remote logout rejected"
                ),
                Err(error) => tracing::warn!(%error, "remote logout failed"),
            },
            Ok(None) => {}
            Err(error) => tracing::warn!(%error, "failed to read token for logout"),
        }
        self.clear_local();
        tracing::info!("logged out");
    }

    /// Local-only logout after the server rejected the credential.
    pub fn expire(&self, reason: &str) {
        tracing::warn!(reason, "session expired");
        self.clear_local();
    }

    /// Handles a 401 for `token`. Only expires the session when `token` is
    /// still the current credential; a rejection of a superseded token is
    /// reported as `NotAuthenticated` and leaves the newer session alone.
    pub fn expire_token(&self, token: &str, reason: &str) -> ClientError {
        let current = {
            let session = self.state.borrow();
            session.authenticated && session.token.as_deref() == Some(token)
        };
        if !current {
            tracing::debug!(reason, "ignoring 401 for a superseded token");
            return ClientError::NotAuthenticated;
        }
        self.expire(reason);
        ClientError::AuthExpired
    }

    fn clear_local(&self) {
        if let Err(error) = self.token_store.delete_token() {
            tracing::warn!(%error, "failed to delete stored token");
        }
        self.state.send_replace(Session::anonymous());
    }

    pub async fn refresh_profile(&self) -> Result<PlayerProfile, ClientError> {
        let token = self.access_token()?;
        let result = accept_data(
            self.api.player_profile(&token).await,
            "Failed to load player profile",
        );
        let profile = match result {
            Ok(profile) => profile,
            Err(ClientError::AuthExpired) => {
                return Err(self.expire_token(&token, "profile request returned 401"));
            }
            Err(error) => return Err(error),
        };

        self.state.send_if_modified(|session| {
            if session.authenticated && session.token.as_deref() == Some(token.as_str()) {
                session.player = Some(profile.clone());
                true
            } else {
                false
            }
        });
        Ok(profile)
    }

    fn authenticated_session(
        &self,
        token: String,
        user: User,
        player: Option<PlayerProfile>,
    ) -> Session {
        Session {
            token: Some(token),
            user: Some(user),
            player,
            authenticated: true,
            authenticated_at: Some((self.now_provider)()),
        }
    }
}

fn session_username(session: &Session) -> &str {
    session
        .user
        .as_ref()
        .map(|user| user.username.as_str())
        .unwrap_or("")
}
