use crate::infrastructure::error::InfraError;
use crate::infrastructure::game_api::ApiResponse;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("authentication expired, please log in again")]
    AuthExpired,
    #[error("not authenticated")]
    NotAuthenticated,
    #[error("cultivation is not initialized")]
    NotInitialized,
    #[error("already cultivating")]
    AlreadyCultivating,
    #[error("another cultivation operation is in progress")]
    OperationInProgress,
    #[error("{message}")]
    RemoteUnavailable { message: String },
    #[error("server cultivation state may be inconsistent: {0}")]
    InconsistentServerState(String),
    #[error(transparent)]
    Infra(#[from] InfraError),
}

impl ClientError {
    pub fn remote(message: impl Into<String>) -> Self {
        Self::RemoteUnavailable {
            message: message.into(),
        }
    }

    pub fn is_auth_expired(&self) -> bool {
        matches!(self, Self::AuthExpired)
    }
}

/// Collapses a transport result and the `{success, message}` envelope into a
/// single outcome. A 401 on an authenticated call is `AuthExpired`; any other
/// rejection carries the server message verbatim.
pub(crate) fn accept<T>(
    result: Result<ApiResponse<T>, InfraError>,
    fallback_message: &str,
) -> Result<ApiResponse<T>, ClientError> {
    let response = match result {
        Ok(response) => response,
        Err(InfraError::Transport(message)) => return Err(ClientError::remote(message)),
        Err(error) => return Err(ClientError::Infra(error)),
    };
    if response.is_unauthorized() {
        return Err(ClientError::AuthExpired);
    }
    if !response.success {
        let message = response
            .message
            .filter(|message| !message.trim().is_empty())
            .unwrap_or_else(|| fallback_message.to_string());
        return Err(ClientError::remote(message));
    }
    Ok(response)
}

/// Like [`accept`] but also requires a `data` payload.
pub(crate) fn accept_data<T>(
    result: Result<ApiResponse<T>, InfraError>,
    fallback_message: &str,
) -> Result<T, ClientError> {
    accept(result, fallback_message)?
        .data
        .ok_or_else(|| ClientError::remote(format!("{fallback_message}: response carried no data")))
}
