use crate::infrastructure::error::InfraError;
use std::sync::Mutex;

/// Single persisted bearer token. Only the session manager writes it.
pub trait TokenStore: Send + Sync {
    fn save_token(&self, token: &str) -> Result<(), InfraError>;
    fn load_token(&self) -> Result<Option<String>, InfraError>;
    fn delete_token(&self) -> Result<(), InfraError>;
}

pub const DEFAULT_KEYRING_SERVICE: &str = "cultivation-client.auth";
pub const DEFAULT_KEYRING_ACCOUNT: &str = "default";

#[derive(Debug, Clone)]
pub struct KeyringTokenStore {
    service_name: String,
    account_name: String,
}

impl KeyringTokenStore {
    pub fn new(service_name: impl Into<String>, account_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            account_name: account_name.into(),
        }
    }

    fn entry(&self) -> Result<keyring::Entry, InfraError> {
        keyring::Entry::new(&self.service_name, &self.account_name)
            .map_err(|error| InfraError::Credential(error.to_string()))
    }
}

impl TokenStore for KeyringTokenStore {
    fn save_token(&self, token: &str) -> Result<(), InfraError> {
        if token.trim().is_empty() {
            return Err(InfraError::Credential("token must not be empty".to_string()));
        }
        self.entry()?
            .set_password(token)
            .map_err(|error| InfraError::Credential(error.to_string()))
    }

    fn load_token(&self) -> Result<Option<String>, InfraError> {
        match self.entry()?.get_password() {
            Ok(value) if value.trim().is_empty() => Ok(None),
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(error) => Err(InfraError::Credential(error.to_string())),
        }
    }

    fn delete_token(&self) -> Result<(), InfraError> {
        match self.entry()?.delete_credential() {
            Ok(_) => Ok(()),
            Err(keyring::Error::NoEntry) => Ok(()),
            Err(error) => Err(InfraError::Credential(error.to_string())),
        }
    }
}

#[derive(Debug, Default)]
pub struct InMemoryTokenStore {
    token: Mutex<Option<String>>,
}

impl InMemoryTokenStore {
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: Mutex::new(Some(token.into())),
        }
    }
}

impl TokenStore for InMemoryTokenStore {
    fn save_token(&self, token: &str) -> Result<(), InfraError> {
        if token.trim().is_empty() {
            return Err(InfraError::Credential("token must not be empty".to_string()));
        }
        let mut guard = self
            .token
            .lock()
            .map_err(|error| InfraError::Credential(format!("in-memory lock poisoned: {error}")))?;
        *guard = Some(token.to_string());
        Ok(())
    }

    fn load_token(&self) -> Result<Option<String>, InfraError> {
        let guard = self
            .token
            .lock()
            .map_err(|error| InfraError::Credential(format!("in-memory lock poisoned: {error}")))?;
        Ok(guard.clone())
    }

    fn delete_token(&self) -> Result<(), InfraError> {
        let mut guard = self
            .token
            .lock()
            .map_err(|error| InfraError::Credential(format!("in-memory lock poisoned: {error}")))?;
        *guard = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn saved_token_is_returned_verbatim(token in "[A-Za-z0-9._\\-]{1,128}") {
            let store = InMemoryTokenStore::default();
            store.save_token(&token).expect("save token");
            let loaded = store.load_token().expect("load token");
            prop_assert_eq!(loaded, Some(token));
        }
    }

    #[test]
    fn delete_is_idempotent() {
        let store = InMemoryTokenStore::with_token("abc");
        store.delete_token().expect("first delete");
        store.delete_token().expect("second delete");
        assert_eq!(store.load_token().expect("load token"), None);
    }

    #[test]
    fn keyring_store_uses_configured_service_and_shared_account() {
        let store = KeyringTokenStore::new("custom.auth", DEFAULT_KEYRING_ACCOUNT);
        assert_eq!(store.service_name, "custom.auth");
        assert_eq!(store.account_name, "default");
    }

    #[test]
    fn blank_token_is_rejected() {
        let store = InMemoryTokenStore::default();
        let result = store.save_token("   ");
        assert!(matches!(result, Err(InfraError::Credential(_))));
        assert_eq!(store.load_token().expect("load token"), None);
    }
}
