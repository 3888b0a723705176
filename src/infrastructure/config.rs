use crate::infrastructure::error::InfraError;
use crate::infrastructure::token_store::DEFAULT_KEYRING_SERVICE;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

const CLIENT_JSON: &str = "client.json";
const DEFAULT_BASE_URL: &str = "http://localhost:8080/api";
const MAX_SNAPSHOT_AGE_HOURS: i64 = 24 * 365;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    pub base_url: String,
    pub request_timeout_ms: u64,
    pub tick_interval_ms: u64,
    pub refresh_every_ticks: u64,
    pub notification_duration_ms: u64,
    pub snapshot_max_age_hours: i64,
    pub keyring_service: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout_ms: 10_000,
            tick_interval_ms: 1_000,
            refresh_every_ticks: 30,
            notification_duration_ms: 3_000,
            snapshot_max_age_hours: 24 * 7,
            keyring_service: DEFAULT_KEYRING_SERVICE.to_string(),
        }
    }
}

impl ClientConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn notification_duration(&self) -> Duration {
        Duration::from_millis(self.notification_duration_ms)
    }

    pub fn snapshot_max_age(&self) -> chrono::Duration {
        chrono::Duration::hours(self.snapshot_max_age_hours.clamp(1, MAX_SNAPSHOT_AGE_HOURS))
    }

    fn validate(&self) -> Result<(), InfraError> {
        if self.base_url.trim().is_empty() {
            return Err(InfraError::InvalidConfig("baseUrl must not be empty".to_string()));
        }
        url::Url::parse(&self.base_url)
            .map_err(|error| InfraError::InvalidConfig(format!("invalid baseUrl: {error}")))?;
        if self.tick_interval_ms == 0 {
            return Err(InfraError::InvalidConfig("tickIntervalMs must be > 0".to_string()));
        }
        if self.refresh_every_ticks == 0 {
            return Err(InfraError::InvalidConfig("refreshEveryTicks must be > 0".to_string()));
        }
        if !(1..=MAX_SNAPSHOT_AGE_HOURS).contains(&self.snapshot_max_age_hours) {
            return Err(InfraError::InvalidConfig(format!(
                "snapshotMaxAgeHours must be between 1 and {MAX_SNAPSHOT_AGE_HOURS}"
            )));
        }
        Ok(())
    }
}

fn default_files() -> HashMap<&'static str, serde_json::Value> {
    let defaults = ClientConfig::default();
    HashMap::from([(
        CLIENT_JSON,
        serde_json::json!({
            "schema": 1,
            "baseUrl": defaults.base_url,
            "requestTimeoutMs": defaults.request_timeout_ms,
            "tickIntervalMs": defaults.tick_interval_ms,
            "refreshEveryTicks": defaults.refresh_every_ticks,
            "notificationDurationMs": defaults.notification_duration_ms,
            "snapshotMaxAgeHours": defaults.snapshot_max_age_hours,
            "keyringService": defaults.keyring_service
        }),
    )])
}

pub fn ensure_default_configs(config_dir: &Path) -> Result<(), InfraError> {
    for (name, value) in default_files() {
        let path = config_dir.join(name);
        if !path.exists() {
            let formatted = serde_json::to_string_pretty(&value)?;
            fs::write(path, format!("{formatted}\n"))?;
        }
    }
    Ok(())
}

fn read_config(path: &Path) -> Result<serde_json::Value, InfraError> {
    let raw = fs::read_to_string(path)?;
    let parsed: serde_json::Value = serde_json::from_str(&raw)?;
    let schema = parsed
        .get("schema")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| InfraError::InvalidConfig(format!("missing schema in {}", path.display())))?;
    if schema != 1 {
        return Err(InfraError::InvalidConfig(format!(
            "unsupported schema {} in {}",
            schema,
            path.display()
        )));
    }
    Ok(parsed)
}

/// Reads `client.json`, falling back to defaults for absent keys, then applies
/// environment overrides.
pub fn load_client_config(config_dir: &Path) -> Result<ClientConfig, InfraError> {
    load_client_config_with_lookup(config_dir, |key| std::env::var(key).ok())
}

pub fn load_client_config_with_lookup<F>(config_dir: &Path, lookup: F) -> Result<ClientConfig, InfraError>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = read_config(&config_dir.join(CLIENT_JSON))?;
    let mut merged = serde_json::to_value(ClientConfig::default())?;
    if let (Some(target), Some(source)) = (merged.as_object_mut(), raw.as_object()) {
        for (key, value) in source {
            if key != "schema" && target.contains_key(key) && !value.is_null() {
                target.insert(key.clone(), value.clone());
            }
        }
    }
    let mut config: ClientConfig = serde_json::from_value(merged).map_err(|error| {
        InfraError::InvalidConfig(format!("invalid {CLIENT_JSON}: {error}"))
    })?;

    if let Some(base_url) =
        optional_lookup_value(&lookup, &["CULTIVATION_API_BASE_URL", "GAME_API_BASE_URL"])
    {
        config.base_url = base_url;
    }
    if let Some(raw_timeout) = optional_lookup_value(&lookup, &["CULTIVATION_REQUEST_TIMEOUT_MS"]) {
        config.request_timeout_ms = raw_timeout.parse::<u64>().map_err(|_| {
            InfraError::InvalidConfig(format!(
                "CULTIVATION_REQUEST_TIMEOUT_MS must be an integer, got '{raw_timeout}'"
            ))
        })?;
    }

    config.validate()?;
    Ok(config)
}

fn optional_lookup_value<F>(lookup: &F, keys: &[&str]) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    for key in keys {
        if let Some(value) = lookup(key) {
            let normalized = value.trim();
            if !normalized.is_empty() {
                return Some(normalized.to_string());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static NEXT_TEMP_DIR: AtomicUsize = AtomicUsize::new(0);

    struct TempConfigDir {
        path: PathBuf,
    }

    impl TempConfigDir {
        fn new() -> Self {
            let sequence = NEXT_TEMP_DIR.fetch_add(1, Ordering::Relaxed);
            let path = std::env::temp_dir().join(format!(
                "cultivation-config-tests-{}-{}",
                std::process::id(),
                sequence
            ));
            fs::create_dir_all(&path).expect("create temp config dir");
            Self { path }
        }

        fn write(&self, value: serde_json::Value) {
            fs::write(self.path.join(CLIENT_JSON), value.to_string()).expect("write client.json");
        }
    }

    impl Drop for TempConfigDir {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.path);
        }
    }

    #[test]
    fn defaults_are_written_and_loaded() {
        let dir = TempConfigDir::new();
        ensure_default_configs(&dir.path).expect("write defaults");
        let config = load_client_config_with_lookup(&dir.path, |_| None).expect("load config");
        assert_eq!(config, ClientConfig::default());
        assert_eq!(config.tick_interval(), Duration::from_secs(1));
        assert_eq!(config.refresh_every_ticks, 30);
    }

    #[test]
    fn existing_config_is_not_overwritten() {
        let dir = TempConfigDir::new();
        dir.write(serde_json::json!({"schema": 1, "baseUrl": "https://game.example.com/api"}));
        ensure_default_configs(&dir.path).expect("ensure defaults");
        let config = load_client_config_with_lookup(&dir.path, |_| None).expect("load config");
        assert_eq!(config.base_url, "https://game.example.com/api");
        assert_eq!(config.notification_duration_ms, 3_000);
    }

    #[test]
    fn environment_overrides_base_url() {
        let dir = TempConfigDir::new();
        ensure_default_configs(&dir.path).expect("write defaults");
        let config = load_client_config_with_lookup(&dir.path, |key| match key {
            "GAME_API_BASE_URL" => Some("  https://override.example.com/api ".to_string()),
            _ => None,
        })
        .expect("load config");
        assert_eq!(config.base_url, "https://override.example.com/api");
    }

    #[test]
    fn unsupported_schema_is_rejected() {
        let dir = TempConfigDir::new();
        dir.write(serde_json::json!({"schema": 2}));
        let result = load_client_config_with_lookup(&dir.path, |_| None);
        match result {
            Err(InfraError::InvalidConfig(message)) => assert!(message.contains("unsupported schema")),
            other => panic!("expected invalid config error, got {other:?}"),
        }
    }

    #[test]
    fn zero_tick_interval_is_rejected() {
        let dir = TempConfigDir::new();
        dir.write(serde_json::json!({"schema": 1, "tickIntervalMs": 0}));
        let result = load_client_config_with_lookup(&dir.path, |_| None);
        assert!(matches!(result, Err(InfraError::InvalidConfig(_))));
    }

    #[test]
    fn oversized_snapshot_age_is_rejected() {
        let dir = TempConfigDir::new();
        dir.write(serde_json::json!({"schema": 1, "snapshotMaxAgeHours": i64::MAX}));
        let result = load_client_config_with_lookup(&dir.path, |_| None);
        match result {
            Err(InfraError::InvalidConfig(message)) => assert!(message.contains("snapshotMaxAgeHours")),
            other => panic!("expected invalid config error, got {other:?}"),
        }

        let config = ClientConfig {
            snapshot_max_age_hours: i64::MAX,
            ..ClientConfig::default()
        };
        assert_eq!(config.snapshot_max_age(), chrono::Duration::days(365));
    }

    #[test]
    fn malformed_timeout_override_is_reported() {
        let dir = TempConfigDir::new();
        ensure_default_configs(&dir.path).expect("write defaults");
        let result = load_client_config_with_lookup(&dir.path, |key| match key {
            "CULTIVATION_REQUEST_TIMEOUT_MS" => Some("soon".to_string()),
            _ => None,
        });
        match result {
            Err(InfraError::InvalidConfig(message)) => assert!(message.contains("soon")),
            other => panic!("expected invalid config error, got {other:?}"),
        }
    }
}
