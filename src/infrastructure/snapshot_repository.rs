use crate::domain::models::{LocalSnapshot, PlayerProfile};
use crate::infrastructure::error::InfraError;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub trait SnapshotRepository: Send + Sync {
    fn load(&self) -> Result<Option<LocalSnapshot>, InfraError>;
    fn save(&self, snapshot: &LocalSnapshot) -> Result<(), InfraError>;
    fn clear(&self) -> Result<(), InfraError>;
}

#[derive(Debug, Clone)]
pub struct SqliteSnapshotRepository {
    db_path: PathBuf,
}

impl SqliteSnapshotRepository {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }

    fn connect(&self) -> Result<Connection, InfraError> {
        Connection::open(&self.db_path).map_err(InfraError::from)
    }
}

impl SnapshotRepository for SqliteSnapshotRepository {
    fn load(&self) -> Result<Option<LocalSnapshot>, InfraError> {
        let connection = self.connect()?;
        let row: Option<(String, Option<String>, bool, i64)> = connection
            .query_row(
                "SELECT saved_at, player_json, is_cultivating, local_elapsed_seconds
                 FROM local_snapshot WHERE id = 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()?;

        let Some((saved_at_raw, player_json, is_cultivating, elapsed)) = row else {
            return Ok(None);
        };

        let timestamp = DateTime::parse_from_rfc3339(&saved_at_raw)
            .map_err(|error| {
                InfraError::InvalidConfig(format!(
                    "invalid local_snapshot.saved_at '{}': {error}",
                    saved_at_raw
                ))
            })?
            .with_timezone(&Utc);
        let player = player_json
            .as_deref()
            .map(serde_json::from_str::<PlayerProfile>)
            .transpose()?;

        Ok(Some(LocalSnapshot {
            timestamp,
            player,
            is_cultivating,
            local_elapsed_seconds: elapsed.max(0) as u64,
        }))
    }

    fn save(&self, snapshot: &LocalSnapshot) -> Result<(), InfraError> {
        let player_json = snapshot
            .player
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let elapsed = i64::try_from(snapshot.local_elapsed_seconds).unwrap_or(i64::MAX);
        let connection = self.connect()?;
        connection.execute(
            "INSERT INTO local_snapshot (id, saved_at, player_json, is_cultivating, local_elapsed_seconds)
             VALUES (1, ?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
               saved_at = excluded.saved_at,
               player_json = excluded.player_json,
               is_cultivating = excluded.is_cultivating,
               local_elapsed_seconds = excluded.local_elapsed_seconds",
            params![
                snapshot.timestamp.to_rfc3339(),
                player_json,
                snapshot.is_cultivating,
                elapsed
            ],
        )?;
        Ok(())
    }

    fn clear(&self) -> Result<(), InfraError> {
        let connection = self.connect()?;
        connection.execute("DELETE FROM local_snapshot WHERE id = 1", [])?;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemorySnapshotRepository {
    snapshot: Mutex<Option<LocalSnapshot>>,
}

impl SnapshotRepository for InMemorySnapshotRepository {
    fn load(&self) -> Result<Option<LocalSnapshot>, InfraError> {
        let snapshot = self
            .snapshot
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("snapshot lock poisoned: {error}")))?;
        Ok(snapshot.clone())
    }

    fn save(&self, snapshot: &LocalSnapshot) -> Result<(), InfraError> {
        let mut guard = self
            .snapshot
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("snapshot lock poisoned: {error}")))?;
        *guard = Some(snapshot.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), InfraError> {
        let mut guard = self
            .snapshot
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("snapshot lock poisoned: {error}")))?;
        *guard = None;
        Ok(())
    }
}
