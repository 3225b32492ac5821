//! `SQLite` implementation of [`StateStore`].

use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row, SqlitePool};

use uhab_app::ports::StateStore;
use uhab_app::ports::state_store::StoredState;
use uhab_domain::error::HubError;
use uhab_domain::state::ItemState;

use crate::error::StorageError;

/// Decodes a row without teaching domain types about the database.
struct Wrapper(StoredState);

impl<'r> FromRow<'r, SqliteRow> for Wrapper {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let name: String = row.try_get("name")?;
        let state: String = row.try_get("state")?;
        let state: ItemState =
            serde_json::from_str(&state).map_err(|err| sqlx::Error::Decode(Box::new(err)))?;
        Ok(Self((name, state)))
    }
}

const SELECT_ALL: &str = "SELECT name, state FROM item_states ORDER BY name";

const UPSERT: &str = r"
    INSERT INTO item_states (name, state, updated_at)
    VALUES (?, ?, ?)
    ON CONFLICT(name) DO UPDATE SET state = excluded.state, updated_at = excluded.updated_at
";

/// `SQLite`-backed item state store.
#[derive(Debug, Clone)]
pub struct SqliteStateStore {
    pool: SqlitePool,
}

impl SqliteStateStore {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

impl StateStore for SqliteStateStore {
    async fn load(&self) -> Result<Vec<StoredState>, HubError> {
        let rows: Vec<Wrapper> = sqlx::query_as(SELECT_ALL)
            .fetch_all(&self.pool)
            .await
            .map_err(StorageError::from)?;
        Ok(rows.into_iter().map(|w| w.0).collect())
    }

    async fn save(&self, states: &[StoredState]) -> Result<(), HubError> {
        let now = chrono::Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await.map_err(StorageError::from)?;
        for (name, state) in states {
            let json = serde_json::to_string(state).map_err(StorageError::from)?;
            sqlx::query(UPSERT)
                .bind(name)
                .bind(json)
                .bind(&now)
                .execute(&mut *tx)
                .await
                .map_err(StorageError::from)?;
        }
        tx.commit().await.map_err(StorageError::from)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::Config;
    use uhab_domain::state::Command;

    async fn store() -> SqliteStateStore {
        let db = Config {
            database_url: "sqlite::memory:".to_string(),
        }
        .build()
        .await
        .unwrap();
        SqliteStateStore::new(db.pool().clone())
    }

    #[tokio::test]
    async fn should_return_nothing_from_empty_store() {
        let store = store().await;
        assert!(store.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn should_save_and_load_states() {
        let store = store().await;
        let states = vec![
            ("lamp".to_string(), ItemState::Command(Command::On)),
            ("level".to_string(), ItemState::Number(42.5)),
            ("note".to_string(), ItemState::String(Some("hello".into()))),
        ];
        store.save(&states).await.unwrap();

        assert_eq!(store.load().await.unwrap(), states);
    }

    #[tokio::test]
    async fn should_overwrite_existing_state() {
        let store = store().await;
        store
            .save(&[("lamp".to_string(), ItemState::Command(Command::On))])
            .await
            .unwrap();
        store
            .save(&[("lamp".to_string(), ItemState::Command(Command::Off))])
            .await
            .unwrap();

        assert_eq!(
            store.load().await.unwrap(),
            vec![("lamp".to_string(), ItemState::Command(Command::Off))]
        );
    }
}
