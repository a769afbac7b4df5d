//! Database migration system for Parley Server
//!
//! Migrations are embedded SQL applied in version order. Applied versions
//! are recorded in a `_migrations` table so each runs once.

use super::{Database, DatabaseError};
use tracing::{debug, info, instrument};

/// A single database migration
#[derive(Debug, Clone, Copy)]
struct Migration {
    /// Version number, strictly increasing through [`MIGRATIONS`]
    version: i64,
    description: &'static str,
    sql: &'static str,
}

/// Initial schema - registered clients, chats and stored messages
const V0001_INITIAL_SCHEMA: &str = r#"
-- Registered clients; token and salt are issued at registration
CREATE TABLE IF NOT EXISTS clients (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    username TEXT NOT NULL UNIQUE,
    token TEXT NOT NULL UNIQUE,
    salt TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Chats, created by the first message sent to them
CREATE TABLE IF NOT EXISTS chats (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    client_id INTEGER NOT NULL,             -- Client that opened the chat
    chat_id TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Every accepted message; delivered only moves from 0 to 1
CREATE TABLE IF NOT EXISTS messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    chat_id TEXT NOT NULL,
    client_id INTEGER NOT NULL,
    text TEXT NOT NULL,
    timestamp_ms INTEGER NOT NULL,
    hash TEXT NOT NULL,
    delivered INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_messages_delivered ON messages(delivered, id);
CREATE INDEX IF NOT EXISTS idx_messages_chat_id ON messages(chat_id);
"#;

/// All migrations, in order
const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    description: "Initial schema",
    sql: V0001_INITIAL_SCHEMA,
}];

/// Runs pending migrations against a database
pub struct MigrationRunner {
    migrations: &'static [Migration],
}

impl MigrationRunner {
    /// Runner for the Parley schema
    pub fn parley() -> Self {
        Self {
            migrations: MIGRATIONS,
        }
    }

    /// Run all pending migrations, returning the versions applied
    #[instrument(skip_all, fields(db_name = %db.name()))]
    pub async fn run(&self, db: &Database) -> Result<Vec<i64>, DatabaseError> {
        let conn = db.connection().await?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS _migrations (
                version INTEGER PRIMARY KEY,
                description TEXT NOT NULL,
                applied_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
            "#,
            (),
        )
        .await
        .map_err(|e| DatabaseError::MigrationFailed(format!("Failed to create migrations table: {}", e)))?;

        let mut applied: Vec<i64> = Vec::new();
        let mut rows = conn
            .query("SELECT version FROM _migrations ORDER BY version", ())
            .await
            .map_err(|e| DatabaseError::MigrationFailed(format!("Failed to query migrations: {}", e)))?;

        while let Some(row) = rows.next().await.map_err(|e| {
            DatabaseError::MigrationFailed(format!("Failed to read migration row: {}", e))
        })? {
            let version: i64 = row.get(0).map_err(|e| {
                DatabaseError::MigrationFailed(format!("Failed to get version from row: {}", e))
            })?;
            applied.push(version);
        }

        debug!("Already applied migrations: {:?}", applied);

        let mut newly_applied = Vec::new();
        for migration in self.migrations {
            if applied.contains(&migration.version) {
                debug!("Skipping already applied migration v{}", migration.version);
                continue;
            }

            info!(
                "Applying migration v{}: {}",
                migration.version, migration.description
            );

            conn.execute_batch(migration.sql).await.map_err(|e| {
                DatabaseError::MigrationFailed(format!(
                    "Migration v{} failed: {}",
                    migration.version, e
                ))
            })?;

            conn.execute(
                "INSERT INTO _migrations (version, description) VALUES (?, ?)",
                libsql::params![migration.version, migration.description],
            )
            .await
            .map_err(|e| {
                DatabaseError::MigrationFailed(format!(
                    "Failed to record migration v{}: {}",
                    migration.version, e
                ))
            })?;

            newly_applied.push(migration.version);
        }

        if newly_applied.is_empty() {
            debug!("No new migrations to apply");
        } else {
            info!("Applied {} new migrations", newly_applied.len());
        }

        Ok(newly_applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn table_exists(db: &Database, table: &str) -> bool {
        let conn = db.connection().await.unwrap();
        let mut rows = conn
            .query(
                "SELECT name FROM sqlite_master WHERE type='table' AND name = ?",
                libsql::params![table],
            )
            .await
            .unwrap();
        rows.next().await.unwrap().is_some()
    }

    #[tokio::test]
    async fn test_migrations_create_schema() {
        let db = Database::in_memory("test").await.unwrap();
        let applied = MigrationRunner::parley().run(&db).await.unwrap();

        assert_eq!(applied, vec![1]);
        for table in ["clients", "chats", "messages", "_migrations"] {
            assert!(table_exists(&db, table).await, "missing table {table}");
        }
    }

    #[tokio::test]
    async fn test_migrations_run_once() {
        let db = Database::in_memory("test").await.unwrap();
        let runner = MigrationRunner::parley();

        runner.run(&db).await.unwrap();
        let second = runner.run(&db).await.unwrap();

        assert!(second.is_empty());
    }

    #[test]
    fn test_versions_strictly_increase() {
        assert!(MIGRATIONS.windows(2).all(|w| w[0].version < w[1].version));
        assert_eq!(MIGRATIONS[0].version, 1);
    }
}
