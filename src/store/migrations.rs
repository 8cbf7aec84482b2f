//! Version-tracked database migrations for the libSQL backend.
//!
//! Each migration has a version number and SQL. `run_migrations()` checks
//! the current version and applies only the new ones sequentially.

use libsql::Connection;

use crate::error::DatabaseError;

/// A single migration step.
struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// All migrations in order. Add new versions to the end.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "initial_schema",
        sql: r#"
            CREATE TABLE IF NOT EXISTS prospects (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                contact_email TEXT,
                phone TEXT,
                address TEXT,
                city TEXT,
                place_id TEXT,
                stage TEXT NOT NULL DEFAULT 'discovered',
                source TEXT NOT NULL,
                metadata TEXT NOT NULL DEFAULT '{}',
                discovered_at TEXT NOT NULL,
                last_activity_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_prospects_stage ON prospects(stage);
            CREATE INDEX IF NOT EXISTS idx_prospects_email ON prospects(contact_email);

            CREATE TABLE IF NOT EXISTS email_logs (
                id TEXT PRIMARY KEY,
                prospect_id TEXT NOT NULL REFERENCES prospects(id),
                template_id TEXT NOT NULL,
                sequence_step INTEGER NOT NULL,
                recipient TEXT NOT NULL,
                subject TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'queued',
                sent_at TEXT,
                opened_at TEXT,
                replied_at TEXT,
                message_id TEXT,
                thread_id TEXT,
                bounce_reason TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_email_logs_prospect ON email_logs(prospect_id);
            CREATE INDEX IF NOT EXISTS idx_email_logs_recipient ON email_logs(recipient);
            CREATE INDEX IF NOT EXISTS idx_email_logs_status ON email_logs(status);

            CREATE TABLE IF NOT EXISTS generated_sites (
                id TEXT PRIMARY KEY,
                prospect_id TEXT NOT NULL REFERENCES prospects(id),
                status TEXT NOT NULL DEFAULT 'generating',
                url TEXT,
                template_type TEXT NOT NULL,
                deployment_id TEXT,
                project_id TEXT,
                deployment_status TEXT,
                build_error TEXT,
                metadata TEXT NOT NULL DEFAULT '{}',
                published_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_sites_prospect ON generated_sites(prospect_id);
            CREATE INDEX IF NOT EXISTS idx_sites_status ON generated_sites(status);

            CREATE TABLE IF NOT EXISTS activity_events (
                id TEXT PRIMARY KEY,
                event_type TEXT NOT NULL,
                prospect_id TEXT,
                detail TEXT NOT NULL,
                status TEXT NOT NULL,
                triggered_by TEXT NOT NULL,
                metadata TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_activity_type ON activity_events(event_type);
            CREATE INDEX IF NOT EXISTS idx_activity_prospect ON activity_events(prospect_id);
            CREATE INDEX IF NOT EXISTS idx_activity_created ON activity_events(created_at);

            CREATE TABLE IF NOT EXISTS agent_ticks (
                id TEXT PRIMARY KEY,
                discovered INTEGER NOT NULL DEFAULT 0,
                emails_sent INTEGER NOT NULL DEFAULT 0,
                followups_sent INTEGER NOT NULL DEFAULT 0,
                input_tokens INTEGER NOT NULL DEFAULT 0,
                output_tokens INTEGER NOT NULL DEFAULT 0,
                cost TEXT NOT NULL DEFAULT '0',
                spend_tx TEXT,
                detail TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL
            );
        "#,
    },
    Migration {
        version: 2,
        name: "active_send_uniqueness",
        // One queued-or-sent log per prospect per sequence step. Closes the
        // select-then-send race between concurrent ticks: the losing insert
        // hits this index and the sequencer skips the prospect.
        sql: r#"
            CREATE UNIQUE INDEX IF NOT EXISTS idx_email_logs_active_step
                ON email_logs(prospect_id, sequence_step)
                WHERE status IN ('queued', 'sent', 'opened');
        "#,
    },
];

/// Run all pending migrations against the connection.
pub async fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL
        )",
        (),
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("create _migrations: {e}")))?;

    let current = current_version(conn).await?;

    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        conn.execute_batch(migration.sql)
            .await
            .map_err(|e| {
                DatabaseError::Migration(format!(
                    "migration v{} ({}): {e}",
                    migration.version, migration.name
                ))
            })?;

        conn.execute(
            "INSERT INTO _migrations (version, name, applied_at) VALUES (?1, ?2, datetime('now'))",
            libsql::params![migration.version, migration.name],
        )
        .await
        .map_err(|e| DatabaseError::Migration(format!("record v{}: {e}", migration.version)))?;

        tracing::info!(
            version = migration.version,
            name = migration.name,
            "Applied migration"
        );
    }

    Ok(())
}

async fn current_version(conn: &Connection) -> Result<i64, DatabaseError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(|e| DatabaseError::Migration(format!("read version: {e}")))?;

    match rows.next().await {
        Ok(Some(row)) => Ok(row.get::<i64>(0).unwrap_or(0)),
        Ok(None) => Ok(0),
        Err(e) => Err(DatabaseError::Migration(format!("read version: {e}"))),
    }
}
