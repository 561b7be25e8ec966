use anyhow::{Context, Result};
use sqlx::{Executor, PgPool};
use tracing::info;

/// Migrations in application order. Each script is idempotent.
const MIGRATIONS: &[(&str, &str)] = &[
    ("001_events.sql", include_str!("sql/001_events.sql")),
    (
        "002_conversation_turns.sql",
        include_str!("sql/002_conversation_turns.sql"),
    ),
];

pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    for (name, sql) in MIGRATIONS {
        execute_migration(pool, name, sql).await?;
        info!("Applied migration: {}", name);
    }

    Ok(())
}

async fn execute_migration(pool: &PgPool, name: &str, sql: &str) -> Result<()> {
    pool.execute(sql)
        .await
        .with_context(|| format!("Migration {} failed", name))?;
    Ok(())
}
