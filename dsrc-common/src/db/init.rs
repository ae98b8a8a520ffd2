//! Database initialization
//!
//! Opens (creating if needed) the SQLite database and creates every table the
//! enrichment tooling uses. All statements are idempotent.

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    // Applied to every pooled connection. WAL lets readers run during a job.
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_millis(5000))
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    create_schema(&pool).await?;

    Ok(pool)
}

/// Open a private in-memory database with the full schema (tests, dry runs)
pub async fn init_memory_database() -> Result<SqlitePool> {
    // One connection: every connection to :memory: is a separate database
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    create_schema(&pool).await?;
    Ok(pool)
}

/// Create every table
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_circuits_table(pool).await?;
    create_meraki_inventory_table(pool).await?;
    create_rdap_cache_table(pool).await?;
    create_manual_overrides_table(pool).await?;
    create_enriched_circuits_table(pool).await?;
    create_change_tracking_table(pool).await?;
    create_enrichment_runs_table(pool).await?;
    Ok(())
}

/// DSR tracking rows, replaced wholesale by each CSV import
pub async fn create_circuits_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS circuits (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            site_name TEXT NOT NULL,
            site_id TEXT NOT NULL DEFAULT '',
            circuit_purpose TEXT NOT NULL DEFAULT '',
            provider_name TEXT NOT NULL DEFAULT '',
            details_ordered_service_speed TEXT NOT NULL DEFAULT '',
            billing_monthly_cost REAL,
            status TEXT NOT NULL,
            data_source TEXT NOT NULL DEFAULT 'csv_import',
            ip_address_start TEXT,
            source_file TEXT NOT NULL DEFAULT '',
            imported_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_circuits_site_status ON circuits(site_name, status)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Appliance inventory, replaced wholesale by each vendor sync
pub async fn create_meraki_inventory_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS meraki_inventory (
            device_serial TEXT PRIMARY KEY,
            network_name TEXT NOT NULL,
            device_model TEXT NOT NULL DEFAULT '',
            device_notes TEXT NOT NULL DEFAULT '',
            wan1_ip TEXT,
            wan2_ip TEXT,
            device_tags TEXT NOT NULL DEFAULT '[]',
            synced_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_meraki_inventory_network ON meraki_inventory(network_name)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Successful RDAP lookups only
pub async fn create_rdap_cache_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS rdap_cache (
            ip_address TEXT PRIMARY KEY,
            provider_name TEXT NOT NULL,
            rdap_response TEXT,
            last_queried TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn create_manual_overrides_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS manual_overrides (
            network_name TEXT NOT NULL,
            wan_slot TEXT NOT NULL CHECK (wan_slot IN ('wan1', 'wan2')),
            provider TEXT NOT NULL,
            speed TEXT,
            monthly_cost REAL,
            manual_override_by TEXT NOT NULL,
            reason TEXT,
            created_at TEXT NOT NULL,
            PRIMARY KEY (network_name, wan_slot)
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn create_enriched_circuits_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS enriched_circuits (
            network_name TEXT PRIMARY KEY,
            wan1_provider TEXT NOT NULL DEFAULT '',
            wan1_speed TEXT NOT NULL DEFAULT '',
            wan1_monthly_cost REAL,
            wan1_ip TEXT,
            wan1_arin_org TEXT,
            wan1_dsr_verified INTEGER NOT NULL DEFAULT 0,
            wan1_confidence REAL NOT NULL DEFAULT 0.0,
            wan1_source TEXT NOT NULL DEFAULT 'none',
            wan1_circuit_role TEXT NOT NULL DEFAULT 'Primary',
            wan1_override_by TEXT,
            wan2_provider TEXT NOT NULL DEFAULT '',
            wan2_speed TEXT NOT NULL DEFAULT '',
            wan2_monthly_cost REAL,
            wan2_ip TEXT,
            wan2_arin_org TEXT,
            wan2_dsr_verified INTEGER NOT NULL DEFAULT 0,
            wan2_confidence REAL NOT NULL DEFAULT 0.0,
            wan2_source TEXT NOT NULL DEFAULT 'none',
            wan2_circuit_role TEXT NOT NULL DEFAULT 'Secondary',
            wan2_override_by TEXT,
            manual_override INTEGER NOT NULL DEFAULT 0,
            needs_review INTEGER NOT NULL DEFAULT 0,
            review_notes TEXT NOT NULL DEFAULT '[]',
            last_updated TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn create_change_tracking_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS enrichment_change_tracking (
            network_name TEXT PRIMARY KEY,
            content_hash TEXT NOT NULL,
            dsr_circuits_hash TEXT NOT NULL,
            overrides_hash TEXT NOT NULL,
            last_enrichment_run TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn create_enrichment_runs_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS enrichment_runs (
            run_id TEXT PRIMARY KEY,
            started_at TEXT NOT NULL,
            finished_at TEXT,
            status TEXT NOT NULL,
            summary TEXT NOT NULL DEFAULT '{}'
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_database_has_all_tables() {
        let pool = init_memory_database().await.unwrap();

        let tables: Vec<(String,)> =
            sqlx::query_as("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
                .fetch_all(&pool)
                .await
                .unwrap();
        let names: Vec<&str> = tables.iter().map(|(n,)| n.as_str()).collect();

        for expected in [
            "circuits",
            "enriched_circuits",
            "enrichment_change_tracking",
            "enrichment_runs",
            "manual_overrides",
            "meraki_inventory",
            "rdap_cache",
        ] {
            assert!(names.contains(&expected), "missing table {}", expected);
        }
    }

    #[tokio::test]
    async fn test_schema_creation_is_idempotent() {
        let pool = init_memory_database().await.unwrap();
        assert!(create_schema(&pool).await.is_ok());
    }

    #[tokio::test]
    async fn test_file_database_created_and_reopened() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("nested").join("dsrc.db");

        let pool = init_database(&db_path).await.unwrap();
        assert!(db_path.exists());
        pool.close().await;

        let reopened = init_database(&db_path).await;
        assert!(reopened.is_ok(), "reopen failed: {:?}", reopened.err());
    }
}
