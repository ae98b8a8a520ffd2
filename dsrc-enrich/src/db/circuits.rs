//! DSR circuit rows (`circuits`)

use crate::error::EnrichResult;
use dsrc_common::db::{CircuitPurpose, CircuitRecord, CircuitStatus};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;

/// Replace every circuit row with a fresh import, atomically
pub async fn replace_all_circuits(
    pool: &SqlitePool,
    records: &[CircuitRecord],
    source_file: &str,
) -> EnrichResult<usize> {
    let imported_at = dsrc_common::time::now_rfc3339();
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM circuits").execute(&mut *tx).await?;

    for record in records {
        sqlx::query(
            r#"
            INSERT INTO circuits (
                site_name, site_id, circuit_purpose, provider_name,
                details_ordered_service_speed, billing_monthly_cost, status,
                data_source, ip_address_start, source_file, imported_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.site_name)
        .bind(&record.site_id)
        .bind(record.purpose.as_str())
        .bind(&record.provider_name)
        .bind(&record.speed)
        .bind(record.monthly_cost)
        .bind(record.status.as_str())
        .bind(&record.data_source)
        .bind(&record.ip_address_start)
        .bind(source_file)
        .bind(&imported_at)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(records.len())
}

/// All circuits grouped by site name
pub async fn load_circuits_by_site(pool: &SqlitePool) -> EnrichResult<HashMap<String, Vec<CircuitRecord>>> {
    let rows = sqlx::query(
        r#"
        SELECT site_name, site_id, circuit_purpose, provider_name,
               details_ordered_service_speed, billing_monthly_cost, status,
               data_source, ip_address_start
        FROM circuits
        ORDER BY site_name, id
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut by_site: HashMap<String, Vec<CircuitRecord>> = HashMap::new();
    for row in rows {
        let record = circuit_from_row(&row);
        by_site.entry(record.site_name.clone()).or_default().push(record);
    }
    Ok(by_site)
}

/// Circuits of one site, any status
pub async fn load_site_circuits(pool: &SqlitePool, site_name: &str) -> EnrichResult<Vec<CircuitRecord>> {
    let rows = sqlx::query(
        r#"
        SELECT site_name, site_id, circuit_purpose, provider_name,
               details_ordered_service_speed, billing_monthly_cost, status,
               data_source, ip_address_start
        FROM circuits
        WHERE site_name = ?
        ORDER BY id
        "#,
    )
    .bind(site_name)
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(circuit_from_row).collect())
}

pub async fn count_circuits(pool: &SqlitePool) -> EnrichResult<i64> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM circuits")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

fn circuit_from_row(row: &SqliteRow) -> CircuitRecord {
    let purpose: String = row.get("circuit_purpose");
    let status: String = row.get("status");
    CircuitRecord {
        site_name: row.get("site_name"),
        site_id: row.get("site_id"),
        purpose: CircuitPurpose::from(purpose.as_str()),
        provider_name: row.get("provider_name"),
        speed: row.get("details_ordered_service_speed"),
        monthly_cost: row.get("billing_monthly_cost"),
        status: CircuitStatus::from(status.as_str()),
        data_source: row.get("data_source"),
        ip_address_start: row.get("ip_address_start"),
    }
}
