//! Manual overrides (`manual_overrides`)
//!
//! Overrides are written only by explicit operator commands and always beat
//! automated reconciliation for their site/slot.

use crate::error::{EnrichError, EnrichResult};
use dsrc_common::db::{ManualOverride, WanSlot};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;

/// Insert or replace the override for a site/slot
pub async fn set_override(pool: &SqlitePool, manual: &ManualOverride) -> EnrichResult<()> {
    if manual.provider.trim().is_empty() {
        return Err(EnrichError::InvalidInput("override provider must not be empty".to_string()));
    }
    if manual.override_by.trim().is_empty() {
        return Err(EnrichError::InvalidInput("override author must not be empty".to_string()));
    }

    sqlx::query(
        r#"
        INSERT INTO manual_overrides (
            network_name, wan_slot, provider, speed, monthly_cost,
            manual_override_by, reason, created_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(network_name, wan_slot) DO UPDATE SET
            provider = excluded.provider,
            speed = excluded.speed,
            monthly_cost = excluded.monthly_cost,
            manual_override_by = excluded.manual_override_by,
            reason = excluded.reason,
            created_at = excluded.created_at
        "#,
    )
    .bind(manual.network_name.trim())
    .bind(manual.slot.as_str())
    .bind(manual.provider.trim())
    .bind(&manual.speed)
    .bind(manual.monthly_cost)
    .bind(manual.override_by.trim())
    .bind(&manual.reason)
    .bind(&manual.created_at)
    .execute(pool)
    .await?;

    tracing::info!(
        network = %manual.network_name,
        slot = %manual.slot,
        provider = %manual.provider,
        by = %manual.override_by,
        "Manual override set"
    );
    Ok(())
}

/// Remove the override for a site/slot; returns whether one existed
pub async fn clear_override(pool: &SqlitePool, network_name: &str, slot: WanSlot) -> EnrichResult<bool> {
    let result = sqlx::query("DELETE FROM manual_overrides WHERE network_name = ? AND wan_slot = ?")
        .bind(network_name.trim())
        .bind(slot.as_str())
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn load_overrides(pool: &SqlitePool) -> EnrichResult<Vec<ManualOverride>> {
    let rows = sqlx::query(
        r#"
        SELECT network_name, wan_slot, provider, speed, monthly_cost,
               manual_override_by, reason, created_at
        FROM manual_overrides
        ORDER BY network_name, wan_slot
        "#,
    )
    .fetch_all(pool)
    .await?;

    rows.iter().map(override_from_row).collect()
}

pub async fn load_overrides_by_site(pool: &SqlitePool) -> EnrichResult<HashMap<String, Vec<ManualOverride>>> {
    let mut by_site: HashMap<String, Vec<ManualOverride>> = HashMap::new();
    for manual in load_overrides(pool).await? {
        by_site.entry(manual.network_name.clone()).or_default().push(manual);
    }
    Ok(by_site)
}

fn override_from_row(row: &SqliteRow) -> EnrichResult<ManualOverride> {
    let slot: String = row.get("wan_slot");
    Ok(ManualOverride {
        network_name: row.get("network_name"),
        slot: slot.parse().map_err(EnrichError::InvalidInput)?,
        provider: row.get("provider"),
        speed: row.get("speed"),
        monthly_cost: row.get("monthly_cost"),
        override_by: row.get("manual_override_by"),
        reason: row.get("reason"),
        created_at: row.get("created_at"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manual(site: &str, slot: WanSlot, provider: &str) -> ManualOverride {
        ManualOverride {
            network_name: site.to_string(),
            slot,
            provider: provider.to_string(),
            speed: None,
            monthly_cost: Some(80.0),
            override_by: "ops".to_string(),
            reason: Some("carrier swap".to_string()),
            created_at: "2025-03-01T12:00:00Z".to_string(),
        }
    }

    #[tokio::test]
    async fn test_set_replace_and_clear() {
        let pool = dsrc_common::db::init_memory_database().await.unwrap();

        set_override(&pool, &manual("CAL 24", WanSlot::Wan1, "Cox")).await.unwrap();
        set_override(&pool, &manual("CAL 24", WanSlot::Wan1, "Lumen")).await.unwrap();
        set_override(&pool, &manual("CAL 24", WanSlot::Wan2, "Starlink")).await.unwrap();

        let all = load_overrides(&pool).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].provider, "Lumen");
        assert_eq!(all[1].slot, WanSlot::Wan2);

        assert!(clear_override(&pool, "CAL 24", WanSlot::Wan1).await.unwrap());
        assert!(!clear_override(&pool, "CAL 24", WanSlot::Wan1).await.unwrap());
        assert_eq!(load_overrides_by_site(&pool).await.unwrap()["CAL 24"].len(), 1);
    }

    #[tokio::test]
    async fn test_blank_provider_rejected() {
        let pool = dsrc_common::db::init_memory_database().await.unwrap();
        let result = set_override(&pool, &manual("CAL 24", WanSlot::Wan1, "  ")).await;
        assert!(matches!(result, Err(EnrichError::InvalidInput(_))));
    }
}
