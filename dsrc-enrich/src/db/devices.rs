//! Appliance inventory rows (`meraki_inventory`)

use crate::error::EnrichResult;
use dsrc_common::db::DeviceRecord;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

/// Replace the stored inventory with a fresh sync, atomically
pub async fn replace_inventory(pool: &SqlitePool, devices: &[DeviceRecord]) -> EnrichResult<usize> {
    let synced_at = dsrc_common::time::now_rfc3339();
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM meraki_inventory").execute(&mut *tx).await?;

    for device in devices {
        let tags = serde_json::to_string(&device.tags)?;
        sqlx::query(
            r#"
            INSERT INTO meraki_inventory (
                device_serial, network_name, device_model, device_notes,
                wan1_ip, wan2_ip, device_tags, synced_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(device_serial) DO UPDATE SET
                network_name = excluded.network_name,
                device_model = excluded.device_model,
                device_notes = excluded.device_notes,
                wan1_ip = excluded.wan1_ip,
                wan2_ip = excluded.wan2_ip,
                device_tags = excluded.device_tags,
                synced_at = excluded.synced_at
            "#,
        )
        .bind(&device.serial)
        .bind(&device.network_name)
        .bind(&device.model)
        .bind(&device.notes)
        .bind(&device.wan1_ip)
        .bind(&device.wan2_ip)
        .bind(tags)
        .bind(&synced_at)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(devices.len())
}

/// Every stored device, ordered by network then serial
pub async fn load_devices(pool: &SqlitePool) -> EnrichResult<Vec<DeviceRecord>> {
    let rows = sqlx::query(
        r#"
        SELECT device_serial, network_name, device_model, device_notes, wan1_ip, wan2_ip, device_tags
        FROM meraki_inventory
        ORDER BY network_name, device_serial
        "#,
    )
    .fetch_all(pool)
    .await?;

    rows.iter().map(device_from_row).collect()
}

/// Devices of one network
pub async fn load_network_devices(pool: &SqlitePool, network_name: &str) -> EnrichResult<Vec<DeviceRecord>> {
    let rows = sqlx::query(
        r#"
        SELECT device_serial, network_name, device_model, device_notes, wan1_ip, wan2_ip, device_tags
        FROM meraki_inventory
        WHERE network_name = ?
        ORDER BY device_serial
        "#,
    )
    .bind(network_name)
    .fetch_all(pool)
    .await?;

    rows.iter().map(device_from_row).collect()
}

/// The device that speaks for a network: the first (by serial) with any WAN
/// IP, else the first at all. Warm-spare pairs share one network.
pub fn primary_device(devices: &[DeviceRecord]) -> Option<&DeviceRecord> {
    devices
        .iter()
        .find(|d| d.wan1_ip.as_deref().is_some_and(|ip| !ip.trim().is_empty())
            || d.wan2_ip.as_deref().is_some_and(|ip| !ip.trim().is_empty()))
        .or_else(|| devices.first())
}

fn device_from_row(row: &SqliteRow) -> EnrichResult<DeviceRecord> {
    let tags_json: String = row.get("device_tags");
    Ok(DeviceRecord {
        serial: row.get("device_serial"),
        network_name: row.get("network_name"),
        model: row.get("device_model"),
        notes: row.get("device_notes"),
        wan1_ip: row.get("wan1_ip"),
        wan2_ip: row.get("wan2_ip"),
        tags: serde_json::from_str(&tags_json)?,
    })
}
