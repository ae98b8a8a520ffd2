//! Enriched per-site circuit view (`enriched_circuits`)

use crate::error::{EnrichError, EnrichResult};
use crate::services::change_tracker::{ChangeTracker, SiteFingerprint};
use dsrc_common::db::{EnrichedCircuitRecord, EnrichedSlot, StoredEnrichedCircuit, WanSlot};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool};

const SELECT_COLUMNS: &str = r#"
    SELECT network_name,
           wan1_provider, wan1_speed, wan1_monthly_cost, wan1_ip, wan1_arin_org,
           wan1_dsr_verified, wan1_confidence, wan1_source, wan1_circuit_role, wan1_override_by,
           wan2_provider, wan2_speed, wan2_monthly_cost, wan2_ip, wan2_arin_org,
           wan2_dsr_verified, wan2_confidence, wan2_source, wan2_circuit_role, wan2_override_by,
           needs_review, review_notes, last_updated
    FROM enriched_circuits
"#;

/// Upsert one site's record inside a caller's transaction
pub async fn save_enriched_in(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    record: &EnrichedCircuitRecord,
) -> EnrichResult<()> {
    let review_notes = serde_json::to_string(&record.review_notes)?;
    let (w1, w2) = (&record.wan1, &record.wan2);

    sqlx::query(
        r#"
        INSERT INTO enriched_circuits (
            network_name,
            wan1_provider, wan1_speed, wan1_monthly_cost, wan1_ip, wan1_arin_org,
            wan1_dsr_verified, wan1_confidence, wan1_source, wan1_circuit_role, wan1_override_by,
            wan2_provider, wan2_speed, wan2_monthly_cost, wan2_ip, wan2_arin_org,
            wan2_dsr_verified, wan2_confidence, wan2_source, wan2_circuit_role, wan2_override_by,
            manual_override, needs_review, review_notes, last_updated
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(network_name) DO UPDATE SET
            wan1_provider = excluded.wan1_provider,
            wan1_speed = excluded.wan1_speed,
            wan1_monthly_cost = excluded.wan1_monthly_cost,
            wan1_ip = excluded.wan1_ip,
            wan1_arin_org = excluded.wan1_arin_org,
            wan1_dsr_verified = excluded.wan1_dsr_verified,
            wan1_confidence = excluded.wan1_confidence,
            wan1_source = excluded.wan1_source,
            wan1_circuit_role = excluded.wan1_circuit_role,
            wan1_override_by = excluded.wan1_override_by,
            wan2_provider = excluded.wan2_provider,
            wan2_speed = excluded.wan2_speed,
            wan2_monthly_cost = excluded.wan2_monthly_cost,
            wan2_ip = excluded.wan2_ip,
            wan2_arin_org = excluded.wan2_arin_org,
            wan2_dsr_verified = excluded.wan2_dsr_verified,
            wan2_confidence = excluded.wan2_confidence,
            wan2_source = excluded.wan2_source,
            wan2_circuit_role = excluded.wan2_circuit_role,
            wan2_override_by = excluded.wan2_override_by,
            manual_override = excluded.manual_override,
            needs_review = excluded.needs_review,
            review_notes = excluded.review_notes,
            last_updated = excluded.last_updated
        "#,
    )
    .bind(&record.network_name)
    .bind(&w1.provider)
    .bind(&w1.speed)
    .bind(w1.monthly_cost)
    .bind(&w1.ip)
    .bind(&w1.arin_org)
    .bind(w1.dsr_verified)
    .bind(w1.confidence)
    .bind(w1.source.as_str())
    .bind(&w1.circuit_role)
    .bind(&w1.override_by)
    .bind(&w2.provider)
    .bind(&w2.speed)
    .bind(w2.monthly_cost)
    .bind(&w2.ip)
    .bind(&w2.arin_org)
    .bind(w2.dsr_verified)
    .bind(w2.confidence)
    .bind(w2.source.as_str())
    .bind(&w2.circuit_role)
    .bind(&w2.override_by)
    .bind(record.manual_override())
    .bind(record.needs_review)
    .bind(review_notes)
    .bind(dsrc_common::time::now_rfc3339())
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Write a site's record and its change-tracking baseline atomically.
/// Both slots land together or not at all.
pub async fn save_enriched_site(
    pool: &SqlitePool,
    record: &EnrichedCircuitRecord,
    fingerprint: &SiteFingerprint,
) -> EnrichResult<()> {
    let mut tx = pool.begin().await?;
    save_enriched_in(&mut tx, record).await?;
    ChangeTracker::record_in(&mut tx, &record.network_name, fingerprint).await?;
    tx.commit().await?;
    Ok(())
}

pub async fn load_enriched(pool: &SqlitePool, network_name: &str) -> EnrichResult<Option<StoredEnrichedCircuit>> {
    let sql = format!("{} WHERE network_name = ?", SELECT_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(network_name)
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(enriched_from_row).transpose()
}

/// Sites with an IP on either slot, by name
pub async fn list_live_circuits(pool: &SqlitePool) -> EnrichResult<Vec<StoredEnrichedCircuit>> {
    let sql = format!(
        "{} WHERE TRIM(COALESCE(wan1_ip, '')) != '' OR TRIM(COALESCE(wan2_ip, '')) != '' ORDER BY network_name",
        SELECT_COLUMNS
    );
    let rows = sqlx::query(&sql).fetch_all(pool).await?;
    rows.iter().map(enriched_from_row).collect()
}

pub async fn list_all_circuits(pool: &SqlitePool) -> EnrichResult<Vec<StoredEnrichedCircuit>> {
    let sql = format!("{} ORDER BY network_name", SELECT_COLUMNS);
    let rows = sqlx::query(&sql).fetch_all(pool).await?;
    rows.iter().map(enriched_from_row).collect()
}

fn enriched_from_row(row: &SqliteRow) -> EnrichResult<StoredEnrichedCircuit> {
    let review_notes: String = row.get("review_notes");
    Ok(StoredEnrichedCircuit {
        record: EnrichedCircuitRecord {
            network_name: row.get("network_name"),
            wan1: slot_from_row(row, WanSlot::Wan1)?,
            wan2: slot_from_row(row, WanSlot::Wan2)?,
            needs_review: row.get("needs_review"),
            review_notes: serde_json::from_str(&review_notes)?,
        },
        last_updated: row.get("last_updated"),
    })
}

fn slot_from_row(row: &SqliteRow, slot: WanSlot) -> EnrichResult<EnrichedSlot> {
    let col = |name: &str| format!("{}_{}", slot.as_str(), name);
    let source: String = row.get(col("source").as_str());

    Ok(EnrichedSlot {
        provider: row.get(col("provider").as_str()),
        speed: row.get(col("speed").as_str()),
        monthly_cost: row.get(col("monthly_cost").as_str()),
        ip: row.get(col("ip").as_str()),
        arin_org: row.get(col("arin_org").as_str()),
        dsr_verified: row.get(col("dsr_verified").as_str()),
        confidence: row.get(col("confidence").as_str()),
        source: source.parse().map_err(EnrichError::InvalidInput)?,
        circuit_role: row.get(col("circuit_role").as_str()),
        override_by: row.get(col("override_by").as_str()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use dsrc_common::db::ProviderSource;

    fn record(site: &str, wan1_ip: Option<&str>) -> EnrichedCircuitRecord {
        let mut wan1 = EnrichedSlot::empty(WanSlot::Wan1);
        wan1.provider = "Frontier Fios".to_string();
        wan1.speed = "500.0M x 500.0M".to_string();
        wan1.monthly_cost = Some(400.0);
        wan1.ip = wan1_ip.map(str::to_string);
        wan1.arin_org = Some("Frontier Communications".to_string());
        wan1.dsr_verified = true;
        wan1.confidence = 1.0;
        wan1.source = ProviderSource::Dsr;

        EnrichedCircuitRecord {
            network_name: site.to_string(),
            wan1,
            wan2: EnrichedSlot::empty(WanSlot::Wan2),
            needs_review: true,
            review_notes: vec!["wan2: no provider information".to_string()],
        }
    }

    #[tokio::test]
    async fn test_save_and_load_round_trip_with_baseline() {
        let pool = dsrc_common::db::init_memory_database().await.unwrap();
        let rec = record("CAL 24", Some("47.1.1.1"));
        let fp = SiteFingerprint::compute(None, &[], &[]);

        save_enriched_site(&pool, &rec, &fp).await.unwrap();

        let stored = load_enriched(&pool, "CAL 24").await.unwrap().unwrap();
        assert_eq!(stored.record, rec);
        assert!(!stored.last_updated.is_empty());

        let tracker = ChangeTracker::new(pool.clone());
        assert_eq!(tracker.baseline("CAL 24").await.unwrap(), Some(fp));
        assert!(load_enriched(&pool, "NOPE 1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_live_listing_excludes_sites_without_ips() {
        let pool = dsrc_common::db::init_memory_database().await.unwrap();
        let fp = SiteFingerprint::compute(None, &[], &[]);

        save_enriched_site(&pool, &record("B 2", Some("47.1.1.1")), &fp).await.unwrap();
        save_enriched_site(&pool, &record("A 1", None), &fp).await.unwrap();
        save_enriched_site(&pool, &record("C 3", Some(" ")), &fp).await.unwrap();

        let live = list_live_circuits(&pool).await.unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].record.network_name, "B 2");

        let all = list_all_circuits(&pool).await.unwrap();
        let names: Vec<&str> = all.iter().map(|c| c.record.network_name.as_str()).collect();
        assert_eq!(names, vec!["A 1", "B 2", "C 3"]);
    }

    #[tokio::test]
    async fn test_save_replaces_previous_record() {
        let pool = dsrc_common::db::init_memory_database().await.unwrap();
        let fp = SiteFingerprint::compute(None, &[], &[]);

        save_enriched_site(&pool, &record("CAL 24", Some("47.1.1.1")), &fp).await.unwrap();
        let mut updated = record("CAL 24", Some("47.1.1.1"));
        updated.wan1.provider = "Lumen".to_string();
        updated.wan1.override_by = Some("ops".to_string());
        updated.wan1.source = ProviderSource::ManualOverride;
        save_enriched_site(&pool, &updated, &fp).await.unwrap();

        let stored = load_enriched(&pool, "CAL 24").await.unwrap().unwrap();
        assert_eq!(stored.record.wan1.provider, "Lumen");
        assert!(stored.record.manual_override());
        assert_eq!(list_all_circuits(&pool).await.unwrap().len(), 1);
    }
}
