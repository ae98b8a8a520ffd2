//! Change tracking for incremental enrichment
//!
//! Stores per-site SHA-256 fingerprints in `enrichment_change_tracking`. A
//! site is reprocessed only when its fingerprint differs from the one stored
//! after its last successful run, or when it has none.
//!
//! **Fingerprint parts:**
//! - content: device notes, WAN1 IP, WAN2 IP
//! - DSR circuits: the site's enabled circuits, order-independent
//! - overrides: the site's manual overrides, order-independent

use crate::error::EnrichResult;
use dsrc_common::db::{CircuitRecord, DeviceRecord, ManualOverride, WanSlot};
use sha2::{Digest, Sha256};
use sqlx::{Pool, Sqlite};

const FIELD_SEPARATOR: u8 = 0x1f;
const RECORD_SEPARATOR: u8 = 0x1e;

/// Hashes describing one site's inputs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteFingerprint {
    pub content_hash: String,
    pub dsr_circuits_hash: String,
    pub overrides_hash: String,
}

impl SiteFingerprint {
    pub fn compute(
        device: Option<&DeviceRecord>,
        circuits: &[CircuitRecord],
        overrides: &[ManualOverride],
    ) -> Self {
        let content_hash = match device {
            Some(d) => digest([vec![
                d.notes.clone(),
                d.ip(WanSlot::Wan1).unwrap_or_default().to_string(),
                d.ip(WanSlot::Wan2).unwrap_or_default().to_string(),
            ]]),
            None => digest([vec![String::new(), String::new(), String::new()]]),
        };

        let mut circuit_rows: Vec<Vec<String>> = circuits
            .iter()
            .filter(|c| c.is_enabled())
            .map(|c| {
                vec![
                    c.purpose.as_str().to_string(),
                    c.provider_name.trim().to_string(),
                    c.speed.trim().to_string(),
                    c.monthly_cost.map(|v| format!("{:.2}", v)).unwrap_or_default(),
                    c.data_source.clone(),
                    c.ip_address_start.clone().unwrap_or_default(),
                ]
            })
            .collect();
        circuit_rows.sort();

        let mut override_rows: Vec<Vec<String>> = overrides
            .iter()
            .map(|o| {
                vec![
                    o.slot.as_str().to_string(),
                    o.provider.clone(),
                    o.speed.clone().unwrap_or_default(),
                    o.monthly_cost.map(|v| format!("{:.2}", v)).unwrap_or_default(),
                    o.override_by.clone(),
                ]
            })
            .collect();
        override_rows.sort();

        Self {
            content_hash,
            dsr_circuits_hash: digest(circuit_rows),
            overrides_hash: digest(override_rows),
        }
    }
}

fn digest<I>(rows: I) -> String
where
    I: IntoIterator<Item = Vec<String>>,
{
    let mut hasher = Sha256::new();
    for row in rows {
        for field in row {
            hasher.update(field.as_bytes());
            hasher.update([FIELD_SEPARATOR]);
        }
        hasher.update([RECORD_SEPARATOR]);
    }
    format!("{:x}", hasher.finalize())
}

/// Per-site baseline store
#[derive(Clone)]
pub struct ChangeTracker {
    db: Pool<Sqlite>,
}

impl ChangeTracker {
    pub fn new(db: Pool<Sqlite>) -> Self {
        Self { db }
    }

    /// True when the site has no baseline or any hash changed
    pub async fn needs_reprocessing(&self, network_name: &str, current: &SiteFingerprint) -> EnrichResult<bool> {
        let stored = self.baseline(network_name).await?;
        Ok(match stored {
            Some(stored) => stored != *current,
            None => true,
        })
    }

    /// Stored fingerprint of a site
    pub async fn baseline(&self, network_name: &str) -> EnrichResult<Option<SiteFingerprint>> {
        let row: Option<(String, String, String)> = sqlx::query_as(
            r#"
            SELECT content_hash, dsr_circuits_hash, overrides_hash
            FROM enrichment_change_tracking
            WHERE network_name = ?
            "#,
        )
        .bind(network_name)
        .fetch_optional(&self.db)
        .await?;

        Ok(row.map(|(content_hash, dsr_circuits_hash, overrides_hash)| SiteFingerprint {
            content_hash,
            dsr_circuits_hash,
            overrides_hash,
        }))
    }

    /// Record a site's fingerprint after a successful run
    pub async fn record(&self, network_name: &str, fingerprint: &SiteFingerprint) -> EnrichResult<()> {
        let mut tx = self.db.begin().await?;
        Self::record_in(&mut tx, network_name, fingerprint).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Same as `record`, inside a caller's transaction
    pub async fn record_in(
        tx: &mut sqlx::Transaction<'_, Sqlite>,
        network_name: &str,
        fingerprint: &SiteFingerprint,
    ) -> EnrichResult<()> {
        sqlx::query(
            r#"
            INSERT INTO enrichment_change_tracking
                (network_name, content_hash, dsr_circuits_hash, overrides_hash, last_enrichment_run)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(network_name) DO UPDATE SET
                content_hash = excluded.content_hash,
                dsr_circuits_hash = excluded.dsr_circuits_hash,
                overrides_hash = excluded.overrides_hash,
                last_enrichment_run = excluded.last_enrichment_run
            "#,
        )
        .bind(network_name)
        .bind(&fingerprint.content_hash)
        .bind(&fingerprint.dsr_circuits_hash)
        .bind(&fingerprint.overrides_hash)
        .bind(dsrc_common::time::now_rfc3339())
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Seed or reset the baseline of every given site without reconciling.
    /// Sites not in the list keep whatever baseline they had.
    pub async fn establish_baseline<I>(&self, sites: I) -> EnrichResult<usize>
    where
        I: IntoIterator<Item = (String, SiteFingerprint)>,
    {
        let mut tx = self.db.begin().await?;
        let mut count = 0;
        for (network_name, fingerprint) in sites {
            Self::record_in(&mut tx, &network_name, &fingerprint).await?;
            count += 1;
        }
        tx.commit().await?;

        tracing::info!(sites = count, "Change-tracking baseline established");
        Ok(count)
    }

    /// Drop a site's baseline so the next run reprocesses it
    pub async fn invalidate(&self, network_name: &str) -> EnrichResult<bool> {
        let result = sqlx::query("DELETE FROM enrichment_change_tracking WHERE network_name = ?")
            .bind(network_name)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn tracked_sites(&self) -> EnrichResult<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM enrichment_change_tracking")
            .fetch_one(&self.db)
            .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dsrc_common::db::{CircuitPurpose, CircuitStatus};

    fn device(notes: &str, wan1: &str) -> DeviceRecord {
        DeviceRecord {
            serial: "Q2KY-AAAA-0001".to_string(),
            network_name: "CAL 24".to_string(),
            model: "MX68".to_string(),
            notes: notes.to_string(),
            wan1_ip: Some(wan1.to_string()),
            wan2_ip: None,
            tags: vec![],
        }
    }

    fn circuit(provider: &str, purpose: &str) -> CircuitRecord {
        CircuitRecord {
            site_name: "CAL 24".to_string(),
            site_id: "24".to_string(),
            purpose: CircuitPurpose::from(purpose),
            provider_name: provider.to_string(),
            speed: String::new(),
            monthly_cost: Some(400.0),
            status: CircuitStatus::Enabled,
            data_source: "csv_import".to_string(),
            ip_address_start: None,
        }
    }

    async fn tracker() -> ChangeTracker {
        ChangeTracker::new(dsrc_common::db::init_memory_database().await.unwrap())
    }

    #[tokio::test]
    async fn test_true_then_false_after_record() {
        let tracker = tracker().await;
        let dev = device("WAN1 Frontier 500M x 500M", "47.1.1.1");
        let fp = SiteFingerprint::compute(Some(&dev), &[], &[]);

        assert!(tracker.needs_reprocessing("CAL 24", &fp).await.unwrap());
        tracker.record("CAL 24", &fp).await.unwrap();
        assert!(!tracker.needs_reprocessing("CAL 24", &fp).await.unwrap());
    }

    #[tokio::test]
    async fn test_any_part_change_triggers_reprocessing() {
        let tracker = tracker().await;
        let dev = device("WAN1 Frontier", "47.1.1.1");
        let circuits = vec![circuit("Frontier Fios", "Primary")];
        let fp = SiteFingerprint::compute(Some(&dev), &circuits, &[]);
        tracker.record("CAL 24", &fp).await.unwrap();

        let new_ip = device("WAN1 Frontier", "47.1.1.2");
        assert!(tracker
            .needs_reprocessing("CAL 24", &SiteFingerprint::compute(Some(&new_ip), &circuits, &[]))
            .await
            .unwrap());

        let new_circuits = vec![circuit("Frontier Fiber", "Primary")];
        assert!(tracker
            .needs_reprocessing("CAL 24", &SiteFingerprint::compute(Some(&dev), &new_circuits, &[]))
            .await
            .unwrap());
    }

    #[test]
    fn test_fingerprint_ignores_order_and_disabled_circuits() {
        let a = circuit("Frontier Fios", "Primary");
        let b = circuit("Cell", "Secondary");
        let mut disabled = circuit("Old Telco", "Primary");
        disabled.status = CircuitStatus::Other("Disconnected".to_string());

        let fp1 = SiteFingerprint::compute(None, &[a.clone(), b.clone()], &[]);
        let fp2 = SiteFingerprint::compute(None, &[b, disabled, a], &[]);
        assert_eq!(fp1, fp2);
    }

    #[test]
    fn test_field_boundaries_matter() {
        let d1 = device("ab", "1.1.1.1");
        let mut d2 = device("a", "1.1.1.1");
        d2.notes = "a".to_string();
        d2.wan1_ip = Some("b1.1.1.1".to_string());
        assert_ne!(
            SiteFingerprint::compute(Some(&d1), &[], &[]).content_hash,
            SiteFingerprint::compute(Some(&d2), &[], &[]).content_hash
        );
    }

    #[tokio::test]
    async fn test_baseline_and_invalidate() {
        let tracker = tracker().await;
        let fp = SiteFingerprint::compute(None, &[], &[]);

        let count = tracker
            .establish_baseline(vec![("A".to_string(), fp.clone()), ("B".to_string(), fp.clone())])
            .await
            .unwrap();
        assert_eq!(count, 2);
        assert_eq!(tracker.tracked_sites().await.unwrap(), 2);
        assert!(!tracker.needs_reprocessing("A", &fp).await.unwrap());

        assert!(tracker.invalidate("A").await.unwrap());
        assert!(!tracker.invalidate("A").await.unwrap());
        assert!(tracker.needs_reprocessing("A", &fp).await.unwrap());
        assert!(!tracker.needs_reprocessing("B", &fp).await.unwrap());
    }
}
