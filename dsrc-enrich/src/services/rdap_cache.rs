//! Persistent RDAP cache
//!
//! Maps IP → organization name in `rdap_cache`. Only successful lookups are
//! ever written, so failures are retried on every run. Rows written by older
//! tooling may still carry failure sentinels; those never count as hits and
//! `purge_invalid` removes them.

use crate::error::EnrichResult;
use crate::services::rdap_resolver::LookupOutcome;
use dsrc_common::db::RdapCacheEntry;
use sqlx::SqlitePool;

/// Organization names that mark a failed lookup rather than an answer
pub const FAILURE_SENTINELS: &[&str] = &["unknown", "failed lookup", "no name found"];

/// True for a non-empty, non-sentinel organization name
pub fn is_valid_org_name(name: &str) -> bool {
    let trimmed = name.trim();
    !trimmed.is_empty()
        && !FAILURE_SENTINELS
            .iter()
            .any(|s| trimmed.eq_ignore_ascii_case(s))
}

#[derive(Clone)]
pub struct RdapCache {
    pool: SqlitePool,
}

impl RdapCache {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Cached organization name, if a valid one exists
    pub async fn lookup(&self, ip: &str) -> EnrichResult<Option<String>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT provider_name FROM rdap_cache WHERE ip_address = ?")
                .bind(ip.trim())
                .fetch_optional(&self.pool)
                .await?;

        Ok(row
            .map(|(name,)| name)
            .filter(|name| is_valid_org_name(name))
            .map(|name| name.trim().to_string()))
    }

    /// Full cache row, valid or not
    pub async fn entry(&self, ip: &str) -> EnrichResult<Option<RdapCacheEntry>> {
        let row: Option<(String, String, Option<String>, String)> = sqlx::query_as(
            "SELECT ip_address, provider_name, rdap_response, last_queried FROM rdap_cache WHERE ip_address = ?",
        )
        .bind(ip.trim())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(ip_address, provider_name, rdap_response, last_queried)| RdapCacheEntry {
            ip_address,
            provider_name,
            rdap_response,
            last_queried,
        }))
    }

    /// Persist a lookup outcome. Returns whether anything was written:
    /// failures and sentinel names are dropped.
    pub async fn store(&self, ip: &str, outcome: &LookupOutcome) -> EnrichResult<bool> {
        let resolution = match outcome {
            Ok(resolution) if is_valid_org_name(&resolution.org_name) => resolution,
            Ok(resolution) => {
                tracing::debug!(ip, organization = %resolution.org_name, "Not caching sentinel organization name");
                return Ok(false);
            }
            Err(failure) => {
                tracing::debug!(ip, outcome = failure.kind(), "Not caching failed lookup");
                return Ok(false);
            }
        };

        sqlx::query(
            r#"
            INSERT INTO rdap_cache (ip_address, provider_name, rdap_response, last_queried)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(ip_address) DO UPDATE SET
                provider_name = excluded.provider_name,
                rdap_response = excluded.rdap_response,
                last_queried = excluded.last_queried
            "#,
        )
        .bind(ip.trim())
        .bind(resolution.org_name.trim())
        .bind(&resolution.raw_response)
        .bind(dsrc_common::time::now_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(true)
    }

    /// Delete rows whose name is empty or a failure sentinel
    pub async fn purge_invalid(&self) -> EnrichResult<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM rdap_cache
            WHERE TRIM(provider_name) = ''
               OR LOWER(TRIM(provider_name)) IN ('unknown', 'failed lookup', 'no name found')
            "#,
        )
        .execute(&self.pool)
        .await?;

        let purged = result.rows_affected();
        if purged > 0 {
            tracing::info!(purged, "Purged invalid RDAP cache entries");
        }
        Ok(purged)
    }

    /// Number of rows, valid or not
    pub async fn len(&self) -> EnrichResult<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM rdap_cache")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn is_empty(&self) -> EnrichResult<bool> {
        Ok(self.len().await? == 0)
    }
}
