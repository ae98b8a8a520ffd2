//! DSR tracking export import
//!
//! Finds the newest `tracking_data_YYYY-MM-DD.csv` in the configured
//! directory and replaces the `circuits` table with its rows. Every row with
//! a site name and a status is stored whatever its status; consumers filter
//! on `Enabled`.
//!
//! Header matching ignores case and treats spaces and underscores alike, so
//! `Site Name`, `site_name` and `SITE NAME` all select the same column.

use crate::db::circuits::replace_all_circuits;
use crate::error::{EnrichError, EnrichResult};
use chrono::NaiveDate;
use dsrc_common::config::DsrConfig;
use dsrc_common::db::{CircuitPurpose, CircuitRecord, CircuitStatus, CSV_IMPORT_SOURCE};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};

const COL_SITE_NAME: &str = "site name";
const COL_SITE_ID: &str = "site id";
const COL_PURPOSE: &str = "circuit purpose";
const COL_PROVIDER: &str = "provider name";
const COL_SPEED: &str = "details ordered service speed";
const COL_COST: &str = "billing monthly cost";
const COL_STATUS: &str = "status";
const COL_DATA_SOURCE: &str = "data source";
const COL_IP_START: &str = "ip address start";

/// Rows parsed from one export
#[derive(Debug, Clone, Default)]
pub struct ParsedExport {
    pub records: Vec<CircuitRecord>,
    /// Rows dropped for a missing site name or status, or unreadable
    pub skipped: usize,
}

/// Outcome of an import
#[derive(Debug, Clone)]
pub struct ImportReport {
    pub source_file: PathBuf,
    pub rows_stored: usize,
    pub rows_skipped: usize,
    pub enabled: usize,
}

/// Newest dated export in `dir`. Files whose name does not carry a valid
/// date after `prefix` are ignored.
pub fn find_latest_export(dir: &Path, prefix: &str) -> EnrichResult<PathBuf> {
    if !dir.is_dir() {
        return Err(EnrichError::Common(dsrc_common::Error::NotFound(format!(
            "DSR export directory {}",
            dir.display()
        ))));
    }

    let mut newest: Option<(NaiveDate, PathBuf)> = None;
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let Some(date) = export_date(&path, prefix) else {
            continue;
        };
        if newest.as_ref().map_or(true, |(best, _)| date > *best) {
            newest = Some((date, path));
        }
    }

    newest.map(|(_, path)| path).ok_or_else(|| {
        EnrichError::Common(dsrc_common::Error::NotFound(format!(
            "no {}YYYY-MM-DD.csv export in {}",
            prefix,
            dir.display()
        )))
    })
}

fn export_date(path: &Path, prefix: &str) -> Option<NaiveDate> {
    if !path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("csv")) {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    let date = stem.strip_prefix(prefix)?;
    NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()
}

/// Canonical form of a header cell
fn normalize_header(header: &str) -> String {
    header
        .trim()
        .to_lowercase()
        .replace('_', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parse an export. Fails only when the header lacks the site name or status
/// column; bad rows are skipped with a warning.
pub fn parse_export<R: Read>(reader: R) -> EnrichResult<ParsedExport> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let columns: HashMap<String, usize> = csv_reader
        .headers()?
        .iter()
        .enumerate()
        .map(|(i, h)| (normalize_header(h), i))
        .collect();

    for required in [COL_SITE_NAME, COL_STATUS] {
        if !columns.contains_key(required) {
            return Err(EnrichError::InvalidInput(format!(
                "DSR export has no '{}' column",
                required
            )));
        }
    }

    let mut parsed = ParsedExport::default();
    for (index, row) in csv_reader.records().enumerate() {
        // Header is line 1
        let line = index + 2;
        let row = match row {
            Ok(row) => row,
            Err(e) => {
                tracing::warn!(line, error = %e, "Unreadable DSR row skipped");
                parsed.skipped += 1;
                continue;
            }
        };

        let field = |name: &str| column_value(&row, &columns, name);

        let site_name = field(COL_SITE_NAME);
        let status = field(COL_STATUS);
        if site_name.is_empty() || status.is_empty() {
            tracing::warn!(line, site = site_name, "DSR row missing site name or status, skipped");
            parsed.skipped += 1;
            continue;
        }

        let data_source = match field(COL_DATA_SOURCE) {
            "" => CSV_IMPORT_SOURCE.to_string(),
            other => other.to_string(),
        };
        let ip_address_start = Some(field(COL_IP_START))
            .filter(|ip| !ip.is_empty())
            .map(str::to_string);

        parsed.records.push(CircuitRecord {
            site_name: site_name.to_string(),
            site_id: field(COL_SITE_ID).to_string(),
            purpose: CircuitPurpose::from(field(COL_PURPOSE)),
            provider_name: field(COL_PROVIDER).to_string(),
            speed: field(COL_SPEED).to_string(),
            monthly_cost: parse_cost(field(COL_COST)),
            status: CircuitStatus::from(status),
            data_source,
            ip_address_start,
        });
    }

    Ok(parsed)
}

fn column_value<'r>(row: &'r csv::StringRecord, columns: &HashMap<String, usize>, name: &str) -> &'r str {
    columns.get(name).and_then(|&i| row.get(i)).unwrap_or("")
}

/// `$1,234.50` → 1234.5; blank or unparseable → None
fn parse_cost(text: &str) -> Option<f64> {
    let cleaned: String = text
        .chars()
        .filter(|c| !matches!(c, '$' | ',') && !c.is_whitespace())
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    match cleaned.parse::<f64>() {
        Ok(value) if value.is_finite() => Some(value),
        _ => {
            tracing::debug!(value = text, "Unparseable monthly cost ignored");
            None
        }
    }
}

/// Imports DSR exports into `circuits`
pub struct DsrImporter {
    db: SqlitePool,
    config: DsrConfig,
}

impl DsrImporter {
    pub fn new(db: SqlitePool, config: DsrConfig) -> Self {
        Self { db, config }
    }

    /// Import the newest export in the configured directory
    pub async fn import_latest(&self) -> EnrichResult<ImportReport> {
        let path = find_latest_export(&self.config.csv_dir, &self.config.file_prefix)?;
        self.import_file(&path).await
    }

    /// Import one export, replacing every stored circuit
    pub async fn import_file(&self, path: &Path) -> EnrichResult<ImportReport> {
        tracing::info!(file = %path.display(), "Importing DSR export");

        let file = std::fs::File::open(path)?;
        let parsed = parse_export(file)?;

        let source_file = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let rows_stored = replace_all_circuits(&self.db, &parsed.records, &source_file).await?;
        let enabled = parsed.records.iter().filter(|r| r.is_enabled()).count();

        tracing::info!(
            file = %source_file,
            rows_stored,
            rows_skipped = parsed.skipped,
            enabled,
            "DSR import complete"
        );

        Ok(ImportReport {
            source_file: path.to_path_buf(),
            rows_stored,
            rows_skipped: parsed.skipped,
            enabled,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_normalization() {
        assert_eq!(normalize_header(" Site Name "), "site name");
        assert_eq!(normalize_header("site_name"), "site name");
        assert_eq!(normalize_header("details_ordered_service_speed"), COL_SPEED);
        assert_eq!(normalize_header("Billing  Monthly_Cost"), COL_COST);
    }

    #[test]
    fn test_parse_cost() {
        assert_eq!(parse_cost("$1,234.50"), Some(1234.5));
        assert_eq!(parse_cost("400"), Some(400.0));
        assert_eq!(parse_cost(""), None);
        assert_eq!(parse_cost("TBD"), None);
    }

    #[test]
    fn test_parse_export_mixed_header_styles() {
        let csv = "\
Site Name,Site ID,Circuit Purpose,provider_name,details_ordered_service_speed,billing_monthly_cost,status,ip_address_start
CAL 24,24,Primary,Frontier Fios,500.0M x 500.0M,$400.00,Enabled,47.1.1.1
CAL 24,24,Secondary,Cell,,,Ready for Enablement,
,25,Primary,Cox,,,Enabled,
CAL 26,26,Primary,Cox,,,,
";
        let parsed = parse_export(csv.as_bytes()).unwrap();
        assert_eq!(parsed.records.len(), 2);
        assert_eq!(parsed.skipped, 2);

        let primary = &parsed.records[0];
        assert_eq!(primary.purpose, CircuitPurpose::Primary);
        assert_eq!(primary.monthly_cost, Some(400.0));
        assert_eq!(primary.data_source, CSV_IMPORT_SOURCE);
        assert_eq!(primary.ip_address_start.as_deref(), Some("47.1.1.1"));

        let secondary = &parsed.records[1];
        assert_eq!(secondary.status, CircuitStatus::ReadyForEnablement);
        assert_eq!(secondary.monthly_cost, None);
        assert_eq!(secondary.ip_address_start, None);
    }

    #[test]
    fn test_parse_export_requires_core_columns() {
        let csv = "Site Name,provider_name\nCAL 24,Cox\n";
        assert!(matches!(parse_export(csv.as_bytes()), Err(EnrichError::InvalidInput(_))));
    }

    #[test]
    fn test_non_dsr_data_source_kept() {
        let csv = "site_name,status,data_source,provider_name\nCAL 24,Enabled,Non-DSR,Starlink\n";
        let parsed = parse_export(csv.as_bytes()).unwrap();
        assert!(!parsed.records[0].is_dsr_authoritative());
    }

    #[test]
    fn test_export_date_requires_prefix_and_date() {
        let prefix = "tracking_data_";
        assert!(export_date(Path::new("/x/tracking_data_2025-07-01.csv"), prefix).is_some());
        assert!(export_date(Path::new("/x/tracking_data_latest.csv"), prefix).is_none());
        assert!(export_date(Path::new("/x/tracking_data_2025-07-01.txt"), prefix).is_none());
        assert!(export_date(Path::new("/x/other_2025-07-01.csv"), prefix).is_none());
    }
}
