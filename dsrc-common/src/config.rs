//! Bootstrap configuration loading
//!
//! Configuration is a single TOML file. Every key has a built-in default so
//! the tooling runs with no file at all; a file only needs the keys it changes.
//!
//! # Config file resolution
//!
//! 1. Command-line argument (highest priority)
//! 2. `DSRC_CONFIG` environment variable
//! 3. `~/.config/dsrc/config.toml`
//! 4. `/etc/dsrc/config.toml`
//! 5. Built-in defaults (no file)
//!
//! After the file is loaded, `DSRC_DATABASE`, `DSRC_DSR_CSV_DIR` and
//! `MERAKI_API_KEY` override the matching keys.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const CONFIG_ENV_VAR: &str = "DSRC_CONFIG";
pub const DATABASE_ENV_VAR: &str = "DSRC_DATABASE";
pub const DSR_CSV_DIR_ENV_VAR: &str = "DSRC_DSR_CSV_DIR";
pub const MERAKI_API_KEY_ENV_VAR: &str = "MERAKI_API_KEY";

/// Bootstrap configuration loaded from TOML
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct TomlConfig {
    /// Path to the SQLite database (OS default when unset)
    pub database_path: Option<PathBuf>,
    pub logging: LoggingConfig,
    pub database: DatabaseConfig,
    pub dsr: DsrConfig,
    pub meraki: MerakiConfig,
    pub rdap: RdapConfig,
    pub matcher: MatcherConfig,
    pub reconcile: ReconcileConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error); `RUST_LOG` wins when set
    pub level: String,

    /// Log file path (logs to stderr if not specified)
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

/// SQLite tuning
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Upper bound on retrying a write that hit "database is locked"
    pub max_lock_wait_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            max_lock_wait_ms: 5000,
        }
    }
}

/// DSR tracking export location
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DsrConfig {
    /// Directory holding `tracking_data_YYYY-MM-DD.csv` exports
    pub csv_dir: PathBuf,
    /// File name prefix of the dated exports
    pub file_prefix: String,
}

impl Default for DsrConfig {
    fn default() -> Self {
        Self {
            csv_dir: default_data_dir().join("circuitinfo"),
            file_prefix: "tracking_data_".to_string(),
        }
    }
}

/// Meraki dashboard API access
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MerakiConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    /// Organization id; looked up by `org_name` when unset
    pub org_id: Option<String>,
    pub org_name: Option<String>,
    pub per_page: u32,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub requests_per_second: u32,
    /// Only devices whose model starts with this prefix are kept
    pub appliance_model_prefix: String,
}

impl Default for MerakiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.meraki.com/api/v1".to_string(),
            api_key: None,
            org_id: None,
            org_name: None,
            per_page: 1000,
            timeout_secs: 30,
            max_retries: 5,
            requests_per_second: 5,
            appliance_model_prefix: "MX".to_string(),
        }
    }
}

/// Static CIDR → organization assignment checked before any RDAP request
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct StaticRange {
    pub cidr: String,
    pub organization: String,
}

/// RDAP lookup settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RdapConfig {
    pub base_url: String,
    pub user_agent: String,
    pub timeout_secs: u64,
    pub requests_per_second: u32,
    pub max_concurrent: usize,
    /// Exact IP → organization assignments
    pub static_ips: BTreeMap<String, String>,
    pub static_ranges: Vec<StaticRange>,
}

impl Default for RdapConfig {
    fn default() -> Self {
        Self {
            base_url: "https://rdap.arin.net/registry".to_string(),
            user_agent: concat!("dsrc-enrich/", env!("CARGO_PKG_VERSION")).to_string(),
            timeout_secs: 15,
            requests_per_second: 5,
            max_concurrent: 4,
            static_ips: BTreeMap::new(),
            static_ranges: vec![StaticRange {
                cidr: "166.80.0.0/16".to_string(),
                organization: "Verizon Business".to_string(),
            }],
        }
    }
}

/// Kind of a carrier-class placeholder token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CarrierKind {
    Cellular,
    Satellite,
}

/// A token that marks a circuit as cellular or satellite
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CarrierClassConfig {
    /// Word sequence searched (case-insensitive) in provider and speed fields
    pub token: String,
    /// Display label used when the token is the only provider information
    pub label: String,
    pub kind: CarrierKind,
    /// Generic placeholder ("Cell") rather than a concrete carrier ("Starlink")
    #[serde(default = "default_true")]
    pub placeholder: bool,
}

fn default_true() -> bool {
    true
}

/// Provider matcher tables
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MatcherConfig {
    /// Fuzzy partial-ratio threshold (0-100)
    pub threshold: u8,
    /// Normalized alias → canonical name
    pub aliases: BTreeMap<String, String>,
    /// Trailing/embedded tokens dropped during normalization
    pub strip_tokens: Vec<String>,
    /// Carrier-class tokens, checked in order (longest first is advisable)
    pub carrier_classes: Vec<CarrierClassConfig>,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        let aliases = [
            ("ATT", "AT&T"),
            ("AT T", "AT&T"),
            ("SBC", "AT&T"),
            ("VZW", "VERIZON"),
            ("VZ", "VERIZON"),
            ("VZG", "VERIZON"),
            ("VERIZON WIRELESS", "VERIZON"),
            ("SPECTRUM", "CHARTER"),
            ("XFINITY", "COMCAST"),
            ("LUMEN", "CENTURYLINK"),
            ("QWEST", "CENTURYLINK"),
            ("CLINK", "CENTURYLINK"),
            ("EMBARQ", "CENTURYLINK"),
            ("ALTICE", "OPTIMUM"),
            ("LIGHTPATH", "OPTIMUM"),
            ("SUDDENLINK", "OPTIMUM"),
            ("SPARKLIGHT", "CABLE ONE"),
            ("CABLEONE", "CABLE ONE"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let strip_tokens = [
            "INC",
            "LLC",
            "CORP",
            "CORPORATION",
            "CO",
            "COMPANY",
            "LTD",
            "COMMUNICATIONS",
            "SERVICES",
            "BUSINESS",
            "ENTERPRISES",
            "DSR",
            "AGG",
        ]
        .into_iter()
        .map(str::to_string)
        .collect();

        let carrier_classes = vec![
            carrier("VZW Cell", "VZW Cell", CarrierKind::Cellular, false),
            carrier("Starlink", "Starlink", CarrierKind::Satellite, false),
            carrier("Satellite", "Satellite", CarrierKind::Satellite, true),
            carrier("Inseego", "Inseego", CarrierKind::Cellular, true),
            carrier("Digi", "Digi", CarrierKind::Cellular, true),
            carrier("Cell", "Cell", CarrierKind::Cellular, true),
        ];

        Self {
            threshold: 80,
            aliases,
            strip_tokens,
            carrier_classes,
        }
    }
}

fn carrier(token: &str, label: &str, kind: CarrierKind, placeholder: bool) -> CarrierClassConfig {
    CarrierClassConfig {
        token: token.to_string(),
        label: label.to_string(),
        kind,
        placeholder,
    }
}

/// Site filtering applied by the nightly job
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Networks whose lowercase name contains any of these are skipped
    pub excluded_name_patterns: Vec<String>,
    /// Networks carrying any of these device tags are skipped
    pub excluded_tags: Vec<String>,
    /// Networks whose lowercase device notes contain any of these are skipped
    pub excluded_notes_patterns: Vec<String>,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            excluded_name_patterns: [
                "hub",
                "lab",
                "voice",
                "datacenter",
                "test",
                "store in a box",
                "sib",
            ]
            .into_iter()
            .map(str::to_string)
            .collect(),
            excluded_tags: ["hub", "lab", "voice", "test"]
                .into_iter()
                .map(str::to_string)
                .collect(),
            excluded_notes_patterns: ["test store", "test site", "lab site", "hub site", "voice site"]
                .into_iter()
                .map(str::to_string)
                .collect(),
        }
    }
}

impl TomlConfig {
    /// Load and validate a config file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
        let config: TomlConfig = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve the config file, load it (or defaults) and apply env overrides
    pub fn resolve(cli_path: Option<&Path>) -> Result<Self> {
        let mut config = match resolve_config_path(cli_path)? {
            Some(path) => {
                info!("Loading configuration from {}", path.display());
                Self::load(&path)?
            }
            None => {
                debug!("No configuration file found, using built-in defaults");
                Self::default()
            }
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply `DSRC_DATABASE`, `DSRC_DSR_CSV_DIR` and `MERAKI_API_KEY`
    pub fn apply_env_overrides(&mut self) {
        if let Some(db) = non_empty_env(DATABASE_ENV_VAR) {
            self.database_path = Some(PathBuf::from(db));
        }
        if let Some(dir) = non_empty_env(DSR_CSV_DIR_ENV_VAR) {
            self.dsr.csv_dir = PathBuf::from(dir);
        }
        if let Some(key) = non_empty_env(MERAKI_API_KEY_ENV_VAR) {
            self.meraki.api_key = Some(key);
        }
    }

    /// Reject values that would stall or misconfigure a run
    pub fn validate(&self) -> Result<()> {
        if self.rdap.requests_per_second == 0 {
            return Err(Error::Config("rdap.requests_per_second must be > 0".to_string()));
        }
        if self.rdap.max_concurrent == 0 {
            return Err(Error::Config("rdap.max_concurrent must be > 0".to_string()));
        }
        if self.meraki.requests_per_second == 0 {
            return Err(Error::Config("meraki.requests_per_second must be > 0".to_string()));
        }
        if self.meraki.per_page == 0 {
            return Err(Error::Config("meraki.per_page must be > 0".to_string()));
        }
        if self.matcher.threshold > 100 {
            return Err(Error::Config(format!(
                "matcher.threshold must be within 0-100, got {}",
                self.matcher.threshold
            )));
        }
        for range in &self.rdap.static_ranges {
            if !range.cidr.contains('/') {
                return Err(Error::Config(format!(
                    "rdap.static_ranges entry '{}' is not CIDR notation",
                    range.cidr
                )));
            }
        }
        Ok(())
    }

    /// Effective database path
    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| default_data_dir().join("dsrc.db"))
    }
}

/// Find the config file following the documented priority order
pub fn resolve_config_path(cli_path: Option<&Path>) -> Result<Option<PathBuf>> {
    // Priority 1: Command-line argument (must exist)
    if let Some(path) = cli_path {
        if !path.exists() {
            return Err(Error::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }
        return Ok(Some(path.to_path_buf()));
    }

    // Priority 2: Environment variable (must exist)
    if let Some(path) = non_empty_env(CONFIG_ENV_VAR) {
        let path = PathBuf::from(path);
        if !path.exists() {
            return Err(Error::Config(format!(
                "{} points to missing file: {}",
                CONFIG_ENV_VAR,
                path.display()
            )));
        }
        return Ok(Some(path));
    }

    // Priority 3: user config directory
    if let Some(user_config) = dirs::config_dir().map(|d| d.join("dsrc").join("config.toml")) {
        if user_config.exists() {
            return Ok(Some(user_config));
        }
    }

    // Priority 4: system-wide config
    let system_config = PathBuf::from("/etc/dsrc/config.toml");
    if system_config.exists() {
        return Ok(Some(system_config));
    }

    Ok(None)
}

/// OS-dependent data directory (`~/.local/share/dsrc` on Linux)
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("dsrc"))
        .unwrap_or_else(|| PathBuf::from("/var/lib/dsrc"))
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = TomlConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.matcher.threshold, 80);
        assert_eq!(config.rdap.static_ranges.len(), 1);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let config: TomlConfig = toml::from_str(
            r#"
            database_path = "/tmp/dsrc-test.db"

            [rdap]
            requests_per_second = 2

            [matcher]
            threshold = 85

            [matcher.aliases]
            "WINDSTREAM" = "WINDSTREAM"
            "#,
        )
        .unwrap();

        assert_eq!(config.database_path(), PathBuf::from("/tmp/dsrc-test.db"));
        assert_eq!(config.rdap.requests_per_second, 2);
        assert_eq!(config.rdap.max_concurrent, 4);
        assert_eq!(config.matcher.threshold, 85);
        // Replacing the alias table replaces it entirely
        assert_eq!(config.matcher.aliases.len(), 1);
        assert!(!config.matcher.carrier_classes.is_empty());
        assert_eq!(config.meraki.per_page, 1000);
    }

    #[test]
    fn test_static_tables_parse() {
        let config: TomlConfig = toml::from_str(
            r#"
            [rdap.static_ips]
            "63.228.128.81" = "CenturyLink"

            [[rdap.static_ranges]]
            cidr = "10.20.0.0/16"
            organization = "Lab"
            "#,
        )
        .unwrap();
        assert_eq!(
            config.rdap.static_ips.get("63.228.128.81").map(String::as_str),
            Some("CenturyLink")
        );
        assert_eq!(config.rdap.static_ranges[0].organization, "Lab");
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = TomlConfig::default();
        config.rdap.requests_per_second = 0;
        assert!(config.validate().is_err());

        let mut config = TomlConfig::default();
        config.matcher.threshold = 101;
        assert!(config.validate().is_err());

        let mut config = TomlConfig::default();
        config.rdap.static_ranges.push(StaticRange {
            cidr: "1.2.3.4".to_string(),
            organization: "x".to_string(),
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_reports_parse_errors() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "database_path = [not valid").unwrap();
        let err = TomlConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    #[serial]
    fn test_cli_path_must_exist() {
        let result = resolve_config_path(Some(Path::new("/nonexistent/dsrc.toml")));
        assert!(result.is_err());
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        std::env::set_var(DATABASE_ENV_VAR, "/tmp/env.db");
        std::env::set_var(MERAKI_API_KEY_ENV_VAR, "env-key");
        std::env::set_var(DSR_CSV_DIR_ENV_VAR, "   ");

        let mut config = TomlConfig::default();
        let default_csv_dir = config.dsr.csv_dir.clone();
        config.apply_env_overrides();

        assert_eq!(config.database_path(), PathBuf::from("/tmp/env.db"));
        assert_eq!(config.meraki.api_key.as_deref(), Some("env-key"));
        // Blank values are ignored
        assert_eq!(config.dsr.csv_dir, default_csv_dir);

        std::env::remove_var(DATABASE_ENV_VAR);
        std::env::remove_var(MERAKI_API_KEY_ENV_VAR);
        std::env::remove_var(DSR_CSV_DIR_ENV_VAR);
    }

    #[test]
    #[serial]
    fn test_resolve_uses_env_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[rdap]\nmax_concurrent = 9").unwrap();
        std::env::set_var(CONFIG_ENV_VAR, file.path());

        let config = TomlConfig::resolve(None).unwrap();
        assert_eq!(config.rdap.max_concurrent, 9);

        std::env::remove_var(CONFIG_ENV_VAR);
    }
}
