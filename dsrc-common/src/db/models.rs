//! Database models

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Data source tag written by the CSV import
pub const CSV_IMPORT_SOURCE: &str = "csv_import";

/// Data source tag of hand-entered circuits that DSR does not track
pub const NON_DSR_SOURCE: &str = "Non-DSR";

/// One of the two uplink interfaces of a site appliance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WanSlot {
    Wan1,
    Wan2,
}

impl WanSlot {
    pub const ALL: [WanSlot; 2] = [WanSlot::Wan1, WanSlot::Wan2];

    pub fn as_str(&self) -> &'static str {
        match self {
            WanSlot::Wan1 => "wan1",
            WanSlot::Wan2 => "wan2",
        }
    }

    /// Role reported when no DSR circuit names one
    pub fn default_role(&self) -> &'static str {
        match self {
            WanSlot::Wan1 => "Primary",
            WanSlot::Wan2 => "Secondary",
        }
    }

    /// Slot a circuit purpose maps to, if any
    pub fn from_purpose(purpose: &CircuitPurpose) -> Option<Self> {
        match purpose {
            CircuitPurpose::Primary => Some(WanSlot::Wan1),
            CircuitPurpose::Secondary => Some(WanSlot::Wan2),
            CircuitPurpose::Other(_) => None,
        }
    }
}

impl fmt::Display for WanSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WanSlot {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace(' ', "").as_str() {
            "wan1" | "1" => Ok(WanSlot::Wan1),
            "wan2" | "2" => Ok(WanSlot::Wan2),
            other => Err(format!("unknown WAN slot '{}'", other)),
        }
    }
}

/// Enablement status of a DSR circuit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitStatus {
    Enabled,
    ReadyForEnablement,
    /// Any other status text, kept verbatim
    Other(String),
}

impl CircuitStatus {
    pub fn as_str(&self) -> &str {
        match self {
            CircuitStatus::Enabled => "Enabled",
            CircuitStatus::ReadyForEnablement => "Ready for Enablement",
            CircuitStatus::Other(s) => s,
        }
    }
}

impl From<&str> for CircuitStatus {
    fn from(s: &str) -> Self {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("enabled") {
            CircuitStatus::Enabled
        } else if trimmed.eq_ignore_ascii_case("ready for enablement") {
            CircuitStatus::ReadyForEnablement
        } else {
            CircuitStatus::Other(trimmed.to_string())
        }
    }
}

/// Circuit purpose from the DSR export
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitPurpose {
    Primary,
    Secondary,
    Other(String),
}

impl CircuitPurpose {
    pub fn as_str(&self) -> &str {
        match self {
            CircuitPurpose::Primary => "Primary",
            CircuitPurpose::Secondary => "Secondary",
            CircuitPurpose::Other(s) => s,
        }
    }
}

impl From<&str> for CircuitPurpose {
    fn from(s: &str) -> Self {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("primary") {
            CircuitPurpose::Primary
        } else if trimmed.eq_ignore_ascii_case("secondary") {
            CircuitPurpose::Secondary
        } else {
            CircuitPurpose::Other(trimmed.to_string())
        }
    }
}

/// A circuit row from the DSR tracking export
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitRecord {
    pub site_name: String,
    pub site_id: String,
    pub purpose: CircuitPurpose,
    pub provider_name: String,
    /// Ordered service speed, free text
    pub speed: String,
    pub monthly_cost: Option<f64>,
    pub status: CircuitStatus,
    pub data_source: String,
    pub ip_address_start: Option<String>,
}

impl CircuitRecord {
    pub fn is_enabled(&self) -> bool {
        self.status == CircuitStatus::Enabled
    }

    /// Only rows loaded from the DSR export count. `Non-DSR`, `enriched_sync`
    /// and any other tag mark circuits DSR does not vouch for.
    pub fn is_dsr_authoritative(&self) -> bool {
        self.data_source.trim().eq_ignore_ascii_case(CSV_IMPORT_SOURCE)
    }
}

/// A site appliance from the vendor inventory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub serial: String,
    pub network_name: String,
    pub model: String,
    pub notes: String,
    pub wan1_ip: Option<String>,
    pub wan2_ip: Option<String>,
    pub tags: Vec<String>,
}

impl DeviceRecord {
    pub fn ip(&self, slot: WanSlot) -> Option<&str> {
        let ip = match slot {
            WanSlot::Wan1 => self.wan1_ip.as_deref(),
            WanSlot::Wan2 => self.wan2_ip.as_deref(),
        };
        ip.map(str::trim).filter(|s| !s.is_empty())
    }
}

/// A cached RDAP resolution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RdapCacheEntry {
    pub ip_address: String,
    pub provider_name: String,
    pub rdap_response: Option<String>,
    pub last_queried: String,
}

/// Operator-entered values that beat every automated source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManualOverride {
    pub network_name: String,
    pub slot: WanSlot,
    pub provider: String,
    pub speed: Option<String>,
    pub monthly_cost: Option<f64>,
    pub override_by: String,
    pub reason: Option<String>,
    pub created_at: String,
}

/// Where the resolved provider of a WAN slot came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderSource {
    ManualOverride,
    Dsr,
    NonDsr,
    DeviceNotes,
    CarrierSpeed,
    Arin,
    None,
}

impl ProviderSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderSource::ManualOverride => "manual_override",
            ProviderSource::Dsr => "dsr",
            ProviderSource::NonDsr => "non_dsr",
            ProviderSource::DeviceNotes => "device_notes",
            ProviderSource::CarrierSpeed => "carrier_speed",
            ProviderSource::Arin => "arin",
            ProviderSource::None => "none",
        }
    }
}

impl fmt::Display for ProviderSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "manual_override" => ProviderSource::ManualOverride,
            "dsr" => ProviderSource::Dsr,
            "non_dsr" => ProviderSource::NonDsr,
            "device_notes" => ProviderSource::DeviceNotes,
            "carrier_speed" => ProviderSource::CarrierSpeed,
            "arin" => ProviderSource::Arin,
            "none" => ProviderSource::None,
            other => return Err(format!("unknown provider source '{}'", other)),
        })
    }
}

/// Resolved values for one WAN slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedSlot {
    pub provider: String,
    pub speed: String,
    pub monthly_cost: Option<f64>,
    pub ip: Option<String>,
    pub arin_org: Option<String>,
    /// True only when the provider traces to an authoritative DSR record
    pub dsr_verified: bool,
    pub confidence: f64,
    pub source: ProviderSource,
    pub circuit_role: String,
    pub override_by: Option<String>,
}

impl EnrichedSlot {
    pub fn empty(slot: WanSlot) -> Self {
        Self {
            provider: String::new(),
            speed: String::new(),
            monthly_cost: None,
            ip: None,
            arin_org: None,
            dsr_verified: false,
            confidence: 0.0,
            source: ProviderSource::None,
            circuit_role: slot.default_role().to_string(),
            override_by: None,
        }
    }

    pub fn has_ip(&self) -> bool {
        self.ip.as_deref().is_some_and(|ip| !ip.trim().is_empty())
    }

    pub fn display_cost(&self) -> String {
        format_cost(self.monthly_cost)
    }
}

/// Derived per-site circuit view
///
/// The update timestamp lives beside the record (see `StoredEnrichedCircuit`)
/// so that two reconciliations of the same inputs compare equal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedCircuitRecord {
    pub network_name: String,
    pub wan1: EnrichedSlot,
    pub wan2: EnrichedSlot,
    pub needs_review: bool,
    pub review_notes: Vec<String>,
}

impl EnrichedCircuitRecord {
    pub fn slot(&self, slot: WanSlot) -> &EnrichedSlot {
        match slot {
            WanSlot::Wan1 => &self.wan1,
            WanSlot::Wan2 => &self.wan2,
        }
    }

    pub fn manual_override(&self) -> bool {
        self.wan1.override_by.is_some() || self.wan2.override_by.is_some()
    }

    /// A site with no IP on either slot is not live
    pub fn is_live(&self) -> bool {
        self.wan1.has_ip() || self.wan2.has_ip()
    }
}

/// An enriched record as read back from storage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEnrichedCircuit {
    pub record: EnrichedCircuitRecord,
    pub last_updated: String,
}

/// Render a monthly cost the way reports show it (`$400.00`)
pub fn format_cost(cost: Option<f64>) -> String {
    match cost {
        Some(c) => format!("${:.2}", c),
        None => String::new(),
    }
}
