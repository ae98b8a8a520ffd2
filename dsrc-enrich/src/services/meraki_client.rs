//! Meraki dashboard API client and inventory sync
//!
//! **Rate Limiting:** one shared `governor` limiter per client
//! (`meraki.requests_per_second`).
//!
//! **Retries:** 429 waits for `Retry-After` (capped), 5xx and transport
//! errors back off exponentially; both give up after `meraki.max_retries`.
//! Other 4xx statuses fail immediately.
//!
//! **Pagination:** `perPage`/`startingAfter`. A `Link: <...>; rel=next`
//! header is followed when present; otherwise a full page continues from the
//! key of its last item.

use crate::db::devices::replace_inventory;
use crate::error::{EnrichError, EnrichResult};
use crate::utils::{build_limiter, DirectLimiter};
use dsrc_common::config::MerakiConfig;
use dsrc_common::db::DeviceRecord;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use sqlx::SqlitePool;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

const API_KEY_HEADER: &str = "X-Cisco-Meraki-API-Key";
const MAX_RETRY_AFTER: Duration = Duration::from_secs(60);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Deserialize)]
pub struct Organization {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Network {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub serial: String,
    #[serde(default)]
    pub network_id: Option<String>,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UplinkStatus {
    pub serial: String,
    #[serde(default)]
    pub uplinks: Vec<Uplink>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Uplink {
    pub interface: String,
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub public_ip: Option<String>,
}

impl Uplink {
    /// Public address when the appliance sits behind NAT, else the interface IP
    pub fn effective_ip(&self) -> Option<String> {
        [self.public_ip.as_deref(), self.ip.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|ip| !ip.is_empty())
            .map(str::to_string)
    }
}

/// Meraki dashboard API client
pub struct MerakiClient {
    http_client: reqwest::Client,
    base_url: String,
    api_key: String,
    per_page: u32,
    max_retries: u32,
    backoff_base: Duration,
    rate_limiter: Arc<DirectLimiter>,
}

impl MerakiClient {
    pub fn new(config: &MerakiConfig) -> EnrichResult<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                EnrichError::InvalidInput("Meraki API key not configured (MERAKI_API_KEY)".to_string())
            })?;

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            http_client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            per_page: config.per_page,
            max_retries: config.max_retries,
            backoff_base: Duration::from_millis(500),
            rate_limiter: build_limiter(config.requests_per_second)?,
        })
    }

    /// Shorten the exponential backoff step (tests)
    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_base
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(MAX_BACKOFF)
    }

    /// GET with rate limiting and retries; returns the body and the next-page link
    async fn get_page(&self, url: &str, query: &[(&str, String)]) -> EnrichResult<(Value, Option<String>)> {
        let mut attempt = 0u32;
        loop {
            self.rate_limiter.until_ready().await;
            tracing::debug!(url, attempt, "Meraki request");

            let response = match self
                .http_client
                .get(url)
                .header(API_KEY_HEADER, &self.api_key)
                .header(reqwest::header::ACCEPT, "application/json")
                .query(query)
                .send()
                .await
            {
                Ok(response) => response,
                Err(e) if attempt < self.max_retries => {
                    let delay = self.backoff(attempt);
                    tracing::warn!(url, attempt, error = %e, delay_ms = delay.as_millis() as u64, "Meraki request failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                    continue;
                }
                Err(e) => return Err(EnrichError::Http(e)),
            };

            let status = response.status();
            if status.is_success() {
                let next = response
                    .headers()
                    .get(reqwest::header::LINK)
                    .and_then(|v| v.to_str().ok())
                    .and_then(next_link);
                let body: Value = response.json().await?;
                return Ok((body, next));
            }

            let retryable = status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error();
            if retryable && attempt < self.max_retries {
                let delay = if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                    retry_after(&response).unwrap_or_else(|| self.backoff(attempt)).min(MAX_RETRY_AFTER)
                } else {
                    self.backoff(attempt)
                };
                tracing::warn!(
                    url,
                    status = status.as_u16(),
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Meraki API busy, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
                continue;
            }

            let message = response.text().await.unwrap_or_default();
            return Err(EnrichError::Meraki {
                status: status.as_u16(),
                message: message.chars().take(200).collect(),
            });
        }
    }

    /// Fetch every page of a list endpoint. `cursor_field` names the item key
    /// used as `startingAfter` when the API sends no Link header.
    async fn get_all<T: DeserializeOwned>(&self, path: &str, cursor_field: &str) -> EnrichResult<Vec<T>> {
        let mut url = format!("{}{}", self.base_url, path);
        let mut query = vec![("perPage", self.per_page.to_string())];
        let mut items: Vec<Value> = Vec::new();

        loop {
            let (body, next) = self.get_page(&url, &query).await?;
            let page = match body {
                Value::Array(page) => page,
                other => {
                    return Err(EnrichError::Meraki {
                        status: 200,
                        message: format!("expected a JSON array from {}, got {}", path, type_name(&other)),
                    })
                }
            };
            let page_len = page.len();
            let cursor = page
                .last()
                .and_then(|item| item.get(cursor_field))
                .and_then(Value::as_str)
                .map(str::to_string);
            items.extend(page);

            match next {
                Some(next) if next != url => {
                    url = next;
                    query.clear();
                }
                Some(_) => break,
                None => {
                    let Some(cursor) = cursor else { break };
                    if page_len < self.per_page as usize {
                        break;
                    }
                    query = vec![
                        ("perPage", self.per_page.to_string()),
                        ("startingAfter", cursor),
                    ];
                }
            }
        }

        tracing::debug!(path, count = items.len(), "Meraki list fetched");
        items
            .into_iter()
            .map(|item| serde_json::from_value(item).map_err(EnrichError::from))
            .collect()
    }

    pub async fn list_organizations(&self) -> EnrichResult<Vec<Organization>> {
        self.get_all("/organizations", "id").await
    }

    /// Configured organization id, or the id of the organization named `name`
    pub async fn organization_id(&self, id: Option<&str>, name: Option<&str>) -> EnrichResult<String> {
        if let Some(id) = id.filter(|s| !s.trim().is_empty()) {
            return Ok(id.trim().to_string());
        }
        let name = name.filter(|s| !s.trim().is_empty()).ok_or_else(|| {
            EnrichError::InvalidInput("set meraki.org_id or meraki.org_name".to_string())
        })?;

        self.list_organizations()
            .await?
            .into_iter()
            .find(|org| org.name.trim().eq_ignore_ascii_case(name.trim()))
            .map(|org| org.id)
            .ok_or_else(|| EnrichError::Common(dsrc_common::Error::NotFound(format!("Meraki organization '{}'", name))))
    }

    pub async fn list_networks(&self, org_id: &str) -> EnrichResult<Vec<Network>> {
        self.get_all(&format!("/organizations/{}/networks", org_id), "id").await
    }

    pub async fn list_devices(&self, org_id: &str) -> EnrichResult<Vec<Device>> {
        self.get_all(&format!("/organizations/{}/devices", org_id), "serial").await
    }

    pub async fn list_uplink_statuses(&self, org_id: &str) -> EnrichResult<Vec<UplinkStatus>> {
        self.get_all(&format!("/organizations/{}/appliance/uplink/statuses", org_id), "serial")
            .await
    }
}

/// URL of the `rel=next` entry of a Link header
fn next_link(header: &str) -> Option<String> {
    header.split(',').find_map(|part| {
        let (target, params) = part.split_once(';')?;
        let is_next = params
            .split(';')
            .any(|p| matches!(p.trim().replace('"', "").as_str(), "rel=next"));
        if !is_next {
            return None;
        }
        let url = target.trim().strip_prefix('<')?.strip_suffix('>')?;
        Some(url.to_string())
    })
}

fn retry_after(response: &reqwest::Response) -> Option<Duration> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64)
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Join networks, devices and uplinks into appliance rows.
/// Only devices whose model starts with `model_prefix` and that belong to a
/// known network are kept.
pub fn build_inventory(
    networks: &[Network],
    devices: &[Device],
    uplinks: &[UplinkStatus],
    model_prefix: &str,
) -> Vec<DeviceRecord> {
    let networks_by_id: HashMap<&str, &Network> = networks.iter().map(|n| (n.id.as_str(), n)).collect();
    let uplinks_by_serial: HashMap<&str, &UplinkStatus> =
        uplinks.iter().map(|u| (u.serial.as_str(), u)).collect();
    let prefix = model_prefix.to_ascii_uppercase();

    let mut records: Vec<DeviceRecord> = devices
        .iter()
        .filter(|d| d.model.to_ascii_uppercase().starts_with(&prefix))
        .filter_map(|device| {
            let network = device
                .network_id
                .as_deref()
                .and_then(|id| networks_by_id.get(id))?;
            let status = uplinks_by_serial.get(device.serial.as_str());
            let uplink_ip = |interface: &str| {
                status.and_then(|s| {
                    s.uplinks
                        .iter()
                        .find(|u| u.interface.eq_ignore_ascii_case(interface))
                        .and_then(Uplink::effective_ip)
                })
            };

            let tags: BTreeSet<String> = device
                .tags
                .iter()
                .chain(network.tags.iter())
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect();

            Some(DeviceRecord {
                serial: device.serial.clone(),
                network_name: network.name.trim().to_string(),
                model: device.model.clone(),
                notes: device.notes.clone().unwrap_or_default(),
                wan1_ip: uplink_ip("wan1"),
                wan2_ip: uplink_ip("wan2"),
                tags: tags.into_iter().collect(),
            })
        })
        .collect();

    records.sort_by(|a, b| a.serial.cmp(&b.serial));
    records
}

/// Outcome of an inventory sync
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    pub networks: usize,
    pub devices_seen: usize,
    pub appliances: usize,
}

/// Pulls appliance inventory into `meraki_inventory`
pub struct InventorySync {
    db: SqlitePool,
    client: MerakiClient,
    config: MerakiConfig,
}

impl InventorySync {
    pub fn new(db: SqlitePool, client: MerakiClient, config: MerakiConfig) -> Self {
        Self { db, client, config }
    }

    pub async fn sync(&self) -> EnrichResult<SyncReport> {
        let org_id = self
            .client
            .organization_id(self.config.org_id.as_deref(), self.config.org_name.as_deref())
            .await?;
        tracing::info!(org_id = %org_id, "Syncing Meraki inventory");

        let networks = self.client.list_networks(&org_id).await?;
        let devices = self.client.list_devices(&org_id).await?;
        let uplinks = self.client.list_uplink_statuses(&org_id).await?;

        let records = build_inventory(&networks, &devices, &uplinks, &self.config.appliance_model_prefix);
        let appliances = replace_inventory(&self.db, &records).await?;

        tracing::info!(
            networks = networks.len(),
            devices_seen = devices.len(),
            appliances,
            "Meraki inventory sync complete"
        );

        Ok(SyncReport {
            networks: networks.len(),
            devices_seen: devices.len(),
            appliances,
        })
    }
}
