//! RDAP resolver
//!
//! Resolves a WAN IP to the organization that owns it. Static assignments
//! and non-routable addresses are answered locally; everything else is an
//! RDAP `GET {base_url}/ip/{ip}` through a shared rate limiter.

use crate::error::{EnrichError, EnrichResult};
use crate::services::rdap_parser::{extract_org_name, is_registry_document};
use crate::utils::{build_limiter, DirectLimiter};
use async_trait::async_trait;
use dsrc_common::config::RdapConfig;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Why a lookup produced no organization name
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LookupFailure {
    #[error("no registry record")]
    NotFound,

    #[error("registry record carries no organization name")]
    NoOrgName,

    #[error("transient lookup error: {0}")]
    TransientError(String),

    #[error("address is not publicly routable")]
    NotRoutable,

    #[error("invalid IP address: {0}")]
    InvalidAddress(String),
}

impl LookupFailure {
    /// Worth retrying on the next run for a different answer
    pub fn is_transient(&self) -> bool {
        matches!(self, LookupFailure::TransientError(_))
    }

    /// Short label used in run summaries and CLI output
    pub fn kind(&self) -> &'static str {
        match self {
            LookupFailure::NotFound => "not_found",
            LookupFailure::NoOrgName => "no_org_name",
            LookupFailure::TransientError(_) => "transient",
            LookupFailure::NotRoutable => "not_routable",
            LookupFailure::InvalidAddress(_) => "invalid_address",
        }
    }
}

/// Where a successful answer came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionSource {
    StaticAssignment,
    Registry,
    Cache,
}

/// Successful lookup
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub org_name: String,
    /// Raw RDAP document, for registry answers
    pub raw_response: Option<String>,
    pub source: ResolutionSource,
}

impl Resolution {
    pub fn new(org_name: impl Into<String>, source: ResolutionSource) -> Self {
        Self {
            org_name: org_name.into(),
            raw_response: None,
            source,
        }
    }
}

pub type LookupOutcome = Result<Resolution, LookupFailure>;

/// Anything that can turn an IP into an organization name
#[async_trait]
pub trait OrgResolver: Send + Sync {
    async fn resolve(&self, ip: &str) -> LookupOutcome;
}

/// IPv4 or IPv6 network in CIDR notation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cidr {
    network: IpAddr,
    prefix: u8,
}

impl Cidr {
    pub fn parse(text: &str) -> EnrichResult<Self> {
        let invalid = || EnrichError::InvalidInput(format!("invalid CIDR '{}'", text));
        let (addr, prefix) = text.trim().split_once('/').ok_or_else(invalid)?;
        let network: IpAddr = addr.parse().map_err(|_| invalid())?;
        let prefix: u8 = prefix.parse().map_err(|_| invalid())?;
        let max = if network.is_ipv4() { 32 } else { 128 };
        if prefix > max {
            return Err(invalid());
        }
        Ok(Self { network, prefix })
    }

    pub fn contains(&self, ip: &IpAddr) -> bool {
        match (self.network, ip) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                let mask = prefix_mask_u32(self.prefix);
                (u32::from(net) & mask) == (u32::from(*ip) & mask)
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                let mask = prefix_mask_u128(self.prefix);
                (u128::from(net) & mask) == (u128::from(*ip) & mask)
            }
            _ => false,
        }
    }
}

fn prefix_mask_u32(prefix: u8) -> u32 {
    if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - u32::from(prefix))
    }
}

fn prefix_mask_u128(prefix: u8) -> u128 {
    if prefix == 0 {
        0
    } else {
        u128::MAX << (128 - u32::from(prefix))
    }
}

/// Private, loopback, link-local, unspecified, CGNAT and other addresses no
/// registry will answer for
pub fn is_non_routable(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_non_routable_v4(v4),
        IpAddr::V6(v6) => {
            if let Some(mapped) = v6.to_ipv4_mapped() {
                return is_non_routable_v4(&mapped);
            }
            let first = v6.segments()[0];
            v6.is_loopback()
                || v6.is_unspecified()
                || v6.is_multicast()
                || (first & 0xfe00) == 0xfc00 // unique local fc00::/7
                || (first & 0xffc0) == 0xfe80 // link-local fe80::/10
        }
    }
}

fn is_non_routable_v4(ip: &Ipv4Addr) -> bool {
    let octets = ip.octets();
    ip.is_private()
        || ip.is_loopback()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        || ip.is_multicast()
        || ip.is_documentation()
        // Shared address space 100.64.0.0/10 (carrier-grade NAT)
        || (octets[0] == 100 && (octets[1] & 0xc0) == 64)
}

/// RDAP client with static assignments and rate limiting
pub struct RdapResolver {
    http_client: reqwest::Client,
    base_url: String,
    rate_limiter: Arc<DirectLimiter>,
    static_ips: HashMap<IpAddr, String>,
    static_ranges: Vec<(Cidr, String)>,
}

impl RdapResolver {
    pub fn new(config: &RdapConfig) -> EnrichResult<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        let mut static_ips = HashMap::new();
        for (ip, organization) in &config.static_ips {
            let parsed: IpAddr = ip.trim().parse().map_err(|_| {
                EnrichError::InvalidInput(format!("invalid static IP '{}'", ip))
            })?;
            static_ips.insert(parsed, organization.clone());
        }

        let static_ranges = config
            .static_ranges
            .iter()
            .map(|r| Ok((Cidr::parse(&r.cidr)?, r.organization.clone())))
            .collect::<EnrichResult<Vec<_>>>()?;

        Ok(Self {
            http_client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            rate_limiter: build_limiter(config.requests_per_second)?,
            static_ips,
            static_ranges,
        })
    }

    /// Static assignment for an address, if configured
    pub fn static_assignment(&self, ip: &IpAddr) -> Option<&str> {
        if let Some(org) = self.static_ips.get(ip) {
            return Some(org.as_str());
        }
        self.static_ranges
            .iter()
            .find(|(cidr, _)| cidr.contains(ip))
            .map(|(_, org)| org.as_str())
    }

    async fn query_registry(&self, ip: &IpAddr) -> LookupOutcome {
        self.rate_limiter.until_ready().await;

        let url = format!("{}/ip/{}", self.base_url, ip);
        tracing::debug!(ip = %ip, url = %url, "Querying RDAP");

        let response = self
            .http_client
            .get(&url)
            .header(reqwest::header::ACCEPT, "application/rdap+json, application/json")
            .send()
            .await
            .map_err(|e| LookupFailure::TransientError(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(LookupFailure::NotFound);
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(LookupFailure::TransientError("rate limited (429)".to_string()));
        }
        if !status.is_success() {
            return Err(LookupFailure::TransientError(format!("HTTP {}", status.as_u16())));
        }

        let body = response
            .text()
            .await
            .map_err(|e| LookupFailure::TransientError(format!("unreadable body: {}", e)))?;
        if body.trim().is_empty() {
            return Err(LookupFailure::NotFound);
        }

        let doc: serde_json::Value = serde_json::from_str(&body)
            .map_err(|e| LookupFailure::TransientError(format!("malformed JSON: {}", e)))?;
        if !is_registry_document(&doc) {
            return Err(LookupFailure::NotFound);
        }

        match extract_org_name(&doc) {
            Some(org_name) => Ok(Resolution {
                org_name,
                raw_response: Some(body),
                source: ResolutionSource::Registry,
            }),
            None => Err(LookupFailure::NoOrgName),
        }
    }
}

#[async_trait]
impl OrgResolver for RdapResolver {
    async fn resolve(&self, ip: &str) -> LookupOutcome {
        let addr: IpAddr = ip
            .trim()
            .parse()
            .map_err(|_| LookupFailure::InvalidAddress(ip.to_string()))?;

        if let Some(org) = self.static_assignment(&addr) {
            tracing::debug!(ip = %addr, organization = org, "Static assignment");
            return Ok(Resolution::new(org, ResolutionSource::StaticAssignment));
        }
        if is_non_routable(&addr) {
            return Err(LookupFailure::NotRoutable);
        }

        let outcome = self.query_registry(&addr).await;
        match &outcome {
            Ok(resolution) => {
                tracing::debug!(ip = %addr, organization = %resolution.org_name, "RDAP resolved")
            }
            Err(failure) if failure.is_transient() => {
                tracing::warn!(ip = %addr, error = %failure, "RDAP lookup failed, will retry next run")
            }
            Err(failure) => tracing::info!(ip = %addr, outcome = failure.kind(), "RDAP lookup found no name"),
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dsrc_common::config::StaticRange;

    fn ip(text: &str) -> IpAddr {
        text.parse().unwrap()
    }

    fn v6(text: &str) -> IpAddr {
        IpAddr::V6(text.parse::<std::net::Ipv6Addr>().unwrap())
    }

    fn offline_config() -> RdapConfig {
        RdapConfig {
            // Nothing listens here; tests must never reach the network
            base_url: "http://127.0.0.1:9".to_string(),
            timeout_secs: 1,
            ..RdapConfig::default()
        }
    }

    #[test]
    fn test_cidr_contains() {
        let cidr = Cidr::parse("166.80.0.0/16").unwrap();
        assert!(cidr.contains(&ip("166.80.12.34")));
        assert!(!cidr.contains(&ip("166.81.0.1")));
        assert!(!cidr.contains(&v6("2001:db8::1")));

        let all = Cidr::parse("0.0.0.0/0").unwrap();
        assert!(all.contains(&ip("8.8.8.8")));

        let v6_net = Cidr::parse("2001:db8::/32").unwrap();
        assert!(v6_net.contains(&v6("2001:db8:1::5")));
    }

    #[test]
    fn test_cidr_rejects_garbage() {
        assert!(Cidr::parse("166.80.0.0").is_err());
        assert!(Cidr::parse("166.80.0.0/33").is_err());
        assert!(Cidr::parse("not-an-ip/8").is_err());
    }

    #[test]
    fn test_non_routable_addresses() {
        for addr in ["10.1.2.3", "192.168.0.1", "172.16.5.5", "127.0.0.1", "169.254.1.1", "0.0.0.0", "100.64.1.1"] {
            assert!(is_non_routable(&ip(addr)), "{} should be non-routable", addr);
        }
        assert!(is_non_routable(&v6("fe80::1")));
        assert!(is_non_routable(&v6("fd00::1")));
        assert!(is_non_routable(&v6("::ffff:10.0.0.1")));
        assert!(!is_non_routable(&ip("8.8.8.8")));
        assert!(!is_non_routable(&ip("100.128.0.1")));
        assert!(!is_non_routable(&v6("2607:f8b0::1")));
    }

    #[tokio::test]
    async fn test_static_range_short_circuits() {
        let resolver = RdapResolver::new(&offline_config()).unwrap();
        let resolution = resolver.resolve("166.80.1.2").await.unwrap();
        assert_eq!(resolution.org_name, "Verizon Business");
        assert_eq!(resolution.source, ResolutionSource::StaticAssignment);
    }

    #[tokio::test]
    async fn test_static_ip_wins_over_range() {
        let mut config = offline_config();
        config.static_ips.insert("166.80.9.9".to_string(), "Verizon Wireless".to_string());
        config.static_ranges.push(StaticRange {
            cidr: "10.0.0.0/8".to_string(),
            organization: "Corporate".to_string(),
        });
        let resolver = RdapResolver::new(&config).unwrap();

        assert_eq!(resolver.resolve("166.80.9.9").await.unwrap().org_name, "Verizon Wireless");
        // Static tables are consulted before the routability check
        assert_eq!(resolver.resolve("10.1.1.1").await.unwrap().org_name, "Corporate");
    }

    #[tokio::test]
    async fn test_local_failures() {
        let resolver = RdapResolver::new(&offline_config()).unwrap();
        assert_eq!(resolver.resolve("192.168.1.1").await, Err(LookupFailure::NotRoutable));
        assert!(matches!(
            resolver.resolve("not-an-ip").await,
            Err(LookupFailure::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_invalid_static_entries_rejected() {
        let mut config = offline_config();
        config.static_ips.insert("bogus".to_string(), "X".to_string());
        assert!(RdapResolver::new(&config).is_err());
    }

    #[test]
    fn test_failure_kinds() {
        assert!(LookupFailure::TransientError("timeout".into()).is_transient());
        assert!(!LookupFailure::NotFound.is_transient());
        assert_eq!(LookupFailure::NoOrgName.kind(), "no_org_name");
    }
}
