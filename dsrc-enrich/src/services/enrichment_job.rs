//! Nightly enrichment job
//!
//! State progression:
//! IMPORT (optional) → SYNC (optional) → LOAD → FILTER → RESOLVE → RECONCILE → COMPLETED
//!
//! Sites come from the appliance inventory. Excluded sites are dropped, the
//! change tracker filters the rest to sites whose inputs changed, the WAN IPs
//! of those sites are resolved (cache first, then RDAP through a bounded
//! worker pool) and each site's record is written in one transaction together
//! with its new baseline. A failing site is logged and counted; the run goes
//! on with the next one.
//!
//! Unchanged sites whose stored record lacks an ARIN org for a WAN IP get that
//! IP retried; a site whose org now resolves is reprocessed. A vendor outage
//! during sync is recorded and the run continues on the stored inventory.

use crate::db::runs::{finish_run, start_run, RunStatus, RunSummary};
use crate::db::{circuits, devices, enriched, overrides};
use crate::error::EnrichResult;
use crate::services::change_tracker::{ChangeTracker, SiteFingerprint};
use crate::services::dsr_importer::DsrImporter;
use crate::services::meraki_client::{InventorySync, MerakiClient};
use crate::services::provider_matcher::ProviderMatcher;
use crate::services::rdap_cache::{is_valid_org_name, RdapCache};
use crate::services::rdap_resolver::{LookupOutcome, OrgResolver, Resolution, ResolutionSource};
use crate::services::reconciler::{Reconciler, SiteInputs};
use crate::utils::retry_on_lock;
use dsrc_common::config::{ReconcileConfig, TomlConfig};
use dsrc_common::db::{CircuitRecord, DeviceRecord, ManualOverride, WanSlot};
use futures::stream::{self, StreamExt};
use sqlx::SqlitePool;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use uuid::Uuid;

/// Flags of one `run`
#[derive(Debug, Clone, Copy, Default)]
pub struct JobOptions {
    pub skip_import: bool,
    pub skip_sync: bool,
    /// Reprocess every site regardless of change tracking
    pub full: bool,
}

/// Outcome of one run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: Uuid,
    pub summary: RunSummary,
}

/// Result of resolving one IP for the operator
#[derive(Debug, Clone)]
pub struct IpLookup {
    pub ip: String,
    pub outcome: LookupOutcome,
    pub cached: bool,
}

/// All stored inputs, grouped per site
struct Snapshot {
    devices: BTreeMap<String, Vec<DeviceRecord>>,
    circuits: HashMap<String, Vec<CircuitRecord>>,
    overrides: HashMap<String, Vec<ManualOverride>>,
}

impl Snapshot {
    async fn load(db: &SqlitePool) -> EnrichResult<Self> {
        let mut by_network: BTreeMap<String, Vec<DeviceRecord>> = BTreeMap::new();
        for device in devices::load_devices(db).await? {
            by_network.entry(device.network_name.clone()).or_default().push(device);
        }

        Ok(Self {
            devices: by_network,
            circuits: circuits::load_circuits_by_site(db).await?,
            overrides: overrides::load_overrides_by_site(db).await?,
        })
    }

    fn primary_device(&self, site: &str) -> Option<&DeviceRecord> {
        self.devices
            .get(site)
            .and_then(|list| devices::primary_device(list))
    }

    fn circuits(&self, site: &str) -> &[CircuitRecord] {
        self.circuits.get(site).map(Vec::as_slice).unwrap_or(&[])
    }

    fn overrides(&self, site: &str) -> &[ManualOverride] {
        self.overrides.get(site).map(Vec::as_slice).unwrap_or(&[])
    }

    fn fingerprint(&self, site: &str) -> SiteFingerprint {
        SiteFingerprint::compute(self.primary_device(site), self.circuits(site), self.overrides(site))
    }

    /// Sites the job considers, in name order
    fn included_sites<'s>(&'s self, filter: &'s ReconcileConfig) -> impl Iterator<Item = &'s str> + 's {
        self.devices
            .iter()
            .filter(move |(site, list)| !is_excluded(site, list, filter))
            .map(|(site, _)| site.as_str())
    }
}

/// Lab, hub, voice and test sites are never enriched
pub fn is_excluded(network_name: &str, site_devices: &[DeviceRecord], filter: &ReconcileConfig) -> bool {
    let name = network_name.to_lowercase();
    if filter
        .excluded_name_patterns
        .iter()
        .any(|p| name.contains(&p.to_lowercase()))
    {
        return true;
    }

    site_devices.iter().any(|device| {
        let tagged = device.tags.iter().any(|tag| {
            filter
                .excluded_tags
                .iter()
                .any(|excluded| tag.trim().eq_ignore_ascii_case(excluded))
        });
        let notes = device.notes.to_lowercase();
        tagged
            || filter
                .excluded_notes_patterns
                .iter()
                .any(|p| notes.contains(&p.to_lowercase()))
    })
}

/// Registry names for the satellite operator become its consumer brand
fn display_org_name(org: &str) -> String {
    if org.to_lowercase().contains("spacex") {
        "Starlink".to_string()
    } else {
        org.trim().to_string()
    }
}

/// Nightly enrichment job
pub struct EnrichmentJob {
    db: SqlitePool,
    config: TomlConfig,
    resolver: Arc<dyn OrgResolver>,
    cache: RdapCache,
    tracker: ChangeTracker,
    reconciler: Reconciler,
}

impl EnrichmentJob {
    pub fn new(db: SqlitePool, config: TomlConfig, resolver: Arc<dyn OrgResolver>) -> Self {
        let reconciler = Reconciler::new(ProviderMatcher::new(&config.matcher));
        Self {
            cache: RdapCache::new(db.clone()),
            tracker: ChangeTracker::new(db.clone()),
            db,
            config,
            resolver,
            reconciler,
        }
    }

    pub fn cache(&self) -> &RdapCache {
        &self.cache
    }

    pub fn tracker(&self) -> &ChangeTracker {
        &self.tracker
    }

    /// Run the whole job, recording it in the run log
    pub async fn run(&self, options: JobOptions) -> EnrichResult<RunReport> {
        let run_id = start_run(&self.db).await?;
        tracing::info!(
            run_id = %run_id,
            skip_import = options.skip_import,
            skip_sync = options.skip_sync,
            full = options.full,
            "Enrichment run started"
        );

        let mut summary = RunSummary::default();
        match self.run_phases(options, &mut summary).await {
            Ok(()) => {
                finish_run(&self.db, run_id, RunStatus::Completed, &summary).await?;
                tracing::info!(
                    run_id = %run_id,
                    sites_seen = summary.sites_seen,
                    sites_changed = summary.sites_changed,
                    sites_processed = summary.sites_processed,
                    sites_failed = summary.sites_failed,
                    review_flagged = summary.review_flagged,
                    ips_resolved = summary.ips_resolved,
                    ips_cached = summary.ips_cached,
                    ips_failed = summary.ips_failed,
                    "Enrichment run completed"
                );
                Ok(RunReport { run_id, summary })
            }
            Err(e) => {
                tracing::error!(run_id = %run_id, error = %e, "Enrichment run failed");
                summary.error = Some(e.to_string());
                if let Err(log_err) = finish_run(&self.db, run_id, RunStatus::Failed, &summary).await {
                    tracing::error!(run_id = %run_id, error = %log_err, "Could not close run log entry");
                }
                Err(e)
            }
        }
    }

    async fn run_phases(&self, options: JobOptions, summary: &mut RunSummary) -> EnrichResult<()> {
        if !options.skip_import {
            let importer = DsrImporter::new(self.db.clone(), self.config.dsr.clone());
            summary.circuits_imported = Some(importer.import_latest().await?.rows_stored);
        }
        if !options.skip_sync {
            let client = MerakiClient::new(&self.config.meraki)?;
            let sync = InventorySync::new(self.db.clone(), client, self.config.meraki.clone());
            match sync.sync().await {
                Ok(report) => summary.devices_synced = Some(report.appliances),
                Err(e) if e.is_transient_vendor_error() => {
                    tracing::warn!(error = %e, "Meraki sync failed, using stored inventory");
                    summary.sync_error = Some(e.to_string());
                }
                Err(e) => return Err(e),
            }
        }

        let snapshot = Snapshot::load(&self.db).await?;
        summary.sites_seen = snapshot.devices.len();

        let mut changed: Vec<(&str, SiteFingerprint)> = Vec::new();
        let mut unchanged: Vec<(&str, SiteFingerprint, Vec<String>)> = Vec::new();
        for site in snapshot.included_sites(&self.config.reconcile) {
            let fingerprint = snapshot.fingerprint(site);
            if options.full || self.tracker.needs_reprocessing(site, &fingerprint).await? {
                changed.push((site, fingerprint));
            } else {
                let unresolved = self.unresolved_ips(site).await?;
                unchanged.push((site, fingerprint, unresolved));
            }
        }

        let mut ips: BTreeSet<String> = changed
            .iter()
            .filter_map(|(site, _)| snapshot.primary_device(site))
            .flat_map(|device| WanSlot::ALL.into_iter().filter_map(move |slot| device.ip(slot)))
            .map(str::to_string)
            .collect();
        let retried = unchanged
            .iter()
            .flat_map(|(_, _, unresolved)| unresolved.iter().cloned());
        ips.extend(retried);
        let arin_orgs = self.resolve_ips(ips, summary).await?;

        for (site, fingerprint, unresolved) in unchanged {
            let recovered = unresolved.iter().any(|ip| arin_orgs.contains_key(ip));
            if recovered {
                tracing::info!(site = %site, "ARIN org now resolves, reprocessing site");
                changed.push((site, fingerprint));
            } else {
                summary.sites_skipped += 1;
            }
        }
        summary.sites_excluded = summary.sites_seen - changed.len() - summary.sites_skipped;
        summary.sites_changed = changed.len();

        tracing::info!(
            sites_seen = summary.sites_seen,
            sites_excluded = summary.sites_excluded,
            sites_changed = summary.sites_changed,
            sites_skipped = summary.sites_skipped,
            "Change detection complete"
        );

        let max_wait_ms = self.config.database.max_lock_wait_ms;
        for (site, fingerprint) in &changed {
            let inputs = SiteInputs::new(
                site,
                snapshot.primary_device(site),
                snapshot.circuits(site),
                snapshot.overrides(site),
                &arin_orgs,
            );
            let record = self.reconciler.reconcile(&inputs);

            let saved = retry_on_lock("save_enriched_site", max_wait_ms, || {
                enriched::save_enriched_site(&self.db, &record, fingerprint)
            })
            .await;

            match saved {
                Ok(()) => {
                    summary.sites_processed += 1;
                    if record.needs_review {
                        summary.review_flagged += 1;
                        tracing::warn!(site = %site, notes = ?record.review_notes, "Site flagged for review");
                    }
                    tracing::debug!(
                        site = %site,
                        wan1 = %record.wan1.provider,
                        wan2 = %record.wan2.provider,
                        "Site enriched"
                    );
                }
                Err(e) => {
                    summary.sites_failed += 1;
                    tracing::error!(site = %site, error = %e, "Site enrichment failed");
                }
            }
        }

        Ok(())
    }

    /// WAN IPs of the stored record that carry no ARIN org. A site without a
    /// stored record has nothing to retry.
    async fn unresolved_ips(&self, site: &str) -> EnrichResult<Vec<String>> {
        let Some(stored) = enriched::load_enriched(&self.db, site).await? else {
            return Ok(Vec::new());
        };
        Ok(WanSlot::ALL
            .into_iter()
            .map(|slot| stored.record.slot(slot))
            .filter(|slot| slot.arin_org.is_none())
            .filter_map(|slot| slot.ip.clone())
            .collect())
    }

    /// Organization per IP for the given addresses. Cache hits skip the
    /// network; misses run through the resolver `rdap.max_concurrent` at a
    /// time. Only valid names are returned and only successes are cached.
    async fn resolve_ips(
        &self,
        ips: BTreeSet<String>,
        summary: &mut RunSummary,
    ) -> EnrichResult<HashMap<String, String>> {
        let mut orgs = HashMap::new();
        let mut misses = Vec::new();

        for ip in ips {
            match self.cache.lookup(&ip).await? {
                Some(org) => {
                    summary.ips_cached += 1;
                    orgs.insert(ip, display_org_name(&org));
                }
                None => misses.push(ip),
            }
        }

        tracing::info!(cached = summary.ips_cached, to_resolve = misses.len(), "Resolving WAN IPs");

        let results: Vec<(String, LookupOutcome)> = stream::iter(misses)
            .map(|ip| {
                let resolver = Arc::clone(&self.resolver);
                async move {
                    let outcome = resolver.resolve(&ip).await;
                    (ip, outcome)
                }
            })
            .buffer_unordered(self.config.rdap.max_concurrent)
            .collect()
            .await;

        for (ip, outcome) in results {
            match &outcome {
                Ok(resolution) if is_valid_org_name(&resolution.org_name) => {
                    summary.ips_resolved += 1;
                    orgs.insert(ip.clone(), display_org_name(&resolution.org_name));
                }
                Ok(resolution) => {
                    summary.ips_not_found += 1;
                    tracing::info!(ip = %ip, name = %resolution.org_name, "Resolver returned a placeholder name");
                }
                Err(failure) if failure.is_transient() => summary.ips_failed += 1,
                Err(_) => summary.ips_not_found += 1,
            }

            if let Err(e) = self.cache.store(&ip, &outcome).await {
                tracing::warn!(ip = %ip, error = %e, "Could not cache RDAP result");
            }
        }

        Ok(orgs)
    }

    /// Resolve addresses for the operator: cache, then resolver
    pub async fn lookup_ips(&self, ips: &[String]) -> EnrichResult<Vec<IpLookup>> {
        let mut lookups = Vec::with_capacity(ips.len());
        for ip in ips {
            let ip = ip.trim().to_string();
            if let Some(org) = self.cache.lookup(&ip).await? {
                lookups.push(IpLookup {
                    outcome: Ok(Resolution::new(org, ResolutionSource::Cache)),
                    ip,
                    cached: true,
                });
                continue;
            }

            let outcome = self.resolver.resolve(&ip).await;
            self.cache.store(&ip, &outcome).await?;
            lookups.push(IpLookup {
                ip,
                outcome,
                cached: false,
            });
        }
        Ok(lookups)
    }

    /// Seed the change-tracking baseline for every included site
    pub async fn establish_baseline(&self) -> EnrichResult<usize> {
        let snapshot = Snapshot::load(&self.db).await?;
        let sites: Vec<(String, SiteFingerprint)> = snapshot
            .included_sites(&self.config.reconcile)
            .map(|site| (site.to_string(), snapshot.fingerprint(site)))
            .collect();
        self.tracker.establish_baseline(sites).await
    }

    /// Store an override and force the site through the next run
    pub async fn set_override(&self, manual: &ManualOverride) -> EnrichResult<()> {
        overrides::set_override(&self.db, manual).await?;
        self.tracker.invalidate(manual.network_name.trim()).await?;
        Ok(())
    }

    /// Remove an override; the site is reprocessed on the next run
    pub async fn clear_override(&self, network_name: &str, slot: WanSlot) -> EnrichResult<bool> {
        let removed = overrides::clear_override(&self.db, network_name, slot).await?;
        if removed {
            self.tracker.invalidate(network_name.trim()).await?;
        } else {
            tracing::info!(network = network_name, slot = %slot, "No override to clear");
        }
        Ok(removed)
    }
}
