//! Enrichment services

pub mod change_tracker;
pub mod dsr_importer;
pub mod enrichment_job;
pub mod meraki_client;
pub mod notes_parser;
pub mod provider_matcher;
pub mod rdap_cache;
pub mod rdap_parser;
pub mod rdap_resolver;
pub mod reconciler;

pub use change_tracker::{ChangeTracker, SiteFingerprint};
pub use dsr_importer::{DsrImporter, ImportReport};
pub use enrichment_job::{EnrichmentJob, IpLookup, JobOptions, RunReport};
pub use meraki_client::{InventorySync, MerakiClient, SyncReport};
pub use provider_matcher::{MatchResult, ProviderMatcher};
pub use rdap_cache::RdapCache;
pub use rdap_resolver::{LookupFailure, LookupOutcome, OrgResolver, RdapResolver, Resolution, ResolutionSource};
pub use reconciler::{Reconciler, SiteInputs};
