//! Reconciliation engine
//!
//! Merges one site's DSR circuits, appliance data, ARIN organizations and
//! manual overrides into an `EnrichedCircuitRecord`. Pure and deterministic:
//! the same inputs always produce the same record.
//!
//! **Precedence per WAN slot (highest first):**
//! 1. Manual override
//! 2. Enabled circuit assigned to the slot (`dsr_verified` only for `csv_import` rows)
//! 3. Device notes (provider, or a carrier class found in the notes speed)
//! 4. ARIN organization of the slot's IP
//!
//! **Confidence:**
//! - Override: 1.0
//! - DSR corroborated by ARIN: 1.0, otherwise 0.9
//! - Circuit from any other source (Non-DSR, enriched_sync, ...): 0.75
//! - Device notes corroborated by ARIN: 0.8, otherwise 0.6
//! - Carrier class from speed: 0.5
//! - ARIN only: 0.4
//! - Nothing: 0.0

use crate::services::notes_parser::{parse_notes, NotesSlot, ParsedNotes};
use crate::services::provider_matcher::ProviderMatcher;
use dsrc_common::config::CarrierKind;
use dsrc_common::db::{
    CircuitRecord, DeviceRecord, EnrichedCircuitRecord, EnrichedSlot, ManualOverride,
    ProviderSource, WanSlot,
};
use std::cmp::Ordering;
use std::collections::HashMap;

const CONFIDENCE_OVERRIDE: f64 = 1.0;
const CONFIDENCE_DSR_CORROBORATED: f64 = 1.0;
const CONFIDENCE_DSR: f64 = 0.9;
const CONFIDENCE_NON_DSR: f64 = 0.75;
const CONFIDENCE_NOTES_CORROBORATED: f64 = 0.8;
const CONFIDENCE_NOTES: f64 = 0.6;
const CONFIDENCE_CARRIER_SPEED: f64 = 0.5;
const CONFIDENCE_ARIN: f64 = 0.4;

/// Everything known about one site for a single reconciliation
#[derive(Debug, Clone)]
pub struct SiteInputs<'a> {
    pub network_name: &'a str,
    pub device: Option<&'a DeviceRecord>,
    /// DSR circuits of the site, any status
    pub circuits: &'a [CircuitRecord],
    pub overrides: &'a [ManualOverride],
    /// Valid ARIN organization per IP
    pub arin_orgs: &'a HashMap<String, String>,
    pub notes: ParsedNotes,
}

impl<'a> SiteInputs<'a> {
    /// Gather inputs, parsing the device notes
    pub fn new(
        network_name: &'a str,
        device: Option<&'a DeviceRecord>,
        circuits: &'a [CircuitRecord],
        overrides: &'a [ManualOverride],
        arin_orgs: &'a HashMap<String, String>,
    ) -> Self {
        let notes = device.map(|d| parse_notes(&d.notes)).unwrap_or_default();
        Self {
            network_name,
            device,
            circuits,
            overrides,
            arin_orgs,
            notes,
        }
    }

    fn ip(&self, slot: WanSlot) -> Option<&'a str> {
        self.device.and_then(|d| d.ip(slot))
    }

    fn arin_org(&self, slot: WanSlot) -> Option<&'a str> {
        self.ip(slot)
            .and_then(|ip| self.arin_orgs.get(ip))
            .map(String::as_str)
    }

    fn override_for(&self, slot: WanSlot) -> Option<&'a ManualOverride> {
        self.overrides.iter().find(|o| o.slot == slot)
    }
}

/// Reconciliation engine
pub struct Reconciler {
    matcher: ProviderMatcher,
}

impl Reconciler {
    pub fn new(matcher: ProviderMatcher) -> Self {
        Self { matcher }
    }

    pub fn matcher(&self) -> &ProviderMatcher {
        &self.matcher
    }

    /// Build the enriched record for one site
    pub fn reconcile(&self, inputs: &SiteInputs<'_>) -> EnrichedCircuitRecord {
        let assigned = self.assign_circuits(inputs);
        let mut review_notes = Vec::new();

        let wan1 = self.resolve_slot(inputs, WanSlot::Wan1, &assigned[0], &mut review_notes);
        let wan2 = self.resolve_slot(inputs, WanSlot::Wan2, &assigned[1], &mut review_notes);

        EnrichedCircuitRecord {
            network_name: inputs.network_name.to_string(),
            wan1,
            wan2,
            needs_review: !review_notes.is_empty(),
            review_notes,
        }
    }

    /// Enabled circuits per slot. A circuit whose start IP equals a WAN IP
    /// belongs to that slot; otherwise Primary → WAN1, Secondary → WAN2.
    /// IP-matched circuits shadow purpose-matched ones on the same slot.
    fn assign_circuits<'c>(&self, inputs: &SiteInputs<'c>) -> [Vec<&'c CircuitRecord>; 2] {
        let mut by_ip: [Vec<&CircuitRecord>; 2] = [Vec::new(), Vec::new()];
        let mut by_purpose: [Vec<&CircuitRecord>; 2] = [Vec::new(), Vec::new()];

        for circuit in inputs.circuits {
            if !circuit.is_enabled() || circuit.provider_name.trim().is_empty() {
                continue;
            }

            let circuit_ip = circuit
                .ip_address_start
                .as_deref()
                .map(str::trim)
                .filter(|ip| !ip.is_empty());
            let ip_slot = circuit_ip.and_then(|ip| {
                WanSlot::ALL
                    .into_iter()
                    .find(|slot| inputs.ip(*slot) == Some(ip))
            });

            if let Some(slot) = ip_slot {
                by_ip[slot_index(slot)].push(circuit);
            } else if let Some(slot) = WanSlot::from_purpose(&circuit.purpose) {
                by_purpose[slot_index(slot)].push(circuit);
            }
        }

        let [ip1, ip2] = by_ip;
        let [p1, p2] = by_purpose;
        [
            if ip1.is_empty() { p1 } else { ip1 },
            if ip2.is_empty() { p2 } else { ip2 },
        ]
    }

    fn resolve_slot(
        &self,
        inputs: &SiteInputs<'_>,
        slot: WanSlot,
        candidates: &[&CircuitRecord],
        review_notes: &mut Vec<String>,
    ) -> EnrichedSlot {
        let ip = inputs.ip(slot);
        let arin_org = inputs.arin_org(slot);
        let notes = inputs.notes.slot(slot);
        let circuit = self.pick_circuit(inputs.network_name, slot, candidates, review_notes);

        let mut enriched = EnrichedSlot::empty(slot);
        enriched.ip = ip.map(str::to_string);
        enriched.arin_org = arin_org.map(str::to_string);
        if let Some(circuit) = circuit {
            let purpose = circuit.purpose.as_str().trim();
            if !purpose.is_empty() {
                enriched.circuit_role = purpose.to_string();
            }
        }

        if let Some(manual) = inputs.override_for(slot) {
            enriched.provider = manual.provider.trim().to_string();
            enriched.speed = manual
                .speed
                .clone()
                .filter(|s| !s.trim().is_empty())
                .or_else(|| {
                    circuit
                        .map(|c| c.speed.trim().to_string())
                        .filter(|s| !s.is_empty())
                })
                .unwrap_or_else(|| notes.speed.clone());
            enriched.monthly_cost = manual.monthly_cost.or_else(|| circuit.and_then(|c| c.monthly_cost));
            enriched.confidence = CONFIDENCE_OVERRIDE;
            enriched.source = ProviderSource::ManualOverride;
            enriched.override_by = Some(manual.override_by.clone());
        } else if let Some(circuit) = circuit {
            self.apply_circuit(&mut enriched, circuit, notes, arin_org);
        } else if !notes.provider.is_empty() {
            enriched.provider = notes.provider.clone();
            enriched.speed = notes.speed.clone();
            enriched.confidence = if self.corroborated(&notes.provider, arin_org) {
                CONFIDENCE_NOTES_CORROBORATED
            } else {
                CONFIDENCE_NOTES
            };
            enriched.source = ProviderSource::DeviceNotes;
        } else if let Some(class) = self.matcher.carrier_class(&notes.speed) {
            enriched.provider = class.label.clone();
            enriched.speed = notes.speed.clone();
            enriched.confidence = CONFIDENCE_CARRIER_SPEED;
            enriched.source = ProviderSource::CarrierSpeed;
        } else if let Some(org) = arin_org {
            enriched.provider = org.to_string();
            enriched.speed = notes.speed.clone();
            enriched.confidence = CONFIDENCE_ARIN;
            enriched.source = ProviderSource::Arin;
        }

        let declared = circuit.map(|c| c.provider_name.as_str()).unwrap_or("");
        enriched.speed = self.finalize_speed(&enriched.speed, &[enriched.provider.as_str(), declared]);
        enriched
    }

    fn apply_circuit(
        &self,
        enriched: &mut EnrichedSlot,
        circuit: &CircuitRecord,
        notes: &NotesSlot,
        arin_org: Option<&str>,
    ) {
        let declared = circuit.provider_name.trim();

        // A placeholder ("Cell") gives way to a concrete name for display;
        // verification still follows the DSR record
        enriched.provider = if self.matcher.is_generic(declared) {
            self.concrete_alternative(notes, arin_org)
                .unwrap_or(declared)
                .to_string()
        } else {
            declared.to_string()
        };

        enriched.speed = if circuit.speed.trim().is_empty() {
            notes.speed.clone()
        } else {
            circuit.speed.trim().to_string()
        };
        enriched.monthly_cost = circuit.monthly_cost;
        enriched.dsr_verified = circuit.is_dsr_authoritative();

        if circuit.is_dsr_authoritative() {
            enriched.source = ProviderSource::Dsr;
            enriched.confidence = if self.corroborated(&enriched.provider, arin_org) {
                CONFIDENCE_DSR_CORROBORATED
            } else {
                CONFIDENCE_DSR
            };
        } else {
            enriched.source = ProviderSource::NonDsr;
            enriched.confidence = CONFIDENCE_NON_DSR;
        }
    }

    fn concrete_alternative<'n>(&self, notes: &'n NotesSlot, arin_org: Option<&'n str>) -> Option<&'n str> {
        let from_notes = Some(notes.provider.as_str())
            .filter(|p| !p.is_empty() && !self.matcher.is_generic(p));
        from_notes.or(arin_org)
    }

    fn corroborated(&self, provider: &str, arin_org: Option<&str>) -> bool {
        arin_org
            .map(|org| self.matcher.providers_match(provider, org).matched)
            .unwrap_or(false)
    }

    /// Deterministic choice among enabled circuits claiming one slot
    fn pick_circuit<'c>(
        &self,
        network_name: &str,
        slot: WanSlot,
        candidates: &[&'c CircuitRecord],
        review_notes: &mut Vec<String>,
    ) -> Option<&'c CircuitRecord> {
        let mut sorted: Vec<&CircuitRecord> = candidates.to_vec();
        sorted.sort_by(|a, b| compare_circuits(a, b));
        let chosen = sorted.first().copied()?;

        if sorted.len() > 1 {
            let providers: Vec<&str> = sorted.iter().map(|c| c.provider_name.trim()).collect();
            tracing::warn!(
                network = network_name,
                slot = %slot,
                count = sorted.len(),
                chosen = chosen.provider_name.trim(),
                "Multiple enabled DSR circuits claim one WAN slot"
            );
            review_notes.push(format!(
                "{}: {} enabled DSR circuits ({}); using {}",
                slot,
                sorted.len(),
                providers.join(", "),
                chosen.provider_name.trim()
            ));
        }
        Some(chosen)
    }

    /// Cellular and satellite circuits show `Cell` / `Satellite` when no
    /// concrete speed is known
    fn finalize_speed(&self, speed: &str, providers: &[&str]) -> String {
        let speed = speed.trim();
        let speed_class = self.matcher.carrier_class(speed);
        if !speed.is_empty() && speed_class.is_none() {
            return speed.to_string();
        }

        let class = speed_class.or_else(|| {
            providers
                .iter()
                .find_map(|provider| self.matcher.carrier_class(provider))
        });
        match class {
            Some(class) => match class.kind {
                CarrierKind::Cellular => "Cell".to_string(),
                CarrierKind::Satellite => "Satellite".to_string(),
            },
            None => speed.to_string(),
        }
    }
}

fn slot_index(slot: WanSlot) -> usize {
    match slot {
        WanSlot::Wan1 => 0,
        WanSlot::Wan2 => 1,
    }
}

/// DSR rows first, then provider (case-insensitive, then exact), then cost
/// (missing last), then speed
fn compare_circuits(a: &CircuitRecord, b: &CircuitRecord) -> Ordering {
    let provider_a = a.provider_name.trim();
    let provider_b = b.provider_name.trim();
    b.is_dsr_authoritative()
        .cmp(&a.is_dsr_authoritative())
        .then_with(|| provider_a.to_lowercase().cmp(&provider_b.to_lowercase()))
        .then_with(|| provider_a.cmp(provider_b))
        .then_with(|| match (a.monthly_cost, b.monthly_cost) {
            (Some(x), Some(y)) => x.total_cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
        .then_with(|| a.speed.trim().cmp(b.speed.trim()))
}
