//! Device notes parser
//!
//! Meraki device notes carry provider and speed per uplink as loose text,
//! e.g. `WAN 1 Comcast 300M x 30M WAN 2 VZW Cell`. This module splits the
//! text into WAN1/WAN2 segments and extracts a display provider and a
//! normalized speed (`300.0M x 30.0M`, `Cell`, `Satellite`) from each.

use dsrc_common::db::WanSlot;
use once_cell::sync::Lazy;
use regex::Regex;

static WAN1_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bWAN\s*1\b\s*:?\s*").expect("valid WAN1 regex"));
static WAN2_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bWAN\s*2\b\s*:?\s*").expect("valid WAN2 regex"));
static SPEED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*([MG]B?)\s*x\s*(\d+(?:\.\d+)?)\s*([MG]B?)")
        .expect("valid speed regex")
});
static NOISE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\s*(?:##.*?##|\b(?:imei|kitp|serial|port|location|in the bay|up front|wireless gateway|poe injector|supported through|static ip|subnet mask|gateway ip|service id|circuit id|ip address|currently)\b.*$)",
    )
    .expect("valid noise regex")
});
static PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(?:not\s*dsr|dsr|agg)\s+").expect("valid prefix regex"));
static DISALLOWED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^\w\s.&|-]").expect("valid character regex"));

/// Provider and speed for one uplink as written in device notes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotesSlot {
    pub provider: String,
    pub speed: String,
}

impl NotesSlot {
    pub fn new(provider: impl Into<String>, speed: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            speed: speed.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.provider.is_empty() && self.speed.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedNotes {
    pub wan1: NotesSlot,
    pub wan2: NotesSlot,
}

impl ParsedNotes {
    pub fn slot(&self, slot: WanSlot) -> &NotesSlot {
        match slot {
            WanSlot::Wan1 => &self.wan1,
            WanSlot::Wan2 => &self.wan2,
        }
    }
}

/// Parse raw device notes into per-uplink provider/speed pairs.
///
/// Text before any WAN marker belongs to WAN1; notes with only a WAN2
/// marker leave WAN1 empty.
pub fn parse_notes(raw: &str) -> ParsedNotes {
    let text = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if text.is_empty() {
        return ParsedNotes::default();
    }

    let (wan1_text, wan2_text) = match WAN1_MARKER.find(&text) {
        Some(wan1) => {
            let after = &text[wan1.end()..];
            match WAN2_MARKER.find(after) {
                Some(wan2) => (after[..wan2.start()].trim(), after[wan2.end()..].trim()),
                None => (after.trim(), ""),
            }
        }
        None => match WAN2_MARKER.find(&text) {
            Some(wan2) => ("", text[wan2.end()..].trim()),
            None => (text.as_str(), ""),
        },
    };

    ParsedNotes {
        wan1: parse_segment(wan1_text),
        wan2: parse_segment(wan2_text),
    }
}

fn parse_segment(segment: &str) -> NotesSlot {
    let segment = segment.trim();
    if segment.is_empty() {
        return NotesSlot::default();
    }

    if let Some(caps) = SPEED.captures(segment) {
        let up = to_megabits(&caps[1], &caps[2]);
        let down = to_megabits(&caps[3], &caps[4]);
        let start = caps.get(0).map(|m| m.start()).unwrap_or(0);
        return NotesSlot::new(
            clean_provider(&segment[..start]),
            format!("{:.1}M x {:.1}M", up, down),
        );
    }

    let lower = segment.to_lowercase();
    match lower.as_str() {
        "unknown" => return NotesSlot::default(),
        // A bare carrier word is a speed marker with no named provider
        "cell" => return NotesSlot::new("", "Cell"),
        "satellite" => return NotesSlot::new("", "Satellite"),
        "cell cell" => return NotesSlot::new("VZW Cell", "Cell"),
        "dig" | "digi" => return NotesSlot::new("Digi", "Cell"),
        _ => {}
    }

    if lower.ends_with(" cell") {
        let provider = segment
            .get(..segment.len().saturating_sub(" cell".len()))
            .unwrap_or(segment);
        return NotesSlot::new(clean_provider(provider), "Cell");
    }
    if lower.contains("starlink") && lower.contains("satellite") {
        return NotesSlot::new("Starlink", "Satellite");
    }
    if lower.contains("verizon business") && segment.len() < 20 {
        return NotesSlot::new("Verizon Business", "Cell");
    }
    if lower.contains("vz gateway") || lower.contains("vzg") {
        return NotesSlot::new("VZW Cell", "Cell");
    }
    if lower.contains("accelerated") {
        return NotesSlot::new("Accelerated", "Cell");
    }

    NotesSlot::new(clean_provider(segment), "")
}

fn to_megabits(value: &str, unit: &str) -> f64 {
    let value: f64 = value.parse().unwrap_or(0.0);
    if unit.to_uppercase().starts_with('G') {
        value * 1000.0
    } else {
        value
    }
}

/// Display form of a provider label from notes
pub fn clean_provider(text: &str) -> String {
    let without_noise = NOISE.replace(text, "");
    let without_prefix = PREFIX.replace(without_noise.trim(), "");
    let cleaned = DISALLOWED.replace_all(&without_prefix, " ");
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_both_slots_with_speeds() {
        let parsed = parse_notes("WAN 1 Comcast 300M x 30M WAN 2 VZW Cell");
        assert_eq!(parsed.wan1, NotesSlot::new("Comcast", "300.0M x 30.0M"));
        assert_eq!(parsed.wan2, NotesSlot::new("VZW", "Cell"));
    }

    #[test]
    fn test_gigabit_and_multiline() {
        let parsed = parse_notes("WAN1: AT&T 1G x 1G\nWAN2: Starlink Satellite");
        assert_eq!(parsed.wan1, NotesSlot::new("AT&T", "1000.0M x 1000.0M"));
        assert_eq!(parsed.wan2, NotesSlot::new("Starlink", "Satellite"));
    }

    #[test]
    fn test_marker_must_end_at_the_digit() {
        let parsed = parse_notes("WAN1 Cox 100M x 10M WAN 20 spare");
        assert_eq!(parsed.wan1, NotesSlot::new("Cox", "100.0M x 10.0M"));
        assert!(parsed.wan2.is_empty());

        assert_eq!(parse_notes("WAN 10 Comcast").wan1.provider, "WAN 10 Comcast");
        assert_eq!(parse_notes("WAN1x Cox").wan1.provider, "WAN1x Cox");
        assert_eq!(parse_notes("wan1:Cox wan2:Digi").wan2, NotesSlot::new("Digi", "Cell"));
    }

    #[test]
    fn test_unmarked_text_is_wan1() {
        let parsed = parse_notes("Frontier Fios 500MB x 500MB");
        assert_eq!(parsed.wan1, NotesSlot::new("Frontier Fios", "500.0M x 500.0M"));
        assert!(parsed.wan2.is_empty());
    }

    #[test]
    fn test_only_wan2_marker() {
        let parsed = parse_notes("WAN2 Digi");
        assert!(parsed.wan1.is_empty());
        assert_eq!(parsed.slot(WanSlot::Wan2), &NotesSlot::new("Digi", "Cell"));
    }

    #[test]
    fn test_blank_and_unknown() {
        assert_eq!(parse_notes("   \n "), ParsedNotes::default());
        assert!(parse_notes("WAN1 Unknown").wan1.is_empty());
    }

    #[test]
    fn test_cellular_shorthands() {
        assert_eq!(parse_notes("WAN2 VZ Gateway 12").wan2, NotesSlot::new("VZW Cell", "Cell"));
        assert_eq!(parse_notes("WAN2 Cell Cell").wan2, NotesSlot::new("VZW Cell", "Cell"));
        assert_eq!(parse_notes("WAN2 Verizon Business").wan2, NotesSlot::new("Verizon Business", "Cell"));
        assert_eq!(parse_notes("WAN2 Accelerated 6300").wan2, NotesSlot::new("Accelerated", "Cell"));
    }

    #[test]
    fn test_bare_carrier_word_is_speed_only() {
        let parsed = parse_notes("WAN1 Cell");
        assert_eq!(parsed.wan1, NotesSlot::new("", "Cell"));
    }

    #[test]
    fn test_provider_without_speed() {
        let parsed = parse_notes("WAN1 Cox Business WAN2 ");
        assert_eq!(parsed.wan1, NotesSlot::new("Cox Business", ""));
        assert!(parsed.wan2.is_empty());
    }

    #[test]
    fn test_clean_provider_drops_noise_and_prefix() {
        assert_eq!(clean_provider("Spectrum ## circuit 1234 ##"), "Spectrum");
        assert_eq!(clean_provider("Comcast Workplace Circuit ID 12345"), "Comcast Workplace");
        assert_eq!(clean_provider("DSR Frontier Fios"), "Frontier Fios");
        assert_eq!(clean_provider("AT&T (fiber)!"), "AT&T fiber");
    }
}
