//! RDAP response parsing
//!
//! Pulls an organization name out of an RDAP `ip network` document. The
//! network's declared name wins; otherwise the registrant entity's vCard
//! name is used, then the most recently updated organization entity.

use chrono::{DateTime, FixedOffset};
use serde_json::Value;

/// Entity names that belong to contacts rather than the owning organization
const ROLE_KEYWORDS: &[&str] = &["admin", "technical", "abuse", "noc"];
const PERSON_TITLES: &[&str] = &["Mr.", "Ms.", "Mrs.", "Dr.", "Miss"];

/// Extract the owning organization's name, if the document carries one
pub fn extract_org_name(doc: &Value) -> Option<String> {
    if let Some(name) = network_name(doc) {
        return Some(name);
    }

    let entities = doc.get("entities").and_then(Value::as_array)?;
    if let Some(name) = registrant_name(entities) {
        return Some(name);
    }

    let mut candidates = Vec::new();
    collect_org_entities(entities, &mut candidates);
    // Newest first; entities without dates sort last, stable for ties
    candidates.sort_by(|a, b| b.1.cmp(&a.1));
    candidates.into_iter().map(|(name, _)| name).next()
}

/// True when the document is a JSON object with any content at all
pub fn is_registry_document(doc: &Value) -> bool {
    doc.as_object().map(|o| !o.is_empty()).unwrap_or(false)
}

fn network_name(doc: &Value) -> Option<String> {
    if let Some(name) = doc
        .get("network")
        .and_then(|n| n.get("name"))
        .and_then(Value::as_str)
        .and_then(clean_name)
    {
        return Some(name);
    }

    let is_network = doc
        .get("objectClassName")
        .and_then(Value::as_str)
        .map(|c| c.eq_ignore_ascii_case("ip network"))
        .unwrap_or(false);
    if is_network {
        return doc.get("name").and_then(Value::as_str).and_then(clean_name);
    }
    None
}

fn registrant_name(entities: &[Value]) -> Option<String> {
    for entity in entities {
        let is_registrant = entity
            .get("roles")
            .and_then(Value::as_array)
            .map(|roles| {
                roles
                    .iter()
                    .filter_map(Value::as_str)
                    .any(|r| r.eq_ignore_ascii_case("registrant"))
            })
            .unwrap_or(false);

        if is_registrant {
            let name = vcard_field(entity, "fn")
                .and_then(clean_name)
                .or_else(|| vcard_field(entity, "org").and_then(clean_name));
            if name.is_some() {
                return name;
            }
        }

        if let Some(children) = entity.get("entities").and_then(Value::as_array) {
            if let Some(name) = registrant_name(children) {
                return Some(name);
            }
        }
    }
    None
}

fn collect_org_entities(entities: &[Value], out: &mut Vec<(String, Option<DateTime<FixedOffset>>)>) {
    for entity in entities {
        let is_org = vcard_field(entity, "kind")
            .map(|k| k.eq_ignore_ascii_case("org"))
            .unwrap_or(false);

        if is_org {
            if let Some(name) = vcard_field(entity, "fn").and_then(clean_name) {
                let lower = name.to_lowercase();
                let is_contact = PERSON_TITLES.iter().any(|t| name.contains(t))
                    || ROLE_KEYWORDS.iter().any(|k| lower.contains(k));
                if !is_contact {
                    out.push((name, latest_event(entity)));
                }
            }
        }

        if let Some(children) = entity.get("entities").and_then(Value::as_array) {
            collect_org_entities(children, out);
        }
    }
}

/// Value of a vCard property: `["vcard", [[name, {}, type, value], ...]]`
fn vcard_field<'a>(entity: &'a Value, field: &str) -> Option<&'a str> {
    let properties = entity
        .get("vcardArray")
        .and_then(Value::as_array)
        .and_then(|card| card.get(1))
        .and_then(Value::as_array)?;

    properties.iter().find_map(|prop| {
        let prop = prop.as_array()?;
        if prop.first()?.as_str()? == field {
            prop.get(3)?.as_str()
        } else {
            None
        }
    })
}

fn latest_event(entity: &Value) -> Option<DateTime<FixedOffset>> {
    entity
        .get("events")
        .and_then(Value::as_array)?
        .iter()
        .filter(|e| {
            e.get("eventAction")
                .and_then(Value::as_str)
                .map(|a| matches!(a.to_lowercase().as_str(), "registration" | "last changed"))
                .unwrap_or(false)
        })
        .filter_map(|e| e.get("eventDate").and_then(Value::as_str))
        .filter_map(|d| DateTime::parse_from_rfc3339(d).ok())
        .max()
}

fn clean_name(raw: &str) -> Option<String> {
    let name = raw.trim();
    let name = name
        .strip_prefix("Private Customer -")
        .map(str::trim)
        .unwrap_or(name);
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vcard(kind: &str, fn_name: &str) -> Value {
        json!(["vcard", [
            ["version", {}, "text", "4.0"],
            ["fn", {}, "text", fn_name],
            ["kind", {}, "text", kind]
        ]])
    }

    #[test]
    fn test_wrapped_network_name_wins() {
        let doc = json!({
            "network": { "name": "FRONTIER-FIOS" },
            "entities": [{ "roles": ["registrant"], "vcardArray": vcard("org", "Frontier Communications") }]
        });
        assert_eq!(extract_org_name(&doc).as_deref(), Some("FRONTIER-FIOS"));
    }

    #[test]
    fn test_top_level_ip_network_name() {
        let doc = json!({ "objectClassName": "ip network", "name": "ATT-INTERNET4" });
        assert_eq!(extract_org_name(&doc).as_deref(), Some("ATT-INTERNET4"));
    }

    #[test]
    fn test_registrant_entity_fallback() {
        let doc = json!({
            "objectClassName": "ip network",
            "name": "  ",
            "entities": [
                { "roles": ["abuse"], "vcardArray": vcard("group", "Abuse Desk") },
                { "roles": ["registrant"], "vcardArray": vcard("org", "Comcast Cable Communications, LLC") }
            ]
        });
        assert_eq!(
            extract_org_name(&doc).as_deref(),
            Some("Comcast Cable Communications, LLC")
        );
    }

    #[test]
    fn test_nested_registrant() {
        let doc = json!({
            "entities": [{
                "roles": ["technical"],
                "vcardArray": vcard("individual", "Jane Doe"),
                "entities": [{ "roles": ["registrant"], "vcardArray": vcard("org", "Private Customer - Cox Communications Inc.") }]
            }]
        });
        assert_eq!(extract_org_name(&doc).as_deref(), Some("Cox Communications Inc."));
    }

    #[test]
    fn test_newest_org_entity_when_no_registrant() {
        let doc = json!({
            "entities": [
                {
                    "roles": ["administrative"],
                    "vcardArray": vcard("org", "Old Telco"),
                    "events": [{ "eventAction": "last changed", "eventDate": "2010-01-01T00:00:00Z" }]
                },
                {
                    "roles": ["administrative"],
                    "vcardArray": vcard("org", "Network Admin Team"),
                    "events": [{ "eventAction": "last changed", "eventDate": "2024-01-01T00:00:00Z" }]
                },
                {
                    "roles": ["administrative"],
                    "vcardArray": vcard("org", "New Telco"),
                    "events": [{ "eventAction": "registration", "eventDate": "2020-06-01T00:00:00-05:00" }]
                }
            ]
        });
        assert_eq!(extract_org_name(&doc).as_deref(), Some("New Telco"));
    }

    #[test]
    fn test_no_name_available() {
        let doc = json!({
            "objectClassName": "ip network",
            "entities": [{ "roles": ["abuse"], "vcardArray": vcard("individual", "Someone") }]
        });
        assert_eq!(extract_org_name(&doc), None);
        assert!(is_registry_document(&doc));
        assert!(!is_registry_document(&json!({})));
        assert!(!is_registry_document(&json!([])));
    }
}
