//! Provider name matcher
//!
//! Decides whether a DSR-declared provider and an observed provider (ARIN
//! organization, device-notes label) name the same carrier.
//!
//! # Algorithm
//! 1. Normalize both names: uppercase, drop `&`, punctuation to spaces, drop
//!    corporate filler tokens (`INC`, `LLC`, `COMMUNICATIONS`, ...)
//! 2. Canonicalize through the alias table (`VZW` → `VERIZON`, `ATT` → `AT&T`)
//! 3. Equal or contained (either way) → match with score 100
//! 4. Otherwise partial-ratio similarity (0-100) against the threshold
//!
//! Carrier classes (`Cell`, `Digi`, `Starlink`, ...) are detected separately
//! because they show up in speed fields as often as in provider fields.

use dsrc_common::config::{CarrierKind, MatcherConfig};
use std::collections::HashSet;

/// Shortest normalized name allowed to match by containment or fuzzy score
const MIN_FRAGMENT_LEN: usize = 3;

/// Outcome of comparing two provider names
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchResult {
    pub matched: bool,
    /// Similarity 0-100
    pub score: u8,
}

/// A carrier-class token (cellular / satellite service)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CarrierClass {
    pub label: String,
    pub kind: CarrierKind,
    pub placeholder: bool,
    tokens: Vec<String>,
}

#[derive(Debug, Clone)]
struct Alias {
    from: Vec<String>,
    to: Vec<String>,
}

/// Table-driven provider matcher
#[derive(Debug, Clone)]
pub struct ProviderMatcher {
    threshold: u8,
    strip_tokens: HashSet<String>,
    aliases: Vec<Alias>,
    carrier_classes: Vec<CarrierClass>,
    placeholder_words: HashSet<String>,
}

impl Default for ProviderMatcher {
    fn default() -> Self {
        Self::new(&MatcherConfig::default())
    }
}

impl ProviderMatcher {
    pub fn new(config: &MatcherConfig) -> Self {
        let strip_tokens: HashSet<String> = config
            .strip_tokens
            .iter()
            .flat_map(|t| plain_tokens(t))
            .collect();

        let mut aliases: Vec<Alias> = config
            .aliases
            .iter()
            .map(|(from, to)| Alias {
                from: plain_tokens(from),
                to: plain_tokens(to),
            })
            .filter(|a| !a.from.is_empty() && !a.to.is_empty())
            .collect();
        // Longest alias first so "VERIZON WIRELESS" wins over "VZ"-style keys
        aliases.sort_by(|a, b| b.from.len().cmp(&a.from.len()).then_with(|| a.from.cmp(&b.from)));

        let carrier_classes: Vec<CarrierClass> = config
            .carrier_classes
            .iter()
            .map(|c| CarrierClass {
                label: c.label.clone(),
                kind: c.kind,
                placeholder: c.placeholder,
                tokens: plain_tokens(&c.token),
            })
            .filter(|c| !c.tokens.is_empty())
            .collect();

        let placeholder_words = carrier_classes
            .iter()
            .filter(|c| c.placeholder)
            .flat_map(|c| c.tokens.iter().cloned())
            .collect();

        Self {
            threshold: config.threshold,
            strip_tokens,
            aliases,
            carrier_classes,
            placeholder_words,
        }
    }

    pub fn threshold(&self) -> u8 {
        self.threshold
    }

    /// Comparison form of a provider name (never used for display)
    pub fn normalize(&self, name: &str) -> String {
        let all = plain_tokens(name);
        let kept: Vec<String> = all
            .iter()
            .filter(|t| !self.strip_tokens.contains(t.as_str()))
            .cloned()
            .collect();
        // "Communications" alone should not normalize to nothing
        let tokens = if kept.is_empty() { all } else { kept };
        self.apply_aliases(tokens).join(" ")
    }

    fn apply_aliases(&self, mut tokens: Vec<String>) -> Vec<String> {
        for alias in &self.aliases {
            if let Some(pos) = find_sequence(&tokens, &alias.from) {
                tokens.splice(pos..pos + alias.from.len(), alias.to.iter().cloned());
            }
        }
        tokens
    }

    /// Compare a declared provider with an observed one
    pub fn providers_match(&self, declared: &str, observed: &str) -> MatchResult {
        let a = self.normalize(declared);
        let b = self.normalize(observed);

        if a.is_empty() || b.is_empty() {
            return MatchResult { matched: false, score: 0 };
        }
        if a == b {
            return MatchResult { matched: true, score: 100 };
        }

        let a_compact = a.replace(' ', "");
        let b_compact = b.replace(' ', "");
        if a_compact == b_compact {
            return MatchResult { matched: true, score: 100 };
        }

        let (short, long) = if a_compact.chars().count() <= b_compact.chars().count() {
            (&a_compact, &b_compact)
        } else {
            (&b_compact, &a_compact)
        };

        let score = partial_ratio(&a, &b);
        if short.chars().count() < MIN_FRAGMENT_LEN {
            return MatchResult { matched: false, score };
        }
        if long.contains(short.as_str()) {
            return MatchResult { matched: true, score: 100 };
        }

        MatchResult {
            matched: score >= self.threshold,
            score,
        }
    }

    /// First carrier class whose token appears in `text` (provider or speed)
    pub fn carrier_class(&self, text: &str) -> Option<&CarrierClass> {
        let tokens = plain_tokens(text);
        if tokens.is_empty() {
            return None;
        }
        self.carrier_classes
            .iter()
            .find(|c| find_sequence(&tokens, &c.tokens).is_some())
    }

    /// True when the provider is nothing but a carrier placeholder ("Cell", "Digi")
    pub fn is_generic(&self, provider: &str) -> bool {
        let tokens = plain_tokens(provider);
        !tokens.is_empty() && tokens.iter().all(|t| self.placeholder_words.contains(t))
    }
}

/// Uppercase, `&` dropped, punctuation split, whitespace collapsed
fn plain_tokens(text: &str) -> Vec<String> {
    let cleaned: String = text
        .to_uppercase()
        .replace('&', "")
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    cleaned.split_whitespace().map(str::to_string).collect()
}

fn find_sequence(haystack: &[String], needle: &[String]) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Best similarity (0-100) of the shorter string against every equal-length
/// window of the longer one
pub fn partial_ratio(a: &str, b: &str) -> u8 {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();
    if a_chars.is_empty() || b_chars.is_empty() {
        return 0;
    }

    let (short, long) = if a_chars.len() <= b_chars.len() {
        (a_chars, b_chars)
    } else {
        (b_chars, a_chars)
    };
    let short_str: String = short.iter().collect();

    let mut best = 0.0_f64;
    for window in long.windows(short.len()) {
        let window_str: String = window.iter().collect();
        let similarity = strsim::normalized_levenshtein(&short_str, &window_str);
        if similarity > best {
            best = similarity;
            if best >= 1.0 {
                break;
            }
        }
    }

    (best * 100.0).round().clamp(0.0, 100.0) as u8
}
