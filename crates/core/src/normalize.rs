//! Entity normalization: canonical keys for vendor names, addresses and
//! person names.
//!
//! Every function here is total and deterministic. Malformed input never
//! fails; it yields a best-effort key flagged with [`Confidence::Low`].
//! Normalizing an already-normalized key returns it unchanged.

use std::fmt;

use serde::{Deserialize, Serialize};

// ── Confidence ──────────────────────────────────────────────────────

/// Why a normalized key could not be produced unambiguously.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LowConfidence {
    /// Input was empty after cleanup.
    Empty,
    /// Input consisted only of corporate suffixes or filler words.
    SuffixOnly,
    /// A trailing comma segment was not a recognized corporate suffix.
    UnrecognizedSuffix,
    /// Street/city/state/zip decomposition failed.
    AddressUnparsed,
}

impl fmt::Display for LowConfidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            LowConfidence::Empty => "empty after cleanup",
            LowConfidence::SuffixOnly => "only corporate suffixes or filler words",
            LowConfidence::UnrecognizedSuffix => "unrecognized trailing segment",
            LowConfidence::AddressUnparsed => "could not decompose street/city/state/zip",
        };
        f.write_str(text)
    }
}

/// Confidence attached to a normalized key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    High,
    Low(LowConfidence),
}

impl Confidence {
    pub fn is_low(&self) -> bool {
        matches!(self, Confidence::Low(_))
    }
}

// ── Word tables ─────────────────────────────────────────────────────

/// Corporate suffixes stripped from the end of vendor names.
const CORPORATE_SUFFIXES: &[&str] = &[
    "LLC",
    "INC",
    "INCORPORATED",
    "CORP",
    "CORPORATION",
    "CO",
    "COMPANY",
    "LTD",
    "LIMITED",
    "LP",
    "LLP",
    "PLLC",
    "PC",
    "PA",
    "LC",
];

/// Abbreviations expanded so spelling variants share a key.
const NAME_ABBREVIATIONS: &[(&str, &str)] = &[
    ("INTL", "INTERNATIONAL"),
    ("NATL", "NATIONAL"),
    ("SVC", "SERVICE"),
    ("SVCS", "SERVICES"),
    ("SRVCS", "SERVICES"),
    ("MGMT", "MANAGEMENT"),
    ("MGT", "MANAGEMENT"),
    ("GRP", "GROUP"),
    ("TECH", "TECHNOLOGY"),
    ("CTR", "CENTER"),
    ("ASSOC", "ASSOCIATES"),
    ("ASSN", "ASSOCIATION"),
    ("DEPT", "DEPARTMENT"),
    ("MFG", "MANUFACTURING"),
    ("ENGR", "ENGINEERING"),
    ("BROS", "BROTHERS"),
    ("SYS", "SYSTEMS"),
    ("CONST", "CONSTRUCTION"),
    ("SOLNS", "SOLUTIONS"),
];

const STREET_WORDS: &[(&str, &str)] = &[
    ("STREET", "ST"),
    ("AVENUE", "AVE"),
    ("AV", "AVE"),
    ("BOULEVARD", "BLVD"),
    ("DRIVE", "DR"),
    ("ROAD", "RD"),
    ("LANE", "LN"),
    ("COURT", "CT"),
    ("CIRCLE", "CIR"),
    ("PARKWAY", "PKWY"),
    ("HIGHWAY", "HWY"),
    ("FREEWAY", "FWY"),
    ("PLACE", "PL"),
    ("SQUARE", "SQ"),
    ("TRAIL", "TRL"),
    ("TERRACE", "TER"),
    ("EXPRESSWAY", "EXPY"),
    ("NORTH", "N"),
    ("SOUTH", "S"),
    ("EAST", "E"),
    ("WEST", "W"),
    ("NORTHEAST", "NE"),
    ("NORTHWEST", "NW"),
    ("SOUTHEAST", "SE"),
    ("SOUTHWEST", "SW"),
    ("SUITE", "STE"),
    ("APARTMENT", "APT"),
    ("BUILDING", "BLDG"),
    ("FLOOR", "FL"),
    ("ROOM", "RM"),
    ("DEPARTMENT", "DEPT"),
];

const STATES: &[(&str, &str)] = &[
    ("ALABAMA", "AL"),
    ("ALASKA", "AK"),
    ("ARIZONA", "AZ"),
    ("ARKANSAS", "AR"),
    ("CALIFORNIA", "CA"),
    ("COLORADO", "CO"),
    ("CONNECTICUT", "CT"),
    ("DELAWARE", "DE"),
    ("DISTRICT OF COLUMBIA", "DC"),
    ("FLORIDA", "FL"),
    ("GEORGIA", "GA"),
    ("HAWAII", "HI"),
    ("IDAHO", "ID"),
    ("ILLINOIS", "IL"),
    ("INDIANA", "IN"),
    ("IOWA", "IA"),
    ("KANSAS", "KS"),
    ("KENTUCKY", "KY"),
    ("LOUISIANA", "LA"),
    ("MAINE", "ME"),
    ("MARYLAND", "MD"),
    ("MASSACHUSETTS", "MA"),
    ("MICHIGAN", "MI"),
    ("MINNESOTA", "MN"),
    ("MISSISSIPPI", "MS"),
    ("MISSOURI", "MO"),
    ("MONTANA", "MT"),
    ("NEBRASKA", "NE"),
    ("NEVADA", "NV"),
    ("NEW HAMPSHIRE", "NH"),
    ("NEW JERSEY", "NJ"),
    ("NEW MEXICO", "NM"),
    ("NEW YORK", "NY"),
    ("NORTH CAROLINA", "NC"),
    ("NORTH DAKOTA", "ND"),
    ("OHIO", "OH"),
    ("OKLAHOMA", "OK"),
    ("OREGON", "OR"),
    ("PENNSYLVANIA", "PA"),
    ("RHODE ISLAND", "RI"),
    ("SOUTH CAROLINA", "SC"),
    ("SOUTH DAKOTA", "SD"),
    ("TENNESSEE", "TN"),
    ("TEXAS", "TX"),
    ("UTAH", "UT"),
    ("VERMONT", "VT"),
    ("VIRGINIA", "VA"),
    ("WASHINGTON", "WA"),
    ("WEST VIRGINIA", "WV"),
    ("WISCONSIN", "WI"),
    ("WYOMING", "WY"),
];

/// Generational suffixes and honorifics dropped from person names.
const PERSON_NOISE: &[&str] = &["JR", "SR", "II", "III", "IV", "MR", "MRS", "MS", "DR"];

fn lookup<'a>(table: &'a [(&str, &'a str)], word: &str) -> Option<&'a str> {
    table.iter().find(|(from, _)| *from == word).map(|(_, to)| *to)
}

fn is_corporate_suffix(word: &str) -> bool {
    CORPORATE_SUFFIXES.contains(&word)
}

/// Uppercase, drop periods and apostrophes, turn `&` into `AND`, and replace
/// every other non-alphanumeric character with a space.
fn clean_tokens(raw: &str) -> Vec<String> {
    let mut cleaned = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '.' | '\'' | '`' => {}
            '&' => cleaned.push_str(" AND "),
            c if c.is_alphanumeric() => cleaned.extend(c.to_uppercase()),
            _ => cleaned.push(' '),
        }
    }
    cleaned.split_whitespace().map(str::to_string).collect()
}

// ── Vendor names ────────────────────────────────────────────────────

/// Normalize a business name into a comparison key.
///
/// Uppercases, strips punctuation, collapses whitespace, expands common
/// abbreviations, and strips trailing corporate suffixes (`ACME, L.L.C.`
/// becomes `ACME`). Leading `THE`s are dropped.
pub fn normalize_name(raw: &str) -> (String, Confidence) {
    let mut confidence = Confidence::High;

    // "SMITH, JOHN" style segments are ambiguous; "ACME, INC." is not.
    if let Some((_, tail)) = raw.rsplit_once(',') {
        let tail_tokens = clean_tokens(tail);
        if !tail_tokens.is_empty() && !tail_tokens.iter().all(|t| is_corporate_suffix(t)) {
            confidence = Confidence::Low(LowConfidence::UnrecognizedSuffix);
        }
    }

    let mut tokens: Vec<String> = clean_tokens(raw)
        .into_iter()
        .map(|t| lookup(NAME_ABBREVIATIONS, &t).map(str::to_string).unwrap_or(t))
        .collect();

    if tokens.is_empty() {
        return (String::new(), Confidence::Low(LowConfidence::Empty));
    }

    while tokens.len() > 1 && tokens.last().is_some_and(|t| is_corporate_suffix(t)) {
        tokens.pop();
    }
    while tokens.len() > 1 && tokens[0] == "THE" {
        tokens.remove(0);
    }

    if tokens.len() == 1 && (is_corporate_suffix(&tokens[0]) || tokens[0] == "THE") {
        confidence = Confidence::Low(LowConfidence::SuffixOnly);
    }

    (tokens.join(" "), confidence)
}

/// Cheap blocking key for a normalized name: its first token.
pub fn blocking_key(normalized: &str) -> &str {
    normalized.split_whitespace().next().unwrap_or("")
}

// ── Person names ────────────────────────────────────────────────────

/// Normalize a person name: `LAST, FIRST M.` becomes `FIRST M LAST`, and
/// generational suffixes and honorifics are dropped.
pub fn normalize_person_name(raw: &str) -> String {
    let reordered = match raw.split_once(',') {
        Some((last, rest)) => {
            let rest_tokens = clean_tokens(rest);
            // "SMITH, JR." keeps its order.
            if rest_tokens.iter().all(|t| PERSON_NOISE.contains(&t.as_str())) {
                raw.to_string()
            } else {
                format!("{rest} {last}")
            }
        }
        None => raw.to_string(),
    };

    clean_tokens(&reordered)
        .into_iter()
        .filter(|t| !PERSON_NOISE.contains(&t.as_str()))
        .collect::<Vec<_>>()
        .join(" ")
}

// ── Addresses ───────────────────────────────────────────────────────

/// Decomposed postal address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedAddress {
    pub street: String,
    pub city: String,
    pub state: String,
    pub zip: String,
}

impl ParsedAddress {
    /// Canonical key: `STREET, CITY, ST ZIP`.
    pub fn key(&self) -> String {
        format!("{}, {}, {} {}", self.street, self.city, self.state, self.zip)
    }
}

fn address_tokens(segment: &str) -> Vec<String> {
    let mut cleaned = String::with_capacity(segment.len());
    for ch in segment.chars() {
        match ch {
            '.' => {}
            '#' => cleaned.push_str(" UNIT "),
            c if c.is_alphanumeric() || c == '-' || c == '/' => cleaned.extend(c.to_uppercase()),
            _ => cleaned.push(' '),
        }
    }
    cleaned.split_whitespace().map(str::to_string).collect()
}

fn parse_zip(token: &str) -> Option<String> {
    let five = token.split_once('-').map_or(token, |(head, _)| head);
    if five.len() == 5 && five.chars().all(|c| c.is_ascii_digit()) {
        Some(five.to_string())
    } else {
        None
    }
}

/// Match a state at the end of `tokens`; returns (abbreviation, tokens used).
fn parse_state(tokens: &[String]) -> Option<(String, usize)> {
    let last = tokens.last()?;
    if last.len() == 2 && STATES.iter().any(|(_, abbr)| abbr == last) {
        return Some((last.clone(), 1));
    }
    for width in (1..=3).rev() {
        if tokens.len() < width {
            continue;
        }
        let candidate = tokens[tokens.len() - width..].join(" ");
        if let Some(abbr) = lookup(STATES, &candidate) {
            return Some((abbr.to_string(), width));
        }
    }
    None
}

/// Decompose an address into street, city, state and zip.
pub fn parse_address(raw: &str) -> Option<ParsedAddress> {
    let mut segments: Vec<Vec<String>> = raw
        .split(',')
        .map(address_tokens)
        .filter(|tokens| !tokens.is_empty())
        .collect();

    let mut tail = segments.pop()?;
    let zip = parse_zip(tail.last()?)?;
    tail.pop();
    let (state, used) = parse_state(&tail)?;
    tail.truncate(tail.len() - used);

    let city = if tail.is_empty() {
        segments.pop()?.join(" ")
    } else {
        tail.join(" ")
    };

    let street: Vec<String> = segments
        .into_iter()
        .flatten()
        .map(|t| lookup(STREET_WORDS, &t).map(str::to_string).unwrap_or(t))
        .collect();
    if street.is_empty() || city.is_empty() {
        return None;
    }

    Some(ParsedAddress {
        street: street.join(" "),
        city,
        state,
        zip,
    })
}

/// Normalize an address into a comparison key.
///
/// Falls back to the trimmed, uppercased raw text with low confidence when
/// decomposition fails.
pub fn normalize_address(raw: &str) -> (String, Confidence) {
    if let Some(parsed) = parse_address(raw) {
        return (parsed.key(), Confidence::High);
    }
    let fallback = raw
        .split_whitespace()
        .map(str::to_uppercase)
        .collect::<Vec<_>>()
        .join(" ");
    if fallback.is_empty() {
        (fallback, Confidence::Low(LowConfidence::Empty))
    } else {
        (fallback, Confidence::Low(LowConfidence::AddressUnparsed))
    }
}

/// Normalize a tax id: keep alphanumerics, uppercase. Empty ids become `None`.
pub fn normalize_tax_id(raw: &str) -> Option<String> {
    let id: String = raw
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect();
    if id.is_empty() { None } else { Some(id) }
}
