//! String and vendor similarity.
//!
//! Names are compared with a token-set ratio built on normalized Levenshtein
//! distance. Vendor similarity adds a small bonus per agreeing corroborator
//! (address key, tax id).

use fraudit_core::Vendor;

/// Bonus added to the name score for each agreeing corroborator.
pub const CORROBORATION_BONUS: f64 = 0.05;

/// Levenshtein edit distance between two strings.
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let m = a.len();
    let n = b.len();

    let mut prev = (0..=n).collect::<Vec<_>>();
    let mut curr = vec![0; n + 1];

    for i in 1..=m {
        curr[0] = i;
        for j in 1..=n {
            let cost = if a[i - 1] == b[j - 1] { 0 } else { 1 };
            curr[j] = (prev[j] + 1).min(curr[j - 1] + 1).min(prev[j - 1] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[n]
}

/// Normalized edit similarity in [0, 1]. Two empty strings are identical.
pub fn ratio(a: &str, b: &str) -> f64 {
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - levenshtein(a, b) as f64 / max_len as f64
}

/// Token-set ratio: compares the shared tokens against each side's full
/// token set, so word order and extra words weigh less than spelling.
///
/// Returns 0.0 when either side has no tokens.
pub fn token_set_ratio(a: &str, b: &str) -> f64 {
    let mut ta: Vec<&str> = a.split_whitespace().collect();
    let mut tb: Vec<&str> = b.split_whitespace().collect();
    if ta.is_empty() || tb.is_empty() {
        return 0.0;
    }
    ta.sort_unstable();
    ta.dedup();
    tb.sort_unstable();
    tb.dedup();

    let common: Vec<&str> = ta.iter().filter(|t| tb.contains(t)).copied().collect();
    let only_a: Vec<&str> = ta.iter().filter(|t| !tb.contains(t)).copied().collect();
    let only_b: Vec<&str> = tb.iter().filter(|t| !ta.contains(t)).copied().collect();

    let join = |parts: &[&str], rest: &[&str]| -> String {
        parts.iter().chain(rest.iter()).copied().collect::<Vec<_>>().join(" ")
    };
    let sect = common.join(" ");
    let full_a = join(&common, &only_a);
    let full_b = join(&common, &only_b);

    let mut best = ratio(&full_a, &full_b);
    if !sect.is_empty() {
        best = best.max(ratio(&sect, &full_a)).max(ratio(&sect, &full_b));
    }
    best
}

/// Breakdown of a vendor-to-vendor comparison.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchScore {
    /// Token-set ratio of the normalized names.
    pub name: f64,
    /// Agreeing corroborators: matching address key, matching tax id.
    pub corroborations: u8,
    /// Name score plus corroboration bonus, capped at 1.0.
    pub score: f64,
}

fn agrees(a: Option<&str>, b: Option<&str>) -> bool {
    matches!((a, b), (Some(x), Some(y)) if !x.is_empty() && x == y)
}

pub fn score(a: &Vendor, b: &Vendor) -> MatchScore {
    let name = token_set_ratio(&a.normalized_name, &b.normalized_name);
    let corroborations = agrees(a.address_key.as_deref(), b.address_key.as_deref()) as u8
        + agrees(a.tax_id.as_deref(), b.tax_id.as_deref()) as u8;
    let score = (name + CORROBORATION_BONUS * corroborations as f64).min(1.0);
    MatchScore {
        name,
        corroborations,
        score,
    }
}

/// Similarity of two vendors in [0, 1].
pub fn similarity(a: &Vendor, b: &Vendor) -> f64 {
    score(a, b).score
}
