//! Local lexical similarity.
//!
//! Used wherever a score is needed without consulting the oracle: candidate
//! prefiltering, duplicate-risk detection and cross-reference discovery. The
//! metric is Jaro-Winkler over normalized names.

/// Normalizes a display name for comparison: trims, lower-cases and
/// collapses internal whitespace.
#[must_use]
pub fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Jaro-Winkler similarity in [0.0, 1.0].
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
#[must_use]
pub fn jaro_winkler(a: &str, b: &str) -> f32 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();

    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let window = (a.len().max(b.len()) / 2).saturating_sub(1);
    let mut a_matched = vec![false; a.len()];
    let mut b_matched = vec![false; b.len()];
    let mut matches = 0usize;

    for (i, ca) in a.iter().enumerate() {
        let lo = i.saturating_sub(window);
        let hi = (i + window + 1).min(b.len());
        for j in lo..hi {
            if !b_matched[j] && b[j] == *ca {
                a_matched[i] = true;
                b_matched[j] = true;
                matches += 1;
                break;
            }
        }
    }

    if matches == 0 {
        return 0.0;
    }

    let mut transpositions = 0usize;
    let mut k = 0usize;
    for (i, ca) in a.iter().enumerate() {
        if !a_matched[i] {
            continue;
        }
        while !b_matched[k] {
            k += 1;
        }
        if *ca != b[k] {
            transpositions += 1;
        }
        k += 1;
    }

    let m = matches as f64;
    let t = transpositions as f64 / 2.0;
    let jaro = (m / a.len() as f64 + m / b.len() as f64 + (m - t) / m) / 3.0;

    let prefix = a
        .iter()
        .zip(b.iter())
        .take(4)
        .take_while(|(x, y)| x == y)
        .count();

    let score = jaro + prefix as f64 * 0.1 * (1.0 - jaro);
    (score.clamp(0.0, 1.0)) as f32
}

/// Similarity of two display names after normalization.
#[must_use]
pub fn name_similarity(a: &str, b: &str) -> f32 {
    let a = normalize_name(a);
    let b = normalize_name(b);
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a == b {
        return 1.0;
    }
    jaro_winkler(&a, &b)
}

/// Best pairwise similarity between two name lists.
#[must_use]
pub fn best_name_similarity(left: &[String], right: &[String]) -> f32 {
    left.iter()
        .flat_map(|l| right.iter().map(move |r| name_similarity(l, r)))
        .fold(0.0f32, f32::max)
}

/// Returns true when one name contains the other, ignoring case.
#[must_use]
pub fn names_overlap(a: &str, b: &str) -> bool {
    let a = normalize_name(a);
    let b = normalize_name(b);
    if a.is_empty() || b.is_empty() {
        return false;
    }
    a.contains(&b) || b.contains(&a)
}
