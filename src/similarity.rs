//! Label Name Hints
//!
//! Finds configured label names close to a label about to be deleted, so the
//! user can list the old name under `replaces` instead of losing its issues.

/// Minimum similarity for a configured name to be suggested
pub const HINT_THRESHOLD: f64 = 0.7;

/// Case-insensitive similarity of two names, from 0.0 (unrelated) to 1.0 (equal)
///
/// One minus the edit distance over the longer name's length in characters.
pub fn name_similarity(left: &str, right: &str) -> f64 {
    let left: Vec<char> = left.to_lowercase().chars().collect();
    let right: Vec<char> = right.to_lowercase().chars().collect();

    let longest = left.len().max(right.len());
    if longest == 0 {
        return 1.0;
    }

    1.0 - edit_distance(&left, &right) as f64 / longest as f64
}

/// Most similar configured name above [`HINT_THRESHOLD`], excluding `name` itself
///
/// Ties keep the first candidate in iteration order.
pub fn closest_label<'a, I>(name: &str, candidates: I) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    candidates
        .into_iter()
        .filter(|candidate| *candidate != name)
        .map(|candidate| (candidate, name_similarity(name, candidate)))
        .filter(|(_, score)| *score > HINT_THRESHOLD)
        .fold(None, |best: Option<(&'a str, f64)>, (candidate, score)| match best {
            Some((_, best_score)) if best_score >= score => best,
            _ => Some((candidate, score)),
        })
        .map(|(candidate, _)| candidate)
}

/// Levenshtein distance over two rows
fn edit_distance(left: &[char], right: &[char]) -> usize {
    let mut above: Vec<usize> = (0..=right.len()).collect();
    let mut row = vec![0; right.len() + 1];

    for (i, l) in left.iter().enumerate() {
        row[0] = i + 1;
        for (j, r) in right.iter().enumerate() {
            let substitution = above[j] + usize::from(l != r);
            row[j + 1] = substitution.min(above[j + 1] + 1).min(row[j] + 1);
        }
        std::mem::swap(&mut above, &mut row);
    }

    above[right.len()]
}
