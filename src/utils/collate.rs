use std::cmp::Ordering;
use std::collections::HashSet;
use std::hash::Hash;

/// Keeps the first row seen for each key, then stable-sorts the survivors.
///
/// Callers order the input so that the row they want to keep for a key
/// comes first (e.g. newest first).
pub fn dedup_then_sort<T, K, F, C>(rows: Vec<T>, key: F, compare: C) -> Vec<T>
where
    K: Eq + Hash,
    F: Fn(&T) -> K,
    C: FnMut(&T, &T) -> Ordering,
{
    let mut seen = HashSet::with_capacity(rows.len());
    let mut kept: Vec<T> = rows.into_iter().filter(|row| seen.insert(key(row))).collect();
    kept.sort_by(compare);
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_first_occurrence_per_key() {
        let rows = vec![("alice", 3), ("bob", 2), ("alice", 1), ("carol", 5)];
        let out = dedup_then_sort(rows, |r| r.0, |a, b| a.0.cmp(b.0));
        assert_eq!(out, vec![("alice", 3), ("bob", 2), ("carol", 5)]);
    }

    #[test]
    fn resort_is_stable_for_ties() {
        let rows = vec![("b", 1), ("a", 1), ("c", 0)];
        let out = dedup_then_sort(rows, |r| r.0, |a, b| a.1.cmp(&b.1));
        assert_eq!(out, vec![("c", 0), ("b", 1), ("a", 1)]);
    }
}
