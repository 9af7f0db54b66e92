//! Index permutations ("mappings") applied to column payloads.
//!
//! A mapping is a `Vec<i32>` the same length as the column it targets (or
//! shorter, for a sub-selection): `mapping[i]` names which source row
//! supplies the `i`-th row of the mapped view, or [`MISSING`] if the row has
//! no source and should read as null.

/// Sentinel meaning "no source row"; the mapped row reads as null.
pub const MISSING: i32 = -1;

/// Applies `mapping` against `source`, producing one output element per
/// mapping entry. Out-of-range and [`MISSING`] entries fill with `missing`.
#[must_use]
pub fn apply<T: Clone>(source: &[T], mapping: &[i32], missing: T) -> Vec<T> {
    mapping
        .iter()
        .map(|&idx| {
            if idx >= 0 && (idx as usize) < source.len() {
                source[idx as usize].clone()
            } else {
                missing.clone()
            }
        })
        .collect()
}

/// Composes two mappings so that `compose(outer, inner)` applied to a
/// source is equivalent to applying `inner` then `outer`:
/// `compose(outer, inner)[i] = outer[inner[i]]` (or [`MISSING`] if either
/// side is out of range).
#[must_use]
pub fn compose(outer: &[i32], inner: &[i32]) -> Vec<i32> {
    inner
        .iter()
        .map(|&idx| {
            if idx >= 0 && (idx as usize) < outer.len() {
                outer[idx as usize]
            } else {
                MISSING
            }
        })
        .collect()
}

/// Whether `mapping` is the identity permutation over `0..len`.
#[must_use]
pub fn is_identity(mapping: &[i32], len: usize) -> bool {
    mapping.len() == len && mapping.iter().enumerate().all(|(i, &m)| m as usize == i)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_substitutes_missing_for_out_of_range() {
        let source = vec!["a", "b", "c"];
        let mapping = vec![2, MISSING, 5, 0];
        let mapped = apply(&source, &mapping, "?");
        assert_eq!(mapped, vec!["c", "?", "?", "a"]);
    }

    #[test]
    fn compose_matches_sequential_application() {
        let inner = vec![3, 2, 1, 0];
        let outer = vec![1, 0, MISSING, 2];

        let composed = compose(&outer, &inner);
        let two_step: Vec<i32> = inner
            .iter()
            .map(|&i| if i >= 0 { outer[i as usize] } else { MISSING })
            .collect();
        assert_eq!(composed, two_step);
    }

    #[test]
    fn identity_detection() {
        assert!(is_identity(&[0, 1, 2], 3));
        assert!(!is_identity(&[0, 2, 1], 3));
        assert!(!is_identity(&[0, 1], 3));
    }
}
