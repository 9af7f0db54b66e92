//! Index ↔ value mapping for categorical columns.
//!
//! A [`Dictionary`] is an ordered list of values indexed from 0, where index
//! 0 is always `null` (missing). Entries may be `null` in the middle
//! ("unused"). The boolean variant is the same structure with two extra
//! tagged indices identifying which entry (if any) stands for `true` and
//! which for `false`.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, OnceLock},
};

use crate::error::{Error, Result};

/// A value a [`Dictionary`] can hold.
///
/// Restricted to `Bool`/`Str` (no floats) because the dictionary needs
/// `Eq + Hash` for [`Dictionary::create_inverse`], and these are the only
/// two cases spec-worked examples exercise: nominal (string) categoricals
/// and boolean-dictionary categoricals.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum DictKey {
    Bool(bool),
    Str(Arc<str>),
}

impl DictKey {
    pub fn str(value: impl Into<Arc<str>>) -> Self {
        DictKey::Str(value.into())
    }
}

impl From<&str> for DictKey {
    fn from(value: &str) -> Self {
        DictKey::Str(Arc::from(value))
    }
}

impl From<bool> for DictKey {
    fn from(value: bool) -> Self {
        DictKey::Bool(value)
    }
}

/// Sentinel used for `positive_index`/`negative_index` meaning "absent".
pub const ABSENT: i32 = -1;

/// Ordered index → value mapping. Index 0 is always missing.
#[derive(Debug, Clone)]
pub struct Dictionary {
    /// `values[0]` is always `None`. Other entries may also be `None`
    /// ("unused" — reserved but unoccupied raw indices).
    values: Vec<Option<DictKey>>,
    positive_index: i32,
    negative_index: i32,
    inverse: OnceLock<HashMap<DictKey, u32>>,
}

impl PartialEq for Dictionary {
    /// Two dictionaries are equal iff their value lists are equal
    /// position-wise (the boolean tags are derived from the values and are
    /// not compared independently).
    fn eq(&self, other: &Self) -> bool {
        self.values == other.values
    }
}
impl Eq for Dictionary {}

impl Dictionary {
    /// An empty dictionary containing only the reserved null entry.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            values: vec![None],
            positive_index: ABSENT,
            negative_index: ABSENT,
            inverse: OnceLock::new(),
        }
    }

    /// Builds a dictionary from an ordered, deduplicated value list (not
    /// including the reserved null entry at index 0).
    #[must_use]
    pub fn from_values(values: impl IntoIterator<Item = DictKey>) -> Self {
        let mut all = vec![None];
        all.extend(values.into_iter().map(Some));
        Self {
            values: all,
            positive_index: ABSENT,
            negative_index: ABSENT,
            inverse: OnceLock::new(),
        }
    }

    /// The number of non-null entries.
    #[must_use]
    pub fn size(&self) -> usize {
        self.values.iter().filter(|v| v.is_some()).count()
    }

    /// The highest occupied raw index, or 0 if the dictionary is empty.
    #[must_use]
    pub fn maximal_index(&self) -> u32 {
        (self.values.len() - 1) as u32
    }

    #[must_use]
    pub fn get(&self, index: u32) -> Option<&DictKey> {
        self.values.get(index as usize).and_then(Option::as_ref)
    }

    #[must_use]
    pub fn has_positive(&self) -> bool {
        self.positive_index != ABSENT
    }

    #[must_use]
    pub fn has_negative(&self) -> bool {
        self.negative_index != ABSENT
    }

    #[must_use]
    pub fn positive_index(&self) -> i32 {
        self.positive_index
    }

    #[must_use]
    pub fn negative_index(&self) -> i32 {
        self.negative_index
    }

    /// Every occupied raw index in ascending order.
    pub fn occupied_indices(&self) -> impl Iterator<Item = u32> + '_ {
        self.values
            .iter()
            .enumerate()
            .filter_map(|(i, v)| v.is_some().then_some(i as u32))
    }

    /// Inserts `value`, reusing an existing index if already present, else
    /// appending a fresh one. Returns the raw index.
    pub fn intern(&mut self, value: DictKey) -> u32 {
        if let Some(index) = self.values.iter().position(|v| v.as_ref() == Some(&value)) {
            return index as u32;
        }
        self.values.push(Some(value));
        self.inverse = OnceLock::new();
        (self.values.len() - 1) as u32
    }

    /// A value → index mapping, computed once and cached.
    pub fn create_inverse(&self) -> &HashMap<DictKey, u32> {
        self.inverse.get_or_init(|| {
            self.values
                .iter()
                .enumerate()
                .filter_map(|(i, v)| v.clone().map(|v| (v, i as u32)))
                .collect()
        })
    }

    /// Converts a ≤2-value categorical dictionary into a boolean dictionary.
    ///
    /// `positive_value`, if `Some`, names the entry that becomes the
    /// positive index; the other (if any) becomes negative. If
    /// `positive_value` is `None`, the sole remaining entry is marked
    /// negative.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TooManyValues`] if the dictionary has more than two
    /// non-null entries.
    pub fn to_boolean(&self, positive_value: Option<&DictKey>) -> Result<Dictionary> {
        let occupied: Vec<u32> = self.occupied_indices().collect();
        if occupied.len() > 2 {
            return Err(Error::TooManyValues(format!(
                "dictionary has {} values, boolean dictionaries hold at most 2",
                occupied.len()
            )));
        }

        let mut out = self.clone();
        out.inverse = OnceLock::new();
        out.positive_index = ABSENT;
        out.negative_index = ABSENT;

        match positive_value {
            Some(positive) => {
                let positive_idx = occupied
                    .iter()
                    .copied()
                    .find(|&i| out.values[i as usize].as_ref() == Some(positive));
                if let Some(idx) = positive_idx {
                    out.positive_index = idx as i32;
                }
                if let Some(negative_idx) = occupied.iter().copied().find(|&i| Some(i) != positive_idx)
                {
                    out.negative_index = negative_idx as i32;
                }
            }
            None => {
                if let Some(&only) = occupied.first() {
                    out.negative_index = only as i32;
                }
            }
        }
        Ok(out)
    }

    /// `REMOVE`: null out entries not referenced in `used`, leaving gaps and
    /// raw indices of surviving entries unchanged.
    ///
    /// `COMPACT`: drop unused entries and renumber the survivors
    /// sequentially starting at 1.
    ///
    /// Returns the new dictionary and an `old_to_new` map (indexed by old
    /// raw index) giving the row's new raw index, or `-1` if the row's
    /// category was removed.
    #[must_use]
    pub fn remove_unused(&self, used: &HashSet<u32>, policy: UnusedPolicy) -> (Dictionary, Vec<i32>) {
        let mut removed = self.clone();
        removed.inverse = OnceLock::new();
        for (i, slot) in removed.values.iter_mut().enumerate() {
            if i != 0 && !used.contains(&(i as u32)) {
                *slot = None;
            }
        }
        // Positive/negative survive only if their entries are still present.
        if removed.values.get(removed.positive_index.max(0) as usize).map(Option::is_none).unwrap_or(true) {
            removed.positive_index = ABSENT;
        }
        if removed.values.get(removed.negative_index.max(0) as usize).map(Option::is_none).unwrap_or(true) {
            removed.negative_index = ABSENT;
        }

        match policy {
            UnusedPolicy::Remove => {
                let identity = (0..self.values.len() as i32).collect();
                (removed, identity)
            }
            UnusedPolicy::Compact => removed.compact(),
        }
    }

    /// Closes gaps left by `null` entries in the middle of the value list,
    /// renumbering survivors sequentially. Identity if there are no gaps.
    #[must_use]
    pub fn compact(&self) -> (Dictionary, Vec<i32>) {
        let mut old_to_new = vec![crate::mapping::MISSING; self.values.len()];
        let mut new_values = Vec::with_capacity(self.values.len());
        new_values.push(None);
        old_to_new[0] = 0;

        let mut new_positive = ABSENT;
        let mut new_negative = ABSENT;
        for (old_idx, slot) in self.values.iter().enumerate().skip(1) {
            if let Some(value) = slot {
                new_values.push(Some(value.clone()));
                let new_idx = (new_values.len() - 1) as i32;
                old_to_new[old_idx] = new_idx;
                if old_idx as i32 == self.positive_index {
                    new_positive = new_idx;
                }
                if old_idx as i32 == self.negative_index {
                    new_negative = new_idx;
                }
            }
        }

        (
            Dictionary {
                values: new_values,
                positive_index: new_positive,
                negative_index: new_negative,
                inverse: OnceLock::new(),
            },
            old_to_new,
        )
    }

    /// Replaces a single entry's value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IllegalReplacement`] if `new` already names a
    /// different existing entry.
    pub fn replace_single(&self, old: &DictKey, new: DictKey) -> Result<Dictionary> {
        if self.create_inverse().contains_key(&new) && self.create_inverse().get(&new) != self.create_inverse().get(old) {
            return Err(Error::IllegalReplacement);
        }
        let mut out = self.clone();
        out.inverse = OnceLock::new();
        for slot in &mut out.values {
            if slot.as_ref() == Some(old) {
                *slot = Some(new.clone());
            }
        }
        Ok(out)
    }

    /// Applies a batch rename, order-independent, supporting permutations
    /// and cycles among existing values.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IllegalReplacement`] if two sources would collapse
    /// onto a target that itself survives unchanged.
    pub fn replace_many(&self, renames: &HashMap<DictKey, DictKey>) -> Result<Dictionary> {
        let resolved = resolve_fixed_point(renames);

        let mut groups: HashMap<DictKey, Vec<DictKey>> = HashMap::new();
        for value in self.values.iter().flatten() {
            let target = resolved.get(value).cloned().unwrap_or_else(|| value.clone());
            groups.entry(target).or_default().push(value.clone());
        }

        for (target, originals) in &groups {
            if originals.len() > 1 {
                let target_survives_as_itself =
                    self.create_inverse().contains_key(target) && !resolved.contains_key(target);
                if target_survives_as_itself {
                    return Err(Error::IllegalReplacement);
                }
            }
        }

        let mut out = self.clone();
        out.inverse = OnceLock::new();
        for slot in &mut out.values {
            if let Some(value) = slot {
                if let Some(target) = resolved.get(value) {
                    *value = target.clone();
                }
            }
        }
        Ok(out)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnusedPolicy {
    Remove,
    Compact,
}

/// Resolves a rename map to its fixed point: chains collapse to their sink,
/// cycles resolve as a single-step permutation.
fn resolve_fixed_point(renames: &HashMap<DictKey, DictKey>) -> HashMap<DictKey, DictKey> {
    let mut resolved = HashMap::with_capacity(renames.len());
    for start in renames.keys() {
        let mut seen = vec![start.clone()];
        let mut current = start;
        let target = loop {
            match renames.get(current) {
                None => break current.clone(),
                Some(next) => {
                    if seen.iter().any(|v| v == next) {
                        // Cycle: resolves as a single application, not a collapse.
                        break renames[start].clone();
                    }
                    seen.push(next.clone());
                    current = next;
                }
            }
        };
        resolved.insert(start.clone(), target);
    }
    resolved
}

/// Result of [`Dictionary::merge_with`]: the merged dictionary, and a raw
/// index remap (old `src` index → new merged index).
pub struct Merged {
    pub dictionary: Dictionary,
    pub src_old_to_new: Vec<i32>,
}

impl Dictionary {
    /// Produces a dictionary whose prefix equals `template`'s and whose
    /// suffix appends values present only in `self`. Returns a remap from
    /// `self`'s raw indices to the merged dictionary's raw indices.
    #[must_use]
    pub fn merge_with(&self, template: &Dictionary) -> Merged {
        let mut merged = template.clone();
        merged.inverse = OnceLock::new();

        let mut src_old_to_new = vec![0i32; self.values.len()];
        for (old_idx, slot) in self.values.iter().enumerate() {
            src_old_to_new[old_idx] = match slot {
                None => 0,
                Some(value) => merged.intern(value.clone()) as i32,
            };
        }

        // Boolean-ness survives only if neither side introduced a third value.
        let total_non_null = merged.size();
        if total_non_null <= 2 {
            if self.has_positive() {
                if let Some(v) = self.get(self.positive_index as u32) {
                    merged.positive_index = *merged.create_inverse().get(v).unwrap() as i32;
                }
            } else if template.has_positive() {
                if let Some(v) = template.get(template.positive_index as u32) {
                    merged.positive_index = *merged.create_inverse().get(v).unwrap() as i32;
                }
            }
            if self.has_negative() {
                if let Some(v) = self.get(self.negative_index as u32) {
                    merged.negative_index = *merged.create_inverse().get(v).unwrap() as i32;
                }
            } else if template.has_negative() {
                if let Some(v) = template.get(template.negative_index as u32) {
                    merged.negative_index = *merged.create_inverse().get(v).unwrap() as i32;
                }
            }
        } else {
            merged.positive_index = ABSENT;
            merged.negative_index = ABSENT;
        }

        Merged {
            dictionary: merged,
            src_old_to_new,
        }
    }

    /// Maps every raw index whose value is absent from `template` to
    /// `crate::mapping::MISSING`; others map to `template`'s index for the
    /// same value.
    #[must_use]
    pub fn change_to(&self, template: &Dictionary) -> Vec<i32> {
        let inverse = template.create_inverse();
        self.values
            .iter()
            .map(|slot| match slot {
                None => 0,
                Some(value) => *inverse.get(value).unwrap_or(&(crate::mapping::MISSING as u32)) as i32,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dict(values: &[&str]) -> Dictionary {
        Dictionary::from_values(values.iter().map(|v| DictKey::str(*v)))
    }

    #[test]
    fn nominal_dictionary_value_list_and_indices() {
        // scenario 1 of spec §8: green/red/null/red/null
        let mut d = Dictionary::empty();
        let mut indices = Vec::new();
        for v in ["green", "red", "", "red", ""] {
            if v.is_empty() {
                indices.push(0u32);
            } else {
                indices.push(d.intern(DictKey::str(v)));
            }
        }
        assert_eq!(d.get(1), Some(&DictKey::str("green")));
        assert_eq!(d.get(2), Some(&DictKey::str("red")));
        assert_eq!(indices, vec![1, 2, 0, 2, 0]);
    }

    #[test]
    fn to_boolean_marks_positive_and_negative() {
        // scenario 2: to_boolean(col, "green") on [null, green, red]
        let d = dict(&["green", "red"]);
        let boolean = d.to_boolean(Some(&DictKey::str("green"))).unwrap();
        assert!(boolean.has_positive());
        assert!(boolean.has_negative());
        assert_eq!(boolean.get(boolean.positive_index() as u32), Some(&DictKey::str("green")));
        assert_eq!(boolean.get(boolean.negative_index() as u32), Some(&DictKey::str("red")));
    }

    #[test]
    fn to_boolean_rejects_too_many_values() {
        let d = dict(&["a", "b", "c"]);
        assert!(matches!(
            d.to_boolean(None),
            Err(Error::TooManyValues(_))
        ));
    }

    #[test]
    fn merge_dictionary_prefixes_template_and_appends_new() {
        // scenario 3 of spec §8
        let a = dict(&["green", "red"]);
        let b = dict(&["red", "yellow", "green"]);
        let merged = a.merge_with(&b);
        let values: Vec<_> = merged
            .dictionary
            .occupied_indices()
            .map(|i| merged.dictionary.get(i).unwrap().clone())
            .collect();
        assert_eq!(
            values,
            vec![
                DictKey::str("red"),
                DictKey::str("yellow"),
                DictKey::str("green"),
            ]
        );
    }

    #[test]
    fn merge_drops_boolean_flag_when_a_third_value_is_introduced() {
        let template = dict(&["green", "red"]).to_boolean(Some(&DictKey::str("green"))).unwrap();
        assert!(template.has_positive());
        assert!(template.has_negative());

        let src = dict(&["green", "red", "blue"]);
        let merged = src.merge_with(&template);
        assert_eq!(merged.dictionary.size(), 3);
        assert!(!merged.dictionary.has_positive());
        assert!(!merged.dictionary.has_negative());
    }

    #[test]
    fn change_dictionary_maps_absent_values_to_missing() {
        let src = dict(&["green", "red"]);
        let template = dict(&["red"]);
        let map = src.change_to(&template);
        // index 0 = null -> missing(0); green absent -> MISSING; red present -> template's index
        assert_eq!(map[0], 0);
        assert_eq!(map[1], crate::mapping::MISSING);
        assert_eq!(map[2], *template.create_inverse().get(&DictKey::str("red")).unwrap() as i32);
    }

    #[test]
    fn compact_closes_gaps_and_is_identity_without_them() {
        let mut d = Dictionary::empty();
        let a = d.intern(DictKey::str("a"));
        let b = d.intern(DictKey::str("b"));
        let c = d.intern(DictKey::str("c"));
        // null out "b" in the middle
        d.values[b as usize] = None;

        let (compacted, old_to_new) = d.compact();
        assert_eq!(compacted.size(), 2);
        assert_eq!(old_to_new[a as usize], 1);
        assert_eq!(old_to_new[c as usize], 2);
        assert_eq!(old_to_new[b as usize], crate::mapping::MISSING);

        let (still, identity_like) = compacted.compact();
        assert_eq!(still, compacted);
        assert_eq!(identity_like, vec![0, 1, 2]);
    }

    #[test]
    fn replace_single_rejects_collision() {
        let d = dict(&["a", "b"]);
        assert!(matches!(
            d.replace_single(&DictKey::str("a"), DictKey::str("b")),
            Err(Error::IllegalReplacement)
        ));
        let renamed = d.replace_single(&DictKey::str("a"), DictKey::str("c")).unwrap();
        assert_eq!(renamed.get(1), Some(&DictKey::str("c")));
    }

    #[test]
    fn replace_many_supports_swap_cycle() {
        let d = dict(&["a", "b"]);
        let mut renames = HashMap::new();
        renames.insert(DictKey::str("a"), DictKey::str("b"));
        renames.insert(DictKey::str("b"), DictKey::str("a"));
        let swapped = d.replace_many(&renames).unwrap();
        assert_eq!(swapped.get(1), Some(&DictKey::str("b")));
        assert_eq!(swapped.get(2), Some(&DictKey::str("a")));
    }

    #[test]
    fn replace_many_collapses_chain() {
        let d = dict(&["a", "b"]);
        let mut renames = HashMap::new();
        renames.insert(DictKey::str("a"), DictKey::str("b"));
        renames.insert(DictKey::str("b"), DictKey::str("c"));
        let renamed = d.replace_many(&renames).unwrap();
        assert_eq!(renamed.get(1), Some(&DictKey::str("c")));
        assert_eq!(renamed.get(2), Some(&DictKey::str("c")));
    }

    #[test]
    fn replace_many_rejects_genuine_collision() {
        let d = dict(&["a", "b", "c"]);
        let mut renames = HashMap::new();
        renames.insert(DictKey::str("a"), DictKey::str("c"));
        // "c" survives unchanged while "a" is renamed onto it: collision.
        assert!(matches!(
            d.replace_many(&renames),
            Err(Error::IllegalReplacement)
        ));
    }
}
