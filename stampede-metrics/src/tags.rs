use crate::key::KeyId;
use smallvec::SmallVec;

/// Sorted set of interned `(key, value)` pairs identifying one series of a metric.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct TagSet {
    // Most series carry fewer than four tags.
    pub(crate) tags: SmallVec<[(KeyId, KeyId); 4]>,
}

impl TagSet {
    /// Builds a tag set, sorting by key and keeping the last value for duplicated keys.
    pub fn from_pairs(iter: impl IntoIterator<Item = (KeyId, KeyId)>) -> Self {
        let mut tags: SmallVec<[(KeyId, KeyId); 4]> = SmallVec::new();
        for (k, v) in iter {
            match tags.iter_mut().find(|(ek, _)| *ek == k) {
                Some(slot) => slot.1 = v,
                None => tags.push((k, v)),
            }
        }
        tags.sort_unstable();
        Self { tags }
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (KeyId, KeyId)> + '_ {
        self.tags.iter().copied()
    }

    pub fn get(&self, key: KeyId) -> Option<KeyId> {
        let idx = self.tags.partition_point(|(k, _)| *k < key);
        self.tags.get(idx).and_then(|(k, v)| (*k == key).then_some(*v))
    }

    /// Keeps only the given keys (used for grouping).
    pub fn project(&self, keys: &[KeyId]) -> TagSet {
        let tags = keys
            .iter()
            .filter_map(|k| self.get(*k).map(|v| (*k, v)))
            .collect();
        TagSet::from_pairs_sorted(tags)
    }

    fn from_pairs_sorted(mut tags: SmallVec<[(KeyId, KeyId); 4]>) -> Self {
        tags.sort_unstable();
        Self { tags }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_pairs_sorts_and_dedups_keys() {
        let a = KeyId::from(1);
        let b = KeyId::from(2);
        let c = KeyId::from(3);

        let set = TagSet::from_pairs([(c, a), (a, b), (c, b)]);
        assert_eq!(set.len(), 2);
        assert_eq!(set.get(a), Some(b));
        assert_eq!(set.get(c), Some(b));
        assert_eq!(set.get(b), None);
    }

    #[test]
    fn project_keeps_requested_keys_only() {
        let k1 = KeyId::from(1);
        let k2 = KeyId::from(2);
        let v = KeyId::from(9);

        let set = TagSet::from_pairs([(k1, v), (k2, v)]);
        let projected = set.project(&[k2]);
        assert_eq!(projected, TagSet::from_pairs([(k2, v)]));
        assert!(set.project(&[]).is_empty());
    }
}
