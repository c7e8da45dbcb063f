use ahash::AHashMap;
use smallvec::SmallVec;

use crate::key::KeyId;
use crate::metrics::{MetricKind, MetricSnapshot};
use crate::registry::{MetricId, Registry};
use crate::tags::TagSet;

#[derive(Debug, Clone, Copy)]
enum TagFilter {
    Eq(KeyId, KeyId),
    NotEq(KeyId, KeyId),
    Has(KeyId),
    Missing(KeyId),
    // A filter on a string that was never interned cannot match any series.
    Never,
}

impl TagFilter {
    fn matches(&self, tags: &TagSet) -> bool {
        match *self {
            TagFilter::Eq(k, v) => tags.get(k) == Some(v),
            TagFilter::NotEq(k, v) => tags.get(k) != Some(v),
            TagFilter::Has(k) => tags.get(k).is_some(),
            TagFilter::Missing(k) => tags.get(k).is_none(),
            TagFilter::Never => false,
        }
    }
}

/// Tag-filtered, optionally grouped read over the series of one metric.
#[derive(Debug, Clone)]
pub struct Query<'a> {
    registry: &'a Registry,
    metric: MetricId,
    filters: SmallVec<[TagFilter; 4]>,
    group_keys: SmallVec<[KeyId; 4]>,
}

impl<'a> Query<'a> {
    pub(crate) fn new(registry: &'a Registry, metric: MetricId) -> Self {
        Self {
            registry,
            metric,
            filters: SmallVec::new(),
            group_keys: SmallVec::new(),
        }
    }

    #[must_use]
    pub fn where_eq(mut self, key: &str, value: &str) -> Self {
        let filter = match (
            self.registry.existing_key(key),
            self.registry.existing_key(value),
        ) {
            (Some(k), Some(v)) => TagFilter::Eq(k, v),
            _ => TagFilter::Never,
        };
        self.filters.push(filter);
        self
    }

    #[must_use]
    pub fn where_not_eq(mut self, key: &str, value: &str) -> Self {
        if let (Some(k), Some(v)) = (
            self.registry.existing_key(key),
            self.registry.existing_key(value),
        ) {
            self.filters.push(TagFilter::NotEq(k, v));
        }
        self
    }

    #[must_use]
    pub fn where_has(mut self, key: &str) -> Self {
        let filter = match self.registry.existing_key(key) {
            Some(k) => TagFilter::Has(k),
            None => TagFilter::Never,
        };
        self.filters.push(filter);
        self
    }

    #[must_use]
    pub fn where_missing(mut self, key: &str) -> Self {
        if let Some(k) = self.registry.existing_key(key) {
            self.filters.push(TagFilter::Missing(k));
        }
        self
    }

    #[must_use]
    pub fn group_by(mut self, keys: &[&str]) -> Self {
        self.group_keys = keys
            .iter()
            .filter_map(|k| self.registry.existing_key(k))
            .collect();
        self.group_keys.sort_unstable();
        self.group_keys.dedup();
        self
    }

    fn kind(&self) -> MetricKind {
        self.registry
            .kind(self.metric)
            .unwrap_or(MetricKind::Counter)
    }

    fn matches(&self, tags: &TagSet) -> bool {
        self.filters.iter().all(|f| f.matches(tags))
    }

    /// Merges every matching series into one snapshot (empty if none match).
    pub fn merge(self) -> MetricSnapshot {
        let mut acc = MetricSnapshot::empty(self.kind());
        self.registry.visit_series(self.metric, |tags, storage| {
            if self.matches(tags) {
                storage.merge_into(&mut acc);
            }
        });
        acc
    }

    /// Merges matching series per distinct value of the `group_by` keys.
    pub fn merge_grouped(self) -> Vec<(Vec<(String, String)>, MetricSnapshot)> {
        let kind = self.kind();
        let mut groups: AHashMap<TagSet, MetricSnapshot> = AHashMap::new();

        self.registry.visit_series(self.metric, |tags, storage| {
            if !self.matches(tags) {
                return;
            }
            let key = tags.project(&self.group_keys);
            let acc = groups
                .entry(key)
                .or_insert_with(|| MetricSnapshot::empty(kind));
            storage.merge_into(acc);
        });

        let mut out: Vec<_> = groups
            .into_iter()
            .map(|(tags, snapshot)| (self.registry.tag_strings(&tags), snapshot))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }
}
