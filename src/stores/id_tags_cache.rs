//! Id-tag issuance, per spec.md §2 "IdTagsCache" / §4.3 "pick an idTag
//! under `idTagDistribution` policy".

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rand::seq::SliceRandom;

use crate::domain::template::IdTagDistribution;

/// Per-station pool of id tags the ATG draws from.
pub struct IdTagsCache {
    tags: Vec<String>,
    round_robin_cursor: AtomicUsize,
}

pub type SharedIdTagsCache = Arc<IdTagsCache>;

const DEFAULT_TAG_COUNT: usize = 10;

impl IdTagsCache {
    /// Build a pool from an explicit list, falling back to a synthesized
    /// `TAG-<n>` sequence when the template provides none.
    pub fn new(tags: Vec<String>) -> Self {
        let tags = if tags.is_empty() {
            (1..=DEFAULT_TAG_COUNT).map(|n| format!("TAG-{n}")).collect()
        } else {
            tags
        };
        Self {
            tags,
            round_robin_cursor: AtomicUsize::new(0),
        }
    }

    pub fn shared(tags: Vec<String>) -> SharedIdTagsCache {
        Arc::new(Self::new(tags))
    }

    /// Pick one tag under the given distribution policy. `connector_id`
    /// anchors `ConnectorAffinity` to the same tag for a given connector
    /// every time.
    pub fn pick(&self, policy: IdTagDistribution, connector_id: u32) -> String {
        if self.tags.is_empty() {
            return "TAG-0".to_string();
        }
        match policy {
            IdTagDistribution::Random => {
                let mut rng = rand::thread_rng();
                self.tags.choose(&mut rng).cloned().unwrap_or_else(|| "TAG-0".to_string())
            }
            IdTagDistribution::RoundRobin => {
                let idx = self.round_robin_cursor.fetch_add(1, Ordering::Relaxed) % self.tags.len();
                self.tags[idx].clone()
            }
            IdTagDistribution::ConnectorAffinity => {
                let idx = (connector_id as usize) % self.tags.len();
                self.tags[idx].clone()
            }
        }
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_robin_cycles_through_every_tag() {
        let cache = IdTagsCache::new(vec!["A".into(), "B".into(), "C".into()]);
        let picks: Vec<String> = (0..6).map(|_| cache.pick(IdTagDistribution::RoundRobin, 0)).collect();
        assert_eq!(picks, vec!["A", "B", "C", "A", "B", "C"]);
    }

    #[test]
    fn connector_affinity_is_stable_per_connector() {
        let cache = IdTagsCache::new(vec!["A".into(), "B".into()]);
        let first = cache.pick(IdTagDistribution::ConnectorAffinity, 3);
        let second = cache.pick(IdTagDistribution::ConnectorAffinity, 3);
        assert_eq!(first, second);
    }

    #[test]
    fn empty_template_list_falls_back_to_synthesized_tags() {
        let cache = IdTagsCache::new(Vec::new());
        assert_eq!(cache.len(), DEFAULT_TAG_COUNT);
    }
}
