use crate::cache::Cache;
use crate::coherence::Action;
use crate::request::Request;
use crate::sim::CacheRef;
use crate::{config, NUM_MAX_CACHES};
use itertools::Itertools;
use std::collections::BTreeMap;

/// Requests pending completion, keyed by the cycle they retire on.
///
/// Several requests may retire on the same cycle; they keep their enqueue
/// order.
pub type EventList = BTreeMap<u64, Vec<Request>>;

/// One hierarchy: a data-cache chain or a pair of small/large-page TLB
/// chains belonging to a single core.
///
/// The hierarchy owns its caches and its event lists. Peer hierarchies on
/// other cores are only reachable by id, and only for enqueueing into their
/// coherence-action list; the queue is drained at the peer's own tick, so
/// cross-hierarchy effects land exactly one cycle later.
#[derive(Debug)]
pub struct CacheSys {
    pub id: usize,
    pub core_id: usize,
    pub is_translation_hier: bool,
    pub clk: u64,
    pub memory_latency: u64,
    pub caches: Vec<Cache>,
    pub hit_list: EventList,
    pub wait_list: EventList,
    pub coh_act_list: Vec<(Request, Action)>,
    pub peers: Vec<usize>,
    cache_latency: Vec<u64>,
    total_latency: Vec<u64>,
}

impl CacheSys {
    #[must_use]
    pub fn new(id: usize, core_id: usize, is_translation_hier: bool, memory_latency: u64) -> Self {
        Self {
            id,
            core_id,
            is_translation_hier,
            clk: 0,
            memory_latency,
            caches: Vec::new(),
            hit_list: EventList::new(),
            wait_list: EventList::new(),
            coh_act_list: Vec::new(),
            peers: Vec::new(),
            cache_latency: Vec::new(),
            total_latency: Vec::new(),
        }
    }

    /// Append the next level.
    ///
    /// Data hierarchies are wired statically: the previous last level gains
    /// this cache as its lower neighbor and this cache gains it as a higher
    /// neighbor. Translation hierarchies hold two parallel chains sharing
    /// level numbers (even positions small-page, odd positions large-page);
    /// their routing stays dynamic.
    pub fn add_cache_to_hier(&mut self, mut cache: Cache) -> Result<usize, config::Error> {
        let limit = if self.is_translation_hier {
            NUM_MAX_CACHES * 2
        } else {
            NUM_MAX_CACHES
        };
        if self.caches.len() >= limit {
            return Err(config::Error::TooManyLevels {
                name: cache.name,
                limit,
            });
        }

        let idx = self.caches.len();
        if self.is_translation_hier {
            if cache.kind != crate::cache::Kind::TRANSLATION_ONLY {
                return Err(config::Error::NotATranslationCache { name: cache.name });
            }
            let expect_large = idx % 2 == 1;
            if cache.is_large_page_tlb != expect_large {
                return Err(config::Error::MispairedTlbChain {
                    name: cache.name,
                    position: idx,
                    expected: if expect_large { "large" } else { "small" },
                });
            }
            cache.level = (idx + 2) / 2;
        } else {
            if cache.kind == crate::cache::Kind::TRANSLATION_ONLY {
                return Err(config::Error::TranslationCacheInDataHierarchy { name: cache.name });
            }
            cache.level = idx + 1;
            if let Some(prev) = self.caches.last_mut() {
                prev.lower = Some(CacheRef { sys: self.id, idx });
                cache.higher.push(CacheRef {
                    sys: self.id,
                    idx: idx - 1,
                });
            }
        }

        log::debug!(
            "cache_sys[{}]::add_cache_to_hier({}, level={}) => [{}]",
            self.id,
            cache.name,
            cache.level,
            self.caches.iter().map(|c| c.name.as_str()).join(", "),
        );

        self.cache_latency.push(cache.latency);
        self.caches.push(cache);
        self.recompute_latency();
        Ok(idx)
    }

    /// Connect a peer hierarchy for coherence broadcast.
    pub fn add_cachesys(&mut self, peer: usize) {
        debug_assert_ne!(peer, self.id);
        if !self.peers.contains(&peer) {
            self.peers.push(peer);
        }
    }

    // TODO: accumulate per size chain for translation hierarchies
    fn recompute_latency(&mut self) {
        self.total_latency.clear();
        let mut acc = 0;
        for &latency in &self.cache_latency {
            acc += latency;
            self.total_latency.push(acc);
        }
    }

    /// Path latency from L1 through the cache at `idx`, inclusive.
    #[must_use]
    pub fn total_latency(&self, idx: usize) -> u64 {
        self.total_latency[idx]
    }

    /// Path latency of a full miss to memory.
    #[must_use]
    pub fn memory_path_latency(&self) -> u64 {
        self.total_latency.last().copied().unwrap_or(0) + self.memory_latency
    }

    /// The deepest level number of this hierarchy.
    #[must_use]
    pub fn last_level(&self) -> usize {
        if self.is_translation_hier {
            self.caches.len() / 2
        } else {
            self.caches.len()
        }
    }

    #[must_use]
    pub fn is_last_level(&self, level: usize) -> bool {
        level == self.last_level()
    }

    #[must_use]
    pub fn is_penultimate_level(&self, level: usize) -> bool {
        level + 1 == self.last_level()
    }

    pub fn schedule_hit(&mut self, at: u64, request: Request) {
        self.hit_list.entry(at).or_default().push(request);
    }

    pub fn schedule_wait(&mut self, at: u64, request: Request) {
        self.wait_list.entry(at).or_default().push(request);
    }

    pub fn queue_coherence(&mut self, request: Request, action: Action) {
        self.coh_act_list.push((request, action));
    }

    /// Remove and return every entry of `list` scheduled at or before `clk`.
    fn take_due(list: &mut EventList, clk: u64) -> Vec<Request> {
        let rest = list.split_off(&(clk + 1));
        let due = std::mem::replace(list, rest);
        due.into_values().flatten().collect()
    }

    pub fn take_due_hits(&mut self) -> Vec<Request> {
        Self::take_due(&mut self.hit_list, self.clk)
    }

    pub fn take_due_waits(&mut self) -> Vec<Request> {
        Self::take_due(&mut self.wait_list, self.clk)
    }

    pub fn take_coherence_queue(&mut self) -> Vec<(Request, Action)> {
        std::mem::take(&mut self.coh_act_list)
    }

    /// Snapshot of `(cycle, addr)` pairs in both event lists, in retirement
    /// order. Two identically driven simulators produce identical
    /// snapshots every cycle.
    #[must_use]
    pub fn event_snapshot(&self) -> Vec<(u64, crate::address)> {
        let hits = self
            .hit_list
            .iter()
            .flat_map(|(&at, reqs)| reqs.iter().map(move |r| (at, r.addr)));
        let waits = self
            .wait_list
            .iter()
            .flat_map(|(&at, reqs)| reqs.iter().map(move |r| (at, r.addr)));
        hits.chain(waits).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::CacheSys;
    use crate::cache::{self, Cache};
    use crate::config;

    fn data_cache(name: &str, latency: u64) -> Cache {
        Cache::new(
            &config::Cache {
                name: name.to_string(),
                latency,
                ..config::Cache::default()
            },
            0,
        )
    }

    fn tlb(name: &str, is_large: bool) -> Cache {
        Cache::new(
            &config::Cache {
                name: name.to_string(),
                kind: cache::Kind::TRANSLATION_ONLY,
                is_large_page_tlb: is_large,
                ..config::Cache::default()
            },
            0,
        )
    }

    #[test]
    fn data_hierarchy_levels_and_wiring() {
        let mut sys = CacheSys::new(0, 0, false, 100);
        sys.add_cache_to_hier(data_cache("l1", 1)).unwrap();
        sys.add_cache_to_hier(data_cache("l2", 10)).unwrap();
        sys.add_cache_to_hier(data_cache("llc", 30)).unwrap();

        assert_eq!(sys.caches[0].level, 1);
        assert_eq!(sys.caches[2].level, 3);
        assert_eq!(sys.caches[0].lower.unwrap().idx, 1);
        assert_eq!(sys.caches[2].higher[0].idx, 1);
        assert!(sys.is_last_level(3));
        assert!(sys.is_penultimate_level(2));
        assert_eq!(sys.total_latency(1), 11);
        assert_eq!(sys.memory_path_latency(), 141);
    }

    #[test]
    fn translation_hierarchy_pairs_share_levels() {
        let mut sys = CacheSys::new(1, 0, true, 100);
        sys.add_cache_to_hier(tlb("l1s", false)).unwrap();
        sys.add_cache_to_hier(tlb("l1l", true)).unwrap();
        sys.add_cache_to_hier(tlb("l2s", false)).unwrap();
        sys.add_cache_to_hier(tlb("l2l", true)).unwrap();

        let levels: Vec<_> = sys.caches.iter().map(|c| c.level).collect();
        assert_eq!(levels, vec![1, 1, 2, 2]);
        assert!(sys.is_last_level(2));
        assert!(!sys.is_last_level(1));
    }

    #[test]
    fn mispaired_chain_is_rejected() {
        let mut sys = CacheSys::new(1, 0, true, 100);
        sys.add_cache_to_hier(tlb("l1s", false)).unwrap();
        let err = sys.add_cache_to_hier(tlb("l1s-again", false));
        assert!(matches!(
            err,
            Err(config::Error::MispairedTlbChain { position: 1, .. })
        ));
    }

    #[test]
    fn data_hierarchy_rejects_tlbs_and_extra_levels() {
        let mut sys = CacheSys::new(0, 0, false, 100);
        assert!(matches!(
            sys.add_cache_to_hier(tlb("l1s", false)),
            Err(config::Error::TranslationCacheInDataHierarchy { .. })
        ));
        for i in 0..crate::NUM_MAX_CACHES {
            sys.add_cache_to_hier(data_cache(&format!("l{i}"), 1)).unwrap();
        }
        assert!(matches!(
            sys.add_cache_to_hier(data_cache("extra", 1)),
            Err(config::Error::TooManyLevels { .. })
        ));
    }
}
