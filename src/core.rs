use crate::cache_sys::CacheSys;
use crate::rob::Rob;
use crate::sim::CacheRef;
use crate::{address, cache, config};
use std::collections::HashMap;

const SMALL_PAGE_BITS: u32 = 12;
const LARGE_PAGE_BITS: u32 = 21;

/// One last-level-TLB entry occupies one line in the data caches.
const L3_TLB_ENTRY_BYTES: u64 = 64;

/// Per-core façade between the two hierarchies.
///
/// Owns the virtual-address ↔ last-level-TLB address maps used at the
/// translation/data boundary, the dynamic lower-cache routing policy, and
/// the ROB completion hook.
#[derive(Debug)]
pub struct Core {
    pub id: usize,
    /// Arena index of this core's data hierarchy.
    pub data_sys: usize,
    /// Arena index of this core's translation hierarchy.
    pub tlb_sys: usize,
    pub rob: Rob,
    l3_small_tlb_base: address,
    l3_small_tlb_size: u64,
    /// Reverse index: synthetic slot address -> mapped keys. Updated in the
    /// same call that computes the forward mapping.
    reverse: HashMap<address, Vec<MapKey>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct MapKey {
    va: address,
    tid: u64,
    is_large: bool,
}

impl Core {
    #[must_use]
    pub fn new(id: usize, data_sys: usize, tlb_sys: usize, config: &config::Core) -> Self {
        assert!(config.l3_small_tlb_size > 0);
        Self {
            id,
            data_sys,
            tlb_sys,
            rob: Rob::new(),
            l3_small_tlb_base: config.l3_small_tlb_base,
            l3_small_tlb_size: config.l3_small_tlb_size,
            reverse: HashMap::new(),
        }
    }

    /// Map a virtual address crossing the translation→data boundary into
    /// its slot in the memory-mapped last-level TLB.
    ///
    /// The mapping is a pure function of `(page number, page size)`, so it
    /// is stable across calls; small pages land in
    /// `[l3_small_tlb_base, l3_small_tlb_base + l3_small_tlb_size)` and
    /// large pages in the window right above it. With `insert`, the
    /// reverse index learns the key in the same call.
    pub fn get_l3_tlb_addr(
        &mut self,
        va: address,
        tid: u64,
        is_large: bool,
        insert: bool,
    ) -> address {
        let page = if is_large {
            va >> LARGE_PAGE_BITS
        } else {
            va >> SMALL_PAGE_BITS
        };
        let offset = page.wrapping_mul(L3_TLB_ENTRY_BYTES) % self.l3_small_tlb_size;
        let region = if is_large {
            self.l3_small_tlb_base + self.l3_small_tlb_size
        } else {
            self.l3_small_tlb_base
        };
        let slot = region + offset;
        if insert {
            let key = MapKey { va, tid, is_large };
            let keys = self.reverse.entry(slot).or_default();
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
        log::trace!(
            "core[{}]::get_l3_tlb_addr(va={:#x}, tid={}, large={}) => {:#x}",
            self.id,
            va,
            tid,
            is_large,
            slot
        );
        slot
    }

    /// Reverse mapping for release propagation across the data→translation
    /// boundary.
    ///
    /// Returns the original virtual address and whether the mapping is
    /// consistent with the higher cache's page-size specialization; `false`
    /// stops propagation up that branch.
    #[must_use]
    pub fn retrieve_addr(
        &self,
        l3_tlb_addr: address,
        tid: u64,
        is_large: bool,
        is_higher_cache_small_tlb: bool,
    ) -> (address, bool) {
        let found = self
            .reverse
            .get(&l3_tlb_addr)
            .and_then(|keys| {
                keys.iter()
                    .find(|key| key.tid == tid && key.is_large == is_large)
            })
            .map(|key| key.va);
        match found {
            Some(va) => (va, is_large != is_higher_cache_small_tlb),
            None => (l3_tlb_addr, false),
        }
    }

    /// Dynamic lower-cache resolution, consulted when a cache has no static
    /// lower edge.
    ///
    /// This is the only place that branches on `(is_translation, is_large,
    /// level)`: a TLB level descends its own size chain until the next
    /// level is the last one, at which point the request crosses into the
    /// last-level data cache; the last-level data cache hands translation
    /// misses to the last-level TLB; everything else bottoms out at memory.
    #[must_use]
    pub fn lower_cache(
        &self,
        data: &CacheSys,
        tlb: &CacheSys,
        addr: address,
        is_translation: bool,
        is_large: bool,
        level: usize,
        kind: cache::Kind,
    ) -> Option<CacheRef> {
        if !is_translation {
            return None;
        }
        let last_tlb_level = tlb.last_level();
        let lower = if kind == cache::Kind::TRANSLATION_ONLY {
            if tlb.is_last_level(level) {
                None
            } else if tlb.is_penultimate_level(level) {
                data.caches.len().checked_sub(1).map(|idx| CacheRef {
                    sys: data.id,
                    idx,
                })
            } else {
                Some(CacheRef {
                    sys: tlb.id,
                    idx: 2 * level + usize::from(is_large),
                })
            }
        } else if data.is_last_level(level) && last_tlb_level > 0 {
            Some(CacheRef {
                sys: tlb.id,
                idx: 2 * (last_tlb_level - 1) + usize::from(is_large),
            })
        } else {
            None
        };
        log::trace!(
            "core[{}]::lower_cache(addr={:#x}, level={}, large={}) => {:?}",
            self.id,
            addr,
            level,
            is_large,
            lower
        );
        lower
    }
}
