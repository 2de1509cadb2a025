pub mod line;

pub use line::Line;

use crate::replacement::ReplacementPolicy;
use crate::sim::CacheRef;
use crate::{address, config, mshr, replacement};
use serde::{Deserialize, Serialize};

/// What a cache is allowed to hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Kind {
    DATA_ONLY,
    TRANSLATION_ONLY,
    DATA_AND_TRANSLATION,
}

impl Kind {
    /// Whether a line of the given domain can live here.
    #[must_use]
    pub fn holds(&self, is_translation: bool) -> bool {
        match self {
            Kind::DATA_ONLY => !is_translation,
            Kind::TRANSLATION_ONLY => is_translation,
            Kind::DATA_AND_TRANSLATION => true,
        }
    }
}

/// Access counters of one cache.
#[derive(Debug, Default, Clone, Copy, Serialize, Deserialize)]
pub struct Stats {
    pub accesses: u64,
    pub hits: u64,
    pub misses: u64,
    pub mshr_hits: u64,
    pub retries: u64,
}

/// One level of cache or TLB: geometry, tag store, replacement state and
/// MSHRs, plus its position in the topology.
///
/// `lower` and `higher` are arena indices resolved through the simulator;
/// lifetime is rooted in the owning hierarchy, never in sibling caches.
#[derive(Debug)]
pub struct Cache {
    pub name: String,
    pub core_id: usize,
    /// 1-based level within the owning hierarchy.
    pub level: usize,
    pub kind: Kind,
    line_offset_bits: u32,
    index_bits: u32,
    associativity: usize,
    num_sets: usize,
    pub latency: u64,
    pub inclusive: bool,
    pub is_large_page_tlb: bool,
    pub sets: Vec<Vec<Line>>,
    pub repl: Box<dyn ReplacementPolicy>,
    pub mshrs: mshr::Table,
    pub lower: Option<CacheRef>,
    pub higher: Vec<CacheRef>,
    pub stats: Stats,
}

impl Cache {
    #[must_use]
    pub fn new(config: &config::Cache, core_id: usize) -> Self {
        let num_sets = config.num_sets();
        let sets = (0..num_sets)
            .map(|_| (0..config.associativity).map(|_| Line::default()).collect())
            .collect();
        Self {
            name: config.name.clone(),
            core_id,
            level: 0,
            kind: config.kind,
            line_offset_bits: config.line_offset_bits,
            index_bits: config.index_bits,
            associativity: config.associativity,
            num_sets,
            latency: config.latency,
            inclusive: config.inclusive,
            is_large_page_tlb: config.is_large_page_tlb,
            sets,
            repl: replacement::build(config.replacement, num_sets, config.associativity),
            mshrs: mshr::Table::new(config.mshr_capacity()),
            lower: None,
            higher: Vec::new(),
            stats: Stats::default(),
        }
    }

    #[must_use]
    pub fn associativity(&self) -> usize {
        self.associativity
    }

    #[must_use]
    pub fn num_sets(&self) -> usize {
        self.num_sets
    }

    #[must_use]
    pub fn line_offset(&self, addr: address) -> address {
        addr & ((1 << self.line_offset_bits) - 1)
    }

    #[must_use]
    pub fn index(&self, addr: address) -> usize {
        ((addr >> self.line_offset_bits) & ((1 << self.index_bits) - 1)) as usize
    }

    #[must_use]
    pub fn tag(&self, addr: address) -> address {
        (addr >> self.line_offset_bits) >> self.index_bits
    }

    /// Reconstruct a line-aligned address from a resident tag.
    #[must_use]
    pub fn line_addr(&self, tag: address, set: usize) -> address {
        ((tag << self.index_bits) | set as address) << self.line_offset_bits
    }

    /// Scan a set for `(tag, is_translation, tid)`, locked lines included.
    #[must_use]
    pub fn find_way(&self, set: usize, tag: address, is_translation: bool, tid: u64) -> Option<usize> {
        self.sets[set]
            .iter()
            .position(|line| line.matches(tag, is_translation, tid))
    }

    /// A hit additionally requires the slot not to be MSHR-locked.
    #[must_use]
    pub fn hit_way(&self, set: usize, tag: address, is_translation: bool, tid: u64) -> Option<usize> {
        self.find_way(set, tag, is_translation, tid)
            .filter(|&way| !self.sets[set][way].lock)
    }

    #[must_use]
    pub fn invalid_way(&self, set: usize) -> Option<usize> {
        self.sets[set].iter().position(|line| !line.valid)
    }

    #[must_use]
    pub fn line(&self, set: usize, way: usize) -> &Line {
        &self.sets[set][way]
    }

    #[must_use]
    pub fn line_mut(&mut self, set: usize, way: usize) -> &mut Line {
        &mut self.sets[set][way]
    }

    /// Clear the matching line, if any. Safe to call twice.
    pub fn invalidate_local(&mut self, addr: address, tid: u64, is_translation: bool) -> bool {
        let tag = self.tag(addr);
        let set = self.index(addr);
        match self.find_way(set, tag, is_translation, tid) {
            Some(way) => {
                log::trace!(
                    "{}::invalidate(addr={:#x}, tid={}, translation={})",
                    self.name,
                    addr,
                    tid,
                    is_translation
                );
                self.sets[set][way].valid = false;
                true
            }
            None => false,
        }
    }

    /// Whether this cache still holds the line (used by inclusion checks).
    #[must_use]
    pub fn holds_line(&self, addr: address, tid: u64, is_translation: bool) -> bool {
        let tag = self.tag(addr);
        let set = self.index(addr);
        self.find_way(set, tag, is_translation, tid).is_some()
    }
}
