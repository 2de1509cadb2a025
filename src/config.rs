use crate::{address, cache, replacement};
use serde::{Deserialize, Serialize};

/// MSHR capacity of data-capable caches.
pub const DATA_MSHR_ENTRIES: usize = 16;

/// MSHR capacity of TLBs: a single entry models blocking translation
/// lookups.
pub const TLB_MSHR_ENTRIES: usize = 1;

/// Geometry and behavior of one cache level.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cache {
    pub name: String,
    pub kind: cache::Kind,
    /// log2 of the line size in bytes.
    pub line_offset_bits: u32,
    /// log2 of the number of sets.
    pub index_bits: u32,
    pub associativity: usize,
    /// Lookup latency in cycles.
    pub latency: u64,
    pub inclusive: bool,
    /// Distinguishes the large-page chain of a translation hierarchy.
    pub is_large_page_tlb: bool,
    pub replacement: replacement::Kind,
    /// Defaults to [`DATA_MSHR_ENTRIES`] or [`TLB_MSHR_ENTRIES`] by kind.
    pub mshr_entries: Option<usize>,
}

impl Default for Cache {
    fn default() -> Self {
        Self {
            name: "cache".to_string(),
            kind: cache::Kind::DATA_ONLY,
            line_offset_bits: 6,
            index_bits: 6,
            associativity: 8,
            latency: 1,
            inclusive: true,
            is_large_page_tlb: false,
            replacement: replacement::Kind::default(),
            mshr_entries: None,
        }
    }
}

impl Cache {
    #[must_use]
    pub fn num_sets(&self) -> usize {
        1 << self.index_bits
    }

    #[must_use]
    pub fn mshr_capacity(&self) -> usize {
        self.mshr_entries.unwrap_or(match self.kind {
            cache::Kind::TRANSLATION_ONLY => TLB_MSHR_ENTRIES,
            _ => DATA_MSHR_ENTRIES,
        })
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.associativity == 0 {
            return Err(Error::ZeroAssociativity {
                name: self.name.clone(),
            });
        }
        if self.line_offset_bits + self.index_bits >= address::BITS {
            return Err(Error::GeometryOverflow {
                name: self.name.clone(),
            });
        }
        if self.mshr_capacity() == 0 {
            return Err(Error::ZeroMshrCapacity {
                name: self.name.clone(),
            });
        }
        Ok(())
    }
}

/// Per-core façade parameters: the synthetic address window backing the
/// last-level TLB.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Core {
    pub l3_small_tlb_base: address,
    pub l3_small_tlb_size: u64,
}

impl Default for Core {
    fn default() -> Self {
        Self {
            l3_small_tlb_base: 0x0,
            l3_small_tlb_size: 1024 * 1024,
        }
    }
}

/// Whole-simulator knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hierarchy {
    /// Flat latency charged for reaching memory, in cycles.
    pub memory_latency: u64,
}

impl Default for Hierarchy {
    fn default() -> Self {
        Self {
            memory_latency: 100,
        }
    }
}

/// Build-time wiring problems. Runtime has no user-visible errors.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("cache {name:?} has zero associativity")]
    ZeroAssociativity { name: String },

    #[error("cache {name:?}: line offset and index bits exceed the address width")]
    GeometryOverflow { name: String },

    #[error("cache {name:?} has a zero-entry MSHR table")]
    ZeroMshrCapacity { name: String },

    #[error("hierarchy is full ({limit} levels), cannot add cache {name:?}")]
    TooManyLevels { name: String, limit: usize },

    #[error("cache {name:?} is not a TLB and cannot join a translation hierarchy")]
    NotATranslationCache { name: String },

    #[error("translation-only cache {name:?} cannot join a data hierarchy")]
    TranslationCacheInDataHierarchy { name: String },

    #[error("translation chain mis-paired at {name:?}: position {position} must be a {expected}-page TLB")]
    MispairedTlbChain {
        name: String,
        position: usize,
        expected: &'static str,
    },

    #[error("translation hierarchy of core {core} has an unpaired level ({len} TLBs)")]
    UnpairedTlbLevel { core: usize, len: usize },

    #[error("core {core} has an empty {hier} hierarchy")]
    EmptyHierarchy { core: usize, hier: &'static str },

    #[error("no such core: {core}")]
    NoSuchCore { core: usize },
}
