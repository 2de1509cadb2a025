use super::address;
use crate::sim::CacheRef;
use serde::{Deserialize, Serialize};

/// Operation half of a transaction kind.
///
/// `BROADCASTED_*` operations only ever reach a cache through the coherence
/// queue of a peer hierarchy; they never enter through the normal lookup
/// path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Op {
    READ,
    WRITE,
    WRITEBACK,
    BROADCASTED_READ,
    BROADCASTED_WRITE,
}

/// Which kind of line a transaction targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Domain {
    DATA,
    TRANSLATION,
}

/// A transaction kind as an operation/domain product, so "is this a
/// translation access" is a field projection rather than a disjunction over
/// enum variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Kind {
    pub op: Op,
    pub domain: Domain,
}

impl Kind {
    pub const DATA_READ: Kind = Kind::new(Op::READ, Domain::DATA);
    pub const DATA_WRITE: Kind = Kind::new(Op::WRITE, Domain::DATA);
    pub const DATA_WRITEBACK: Kind = Kind::new(Op::WRITEBACK, Domain::DATA);
    pub const TRANSLATION_READ: Kind = Kind::new(Op::READ, Domain::TRANSLATION);
    pub const TRANSLATION_WRITE: Kind = Kind::new(Op::WRITE, Domain::TRANSLATION);
    pub const TRANSLATION_WRITEBACK: Kind = Kind::new(Op::WRITEBACK, Domain::TRANSLATION);

    #[must_use]
    pub const fn new(op: Op, domain: Domain) -> Self {
        Self { op, domain }
    }

    #[must_use]
    pub fn is_translation(&self) -> bool {
        self.domain == Domain::TRANSLATION
    }

    #[must_use]
    pub fn is_writeback(&self) -> bool {
        self.op == Op::WRITEBACK
    }

    #[must_use]
    pub fn is_broadcast(&self) -> bool {
        matches!(self.op, Op::BROADCASTED_READ | Op::BROADCASTED_WRITE)
    }

    /// Whether completing this transaction leaves the line dirty.
    #[must_use]
    pub fn marks_dirty(&self) -> bool {
        matches!(self.op, Op::WRITE | Op::WRITEBACK)
    }

    /// Whether this transaction updates replacement state.
    ///
    /// Writebacks restore a line that was already resident below; treating
    /// them as a use would distort the recency order.
    #[must_use]
    pub fn touches_replacement(&self) -> bool {
        self.op != Op::WRITEBACK
    }
}

impl std::fmt::Display for Kind {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:?}_{:?}", self.domain, self.op)
    }
}

/// Outcome of a single cache lookup.
#[derive(
    Debug, strum::EnumIter, Clone, Copy, Hash, PartialEq, Eq, Serialize, Deserialize,
)]
pub enum RequestStatus {
    REQUEST_HIT = 0,
    REQUEST_MISS,
    REQUEST_RETRY,
    MSHR_HIT,
    MSHR_HIT_AND_LOCKED,
}

/// An in-flight memory reference.
///
/// A request is single-owner: it lives in exactly one event list at a time
/// and is dropped once it retires. `completion` identifies the cache that
/// scheduled it, so retirement dispatches by index lookup instead of a
/// captured callback.
#[derive(Debug)]
pub struct Request {
    pub addr: address,
    pub kind: Kind,
    pub tid: u64,
    pub is_large: bool,
    pub core_id: usize,
    pub completion: CacheRef,
}

impl Request {
    #[must_use]
    pub fn new(
        addr: address,
        kind: Kind,
        tid: u64,
        is_large: bool,
        core_id: usize,
        completion: CacheRef,
    ) -> Self {
        Self {
            addr,
            kind,
            tid,
            is_large,
            core_id,
            completion,
        }
    }

    #[must_use]
    pub fn is_translation(&self) -> bool {
        self.kind.is_translation()
    }
}

impl std::fmt::Display for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "Request(addr={:#x}, kind={}, tid={}, core={})",
            self.addr, self.kind, self.tid, self.core_id
        )
    }
}

#[cfg(test)]
mod tests {
    use super::{Domain, Kind, Op};

    #[test]
    fn domain_projection() {
        assert!(Kind::TRANSLATION_READ.is_translation());
        assert!(Kind::TRANSLATION_WRITEBACK.is_translation());
        assert!(!Kind::DATA_WRITE.is_translation());
        assert!(Kind::new(Op::BROADCASTED_WRITE, Domain::TRANSLATION).is_translation());
    }

    #[test]
    fn dirty_and_replacement_rules() {
        assert!(Kind::DATA_WRITE.marks_dirty());
        assert!(Kind::DATA_WRITEBACK.marks_dirty());
        assert!(!Kind::DATA_READ.marks_dirty());
        assert!(!Kind::DATA_WRITEBACK.touches_replacement());
        assert!(Kind::TRANSLATION_READ.touches_replacement());
    }
}
