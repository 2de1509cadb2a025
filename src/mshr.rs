use super::address;
use crate::request::Kind;
use std::collections::HashMap;

/// Miss status handling entry.
///
/// Bound to the tag-store slot whose `lock` bit it owns; the slot stays
/// locked for the entry's whole lifetime.
#[derive(Debug, Clone, Copy)]
pub struct Entry {
    pub kind: Kind,
    pub set: usize,
    pub way: usize,
}

/// Miss status handling registers of one cache, keyed by request address.
///
/// At most one entry exists per address. TLBs run with a single entry to
/// model blocking translation lookups.
#[derive(Debug)]
pub struct Table {
    capacity: usize,
    entries: HashMap<address, Entry>,
}

impl Table {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::with_capacity(capacity),
        }
    }

    /// Checks if there is no more space for tracking a new miss.
    #[must_use]
    pub fn full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn get(&self, addr: address) -> Option<&Entry> {
        self.entries.get(&addr)
    }

    /// Track a miss.
    ///
    /// Adding an address that is already tracked rebinds the entry to the
    /// new slot; this happens when a locked line was stolen by an eviction
    /// and the address misses again.
    pub fn add(&mut self, addr: address, entry: Entry) {
        log::trace!(
            "mshr::add(addr={:#x}, kind={}, set={}, way={})",
            addr,
            entry.kind,
            entry.set,
            entry.way
        );
        self.entries.insert(addr, entry);
        debug_assert!(self.entries.len() <= self.capacity);
    }

    pub fn remove(&mut self, addr: address) -> Option<Entry> {
        self.entries.remove(&addr)
    }
}

#[cfg(test)]
mod tests {
    use super::{Entry, Table};
    use crate::request::Kind;

    fn entry(set: usize, way: usize) -> Entry {
        Entry {
            kind: Kind::DATA_READ,
            set,
            way,
        }
    }

    #[test]
    fn capacity_backpressure() {
        let mut mshrs = Table::new(1);
        assert!(!mshrs.full());
        mshrs.add(0x40, entry(1, 0));
        assert!(mshrs.full());
        mshrs.remove(0x40);
        assert!(!mshrs.full());
        assert!(mshrs.is_empty());
    }

    #[test]
    fn rebind_keeps_single_owner_per_address() {
        let mut mshrs = Table::new(16);
        mshrs.add(0x80, entry(2, 0));
        mshrs.add(0x80, entry(2, 1));
        assert_eq!(mshrs.len(), 1);
        assert_eq!(mshrs.get(0x80).unwrap().way, 1);
    }
}
