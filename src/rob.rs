use crate::address;
use crate::request::Kind;

/// Completion hook of the re-order buffer.
///
/// The ROB itself (issue, retire, stalls) lives outside the hierarchy; the
/// caches only ever tell it that an L1 data reference finished. Retirements
/// are recorded so callers can observe exactly-once delivery.
#[derive(Debug, Default)]
pub struct Rob {
    pub retired: Vec<(address, Kind)>,
}

impl Rob {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mem_mark_done(&mut self, addr: address, kind: Kind) {
        log::trace!("rob::mem_mark_done(addr={:#x}, kind={})", addr, kind);
        self.retired.push((addr, kind));
    }

    /// How many times a reference to `addr` has been marked done.
    #[must_use]
    pub fn times_retired(&self, addr: address) -> usize {
        self.retired.iter().filter(|(a, _)| *a == addr).count()
    }
}
