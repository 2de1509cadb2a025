use crate::address;
use crate::coherence::Protocol;

/// One slot in a cache set.
///
/// Data lines and translation lines share the tag store; `is_translation`,
/// `is_large` and `tid` only carry meaning for translation lines. `lock`
/// is set while an MSHR owns the slot.
#[allow(clippy::struct_excessive_bools)]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Line {
    pub tag: address,
    pub valid: bool,
    pub dirty: bool,
    pub lock: bool,
    pub is_translation: bool,
    pub is_large: bool,
    pub tid: u64,
    pub protocol: Protocol,
}

impl Default for Line {
    fn default() -> Self {
        Self {
            tag: 0,
            valid: false,
            dirty: false,
            lock: false,
            is_translation: false,
            is_large: false,
            tid: 0,
            protocol: Protocol::default(),
        }
    }
}

impl Line {
    /// Lookup filter: two lines in a set never agree on all three of these
    /// while both are valid.
    #[must_use]
    pub fn matches(&self, tag: address, is_translation: bool, tid: u64) -> bool {
        self.valid && self.tag == tag && self.is_translation == is_translation && self.tid == tid
    }
}

impl std::fmt::Display for Line {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Line")
            .field("tag", &format_args!("{:#x}", self.tag))
            .field("valid", &self.valid)
            .field("dirty", &self.dirty)
            .field("lock", &self.lock)
            .field("translation", &self.is_translation)
            .field("state", &self.protocol.state())
            .finish()
    }
}
