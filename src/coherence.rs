use crate::request::{Domain, Kind, Op};
use serde::{Deserialize, Serialize};

/// Stable states of the line protocol.
#[derive(
    Debug, strum::EnumIter, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
pub enum State {
    MODIFIED,
    OWNER,
    EXCLUSIVE,
    SHARED,
    INVALID,
}

/// Side effect a protocol transition asks the owning cache to execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    NONE,
    BROADCAST_DATA_READ,
    BROADCAST_DATA_WRITE,
    BROADCAST_TRANSLATION_READ,
    BROADCAST_TRANSLATION_WRITE,
    MEMORY_DATA_WRITEBACK,
    MEMORY_TRANSLATION_WRITEBACK,
}

impl Action {
    #[must_use]
    fn broadcast_read(domain: Domain) -> Self {
        match domain {
            Domain::DATA => Action::BROADCAST_DATA_READ,
            Domain::TRANSLATION => Action::BROADCAST_TRANSLATION_READ,
        }
    }

    #[must_use]
    fn broadcast_write(domain: Domain) -> Self {
        match domain {
            Domain::DATA => Action::BROADCAST_DATA_WRITE,
            Domain::TRANSLATION => Action::BROADCAST_TRANSLATION_WRITE,
        }
    }

    #[must_use]
    fn memory_writeback(domain: Domain) -> Self {
        match domain {
            Domain::DATA => Action::MEMORY_DATA_WRITEBACK,
            Domain::TRANSLATION => Action::MEMORY_TRANSLATION_WRITEBACK,
        }
    }

    #[must_use]
    pub fn is_memory_writeback(&self) -> bool {
        matches!(
            self,
            Action::MEMORY_DATA_WRITEBACK | Action::MEMORY_TRANSLATION_WRITEBACK
        )
    }

    #[must_use]
    pub fn is_broadcast(&self) -> bool {
        matches!(
            self,
            Action::BROADCAST_DATA_READ
                | Action::BROADCAST_DATA_WRITE
                | Action::BROADCAST_TRANSLATION_READ
                | Action::BROADCAST_TRANSLATION_WRITE
        )
    }

    #[must_use]
    pub fn is_translation(&self) -> bool {
        matches!(
            self,
            Action::BROADCAST_TRANSLATION_READ
                | Action::BROADCAST_TRANSLATION_WRITE
                | Action::MEMORY_TRANSLATION_WRITEBACK
        )
    }

    /// The transaction kind a cache runs when executing this action.
    ///
    /// Broadcasts arrive at peers as `BROADCASTED_*` operations; memory
    /// writebacks are forwarded downward as ordinary writebacks.
    #[must_use]
    pub fn txn_kind(&self) -> Option<Kind> {
        let domain = if self.is_translation() {
            Domain::TRANSLATION
        } else {
            Domain::DATA
        };
        match self {
            Action::NONE => None,
            Action::BROADCAST_DATA_READ | Action::BROADCAST_TRANSLATION_READ => {
                Some(Kind::new(Op::BROADCASTED_READ, domain))
            }
            Action::BROADCAST_DATA_WRITE | Action::BROADCAST_TRANSLATION_WRITE => {
                Some(Kind::new(Op::BROADCASTED_WRITE, domain))
            }
            Action::MEMORY_DATA_WRITEBACK | Action::MEMORY_TRANSLATION_WRITEBACK => {
                Some(Kind::new(Op::WRITEBACK, domain))
            }
        }
    }
}

/// The coherence protocol of a single line, held by value on the line.
///
/// The cache treats it as a pure transition function `(kind) -> action`
/// that mutates the state in place. New protocols are added as variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protocol {
    Moesi(State),
}

impl Default for Protocol {
    fn default() -> Self {
        Protocol::Moesi(State::INVALID)
    }
}

impl Protocol {
    #[must_use]
    pub fn state(&self) -> State {
        match self {
            Protocol::Moesi(state) => *state,
        }
    }

    pub fn force_state(&mut self, state: State) {
        match self {
            Protocol::Moesi(current) => *current = state,
        }
    }

    /// Drive the protocol with one transaction.
    ///
    /// Local reads install SHARED: a fire-and-forget broadcast cannot learn
    /// whether a peer holds the line, and granting EXCLUSIVE would make a
    /// later silent upgrade incoherent. Invalidating a MODIFIED or OWNER
    /// copy flushes it, which is what the memory-writeback action carries.
    pub fn transition(&mut self, kind: Kind) -> Action {
        let Protocol::Moesi(state) = self;
        let (next, action) = match (kind.op, *state) {
            (Op::READ, State::INVALID) => (State::SHARED, Action::broadcast_read(kind.domain)),
            (Op::READ, current) => (current, Action::NONE),

            (Op::WRITE, State::INVALID | State::SHARED | State::OWNER) => {
                (State::MODIFIED, Action::broadcast_write(kind.domain))
            }
            (Op::WRITE, State::EXCLUSIVE | State::MODIFIED) => (State::MODIFIED, Action::NONE),

            (Op::WRITEBACK, _) => (State::MODIFIED, Action::NONE),

            (Op::BROADCASTED_READ, State::MODIFIED) => (State::OWNER, Action::NONE),
            (Op::BROADCASTED_READ, State::EXCLUSIVE) => (State::SHARED, Action::NONE),
            (Op::BROADCASTED_READ, current) => (current, Action::NONE),

            (Op::BROADCASTED_WRITE, State::MODIFIED | State::OWNER) => {
                (State::INVALID, Action::memory_writeback(kind.domain))
            }
            (Op::BROADCASTED_WRITE, _) => (State::INVALID, Action::NONE),
        };
        *state = next;
        action
    }
}

#[cfg(test)]
mod tests {
    use super::{Action, Protocol, State};
    use crate::request::{Domain, Kind, Op};
    use strum::IntoEnumIterator;

    #[test]
    fn cold_read_shares_and_announces() {
        let mut prot = Protocol::default();
        let action = prot.transition(Kind::DATA_READ);
        assert_eq!(prot.state(), State::SHARED);
        assert_eq!(action, Action::BROADCAST_DATA_READ);
        // further reads are silent
        assert_eq!(prot.transition(Kind::DATA_READ), Action::NONE);
    }

    #[test]
    fn write_upgrades_with_broadcast() {
        for from in [State::INVALID, State::SHARED, State::OWNER] {
            let mut prot = Protocol::Moesi(from);
            let action = prot.transition(Kind::TRANSLATION_WRITE);
            assert_eq!(prot.state(), State::MODIFIED);
            assert_eq!(action, Action::BROADCAST_TRANSLATION_WRITE);
        }
        let mut prot = Protocol::Moesi(State::EXCLUSIVE);
        assert_eq!(prot.transition(Kind::DATA_WRITE), Action::NONE);
        assert_eq!(prot.state(), State::MODIFIED);
    }

    #[test]
    fn remote_read_downgrades_owners() {
        let remote_read = Kind::new(Op::BROADCASTED_READ, Domain::DATA);
        let mut prot = Protocol::Moesi(State::MODIFIED);
        assert_eq!(prot.transition(remote_read), Action::NONE);
        assert_eq!(prot.state(), State::OWNER);

        let mut prot = Protocol::Moesi(State::EXCLUSIVE);
        prot.transition(remote_read);
        assert_eq!(prot.state(), State::SHARED);
    }

    #[test]
    fn remote_write_always_invalidates() {
        let remote_write = Kind::new(Op::BROADCASTED_WRITE, Domain::DATA);
        for from in State::iter() {
            let mut prot = Protocol::Moesi(from);
            let action = prot.transition(remote_write);
            assert_eq!(prot.state(), State::INVALID);
            let flushes = matches!(from, State::MODIFIED | State::OWNER);
            assert_eq!(action == Action::MEMORY_DATA_WRITEBACK, flushes);
        }
    }

    #[test]
    fn writeback_lands_modified() {
        let mut prot = Protocol::default();
        assert_eq!(prot.transition(Kind::DATA_WRITEBACK), Action::NONE);
        assert_eq!(prot.state(), State::MODIFIED);
    }

    #[test]
    fn action_txn_kinds() {
        assert_eq!(
            Action::BROADCAST_TRANSLATION_WRITE.txn_kind(),
            Some(Kind::new(Op::BROADCASTED_WRITE, Domain::TRANSLATION))
        );
        assert_eq!(
            Action::MEMORY_DATA_WRITEBACK.txn_kind(),
            Some(Kind::DATA_WRITEBACK)
        );
        assert_eq!(Action::NONE.txn_kind(), None);
    }
}
