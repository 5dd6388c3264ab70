//! Sealed (hidden-until-reveal) decisions with at-most-once semantics.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use kryptopoly_protocol::PlayerId;

/// A player's decision for one step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Commitment<P> {
    NotCommittedYet,
    Committed { payload: P, seq: u64 },
}

impl<P> Commitment<P> {
    pub fn is_committed(&self) -> bool {
        matches!(self, Commitment::Committed { .. })
    }
}

/// Result of [`SealedStore::commit`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommitResult<'a, P> {
    Accepted(&'a P),
    /// Already committed; carries the original payload, nothing changed.
    Replayed(&'a P),
}

impl<'a, P> CommitResult<'a, P> {
    pub fn payload(&self) -> &'a P {
        match self {
            CommitResult::Accepted(p) | CommitResult::Replayed(p) => p,
        }
    }

    pub fn is_replay(&self) -> bool {
        matches!(self, CommitResult::Replayed(_))
    }
}

/// Per-step store keyed by player. Only committed entries are stored.
#[derive(Clone, Debug)]
pub struct SealedStore<P> {
    entries: BTreeMap<PlayerId, (P, u64)>,
}

impl<P> Default for SealedStore<P> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl<P> SealedStore<P> {
    pub fn new() -> Self {
        Self::default()
    }

    /// First commit wins; any later commit replays the stored payload.
    pub fn commit(&mut self, player: PlayerId, payload: P, seq: u64) -> CommitResult<'_, P> {
        match self.entries.entry(player) {
            Entry::Occupied(entry) => CommitResult::Replayed(&entry.into_mut().0),
            Entry::Vacant(entry) => CommitResult::Accepted(&entry.insert((payload, seq)).0),
        }
    }

    pub fn get(&self, player: PlayerId) -> Commitment<&P> {
        match self.entries.get(&player) {
            Some((payload, seq)) => Commitment::Committed {
                payload,
                seq: *seq,
            },
            None => Commitment::NotCommittedYet,
        }
    }

    pub fn payload(&self, player: PlayerId) -> Option<&P> {
        self.entries.get(&player).map(|(payload, _)| payload)
    }

    pub fn is_committed(&self, player: PlayerId) -> bool {
        self.entries.contains_key(&player)
    }

    /// Committed entries in commit order.
    pub fn committed(&self) -> Vec<(PlayerId, &P, u64)> {
        let mut out: Vec<_> = self
            .entries
            .iter()
            .map(|(player, (payload, seq))| (*player, payload, *seq))
            .collect();
        out.sort_by_key(|(player, _, seq)| (*seq, *player));
        out
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_commit_wins() {
        let mut store = SealedStore::new();
        assert!(!store.commit(PlayerId(1), Some(40u64), 0).is_replay());
        let again = store.commit(PlayerId(1), Some(90), 1);
        assert!(again.is_replay());
        assert_eq!(again.payload(), &Some(40));
        assert_eq!(
            store.get(PlayerId(1)),
            Commitment::Committed {
                payload: &Some(40),
                seq: 0
            }
        );
        assert_eq!(store.get(PlayerId(2)), Commitment::NotCommittedYet);
    }

    #[test]
    fn committed_lists_in_seq_order() {
        let mut store = SealedStore::new();
        store.commit(PlayerId(3), "c", 2);
        store.commit(PlayerId(1), "a", 5);
        store.commit(PlayerId(2), "b", 1);
        let order: Vec<PlayerId> = store.committed().iter().map(|(p, _, _)| *p).collect();
        assert_eq!(order, vec![PlayerId(2), PlayerId(3), PlayerId(1)]);
        assert_eq!(store.len(), 3);
    }
}
