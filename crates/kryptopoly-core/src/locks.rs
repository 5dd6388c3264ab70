use std::collections::BTreeMap;

use kryptopoly_protocol::{ErrorKind, PlayerId, Step};
use thiserror::Error;

/// When a lock was taken.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StepToken {
    pub year: u8,
    pub step: Step,
    pub seq: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceLock {
    pub holder: PlayerId,
    pub acquired_at: StepToken,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockOutcome {
    Acquired,
    /// The same player already held it; nothing changed.
    AlreadyHeld,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{resource} is held by {holder}")]
pub struct LockConflict {
    pub resource: String,
    pub holder: PlayerId,
}

impl LockConflict {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Conflict
    }
}

/// Exclusive claims over a resource pool. At most one holder per key.
#[derive(Clone, Debug)]
pub struct LockTable<K: Ord> {
    locks: BTreeMap<K, ResourceLock>,
}

impl<K: Ord> Default for LockTable<K> {
    fn default() -> Self {
        Self {
            locks: BTreeMap::new(),
        }
    }
}

impl<K: Ord + Clone + std::fmt::Display> LockTable<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(
        &mut self,
        resource: &K,
        player: PlayerId,
        token: StepToken,
    ) -> Result<LockOutcome, LockConflict> {
        match self.locks.get(resource) {
            Some(lock) if lock.holder == player => Ok(LockOutcome::AlreadyHeld),
            Some(lock) => Err(LockConflict {
                resource: resource.to_string(),
                holder: lock.holder,
            }),
            None => {
                self.locks.insert(
                    resource.clone(),
                    ResourceLock {
                        holder: player,
                        acquired_at: token,
                    },
                );
                Ok(LockOutcome::Acquired)
            }
        }
    }

    pub fn holder(&self, resource: &K) -> Option<PlayerId> {
        self.locks.get(resource).map(|lock| lock.holder)
    }

    pub fn held_by(&self, player: PlayerId) -> impl Iterator<Item = &K> + '_ {
        self.locks
            .iter()
            .filter(move |(_, lock)| lock.holder == player)
            .map(|(key, _)| key)
    }

    pub fn holders(&self) -> BTreeMap<K, PlayerId> {
        self.locks
            .iter()
            .map(|(key, lock)| (key.clone(), lock.holder))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
