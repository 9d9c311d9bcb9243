//! Specialization instance cache.
//!
//! Maps a specialization key to the module built for it. A miss hands out a
//! [`Reservation`]; the caller must either [`insert`](InstanceCache::insert)
//! the built instance under it or [`release`](InstanceCache::release) it. Two
//! modules are therefore never built for one key.

use rustc_hash::FxHashMap;

use deparam_core::{InternalError, ModuleId, NodeId};

/// A specialized module and its formal map.
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceInfo {
    pub module: ModuleId,
    /// Template formal -> formal of this instance.
    pub formals: FxHashMap<NodeId, NodeId>,
}

impl InstanceInfo {
    pub fn clone_of(&self, formal: NodeId) -> Option<NodeId> {
        self.formals.get(&formal).copied()
    }
}

/// Proof that a key was looked up and missed. Not `Clone`.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "a reservation must be inserted or released"]
pub struct Reservation {
    key: String,
}

impl Reservation {
    pub fn key(&self) -> &str {
        &self.key
    }
}

#[derive(Debug, PartialEq)]
pub enum Lookup {
    Hit(ModuleId),
    Miss(Reservation),
}

#[derive(Debug, Clone)]
enum Slot {
    Reserved,
    Ready(InstanceInfo),
}

/// Cache of specialized instances, keyed by specialization name.
#[derive(Debug, Default, Clone)]
pub struct InstanceCache {
    entries: FxHashMap<String, Slot>,
}

impl InstanceCache {
    /// Create a new empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up `key`, reserving it on a miss.
    pub fn lookup_or_reserve(&mut self, key: &str) -> Result<Lookup, InternalError> {
        match self.entries.get(key) {
            Some(Slot::Ready(info)) => Ok(Lookup::Hit(info.module)),
            Some(Slot::Reserved) => Err(InternalError::ReservedKeyReentered {
                key: key.to_string(),
            }),
            None => {
                self.entries.insert(key.to_string(), Slot::Reserved);
                Ok(Lookup::Miss(Reservation {
                    key: key.to_string(),
                }))
            }
        }
    }

    /// Fill a reservation.
    pub fn insert(
        &mut self,
        reservation: Reservation,
        info: InstanceInfo,
    ) -> Result<(), InternalError> {
        match self.entries.get(&reservation.key) {
            Some(Slot::Ready(existing)) => Err(InternalError::CacheKeyConflict {
                key: reservation.key,
                existing: existing.module.to_string(),
            }),
            _ => {
                self.entries.insert(reservation.key, Slot::Ready(info));
                Ok(())
            }
        }
    }

    /// Abandon a reservation after a failed build.
    pub fn release(&mut self, reservation: Reservation) {
        if let Some(Slot::Reserved) = self.entries.get(&reservation.key) {
            self.entries.remove(&reservation.key);
        }
    }

    pub fn get(&self, key: &str) -> Option<&InstanceInfo> {
        match self.entries.get(key) {
            Some(Slot::Ready(info)) => Some(info),
            _ => None,
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Number of built instances.
    pub fn len(&self) -> usize {
        self.entries
            .values()
            .filter(|slot| matches!(slot, Slot::Ready(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
