//! Backup destination registry and default destinations
//!
//! The registry owns the ordered destination list of one session. The default
//! set lives beside it with its own lifecycle: entries survive removal of the
//! destination from a registry and are reconciled by the presentation layer.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

use crate::{Destination, DestinationId, DestinationKind};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Unknown destination {0}")]
    UnknownDestination(DestinationId),

    #[error("Duplicate destination id {0}")]
    DuplicateId(DestinationId),
}

/// Classification of a folder before it becomes a destination
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DestinationDescriptor {
    pub path: String,
    pub label: String,
    pub kind: DestinationKind,
    #[serde(default)]
    pub has_existing_backup: bool,
}

/// Ordered list of destinations for one session
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct DestinationRegistry {
    destinations: Vec<Destination>,
}

impl DestinationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from stored destinations, rejecting repeated ids
    pub fn from_destinations(destinations: Vec<Destination>) -> Result<Self, RegistryError> {
        let mut seen = BTreeSet::new();
        for dest in &destinations {
            if !seen.insert(dest.id) {
                return Err(RegistryError::DuplicateId(dest.id));
            }
        }
        Ok(Self { destinations })
    }

    /// Add a destination with a freshly generated id
    ///
    /// New destinations start enabled.
    pub fn add(&mut self, descriptor: DestinationDescriptor) -> &Destination {
        let now_millis = chrono::Utc::now().timestamp_millis().max(0) as u64;
        let id = self.next_id(now_millis);

        self.destinations.push(Destination {
            id,
            path: descriptor.path,
            label: descriptor.label,
            kind: descriptor.kind,
            enabled: true,
            has_existing_backup: descriptor.has_existing_backup,
        });

        &self.destinations[self.destinations.len() - 1]
    }

    /// Remove a destination, returning it if it was present
    pub fn remove(&mut self, id: DestinationId) -> Option<Destination> {
        let index = self.destinations.iter().position(|d| d.id == id)?;
        Some(self.destinations.remove(index))
    }

    pub fn set_enabled(&mut self, id: DestinationId, enabled: bool) -> Result<(), RegistryError> {
        self.get_mut(id)?.enabled = enabled;
        Ok(())
    }

    /// Flip the enabled flag and return the new value
    pub fn toggle_enabled(&mut self, id: DestinationId) -> Result<bool, RegistryError> {
        let dest = self.get_mut(id)?;
        dest.enabled = !dest.enabled;
        Ok(dest.enabled)
    }

    /// Record that the session copy at this destination was deleted
    pub fn mark_backup_absent(&mut self, id: DestinationId) -> Result<(), RegistryError> {
        self.get_mut(id)?.has_existing_backup = false;
        Ok(())
    }

    pub fn get(&self, id: DestinationId) -> Option<&Destination> {
        self.destinations.iter().find(|d| d.id == id)
    }

    pub fn contains(&self, id: DestinationId) -> bool {
        self.get(id).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Destination> {
        self.destinations.iter()
    }

    pub fn enabled(&self) -> impl Iterator<Item = &Destination> {
        self.destinations.iter().filter(|d| d.enabled)
    }

    pub fn enabled_count(&self) -> usize {
        self.enabled().count()
    }

    pub fn len(&self) -> usize {
        self.destinations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.destinations.is_empty()
    }

    pub fn as_slice(&self) -> &[Destination] {
        &self.destinations
    }

    fn get_mut(&mut self, id: DestinationId) -> Result<&mut Destination, RegistryError> {
        self.destinations
            .iter_mut()
            .find(|d| d.id == id)
            .ok_or(RegistryError::UnknownDestination(id))
    }

    // Millisecond timestamps, bumped past every id already in use
    fn next_id(&self, now_millis: u64) -> DestinationId {
        let max_existing = self.destinations.iter().map(|d| d.id.0).max();
        match max_existing {
            Some(max) if max >= now_millis => DestinationId(max + 1),
            _ => DestinationId(now_millis),
        }
    }
}

/// Destinations applied automatically to sessions without a stored config
///
/// Each entry keeps a snapshot of the destination taken when it was marked,
/// so a later session can be seeded even after the original registry is gone.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct DefaultDestinationSet {
    entries: BTreeMap<DestinationId, Destination>,
}

impl DefaultDestinationSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark or unmark a registry destination as default
    ///
    /// Returns whether the destination is a default afterwards. Unmarking
    /// works for stale ids that are no longer in the registry.
    pub fn toggle(
        &mut self,
        registry: &DestinationRegistry,
        id: DestinationId,
    ) -> Result<bool, RegistryError> {
        if self.entries.remove(&id).is_some() {
            return Ok(false);
        }

        let dest = registry
            .get(id)
            .ok_or(RegistryError::UnknownDestination(id))?;
        self.entries.insert(id, dest.clone());
        Ok(true)
    }

    pub fn contains(&self, id: DestinationId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn ids(&self) -> impl Iterator<Item = DestinationId> + '_ {
        self.entries.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Default ids with no counterpart in `registry`
    pub fn stale_ids(&self, registry: &DestinationRegistry) -> Vec<DestinationId> {
        self.ids().filter(|id| !registry.contains(*id)).collect()
    }

    /// Registry for a session that has never been configured
    pub fn seed_registry(&self) -> DestinationRegistry {
        let destinations = self
            .entries
            .values()
            .map(|dest| Destination {
                has_existing_backup: false,
                ..dest.clone()
            })
            .collect();

        // Keys are unique, so ids are too
        DestinationRegistry { destinations }
    }
}
