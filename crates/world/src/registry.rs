//! Object identity registry: reference number → owning chunk back-links.
//!
//! The registry never owns objects; it answers "which chunk holds this
//! reference number right now". Both sides of a containment change go through
//! the World Index in one step, so the table cannot drift from chunk contents.
//! Links are plain arena handles: after a full reset they become detectably
//! invalid rather than dangling.

use std::collections::HashMap;

use duskfall_content::ids::ObjectId;

use crate::chunk::ChunkId;

/// Resolved location of a live object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectRef {
    pub chunk: ChunkId,
    pub id: ObjectId,
}

/// Back-link table plus the allocator for spawned reference numbers.
#[derive(Debug, Default)]
pub struct ObjectRegistry {
    entries: HashMap<ObjectId, ChunkId>,
    last_generated: u32,
    revision: u64,
}

impl ObjectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Point `id` at `chunk`. Re-pointing an id (a cross-chunk move, or the
    /// same reference number appearing in two content files) overwrites the
    /// old link; the newest registration is authoritative.
    pub fn insert(&mut self, id: ObjectId, chunk: ChunkId) {
        if let Some(previous) = self.entries.insert(id, chunk) {
            if previous != chunk {
                tracing::debug!("object {id} re-registered to another chunk");
            }
        }
        self.revision += 1;
    }

    /// Drop the link for `id`, but only while it still points at `chunk`.
    /// During a move the destination registers first, so the source's
    /// removal must not clobber the newer link.
    pub fn remove(&mut self, id: ObjectId, chunk: ChunkId) {
        if self.entries.get(&id) == Some(&chunk) {
            self.entries.remove(&id);
            self.revision += 1;
        }
    }

    pub fn get_or_empty(&self, id: ObjectId) -> Option<ObjectRef> {
        self.owner(id).map(|chunk| ObjectRef { chunk, id })
    }

    pub fn owner(&self, id: ObjectId) -> Option<ChunkId> {
        self.entries.get(&id).copied()
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Allocate the next spawned reference number.
    pub fn generate(&mut self) -> ObjectId {
        self.last_generated += 1;
        ObjectId::spawned(self.last_generated)
    }

    pub fn last_generated(&self) -> u32 {
        self.last_generated
    }

    /// Restore the allocator after loading a save, so freshly spawned objects
    /// never reuse a persisted reference number.
    pub fn set_last_generated(&mut self, serial: u32) {
        self.last_generated = self.last_generated.max(serial);
    }

    /// Bumped on every structural change. Cheap way for caches keyed on
    /// registry contents to notice they are stale.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every link. The spawned-serial allocator survives; reference
    /// numbers stay unique across a session even through a full reset.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.revision += 1;
    }
}
