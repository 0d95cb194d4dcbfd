//! Runtime chunk store: the live counterpart of one chunk definition.
//!
//! A chunk moves one way through three states. `Unloaded` knows only its
//! definition; `Preloaded` has captured which reference numbers the
//! definition contributes (cheap membership tests without instantiation);
//! `Loaded` holds live objects. Requesting an earlier state is a no-op.
//!
//! Containment mutations are called from the World Index, which passes the
//! identity registry in so both sides change in the same step. No other code
//! should touch `insert_object`/`take_object` directly.

use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;
use slotmap::new_key_type;

use duskfall_content::ids::{GridKey, ObjectId, RecordId};
use duskfall_content::records::ChunkDef;
use duskfall_content::save::{ChunkStateRecord, FogRecord, ObjectStateRecord};

use crate::registry::ObjectRegistry;

new_key_type! {
    /// Arena handle of one runtime chunk. Valid until the index is cleared;
    /// a stale handle afterwards misses instead of dangling.
    pub struct ChunkId;
}

/// Lifecycle of a runtime chunk, in progression order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ChunkStatus {
    Unloaded,
    Preloaded,
    Loaded,
}

/// One live object instance.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveObject {
    pub id: ObjectId,
    pub base: RecordId,
    pub pos: [f32; 3],
    pub count: u32,
    pub enabled: bool,
}

impl LiveObject {
    pub fn new(id: ObjectId, base: RecordId, pos: [f32; 3]) -> Self {
        Self { id, base, pos, count: 1, enabled: true }
    }

    fn to_state(&self) -> ObjectStateRecord {
        ObjectStateRecord {
            id: self.id,
            base: self.base.clone(),
            pos: self.pos,
            count: self.count,
            enabled: self.enabled,
        }
    }

    pub(crate) fn from_state(state: &ObjectStateRecord) -> Self {
        Self {
            id: state.id,
            base: state.base.clone(),
            pos: state.pos,
            count: state.count,
            enabled: state.enabled,
        }
    }
}

/// Runtime store of one chunk.
pub struct Chunk {
    id: ChunkId,
    def: ChunkDef,
    status: ChunkStatus,
    /// Reference numbers the definition contributes, captured on preload.
    ids: HashMap<ObjectId, RecordId>,
    /// Live objects, in instantiation order so saves are deterministic.
    objects: IndexMap<ObjectId, LiveObject>,
    /// Definition placements deleted at runtime; suppressed on future loads.
    despawned: HashSet<ObjectId>,
    water_override: Option<f32>,
    last_visit: Option<f64>,
    fog: Option<FogRecord>,
    dirty: bool,
}

impl Chunk {
    pub fn new(id: ChunkId, def: ChunkDef) -> Self {
        Self {
            id,
            def,
            status: ChunkStatus::Unloaded,
            ids: HashMap::new(),
            objects: IndexMap::new(),
            despawned: HashSet::new(),
            water_override: None,
            last_visit: None,
            fog: None,
            dirty: false,
        }
    }

    // ── Identity ────────────────────────────────────────────────────────

    pub fn id(&self) -> ChunkId {
        self.id
    }

    pub fn def(&self) -> &ChunkDef {
        &self.def
    }

    pub fn record_id(&self) -> &RecordId {
        &self.def.id
    }

    pub fn grid_key(&self) -> Option<&GridKey> {
        self.def.grid_key()
    }

    /// Identity for logs: the authored display name when there is one,
    /// otherwise the record id.
    pub fn describe(&self) -> String {
        if self.def.display_name.is_empty() {
            self.def.id.to_string()
        } else {
            self.def.display_name.clone()
        }
    }

    // ── Lifecycle ───────────────────────────────────────────────────────

    pub fn status(&self) -> ChunkStatus {
        self.status
    }

    pub fn is_loaded(&self) -> bool {
        self.status == ChunkStatus::Loaded
    }

    /// Capture the definition's reference numbers without instantiating.
    pub fn preload(&mut self) {
        if self.status >= ChunkStatus::Preloaded {
            return;
        }
        for placement in &self.def.placements {
            self.ids.insert(placement.id, placement.base.clone());
        }
        self.status = ChunkStatus::Preloaded;
    }

    /// Instantiate live objects from the definition and register them.
    ///
    /// Placements are skipped when the runtime deleted them (despawned set)
    /// or when the registry already assigns the reference number to another
    /// chunk: an authoritative save delta moved the object and the definition
    /// spawn must not duplicate it.
    pub fn load(&mut self, registry: &mut ObjectRegistry) {
        if self.status == ChunkStatus::Loaded {
            return;
        }
        self.preload();
        for placement in &self.def.placements {
            if self.despawned.contains(&placement.id) {
                continue;
            }
            if registry.owner(placement.id).is_some_and(|owner| owner != self.id) {
                continue;
            }
            self.objects.insert(
                placement.id,
                LiveObject {
                    id: placement.id,
                    base: placement.base.clone(),
                    pos: placement.pos,
                    count: placement.count,
                    enabled: true,
                },
            );
            registry.insert(placement.id, self.id);
        }
        self.status = ChunkStatus::Loaded;
    }

    // ── Object access ───────────────────────────────────────────────────

    /// Membership test for a reference number at the current state. Costs
    /// nothing beyond a map probe; Unloaded chunks always answer no.
    pub fn contains_id(&self, id: ObjectId) -> bool {
        match self.status {
            ChunkStatus::Unloaded => false,
            ChunkStatus::Preloaded => self.ids.contains_key(&id) && !self.despawned.contains(&id),
            ChunkStatus::Loaded => self.objects.contains_key(&id),
        }
    }

    /// Does any placement or live object use this base record?
    pub fn contains_base(&self, base: &RecordId) -> bool {
        match self.status {
            ChunkStatus::Unloaded => false,
            ChunkStatus::Preloaded => self
                .ids
                .iter()
                .any(|(id, b)| b == base && !self.despawned.contains(id)),
            ChunkStatus::Loaded => self.objects.values().any(|o| &o.base == base),
        }
    }

    pub fn live_object(&self, id: ObjectId) -> Option<&LiveObject> {
        self.objects.get(&id)
    }

    pub fn live_object_mut(&mut self, id: ObjectId) -> Option<&mut LiveObject> {
        self.objects.get_mut(&id)
    }

    pub fn objects(&self) -> impl Iterator<Item = &LiveObject> {
        self.objects.values()
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    // ── Containment mutation (World Index only) ─────────────────────────

    pub(crate) fn insert_object(&mut self, object: LiveObject, registry: &mut ObjectRegistry) {
        debug_assert!(self.is_loaded(), "insert into a chunk that is not loaded");
        registry.insert(object.id, self.id);
        self.objects.insert(object.id, object);
        self.dirty = true;
    }

    /// Remove and return a live object. Definition-contributed ids go on the
    /// despawned list so future loads do not resurrect them.
    pub(crate) fn take_object(
        &mut self,
        id: ObjectId,
        registry: &mut ObjectRegistry,
    ) -> Option<LiveObject> {
        let object = self.objects.shift_remove(&id)?;
        if self.ids.contains_key(&id) {
            self.despawned.insert(id);
        }
        registry.remove(id, self.id);
        self.dirty = true;
        Some(object)
    }

    // ── Ambient state ───────────────────────────────────────────────────

    /// Effective water level: runtime override, else the authored one.
    pub fn water_level(&self) -> Option<f32> {
        self.water_override.or(self.def.water_level)
    }

    pub fn set_water_level(&mut self, level: f32) {
        self.water_override = Some(level);
        self.dirty = true;
    }

    pub fn fog(&self) -> Option<&FogRecord> {
        self.fog.as_ref()
    }

    pub fn set_fog(&mut self, fog: FogRecord) {
        self.fog = Some(fog);
        self.dirty = true;
    }

    pub fn last_visit(&self) -> Option<f64> {
        self.last_visit
    }

    pub fn mark_visited(&mut self, time: f64) {
        self.last_visit = Some(time);
        self.dirty = true;
    }

    // ── Save delta ──────────────────────────────────────────────────────

    /// True when this chunk carries state a save must persist.
    pub fn has_state(&self) -> bool {
        self.dirty
    }

    /// Snapshot the delta. Objects come out in instantiation order and the
    /// despawn list is sorted, so equal histories serialize identically.
    pub fn state_record(&self) -> ChunkStateRecord {
        let mut despawned: Vec<ObjectId> = self.despawned.iter().copied().collect();
        despawned.sort();
        ChunkStateRecord {
            id: self.def.id.clone(),
            water_level: self.water_override,
            last_visit: self.last_visit,
            fog: self.fog.clone(),
            objects: self.objects.values().map(LiveObject::to_state).collect(),
            despawned,
        }
    }

    /// Apply a restored delta to a loaded chunk. Object states must already
    /// be remapped and validated by the caller; cross-chunk moves are also
    /// resolved there, so every upsert lands in this chunk.
    pub(crate) fn apply_state(&mut self, record: ChunkStateRecord, registry: &mut ObjectRegistry) {
        debug_assert!(self.is_loaded(), "restoring state into a chunk that is not loaded");
        self.water_override = record.water_level;
        self.last_visit = record.last_visit;
        self.fog = record.fog;
        for id in record.despawned {
            self.despawned.insert(id);
            if self.objects.shift_remove(&id).is_some() {
                registry.remove(id, self.id);
            }
        }
        for state in record.objects {
            registry.insert(state.id, self.id);
            self.objects.insert(state.id, LiveObject::from_state(&state));
        }
        // Restored state still differs from the definitions; keep it dirty so
        // the next save writes it again.
        self.dirty = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use duskfall_content::records::PlacementDef;
    use slotmap::SlotMap;

    fn make_chunk(def: ChunkDef) -> (SlotMap<ChunkId, Chunk>, ChunkId) {
        let mut arena: SlotMap<ChunkId, Chunk> = SlotMap::with_key();
        let id = arena.insert_with_key(|key| Chunk::new(key, def));
        (arena, id)
    }

    fn def_with_two_barrels() -> ChunkDef {
        ChunkDef::named("Test Cellar")
            .with_placement(PlacementDef::new(
                ObjectId::new(0, 1),
                RecordId::name("barrel_01"),
                [0.0, 0.0, 0.0],
            ))
            .with_placement(PlacementDef::new(
                ObjectId::new(0, 2),
                RecordId::name("barrel_01"),
                [1.0, 0.0, 0.0],
            ))
    }

    #[test]
    fn lifecycle_is_one_directional() {
        let (mut arena, id) = make_chunk(def_with_two_barrels());
        let mut registry = ObjectRegistry::new();
        let chunk = &mut arena[id];

        assert_eq!(chunk.status(), ChunkStatus::Unloaded);
        assert!(!chunk.contains_id(ObjectId::new(0, 1)));

        chunk.preload();
        assert_eq!(chunk.status(), ChunkStatus::Preloaded);
        assert!(chunk.contains_id(ObjectId::new(0, 1)));
        assert_eq!(chunk.object_count(), 0);

        chunk.load(&mut registry);
        assert_eq!(chunk.status(), ChunkStatus::Loaded);
        assert_eq!(chunk.object_count(), 2);
        assert_eq!(registry.owner(ObjectId::new(0, 1)), Some(id));

        // Preload after load stays a no-op.
        chunk.preload();
        assert_eq!(chunk.status(), ChunkStatus::Loaded);
        chunk.load(&mut registry);
        assert_eq!(chunk.object_count(), 2);
    }

    #[test]
    fn take_object_suppresses_future_spawns() {
        let (mut arena, id) = make_chunk(def_with_two_barrels());
        let mut registry = ObjectRegistry::new();
        let chunk = &mut arena[id];
        chunk.load(&mut registry);

        let taken = chunk.take_object(ObjectId::new(0, 1), &mut registry);
        assert!(taken.is_some());
        assert!(chunk.has_state());
        assert_eq!(registry.owner(ObjectId::new(0, 1)), None);

        let record = chunk.state_record();
        assert_eq!(record.despawned, vec![ObjectId::new(0, 1)]);
        assert_eq!(record.objects.len(), 1);
    }

    #[test]
    fn load_skips_ids_owned_elsewhere() {
        let (mut arena, key) = make_chunk(def_with_two_barrels());
        let other = arena.insert_with_key(|k| Chunk::new(k, ChunkDef::named("Elsewhere")));
        let mut registry = ObjectRegistry::new();
        registry.insert(ObjectId::new(0, 2), other);

        let chunk = &mut arena[key];
        chunk.load(&mut registry);

        assert_eq!(chunk.object_count(), 1);
        assert!(chunk.live_object(ObjectId::new(0, 2)).is_none());
        assert_eq!(registry.owner(ObjectId::new(0, 2)), Some(other));
    }

    #[test]
    fn state_record_is_deterministic() {
        let (mut arena, id) = make_chunk(def_with_two_barrels());
        let mut registry = ObjectRegistry::new();
        let chunk = &mut arena[id];
        chunk.load(&mut registry);
        chunk.take_object(ObjectId::new(0, 2), &mut registry);
        chunk.take_object(ObjectId::new(0, 1), &mut registry);
        chunk.set_water_level(3.0);
        chunk.mark_visited(100.0);

        let record = chunk.state_record();
        // Sorted despawn list regardless of deletion order.
        assert_eq!(record.despawned, vec![ObjectId::new(0, 1), ObjectId::new(0, 2)]);
        assert_eq!(record.water_level, Some(3.0));
        assert_eq!(record.last_visit, Some(100.0));
        assert_eq!(record, chunk.state_record());
    }
}
