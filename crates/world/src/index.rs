//! The World Index: the one authority for which chunks exist this session.
//!
//! Every instantiated chunk lives in a slotmap arena and is reachable through
//! the master id table plus two ordered side tables (grid and named). The
//! side tables keep insertion order because the object search below leans on
//! it: grid chunks are probed newest-first, named chunks oldest-first.
//!
//! Grid chunks are synthesized on demand -- walking past the edge of authored
//! content always succeeds in the primary worldspace. Named chunks are only
//! ever found. The index is foreground-only: `&mut self` everywhere, no
//! locks, and handles it gives out stay valid until [`WorldIndex::clear`].

use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result};
use indexmap::{IndexMap, IndexSet};
use slotmap::SlotMap;
use tracing::{debug, warn};

use duskfall_content::ids::{GridKey, Name, ObjectId, RecordId, WorldspaceId};
use duskfall_content::records::ChunkDef;
use duskfall_content::save::{self, ChunkStateRecord, RawRecord, SaveWriter};
use duskfall_content::store::ContentStore;

use crate::chunk::{Chunk, ChunkId, ChunkStatus, LiveObject};
use crate::error::{WorldError, WorldResult};
use crate::registry::{ObjectRef, ObjectRegistry};

/// Collaborator notified when the index synthesizes a chunk no content file
/// authored. World generation attaches here.
pub trait WorldHooks {
    fn chunk_created(&self, chunk: ChunkId, def: &ChunkDef);
}

/// Hooks that do nothing.
pub struct NoHooks;

impl WorldHooks for NoHooks {
    fn chunk_created(&self, _chunk: ChunkId, _def: &ChunkDef) {}
}

/// Index tuning.
#[derive(Debug, Clone)]
pub struct IndexConfig {
    /// Slots in the object pointer cache.
    pub pointer_cache_size: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self { pointer_cache_size: 32 }
    }
}

/// Fixed ring of recently resolved objects. Purely an accelerator: a slot may
/// go stale at any time and every hit is revalidated before use.
struct PointerCache {
    slots: Vec<Option<(ObjectId, ChunkId)>>,
    next: usize,
}

impl PointerCache {
    fn new(size: usize) -> Self {
        Self { slots: vec![None; size.max(1)], next: 0 }
    }

    fn note(&mut self, id: ObjectId, chunk: ChunkId) {
        self.slots[self.next] = Some((id, chunk));
        self.next = (self.next + 1) % self.slots.len();
    }

    fn lookup(&self, id: ObjectId) -> Option<ChunkId> {
        self.slots
            .iter()
            .flatten()
            .find(|(cached, _)| *cached == id)
            .map(|(_, chunk)| *chunk)
    }

    fn clear(&mut self) {
        self.slots.fill(None);
        self.next = 0;
    }
}

pub struct WorldIndex {
    content: Arc<ContentStore>,
    hooks: Arc<dyn WorldHooks>,
    chunks: SlotMap<ChunkId, Chunk>,
    by_id: HashMap<RecordId, ChunkId>,
    grid: IndexMap<GridKey, ChunkId>,
    named: IndexMap<Name, ChunkId>,
    cache: PointerCache,
    registry: ObjectRegistry,
}

impl WorldIndex {
    pub fn new(content: Arc<ContentStore>) -> Self {
        Self::with_hooks(content, Arc::new(NoHooks), IndexConfig::default())
    }

    pub fn with_hooks(
        content: Arc<ContentStore>,
        hooks: Arc<dyn WorldHooks>,
        config: IndexConfig,
    ) -> Self {
        Self {
            content,
            hooks,
            chunks: SlotMap::with_key(),
            by_id: HashMap::new(),
            grid: IndexMap::new(),
            named: IndexMap::new(),
            cache: PointerCache::new(config.pointer_cache_size),
            registry: ObjectRegistry::new(),
        }
    }

    pub fn content(&self) -> &Arc<ContentStore> {
        &self.content
    }

    // ── Chunk lookup ────────────────────────────────────────────────────

    /// Look up a grid chunk, synthesizing a definition when no content file
    /// authored one. The `chunk_created` notification fires exactly when
    /// synthesis happened, before any load. Outside the primary worldspace
    /// the worldspace itself must be defined.
    pub fn grid_chunk(&mut self, key: &GridKey, force_load: bool) -> WorldResult<ChunkId> {
        if let Some(&id) = self.grid.get(key) {
            if force_load {
                self.load_chunk(id);
            }
            return Ok(id);
        }

        let (def, created) = match self.content.grid_chunk(key) {
            Some(def) => (def, false),
            None => {
                if let WorldspaceId::Named(space) = &key.space {
                    if !self.content.has_worldspace(space) {
                        return Err(WorldError::WorldspaceMissing(space.clone()));
                    }
                }
                let def = ChunkDef::empty_grid(key.clone());
                self.content.insert_chunk(def.clone());
                debug!("synthesized grid chunk at {key}");
                (def, true)
            }
        };

        let id = self.instantiate(def);
        if created {
            self.hooks.chunk_created(id, self.chunks[id].def());
        }
        if force_load {
            self.load_chunk(id);
        }
        Ok(id)
    }

    /// Find a named chunk. Never synthesizes: the runtime table first, then
    /// the catalog.
    pub fn find_named(&mut self, name: &str, force_load: bool) -> Option<ChunkId> {
        let folded = Name::new(name);
        let id = match self.named.get(&folded) {
            Some(&id) => id,
            None => {
                let def = self.content.named_chunk(&folded)?;
                self.instantiate(def)
            }
        };
        if force_load {
            self.load_chunk(id);
        }
        Some(id)
    }

    /// Hard variant of [`WorldIndex::find_named`].
    pub fn named_chunk(&mut self, name: &str, force_load: bool) -> WorldResult<ChunkId> {
        self.find_named(name, force_load)
            .ok_or_else(|| WorldError::NoChunkNamed(name.to_owned()))
    }

    /// Find a chunk by the name a player would use: named chunks, then grid
    /// chunks by display name, then the default-name alias (the catalog's
    /// default chunk name also means "any unnamed grid chunk"), then region
    /// display names.
    pub fn find_by_name(&mut self, name: &str, force_load: bool) -> Option<ChunkId> {
        if let Some(id) = self.find_named(name, force_load) {
            return Some(id);
        }
        if let Some(def) = self.content.grid_by_display_name(name) {
            return Some(self.adopt(def, force_load));
        }
        if Name::new(name).matches(&self.content.default_chunk_name()) {
            if let Some(def) = self.content.grid_by_display_name("") {
                return Some(self.adopt(def, force_load));
            }
        }
        if let Some(region) = self.content.region_by_display_name(name) {
            if let Some(def) = self.content.grid_by_region(&region.id) {
                return Some(self.adopt(def, force_load));
            }
        }
        None
    }

    /// Hard variant of [`WorldIndex::find_by_name`].
    pub fn chunk_by_name(&mut self, name: &str, force_load: bool) -> WorldResult<ChunkId> {
        self.find_by_name(name, force_load)
            .ok_or_else(|| WorldError::NoChunkNamed(name.to_owned()))
    }

    /// Resolve a record id of either kind. Grid ids decode to coordinates
    /// and go through [`WorldIndex::grid_chunk`], so they can synthesize; a
    /// grid id in an undefined worldspace degrades to `None` here. Named ids
    /// are only found.
    pub fn find_by_id(&mut self, id: &RecordId, force_load: bool) -> Option<ChunkId> {
        if let Some(&chunk) = self.by_id.get(id) {
            if force_load {
                self.load_chunk(chunk);
            }
            return Some(chunk);
        }
        match id {
            RecordId::Grid(key) => self.grid_chunk(key, force_load).ok(),
            RecordId::Name(name) => {
                let def = self.content.named_chunk(name)?;
                Some(self.adopt(def, force_load))
            }
        }
    }

    /// Hard variant of [`WorldIndex::find_by_id`].
    pub fn chunk_by_id(&mut self, id: &RecordId, force_load: bool) -> WorldResult<ChunkId> {
        self.find_by_id(id, force_load)
            .ok_or_else(|| WorldError::ChunkNotFound(id.clone()))
    }

    /// Build the runtime store for a definition and index it.
    fn instantiate(&mut self, def: ChunkDef) -> ChunkId {
        debug_assert!(!self.by_id.contains_key(&def.id));
        let record_id = def.id.clone();
        let id = self.chunks.insert_with_key(|key| Chunk::new(key, def));
        match &record_id {
            RecordId::Grid(key) => {
                self.grid.insert(key.clone(), id);
            }
            RecordId::Name(name) => {
                self.named.insert(name.clone(), id);
            }
        }
        self.by_id.insert(record_id, id);
        id
    }

    /// Index a definition that may or may not be instantiated yet.
    fn adopt(&mut self, def: ChunkDef, force_load: bool) -> ChunkId {
        let id = match self.by_id.get(&def.id) {
            Some(&id) => id,
            None => self.instantiate(def),
        };
        if force_load {
            self.load_chunk(id);
        }
        id
    }

    // ── Chunk access ────────────────────────────────────────────────────

    pub fn chunk(&self, id: ChunkId) -> Option<&Chunk> {
        self.chunks.get(id)
    }

    pub fn chunk_mut(&mut self, id: ChunkId) -> Option<&mut Chunk> {
        self.chunks.get_mut(id)
    }

    /// Every instantiated chunk, in arena order.
    pub fn chunks(&self) -> impl Iterator<Item = &Chunk> {
        self.chunks.values()
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn preload_chunk(&mut self, id: ChunkId) {
        if let Some(chunk) = self.chunks.get_mut(id) {
            chunk.preload();
        }
    }

    pub fn load_chunk(&mut self, id: ChunkId) {
        let Self { chunks, registry, .. } = self;
        if let Some(chunk) = chunks.get_mut(id) {
            chunk.load(registry);
        }
    }

    // ── Object lookup ───────────────────────────────────────────────────

    /// Registry passthrough: where is this reference number right now, if
    /// anywhere. Never loads anything.
    pub fn registered(&self, id: ObjectId) -> Option<ObjectRef> {
        self.registry.get_or_empty(id)
    }

    pub fn registry(&self) -> &ObjectRegistry {
        &self.registry
    }

    /// Resolve a reference number to a live object, loading lazily.
    ///
    /// Fast path is the pointer cache, revalidated against the arena since a
    /// slot may be stale after a removal or a clear. The fallback searches
    /// instantiated grid chunks newest-first (with duplicated reference
    /// numbers the last-inserted chunk wins), then named chunks oldest-first,
    /// then catalog definitions never instantiated, grid before named,
    /// instantiating as it goes. A chunk is preloaded for the membership
    /// test and pays the full load only on a hit. Successful fallback
    /// lookups repopulate the cache.
    pub fn find_object(&mut self, id: ObjectId) -> Option<ObjectRef> {
        if let Some(chunk_id) = self.cache.lookup(id) {
            match self.chunks.get(chunk_id) {
                Some(chunk) if chunk.live_object(id).is_some() => {
                    return Some(ObjectRef { chunk: chunk_id, id });
                }
                _ => debug!("stale pointer-cache slot for object {id}"),
            }
        }

        let probe_order: Vec<ChunkId> = self
            .grid
            .values()
            .rev()
            .chain(self.named.values())
            .copied()
            .collect();
        for chunk_id in probe_order {
            if let Some(found) = self.probe_chunk(chunk_id, id) {
                self.cache.note(id, found.chunk);
                return Some(found);
            }
        }

        // Catalog definitions nothing instantiated yet.
        let uninstantiated: Vec<RecordId> = self
            .content
            .grid_ids()
            .into_iter()
            .chain(self.content.named_ids())
            .filter(|record| !self.by_id.contains_key(record))
            .collect();
        for record in uninstantiated {
            let Some(def) = self.content.chunk(&record) else { continue };
            let chunk_id = self.instantiate(def);
            if let Some(found) = self.probe_chunk(chunk_id, id) {
                self.cache.note(id, found.chunk);
                return Some(found);
            }
        }
        None
    }

    /// Preload for the membership test; load fully only on a hit. The
    /// post-load recheck matters: a placement can be suppressed at load time
    /// (moved elsewhere by a restored delta), in which case the id is not
    /// actually here.
    fn probe_chunk(&mut self, chunk_id: ChunkId, id: ObjectId) -> Option<ObjectRef> {
        let Self { chunks, registry, .. } = self;
        let chunk = chunks.get_mut(chunk_id)?;
        if chunk.status() == ChunkStatus::Unloaded {
            chunk.preload();
        }
        if !chunk.contains_id(id) {
            return None;
        }
        chunk.load(registry);
        chunk.live_object(id)?;
        Some(ObjectRef { chunk: chunk_id, id })
    }

    /// Every live instance of a base record across instantiated chunks.
    /// Unloaded chunks are preloaded for the membership test; only chunks
    /// that contain the base pay a full load.
    pub fn all_instances_of(&mut self, base: &RecordId) -> Vec<ObjectRef> {
        let chunk_ids: Vec<ChunkId> = self.chunks.keys().collect();
        self.collect_instances(chunk_ids, base)
    }

    /// Like [`WorldIndex::all_instances_of`], but sweeps the whole grid
    /// catalog, instantiating definitions as needed. The expensive
    /// compatibility path behind "find every such object in the wilds".
    pub fn grid_instances_of(&mut self, base: &RecordId) -> Vec<ObjectRef> {
        let missing: Vec<RecordId> = self
            .content
            .grid_ids()
            .into_iter()
            .filter(|record| !self.by_id.contains_key(record))
            .collect();
        for record in missing {
            if let Some(def) = self.content.chunk(&record) {
                self.instantiate(def);
            }
        }
        let chunk_ids: Vec<ChunkId> = self.grid.values().copied().collect();
        self.collect_instances(chunk_ids, base)
    }

    fn collect_instances(&mut self, chunk_ids: Vec<ChunkId>, base: &RecordId) -> Vec<ObjectRef> {
        let mut out = Vec::new();
        for chunk_id in chunk_ids {
            let Self { chunks, registry, .. } = self;
            let Some(chunk) = chunks.get_mut(chunk_id) else { continue };
            if chunk.status() == ChunkStatus::Unloaded {
                chunk.preload();
            }
            if !chunk.contains_base(base) {
                continue;
            }
            chunk.load(registry);
            out.extend(
                chunk
                    .objects()
                    .filter(|object| &object.base == base)
                    .map(|object| ObjectRef { chunk: chunk_id, id: object.id }),
            );
        }
        out
    }

    /// Base-id snapshot for a prefetch request: every placement base plus
    /// every live object's base, deduplicated in first-seen order.
    pub fn prefetch_bases(&self, id: ChunkId) -> Vec<RecordId> {
        let Some(chunk) = self.chunks.get(id) else {
            return Vec::new();
        };
        let mut bases: IndexSet<RecordId> = IndexSet::new();
        for placement in &chunk.def().placements {
            bases.insert(placement.base.clone());
        }
        for object in chunk.objects() {
            bases.insert(object.base.clone());
        }
        bases.into_iter().collect()
    }

    // ── Containment mutation ────────────────────────────────────────────
    //
    // The only paths that change which chunk holds which object. Each keeps
    // the identity registry in sync within the same call.

    /// Spawn a new object with a freshly generated reference number. Loads
    /// the chunk first; `None` only for a stale handle.
    pub fn spawn_object(
        &mut self,
        chunk: ChunkId,
        base: RecordId,
        pos: [f32; 3],
    ) -> Option<ObjectRef> {
        self.load_chunk(chunk);
        let Self { chunks, registry, .. } = self;
        let store = chunks.get_mut(chunk)?;
        let id = registry.generate();
        store.insert_object(LiveObject::new(id, base, pos), registry);
        Some(ObjectRef { chunk, id })
    }

    /// Insert an existing live object, keeping its reference number.
    pub fn insert_object(&mut self, chunk: ChunkId, object: LiveObject) -> Option<ObjectRef> {
        self.load_chunk(chunk);
        let Self { chunks, registry, .. } = self;
        let store = chunks.get_mut(chunk)?;
        let id = object.id;
        store.insert_object(object, registry);
        Some(ObjectRef { chunk, id })
    }

    /// Remove a live object entirely. Definition-contributed placements are
    /// remembered as despawned so a future load will not resurrect them.
    pub fn remove_object(&mut self, obj: ObjectRef) -> Option<LiveObject> {
        let Self { chunks, registry, .. } = self;
        chunks.get_mut(obj.chunk)?.take_object(obj.id, registry)
    }

    /// Move an object between chunks, preserving its reference number.
    pub fn move_object(&mut self, obj: ObjectRef, to: ChunkId) -> Option<ObjectRef> {
        if obj.chunk == to {
            return Some(obj);
        }
        if !self.chunks.contains_key(to) {
            return None;
        }
        let taken = self.remove_object(obj)?;
        self.insert_object(to, taken)
    }

    pub fn last_generated(&self) -> u32 {
        self.registry.last_generated()
    }

    pub fn set_last_generated(&mut self, serial: u32) {
        self.registry.set_last_generated(serial);
    }

    // ── Save / restore ──────────────────────────────────────────────────

    /// Chunks the next save will write.
    pub fn modified_count(&self) -> usize {
        self.chunks.values().filter(|chunk| chunk.has_state()).count()
    }

    /// Write every modified chunk's delta, in arena order. A chunk that is
    /// dirty but never finished loading is loaded first so its snapshot is
    /// complete. Returns the number of records written, which always equals
    /// [`WorldIndex::modified_count`] taken beforehand.
    pub fn write_modified<W: Write>(&mut self, writer: &mut SaveWriter<W>) -> Result<usize> {
        let dirty: Vec<ChunkId> = self
            .chunks
            .iter()
            .filter(|(_, chunk)| chunk.has_state())
            .map(|(id, _)| id)
            .collect();
        for &id in &dirty {
            self.load_chunk(id);
            let chunk = &self.chunks[id];
            writer
                .record(save::CHUNK_STATE, &chunk.state_record())
                .with_context(|| format!("writing state of chunk {}", chunk.describe()))?;
        }
        debug!("wrote {} modified chunk records", dirty.len());
        Ok(dirty.len())
    }

    /// Restore one record from a save stream. Returns `Ok(false)` when the
    /// tag belongs to someone else so the caller can route it on.
    ///
    /// Stale persisted references are soft: a record whose chunk id no
    /// longer resolves is dropped whole, an object state whose content file
    /// left the load order or whose base vanished is dropped alone, each
    /// with a warning.
    pub fn read_chunk_record(
        &mut self,
        record: &RawRecord,
        remap: &HashMap<i32, i32>,
    ) -> Result<bool> {
        if record.tag != save::CHUNK_STATE {
            return Ok(false);
        }
        let mut state: ChunkStateRecord = record.decode()?;

        let Some(chunk_id) = self.find_by_id(&state.id, true) else {
            warn!(
                "dropping saved chunk {}: it no longer resolves against current content",
                state.id
            );
            return Ok(true);
        };

        let mut objects = Vec::with_capacity(state.objects.len());
        for mut object in std::mem::take(&mut state.objects) {
            match object.id.remapped(remap) {
                Some(id) => object.id = id,
                None => {
                    warn!(
                        "dropping object {} in chunk {}: its content file left the load order",
                        object.id, state.id
                    );
                    continue;
                }
            }
            if self.content.proto(&object.base).is_none() {
                warn!(
                    "dropping object {} in chunk {}: base {} no longer exists",
                    object.id, state.id, object.base
                );
                continue;
            }
            objects.push(object);
        }
        state.objects = objects;
        state.despawned = state
            .despawned
            .iter()
            .filter_map(|id| id.remapped(remap))
            .collect();

        // An object in this record may currently sit in another chunk (its
        // definition spawned it there before this record was read). The
        // record is authoritative: release the old instance first.
        for object in &state.objects {
            if let Some(owner) = self.registry.owner(object.id) {
                if owner != chunk_id {
                    let Self { chunks, registry, .. } = self;
                    if let Some(previous) = chunks.get_mut(owner) {
                        previous.take_object(object.id, registry);
                    }
                }
            }
        }

        let Self { chunks, registry, .. } = self;
        if let Some(chunk) = chunks.get_mut(chunk_id) {
            chunk.apply_state(state, registry);
        }
        Ok(true)
    }

    /// Forget every runtime chunk. Content definitions survive. Handed-out
    /// handles become detectably invalid; registry links go first, then the
    /// arena, tables and pointer cache.
    pub fn clear(&mut self) {
        self.registry.clear();
        self.chunks.clear();
        self.by_id.clear();
        self.grid.clear();
        self.named.clear();
        self.cache.clear();
    }
}
