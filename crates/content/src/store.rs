use crate::ids::{GridKey, Name, RecordId};
use crate::records::{ChunkDef, ProtoDef, RegionDef, WorldspaceDef};
use dashmap::DashMap;
use indexmap::IndexMap;
use std::sync::RwLock;

/// Settings key for the name shown for grid chunks with no authored name.
pub const SETTING_DEFAULT_CHUNK_NAME: &str = "default_chunk_name";

/// Built-in fallback when the catalog carries no default-chunk-name setting.
pub const DEFAULT_CHUNK_NAME: &str = "Wilderness";

/// The loaded world-definition catalog.
///
/// Read-mostly and shared as `Arc<ContentStore>` between the foreground and
/// background prefetch workers; every method takes `&self`. The only write
/// after loading is the append of synthesized grid-chunk definitions.
///
/// Chunk, region and worldspace tables keep catalog insertion order because
/// name and region searches promise "first definition in catalog order".
/// Prototypes and settings sit in `DashMap`s: they are the tables worker
/// threads hit while resolving model paths.
///
/// Lookups return owned clones, never guards, so no table lock outlives a
/// call and re-entrant use from a single thread cannot deadlock.
pub struct ContentStore {
    chunks: RwLock<IndexMap<RecordId, ChunkDef>>,
    regions: RwLock<IndexMap<Name, RegionDef>>,
    worldspaces: RwLock<IndexMap<Name, WorldspaceDef>>,
    protos: DashMap<RecordId, ProtoDef>,
    settings: DashMap<Name, String>,
}

impl ContentStore {
    pub fn new() -> Self {
        Self {
            chunks: RwLock::new(IndexMap::new()),
            regions: RwLock::new(IndexMap::new()),
            worldspaces: RwLock::new(IndexMap::new()),
            protos: DashMap::new(),
            settings: DashMap::new(),
        }
    }

    // ── Loading / synthesis ─────────────────────────────────────────────

    /// Insert a chunk definition. A later insert with the same id replaces
    /// the record in place, keeping its original catalog position (load-order
    /// override semantics).
    pub fn insert_chunk(&self, def: ChunkDef) {
        self.chunks
            .write()
            .expect("chunk table poisoned")
            .insert(def.id.clone(), def);
    }

    pub fn insert_region(&self, def: RegionDef) {
        self.regions
            .write()
            .expect("region table poisoned")
            .insert(def.id.clone(), def);
    }

    pub fn insert_worldspace(&self, def: WorldspaceDef) {
        self.worldspaces
            .write()
            .expect("worldspace table poisoned")
            .insert(def.id.clone(), def);
    }

    pub fn insert_proto(&self, def: ProtoDef) {
        self.protos.insert(def.id.clone(), def);
    }

    pub fn set_setting(&self, key: &str, value: &str) {
        self.settings.insert(Name::new(key), value.to_owned());
    }

    // ── Chunk lookups ───────────────────────────────────────────────────

    pub fn chunk(&self, id: &RecordId) -> Option<ChunkDef> {
        self.chunks.read().expect("chunk table poisoned").get(id).cloned()
    }

    pub fn grid_chunk(&self, key: &GridKey) -> Option<ChunkDef> {
        self.chunk(&RecordId::Grid(key.clone()))
    }

    pub fn named_chunk(&self, name: &Name) -> Option<ChunkDef> {
        self.chunk(&RecordId::Name(name.clone()))
    }

    /// First grid definition in catalog order whose display name matches
    /// case-insensitively. An empty query matches unnamed grid chunks.
    pub fn grid_by_display_name(&self, raw: &str) -> Option<ChunkDef> {
        let wanted = Name::new(raw);
        self.chunks
            .read()
            .expect("chunk table poisoned")
            .values()
            .find(|def| def.is_grid() && wanted.matches(&def.display_name))
            .cloned()
    }

    /// First grid definition in catalog order belonging to the region.
    pub fn grid_by_region(&self, region: &Name) -> Option<ChunkDef> {
        self.chunks
            .read()
            .expect("chunk table poisoned")
            .values()
            .find(|def| def.is_grid() && def.region.as_ref() == Some(region))
            .cloned()
    }

    // ── Region / worldspace / prototype lookups ─────────────────────────

    pub fn region_by_display_name(&self, raw: &str) -> Option<RegionDef> {
        self.regions
            .read()
            .expect("region table poisoned")
            .values()
            .find(|def| Name::new(raw).matches(&def.display_name))
            .cloned()
    }

    pub fn worldspace(&self, id: &Name) -> Option<WorldspaceDef> {
        self.worldspaces
            .read()
            .expect("worldspace table poisoned")
            .get(id)
            .cloned()
    }

    pub fn has_worldspace(&self, id: &Name) -> bool {
        self.worldspaces
            .read()
            .expect("worldspace table poisoned")
            .contains_key(id)
    }

    pub fn proto(&self, id: &RecordId) -> Option<ProtoDef> {
        self.protos.get(id).map(|r| r.value().clone())
    }

    // ── Id snapshots ────────────────────────────────────────────────────

    /// Grid-chunk ids in catalog order, as an owned snapshot. Callers iterate
    /// these while instantiating chunks, so no lock is held across the walk.
    pub fn grid_ids(&self) -> Vec<RecordId> {
        self.chunks
            .read()
            .expect("chunk table poisoned")
            .values()
            .filter(|def| def.is_grid())
            .map(|def| def.id.clone())
            .collect()
    }

    /// Named-chunk ids in catalog order, as an owned snapshot.
    pub fn named_ids(&self) -> Vec<RecordId> {
        self.chunks
            .read()
            .expect("chunk table poisoned")
            .values()
            .filter(|def| !def.is_grid())
            .map(|def| def.id.clone())
            .collect()
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.read().expect("chunk table poisoned").len()
    }

    // ── Settings ────────────────────────────────────────────────────────

    /// Display name for grid chunks whose definition carries none.
    pub fn default_chunk_name(&self) -> String {
        self.settings
            .get(&Name::new(SETTING_DEFAULT_CHUNK_NAME))
            .map(|v| v.value().clone())
            .unwrap_or_else(|| DEFAULT_CHUNK_NAME.to_owned())
    }
}

impl Default for ContentStore {
    fn default() -> Self {
        Self::new()
    }
}
