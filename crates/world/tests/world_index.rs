//! World Index integration: chunk identity, name resolution, lazy object
//! search, and the containment mutations that keep the registry honest.

use std::sync::{Arc, Mutex};

use duskfall_content::ids::{GridKey, Name, ObjectId, RecordId, WorldspaceId};
use duskfall_content::records::{ChunkDef, PlacementDef, ProtoDef, RegionDef, WorldspaceDef};
use duskfall_content::store::ContentStore;
use duskfall_world::chunk::{ChunkId, ChunkStatus};
use duskfall_world::error::WorldError;
use duskfall_world::index::{IndexConfig, NoHooks, WorldHooks, WorldIndex};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Small authored world: one named chunk, two coastal grid chunks (one with a
/// display name), a region, and the prototypes their placements use.
fn catalog() -> Arc<ContentStore> {
    let content = ContentStore::new();
    content.insert_proto(ProtoDef::new("barrel_01", "models/props/barrel_01.glb"));
    content.insert_proto(ProtoDef::new("crab_01", "models/fauna/crab_01.glb"));
    content.insert_proto(ProtoDef::new("lantern_01", "models/props/lantern_01.glb"));
    content.insert_region(RegionDef::new("Driftwood Coast"));

    content.insert_chunk(
        ChunkDef::named("Greywater, Salt Exchange")
            .with_placement(PlacementDef::new(
                ObjectId::new(0, 11),
                RecordId::name("barrel_01"),
                [10.0, 0.0, 2.0],
            ))
            .with_placement(PlacementDef::new(
                ObjectId::new(0, 12),
                RecordId::name("lantern_01"),
                [12.0, 3.0, 2.0],
            )),
    );

    let mut landing = ChunkDef::grid(GridKey::primary(0, 0))
        .with_region(Name::new("Driftwood Coast"))
        .with_placement(PlacementDef::new(
            ObjectId::new(0, 1),
            RecordId::name("crab_01"),
            [64.0, 8.0, 0.0],
        ));
    landing.display_name = "Ferry Landing".to_owned();
    content.insert_chunk(landing);

    content.insert_chunk(
        ChunkDef::grid(GridKey::primary(1, 0))
            .with_region(Name::new("Driftwood Coast"))
            .with_placement(PlacementDef::new(
                ObjectId::new(0, 2),
                RecordId::name("crab_01"),
                [192.0, 8.0, 0.0],
            ))
            .with_placement(PlacementDef::new(
                ObjectId::new(0, 3),
                RecordId::name("barrel_01"),
                [200.0, 8.0, 0.0],
            )),
    );
    Arc::new(content)
}

/// Catalog where three chunks all place the same reference number (0, 7), as
/// overlapping content files do.
fn dup_catalog() -> Arc<ContentStore> {
    let content = ContentStore::new();
    content.insert_proto(ProtoDef::new("barrel_01", "models/props/barrel_01.glb"));
    let dup = || {
        PlacementDef::new(ObjectId::new(0, 7), RecordId::name("barrel_01"), [0.0, 0.0, 0.0])
    };
    content.insert_chunk(
        ChunkDef::grid(GridKey::primary(0, 0)).with_placement(dup()).with_placement(
            PlacementDef::new(ObjectId::new(0, 1), RecordId::name("barrel_01"), [1.0, 0.0, 0.0]),
        ),
    );
    content.insert_chunk(
        ChunkDef::grid(GridKey::primary(1, 0)).with_placement(dup()).with_placement(
            PlacementDef::new(ObjectId::new(0, 2), RecordId::name("barrel_01"), [2.0, 0.0, 0.0]),
        ),
    );
    content.insert_chunk(ChunkDef::named("Smuggler Den").with_placement(dup()));
    Arc::new(content)
}

fn world() -> WorldIndex {
    WorldIndex::new(catalog())
}

// ---------------------------------------------------------------------------
// Chunk identity and synthesis
// ---------------------------------------------------------------------------

#[test]
fn grid_addresses_resolve_to_one_handle() {
    let mut index = world();
    let a = index.grid_chunk(&GridKey::primary(0, 0), false).expect("authored chunk");
    let b = index.grid_chunk(&GridKey::primary(0, 0), false).expect("authored chunk");
    let c = index.grid_chunk(&GridKey::primary(1, 0), false).expect("authored chunk");

    assert_eq!(a, b);
    assert_ne!(a, c);
    assert_eq!(index.chunk_count(), 2);

    // The same chunk through its record id is still the same handle.
    assert_eq!(index.find_by_id(&RecordId::grid(0, 0), false), Some(a));
}

#[test]
fn wilderness_is_synthesized_once_and_joins_the_catalog() {
    let mut index = world();
    let key = GridKey::primary(40, -3);
    assert!(index.content().grid_chunk(&key).is_none());

    let id = index.grid_chunk(&key, false).expect("primary worldspace always resolves");

    // The synthesized definition is now catalog-visible and stable.
    let def = index.content().grid_chunk(&key).expect("synthesized definition");
    assert_eq!(def.water_level, Some(0.0));
    assert!(def.display_name.is_empty());
    assert_eq!(index.grid_chunk(&key, false).expect("cached"), id);
    assert_eq!(index.chunk_count(), 1);
}

#[test]
fn extended_grid_requires_its_worldspace() {
    let mut index = world();
    let key = GridKey::in_space(5, 5, WorldspaceId::Named(Name::new("Nara Vale")));

    let err = index.grid_chunk(&key, false).expect_err("undefined worldspace");
    assert!(matches!(err, WorldError::WorldspaceMissing(_)));
    // The soft id lookup degrades to a miss instead.
    assert_eq!(index.find_by_id(&RecordId::Grid(key.clone()), false), None);

    index.content().insert_worldspace(WorldspaceDef::new("Nara Vale"));
    let id = index.grid_chunk(&key, false).expect("worldspace now defined");
    let def = index.chunk(id).expect("instantiated").def().clone();
    assert_eq!(def.water_level, None);
}

#[test]
fn named_lookup_folds_case_and_never_synthesizes() {
    let mut index = world();
    let a = index.find_named("greywater, SALT exchange", false).expect("authored chunk");
    let b = index.find_named("Greywater, Salt Exchange", false).expect("authored chunk");
    assert_eq!(a, b);

    assert_eq!(index.find_named("Greywater, West Wing", false), None);
    let err = index.named_chunk("Greywater, West Wing", false).expect_err("not authored");
    assert!(matches!(err, WorldError::NoChunkNamed(_)));
    assert_eq!(index.chunk_count(), 1);
}

#[test]
fn name_search_walks_named_display_default_then_region() {
    let mut index = world();
    let landing = index.grid_chunk(&GridKey::primary(0, 0), false).expect("authored chunk");

    // Display name of a grid chunk.
    assert_eq!(index.find_by_name("ferry landing", false), Some(landing));

    // The default chunk name doubles as "any unnamed grid chunk".
    let unnamed = index.find_by_name("Wilderness", false).expect("default-name alias");
    assert_eq!(index.chunk(unnamed).expect("instantiated").record_id(), &RecordId::grid(1, 0));

    // Region display name resolves to the region's first chunk.
    assert_eq!(index.find_by_name("Driftwood Coast", false), Some(landing));

    // Named chunks shadow everything else.
    let named = index.find_by_name("Greywater, Salt Exchange", false).expect("authored chunk");
    assert!(index.chunk(named).expect("instantiated").grid_key().is_none());

    assert_eq!(index.find_by_name("Karst, Palace", false), None);
    assert!(index.chunk_by_name("Karst, Palace", false).is_err());
}

// ---------------------------------------------------------------------------
// Object identity and search
// ---------------------------------------------------------------------------

#[test]
fn duplicate_reference_numbers_never_instantiate_twice() {
    let mut index = WorldIndex::new(dup_catalog());
    let a = index.grid_chunk(&GridKey::primary(0, 0), true).expect("authored chunk");
    let b = index.grid_chunk(&GridKey::primary(1, 0), true).expect("authored chunk");

    let dup = ObjectId::new(0, 7);
    // First load claimed the reference number; the second spawn is skipped.
    assert_eq!(index.registered(dup).map(|r| r.chunk), Some(a));
    assert!(index.chunk(a).expect("live").live_object(dup).is_some());
    assert!(index.chunk(b).expect("live").live_object(dup).is_none());
    assert_eq!(index.chunk(b).expect("live").object_count(), 1);
}

#[test]
fn object_search_prefers_the_last_inserted_grid_chunk() {
    let mut index = WorldIndex::new(dup_catalog());
    let a = index.grid_chunk(&GridKey::primary(0, 0), false).expect("authored chunk");
    let b = index.grid_chunk(&GridKey::primary(1, 0), false).expect("authored chunk");
    let den = index.find_named("Smuggler Den", false).expect("authored chunk");
    let dup = ObjectId::new(0, 7);

    // Grid chunks are probed newest-first, ahead of named chunks.
    let hit = index.find_object(dup).expect("placed in three chunks");
    assert_eq!(hit.chunk, b);

    // Removing it leaves a stale pointer-cache slot; the next search falls
    // back and lands on the next candidate in probe order.
    index.remove_object(hit).expect("was live");
    let hit = index.find_object(dup).expect("still placed in two chunks");
    assert_eq!(hit.chunk, a);

    index.remove_object(hit).expect("was live");
    let hit = index.find_object(dup).expect("still placed in the den");
    assert_eq!(hit.chunk, den);

    index.remove_object(hit).expect("was live");
    assert_eq!(index.find_object(dup), None);
}

#[test]
fn registered_never_loads_but_find_object_does() {
    let mut index = world();
    let exchange = index.find_named("Greywater, Salt Exchange", false).expect("authored chunk");
    let landing = index.grid_chunk(&GridKey::primary(0, 0), false).expect("authored chunk");
    let barrel = ObjectId::new(0, 11);

    assert_eq!(index.chunk(exchange).expect("live").status(), ChunkStatus::Unloaded);
    assert_eq!(index.registered(barrel), None);

    let hit = index.find_object(barrel).expect("authored placement");
    assert_eq!(hit.chunk, exchange);
    assert_eq!(index.chunk(exchange).expect("live").status(), ChunkStatus::Loaded);
    assert_eq!(index.registered(barrel), Some(hit));

    // The miss on the grid chunk cost a preload, never a full load.
    assert_eq!(index.chunk(landing).expect("live").status(), ChunkStatus::Preloaded);
}

#[test]
fn instance_sweeps_cover_catalog_or_instantiated_only() {
    let mut index = world();
    let barrel = RecordId::name("barrel_01");

    // Nothing instantiated: the arena sweep has nothing to find.
    assert!(index.all_instances_of(&barrel).is_empty());

    let exchange = index.find_named("Greywater, Salt Exchange", false).expect("authored chunk");
    let found = index.all_instances_of(&barrel);
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].chunk, exchange);

    // The grid sweep instantiates the whole grid catalog but skips named
    // chunks by design.
    let found = index.grid_instances_of(&barrel);
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, ObjectId::new(0, 3));
    assert_eq!(index.chunk_count(), 3);

    // Now every chunk is instantiated and the arena sweep sees both.
    assert_eq!(index.all_instances_of(&barrel).len(), 2);

    let landing = index.grid_chunk(&GridKey::primary(0, 0), false).expect("authored chunk");
    index.spawn_object(landing, barrel.clone(), [70.0, 8.0, 0.0]).expect("valid handle");
    assert_eq!(index.all_instances_of(&barrel).len(), 3);
    assert_eq!(index.grid_instances_of(&barrel).len(), 2);
}

// ---------------------------------------------------------------------------
// Containment mutations
// ---------------------------------------------------------------------------

#[test]
fn spawn_move_remove_keep_the_registry_in_sync() {
    let mut index = world();
    let exchange = index.find_named("Greywater, Salt Exchange", false).expect("authored chunk");
    let landing = index.grid_chunk(&GridKey::primary(0, 0), false).expect("authored chunk");

    let spawned = index
        .spawn_object(exchange, RecordId::name("barrel_01"), [11.0, 0.0, 2.0])
        .expect("valid handle");
    assert_eq!(spawned.id, ObjectId::spawned(1));
    assert!(spawned.id.is_spawned());
    assert_eq!(index.last_generated(), 1);
    assert!(index.chunk(exchange).expect("live").has_state());

    let moved = index.move_object(spawned, landing).expect("destination is valid");
    assert_eq!(moved.chunk, landing);
    assert_eq!(moved.id, spawned.id);
    assert_eq!(index.registered(spawned.id), Some(moved));
    assert!(index.chunk(landing).expect("live").has_state());

    // Moving onto itself is a no-op that still answers.
    assert_eq!(index.move_object(moved, landing), Some(moved));

    let taken = index.remove_object(moved).expect("was live");
    assert_eq!(taken.id, spawned.id);
    assert_eq!(index.registered(spawned.id), None);
    assert_eq!(index.find_object(spawned.id), None);
}

#[test]
fn clear_invalidates_handles_but_keeps_the_allocator() {
    let mut index = world();
    let crab = ObjectId::new(0, 1);
    let hit = index.find_object(crab).expect("authored placement");
    let spawned = index
        .spawn_object(hit.chunk, RecordId::name("barrel_01"), [65.0, 8.0, 0.0])
        .expect("valid handle");
    assert_eq!(index.last_generated(), 1);

    index.clear();
    assert_eq!(index.chunk_count(), 0);
    assert!(index.chunk(hit.chunk).is_none());
    assert_eq!(index.registered(crab), None);
    assert_eq!(index.registered(spawned.id), None);

    // Definitions survive: the same placement resolves again, under a fresh
    // handle, and spawned serials keep counting instead of colliding.
    let rehit = index.find_object(crab).expect("definitions survive a clear");
    assert_ne!(rehit.chunk, hit.chunk);
    assert_eq!(index.last_generated(), 1);
    let next = index
        .spawn_object(rehit.chunk, RecordId::name("barrel_01"), [65.0, 8.0, 0.0])
        .expect("valid handle");
    assert_eq!(next.id, ObjectId::spawned(2));
}

// ---------------------------------------------------------------------------
// Hooks and tuning
// ---------------------------------------------------------------------------

struct RecordingHooks {
    created: Mutex<Vec<RecordId>>,
}

impl WorldHooks for RecordingHooks {
    fn chunk_created(&self, _chunk: ChunkId, def: &ChunkDef) {
        self.created.lock().unwrap().push(def.id.clone());
    }
}

#[test]
fn hooks_fire_exactly_on_synthesis() {
    let hooks = Arc::new(RecordingHooks { created: Mutex::new(Vec::new()) });
    let mut index =
        WorldIndex::with_hooks(catalog(), Arc::clone(&hooks) as _, IndexConfig::default());

    // Authored chunks never notify.
    index.grid_chunk(&GridKey::primary(0, 0), true).expect("authored chunk");
    assert!(hooks.created.lock().unwrap().is_empty());

    // Synthesis notifies once, not on the repeat lookup.
    index.grid_chunk(&GridKey::primary(30, 30), false).expect("synthesized");
    index.grid_chunk(&GridKey::primary(30, 30), true).expect("cached");
    let created = hooks.created.lock().unwrap();
    assert_eq!(created.as_slice(), &[RecordId::grid(30, 30)]);
}

#[test]
fn tiny_pointer_cache_still_resolves_everything() {
    let config = IndexConfig { pointer_cache_size: 2 };
    let mut index = WorldIndex::with_hooks(catalog(), Arc::new(NoHooks), config);

    // More hot objects than cache slots: older slots get overwritten and the
    // fallback search quietly repairs every miss.
    let objects =
        [ObjectId::new(0, 1), ObjectId::new(0, 2), ObjectId::new(0, 11), ObjectId::new(0, 12)];
    for _ in 0..3 {
        for id in objects {
            let hit = index.find_object(id).expect("authored placement");
            assert_eq!(hit.id, id);
        }
    }
}
