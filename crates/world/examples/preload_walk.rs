//! Demo: walk a line of wilderness chunks with prefetch running ahead.
//!
//! Builds a tiny in-memory catalog, then walks east one chunk per step while
//! asking the prefetcher to warm the two chunks ahead and the terrain under
//! them. Prints cache state per step; RUST_LOG=debug also shows the index
//! synthesizing wilderness once the walk leaves authored content behind.
//! Run with: `cargo run -p duskfall-world --example preload_walk`

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use duskfall_content::ids::{GridKey, Name, ObjectId, RecordId};
use duskfall_content::records::{ChunkDef, PlacementDef, ProtoDef, RegionDef};
use duskfall_content::save::SaveWriter;
use duskfall_content::store::ContentStore;
use duskfall_world::index::WorldIndex;
use duskfall_world::jobs::CancelFlag;
use duskfall_world::prefetch::{
    AssetHandle, AssetSource, PrefetchConfig, Prefetcher, TerrainArea, TerrainHandle,
    TerrainSource,
};

/// Counts model builds; stands in for the render and physics caches.
struct CountingAssets {
    built: AtomicUsize,
}

impl AssetSource for CountingAssets {
    fn prewarm_model(&self, model: &str, _instances: bool) -> anyhow::Result<AssetHandle> {
        self.built.fetch_add(1, Ordering::Relaxed);
        Ok(Arc::new(model.to_owned()))
    }
}

struct CountingTerrain {
    built: AtomicUsize,
}

impl TerrainSource for CountingTerrain {
    fn prewarm_area(
        &self,
        area: &TerrainArea,
        _cancel: &CancelFlag,
    ) -> anyhow::Result<TerrainHandle> {
        self.built.fetch_add(1, Ordering::Relaxed);
        Ok(Arc::new(area.grid))
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".parse().unwrap()),
        )
        .init();

    let content = Arc::new(build_catalog());
    let mut index = WorldIndex::new(Arc::clone(&content));

    let assets = Arc::new(CountingAssets { built: AtomicUsize::new(0) });
    let terrain = Arc::new(CountingTerrain { built: AtomicUsize::new(0) });
    let config = PrefetchConfig {
        min_cache_size: 2,
        max_cache_size: 4,
        ..PrefetchConfig::default()
    };
    let mut prefetcher = Prefetcher::new(
        config,
        Arc::clone(&content),
        Arc::clone(&assets) as Arc<dyn AssetSource>,
        Arc::clone(&terrain) as Arc<dyn TerrainSource>,
    );

    println!("=== Duskfall: prefetch walk ===\n");

    // --- Walk east, warming two chunks ahead ---
    let mut clock = 0.0f64;
    for x in 0..8 {
        let here = index
            .grid_chunk(&GridKey::primary(x, 0), true)
            .expect("primary worldspace always resolves");

        for ahead in 1..=2 {
            let next = index
                .grid_chunk(&GridKey::primary(x + ahead, 0), false)
                .expect("primary worldspace always resolves");
            let bases = index.prefetch_bases(next);
            prefetcher.request(next, bases, clock);
        }
        prefetcher.set_terrain_positions(vec![terrain_area(x), terrain_area(x + 1)]);

        // One frame's worth of background time.
        thread::sleep(Duration::from_millis(10));
        prefetcher.poll_completed(clock);
        prefetcher.sweep_expired(clock);
        prefetcher.notify_loaded(here);

        let chunk = index.chunk(here).expect("just instantiated");
        println!(
            "  step {x}: entered {:<14} cache {}/{} ready, terrain ready: {}",
            chunk.describe(),
            prefetcher.ready_count(),
            prefetcher.entry_count(),
            prefetcher.is_terrain_ready(&terrain_area(x), clock),
        );
        clock += 0.5;
    }

    println!("\n  models built in the background: {}", assets.built.load(Ordering::Relaxed));
    println!("  terrain areas built:            {}", terrain.built.load(Ordering::Relaxed));

    // --- Leave a mark, then save the delta stream ---
    let camp = index.chunk_by_name("Lantern Shore", true).expect("authored chunk");
    index
        .spawn_object(camp, RecordId::name("barrel_01"), [64.0, 12.0, 0.0])
        .expect("valid handle");

    let mut writer = SaveWriter::new(Vec::new());
    let written = index.write_modified(&mut writer).expect("save stream");
    println!("\n  modified chunks saved: {written} ({} bytes)", writer.into_inner().len());
}

fn terrain_area(x: i32) -> TerrainArea {
    TerrainArea::new([x as f32 * 128.0, 0.0], [x - 1, -1, x + 1, 1])
}

fn build_catalog() -> ContentStore {
    let content = ContentStore::new();
    content.insert_proto(ProtoDef::new("barrel_01", "models/props/barrel_01.glb"));
    content.insert_proto(ProtoDef::new("crab_01", "models/fauna/crab_01.glb"));
    content.insert_region(RegionDef::new("Driftwood Coast"));

    // Three authored shore chunks; everything east of them is wilderness.
    for x in 0..3 {
        let mut def = ChunkDef::grid(GridKey::primary(x, 0))
            .with_region(Name::new("Driftwood Coast"))
            .with_placement(PlacementDef::new(
                ObjectId::new(0, x as u32 * 10 + 1),
                RecordId::name("crab_01"),
                [x as f32 * 128.0, 8.0, 0.0],
            ));
        if x == 1 {
            def.display_name = "Lantern Shore".to_owned();
        }
        content.insert_chunk(def);
    }
    content
}
