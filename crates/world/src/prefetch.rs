//! Background prefetch cache for chunks the player is about to enter.
//!
//! The foreground asks for a chunk to be warm ([`Prefetcher::request`]) and
//! hands over a base-id snapshot; a worker resolves models through the shared
//! catalog and builds assets via the injected [`AssetSource`]. The cache then
//! retains the opaque handles so downstream caches stay warm until eviction.
//!
//! Per chunk the entry moves NotRequested → Pending → Ready and out again via
//! eviction; the newest request always wins, and completions from superseded
//! or cancelled jobs are discarded, never applied. Nothing here blocks on
//! background work: the owner calls [`Prefetcher::poll_completed`] once per
//! frame and [`Prefetcher::sweep_expired`] when it wants the bounds enforced.
//!
//! A companion terrain path prefetches a position list through one combined
//! work item, which can be narrowed mid-flight to a single area when the
//! player outruns it ([`Prefetcher::abort_terrain_except`]).

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use duskfall_content::ids::RecordId;
use duskfall_content::store::ContentStore;

use crate::chunk::ChunkId;
use crate::jobs::{CancelFlag, Completion, JobHandle, JobId, JobQueue};

/// How close two terrain requests must be to count as the same area.
const POSITION_TOLERANCE: f32 = 1.0;

/// Opaque handle to something a provider built; the cache keeps it alive.
pub type AssetHandle = Arc<dyn Any + Send + Sync>;
/// Opaque handle to one prepared terrain area.
pub type TerrainHandle = Arc<dyn Any + Send + Sync>;

/// Builds render and physics assets for one model path. Runs on worker
/// threads, so implementations must only touch their own caches. An error
/// fails the whole chunk entry; the next request starts over.
pub trait AssetSource: Send + Sync {
    fn prewarm_model(&self, model: &str, instances: bool) -> anyhow::Result<AssetHandle>;
}

/// Builds one terrain area. Long builds should poll `cancel` between pages.
pub trait TerrainSource: Send + Sync {
    fn prewarm_area(&self, area: &TerrainArea, cancel: &CancelFlag)
        -> anyhow::Result<TerrainHandle>;
}

/// One terrain view request: world-space center plus the grid rectangle it
/// covers.
#[derive(Debug, Clone, PartialEq)]
pub struct TerrainArea {
    pub center: [f32; 2],
    pub grid: [i32; 4],
}

impl TerrainArea {
    pub fn new(center: [f32; 2], grid: [i32; 4]) -> Self {
        Self { center, grid }
    }

    /// Same request within tolerance: identical grid, centers close.
    pub fn close_to(&self, other: &TerrainArea, tolerance: f32) -> bool {
        let dx = self.center[0] - other.center[0];
        let dy = self.center[1] - other.center[1];
        self.grid == other.grid && dx * dx + dy * dy <= tolerance * tolerance
    }
}

/// Prefetcher tuning. The defaults match a mid-size view distance; callers
/// with bigger scenes raise the cache bounds.
#[derive(Debug, Clone)]
pub struct PrefetchConfig {
    /// Seconds a Ready entry stays fresh without being re-requested.
    pub expiry_delay: f64,
    /// Entries kept through expiry sweeps regardless of age.
    pub min_cache_size: usize,
    /// Hard bound; the sweep evicts oldest-first back down to the minimum.
    pub max_cache_size: usize,
    /// Ask sources to build instanced variants too.
    pub preload_instances: bool,
    /// Worker threads for the internal job queue.
    pub workers: usize,
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            expiry_delay: 5.0,
            min_cache_size: 12,
            max_cache_size: 20,
            preload_instances: true,
            workers: 1,
        }
    }
}

/// Assets retained for one prefetched chunk.
pub struct PreloadedChunk {
    pub assets: Vec<AssetHandle>,
}

enum EntryState {
    Pending { job: JobHandle },
    Ready(PreloadedChunk),
}

struct Entry {
    timestamp: f64,
    state: EntryState,
}

enum PrefetchResult {
    Chunk(anyhow::Result<Vec<AssetHandle>>),
    Terrain(Vec<(TerrainArea, TerrainHandle)>),
}

struct TerrainTask {
    job: JobHandle,
    areas: Vec<TerrainArea>,
    /// Shared with the worker; set to narrow the item to one area.
    keep_only: Arc<Mutex<Option<TerrainArea>>>,
}

pub struct Prefetcher {
    config: PrefetchConfig,
    content: Arc<ContentStore>,
    assets: Arc<dyn AssetSource>,
    terrain: Arc<dyn TerrainSource>,
    queue: JobQueue<PrefetchResult>,
    entries: HashMap<ChunkId, Entry>,
    /// Routes completions back to their chunk. A job id missing here was
    /// superseded or cancelled; its completion is dropped on the floor.
    in_flight: HashMap<JobId, ChunkId>,
    terrain_task: Option<TerrainTask>,
    loaded_terrain: Vec<(TerrainArea, TerrainHandle)>,
    loaded_terrain_stamp: f64,
}

impl Prefetcher {
    pub fn new(
        config: PrefetchConfig,
        content: Arc<ContentStore>,
        assets: Arc<dyn AssetSource>,
        terrain: Arc<dyn TerrainSource>,
    ) -> Self {
        let queue = JobQueue::new(config.workers);
        Self {
            config,
            content,
            assets,
            terrain,
            queue,
            entries: HashMap::new(),
            in_flight: HashMap::new(),
            terrain_task: None,
            loaded_terrain: Vec::new(),
            loaded_terrain_stamp: f64::NEG_INFINITY,
        }
    }

    // ── Requests ────────────────────────────────────────────────────────

    /// Ask for a chunk's assets to be warm. `bases` is the foreground's
    /// base-id snapshot (`WorldIndex::prefetch_bases`); model resolution
    /// happens on the worker against the shared catalog.
    ///
    /// Re-requesting within the expiry window only refreshes the entry's
    /// timestamp. An entry older than the window is torn down and
    /// rescheduled, cancelling whatever was in flight: within one chunk the
    /// newest request wins.
    pub fn request(&mut self, chunk: ChunkId, bases: Vec<RecordId>, timestamp: f64) {
        if let Some(entry) = self.entries.get_mut(&chunk) {
            if timestamp - entry.timestamp < self.config.expiry_delay {
                entry.timestamp = timestamp;
                return;
            }
            self.drop_entry(chunk);
        }

        let content = Arc::clone(&self.content);
        let assets = Arc::clone(&self.assets);
        let instances = self.config.preload_instances;
        let job = self
            .queue
            .submit(move |cancel| chunk_job(&content, &*assets, &bases, instances, cancel));
        self.in_flight.insert(job.id(), chunk);
        self.entries.insert(chunk, Entry { timestamp, state: EntryState::Pending { job } });
    }

    /// The scene took ownership of this chunk; its entry (and any in-flight
    /// work) is no longer needed.
    pub fn notify_loaded(&mut self, chunk: ChunkId) {
        self.drop_entry(chunk);
    }

    /// Cancel everything: entries, in-flight work, terrain state.
    pub fn clear(&mut self) {
        let chunks: Vec<ChunkId> = self.entries.keys().copied().collect();
        for chunk in chunks {
            self.drop_entry(chunk);
        }
        self.in_flight.clear();
        if let Some(task) = self.terrain_task.take() {
            task.job.cancel();
        }
        self.loaded_terrain.clear();
        self.loaded_terrain_stamp = f64::NEG_INFINITY;
    }

    fn drop_entry(&mut self, chunk: ChunkId) {
        if let Some(entry) = self.entries.remove(&chunk) {
            if let EntryState::Pending { job } = entry.state {
                job.cancel();
                self.in_flight.remove(&job.id());
            }
        }
    }

    // ── Completion and eviction ─────────────────────────────────────────

    /// Drain finished background work into the cache. Pending entries whose
    /// job finished become Ready; failed or panicked jobs drop their entry;
    /// completions of superseded jobs are discarded. Never blocks.
    pub fn poll_completed(&mut self, timestamp: f64) {
        for completion in self.queue.poll() {
            let is_terrain = self
                .terrain_task
                .as_ref()
                .is_some_and(|task| task.job.id() == completion.id);
            if is_terrain {
                self.finish_terrain(completion, timestamp);
                continue;
            }

            let Some(chunk) = self.in_flight.remove(&completion.id) else {
                debug!("discarding completion of a superseded prefetch job");
                continue;
            };
            let Some(entry) = self.entries.get_mut(&chunk) else {
                continue;
            };
            let EntryState::Pending { job } = &entry.state else {
                continue;
            };
            if job.id() != completion.id {
                continue;
            }

            match completion.payload {
                Some(PrefetchResult::Chunk(Ok(assets))) => {
                    entry.state = EntryState::Ready(PreloadedChunk { assets });
                }
                Some(PrefetchResult::Chunk(Err(err))) => {
                    warn!("prefetch failed: {err:#}; entry dropped");
                    self.entries.remove(&chunk);
                }
                Some(PrefetchResult::Terrain(_)) => {
                    debug!("discarding terrain views from a superseded terrain job");
                }
                None => {
                    warn!("prefetch job panicked; entry dropped");
                    self.entries.remove(&chunk);
                }
            }
        }
    }

    /// Evict stale and excess entries.
    ///
    /// Pass one drops expired Ready entries oldest-first, only while more
    /// than `min_cache_size` remain, so a small warm set survives idle
    /// stretches. Pass two applies the hard bound: over `max_cache_size`,
    /// the oldest entries go (cancelling Pending work) until the count is
    /// back at `min_cache_size`.
    pub fn sweep_expired(&mut self, timestamp: f64) {
        let mut by_age: Vec<(ChunkId, f64, bool)> = self
            .entries
            .iter()
            .map(|(&chunk, entry)| {
                (chunk, entry.timestamp, matches!(entry.state, EntryState::Ready(_)))
            })
            .collect();
        by_age.sort_by(|a, b| a.1.total_cmp(&b.1));

        for (chunk, stamp, ready) in &by_age {
            if self.entries.len() <= self.config.min_cache_size {
                break;
            }
            if *ready && *stamp < timestamp - self.config.expiry_delay {
                self.drop_entry(*chunk);
            }
        }

        if self.entries.len() > self.config.max_cache_size {
            for (chunk, _, _) in &by_age {
                if self.entries.len() <= self.config.min_cache_size {
                    break;
                }
                self.drop_entry(*chunk);
            }
        }
    }

    // ── Queries ─────────────────────────────────────────────────────────

    /// Ready assets for a chunk. Pending answers as a miss; the caller
    /// falls back to a synchronous load, never waits.
    pub fn get(&self, chunk: ChunkId) -> Option<&PreloadedChunk> {
        match &self.entries.get(&chunk)?.state {
            EntryState::Ready(preloaded) => Some(preloaded),
            EntryState::Pending { .. } => None,
        }
    }

    pub fn is_ready(&self, chunk: ChunkId) -> bool {
        self.get(chunk).is_some()
    }

    /// Pending or Ready.
    pub fn contains(&self, chunk: ChunkId) -> bool {
        self.entries.contains_key(&chunk)
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    pub fn ready_count(&self) -> usize {
        self.entries
            .values()
            .filter(|entry| matches!(entry.state, EntryState::Ready(_)))
            .count()
    }

    // ── Tuning ──────────────────────────────────────────────────────────

    pub fn set_expiry_delay(&mut self, seconds: f64) {
        self.config.expiry_delay = seconds;
    }

    pub fn set_min_cache_size(&mut self, entries: usize) {
        self.config.min_cache_size = entries;
    }

    pub fn set_max_cache_size(&mut self, entries: usize) {
        self.config.max_cache_size = entries;
    }

    pub fn max_cache_size(&self) -> usize {
        self.config.max_cache_size
    }

    // ── Terrain path ────────────────────────────────────────────────────

    /// Replace the terrain prefetch position list. A list already covered by
    /// the in-flight item or by the loaded set is a no-op; an empty list
    /// cancels terrain prefetch and forgets what was loaded. Otherwise the
    /// previous item is cancelled and one new job builds every area in order.
    pub fn set_terrain_positions(&mut self, areas: Vec<TerrainArea>) {
        if areas.is_empty() {
            if let Some(task) = self.terrain_task.take() {
                task.job.cancel();
            }
            self.loaded_terrain.clear();
            return;
        }
        let covered = areas.iter().all(|area| {
            let in_flight = self.terrain_task.as_ref().is_some_and(|task| {
                task.areas.iter().any(|known| known.close_to(area, POSITION_TOLERANCE))
            });
            in_flight
                || self
                    .loaded_terrain
                    .iter()
                    .any(|(known, _)| known.close_to(area, POSITION_TOLERANCE))
        });
        if covered {
            return;
        }
        if let Some(task) = self.terrain_task.take() {
            task.job.cancel();
        }

        let keep_only = Arc::new(Mutex::new(None));
        let source = Arc::clone(&self.terrain);
        let job_areas = areas.clone();
        let filter = Arc::clone(&keep_only);
        let job = self
            .queue
            .submit(move |cancel| terrain_job(&*source, job_areas, &filter, cancel));
        self.terrain_task = Some(TerrainTask { job, areas, keep_only });
    }

    /// Stop in-flight terrain work -- except, when `keep` matches one of the
    /// item's areas, narrow the item to that area instead of killing it.
    /// Used when the player outruns prefetch and only the destination still
    /// matters.
    pub fn abort_terrain_except(&mut self, keep: Option<&TerrainArea>) {
        let can_narrow = match (&self.terrain_task, keep) {
            (Some(task), Some(keep)) => {
                task.areas.iter().any(|area| area.close_to(keep, POSITION_TOLERANCE))
            }
            _ => false,
        };
        if can_narrow {
            if let (Some(task), Some(keep)) = (&mut self.terrain_task, keep) {
                *task.keep_only.lock().expect("keep-only filter poisoned") = Some(keep.clone());
                task.areas.retain(|area| area.close_to(keep, POSITION_TOLERANCE));
            }
        } else if let Some(task) = self.terrain_task.take() {
            task.job.cancel();
        }
    }

    /// Fresh and covering: true only while the loaded terrain set includes
    /// the area and was finished within the expiry window of
    /// `reference_time`.
    pub fn is_terrain_ready(&self, area: &TerrainArea, reference_time: f64) -> bool {
        self.loaded_terrain_stamp + self.config.expiry_delay > reference_time
            && self
                .loaded_terrain
                .iter()
                .any(|(known, _)| known.close_to(area, POSITION_TOLERANCE))
    }

    fn finish_terrain(&mut self, completion: Completion<PrefetchResult>, timestamp: f64) {
        let Some(task) = self.terrain_task.take() else { return };
        match completion.payload {
            Some(PrefetchResult::Terrain(views)) => {
                if task.job.is_cancelled() {
                    debug!("discarding views from a cancelled terrain prefetch");
                    return;
                }
                self.loaded_terrain = views;
                self.loaded_terrain_stamp = timestamp;
            }
            Some(PrefetchResult::Chunk(_)) => {
                debug!("terrain job id answered with chunk assets; dropped");
            }
            None => {
                warn!("terrain prefetch job panicked; nothing loaded");
            }
        }
    }
}

/// Worker-side chunk item: resolve bases through the catalog's concurrent
/// prototype table, then warm each model. Checks the cancel flag between
/// models; the foreground has already stopped caring by then, so whatever
/// was built is simply returned and discarded with the completion.
fn chunk_job(
    content: &ContentStore,
    assets: &dyn AssetSource,
    bases: &[RecordId],
    instances: bool,
    cancel: &CancelFlag,
) -> PrefetchResult {
    let mut handles = Vec::with_capacity(bases.len());
    for base in bases {
        if cancel.is_cancelled() {
            break;
        }
        let Some(proto) = content.proto(base) else {
            continue;
        };
        if proto.model.is_empty() {
            continue;
        }
        match assets.prewarm_model(&proto.model, instances) {
            Ok(handle) => handles.push(handle),
            Err(err) => {
                return PrefetchResult::Chunk(
                    Err(err.context(format!("warming model {}", proto.model))),
                );
            }
        }
    }
    PrefetchResult::Chunk(Ok(handles))
}

/// Worker-side terrain item: build every area in order, honoring both the
/// cancel flag and the keep-only narrowing filter between areas. A single
/// failed area is skipped; the rest still load.
fn terrain_job(
    source: &dyn TerrainSource,
    areas: Vec<TerrainArea>,
    keep_only: &Mutex<Option<TerrainArea>>,
    cancel: &CancelFlag,
) -> PrefetchResult {
    let mut views = Vec::with_capacity(areas.len());
    for area in areas {
        if cancel.is_cancelled() {
            break;
        }
        let keep = keep_only.lock().expect("keep-only filter poisoned").clone();
        if let Some(keep) = keep {
            if !area.close_to(&keep, POSITION_TOLERANCE) {
                continue;
            }
        }
        match source.prewarm_area(&area, cancel) {
            Ok(view) => views.push((area, view)),
            Err(err) => {
                warn!("terrain area failed to prefetch: {err:#}");
            }
        }
    }
    PrefetchResult::Terrain(views)
}
