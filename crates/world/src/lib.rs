//! Runtime world state: the chunk arena and its lookup index, per-object
//! identity, background prefetch, and incremental save of modified chunks.
//!
//! [`index::WorldIndex`] is the facade the rest of the game talks to. It owns
//! every instantiated [`chunk::Chunk`], the [`registry::ObjectRegistry`] that
//! maps reference numbers back to their owning chunk, and the pointer cache
//! that keeps repeated object lookups cheap. [`prefetch::Prefetcher`] runs
//! beside it, warming asset caches for chunks the player is approaching.

pub mod chunk;
pub mod error;
pub mod index;
pub mod jobs;
pub mod prefetch;
pub mod registry;
