//! Error taxonomy for the world core.
//!
//! Only hard failures are typed here: a caller asserted that something
//! exists and it does not. Lookups that may legitimately miss return
//! `Option`, and recoverable inconsistencies (stale cache slots, orphaned
//! save records) are repaired in place with a warning.

use duskfall_content::ids::{Name, RecordId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorldError {
    #[error("chunk does not exist: {0}")]
    ChunkNotFound(RecordId),

    #[error("no chunk named '{0}'")]
    NoChunkNamed(String),

    /// Grid chunks outside the primary worldspace need a worldspace
    /// definition before they can be synthesized.
    #[error("worldspace is not defined: {0}")]
    WorldspaceMissing(Name),
}

pub type WorldResult<T> = Result<T, WorldError>;
