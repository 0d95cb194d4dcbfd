use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Case-folded identifier string.
///
/// Content records are matched case-insensitively everywhere, so the fold
/// happens once at construction and every comparison, hash and ordering works
/// on the folded form. The original display spelling is not kept here; records
/// that care about presentation carry a separate display string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Name(String);

impl Name {
    pub fn new(raw: &str) -> Self {
        Self(raw.to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Case-insensitive comparison against an unfolded display string.
    pub fn matches(&self, raw: &str) -> bool {
        self.0 == raw.to_lowercase()
    }
}

impl From<&str> for Name {
    fn from(raw: &str) -> Self {
        Name::new(raw)
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which worldspace a grid chunk lives in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorldspaceId {
    /// The single overworld all classic-format content shares.
    Primary,
    /// An extended-format worldspace, keyed by its record name. Must be
    /// backed by a `WorldspaceDef` before chunks in it can be created.
    Named(Name),
}

impl WorldspaceId {
    pub fn is_extended(&self) -> bool {
        matches!(self, WorldspaceId::Named(_))
    }
}

impl fmt::Display for WorldspaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorldspaceId::Primary => f.write_str("primary"),
            WorldspaceId::Named(name) => write!(f, "{name}"),
        }
    }
}

/// Address of a grid-addressed chunk: integer grid coordinates plus the
/// worldspace they index into.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GridKey {
    pub x: i32,
    pub y: i32,
    pub space: WorldspaceId,
}

impl GridKey {
    pub fn primary(x: i32, y: i32) -> Self {
        Self { x, y, space: WorldspaceId::Primary }
    }

    pub fn in_space(x: i32, y: i32, space: WorldspaceId) -> Self {
        Self { x, y, space }
    }
}

impl fmt::Display for GridKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.space {
            WorldspaceId::Primary => write!(f, "{}, {}", self.x, self.y),
            WorldspaceId::Named(name) => write!(f, "{}, {} in {}", self.x, self.y, name),
        }
    }
}

/// Stable identifier of a content record.
///
/// Named chunks and prototype records use their folded name; grid chunks use
/// their grid address directly, so a grid identifier always decodes back to
/// coordinates. Identity survives sessions and save files.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordId {
    Name(Name),
    Grid(GridKey),
}

impl RecordId {
    pub fn name(raw: &str) -> Self {
        RecordId::Name(Name::new(raw))
    }

    /// Grid identifier in the primary worldspace.
    pub fn grid(x: i32, y: i32) -> Self {
        RecordId::Grid(GridKey::primary(x, y))
    }

    pub fn as_grid(&self) -> Option<&GridKey> {
        match self {
            RecordId::Grid(key) => Some(key),
            RecordId::Name(_) => None,
        }
    }

    pub fn as_name(&self) -> Option<&Name> {
        match self {
            RecordId::Name(name) => Some(name),
            RecordId::Grid(_) => None,
        }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordId::Name(name) => write!(f, "{name}"),
            RecordId::Grid(key) => write!(f, "#{key}"),
        }
    }
}

/// Stable reference number of one placed object instance.
///
/// `file` is the index of the content file that introduced the placement;
/// `serial` is unique within that file. Objects spawned at runtime use the
/// `SPAWNED_FILE` sentinel and serials handed out by the identity registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId {
    pub file: i32,
    pub serial: u32,
}

impl ObjectId {
    /// Content-file index used for runtime-spawned objects.
    pub const SPAWNED_FILE: i32 = -1;

    pub const fn new(file: i32, serial: u32) -> Self {
        Self { file, serial }
    }

    pub const fn spawned(serial: u32) -> Self {
        Self { file: Self::SPAWNED_FILE, serial }
    }

    pub const fn is_spawned(&self) -> bool {
        self.file < 0
    }

    /// Translate the content-file index through a load-order remap table.
    ///
    /// Spawned ids pass through unchanged. Returns `None` when the file that
    /// introduced the object is no longer in the load order; callers drop the
    /// record in that case.
    pub fn remapped(&self, remap: &HashMap<i32, i32>) -> Option<ObjectId> {
        if self.is_spawned() {
            return Some(*self);
        }
        remap.get(&self.file).map(|file| ObjectId::new(*file, self.serial))
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.serial)
    }
}
