use crate::ids::{GridKey, Name, ObjectId, RecordId, WorldspaceId};

/// The two content-format generations a definition can come from.
///
/// Classic-format grid chunks all live in the primary worldspace; extended
/// grid chunks live in named worldspaces that carry their own
/// [`WorldspaceDef`]. Named chunks exist in both formats and behave the same.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentFormat {
    Classic,
    Extended,
}

/// Editor-placed object instance inside a chunk definition.
#[derive(Debug, Clone, PartialEq)]
pub struct PlacementDef {
    pub id: ObjectId,
    pub base: RecordId,
    pub pos: [f32; 3],
    pub count: u32,
}

impl PlacementDef {
    pub fn new(id: ObjectId, base: RecordId, pos: [f32; 3]) -> Self {
        Self { id, base, pos, count: 1 }
    }
}

/// Immutable definition of one chunk, as authored (or synthesized).
///
/// An empty `display_name` on a grid chunk means the chunk shows the
/// catalog-wide default chunk name; name lookups treat the two as equivalent.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkDef {
    pub id: RecordId,
    pub display_name: String,
    pub region: Option<Name>,
    pub water_level: Option<f32>,
    pub format: ContentFormat,
    pub placements: Vec<PlacementDef>,
}

impl ChunkDef {
    pub fn named(name: &str) -> Self {
        Self {
            id: RecordId::name(name),
            display_name: name.to_owned(),
            region: None,
            water_level: None,
            format: ContentFormat::Classic,
            placements: Vec::new(),
        }
    }

    pub fn grid(key: GridKey) -> Self {
        let format = match key.space {
            WorldspaceId::Primary => ContentFormat::Classic,
            WorldspaceId::Named(_) => ContentFormat::Extended,
        };
        Self {
            id: RecordId::Grid(key),
            display_name: String::new(),
            region: None,
            water_level: None,
            format,
            placements: Vec::new(),
        }
    }

    /// Minimal definition for a grid address no content file ever authored.
    /// Classic wilderness is open water at level zero; extended worldspaces
    /// leave water to the worldspace itself.
    pub fn empty_grid(key: GridKey) -> Self {
        let mut def = ChunkDef::grid(key);
        if def.format == ContentFormat::Classic {
            def.water_level = Some(0.0);
        }
        def
    }

    pub fn with_region(mut self, region: Name) -> Self {
        self.region = Some(region);
        self
    }

    pub fn with_placement(mut self, placement: PlacementDef) -> Self {
        self.placements.push(placement);
        self
    }

    pub fn grid_key(&self) -> Option<&GridKey> {
        self.id.as_grid()
    }

    pub fn name_key(&self) -> Option<&Name> {
        self.id.as_name()
    }

    pub fn is_grid(&self) -> bool {
        self.grid_key().is_some()
    }
}

/// Object prototype: what a placement instantiates. Carries the render-model
/// path the prefetch pipeline warms up.
#[derive(Debug, Clone, PartialEq)]
pub struct ProtoDef {
    pub id: RecordId,
    pub model: String,
}

impl ProtoDef {
    pub fn new(name: &str, model: &str) -> Self {
        Self { id: RecordId::name(name), model: model.to_owned() }
    }
}

/// Geographic region; grid chunks reference one by name.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionDef {
    pub id: Name,
    pub display_name: String,
}

impl RegionDef {
    pub fn new(name: &str) -> Self {
        Self { id: Name::new(name), display_name: name.to_owned() }
    }
}

/// Extended-format worldspace. Grid chunks outside the primary worldspace
/// can only exist inside one of these.
#[derive(Debug, Clone, PartialEq)]
pub struct WorldspaceDef {
    pub id: Name,
}

impl WorldspaceDef {
    pub fn new(name: &str) -> Self {
        Self { id: Name::new(name) }
    }
}
