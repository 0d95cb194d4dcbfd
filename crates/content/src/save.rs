use std::fmt;
use std::io::{ErrorKind, Read, Write};

use anyhow::{bail, Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::ids::{ObjectId, RecordId};

// ── Record framing ──────────────────────────────────────────────────────────

/// Four-byte tag identifying a record type in the save stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordTag(pub [u8; 4]);

/// Tag of a chunk-state record.
pub const CHUNK_STATE: RecordTag = RecordTag(*b"CHST");

impl fmt::Display for RecordTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

/// Writes a tagged record stream: 4-byte tag, u32-le body length, bincode body.
///
/// The writer knows nothing about which records mean what; owners of a record
/// type serialize their own state through [`SaveWriter::record`].
pub struct SaveWriter<W: Write> {
    out: W,
    records: usize,
}

impl<W: Write> SaveWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out, records: 0 }
    }

    pub fn record<T: Serialize>(&mut self, tag: RecordTag, body: &T) -> Result<()> {
        let bytes = bincode::serialize(body)
            .with_context(|| format!("encoding {tag} record"))?;
        let len = u32::try_from(bytes.len())
            .with_context(|| format!("{tag} record exceeds the 4 GiB record limit"))?;
        self.out
            .write_all(&tag.0)
            .and_then(|()| self.out.write_all(&len.to_le_bytes()))
            .and_then(|()| self.out.write_all(&bytes))
            .with_context(|| format!("writing {tag} record"))?;
        self.records += 1;
        Ok(())
    }

    /// Records written so far.
    pub fn records(&self) -> usize {
        self.records
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

/// One record pulled off the stream, not yet decoded. Callers dispatch on the
/// tag and either [`RawRecord::decode`] the body or drop the record to skip it.
#[derive(Debug, Clone)]
pub struct RawRecord {
    pub tag: RecordTag,
    pub body: Vec<u8>,
}

impl RawRecord {
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        bincode::deserialize(&self.body)
            .with_context(|| format!("decoding {} record body", self.tag))
    }
}

/// Reads a tagged record stream written by [`SaveWriter`].
pub struct SaveReader<R: Read> {
    input: R,
}

impl<R: Read> SaveReader<R> {
    pub fn new(input: R) -> Self {
        Self { input }
    }

    /// Next record, or `None` at a clean end of stream. A stream that ends
    /// inside a record is reported as an error, never as `None`.
    pub fn next_record(&mut self) -> Result<Option<RawRecord>> {
        let mut tag = [0u8; 4];
        let got = read_up_to(&mut self.input, &mut tag).context("reading record tag")?;
        if got == 0 {
            return Ok(None);
        }
        if got < tag.len() {
            bail!("save stream ends inside a record tag");
        }
        let tag = RecordTag(tag);

        let mut len = [0u8; 4];
        self.input
            .read_exact(&mut len)
            .with_context(|| format!("reading length of {tag} record"))?;
        let len = u32::from_le_bytes(len) as usize;

        let mut body = vec![0u8; len];
        self.input
            .read_exact(&mut body)
            .with_context(|| format!("reading body of {tag} record ({len} bytes)"))?;
        Ok(Some(RawRecord { tag, body }))
    }
}

/// Read until `buf` is full or the stream ends; returns bytes read.
fn read_up_to<R: Read>(input: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        match input.read(&mut buf[total..]) {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(total)
}

// ── Persisted chunk state (serde) ───────────────────────────────────────────

/// Fog-of-war bitmap for one chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FogRecord {
    pub resolution: u32,
    pub revealed: Vec<u8>,
}

/// Delta for one live object. `base` is kept alongside the reference number
/// so a load can validate the prototype still exists before instantiating.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectStateRecord {
    pub id: ObjectId,
    pub base: RecordId,
    pub pos: [f32; 3],
    pub count: u32,
    pub enabled: bool,
}

/// Everything a modified chunk persists: identity, ambient overrides, the live
/// object set, and the placements deleted relative to the definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkStateRecord {
    pub id: RecordId,
    pub water_level: Option<f32>,
    pub last_visit: Option<f64>,
    pub fog: Option<FogRecord>,
    pub objects: Vec<ObjectStateRecord>,
    pub despawned: Vec<ObjectId>,
}

// ── Tests ───────────────────────────────────────────────────────────────────
