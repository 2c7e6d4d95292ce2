//! Dictionary persistence.
//!
//! A dictionary `<id>` is stored as two sibling files under the data
//! directory:
//!
//! - `<id>.vectors.bin`: fixed header (magic, version, dimensions, CRC32 of
//!   the payload, row count) followed by row-major little-endian `f32`s.
//! - `<id>.pairs.json`: metadata plus one `{source, target, pool}` record per
//!   row, in the same order as the vectors.
//!
//! Both files are fully written to temporary names before either is renamed
//! into place. `pairs.json` records the payload checksum of its vectors file,
//! so a pair of files from different saves is detected on load.
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use bytemuck::{Pod, Zeroable};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{Dictionary, DictionaryId, Entry, Pool, PoolKind};
use crate::error::{EngineError, Result};
use crate::matcher::index::NORM_TOLERANCE;

const VECTOR_MAGIC: [u8; 4] = *b"LMVX";
const FORMAT_VERSION: u32 = 1;
const VECTORS_SUFFIX: &str = ".vectors.bin";
const PAIRS_SUFFIX: &str = ".pairs.json";
const HEADER_SIZE: usize = std::mem::size_of::<VectorHeader>();

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct VectorHeader {
    magic: [u8; 4],
    version: u32,
    dimensions: u32,
    checksum: u32,
    rows: u64,
}

#[derive(Serialize, Deserialize)]
struct PairsFile {
    format_version: u32,
    identifier: String,
    created_at: DateTime<Utc>,
    model: String,
    dimensions: usize,
    /// CRC32 of the sibling vectors payload. Absent in files from older saves.
    #[serde(default)]
    vectors_checksum: Option<u32>,
    entries: Vec<StoredEntry>,
}

#[derive(Serialize, Deserialize)]
struct StoredEntry {
    source: String,
    target: String,
    pool: PoolKind,
}

/// Serialize a float32 vector into little-endian bytes.
pub fn serialize_vector(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

fn artifact_path(prefix: &Path, suffix: &str) -> PathBuf {
    let mut name = prefix.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// Write `dictionary` as `<prefix>.vectors.bin` + `<prefix>.pairs.json`.
pub fn save(dictionary: &Dictionary, prefix: &Path) -> Result<()> {
    let vectors_path = artifact_path(prefix, VECTORS_SUFFIX);
    let pairs_path = artifact_path(prefix, PAIRS_SUFFIX);
    let dims = dictionary.dimensions();

    let mut payload = Vec::with_capacity(dictionary.len() * dims * 4);
    let mut entries = Vec::with_capacity(dictionary.len());
    for kind in PoolKind::ALL {
        let pool = dictionary.pool(kind);
        for (i, entry) in pool.entries().iter().enumerate() {
            payload.extend_from_slice(&serialize_vector(pool.vector(i)));
            entries.push(StoredEntry {
                source: entry.source.clone(),
                target: entry.target.clone(),
                pool: kind,
            });
        }
    }

    let checksum = crc32fast::hash(&payload);
    let header = VectorHeader {
        magic: VECTOR_MAGIC,
        version: FORMAT_VERSION.to_le(),
        dimensions: u32::try_from(dims)
            .map_err(|_| EngineError::InvalidInput(format!("{dims} dimensions")))?
            .to_le(),
        checksum: checksum.to_le(),
        rows: (entries.len() as u64).to_le(),
    };
    let mut vector_bytes = Vec::with_capacity(HEADER_SIZE + payload.len());
    vector_bytes.extend_from_slice(bytemuck::bytes_of(&header));
    vector_bytes.extend_from_slice(&payload);

    let pairs = PairsFile {
        format_version: FORMAT_VERSION,
        identifier: dictionary.id().to_string(),
        created_at: dictionary.created_at(),
        model: dictionary.model().to_string(),
        dimensions: dims,
        vectors_checksum: Some(checksum),
        entries,
    };
    let json = serde_json::to_vec_pretty(&pairs)
        .map_err(|e| EngineError::InvalidInput(format!("failed to encode pairs: {e}")))?;

    let vectors_temp = write_temp(&vectors_path, &vector_bytes)?;
    let pairs_temp = match write_temp(&pairs_path, &json) {
        Ok(temp) => temp,
        Err(e) => {
            let _ = fs::remove_file(&vectors_temp);
            return Err(e);
        }
    };
    commit(&vectors_temp, &vectors_path, &pairs_temp)?;
    commit(&pairs_temp, &pairs_path, &pairs_temp)?;

    debug!(
        "Wrote {} rows to {} and {}",
        pairs.entries.len(),
        vectors_path.display(),
        pairs_path.display()
    );
    Ok(())
}

/// temp file -> fsync. Returns the temp path.
fn write_temp(path: &Path, bytes: &[u8]) -> Result<PathBuf> {
    let temp_path = artifact_path(path, ".tmp");
    let result = (|| -> std::io::Result<()> {
        let mut file = fs::File::create(&temp_path)?;
        file.write_all(bytes)?;
        file.sync_all()
    })();
    if let Err(e) = result {
        let _ = fs::remove_file(&temp_path);
        return Err(e.into());
    }
    Ok(temp_path)
}

/// Rename `temp` over `path`, dropping `leftover` on failure.
fn commit(temp: &Path, path: &Path, leftover: &Path) -> Result<()> {
    if let Err(e) = fs::rename(temp, path) {
        let _ = fs::remove_file(temp);
        let _ = fs::remove_file(leftover);
        return Err(e.into());
    }
    Ok(())
}

/// Read the dictionary stored at `prefix`.
///
/// Missing both files is [`EngineError::DictionaryNotFound`]. Any other
/// inconsistency, an unreadable file included, is
/// [`EngineError::CorruptDictionary`].
pub fn load(prefix: &Path) -> Result<Dictionary> {
    let vectors_path = artifact_path(prefix, VECTORS_SUFFIX);
    let pairs_path = artifact_path(prefix, PAIRS_SUFFIX);

    match (vectors_path.exists(), pairs_path.exists()) {
        (false, false) => {
            return Err(EngineError::DictionaryNotFound(prefix.display().to_string()));
        }
        (true, false) => return Err(EngineError::corrupt(&pairs_path, "file is missing")),
        (false, true) => return Err(EngineError::corrupt(&vectors_path, "file is missing")),
        (true, true) => {}
    }

    let json = fs::read(&pairs_path)
        .map_err(|e| EngineError::corrupt(&pairs_path, format!("unreadable: {e}")))?;
    let pairs: PairsFile = serde_json::from_slice(&json)
        .map_err(|e| EngineError::corrupt(&pairs_path, format!("invalid JSON: {e}")))?;
    if pairs.format_version > FORMAT_VERSION {
        return Err(EngineError::corrupt(
            &pairs_path,
            format!("unsupported format version {}", pairs.format_version),
        ));
    }

    let bytes = fs::read(&vectors_path)
        .map_err(|e| EngineError::corrupt(&vectors_path, format!("unreadable: {e}")))?;
    let (dims, checksum, vectors) =
        read_vectors(&bytes).map_err(|r| EngineError::corrupt(&vectors_path, r))?;
    if pairs.vectors_checksum.is_some_and(|c| c != checksum) {
        return Err(EngineError::corrupt(
            &pairs_path,
            "pairs and vectors come from different saves",
        ));
    }

    if dims != pairs.dimensions {
        return Err(EngineError::corrupt(
            &vectors_path,
            format!("{dims} dimensions but pairs declare {}", pairs.dimensions),
        ));
    }
    if dims == 0 {
        return Err(EngineError::corrupt(&vectors_path, "zero dimensions"));
    }
    let rows = vectors.len() / dims;
    if rows != pairs.entries.len() {
        return Err(EngineError::corrupt(
            &vectors_path,
            format!("{rows} vectors but {} pairs", pairs.entries.len()),
        ));
    }

    for (row, vector) in vectors.chunks_exact(dims).enumerate() {
        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if !norm.is_finite() || (norm - 1.0).abs() > NORM_TOLERANCE {
            return Err(EngineError::corrupt(
                &vectors_path,
                format!("row {row} is not unit length (norm {norm})"),
            ));
        }
    }

    let id = DictionaryId::new(pairs.identifier.clone())
        .map_err(|e| EngineError::corrupt(&pairs_path, e.to_string()))?;

    let mut split = (Vec::new(), Vec::new());
    let mut whole = (Vec::new(), Vec::new());
    for (row, stored) in pairs.entries.into_iter().enumerate() {
        let (entries, flat) = match stored.pool {
            PoolKind::Split => &mut split,
            PoolKind::Whole => &mut whole,
        };
        entries.push(Entry::new(stored.source, stored.target));
        flat.extend_from_slice(&vectors[row * dims..(row + 1) * dims]);
    }

    let split = Pool::from_flat(PoolKind::Split, dims, split.0, split.1);
    let whole = Pool::from_flat(PoolKind::Whole, dims, whole.0, whole.1);
    Dictionary::new(id, pairs.created_at, pairs.model, split, whole)
}

/// Parse and verify a vectors file, returning (dimensions, checksum, flat payload).
fn read_vectors(bytes: &[u8]) -> std::result::Result<(usize, u32, Vec<f32>), String> {
    if bytes.len() < HEADER_SIZE {
        return Err(format!("truncated header ({} bytes)", bytes.len()));
    }
    let header: VectorHeader = bytemuck::pod_read_unaligned(&bytes[..HEADER_SIZE]);
    if header.magic != VECTOR_MAGIC {
        return Err("bad magic".to_string());
    }
    let version = u32::from_le(header.version);
    if version > FORMAT_VERSION {
        return Err(format!("unsupported format version {version}"));
    }

    let dims = u32::from_le(header.dimensions) as usize;
    let rows = u64::from_le(header.rows) as usize;
    let payload = &bytes[HEADER_SIZE..];
    let expected = rows
        .checked_mul(dims)
        .and_then(|n| n.checked_mul(4))
        .ok_or_else(|| "row count overflows".to_string())?;
    if payload.len() != expected {
        return Err(format!(
            "payload is {} bytes, header promises {rows} x {dims} floats",
            payload.len()
        ));
    }
    let checksum = u32::from_le(header.checksum);
    if crc32fast::hash(payload) != checksum {
        return Err("checksum mismatch".to_string());
    }

    let floats = payload
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    Ok((dims, checksum, floats))
}

/// Dictionaries kept under one data directory.
#[derive(Debug, Clone)]
pub struct DictionaryStore {
    root: PathBuf,
}

impl DictionaryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn prefix(&self, id: &DictionaryId) -> PathBuf {
        self.root.join(id.as_str())
    }

    pub fn save(&self, dictionary: &Dictionary) -> Result<PathBuf> {
        fs::create_dir_all(&self.root)?;
        let prefix = self.prefix(dictionary.id());
        save(dictionary, &prefix)?;
        info!("Saved dictionary {} ({} entries)", dictionary.id(), dictionary.len());
        Ok(prefix)
    }

    pub fn load(&self, id: &DictionaryId) -> Result<Dictionary> {
        load(&self.prefix(id)).map_err(|e| match e {
            EngineError::DictionaryNotFound(_) => EngineError::DictionaryNotFound(id.to_string()),
            other => other,
        })
    }

    /// Whether both artifacts of `id` exist.
    #[must_use]
    pub fn exists(&self, id: &DictionaryId) -> bool {
        let prefix = self.prefix(id);
        artifact_path(&prefix, VECTORS_SUFFIX).exists()
            && artifact_path(&prefix, PAIRS_SUFFIX).exists()
    }

    /// Remove both artifacts. Returns whether anything was deleted.
    pub fn delete(&self, id: &DictionaryId) -> Result<bool> {
        let prefix = self.prefix(id);
        let mut removed = false;
        for suffix in [VECTORS_SUFFIX, PAIRS_SUFFIX] {
            let path = artifact_path(&prefix, suffix);
            if path.exists() {
                fs::remove_file(&path)?;
                removed = true;
            }
        }
        if removed {
            info!("Deleted dictionary {id}");
        }
        Ok(removed)
    }

    /// Identifiers of stored dictionaries, sorted.
    pub fn list(&self) -> Result<Vec<DictionaryId>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        for dir_entry in fs::read_dir(&self.root)? {
            let name = dir_entry?.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            let Some(stem) = name.strip_suffix(PAIRS_SUFFIX) else {
                continue;
            };
            match DictionaryId::new(stem) {
                Ok(id) if self.exists(&id) => ids.push(id),
                Ok(id) => warn!("Dictionary {id} is missing its vectors file"),
                Err(_) => debug!("Ignoring {name}"),
            }
        }
        ids.sort();
        Ok(ids)
    }
}
