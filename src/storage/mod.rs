//! Persisted index artifact.
//!
//! The artifact is a single file holding one generation: its dimension,
//! index config, version tags and records (see [`schema`] for the layout).
//!
//! # Writes
//!
//! ```text
//! lock <path>.lock ─► write <path>.tmp ─► fsync ─► rename to <path> ─► unlock
//! ```
//!
//! Readers therefore see either the previous file or the new one, never a
//! partial write. The advisory lock keeps two writers from interleaving.
//!
//! # Reads
//!
//! Every structural check failure is reported as a `Corrupt` kind error
//! (`StorageError::Corrupted`, `FormatVersionMismatch` or `Serialization`).

pub mod schema;

pub use schema::{ArtifactBody, PersistedRecord, FORMAT_VERSION, MAGIC};

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind as IoErrorKind, Write};
use std::path::{Path, PathBuf};

use bincode::Options;
use fs2::FileExt;
use tracing::{debug, info, instrument};

use crate::config::MAX_DIMENSION;
use crate::error::{NearlineError, Result, StorageError};
use crate::index::IndexStructure;
use crate::store::{validate_embedding, validate_metadata};

fn codec() -> impl Options {
    bincode::DefaultOptions::new().with_fixint_encoding()
}

/// Serializes a generation into artifact bytes.
pub fn encode(index: &IndexStructure) -> Result<Vec<u8>> {
    let body = ArtifactBody {
        dimension: index.dimension(),
        index: *index.config(),
        generation: index.generation(),
        snapshot_version: index.snapshot_version(),
        built_at: index.built_at(),
        records: index
            .records()
            .iter()
            .map(|r| PersistedRecord {
                id: r.id.clone(),
                embedding: r.embedding.clone(),
                metadata: r.metadata.clone(),
            })
            .collect(),
    };

    let mut out = Vec::with_capacity(schema::HEADER_LEN + body.records.len() * body.dimension * 4);
    schema::write_header(&mut out);
    codec()
        .serialize_into(&mut out, &body)
        .map_err(|e| StorageError::serialization(e.to_string()))?;
    Ok(out)
}

/// Parses and validates artifact bytes.
///
/// # Errors
///
/// - `Corrupted` for a bad magic, an invalid dimension or config, a
///   record whose embedding has the wrong length or a non-finite value,
///   invalid metadata, or an empty or duplicate id
/// - `FormatVersionMismatch` for an artifact of another format version
/// - `Serialization` if the body does not decode
pub fn decode(bytes: &[u8]) -> Result<ArtifactBody> {
    let version = schema::read_header(bytes)
        .ok_or_else(|| StorageError::corrupted("missing or invalid artifact header"))?;
    if version != FORMAT_VERSION {
        return Err(StorageError::FormatVersionMismatch {
            expected: FORMAT_VERSION,
            found: version,
        }
        .into());
    }

    let body: ArtifactBody = codec()
        .with_limit(bytes.len() as u64)
        .deserialize(&bytes[schema::HEADER_LEN..])
        .map_err(|e| StorageError::serialization(e.to_string()))?;
    validate(&body)?;
    Ok(body)
}

fn validate(body: &ArtifactBody) -> Result<()> {
    if body.dimension == 0 || body.dimension > MAX_DIMENSION {
        return Err(StorageError::corrupted(format!("invalid dimension {}", body.dimension)).into());
    }
    body.index
        .validate()
        .map_err(|e| StorageError::corrupted(format!("invalid index config: {}", e)))?;

    let mut seen = HashSet::with_capacity(body.records.len());
    for record in &body.records {
        if record.id.is_empty() {
            return Err(StorageError::corrupted("record with empty id").into());
        }
        if !seen.insert(&record.id) {
            return Err(
                StorageError::corrupted(format!("duplicate record id {}", record.id)).into(),
            );
        }
        validate_embedding(&record.embedding, body.dimension)
            .map_err(|e| StorageError::corrupted(format!("record {}: {}", record.id, e)))?;
        validate_metadata(&record.metadata)
            .map_err(|e| StorageError::corrupted(format!("record {}: {}", record.id, e)))?;
    }
    Ok(())
}

/// Atomically writes `index` to `path`.
///
/// # Errors
///
/// - `Storage(Locked)` if another writer holds the artifact lock
/// - `Io` for filesystem failures
#[instrument(skip(index), fields(path = %path.display(), generation = %index.generation()))]
pub fn save(path: &Path, index: &IndexStructure) -> Result<()> {
    let bytes = encode(index)?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let lock = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(sidecar(path, "lock"))?;
    lock.try_lock_exclusive()
        .map_err(|_| StorageError::Locked(path.display().to_string()))?;

    let result = write_atomic(path, &bytes);
    let _ = FileExt::unlock(&lock);
    result?;

    info!(bytes = bytes.len(), records = index.len(), "Saved index artifact");
    Ok(())
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = sidecar(path, "tmp");
    let mut file = File::create(&tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    drop(file);
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Reads and validates the artifact at `path`.
///
/// Returns `Ok(None)` if no file exists.
#[instrument(fields(path = %path.display()))]
pub fn load(path: &Path) -> Result<Option<ArtifactBody>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == IoErrorKind::NotFound => {
            debug!("No index artifact found");
            return Ok(None);
        }
        Err(e) => return Err(NearlineError::Io(e)),
    };
    let body = decode(&bytes)?;
    info!(
        records = body.records.len(),
        generation = %body.generation,
        snapshot_version = %body.snapshot_version,
        "Loaded index artifact"
    );
    Ok(Some(body))
}

fn sidecar(path: &Path, ext: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(ext);
    PathBuf::from(name)
}
