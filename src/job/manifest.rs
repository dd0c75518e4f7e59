//! Job manifest for resumable merges.
//!
//! The manifest lives in the job work directory and records which batches
//! have been renamed into place. It is rewritten atomically after every
//! completed batch, so after a crash it never claims a batch whose output was
//! not committed.
//!
//! Each completed batch is stored with a digest of the source shards it was
//! built from (path, length and modification time). A source regenerated
//! after its batch committed changes that digest, and the batch runs again.

use std::collections::{BTreeSet, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, ShardsumError};
use crate::job::config::JobConfig;
use crate::job::plan::{BatchId, MergePlan};

pub const MANIFEST_FILE: &str = "manifest.json";
const MANIFEST_VERSION: u32 = 2;

/// A committed batch and the digest of the sources it covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CompletedBatch {
    pub id: BatchId,
    pub sources: u32,
}

/// Persistent progress of one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobManifest {
    pub version: u32,
    pub job_id: String,
    /// Checksum of everything that shapes the merge tree and the bytes of
    /// intermediate shards.
    pub fingerprint: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed: BTreeSet<CompletedBatch>,
}

impl JobManifest {
    pub fn new(job_id: impl Into<String>, fingerprint: u32) -> Self {
        let now = Utc::now();
        JobManifest {
            version: MANIFEST_VERSION,
            job_id: job_id.into(),
            fingerprint,
            created_at: now,
            updated_at: now,
            completed: BTreeSet::new(),
        }
    }

    pub fn path(work_dir: &Path) -> PathBuf {
        work_dir.join(MANIFEST_FILE)
    }

    /// Load the manifest of `work_dir`, if one exists.
    pub fn load(work_dir: &Path) -> Result<Option<Self>> {
        let path = Self::path(work_dir);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = std::fs::read(&path)?;
        let manifest: JobManifest = serde_json::from_slice(&bytes).map_err(|e| {
            ShardsumError::manifest(format!("cannot parse {}: {e}", path.display()))
        })?;
        if manifest.version != MANIFEST_VERSION {
            return Err(ShardsumError::manifest(format!(
                "unsupported manifest version {} in {}",
                manifest.version,
                path.display()
            )));
        }
        Ok(Some(manifest))
    }

    /// Load the existing manifest or start a new one.
    ///
    /// Returns the manifest and whether it was resumed. An existing manifest
    /// with another job id or fingerprint is an error: its intermediates were
    /// produced from different inputs.
    pub fn open_or_create(work_dir: &Path, job_id: &str, fingerprint: u32) -> Result<(Self, bool)> {
        match Self::load(work_dir)? {
            Some(existing) => {
                if existing.job_id != job_id {
                    return Err(ShardsumError::manifest(format!(
                        "work directory {} belongs to job {}, not {job_id}",
                        work_dir.display(),
                        existing.job_id
                    )));
                }
                if existing.fingerprint != fingerprint {
                    return Err(ShardsumError::manifest(format!(
                        "job {job_id} was started with different inputs or settings \
                         (fingerprint {:08x}, now {fingerprint:08x}); use a new job id",
                        existing.fingerprint
                    )));
                }
                Ok((existing, true))
            }
            None => {
                let manifest = Self::new(job_id, fingerprint);
                manifest.save(work_dir)?;
                Ok((manifest, false))
            }
        }
    }

    /// Atomically write the manifest into `work_dir`.
    pub fn save(&self, work_dir: &Path) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(self)?;
        let mut temp = tempfile::Builder::new()
            .prefix(".manifest.")
            .suffix(".tmp")
            .tempfile_in(work_dir)?;
        temp.write_all(&bytes)?;
        temp.as_file().sync_all()?;
        temp.persist(Self::path(work_dir))
            .map_err(|e| ShardsumError::Io(e.error))?;
        Ok(())
    }

    /// Whether `id` was committed from sources with digest `sources`.
    pub fn is_completed(&self, id: BatchId, sources: u32) -> bool {
        self.completed.contains(&CompletedBatch { id, sources })
    }

    /// Whether `id` was committed at all, whatever its sources were.
    pub fn has_batch(&self, id: BatchId) -> bool {
        self.completed.iter().any(|batch| batch.id == id)
    }

    pub fn mark_completed(&mut self, id: BatchId, sources: u32) {
        self.completed.retain(|batch| batch.id != id);
        self.completed.insert(CompletedBatch { id, sources });
        self.updated_at = Utc::now();
    }
}

/// Checksum of the inputs and settings that determine intermediate shards.
///
/// The output path and key filter only affect the final merge and are left
/// out, so they may change between attempts of the same job.
pub fn fingerprint(inputs: &[PathBuf], config: &JobConfig) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    for input in inputs {
        hasher.update(input.to_string_lossy().as_bytes());
        hasher.update(&[0]);
    }
    hasher.update(&(inputs.len() as u64).to_le_bytes());
    hasher.update(&(config.batch_width as u64).to_le_bytes());
    hasher.update(&config.compression_level.to_le_bytes());
    hasher.update(&[config.strict_keys as u8]);
    hasher.update(config.combine.name().as_bytes());
    hasher.finalize()
}

/// Digest of one source shard: its path, length and modification time.
///
/// A missing or unreadable file digests its path alone; the batch reading it
/// then runs and reports the shard.
pub fn source_digest(path: &Path) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(path.to_string_lossy().as_bytes());
    if let Ok(meta) = std::fs::metadata(path) {
        hasher.update(&meta.len().to_le_bytes());
        let modified = meta
            .modified()
            .ok()
            .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
            .map_or(0, |since| since.as_nanos());
        hasher.update(&modified.to_le_bytes());
    }
    hasher.finalize()
}

/// Source digest of every batch in `plan`, final merge included.
///
/// An intermediate shard digests the sources of the batch that produced it,
/// so a changed input shard invalidates every batch on its way to the final
/// merge.
pub fn batch_digests(plan: &MergePlan) -> HashMap<BatchId, u32> {
    let mut shards: HashMap<&Path, u32> = HashMap::new();
    let mut batches = HashMap::new();
    for batch in plan.batches() {
        let mut hasher = crc32fast::Hasher::new();
        for input in &batch.inputs {
            let digest = match shards.get(input.as_path()) {
                Some(digest) => *digest,
                None => source_digest(input),
            };
            hasher.update(&digest.to_le_bytes());
        }
        let digest = hasher.finalize();
        shards.insert(batch.output.as_path(), digest);
        batches.insert(batch.id, digest);
    }
    batches
}
