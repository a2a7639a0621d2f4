//! Rebuilds the aggregate views of the record store: size-bounded chunks, a
//! manifest describing them, an index of every game and a small root pointer.
//!
//! Everything here is derived and rewritten wholesale on each export. Chunks carry no
//! timestamp, so an unchanged record store reproduces them byte for byte.

use std::collections::BTreeSet;

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::record::{CanonicalRecord, IdentityKey, Status};
use crate::runner::{identity_of, record_key, RECORDS_PREFIX};
use crate::store::DurableStore;
use crate::{info_time, Result};

pub const INDEX_KEY: &str = "export/index.json";
pub const MANIFEST_KEY: &str = "export/manifest.json";
pub const ROOT_KEY: &str = "export/root.json";
pub const CHUNKS_PREFIX: &str = "export/chunks/";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkInfo {
    pub file: String,
    /// Serialized size in bytes.
    pub size: usize,
    pub count: usize,
    /// Smallest and largest game id held; `None` when the chunk only holds id-less games.
    pub first_id: Option<u64>,
    pub last_id: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub generated_at: DateTime<Utc>,
    pub chunk_target_bytes: usize,
    pub total_chunks: usize,
    pub total_records: usize,
    pub chunks: Vec<ChunkInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexItem {
    pub id: Option<u64>,
    pub key: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    /// Store key of the full record.
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Index {
    pub generated_at: DateTime<Utc>,
    pub total: usize,
    pub items: Vec<IndexItem>,
}

/// Fixed shape, so it stays a few hundred bytes whatever the corpus size.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootPointer {
    pub generated_at: DateTime<Utc>,
    pub total_records: usize,
    pub total_chunks: usize,
    pub index_path: String,
    pub manifest_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportReport {
    pub manifest: Manifest,
    /// Blobs under the records prefix that could not be read back as records.
    pub skipped: Vec<String>,
    /// Chunk files of an earlier export that the new manifest no longer lists.
    pub removed_chunks: Vec<String>,
}

/// Reads every persisted record from `records` and rewrites the export views in `out`.
///
/// Must not run while a batch is still writing to `records`.
pub async fn export(
    records: &dyn DurableStore,
    out: &dyn DurableStore,
    chunk_target_bytes: usize,
    generated_at: DateTime<Utc>,
) -> Result<ExportReport> {
    let start_time = Local::now();
    let (loaded, skipped) = load_records(records).await?;

    let mut chunks = Vec::new();
    let mut builder = ChunkBuilder::default();
    for (key, record) in &loaded {
        let serialized = serde_json::to_string(record)?;
        if builder.would_exceed(&serialized, chunk_target_bytes) {
            chunks.push(builder.flush(out, chunks.len()).await?);
        }
        builder.push(serialized, key.id());
    }
    if !builder.is_empty() {
        chunks.push(builder.flush(out, chunks.len()).await?);
    }

    let items = loaded
        .iter()
        .map(|(key, record)| IndexItem {
            id: record.id,
            key: key.to_string(),
            name: record.display_name(),
            date: record.date.map(|d| d.format("%Y-%m-%dT%H:%M:%S").to_string()),
            status: record.status,
            path: record_key(key),
        })
        .collect::<Vec<_>>();
    let index = Index {
        generated_at,
        total: items.len(),
        items,
    };
    out.write_blob(INDEX_KEY, &serde_json::to_vec_pretty(&index)?)
        .await?;

    let manifest = Manifest {
        generated_at,
        chunk_target_bytes,
        total_chunks: chunks.len(),
        total_records: loaded.len(),
        chunks,
    };
    out.write_blob(MANIFEST_KEY, &serde_json::to_vec_pretty(&manifest)?)
        .await?;

    let removed_chunks = remove_stale_chunks(out, &manifest).await?;

    let root = RootPointer {
        generated_at,
        total_records: manifest.total_records,
        total_chunks: manifest.total_chunks,
        index_path: INDEX_KEY.to_string(),
        manifest_path: MANIFEST_KEY.to_string(),
    };
    out.write_blob(ROOT_KEY, &serde_json::to_vec_pretty(&root)?)
        .await?;

    info_time!(
        start_time,
        "Exported {} records into {} chunks",
        manifest.total_records,
        manifest.total_chunks
    );
    Ok(ExportReport {
        manifest,
        skipped,
        removed_chunks,
    })
}

/// Records sorted by identity key, plus the keys of unreadable blobs.
async fn load_records(
    store: &dyn DurableStore,
) -> Result<(Vec<(IdentityKey, CanonicalRecord)>, Vec<String>)> {
    let mut loaded = Vec::new();
    let mut skipped = Vec::new();
    for key in store.list_keys(RECORDS_PREFIX).await? {
        let Some(identity) = identity_of(&key) else {
            skipped.push(key);
            continue;
        };
        let bytes = store.read_blob(&key).await?;
        match serde_json::from_slice::<CanonicalRecord>(&bytes) {
            Ok(record) => loaded.push((identity, record)),
            Err(err) => {
                warn!(%key, %err, "unreadable record left out of the export");
                skipped.push(key);
            }
        }
    }
    loaded.sort_by(|a, b| a.0.cmp(&b.0));
    Ok((loaded, skipped))
}

async fn remove_stale_chunks(out: &dyn DurableStore, manifest: &Manifest) -> Result<Vec<String>> {
    let current: BTreeSet<&str> = manifest.chunks.iter().map(|c| c.file.as_str()).collect();
    let mut removed = Vec::new();
    for key in out.list_keys(CHUNKS_PREFIX).await? {
        if !current.contains(key.as_str()) {
            out.remove_blob(&key).await?;
            removed.push(key);
        }
    }
    Ok(removed)
}

fn chunk_key(n: usize) -> String {
    format!("{CHUNKS_PREFIX}chunk-{n:04}.json")
}

/// Accumulates serialized records into one JSON array.
#[derive(Default)]
struct ChunkBuilder {
    body: String,
    count: usize,
    ids: Vec<u64>,
}

impl ChunkBuilder {
    fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Size of the chunk once closed, in bytes.
    fn size(&self) -> usize {
        self.body.len() + 2
    }

    /// A lone record is never split, so an empty chunk always accepts the next one.
    fn would_exceed(&self, serialized: &str, budget: usize) -> bool {
        !self.is_empty() && self.size() + 1 + serialized.len() > budget
    }

    fn push(&mut self, serialized: String, id: Option<u64>) {
        if !self.is_empty() {
            self.body.push(',');
        }
        self.body.push_str(&serialized);
        self.count += 1;
        self.ids.extend(id);
    }

    async fn flush(&mut self, out: &dyn DurableStore, n: usize) -> Result<ChunkInfo> {
        let taken = std::mem::take(self);
        let bytes = format!("[{}]", taken.body).into_bytes();
        let file = chunk_key(n);
        out.write_blob(&file, &bytes).await?;
        debug!(%file, size = bytes.len(), count = taken.count, "wrote chunk");
        Ok(ChunkInfo {
            file,
            size: bytes.len(),
            count: taken.count,
            first_id: taken.ids.iter().min().copied(),
            last_id: taken.ids.iter().max().copied(),
        })
    }
}
