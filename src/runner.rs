//! Resumable, shardable batch over game identities.
//!
//! Every game that makes it through fetch → extract → normalize is written to the
//! durable store right away. That write is the resume checkpoint: the next
//! invocation lists the store and skips whatever is already there.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::Local;
use serde_json::Value;
use tokio::task::{spawn_blocking, JoinSet};
use tracing::{error, info, warn};

use crate::config::RunConfig;
use crate::extract::{exposes_sides, extract, select_arguments};
use crate::normalize::{normalize, SourceHint};
use crate::reconcile::merge;
use crate::record::{CanonicalRecord, IdentityKey};
use crate::request::Fetcher;
use crate::store::DurableStore;
use crate::{info_time, Error, Result};

/// Store prefix of per-game blobs.
pub const RECORDS_PREFIX: &str = "games/";
const RECORD_EXT: &str = ".json";

/// Snapshot observations keyed by game id, merged into the detail record before it
/// is persisted.
pub type Seeds = HashMap<u64, CanonicalRecord>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Distinct identities in the universe.
    pub total: usize,
    pub shard_size: usize,
    /// Identities of this shard already in the store when the run started.
    pub already_done: usize,
    /// Identities of this shard left to do, before the batch cap.
    pub pending: usize,
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
}

#[derive(Debug, Default)]
pub struct RunOutcome {
    pub summary: RunSummary,
    /// Sorted ids persisted by this run.
    pub succeeded: Vec<u64>,
    /// Sorted ids that failed, with the reason.
    pub failed: Vec<(u64, String)>,
}

pub fn record_key(key: &IdentityKey) -> String {
    format!("{RECORDS_PREFIX}{key}{RECORD_EXT}")
}

pub fn identity_of(store_key: &str) -> Option<IdentityKey> {
    store_key
        .strip_prefix(RECORDS_PREFIX)?
        .strip_suffix(RECORD_EXT)?
        .parse()
        .ok()
}

/// Writes one record under its identity key. Returns the store key.
pub async fn persist(store: &dyn DurableStore, record: &CanonicalRecord) -> Result<String> {
    let key = record_key(&record.identity_key());
    let bytes = serde_json::to_vec_pretty(record)?;
    store.write_blob(&key, &bytes).await?;
    Ok(key)
}

/// Ids already persisted by earlier runs, read from the store listing.
pub async fn processed_set(store: &dyn DurableStore) -> Result<BTreeSet<u64>> {
    Ok(store
        .list_keys(RECORDS_PREFIX)
        .await?
        .iter()
        .filter_map(|key| identity_of(key)?.id())
        .collect())
}

/// The identities of shard `index` out of `count`: every id whose position in the
/// sorted, de-duplicated universe is `index` modulo `count`.
pub fn shard(universe: &[u64], count: usize, index: usize) -> Vec<u64> {
    let count = count.max(1);
    let ordered: BTreeSet<u64> = universe.iter().copied().collect();
    ordered
        .into_iter()
        .enumerate()
        .filter(|(pos, _)| pos % count == index)
        .map(|(_, id)| id)
        .collect()
}

pub struct BatchRunner {
    fetcher: Arc<dyn Fetcher>,
    store: Arc<dyn DurableStore>,
    config: RunConfig,
    /// Contains `{id}`.
    detail_url: String,
    marker: String,
}

impl BatchRunner {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        store: Arc<dyn DurableStore>,
        config: RunConfig,
        detail_url: impl Into<String>,
        marker: impl Into<String>,
    ) -> Self {
        Self {
            fetcher,
            store,
            config,
            detail_url: detail_url.into(),
            marker: marker.into(),
        }
    }

    pub async fn run(&self, universe: &[u64], seeds: Seeds) -> Result<RunOutcome> {
        if universe.is_empty() {
            return Err(Error::EmptyUniverse);
        }
        self.config.validate()?;
        let start_time = Local::now();

        let total = universe.iter().collect::<BTreeSet<_>>().len();
        let mine = shard(universe, self.config.shard_count, self.config.shard_index);
        let done = processed_set(&*self.store).await?;
        let already_done = mine.iter().filter(|id| done.contains(id)).count();

        let pending: Vec<u64> = if self.config.overwrite {
            mine.clone()
        } else {
            mine.iter().copied().filter(|id| !done.contains(id)).collect()
        };
        let pending_count = pending.len();
        let batch: Vec<u64> = pending.into_iter().take(self.config.batch_limit()).collect();

        info!(
            total,
            shard = self.config.shard_index,
            shards = self.config.shard_count,
            shard_size = mine.len(),
            already_done,
            pending = pending_count,
            batch = batch.len(),
            overwrite = self.config.overwrite,
            "starting batch"
        );

        let attempted = batch.len();
        let workers = self.config.concurrency.max(1).min(attempted);
        let shared = Arc::new(Shared {
            ids: batch,
            cursor: AtomicUsize::new(0),
            seeds,
            fetcher: self.fetcher.clone(),
            store: self.store.clone(),
            config: self.config.clone(),
            detail_url: self.detail_url.clone(),
            marker: self.marker.clone(),
        });

        let mut task_set = JoinSet::new();
        for worker in 0..workers {
            task_set.spawn(work(shared.clone(), worker));
        }

        let mut outcome = RunOutcome::default();
        while let Some(report) = task_set.join_next().await {
            let report = report?;
            outcome.succeeded.extend(report.succeeded);
            outcome.failed.extend(report.failed);
        }
        outcome.succeeded.sort_unstable();
        outcome.failed.sort_unstable();

        outcome.summary = RunSummary {
            total,
            shard_size: mine.len(),
            already_done,
            pending: pending_count,
            attempted,
            succeeded: outcome.succeeded.len(),
            failed: outcome.failed.len(),
        };
        info_time!(
            start_time,
            "Finished batch: {} ok, {} failed, {} left for later runs",
            outcome.summary.succeeded,
            outcome.summary.failed,
            pending_count - outcome.summary.succeeded
        );
        Ok(outcome)
    }
}

/// State shared by the workers of one run. The cursor is the only thing they
/// mutate; each claimed id belongs to exactly one worker.
struct Shared {
    ids: Vec<u64>,
    cursor: AtomicUsize,
    seeds: Seeds,
    fetcher: Arc<dyn Fetcher>,
    store: Arc<dyn DurableStore>,
    config: RunConfig,
    detail_url: String,
    marker: String,
}

#[derive(Default)]
struct WorkerReport {
    succeeded: Vec<u64>,
    failed: Vec<(u64, String)>,
}

impl WorkerReport {
    fn is_empty(&self) -> bool {
        self.succeeded.is_empty() && self.failed.is_empty()
    }
}

async fn work(shared: Arc<Shared>, worker: usize) -> WorkerReport {
    let mut report = WorkerReport::default();
    loop {
        let ix = shared.cursor.fetch_add(1, Ordering::SeqCst);
        let Some(&id) = shared.ids.get(ix) else {
            break;
        };
        // Politeness pause between two fetches of this worker, never after its last.
        if !report.is_empty() && !shared.config.delay.is_zero() {
            tokio::time::sleep(shared.config.delay).await;
        }

        match shared.process(id).await {
            Ok(key) => {
                info!(worker, id, %key, "persisted game");
                report.succeeded.push(id);
            }
            Err(err) => {
                if err.is_document_error() {
                    warn!(worker, id, %err, "game failed, left for a later run");
                } else {
                    error!(worker, id, %err, "game failed, left for a later run");
                }
                report.failed.push((id, err.to_string()));
            }
        }
    }
    report
}

impl Shared {
    async fn process(&self, id: u64) -> Result<String> {
        let url = self.detail_url.replace("{id}", &id.to_string());
        let html = self.fetcher.fetch(&url).await?;

        let marker = self.marker.clone();
        let raw = spawn_blocking(move || detail_payload(&html, &marker)).await??;

        let mut record = normalize(&raw, SourceHint::Detail);
        if record.id.is_none() {
            record.id = Some(id);
        }
        if let Some(seed) = self.seeds.get(&id) {
            record = merge(&record, seed);
        }
        persist(&*self.store, &record).await
    }
}

/// The game object of a detail page: the first argument, or the first game inside
/// it when the page wraps games in an array. Either way it must name both sides.
fn detail_payload(html: &str, marker: &str) -> Result<Value> {
    let not_found = || Error::NotFound {
        marker: marker.to_string(),
    };
    let args = select_arguments(extract(html, marker)?).ok_or_else(not_found)?;
    match args.into_iter().next().ok_or_else(not_found)? {
        Value::Array(items) => items.into_iter().find(exposes_sides).ok_or_else(not_found),
        game if exposes_sides(&game) => Ok(game),
        _ => Err(not_found()),
    }
}
