use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::sync::Arc;

use chrono::{Local, Utc};
use serde_json::{json, Map, Value};
use tokio::task::spawn_blocking;
use tracing::warn;

use crate::config::Config;
use crate::export::{export, ExportReport};
use crate::extract::{extract, select_arguments};
use crate::layout::parse_results_table;
use crate::normalize::{normalize, SourceHint};
use crate::reconcile::dedupe;
use crate::record::CanonicalRecord;
use crate::request::{fetch_with_retry, Fetcher, HttpFetcher};
use crate::runner::{persist, BatchRunner, RunOutcome, Seeds};
use crate::store::{DurableStore, FsStore};
use crate::{info_time, Error, Result};

/// Reduced snapshot of the league page, rewritten only when its series changes.
pub const SNAPSHOT_KEY: &str = "latest.json";
const SOURCE_NAME: &str = "pelotainvernal";

/// Overlapping game lists of a snapshot series, each one a source of observations.
const GAME_LISTS: &[&str] = &["todayGames", "nearestGames", "previousGames", "previousRoundGames"];
const SERIES_CONTEXT: &[&str] = &["league", "standings"];

#[derive(Debug)]
pub struct PipelineReport {
    /// Distinct games seen on the snapshot (or fallback) page.
    pub snapshot_records: usize,
    pub snapshot_written: bool,
    /// `None` when no game had a primary id to fetch details for.
    pub run: Option<RunOutcome>,
    pub export: ExportReport,
}

/// Scrapes the configured site into `config.out_dir`.
pub async fn process_site(config: &Config) -> Result<()> {
    let start_time = Local::now();
    info_time!("Started scraping {}", config.source_url);

    let fetcher = Arc::new(HttpFetcher::new(config.timeout)?);
    let store = Arc::new(FsStore::new(&config.out_dir));
    let report = run_pipeline(config, fetcher, store).await?;

    info_time!(
        start_time,
        "Finished: {} snapshot games, {} exported into {} chunks",
        report.snapshot_records,
        report.export.manifest.total_records,
        report.export.manifest.total_chunks
    );
    Ok(())
}

/// Snapshot → reconcile → batch of detail pages → export, against any fetcher and store.
pub async fn run_pipeline(
    config: &Config,
    fetcher: Arc<dyn Fetcher>,
    store: Arc<dyn DurableStore>,
) -> Result<PipelineReport> {
    let stage_time = Local::now();
    let (series, observations) = load_snapshot(config, &*fetcher, &*store).await?;
    let records = dedupe(observations);
    info_time!(stage_time, "Snapshot holds {} distinct games", records.len());

    let snapshot_written = match series {
        Some(series) => write_snapshot(&*store, config, series).await?,
        None => false,
    };

    let mut universe: BTreeSet<u64> = config.force_ids.iter().copied().collect();
    let mut seeds = Seeds::new();
    let mut idless = 0;
    for record in &records {
        match record.identity_key().id() {
            Some(id) => {
                universe.insert(id);
                seeds.insert(id, record.clone());
            }
            // No detail page to fetch; the snapshot observation is all there is.
            None => {
                persist(&*store, record).await?;
                idless += 1;
            }
        }
    }
    if universe.is_empty() && idless == 0 {
        return Err(Error::EmptyUniverse);
    }

    let run = if universe.is_empty() {
        warn!(idless, "no game ids to fetch details for, skipping batch");
        None
    } else {
        let runner = BatchRunner::new(
            fetcher,
            store.clone(),
            config.run.clone(),
            config.detail_url.clone(),
            config.marker.clone(),
        );
        let universe: Vec<u64> = universe.into_iter().collect();
        Some(runner.run(&universe, seeds).await?)
    };

    let export = export(&*store, &*store, config.chunk_target_bytes, Utc::now()).await?;
    Ok(PipelineReport {
        snapshot_records: records.len(),
        snapshot_written,
        run,
        export,
    })
}

/// Raw game observations with the series they came from. Sources are tried in
/// order: the league page, the results table, the games of the stored snapshot.
/// An empty result is left to the caller, since forced ids may still make a universe.
async fn load_snapshot(
    config: &Config,
    fetcher: &dyn Fetcher,
    store: &dyn DurableStore,
) -> Result<(Option<Value>, Vec<CanonicalRecord>)> {
    let err = match league_page(config, fetcher).await {
        Ok(argument) => return Ok(snapshot_records(&argument)),
        Err(err) if err.is_document_error() => err,
        Err(err) => return Err(err),
    };
    warn!(%err, "league page unusable, trying fallback sources");

    if let Some(results_url) = &config.results_url {
        match results_table(fetcher, results_url).await {
            Ok(records) if !records.is_empty() => return Ok((None, records)),
            Ok(_) => warn!(%results_url, "results table lists no games"),
            Err(err) if err.is_document_error() => {
                warn!(%err, %results_url, "results table unusable")
            }
            Err(err) => return Err(err),
        }
    }

    let stored = stored_snapshot(store).await?;
    if !stored.is_empty() {
        info_time!("Using {} games from the stored {}", stored.len(), SNAPSHOT_KEY);
    }
    Ok((None, stored))
}

async fn league_page(config: &Config, fetcher: &dyn Fetcher) -> Result<Value> {
    let html = fetch_with_retry(fetcher, &config.source_url).await?;
    let marker = config.marker.clone();
    spawn_blocking(move || first_argument(&html, &marker)).await?
}

async fn results_table(fetcher: &dyn Fetcher, results_url: &str) -> Result<Vec<CanonicalRecord>> {
    let html = fetch_with_retry(fetcher, results_url).await?;
    let rows = spawn_blocking(move || parse_results_table(&html)).await??;
    Ok(rows
        .iter()
        .map(|row| normalize(row, SourceHint::ResultsTable))
        .filter(is_identifiable)
        .collect())
}

/// Games listed in the series of the last `latest.json` written by an earlier run.
async fn stored_snapshot(store: &dyn DurableStore) -> Result<Vec<CanonicalRecord>> {
    let bytes = match store.read_blob(SNAPSHOT_KEY).await {
        Ok(bytes) => bytes,
        Err(Error::Io(e)) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err),
    };
    let payload: Value = match serde_json::from_slice(&bytes) {
        Ok(payload) => payload,
        Err(err) => {
            warn!(%err, "stored snapshot unreadable");
            return Ok(Vec::new());
        }
    };
    Ok(payload
        .get("series")
        .map(|series| snapshot_records(series).1)
        .unwrap_or_default())
}

fn first_argument(html: &str, marker: &str) -> Result<Value> {
    select_arguments(extract(html, marker)?)
        .and_then(|args| args.into_iter().next())
        .ok_or_else(|| Error::NotFound {
            marker: marker.to_string(),
        })
}

/// Splits the page's first argument into the reduced first series and the
/// normalized games of all its lists.
fn snapshot_records(argument: &Value) -> (Option<Value>, Vec<CanonicalRecord>) {
    let first = match argument {
        Value::Array(items) => items.first(),
        other => Some(other),
    };
    let Some(Value::Object(series)) = first else {
        return (None, Vec::new());
    };

    let mut reduced = Map::new();
    let mut records = Vec::new();
    for key in SERIES_CONTEXT.iter().chain(GAME_LISTS) {
        if let Some(value) = series.get(*key) {
            reduced.insert(key.to_string(), value.clone());
        }
    }
    for list in GAME_LISTS {
        if let Some(Value::Array(games)) = series.get(*list) {
            records.extend(
                games
                    .iter()
                    .map(|game| normalize(game, SourceHint::Snapshot))
                    .filter(is_identifiable),
            );
        }
    }
    (Some(Value::Object(reduced)), records)
}

/// Observations with neither a game id nor any team id would all collapse onto one
/// placeholder key. A single missing side is keyed as `?`.
fn is_identifiable(record: &CanonicalRecord) -> bool {
    record.identity_key().id().is_some()
        || record.home.id.is_some_and(|id| id != 0)
        || record.away.id.is_some_and(|id| id != 0)
}

/// Writes `latest.json` unless the stored one already holds the same series.
async fn write_snapshot(store: &dyn DurableStore, config: &Config, series: Value) -> Result<bool> {
    let unchanged = match store.read_blob(SNAPSHOT_KEY).await {
        Ok(bytes) => serde_json::from_slice::<Value>(&bytes)
            .ok()
            .is_some_and(|stored| stored.get("series") == Some(&series)),
        Err(_) => false,
    };
    if unchanged {
        info_time!("Snapshot unchanged, keeping {}", SNAPSHOT_KEY);
        return Ok(false);
    }

    let payload = json!({
        "generated_at_utc": Utc::now().to_rfc3339(),
        "source": SOURCE_NAME,
        "url": config.source_url,
        "series": series,
    });
    store
        .write_blob(SNAPSHOT_KEY, &serde_json::to_vec_pretty(&payload)?)
        .await?;
    Ok(true)
}
