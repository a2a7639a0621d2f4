mod common;

use std::sync::Arc;

use common::{ScriptedFetcher, DETAIL_URL, RESULTS_URL, SOURCE_URL};
use lidom_scrape::config::Config;
use lidom_scrape::process::{run_pipeline, SNAPSHOT_KEY};
use lidom_scrape::record::{CanonicalRecord, Status};
use lidom_scrape::store::{DurableStore, MemoryStore};
use lidom_scrape::Error;
use serde_json::json;

const LEAGUE_PAGE: &str = r#"<html><body><script>
    $(function () {
        ko.applyBindings(new ViewModel([{
            "league": {"id": 1, "name": "LIDOM"},
            "standings": [{"team": "Licey", "w": 10, "l": 5}],
            "todayGames": [
                {"id": 101, "status": 2, "currentInningNum": 6,
                 "homeTeam": {"id": 7, "name": "Tigres del Licey", "runs": 2},
                 "awayTeam": {"id": 4, "name": "Águilas Cibaeñas", "runs": 1}}
            ],
            "nearestGames": [
                {"id": 101, "status": 1, "roundText": "Serie Regular",
                 "homeTeam": {"id": 7}, "awayTeam": {"id": 4}}
            ],
            "previousGames": [
                {"id": 100, "status": 6, "homeTeam": {"id": 9}, "awayTeam": {"id": 2}},
                {"date": "2024-11-01", "homeTeam": {"id": 5, "name": "Gigantes"},
                 "awayTeam": {"id": 6, "name": "Estrellas"}}
            ],
            "previousRoundGames": []
        }], "es-DO"));
    });
</script></body></html>"#;

const RESULTS_PAGE: &str = r#"<table>
    <tr><td>02/11/2024</td>
        <td><a href="/equipo/4">Águilas Cibaeñas</a></td><td>3</td>
        <td><a href="/equipo/7">Tigres del Licey</a></td><td>5</td>
        <td><a href="/juego/300">Final</a></td></tr>
</table>"#;

fn config(extra: &[(&str, &str)]) -> Config {
    let mut vars = vec![
        ("LIDOM_SOURCE_URL", SOURCE_URL),
        ("LIDOM_DETAIL_URL", DETAIL_URL),
        ("LIDOM_DELAY_MS", "0"),
    ];
    vars.extend_from_slice(extra);
    Config::from_lookup(|key| {
        vars.iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.to_string())
    })
    .unwrap()
}

async fn stored(store: &MemoryStore, key: &str) -> CanonicalRecord {
    serde_json::from_slice(&store.read_blob(key).await.unwrap()).unwrap()
}

#[tokio::test]
async fn league_page_drives_batch_and_export() {
    let fetcher = Arc::new(ScriptedFetcher::new().page(SOURCE_URL, LEAGUE_PAGE));
    let store = Arc::new(MemoryStore::new());
    let config = config(&[("LIDOM_FORCE_IDS", "250")]);

    let report = run_pipeline(&config, fetcher.clone(), store.clone())
        .await
        .unwrap();
    assert_eq!(report.snapshot_records, 3);
    assert!(report.snapshot_written);

    let run = report.run.unwrap();
    assert_eq!(run.succeeded, vec![100, 101, 250]);
    assert_eq!(report.export.manifest.total_records, 4);

    // Live outranks final, so the snapshot is the base and the detail page fills gaps.
    let live = stored(&store, "games/101.json").await;
    assert_eq!(live.status, Some(Status::Live));
    assert_eq!(live.current_inning, Some(6));
    assert_eq!(live.round_text.as_deref(), Some("Serie Regular"));
    assert_eq!(live.home.runs, Some(2));
    assert_eq!(live.home.hits, Some(9));
    assert_eq!(live.innings.len(), 1);

    let idless = stored(&store, "games/2024-11-01_5_6.json").await;
    assert_eq!(idless.home.name.as_deref(), Some("Gigantes"));

    let snapshot: serde_json::Value =
        serde_json::from_slice(&store.read_blob(SNAPSHOT_KEY).await.unwrap()).unwrap();
    assert_eq!(snapshot["url"], SOURCE_URL);
    assert_eq!(snapshot["series"]["league"]["name"], "LIDOM");
}

#[tokio::test]
async fn unchanged_snapshot_is_not_rewritten_and_done_games_are_skipped() {
    let fetcher = Arc::new(ScriptedFetcher::new().page(SOURCE_URL, LEAGUE_PAGE));
    let store = Arc::new(MemoryStore::new());
    let config = config(&[]);

    run_pipeline(&config, fetcher.clone(), store.clone())
        .await
        .unwrap();
    let again = run_pipeline(&config, fetcher.clone(), store.clone())
        .await
        .unwrap();

    assert!(!again.snapshot_written);
    assert_eq!(again.run.unwrap().summary.attempted, 0);
    assert_eq!(fetcher.fetched_ids().len(), 2);
}

#[tokio::test]
async fn results_table_stands_in_for_a_broken_league_page() {
    let fetcher = Arc::new(
        ScriptedFetcher::new()
            .page(SOURCE_URL, "<html><body>sin datos</body></html>")
            .page(RESULTS_URL, RESULTS_PAGE),
    );
    let store = Arc::new(MemoryStore::new());
    let config = config(&[("LIDOM_RESULTS_URL", RESULTS_URL)]);

    let report = run_pipeline(&config, fetcher.clone(), store.clone())
        .await
        .unwrap();
    assert!(!report.snapshot_written);
    assert_eq!(report.run.unwrap().succeeded, vec![300]);
    assert!(store.read_blob(SNAPSHOT_KEY).await.is_err());

    let game = stored(&store, "games/300.json").await;
    assert_eq!(game.away.runs, Some(3));
    assert_eq!(game.home.runs, Some(5));
}

#[tokio::test]
async fn stored_snapshot_stands_in_when_every_page_is_broken() {
    let fetcher = Arc::new(ScriptedFetcher::new().page(SOURCE_URL, "<html>mantenimiento</html>"));
    let store = Arc::new(MemoryStore::new());
    let previous = serde_json::to_vec_pretty(&json!({
        "source": "pelotainvernal",
        "url": SOURCE_URL,
        "series": {
            "league": {"name": "LIDOM"},
            "todayGames": [
                {"id": 101, "status": 2, "homeTeam": {"id": 7}, "awayTeam": {"id": 4}}
            ],
            "previousGames": [
                {"id": 100, "status": 6, "homeTeam": {"id": 9}, "awayTeam": {"id": 2}}
            ]
        }
    }))
    .unwrap();
    store.write_blob(SNAPSHOT_KEY, &previous).await.unwrap();
    // The results page is not served, so that fallback fails too.
    let config = config(&[("LIDOM_RESULTS_URL", RESULTS_URL)]);

    let report = run_pipeline(&config, fetcher.clone(), store.clone())
        .await
        .unwrap();
    assert_eq!(report.snapshot_records, 2);
    assert!(!report.snapshot_written);
    assert_eq!(report.run.unwrap().succeeded, vec![100, 101]);
    assert!(fetcher.fetched().iter().any(|url| url == RESULTS_URL));
    assert_eq!(store.read_blob(SNAPSHOT_KEY).await.unwrap(), previous);
}

#[tokio::test]
async fn forced_ids_alone_drive_a_run_without_any_snapshot() {
    let fetcher = Arc::new(ScriptedFetcher::new().page(SOURCE_URL, "<html></html>"));
    let store = Arc::new(MemoryStore::new());
    let config = config(&[("LIDOM_FORCE_IDS", "42")]);

    let report = run_pipeline(&config, fetcher, store.clone()).await.unwrap();
    assert_eq!(report.snapshot_records, 0);
    assert_eq!(report.run.unwrap().succeeded, vec![42]);
    assert_eq!(stored(&store, "games/42.json").await.id, Some(42));
}

#[tokio::test]
async fn broken_league_page_without_any_fallback_is_an_empty_universe() {
    let fetcher = Arc::new(ScriptedFetcher::new().page(SOURCE_URL, "<html></html>"));
    let store = Arc::new(MemoryStore::new());

    let err = run_pipeline(&config(&[]), fetcher, store).await.unwrap_err();
    assert!(matches!(err, Error::EmptyUniverse));
}

#[tokio::test]
async fn game_with_one_known_team_is_persisted_under_a_composite_key() {
    let page = r#"<script>new ViewModel([{
        "todayGames": [
            {"date": "2024-11-01", "homeTeam": {"id": 5, "name": "Gigantes"},
             "awayTeam": {"name": "Por definir"}},
            {"homeTeam": {"name": "Sin id"}, "awayTeam": {}}
        ]
    }])</script>"#;
    let fetcher = Arc::new(ScriptedFetcher::new().page(SOURCE_URL, page));
    let store = Arc::new(MemoryStore::new());

    let report = run_pipeline(&config(&[]), fetcher, store.clone())
        .await
        .unwrap();
    assert_eq!(report.snapshot_records, 1);
    assert!(report.run.is_none());
    assert_eq!(report.export.manifest.total_records, 1);

    let game = stored(&store, "games/2024-11-01_5_?.json").await;
    assert_eq!(game.home.name.as_deref(), Some("Gigantes"));
    assert_eq!(game.away.name.as_deref(), Some("Por definir"));
}

#[tokio::test]
async fn league_page_without_games_is_an_empty_universe() {
    let page = r#"<script>new ViewModel([{"league": {}, "todayGames": []}])</script>"#;
    let fetcher = Arc::new(ScriptedFetcher::new().page(SOURCE_URL, page));
    let store = Arc::new(MemoryStore::new());

    let err = run_pipeline(&config(&[]), fetcher, store).await.unwrap_err();
    assert!(matches!(err, Error::EmptyUniverse));
}
