#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use lidom_scrape::request::Fetcher;
use lidom_scrape::{Error, Result};

pub const SOURCE_URL: &str = "https://test.local/liga";
pub const RESULTS_URL: &str = "https://test.local/resultados";
pub const DETAIL_PREFIX: &str = "https://test.local/juego/";
pub const DETAIL_URL: &str = "https://test.local/juego/{id}";
pub const MARKER: &str = "new ViewModel(";

/// Serves fixed pages, plus a generated detail page for every `juego/<id>` URL.
#[derive(Default)]
pub struct ScriptedFetcher {
    pages: HashMap<String, String>,
    failing: Mutex<HashSet<String>>,
    log: Mutex<Vec<String>>,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, url: &str, body: impl Into<String>) -> Self {
        self.pages.insert(url.to_string(), body.into());
        self
    }

    pub fn fail(&self, url: &str) {
        self.failing.lock().unwrap().insert(url.to_string());
    }

    pub fn heal(&self) {
        self.failing.lock().unwrap().clear();
    }

    pub fn fetched(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    /// Ids of the detail pages fetched so far, in fetch order.
    pub fn fetched_ids(&self) -> Vec<u64> {
        self.fetched()
            .iter()
            .filter_map(|url| url.strip_prefix(DETAIL_PREFIX)?.parse().ok())
            .collect()
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, url: &str) -> Result<String> {
        self.log.lock().unwrap().push(url.to_string());
        if self.failing.lock().unwrap().contains(url) {
            return Err(transport(url, 503));
        }
        if let Some(page) = self.pages.get(url) {
            return Ok(page.clone());
        }
        match url.strip_prefix(DETAIL_PREFIX).and_then(|id| id.parse::<u64>().ok()) {
            Some(id) => Ok(detail_page(id)),
            None => Err(transport(url, 404)),
        }
    }
}

fn transport(url: &str, status: u16) -> Error {
    Error::Transport {
        url: url.to_string(),
        status: Some(status),
        reason: "scripted".into(),
    }
}

pub fn detail_page(id: u64) -> String {
    format!(
        r#"<html><head><script>
        var vm = new ViewModel({{
            "id": {id},
            "status": 6,
            "date": "2024-11-02T19:30:00",
            "homeTeam": {{"id": 7, "name": "Tigres del Licey", "runs": 5, "hits": 9, "errors": 0}},
            "awayTeam": {{"id": 4, "name": "Águilas Cibaeñas", "runs": 3, "hits": 7, "errors": 1}},
            "innings": [{{"number": 1, "away": 0, "home": 2}}],
            "playByPlay": ["Jonrón de Pérez"]
        }}, {{"culture": "es-DO"}});
        </script></head><body></body></html>"#
    )
}
