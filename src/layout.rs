//! Fallback source: games read off a rendered results table.
//!
//! The table never says which team is home. Teams are emitted under `teams` in the
//! order their links appear in the row and [`crate::normalize`] applies the
//! visitor-first convention to them. This is a guess about the site's markup, not a
//! data contract, so it only runs when the embedded literal is unavailable.

use chrono::NaiveDate;
use reqwest::Url;
use scraper::{ElementRef, Html, Selector};
use serde_json::{json, Map, Value};

use crate::record::Status;
use crate::{Error, Result};

const TEAM_LINK: &str = "equipo";
const GAME_LINK: &str = "juego";

/// Returns one raw observation per table row linking at least two teams.
pub fn parse_results_table(html: &str) -> Result<Vec<Value>> {
    let doc = Html::parse_document(html);

    let row_selector = create_selector("tr")?;
    let cell_selector = create_selector("td, th")?;
    let link_selector = create_selector("a[href]")?;

    let mut rows = Vec::new();
    for row in doc.select(&row_selector) {
        let cells: Vec<ElementRef> = row.select(&cell_selector).collect();
        let texts: Vec<String> = cells.iter().map(cell_text).collect();

        let mut raw = Map::new();
        let mut team_cells = Vec::new();
        for (i, cell) in cells.iter().enumerate() {
            for link in cell.select(&link_selector) {
                let href = link.value().attr("href").unwrap_or_default();
                let lowered = href.to_ascii_lowercase();
                if lowered.contains(TEAM_LINK) {
                    team_cells.push((i, link_id(href)));
                    break;
                }
                if lowered.contains(GAME_LINK) {
                    if let Some(id) = link_id(href) {
                        raw.insert("id".into(), json!(id));
                    }
                }
            }

            let text = &texts[i];
            if Status::from_label(text).is_some() {
                raw.insert("status".into(), json!(text));
            } else if looks_like_date(text) {
                raw.insert("date".into(), json!(text));
            }
        }

        if team_cells.len() < 2 {
            continue;
        }

        let teams: Vec<Value> = team_cells
            .iter()
            .enumerate()
            .map(|(n, (cell_ix, id))| {
                let next_team = team_cells.get(n + 1).map_or(texts.len(), |(ix, _)| *ix);
                let runs = texts[cell_ix + 1..next_team]
                    .iter()
                    .find_map(|t| t.parse::<u32>().ok());
                json!({ "id": id, "name": texts[*cell_ix], "runs": runs })
            })
            .collect();
        raw.insert("teams".into(), Value::Array(teams));
        rows.push(Value::Object(raw));
    }
    Ok(rows)
}

#[inline]
fn create_selector(sel_str: &str) -> Result<Selector> {
    Selector::parse(sel_str).map_err(|_| Error::InvalidSelector(sel_str.into()))
}

fn cell_text(cell: &ElementRef) -> String {
    cell.text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Numeric id from an `id*` query parameter, else from the last numeric path segment.
fn link_id(href: &str) -> Option<u64> {
    let url = Url::parse("http://localhost/").ok()?.join(href).ok()?;
    let from_query = url
        .query_pairs()
        .find(|(k, _)| k.to_ascii_lowercase().starts_with("id"))
        .and_then(|(_, v)| v.parse().ok());
    from_query.or_else(|| url.path_segments()?.rev().find_map(|s| s.parse().ok()))
}

fn looks_like_date(text: &str) -> bool {
    ["%d/%m/%Y", "%Y-%m-%d"]
        .iter()
        .any(|f| NaiveDate::parse_from_str(text, f).is_ok())
}
