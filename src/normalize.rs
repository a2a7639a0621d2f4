//! Maps raw source objects onto [`CanonicalRecord`].
//!
//! Never fails. Each canonical field has an ordered alias list; the first alias
//! holding a usable value wins, anything unusable degrades to `None`, and raw
//! fields missing from the tables are dropped.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::{Map, Value};

use crate::record::{
    BettingLine, CanonicalRecord, InningScore, Participant, PitcherInfo, Play, Status,
};

/// Which page an observation came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceHint {
    /// One of the game lists embedded in the snapshot page.
    Snapshot,
    /// A per-game detail page; the only source of innings, plays and lines.
    Detail,
    /// A row of the results table, see [`crate::layout`].
    ResultsTable,
}

pub(crate) const HOME_ALIASES: &[&str] = &["homeTeam", "home", "local", "equipoLocal"];
pub(crate) const AWAY_ALIASES: &[&str] =
    &["awayTeam", "away", "visitor", "visitante", "equipoVisitante"];

const ID: &[&str] = &["id", "gameId", "idJuego", "juegoId"];
const STATUS: &[&str] = &["status", "statusId", "gameStatus", "estado"];
const DATE: &[&str] = &["date", "gameDate", "startDate", "dateTime", "fecha"];
const ROUND: &[&str] = &["roundText", "round", "ronda", "phase"];
const CURRENT_INNING: &[&str] = &["currentInningNum", "currentInning", "inning"];
const LAST_PLAY: &[&str] = &["lastPlayByPlay", "lastPlay", "ultimaJugada"];
const INNINGS: &[&str] = &["innings", "lineScore", "linescore", "entradas"];
const PLAYS: &[&str] = &["playByPlay", "plays", "jugadas"];
const LINES: &[&str] = &["lines", "odds", "bettingLines", "lineas"];
/// Position-ordered sides produced by the results-table parser.
const POSITIONAL_TEAMS: &[&str] = &["teams"];

const TEAM_ID: &[&str] = &["id", "teamId", "idEquipo"];
const TEAM_NAME: &[&str] = &["name", "teamName", "nombre"];
const TEAM_ABBR: &[&str] = &["abbreviation", "abbr", "shortName", "siglas"];
const RUNS: &[&str] = &["runs", "r", "R", "score", "carreras"];
const HITS: &[&str] = &["hits", "h", "H", "hit"];
const ERRORS: &[&str] = &["errors", "e", "E", "errores"];
const PITCHER: &[&str] = &["pitcher", "probablePitcher", "startingPitcher", "lanzador"];

const PITCHER_ID: &[&str] = &["id", "playerId", "idJugador"];
const PITCHER_NAME: &[&str] = &["name", "fullName", "nombre"];
const WINS: &[&str] = &["wins", "w", "W", "ganados"];
const LOSSES: &[&str] = &["losses", "l", "L", "perdidos"];
const ERA: &[&str] = &["era", "ERA", "efectividad"];

const INNING_NUMBER: &[&str] = &["number", "inning", "num"];
const INNING_AWAY: &[&str] = &["away", "awayRuns", "visitante"];
const INNING_HOME: &[&str] = &["home", "homeRuns", "local"];
const PLAY_TEXT: &[&str] = &["text", "description", "play", "descripcion"];

const LINE_PROVIDER: &[&str] = &["provider", "casino", "source"];
const LINE_SPREAD: &[&str] = &["spread", "runLine", "line"];
const LINE_TOTAL: &[&str] = &["total", "overUnder"];
const LINE_ML_HOME: &[&str] = &["moneylineHome", "homeMoneyline", "mlHome"];
const LINE_ML_AWAY: &[&str] = &["moneylineAway", "awayMoneyline", "mlAway"];

pub fn normalize(raw: &Value, hint: SourceHint) -> CanonicalRecord {
    let Some(obj) = raw.as_object() else {
        return CanonicalRecord::default();
    };

    let mut record = CanonicalRecord {
        id: pick(obj, ID, as_u64),
        status: pick(obj, STATUS, as_status),
        date: pick(obj, DATE, as_datetime),
        round_text: pick(obj, ROUND, as_text),
        current_inning: pick(obj, CURRENT_INNING, as_u32),
        last_play: pick(obj, LAST_PLAY, as_text),
        home: pick(obj, HOME_ALIASES, as_participant).unwrap_or_default(),
        away: pick(obj, AWAY_ALIASES, as_participant).unwrap_or_default(),
        ..Default::default()
    };

    if hint == SourceHint::Detail {
        record.innings = pick(obj, INNINGS, as_innings).unwrap_or_default();
        record.plays = pick(obj, PLAYS, as_plays).unwrap_or_default();
        record.lines = pick(obj, LINES, as_lines).unwrap_or_default();
    }

    if hint == SourceHint::ResultsTable {
        infer_sides_from_position(obj, &mut record);
    }

    record
}

/// Best-effort guess for table rows that link both teams without saying which is
/// which: the first linked team is the visitor, the second the host.
fn infer_sides_from_position(obj: &Map<String, Value>, record: &mut CanonicalRecord) {
    if record.home != Participant::default() || record.away != Participant::default() {
        return;
    }
    let Some(teams) = pick(obj, POSITIONAL_TEAMS, |v| v.as_array().filter(|t| t.len() >= 2))
    else {
        return;
    };
    record.away = as_participant(&teams[0]).unwrap_or_default();
    record.home = as_participant(&teams[1]).unwrap_or_default();
}

fn pick<'a, T>(
    obj: &'a Map<String, Value>,
    aliases: &[&str],
    coerce: impl Fn(&'a Value) -> Option<T>,
) -> Option<T> {
    aliases
        .iter()
        .filter_map(|key| obj.get(*key))
        .find_map(coerce)
}

fn clean_number(s: &str) -> Option<String> {
    let t = s.trim().replace(['\u{a0}', ','], "");
    if t.is_empty() || t == "-" {
        return None;
    }
    Some(t)
}

fn as_f64(v: &Value) -> Option<f64> {
    let f = match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => clean_number(s)?.parse::<f64>().ok(),
        _ => None,
    };
    f.filter(|f| f.is_finite())
}

fn as_i64(v: &Value) -> Option<i64> {
    if let Some(n) = v.as_i64() {
        return Some(n);
    }
    let f = as_f64(v)?;
    (f.fract() == 0.0 && f.abs() < i64::MAX as f64).then_some(f as i64)
}

fn as_u64(v: &Value) -> Option<u64> {
    as_i64(v).and_then(|n| u64::try_from(n).ok())
}

fn as_u32(v: &Value) -> Option<u32> {
    as_i64(v).and_then(|n| u32::try_from(n).ok())
}

fn as_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => {
            let t = s.split_whitespace().collect::<Vec<_>>().join(" ");
            (!t.is_empty()).then_some(t)
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn as_status(v: &Value) -> Option<Status> {
    match v {
        Value::Number(_) => as_i64(v).and_then(Status::from_code),
        Value::String(s) => match s.trim().parse::<i64>() {
            Ok(code) => Status::from_code(code),
            Err(_) => Status::from_label(s),
        },
        _ => None,
    }
}

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y"];

fn as_datetime(v: &Value) -> Option<NaiveDateTime> {
    match v {
        Value::Number(_) => from_epoch(as_i64(v)?),
        Value::String(s) => {
            let s = s.trim();
            // ASP.NET style "/Date(1700000000000)/"
            if let Some(ms) = s
                .strip_prefix("/Date(")
                .and_then(|rest| rest.strip_suffix(")/"))
            {
                let ms = ms.split(['+', '-']).next()?;
                return ms.parse::<i64>().ok().and_then(from_epoch);
            }
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.naive_local());
            }
            DATETIME_FORMATS
                .iter()
                .find_map(|f| NaiveDateTime::parse_from_str(s, f).ok())
                .or_else(|| {
                    DATE_FORMATS
                        .iter()
                        .find_map(|f| NaiveDate::parse_from_str(s, f).ok())
                        .and_then(|d| d.and_hms_opt(0, 0, 0))
                })
        }
        _ => None,
    }
}

/// Seconds or milliseconds since the epoch, told apart by magnitude.
fn from_epoch(n: i64) -> Option<NaiveDateTime> {
    let dt = if n.abs() >= 100_000_000_000 {
        DateTime::from_timestamp_millis(n)
    } else {
        DateTime::from_timestamp(n, 0)
    };
    dt.map(|d| d.naive_utc())
}

fn as_participant(v: &Value) -> Option<Participant> {
    match v {
        Value::Object(obj) => Some(Participant {
            id: pick(obj, TEAM_ID, as_u64),
            name: pick(obj, TEAM_NAME, as_text),
            abbreviation: pick(obj, TEAM_ABBR, as_text),
            runs: pick(obj, RUNS, as_u32),
            hits: pick(obj, HITS, as_u32),
            errors: pick(obj, ERRORS, as_u32),
            pitcher: pick(obj, PITCHER, as_pitcher),
        }),
        Value::String(_) => Some(Participant {
            name: as_text(v),
            ..Default::default()
        }),
        Value::Number(_) => Some(Participant {
            id: as_u64(v),
            ..Default::default()
        }),
        _ => None,
    }
}

fn as_pitcher(v: &Value) -> Option<PitcherInfo> {
    let pitcher = match v {
        Value::Object(obj) => PitcherInfo {
            id: pick(obj, PITCHER_ID, as_u64),
            name: pick(obj, PITCHER_NAME, as_text),
            wins: pick(obj, WINS, as_u32),
            losses: pick(obj, LOSSES, as_u32),
            era: pick(obj, ERA, as_f64),
        },
        Value::String(_) => PitcherInfo {
            name: as_text(v),
            ..Default::default()
        },
        _ => return None,
    };
    (pitcher != PitcherInfo::default()).then_some(pitcher)
}

fn as_innings(v: &Value) -> Option<Vec<InningScore>> {
    let items = v.as_array()?;
    let innings: Vec<InningScore> = items
        .iter()
        .enumerate()
        .filter_map(|(i, item)| {
            let obj = item.as_object()?;
            Some(InningScore {
                number: pick(obj, INNING_NUMBER, as_u32).unwrap_or(i as u32 + 1),
                away: pick(obj, INNING_AWAY, as_u32),
                home: pick(obj, INNING_HOME, as_u32),
            })
        })
        .collect();
    (!innings.is_empty()).then_some(innings)
}

fn as_plays(v: &Value) -> Option<Vec<Play>> {
    let plays: Vec<Play> = v
        .as_array()?
        .iter()
        .filter_map(|item| match item {
            Value::Object(obj) => Some(Play {
                inning: pick(obj, INNING_NUMBER, as_u32),
                text: pick(obj, PLAY_TEXT, as_text)?,
            }),
            _ => Some(Play {
                inning: None,
                text: as_text(item)?,
            }),
        })
        .collect();
    (!plays.is_empty()).then_some(plays)
}

fn as_lines(v: &Value) -> Option<Vec<BettingLine>> {
    let items = match v {
        Value::Array(items) => items.iter().collect::<Vec<_>>(),
        Value::Object(_) => vec![v],
        _ => return None,
    };
    let lines: Vec<BettingLine> = items
        .into_iter()
        .filter_map(|item| {
            let obj = item.as_object()?;
            let line = BettingLine {
                provider: pick(obj, LINE_PROVIDER, as_text),
                spread: pick(obj, LINE_SPREAD, as_f64),
                total: pick(obj, LINE_TOTAL, as_f64),
                moneyline_home: pick(obj, LINE_ML_HOME, as_i64),
                moneyline_away: pick(obj, LINE_ML_AWAY, as_i64),
            };
            (line != BettingLine::default()).then_some(line)
        })
        .collect();
    (!lines.is_empty()).then_some(lines)
}
