use std::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Game state as published by the source. `None` on a record means unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Status {
    NotStarted,
    Live,
    Preview,
    Delayed,
    Suspended,
    Final,
    Postponed,
}

impl Status {
    /// The source's numeric status codes.
    pub fn from_code(code: i64) -> Option<Self> {
        Some(match code {
            1 => Status::NotStarted,
            2 => Status::Live,
            3 => Status::Preview,
            4 => Status::Delayed,
            5 => Status::Suspended,
            6 => Status::Final,
            7 => Status::Postponed,
            _ => return None,
        })
    }

    pub fn from_label(label: &str) -> Option<Self> {
        let label = label.trim().to_lowercase().replace(['_', ' '], "-");
        Some(match label.as_str() {
            "not-started" | "notstarted" | "scheduled" | "programado" | "pendiente" => {
                Status::NotStarted
            }
            "live" | "in-progress" | "en-vivo" | "envivo" | "en-juego" => Status::Live,
            "preview" | "previa" => Status::Preview,
            "delayed" | "retrasado" | "demorado" => Status::Delayed,
            "suspended" | "suspendido" => Status::Suspended,
            "final" | "finalizado" | "terminado" => Status::Final,
            "postponed" | "pospuesto" | "aplazado" => Status::Postponed,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PitcherInfo {
    pub id: Option<u64>,
    pub name: Option<String>,
    pub wins: Option<u32>,
    pub losses: Option<u32>,
    pub era: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub id: Option<u64>,
    pub name: Option<String>,
    pub abbreviation: Option<String>,
    pub runs: Option<u32>,
    pub hits: Option<u32>,
    pub errors: Option<u32>,
    pub pitcher: Option<PitcherInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InningScore {
    pub number: u32,
    pub away: Option<u32>,
    pub home: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Play {
    pub inning: Option<u32>,
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BettingLine {
    pub provider: Option<String>,
    pub spread: Option<f64>,
    pub total: Option<f64>,
    pub moneyline_home: Option<i64>,
    pub moneyline_away: Option<i64>,
}

/// One game, reconciled across sources.
///
/// `innings`, `plays` and `lines` are only populated from a detail page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub id: Option<u64>,
    pub status: Option<Status>,
    pub date: Option<NaiveDateTime>,
    pub round_text: Option<String>,
    pub current_inning: Option<u32>,
    pub last_play: Option<String>,
    pub home: Participant,
    pub away: Participant,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub innings: Vec<InningScore>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub plays: Vec<Play>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub lines: Vec<BettingLine>,
}

impl CanonicalRecord {
    pub fn identity_key(&self) -> IdentityKey {
        match self.id {
            Some(id) if id != 0 => IdentityKey::Id(id),
            _ => IdentityKey::Composite {
                day: self
                    .date
                    .map(|d| d.date().format("%Y-%m-%d").to_string())
                    .unwrap_or_else(|| MISSING.to_string()),
                home: side_id(&self.home),
                away: side_id(&self.away),
            },
        }
    }

    /// `"Away @ Home"`, falling back to abbreviations and then `?`.
    pub fn display_name(&self) -> String {
        fn label(p: &Participant) -> &str {
            p.name
                .as_deref()
                .or(p.abbreviation.as_deref())
                .unwrap_or(MISSING)
        }
        format!("{} @ {}", label(&self.away), label(&self.home))
    }
}

const MISSING: &str = "?";

fn side_id(p: &Participant) -> String {
    p.id.filter(|id| *id != 0)
        .map(|id| id.to_string())
        .unwrap_or_else(|| MISSING.to_string())
}

/// Stable key recognizing observations of the same game.
///
/// Orders primary ids numerically, ahead of every composite key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IdentityKey {
    Id(u64),
    Composite {
        day: String,
        home: String,
        away: String,
    },
}

impl IdentityKey {
    pub fn id(&self) -> Option<u64> {
        match self {
            IdentityKey::Id(id) => Some(*id),
            IdentityKey::Composite { .. } => None,
        }
    }
}

// Doubles as the storage key; `FromStr` must stay its inverse.
impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentityKey::Id(id) => write!(f, "{id}"),
            IdentityKey::Composite { day, home, away } => write!(f, "{day}_{home}_{away}"),
        }
    }
}

impl FromStr for IdentityKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(id) = s.parse::<u64>() {
            return Ok(IdentityKey::Id(id));
        }
        let mut parts = s.splitn(3, '_');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(day), Some(home), Some(away)) if !day.is_empty() => Ok(IdentityKey::Composite {
                day: day.to_string(),
                home: home.to_string(),
                away: away.to_string(),
            }),
            _ => Err(format!("not an identity key: {s}")),
        }
    }
}
