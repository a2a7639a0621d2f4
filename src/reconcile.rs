use std::cmp::Reverse;
use std::collections::BTreeMap;

use crate::record::{CanonicalRecord, IdentityKey, Participant, PitcherInfo, Status};

/// Weight of one status tier. Must stay above the total of all bonuses so the
/// status always decides which observation is richer.
const TIER: i64 = 8;
const BONUS_COUNT: i64 = 7;
const _: () = assert!(BONUS_COUNT < TIER);

fn status_tier(status: Option<Status>) -> i64 {
    match status {
        Some(Status::Live) => 5,
        Some(Status::Final) => 4,
        Some(Status::Delayed | Status::Suspended | Status::Postponed) => 3,
        Some(Status::Preview) => 2,
        Some(Status::NotStarted) => 1,
        None => 0,
    }
}

/// How complete and authoritative one observation is.
pub fn richness(record: &CanonicalRecord) -> i64 {
    let both = |f: fn(&Participant) -> Option<u32>| {
        f(&record.home).is_some() && f(&record.away).is_some()
    };
    let bonuses = [
        both(|p| p.runs),
        both(|p| p.hits),
        both(|p| p.errors),
        !record.innings.is_empty(),
        !is_blank(&record.last_play),
        !is_blank(&record.round_text),
        record.current_inning.is_some(),
    ];
    status_tier(record.status) * TIER + bonuses.iter().filter(|b| **b).count() as i64
}

/// Merges two observations of the same game.
///
/// The richer one (`a` on ties) is the base; its empty fields are backfilled from
/// the other, populated ones are never overwritten.
pub fn merge(a: &CanonicalRecord, b: &CanonicalRecord) -> CanonicalRecord {
    let (mut base, other) = if richness(b) > richness(a) {
        (b.clone(), a)
    } else {
        (a.clone(), b)
    };

    fill(&mut base.id, &other.id);
    fill(&mut base.status, &other.status);
    fill(&mut base.date, &other.date);
    fill_text(&mut base.round_text, &other.round_text);
    fill(&mut base.current_inning, &other.current_inning);
    fill_text(&mut base.last_play, &other.last_play);
    fill_participant(&mut base.home, &other.home);
    fill_participant(&mut base.away, &other.away);
    fill_list(&mut base.innings, &other.innings);
    fill_list(&mut base.plays, &other.plays);
    fill_list(&mut base.lines, &other.lines);

    base
}

/// Folds a group of observations of one game into a single record.
///
/// Members are ordered by richness, then by content, so the result does not depend
/// on the order they arrived in.
pub fn merge_all(mut group: Vec<CanonicalRecord>) -> Option<CanonicalRecord> {
    group.sort_by_cached_key(|r| {
        (
            Reverse(richness(r)),
            serde_json::to_string(r).unwrap_or_default(),
        )
    });
    let mut iter = group.into_iter();
    let first = iter.next()?;
    Some(iter.fold(first, |acc, next| merge(&acc, &next)))
}

/// One record per distinct identity key, ordered by key.
pub fn dedupe(records: Vec<CanonicalRecord>) -> Vec<CanonicalRecord> {
    let mut groups: BTreeMap<IdentityKey, Vec<CanonicalRecord>> = BTreeMap::new();
    for record in records {
        groups.entry(record.identity_key()).or_default().push(record);
    }
    groups.into_values().filter_map(merge_all).collect()
}

fn is_blank(text: &Option<String>) -> bool {
    text.as_deref().map_or(true, |t| t.trim().is_empty())
}

fn fill<T: Clone>(slot: &mut Option<T>, other: &Option<T>) {
    if slot.is_none() {
        slot.clone_from(other);
    }
}

fn fill_text(slot: &mut Option<String>, other: &Option<String>) {
    if is_blank(slot) && !is_blank(other) {
        slot.clone_from(other);
    }
}

fn fill_list<T: Clone>(slot: &mut Vec<T>, other: &[T]) {
    if slot.is_empty() {
        *slot = other.to_vec();
    }
}

fn fill_participant(base: &mut Participant, other: &Participant) {
    fill(&mut base.id, &other.id);
    fill_text(&mut base.name, &other.name);
    fill_text(&mut base.abbreviation, &other.abbreviation);
    fill(&mut base.runs, &other.runs);
    fill(&mut base.hits, &other.hits);
    fill(&mut base.errors, &other.errors);
    if let (Some(mine), Some(theirs)) = (&mut base.pitcher, &other.pitcher) {
        fill_pitcher(mine, theirs);
    } else if base.pitcher.is_none() {
        base.pitcher.clone_from(&other.pitcher);
    }
}

fn fill_pitcher(base: &mut PitcherInfo, other: &PitcherInfo) {
    fill(&mut base.id, &other.id);
    fill_text(&mut base.name, &other.name);
    fill(&mut base.wins, &other.wins);
    fill(&mut base.losses, &other.losses);
    fill(&mut base.era, &other.era);
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use proptest::prelude::*;

    use super::*;
    use crate::record::{InningScore, Play};

    fn game(id: u64, status: Option<Status>) -> CanonicalRecord {
        CanonicalRecord {
            id: Some(id),
            status,
            ..Default::default()
        }
    }

    #[test]
    fn live_observation_backfilled_from_scheduled_one() {
        let mut a = game(1, Some(Status::Live));
        a.home.runs = Some(3);
        let mut b = game(1, Some(Status::NotStarted));
        b.round_text = Some("Final".into());

        let merged = merge(&a, &b);
        assert_eq!(merged.status, Some(Status::Live));
        assert_eq!(merged.home.runs, Some(3));
        assert_eq!(merged.round_text.as_deref(), Some("Final"));
        assert_eq!(merge(&b, &a), merged);
    }

    #[test]
    fn status_outweighs_every_bonus() {
        let mut full_final = game(1, Some(Status::Final));
        for side in [&mut full_final.home, &mut full_final.away] {
            side.runs = Some(1);
            side.hits = Some(1);
            side.errors = Some(1);
        }
        full_final.innings = vec![InningScore::default()];
        full_final.last_play = Some("out".into());
        full_final.round_text = Some("Serie Final".into());
        full_final.current_inning = Some(9);
        assert_eq!(richness(&full_final), 4 * TIER + BONUS_COUNT);

        let bare_live = game(1, Some(Status::Live));
        assert!(richness(&bare_live) > richness(&full_final));
        let tiers = [
            Some(Status::Live),
            Some(Status::Final),
            Some(Status::Suspended),
            Some(Status::Preview),
            Some(Status::NotStarted),
            None,
        ];
        for pair in tiers.windows(2) {
            assert!(richness(&game(1, pair[0])) > richness(&game(1, pair[1])));
        }
    }

    #[test]
    fn one_sided_scores_earn_no_bonus() {
        let mut rec = game(1, None);
        rec.home.runs = Some(2);
        assert_eq!(richness(&rec), 0);
        rec.away.runs = Some(0);
        assert_eq!(richness(&rec), 1);
    }

    #[test]
    fn tie_keeps_first_operand_values() {
        let mut a = game(1, Some(Status::Final));
        a.home.runs = Some(4);
        let mut b = game(1, Some(Status::Final));
        b.home.runs = Some(5);
        assert_eq!(merge(&a, &b).home.runs, Some(4));
        assert_eq!(merge(&b, &a).home.runs, Some(5));
    }

    #[test]
    fn blank_text_is_backfilled() {
        let mut a = game(1, Some(Status::Live));
        a.last_play = Some("  ".into());
        let mut b = game(1, None);
        b.last_play = Some("Doble".into());
        assert_eq!(merge(&a, &b).last_play.as_deref(), Some("Doble"));
    }

    #[test]
    fn nested_pitcher_and_lists_backfill() {
        let mut a = game(1, Some(Status::Live));
        a.home.pitcher = Some(PitcherInfo {
            name: Some("Ramírez".into()),
            ..Default::default()
        });
        a.plays = vec![Play {
            inning: Some(1),
            text: "Ponche".into(),
        }];
        let mut b = game(1, Some(Status::Preview));
        b.home.pitcher = Some(PitcherInfo {
            name: Some("Otro".into()),
            era: Some(3.1),
            ..Default::default()
        });
        b.away.pitcher = Some(PitcherInfo {
            id: Some(9),
            ..Default::default()
        });
        b.plays = vec![Play::default(), Play::default()];
        b.innings = vec![InningScore {
            number: 1,
            away: Some(0),
            home: Some(1),
        }];

        let merged = merge(&a, &b);
        let home_pitcher = merged.home.pitcher.as_ref().unwrap();
        assert_eq!(home_pitcher.name.as_deref(), Some("Ramírez"));
        assert_eq!(home_pitcher.era, Some(3.1));
        assert_eq!(merged.away.pitcher.as_ref().unwrap().id, Some(9));
        assert_eq!(merged.plays.len(), 1);
        assert_eq!(merged.innings.len(), 1);
    }

    fn observations() -> Vec<CanonicalRecord> {
        let mut live = game(7, Some(Status::Live));
        live.home.runs = Some(2);
        live.away.runs = Some(1);
        live.current_inning = Some(5);

        let mut preview = game(7, Some(Status::Preview));
        preview.date = NaiveDate::from_ymd_opt(2024, 12, 1).and_then(|d| d.and_hms_opt(19, 0, 0));
        preview.home.name = Some("Leones del Escogido".into());
        preview.home.runs = Some(0);

        let mut detail = game(7, None);
        detail.innings = vec![InningScore {
            number: 1,
            away: Some(1),
            home: Some(2),
        }];
        detail.away.name = Some("Gigantes del Cibao".into());
        detail.round_text = Some("Serie Regular".into());

        let mut scheduled = game(7, Some(Status::NotStarted));
        scheduled.round_text = Some("Jornada 12".into());
        scheduled.away.abbreviation = Some("GIG".into());

        vec![live, preview, detail, scheduled]
    }

    const STATUSES: [Status; 7] = [
        Status::NotStarted,
        Status::Live,
        Status::Preview,
        Status::Delayed,
        Status::Suspended,
        Status::Final,
        Status::Postponed,
    ];

    fn side() -> impl Strategy<Value = Participant> {
        (
            prop::option::of(1u64..4),
            prop::option::of(prop::sample::select(vec!["Licey", "Escogido", "Toros"])),
            prop::option::of(0u32..12),
            prop::option::of(0u32..15),
        )
            .prop_map(|(id, name, runs, hits)| Participant {
                id,
                name: name.map(str::to_string),
                runs,
                hits,
                ..Default::default()
            })
    }

    /// Observations spread over a handful of games, some of them id-less.
    fn observation() -> impl Strategy<Value = CanonicalRecord> {
        (
            prop::option::of(1u64..5),
            prop::option::of(prop::sample::select(STATUSES.to_vec())),
            prop::option::of(1u32..10),
            prop::option::of("(Serie Regular|Jornada [0-9])"),
            side(),
            side(),
            0usize..3,
        )
            .prop_map(|(id, status, current_inning, round_text, home, away, innings)| {
                CanonicalRecord {
                    id,
                    status,
                    current_inning,
                    round_text,
                    home,
                    away,
                    innings: (1..=innings as u32)
                        .map(|number| InningScore {
                            number,
                            away: Some(0),
                            home: Some(number),
                        })
                        .collect(),
                    ..Default::default()
                }
            })
    }

    /// A vector alongside a shuffled copy of itself.
    fn shuffled<T: Clone + std::fmt::Debug>(
        items: impl Strategy<Value = Vec<T>>,
    ) -> impl Strategy<Value = (Vec<T>, Vec<T>)> {
        items.prop_flat_map(|v| (Just(v.clone()), Just(v).prop_shuffle()))
    }

    #[test]
    fn merge_all_keeps_the_richest_base() {
        let merged = merge_all(observations()).unwrap();
        assert_eq!(merged.status, Some(Status::Live));
        assert_eq!(merged.home.runs, Some(2));
        assert_eq!(merged.home.name.as_deref(), Some("Leones del Escogido"));
        assert!(merged.date.is_some());
        assert_eq!(merged.innings.len(), 1);
    }

    proptest! {
        #[test]
        fn merge_all_is_order_independent((seen, reordered) in shuffled(Just(observations()))) {
            prop_assert_eq!(merge_all(reordered), merge_all(seen));
        }

        #[test]
        fn merge_all_ignores_arrival_order_of_arbitrary_observations(
            (seen, reordered) in shuffled(prop::collection::vec(observation(), 0..10)),
        ) {
            let same_game = |v: Vec<CanonicalRecord>| {
                v.into_iter()
                    .map(|mut r| {
                        r.id = Some(1);
                        r
                    })
                    .collect::<Vec<_>>()
            };
            prop_assert_eq!(merge_all(same_game(reordered)), merge_all(same_game(seen)));
        }

        #[test]
        fn dedupe_ignores_arrival_order(
            (seen, reordered) in shuffled(prop::collection::vec(observation(), 0..16)),
        ) {
            let keys: std::collections::BTreeSet<_> =
                seen.iter().map(|r| r.identity_key()).collect();
            let once = dedupe(seen);
            prop_assert_eq!(once.len(), keys.len());
            prop_assert_eq!(&dedupe(reordered), &once);
            prop_assert_eq!(dedupe(once.clone()), once);
        }

        #[test]
        fn pairwise_fold_agrees_when_fields_do_not_conflict(
            (_, order) in shuffled(Just(vec![0usize, 1, 2])),
        ) {
            let mut live = game(3, Some(Status::Live));
            live.home.runs = Some(1);
            let mut fin = game(3, Some(Status::Final));
            fin.away.hits = Some(6);
            let mut pre = game(3, Some(Status::Preview));
            pre.last_play = Some("Elevado".into());
            let obs = [live, fin, pre];

            let expected = obs[1..].iter().fold(obs[0].clone(), |acc, r| merge(&acc, r));
            let folded = order[1..]
                .iter()
                .fold(obs[order[0]].clone(), |acc, &i| merge(&acc, &obs[i]));
            prop_assert_eq!(folded, expected);
            // associativity on one grouping
            let left = merge(&merge(&obs[0], &obs[1]), &obs[2]);
            let right = merge(&obs[0], &merge(&obs[1], &obs[2]));
            prop_assert_eq!(left, right);
        }
    }

    #[test]
    fn dedupe_cardinality_and_idempotence() {
        let day = NaiveDate::from_ymd_opt(2024, 11, 20).and_then(|d| d.and_hms_opt(20, 0, 0));
        let mut no_id_a = CanonicalRecord {
            date: day,
            ..Default::default()
        };
        no_id_a.home.id = Some(1);
        no_id_a.away.id = Some(2);
        let mut no_id_b = no_id_a.clone();
        no_id_b.status = Some(Status::Final);
        let mut other_pair = no_id_a.clone();
        other_pair.away.id = None;

        let mut records = observations();
        records.extend([game(8, None), no_id_a, no_id_b, other_pair]);

        let distinct: std::collections::BTreeSet<_> =
            records.iter().map(|r| r.identity_key()).collect();
        let once = dedupe(records.clone());
        assert_eq!(once.len(), distinct.len());
        assert_eq!(once.len(), 4);
        assert_eq!(dedupe(once.clone()), once);

        records.reverse();
        assert_eq!(dedupe(records), once);
    }
}
