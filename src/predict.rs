//! Multi-database back-off prediction
//!
//! Each variable occurrence is looked up in the databases from largest
//! n-gram size to smallest; the first hit claims the position. Votes from
//! all of a variable's positions are then aggregated, remapping each
//! candidate's within-position ratio into [0.5, 1.0] so a confident single
//! label outweighs a diffuse candidate list but any match still counts.

use crate::corpus::{Entry, Position};
use crate::db::NgramDb;
use crate::vocab::Vocab;
use rustc_hash::FxHashMap;

/// Predict the best label for every variable in `entry`.
///
/// `dbs` must be ordered from largest n-gram size to smallest; a position
/// claimed by a larger size is never revisited. Variables whose positions
/// all miss map to `None`. Ties break by aggregate score, then global
/// vocabulary count, then lexicographically smaller label.
pub fn predict(
    entry: &Entry,
    vocab: &Vocab,
    dbs: &[NgramDb],
    flanking: bool,
) -> FxHashMap<String, Option<String>> {
    let mut locs: FxHashMap<&str, Vec<Position>> = FxHashMap::default();
    // None until some database claims the position; a claimed position
    // keeps its surviving candidates, possibly none.
    let mut hits: FxHashMap<Position, Option<Vec<(&str, u32)>>> = FxHashMap::default();

    // Size-1 enumeration is used purely as a position iterator.
    for occ in entry.iter_ngrams(1, flanking) {
        locs.entry(occ.name).or_default().push(occ.position);
        hits.insert(occ.position, None);
    }

    for db in dbs {
        for occ in entry.iter_ngrams(db.size() as usize, flanking) {
            let slot = match hits.get_mut(&occ.position) {
                Some(slot) if slot.is_none() => slot,
                _ => continue,
            };
            let Some((_total, pairs)) = db.lookup(&occ.digest) else {
                continue;
            };
            let candidates: Vec<(&str, u32)> = pairs
                .into_iter()
                .filter(|&(_, count)| count > 0)
                .filter_map(|(id, count)| vocab.reverse(id).map(|label| (label, count)))
                .collect();
            // The position is claimed even when candidates is empty, so a
            // larger-size match blocks smaller sizes.
            *slot = Some(candidates);
        }
    }

    let mut out = FxHashMap::default();
    for (name, positions) in locs {
        let mut agg: FxHashMap<&str, f64> = FxHashMap::default();
        for position in &positions {
            let Some(Some(candidates)) = hits.get(position) else {
                continue;
            };
            let entry_total: u32 = candidates.iter().map(|&(_, count)| count).sum();
            for &(label, count) in candidates {
                let score = (count as f64 / entry_total as f64) * 0.5 + 0.5;
                *agg.entry(label).or_insert(0.0) += score;
            }
        }
        out.insert(name.to_string(), pick_winner(&agg, vocab));
    }
    out
}

fn pick_winner(agg: &FxHashMap<&str, f64>, vocab: &Vocab) -> Option<String> {
    let mut best: Option<(&str, f64)> = None;
    for (&label, &score) in agg {
        let Some((best_label, best_score)) = best else {
            best = Some((label, score));
            continue;
        };
        if score > best_score {
            best = Some((label, score));
        } else if score == best_score {
            let count = vocab.lookup(label).map_or(0, |id| vocab.count_by_id(id));
            let best_count = vocab
                .lookup(best_label)
                .map_or(0, |id| vocab.count_by_id(id));
            if count > best_count || (count == best_count && label < best_label) {
                best = Some((label, score));
            }
        }
    }
    best.map(|(label, _)| label.to_string())
}

/// Diagnostic variant: every position's candidate list from every
/// database, without back-off or aggregation.
pub fn predict_detailed<'e, 'v>(
    entry: &'e Entry,
    vocab: &'v Vocab,
    dbs: &[NgramDb],
    flanking: bool,
) -> (
    FxHashMap<Position, FxHashMap<u32, Vec<(&'v str, u32)>>>,
    FxHashMap<&'e str, Vec<Position>>,
) {
    let mut locs: FxHashMap<&str, Vec<Position>> = FxHashMap::default();
    let mut details: FxHashMap<Position, FxHashMap<u32, Vec<(&str, u32)>>> = FxHashMap::default();

    for occ in entry.iter_ngrams(1, flanking) {
        locs.entry(occ.name).or_default().push(occ.position);
        details.insert(occ.position, FxHashMap::default());
    }

    for db in dbs {
        for occ in entry.iter_ngrams(db.size() as usize, flanking) {
            let candidates = match db.lookup(&occ.digest) {
                None => Vec::new(),
                Some((_total, pairs)) => pairs
                    .into_iter()
                    .filter(|&(_, count)| count > 0)
                    .filter_map(|(id, count)| vocab.reverse(id).map(|label| (label, count)))
                    .collect(),
            };
            if let Some(per_size) = details.get_mut(&occ.position) {
                per_size.insert(db.size(), candidates);
            }
        }
    }

    (details, locs)
}
