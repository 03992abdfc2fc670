//! Parallel database build pipeline
//!
//! Training is a map-reduce over the corpus:
//! - Map (parallel): one producer streams entries from the corpus file
//!   into a bounded channel; worker threads turn each entry into a partial
//!   `digest -> label -> count` histogram.
//! - Reduce (sequential): the consumer merges partial histograms in
//!   arrival order by summing counts, which is order-insensitive.
//! - Pack: top-K truncation per digest, vocabulary mapping, digest sort.
//!
//! Bounded channels give backpressure, so memory peaks at the merged
//! histogram, not the corpus.

use crate::corpus::{Corpus, Entry, LabelKind};
use crate::db::{DbRecord, NgramDb};
use crate::ngram::WindowDigest;
use crate::vocab::{Vocab, NULL_ID};
use anyhow::Result;
use crossbeam_channel::bounded;
use rustc_hash::FxHashMap;
use std::thread;

/// In-flight items per channel; bounds memory while keeping workers fed.
const PIPELINE_BUFFER: usize = 128;

/// Partial histogram produced from a single entry.
pub type EntryHistogram = FxHashMap<WindowDigest, FxHashMap<String, u32>>;

#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub kind: LabelKind,
    pub size: usize,
    pub topk: usize,
    pub flanking: bool,
    pub workers: usize,
}

/// Map phase for one entry: count each human label per window digest.
/// Occurrences with no label entry carry no signal and are skipped.
pub fn process_entry(
    entry: &Entry,
    kind: LabelKind,
    size: usize,
    flanking: bool,
) -> Result<EntryHistogram> {
    let Some(labels) = entry.labels(kind) else {
        anyhow::bail!(
            "record at line {} has no '{}' label map",
            entry.line(),
            kind
        );
    };

    let mut hist = EntryHistogram::default();
    for occ in entry.iter_ngrams(size, flanking) {
        let Some(var_label) = labels.get(occ.name) else {
            continue;
        };
        if !var_label.human {
            continue;
        }
        *hist
            .entry(occ.digest)
            .or_default()
            .entry(var_label.label.clone())
            .or_insert(0) += 1;
    }
    Ok(hist)
}

fn merge_into(merged: &mut EntryHistogram, partial: EntryHistogram) {
    for (digest, labels) in partial {
        let slot = merged.entry(digest).or_default();
        for (label, count) in labels {
            *slot.entry(label).or_insert(0) += count;
        }
    }
}

/// Truncate each digest's histogram to the top K pairs and map labels to
/// vocabulary ids. Pairs order by (count desc, label asc) so builds are
/// deterministic; a pair whose label misses the vocabulary is dropped
/// after claiming its top-K slot. Totals are summed before either step.
fn pack_records(hist: EntryHistogram, vocab: &Vocab, topk: usize) -> Vec<DbRecord> {
    hist.into_iter()
        .map(|(digest, labels)| {
            let total: u64 = labels.values().map(|&c| c as u64).sum();
            let mut pairs: Vec<(String, u32)> = labels.into_iter().collect();
            pairs.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
            pairs.truncate(topk);

            let mut top: Vec<(u32, u32)> = pairs
                .into_iter()
                .filter_map(|(label, count)| vocab.lookup(&label).map(|id| (id, count)))
                .collect();
            top.resize(topk, (NULL_ID, 0));

            DbRecord {
                digest,
                total: u32::try_from(total).unwrap_or(u32::MAX),
                pairs: top,
            }
        })
        .collect()
}

/// Build an n-gram database over the whole corpus. `progress` is invoked
/// with the number of entries merged so far.
pub fn build_ngram_db(
    corpus: &Corpus,
    vocab: &Vocab,
    opts: &BuildOptions,
    progress: Option<&(dyn Fn(usize) + Sync)>,
) -> Result<NgramDb> {
    let workers = opts.workers.max(1);
    let BuildOptions {
        kind,
        size,
        topk,
        flanking,
        ..
    } = *opts;

    let (entry_tx, entry_rx) = bounded::<Entry>(PIPELINE_BUFFER);
    let (hist_tx, hist_rx) = bounded::<Result<EntryHistogram>>(PIPELINE_BUFFER);

    let merged = thread::scope(|scope| -> Result<EntryHistogram> {
        // Producer: stream entries until the corpus or the workers end.
        let producer = scope.spawn(move || -> Result<()> {
            for entry in corpus.entries()? {
                if entry_tx.send(entry?).is_err() {
                    break;
                }
            }
            Ok(())
        });

        for _ in 0..workers {
            let rx = entry_rx.clone();
            let tx = hist_tx.clone();
            scope.spawn(move || {
                for entry in rx {
                    if tx.send(process_entry(&entry, kind, size, flanking)).is_err() {
                        break;
                    }
                }
            });
        }
        // Drop our handles so channel closure propagates through the
        // pipeline once the producer and workers finish.
        drop(entry_rx);
        drop(hist_tx);

        let mut merged = EntryHistogram::default();
        let mut done = 0usize;
        for partial in hist_rx {
            merge_into(&mut merged, partial?);
            done += 1;
            if let Some(cb) = progress {
                cb(done);
            }
        }

        producer
            .join()
            .map_err(|_| anyhow::anyhow!("corpus reader thread panicked"))??;
        Ok(merged)
    })?;

    let records = pack_records(merged, vocab, topk);
    Ok(NgramDb::from_records(size as u32, topk, records))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ngram::ngram_hash;
    use std::io::Write;

    fn opts(size: usize, topk: usize) -> BuildOptions {
        BuildOptions {
            kind: LabelKind::Name,
            size,
            topk,
            flanking: false,
            workers: 2,
        }
    }

    fn write_corpus(lines: &[String]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        for line in lines {
            writeln!(file, "{line}").expect("write");
        }
        file
    }

    fn labeled_fn(tokens: &[&str], var: &str, label: &str) -> String {
        format!(
            r#"{{"tokens":{},"labels":{{"name":{{"{var}":{{"label":"{label}","human":true}}}}}}}}"#,
            serde_json::to_string(tokens).expect("tokens encode"),
        )
    }

    #[test]
    fn test_single_function_size_one() {
        let file = write_corpus(&[labeled_fn(
            &["int", "@@x@@", "=", "0x0", ";"],
            "x",
            "count",
        )]);
        let vocab = Vocab::from_parts(
            vec!["count".into(), "i".into(), "n".into()],
            vec![3, 2, 1],
        );

        let db = build_ngram_db(&Corpus::new(file.path(), false), &vocab, &opts(1, 5), None)
            .expect("build");

        assert_eq!(db.size(), 1);
        assert_eq!(db.len(), 1);
        let digest = ngram_hash(&["int", "@@var_0@@", "="], None);
        let (total, pairs) = db.lookup(&digest).expect("hit");
        assert_eq!(total, 1);
        assert_eq!(pairs[0], (vocab.lookup("count").expect("in vocab"), 1));
        assert!(pairs[1..].iter().all(|&p| p == (NULL_ID, 0)));
    }

    #[test]
    fn test_topk_truncation_keeps_pretruncation_total() {
        // Six functions share one context; labels alpha x3, beta x2, gamma x1.
        let mut lines = Vec::new();
        for label in ["alpha", "alpha", "alpha", "beta", "beta", "gamma"] {
            lines.push(labeled_fn(&["a", "@@v@@", "b"], "v", label));
        }
        let file = write_corpus(&lines);
        let vocab = Vocab::from_parts(
            vec!["alpha".into(), "beta".into(), "gamma".into()],
            vec![3, 2, 1],
        );

        let db = build_ngram_db(&Corpus::new(file.path(), false), &vocab, &opts(1, 2), None)
            .expect("build");

        let digest = ngram_hash(&["a", "@@var_0@@", "b"], None);
        let (total, pairs) = db.lookup(&digest).expect("hit");
        // gamma fell off the top-2, but the total still counts it
        assert_eq!(total, 6);
        assert_eq!(pairs, vec![(1, 3), (2, 2)]);
        let count_sum: u32 = pairs.iter().map(|&(_, c)| c).sum();
        assert!(total >= count_sum);
    }

    #[test]
    fn test_vocabulary_miss_drops_pair_after_truncation() {
        let mut lines = Vec::new();
        for label in ["alpha", "alpha", "beta", "beta", "beta"] {
            lines.push(labeled_fn(&["a", "@@v@@", "b"], "v", label));
        }
        let file = write_corpus(&lines);
        // beta outranks alpha but is not in the vocabulary
        let vocab = Vocab::from_parts(vec!["alpha".into()], vec![2]);

        let db = build_ngram_db(&Corpus::new(file.path(), false), &vocab, &opts(1, 2), None)
            .expect("build");

        let digest = ngram_hash(&["a", "@@var_0@@", "b"], None);
        let (total, pairs) = db.lookup(&digest).expect("hit");
        assert_eq!(total, 5);
        // beta claimed a slot, then dropped: alpha plus padding remain
        assert_eq!(pairs, vec![(1, 2), (NULL_ID, 0)]);
    }

    #[test]
    fn test_non_human_and_unlabeled_occurrences_skipped() {
        let lines = vec![
            r#"{"tokens":["a","@@v@@","b"],"labels":{"name":{"v":{"label":"<none>","human":false}}}}"#.to_string(),
            r#"{"tokens":["a","@@w@@","b"],"labels":{"name":{}}}"#.to_string(),
        ];
        let file = write_corpus(&lines);
        let vocab = Vocab::from_parts(vec!["alpha".into()], vec![1]);

        let db = build_ngram_db(&Corpus::new(file.path(), false), &vocab, &opts(1, 2), None)
            .expect("build");
        assert!(db.is_empty());
    }

    #[test]
    fn test_flanking_build_produces_side_tagged_digests() {
        let file = write_corpus(&[labeled_fn(&["a", "b", "@@x@@", "c", "d"], "x", "alpha")]);
        let vocab = Vocab::from_parts(vec!["alpha".into()], vec![1]);
        let mut options = opts(2, 1);
        options.flanking = true;

        let db = build_ngram_db(&Corpus::new(file.path(), false), &vocab, &options, None)
            .expect("build");

        assert_eq!(db.len(), 2);
        let left = ngram_hash(&["a", "b"], Some(crate::ngram::Side::Left));
        let right = ngram_hash(&["c", "d"], Some(crate::ngram::Side::Right));
        assert!(db.lookup(&left).is_some());
        assert!(db.lookup(&right).is_some());
        assert!(db.lookup(&ngram_hash(&["a", "b"], None)).is_none());
    }

    #[test]
    fn test_build_is_deterministic() {
        let mut lines = Vec::new();
        for i in 0..40 {
            let tok = format!("t{}", i % 7);
            lines.push(labeled_fn(
                &[&tok, "@@v@@", "=", "0x10", ";"],
                "v",
                if i % 2 == 0 { "alpha" } else { "beta" },
            ));
        }
        let file = write_corpus(&lines);
        let corpus = Corpus::new(file.path(), false);
        let vocab = Vocab::from_parts(vec!["alpha".into(), "beta".into()], vec![20, 20]);

        let dir = tempfile::tempdir().expect("temp dir");
        let a = dir.path().join("a.db");
        let b = dir.path().join("b.db");
        build_ngram_db(&corpus, &vocab, &opts(3, 2), None)
            .expect("build")
            .save(&a)
            .expect("save");
        build_ngram_db(&corpus, &vocab, &opts(3, 2), None)
            .expect("build")
            .save(&b)
            .expect("save");

        assert_eq!(
            std::fs::read(&a).expect("read"),
            std::fs::read(&b).expect("read"),
        );
    }

    #[test]
    fn test_missing_label_kind_fails() {
        let file = write_corpus(&[
            r#"{"tokens":["@@v@@"],"labels":{"name":{"v":{"label":"i","human":true}}}}"#.to_string(),
        ]);
        let vocab = Vocab::from_parts(vec!["i".into()], vec![1]);
        let mut options = opts(1, 2);
        options.kind = LabelKind::Type;

        let err = build_ngram_db(&Corpus::new(file.path(), false), &vocab, &options, None)
            .expect_err("missing kind");
        assert!(err.to_string().contains("no 'type' label map"));
    }
}
