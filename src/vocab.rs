//! Label vocabulary
//!
//! A bidirectional table between label strings and dense integer ids,
//! ordered by global occurrence count descending. Id 0 is reserved as the
//! null/padding id used in database records; real ids start at 1.

use crate::corpus::{Corpus, LabelKind};
use anyhow::{Context, Result};
use rustc_hash::FxHashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

/// The reserved padding id. Never maps to a label.
pub const NULL_ID: u32 = 0;

#[derive(Debug, Clone)]
pub struct Vocab {
    labels: Vec<String>,
    counts: Vec<u64>,
    index: FxHashMap<String, u32>,
}

impl Vocab {
    /// Assemble a vocabulary from parallel label/count lists, already in
    /// id order (most frequent first).
    pub fn from_parts(labels: Vec<String>, counts: Vec<u64>) -> Self {
        debug_assert_eq!(labels.len(), counts.len());
        let index = labels
            .iter()
            .enumerate()
            .map(|(i, label)| (label.clone(), i as u32 + 1))
            .collect();
        Vocab {
            labels,
            counts,
            index,
        }
    }

    /// Count human label occurrences across the corpus and assign ids by
    /// count descending (ties: lexicographic, so builds are stable).
    pub fn build(corpus: &Corpus, kind: LabelKind) -> Result<Self> {
        let mut totals: FxHashMap<String, u64> = FxHashMap::default();

        for entry in corpus.entries()? {
            let entry = entry?;
            let Some(labels) = entry.labels(kind) else {
                anyhow::bail!(
                    "{}:{}: record has no '{}' label map",
                    corpus.path().display(),
                    entry.line(),
                    kind
                );
            };
            for (name, occurrences) in entry.var_counts() {
                // Unlabeled or machine-labeled variables carry no signal.
                let Some(var_label) = labels.get(name) else {
                    continue;
                };
                if !var_label.human {
                    continue;
                }
                *totals.entry(var_label.label.clone()).or_insert(0) += occurrences as u64;
            }
        }

        let mut pairs: Vec<(String, u64)> = totals.into_iter().collect();
        pairs.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        let (labels, counts) = pairs.into_iter().unzip();
        Ok(Vocab::from_parts(labels, counts))
    }

    /// Number of real labels (the reserved null id is not counted).
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Label -> id. Ids are 1-based; 0 is the padding id.
    pub fn lookup(&self, label: &str) -> Option<u32> {
        self.index.get(label).copied()
    }

    /// Id -> label. None for the null id and out-of-range ids.
    pub fn reverse(&self, id: u32) -> Option<&str> {
        if id == NULL_ID {
            return None;
        }
        self.labels.get(id as usize - 1).map(|s| s.as_str())
    }

    /// Global occurrence count for an id; 0 for the null id.
    pub fn count_by_id(&self, id: u32) -> u64 {
        if id == NULL_ID {
            return 0;
        }
        self.counts.get(id as usize - 1).copied().unwrap_or(0)
    }

    /// Write `LABEL\tCOUNT` lines in id order (id 1 first).
    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path)
            .with_context(|| format!("failed to create vocabulary file: {}", path.display()))?;
        let mut out = BufWriter::new(file);
        for (label, count) in self.labels.iter().zip(&self.counts) {
            writeln!(out, "{label}\t{count}")?;
        }
        out.flush()?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("failed to open vocabulary file: {}", path.display()))?;
        let mut labels = Vec::new();
        let mut counts = Vec::new();
        for (i, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            let (label, count) = line.split_once('\t').with_context(|| {
                format!("{}:{}: expected LABEL\\tCOUNT", path.display(), i + 1)
            })?;
            let count: u64 = count.trim().parse().with_context(|| {
                format!("{}:{}: invalid count {count:?}", path.display(), i + 1)
            })?;
            labels.push(label.to_string());
            counts.push(count);
        }
        Ok(Vocab::from_parts(labels, counts))
    }
}
