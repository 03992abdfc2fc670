//! Eval command - predict over a labeled corpus and write a CSV table
//!
//! Databases and the vocabulary are loaded once and shared read-only
//! across worker threads; the databases serve lookups straight from their
//! memory maps. Rows keep corpus order, with variables sorted per entry,
//! so repeated runs produce identical files.

use crate::corpus::{Entry, LabelKind};
use crate::db::NgramDb;
use crate::predict::predict;
use crate::vocab::Vocab;
use anyhow::{Context, Result};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

/// One prediction against its ground truth.
struct Row {
    var: String,
    pred: Option<String>,
    label: String,
    count: usize,
    meta: serde_json::Map<String, serde_json::Value>,
}

#[allow(clippy::too_many_arguments)]
pub fn run(
    input: &Path,
    vocab_path: &Path,
    output: &Path,
    db_paths: &[PathBuf],
    kind: LabelKind,
    flanking: bool,
    strip: bool,
    nproc: usize,
) -> Result<()> {
    let vocab = Vocab::load(vocab_path)?;
    let mut dbs = db_paths
        .iter()
        .map(|path| NgramDb::open(path))
        .collect::<Result<Vec<_>>>()?;
    // Back-off order: largest n-gram size first, whatever the argument order.
    dbs.sort_by_key(|db| std::cmp::Reverse(db.size()));

    let file = File::open(input)
        .with_context(|| format!("failed to open corpus: {}", input.display()))?;
    let lines = BufReader::new(file)
        .lines()
        .collect::<std::io::Result<Vec<String>>>()
        .with_context(|| format!("failed to read corpus: {}", input.display()))?;

    let bar = ProgressBar::new(lines.len() as u64);
    bar.set_style(
        ProgressStyle::with_template("{bar:30.green} {pos}/{len} {msg}").expect("valid template"),
    );
    bar.set_message("Predicting...");

    let counter = AtomicUsize::new(0);
    let pool = rayon::ThreadPoolBuilder::new().num_threads(nproc).build()?;
    let per_entry: Vec<Vec<Row>> = pool.install(|| {
        lines
            .par_iter()
            .enumerate()
            .map(|(i, line)| {
                let done = counter.fetch_add(1, Ordering::Relaxed);
                if done % 100 == 0 {
                    bar.set_position(done as u64);
                }
                let entry = Entry::parse_line(line, strip, i + 1).with_context(|| {
                    format!("{}:{}: malformed corpus record", input.display(), i + 1)
                })?;
                entry_rows(&entry, &vocab, &dbs, kind, flanking)
            })
            .collect::<Result<Vec<_>>>()
    })?;
    bar.finish_and_clear();

    let row_count = write_csv(output, &per_entry)?;
    println!(
        "{} {} predictions -> {}",
        style("✓").green(),
        row_count,
        output.display()
    );
    Ok(())
}

/// Predict one entry and keep a row per variable with a human ground-truth
/// label; unlabeled and machine-labeled variables have nothing to compare
/// against.
fn entry_rows(
    entry: &Entry,
    vocab: &Vocab,
    dbs: &[NgramDb],
    kind: LabelKind,
    flanking: bool,
) -> Result<Vec<Row>> {
    let Some(labels) = entry.labels(kind) else {
        anyhow::bail!(
            "record at line {} has no '{}' label map",
            entry.line(),
            kind
        );
    };
    let preds = predict(entry, vocab, dbs, flanking);
    let counts = entry.var_counts();

    let mut rows: Vec<Row> = preds
        .into_iter()
        .filter_map(|(var, pred)| {
            let Some(var_label) = labels.get(&var) else {
                tracing::debug!(
                    "line {}: variable '{var}' predicted but has no ground-truth label",
                    entry.line()
                );
                return None;
            };
            if !var_label.human {
                return None;
            }
            let count = counts.get(var.as_str()).copied().unwrap_or(0);
            Some(Row {
                pred,
                label: var_label.label.clone(),
                count,
                meta: entry.meta().clone(),
                var,
            })
        })
        .collect();
    rows.sort_by(|a, b| a.var.cmp(&b.var));
    Ok(rows)
}

/// Write rows with the fixed columns first, then the union of meta keys.
fn write_csv(output: &Path, per_entry: &[Vec<Row>]) -> Result<usize> {
    let meta_keys: BTreeSet<&str> = per_entry
        .iter()
        .flatten()
        .flat_map(|row| row.meta.keys().map(|k| k.as_str()))
        .collect();

    let mut writer = csv::Writer::from_path(output)
        .with_context(|| format!("failed to create {}", output.display()))?;

    let mut header = vec!["var", "pred", "label", "count"];
    header.extend(meta_keys.iter().copied());
    writer.write_record(&header)?;

    let mut row_count = 0usize;
    for row in per_entry.iter().flatten() {
        let mut record = vec![
            row.var.clone(),
            row.pred.clone().unwrap_or_default(),
            row.label.clone(),
            row.count.to_string(),
        ];
        for key in &meta_keys {
            record.push(row.meta.get(*key).map(render_meta).unwrap_or_default());
        }
        writer.write_record(&record)?;
        row_count += 1;
    }
    writer.flush()?;
    Ok(row_count)
}

/// Strings are written bare; everything else keeps its JSON rendering.
fn render_meta(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}
