//! Build-db command - train an n-gram database

use crate::builder::{build_ngram_db, BuildOptions};
use crate::corpus::{Corpus, LabelKind};
use crate::vocab::Vocab;
use anyhow::{Context, Result};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::time::Duration;

#[allow(clippy::too_many_arguments)]
pub fn run(
    input: &Path,
    vocab_path: &Path,
    output: &Path,
    kind: LabelKind,
    size: usize,
    topk: usize,
    flanking: bool,
    strip: bool,
    workers: usize,
) -> Result<()> {
    let vocab = Vocab::load(vocab_path)?;
    if vocab.is_empty() {
        anyhow::bail!("vocabulary {} is empty", vocab_path.display());
    }
    let corpus = Corpus::new(input, strip);

    // The corpus is streamed, so the entry count is unknown up front.
    let bar = ProgressBar::new_spinner();
    bar.set_style(
        ProgressStyle::with_template("{spinner:.green} {msg} {pos} functions")
            .expect("valid template"),
    );
    bar.enable_steady_tick(Duration::from_millis(100));
    bar.set_message(format!("Building size-{size} database:"));

    let opts = BuildOptions {
        kind,
        size,
        topk,
        flanking,
        workers,
    };
    let progress = |done: usize| {
        if done % 100 == 0 {
            bar.set_position(done as u64);
        }
    };
    let db = build_ngram_db(&corpus, &vocab, &opts, Some(&progress))
        .with_context(|| format!("failed to build database from {}", input.display()))?;

    bar.set_message("Writing database:");
    db.save(output)
        .with_context(|| format!("failed to write database to {}", output.display()))?;
    bar.finish_and_clear();

    println!(
        "{} {} records (size={}, topk={}{}) -> {}",
        style("✓").green(),
        db.len(),
        db.size(),
        db.topk(),
        if flanking { ", flanking" } else { "" },
        output.display()
    );
    Ok(())
}
