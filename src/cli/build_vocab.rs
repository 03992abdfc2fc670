//! Build-vocab command - count human labels and assign ids

use crate::corpus::{Corpus, LabelKind};
use crate::vocab::Vocab;
use anyhow::{Context, Result};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::time::Duration;

pub fn run(input: &Path, output: &Path, kind: LabelKind) -> Result<()> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner:.green} {msg}").expect("valid template"),
    );
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner.set_message(format!("Counting '{kind}' labels..."));

    let corpus = Corpus::new(input, false);
    let vocab = Vocab::build(&corpus, kind)
        .with_context(|| format!("failed to build vocabulary from {}", input.display()))?;
    vocab
        .save(output)
        .with_context(|| format!("failed to write vocabulary to {}", output.display()))?;

    spinner.finish_and_clear();
    println!(
        "{} {} labels -> {}",
        style("✓").green(),
        vocab.len(),
        output.display()
    );
    Ok(())
}
