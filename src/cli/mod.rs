//! CLI command definitions and handlers

mod build_db;
mod build_vocab;
mod eval;
mod info;

use crate::corpus::LabelKind;
use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Parse and validate workers count (1-64)
fn parse_workers(s: &str) -> Result<usize, String> {
    let n: usize = s
        .parse()
        .map_err(|_| format!("'{}' is not a valid number", s))?;
    if n == 0 {
        Err("workers must be at least 1".to_string())
    } else if n > 64 {
        Err("workers cannot exceed 64".to_string())
    } else {
        Ok(n)
    }
}

/// STRIDE - variable name prediction for decompiled code
///
/// Builds n-gram databases from labeled decompiler output and predicts
/// human-meaningful names (or types) for the variables of unseen functions.
#[derive(Parser, Debug)]
#[command(name = "stride")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build a label vocabulary from a corpus
    BuildVocab {
        /// Input corpus (one JSON record per line)
        input: PathBuf,

        /// Output vocabulary file
        output: PathBuf,

        /// Label kind to count
        #[arg(long = "type", short = 't', value_enum, default_value_t = LabelKind::Name)]
        kind: LabelKind,
    },

    /// Build an n-gram database from a corpus and a vocabulary
    BuildDb {
        /// Input corpus (one JSON record per line)
        input: PathBuf,

        /// Vocabulary file
        vocab: PathBuf,

        /// Output database file
        output: PathBuf,

        /// Label kind to train on
        #[arg(long = "type", short = 't', value_enum, default_value_t = LabelKind::Name)]
        kind: LabelKind,

        /// N-gram size
        #[arg(long, short = 's', default_value_t = 3)]
        size: usize,

        /// Number of top-K labels stored per digest
        #[arg(long, short = 'k', default_value_t = 5)]
        topk: usize,

        /// Hash the left and right contexts separately
        #[arg(long, short = 'f')]
        flanking: bool,

        /// Collapse tokens outside the structural whitelist to '?'
        #[arg(long)]
        strip: bool,

        /// Number of parallel workers (1-64)
        #[arg(long, default_value = "8", value_parser = parse_workers)]
        workers: usize,
    },

    /// Predict over a labeled corpus and write a CSV of results
    Eval {
        /// Input corpus (one JSON record per line)
        input: PathBuf,

        /// Vocabulary file
        vocab: PathBuf,

        /// Output CSV file
        output: PathBuf,

        /// Database files; consulted from largest n-gram size to smallest
        #[arg(long = "dbs", short = 'd', required = true, num_args = 1..)]
        dbs: Vec<PathBuf>,

        /// Label kind to evaluate
        #[arg(long = "type", short = 't', value_enum, default_value_t = LabelKind::Name)]
        kind: LabelKind,

        /// Hash the left and right contexts separately
        #[arg(long, short = 'f')]
        flanking: bool,

        /// Collapse tokens outside the structural whitelist to '?'
        #[arg(long)]
        strip: bool,

        /// Number of parallel workers (1-64)
        #[arg(long, short = 'p', default_value = "8", value_parser = parse_workers)]
        nproc: usize,
    },

    /// Show size and record counts of database files
    Info {
        /// Database files to inspect
        #[arg(required = true)]
        dbs: Vec<PathBuf>,
    },
}

pub fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::BuildVocab {
            input,
            output,
            kind,
        } => build_vocab::run(&input, &output, kind),
        Commands::BuildDb {
            input,
            vocab,
            output,
            kind,
            size,
            topk,
            flanking,
            strip,
            workers,
        } => build_db::run(
            &input, &vocab, &output, kind, size, topk, flanking, strip, workers,
        ),
        Commands::Eval {
            input,
            vocab,
            output,
            dbs,
            kind,
            flanking,
            strip,
            nproc,
        } => eval::run(&input, &vocab, &output, &dbs, kind, flanking, strip, nproc),
        Commands::Info { dbs } => info::run(&dbs),
    }
}
