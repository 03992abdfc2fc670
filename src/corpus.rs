//! Corpus streaming
//!
//! A corpus is a line-delimited JSON file, one decompiled function per
//! line. Entries are parsed lazily from a single file handle; each entry
//! carries its raw token sequence, per-kind label maps, and free-form
//! metadata. Normalized tokens are memoized per entry on first use.

use crate::ngram::{ngram_hash, Side, WindowDigest};
use crate::normalize;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::Deserialize;
use std::cell::OnceCell;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors produced while streaming a corpus file.
#[derive(Debug, Error)]
pub enum CorpusError {
    #[error("{path}:{line}: malformed corpus record: {source}")]
    Malformed {
        path: PathBuf,
        line: usize,
        source: ParseError,
    },

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Why a single corpus record failed to parse.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("{0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid variable placeholder {0:?}")]
    InvalidPlaceholder(String),
}

/// Which label map of an entry to train on or predict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LabelKind {
    /// Human-written variable names
    Name,
    /// Variable types (opaque JSON-encoded strings)
    Type,
}

impl LabelKind {
    pub fn as_str(self) -> &'static str {
        match self {
            LabelKind::Name => "name",
            LabelKind::Type => "type",
        }
    }
}

impl std::fmt::Display for LabelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One variable's ground-truth label. `human` is false for decompiler
/// placeholders (`<none>` and friends), which carry no training signal.
#[derive(Debug, Clone, Deserialize)]
pub struct VarLabel {
    pub label: String,
    pub human: bool,
}

pub type LabelMap = FxHashMap<String, VarLabel>;

#[derive(Debug, Deserialize)]
struct RawRecord {
    tokens: Vec<String>,
    labels: FxHashMap<String, LabelMap>,
    #[serde(default)]
    meta: serde_json::Map<String, serde_json::Value>,
}

/// Identity of one placeholder occurrence: the token index, plus the
/// window side in flanking mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Position {
    pub index: usize,
    pub side: Option<Side>,
}

/// One n-gram emitted by [`Entry::iter_ngrams`]. The window borrows the
/// entry's normalized tokens (or the `??` pad sentinel).
#[derive(Debug, Clone)]
pub struct Occurrence<'a> {
    pub digest: WindowDigest,
    pub window: Vec<&'a str>,
    pub position: Position,
    pub name: &'a str,
}

/// One decompiled function.
#[derive(Debug)]
pub struct Entry {
    tokens: Vec<String>,
    labels: FxHashMap<String, LabelMap>,
    meta: serde_json::Map<String, serde_json::Value>,
    full_strip: bool,
    line: usize,
    stripped: OnceCell<Vec<String>>,
}

/// A token wearing the `@@...@@` envelope must satisfy the placeholder
/// grammar: non-empty NAME with no embedded `@`.
fn check_placeholder_syntax(tokens: &[String]) -> Result<(), ParseError> {
    for tok in tokens {
        let enveloped = tok.len() >= 4 && tok.starts_with("@@") && tok.ends_with("@@");
        if enveloped && normalize::placeholder_name(tok).is_none() {
            return Err(ParseError::InvalidPlaceholder(tok.clone()));
        }
    }
    Ok(())
}

impl Entry {
    /// Parse one corpus line. `line` is 1-based and only used in messages.
    pub fn parse_line(raw: &str, full_strip: bool, line: usize) -> Result<Self, ParseError> {
        let record: RawRecord = serde_json::from_str(raw)?;
        check_placeholder_syntax(&record.tokens)?;
        Ok(Entry {
            tokens: record.tokens,
            labels: record.labels,
            meta: record.meta,
            full_strip,
            line,
            stripped: OnceCell::new(),
        })
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    /// Normalized token sequence, computed once per entry.
    pub fn stripped_tokens(&self) -> &[String] {
        self.stripped
            .get_or_init(|| normalize::strip_tokens(&self.tokens, self.full_strip))
    }

    /// The label map for `kind`, if this record carries one.
    pub fn labels(&self, kind: LabelKind) -> Option<&LabelMap> {
        self.labels.get(kind.as_str())
    }

    pub fn meta(&self) -> &serde_json::Map<String, serde_json::Value> {
        &self.meta
    }

    /// 1-based corpus line this entry was parsed from (0 if synthetic).
    pub fn line(&self) -> usize {
        self.line
    }

    /// Distinct variable NAMEs appearing as placeholders.
    pub fn all_vars(&self) -> FxHashSet<&str> {
        self.tokens
            .iter()
            .filter_map(|tok| normalize::placeholder_name(tok))
            .collect()
    }

    /// NAME -> number of placeholder occurrences in the token stream.
    pub fn var_counts(&self) -> FxHashMap<&str, usize> {
        let mut counts: FxHashMap<&str, usize> = FxHashMap::default();
        for tok in &self.tokens {
            if let Some(name) = normalize::placeholder_name(tok) {
                *counts.entry(name).or_insert(0) += 1;
            }
        }
        counts
    }

    /// Iterate the n-grams around every placeholder occurrence.
    ///
    /// Centered mode yields one window of `2 * size + 1` normalized tokens
    /// per occurrence; flanking mode yields the `size` tokens strictly
    /// before and strictly after the center as two side-tagged windows.
    /// Out-of-range positions read as the `??` sentinel.
    pub fn iter_ngrams(
        &self,
        size: usize,
        flanking: bool,
    ) -> impl Iterator<Item = Occurrence<'_>> + '_ {
        let stripped = self.stripped_tokens();
        let mut padded: Vec<&str> = Vec::with_capacity(stripped.len() + 2 * size);
        padded.extend(std::iter::repeat(normalize::PAD).take(size));
        padded.extend(stripped.iter().map(|s| s.as_str()));
        padded.extend(std::iter::repeat(normalize::PAD).take(size));

        self.tokens
            .iter()
            .enumerate()
            .filter_map(|(i, tok)| normalize::placeholder_name(tok).map(|name| (i, name)))
            .flat_map(move |(i, name)| {
                // The center token sits at padded[i + size].
                if flanking {
                    let left = padded[i..i + size].to_vec();
                    let right = padded[i + size + 1..i + 2 * size + 1].to_vec();
                    let mut out = Vec::with_capacity(2);
                    out.push(Occurrence {
                        digest: ngram_hash(&left, Some(Side::Left)),
                        window: left,
                        position: Position {
                            index: i,
                            side: Some(Side::Left),
                        },
                        name,
                    });
                    out.push(Occurrence {
                        digest: ngram_hash(&right, Some(Side::Right)),
                        window: right,
                        position: Position {
                            index: i,
                            side: Some(Side::Right),
                        },
                        name,
                    });
                    out
                } else {
                    let window = padded[i..i + 2 * size + 1].to_vec();
                    vec![Occurrence {
                        digest: ngram_hash(&window, None),
                        window,
                        position: Position { index: i, side: None },
                        name,
                    }]
                }
            })
    }
}

/// A corpus file on disk. Cheap to clone; opening the stream is deferred
/// until [`Corpus::entries`].
#[derive(Debug, Clone)]
pub struct Corpus {
    path: PathBuf,
    full_strip: bool,
}

impl Corpus {
    pub fn new(path: impl Into<PathBuf>, full_strip: bool) -> Self {
        Corpus {
            path: path.into(),
            full_strip,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open the file and stream entries one line at a time.
    pub fn entries(&self) -> Result<Entries, CorpusError> {
        let file = File::open(&self.path).map_err(|source| CorpusError::Io {
            path: self.path.clone(),
            source,
        })?;
        Ok(Entries {
            reader: BufReader::new(file),
            path: self.path.clone(),
            full_strip: self.full_strip,
            line: 0,
        })
    }
}

/// Streaming iterator over corpus entries. Holds the single file handle;
/// each entry is parsed on demand.
pub struct Entries {
    reader: BufReader<File>,
    path: PathBuf,
    full_strip: bool,
    line: usize,
}

impl Iterator for Entries {
    type Item = Result<Entry, CorpusError>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut buf = String::new();
        match self.reader.read_line(&mut buf) {
            Ok(0) => None,
            Ok(_) => {
                self.line += 1;
                Some(
                    Entry::parse_line(buf.trim_end_matches('\n'), self.full_strip, self.line)
                        .map_err(|source| CorpusError::Malformed {
                            path: self.path.clone(),
                            line: self.line,
                            source,
                        }),
                )
            }
            Err(source) => Some(Err(CorpusError::Io {
                path: self.path.clone(),
                source,
            })),
        }
    }
}
