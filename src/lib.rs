// Clippy: deny unwrap_used in production code — use expect() or ? instead
#![cfg_attr(not(test), deny(clippy::unwrap_used))]

//! STRIDE - statistical variable name prediction for decompiled code
//!
//! Decompilers emit variables with meaningless names; this crate predicts
//! human-meaningful names (or types) for them from context alone. Training
//! maps normalized token windows around each labeled variable occurrence
//! to digest histograms; inference looks occurrences up in databases of
//! decreasing n-gram size and aggregates the votes per variable.

pub mod builder;
pub mod cli;
pub mod corpus;
pub mod db;
pub mod ngram;
pub mod normalize;
pub mod predict;
pub mod vocab;
