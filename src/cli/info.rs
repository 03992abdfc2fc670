//! Info command - inspect database files

use crate::db::NgramDb;
use anyhow::Result;
use console::style;
use std::path::PathBuf;

pub fn run(paths: &[PathBuf]) -> Result<()> {
    for path in paths {
        let db = NgramDb::open(path)?;
        println!(
            "{}: size={} topk={} records={}",
            style(path.display()).bold(),
            db.size(),
            db.topk(),
            db.len()
        );
    }
    Ok(())
}
