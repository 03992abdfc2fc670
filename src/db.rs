//! Immutable n-gram database
//!
//! Maps a window digest to the total observation count and the top-K
//! (label id, count) pairs seen for that digest. Records live in sorted
//! columnar arrays served by binary search, either packed in memory right
//! after a build or memory-mapped read-only from disk so worker threads
//! share pages.
//!
//! File layout (little endian):
//! - 64-byte header: magic, format version, n-gram size, K, record count
//! - `hsh`:    N x 12 bytes, rows sorted ascending
//! - `total`:  N x u32
//! - `typ`:    N x K x u32 (label ids, 0 = padding)
//! - `counts`: N x K x u32 (0 = padding)

use crate::ngram::{WindowDigest, DIGEST_LEN};
use anyhow::{Context, Result};
use memmap2::{Mmap, MmapOptions};
use std::fs::{File, OpenOptions};
use std::path::Path;

const HEADER_SIZE: usize = 64;
const MAGIC: &[u8; 8] = b"STRIDEDB";
/// Format v2: label id 0 is reserved as padding, real vocabulary ids are
/// 1-based.
const VERSION: u32 = 2;

/// One packed record, as produced by the builder: pairs are sorted by
/// count descending and padded with (0, 0) to exactly K entries.
#[derive(Debug, Clone)]
pub struct DbRecord {
    pub digest: WindowDigest,
    pub total: u32,
    pub pairs: Vec<(u32, u32)>,
}

enum Storage {
    /// Packed body sections, freshly built.
    Owned(Vec<u8>),
    /// Whole file, mmap-backed; the body starts at HEADER_SIZE.
    Mapped(Mmap),
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Storage::Owned(v) => f.debug_tuple("Owned").field(&v.len()).finish(),
            Storage::Mapped(m) => f.debug_tuple("Mapped").field(&m.len()).finish(),
        }
    }
}

#[derive(Debug)]
pub struct NgramDb {
    size: u32,
    topk: usize,
    records: usize,
    storage: Storage,
}

impl NgramDb {
    /// Pack sorted columnar arrays from builder records. Records are
    /// sorted by digest here; pair order within a record is the builder's.
    pub fn from_records(size: u32, topk: usize, mut records: Vec<DbRecord>) -> Self {
        records.sort_by(|a, b| a.digest.cmp(&b.digest));

        let n = records.len();
        let mut body = Vec::with_capacity(n * row_width(topk));

        for record in &records {
            body.extend_from_slice(&record.digest.0);
        }
        for record in &records {
            body.extend_from_slice(&record.total.to_le_bytes());
        }
        for record in &records {
            debug_assert_eq!(record.pairs.len(), topk);
            for (id, _) in &record.pairs {
                body.extend_from_slice(&id.to_le_bytes());
            }
        }
        for record in &records {
            for (_, count) in &record.pairs {
                body.extend_from_slice(&count.to_le_bytes());
            }
        }

        NgramDb {
            size,
            topk,
            records: n,
            storage: Storage::Owned(body),
        }
    }

    /// N-gram size this database was built with.
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Top-K width of each record.
    pub fn topk(&self) -> usize {
        self.topk
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records == 0
    }

    fn body(&self) -> &[u8] {
        match &self.storage {
            Storage::Owned(body) => body,
            Storage::Mapped(mmap) => &mmap[HEADER_SIZE..],
        }
    }

    fn digest_row(&self, i: usize) -> &[u8] {
        &self.body()[i * DIGEST_LEN..(i + 1) * DIGEST_LEN]
    }

    fn read_u32(&self, offset: usize) -> u32 {
        let bytes: [u8; 4] = self.body()[offset..offset + 4]
            .try_into()
            .expect("offset within validated body");
        u32::from_le_bytes(bytes)
    }

    /// Look up a digest. Returns the pre-truncation total and the K
    /// (label id, count) pairs, padding included; callers filter on
    /// count > 0.
    pub fn lookup(&self, digest: &WindowDigest) -> Option<(u32, Vec<(u32, u32)>)> {
        let mut lo = 0usize;
        let mut hi = self.records;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            match self.digest_row(mid).cmp(&digest.0[..]) {
                std::cmp::Ordering::Equal => return Some(self.record_at(mid)),
                std::cmp::Ordering::Less => lo = mid + 1,
                std::cmp::Ordering::Greater => hi = mid,
            }
        }
        None
    }

    fn record_at(&self, i: usize) -> (u32, Vec<(u32, u32)>) {
        let n = self.records;
        let total_off = n * DIGEST_LEN;
        let typ_off = total_off + n * 4;
        let counts_off = typ_off + n * self.topk * 4;

        let total = self.read_u32(total_off + i * 4);
        let pairs = (0..self.topk)
            .map(|j| {
                let id = self.read_u32(typ_off + (i * self.topk + j) * 4);
                let count = self.read_u32(counts_off + (i * self.topk + j) * 4);
                (id, count)
            })
            .collect();
        (total, pairs)
    }

    /// Write header and columnar sections to `path`.
    pub fn save(&self, path: &Path) -> Result<()> {
        let body = self.body();
        let total_size = HEADER_SIZE + body.len();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .with_context(|| format!("failed to create database file: {}", path.display()))?;
        file.set_len(total_size as u64)?;

        // SAFETY: we just created the file and set its length; this
        // mutable mapping is the only reference and lives only in this
        // function scope.
        let mut mmap = unsafe { MmapOptions::new().map_mut(&file)? };

        mmap[0..8].copy_from_slice(MAGIC);
        mmap[8..12].copy_from_slice(&VERSION.to_le_bytes());
        mmap[12..16].copy_from_slice(&self.size.to_le_bytes());
        mmap[16..20].copy_from_slice(&(self.topk as u32).to_le_bytes());
        mmap[24..32].copy_from_slice(&(self.records as u64).to_le_bytes());
        mmap[HEADER_SIZE..].copy_from_slice(body);

        mmap.flush()?;
        Ok(())
    }

    /// Open a database read-only. The file is mmap-ed and validated; all
    /// later reads stay within the checked section bounds.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("failed to open database file: {}", path.display()))?;

        // SAFETY: read-only mapping of a file we successfully opened; the
        // OS manages paging for the mapping's lifetime.
        let mmap = unsafe { MmapOptions::new().map(&file)? };

        if mmap.len() < HEADER_SIZE {
            anyhow::bail!(
                "corrupt database {}: {} bytes is smaller than the {} byte header",
                path.display(),
                mmap.len(),
                HEADER_SIZE
            );
        }
        if &mmap[0..8] != MAGIC {
            anyhow::bail!("{} is not an n-gram database: bad magic", path.display());
        }
        let version = u32::from_le_bytes(mmap[8..12].try_into()?);
        if version != VERSION {
            anyhow::bail!(
                "unsupported database version {} in {} (expected {})",
                version,
                path.display(),
                VERSION
            );
        }

        let size = u32::from_le_bytes(mmap[12..16].try_into()?);
        let topk = u32::from_le_bytes(mmap[16..20].try_into()?) as usize;
        let records = u64::from_le_bytes(mmap[24..32].try_into()?) as usize;

        if topk == 0 {
            anyhow::bail!("corrupt database {}: top-K width is zero", path.display());
        }

        let expected = records
            .checked_mul(row_width(topk))
            .and_then(|body| body.checked_add(HEADER_SIZE))
            .with_context(|| format!("corrupt database {}: section size overflow", path.display()))?;
        if expected != mmap.len() {
            anyhow::bail!(
                "corrupt database {}: expected {} bytes for {} records, file has {}",
                path.display(),
                expected,
                records,
                mmap.len()
            );
        }

        Ok(NgramDb {
            size,
            topk,
            records,
            storage: Storage::Mapped(mmap),
        })
    }
}

/// Bytes one record occupies across all four columnar sections.
fn row_width(topk: usize) -> usize {
    DIGEST_LEN + 4 + topk * 8
}
