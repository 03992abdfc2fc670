//! N-gram window hashing
//!
//! Two windows must hash equal exactly when they are token-equal up to a
//! consistent renaming of the variables they mention: the identity of the
//! target variable is what we predict, so it must never be a feature. Each
//! window therefore rewrites its placeholders to `@@var_K@@` in order of
//! first appearance before hashing.

use crate::normalize::placeholder_name;
use rustc_hash::FxHashMap;
use sha2::{Digest as _, Sha256};
use std::fmt;

/// Digest width in bytes. 96 bits keeps collisions negligible up to ~1e9
/// distinct windows; widening requires a database format version bump.
pub const DIGEST_LEN: usize = 12;

/// Token separator in the hashed byte encoding. 0xFF cannot occur inside
/// valid UTF-8, so token boundaries are unambiguous.
const SEPARATOR: u8 = 0xFF;

/// A 12-byte SHA-256 prefix identifying an n-gram equivalence class.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WindowDigest(pub [u8; DIGEST_LEN]);

impl fmt::Debug for WindowDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

impl AsRef<[u8]> for WindowDigest {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Which side of the center token a flanking window covers.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Side {
    Left,
    Right,
}

impl Side {
    fn discriminator(self) -> &'static [u8] {
        match self {
            Side::Left => b"left",
            Side::Right => b"right",
        }
    }
}

/// Hash a window of tokens, canonicalizing variable placeholders so the
/// digest is invariant under consistent renaming. `side` tags flanking
/// windows so a left context can never collide with a right one.
pub fn ngram_hash<S: AsRef<str>>(window: &[S], side: Option<Side>) -> WindowDigest {
    let mut renames: FxHashMap<&str, String> = FxHashMap::default();
    let mut hasher = Sha256::new();

    for (i, tok) in window.iter().enumerate() {
        if i > 0 {
            hasher.update([SEPARATOR]);
        }
        let tok = tok.as_ref();
        match placeholder_name(tok) {
            Some(name) => {
                let canon = match renames.get(name) {
                    Some(canon) => canon.clone(),
                    None => {
                        let canon = format!("@@var_{}@@", renames.len());
                        renames.insert(name, canon.clone());
                        canon
                    }
                };
                hasher.update(canon.as_bytes());
            }
            None => hasher.update(tok.as_bytes()),
        }
    }
    if let Some(side) = side {
        hasher.update(side.discriminator());
    }

    let full = hasher.finalize();
    let mut digest = [0u8; DIGEST_LEN];
    digest.copy_from_slice(&full[..DIGEST_LEN]);
    WindowDigest(digest)
}
