//! # Snapshot Persistence
//!
//! Serde record structures for saving and restoring store contents.
//!
//! Restoring **replays** every entry through the store's normal accept
//! path inside the caller's transaction, so listeners fire and invariants
//! are enforced exactly as during live mutation - state is never written
//! back raw. TOML is the format exercised in tests; any serde format
//! works.

use serde::{Deserialize, Serialize};

use crate::article::{Article, ArticleKind};
use crate::fraction::Fraction;

/// Persisted form of an article identity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleRecord {
    /// The resource family.
    pub kind: ArticleKind,
    /// The resource name.
    pub resource: String,
    /// The auxiliary payload, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aux: Option<Vec<u8>>,
}

impl ArticleRecord {
    /// Rebuilds the article this record describes.
    #[must_use]
    pub fn to_article(&self) -> Article {
        Article::from_parts(self.kind, &self.resource, self.aux.as_deref())
    }
}

impl From<&Article> for ArticleRecord {
    fn from(article: &Article) -> Self {
        Self {
            kind: article.kind(),
            resource: article.resource().to_owned(),
            aux: article.aux().map(<[u8]>::to_vec),
        }
    }
}

/// One non-empty handle in a snapshot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    /// What is stored.
    pub article: ArticleRecord,
    /// How much is stored.
    pub amount: Fraction,
}

/// Persisted form of a whole store: capacity plus the non-empty entries.
///
/// Produced by each store's `save_snapshot`; consumed by `load_snapshot`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    /// The storage-level capacity bound.
    pub capacity: Fraction,
    /// The non-empty entries, in handle order.
    #[serde(default)]
    pub entries: Vec<SnapshotEntry>,
}
