//! # Article Identities
//!
//! An [`Article`] names *what* is stored, never *how much*. It is an
//! immutable value: changing what a slot holds means replacing the article,
//! not mutating it. Equality and hashing are structural, so two articles
//! built from the same resource name and auxiliary payload are the same
//! article wherever they were built.

use std::sync::{Arc, OnceLock};

use serde::{Deserialize, Serialize};

use parking_lot::Mutex;
use std::collections::HashMap;

/// What family of resource an article belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArticleKind {
    /// The absence of a resource. Only [`Article::nothing`] has this kind.
    Nothing,
    /// A discrete, countable resource (an item stack).
    Item,
    /// A bulk resource measured in fractional amounts (a fluid volume).
    Fluid,
}

/// Immutable identity of a stored resource.
///
/// Cheap to clone: the resource name and auxiliary payload are shared
/// behind `Arc`s.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Article {
    kind: ArticleKind,
    resource: Arc<str>,
    aux: Option<Arc<[u8]>>,
}

static NOTHING: OnceLock<Article> = OnceLock::new();

impl Article {
    /// The distinguished "no resource" article.
    #[must_use]
    pub fn nothing() -> Self {
        NOTHING
            .get_or_init(|| Self {
                kind: ArticleKind::Nothing,
                resource: Arc::from(""),
                aux: None,
            })
            .clone()
    }

    /// A discrete item article.
    #[must_use]
    pub fn item(resource: &str) -> Self {
        Self {
            kind: ArticleKind::Item,
            resource: Arc::from(resource),
            aux: None,
        }
    }

    /// A discrete item article carrying an auxiliary payload (damage,
    /// enchantments, whatever the host attaches - opaque bytes here).
    #[must_use]
    pub fn item_with_aux(resource: &str, aux: &[u8]) -> Self {
        Self {
            kind: ArticleKind::Item,
            resource: Arc::from(resource),
            aux: Some(Arc::from(aux)),
        }
    }

    /// A bulk fluid article.
    #[must_use]
    pub fn fluid(resource: &str) -> Self {
        Self {
            kind: ArticleKind::Fluid,
            resource: Arc::from(resource),
            aux: None,
        }
    }

    /// A bulk fluid article carrying an auxiliary payload.
    #[must_use]
    pub fn fluid_with_aux(resource: &str, aux: &[u8]) -> Self {
        Self {
            kind: ArticleKind::Fluid,
            resource: Arc::from(resource),
            aux: Some(Arc::from(aux)),
        }
    }

    /// Rebuilds an article from its parts (deserialization path).
    #[must_use]
    pub fn from_parts(kind: ArticleKind, resource: &str, aux: Option<&[u8]>) -> Self {
        if kind == ArticleKind::Nothing {
            return Self::nothing();
        }
        Self {
            kind,
            resource: Arc::from(resource),
            aux: aux.map(Arc::from),
        }
    }

    /// The resource family.
    #[inline]
    #[must_use]
    pub const fn kind(&self) -> ArticleKind {
        self.kind
    }

    /// The resource name.
    #[inline]
    #[must_use]
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// The auxiliary payload, if any.
    #[inline]
    #[must_use]
    pub fn aux(&self) -> Option<&[u8]> {
        self.aux.as_deref()
    }

    /// Returns true if this is the "no resource" article.
    #[inline]
    #[must_use]
    pub fn is_nothing(&self) -> bool {
        self.kind == ArticleKind::Nothing
    }

    /// The registry key for this article: its identity minus the auxiliary
    /// payload, which travels separately on the wire.
    #[must_use]
    pub fn base(&self) -> Self {
        Self {
            kind: self.kind,
            resource: Arc::clone(&self.resource),
            aux: None,
        }
    }
}

impl std::fmt::Display for Article {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            ArticleKind::Nothing => write!(f, "<nothing>"),
            ArticleKind::Item => write!(f, "item:{}", self.resource),
            ArticleKind::Fluid => write!(f, "fluid:{}", self.resource),
        }
    }
}

// =============================================================================
// Registry - Compact Wire Ids
// =============================================================================

/// Maps base articles to stable raw ids for compact wire encoding.
///
/// Only the base identity (kind + resource) is registered; auxiliary
/// payloads are length-prefixed beside the raw id on the wire.
pub trait ArticleRegistry: Send + Sync {
    /// The raw id for an article's base identity, if registered.
    fn raw_id(&self, article: &Article) -> Option<u32>;

    /// The base article for a raw id, if registered.
    fn article(&self, raw_id: u32) -> Option<Article>;
}

/// In-memory registry assigning ids in registration order.
///
/// Id zero is reserved for [`Article::nothing`], which is always
/// registered.
#[derive(Debug, Default)]
pub struct InMemoryArticleRegistry {
    inner: Mutex<RegistryInner>,
}

#[derive(Debug, Default)]
struct RegistryInner {
    by_article: HashMap<Article, u32>,
    by_id: Vec<Article>,
}

impl InMemoryArticleRegistry {
    /// Creates a registry holding only the "nothing" article at id zero.
    #[must_use]
    pub fn new() -> Self {
        let registry = Self::default();
        registry.register(&Article::nothing());
        registry
    }

    /// Registers an article's base identity, returning its raw id.
    /// Idempotent: re-registering returns the existing id.
    pub fn register(&self, article: &Article) -> u32 {
        let base = article.base();
        let mut inner = self.inner.lock();
        if let Some(&id) = inner.by_article.get(&base) {
            return id;
        }
        let id = u32::try_from(inner.by_id.len()).unwrap_or(u32::MAX);
        inner.by_id.push(base.clone());
        inner.by_article.insert(base, id);
        id
    }
}

impl ArticleRegistry for InMemoryArticleRegistry {
    fn raw_id(&self, article: &Article) -> Option<u32> {
        self.inner.lock().by_article.get(&article.base()).copied()
    }

    fn article(&self, raw_id: u32) -> Option<Article> {
        self.inner.lock().by_id.get(raw_id as usize).cloned()
    }
}
