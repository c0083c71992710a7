//! # Wire Sync Protocol
//!
//! Store update messages, little-endian framed:
//!
//! ```text
//! [4 bytes: magic "SKWP"]
//! [1 byte : version]
//! [1 byte : kind]
//! [4 bytes: entry count]
//! [entries: raw article id u32, aux length u32 + aux bytes,
//!           amount as 24-byte fraction triple, handle u32]
//! [24 bytes: capacity triple - FullRefresh and UpdateWithCapacity only]
//! [4 bytes: CRC32 over everything before it]
//! ```
//!
//! Articles travel as compact registry ids plus a length-prefixed
//! auxiliary payload; both peers must agree on the registry contents.

use stockpile_core::{Article, ArticleRegistry, Fraction};

use crate::error::{SyncError, SyncResult};

/// Protocol magic at the start of every message.
pub const SYNC_MAGIC: &[u8; 4] = b"SKWP";

/// Current protocol version.
pub const SYNC_VERSION: u8 = 1;

/// What a sync message means to the receiving mirror.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum SyncKind {
    /// Replace the mirror's contents wholesale. Carries capacity.
    FullRefresh = 0,
    /// Adjust individual handles.
    Update = 1,
    /// Adjust individual handles and set a new capacity.
    UpdateWithCapacity = 2,
}

impl SyncKind {
    fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::FullRefresh),
            1 => Some(Self::Update),
            2 => Some(Self::UpdateWithCapacity),
            _ => None,
        }
    }

    /// Whether messages of this kind carry a capacity triple.
    #[must_use]
    pub const fn carries_capacity(self) -> bool {
        matches!(self, Self::FullRefresh | Self::UpdateWithCapacity)
    }
}

/// One handle's state in a sync message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncEntry {
    /// What is stored.
    pub article: Article,
    /// The handle's absolute amount after this message.
    pub amount: Fraction,
    /// The handle the entry describes.
    pub handle: u32,
}

/// A decoded (or to-be-encoded) sync message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncMessage {
    /// What the receiver should do with the entries.
    pub kind: SyncKind,
    /// The affected handles.
    pub entries: Vec<SyncEntry>,
    /// New capacity; present exactly when [`SyncKind::carries_capacity`].
    pub capacity: Option<Fraction>,
}

impl SyncMessage {
    /// Encodes the message, resolving articles through `registry`.
    ///
    /// # Errors
    ///
    /// [`SyncError::UnknownArticle`] if an entry's article is not
    /// registered.
    pub fn encode(&self, registry: &dyn ArticleRegistry) -> SyncResult<Vec<u8>> {
        let mut buf = Vec::with_capacity(14 + self.entries.len() * 36);
        buf.extend_from_slice(SYNC_MAGIC);
        buf.push(SYNC_VERSION);
        buf.push(self.kind as u8);
        buf.extend_from_slice(&u32::try_from(self.entries.len()).unwrap_or(u32::MAX).to_le_bytes());
        for entry in &self.entries {
            let raw_id = registry
                .raw_id(&entry.article)
                .ok_or(SyncError::UnknownArticle { raw_id: u32::MAX })?;
            buf.extend_from_slice(&raw_id.to_le_bytes());
            let aux = entry.article.aux().unwrap_or(&[]);
            buf.extend_from_slice(&u32::try_from(aux.len()).unwrap_or(u32::MAX).to_le_bytes());
            buf.extend_from_slice(aux);
            buf.extend_from_slice(&entry.amount.to_wire_bytes());
            buf.extend_from_slice(&entry.handle.to_le_bytes());
        }
        if self.kind.carries_capacity() {
            let capacity = self.capacity.unwrap_or(Fraction::MAX);
            buf.extend_from_slice(&capacity.to_wire_bytes());
        }
        let crc = crc32fast::hash(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        Ok(buf)
    }

    /// Decodes a message, resolving raw ids through `registry`.
    ///
    /// The checksum is verified before anything else is trusted.
    ///
    /// # Errors
    ///
    /// Any [`SyncError`] variant, depending on what the peer got wrong.
    pub fn decode(bytes: &[u8], registry: &dyn ArticleRegistry) -> SyncResult<Self> {
        if bytes.len() < 4 {
            return Err(SyncError::Truncated {
                needed: 4 - bytes.len(),
            });
        }
        let (content, trailer) = bytes.split_at(bytes.len() - 4);
        let carried = u32::from_le_bytes(trailer.try_into().unwrap_or_default());
        let computed = crc32fast::hash(content);
        if carried != computed {
            return Err(SyncError::ChecksumMismatch { computed, carried });
        }

        let mut reader = Reader::new(content);
        let magic: [u8; 4] = reader.array()?;
        if &magic != SYNC_MAGIC {
            return Err(SyncError::BadMagic { found: magic });
        }
        let version = reader.byte()?;
        if version != SYNC_VERSION {
            return Err(SyncError::BadVersion { found: version });
        }
        let kind_byte = reader.byte()?;
        let kind = SyncKind::from_u8(kind_byte).ok_or(SyncError::BadKind { found: kind_byte })?;

        let count = reader.u32()? as usize;
        let mut entries = Vec::with_capacity(count.min(1024));
        for index in 0..count {
            let raw_id = reader.u32()?;
            let aux_len = reader.u32()? as usize;
            let aux = reader.take(aux_len)?;
            let base = registry
                .article(raw_id)
                .ok_or(SyncError::UnknownArticle { raw_id })?;
            let article = if aux.is_empty() {
                base
            } else {
                Article::from_parts(base.kind(), base.resource(), Some(aux))
            };
            let amount = Fraction::from_wire_bytes(&reader.array()?)
                .map_err(|_| SyncError::InvalidAmount { entry: index })?;
            let handle = reader.u32()?;
            entries.push(SyncEntry {
                article,
                amount,
                handle,
            });
        }

        let capacity = if kind.carries_capacity() {
            Some(
                Fraction::from_wire_bytes(&reader.array()?)
                    .map_err(|_| SyncError::InvalidAmount { entry: count })?,
            )
        } else {
            None
        };

        Ok(Self {
            kind,
            entries,
            capacity,
        })
    }
}

/// Bounds-checked little-endian reader over a received buffer.
struct Reader<'a> {
    rest: &'a [u8],
}

impl<'a> Reader<'a> {
    const fn new(rest: &'a [u8]) -> Self {
        Self { rest }
    }

    fn take(&mut self, len: usize) -> SyncResult<&'a [u8]> {
        if self.rest.len() < len {
            return Err(SyncError::Truncated {
                needed: len - self.rest.len(),
            });
        }
        let (taken, rest) = self.rest.split_at(len);
        self.rest = rest;
        Ok(taken)
    }

    fn array<const N: usize>(&mut self) -> SyncResult<[u8; N]> {
        Ok(self.take(N)?.try_into().unwrap_or([0; N]))
    }

    fn byte(&mut self) -> SyncResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> SyncResult<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }
}
