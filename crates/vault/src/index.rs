//! # Artifact Index: Disk-Backed Build Ledger
//!
//! Records, per compiled artifact, the signature it was built from and the
//! return type its probe reported. Stored with `rkyv` next to the artifacts
//! so a later session (or `lazybind cache`) can list the build directory
//! without loading any shared library.

use std::fs::File;
use std::path::Path;

use memmap2::Mmap;
use rkyv::{Archive, Deserialize, Serialize};

use crate::VaultError;

/// Index file name inside a build directory.
pub const INDEX_FILE: &str = "index.rkyv";

/// What an indexed artifact is.
pub mod entry_kind {
    /// Call wrapper returning `void`.
    pub const VOID: u8 = 0;
    /// Call wrapper returning a primitive.
    pub const PRIMITIVE: u8 = 1;
    /// Call wrapper returning a class instance or pointer.
    pub const CLASS: u8 = 2;
    /// Class registration (drop and field accessors).
    pub const REGISTRATION: u8 = 3;
}

#[derive(Debug, Clone, PartialEq, Eq, Archive, Deserialize, Serialize)]
#[rkyv(derive(Debug))]
pub struct IndexEntry {
    /// Artifact key, also the shared library stem.
    pub hash: String,
    pub signature: String,
    pub kind: u8,
    /// Probe-reported return type, or the registered class.
    pub return_type: String,
}

impl IndexEntry {
    pub fn kind_label(&self) -> &'static str {
        kind_label(self.kind)
    }
}

pub fn kind_label(kind: u8) -> &'static str {
    match kind {
        entry_kind::VOID => "void",
        entry_kind::PRIMITIVE => "primitive",
        entry_kind::CLASS => "class",
        entry_kind::REGISTRATION => "registration",
        _ => "unknown",
    }
}

/// In-memory index, serializable to disk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Archive, Deserialize, Serialize)]
#[rkyv(derive(Debug))]
pub struct ArtifactIndex {
    pub entries: Vec<IndexEntry>,
}

impl ArtifactIndex {
    /// Reads the index at `path`. A missing file is an empty index.
    pub fn load(path: &Path) -> Result<Self, VaultError> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e.into()),
        };
        let mut aligned = rkyv::util::AlignedVec::<16>::new();
        aligned.extend_from_slice(&bytes);
        rkyv::from_bytes::<Self, rkyv::rancor::Error>(&aligned).map_err(|e| VaultError::Index(e.to_string()))
    }

    /// Inserts `entry`, replacing any entry with the same hash.
    pub fn upsert(&mut self, entry: IndexEntry) {
        match self.entries.iter_mut().find(|e| e.hash == entry.hash) {
            Some(existing) => *existing = entry,
            None => self.entries.push(entry),
        }
    }

    pub fn get(&self, hash: &str) -> Option<&IndexEntry> {
        self.entries.iter().find(|e| e.hash == hash)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sorts entries by hash and serializes the index.
    pub fn to_bytes(&mut self) -> Result<Vec<u8>, VaultError> {
        self.entries.sort_by(|a, b| a.hash.cmp(&b.hash));
        let aligned = rkyv::to_bytes::<rkyv::rancor::Error>(self).map_err(|e| VaultError::Index(e.to_string()))?;
        Ok(aligned.to_vec())
    }

    /// Writes through a temporary file so readers never map a partial index.
    pub fn save(&mut self, path: &Path) -> Result<(), VaultError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let bytes = self.to_bytes()?;
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        std::fs::write(&tmp, &bytes)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

/// Memory-mapped read-only index handle.
pub struct MappedIndex {
    _mmap: Mmap,
}

impl MappedIndex {
    pub fn open(path: &Path) -> Result<Self, VaultError> {
        let file = File::open(path)?;
        let mmap = unsafe { Mmap::map(&file)? };

        rkyv::access::<ArchivedArtifactIndex, rkyv::rancor::Error>(&mmap)
            .map_err(|e| VaultError::Index(e.to_string()))?;

        Ok(Self { _mmap: mmap })
    }

    pub fn archived(&self) -> &ArchivedArtifactIndex {
        // SAFETY: validated in `open()`; the mapping lives as long as self.
        unsafe { rkyv::access_unchecked::<ArchivedArtifactIndex>(&self._mmap[..]) }
    }

    /// Binary search by hash; saved indexes are sorted.
    pub fn find(&self, hash: &str) -> Option<&ArchivedIndexEntry> {
        let entries = &self.archived().entries;
        let idx = entries.binary_search_by(|e| e.hash.as_str().cmp(hash)).ok()?;
        Some(&entries[idx])
    }

    pub fn len(&self) -> usize {
        self.archived().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.archived().entries.is_empty()
    }
}
