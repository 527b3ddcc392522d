//! # The Vault: Artifact Cache & Loader
//!
//! Owns the build directory. Every compiled wrapper, class registration and
//! the enum table live there as `<hash>.so`, loaded on first use and kept
//! loaded for the rest of the session.
//!
//! ## Modules
//! - [`artifact`]: `libloading` wrappers for call, class and enum artifacts.
//! - [`cache`]: lookup order, build-on-miss and class registration.
//! - [`index`]: the `rkyv` ledger of what was built from which signature.
//! - [`telemetry`]: compile time and distinct call counters.

pub mod artifact;
pub mod cache;
pub mod index;
pub mod telemetry;

use forge::{BuildError, EmitError};

pub use artifact::{Artifact, ClassBinding, EnumEntry, NativeResult, ProbeKind, RawHandle, ReturnProbe};
pub use cache::{ArtifactCache, BuildContext};
pub use index::{ArtifactIndex, IndexEntry, MappedIndex, INDEX_FILE};
pub use telemetry::BuildStats;

/// Errors from loading, building or calling artifacts.
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// The file exists but is not a loadable artifact, or lacks a symbol.
    #[error("failed to load `{path}`: {reason}")]
    Load { path: String, reason: String },

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Emit(#[from] EmitError),

    #[error("Index error: {0}")]
    Index(String),

    /// The native call threw; carries the exception message.
    #[error("native exception: {0}")]
    Native(String),

    #[error("argument count mismatch calling `{0}`")]
    Arity(String),

    #[error("`{symbol}` returned unexpected status {status}")]
    Status { symbol: String, status: i32 },

    #[error("`{class}` has no accessible field `{field}`")]
    UnknownField { class: String, field: String },
}
