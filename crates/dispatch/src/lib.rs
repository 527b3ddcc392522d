//! # Dispatch: On-Demand Call Pipeline
//!
//! **Role**: Turns a host-side call (function, constructor, method, operator,
//! field access) into a compiled native call and back.
//!
//! **Pipeline** (one synchronous pass per call):
//! canonicalize arguments → hash the signature → cache lookup → on miss emit
//! and compile → load and probe → invoke → cast the result.
//!
//! All process-scoped state (loaded artifacts, registered classes, enum
//! table, telemetry) lives in a [`Session`]; there are no globals.

pub mod cast;
pub mod enums;
pub mod marshal;
pub mod session;

use anatomist::AnatomistError;
use common::{TemplateArg, TypeError, UnsupportedConstruct};
use forge::BuildError;
use vault::VaultError;

pub use enums::EnumTable;
pub use session::Session;

/// Per-call knobs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallOptions {
    /// Explicit template arguments, rendered after the name.
    pub template_args: Option<Vec<TemplateArg>>,
    /// Overrides the namespace recorded by reflection.
    pub namespace: Option<String>,
    /// Own a returned pointer and release it when the value drops.
    pub take_ownership: bool,
}

impl CallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn template_args(mut self, args: Vec<TemplateArg>) -> Self {
        self.template_args = Some(args);
        self
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn take_ownership(mut self) -> Self {
        self.take_ownership = true;
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    Type(#[from] TypeError),

    #[error(transparent)]
    Unsupported(#[from] UnsupportedConstruct),

    #[error(transparent)]
    Build(BuildError),

    /// The wrapped call threw.
    #[error("native exception: {0}")]
    Native(String),

    #[error(transparent)]
    Vault(VaultError),

    #[error(transparent)]
    Anatomist(#[from] AnatomistError),

    #[error("`{class}` has no member `{member}`")]
    UnknownMember { class: String, member: String },

    #[error("field `{field}` of `{class}` is read-only")]
    ReadOnlyField { class: String, field: String },

    #[error("`{type_name}` has no enumerator `{enumerator}`")]
    UnknownEnum { type_name: String, enumerator: String },

    /// Member access or operator application on something with no handle.
    #[error("expected a bound instance, got {0}")]
    NotAnInstance(&'static str),

    #[error("operator `{op}` takes {expected} argument(s), got {given}")]
    Arity { op: &'static str, expected: usize, given: usize },
}

impl From<VaultError> for DispatchError {
    fn from(e: VaultError) -> Self {
        match e {
            VaultError::Build(e) => DispatchError::Build(e),
            VaultError::Native(message) => DispatchError::Native(message),
            other => DispatchError::Vault(other),
        }
    }
}

impl From<BuildError> for DispatchError {
    fn from(e: BuildError) -> Self {
        DispatchError::Build(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vault_errors_are_flattened() {
        let build = VaultError::Build(BuildError::new("f_1.so", "error: nope"));
        assert!(matches!(DispatchError::from(build), DispatchError::Build(e) if e.diagnostics == "error: nope"));
        let native = VaultError::Native("index out of range".into());
        assert!(matches!(DispatchError::from(native), DispatchError::Native(m) if m == "index out of range"));
        assert!(matches!(DispatchError::from(VaultError::Index("x".into())), DispatchError::Vault(_)));
    }

    #[test]
    fn test_call_options_builder() {
        let opts = CallOptions::new().namespace("linalg").take_ownership().template_args(vec![TemplateArg::Integer(3)]);
        assert_eq!(opts.namespace.as_deref(), Some("linalg"));
        assert!(opts.take_ownership);
        assert_eq!(opts.template_args, Some(vec![TemplateArg::Integer(3)]));
    }
}
