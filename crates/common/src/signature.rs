//! # Signature Hasher / Cache Key Builder
//!
//! A `CallSignature` serializes deterministically as
//! `ns::name(t1,t2,...)` followed by `<a,b>` when explicit template
//! arguments are given. The artifact key is `f_` plus the first 160 bits of
//! the BLAKE3 digest of that string, hex encoded.
//!
//! Argument order is the call-site order. Nothing is reordered or
//! normalized, so `f(int,double)` and `f(double,int)` are distinct artifacts.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::canonical::{qualify, CanonicalType};
use crate::descriptor::Operator;
use crate::value::TypeObject;

/// Prefix of every artifact identifier. Keeps hashes valid C identifiers.
pub const KEY_PREFIX: &str = "f_";

/// Truncated digest width, in bytes.
const KEY_BYTES: usize = 20;

/// One explicit template argument.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TemplateArg {
    Type(CanonicalType),
    /// Non-type template parameter.
    Integer(i64),
    /// Manual override, spelled verbatim.
    Raw(String),
}

impl TemplateArg {
    pub fn raw(spelling: impl Into<String>) -> Self {
        TemplateArg::Raw(spelling.into())
    }
}

impl fmt::Display for TemplateArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TemplateArg::Type(t) => write!(f, "{t}"),
            TemplateArg::Integer(n) => write!(f, "{n}"),
            TemplateArg::Raw(s) => f.write_str(s),
        }
    }
}

impl From<CanonicalType> for TemplateArg {
    fn from(t: CanonicalType) -> Self {
        TemplateArg::Type(t)
    }
}

impl From<&TypeObject> for TemplateArg {
    fn from(t: &TypeObject) -> Self {
        TemplateArg::Type(t.cpp_type.clone())
    }
}

impl From<i64> for TemplateArg {
    fn from(n: i64) -> Self {
        TemplateArg::Integer(n)
    }
}

/// Renders `<a,b>`. `Some(&[])` is an explicit empty list and renders `<>`.
fn render_template_args(args: Option<&[TemplateArg]>) -> String {
    match args {
        None => String::new(),
        Some(args) => {
            let parts: Vec<String> = args.iter().map(ToString::to_string).collect();
            format!("<{}>", parts.join(","))
        }
    }
}

/// `ns::Name<args>`, the native spelling of a (possibly templated) entity.
///
/// ```
/// # use common::{templated_name, TemplateArg, CanonicalType};
/// let args = [TemplateArg::Type(CanonicalType::real()), TemplateArg::Integer(3)];
/// assert_eq!(templated_name("Matrix", Some("linalg"), Some(&args[..])), "linalg::Matrix<double,3>");
/// assert_eq!(templated_name("Matrix", None, Some(&[][..])), "Matrix<>");
/// assert_eq!(templated_name("Matrix", None, None), "Matrix");
/// ```
pub fn templated_name(name: &str, namespace: Option<&str>, args: Option<&[TemplateArg]>) -> String {
    format!("{}{}", qualify(namespace, name), render_template_args(args))
}

/// The content address of one compiled artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactKey {
    /// `f_` + 40 hex digits. Also the entry point symbol name.
    pub hash: String,
    /// The serialized signature the hash was computed from.
    pub signature: String,
}

impl ArtifactKey {
    pub fn from_signature(signature: String) -> Self {
        let digest = blake3::hash(signature.as_bytes());
        let hash = format!("{KEY_PREFIX}{}", hex::encode(&digest.as_bytes()[..KEY_BYTES]));
        Self { hash, signature }
    }
}

/// Key of the registration artifact for one fully qualified class.
pub fn class_key(qualified: &str) -> ArtifactKey {
    ArtifactKey::from_signature(format!("class {qualified}"))
}

/// Identity of one compilable entry point.
///
/// The call kind is folded into `name`: constructors are `new T`, methods
/// `T.method`, operators `T.OP_TAG`, free functions their plain name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallSignature {
    pub name: String,
    pub namespace: Option<String>,
    pub argument_types: Vec<CanonicalType>,
    pub template_args: Option<Vec<TemplateArg>>,
}

impl CallSignature {
    pub fn function(
        name: &str,
        namespace: Option<&str>,
        argument_types: Vec<CanonicalType>,
        template_args: Option<Vec<TemplateArg>>,
    ) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.map(str::to_string),
            argument_types,
            template_args,
        }
    }

    pub fn constructor(cpp_type: &CanonicalType, argument_types: Vec<CanonicalType>) -> Self {
        Self::function(&format!("new {cpp_type}"), None, argument_types, None)
    }

    pub fn method(cpp_type: &CanonicalType, method: &str, argument_types: Vec<CanonicalType>) -> Self {
        Self::function(&format!("{cpp_type}.{method}"), None, argument_types, None)
    }

    pub fn operator(cpp_type: &CanonicalType, op: Operator, argument_types: Vec<CanonicalType>) -> Self {
        Self::function(&format!("{cpp_type}.{}", op.tag()), None, argument_types, None)
    }

    pub fn serialize(&self) -> String {
        let args: Vec<&str> = self.argument_types.iter().map(CanonicalType::as_str).collect();
        format!(
            "{}({}){}",
            qualify(self.namespace.as_deref(), &self.name),
            args.join(","),
            render_template_args(self.template_args.as_deref())
        )
    }

    pub fn key(&self) -> ArtifactKey {
        ArtifactKey::from_signature(self.serialize())
    }
}

impl fmt::Display for CallSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.serialize())
    }
}
