//! # Common: Shared Binding Vocabulary
//!
//! **Role**: Types every other crate speaks in. The host-side value model,
//! the canonical native type names derived from it, the call signatures
//! hashed into artifact keys, and the declarative class/function/enum
//! descriptors produced by reflection.
//!
//! **Core Types**:
//! - `Value` / `Arg`: closed host value model (primitive, array view, class
//!   instance, type object) and the argument wrappers a call accepts.
//! - `CanonicalType`: the string identity of a native type.
//! - `CallSignature` / `ArtifactKey`: the content address of one compiled entry point.
//! - `ClassDescriptor`, `FunctionGroup`, `EnumDescriptor`: reflection output.
//! - `ProxyModule`: the generated proxy definitions persisted as `kernels.json`.

pub mod canonical;
pub mod descriptor;
pub mod proxy;
pub mod signature;
pub mod value;

pub use canonical::{
    bare_class_name, canonical_type, normalize_type_name, primitive_type, qualify, strip_template_args, value_type,
    CanonicalType, DType, Layout, MemorySpace, MemoryTrait, ViewSpec,
};
pub use descriptor::{
    ClassDescriptor, EnumDescriptor, FieldDescriptor, FunctionGroup, MethodDescriptor, Operator,
    TypedefDescriptor,
};
pub use proxy::{ProxyClass, ProxyEnum, ProxyFunction, ProxyMember, ProxyModule};
pub use signature::{class_key, templated_name, ArtifactKey, CallSignature, TemplateArg};
pub use value::{Arg, ArrayView, EnumValue, Instance, NativeHandle, Primitive, Release, TypeObject, Value};

/// Errors raised while classifying a host value as a native type.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TypeError {
    /// A type object names a class; it has no native handle to pass.
    #[error("type object `{0}` cannot be passed as a call argument")]
    TypeObjectArgument(String),

    /// `void` has no runtime representation.
    #[error("`void` cannot be passed as a call argument")]
    VoidArgument,

    /// Array views carry between one and seven dimensions.
    #[error("View rank {0} is not allowed")]
    InvalidRank(usize),

    /// A native type name did not decode as an array view.
    #[error("unrecognized view type `{0}`")]
    UnrecognizedView(String),

    /// Text handed to the native side must not contain NUL bytes.
    #[error("text argument contains an interior NUL byte")]
    InteriorNul,
}

/// Constructs the binding engine refuses outright.
///
/// These are reported immediately and never retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UnsupportedConstruct {
    #[error("Multiple Inheritance currently not supported: `{class}` derives from {parents:?}")]
    MultipleInheritance { class: String, parents: Vec<String> },

    #[error("operator `{operator}` is not supported on `{class}`")]
    UnsupportedOperator { class: String, operator: String },

    /// A constructor proxy was invoked on an instance that already holds a handle.
    #[error("calling constructor on bound instance of `{0}` is forbidden")]
    Reconstruction(String),
}
