//! # The Forge: Wrapper Source Emitter
//!
//! Generates the C++ translation units that bind one call signature, one
//! class registration or the consolidated enum table, and drives the
//! compiler that turns them into shared libraries.
//!
//! - [`abi`]: the C ABI shared by every artifact and its Rust mirror.
//! - [`ir`]: the structured source model and its printer.
//! - [`emit`]: builders from call descriptions to translation units.
//! - [`driver`]: `make` and direct compiler drivers.
//!
//! ## Example
//! ```
//! use forge::{wrapper_source, ArgPassing, ArgSpec, CallDescription, CallTarget};
//!
//! let unit = wrapper_source(&CallDescription {
//!     hash: "f_0".into(),
//!     target: CallTarget::Function { qualified: "add".into() },
//!     args: vec![ArgSpec::new("int", ArgPassing::Value), ArgSpec::new("int", ArgPassing::Value)],
//!     includes: vec!["arith.hpp".into()],
//! })
//! .unwrap();
//! assert!(unit.render().contains("return add(a0, a1);"));
//! ```

pub mod abi;
pub mod driver;
pub mod emit;
pub mod ir;

use thiserror::Error;

pub use abi::{write_prelude, RawEnumEntry, RawProbe, RawValue};
pub use driver::{artifact_file_name, makefile, BuildError, BuildJob, Compiler, DirectCompiler, MakeCompiler, Toolchain};
pub use emit::{
    accessor_header, class_header, class_registration, enum_registration, source_path, wrapper_source, write_source,
    ArgPassing, ArgSpec, CallDescription, CallTarget,
};
pub use ir::TranslationUnit;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EmitError {
    #[error("member call without a receiver")]
    MissingReceiver,

    #[error("`{op}` takes {expected} operand(s) including the receiver, got {given}")]
    OperandCount { op: &'static str, expected: usize, given: usize },
}
