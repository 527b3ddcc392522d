//! # The Anatomist: Header Reflection & Proxy Generation
//!
//! **Role**: Parses the bound library's headers with tree-sitter and turns
//! them into the declarative descriptors and proxy definitions the dispatch
//! layer works from.
//!
//! **Core Types**:
//! - `HeaderParser`: tree-sitter C++ host producing a `Reflection` per header.
//! - `Reflection`: classes, free-function overload groups and enums.
//! - `HeaderSet`: ordered header paths plus compiler flags.
//!
//! **Pipeline** (`generate_wrapper`): parse each header once, write one
//! accessor header per class, persist `kernels.json`, compile the enum table.

pub mod parser;
pub mod path_util;
pub mod proxy;
pub mod wrapper;

use std::collections::HashSet;

use common::{ClassDescriptor, EnumDescriptor, FieldDescriptor, FunctionGroup, UnsupportedConstruct};
use forge::BuildError;

pub use parser::{class_reference, reflect_file, reflect_source, HeaderParser};
pub use proxy::generate;
pub use wrapper::{generate_wrapper, load_module, HeaderSet, BUILD_DIR, KERNELS_FILE};

/// Everything reflected from one or more headers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reflection {
    pub classes: Vec<ClassDescriptor>,
    pub functions: Vec<FunctionGroup>,
    pub enums: Vec<EnumDescriptor>,
}

impl Reflection {
    pub fn class(&self, name: &str) -> Option<&ClassDescriptor> {
        self.classes.iter().find(|c| c.name == name)
    }

    /// Folds `other` in. Overload groups merge by name and keep the first namespace.
    pub fn merge(&mut self, other: Reflection) {
        for group in other.functions {
            match self.functions.iter_mut().find(|g| g.name == group.name) {
                Some(existing) => existing.overloads.extend(group.overloads),
                None => self.functions.push(group),
            }
        }
        self.classes.extend(other.classes);
        self.enums.extend(other.enums);
    }

    /// Own fields followed by inherited ones, nearest class first.
    ///
    /// Only plain parent names are followed; a parent reached through a
    /// nested alias ends the chain.
    pub fn visible_fields(&self, class: &str) -> Vec<FieldDescriptor> {
        let mut fields: Vec<FieldDescriptor> = Vec::new();
        let mut visited = HashSet::new();
        let mut current = self.class(class);
        while let Some(c) = current {
            if !visited.insert(c.name.as_str()) {
                break;
            }
            for f in &c.fields {
                if !fields.iter().any(|existing| existing.name == f.name) {
                    fields.push(f.clone());
                }
            }
            current = c.parent.as_deref().filter(|p| !p.contains('.')).and_then(|p| self.class(p));
        }
        fields
    }
}

/// Errors produced by the Anatomist crate.
#[derive(Debug, thiserror::Error)]
pub enum AnatomistError {
    /// Tree-sitter parsing failed.
    #[error("Parse failure: {0}")]
    ParseFailure(String),

    /// I/O error (file read/write).
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Byte range exceeds u32::MAX (file too large).
    #[error("Byte range overflow: file size exceeds 4GB limit")]
    ByteRangeOverflow,

    #[error(transparent)]
    Unsupported(#[from] UnsupportedConstruct),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error("kernels.json: {0}")]
    Json(#[from] serde_json::Error),
}
