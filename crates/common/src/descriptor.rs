//! Declarative descriptors produced by header reflection.
//!
//! Built once per header-set parse and never mutated afterwards.

use serde::{Deserialize, Serialize};

/// The fixed operator set proxies support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Add,
    Sub,
    GetItem,
    SetItem,
    Call,
    Deref,
}

impl Operator {
    pub const ALL: [Operator; 6] = [
        Operator::Add,
        Operator::Sub,
        Operator::GetItem,
        Operator::SetItem,
        Operator::Call,
        Operator::Deref,
    ];

    /// Tag folded into operator call signatures.
    pub fn tag(self) -> &'static str {
        match self {
            Operator::Add => "ADD_",
            Operator::Sub => "SUB_",
            Operator::GetItem => "GET_ITEM_",
            Operator::SetItem => "SET_ITEM_",
            Operator::Call => "CALL_",
            Operator::Deref => "DEREF_",
        }
    }

    /// Native spelling of the overload.
    pub fn cpp_name(self) -> &'static str {
        match self {
            Operator::Add => "operator+",
            Operator::Sub => "operator-",
            Operator::GetItem | Operator::SetItem => "operator[]",
            Operator::Call => "operator()",
            Operator::Deref => "operator*",
        }
    }

    /// Number of operands besides the receiver; `None` for the variadic call operator.
    pub fn arity(self) -> Option<usize> {
        match self {
            Operator::Add | Operator::Sub | Operator::GetItem => Some(1),
            Operator::SetItem => Some(2),
            Operator::Deref => Some(0),
            Operator::Call => None,
        }
    }

    /// Maps a member overload onto the supported set.
    ///
    /// `operator[]` yields both index-get and index-set. Unary minus and
    /// binary multiplication have no counterpart and yield nothing.
    pub fn from_member(cpp_name: &str, param_count: usize) -> Vec<Operator> {
        let compact: String = cpp_name.chars().filter(|c| !c.is_whitespace()).collect();
        match (compact.as_str(), param_count) {
            ("operator+", 1) => vec![Operator::Add],
            ("operator-", 1) => vec![Operator::Sub],
            ("operator[]", _) => vec![Operator::GetItem, Operator::SetItem],
            ("operator()", _) => vec![Operator::Call],
            ("operator*", 0) => vec![Operator::Deref],
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    pub type_name: String,
    pub read_only: bool,
    pub doc: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodDescriptor {
    pub name: String,
    pub params: Vec<String>,
    pub doc: Option<String>,
}

/// A nested type alias, resolved to a forwarding alias (`Parent.member`) or a bare name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypedefDescriptor {
    pub name: String,
    pub target: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassDescriptor {
    pub name: String,
    pub namespace: Option<String>,
    pub is_template: bool,
    pub template_params: Vec<String>,
    /// Single inheritance only.
    pub parent: Option<String>,
    pub fields: Vec<FieldDescriptor>,
    pub methods: Vec<MethodDescriptor>,
    pub operators: Vec<Operator>,
    pub typedefs: Vec<TypedefDescriptor>,
    pub doc: Option<String>,
}

impl ClassDescriptor {
    pub fn new(name: impl Into<String>, namespace: Option<String>) -> Self {
        Self {
            name: name.into(),
            namespace,
            is_template: false,
            template_params: Vec::new(),
            parent: None,
            fields: Vec::new(),
            methods: Vec::new(),
            operators: Vec::new(),
            typedefs: Vec::new(),
            doc: None,
        }
    }

    pub fn has_operator(&self, op: Operator) -> bool {
        self.operators.contains(&op)
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// All overloads of one free function, keyed by name.
///
/// Only the first occurrence's namespace is kept; overload resolution is
/// left to the compiler at call time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionGroup {
    pub name: String,
    pub namespace: Option<String>,
    pub overloads: Vec<MethodDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumDescriptor {
    pub name: String,
    pub namespace: Option<String>,
    pub enumerators: Vec<String>,
}

impl EnumDescriptor {
    pub fn qualified_name(&self) -> String {
        crate::canonical::qualify(self.namespace.as_deref(), &self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operator_mapping() {
        assert_eq!(Operator::from_member("operator+", 1), vec![Operator::Add]);
        assert_eq!(
            Operator::from_member("operator []", 1),
            vec![Operator::GetItem, Operator::SetItem]
        );
        assert_eq!(Operator::from_member("operator()", 3), vec![Operator::Call]);
        assert_eq!(Operator::from_member("operator*", 0), vec![Operator::Deref]);
        assert!(Operator::from_member("operator*", 1).is_empty());
        assert!(Operator::from_member("operator-", 0).is_empty());
        assert!(Operator::from_member("operator==", 1).is_empty());
    }

    #[test]
    fn test_operator_tags_unique() {
        let mut tags: Vec<&str> = Operator::ALL.iter().map(|o| o.tag()).collect();
        tags.sort_unstable();
        tags.dedup();
        assert_eq!(tags.len(), Operator::ALL.len());
    }

    #[test]
    fn test_enum_qualified_name() {
        let e = EnumDescriptor {
            name: "Mode".into(),
            namespace: Some("solver".into()),
            enumerators: vec!["Fast".into()],
        };
        assert_eq!(e.qualified_name(), "solver::Mode");
    }
}
