//! Generated proxy definitions.
//!
//! A `ProxyModule` is what header reflection hands to the dispatch layer:
//! for every class a declarative member list, for every overload group a
//! function entry, for every enum its enumerators. It is persisted as
//! `kernels.json` next to the build directory.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::descriptor::Operator;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProxyMember {
    /// One-shot constructor proxy.
    Constructor,
    /// Field accessor; the field's class type is registered lazily on first read.
    Field {
        name: String,
        read_only: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        doc: Option<String>,
    },
    Method {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        doc: Option<String>,
    },
    Operator { op: Operator },
    /// Nested type alias: `target` is a class name or `Class.alias`.
    Alias { name: String, target: String },
}

impl ProxyMember {
    pub fn name(&self) -> Option<&str> {
        match self {
            ProxyMember::Field { name, .. }
            | ProxyMember::Method { name, .. }
            | ProxyMember::Alias { name, .. } => Some(name),
            ProxyMember::Constructor | ProxyMember::Operator { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyClass {
    pub name: String,
    pub namespace: Option<String>,
    pub is_template: bool,
    pub parent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc: Option<String>,
    pub members: Vec<ProxyMember>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyFunction {
    pub name: String,
    pub namespace: Option<String>,
    /// Rendered overload parameter lists, for documentation only.
    pub overloads: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyEnum {
    pub name: String,
    pub namespace: Option<String>,
    pub enumerators: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyModule {
    /// Header include names every generated source pulls in.
    pub includes: Vec<String>,
    /// Extra compiler flags of the header set (include paths, standard).
    #[serde(default)]
    pub flags: Vec<String>,
    pub classes: Vec<ProxyClass>,
    pub functions: Vec<ProxyFunction>,
    pub enums: Vec<ProxyEnum>,
}

impl ProxyModule {
    pub fn class(&self, name: &str) -> Option<&ProxyClass> {
        self.classes.iter().find(|c| c.name == name)
    }

    pub fn function(&self, name: &str) -> Option<&ProxyFunction> {
        self.functions.iter().find(|f| f.name == name)
    }

    /// Finds an enum by bare or namespace-qualified name.
    pub fn enumeration(&self, name: &str) -> Option<&ProxyEnum> {
        self.enums.iter().find(|e| {
            e.name == name || crate::canonical::qualify(e.namespace.as_deref(), &e.name) == name
        })
    }

    /// The class followed by its ancestors, nearest first.
    ///
    /// Parents that were never reflected end the chain; a cyclic parent or
    /// alias chain is cut at the first repeat.
    pub fn lineage(&self, class: &str) -> Vec<&ProxyClass> {
        self.lineage_in(class, &mut Walk::new())
    }

    /// Member lookup through the inheritance chain.
    pub fn member(&self, class: &str, name: &str) -> Option<&ProxyMember> {
        self.member_in(class, name, &mut Walk::new())
    }

    pub fn has_operator(&self, class: &str, op: Operator) -> bool {
        self.lineage(class)
            .into_iter()
            .flat_map(|c| c.members.iter())
            .any(|m| *m == ProxyMember::Operator { op })
    }

    /// Follows a nested alias to the class it names, if that class was reflected.
    pub fn resolve_alias(&self, class: &str, alias: &str) -> Option<&ProxyClass> {
        let mut walk = Walk::new();
        match self.member_in(class, alias, &mut walk)? {
            ProxyMember::Alias { target, .. } => self.resolve_class_ref(target, &mut walk),
            _ => None,
        }
    }

    fn lineage_in<'a>(&'a self, class: &str, walk: &mut Walk<'a>) -> Vec<&'a ProxyClass> {
        let mut chain: Vec<&ProxyClass> = Vec::new();
        let mut current = self.class(class);
        while let Some(c) = current {
            if chain.iter().any(|seen| seen.name == c.name) {
                break;
            }
            chain.push(c);
            current = c.parent.as_deref().and_then(|p| self.resolve_class_ref(p, walk));
        }
        chain
    }

    fn member_in<'a>(&'a self, class: &str, name: &str, walk: &mut Walk<'a>) -> Option<&'a ProxyMember> {
        self.lineage_in(class, walk)
            .into_iter()
            .flat_map(|c| c.members.iter())
            .find(|m| m.name() == Some(name))
    }

    /// Resolves `Class` or `Class.alias`. An alias reference met again while
    /// it is still being resolved resolves to nothing.
    fn resolve_class_ref<'a>(&'a self, reference: &'a str, walk: &mut Walk<'a>) -> Option<&'a ProxyClass> {
        let Some((owner, alias)) = reference.split_once('.') else {
            return self.class(reference);
        };
        match walk.get(reference) {
            Some(Resolution::Pending) => return None,
            Some(Resolution::Done(found)) => return *found,
            None => {}
        }
        walk.insert(reference, Resolution::Pending);
        let found = match self.member_in(owner, alias, walk) {
            Some(ProxyMember::Alias { target, .. }) => self.resolve_class_ref(target, walk),
            _ => None,
        };
        walk.insert(reference, Resolution::Done(found));
        found
    }
}

/// Alias references visited during one lookup.
type Walk<'a> = HashMap<&'a str, Resolution<'a>>;

#[derive(Clone, Copy)]
enum Resolution<'a> {
    Pending,
    Done(Option<&'a ProxyClass>),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn class(name: &str, parent: Option<&str>, members: Vec<ProxyMember>) -> ProxyClass {
        ProxyClass {
            name: name.into(),
            namespace: None,
            is_template: true,
            parent: parent.map(Into::into),
            doc: None,
            members,
        }
    }

    fn module() -> ProxyModule {
        ProxyModule {
            includes: vec!["iter.hpp".into()],
            flags: vec![],
            classes: vec![
                class(
                    "adaptor",
                    None,
                    vec![
                        ProxyMember::Constructor,
                        ProxyMember::Method { name: "base".into(), doc: None },
                        ProxyMember::Operator { op: Operator::Deref },
                        ProxyMember::Alias { name: "type".into(), target: "adaptor".into() },
                    ],
                ),
                class("counting_base", None, vec![ProxyMember::Alias { name: "type".into(), target: "adaptor".into() }]),
                class(
                    "counting",
                    Some("counting_base.type"),
                    vec![ProxyMember::Constructor, ProxyMember::Field { name: "step".into(), read_only: true, doc: None }],
                ),
                class("loop_a", Some("loop_b"), vec![]),
                class("loop_b", Some("loop_a"), vec![]),
                class(
                    "self_parent",
                    Some("self_parent.up"),
                    vec![ProxyMember::Alias { name: "up".into(), target: "self_parent.up".into() }],
                ),
                class("ping", Some("pong.next"), vec![ProxyMember::Alias { name: "next".into(), target: "pong.next".into() }]),
                class("pong", Some("ping.next"), vec![ProxyMember::Alias { name: "next".into(), target: "ping.next".into() }]),
            ],
            functions: vec![],
            enums: vec![ProxyEnum {
                name: "Mode".into(),
                namespace: Some("solver".into()),
                enumerators: vec!["Fast".into()],
            }],
        }
    }

    #[test]
    fn test_member_lookup_through_alias_parent() {
        let m = module();
        assert_eq!(
            m.member("counting", "base"),
            Some(&ProxyMember::Method { name: "base".into(), doc: None })
        );
        assert!(m.has_operator("counting", Operator::Deref));
        assert!(!m.has_operator("counting", Operator::Add));
    }

    #[test]
    fn test_lineage_cycle_guard() {
        let m = module();
        let names: Vec<&str> = m.lineage("loop_a").iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["loop_a", "loop_b"]);
    }

    #[test]
    fn test_parent_through_own_alias_terminates() {
        let m = module();
        let names: Vec<&str> = m.lineage("self_parent").iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["self_parent"]);
        assert!(m.member("self_parent", "missing").is_none());
        assert!(m.resolve_alias("self_parent", "up").is_none());
    }

    #[test]
    fn test_mutual_alias_parents_terminate() {
        let m = module();
        assert!(m.member("ping", "missing").is_none());
        assert!(m.resolve_alias("ping", "next").is_none());
        assert!(!m.has_operator("pong", Operator::Deref));
    }

    #[test]
    fn test_resolve_alias() {
        let m = module();
        assert_eq!(m.resolve_alias("counting_base", "type").map(|c| c.name.as_str()), Some("adaptor"));
        assert!(m.resolve_alias("counting", "step").is_none());
    }

    #[test]
    fn test_enum_lookup() {
        let m = module();
        assert!(m.enumeration("Mode").is_some());
        assert!(m.enumeration("solver::Mode").is_some());
        assert!(m.enumeration("other::Mode").is_none());
    }

    #[test]
    fn test_json_shape() {
        let json = serde_json::to_string(&ProxyMember::Operator { op: Operator::GetItem }).unwrap();
        assert_eq!(json, r#"{"kind":"operator","op":"get_item"}"#);
        let back: ProxyModule = serde_json::from_str(&serde_json::to_string(&module()).unwrap()).unwrap();
        assert_eq!(back, module());
    }
}
