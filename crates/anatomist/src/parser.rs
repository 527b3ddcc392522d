//! Tree-sitter based C++ header reflection.
//!
//! Only the primary file is parsed; `#include`d headers are never visited.
//! Entities are discovered with a single query and then filtered to those
//! that sit at namespace scope. Class bodies are walked directly so access
//! specifiers can be tracked in order.

use std::collections::HashSet;
use std::fs::File;
use std::path::Path;
use std::sync::OnceLock;

use memmap2::MmapOptions;
use tracing::debug;
use tree_sitter::{Node, Parser, Query, QueryCursor, StreamingIterator};

use common::{
    ClassDescriptor, EnumDescriptor, FieldDescriptor, FunctionGroup, MethodDescriptor, Operator,
    TypedefDescriptor, UnsupportedConstruct,
};

use crate::path_util::normalize_path;
use crate::{AnatomistError, Reflection};

/// Pattern indices for the entity query.
const PATTERN_CLASS: usize = 0;
const PATTERN_STRUCT: usize = 1;
const PATTERN_ENUM: usize = 2;
const PATTERN_FN_DEF: usize = 3;
const PATTERN_FN_DECL: usize = 4;

const ENTITY_S_EXPR: &str = r#"
    (class_specifier
      name: (type_identifier)
      body: (field_declaration_list)) @entity

    (struct_specifier
      name: (type_identifier)
      body: (field_declaration_list)) @entity

    (enum_specifier
      name: (type_identifier)
      body: (enumerator_list)) @entity

    (function_definition
      declarator: (_)) @entity

    (declaration
      declarator: (_)) @entity
"#;

static ENTITY_QUERY: OnceLock<Result<Query, String>> = OnceLock::new();

fn entity_query() -> Result<&'static Query, AnatomistError> {
    ENTITY_QUERY
        .get_or_init(|| {
            Query::new(&tree_sitter_cpp::LANGUAGE.into(), ENTITY_S_EXPR).map_err(|e| e.to_string())
        })
        .as_ref()
        .map_err(|e| AnatomistError::ParseFailure(format!("entity query failed to compile: {e}")))
}

/// Node kinds that end namespace scope: anything declared below them is a member or a local.
const SCOPE_BREAKERS: &[&str] = &[
    "field_declaration_list",
    "compound_statement",
    "lambda_expression",
    "parameter_list",
    "template_argument_list",
];

fn text<'s>(node: Node<'_>, source: &'s [u8]) -> &'s str {
    node.utf8_text(source).unwrap_or("")
}

// ---------------------------------------------------------------------------
// Name utilities
// ---------------------------------------------------------------------------

/// Resolves a base-class or alias target spelling to a proxy class reference.
///
/// Nested aliases reached through a template (`typename Base<T>::type`,
/// `Base<T>::type`) become the forwarding form `Base.type`; everything else
/// becomes its bare class name.
///
/// ```
/// # use anatomist::parser::class_reference;
/// assert_eq!(class_reference("typename Base<T>::type"), "Base.type");
/// assert_eq!(class_reference("Foo<T, N>::value_type"), "Foo.value_type");
/// assert_eq!(class_reference("ns::Vector<double>"), "Vector");
/// assert_eq!(class_reference("Grid"), "Grid");
/// ```
pub fn class_reference(spelling: &str) -> String {
    let trimmed = spelling.trim();
    let had_typename = trimmed.starts_with("typename");
    let compact: String = trimmed
        .strip_prefix("typename")
        .unwrap_or(trimmed)
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    let last_segment = compact.rsplit("::").next().unwrap_or("");
    let is_nested_alias = had_typename || (compact.contains('<') && !last_segment.contains('>'));

    let stripped = common::canonical::strip_template_args(&compact);
    let parts: Vec<&str> = stripped.split("::").filter(|p| !p.is_empty()).collect();
    match parts.as_slice() {
        [] => String::new(),
        [only] => (*only).to_string(),
        [.., owner, alias] if is_nested_alias => format!("{owner}.{alias}"),
        [.., last] => (*last).to_string(),
    }
}

fn namespace_of(node: Node<'_>, source: &[u8]) -> Option<String> {
    let mut parts = Vec::new();
    let mut current = node.parent();
    while let Some(n) = current {
        if n.kind() == "namespace_definition" {
            if let Some(name) = n.child_by_field_name("name") {
                parts.push(text(name, source).replace(char::is_whitespace, ""));
            }
        }
        current = n.parent();
    }
    if parts.is_empty() {
        None
    } else {
        parts.reverse();
        Some(parts.join("::"))
    }
}

fn at_namespace_scope(node: Node<'_>) -> bool {
    let mut current = node.parent();
    while let Some(n) = current {
        if SCOPE_BREAKERS.contains(&n.kind()) {
            return false;
        }
        current = n.parent();
    }
    true
}

/// The enclosing `template <...>` declaration, if `node` is its direct subject.
fn template_of(node: Node<'_>) -> Option<Node<'_>> {
    node.parent().filter(|p| p.kind() == "template_declaration")
}

fn template_params(template: Node<'_>, source: &[u8]) -> Vec<String> {
    let Some(list) = template.child_by_field_name("parameters") else {
        return Vec::new();
    };
    let mut cursor = list.walk();
    list.named_children(&mut cursor)
        .filter_map(|param| {
            let name = match param.kind() {
                "optional_type_parameter_declaration" => param.child_by_field_name("name"),
                "parameter_declaration" | "optional_parameter_declaration" => {
                    param.child_by_field_name("declarator")
                }
                _ => {
                    let mut c = param.walk();
                    let found = param
                        .named_children(&mut c)
                        .filter(|n| n.kind() == "type_identifier" || n.kind() == "identifier")
                        .last();
                    found
                }
            }?;
            Some(text(name, source).to_string())
        })
        .collect()
}

/// Doc comment directly preceding `node` (`///`, `//!` or `/** */`).
fn doc_comment(node: Node<'_>, source: &[u8]) -> Option<String> {
    let anchor = template_of(node).unwrap_or(node);
    let mut lines = Vec::new();
    let mut current = anchor.prev_named_sibling();
    let mut next_start_row = anchor.start_position().row;
    while let Some(n) = current {
        if n.kind() != "comment" || n.end_position().row + 1 < next_start_row {
            break;
        }
        let raw = text(n, source);
        if !(raw.starts_with("///") || raw.starts_with("//!") || raw.starts_with("/**")) {
            break;
        }
        lines.push(raw);
        next_start_row = n.start_position().row;
        current = n.prev_named_sibling();
    }
    if lines.is_empty() {
        return None;
    }
    lines.reverse();
    let cleaned: Vec<String> = lines
        .iter()
        .flat_map(|block| block.lines())
        .map(|line| {
            let line = line.trim();
            let line = line
                .strip_prefix("///")
                .or_else(|| line.strip_prefix("//!"))
                .or_else(|| line.strip_prefix("/**"))
                .unwrap_or(line);
            let line = line.strip_suffix("*/").unwrap_or(line).trim();
            line.strip_prefix('*').unwrap_or(line).trim().to_string()
        })
        .filter(|l| !l.is_empty())
        .collect();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned.join("\n"))
    }
}

/// Unwraps pointer and reference declarators down to a `function_declarator`.
fn function_declarator(mut node: Node<'_>) -> Option<Node<'_>> {
    loop {
        match node.kind() {
            "function_declarator" => return Some(node),
            "pointer_declarator" => node = node.child_by_field_name("declarator")?,
            "reference_declarator" => {
                let mut cursor = node.walk();
                let inner = node.named_children(&mut cursor).last();
                node = inner?;
            }
            _ => return None,
        }
    }
}

fn parameters(declarator: Node<'_>, source: &[u8]) -> Vec<String> {
    let Some(list) = declarator.child_by_field_name("parameters") else {
        return Vec::new();
    };
    let mut cursor = list.walk();
    list.named_children(&mut cursor)
        .filter(|p| p.kind().ends_with("parameter_declaration"))
        .map(|p| text(p, source).split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|p| p != "void")
        .collect()
}

fn has_storage(node: Node<'_>, source: &[u8], keyword: &str) -> bool {
    let mut cursor = node.walk();
    let found = node
        .named_children(&mut cursor)
        .any(|c| c.kind() == "storage_class_specifier" && text(c, source) == keyword);
    found
}

fn has_const_qualifier(node: Node<'_>, source: &[u8]) -> bool {
    let mut cursor = node.walk();
    let found = node
        .named_children(&mut cursor)
        .any(|c| c.kind() == "type_qualifier" && text(c, source) == "const");
    found
}

// ---------------------------------------------------------------------------
// Class bodies
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, PartialEq, Eq)]
enum Access {
    Public,
    Hidden,
}

struct ClassWalker<'s> {
    source: &'s [u8],
    class: ClassDescriptor,
    seen_methods: HashSet<String>,
}

impl<'s> ClassWalker<'s> {
    fn walk_body(&mut self, body: Node<'_>, default_access: Access) {
        let mut access = default_access;
        let mut cursor = body.walk();
        for member in body.named_children(&mut cursor) {
            if member.kind() == "access_specifier" {
                access = if text(member, self.source).trim() == "public" { Access::Public } else { Access::Hidden };
                continue;
            }
            if access == Access::Public {
                self.member(member);
            }
        }
    }

    fn member(&mut self, member: Node<'_>) {
        match member.kind() {
            "field_declaration" | "declaration" => self.declaration(member),
            "function_definition" => {
                if let Some(decl) = member.child_by_field_name("declarator") {
                    self.function_member(member, decl);
                }
            }
            "template_declaration" => {
                let mut cursor = member.walk();
                let inner: Vec<Node<'_>> = member
                    .named_children(&mut cursor)
                    .filter(|n| n.kind() != "template_parameter_list")
                    .collect();
                for n in inner {
                    self.member(n);
                }
            }
            "type_definition" => self.typedef(member),
            "alias_declaration" => {
                let name = member.child_by_field_name("name").map(|n| text(n, self.source));
                let target = member.child_by_field_name("type").map(|n| text(n, self.source));
                if let (Some(name), Some(target)) = (name, target) {
                    self.push_typedef(name, target);
                }
            }
            "comment" => {}
            other => debug!(kind = other, class = %self.class.name, "skipping class member"),
        }
    }

    fn declaration(&mut self, member: Node<'_>) {
        if has_storage(member, self.source, "static") {
            debug!(class = %self.class.name, "skipping static member");
            return;
        }
        let type_name = member.child_by_field_name("type").map(|t| text(t, self.source)).unwrap_or("");
        let is_const = has_const_qualifier(member, self.source);
        let mut cursor = member.walk();
        let declarators: Vec<Node<'_>> = member.children_by_field_name("declarator", &mut cursor).collect();
        for decl in declarators {
            if function_declarator(decl).is_some() {
                self.function_member(member, decl);
                continue;
            }
            if member.kind() != "field_declaration" {
                continue;
            }
            let (name_node, through_pointer) = match decl.kind() {
                "field_identifier" | "identifier" => (Some(decl), false),
                "pointer_declarator" | "reference_declarator" => {
                    let mut c = decl.walk();
                    let inner = decl
                        .named_children(&mut c)
                        .find(|n| n.kind() == "field_identifier" || n.kind() == "identifier");
                    (inner, decl.kind() == "pointer_declarator")
                }
                other => {
                    debug!(kind = other, class = %self.class.name, "skipping field declarator");
                    (None, false)
                }
            };
            let Some(name_node) = name_node else { continue };
            let name = text(name_node, self.source);
            if name == "__device__" {
                continue;
            }
            self.class.fields.push(FieldDescriptor {
                name: name.to_string(),
                type_name: type_name.to_string(),
                read_only: is_const && !through_pointer,
                doc: doc_comment(member, self.source),
            });
        }
    }

    fn function_member(&mut self, member: Node<'_>, declarator: Node<'_>) {
        let Some(func) = function_declarator(declarator) else {
            debug!(kind = declarator.kind(), class = %self.class.name, "skipping conversion or special member");
            return;
        };
        let Some(name_node) = func.child_by_field_name("declarator") else { return };
        let params = parameters(func, self.source);
        let name = text(name_node, self.source);
        match name_node.kind() {
            "field_identifier" | "identifier" => {
                if name == self.class.name {
                    return;
                }
                if self.seen_methods.insert(name.to_string()) {
                    self.class.methods.push(MethodDescriptor {
                        name: name.to_string(),
                        params,
                        doc: doc_comment(member, self.source),
                    });
                }
            }
            "operator_name" => {
                let ops = Operator::from_member(name, params.len());
                if ops.is_empty() {
                    debug!(operator = name, class = %self.class.name, "unsupported operator skipped");
                }
                for op in ops {
                    if !self.class.operators.contains(&op) {
                        self.class.operators.push(op);
                    }
                }
            }
            other => debug!(kind = other, class = %self.class.name, "skipping member function"),
        }
    }

    fn typedef(&mut self, member: Node<'_>) {
        let Some(target) = member.child_by_field_name("type").map(|t| text(t, self.source)) else {
            return;
        };
        let mut cursor = member.walk();
        let names: Vec<&str> = member
            .children_by_field_name("declarator", &mut cursor)
            .filter(|d| d.kind() == "type_identifier")
            .map(|d| text(d, self.source))
            .collect();
        for name in names {
            self.push_typedef(name, target);
        }
    }

    fn push_typedef(&mut self, name: &str, target: &str) {
        let target: String = target.chars().filter(|c| *c != '&' && *c != '*').collect();
        let target = class_reference(target.trim_end_matches(|c: char| c.is_whitespace()).trim_end_matches("const"));
        if target.is_empty() {
            return;
        }
        self.class.typedefs.push(TypedefDescriptor { name: name.to_string(), target });
    }
}

// ---------------------------------------------------------------------------
// Parser host
// ---------------------------------------------------------------------------

/// Reflects C++ headers into class, function and enum descriptors.
///
/// # Example
/// ```
/// use anatomist::HeaderParser;
///
/// let mut parser = HeaderParser::new().unwrap();
/// let reflection = parser
///     .reflect_source(b"namespace ops { int add(int a, int b); }", "ops.hpp")
///     .unwrap();
/// assert_eq!(reflection.functions[0].namespace.as_deref(), Some("ops"));
/// ```
pub struct HeaderParser {
    parser: Parser,
}

impl HeaderParser {
    /// # Errors
    /// Returns `AnatomistError::ParseFailure` if the C++ grammar fails to load.
    pub fn new() -> Result<Self, AnatomistError> {
        let mut parser = Parser::new();
        parser
            .set_language(&tree_sitter_cpp::LANGUAGE.into())
            .map_err(|e| AnatomistError::ParseFailure(format!("Failed to load C++ grammar: {}", e)))?;
        Ok(Self { parser })
    }

    /// Reflects one header through a memory map.
    ///
    /// # Errors
    /// - `IoError`: file missing or unreadable, mmap failure
    /// - `ByteRangeOverflow`: file larger than 4GB (tree-sitter u32 limit)
    /// - `Unsupported`: a class with more than one base
    pub fn reflect_file(&mut self, path: &Path) -> Result<Reflection, AnatomistError> {
        let file = File::open(path)?;
        let file_len = file.metadata()?.len();
        if file_len > u64::from(u32::MAX) {
            return Err(AnatomistError::ByteRangeOverflow);
        }
        if file_len == 0 {
            return Ok(Reflection::default());
        }
        // SAFETY: The file handle is held for the duration of the mmap lifetime.
        let mmap = unsafe { MmapOptions::new().map(&file)? };
        let normalized = normalize_path(path)?;
        self.reflect_source(&mmap[..], &normalized)
    }

    pub fn reflect_source(&mut self, source: &[u8], file_path: &str) -> Result<Reflection, AnatomistError> {
        let tree = self
            .parser
            .parse(source, None)
            .ok_or_else(|| AnatomistError::ParseFailure(format!("Tree-sitter parse returned None for {file_path}")))?;
        let query = entity_query()?;

        let mut found: Vec<(usize, Node<'_>)> = Vec::new();
        let mut seen = HashSet::new();
        let mut cursor = QueryCursor::new();
        let mut matches = cursor.matches(query, tree.root_node(), source);
        while let Some(m) = matches.next() {
            if let Some(capture) = m.captures.first() {
                if seen.insert(capture.node.id()) {
                    found.push((m.pattern_index, capture.node));
                }
            }
        }
        found.sort_by_key(|(_, node)| node.start_byte());

        let mut reflection = Reflection::default();
        for (pattern, node) in found {
            if !at_namespace_scope(node) {
                continue;
            }
            match pattern {
                PATTERN_CLASS | PATTERN_STRUCT => {
                    let default_access = if pattern == PATTERN_CLASS { Access::Hidden } else { Access::Public };
                    reflection.classes.push(reflect_class(node, source, default_access)?);
                }
                PATTERN_ENUM => reflection.enums.push(reflect_enum(node, source)),
                PATTERN_FN_DEF | PATTERN_FN_DECL => {
                    if let Some((name, overload, namespace)) = reflect_function(node, source) {
                        reflection.add_overload(name, namespace, overload);
                    }
                }
                _ => {}
            }
        }
        debug!(
            file = file_path,
            classes = reflection.classes.len(),
            functions = reflection.functions.len(),
            enums = reflection.enums.len(),
            "reflected header"
        );
        Ok(reflection)
    }
}

fn reflect_class(node: Node<'_>, source: &[u8], default_access: Access) -> Result<ClassDescriptor, AnatomistError> {
    let name = node.child_by_field_name("name").map(|n| text(n, source)).unwrap_or("");
    let mut class = ClassDescriptor::new(name, namespace_of(node, source));
    class.doc = doc_comment(node, source);
    if let Some(template) = template_of(node) {
        class.is_template = true;
        class.template_params = template_params(template, source);
    }

    let mut cursor = node.walk();
    let bases: Vec<String> = node
        .named_children(&mut cursor)
        .filter(|c| c.kind() == "base_class_clause")
        .flat_map(|clause| {
            let mut c = clause.walk();
            clause
                .named_children(&mut c)
                .filter(|b| !matches!(b.kind(), "access_specifier" | "virtual" | "comment"))
                .map(|b| class_reference(text(b, source)))
                .collect::<Vec<_>>()
        })
        .collect();
    if bases.len() > 1 {
        return Err(UnsupportedConstruct::MultipleInheritance { class: name.to_string(), parents: bases }.into());
    }
    class.parent = bases.into_iter().next();

    let mut walker = ClassWalker { source, class, seen_methods: HashSet::new() };
    if let Some(body) = node.child_by_field_name("body") {
        walker.walk_body(body, default_access);
    }
    Ok(walker.class)
}

fn reflect_enum(node: Node<'_>, source: &[u8]) -> EnumDescriptor {
    let name = node.child_by_field_name("name").map(|n| text(n, source)).unwrap_or("");
    let mut enumerators = Vec::new();
    if let Some(body) = node.child_by_field_name("body") {
        let mut cursor = body.walk();
        for e in body.named_children(&mut cursor).filter(|e| e.kind() == "enumerator") {
            if let Some(n) = e.child_by_field_name("name") {
                enumerators.push(text(n, source).to_string());
            }
        }
    }
    EnumDescriptor { name: name.to_string(), namespace: namespace_of(node, source), enumerators }
}

fn reflect_function<'s>(node: Node<'_>, source: &'s [u8]) -> Option<(&'s str, MethodDescriptor, Option<String>)> {
    let func = function_declarator(node.child_by_field_name("declarator")?)?;
    let name_node = func.child_by_field_name("declarator")?;
    if name_node.kind() != "identifier" {
        // Qualified out-of-class definitions, operators and explicit specializations.
        debug!(kind = name_node.kind(), "skipping free function");
        return None;
    }
    let name = text(name_node, source);
    let overload = MethodDescriptor {
        name: name.to_string(),
        params: parameters(func, source),
        doc: doc_comment(node, source),
    };
    Some((name, overload, namespace_of(node, source)))
}

impl Reflection {
    fn add_overload(&mut self, name: &str, namespace: Option<String>, overload: MethodDescriptor) {
        match self.functions.iter_mut().find(|g| g.name == name) {
            Some(group) => group.overloads.push(overload),
            None => self.functions.push(FunctionGroup { name: name.to_string(), namespace, overloads: vec![overload] }),
        }
    }
}

/// Convenience wrapper: reflect one header with a fresh parser.
pub fn reflect_file(path: &Path) -> Result<Reflection, AnatomistError> {
    HeaderParser::new()?.reflect_file(path)
}

/// Convenience wrapper: reflect in-memory source with a fresh parser.
pub fn reflect_source(source: &str, file_path: &str) -> Result<Reflection, AnatomistError> {
    HeaderParser::new()?.reflect_source(source.as_bytes(), file_path)
}
