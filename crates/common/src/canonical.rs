//! # Type Canonicalizer
//!
//! Maps host values to the canonical native type string used both as hash
//! input and as the spelled type in emitted argument casts.
//!
//! ## Array views
//! Views encode as `Kokkos::View<dtype*..., [layout,] space[, trait]>`.
//! Layout and trait are omitted when they hold their default value; the
//! memory space is always spelled, falling back to the default execution
//! space's memory space. The encoding is a pure function of the semantic
//! configuration, so equal configurations always render equal strings.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::value::{Arg, Primitive, Value};
use crate::TypeError;

/// A native type name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CanonicalType(String);

impl CanonicalType {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn void() -> Self {
        Self::new("void")
    }

    pub fn int() -> Self {
        Self::new("int")
    }

    pub fn real() -> Self {
        Self::new("double")
    }

    pub fn boolean() -> Self {
        Self::new("bool")
    }

    pub fn text() -> Self {
        Self::new("std::string")
    }

    pub fn char_ptr() -> Self {
        Self::new("char *")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The same type with a trailing pointer marker.
    pub fn pointer(&self) -> Self {
        Self(format!("{}*", self.0))
    }
}

impl fmt::Display for CanonicalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CanonicalType {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Canonical type of one call argument.
///
/// # Errors
/// Type objects and nothing else are rejected; they name a class but carry
/// no handle.
pub fn canonical_type(arg: &Arg<'_>) -> Result<CanonicalType, TypeError> {
    match arg {
        Arg::Value(v) => value_type(v),
        Arg::Owned(p) => Ok(primitive_type(p)),
        Arg::Ptr(v) => Ok(value_type(v)?.pointer()),
        Arg::CharPtr(_) => Ok(CanonicalType::char_ptr()),
    }
}

pub fn value_type(value: &Value) -> Result<CanonicalType, TypeError> {
    match value {
        Value::Primitive(p) => Ok(primitive_type(p)),
        Value::View(view) => Ok(view.cpp_type.clone()),
        Value::Instance(inst) => Ok(inst.cpp_type.clone()),
        Value::Type(t) => Err(TypeError::TypeObjectArgument(t.cpp_type.to_string())),
    }
}

pub fn primitive_type(p: &Primitive) -> CanonicalType {
    match p {
        Primitive::Void => CanonicalType::void(),
        Primitive::Bool(_) => CanonicalType::boolean(),
        Primitive::Int(_) => CanonicalType::int(),
        Primitive::Real(_) => CanonicalType::real(),
        Primitive::Text(_) => CanonicalType::text(),
        // Enums fall back to their qualified type name.
        Primitive::Enum(e) => CanonicalType::new(e.type_name.clone()),
    }
}

// ---------------------------------------------------------------------------
// Name utilities
// ---------------------------------------------------------------------------

fn is_punct(c: char) -> bool {
    matches!(c, '<' | '>' | ',' | '*' | '&' | ':' | '(' | ')' | '[' | ']')
}

/// Collapses compiler-specific whitespace in a type name.
///
/// Whitespace next to punctuation is dropped, any other run becomes a single
/// space, so `Kokkos::View<double *, Kokkos::HostSpace>` and
/// `Kokkos::View<double*,Kokkos::HostSpace>` compare equal.
///
/// ```
/// # use common::normalize_type_name;
/// assert_eq!(normalize_type_name("std::vector<int, std::allocator<int> >"),
///            "std::vector<int,std::allocator<int>>");
/// assert_eq!(normalize_type_name("unsigned  long"), "unsigned long");
/// ```
pub fn normalize_type_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_space = false;
    for c in name.trim().chars() {
        if c.is_whitespace() {
            pending_space = true;
            continue;
        }
        if pending_space {
            let prev_is_word = out.chars().last().is_some_and(|p| !is_punct(p));
            if prev_is_word && !is_punct(c) {
                out.push(' ');
            }
            pending_space = false;
        }
        out.push(c);
    }
    out
}

/// Removes every balanced `<...>` and `(...)` group.
pub fn strip_template_args(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut depth = 0usize;
    for c in name.chars() {
        match c {
            '<' | '(' => depth += 1,
            '>' | ')' => depth = depth.saturating_sub(1),
            _ if depth == 0 => out.push(c),
            _ => {}
        }
    }
    out
}

/// Bare class name: no template arguments, no namespace, no cv/pointer decoration.
///
/// ```
/// # use common::bare_class_name;
/// assert_eq!(bare_class_name("linalg::Matrix<double, 3>"), "Matrix");
/// assert_eq!(bare_class_name("Vector"), "Vector");
/// ```
pub fn bare_class_name(name: &str) -> String {
    let stripped = strip_template_args(name);
    let trimmed = stripped
        .trim()
        .trim_end_matches(|c: char| c == '*' || c == '&' || c.is_whitespace());
    let trimmed = trimmed.strip_prefix("const ").unwrap_or(trimmed);
    trimmed
        .rsplit("::")
        .next()
        .unwrap_or(trimmed)
        .trim()
        .to_string()
}

/// `ns::name`, or `name` when there is no namespace.
pub fn qualify(namespace: Option<&str>, name: &str) -> String {
    match namespace {
        Some(ns) if !ns.is_empty() => format!("{ns}::{name}"),
        _ => name.to_string(),
    }
}

/// Splits on commas that are not nested inside `<>` or `()`.
fn split_top_level(params: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in params.char_indices() {
        match c {
            '<' | '(' => depth += 1,
            '>' | ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(params[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    let tail = params[start..].trim();
    if !tail.is_empty() {
        parts.push(tail);
    }
    parts
}

// ---------------------------------------------------------------------------
// Array view encoding
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    Int16,
    Int32,
    Int64,
    UInt16,
    UInt32,
    UInt64,
    Float,
    Double,
}

impl DType {
    pub fn cpp_name(self) -> &'static str {
        match self {
            DType::Int16 => "int16_t",
            DType::Int32 => "int32_t",
            DType::Int64 => "int64_t",
            DType::UInt16 => "uint16_t",
            DType::UInt32 => "uint32_t",
            DType::UInt64 => "uint64_t",
            DType::Float => "float",
            DType::Double => "double",
        }
    }

    /// Decodes any common spelling of a fixed-width arithmetic type
    /// (`long int`, `unsigned long`, `std::int64_t`, ...). Assumes LP64.
    pub fn from_cpp(spelling: &str) -> Option<Self> {
        let spelling = spelling.trim();
        let spelling = spelling.strip_prefix("std::").unwrap_or(spelling);
        let mut unsigned = false;
        let mut core: Vec<&str> = Vec::new();
        for word in spelling.split_whitespace() {
            match word {
                "unsigned" => unsigned = true,
                "signed" => {}
                other => core.push(other),
            }
        }
        if core.len() > 1 {
            core.retain(|w| *w != "int");
        }
        let dtype = match (unsigned, core.join(" ").as_str()) {
            (false, "int16_t") | (false, "short") => DType::Int16,
            (false, "int32_t") | (false, "int") => DType::Int32,
            (false, "int64_t") | (false, "long") | (false, "long long") => DType::Int64,
            (false, "uint16_t") | (true, "short") => DType::UInt16,
            (false, "uint32_t") | (true, "int") | (true, "") => DType::UInt32,
            (false, "uint64_t") | (false, "size_t") | (true, "long") | (true, "long long") => {
                DType::UInt64
            }
            (false, "float") => DType::Float,
            (false, "double") => DType::Double,
            _ => return None,
        };
        Some(dtype)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Layout {
    #[default]
    Default,
    Left,
    Right,
}

impl Layout {
    pub fn cpp_name(self) -> Option<&'static str> {
        match self {
            Layout::Default => None,
            Layout::Left => Some("Kokkos::LayoutLeft"),
            Layout::Right => Some("Kokkos::LayoutRight"),
        }
    }

    fn from_cpp(param: &str) -> Option<Self> {
        match param {
            "Kokkos::LayoutLeft" => Some(Layout::Left),
            "Kokkos::LayoutRight" => Some(Layout::Right),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MemorySpace {
    #[default]
    Default,
    Host,
    /// Host memory paired with the OpenMP execution space.
    HostDevice,
    Cuda,
    CudaUvm,
    Hip,
}

impl MemorySpace {
    pub fn cpp_name(self) -> &'static str {
        match self {
            MemorySpace::Default => "Kokkos::DefaultExecutionSpace::memory_space",
            MemorySpace::Host => "Kokkos::HostSpace",
            MemorySpace::HostDevice => "Kokkos::Device<Kokkos::OpenMP,Kokkos::HostSpace>",
            MemorySpace::Cuda => "Kokkos::CudaSpace",
            MemorySpace::CudaUvm => "Kokkos::CudaUVMSpace",
            MemorySpace::Hip => "Kokkos::HIPSpace",
        }
    }

    fn from_cpp(param: &str) -> Option<Self> {
        match param {
            "Kokkos::DefaultExecutionSpace::memory_space" => return Some(MemorySpace::Default),
            "Kokkos::Device<Kokkos::OpenMP,Kokkos::HostSpace>" => {
                return Some(MemorySpace::HostDevice)
            }
            "Kokkos::HostSpace" | "Kokkos::OpenMP" | "Kokkos::Serial" | "Kokkos::Threads" => {
                return Some(MemorySpace::Host)
            }
            "Kokkos::CudaSpace" | "Kokkos::Cuda" => return Some(MemorySpace::Cuda),
            "Kokkos::CudaUVMSpace" => return Some(MemorySpace::CudaUvm),
            "Kokkos::HIPSpace" | "Kokkos::HIP" => return Some(MemorySpace::Hip),
            _ => {}
        }
        // Kokkos::Device<Exec, Mem> resolves to its memory space.
        let inner = param
            .strip_prefix("Kokkos::Device<")
            .and_then(|r| r.strip_suffix('>'))?;
        let parts = split_top_level(inner);
        match parts.as_slice() {
            [_, mem] => MemorySpace::from_cpp(mem),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MemoryTrait {
    #[default]
    Default,
    Unmanaged,
    RandomAccess,
    Atomic,
    Restrict,
}

impl MemoryTrait {
    pub fn cpp_name(self) -> Option<&'static str> {
        match self {
            MemoryTrait::Default => None,
            MemoryTrait::Unmanaged => Some("Kokkos::MemoryTraits<Kokkos::Unmanaged>"),
            MemoryTrait::RandomAccess => Some("Kokkos::MemoryTraits<Kokkos::RandomAccess>"),
            MemoryTrait::Atomic => Some("Kokkos::MemoryTraits<Kokkos::Atomic>"),
            MemoryTrait::Restrict => Some("Kokkos::MemoryTraits<Kokkos::Restrict>"),
        }
    }

    fn from_cpp(param: &str) -> Option<Self> {
        let inner = param
            .strip_prefix("Kokkos::MemoryTraits<")
            .and_then(|r| r.strip_suffix('>'))?;
        let inner = inner.strip_prefix("Kokkos::").unwrap_or(inner);
        // Compilers report the trait as its flag value.
        let flag = inner.trim_end_matches(|c: char| c == 'u' || c == 'U');
        match (inner, flag) {
            (_, "0") => Some(MemoryTrait::Default),
            ("Unmanaged", _) | (_, "1") => Some(MemoryTrait::Unmanaged),
            ("RandomAccess", _) | (_, "2") => Some(MemoryTrait::RandomAccess),
            ("Atomic", _) | (_, "4") => Some(MemoryTrait::Atomic),
            ("Restrict", _) | (_, "8") => Some(MemoryTrait::Restrict),
            _ => None,
        }
    }
}

/// Semantic configuration of an array view type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ViewSpec {
    pub dtype: DType,
    pub is_const: bool,
    pub rank: usize,
    pub layout: Layout,
    pub space: MemorySpace,
    pub traits: MemoryTrait,
}

impl ViewSpec {
    pub const MAX_RANK: usize = 7;

    pub fn new(dtype: DType, rank: usize) -> Self {
        Self {
            dtype,
            is_const: false,
            rank,
            layout: Layout::Default,
            space: MemorySpace::Default,
            traits: MemoryTrait::Default,
        }
    }

    pub fn constant(mut self) -> Self {
        self.is_const = true;
        self
    }

    pub fn with_layout(mut self, layout: Layout) -> Self {
        self.layout = layout;
        self
    }

    pub fn with_space(mut self, space: MemorySpace) -> Self {
        self.space = space;
        self
    }

    pub fn with_trait(mut self, traits: MemoryTrait) -> Self {
        self.traits = traits;
        self
    }

    /// Renders the canonical view type.
    ///
    /// # Errors
    /// `TypeError::InvalidRank` unless `1 <= rank <= 7`.
    ///
    /// # Example
    /// ```
    /// # use common::{DType, Layout, ViewSpec};
    /// let spec = ViewSpec::new(DType::Double, 2).with_layout(Layout::Right);
    /// assert_eq!(
    ///     spec.canonical().unwrap().as_str(),
    ///     "Kokkos::View<double**,Kokkos::LayoutRight,Kokkos::DefaultExecutionSpace::memory_space>"
    /// );
    /// ```
    pub fn canonical(&self) -> Result<CanonicalType, TypeError> {
        if !(1..=Self::MAX_RANK).contains(&self.rank) {
            return Err(TypeError::InvalidRank(self.rank));
        }
        let mut dtype = self.dtype.cpp_name().to_string();
        if self.is_const {
            dtype.push_str(" const");
        }
        dtype.push_str(&"*".repeat(self.rank));

        let mut params = vec![dtype];
        if let Some(layout) = self.layout.cpp_name() {
            params.push(layout.to_string());
        }
        params.push(self.space.cpp_name().to_string());
        if let Some(traits) = self.traits.cpp_name() {
            params.push(traits.to_string());
        }
        Ok(CanonicalType::new(format!("Kokkos::View<{}>", params.join(","))))
    }

    /// Recovers a view spec from a native view type name, whatever the compiler's spelling.
    pub fn parse(name: &str) -> Result<Self, TypeError> {
        let unrecognized = || TypeError::UnrecognizedView(name.to_string());
        let normalized = normalize_type_name(name);
        let inner = normalized
            .strip_prefix("Kokkos::View<")
            .and_then(|r| r.strip_suffix('>'))
            .ok_or_else(unrecognized)?;
        let params = split_top_level(inner);
        let (data, rest) = params.split_first().ok_or_else(unrecognized)?;

        let rank = data.chars().rev().take_while(|c| *c == '*').count();
        if !(1..=Self::MAX_RANK).contains(&rank) {
            return Err(TypeError::InvalidRank(rank));
        }
        let base = data.trim_end_matches('*');
        let mut is_const = false;
        let mut words = Vec::new();
        for word in base.split_whitespace() {
            if word == "const" {
                is_const = true;
            } else {
                words.push(word);
            }
        }
        let dtype = DType::from_cpp(&words.join(" ")).ok_or_else(unrecognized)?;

        let mut spec = ViewSpec::new(dtype, rank);
        spec.is_const = is_const;
        for param in rest {
            if let Some(layout) = Layout::from_cpp(param) {
                spec.layout = layout;
            } else if let Some(space) = MemorySpace::from_cpp(param) {
                spec.space = space;
            } else if let Some(traits) = MemoryTrait::from_cpp(param) {
                spec.traits = traits;
            } else {
                return Err(unrecognized());
            }
        }
        Ok(spec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{EnumValue, TypeObject};

    #[test]
    fn test_primitive_mapping() {
        assert_eq!(canonical_type(&Arg::text("a")).unwrap().as_str(), "std::string");
        assert_eq!(canonical_type(&Arg::int(1)).unwrap().as_str(), "int");
        assert_eq!(canonical_type(&Arg::real(1.0)).unwrap().as_str(), "double");
        assert_eq!(canonical_type(&Arg::boolean(true)).unwrap().as_str(), "bool");
        assert_eq!(
            canonical_type(&Arg::Owned(Primitive::Void)).unwrap().as_str(),
            "void"
        );
    }

    #[test]
    fn test_pointer_and_char_ptr_wrappers() {
        let v = Value::from(3i64);
        assert_eq!(canonical_type(&Arg::Ptr(&v)).unwrap().as_str(), "int*");
        assert_eq!(canonical_type(&Arg::char_ptr("abc")).unwrap().as_str(), "char *");
        assert_eq!(canonical_type(&Arg::char_ptr("")).unwrap().as_str(), "char *");
    }

    #[test]
    fn test_enum_falls_back_to_type_name() {
        let arg = Arg::enumerator(EnumValue {
            type_name: "solver::Mode".into(),
            enumerator: Some("Fast".into()),
            value: 1,
        });
        assert_eq!(canonical_type(&arg).unwrap().as_str(), "solver::Mode");
    }

    #[test]
    fn test_type_object_rejected() {
        let t = Value::Type(TypeObject {
            cpp_type: CanonicalType::new("Matrix<double>"),
            class_name: "Matrix".into(),
        });
        assert_eq!(
            canonical_type(&Arg::Value(&t)),
            Err(TypeError::TypeObjectArgument("Matrix<double>".into()))
        );
    }

    #[test]
    fn test_view_defaults_render_space_only() {
        let spec = ViewSpec::new(DType::Int32, 1);
        assert_eq!(
            spec.canonical().unwrap().as_str(),
            "Kokkos::View<int32_t*,Kokkos::DefaultExecutionSpace::memory_space>"
        );
    }

    #[test]
    fn test_view_full_configuration() {
        let spec = ViewSpec::new(DType::Float, 3)
            .constant()
            .with_layout(Layout::Left)
            .with_space(MemorySpace::HostDevice)
            .with_trait(MemoryTrait::Unmanaged);
        assert_eq!(
            spec.canonical().unwrap().as_str(),
            "Kokkos::View<float const***,Kokkos::LayoutLeft,\
             Kokkos::Device<Kokkos::OpenMP,Kokkos::HostSpace>,\
             Kokkos::MemoryTraits<Kokkos::Unmanaged>>"
        );
    }

    #[test]
    fn test_default_attribute_idempotence() {
        let implicit = ViewSpec::new(DType::Double, 2);
        let explicit = ViewSpec::new(DType::Double, 2)
            .with_layout(Layout::Default)
            .with_trait(MemoryTrait::Default)
            .with_space(MemorySpace::Default);
        assert_eq!(implicit.canonical().unwrap(), explicit.canonical().unwrap());
    }

    #[test]
    fn test_rank_bounds() {
        assert_eq!(
            ViewSpec::new(DType::Double, 0).canonical(),
            Err(TypeError::InvalidRank(0))
        );
        assert_eq!(
            ViewSpec::new(DType::Double, 8).canonical(),
            Err(TypeError::InvalidRank(8))
        );
        assert!(ViewSpec::new(DType::Double, 7).canonical().is_ok());
    }

    #[test]
    fn test_view_parse_roundtrip() {
        let specs = [
            ViewSpec::new(DType::UInt64, 1),
            ViewSpec::new(DType::Double, 2)
                .with_layout(Layout::Right)
                .with_space(MemorySpace::Host),
            ViewSpec::new(DType::Int16, 4)
                .constant()
                .with_space(MemorySpace::HostDevice)
                .with_trait(MemoryTrait::Atomic),
        ];
        for spec in specs {
            let name = spec.canonical().unwrap();
            assert_eq!(ViewSpec::parse(name.as_str()).unwrap(), spec);
        }
    }

    #[test]
    fn test_view_parse_compiler_spellings() {
        let spec = ViewSpec::parse(
            "Kokkos::View<long int **, Kokkos::LayoutLeft, Kokkos::HostSpace, Kokkos::MemoryTraits<1u> >",
        )
        .unwrap();
        assert_eq!(spec.dtype, DType::Int64);
        assert_eq!(spec.rank, 2);
        assert_eq!(spec.layout, Layout::Left);
        assert_eq!(spec.space, MemorySpace::Host);
        assert_eq!(spec.traits, MemoryTrait::Unmanaged);

        let spec = ViewSpec::parse("Kokkos::View<const double*, Kokkos::Device<Kokkos::Serial, Kokkos::HostSpace> >")
            .unwrap();
        assert!(spec.is_const);
        assert_eq!(spec.space, MemorySpace::Host);

        let spec = ViewSpec::parse("Kokkos::View<unsigned long*>").unwrap();
        assert_eq!(spec.dtype, DType::UInt64);
        assert_eq!(spec.space, MemorySpace::Default);
    }

    #[test]
    fn test_view_parse_rejects_non_views() {
        assert!(ViewSpec::parse("Matrix<double>").is_err());
        assert!(ViewSpec::parse("Kokkos::View<double>").is_err());
        assert!(ViewSpec::parse("Kokkos::View<std::string*>").is_err());
    }

    #[test]
    fn test_normalize_type_name() {
        assert_eq!(
            normalize_type_name("  Kokkos::View<double *, Kokkos::HostSpace>  "),
            "Kokkos::View<double*,Kokkos::HostSpace>"
        );
        assert_eq!(normalize_type_name("const  char *"), "const char*");
        assert_eq!(normalize_type_name("long unsigned int"), "long unsigned int");
    }

    #[test]
    fn test_bare_class_name() {
        assert_eq!(bare_class_name("Kokkos::View<double*,Kokkos::HostSpace>"), "View");
        assert_eq!(bare_class_name("ns::Outer<int>::Inner<float>"), "Inner");
        assert_eq!(bare_class_name("const Foo &"), "Foo");
        assert_eq!(bare_class_name("Bar*"), "Bar");
    }

    #[test]
    fn test_qualify() {
        assert_eq!(qualify(Some("a::b"), "f"), "a::b::f");
        assert_eq!(qualify(None, "f"), "f");
        assert_eq!(qualify(Some(""), "f"), "f");
    }

    #[test]
    fn test_dtype_spellings() {
        assert_eq!(DType::from_cpp("int"), Some(DType::Int32));
        assert_eq!(DType::from_cpp("long long int"), Some(DType::Int64));
        assert_eq!(DType::from_cpp("unsigned"), Some(DType::UInt32));
        assert_eq!(DType::from_cpp("short unsigned int"), Some(DType::UInt16));
        assert_eq!(DType::from_cpp("std::int16_t"), Some(DType::Int16));
        assert_eq!(DType::from_cpp("char"), None);
    }
}
