//! Host-side value model.
//!
//! A call never inspects values by probing for attributes. Everything the
//! dispatch pipeline can receive or return is one of the four `Value`
//! variants, so canonicalization and result casting are exhaustive matches.

use std::ffi::c_void;
use std::fmt;
use std::rc::Rc;

use crate::canonical::{CanonicalType, ViewSpec};

/// Frees a native object through the artifact that knows its concrete type.
pub trait Release {
    fn release(&self, ptr: *mut c_void);
}

/// One heap object created by a binding artifact, released exactly once.
struct Allocation {
    ptr: *mut c_void,
    owner: Rc<dyn Release>,
}

impl Drop for Allocation {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            self.owner.release(self.ptr);
        }
    }
}

/// A native pointer plus whatever keeps its target alive.
///
/// Owned handles hold the allocation they point at. Handles into a field of
/// another object share that object's allocation, so the parent outlives
/// every field read from it. Plain borrowed handles (pointers into storage
/// the native side keeps) hold nothing.
pub struct NativeHandle {
    ptr: *mut c_void,
    anchor: Option<Rc<Allocation>>,
    /// Set when `anchor` belongs to an enclosing object.
    interior: bool,
}

impl NativeHandle {
    pub fn owned(ptr: *mut c_void, owner: Rc<dyn Release>) -> Self {
        Self {
            ptr,
            anchor: Some(Rc::new(Allocation { ptr, owner })),
            interior: false,
        }
    }

    pub fn borrowed(ptr: *mut c_void) -> Self {
        Self { ptr, anchor: None, interior: false }
    }

    /// A pointer into `parent`'s object, keeping that object alive.
    pub fn borrowed_from(ptr: *mut c_void, parent: &NativeHandle) -> Self {
        Self {
            ptr,
            anchor: parent.anchor.clone(),
            interior: true,
        }
    }

    pub fn as_ptr(&self) -> *mut c_void {
        self.ptr
    }

    /// True when dropping the last handle to this object frees it.
    pub fn is_owned(&self) -> bool {
        self.anchor.is_some() && !self.interior
    }

    /// True when both handles keep the same native object alive.
    pub fn shares_allocation(&self, other: &NativeHandle) -> bool {
        match (&self.anchor, &other.anchor) {
            (Some(a), Some(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for NativeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeHandle")
            .field("ptr", &self.ptr)
            .field("owned", &self.is_owned())
            .finish()
    }
}

/// A value of a reflected enum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumValue {
    /// Namespace-qualified enum type, e.g. `solver::Mode`.
    pub type_name: String,
    pub enumerator: Option<String>,
    pub value: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Primitive {
    Void,
    Bool(bool),
    Int(i64),
    Real(f64),
    Text(String),
    Enum(EnumValue),
}

/// A live multi-dimensional array view.
#[derive(Debug)]
pub struct ArrayView {
    /// Native type name used when this view is passed back as an argument.
    pub cpp_type: CanonicalType,
    pub spec: ViewSpec,
    pub shape: Vec<usize>,
    pub handle: NativeHandle,
}

/// A live instance of a native class.
#[derive(Debug)]
pub struct Instance {
    pub cpp_type: CanonicalType,
    /// Bare class name (no namespace, no template arguments).
    pub class_name: String,
    pub handle: NativeHandle,
}

/// Names a native class without holding an instance of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeObject {
    pub cpp_type: CanonicalType,
    pub class_name: String,
}

#[derive(Debug)]
pub enum Value {
    Primitive(Primitive),
    View(ArrayView),
    Instance(Instance),
    Type(TypeObject),
}

impl Value {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Primitive(Primitive::Int(v)) => Some(*v),
            Value::Primitive(Primitive::Enum(e)) => Some(e.value),
            _ => None,
        }
    }

    pub fn as_real(&self) -> Option<f64> {
        match self {
            Value::Primitive(Primitive::Real(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Primitive(Primitive::Bool(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Primitive(Primitive::Text(v)) => Some(v),
            _ => None,
        }
    }

    pub fn as_instance(&self) -> Option<&Instance> {
        match self {
            Value::Instance(inst) => Some(inst),
            _ => None,
        }
    }

    pub fn as_view(&self) -> Option<&ArrayView> {
        match self {
            Value::View(view) => Some(view),
            _ => None,
        }
    }

    pub fn is_void(&self) -> bool {
        matches!(self, Value::Primitive(Primitive::Void))
    }

    /// Native handle carried by instances and views.
    pub fn handle(&self) -> Option<&NativeHandle> {
        match self {
            Value::Instance(inst) => Some(&inst.handle),
            Value::View(view) => Some(&view.handle),
            Value::Primitive(_) | Value::Type(_) => None,
        }
    }
}

impl From<Primitive> for Value {
    fn from(p: Primitive) -> Self {
        Value::Primitive(p)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Primitive(Primitive::Int(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Primitive(Primitive::Real(v))
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Primitive(Primitive::Bool(v))
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Primitive(Primitive::Text(v.to_string()))
    }
}

impl From<TypeObject> for Value {
    fn from(t: TypeObject) -> Self {
        Value::Type(t)
    }
}

/// One argument of a native call.
#[derive(Debug, Clone)]
pub enum Arg<'a> {
    /// A borrowed host value, passed by value (primitives) or by reference.
    Value(&'a Value),
    /// A primitive literal owned by the argument list.
    Owned(Primitive),
    /// Pass the value by pointer; appends `*` to its canonical type.
    Ptr(&'a Value),
    /// Pass the text as a `char *` buffer.
    CharPtr(String),
}

impl<'a> Arg<'a> {
    pub fn int(v: i64) -> Self {
        Arg::Owned(Primitive::Int(v))
    }

    pub fn real(v: f64) -> Self {
        Arg::Owned(Primitive::Real(v))
    }

    pub fn boolean(v: bool) -> Self {
        Arg::Owned(Primitive::Bool(v))
    }

    pub fn text(v: impl Into<String>) -> Self {
        Arg::Owned(Primitive::Text(v.into()))
    }

    pub fn char_ptr(v: impl Into<String>) -> Self {
        Arg::CharPtr(v.into())
    }

    pub fn enumerator(v: EnumValue) -> Self {
        Arg::Owned(Primitive::Enum(v))
    }
}

impl<'a> From<&'a Value> for Arg<'a> {
    fn from(v: &'a Value) -> Self {
        Arg::Value(v)
    }
}

impl From<i64> for Arg<'_> {
    fn from(v: i64) -> Self {
        Arg::int(v)
    }
}

impl From<f64> for Arg<'_> {
    fn from(v: f64) -> Self {
        Arg::real(v)
    }
}

impl From<bool> for Arg<'_> {
    fn from(v: bool) -> Self {
        Arg::boolean(v)
    }
}

impl From<&str> for Arg<'_> {
    fn from(v: &str) -> Self {
        Arg::text(v)
    }
}
