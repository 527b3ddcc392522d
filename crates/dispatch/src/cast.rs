//! Result caster: decoded native results back into host values.
//!
//! Handles whose type decodes as an array view become [`ArrayView`]s; every
//! other handle becomes an [`Instance`] of its bare class name, registering
//! the class on first sight. Each field read and method result is cast on
//! its own, so nested objects are wrapped one level at a time.

use std::rc::Rc;

use common::{
    bare_class_name, normalize_type_name, ArrayView, CanonicalType, EnumValue, Instance, NativeHandle, Primitive,
    Release, Value, ViewSpec,
};
use tracing::debug;
use vault::{ArtifactCache, NativeResult, RawHandle};

use crate::{DispatchError, EnumTable};

/// Who frees a returned handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    /// Results returned by value, constructor results, or pointers the caller
    /// asked to own.
    Owned,
    /// Pointers into storage the native side keeps.
    Borrowed,
}

impl Ownership {
    pub fn of(handle: &RawHandle, take_ownership: bool) -> Self {
        if !handle.is_pointer || take_ownership {
            Ownership::Owned
        } else {
            Ownership::Borrowed
        }
    }
}

pub fn cast(
    cache: &mut ArtifactCache,
    enums: &EnumTable,
    result: NativeResult,
    take_ownership: bool,
) -> Result<Value, DispatchError> {
    Ok(match result {
        NativeResult::Void => Value::Primitive(Primitive::Void),
        NativeResult::Int(v) => Value::Primitive(Primitive::Int(v)),
        NativeResult::Real(v) => Value::Primitive(Primitive::Real(v)),
        NativeResult::Bool(v) => Value::Primitive(Primitive::Bool(v)),
        NativeResult::Text(v) => Value::Primitive(Primitive::Text(v)),
        NativeResult::Enum { type_name, value } => Value::Primitive(Primitive::Enum(enum_value(enums, &type_name, value))),
        NativeResult::Handle(handle) => cast_handle(cache, handle, take_ownership)?,
    })
}

fn enum_value(enums: &EnumTable, type_name: &str, value: i64) -> EnumValue {
    let type_name = normalize_type_name(type_name);
    let enumerator = enums.enumerator(&type_name, value).map(str::to_string);
    let type_name = enums.resolve_type(&type_name).map(str::to_string).unwrap_or(type_name);
    EnumValue { type_name, enumerator, value }
}

fn cast_handle(cache: &mut ArtifactCache, handle: RawHandle, take_ownership: bool) -> Result<Value, DispatchError> {
    if handle.ptr.is_null() {
        debug!(type_name = %handle.type_name, "null handle returned");
        return Ok(Value::Primitive(Primitive::Void));
    }

    let name = normalize_type_name(&handle.type_name);
    let binding = cache.ensure_class(&name)?;
    let native = match Ownership::of(&handle, take_ownership) {
        Ownership::Owned => NativeHandle::owned(handle.ptr, binding as Rc<dyn Release>),
        Ownership::Borrowed => NativeHandle::borrowed(handle.ptr),
    };
    Ok(wrap_handle(name, native, handle.extents))
}

/// Wraps a live handle whose compiler-reported type is `name`.
///
/// The reported spelling stays the value's native type: several spellings
/// decode to the same view spec, and only the reported one names the object
/// actually behind the handle.
fn wrap_handle(name: String, handle: NativeHandle, extents: Vec<usize>) -> Value {
    match ViewSpec::parse(&name) {
        Ok(spec) => Value::View(ArrayView { cpp_type: CanonicalType::new(name), spec, shape: extents, handle }),
        Err(_) => {
            let class_name = bare_class_name(&name);
            Value::Instance(Instance { cpp_type: CanonicalType::new(name), class_name, handle })
        }
    }
}

/// Ties a borrowed handle read out of `parent` to the parent's allocation,
/// so the field stays valid for as long as the returned value lives.
pub fn anchor_to(value: Value, parent: &NativeHandle) -> Value {
    match value {
        Value::Instance(mut inst) if !inst.handle.is_owned() => {
            inst.handle = NativeHandle::borrowed_from(inst.handle.as_ptr(), parent);
            Value::Instance(inst)
        }
        Value::View(mut view) if !view.handle.is_owned() => {
            view.handle = NativeHandle::borrowed_from(view.handle.as_ptr(), parent);
            Value::View(view)
        }
        other => other,
    }
}
