//! Argument marshalling: host arguments to canonical types, emitter
//! argument specs and ABI values.

use std::ffi::CString;

use common::canonical::primitive_type;
use common::{canonical_type, value_type, Arg, CanonicalType, Primitive, TypeError, Value};
use forge::{ArgPassing, ArgSpec, RawValue};

/// ABI values for one call, plus the text buffers they point into.
#[derive(Debug, Default)]
pub struct Marshalled {
    pub types: Vec<CanonicalType>,
    pub specs: Vec<ArgSpec>,
    pub raw: Vec<RawValue>,
    text: Vec<CString>,
}

impl Marshalled {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marshals `args` in call-site order.
    pub fn from_args(args: &[Arg<'_>]) -> Result<Self, TypeError> {
        let mut m = Self::new();
        for arg in args {
            m.push(arg)?;
        }
        Ok(m)
    }

    /// Adds a bound receiver, passed by reference.
    pub fn push_receiver(&mut self, receiver: &Value) -> Result<(), TypeError> {
        self.push(&Arg::Value(receiver))
    }

    /// Moves every argument of `other` to the end of `self`.
    pub fn append(&mut self, other: &mut Marshalled) {
        self.types.append(&mut other.types);
        self.specs.append(&mut other.specs);
        self.raw.append(&mut other.raw);
        self.text.append(&mut other.text);
    }

    pub fn push(&mut self, arg: &Arg<'_>) -> Result<(), TypeError> {
        let ty = canonical_type(arg)?;
        let (spec, raw) = match arg {
            Arg::Owned(p) => (ArgSpec::new(ty.as_str(), ArgPassing::Value), self.primitive(p)?),
            Arg::Value(Value::Primitive(p)) => (ArgSpec::new(ty.as_str(), ArgPassing::Value), self.primitive(p)?),
            Arg::Value(v) => (ArgSpec::new(ty.as_str(), ArgPassing::Reference), handle_of(v)?),
            Arg::Ptr(Value::Primitive(p)) => {
                (ArgSpec::new(primitive_type(p).as_str(), ArgPassing::PointerToValue), self.primitive(p)?.pointer_tagged())
            }
            Arg::Ptr(v) => {
                let base = value_type(v)?;
                (ArgSpec::new(base.as_str(), ArgPassing::Pointer), handle_of(v)?.pointer_tagged())
            }
            Arg::CharPtr(s) => (ArgSpec::new(ty.as_str(), ArgPassing::Text), self.text(s)?),
        };
        self.types.push(ty);
        self.specs.push(spec);
        self.raw.push(raw);
        Ok(())
    }

    fn primitive(&mut self, p: &Primitive) -> Result<RawValue, TypeError> {
        Ok(match p {
            Primitive::Void => return Err(TypeError::VoidArgument),
            Primitive::Bool(b) => RawValue::boolean(*b),
            Primitive::Int(i) => RawValue::int(*i),
            Primitive::Real(d) => RawValue::real(*d),
            Primitive::Text(s) => self.text(s)?,
            Primitive::Enum(e) => RawValue::enumeration(e.value),
        })
    }

    fn text(&mut self, s: &str) -> Result<RawValue, TypeError> {
        let owned = CString::new(s).map_err(|_| TypeError::InteriorNul)?;
        // The heap buffer does not move when `self.text` grows.
        let raw = RawValue::text(owned.as_ptr());
        self.text.push(owned);
        Ok(raw)
    }
}

fn handle_of(value: &Value) -> Result<RawValue, TypeError> {
    match value.handle() {
        Some(handle) => Ok(RawValue::handle(handle.as_ptr())),
        None => Err(TypeError::TypeObjectArgument(value_type(value).map(|t| t.to_string()).unwrap_or_default())),
    }
}

/// A single ABI value, as passed to a field setter.
pub fn marshal_one(arg: &Arg<'_>) -> Result<Marshalled, TypeError> {
    Marshalled::from_args(std::slice::from_ref(arg))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::{c_void, CStr};

    use common::{EnumValue, Instance, NativeHandle};
    use forge::abi::tag;

    fn instance(ptr: usize) -> Value {
        Value::Instance(Instance {
            cpp_type: CanonicalType::new("geo::Grid<double,2>"),
            class_name: "Grid".into(),
            handle: NativeHandle::borrowed(ptr as *mut c_void),
        })
    }

    #[test]
    fn test_primitives_by_value() {
        let m = Marshalled::from_args(&[Arg::int(2), Arg::real(0.5), Arg::boolean(true), Arg::text("hi")]).unwrap();
        let types: Vec<&str> = m.types.iter().map(CanonicalType::as_str).collect();
        assert_eq!(types, vec!["int", "double", "bool", "std::string"]);
        assert!(m.specs.iter().all(|s| s.passing == ArgPassing::Value));
        assert_eq!(m.raw[0].tag, tag::INT);
        assert_eq!(m.raw[1].d, 0.5);
        assert_eq!(m.raw[2].i, 1);
        assert_eq!(unsafe { CStr::from_ptr(m.raw[3].s) }.to_str().unwrap(), "hi");
    }

    #[test]
    fn test_instances_by_reference_and_pointer() {
        let grid = instance(0x40);
        let m = Marshalled::from_args(&[Arg::Value(&grid), Arg::Ptr(&grid)]).unwrap();
        assert_eq!(m.types[0].as_str(), "geo::Grid<double,2>");
        assert_eq!(m.types[1].as_str(), "geo::Grid<double,2>*");
        assert_eq!(m.specs[0], ArgSpec::new("geo::Grid<double,2>", ArgPassing::Reference));
        assert_eq!(m.specs[1], ArgSpec::new("geo::Grid<double,2>", ArgPassing::Pointer));
        assert_eq!(m.raw[0].p as usize, 0x40);
        assert_eq!(m.raw[1].is_pointer, 1);
    }

    #[test]
    fn test_pointer_to_primitive_and_char_pointer() {
        let n = Value::from(7i64);
        let m = Marshalled::from_args(&[Arg::Ptr(&n), Arg::char_ptr("buf")]).unwrap();
        assert_eq!(m.types[0].as_str(), "int*");
        assert_eq!(m.specs[0], ArgSpec::new("int", ArgPassing::PointerToValue));
        assert_eq!(m.raw[0].i, 7);
        assert_eq!(m.types[1].as_str(), "char *");
        assert_eq!(m.specs[1].passing, ArgPassing::Text);
    }

    #[test]
    fn test_enum_argument_uses_type_name() {
        let mode = EnumValue { type_name: "solver::Mode".into(), enumerator: Some("Fast".into()), value: 2 };
        let m = Marshalled::from_args(&[Arg::enumerator(mode)]).unwrap();
        assert_eq!(m.types[0].as_str(), "solver::Mode");
        assert_eq!(m.raw[0].tag, tag::ENUM);
        assert_eq!(m.raw[0].i, 2);
    }

    #[test]
    fn test_rejections() {
        let void = Value::from(Primitive::Void);
        assert_eq!(Marshalled::from_args(&[Arg::Value(&void)]).unwrap_err(), TypeError::VoidArgument);
        assert_eq!(Marshalled::from_args(&[Arg::text("a\0b")]).unwrap_err(), TypeError::InteriorNul);
    }

    #[test]
    fn test_receiver_first() {
        let grid = instance(0x80);
        let mut m = Marshalled::new();
        m.push_receiver(&grid).unwrap();
        m.push(&Arg::int(1)).unwrap();
        assert_eq!(m.raw.len(), 2);
        assert_eq!(m.specs[0].passing, ArgPassing::Reference);
    }
}
