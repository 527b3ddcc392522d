//! # Session: process-scoped binding state
//!
//! A `Session` owns the artifact cache, the reflected proxy module and the
//! enum table for one output directory. Every public call runs the whole
//! pipeline synchronously. `Rc` handles keep a session on one thread.

use std::path::Path;

use anatomist::{load_module, BUILD_DIR};
use common::{
    bare_class_name, qualify, templated_name, value_type, Arg, ArtifactKey, CallSignature, CanonicalType, Instance,
    Operator, Primitive, ProxyMember, ProxyModule, TemplateArg, TypeObject, UnsupportedConstruct, Value, ViewSpec,
};
use forge::{wrapper_source, CallDescription, CallTarget, Compiler};
use tracing::{debug, info};
use vault::{ArtifactCache, BuildContext, BuildStats};

use crate::cast::{anchor_to, cast};
use crate::marshal::{marshal_one, Marshalled};
use crate::{CallOptions, DispatchError, EnumTable};

/// Telemetry bucket of a generated entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CallKind {
    Constructor,
    Kernel,
}

pub struct Session {
    cache: ArtifactCache,
    module: ProxyModule,
    enums: EnumTable,
}

fn describe(value: &Value) -> &'static str {
    match value {
        Value::Primitive(_) => "a primitive",
        Value::View(_) => "an array view",
        Value::Instance(_) => "an instance",
        Value::Type(_) => "a type object",
    }
}

impl Session {
    /// Opens a session over `<output_dir>/kernels.json` and `<output_dir>/build`.
    pub fn open(output_dir: &Path, compiler: Box<dyn Compiler>) -> Result<Self, DispatchError> {
        let module = load_module(output_dir)?;
        Self::with_module(&output_dir.join(BUILD_DIR), module, compiler)
    }

    pub fn with_module(build_dir: &Path, module: ProxyModule, compiler: Box<dyn Compiler>) -> Result<Self, DispatchError> {
        let cache = ArtifactCache::open(build_dir, compiler, BuildContext::from_module(&module))?;
        let enums = EnumTable::from_entries(cache.load_enum_table()?);
        debug!(classes = module.classes.len(), enumerators = enums.len(), "session opened");
        Ok(Self { cache, module, enums })
    }

    pub fn module(&self) -> &ProxyModule {
        &self.module
    }

    pub fn enums(&self) -> &EnumTable {
        &self.enums
    }

    pub fn cache(&self) -> &ArtifactCache {
        &self.cache
    }

    pub fn stats(&self) -> &BuildStats {
        self.cache.stats()
    }

    /// Type object for `ns::name<args>`.
    ///
    /// The namespace comes from reflection when the class is known; `name`
    /// may also be spelled fully qualified. Concrete types are registered
    /// immediately; an uninstantiated template is not a type yet.
    pub fn class(&mut self, name: &str, template_args: Option<&[TemplateArg]>) -> Result<Value, DispatchError> {
        let proxy = self.module.class(name);
        let namespace = proxy.and_then(|c| c.namespace.clone());
        let is_template = proxy.is_some_and(|c| c.is_template);
        let qualified = templated_name(name, namespace.as_deref(), template_args);
        if !is_template || template_args.is_some() {
            self.cache.ensure_class(&qualified)?;
        }
        Ok(Value::Type(TypeObject { cpp_type: CanonicalType::new(qualified), class_name: bare_class_name(name) }))
    }

    /// Type object for an array view configuration.
    pub fn view_type(&self, spec: &ViewSpec) -> Result<Value, DispatchError> {
        Ok(Value::Type(TypeObject { cpp_type: spec.canonical()?, class_name: "View".to_string() }))
    }

    /// Invokes a constructor proxy.
    ///
    /// On a type object this builds a new instance. On an instance that is
    /// already bound it forwards to `operator()` when the class declares one
    /// and is rejected otherwise; constructors run once per instance.
    pub fn construct(&mut self, target: &Value, args: &[Arg<'_>]) -> Result<Value, DispatchError> {
        let ty = match target {
            Value::Type(ty) => ty,
            Value::Instance(inst) if self.module.has_operator(&inst.class_name, Operator::Call) => {
                return self.apply_operator(target, Operator::Call, args)
            }
            Value::Instance(inst) => return Err(UnsupportedConstruct::Reconstruction(inst.class_name.clone()).into()),
            Value::View(view) => return Err(UnsupportedConstruct::Reconstruction(view.cpp_type.to_string()).into()),
            Value::Primitive(_) => return Err(DispatchError::NotAnInstance(describe(target))),
        };

        let marshalled = Marshalled::from_args(args)?;
        let key = CallSignature::constructor(&ty.cpp_type, marshalled.types.clone()).key();
        let target = CallTarget::Constructor { cpp_type: ty.cpp_type.to_string() };
        self.dispatch(key, CallKind::Constructor, target, marshalled, true)
    }

    pub fn call_method(
        &mut self,
        receiver: &Value,
        name: &str,
        args: &[Arg<'_>],
        opts: &CallOptions,
    ) -> Result<Value, DispatchError> {
        if let Value::Instance(inst) = receiver {
            let reflected = self.module.class(&inst.class_name).is_some();
            let found = matches!(self.module.member(&inst.class_name, name), Some(ProxyMember::Method { .. }));
            if reflected && !found {
                return Err(DispatchError::UnknownMember { class: inst.class_name.clone(), member: name.to_string() });
            }
        }
        let receiver_type = bound_type(receiver)?;

        let mut marshalled = Marshalled::new();
        marshalled.push_receiver(receiver)?;
        let mut call_args = Marshalled::from_args(args)?;
        let mut signature = CallSignature::method(&receiver_type, name, call_args.types.clone());
        signature.template_args = opts.template_args.clone();
        let method = match &opts.template_args {
            Some(targs) => format!("template {}", templated_name(name, None, Some(targs))),
            None => name.to_string(),
        };
        marshalled.append(&mut call_args);

        self.dispatch(signature.key(), CallKind::Kernel, CallTarget::Method { name: method }, marshalled, opts.take_ownership)
    }

    pub fn call_function(&mut self, name: &str, args: &[Arg<'_>], opts: &CallOptions) -> Result<Value, DispatchError> {
        let namespace = opts
            .namespace
            .clone()
            .or_else(|| self.module.function(name).and_then(|f| f.namespace.clone()));
        let marshalled = Marshalled::from_args(args)?;
        let signature =
            CallSignature::function(name, namespace.as_deref(), marshalled.types.clone(), opts.template_args.clone());
        let qualified = templated_name(name, namespace.as_deref(), opts.template_args.as_deref());

        self.dispatch(signature.key(), CallKind::Kernel, CallTarget::Function { qualified }, marshalled, opts.take_ownership)
    }

    /// Applies one of the mapped operators with `receiver` as left operand.
    pub fn apply_operator(&mut self, receiver: &Value, op: Operator, args: &[Arg<'_>]) -> Result<Value, DispatchError> {
        let declared = match receiver {
            Value::Instance(inst) => self.module.has_operator(&inst.class_name, op),
            // Views index through operator().
            Value::View(_) => op == Operator::Call,
            other => return Err(DispatchError::NotAnInstance(describe(other))),
        };
        let receiver_type = bound_type(receiver)?;
        if !declared {
            let class = match receiver {
                Value::Instance(inst) => inst.class_name.clone(),
                _ => receiver_type.to_string(),
            };
            return Err(UnsupportedConstruct::UnsupportedOperator { class, operator: op.cpp_name().to_string() }.into());
        }
        if let Some(expected) = op.arity() {
            if expected != args.len() {
                return Err(DispatchError::Arity { op: op.cpp_name(), expected, given: args.len() });
            }
        }

        let mut marshalled = Marshalled::new();
        marshalled.push_receiver(receiver)?;
        let mut call_args = Marshalled::from_args(args)?;
        let key = CallSignature::operator(&receiver_type, op, call_args.types.clone()).key();
        marshalled.append(&mut call_args);
        self.dispatch(key, CallKind::Kernel, CallTarget::Operator(op), marshalled, false)
    }

    pub fn get_field(&mut self, receiver: &Value, field: &str) -> Result<Value, DispatchError> {
        let inst = self.field_owner(receiver, field)?.0;
        let binding = self.cache.ensure_class(inst.cpp_type.as_str())?;
        let result = binding.get_field(inst.handle.as_ptr(), field)?;
        let value = cast(&mut self.cache, &self.enums, result, false)?;
        Ok(anchor_to(value, &inst.handle))
    }

    pub fn set_field(&mut self, receiver: &Value, field: &str, value: Arg<'_>) -> Result<(), DispatchError> {
        let (inst, read_only) = self.field_owner(receiver, field)?;
        if read_only {
            return Err(DispatchError::ReadOnlyField { class: inst.class_name.clone(), field: field.to_string() });
        }
        let marshalled = marshal_one(&value)?;
        let binding = self.cache.ensure_class(inst.cpp_type.as_str())?;
        binding.set_field(inst.handle.as_ptr(), field, &marshalled.raw[0])?;
        Ok(())
    }

    /// Enum value by type name (qualified or unique bare name) and enumerator.
    pub fn enum_value(&self, type_name: &str, enumerator: &str) -> Result<Value, DispatchError> {
        self.enums.value(type_name, enumerator).map(|e| Value::Primitive(Primitive::Enum(e))).ok_or_else(|| {
            DispatchError::UnknownEnum { type_name: type_name.to_string(), enumerator: enumerator.to_string() }
        })
    }

    /// Type object for a nested alias such as `Matrix::row_type`.
    pub fn resolve_alias(&self, class: &str, alias: &str) -> Result<Value, DispatchError> {
        let target = self
            .module
            .resolve_alias(class, alias)
            .ok_or_else(|| DispatchError::UnknownMember { class: class.to_string(), member: alias.to_string() })?;
        Ok(Value::Type(TypeObject {
            cpp_type: CanonicalType::new(qualify(target.namespace.as_deref(), &target.name)),
            class_name: target.name.clone(),
        }))
    }

    fn field_owner<'v>(&self, receiver: &'v Value, field: &str) -> Result<(&'v Instance, bool), DispatchError> {
        let inst = receiver.as_instance().ok_or(DispatchError::NotAnInstance(describe(receiver)))?;
        match self.module.member(&inst.class_name, field) {
            Some(ProxyMember::Field { read_only, .. }) => Ok((inst, *read_only)),
            _ => Err(DispatchError::UnknownMember { class: inst.class_name.clone(), member: field.to_string() }),
        }
    }

    fn dispatch(
        &mut self,
        key: ArtifactKey,
        kind: CallKind,
        target: CallTarget,
        marshalled: Marshalled,
        take_ownership: bool,
    ) -> Result<Value, DispatchError> {
        let specs = marshalled.specs.clone();
        let hash = key.hash.clone();
        let artifact = self.cache.lookup_or_build(&key, move |ctx| {
            wrapper_source(&CallDescription { hash, target, args: specs, includes: ctx.includes.clone() })
        })?;
        let stats = self.cache.stats_mut();
        match kind {
            CallKind::Constructor => stats.record_constructor(&key.signature),
            CallKind::Kernel => stats.record_kernel(&key.signature),
        }
        let result = artifact.invoke(&marshalled.raw)?;
        cast(&mut self.cache, &self.enums, result, take_ownership)
    }
}

/// Native type of a receiver with a handle.
fn bound_type(receiver: &Value) -> Result<CanonicalType, DispatchError> {
    match receiver {
        Value::Instance(_) | Value::View(_) => Ok(value_type(receiver)?),
        other => Err(DispatchError::NotAnInstance(describe(other))),
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let stats = self.cache.stats();
        info!(
            dynamic_compile_time = stats.compile_time.as_secs_f64(),
            num_ctors = stats.num_ctors(),
            num_kernels = stats.num_kernels(),
            compilations = stats.compilations,
            cache_hits = stats.cache_hits,
            "session closed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::c_void;
    use std::path::PathBuf;

    use common::NativeHandle;
    use forge::{BuildError, BuildJob};

    const HEADER: &str = r#"
namespace geo {
struct Cell { int id; };

template <typename T>
struct Grid {
    int nx;
    const int ny;
    T spacing() const;
    T operator()(int i, int j) const;
    using cell_type = Cell;
};

struct Plain { int v; };

double area(double w, double h);
}
"#;

    struct NoCompiler;

    impl Compiler for NoCompiler {
        fn compile(&self, job: &BuildJob<'_>) -> Result<PathBuf, BuildError> {
            Err(BuildError::new(job.artifact.display().to_string(), "error: no toolchain"))
        }
    }

    fn session(dir: &Path) -> Session {
        let reflection = anatomist::reflect_source(HEADER, "geo.hpp").unwrap();
        let module = anatomist::generate(&reflection, vec!["geo.hpp".into()], vec![]);
        Session::with_module(dir, module, Box::new(NoCompiler)).unwrap()
    }

    fn bound(cpp_type: &str, class_name: &str) -> Value {
        Value::Instance(Instance {
            cpp_type: CanonicalType::new(cpp_type),
            class_name: class_name.into(),
            handle: NativeHandle::borrowed(0x1000 as *mut c_void),
        })
    }

    #[test]
    fn test_reconstruction_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = session(dir.path());
        let plain = bound("geo::Plain", "Plain");
        let err = s.construct(&plain, &[Arg::int(1)]).unwrap_err();
        assert!(matches!(err, DispatchError::Unsupported(UnsupportedConstruct::Reconstruction(c)) if c == "Plain"));
        assert_eq!(s.stats().failed_compilations, 0);
    }

    #[test]
    fn test_construct_on_callable_forwards_to_call_operator() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = session(dir.path());
        let grid = bound("geo::Grid<double>", "Grid");
        let err = s.construct(&grid, &[Arg::int(1), Arg::int(2)]).unwrap_err();
        assert!(matches!(err, DispatchError::Build(_)));
        let key = CallSignature::operator(&CanonicalType::new("geo::Grid<double>"), Operator::Call, vec![
            CanonicalType::int(),
            CanonicalType::int(),
        ])
        .key();
        let source = std::fs::read_to_string(dir.path().join(format!("{}.cpp", key.hash))).unwrap();
        assert!(source.contains("return a0(a1, a2);"));
    }

    #[test]
    fn test_operator_guards() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = session(dir.path());
        let plain = bound("geo::Plain", "Plain");
        let err = s.apply_operator(&plain, Operator::Add, &[Arg::int(1)]).unwrap_err();
        assert!(matches!(
            err,
            DispatchError::Unsupported(UnsupportedConstruct::UnsupportedOperator { ref class, .. }) if class == "Plain"
        ));

        let grid = bound("geo::Grid<double>", "Grid");
        assert!(s.apply_operator(&grid, Operator::GetItem, &[Arg::int(1)]).is_err());
        let number = Value::from(3i64);
        assert!(matches!(s.apply_operator(&number, Operator::Add, &[]), Err(DispatchError::NotAnInstance(_))));
    }

    #[test]
    fn test_field_guards() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = session(dir.path());
        let grid = bound("geo::Grid<double>", "Grid");
        assert!(matches!(s.get_field(&grid, "nz"), Err(DispatchError::UnknownMember { .. })));
        assert!(matches!(s.set_field(&grid, "ny", Arg::int(3)), Err(DispatchError::ReadOnlyField { .. })));
        assert!(matches!(s.call_method(&grid, "volume", &[], &CallOptions::new()), Err(DispatchError::UnknownMember { .. })));
    }

    #[test]
    fn test_type_objects() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = session(dir.path());

        // An uninstantiated template is not registered.
        match s.class("Grid", None).unwrap() {
            Value::Type(t) => assert_eq!(t.cpp_type.as_str(), "geo::Grid"),
            other => panic!("expected type object, got {other:?}"),
        }
        assert_eq!(s.stats().failed_compilations, 0);

        // A concrete class is registered right away.
        let args = [TemplateArg::Type(CanonicalType::real())];
        assert!(matches!(s.class("Grid", Some(&args[..])), Err(DispatchError::Build(_))));
        assert_eq!(s.stats().failed_compilations, 1);

        let spec = ViewSpec::new(common::DType::Double, 2);
        match s.view_type(&spec).unwrap() {
            Value::Type(t) => assert_eq!(t.cpp_type, spec.canonical().unwrap()),
            other => panic!("expected type object, got {other:?}"),
        }

        match s.resolve_alias("Grid", "cell_type").unwrap() {
            Value::Type(t) => assert_eq!(t.cpp_type.as_str(), "geo::Cell"),
            other => panic!("expected type object, got {other:?}"),
        }
        assert!(s.resolve_alias("Grid", "nx").is_err());
    }

    #[test]
    fn test_failed_call_is_retried_and_not_counted() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = session(dir.path());
        for _ in 0..2 {
            let err = s.call_function("area", &[Arg::real(2.0), Arg::real(3.0)], &CallOptions::new()).unwrap_err();
            assert!(matches!(err, DispatchError::Build(ref e) if e.diagnostics == "error: no toolchain"));
        }
        assert_eq!(s.stats().failed_compilations, 2);
        assert_eq!(s.stats().num_kernels(), 0);

        let key = CallSignature::function("area", Some("geo"), vec![CanonicalType::real(), CanonicalType::real()], None)
            .key();
        let source = std::fs::read_to_string(dir.path().join(format!("{}.cpp", key.hash))).unwrap();
        assert!(source.contains("return geo::area(a0, a1);"));
    }

    #[test]
    fn test_unknown_enum() {
        let dir = tempfile::tempdir().unwrap();
        let s = session(dir.path());
        assert!(s.enums().is_empty());
        assert!(matches!(s.enum_value("geo::Axis", "X"), Err(DispatchError::UnknownEnum { .. })));
    }
}
