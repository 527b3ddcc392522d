//! Wrapper source emitters.
//!
//! Each emitter returns a [`TranslationUnit`]; nothing here touches the
//! filesystem except [`write_source`].

use std::io;
use std::path::{Path, PathBuf};

use common::{EnumDescriptor, FieldDescriptor, Operator};

use crate::abi::{self, ENUM_COUNT_SYMBOL, ENUM_ENTRIES_SYMBOL, PRELUDE_FILE};
use crate::ir::{BinOp, Expr, Function, Include, Item, StaticArray, Stmt, Struct, TranslationUnit};
use crate::EmitError;

/// Internal-linkage function holding the actual call expression.
const TARGET_FN: &str = "bind_target";

/// What the generated entry point calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallTarget {
    /// Free function, spelled fully qualified with any explicit template arguments.
    Function { qualified: String },
    /// Heap construction of `cpp_type`; the artifact returns the new pointer.
    Constructor { cpp_type: String },
    /// Method on the first argument.
    Method { name: String },
    /// Operator with the first argument as left operand.
    Operator(Operator),
}

/// How one argument is materialized from its `bind_value`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgPassing {
    /// Primitive read by value.
    Value,
    /// Bound instance, passed as `T&`.
    Reference,
    /// Bound instance, passed as `T*`.
    Pointer,
    /// Primitive stored in a local, passed by address.
    ///
    /// Copy-in only: writes through the pointer land in the local and are
    /// not reported back to the caller.
    PointerToValue,
    /// Text passed as a mutable C string.
    Text,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgSpec {
    /// Base C++ type, without the pointer sigil for pointer passing.
    pub cpp_type: String,
    pub passing: ArgPassing,
}

impl ArgSpec {
    pub fn new(cpp_type: impl Into<String>, passing: ArgPassing) -> Self {
        Self { cpp_type: cpp_type.into(), passing }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallDescription {
    /// Artifact hash; doubles as the exported entry point name.
    pub hash: String,
    pub target: CallTarget,
    pub args: Vec<ArgSpec>,
    /// Header names of the bound library.
    pub includes: Vec<String>,
}

fn base_includes(includes: &[String]) -> Vec<Include> {
    std::iter::once(Include::Local(PRELUDE_FILE.to_string()))
        .chain(includes.iter().map(|h| Include::Local(h.clone())))
        .collect()
}

/// `bind::<name><ty>(slot)`.
fn prelude_call(name: &str, ty: &str, slot: Expr) -> Expr {
    Expr::ident(format!("bind::{name}")).template(vec![ty.to_string()]).call(vec![slot])
}

fn materialize(index: usize, arg: &ArgSpec, body: &mut Vec<Stmt>) -> Expr {
    let name = format!("a{index}");
    let slot = Expr::ident("args").index(Expr::Int(index as i64));
    let ty = &arg.cpp_type;
    match arg.passing {
        ArgPassing::Value => {
            body.push(Stmt::let_value(ty, &name, prelude_call("read", ty, slot)));
            Expr::ident(name)
        }
        ArgPassing::Reference => {
            body.push(Stmt::let_ref(ty, &name, prelude_call("deref", ty, slot)));
            Expr::ident(name)
        }
        ArgPassing::Pointer => {
            body.push(Stmt::let_ptr(ty, &name, prelude_call("pointer", ty, slot)));
            Expr::ident(name)
        }
        ArgPassing::PointerToValue => {
            let storage = format!("s{index}");
            body.push(Stmt::let_value(ty, &storage, prelude_call("read", ty, slot)));
            body.push(Stmt::let_ptr(ty, &name, Expr::ident(storage).address_of()));
            Expr::ident(name)
        }
        ArgPassing::Text => {
            body.push(Stmt::let_value("std::string", &name, prelude_call("read", "std::string", slot)));
            Expr::ident(name).member("data").call(vec![])
        }
    }
}

fn operator_statement(op: Operator, operands: Vec<Expr>) -> Result<Stmt, EmitError> {
    let expected = op.arity().map(|n| n + 1);
    if expected.is_some_and(|n| n != operands.len()) || operands.is_empty() {
        return Err(EmitError::OperandCount {
            op: op.cpp_name(),
            expected: expected.unwrap_or(1),
            given: operands.len(),
        });
    }
    let mut operands = operands.into_iter();
    let receiver = operands.next().ok_or(EmitError::MissingReceiver)?;
    if op == Operator::Call {
        return Ok(Stmt::ret(receiver.call(operands.collect())));
    }
    let first = operands.next().unwrap_or(Expr::Int(0));
    Ok(match op {
        Operator::Add => Stmt::ret(Expr::binary(BinOp::Add, receiver, first)),
        Operator::Sub => Stmt::ret(Expr::binary(BinOp::Sub, receiver, first)),
        Operator::GetItem => Stmt::ret(receiver.index(first)),
        Operator::SetItem => Stmt::Assign {
            target: receiver.index(first),
            value: operands.next().unwrap_or(Expr::Int(0)),
        },
        Operator::Deref | Operator::Call => Stmt::ret(receiver.deref()),
    })
}

/// Builds the translation unit for one call signature.
///
/// The unit defines a `bind_target` function holding the call, the exported
/// entry point `<hash>` and the return probe `<hash>_probe`.
///
/// # Errors
/// Returns [`EmitError`] when a member or operator call has no receiver or an
/// operator receives the wrong number of operands.
pub fn wrapper_source(call: &CallDescription) -> Result<TranslationUnit, EmitError> {
    let mut body = Vec::new();
    let operands: Vec<Expr> = call
        .args
        .iter()
        .enumerate()
        .map(|(i, arg)| materialize(i, arg, &mut body))
        .collect();

    let statement = match &call.target {
        CallTarget::Function { qualified } => Stmt::ret(Expr::ident(qualified.clone()).call(operands)),
        CallTarget::Constructor { cpp_type } => Stmt::ret(Expr::New { ty: cpp_type.clone(), args: operands }),
        CallTarget::Method { name } => {
            let mut operands = operands.into_iter();
            let receiver = operands.next().ok_or(EmitError::MissingReceiver)?;
            Stmt::ret(receiver.member(name.clone()).call(operands.collect()))
        }
        CallTarget::Operator(op) => operator_statement(*op, operands)?,
    };
    body.push(statement);

    let mut unit = TranslationUnit::new(base_includes(&call.includes));
    unit.push(Function {
        is_static: true,
        ..Function::new("auto", TARGET_FN).param("const bind_value *", "args").body(body)
    });

    let target_call = Expr::ident(TARGET_FN).call(vec![Expr::ident("args")]);
    unit.push(
        Function::exported("int", &call.hash)
            .param("const bind_value *", "args")
            .param("size_t", "nargs")
            .param("bind_value *", "out")
            .body(vec![Stmt::ret(Expr::ident("bind::invoke").call(vec![
                Expr::Int(call.args.len() as i64),
                Expr::ident("nargs"),
                Expr::ident("out"),
                Expr::lambda(target_call),
            ]))]),
    );
    unit.push(Function::exported("bind_probe", abi::probe_symbol(&call.hash)).body(vec![Stmt::ret(
        Expr::ident("bind::probe").template(vec![format!("decltype({TARGET_FN}(nullptr))")]).call(vec![]),
    )]));
    Ok(unit)
}

/// Name of the accessor template generated for a reflected class.
pub fn accessor_name(class: &str) -> String {
    format!("bind_class_{class}")
}

/// File name of the accessor header generated for a reflected class.
pub fn accessor_header(class: &str) -> String {
    format!("{class}.hpp")
}

/// Registration unit for one concrete class type.
///
/// Always exports `<hash>_drop` and `<hash>_cpp_type`. Field accessors
/// forward to the class's accessor template when `reflected` names one and
/// otherwise report every field as unknown.
pub fn class_registration(hash: &str, qualified: &str, reflected: Option<&str>, includes: &[String]) -> TranslationUnit {
    let mut headers = base_includes(includes);
    if let Some(class) = reflected {
        headers.push(Include::Local(accessor_header(class)));
    }
    let mut unit = TranslationUnit::new(headers);

    unit.push(
        Function::exported("void", abi::drop_symbol(hash))
            .param("void *", "self")
            .body(vec![Stmt::Expr(Expr::Delete(Box::new(Expr::static_cast(
                format!("{qualified} *"),
                Expr::ident("self"),
            ))))]),
    );
    unit.push(
        Function::exported("const char *", abi::cpp_type_symbol(hash))
            .body(vec![Stmt::ret(Expr::string(qualified))]),
    );

    let forward = |method: &str, last: &str| match reflected {
        Some(class) => vec![Stmt::ret(Expr::ident("bind::guard").call(vec![Expr::lambda(
            Expr::ident(format!("{}<{qualified}>::{method}", accessor_name(class))).call(vec![
                Expr::ident("self"),
                Expr::ident("field"),
                Expr::ident(last),
            ]),
        )]))],
        None => vec![Stmt::ret(Expr::Int(i64::from(abi::STATUS_UNKNOWN_FIELD)))],
    };
    unit.push(
        Function::exported("int", abi::get_symbol(hash))
            .param("void *", "self")
            .param("const char *", "field")
            .param("bind_value *", "out")
            .body(forward("get", "out")),
    );
    unit.push(
        Function::exported("int", abi::set_symbol(hash))
            .param("void *", "self")
            .param("const char *", "field")
            .param("const bind_value *", "value")
            .body(forward("set", "value")),
    );
    unit
}

fn field_matches(field: &str) -> Expr {
    Expr::binary(
        BinOp::Eq,
        Expr::ident("std::strcmp").call(vec![Expr::ident("field"), Expr::string(field)]),
        Expr::Int(0),
    )
}

fn self_binding() -> Stmt {
    Stmt::let_ref("T_", "obj", Expr::static_cast("T_ *", Expr::ident("self")).deref())
}

/// Accessor header for a reflected class.
///
/// `fields` should include inherited ones; member access on the concrete
/// type resolves them. Read-only fields get no setter branch.
pub fn class_header(class: &str, fields: &[FieldDescriptor], includes: &[String]) -> TranslationUnit {
    let mut get_body = vec![self_binding()];
    let mut set_body = vec![self_binding()];
    for field in fields {
        let access = Expr::ident("obj").member(field.name.clone());
        get_body.push(Stmt::If {
            cond: field_matches(&field.name),
            then: vec![
                Stmt::Expr(Expr::ident("bind::ret_field").call(vec![Expr::ident("out"), access.clone()])),
                Stmt::ret(Expr::Int(0)),
            ],
        });
        if !field.read_only {
            set_body.push(Stmt::If {
                cond: field_matches(&field.name),
                then: vec![
                    Stmt::Expr(
                        Expr::ident("bind::assign").call(vec![access, Expr::ident("value").deref()]),
                    ),
                    Stmt::ret(Expr::Int(0)),
                ],
            });
        }
    }
    let unknown = Stmt::ret(Expr::Int(i64::from(abi::STATUS_UNKNOWN_FIELD)));
    get_body.push(unknown.clone());
    set_body.push(unknown);

    let accessor = |name: &str, last: (&str, &str), body: Vec<Stmt>| Function {
        is_static: true,
        ..Function::new("int", name)
            .param("void *", "self")
            .param("const char *", "field")
            .param(last.0, last.1)
            .body(body)
    };

    let mut unit = TranslationUnit { pragma_once: true, ..TranslationUnit::new(base_includes(includes)) };
    unit.push(Item::Struct(Struct {
        template: Some(vec!["class T_".to_string()]),
        name: accessor_name(class),
        functions: vec![
            accessor("get", ("bind_value *", "out"), get_body),
            accessor("set", ("const bind_value *", "value"), set_body),
        ],
    }));
    unit
}

/// Consolidated enum table exported by the `_kernel_enums` artifact.
pub fn enum_registration(enums: &[EnumDescriptor], includes: &[String]) -> TranslationUnit {
    let rows = enums
        .iter()
        .flat_map(|e| {
            let qualified = e.qualified_name();
            e.enumerators.iter().map(move |field| {
                Expr::Brace(vec![
                    Expr::string(qualified.clone()),
                    Expr::string(field.clone()),
                    Expr::static_cast("int64_t", Expr::ident(format!("{qualified}::{field}"))),
                ])
            })
        })
        .collect();

    let table = "bind_enum_table";
    let mut unit = TranslationUnit::new(base_includes(includes));
    unit.push(Item::Array(StaticArray { ty: "bind_enum_entry".into(), name: table.into(), rows }));
    unit.push(Function::exported("size_t", ENUM_COUNT_SYMBOL).body(vec![Stmt::ret(Expr::binary(
        BinOp::Div,
        Expr::ident("sizeof").call(vec![Expr::ident(table)]),
        Expr::ident("sizeof").call(vec![Expr::ident(table).index(Expr::Int(0))]),
    ))]));
    unit.push(
        Function::exported("const bind_enum_entry *", ENUM_ENTRIES_SYMBOL)
            .body(vec![Stmt::ret(Expr::ident(table))]),
    );
    unit
}

/// Source path of the artifact `stem` inside `build_dir`.
pub fn source_path(build_dir: &Path, stem: &str) -> PathBuf {
    build_dir.join(format!("{stem}.cpp"))
}

/// Writes `unit` to `path` through a temporary sibling so readers never see a partial file.
pub fn write_source(path: &Path, unit: &TranslationUnit) -> io::Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    std::fs::write(&tmp, unit.render())?;
    std::fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn includes() -> Vec<String> {
        vec!["arith.hpp".to_string()]
    }

    fn render(call: CallDescription) -> String {
        wrapper_source(&call).unwrap().render()
    }

    #[test]
    fn test_free_function_wrapper() {
        let text = render(CallDescription {
            hash: "f_abc".into(),
            target: CallTarget::Function { qualified: "ops::add<double>".into() },
            args: vec![ArgSpec::new("int", ArgPassing::Value), ArgSpec::new("double", ArgPassing::Value)],
            includes: includes(),
        });
        assert!(text.contains("#include \"bind_abi.hpp\"\n#include \"arith.hpp\"\n"));
        assert!(text.contains("static auto bind_target(const bind_value *args) {\n"));
        assert!(text.contains("    int a0 = bind::read<int>(args[0]);\n"));
        assert!(text.contains("    double a1 = bind::read<double>(args[1]);\n"));
        assert!(text.contains("    return ops::add<double>(a0, a1);\n"));
        assert!(text.contains(
            "extern \"C\" BIND_EXPORT int f_abc(const bind_value *args, size_t nargs, bind_value *out) {\n"
        ));
        assert!(text.contains("return bind::invoke(2, nargs, out, [&] { return bind_target(args); });"));
        assert!(text.contains("extern \"C\" BIND_EXPORT bind_probe f_abc_probe() {\n"));
        assert!(text.contains("return bind::probe<decltype(bind_target(nullptr))>();"));
    }

    #[test]
    fn test_constructor_and_method_wrappers() {
        let ctor = render(CallDescription {
            hash: "f_1".into(),
            target: CallTarget::Constructor { cpp_type: "Matrix<double>".into() },
            args: vec![ArgSpec::new("int", ArgPassing::Value)],
            includes: includes(),
        });
        assert!(ctor.contains("return new Matrix<double>(a0);"));

        let method = render(CallDescription {
            hash: "f_2".into(),
            target: CallTarget::Method { name: "resize".into() },
            args: vec![
                ArgSpec::new("Matrix<double>", ArgPassing::Reference),
                ArgSpec::new("long", ArgPassing::PointerToValue),
            ],
            includes: includes(),
        });
        assert!(method.contains("Matrix<double> &a0 = bind::deref<Matrix<double>>(args[0]);"));
        assert!(method.contains("long s1 = bind::read<long>(args[1]);\n    long *a1 = &s1;"));
        assert!(method.contains("return a0.resize(a1);"));
        assert!(!method.contains("args[1] ="));
    }

    #[test]
    fn test_text_and_pointer_arguments() {
        let text = render(CallDescription {
            hash: "f_3".into(),
            target: CallTarget::Function { qualified: "log".into() },
            args: vec![ArgSpec::new("char", ArgPassing::Text), ArgSpec::new("Grid", ArgPassing::Pointer)],
            includes: vec![],
        });
        assert!(text.contains("std::string a0 = bind::read<std::string>(args[0]);"));
        assert!(text.contains("Grid *a1 = bind::pointer<Grid>(args[1]);"));
        assert!(text.contains("return log(a0.data(), a1);"));
    }

    #[test]
    fn test_operator_wrappers() {
        let op = |op: Operator, n: usize| {
            let args = (0..n).map(|_| ArgSpec::new("Vec", ArgPassing::Reference)).collect();
            wrapper_source(&CallDescription {
                hash: "f_op".into(),
                target: CallTarget::Operator(op),
                args,
                includes: vec![],
            })
        };
        assert!(op(Operator::Add, 2).unwrap().render().contains("return a0 + a1;"));
        assert!(op(Operator::Sub, 2).unwrap().render().contains("return a0 - a1;"));
        assert!(op(Operator::GetItem, 2).unwrap().render().contains("return a0[a1];"));
        let set = op(Operator::SetItem, 3).unwrap().render();
        assert!(set.contains("    a0[a1] = a2;\n"));
        assert!(!set.contains("return a0[a1]"));
        assert!(op(Operator::Deref, 1).unwrap().render().contains("return *a0;"));
        assert!(op(Operator::Call, 4).unwrap().render().contains("return a0(a1, a2, a3);"));
        assert!(op(Operator::Add, 1).is_err());
        assert!(op(Operator::Call, 0).is_err());
    }

    #[test]
    fn test_method_without_receiver_is_rejected() {
        let result = wrapper_source(&CallDescription {
            hash: "f_4".into(),
            target: CallTarget::Method { name: "size".into() },
            args: vec![],
            includes: vec![],
        });
        assert!(matches!(result, Err(EmitError::MissingReceiver)));
    }

    #[test]
    fn test_class_registration() {
        let reflected = class_registration("f_c", "Matrix<double>", Some("Matrix"), &includes()).render();
        assert!(reflected.contains("#include \"Matrix.hpp\""));
        assert!(reflected.contains("delete static_cast<Matrix<double> *>(self);"));
        assert!(reflected.contains("extern \"C\" BIND_EXPORT const char *f_c_cpp_type() {\n    return \"Matrix<double>\";"));
        assert!(reflected.contains("bind_class_Matrix<Matrix<double>>::get(self, field, out)"));
        assert!(reflected.contains("bind_class_Matrix<Matrix<double>>::set(self, field, value)"));

        let opaque = class_registration("f_d", "Grid", None, &includes()).render();
        assert!(!opaque.contains("Grid.hpp"));
        assert!(opaque.contains("f_d_get(void *self, const char *field, bind_value *out) {\n    return -1;"));
    }

    #[test]
    fn test_class_header_respects_read_only() {
        let fields = vec![
            FieldDescriptor { name: "rows".into(), type_name: "int".into(), read_only: true, doc: None },
            FieldDescriptor { name: "scale".into(), type_name: "double".into(), read_only: false, doc: None },
        ];
        let text = class_header("Matrix", &fields, &includes()).render();
        assert!(text.contains("#pragma once"));
        assert!(text.contains("template <class T_>\nstruct bind_class_Matrix {"));
        assert!(text.contains("T_ &obj = *static_cast<T_ *>(self);"));
        assert!(text.contains("bind::ret_field(out, obj.rows);"));
        assert!(text.contains("bind::ret_field(out, obj.scale);"));
        assert!(text.contains("bind::assign(obj.scale, *value);"));
        assert!(!text.contains("bind::assign(obj.rows"));
    }

    #[test]
    fn test_enum_registration() {
        let enums = vec![EnumDescriptor {
            name: "Mode".into(),
            namespace: Some("solver".into()),
            enumerators: vec!["Fast".into(), "Exact".into()],
        }];
        let text = enum_registration(&enums, &includes()).render();
        assert!(text.contains(
            "{\"solver::Mode\", \"Fast\", static_cast<int64_t>(solver::Mode::Fast)},"
        ));
        assert!(text.contains("static_cast<int64_t>(solver::Mode::Exact)"));
        assert!(text.contains("size_t _kernel_enums_count() {\n    return sizeof(bind_enum_table) / sizeof(bind_enum_table[0]);"));
        assert!(text.contains("const bind_enum_entry *_kernel_enums_entries() {"));
    }

    #[test]
    fn test_write_source_replaces_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let path = source_path(dir.path(), "f_x");
        let unit = class_registration("f_x", "Grid", None, &[]);
        write_source(&path, &unit).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), unit.render());
        assert!(!path.with_extension("cpp.tmp").exists());
    }
}
