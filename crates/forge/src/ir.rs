//! Structured C++ source model.
//!
//! Generated wrappers are assembled from these nodes and rendered by a
//! small printer, so no emitter ever concatenates raw source text.

use std::fmt::{self, Write as _};

const INDENT: &str = "    ";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Include {
    System(String),
    Local(String),
}

impl fmt::Display for Include {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Include::System(h) => write!(f, "#include <{h}>"),
            Include::Local(h) => write!(f, "#include \"{h}\""),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Div,
    Eq,
}

impl BinOp {
    fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Div => "/",
            BinOp::Eq => "==",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Ident(String),
    Str(String),
    Int(i64),
    Call { callee: Box<Expr>, args: Vec<Expr> },
    Member { receiver: Box<Expr>, name: String },
    Template { base: Box<Expr>, args: Vec<String> },
    Binary { op: BinOp, lhs: Box<Expr>, rhs: Box<Expr> },
    Index { target: Box<Expr>, index: Box<Expr> },
    Deref(Box<Expr>),
    AddressOf(Box<Expr>),
    New { ty: String, args: Vec<Expr> },
    Delete(Box<Expr>),
    StaticCast { ty: String, expr: Box<Expr> },
    /// `[&] { return body; }`
    Lambda(Box<Expr>),
    /// `{a, b, c}` aggregate initializer.
    Brace(Vec<Expr>),
}

impl Expr {
    pub fn ident(name: impl Into<String>) -> Self {
        Expr::Ident(name.into())
    }

    pub fn string(s: impl Into<String>) -> Self {
        Expr::Str(s.into())
    }

    pub fn call(self, args: Vec<Expr>) -> Self {
        Expr::Call { callee: Box::new(self), args }
    }

    pub fn member(self, name: impl Into<String>) -> Self {
        Expr::Member { receiver: Box::new(self), name: name.into() }
    }

    pub fn template(self, args: Vec<String>) -> Self {
        Expr::Template { base: Box::new(self), args }
    }

    pub fn binary(op: BinOp, lhs: Expr, rhs: Expr) -> Self {
        Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) }
    }

    pub fn index(self, index: Expr) -> Self {
        Expr::Index { target: Box::new(self), index: Box::new(index) }
    }

    pub fn deref(self) -> Self {
        Expr::Deref(Box::new(self))
    }

    pub fn address_of(self) -> Self {
        Expr::AddressOf(Box::new(self))
    }

    pub fn static_cast(ty: impl Into<String>, expr: Expr) -> Self {
        Expr::StaticCast { ty: ty.into(), expr: Box::new(expr) }
    }

    pub fn lambda(body: Expr) -> Self {
        Expr::Lambda(Box::new(body))
    }

    fn is_compound(&self) -> bool {
        matches!(
            self,
            Expr::Binary { .. } | Expr::Deref(_) | Expr::AddressOf(_) | Expr::New { .. } | Expr::Delete(_)
        )
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, items: &[Expr]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

/// Wraps compound operands of postfix and unary operators in parentheses.
struct Operand<'a>(&'a Expr);

impl fmt::Display for Operand<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_compound() {
            write!(f, "({})", self.0)
        } else {
            write!(f, "{}", self.0)
        }
    }
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            other => out.push(other),
        }
    }
    out
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Ident(name) => f.write_str(name),
            Expr::Str(s) => write!(f, "\"{}\"", escape(s)),
            Expr::Int(n) => write!(f, "{n}"),
            Expr::Call { callee, args } => {
                write!(f, "{}(", Operand(callee))?;
                write_list(f, args)?;
                f.write_str(")")
            }
            Expr::Member { receiver, name } => write!(f, "{}.{name}", Operand(receiver)),
            Expr::Template { base, args } => {
                // `>>` closes fine in C++11 and later; keep the output compact.
                write!(f, "{}<{}>", Operand(base), args.join(", "))
            }
            Expr::Binary { op, lhs, rhs } => {
                write!(f, "{} {} {}", Operand(lhs), op.symbol(), Operand(rhs))
            }
            Expr::Index { target, index } => write!(f, "{}[{index}]", Operand(target)),
            Expr::Deref(e) => write!(f, "*{}", Operand(e)),
            Expr::AddressOf(e) => write!(f, "&{}", Operand(e)),
            Expr::New { ty, args } => {
                write!(f, "new {ty}(")?;
                write_list(f, args)?;
                f.write_str(")")
            }
            Expr::Delete(e) => write!(f, "delete {}", Operand(e)),
            Expr::StaticCast { ty, expr } => write!(f, "static_cast<{ty}>({expr})"),
            Expr::Lambda(body) => write!(f, "[&] {{ return {body}; }}"),
            Expr::Brace(items) => {
                f.write_str("{")?;
                write_list(f, items)?;
                f.write_str("}")
            }
        }
    }
}

/// How a local is bound to its initializer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding {
    Value,
    Reference,
    Pointer,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Let { ty: String, binding: Binding, name: String, init: Expr },
    Expr(Expr),
    Assign { target: Expr, value: Expr },
    Return(Option<Expr>),
    If { cond: Expr, then: Vec<Stmt> },
}

impl Stmt {
    pub fn let_value(ty: impl Into<String>, name: impl Into<String>, init: Expr) -> Self {
        Stmt::Let { ty: ty.into(), binding: Binding::Value, name: name.into(), init }
    }

    pub fn let_ref(ty: impl Into<String>, name: impl Into<String>, init: Expr) -> Self {
        Stmt::Let { ty: ty.into(), binding: Binding::Reference, name: name.into(), init }
    }

    pub fn let_ptr(ty: impl Into<String>, name: impl Into<String>, init: Expr) -> Self {
        Stmt::Let { ty: ty.into(), binding: Binding::Pointer, name: name.into(), init }
    }

    pub fn ret(e: Expr) -> Self {
        Stmt::Return(Some(e))
    }

    fn render(&self, out: &mut String, depth: usize) {
        let pad = INDENT.repeat(depth);
        match self {
            Stmt::Let { ty, binding, name, init } => {
                let sigil = match binding {
                    Binding::Value => " ",
                    Binding::Reference => " &",
                    Binding::Pointer => " *",
                };
                let _ = writeln!(out, "{pad}{ty}{sigil}{name} = {init};");
            }
            Stmt::Expr(e) => {
                let _ = writeln!(out, "{pad}{e};");
            }
            Stmt::Assign { target, value } => {
                let _ = writeln!(out, "{pad}{target} = {value};");
            }
            Stmt::Return(None) => {
                let _ = writeln!(out, "{pad}return;");
            }
            Stmt::Return(Some(e)) => {
                let _ = writeln!(out, "{pad}return {e};");
            }
            Stmt::If { cond, then } => {
                let _ = writeln!(out, "{pad}if ({cond}) {{");
                for s in then {
                    s.render(out, depth + 1);
                }
                let _ = writeln!(out, "{pad}}}");
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub ty: String,
    pub name: String,
}

impl Param {
    pub fn new(ty: impl Into<String>, name: impl Into<String>) -> Self {
        Self { ty: ty.into(), name: name.into() }
    }
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.ty.ends_with('*') || self.ty.ends_with('&') {
            write!(f, "{}{}", self.ty, self.name)
        } else {
            write!(f, "{} {}", self.ty, self.name)
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    /// `template <...>` parameter declarations, e.g. `typename T`.
    pub template: Option<Vec<String>>,
    /// `extern "C" BIND_EXPORT` linkage.
    pub exported: bool,
    pub is_static: bool,
    pub ret: String,
    pub name: String,
    pub params: Vec<Param>,
    pub body: Vec<Stmt>,
}

impl Function {
    pub fn new(ret: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            template: None,
            exported: false,
            is_static: false,
            ret: ret.into(),
            name: name.into(),
            params: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn exported(ret: impl Into<String>, name: impl Into<String>) -> Self {
        Self { exported: true, ..Self::new(ret, name) }
    }

    pub fn param(mut self, ty: impl Into<String>, name: impl Into<String>) -> Self {
        self.params.push(Param::new(ty, name));
        self
    }

    pub fn body(mut self, body: Vec<Stmt>) -> Self {
        self.body = body;
        self
    }

    fn render(&self, out: &mut String, depth: usize) {
        let pad = INDENT.repeat(depth);
        if let Some(params) = &self.template {
            let _ = writeln!(out, "{pad}template <{}>", params.join(", "));
        }
        let mut head = String::new();
        if self.exported {
            head.push_str("extern \"C\" BIND_EXPORT ");
        }
        if self.is_static {
            head.push_str("static ");
        }
        let params: Vec<String> = self.params.iter().map(ToString::to_string).collect();
        let sep = if self.ret.ends_with('*') { "" } else { " " };
        let _ = writeln!(out, "{pad}{head}{}{sep}{}({}) {{", self.ret, self.name, params.join(", "));
        for stmt in &self.body {
            stmt.render(out, depth + 1);
        }
        let _ = writeln!(out, "{pad}}}");
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Struct {
    pub template: Option<Vec<String>>,
    pub name: String,
    pub functions: Vec<Function>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StaticArray {
    pub ty: String,
    pub name: String,
    pub rows: Vec<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    Function(Function),
    Struct(Struct),
    Array(StaticArray),
}

impl Item {
    fn render(&self, out: &mut String) {
        match self {
            Item::Function(func) => func.render(out, 0),
            Item::Struct(s) => {
                if let Some(params) = &s.template {
                    let _ = writeln!(out, "template <{}>", params.join(", "));
                }
                let _ = writeln!(out, "struct {} {{", s.name);
                for (i, func) in s.functions.iter().enumerate() {
                    if i > 0 {
                        out.push('\n');
                    }
                    func.render(out, 1);
                }
                out.push_str("};\n");
            }
            Item::Array(a) => {
                let _ = writeln!(out, "static const {} {}[] = {{", a.ty, a.name);
                for row in &a.rows {
                    let _ = writeln!(out, "{INDENT}{row},");
                }
                out.push_str("};\n");
            }
        }
    }
}

impl From<Function> for Item {
    fn from(f: Function) -> Self {
        Item::Function(f)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TranslationUnit {
    pub pragma_once: bool,
    pub includes: Vec<Include>,
    pub items: Vec<Item>,
}

impl TranslationUnit {
    pub fn new(includes: Vec<Include>) -> Self {
        Self { pragma_once: false, includes, items: Vec::new() }
    }

    pub fn push(&mut self, item: impl Into<Item>) {
        self.items.push(item.into());
    }

    pub fn render(&self) -> String {
        let mut out = String::from("// Generated binding source. Do not edit.\n");
        if self.pragma_once {
            out.push_str("#pragma once\n");
        }
        out.push('\n');
        for include in &self.includes {
            let _ = writeln!(out, "{include}");
        }
        for item in &self.items {
            out.push('\n');
            item.render(&mut out);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expression_rendering() {
        let call = Expr::ident("ops::add")
            .template(vec!["double".into(), "3".into()])
            .call(vec![Expr::ident("a0"), Expr::ident("a1")]);
        assert_eq!(call.to_string(), "ops::add<double, 3>(a0, a1)");

        let cmp = Expr::binary(
            BinOp::Eq,
            Expr::ident("std::strcmp").call(vec![Expr::ident("field"), Expr::string("rows")]),
            Expr::Int(0),
        );
        assert_eq!(cmp.to_string(), "std::strcmp(field, \"rows\") == 0");

        let deref_member = Expr::ident("p").deref().member("x");
        assert_eq!(deref_member.to_string(), "(*p).x");

        let lambda = Expr::lambda(Expr::ident("bind_target").call(vec![Expr::ident("args")]));
        assert_eq!(lambda.to_string(), "[&] { return bind_target(args); }");
    }

    #[test]
    fn test_string_escaping() {
        assert_eq!(Expr::string("a\"b\\c").to_string(), r#""a\"b\\c""#);
    }

    #[test]
    fn test_function_rendering() {
        let func = Function::exported("int", "f_00")
            .param("const bind_value *", "args")
            .param("size_t", "nargs")
            .body(vec![
                Stmt::let_ref("Matrix<double>", "a0", Expr::ident("bind::deref<Matrix<double>>").call(vec![])),
                Stmt::If { cond: Expr::ident("ok"), then: vec![Stmt::ret(Expr::Int(0))] },
                Stmt::Return(Some(Expr::Int(1))),
            ]);
        let mut unit = TranslationUnit::new(vec![Include::Local("bind_abi.hpp".into())]);
        unit.push(func);
        let text = unit.render();
        assert!(text.contains("#include \"bind_abi.hpp\"\n"));
        assert!(text.contains("extern \"C\" BIND_EXPORT int f_00(const bind_value *args, size_t nargs) {\n"));
        assert!(text.contains("    Matrix<double> &a0 = bind::deref<Matrix<double>>();\n"));
        assert!(text.contains("    if (ok) {\n        return 0;\n    }\n"));
    }

    #[test]
    fn test_struct_and_array_rendering() {
        let mut unit = TranslationUnit { pragma_once: true, ..TranslationUnit::default() };
        unit.push(Item::Struct(Struct {
            template: Some(vec!["class T_".into()]),
            name: "bind_class_Point".into(),
            functions: vec![Function { is_static: true, ..Function::new("int", "get") }],
        }));
        unit.push(Item::Array(StaticArray {
            ty: "bind_enum_entry".into(),
            name: "table".into(),
            rows: vec![Expr::Brace(vec![Expr::string("E"), Expr::string("A"), Expr::Int(0)])],
        }));
        let text = unit.render();
        assert!(text.contains("#pragma once\n"));
        assert!(text.contains("template <class T_>\nstruct bind_class_Point {\n    static int get() {\n    }\n};\n"));
        assert!(text.contains("static const bind_enum_entry table[] = {\n    {\"E\", \"A\", 0},\n};\n"));
    }
}
