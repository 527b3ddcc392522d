//! Proxy generation: reflected descriptors to declarative proxy definitions.

use common::{ClassDescriptor, ProxyClass, ProxyEnum, ProxyFunction, ProxyMember, ProxyModule};

use crate::Reflection;

fn proxy_class(class: &ClassDescriptor) -> ProxyClass {
    let mut members = vec![ProxyMember::Constructor];
    members.extend(class.fields.iter().map(|f| ProxyMember::Field {
        name: f.name.clone(),
        read_only: f.read_only,
        doc: f.doc.clone(),
    }));
    members.extend(
        class
            .methods
            .iter()
            .map(|m| ProxyMember::Method { name: m.name.clone(), doc: m.doc.clone() }),
    );
    members.extend(class.operators.iter().map(|&op| ProxyMember::Operator { op }));
    members.extend(
        class
            .typedefs
            .iter()
            .map(|t| ProxyMember::Alias { name: t.name.clone(), target: t.target.clone() }),
    );
    ProxyClass {
        name: class.name.clone(),
        namespace: class.namespace.clone(),
        is_template: class.is_template,
        parent: class.parent.clone(),
        doc: class.doc.clone(),
        members,
    }
}

/// Builds the proxy module for a reflected header set.
///
/// `includes` and `flags` are carried along so a later session can compile
/// wrappers without the original header set at hand.
pub fn generate(reflection: &Reflection, includes: Vec<String>, flags: Vec<String>) -> ProxyModule {
    ProxyModule {
        includes,
        flags,
        classes: reflection.classes.iter().map(proxy_class).collect(),
        functions: reflection
            .functions
            .iter()
            .map(|g| ProxyFunction {
                name: g.name.clone(),
                namespace: g.namespace.clone(),
                overloads: g.overloads.iter().map(|o| format!("({})", o.params.join(", "))).collect(),
                doc: g.overloads.iter().find_map(|o| o.doc.clone()),
            })
            .collect(),
        enums: reflection
            .enums
            .iter()
            .map(|e| ProxyEnum {
                name: e.name.clone(),
                namespace: e.namespace.clone(),
                enumerators: e.enumerators.clone(),
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reflect_source;
    use common::Operator;

    const HEADER: &str = r#"
namespace geo {
template <typename T>
struct Vec {
    T x;
    const T y;
    T dot(const Vec &o) const;
    T &operator[](int i);
    using scalar = T;
};

template <typename T>
struct Tagged : Vec<T> {
    int tag;
};

/// Euclidean length.
double length(double x, double y);
double length(double x, double y, double z);

enum Axis { X, Y, Z };
}
"#;

    #[test]
    fn test_generate_module() {
        let reflection = reflect_source(HEADER, "geo.hpp").unwrap();
        let module = generate(&reflection, vec!["geo.hpp".into()], vec!["-I/src".into()]);

        let vec = module.class("Vec").unwrap();
        assert_eq!(vec.members[0], ProxyMember::Constructor);
        assert!(vec.members.contains(&ProxyMember::Field { name: "y".into(), read_only: true, doc: None }));
        assert!(vec.members.contains(&ProxyMember::Method { name: "dot".into(), doc: None }));
        assert!(vec.members.contains(&ProxyMember::Alias { name: "scalar".into(), target: "T".into() }));
        assert!(module.has_operator("Vec", Operator::GetItem));
        assert!(module.has_operator("Vec", Operator::SetItem));

        // Inherited members resolve through the parent chain.
        assert_eq!(module.class("Tagged").unwrap().parent.as_deref(), Some("Vec"));
        assert!(module.member("Tagged", "dot").is_some());
        assert!(module.has_operator("Tagged", Operator::GetItem));

        let length = module.function("length").unwrap();
        assert_eq!(length.namespace.as_deref(), Some("geo"));
        assert_eq!(length.overloads, vec!["(double x, double y)", "(double x, double y, double z)"]);
        assert_eq!(length.doc.as_deref(), Some("Euclidean length."));

        assert_eq!(module.enumeration("geo::Axis").unwrap().enumerators, vec!["X", "Y", "Z"]);
        assert_eq!(module.includes, vec!["geo.hpp"]);
        assert_eq!(module.flags, vec!["-I/src"]);
    }
}
