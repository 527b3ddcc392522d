//! Enum value table, loaded once per session from the compiled enum registration.

use std::collections::HashMap;

use common::{normalize_type_name, EnumValue};
use vault::EnumEntry;

#[derive(Debug, Clone, Default)]
pub struct EnumTable {
    /// Qualified type name → enumerators in declaration order.
    types: HashMap<String, Vec<(String, i64)>>,
}

impl EnumTable {
    pub fn from_entries(entries: Vec<EnumEntry>) -> Self {
        let mut types: HashMap<String, Vec<(String, i64)>> = HashMap::new();
        for entry in entries {
            types
                .entry(normalize_type_name(&entry.type_name))
                .or_default()
                .push((entry.enumerator, entry.value));
        }
        Self { types }
    }

    pub fn len(&self) -> usize {
        self.types.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Qualified name for `name`, accepting a unique unqualified suffix.
    pub fn resolve_type(&self, name: &str) -> Option<&str> {
        let name = normalize_type_name(name);
        if let Some((key, _)) = self.types.get_key_value(&name) {
            return Some(key.as_str());
        }
        let suffix = format!("::{name}");
        let mut matches = self.types.keys().filter(|k| k.ends_with(&suffix));
        match (matches.next(), matches.next()) {
            (Some(only), None) => Some(only.as_str()),
            _ => None,
        }
    }

    pub fn value(&self, type_name: &str, enumerator: &str) -> Option<EnumValue> {
        let qualified = self.resolve_type(type_name)?;
        let (_, value) = self.types[qualified].iter().find(|(name, _)| name == enumerator)?;
        Some(EnumValue { type_name: qualified.to_string(), enumerator: Some(enumerator.to_string()), value: *value })
    }

    /// First enumerator of `type_name` holding `value`.
    pub fn enumerator(&self, type_name: &str, value: i64) -> Option<&str> {
        let qualified = self.resolve_type(type_name)?;
        self.types[qualified].iter().find(|(_, v)| *v == value).map(|(name, _)| name.as_str())
    }

    /// Every enumerator of every type, sorted by type then value.
    pub fn rows(&self) -> Vec<(&str, &str, i64)> {
        let mut rows: Vec<(&str, &str, i64)> = self
            .types
            .iter()
            .flat_map(|(ty, values)| values.iter().map(move |(name, v)| (ty.as_str(), name.as_str(), *v)))
            .collect();
        rows.sort_by(|a, b| a.0.cmp(b.0).then(a.2.cmp(&b.2)));
        rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(ty: &str, name: &str, value: i64) -> EnumEntry {
        EnumEntry { type_name: ty.into(), enumerator: name.into(), value }
    }

    fn table() -> EnumTable {
        EnumTable::from_entries(vec![
            entry("solver::Mode", "Fast", 0),
            entry("solver::Mode", "Exact", 4),
            entry("solver::Mode", "Default", 0),
            entry("io::Format", "Csv", 1),
            entry("net::Format", "Json", 1),
        ])
    }

    #[test]
    fn test_lookup_by_qualified_and_suffix() {
        let t = table();
        assert_eq!(t.len(), 5);
        let exact = t.value("solver::Mode", "Exact").unwrap();
        assert_eq!(exact.value, 4);
        assert_eq!(exact.type_name, "solver::Mode");
        assert_eq!(t.value("Mode", "Fast").unwrap().type_name, "solver::Mode");
        assert!(t.value("Mode", "Slow").is_none());
    }

    #[test]
    fn test_ambiguous_suffix_rejected() {
        let t = table();
        assert!(t.resolve_type("Format").is_none());
        assert_eq!(t.resolve_type("io::Format"), Some("io::Format"));
    }

    #[test]
    fn test_reverse_lookup_prefers_first() {
        let t = table();
        assert_eq!(t.enumerator("solver::Mode", 0), Some("Fast"));
        assert_eq!(t.enumerator("solver::Mode", 9), None);
        assert_eq!(t.rows()[0], ("io::Format", "Csv", 1));
    }
}
