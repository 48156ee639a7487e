//! Purity-file loading
//!
//! A purity file lists methods that may be treated as derived read-only
//! fields, one `<qualifiedType>;<methodName>` pair per line. Lines
//! starting with `//` are comments. Malformed lines are reported and
//! skipped; they never abort the load.

use rustc_hash::FxHashMap;
use tracing::warn;
use weft_types::{TypeId, TypeTable};

/// Registered pure methods, keyed by qualified type name
#[derive(Debug, Default)]
pub struct PurityStore {
    by_type: FxHashMap<String, Vec<String>>,
}

impl PurityStore {
    /// Empty store: no method is considered pure
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse purity-file text, skipping comments and malformed lines
    pub fn parse(text: &str) -> Self {
        let mut store = Self::new();
        for (line_number, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with("//") {
                continue;
            }
            match line.split_once(';') {
                Some((type_name, method_name))
                    if !type_name.trim().is_empty() && !method_name.trim().is_empty() =>
                {
                    store
                        .by_type
                        .entry(type_name.trim().to_string())
                        .or_default()
                        .push(method_name.trim().to_string());
                }
                _ => {
                    warn!(
                        line = line_number + 1,
                        content = line,
                        "skipping malformed purity entry, expected `Type;method`"
                    );
                }
            }
        }
        store
    }

    /// Number of registered pure methods
    pub fn len(&self) -> usize {
        self.by_type.values().map(Vec::len).sum()
    }

    /// Whether no pure methods are registered
    pub fn is_empty(&self) -> bool {
        self.by_type.is_empty()
    }

    /// Pure methods applicable to a type, including those registered on
    /// its base classes, sorted and deduplicated for deterministic output.
    pub fn pure_methods(&self, table: &TypeTable, ty: TypeId) -> Vec<String> {
        let mut names = Vec::new();
        let mut current = Some(ty);
        while let Some(id) = current {
            let info = table.get(id);
            if let Some(methods) = self.by_type.get(&info.qualified_name) {
                names.extend(methods.iter().cloned());
            }
            current = info.base;
        }
        names.sort();
        names.dedup();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_types::TypeKind;

    #[test]
    fn test_parse_skips_comments_and_malformed() {
        let store = PurityStore::parse(
            "// pure methods for the geometry suite\n\
             geometry.Circle;Area\n\
             \n\
             no-semicolon-here\n\
             ;MissingType\n\
             geometry.Circle;Circumference\n",
        );
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_lookup_includes_base_classes() {
        let mut table = TypeTable::new();
        let shape = table.declare("geometry.Shape", TypeKind::Class);
        let circle = table.declare("geometry.Circle", TypeKind::Class);
        table.get_mut(circle).base = Some(shape);

        let store = PurityStore::parse("geometry.Shape;Area\ngeometry.Circle;Radius\n");
        assert_eq!(store.pure_methods(&table, circle), vec!["Area", "Radius"]);
        assert_eq!(store.pure_methods(&table, shape), vec!["Area"]);
    }

    #[test]
    fn test_empty_store() {
        let table = TypeTable::new();
        let store = PurityStore::new();
        assert!(store.is_empty());
        assert!(store.pure_methods(&table, table.core.string).is_empty());
    }
}
