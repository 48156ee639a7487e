//! Type classification
//!
//! Answers the questions the declaration emitter asks about a runtime
//! type: is it a list/set/map, a linked list, a variant, immutable, and
//! what is its element type. Interface scans are expensive, so every
//! predicate is memoized per type id. All memos are instance state.

use crate::table::TypeTable;
use crate::ty::{TypeId, TypeKind};
use rustc_hash::{FxHashMap, FxHashSet};

const LIST_DEFS: [&str; 2] = ["sys.collections.List`1", "sys.collections.IList`1"];
const SET_DEFS: [&str; 2] = ["sys.collections.HashSet`1", "sys.collections.ISet`1"];
const MAP_DEFS: [&str; 2] = ["sys.collections.HashMap`2", "sys.collections.IMap`2"];

/// Memoizing classifier over a [`TypeTable`]
#[derive(Debug, Default)]
pub struct TypeClassifier {
    list_memo: FxHashMap<TypeId, bool>,
    set_memo: FxHashMap<TypeId, bool>,
    map_memo: FxHashMap<TypeId, bool>,
    linked_memo: FxHashMap<TypeId, bool>,
    variant_memo: FxHashMap<TypeId, bool>,
    immutable_memo: FxHashMap<TypeId, bool>,
    /// Types currently on the immutability recursion stack; assumed
    /// immutable until proven otherwise so cycles terminate
    immutable_in_progress: FxHashSet<TypeId>,
}

impl TypeClassifier {
    /// Create an empty classifier
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the type is a list (arrays count as lists)
    pub fn is_list(&mut self, table: &TypeTable, ty: TypeId) -> bool {
        if let Some(&known) = self.list_memo.get(&ty) {
            return known;
        }
        let result = table.get(ty).kind == TypeKind::Array
            || implements_any(table, ty, &LIST_DEFS)
            || implements_any(table, ty, &SET_DEFS)
            || implements_any(table, ty, &MAP_DEFS);
        self.list_memo.insert(ty, result);
        result
    }

    /// Whether the type is a set
    pub fn is_set(&mut self, table: &TypeTable, ty: TypeId) -> bool {
        if let Some(&known) = self.set_memo.get(&ty) {
            return known;
        }
        let result = implements_any(table, ty, &SET_DEFS);
        self.set_memo.insert(ty, result);
        result
    }

    /// Whether the type is a map
    pub fn is_map(&mut self, table: &TypeTable, ty: TypeId) -> bool {
        if let Some(&known) = self.map_memo.get(&ty) {
            return known;
        }
        let result = implements_any(table, ty, &MAP_DEFS);
        self.map_memo.insert(ty, result);
        result
    }

    /// Whether the type is a tagged variant
    pub fn is_variant(&mut self, table: &TypeTable, ty: TypeId) -> bool {
        if let Some(&known) = self.variant_memo.get(&ty) {
            return known;
        }
        let result = table.get(ty).kind == TypeKind::Variant;
        self.variant_memo.insert(ty, result);
        result
    }

    /// Element type of an array or known collection
    pub fn element_type(&mut self, table: &TypeTable, ty: TypeId) -> Option<TypeId> {
        table.get(ty).element
    }

    /// Linked-list heuristic: exactly one declared instance field whose
    /// type equals the containing type.
    ///
    /// This is a heuristic, not interface-derived: a tree node with a
    /// single parent pointer also qualifies. Core runtime types are
    /// excluded to avoid false positives on box/reference wrappers.
    pub fn is_linked_list(&mut self, table: &TypeTable, ty: TypeId) -> bool {
        if let Some(&known) = self.linked_memo.get(&ty) {
            return known;
        }
        let info = table.get(ty);
        let result = !info.is_core_runtime()
            && info.instance_fields().filter(|f| f.ty == ty).count() == 1;
        self.linked_memo.insert(ty, result);
        result
    }

    /// The single self-typed field that forms the linked-list spine
    pub fn linked_list_field<'t>(
        &mut self,
        table: &'t TypeTable,
        ty: TypeId,
    ) -> Option<&'t crate::ty::FieldInfo> {
        if !self.is_linked_list(table, ty) {
            return None;
        }
        table.get(ty).instance_fields().find(|f| f.ty == ty)
    }

    /// Whether the type is immutable: primitive, or every field is const
    /// or readonly-and-itself-immutable, and no property has a setter.
    pub fn is_immutable(&mut self, table: &TypeTable, ty: TypeId) -> bool {
        if let Some(&known) = self.immutable_memo.get(&ty) {
            return known;
        }
        if self.immutable_in_progress.contains(&ty) {
            // Cycle through a self-referential field: assume immutable;
            // the outer frame settles the final answer
            return true;
        }
        let info = table.get(ty);
        if info.kind == TypeKind::Primitive {
            self.immutable_memo.insert(ty, true);
            return true;
        }
        self.immutable_in_progress.insert(ty);
        let mut result = info.properties.iter().all(|p| !p.has_setter);
        if result {
            for field in &info.fields {
                let field_ok = field.is_const
                    || (field.is_readonly && self.is_immutable(table, field.ty));
                if !field_ok {
                    result = false;
                    break;
                }
            }
        }
        self.immutable_in_progress.remove(&ty);
        self.immutable_memo.insert(ty, result);
        result
    }
}

/// Whether `ty` is, implements, or derives from any of the named
/// collection definitions (directly or through an instantiation).
fn implements_any(table: &TypeTable, ty: TypeId, def_names: &[&str]) -> bool {
    let defs: Vec<TypeId> = def_names.iter().filter_map(|n| table.lookup(n)).collect();
    let mut visited = FxHashSet::default();
    matches_defs(table, ty, &defs, &mut visited)
}

fn matches_defs(
    table: &TypeTable,
    ty: TypeId,
    defs: &[TypeId],
    visited: &mut FxHashSet<TypeId>,
) -> bool {
    if !visited.insert(ty) {
        return false;
    }
    let info = table.get(ty);
    if defs.contains(&ty) {
        return true;
    }
    if let Some(def) = info.generic_def {
        if defs.contains(&def) {
            return true;
        }
    }
    if let Some(base) = info.base {
        if matches_defs(table, base, defs, visited) {
            return true;
        }
    }
    info.interfaces
        .iter()
        .any(|&i| matches_defs(table, i, defs, visited))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ty::{FieldInfo, PropertyInfo, TypeInfo};

    fn field(name: &str, ty: TypeId) -> FieldInfo {
        FieldInfo {
            name: name.to_string(),
            ty,
            is_static: false,
            is_readonly: false,
            is_const: false,
            is_synthesized: false,
            is_event_backing: false,
            is_public: true,
        }
    }

    #[test]
    fn test_list_classification() {
        let mut table = TypeTable::new();
        let mut classifier = TypeClassifier::new();
        let list_def = table.lookup("sys.collections.List`1").unwrap();
        let int32 = table.core.int32;
        let list_int = table.instantiate(list_def, &[int32]).unwrap();

        assert!(classifier.is_list(&table, list_int));
        assert!(!classifier.is_set(&table, list_int));
        assert!(!classifier.is_map(&table, list_int));
        assert_eq!(classifier.element_type(&table, list_int), Some(int32));
    }

    #[test]
    fn test_array_is_list() {
        let mut table = TypeTable::new();
        let mut classifier = TypeClassifier::new();
        let arr = table.array_of(table.core.int32, 1);
        assert!(classifier.is_list(&table, arr));
    }

    #[test]
    fn test_map_is_also_list_flattened() {
        let mut table = TypeTable::new();
        let mut classifier = TypeClassifier::new();
        let map_def = table.lookup("sys.collections.HashMap`2").unwrap();
        let k = table.core.string;
        let v = table.core.int32;
        let map = table.instantiate(map_def, &[k, v]).unwrap();
        assert!(classifier.is_list(&table, map));
        assert!(classifier.is_map(&table, map));
    }

    #[test]
    fn test_classification_idempotent() {
        let mut table = TypeTable::new();
        let mut classifier = TypeClassifier::new();
        let list_def = table.lookup("sys.collections.List`1").unwrap();
        let int32 = table.core.int32;
        let list_int = table.instantiate(list_def, &[int32]).unwrap();

        let first = (
            classifier.is_list(&table, list_int),
            classifier.is_set(&table, list_int),
            classifier.is_map(&table, list_int),
            classifier.is_linked_list(&table, list_int),
            classifier.is_immutable(&table, list_int),
        );
        let second = (
            classifier.is_list(&table, list_int),
            classifier.is_set(&table, list_int),
            classifier.is_map(&table, list_int),
            classifier.is_linked_list(&table, list_int),
            classifier.is_immutable(&table, list_int),
        );
        assert_eq!(first, second);
    }

    #[test]
    fn test_linked_list_heuristic() {
        let mut table = TypeTable::new();
        let mut classifier = TypeClassifier::new();

        let node = table.declare("m.Node", TypeKind::Class);
        table.add_field(node, field("value", table.core.int32));
        table.add_field(node, field("next", node));
        assert!(classifier.is_linked_list(&table, node));
        assert_eq!(
            classifier.linked_list_field(&table, node).unwrap().name,
            "next"
        );

        // Two self-typed fields disqualify the type
        let tree = table.declare("m.Tree", TypeKind::Class);
        table.add_field(tree, field("left", tree));
        table.add_field(tree, field("right", tree));
        assert!(!classifier.is_linked_list(&table, tree));

        // Zero self-typed fields disqualify the type
        let plain = table.declare("m.Plain", TypeKind::Class);
        table.add_field(plain, field("x", table.core.int32));
        assert!(!classifier.is_linked_list(&table, plain));
    }

    #[test]
    fn test_core_runtime_excluded_from_linked_list() {
        let mut table = TypeTable::new();
        let mut classifier = TypeClassifier::new();
        let boxed = table.declare("sys.Box", TypeKind::Class);
        table.add_field(boxed, field("inner", boxed));
        assert!(!classifier.is_linked_list(&table, boxed));
    }

    #[test]
    fn test_immutability() {
        let mut table = TypeTable::new();
        let mut classifier = TypeClassifier::new();

        assert!(classifier.is_immutable(&table, table.core.int32));
        assert!(classifier.is_immutable(&table, table.core.string));

        let frozen = table.declare("m.Frozen", TypeKind::Class);
        let mut f = field("n", table.core.int32);
        f.is_readonly = true;
        table.add_field(frozen, f);
        assert!(classifier.is_immutable(&table, frozen));

        let open = table.declare("m.Open", TypeKind::Class);
        table.add_field(open, field("n", table.core.int32));
        assert!(!classifier.is_immutable(&table, open));

        let with_setter = table.declare("m.WithSetter", TypeKind::Class);
        let int32 = table.core.int32;
        table.get_mut(with_setter).properties.push(PropertyInfo {
            name: "N".to_string(),
            ty: int32,
            has_setter: true,
        });
        assert!(!classifier.is_immutable(&table, with_setter));
    }

    #[test]
    fn test_immutability_cycle_terminates() {
        let mut table = TypeTable::new();
        let mut classifier = TypeClassifier::new();
        let node = table.declare("m.ImmutableNode", TypeKind::Class);
        let mut next = field("next", node);
        next.is_readonly = true;
        let mut value = field("value", table.core.int32);
        value.is_readonly = true;
        table.add_field(node, next);
        table.add_field(node, value);
        assert!(classifier.is_immutable(&table, node));
    }
}
