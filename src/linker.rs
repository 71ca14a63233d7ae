//! The Linker (§4.10): joins the unlinked records collected by the
//! classfile-scan phase into the three connected mappings the scan result
//! exposes — type name → `ClassInfo`, package name → `PackageInfo`,
//! module name → `ModuleInfo` — resolving every referenced name to
//! another record's identity. A name referenced but never scanned (an
//! excluded superclass with upward closure disabled, say) still needs a
//! slot to be pointed at, so it gets a placeholder `ClassInfo` carrying no
//! classfile-derived attributes.
//!
//! Cross-references are modeled the same way the Classpath Element arena
//! models its cyclic parent/child graph (§9 Design Notes): stable integer
//! ids into append-only `Vec`s, not `Rc`/`RefCell` pointers, so the
//! result is plain data, trivially `Send`, and free of reference cycles.
use std::sync::Arc;

use indexmap::IndexMap;

use crate::classfile::{FieldRecord, MethodRecord, UnlinkedRecord};
use crate::element::{ClasspathElement, ElementId, ElementKind};
use crate::resource::package_name_of;

pub type ClassId = usize;
pub type PackageId = usize;
pub type ModuleId = usize;

#[derive(Debug, Clone)]
pub struct FieldInfo {
    pub name: String,
    pub descriptor: String,
    pub modifiers: u16,
    pub annotations: Vec<ClassId>,
}

#[derive(Debug, Clone)]
pub struct MethodInfo {
    pub name: String,
    pub descriptor: String,
    pub modifiers: u16,
    pub annotations: Vec<ClassId>,
    pub parameter_annotations: Vec<Vec<ClassId>>,
}

/// A linked class/interface/annotation record. `is_placeholder` is set
/// for a type that was only ever referenced by name — never itself
/// produced by a classfile parse — so its classfile-derived fields (
/// `modifiers`, `superclass`, `interfaces`, `fields`, `methods`) stay at
/// their empty defaults (§4.10, §8 end-to-end scenario 5).
#[derive(Debug, Clone)]
pub struct ClassInfo {
    pub name: String,
    pub modifiers: u16,
    pub superclass: Option<ClassId>,
    pub interfaces: Vec<ClassId>,
    pub annotations: Vec<ClassId>,
    pub fields: Vec<FieldInfo>,
    pub methods: Vec<MethodInfo>,
    pub package: Option<PackageId>,
    pub owning_element: Option<ElementId>,
    pub is_external: bool,
    pub is_placeholder: bool,
}

#[derive(Debug, Clone, Default)]
pub struct PackageInfo {
    pub name: String,
    pub classes: Vec<ClassId>,
}

#[derive(Debug, Clone, Default)]
pub struct ModuleInfo {
    pub name: String,
    pub packages: Vec<PackageId>,
}

/// The immutable, fully-linked output of one scan (§3 "Linked Type
/// Graph"): three resolved mappings built once and never mutated again.
#[derive(Debug, Default)]
pub struct LinkedGraph {
    classes: Vec<ClassInfo>,
    class_by_name: IndexMap<String, ClassId>,
    packages: Vec<PackageInfo>,
    package_by_name: IndexMap<String, PackageId>,
    modules: Vec<ModuleInfo>,
    module_by_name: IndexMap<String, ModuleId>,
}

impl LinkedGraph {
    pub fn class(&self, id: ClassId) -> &ClassInfo {
        &self.classes[id]
    }

    pub fn find_class(&self, name: &str) -> Option<&ClassInfo> {
        self.class_by_name.get(name).map(|&id| &self.classes[id])
    }

    pub fn classes(&self) -> &[ClassInfo] {
        &self.classes
    }

    pub fn package(&self, id: PackageId) -> &PackageInfo {
        &self.packages[id]
    }

    pub fn find_package(&self, name: &str) -> Option<&PackageInfo> {
        self.package_by_name.get(name).map(|&id| &self.packages[id])
    }

    pub fn packages(&self) -> &[PackageInfo] {
        &self.packages
    }

    pub fn module(&self, id: ModuleId) -> &ModuleInfo {
        &self.modules[id]
    }

    pub fn find_module(&self, name: &str) -> Option<&ModuleInfo> {
        self.module_by_name.get(name).map(|&id| &self.modules[id])
    }

    pub fn modules(&self) -> &[ModuleInfo] {
        &self.modules
    }
}

struct Builder {
    classes: Vec<ClassInfo>,
    class_by_name: IndexMap<String, ClassId>,
}

impl Builder {
    fn placeholder(name: &str) -> ClassInfo {
        ClassInfo {
            name: name.to_string(),
            modifiers: 0,
            superclass: None,
            interfaces: Vec::new(),
            annotations: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            package: None,
            owning_element: None,
            is_external: false,
            is_placeholder: true,
        }
    }

    /// Returns the id for `name`, creating a placeholder if this is the
    /// first time it has been referenced (§4.10 "creating placeholder
    /// records on demand for unresolved references").
    fn resolve_or_create(&mut self, name: &str) -> ClassId {
        if let Some(&id) = self.class_by_name.get(name) {
            return id;
        }
        let id = self.classes.len();
        self.classes.push(Self::placeholder(name));
        self.class_by_name.insert(name.to_string(), id);
        id
    }

    fn link_fields(&mut self, fields: &[FieldRecord]) -> Vec<FieldInfo> {
        fields
            .iter()
            .map(|field| FieldInfo {
                name: field.name.clone(),
                descriptor: field.descriptor.clone(),
                modifiers: field.modifiers,
                annotations: field.annotations.iter().map(|n| self.resolve_or_create(n)).collect(),
            })
            .collect()
    }

    fn link_methods(&mut self, methods: &[MethodRecord]) -> Vec<MethodInfo> {
        methods
            .iter()
            .map(|method| MethodInfo {
                name: method.name.clone(),
                descriptor: method.descriptor.clone(),
                modifiers: method.modifiers,
                annotations: method.annotations.iter().map(|n| self.resolve_or_create(n)).collect(),
                parameter_annotations: method
                    .parameter_annotations
                    .iter()
                    .map(|names| names.iter().map(|n| self.resolve_or_create(n)).collect())
                    .collect(),
            })
            .collect()
    }

    /// Materializes a record into the arena: fills in a pre-existing
    /// placeholder slot if this type name was already referenced, or
    /// allocates a fresh one otherwise. Two records for the same type name
    /// should not occur (the Masker already enforced uniqueness per
    /// logical path before this phase ran), so the later one simply
    /// overwrites — this only matters for upward-closure-discovered
    /// placeholders being filled in after the fact.
    fn materialize(&mut self, record: UnlinkedRecord) {
        let superclass = record.superclass.as_deref().map(|n| self.resolve_or_create(n));
        let interfaces: Vec<ClassId> = record.interfaces.iter().map(|n| self.resolve_or_create(n)).collect();
        let annotations: Vec<ClassId> = record.annotations.iter().map(|n| self.resolve_or_create(n)).collect();
        let fields = self.link_fields(&record.fields);
        let methods = self.link_methods(&record.methods);

        let id = self.resolve_or_create(&record.type_name);
        self.classes[id] = ClassInfo {
            name: record.type_name,
            modifiers: record.modifiers,
            superclass,
            interfaces,
            annotations,
            fields,
            methods,
            package: None,
            owning_element: Some(record.owning_element),
            is_external: record.is_external,
            is_placeholder: false,
        };
    }
}

fn module_name_for_element(element_id: ElementId, final_order: &[Arc<ClasspathElement>]) -> Option<String> {
    final_order.iter().find(|e| e.id == element_id).and_then(|element| match &element.kind {
        ElementKind::Module { reference } => Some(reference.name.clone()),
        _ => None,
    })
}

/// Links every collected `UnlinkedRecord` into the three resolved
/// mappings (§4.10). Called exactly once, serially, after the
/// classfile-scan phase (plus any upward closure it triggered) has fully
/// drained.
pub fn link(records: Vec<UnlinkedRecord>, final_order: &[Arc<ClasspathElement>]) -> LinkedGraph {
    let mut builder = Builder {
        classes: Vec::new(),
        class_by_name: IndexMap::new(),
    };
    for record in records {
        builder.materialize(record);
    }

    let mut packages: Vec<PackageInfo> = Vec::new();
    let mut package_by_name: IndexMap<String, PackageId> = IndexMap::new();
    let mut package_of_class: Vec<Option<PackageId>> = vec![None; builder.classes.len()];

    for (id, class) in builder.classes.iter().enumerate() {
        let package_name = package_name_of(&class.name);
        let package_id = *package_by_name.entry(package_name.clone()).or_insert_with(|| {
            packages.push(PackageInfo { name: package_name, classes: Vec::new() });
            packages.len() - 1
        });
        packages[package_id].classes.push(id);
        package_of_class[id] = Some(package_id);
    }

    for (id, class) in builder.classes.iter_mut().enumerate() {
        class.package = package_of_class[id];
    }

    let mut modules: Vec<ModuleInfo> = Vec::new();
    let mut module_by_name: IndexMap<String, ModuleId> = IndexMap::new();
    for class in &builder.classes {
        let Some(owning_element) = class.owning_element else { continue };
        let Some(module_name) = module_name_for_element(owning_element, final_order) else { continue };
        let Some(package_id) = class.package else { continue };

        let module_id = *module_by_name
            .entry(module_name.clone())
            .or_insert_with(|| {
                modules.push(ModuleInfo { name: module_name, packages: Vec::new() });
                modules.len() - 1
            });
        if !modules[module_id].packages.contains(&package_id) {
            modules[module_id].packages.push(package_id);
        }
    }

    LinkedGraph {
        classes: builder.classes,
        class_by_name: builder.class_by_name,
        packages,
        package_by_name,
        modules,
        module_by_name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(type_name: &str, superclass: Option<&str>, interfaces: &[&str]) -> UnlinkedRecord {
        UnlinkedRecord {
            type_name: type_name.to_string(),
            modifiers: 0,
            superclass: superclass.map(str::to_string),
            interfaces: interfaces.iter().map(|s| s.to_string()).collect(),
            annotations: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            owning_element: 0,
            is_external: false,
        }
    }

    #[test]
    fn resolves_superclass_to_a_real_record() {
        let records = vec![
            record("com.x.A", Some("com.x.B"), &[]),
            record("com.x.B", None, &[]),
        ];
        let graph = link(records, &[]);

        let a = graph.find_class("com.x.A").unwrap();
        let super_id = a.superclass.unwrap();
        assert_eq!(graph.class(super_id).name, "com.x.B");
        assert!(!graph.class(super_id).is_placeholder);
    }

    #[test]
    fn unresolved_reference_becomes_a_placeholder() {
        let records = vec![record("a.A", Some("x.B"), &[])];
        let graph = link(records, &[]);

        let a = graph.find_class("a.A").unwrap();
        let b = graph.class(a.superclass.unwrap());
        assert_eq!(b.name, "x.B");
        assert!(b.is_placeholder);
    }

    #[test]
    fn packages_are_materialized_from_membership() {
        let records = vec![
            record("com.x.A", None, &[]),
            record("com.x.B", None, &[]),
            record("org.y.C", None, &[]),
        ];
        let graph = link(records, &[]);

        let pkg = graph.find_package("com.x").unwrap();
        assert_eq!(pkg.classes.len(), 2);
        assert!(graph.find_package("org.y").is_some());
    }

    #[test]
    fn default_package_is_the_empty_string() {
        let records = vec![record("Toplevel", None, &[])];
        let graph = link(records, &[]);
        assert!(graph.find_package("").is_some());
    }
}
