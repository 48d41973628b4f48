use crate::model::{Assembly, FunctionTemplate, ImportRecord, StorageMode, TraitTemplate, TypeTemplate};
use std::collections::HashSet;

/// Name of the assembly expected to export the well-known templates.
pub const CORE_ASSEMBLY: &str = "Core";
/// Export name of the canonical pointer wrapper.
pub const POINTER_EXPORT: &str = "Core.Pointer";
/// Export name of the canonical boxing wrapper.
pub const BOX_EXPORT: &str = "Core.Box";

/// Which export table a resolution walks.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
enum Domain {
    Type,
    Function,
    Trait,
}

/// Owns the immutable assembly bundle and answers name and import/export
/// lookups. Requires no synchronization after construction.
pub struct AssemblyRegistry {
    assemblies: Vec<Assembly>,
    pointer_template: Option<usize>,
    box_template: Option<usize>,
}

impl AssemblyRegistry {
    pub fn new(assemblies: Vec<Assembly>) -> Self {
        let mut registry = AssemblyRegistry {
            assemblies,
            pointer_template: None,
            box_template: None,
        };
        registry.find_internal_templates();
        registry
    }

    /// Records the well-known `Core.Pointer` / `Core.Box` template ids.
    /// A missing or malformed export is left unresolved; the error
    /// surfaces on first use.
    fn find_internal_templates(&mut self) {
        let mut pointer = None;
        let mut boxed = None;
        let Some(core) = self.assembly(CORE_ASSEMBLY) else {
            return;
        };
        for e in &core.export_types {
            if e.name == POINTER_EXPORT {
                match core.types.get(e.internal_id) {
                    Some(t) if valid_pointer_template(t) && pointer.is_none() => {
                        pointer = Some(e.internal_id);
                    }
                    _ => return,
                }
            } else if e.name == BOX_EXPORT {
                match core.types.get(e.internal_id) {
                    Some(t) if valid_box_template(t) && boxed.is_none() => {
                        boxed = Some(e.internal_id);
                    }
                    _ => return,
                }
            }
        }
        self.pointer_template = pointer;
        self.box_template = boxed;
    }

    /// Template id of `Core.Pointer`, when the bundle exports one.
    pub fn pointer_template(&self) -> Option<usize> {
        self.pointer_template
    }

    /// Template id of `Core.Box`, when the bundle exports one.
    pub fn box_template(&self) -> Option<usize> {
        self.box_template
    }

    pub fn assembly(&self, name: &str) -> Option<&Assembly> {
        self.assemblies.iter().find(|a| a.name == name)
    }

    pub fn assemblies(&self) -> &[Assembly] {
        &self.assemblies
    }

    pub fn type_template(&self, assembly: &str, id: usize) -> Option<&TypeTemplate> {
        self.assembly(assembly)?.types.get(id)
    }

    pub fn function_template(&self, assembly: &str, id: usize) -> Option<&FunctionTemplate> {
        self.assembly(assembly)?.functions.get(id)
    }

    pub fn trait_template(&self, assembly: &str, id: usize) -> Option<&TraitTemplate> {
        self.assembly(assembly)?.traits.get(id)
    }

    /// Resolves a type import to `(assembly, template id)`, transitively
    /// following re-exports and enforcing declared arities.
    pub fn resolve_type_import(&self, import: &ImportRecord) -> Option<(&str, usize)> {
        self.resolve(Domain::Type, import, &mut HashSet::new())
    }

    pub fn resolve_function_import(&self, import: &ImportRecord) -> Option<(&str, usize)> {
        self.resolve(Domain::Function, import, &mut HashSet::new())
    }

    pub fn resolve_trait_import(&self, import: &ImportRecord) -> Option<(&str, usize)> {
        self.resolve(Domain::Trait, import, &mut HashSet::new())
    }

    /// Looks up an export by assembly and name without a declared arity.
    pub fn find_export_type(&self, assembly: &str, name: &str) -> Option<(&str, usize)> {
        self.resolve_type_import(&ImportRecord::new(assembly, name))
    }

    pub fn find_export_function(&self, assembly: &str, name: &str) -> Option<(&str, usize)> {
        self.resolve_function_import(&ImportRecord::new(assembly, name))
    }

    pub fn find_export_trait(&self, assembly: &str, name: &str) -> Option<(&str, usize)> {
        self.resolve_trait_import(&ImportRecord::new(assembly, name))
    }

    /// Exported constants carry their value in the export record.
    pub fn find_export_constant(&self, assembly: &str, name: &str) -> Option<u32> {
        let a = self.assembly(assembly)?;
        a.export_constants
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.internal_id as u32)
    }

    fn resolve<'a>(
        &'a self,
        domain: Domain,
        import: &ImportRecord,
        visited: &mut HashSet<(String, String)>,
    ) -> Option<(&'a str, usize)> {
        // A re-export chain revisiting an export is malformed; treat it
        // as unresolved.
        if !visited.insert((import.assembly.clone(), import.name.clone())) {
            return None;
        }

        let a = self.assembly(&import.assembly)?;
        let (exports, local_len, imports) = match domain {
            Domain::Type => (&a.export_types, a.types.len(), &a.import_types),
            Domain::Function => (&a.export_functions, a.functions.len(), &a.import_functions),
            Domain::Trait => (&a.export_traits, a.traits.len(), &a.import_traits),
        };

        let e = exports.iter().find(|e| e.name == import.name)?;
        let resolved = if e.internal_id >= local_len {
            let forwarded = imports.get(e.internal_id - local_len)?;
            self.resolve(domain, forwarded, visited)?
        } else {
            (a.name.as_str(), e.internal_id)
        };

        if let Some(arity) = import.generic_params {
            let params = match domain {
                Domain::Type => &self.type_template(resolved.0, resolved.1)?.generic.params,
                Domain::Function => {
                    &self.function_template(resolved.0, resolved.1)?.generic.params
                }
                Domain::Trait => &self.trait_template(resolved.0, resolved.1)?.generic.params,
            };
            if !params.arity_matches(arity) {
                return None;
            }
        }
        Some(resolved)
    }
}

fn valid_pointer_template(t: &TypeTemplate) -> bool {
    t.generic.params.is_single() && t.storage == StorageMode::Value
}

fn valid_box_template(t: &TypeTemplate) -> bool {
    t.generic.params.is_single() && t.storage == StorageMode::Reference
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ExportRecord;
    use aster_utils::SegmentSizes;

    fn plain_value_type() -> TypeTemplate {
        TypeTemplate::new(StorageMode::Value)
    }

    #[test]
    fn transitive_reexport() {
        let mut a = Assembly::named("A");
        a.types.push(plain_value_type());
        a.export_types.push(ExportRecord::new("A.Thing", 0));

        let mut b = Assembly::named("B");
        b.import_types.push(ImportRecord::new("A", "A.Thing"));
        // No local types: internal id 0 forwards to import record 0.
        b.export_types.push(ExportRecord::new("B.Thing", 0));

        let reg = AssemblyRegistry::new(vec![a, b]);
        assert_eq!(reg.find_export_type("B", "B.Thing"), Some(("A", 0)));
        assert_eq!(reg.find_export_type("B", "B.Missing"), None);
    }

    #[test]
    fn reexport_cycle_is_unresolved() {
        let mut a = Assembly::named("A");
        a.import_types.push(ImportRecord::new("B", "B.Thing"));
        a.export_types.push(ExportRecord::new("A.Thing", 0));

        let mut b = Assembly::named("B");
        b.import_types.push(ImportRecord::new("A", "A.Thing"));
        b.export_types.push(ExportRecord::new("B.Thing", 0));

        let reg = AssemblyRegistry::new(vec![a, b]);
        assert_eq!(reg.find_export_type("A", "A.Thing"), None);
    }

    #[test]
    fn arity_enforced_on_imports() {
        let mut a = Assembly::named("A");
        let mut t = plain_value_type();
        t.generic.params = SegmentSizes::fixed(2);
        a.types.push(t);
        a.export_types.push(ExportRecord::new("A.Pair", 0));

        let reg = AssemblyRegistry::new(vec![a]);
        assert_eq!(
            reg.resolve_type_import(&ImportRecord::new("A", "A.Pair").with_arity(2)),
            Some(("A", 0))
        );
        assert_eq!(
            reg.resolve_type_import(&ImportRecord::new("A", "A.Pair").with_arity(1)),
            None
        );
    }

    #[test]
    fn well_known_templates() {
        let mut core = Assembly::named("Core");
        let mut ptr = TypeTemplate::new(StorageMode::Value);
        ptr.generic.params = SegmentSizes::fixed(1);
        core.types.push(ptr);
        let mut boxed = TypeTemplate::new(StorageMode::Reference);
        boxed.generic.params = SegmentSizes::fixed(1);
        core.types.push(boxed);
        core.export_types.push(ExportRecord::new(POINTER_EXPORT, 0));
        core.export_types.push(ExportRecord::new(BOX_EXPORT, 1));

        let reg = AssemblyRegistry::new(vec![core]);
        assert_eq!(reg.pointer_template(), Some(0));
        assert_eq!(reg.box_template(), Some(1));
    }

    #[test]
    fn malformed_pointer_template_is_ignored() {
        let mut core = Assembly::named("Core");
        // Wrong storage mode for a pointer wrapper.
        let mut ptr = TypeTemplate::new(StorageMode::Reference);
        ptr.generic.params = SegmentSizes::fixed(1);
        core.types.push(ptr);
        core.export_types.push(ExportRecord::new(POINTER_EXPORT, 0));

        let reg = AssemblyRegistry::new(vec![core]);
        assert_eq!(reg.pointer_template(), None);
    }
}
