use crate::error::{LoaderError, Result};
use crate::loader::LoaderInner;
use crate::pipeline::compose_subtype_arguments;
use crate::runtime::LoadingArguments;
use aster_assemblies::{AssemblyRegistry, RefKind};
use aster_utils::{MultiList, TypeId};

impl LoaderInner {
    /// Resolves a nested template of `parent` by name, composing the
    /// instantiation request from the parent's arguments plus `extra`.
    /// Returns `None` when the parent declares no such member.
    pub(crate) fn find_subtype(
        &self,
        reg: &AssemblyRegistry,
        parent: TypeId,
        name: &str,
        extra: &MultiList<TypeId>,
    ) -> Result<Option<LoadingArguments>> {
        let parent_args = self
            .lookup_type_args(parent)
            .ok_or_else(|| LoaderError::program("invalid type reference"))?;
        let template = self.find_type_template(reg, &parent_args)?;

        let Some(member) = template.subtypes.iter().find(|m| m.name == name) else {
            return Ok(None);
        };

        let g = &template.generic;
        let i = crate::reflist::resolve_clone_chain(&g.types, member.index)?;
        let entry = g.types[i];
        let (assembly, id) = match entry.kind {
            RefKind::Assembly => (parent_args.assembly.clone(), entry.index),
            RefKind::Import => {
                self.resolve_type_import(reg, &parent_args.assembly, entry.index)?
            }
            _ => return Err(LoaderError::program("invalid subtype reference")),
        };

        let arguments = compose_subtype_arguments(&parent_args.arguments, extra);
        Ok(Some(LoadingArguments::new(assembly, id, arguments)))
    }
}
