use crate::constraint::build::TraitCtx;
use crate::constraint::node::SolverRoot;
use crate::constraint::ConstraintCache;
use crate::error::{LoaderError, Result};
use crate::loader::LoaderInner;
use crate::reflist::RefContext;
use aster_assemblies::generics::{GenericDeclaration, RefKind};
use aster_assemblies::AssemblyRegistry;
use aster_utils::{FunctionId, TypeId};

impl LoaderInner {
    /// After a constraint succeeds, binds every `Constraint`-kind
    /// RefList entry named under `"<export_name>/"` to the member it
    /// refers to. Unresolved exports are silently omitted.
    pub(crate) fn collect_exports(
        &mut self,
        reg: &AssemblyRegistry,
        root: &mut SolverRoot,
        cache: &ConstraintCache<'_>,
        g: &GenericDeclaration,
        out: &mut crate::runtime::ConstraintExportList,
    ) -> Result<()> {
        if cache.source.export_name.is_empty() {
            return Ok(());
        }
        let prefix = format!("{}/", cache.source.export_name);

        for (i, entry) in g.types.iter().enumerate() {
            if entry.kind != RefKind::Constraint {
                continue;
            }
            let name = g
                .name(entry.index)
                .ok_or_else(|| LoaderError::program("invalid name reference"))?;
            if let Some(rest) = name.strip_prefix(&prefix) {
                let rest = rest.to_string();
                if let Some(ty) = self.find_export_type(reg, root, cache, &rest)? {
                    out.types.push((i, ty));
                }
            }
        }
        for (i, entry) in g.functions.iter().enumerate() {
            if entry.kind != RefKind::Constraint {
                continue;
            }
            let name = g
                .name(entry.index)
                .ok_or_else(|| LoaderError::program("invalid name reference"))?;
            if let Some(rest) = name.strip_prefix(&prefix) {
                let rest = rest.to_string();
                if let Some(func) = self.find_export_function(reg, root, cache, &rest)? {
                    out.functions.push((i, func));
                }
            }
        }
        for (i, entry) in g.fields.iter().enumerate() {
            if entry.kind != RefKind::Constraint {
                continue;
            }
            let name = g
                .name(entry.index)
                .ok_or_else(|| LoaderError::program("invalid name reference"))?;
            if let Some(rest) = name.strip_prefix(&prefix) {
                if let Some(field) = find_export_field(cache, rest) {
                    out.fields.push((i, field));
                }
            }
        }
        Ok(())
    }

    fn find_export_type(
        &mut self,
        reg: &AssemblyRegistry,
        root: &mut SolverRoot,
        cache: &ConstraintCache<'_>,
        name: &str,
    ) -> Result<Option<TypeId>> {
        if name.is_empty() {
            return Ok(None);
        }
        match name.split_once('/') {
            None => {
                if name == ".target" {
                    return Ok(root.determined_of(cache.target));
                }
                let Some(trait_t) = cache.trait_template else {
                    return Ok(None);
                };
                for export in &trait_t.types {
                    if export.export_name != name {
                        continue;
                    }
                    let trait_args = cache.arguments.clone();
                    let trait_assembly = cache.trait_assembly.clone();
                    let ctx = TraitCtx {
                        generic: &trait_t.generic,
                        assembly: &trait_assembly,
                        args: &trait_args,
                        target: cache.target,
                    };
                    let ct =
                        self.construct_trait_ct(reg, root, &ctx, export.index, &mut Vec::new())?;
                    self.simplify(reg, root, ct)?;
                    if let Some(ty) = root.determined_of(ct) {
                        return Ok(Some(ty));
                    }
                }
                Ok(None)
            }
            Some((child_name, rest)) => match find_child(cache, child_name) {
                Some(child) => self.find_export_type(reg, root, child, rest),
                None => Ok(None),
            },
        }
    }

    fn find_export_function(
        &mut self,
        reg: &AssemblyRegistry,
        root: &mut SolverRoot,
        cache: &ConstraintCache<'_>,
        name: &str,
    ) -> Result<Option<FunctionId>> {
        if name.is_empty() {
            return Ok(None);
        }
        match name.split_once('/') {
            None => {
                let Some(trait_t) = cache.trait_template else {
                    return Ok(None);
                };
                for (i, export) in trait_t.functions.iter().enumerate() {
                    if export.export_name != name {
                        continue;
                    }
                    let Some(bind) = cache.trait_functions.get(i) else {
                        return Ok(None);
                    };
                    let Some(overload) = bind.overloads.get(bind.current) else {
                        return Ok(None);
                    };
                    let target = root
                        .determined_of(cache.target)
                        .ok_or_else(|| LoaderError::program("constraint target not determined"))?;
                    let target_args = self
                        .lookup_type_args(target)
                        .ok_or_else(|| LoaderError::program("invalid type reference"))?;
                    let template = self.find_type_template(reg, &target_args)?;
                    let ctx = RefContext {
                        assembly: target_args.assembly.clone(),
                        args: target_args.arguments.clone(),
                        self_type: Some(target),
                        exports: self.type_exports_of(target),
                    };
                    return self.function_at(reg, &template.generic, &ctx, overload.index);
                }
                Ok(None)
            }
            Some((child_name, rest)) => match find_child(cache, child_name) {
                Some(child) => self.find_export_function(reg, root, child, rest),
                None => Ok(None),
            },
        }
    }
}

/// The child cache whose constraint exports under `child_name`.
fn find_child<'a, 'r>(
    cache: &'a ConstraintCache<'r>,
    child_name: &str,
) -> Option<&'a ConstraintCache<'r>> {
    if child_name.is_empty() {
        return None;
    }
    let trait_t = cache.trait_template?;
    let constraints = &trait_t.generic.constraints;
    debug_assert_eq!(constraints.len(), cache.children.len());
    for (i, constraint) in constraints.iter().enumerate() {
        if constraint.export_name == child_name {
            if let Some(child) = cache.children.get(i) {
                return Some(child);
            }
        }
    }
    None
}

fn find_export_field(cache: &ConstraintCache<'_>, name: &str) -> Option<usize> {
    if name.is_empty() {
        return None;
    }
    match name.split_once('/') {
        None => {
            let trait_t = cache.trait_template?;
            for (i, field) in trait_t.fields.iter().enumerate() {
                if field.export_name == name {
                    return Some(cache.trait_fields.get(i)?.field_index);
                }
            }
            None
        }
        Some((child_name, rest)) => {
            find_child(cache, child_name).and_then(|child| find_export_field(child, rest))
        }
    }
}
