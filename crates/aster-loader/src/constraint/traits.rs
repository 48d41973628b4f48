use crate::constraint::build::{function_additional_args, TraitCtx};
use crate::constraint::node::{CtKind, CtRef, SolverRoot};
use crate::constraint::{AncestorEntry, ConstraintCache, OverloadBind, TraitFieldBind, TraitFnBind};
use crate::error::{LoaderError, Result};
use crate::loader::LoaderInner;
use crate::reflist::{argument_slots, resolve_clone_chain, ArgSlot, RefContext};
use crate::runtime::LoadingArguments;
use aster_assemblies::model::TypeTemplate;
use aster_assemblies::{AssemblyRegistry, RefKind};
use aster_utils::{MultiList, TypeId};

impl LoaderInner {
    /// Builds the lazy part of a trait cache: child caches for the
    /// trait's own constraints (with circularity detection against the
    /// ancestor chain) and the declared member signatures.
    pub(crate) fn ensure_trait_cache<'r>(
        &mut self,
        reg: &'r AssemblyRegistry,
        root: &mut SolverRoot,
        cache: &mut ConstraintCache<'r>,
        ancestors: &[AncestorEntry],
    ) -> Result<()> {
        if cache.trait_created {
            debug_assert_eq!(
                cache.children.len(),
                cache.trait_template.map(|t| t.generic.constraints.len()).unwrap_or(0)
            );
            return Ok(());
        }
        debug_assert!(cache.children.is_empty());
        debug_assert!(!cache.trait_resolved);

        let trait_t = cache
            .trait_template
            .ok_or_else(|| LoaderError::program("invalid trait reference"))?;
        let generic = &trait_t.generic;
        if !generic.params.matches(cache.arguments.size_list()) {
            return Err(LoaderError::generic("invalid generic arguments"));
        }

        for constraint in &generic.constraints {
            let child = self.create_cache(
                reg,
                root,
                constraint,
                &cache.trait_assembly,
                cache.arguments.clone(),
                cache.target,
            )?;
            // A sub-constraint structurally equal to any enclosing check
            // can never make progress.
            if std::ptr::eq(cache.source, child.source)
                && self.ct_args_equal(reg, root, &child.check_args, &cache.check_args)?
            {
                return Err(LoaderError::circular("circular constraint check"));
            }
            for ancestor in ancestors {
                if std::ptr::eq(ancestor.source, child.source)
                    && self.ct_args_equal(reg, root, &child.check_args, &ancestor.check_args)?
                {
                    return Err(LoaderError::circular("circular constraint check"));
                }
            }
            cache.children.push(child);
        }

        let trait_args = cache.arguments.clone();
        let trait_assembly = cache.trait_assembly.clone();
        let ctx = TraitCtx {
            generic,
            assembly: &trait_assembly,
            args: &trait_args,
            target: cache.target,
        };
        for field in &trait_t.fields {
            let declared = self.construct_trait_ct(reg, root, &ctx, field.type_index, &mut Vec::new())?;
            let placeholder = root.fail();
            cache.trait_fields.push(TraitFieldBind {
                declared,
                in_target: placeholder,
                field_index: 0,
            });
        }
        for function in &trait_t.functions {
            let ret =
                self.construct_trait_ct(reg, root, &ctx, function.return_type, &mut Vec::new())?;
            let mut params = Vec::with_capacity(function.parameter_types.len());
            for &p in &function.parameter_types {
                params.push(self.construct_trait_ct(reg, root, &ctx, p, &mut Vec::new())?);
            }
            cache.trait_functions.push(TraitFnBind {
                overloads: Vec::new(),
                current: 0,
                ret,
                params,
            });
        }

        cache.trait_resolved = false;
        cache.trait_created = true;
        Ok(())
    }

    /// Binds trait fields to target field ordinals and collects the
    /// candidate overloads of every trait function. Returns 1 when all
    /// members resolved, 0 while the target is undetermined, -1 when
    /// the constraint cannot hold.
    pub(crate) fn resolve_trait_members<'r>(
        &mut self,
        reg: &'r AssemblyRegistry,
        root: &mut SolverRoot,
        cache: &mut ConstraintCache<'r>,
    ) -> Result<i32> {
        debug_assert!(cache.trait_created);
        if cache.trait_resolved {
            return Ok(1);
        }

        self.simplify(reg, root, cache.target)?;
        let target = match root.kind(cache.target) {
            CtKind::Rt(t) => *t,
            CtKind::Fail | CtKind::Empty => return Ok(-1),
            _ => return Ok(0),
        };
        let target_args = self
            .lookup_type_args(target)
            .ok_or_else(|| LoaderError::program("invalid type reference"))?;
        let template = self.find_type_template(reg, &target_args)?;
        let trait_t = cache
            .trait_template
            .ok_or_else(|| LoaderError::program("invalid trait reference"))?;

        for (i, field) in trait_t.fields.iter().enumerate() {
            let Some(member) = template
                .public_fields
                .iter()
                .find(|m| m.name == field.name)
            else {
                return Ok(-1);
            };
            let laid_out = self.type_fields(target);
            let in_target = if laid_out.is_empty() {
                // The target's fields are not computed yet (a reference
                // type still in the pipeline); re-evaluate the template
                // field against the target's own arguments.
                let type_index = *template
                    .fields
                    .get(member.index)
                    .ok_or_else(|| LoaderError::program("invalid field reference"))?;
                let ctx = RefContext {
                    assembly: target_args.assembly.clone(),
                    args: target_args.arguments.clone(),
                    self_type: Some(target),
                    exports: self.type_exports_of(target),
                };
                let field_type = self
                    .type_at(reg, &template.generic, &ctx, type_index)?
                    .ok_or_else(|| LoaderError::program("invalid field type"))?;
                root.rt(field_type)
            } else {
                let info = laid_out
                    .get(member.index)
                    .ok_or_else(|| LoaderError::program("invalid field reference"))?;
                root.rt(info.ty)
            };
            cache.trait_fields[i].field_index = member.index;
            cache.trait_fields[i].in_target = in_target;
        }

        for (i, function) in trait_t.functions.iter().enumerate() {
            let mut candidates = Vec::new();
            for m in &template.public_functions {
                if m.name == function.name {
                    candidates.push(m.index);
                }
            }
            for vf in &template.base.virtual_functions {
                if vf.name == function.name {
                    // Bind to the virtual slot.
                    candidates.push(vf.virtual_index);
                }
            }
            for interface in &template.interfaces {
                for vf in &interface.virtual_functions {
                    if vf.name == function.name {
                        candidates.push(vf.virtual_index);
                    }
                }
            }

            let declared_ret = cache.trait_functions[i].ret;
            let declared_params = cache.trait_functions[i].params.clone();
            let mut overloads = Vec::new();
            for candidate in candidates {
                if let Some((overload, undetermined)) = self.build_overload(
                    reg,
                    root,
                    target,
                    &target_args,
                    template,
                    declared_ret,
                    &declared_params,
                    candidate,
                )? {
                    overloads.push(overload);
                    cache.fn_undetermined.extend(undetermined);
                }
            }
            if overloads.is_empty() {
                return Ok(-1);
            }
            cache.trait_functions[i].overloads = overloads;
        }

        cache.trait_resolved = true;
        Ok(1)
    }

    /// Reconstructs one candidate's signature under the target's
    /// generic context and filters it against the declared signature.
    /// Fresh placeholders stand in for argument segments the candidate
    /// expects beyond those the target fixes.
    #[allow(clippy::too_many_arguments)]
    fn build_overload(
        &mut self,
        reg: &AssemblyRegistry,
        root: &mut SolverRoot,
        target: TypeId,
        target_args: &LoadingArguments,
        template: &TypeTemplate,
        declared_ret: CtRef,
        declared_params: &[CtRef],
        fn_index: usize,
    ) -> Result<Option<(OverloadBind, Vec<CtRef>)>> {
        let g = &template.generic;
        let id = resolve_clone_chain(&g.functions, fn_index)?;
        let entry = g.functions[id];
        let (fn_assembly, fn_id) = match entry.kind {
            RefKind::Assembly => (target_args.assembly.clone(), entry.index),
            RefKind::Import => {
                self.resolve_function_import(reg, &target_args.assembly, entry.index)?
            }
            _ => return Err(LoaderError::program("invalid function reference")),
        };

        let additional = function_additional_args(g, id)?;
        let target_sizes = target_args.arguments.size_list().to_vec();
        for i in 0..target_sizes.len().min(additional.len()) {
            if additional[i] > target_sizes[i] {
                return Err(LoaderError::generic("invalid function reference"));
            }
        }
        let mut type_args = target_args.arguments.map(|&t| root.rt(t));
        let mut undetermined = Vec::new();
        for &count in additional.iter().skip(target_sizes.len()) {
            type_args.new_segment();
            for _ in 0..count {
                let placeholder = root.fresh_any();
                type_args.push(placeholder);
                undetermined.push(placeholder);
            }
        }

        let mut func_args = MultiList::new();
        for slot in argument_slots(&g.functions, id + 1)? {
            match slot {
                ArgSlot::NextSegment => func_args.new_segment(),
                ArgSlot::Entry(p) => {
                    let arg = g.functions[p];
                    if arg.kind != RefKind::CloneType {
                        return Err(LoaderError::program("invalid generic function argument"));
                    }
                    func_args.push(self.construct_reflist_ct(
                        reg,
                        root,
                        g,
                        &target_args.assembly,
                        arg.index,
                        &type_args,
                        Some(target),
                    )?);
                }
            }
        }

        let ft = reg
            .function_template(&fn_assembly, fn_id)
            .ok_or_else(|| LoaderError::program("invalid function reference"))?;
        let ret = self.construct_reflist_ct(
            reg,
            root,
            &ft.generic,
            &fn_assembly,
            ft.return_type,
            &func_args,
            None,
        )?;
        let mut params = Vec::with_capacity(ft.parameters.len());
        for &p in &ft.parameters {
            params.push(self.construct_reflist_ct(
                reg,
                root,
                &ft.generic,
                &fn_assembly,
                p,
                &func_args,
                None,
            )?);
        }

        if params.len() != declared_params.len() {
            return Ok(None);
        }
        if !self.possibly_equal(root, ret, declared_ret) {
            return Ok(None);
        }
        for (&have, &want) in params.iter().zip(declared_params) {
            if !self.possibly_equal(root, have, want) {
                return Ok(None);
            }
        }
        Ok(Some((
            OverloadBind {
                index: fn_index,
                ret,
                params,
            },
            undetermined,
        )))
    }

    /// The determined check of a trait constraint: sub-constraints,
    /// field types, and the chosen overload of every function.
    pub(crate) fn check_trait_determined<'r>(
        &mut self,
        reg: &'r AssemblyRegistry,
        root: &mut SolverRoot,
        cache: &mut ConstraintCache<'r>,
        ancestors: &mut Vec<AncestorEntry>,
    ) -> Result<bool> {
        self.ensure_trait_cache(reg, root, cache, ancestors)?;
        if self.resolve_trait_members(reg, root, cache)? != 1 {
            return Ok(false);
        }

        let entry = AncestorEntry {
            source: cache.source,
            check_args: cache.check_args.clone(),
        };
        ancestors.push(entry);
        let mut satisfied = true;
        for child in &mut cache.children {
            if !self.check_cached(reg, root, child, ancestors)? {
                satisfied = false;
                break;
            }
        }
        ancestors.pop();
        if !satisfied {
            return Ok(false);
        }

        for i in 0..cache.trait_fields.len() {
            let declared = cache.trait_fields[i].declared;
            let in_target = cache.trait_fields[i].in_target;
            if !self.determined_types_equal(reg, root, declared, in_target)? {
                return Ok(false);
            }
        }
        for i in 0..cache.trait_functions.len() {
            let f = &cache.trait_functions[i];
            let overload = &f.overloads[f.current];
            debug_assert_eq!(f.params.len(), overload.params.len());
            let pairs: Vec<(CtRef, CtRef)> = std::iter::once((f.ret, overload.ret))
                .chain(f.params.iter().copied().zip(overload.params.iter().copied()))
                .collect();
            for (declared, found) in pairs {
                if !self.determined_types_equal(reg, root, declared, found)? {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }
}
