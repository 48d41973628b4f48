use crate::constraint::node::{CtKind, CtRef, SolverRoot};
use crate::constraint::{AncestorEntry, ConstraintCache};
use crate::error::{LoaderError, Result};
use crate::loader::LoaderInner;
use crate::reflist::RefContext;
use crate::runtime::{ConstraintExportList, LoadingArguments};
use aster_assemblies::generics::{ConstraintKind, GenericDeclaration};
use aster_assemblies::AssemblyRegistry;
use aster_utils::{MultiList, TypeId};
use tracing::trace;

impl LoaderInner {
    /// Verifies every constraint of a declaration against concrete
    /// arguments. `Ok(None)` means a constraint is unsatisfied;
    /// `Ok(Some(..))` carries the export bindings.
    pub(crate) fn check_constraints<'r>(
        &mut self,
        reg: &'r AssemblyRegistry,
        src_assembly: &str,
        g: &'r GenericDeclaration,
        args: &MultiList<TypeId>,
        want_exports: bool,
    ) -> Result<Option<ConstraintExportList>> {
        if g.constraints.is_empty() {
            return Ok(Some(ConstraintExportList::default()));
        }

        let mut root = SolverRoot::new();
        let cargs = args.map(|&t| root.rt(t));
        let mut exports = ConstraintExportList::default();
        for constraint in &g.constraints {
            let check_target = root.fail();
            let mut cache = self.create_cache(
                reg,
                &mut root,
                constraint,
                src_assembly,
                cargs.clone(),
                check_target,
            )?;
            let mut ancestors = Vec::new();
            if !self.check_cached(reg, &mut root, &mut cache, &mut ancestors)? {
                trace!(kind = ?constraint.kind, "constraint unsatisfied");
                return Ok(None);
            }
            if want_exports {
                self.collect_exports(reg, &mut root, &cache, g, &mut exports)?;
            }
            root.clear_log();
        }
        Ok(Some(exports))
    }

    /// The backtracking check loop: retry single passes over the
    /// candidate odometer until one succeeds or all roll over.
    pub(crate) fn check_cached<'r>(
        &mut self,
        reg: &'r AssemblyRegistry,
        root: &mut SolverRoot,
        cache: &mut ConstraintCache<'r>,
        ancestors: &mut Vec<AncestorEntry>,
    ) -> Result<bool> {
        loop {
            let mark = root.start_mark();
            if self.single_pass(reg, root, cache, ancestors)? {
                return Ok(true);
            }
            root.backtrack(mark);
            if !move_to_next(cache) {
                return Ok(false);
            }
        }
    }

    /// One check attempt with the current overload candidates: drive
    /// determination to a fixed point, then check the determined state.
    fn single_pass<'r>(
        &mut self,
        reg: &'r AssemblyRegistry,
        root: &mut SolverRoot,
        cache: &mut ConstraintCache<'r>,
        ancestors: &mut Vec<AncestorEntry>,
    ) -> Result<bool> {
        if self.try_determine(reg, root, cache, ancestors)? == -1 {
            return Ok(false);
        }
        while contains_undetermined(root, cache) {
            match self.try_determine(reg, root, cache, ancestors)? {
                1 => continue,
                _ => return Ok(false),
            }
        }
        self.check_determined(reg, root, cache, ancestors)
    }

    /// One determination step. Returns 1 when a new binding was made,
    /// 0 when nothing changed, -1 on contradiction.
    fn try_determine<'r>(
        &mut self,
        reg: &'r AssemblyRegistry,
        root: &mut SolverRoot,
        cache: &mut ConstraintCache<'r>,
        ancestors: &mut Vec<AncestorEntry>,
    ) -> Result<i32> {
        match cache.source.kind {
            ConstraintKind::Exist | ConstraintKind::Base | ConstraintKind::Interface => Ok(0),
            ConstraintKind::Same => {
                if !cache.arguments.is_single() {
                    return Err(LoaderError::program("invalid constraint arguments"));
                }
                let arg = *cache.arguments.get(0, 0).expect("single argument");
                self.try_determine_equal(reg, root, arg, cache.target)
            }
            ConstraintKind::TraitAssembly | ConstraintKind::TraitImport => {
                self.ensure_trait_cache(reg, root, cache, ancestors)?;
                let resolved = self.resolve_trait_members(reg, root, cache)?;
                if resolved <= 0 {
                    return Ok(resolved);
                }

                for i in 0..cache.trait_fields.len() {
                    let in_target = cache.trait_fields[i].in_target;
                    let declared = cache.trait_fields[i].declared;
                    let r = self.try_determine_equal(reg, root, in_target, declared)?;
                    if r != 0 {
                        return Ok(r);
                    }
                }

                // Functions with a single candidate are applied first;
                // the odometer digits only matter for the rest.
                for i in 0..cache.trait_functions.len() {
                    let f = &cache.trait_functions[i];
                    if f.overloads.is_empty() {
                        return Ok(-1);
                    }
                    if f.overloads.len() == 1 {
                        let r = self.try_determine_equal_fn(reg, root, cache, i, 0)?;
                        if r != 0 {
                            return Ok(r);
                        }
                    }
                }
                for i in 0..cache.trait_functions.len() {
                    let f = &cache.trait_functions[i];
                    if f.overloads.len() <= 1 {
                        continue;
                    }
                    let current = f.current;
                    let r = self.try_determine_equal_fn(reg, root, cache, i, current)?;
                    if r != 0 {
                        return Ok(r);
                    }
                }
                Ok(0)
            }
        }
    }

    fn try_determine_equal_fn(
        &mut self,
        reg: &AssemblyRegistry,
        root: &mut SolverRoot,
        cache: &ConstraintCache<'_>,
        function: usize,
        overload: usize,
    ) -> Result<i32> {
        let f = &cache.trait_functions[function];
        let o = &f.overloads[overload];
        let pairs: Vec<(CtRef, CtRef)> = std::iter::once((f.ret, o.ret))
            .chain(f.params.iter().copied().zip(o.params.iter().copied()))
            .collect();
        debug_assert_eq!(f.params.len(), o.params.len());
        for (a, b) in pairs {
            let r = self.try_determine_equal(reg, root, a, b)?;
            if r != 0 {
                return Ok(r);
            }
        }
        Ok(0)
    }

    /// Three-valued unification of two constraint-type trees.
    pub(crate) fn try_determine_equal(
        &mut self,
        reg: &AssemblyRegistry,
        root: &mut SolverRoot,
        a: CtRef,
        b: CtRef,
    ) -> Result<i32> {
        self.simplify(reg, root, a)?;
        self.simplify(reg, root, b)?;
        let ka = root.kind(a).clone();
        let kb = root.kind(b).clone();

        // A placeholder is never allowed to become empty.
        if matches!(ka, CtKind::Empty) || matches!(kb, CtKind::Empty) {
            return Ok(0);
        }
        if matches!(ka, CtKind::Fail) || matches!(kb, CtKind::Fail) {
            return Ok(-1);
        }
        match (&ka, &kb) {
            (CtKind::Any(slot), CtKind::Rt(t)) => {
                root.bind(*slot, *t);
                Ok(1)
            }
            (CtKind::Rt(t), CtKind::Any(slot)) => {
                root.bind(*slot, *t);
                Ok(1)
            }
            (CtKind::Any(_), _) | (_, CtKind::Any(_)) => Ok(0),
            // No structural inference through unresolved subtypes.
            (CtKind::Subtype { .. }, _) | (_, CtKind::Subtype { .. }) => Ok(0),
            (CtKind::Rt(x), CtKind::Rt(y)) => Ok(if x == y { 0 } else { -1 }),
            (
                CtKind::Generic {
                    assembly: aa,
                    index: ai,
                    args: aargs,
                },
                CtKind::Generic {
                    assembly: ba,
                    index: bi,
                    args: bargs,
                },
            ) => {
                if aa != ba || ai != bi || aargs.size_list() != bargs.size_list() {
                    return Ok(-1);
                }
                for (&x, &y) in aargs.iter().zip(bargs.iter()) {
                    let r = self.try_determine_equal(reg, root, x, y)?;
                    if r != 0 {
                        return Ok(r);
                    }
                }
                Ok(0)
            }
            (CtKind::Rt(x), CtKind::Generic { assembly, index, args }) => {
                // Treat the loaded type's arguments as a virtual
                // generic and recurse element-wise.
                let x_args = self
                    .lookup_type_args(*x)
                    .ok_or_else(|| LoaderError::program("invalid type reference"))?;
                if x_args.assembly != *assembly
                    || x_args.id != *index
                    || x_args.arguments.size_list() != args.size_list()
                {
                    return Ok(-1);
                }
                for (&xa, &child) in x_args.arguments.iter().zip(args.iter()) {
                    let ct = root.rt(xa);
                    let r = self.try_determine_equal(reg, root, child, ct)?;
                    if r != 0 {
                        return Ok(r);
                    }
                }
                Ok(0)
            }
            (CtKind::Generic { .. }, CtKind::Rt(_)) => self.try_determine_equal(reg, root, b, a),
            _ => Ok(0),
        }
    }

    /// Quick filter used during overload collection; never simplifies
    /// and never binds.
    pub(crate) fn possibly_equal(&self, root: &mut SolverRoot, a: CtRef, b: CtRef) -> bool {
        let ka = root.kind(a).clone();
        let kb = root.kind(b).clone();
        if matches!(ka, CtKind::Fail) || matches!(kb, CtKind::Fail) {
            return false;
        }
        if matches!(ka, CtKind::Empty) || matches!(kb, CtKind::Empty) {
            return matches!(ka, CtKind::Empty) && matches!(kb, CtKind::Empty);
        }
        if matches!(ka, CtKind::Any(_)) || matches!(kb, CtKind::Any(_)) {
            return true;
        }
        if matches!(ka, CtKind::Subtype { .. }) || matches!(kb, CtKind::Subtype { .. }) {
            return true;
        }
        match (&ka, &kb) {
            (CtKind::Rt(x), CtKind::Rt(y)) => x == y,
            (
                CtKind::Generic {
                    assembly: aa,
                    index: ai,
                    args: aargs,
                },
                CtKind::Generic {
                    assembly: ba,
                    index: bi,
                    args: bargs,
                },
            ) => {
                if aa != ba || ai != bi || aargs.size_list() != bargs.size_list() {
                    return false;
                }
                aargs
                    .iter()
                    .zip(bargs.iter())
                    .all(|(&x, &y)| self.possibly_equal(root, x, y))
            }
            (CtKind::Rt(x), CtKind::Generic { assembly, index, args }) => {
                let Some(x_args) = self.lookup_type_args(*x) else {
                    return false;
                };
                if x_args.assembly != *assembly
                    || x_args.id != *index
                    || x_args.arguments.size_list() != args.size_list()
                {
                    return false;
                }
                x_args.arguments.iter().zip(args.iter()).all(|(&xa, &child)| {
                    let ct = root.rt(xa);
                    self.possibly_equal(root, child, ct)
                })
            }
            (CtKind::Generic { .. }, CtKind::Rt(_)) => self.possibly_equal(root, b, a),
            _ => false,
        }
    }

    /// Attempts to reduce a node to `Rt`/`Empty`/`Fail`, instantiating
    /// templates whose arguments are fully determined.
    pub(crate) fn simplify(
        &mut self,
        reg: &AssemblyRegistry,
        root: &mut SolverRoot,
        t: CtRef,
    ) -> Result<()> {
        match root.kind(t).clone() {
            CtKind::Rt(_) | CtKind::Empty | CtKind::Fail => Ok(()),
            CtKind::Any(slot) => {
                if let Some(bound) = root.binding(slot) {
                    root.deduct_rt(t, bound);
                }
                Ok(())
            }
            CtKind::Generic {
                assembly,
                index,
                args,
            } => {
                let Some(resolved) = self.simplify_args(reg, root, t, &args)? else {
                    return Ok(());
                };
                let request = LoadingArguments::new(assembly, index, resolved);
                self.instantiate_ct(reg, root, t, request)
            }
            CtKind::Subtype { parent, name, args } => {
                self.simplify(reg, root, parent)?;
                let parent_type = match root.kind(parent) {
                    CtKind::Rt(p) => *p,
                    CtKind::Fail => {
                        root.deduct_fail(t);
                        return Ok(());
                    }
                    _ => return Ok(()),
                };
                let Some(resolved) = self.simplify_args(reg, root, t, &args)? else {
                    return Ok(());
                };
                match self.find_subtype(reg, parent_type, &name, &resolved)? {
                    None => {
                        if root.try_flag(t) {
                            root.deduct_fail(t);
                            Ok(())
                        } else {
                            Err(LoaderError::program("invalid subtype constraint"))
                        }
                    }
                    Some(request) => self.instantiate_ct(reg, root, t, request),
                }
            }
        }
    }

    /// Simplifies every argument child; `None` means the node cannot be
    /// reduced yet (an undetermined or empty child), and a failing
    /// child has already demoted the parent.
    fn simplify_args(
        &mut self,
        reg: &AssemblyRegistry,
        root: &mut SolverRoot,
        parent: CtRef,
        args: &MultiList<CtRef>,
    ) -> Result<Option<MultiList<TypeId>>> {
        let mut resolved = MultiList::new();
        for segment in args.iter_segments() {
            resolved.new_segment();
            for &child in segment {
                self.simplify(reg, root, child)?;
                match root.kind(child) {
                    CtKind::Rt(id) => resolved.push(*id),
                    CtKind::Fail => {
                        root.deduct_fail(parent);
                        return Ok(None);
                    }
                    _ => return Ok(None),
                }
            }
        }
        Ok(Some(resolved))
    }

    /// Instantiates a fully determined node. Under `try` semantics the
    /// target's constraints are pre-checked and failure demotes the
    /// node instead of aborting.
    fn instantiate_ct(
        &mut self,
        reg: &AssemblyRegistry,
        root: &mut SolverRoot,
        t: CtRef,
        request: LoadingArguments,
    ) -> Result<()> {
        if root.try_flag(t) && !self.pre_check_arguments(reg, &request)? {
            root.deduct_fail(t);
            return Ok(());
        }
        let id = self.load_type_internal(reg, request)?;
        root.deduct_rt(t, id);
        Ok(())
    }

    /// Filter-only constraint check of a speculative instantiation; no
    /// exports are collected.
    fn pre_check_arguments(
        &mut self,
        reg: &AssemblyRegistry,
        request: &LoadingArguments,
    ) -> Result<bool> {
        let template = self.find_type_template(reg, request)?;
        if !template.generic.params.matches(request.arguments.size_list()) {
            return Ok(false);
        }
        if self.loading.checking_types.contains(request) {
            return Err(LoaderError::circular("circular constraint check"));
        }
        self.loading.checking_types.push(request.clone());
        let checked = self.check_constraints(
            reg,
            &request.assembly,
            &template.generic,
            &request.arguments,
            false,
        );
        self.loading.checking_types.pop();
        Ok(checked?.is_some())
    }

    /// Simplifies and accepts only `Rt`/`Empty` results.
    fn check_simplified(
        &mut self,
        reg: &AssemblyRegistry,
        root: &mut SolverRoot,
        t: CtRef,
    ) -> Result<bool> {
        self.simplify(reg, root, t)?;
        Ok(matches!(root.kind(t), CtKind::Rt(_) | CtKind::Empty))
    }

    pub(crate) fn determined_types_equal(
        &mut self,
        reg: &AssemblyRegistry,
        root: &mut SolverRoot,
        a: CtRef,
        b: CtRef,
    ) -> Result<bool> {
        if !self.check_simplified(reg, root, a)? || !self.check_simplified(reg, root, b)? {
            return Ok(false);
        }
        Ok(root.determined_of(a) == root.determined_of(b))
    }

    /// Checks a fully determined constraint.
    fn check_determined<'r>(
        &mut self,
        reg: &'r AssemblyRegistry,
        root: &mut SolverRoot,
        cache: &mut ConstraintCache<'r>,
        ancestors: &mut Vec<AncestorEntry>,
    ) -> Result<bool> {
        match cache.source.kind {
            ConstraintKind::Exist => {
                if cache.arguments.total_len() != 0 {
                    return Err(LoaderError::program("invalid constraint arguments"));
                }
                self.check_simplified(reg, root, cache.target)
            }
            ConstraintKind::Same => {
                if !cache.arguments.is_single() {
                    return Err(LoaderError::program("invalid constraint arguments"));
                }
                let arg = *cache.arguments.get(0, 0).expect("single argument");
                self.determined_types_equal(reg, root, cache.target, arg)
            }
            ConstraintKind::Base => {
                let Some((target, arg)) = self.determined_pair(reg, root, cache)? else {
                    return Ok(false);
                };
                self.check_loading_type_base(reg, target, arg)
            }
            ConstraintKind::Interface => {
                let Some((target, arg)) = self.determined_pair(reg, root, cache)? else {
                    return Ok(false);
                };
                self.check_loading_type_interface(reg, target, arg)
            }
            ConstraintKind::TraitAssembly | ConstraintKind::TraitImport => {
                self.check_trait_determined(reg, root, cache, ancestors)
            }
        }
    }

    /// Target and single argument of a `Base`/`Interface` constraint,
    /// both simplified to concrete types.
    fn determined_pair<'r>(
        &mut self,
        reg: &'r AssemblyRegistry,
        root: &mut SolverRoot,
        cache: &ConstraintCache<'r>,
    ) -> Result<Option<(TypeId, TypeId)>> {
        if !cache.arguments.is_single() {
            return Err(LoaderError::program("invalid constraint arguments"));
        }
        let arg = *cache.arguments.get(0, 0).expect("single argument");
        if !self.check_simplified(reg, root, cache.target)?
            || !self.check_simplified(reg, root, arg)?
        {
            return Ok(None);
        }
        match (root.determined_of(cache.target), root.determined_of(arg)) {
            (Some(t), Some(a)) => Ok(Some((t, a))),
            _ => Ok(None),
        }
    }

    /// Whether `wanted` appears in `checked`'s base chain (reflexive).
    /// Bases of in-flight types are read from the template when they
    /// have not been wired yet.
    pub(crate) fn check_loading_type_base(
        &mut self,
        reg: &AssemblyRegistry,
        checked: TypeId,
        wanted: TypeId,
    ) -> Result<bool> {
        let mut current = checked;
        let mut visited = Vec::new();
        loop {
            if current == wanted {
                return Ok(true);
            }
            if visited.contains(&current) {
                return Err(LoaderError::circular("cyclic base chain"));
            }
            visited.push(current);

            let (wired, base) = self.type_base_info(current);
            let next = if wired {
                base
            } else {
                let args = self
                    .lookup_type_args(current)
                    .ok_or_else(|| LoaderError::program("invalid type reference"))?;
                let template = self.find_type_template(reg, &args)?;
                match template.base.target {
                    None => None,
                    Some(index) => {
                        let ctx = RefContext {
                            assembly: args.assembly.clone(),
                            args: args.arguments.clone(),
                            self_type: Some(current),
                            exports: self.type_exports_of(current),
                        };
                        self.type_at(reg, &template.generic, &ctx, index)?
                    }
                }
            };
            match next {
                Some(b) => current = b,
                None => return Ok(false),
            }
        }
    }

    /// Whether `checked` implements `wanted` (reflexive). Interface
    /// sets of unwired types are walked through templates.
    pub(crate) fn check_loading_type_interface(
        &mut self,
        reg: &AssemblyRegistry,
        checked: TypeId,
        wanted: TypeId,
    ) -> Result<bool> {
        self.interface_walk(reg, checked, wanted, &mut Vec::new())
    }

    fn interface_walk(
        &mut self,
        reg: &AssemblyRegistry,
        checked: TypeId,
        wanted: TypeId,
        visited: &mut Vec<TypeId>,
    ) -> Result<bool> {
        if checked == wanted {
            return Ok(true);
        }
        if visited.contains(&checked) {
            return Ok(false);
        }
        visited.push(checked);

        let (wired, interfaces) = self.type_interfaces_info(checked);
        let interfaces = if wired {
            interfaces
        } else {
            let args = self
                .lookup_type_args(checked)
                .ok_or_else(|| LoaderError::program("invalid type reference"))?;
            let template = self.find_type_template(reg, &args)?;
            let ctx = RefContext {
                assembly: args.assembly.clone(),
                args: args.arguments.clone(),
                self_type: Some(checked),
                exports: self.type_exports_of(checked),
            };
            let mut loaded = Vec::with_capacity(template.interfaces.len());
            for inheritance in &template.interfaces {
                let index = inheritance
                    .target
                    .ok_or_else(|| LoaderError::program("invalid interface reference"))?;
                let target = self
                    .type_at(reg, &template.generic, &ctx, index)?
                    .ok_or_else(|| LoaderError::program("invalid interface reference"))?;
                loaded.push(target);
            }
            loaded
        };

        for interface in interfaces {
            if self.interface_walk(reg, interface, wanted, visited)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// Whether any tracked node of the cache still holds an unresolved
/// placeholder.
pub(crate) fn contains_undetermined(root: &SolverRoot, cache: &ConstraintCache<'_>) -> bool {
    cache.arguments.iter().any(|&a| root.is_undetermined(a))
        || cache.fn_undetermined.iter().any(|&a| root.is_undetermined(a))
        || root.is_undetermined(cache.target)
}

/// Advances the overload odometer lexicographically, deepest caches
/// first. Returns false when every digit has rolled over.
pub(crate) fn move_to_next(cache: &mut ConstraintCache<'_>) -> bool {
    for child in &mut cache.children {
        if move_to_next(child) {
            return true;
        }
    }
    for f in cache.trait_functions.iter_mut().rev() {
        f.current += 1;
        if f.current < f.overloads.len() {
            return true;
        }
        f.current = 0;
    }
    false
}
