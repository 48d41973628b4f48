use crate::constraint::node::{CtKind, CtRef, SolverRoot};
use crate::constraint::ConstraintCache;
use crate::error::{LoaderError, Result};
use crate::loader::LoaderInner;
use crate::reflist::{argument_segment, argument_slots, entry_span, resolve_clone_chain, ArgSlot};
use aster_assemblies::generics::{ConstraintKind, GenericConstraint, GenericDeclaration, RefKind};
use aster_assemblies::AssemblyRegistry;
use aster_utils::{MultiList, TypeId};

/// Context for evaluating a constraint's private scratch RefList.
struct ScratchCtx<'a, 'r> {
    constraint: &'r GenericConstraint,
    src_assembly: &'a str,
    check_args: &'a MultiList<CtRef>,
    check_target: CtRef,
}

/// Context for evaluating a trait's own RefList under a constraint
/// cache.
pub(crate) struct TraitCtx<'a, 'r> {
    pub generic: &'r GenericDeclaration,
    pub assembly: &'a str,
    pub args: &'a MultiList<CtRef>,
    pub target: CtRef,
}

/// The argument node named by an `Argument` entry, with its optional
/// segment qualifier.
fn ct_argument_ref(
    list: &[aster_assemblies::generics::RefEntry],
    i: usize,
    args: &MultiList<CtRef>,
) -> Result<CtRef> {
    let segment = argument_segment(list, i);
    args.get(segment, list[i].index)
        .copied()
        .ok_or_else(|| LoaderError::program("invalid generic argument reference"))
}

impl LoaderInner {
    /// Creates the solver cache for one constraint: constructs its
    /// target and argument trees and resolves the trait template when
    /// the constraint is a trait check.
    pub(crate) fn create_cache<'r>(
        &self,
        reg: &'r AssemblyRegistry,
        root: &mut SolverRoot,
        source: &'r GenericConstraint,
        src_assembly: &str,
        check_args: MultiList<CtRef>,
        check_target: CtRef,
    ) -> Result<ConstraintCache<'r>> {
        let ctx = ScratchCtx {
            constraint: source,
            src_assembly,
            check_args: &check_args,
            check_target,
        };
        let target = self.construct_scratch_ct(reg, root, &ctx, source.target, &mut Vec::new())?;
        let mut arguments = MultiList::new();
        arguments.new_segment();
        for &a in &source.arguments {
            arguments.push(self.construct_scratch_ct(reg, root, &ctx, a, &mut Vec::new())?);
        }

        let (trait_template, trait_assembly) = match source.kind {
            ConstraintKind::TraitAssembly => {
                let t = reg
                    .trait_template(src_assembly, source.index)
                    .ok_or_else(|| LoaderError::program("invalid trait reference"))?;
                (Some(t), src_assembly.to_string())
            }
            ConstraintKind::TraitImport => {
                let a = reg
                    .assembly(src_assembly)
                    .ok_or_else(|| LoaderError::link("referenced assembly not found"))?;
                let record = a
                    .import_traits
                    .get(source.index)
                    .ok_or_else(|| LoaderError::program("invalid trait reference"))?;
                let (assembly, id) = reg
                    .resolve_trait_import(record)
                    .ok_or_else(|| LoaderError::link("import trait not found"))?;
                let t = reg
                    .trait_template(assembly, id)
                    .ok_or_else(|| LoaderError::program("invalid trait reference"))?;
                (Some(t), assembly.to_string())
            }
            _ => (None, String::new()),
        };

        Ok(ConstraintCache {
            source,
            src_assembly: src_assembly.to_string(),
            check_args,
            check_target,
            target,
            arguments,
            children: Vec::new(),
            trait_created: false,
            trait_resolved: false,
            trait_template,
            trait_assembly,
            trait_fields: Vec::new(),
            trait_functions: Vec::new(),
            fn_undetermined: Vec::new(),
        })
    }

    /// Evaluates an entry of a constraint's scratch RefList into a
    /// constraint-type node. `Any` and `Try` are legal only here.
    fn construct_scratch_ct(
        &self,
        reg: &AssemblyRegistry,
        root: &mut SolverRoot,
        ctx: &ScratchCtx<'_, '_>,
        i: usize,
        guard: &mut Vec<usize>,
    ) -> Result<CtRef> {
        let list = &ctx.constraint.type_references;
        let entry = *list
            .get(i)
            .ok_or_else(|| LoaderError::program("invalid type reference"))?;
        match entry.kind {
            RefKind::Any => Ok(root.fresh_any()),
            RefKind::Try => {
                if guard.contains(&i) {
                    return Err(LoaderError::program("cyclic RefList clone chain"));
                }
                guard.push(i);
                let inner = self.construct_scratch_ct(reg, root, ctx, entry.index, guard)?;
                guard.pop();
                root.mark_try(inner);
                Ok(inner)
            }
            RefKind::Clone => {
                if guard.contains(&i) {
                    return Err(LoaderError::program("cyclic RefList clone chain"));
                }
                guard.push(i);
                let inner = self.construct_scratch_ct(reg, root, ctx, entry.index, guard)?;
                guard.pop();
                Ok(inner)
            }
            RefKind::Argument => ct_argument_ref(list, i, ctx.check_args),
            RefKind::SelfRef => {
                if matches!(root.kind(ctx.check_target), CtKind::Fail) {
                    return Err(LoaderError::program("self reference without a target"));
                }
                Ok(ctx.check_target)
            }
            RefKind::Assembly => {
                let args = self.scratch_ct_args(reg, root, ctx, i + 1, guard)?;
                Ok(root.alloc(CtKind::Generic {
                    assembly: ctx.src_assembly.to_string(),
                    index: entry.index,
                    args,
                }))
            }
            RefKind::Import => {
                let (assembly, id) = self.resolve_type_import(reg, ctx.src_assembly, entry.index)?;
                let args = self.scratch_ct_args(reg, root, ctx, i + 1, guard)?;
                Ok(root.alloc(CtKind::Generic {
                    assembly,
                    index: id,
                    args,
                }))
            }
            RefKind::Subtype => {
                let name = ctx
                    .constraint
                    .names
                    .get(entry.index)
                    .ok_or_else(|| LoaderError::program("invalid name reference"))?
                    .clone();
                let parent = self.construct_scratch_ct(reg, root, ctx, i + 1, guard)?;
                let parent_span = entry_span(list, i + 1)?;
                let args = self.scratch_ct_args(reg, root, ctx, i + 1 + parent_span, guard)?;
                Ok(root.alloc(CtKind::Subtype { parent, name, args }))
            }
            _ => Err(LoaderError::program("invalid type reference")),
        }
    }

    fn scratch_ct_args(
        &self,
        reg: &AssemblyRegistry,
        root: &mut SolverRoot,
        ctx: &ScratchCtx<'_, '_>,
        first: usize,
        guard: &mut Vec<usize>,
    ) -> Result<MultiList<CtRef>> {
        let mut args = MultiList::new();
        for slot in argument_slots(&ctx.constraint.type_references, first)? {
            match slot {
                ArgSlot::NextSegment => args.new_segment(),
                ArgSlot::Entry(p) => {
                    args.push(self.construct_scratch_ct(reg, root, ctx, p, guard)?)
                }
            }
        }
        Ok(args)
    }

    /// Evaluates an entry of a trait's own type RefList under a
    /// constraint cache: arguments come from the trait's argument list
    /// and `Self` is the constraint target.
    pub(crate) fn construct_trait_ct(
        &self,
        reg: &AssemblyRegistry,
        root: &mut SolverRoot,
        ctx: &TraitCtx<'_, '_>,
        i: usize,
        guard: &mut Vec<usize>,
    ) -> Result<CtRef> {
        let list = &ctx.generic.types;
        let entry = *list
            .get(i)
            .ok_or_else(|| LoaderError::program("invalid type reference"))?;
        match entry.kind {
            RefKind::Clone => {
                if guard.contains(&i) {
                    return Err(LoaderError::program("cyclic RefList clone chain"));
                }
                guard.push(i);
                let inner = self.construct_trait_ct(reg, root, ctx, entry.index, guard)?;
                guard.pop();
                Ok(inner)
            }
            RefKind::Argument => ct_argument_ref(list, i, ctx.args),
            RefKind::SelfRef => Ok(ctx.target),
            RefKind::Empty => Ok(root.empty()),
            RefKind::Assembly => {
                let args = self.trait_ct_args(reg, root, ctx, i + 1, guard)?;
                Ok(root.alloc(CtKind::Generic {
                    assembly: ctx.assembly.to_string(),
                    index: entry.index,
                    args,
                }))
            }
            RefKind::Import => {
                let (assembly, id) = self.resolve_type_import(reg, ctx.assembly, entry.index)?;
                let args = self.trait_ct_args(reg, root, ctx, i + 1, guard)?;
                Ok(root.alloc(CtKind::Generic {
                    assembly,
                    index: id,
                    args,
                }))
            }
            RefKind::Subtype => {
                let name = ctx
                    .generic
                    .name(entry.index)
                    .ok_or_else(|| LoaderError::program("invalid name reference"))?
                    .to_string();
                let parent = self.construct_trait_ct(reg, root, ctx, i + 1, guard)?;
                let parent_span = entry_span(list, i + 1)?;
                let args = self.trait_ct_args(reg, root, ctx, i + 1 + parent_span, guard)?;
                Ok(root.alloc(CtKind::Subtype { parent, name, args }))
            }
            _ => Err(LoaderError::program("invalid type reference")),
        }
    }

    fn trait_ct_args(
        &self,
        reg: &AssemblyRegistry,
        root: &mut SolverRoot,
        ctx: &TraitCtx<'_, '_>,
        first: usize,
        guard: &mut Vec<usize>,
    ) -> Result<MultiList<CtRef>> {
        let mut args = MultiList::new();
        for slot in argument_slots(&ctx.generic.types, first)? {
            match slot {
                ArgSlot::NextSegment => args.new_segment(),
                ArgSlot::Entry(p) => args.push(self.construct_trait_ct(reg, root, ctx, p, guard)?),
            }
        }
        Ok(args)
    }

    /// Evaluates a type RefList entry of an ordinary declaration into a
    /// constraint-type node, under argument nodes instead of loaded
    /// types. Used to reconstruct candidate function signatures.
    pub(crate) fn construct_reflist_ct(
        &self,
        reg: &AssemblyRegistry,
        root: &mut SolverRoot,
        g: &GenericDeclaration,
        src_assembly: &str,
        index: usize,
        args: &MultiList<CtRef>,
        self_type: Option<TypeId>,
    ) -> Result<CtRef> {
        let i = resolve_clone_chain(&g.types, index)?;
        let entry = g.types[i];
        match entry.kind {
            RefKind::Empty => Ok(root.empty()),
            RefKind::Argument => ct_argument_ref(&g.types, i, args),
            RefKind::SelfRef => Ok(match self_type {
                Some(t) => root.rt(t),
                None => root.fail(),
            }),
            RefKind::Assembly => {
                let children = self.reflist_ct_args(reg, root, g, src_assembly, i + 1, args, self_type)?;
                Ok(root.alloc(CtKind::Generic {
                    assembly: src_assembly.to_string(),
                    index: entry.index,
                    args: children,
                }))
            }
            RefKind::Import => {
                let (assembly, id) = self.resolve_type_import(reg, src_assembly, entry.index)?;
                let children = self.reflist_ct_args(reg, root, g, src_assembly, i + 1, args, self_type)?;
                Ok(root.alloc(CtKind::Generic {
                    assembly,
                    index: id,
                    args: children,
                }))
            }
            RefKind::Subtype => {
                let name = g
                    .name(entry.index)
                    .ok_or_else(|| LoaderError::program("invalid name reference"))?
                    .to_string();
                let parent =
                    self.construct_reflist_ct(reg, root, g, src_assembly, i + 1, args, self_type)?;
                let parent_span = entry_span(&g.types, i + 1)?;
                let children = self.reflist_ct_args(
                    reg,
                    root,
                    g,
                    src_assembly,
                    i + 1 + parent_span,
                    args,
                    self_type,
                )?;
                Ok(root.alloc(CtKind::Subtype { parent, name, args: children }))
            }
            _ => Err(LoaderError::program("invalid type reference")),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn reflist_ct_args(
        &self,
        reg: &AssemblyRegistry,
        root: &mut SolverRoot,
        g: &GenericDeclaration,
        src_assembly: &str,
        first: usize,
        args: &MultiList<CtRef>,
        self_type: Option<TypeId>,
    ) -> Result<MultiList<CtRef>> {
        let mut children = MultiList::new();
        for slot in argument_slots(&g.types, first)? {
            match slot {
                ArgSlot::NextSegment => children.new_segment(),
                ArgSlot::Entry(p) => children.push(self.construct_reflist_ct(
                    reg,
                    root,
                    g,
                    src_assembly,
                    p,
                    args,
                    self_type,
                )?),
            }
        }
        Ok(children)
    }
}

/// Per-segment counts of generic arguments a candidate function needs
/// beyond those fixed by the target, found by walking its full RefList.
pub(crate) fn function_additional_args(
    g: &GenericDeclaration,
    id: usize,
) -> Result<Vec<usize>> {
    let mut counts = Vec::new();
    function_additional_inner(g, id, &mut counts, &mut Vec::new())?;
    Ok(counts)
}

fn function_additional_inner(
    g: &GenericDeclaration,
    id: usize,
    counts: &mut Vec<usize>,
    guard: &mut Vec<usize>,
) -> Result<()> {
    if guard.contains(&id) {
        return Err(LoaderError::program("cyclic RefList clone chain"));
    }
    let entry = *g
        .functions
        .get(id)
        .ok_or_else(|| LoaderError::program("invalid function reference"))?;
    match entry.kind {
        RefKind::Clone => {
            guard.push(id);
            function_additional_inner(g, entry.index, counts, guard)?;
            guard.pop();
            Ok(())
        }
        RefKind::Assembly | RefKind::Import => {
            for slot in argument_slots(&g.functions, id + 1)? {
                if let ArgSlot::Entry(p) = slot {
                    let arg = g.functions[p];
                    if arg.kind != RefKind::CloneType {
                        return Err(LoaderError::program("invalid generic function argument"));
                    }
                    type_additional_inner(g, arg.index, counts, &mut Vec::new())?;
                }
            }
            Ok(())
        }
        _ => Err(LoaderError::program("invalid function reference")),
    }
}

fn type_additional_inner(
    g: &GenericDeclaration,
    id: usize,
    counts: &mut Vec<usize>,
    guard: &mut Vec<usize>,
) -> Result<()> {
    if guard.contains(&id) {
        return Err(LoaderError::program("cyclic RefList clone chain"));
    }
    let entry = *g
        .types
        .get(id)
        .ok_or_else(|| LoaderError::program("invalid type reference"))?;
    match entry.kind {
        RefKind::Clone => {
            guard.push(id);
            type_additional_inner(g, entry.index, counts, guard)?;
            guard.pop();
            Ok(())
        }
        RefKind::Assembly | RefKind::Import => {
            for slot in argument_slots(&g.types, id + 1)? {
                if let ArgSlot::Entry(p) = slot {
                    type_additional_inner(g, p, counts, guard)?;
                }
            }
            Ok(())
        }
        RefKind::Subtype => {
            type_additional_inner(g, id + 1, counts, guard)?;
            let parent_span = entry_span(&g.types, id + 1)?;
            for slot in argument_slots(&g.types, id + 1 + parent_span)? {
                if let ArgSlot::Entry(p) = slot {
                    type_additional_inner(g, p, counts, guard)?;
                }
            }
            Ok(())
        }
        RefKind::Argument => {
            let segment = argument_segment(&g.types, id);
            while counts.len() <= segment {
                counts.push(0);
            }
            counts[segment] = counts[segment].max(entry.index + 1);
            Ok(())
        }
        RefKind::SelfRef | RefKind::Constraint | RefKind::Empty => Ok(()),
        _ => Err(LoaderError::program("invalid type reference")),
    }
}

/// A structural, fully simplified view of a constraint-type tree, used
/// to compare check arguments for circular-constraint detection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum CtSnapshot {
    Fail,
    Empty,
    Any(usize),
    Rt(TypeId),
    Generic {
        assembly: String,
        index: usize,
        args: Vec<Vec<CtSnapshot>>,
    },
    Subtype {
        name: String,
        parent: Box<CtSnapshot>,
        args: Vec<Vec<CtSnapshot>>,
    },
}

impl LoaderInner {
    /// Simplifies a node and captures its structure.
    pub(crate) fn snapshot_ct(
        &mut self,
        reg: &AssemblyRegistry,
        root: &mut SolverRoot,
        r: CtRef,
    ) -> Result<CtSnapshot> {
        self.simplify(reg, root, r)?;
        let kind = root.kind(r).clone();
        Ok(match kind {
            CtKind::Fail => CtSnapshot::Fail,
            CtKind::Empty => CtSnapshot::Empty,
            CtKind::Any(slot) => CtSnapshot::Any(slot),
            CtKind::Rt(t) => CtSnapshot::Rt(t),
            CtKind::Generic {
                assembly,
                index,
                args,
            } => CtSnapshot::Generic {
                assembly,
                index,
                args: self.snapshot_segments(reg, root, &args)?,
            },
            CtKind::Subtype { parent, name, args } => CtSnapshot::Subtype {
                name,
                parent: Box::new(self.snapshot_ct(reg, root, parent)?),
                args: self.snapshot_segments(reg, root, &args)?,
            },
        })
    }

    fn snapshot_segments(
        &mut self,
        reg: &AssemblyRegistry,
        root: &mut SolverRoot,
        args: &MultiList<CtRef>,
    ) -> Result<Vec<Vec<CtSnapshot>>> {
        let mut segments = Vec::new();
        for segment in args.iter_segments() {
            let mut snaps = Vec::with_capacity(segment.len());
            for &a in segment {
                snaps.push(self.snapshot_ct(reg, root, a)?);
            }
            segments.push(snaps);
        }
        Ok(segments)
    }

    /// Structural equality of two argument lists after simplification.
    pub(crate) fn ct_args_equal(
        &mut self,
        reg: &AssemblyRegistry,
        root: &mut SolverRoot,
        a: &MultiList<CtRef>,
        b: &MultiList<CtRef>,
    ) -> Result<bool> {
        if a.size_list() != b.size_list() {
            return Ok(false);
        }
        for (&x, &y) in a.iter().zip(b.iter()) {
            if self.snapshot_ct(reg, root, x)? != self.snapshot_ct(reg, root, y)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}
