use crate::error::{LoaderError, Result};
use crate::loader::LoaderInner;
use crate::runtime::{ConstraintExportList, LoadingArguments};
use aster_assemblies::generics::{GenericDeclaration, RefEntry, RefKind};
use aster_assemblies::AssemblyRegistry;
use aster_utils::{MultiList, TypeId};

/// Evaluation context of a RefList: the instantiation whose declaration
/// the list belongs to.
#[derive(Clone, Debug)]
pub(crate) struct RefContext {
    pub assembly: String,
    pub args: MultiList<TypeId>,
    pub self_type: Option<TypeId>,
    pub exports: ConstraintExportList,
}

/// One slot of a positional argument list.
#[derive(Copy, Clone, Debug)]
pub(crate) enum ArgSlot {
    /// A child entry begins at this position.
    Entry(usize),
    /// A segment separator.
    NextSegment,
}

/// Number of slots occupied by the entry at `i`, including its argument
/// subtree and terminator. Running off the end of the list acts as an
/// implicit terminator.
pub(crate) fn entry_span(list: &[RefEntry], i: usize) -> Result<usize> {
    let entry = list
        .get(i)
        .ok_or_else(|| LoaderError::program("invalid RefList index"))?;
    match entry.kind {
        RefKind::Assembly | RefKind::Import => {
            let mut j = i + 1;
            while j < list.len() {
                match list[j].kind {
                    RefKind::ListEnd | RefKind::Empty => return Ok(j - i + 1),
                    RefKind::Segment => j += 1,
                    _ => j += entry_span(list, j)?,
                }
            }
            Ok(j - i)
        }
        RefKind::Subtype => {
            let parent = entry_span(list, i + 1)?;
            let mut j = i + 1 + parent;
            while j < list.len() {
                match list[j].kind {
                    RefKind::ListEnd | RefKind::Empty => return Ok(j - i + 1),
                    RefKind::Segment => j += 1,
                    _ => j += entry_span(list, j)?,
                }
            }
            Ok(j - i)
        }
        RefKind::Argument => {
            if matches!(list.get(i + 1), Some(e) if e.kind == RefKind::ArgSegment) {
                Ok(2)
            } else {
                Ok(1)
            }
        }
        _ => Ok(1),
    }
}

/// Positions of the argument entries that start at `first`, up to the
/// enclosing terminator, with segment separators preserved.
pub(crate) fn argument_slots(list: &[RefEntry], first: usize) -> Result<Vec<ArgSlot>> {
    let mut slots = Vec::new();
    let mut j = first;
    while j < list.len() {
        match list[j].kind {
            RefKind::ListEnd | RefKind::Empty => break,
            RefKind::Segment => {
                slots.push(ArgSlot::NextSegment);
                j += 1;
            }
            _ => {
                slots.push(ArgSlot::Entry(j));
                j += entry_span(list, j)?;
            }
        }
    }
    Ok(slots)
}

/// Follows `Clone` redirections from `start`, detecting cycles.
pub(crate) fn resolve_clone_chain(list: &[RefEntry], start: usize) -> Result<usize> {
    let mut i = start;
    let mut steps = 0;
    loop {
        let entry = list
            .get(i)
            .ok_or_else(|| LoaderError::program("invalid RefList index"))?;
        if entry.kind != RefKind::Clone {
            return Ok(i);
        }
        steps += 1;
        if steps > list.len() {
            return Err(LoaderError::program("cyclic RefList clone chain"));
        }
        i = entry.index;
    }
}

/// Segment of the `Argument` entry at `i`: the following `ArgSegment`
/// qualifier, or segment 0 when absent.
pub(crate) fn argument_segment(list: &[RefEntry], i: usize) -> usize {
    match list.get(i + 1) {
        Some(e) if e.kind == RefKind::ArgSegment => e.index,
        _ => 0,
    }
}

/// The generic argument named by the `Argument` entry at `i`.
pub(crate) fn argument_ref(
    list: &[RefEntry],
    i: usize,
    args: &MultiList<TypeId>,
) -> Result<TypeId> {
    let segment = argument_segment(list, i);
    args.get(segment, list[i].index)
        .copied()
        .ok_or_else(|| LoaderError::program("invalid generic argument reference"))
}

impl LoaderInner {
    /// Evaluates the type RefList entry at `index`, instantiating
    /// dependent types recursively. `Empty` yields `None`.
    pub(crate) fn type_at(
        &mut self,
        reg: &AssemblyRegistry,
        g: &GenericDeclaration,
        ctx: &RefContext,
        index: usize,
    ) -> Result<Option<TypeId>> {
        let i = resolve_clone_chain(&g.types, index)?;
        let entry = g.types[i];
        match entry.kind {
            RefKind::Empty => Ok(None),
            RefKind::Argument => argument_ref(&g.types, i, &ctx.args).map(Some),
            RefKind::SelfRef => ctx
                .self_type
                .map(Some)
                .ok_or_else(|| LoaderError::program("self reference outside a type")),
            RefKind::Assembly => {
                let args = self.collect_type_args(reg, g, ctx, i + 1)?;
                let request = LoadingArguments::new(ctx.assembly.clone(), entry.index, args);
                self.load_type_internal(reg, request).map(Some)
            }
            RefKind::Import => {
                let (assembly, id) = self.resolve_type_import(reg, &ctx.assembly, entry.index)?;
                let args = self.collect_type_args(reg, g, ctx, i + 1)?;
                let request = LoadingArguments::new(assembly, id, args);
                self.load_type_internal(reg, request).map(Some)
            }
            RefKind::Subtype => {
                let name = g
                    .name(entry.index)
                    .ok_or_else(|| LoaderError::program("invalid name reference"))?
                    .to_string();
                let parent = self
                    .type_at(reg, g, ctx, i + 1)?
                    .ok_or_else(|| LoaderError::program("invalid subtype parent"))?;
                let parent_span = entry_span(&g.types, i + 1)?;
                let args = self.collect_type_args(reg, g, ctx, i + 1 + parent_span)?;
                let request = self
                    .find_subtype(reg, parent, &name, &args)?
                    .ok_or_else(|| LoaderError::program("invalid subtype reference"))?;
                self.load_type_internal(reg, request).map(Some)
            }
            RefKind::Constraint => ctx
                .exports
                .type_at(i)
                .map(Some)
                .ok_or_else(|| LoaderError::program("constraint export not resolved")),
            _ => Err(LoaderError::program("invalid type reference")),
        }
    }

    /// Evaluates the function RefList entry at `index`.
    pub(crate) fn function_at(
        &mut self,
        reg: &AssemblyRegistry,
        g: &GenericDeclaration,
        ctx: &RefContext,
        index: usize,
    ) -> Result<Option<aster_utils::FunctionId>> {
        let i = resolve_clone_chain(&g.functions, index)?;
        let entry = g.functions[i];
        match entry.kind {
            RefKind::Empty => Ok(None),
            RefKind::Assembly => {
                let args = self.collect_function_args(reg, g, ctx, i + 1)?;
                let request = LoadingArguments::new(ctx.assembly.clone(), entry.index, args);
                self.load_function_internal(reg, request).map(Some)
            }
            RefKind::Import => {
                let (assembly, id) =
                    self.resolve_function_import(reg, &ctx.assembly, entry.index)?;
                let args = self.collect_function_args(reg, g, ctx, i + 1)?;
                let request = LoadingArguments::new(assembly, id, args);
                self.load_function_internal(reg, request).map(Some)
            }
            RefKind::Constraint => ctx
                .exports
                .function_at(i)
                .map(Some)
                .ok_or_else(|| LoaderError::program("constraint export not resolved")),
            _ => Err(LoaderError::program("invalid function reference")),
        }
    }

    /// Evaluates the field RefList entry at `index`, yielding a field
    /// ordinal.
    pub(crate) fn field_at(
        &mut self,
        g: &GenericDeclaration,
        ctx: &RefContext,
        index: usize,
    ) -> Result<Option<usize>> {
        let i = resolve_clone_chain(&g.fields, index)?;
        let entry = g.fields[i];
        match entry.kind {
            RefKind::Empty => Ok(None),
            RefKind::FieldId => Ok(Some(entry.index)),
            RefKind::Constraint => ctx
                .exports
                .field_at(i)
                .map(Some)
                .ok_or_else(|| LoaderError::program("constraint export not resolved")),
            _ => Err(LoaderError::program("invalid field reference")),
        }
    }

    /// Collects the argument list following a complex type entry.
    fn collect_type_args(
        &mut self,
        reg: &AssemblyRegistry,
        g: &GenericDeclaration,
        ctx: &RefContext,
        first: usize,
    ) -> Result<MultiList<TypeId>> {
        let mut args = MultiList::new();
        for slot in argument_slots(&g.types, first)? {
            match slot {
                ArgSlot::NextSegment => args.new_segment(),
                ArgSlot::Entry(p) => {
                    let arg = self
                        .type_at(reg, g, ctx, p)?
                        .ok_or_else(|| LoaderError::generic("invalid generic arguments"))?;
                    args.push(arg);
                }
            }
        }
        Ok(args)
    }

    /// Collects the argument list following a complex function entry.
    /// Function arguments are always `CloneType` references into the
    /// companion type list.
    fn collect_function_args(
        &mut self,
        reg: &AssemblyRegistry,
        g: &GenericDeclaration,
        ctx: &RefContext,
        first: usize,
    ) -> Result<MultiList<TypeId>> {
        let mut args = MultiList::new();
        for slot in argument_slots(&g.functions, first)? {
            match slot {
                ArgSlot::NextSegment => args.new_segment(),
                ArgSlot::Entry(p) => {
                    let entry = g.functions[p];
                    if entry.kind != RefKind::CloneType {
                        return Err(LoaderError::program("invalid generic function argument"));
                    }
                    let arg = self
                        .type_at(reg, g, ctx, entry.index)?
                        .ok_or_else(|| LoaderError::generic("invalid generic arguments"))?;
                    args.push(arg);
                }
            }
        }
        Ok(args)
    }

    pub(crate) fn resolve_type_import(
        &self,
        reg: &AssemblyRegistry,
        assembly: &str,
        index: usize,
    ) -> Result<(String, usize)> {
        let a = reg
            .assembly(assembly)
            .ok_or_else(|| LoaderError::link("referenced assembly not found"))?;
        let record = a
            .import_types
            .get(index)
            .ok_or_else(|| LoaderError::program("invalid type reference"))?;
        let (assembly, id) = reg
            .resolve_type_import(record)
            .ok_or_else(|| LoaderError::link("import type not found"))?;
        Ok((assembly.to_string(), id))
    }

    pub(crate) fn resolve_function_import(
        &self,
        reg: &AssemblyRegistry,
        assembly: &str,
        index: usize,
    ) -> Result<(String, usize)> {
        let a = reg
            .assembly(assembly)
            .ok_or_else(|| LoaderError::link("referenced assembly not found"))?;
        let record = a
            .import_functions
            .get(index)
            .ok_or_else(|| LoaderError::program("invalid function reference"))?;
        let (assembly, id) = reg
            .resolve_function_import(record)
            .ok_or_else(|| LoaderError::link("import function not found"))?;
        Ok((assembly.to_string(), id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spans_of_simple_entries() {
        let list = vec![RefEntry::argument(0), RefEntry::empty()];
        assert_eq!(entry_span(&list, 0).unwrap(), 1);
        assert_eq!(entry_span(&list, 1).unwrap(), 1);
    }

    #[test]
    fn span_of_complex_entry_includes_subtree() {
        // Assembly(1)<Argument(0), Assembly(2)<Argument(1)>>
        let list = vec![
            RefEntry::assembly(1),
            RefEntry::argument(0),
            RefEntry::assembly(2),
            RefEntry::argument(1),
            RefEntry::list_end(),
            RefEntry::list_end(),
        ];
        assert_eq!(entry_span(&list, 2).unwrap(), 3);
        assert_eq!(entry_span(&list, 0).unwrap(), 6);

        let slots = argument_slots(&list, 1).unwrap();
        assert_eq!(slots.len(), 2);
        assert!(matches!(slots[0], ArgSlot::Entry(1)));
        assert!(matches!(slots[1], ArgSlot::Entry(2)));
    }

    #[test]
    fn argument_segment_qualifier() {
        let list = vec![RefEntry::argument(1), RefEntry::arg_segment(2)];
        assert_eq!(entry_span(&list, 0).unwrap(), 2);
        assert_eq!(argument_segment(&list, 0), 2);

        let bare = vec![RefEntry::argument(1)];
        assert_eq!(argument_segment(&bare, 0), 0);
    }

    #[test]
    fn clone_cycle_is_detected() {
        let list = vec![RefEntry::clone_of(1), RefEntry::clone_of(0)];
        assert!(matches!(
            resolve_clone_chain(&list, 0),
            Err(LoaderError::Program(_))
        ));

        let chain = vec![RefEntry::clone_of(1), RefEntry::argument(3)];
        assert_eq!(resolve_clone_chain(&chain, 0).unwrap(), 1);
    }
}
