use crate::error::{LoaderError, Result};
use crate::loader::LoaderInner;
use crate::reflist::RefContext;
use crate::runtime::{
    ConstraintExportList, FieldInfo, LoadingArguments, POINTER_SIZE, RuntimeFunction,
    RuntimeFunctionCode, RuntimeType, StaticStorage,
};
use aster_assemblies::model::StorageMode;
use aster_assemblies::registry::CORE_ASSEMBLY;
use aster_assemblies::{AssemblyRegistry, RefKind};
use aster_utils::{FunctionId, MultiList, TypeId};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::trace;

/// A type whose handle exists but which has not been published yet.
#[derive(Debug)]
pub(crate) struct TypeBuild {
    pub id: TypeId,
    pub args: LoadingArguments,
    pub storage: StorageMode,
    pub fields: Vec<FieldInfo>,
    pub fields_done: bool,
    pub size: usize,
    pub alignment: usize,
    pub base: Option<TypeId>,
    pub interfaces: Vec<TypeId>,
    pub wired: bool,
    pub initializer: Option<FunctionId>,
    pub finalizer: Option<FunctionId>,
    pub statics: Option<StaticStorage>,
    pub exports: ConstraintExportList,
    pub pointer_type: Option<TypeId>,
}

impl TypeBuild {
    fn new(
        id: TypeId,
        args: LoadingArguments,
        storage: StorageMode,
        exports: ConstraintExportList,
    ) -> Self {
        TypeBuild {
            id,
            args,
            storage,
            fields: Vec::new(),
            fields_done: false,
            size: 0,
            alignment: 1,
            base: None,
            interfaces: Vec::new(),
            wired: false,
            initializer: None,
            finalizer: None,
            statics: None,
            exports,
            pointer_type: None,
        }
    }

    fn freeze(self) -> RuntimeType {
        RuntimeType::from_parts(
            self.id,
            self.args,
            self.storage,
            self.fields,
            self.size,
            self.alignment,
            self.base,
            self.interfaces,
            self.initializer,
            self.finalizer,
            self.statics,
            self.exports,
            self.pointer_type,
        )
    }
}

/// A function whose handle exists but which has not been published yet.
#[derive(Debug)]
pub(crate) struct FunctionBuild {
    pub id: FunctionId,
    pub args: LoadingArguments,
    pub code: Option<Arc<RuntimeFunctionCode>>,
    pub referenced_types: Vec<Option<TypeId>>,
    pub referenced_functions: Vec<Option<FunctionId>>,
    pub referenced_fields: Vec<Option<usize>>,
    pub return_type: Option<TypeId>,
    pub parameters: Vec<Option<TypeId>>,
    pub exports: ConstraintExportList,
}

impl FunctionBuild {
    fn freeze(self) -> RuntimeFunction {
        RuntimeFunction {
            id: self.id,
            args: self.args,
            code: self.code,
            referenced_types: self.referenced_types,
            referenced_functions: self.referenced_functions,
            referenced_fields: self.referenced_fields,
            return_type: self.return_type,
            parameters: self.parameters,
            exports: self.exports,
        }
    }
}

/// Per-request loading state. Every in-flight object belongs to exactly
/// one queue; the maps index them by id and by request key.
#[derive(Default)]
pub(crate) struct LoadingState {
    pub types: HashMap<TypeId, TypeBuild>,
    pub functions: HashMap<FunctionId, FunctionBuild>,
    pub by_args: HashMap<LoadingArguments, TypeId>,
    pub fn_by_args: HashMap<LoadingArguments, FunctionId>,
    /// Value types being laid out right now; searched for cyclic
    /// value-type dependence.
    pub value_stack: Vec<TypeId>,
    /// Reference types whose handle is published but whose fields are
    /// not computed yet.
    pub ref_queue: Vec<TypeId>,
    /// Types laid out but not yet wired.
    pub post_queue: Vec<TypeId>,
    /// Functions whose signature and references are unresolved.
    pub fn_queue: Vec<FunctionId>,
    pub finished_types: Vec<TypeId>,
    pub finished_functions: Vec<FunctionId>,
    /// Instantiations whose constraints are being checked right now.
    pub checking_types: Vec<LoadingArguments>,
    pub checking_functions: Vec<LoadingArguments>,
}

impl LoadingState {
    pub fn clear(&mut self) {
        self.types.clear();
        self.functions.clear();
        self.by_args.clear();
        self.fn_by_args.clear();
        self.value_stack.clear();
        self.ref_queue.clear();
        self.post_queue.clear();
        self.fn_queue.clear();
        self.finished_types.clear();
        self.finished_functions.clear();
        self.checking_types.clear();
        self.checking_functions.clear();
    }
}

impl LoaderInner {
    /// Resolves an instantiation request to a usable handle, creating
    /// the object and scheduling its remaining phases when it is new.
    pub(crate) fn load_type_internal(
        &mut self,
        reg: &AssemblyRegistry,
        args: LoadingArguments,
    ) -> Result<TypeId> {
        if let Some(&id) = self.type_index.get(&args) {
            return Ok(id);
        }
        if let Some(&id) = self.loading.by_args.get(&args) {
            if self.loading.value_stack.contains(&id) {
                return Err(LoaderError::circular("cyclic type dependence"));
            }
            return Ok(id);
        }

        let template = self
            .find_type_template(reg, &args)
            .map(|t| (t.storage, t.generic.params.clone()))?;
        let (storage, params) = template;
        if !params.matches(args.arguments.size_list()) {
            return Err(LoaderError::generic("invalid generic arguments"));
        }
        let exports = self.check_type_constraints(reg, &args)?;

        let id = TypeId::new(self.next_type_id);
        self.next_type_id += 1;
        trace!(%args, %id, ?storage, "type handle created");

        let build = TypeBuild::new(id, args.clone(), storage, exports);
        self.loading.types.insert(id, build);
        self.loading.by_args.insert(args, id);

        match storage {
            StorageMode::Reference => {
                self.loading.ref_queue.push(id);
            }
            StorageMode::Value | StorageMode::Global => {
                self.loading.value_stack.push(id);
                self.load_fields(reg, id)?;
                let _popped = self.loading.value_stack.pop();
                debug_assert_eq!(_popped, Some(id));
            }
        }
        Ok(id)
    }

    pub(crate) fn load_function_internal(
        &mut self,
        reg: &AssemblyRegistry,
        args: LoadingArguments,
    ) -> Result<FunctionId> {
        if let Some(&id) = self.function_index.get(&args) {
            return Ok(id);
        }
        if let Some(&id) = self.loading.fn_by_args.get(&args) {
            return Ok(id);
        }

        let params = self
            .find_function_template(reg, &args)
            .map(|t| t.generic.params.clone())?;
        if !params.matches(args.arguments.size_list()) {
            return Err(LoaderError::generic("invalid generic arguments"));
        }
        let exports = self.check_function_constraints(reg, &args)?;

        let id = FunctionId::new(self.next_function_id);
        self.next_function_id += 1;
        trace!(%args, %id, "function handle created");

        let code = self.code(reg, &args.assembly, args.id)?;
        let build = FunctionBuild {
            id,
            args: args.clone(),
            code,
            referenced_types: Vec::new(),
            referenced_functions: Vec::new(),
            referenced_fields: Vec::new(),
            return_type: None,
            parameters: Vec::new(),
            exports,
        };
        self.loading.functions.insert(id, build);
        self.loading.fn_by_args.insert(args, id);
        self.loading.fn_queue.push(id);
        Ok(id)
    }

    fn check_type_constraints(
        &mut self,
        reg: &AssemblyRegistry,
        args: &LoadingArguments,
    ) -> Result<ConstraintExportList> {
        if self.loading.checking_types.contains(args) {
            return Err(LoaderError::circular("circular constraint check"));
        }
        self.loading.checking_types.push(args.clone());
        let checked = self.check_template_constraints(reg, args, false);
        self.loading.checking_types.pop();
        checked?.ok_or_else(|| LoaderError::generic("constraint check failed"))
    }

    fn check_function_constraints(
        &mut self,
        reg: &AssemblyRegistry,
        args: &LoadingArguments,
    ) -> Result<ConstraintExportList> {
        if self.loading.checking_functions.contains(args) {
            return Err(LoaderError::circular("circular constraint check"));
        }
        self.loading.checking_functions.push(args.clone());
        let checked = self.check_template_constraints(reg, args, true);
        self.loading.checking_functions.pop();
        checked?.ok_or_else(|| LoaderError::generic("constraint check failed"))
    }

    fn check_template_constraints<'r>(
        &mut self,
        reg: &'r AssemblyRegistry,
        args: &LoadingArguments,
        function: bool,
    ) -> Result<Option<ConstraintExportList>> {
        let g = if function {
            &self.find_function_template(reg, args)?.generic
        } else {
            &self.find_type_template(reg, args)?.generic
        };
        self.check_constraints(reg, &args.assembly, g, &args.arguments, true)
    }

    /// Drains the loading queues in priority order until everything has
    /// reached the finished queues.
    pub(crate) fn process_queues(&mut self, reg: &AssemblyRegistry) -> Result<()> {
        loop {
            debug_assert!(self.loading.value_stack.is_empty());
            if let Some(id) = self.loading.ref_queue.pop() {
                self.load_fields(reg, id)?;
                continue;
            }
            if let Some(id) = self.loading.post_queue.pop() {
                self.post_load_type(reg, id)?;
                continue;
            }
            if let Some(id) = self.loading.fn_queue.pop() {
                self.post_load_function(reg, id)?;
                continue;
            }
            break;
        }
        Ok(())
    }

    /// Resolves field types and computes the layout of one type.
    fn load_fields(&mut self, reg: &AssemblyRegistry, id: TypeId) -> Result<()> {
        let ctx = self.build_context(id)?;
        let args = self.loading.types[&id].args.clone();
        let template = self.find_type_template(reg, &args)?;

        let mut field_types = Vec::with_capacity(template.fields.len());
        for &type_index in &template.fields {
            let field = self
                .type_at(reg, &template.generic, &ctx, type_index)?
                .ok_or_else(|| LoaderError::program("invalid field type"))?;
            field_types.push(field);
        }

        let mut offset = 0usize;
        let mut max_alignment = 1usize;
        let mut fields = Vec::with_capacity(field_types.len());
        for field in field_types {
            let (length, alignment) = match self
                .type_storage(field)
                .ok_or_else(|| LoaderError::program("invalid field type"))?
            {
                StorageMode::Reference => (POINTER_SIZE, POINTER_SIZE),
                StorageMode::Value => self
                    .type_layout(field)
                    .ok_or_else(|| LoaderError::program("invalid field type"))?,
                StorageMode::Global => {
                    return Err(LoaderError::program("invalid field type"));
                }
            };
            offset = offset.next_multiple_of(alignment);
            max_alignment = max_alignment.max(alignment);
            fields.push(FieldInfo {
                ty: field,
                offset,
                length,
            });
            offset += length;
        }

        let build = self
            .loading
            .types
            .get_mut(&id)
            .expect("in-flight type must exist");
        build.fields = fields;
        build.size = offset.next_multiple_of(max_alignment).max(1);
        build.alignment = max_alignment;
        build.fields_done = true;
        trace!(%id, size = build.size, alignment = build.alignment, "fields laid out");
        self.loading.post_queue.push(id);
        Ok(())
    }

    /// Wires one laid-out type: initializer, finalizer, base type,
    /// interfaces, and static storage.
    fn post_load_type(&mut self, reg: &AssemblyRegistry, id: TypeId) -> Result<()> {
        let ctx = self.build_context(id)?;
        let args = self.loading.types[&id].args.clone();
        let template = self.find_type_template(reg, &args)?;

        let initializer = match template.initializer {
            Some(index) => self.function_at(reg, &template.generic, &ctx, index)?,
            None => None,
        };
        let finalizer = match template.finalizer {
            Some(index) => self.function_at(reg, &template.generic, &ctx, index)?,
            None => None,
        };
        let base = match template.base.target {
            Some(index) => self.type_at(reg, &template.generic, &ctx, index)?,
            None => None,
        };
        let mut interfaces = Vec::with_capacity(template.interfaces.len());
        for inheritance in &template.interfaces {
            let target = inheritance
                .target
                .ok_or_else(|| LoaderError::program("invalid interface reference"))?;
            let loaded = self
                .type_at(reg, &template.generic, &ctx, target)?
                .ok_or_else(|| LoaderError::program("invalid interface reference"))?;
            interfaces.push(loaded);
        }

        let build = self
            .loading
            .types
            .get_mut(&id)
            .expect("in-flight type must exist");
        build.initializer = initializer;
        build.finalizer = finalizer;
        build.base = base;
        build.interfaces = interfaces;
        if build.storage == StorageMode::Global {
            build.statics = Some(StaticStorage::new(build.size, build.alignment));
        }
        build.wired = true;
        self.loading.finished_types.push(id);
        Ok(())
    }

    /// Resolves every referenced type/function/field of one function,
    /// then its signature.
    fn post_load_function(&mut self, reg: &AssemblyRegistry, id: FunctionId) -> Result<()> {
        let (args, exports) = {
            let build = self
                .loading
                .functions
                .get(&id)
                .expect("in-flight function must exist");
            (build.args.clone(), build.exports.clone())
        };
        let template = self.find_function_template(reg, &args)?;
        let ctx = RefContext {
            assembly: args.assembly.clone(),
            args: args.arguments.clone(),
            self_type: None,
            exports,
        };

        let g = &template.generic;
        let mut referenced_types = Vec::with_capacity(g.types.len());
        for i in 0..g.types.len() {
            let loaded = match g.types[i].kind {
                RefKind::ListEnd | RefKind::Segment | RefKind::ArgSegment | RefKind::Empty => None,
                _ => self.type_at(reg, g, &ctx, i)?,
            };
            referenced_types.push(loaded);
        }
        let mut referenced_functions = Vec::with_capacity(g.functions.len());
        for i in 0..g.functions.len() {
            let loaded = match g.functions[i].kind {
                RefKind::ListEnd
                | RefKind::Segment
                | RefKind::Empty
                | RefKind::CloneType => None,
                _ => self.function_at(reg, g, &ctx, i)?,
            };
            referenced_functions.push(loaded);
        }
        let mut referenced_fields = Vec::with_capacity(g.fields.len());
        for i in 0..g.fields.len() {
            let loaded = match g.fields[i].kind {
                RefKind::ListEnd | RefKind::Segment | RefKind::Empty => None,
                _ => self.field_at(g, &ctx, i)?,
            };
            referenced_fields.push(loaded);
        }

        let return_type = *referenced_types
            .get(template.return_type)
            .ok_or_else(|| LoaderError::program("invalid function reference"))?;
        let mut parameters = Vec::with_capacity(template.parameters.len());
        for &p in &template.parameters {
            parameters.push(
                *referenced_types
                    .get(p)
                    .ok_or_else(|| LoaderError::program("invalid function reference"))?,
            );
        }

        let build = self
            .loading
            .functions
            .get_mut(&id)
            .expect("in-flight function must exist");
        build.referenced_types = referenced_types;
        build.referenced_functions = referenced_functions;
        build.referenced_fields = referenced_fields;
        build.return_type = return_type;
        build.parameters = parameters;
        self.loading.finished_functions.push(id);
        Ok(())
    }

    /// Final checks, observer hooks, and the atomic move of every
    /// finished object into the loaded tables.
    pub(crate) fn publish(&mut self, reg: &AssemblyRegistry) -> Result<()> {
        let finished_types = self.loading.finished_types.clone();
        let finished_functions = self.loading.finished_functions.clone();

        let mut pending_pointers = Vec::new();
        for &id in &finished_types {
            self.final_check_type(reg, id, &mut pending_pointers)?;
        }

        let mut new_types = Vec::with_capacity(finished_types.len());
        for &id in &finished_types {
            let build = self
                .loading
                .types
                .remove(&id)
                .expect("finished type must exist");
            new_types.push(Arc::new(build.freeze()));
        }
        let mut new_functions = Vec::with_capacity(finished_functions.len());
        for &id in &finished_functions {
            let build = self
                .loading
                .functions
                .remove(&id)
                .expect("finished function must exist");
            new_functions.push(Arc::new(build.freeze()));
        }

        for ty in &new_types {
            self.notify_type_loaded(ty)?;
        }
        for func in &new_functions {
            self.notify_function_loaded(func)?;
        }

        for ty in new_types {
            let id = ty.id;
            let args = ty.args.clone();
            self.insert_loaded_type(ty);
            self.type_index.insert(args, id);
        }
        for func in new_functions {
            let id = func.id;
            let args = func.args.clone();
            self.insert_loaded_function(func);
            self.function_index.insert(args, id);
        }
        for (element, pointer) in pending_pointers {
            let ty = self
                .loaded_type(element)
                .expect("pointer element must be loaded");
            let _fresh = ty.set_pointer_type(pointer);
            debug_assert!(_fresh, "pointer back-reference was validated as unset");
        }
        Ok(())
    }

    /// Signature validation and pointer back-reference wiring for one
    /// finished type.
    fn final_check_type(
        &mut self,
        reg: &AssemblyRegistry,
        id: TypeId,
        pending_pointers: &mut Vec<(TypeId, TypeId)>,
    ) -> Result<()> {
        let (storage, args, initializer, finalizer) = {
            let build = &self.loading.types[&id];
            (
                build.storage,
                build.args.clone(),
                build.initializer,
                build.finalizer,
            )
        };

        if let Some(init) = initializer {
            if storage != StorageMode::Global {
                return Err(LoaderError::program(
                    "initializer on a non-global-storage type",
                ));
            }
            let (ret, params) = self
                .function_signature(init)
                .ok_or_else(|| LoaderError::program("invalid initializer reference"))?;
            if ret.is_some() || !params.is_empty() {
                return Err(LoaderError::program("invalid initializer signature"));
            }
        }
        if let Some(fin) = finalizer {
            if storage != StorageMode::Reference {
                return Err(LoaderError::program("finalizer on a non-reference type"));
            }
            let (ret, params) = self
                .function_signature(fin)
                .ok_or_else(|| LoaderError::program("invalid finalizer reference"))?;
            if ret.is_some() || params != vec![Some(id)] {
                return Err(LoaderError::program("invalid finalizer signature"));
            }
        }

        if args.assembly == CORE_ASSEMBLY && Some(args.id) == reg.pointer_template() {
            let element = args
                .arguments
                .get(0, 0)
                .copied()
                .ok_or_else(|| LoaderError::program("invalid pointer instantiation"))?;
            if let Some(build) = self.loading.types.get_mut(&element) {
                if build.pointer_type.is_some() {
                    return Err(LoaderError::program("pointer type already set"));
                }
                build.pointer_type = Some(id);
            } else {
                let loaded = self
                    .loaded_type(element)
                    .ok_or_else(|| LoaderError::program("invalid pointer instantiation"))?;
                if loaded.pointer_type().is_some() {
                    return Err(LoaderError::program("pointer type already set"));
                }
                pending_pointers.push((element, id));
            }
        }
        Ok(())
    }

    fn build_context(&self, id: TypeId) -> Result<RefContext> {
        let build = self
            .loading
            .types
            .get(&id)
            .ok_or_else(|| LoaderError::program("invalid type reference"))?;
        Ok(RefContext {
            assembly: build.args.assembly.clone(),
            args: build.args.arguments.clone(),
            self_type: Some(id),
            exports: build.exports.clone(),
        })
    }

    pub(crate) fn insert_loaded_type(&mut self, ty: Arc<RuntimeType>) {
        let slot = ty.id.index();
        while self.loaded_types.len() <= slot {
            self.loaded_types.push(None);
        }
        debug_assert!(self.loaded_types[slot].is_none());
        self.loaded_types[slot] = Some(ty);
    }

    pub(crate) fn insert_loaded_function(&mut self, func: Arc<RuntimeFunction>) {
        let slot = func.id.index();
        while self.loaded_functions.len() <= slot {
            self.loaded_functions.push(None);
        }
        debug_assert!(self.loaded_functions[slot].is_none());
        self.loaded_functions[slot] = Some(func);
    }

    // In-flight objects and published objects are looked up uniformly;
    // the solver and the layout code cannot tell the difference.

    pub(crate) fn type_storage(&self, id: TypeId) -> Option<StorageMode> {
        if let Some(build) = self.loading.types.get(&id) {
            return Some(build.storage);
        }
        self.loaded_type(id).map(|t| t.storage)
    }

    pub(crate) fn type_layout(&self, id: TypeId) -> Option<(usize, usize)> {
        if let Some(build) = self.loading.types.get(&id) {
            return build.fields_done.then_some((build.size, build.alignment));
        }
        self.loaded_type(id).map(|t| (t.size, t.alignment))
    }

    pub(crate) fn lookup_type_args(&self, id: TypeId) -> Option<LoadingArguments> {
        if let Some(build) = self.loading.types.get(&id) {
            return Some(build.args.clone());
        }
        self.loaded_type(id).map(|t| t.args.clone())
    }

    pub(crate) fn type_fields(&self, id: TypeId) -> Vec<FieldInfo> {
        if let Some(build) = self.loading.types.get(&id) {
            return build.fields.clone();
        }
        self.loaded_type(id)
            .map(|t| t.fields.clone())
            .unwrap_or_default()
    }

    pub(crate) fn type_exports_of(&self, id: TypeId) -> ConstraintExportList {
        if let Some(build) = self.loading.types.get(&id) {
            return build.exports.clone();
        }
        self.loaded_type(id)
            .map(|t| t.exports.clone())
            .unwrap_or_default()
    }

    /// `(wired, base)` of a type; `wired` is false while the base is
    /// still unresolved in the pipeline.
    pub(crate) fn type_base_info(&self, id: TypeId) -> (bool, Option<TypeId>) {
        if let Some(build) = self.loading.types.get(&id) {
            return (build.wired, build.base);
        }
        match self.loaded_type(id) {
            Some(t) => (true, t.base),
            None => (false, None),
        }
    }

    pub(crate) fn type_interfaces_info(&self, id: TypeId) -> (bool, Vec<TypeId>) {
        if let Some(build) = self.loading.types.get(&id) {
            return (build.wired, build.interfaces.clone());
        }
        match self.loaded_type(id) {
            Some(t) => (true, t.interfaces.clone()),
            None => (false, Vec::new()),
        }
    }

    pub(crate) fn function_signature(
        &self,
        id: FunctionId,
    ) -> Option<(Option<TypeId>, Vec<Option<TypeId>>)> {
        if let Some(build) = self.loading.functions.get(&id) {
            return Some((build.return_type, build.parameters.clone()));
        }
        self.loaded_functions
            .get(id.index())
            .and_then(|f| f.as_ref())
            .map(|f| (f.return_type, f.parameters.clone()))
    }

    pub(crate) fn loaded_type(&self, id: TypeId) -> Option<&Arc<RuntimeType>> {
        self.loaded_types.get(id.index()).and_then(|t| t.as_ref())
    }

    pub(crate) fn find_type_template<'r>(
        &self,
        reg: &'r AssemblyRegistry,
        args: &LoadingArguments,
    ) -> Result<&'r aster_assemblies::TypeTemplate> {
        let a = reg
            .assembly(&args.assembly)
            .ok_or_else(|| LoaderError::link("referenced assembly not found"))?;
        a.types
            .get(args.id)
            .ok_or_else(|| LoaderError::program("invalid type reference"))
    }

    pub(crate) fn find_function_template<'r>(
        &self,
        reg: &'r AssemblyRegistry,
        args: &LoadingArguments,
    ) -> Result<&'r aster_assemblies::FunctionTemplate> {
        let a = reg
            .assembly(&args.assembly)
            .ok_or_else(|| LoaderError::link("referenced assembly not found"))?;
        a.functions
            .get(args.id)
            .ok_or_else(|| LoaderError::program("invalid function reference"))
    }
}

/// Composes the `LoadingArguments` of a nested template: the parent's
/// argument segments followed by the provided ones.
pub(crate) fn compose_subtype_arguments(
    parent: &MultiList<TypeId>,
    extra: &MultiList<TypeId>,
) -> MultiList<TypeId> {
    let mut composed = parent.clone();
    for segment in extra.iter_segments() {
        composed.new_segment();
        for &arg in segment {
            composed.push(arg);
        }
    }
    composed
}
