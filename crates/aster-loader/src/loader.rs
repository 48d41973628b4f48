use crate::error::{LoaderError, Result};
use crate::pipeline::LoadingState;
use crate::runtime::{LoadingArguments, RuntimeFunction, RuntimeFunctionCode, RuntimeType};
use aster_assemblies::model::Assembly;
use aster_assemblies::registry::{BOX_EXPORT, CORE_ASSEMBLY, POINTER_EXPORT};
use aster_assemblies::AssemblyRegistry;
use aster_utils::{FunctionId, MultiList, TypeId};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Observer of finished objects. Hooks run before publication, while
/// the loader lock is held; returning an error fails the whole request.
/// Implementations must not call back into the loader.
pub trait LoaderObserver: Send {
    fn on_type_loaded(&mut self, ty: &RuntimeType) -> Result<()> {
        let _ = ty;
        Ok(())
    }

    fn on_function_loaded(&mut self, func: &RuntimeFunction) -> Result<()> {
        let _ = func;
        Ok(())
    }
}

pub(crate) struct LoaderInner {
    pub registry: Arc<AssemblyRegistry>,
    pub loaded_types: Vec<Option<Arc<RuntimeType>>>,
    pub loaded_functions: Vec<Option<Arc<RuntimeFunction>>>,
    pub type_index: HashMap<LoadingArguments, TypeId>,
    pub function_index: HashMap<LoadingArguments, FunctionId>,
    pub code_cache: DashMap<(String, usize), Arc<RuntimeFunctionCode>>,
    pub next_type_id: u32,
    pub next_function_id: u32,
    pub loading: LoadingState,
    observers: Vec<Box<dyn LoaderObserver>>,
}

/// The loader: materializes instantiation requests over an immutable
/// assembly bundle into published runtime objects.
///
/// A single process-wide mutex serializes all loading; the loader is
/// not expected to be hot. Requests are all-or-nothing: a failed
/// request publishes nothing and leaves the loaded tables untouched.
pub struct RuntimeLoader {
    inner: Mutex<LoaderInner>,
}

impl RuntimeLoader {
    pub fn new(assemblies: Vec<Assembly>) -> Self {
        Self::with_registry(AssemblyRegistry::new(assemblies))
    }

    pub fn with_registry(registry: AssemblyRegistry) -> Self {
        RuntimeLoader {
            inner: Mutex::new(LoaderInner {
                registry: Arc::new(registry),
                // Slot 0 is reserved; ids start at 1.
                loaded_types: vec![None],
                loaded_functions: vec![None],
                type_index: HashMap::new(),
                function_index: HashMap::new(),
                code_cache: DashMap::new(),
                next_type_id: 1,
                next_function_id: 1,
                loading: LoadingState::default(),
                observers: Vec::new(),
            }),
        }
    }

    pub fn add_observer(&self, observer: Box<dyn LoaderObserver>) {
        self.inner.lock().observers.push(observer);
    }

    /// Materializes a type instantiation, or returns the published
    /// object when the same request already succeeded.
    pub fn get_type(&self, args: &LoadingArguments) -> Result<Arc<RuntimeType>> {
        self.inner.lock().get_type_locked(args)
    }

    /// Materializes a function instantiation.
    pub fn get_function(&self, args: &LoadingArguments) -> Result<Arc<RuntimeFunction>> {
        self.inner.lock().get_function_locked(args)
    }

    pub fn get_type_by_id(&self, id: TypeId) -> Option<Arc<RuntimeType>> {
        self.inner.lock().loaded_type(id).cloned()
    }

    pub fn get_function_by_id(&self, id: FunctionId) -> Option<Arc<RuntimeFunction>> {
        let inner = self.inner.lock();
        inner
            .loaded_functions
            .get(id.index())
            .and_then(|f| f.clone())
    }

    /// Number of occupied slots in the loaded type table.
    pub fn loaded_type_count(&self) -> usize {
        self.inner
            .lock()
            .loaded_types
            .iter()
            .filter(|t| t.is_some())
            .count()
    }

    pub fn loaded_function_count(&self) -> usize {
        self.inner
            .lock()
            .loaded_functions
            .iter()
            .filter(|f| f.is_some())
            .count()
    }

    /// Registers a native type with a host-supplied layout.
    pub fn add_native_type(
        &self,
        assembly: &str,
        name: &str,
        size: usize,
        alignment: usize,
    ) -> Result<Arc<RuntimeType>> {
        self.inner
            .lock()
            .add_native_type_locked(assembly, name, size, alignment)
    }

    /// Resolves an exported type name to `(assembly, template id)`,
    /// transitively following re-exports.
    pub fn find_export_type(&self, assembly: &str, name: &str) -> Option<(String, usize)> {
        let inner = self.inner.lock();
        inner
            .registry
            .find_export_type(assembly, name)
            .map(|(a, id)| (a.to_string(), id))
    }

    pub fn find_export_function(&self, assembly: &str, name: &str) -> Option<(String, usize)> {
        let inner = self.inner.lock();
        inner
            .registry
            .find_export_function(assembly, name)
            .map(|(a, id)| (a.to_string(), id))
    }

    pub fn find_export_trait(&self, assembly: &str, name: &str) -> Option<(String, usize)> {
        let inner = self.inner.lock();
        inner
            .registry
            .find_export_trait(assembly, name)
            .map(|(a, id)| (a.to_string(), id))
    }

    pub fn find_export_constant(&self, assembly: &str, name: &str) -> Option<u32> {
        self.inner.lock().registry.find_export_constant(assembly, name)
    }

    /// The canonical `Core.Pointer<t>` instantiation.
    pub fn load_pointer_type(&self, ty: &RuntimeType) -> Result<Arc<RuntimeType>> {
        let mut inner = self.inner.lock();
        let template = inner
            .registry
            .pointer_template()
            .ok_or_else(|| LoaderError::link(format!("{POINTER_EXPORT} not exported")))?;
        let args = LoadingArguments::new(
            CORE_ASSEMBLY,
            template,
            MultiList::single(vec![ty.id]),
        );
        inner.get_type_locked(&args)
    }

    pub fn is_pointer_type(&self, ty: &RuntimeType) -> bool {
        let inner = self.inner.lock();
        inner.registry.pointer_template().is_some_and(|template| {
            ty.args.assembly == CORE_ASSEMBLY && ty.args.id == template
        })
    }

    /// The canonical `Core.Box<t>` instantiation.
    pub fn load_box_type(&self, ty: &RuntimeType) -> Result<Arc<RuntimeType>> {
        let mut inner = self.inner.lock();
        let template = inner
            .registry
            .box_template()
            .ok_or_else(|| LoaderError::link(format!("{BOX_EXPORT} not exported")))?;
        let args = LoadingArguments::new(
            CORE_ASSEMBLY,
            template,
            MultiList::single(vec![ty.id]),
        );
        inner.get_type_locked(&args)
    }
}

impl LoaderInner {
    fn get_type_locked(&mut self, args: &LoadingArguments) -> Result<Arc<RuntimeType>> {
        if let Some(&id) = self.type_index.get(args) {
            return Ok(self
                .loaded_type(id)
                .expect("indexed type must be loaded")
                .clone());
        }

        let reg = self.registry.clone();
        debug!(%args, "loading type");
        self.loading.clear();
        let saved_type_id = self.next_type_id;
        let saved_function_id = self.next_function_id;
        let result = self.run_type_request(&reg, args);
        self.loading.clear();
        match result {
            Ok(id) => Ok(self
                .loaded_type(id)
                .expect("published type must be loaded")
                .clone()),
            Err(err) => {
                self.next_type_id = saved_type_id;
                self.next_function_id = saved_function_id;
                debug!(%args, %err, "type load failed");
                Err(err)
            }
        }
    }

    fn run_type_request(&mut self, reg: &AssemblyRegistry, args: &LoadingArguments) -> Result<TypeId> {
        let id = self.load_type_internal(reg, args.clone())?;
        self.process_queues(reg)?;
        self.publish(reg)?;
        Ok(id)
    }

    fn get_function_locked(&mut self, args: &LoadingArguments) -> Result<Arc<RuntimeFunction>> {
        if let Some(&id) = self.function_index.get(args) {
            return Ok(self
                .loaded_functions[id.index()]
                .as_ref()
                .expect("indexed function must be loaded")
                .clone());
        }

        let reg = self.registry.clone();
        debug!(%args, "loading function");
        self.loading.clear();
        let saved_type_id = self.next_type_id;
        let saved_function_id = self.next_function_id;
        let result = self.run_function_request(&reg, args);
        self.loading.clear();
        match result {
            Ok(id) => Ok(self.loaded_functions[id.index()]
                .as_ref()
                .expect("published function must be loaded")
                .clone()),
            Err(err) => {
                self.next_type_id = saved_type_id;
                self.next_function_id = saved_function_id;
                debug!(%args, %err, "function load failed");
                Err(err)
            }
        }
    }

    fn run_function_request(
        &mut self,
        reg: &AssemblyRegistry,
        args: &LoadingArguments,
    ) -> Result<FunctionId> {
        let id = self.load_function_internal(reg, args.clone())?;
        self.process_queues(reg)?;
        self.publish(reg)?;
        Ok(id)
    }

    pub(crate) fn notify_type_loaded(&mut self, ty: &RuntimeType) -> Result<()> {
        for i in 0..self.observers.len() {
            self.observers[i].on_type_loaded(ty)?;
        }
        Ok(())
    }

    pub(crate) fn notify_function_loaded(&mut self, func: &RuntimeFunction) -> Result<()> {
        for i in 0..self.observers.len() {
            self.observers[i].on_function_loaded(func)?;
        }
        Ok(())
    }
}
