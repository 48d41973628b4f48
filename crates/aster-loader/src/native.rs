use crate::error::{LoaderError, Result};
use crate::loader::LoaderInner;
use crate::runtime::{LoadingArguments, RuntimeType};
use aster_assemblies::model::StorageMode;
use aster_utils::TypeId;
use std::sync::Arc;
use tracing::debug;

impl LoaderInner {
    /// Registers a native type: a value-typed, non-generic template
    /// whose size and alignment are supplied by the host instead of
    /// being computed from fields. Published directly; no queues needed.
    pub(crate) fn add_native_type_locked(
        &mut self,
        assembly: &str,
        name: &str,
        size: usize,
        alignment: usize,
    ) -> Result<Arc<RuntimeType>> {
        let reg = self.registry.clone();
        let a = reg
            .assembly(assembly)
            .ok_or_else(|| LoaderError::link("referenced assembly not found"))?;
        let id = a
            .native_types
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.internal_id)
            .ok_or_else(|| LoaderError::link("native type not found"))?;
        let template = a
            .types
            .get(id)
            .ok_or_else(|| LoaderError::program("invalid type reference"))?;

        if !template.generic.params.is_empty() {
            return Err(LoaderError::program("native type cannot be generic"));
        }
        if template.storage != StorageMode::Value {
            return Err(LoaderError::program("native type must use value storage"));
        }
        if template.initializer.is_some() || template.finalizer.is_some() {
            return Err(LoaderError::program(
                "native type cannot have an initializer or finalizer",
            ));
        }
        if size == 0 || alignment == 0 || !alignment.is_power_of_two() {
            return Err(LoaderError::program("invalid native type layout"));
        }

        let args = LoadingArguments::plain(assembly, id);
        if self.type_index.contains_key(&args) {
            return Err(LoaderError::program("native type already loaded"));
        }

        let type_id = TypeId::new(self.next_type_id);
        self.next_type_id += 1;
        debug!(%args, %type_id, size, alignment, "native type registered");

        let ty = Arc::new(RuntimeType::from_parts(
            type_id,
            args.clone(),
            StorageMode::Value,
            Vec::new(),
            size,
            alignment,
            None,
            Vec::new(),
            None,
            None,
            None,
            Default::default(),
            None,
        ));
        self.insert_loaded_type(ty.clone());
        self.type_index.insert(args, type_id);
        Ok(ty)
    }
}
