use crate::error::{LoaderError, Result};
use crate::loader::LoaderInner;
use crate::runtime::{NOP_PAD, OP_NOP, RuntimeFunctionCode};
use aster_assemblies::AssemblyRegistry;
use std::sync::Arc;

impl LoaderInner {
    /// Returns the shared code blob for a function template, building and
    /// caching it on first use. Templates with no code yield `None`.
    pub(crate) fn code(
        &self,
        reg: &AssemblyRegistry,
        assembly: &str,
        id: usize,
    ) -> Result<Option<Arc<RuntimeFunctionCode>>> {
        let key = (assembly.to_string(), id);
        if let Some(cached) = self.code_cache.get(&key) {
            return Ok(Some(cached.clone()));
        }

        let template = reg
            .function_template(assembly, id)
            .ok_or_else(|| LoaderError::program("invalid function reference"))?;
        if template.instructions.is_empty()
            && template.constant_data.is_empty()
            && template.constant_table.is_empty()
        {
            return Ok(None);
        }

        let mut code = RuntimeFunctionCode {
            assembly: assembly.to_string(),
            id,
            instructions: template.instructions.clone(),
            constant_data: template.constant_data.clone(),
            constant_table: template.constant_table.clone(),
            locals: template.locals.clone(),
        };
        code.instructions.extend([OP_NOP; NOP_PAD]);

        // A zero-length constant entry carries an import-record index in
        // its offset; resolve it to a literal 32-bit value.
        for entry in &mut code.constant_table {
            if entry.length == 0 {
                let value = load_import_constant(reg, assembly, entry.offset)?;
                entry.offset = code.constant_data.len();
                entry.length = 4;
                code.constant_data.extend(value.to_le_bytes());
            }
        }

        let blob = Arc::new(code);
        self.code_cache.insert(key, blob.clone());
        Ok(Some(blob))
    }
}

fn load_import_constant(reg: &AssemblyRegistry, assembly: &str, index: usize) -> Result<u32> {
    let a = reg
        .assembly(assembly)
        .ok_or_else(|| LoaderError::link("referenced assembly not found"))?;
    let record = a
        .import_constants
        .get(index)
        .ok_or_else(|| LoaderError::program("invalid constant import reference"))?;
    if record.generic_params.unwrap_or(0) != 0 {
        return Err(LoaderError::program("invalid constant import"));
    }
    reg.find_export_constant(&record.assembly, &record.name)
        .ok_or_else(|| LoaderError::link("constant export not found"))
}
