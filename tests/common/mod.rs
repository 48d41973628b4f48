#![allow(dead_code)]

use aster::{
    Assembly, LoadingArguments, MultiList, RuntimeType, StorageMode, TypeId, TypeTemplate,
};
use std::sync::Once;

static TRACING: Once = Once::new();

/// Installs the test log subscriber once; run with `RUST_LOG=trace` to
/// watch the pipeline.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("off")),
            )
            .with_test_writer()
            .try_init();
    });
}

pub fn value_type() -> TypeTemplate {
    TypeTemplate::new(StorageMode::Value)
}

pub fn reference_type() -> TypeTemplate {
    TypeTemplate::new(StorageMode::Reference)
}

pub fn global_type() -> TypeTemplate {
    TypeTemplate::new(StorageMode::Global)
}

/// A single-segment argument list over loaded types.
pub fn args_of(types: &[&RuntimeType]) -> MultiList<TypeId> {
    MultiList::single(types.iter().map(|t| t.id).collect())
}

pub fn request(assembly: &str, id: usize, types: &[&RuntimeType]) -> LoadingArguments {
    if types.is_empty() {
        LoadingArguments::plain(assembly, id)
    } else {
        LoadingArguments::new(assembly, id, args_of(types))
    }
}

/// An assembly that exports native value-type templates `I32` (4/4)
/// and `I8` (1/1) as template ids 0 and 1.
pub fn assembly_with_natives(name: &str) -> Assembly {
    use aster::ExportRecord;
    let mut a = Assembly::named(name);
    a.types.push(value_type());
    a.types.push(value_type());
    a.native_types.push(ExportRecord::new("I32", 0));
    a.native_types.push(ExportRecord::new("I8", 1));
    a
}
