pub mod error;
pub mod runtime;

mod code;
mod constraint;
mod loader;
mod native;
mod pipeline;
mod reflist;
mod subtype;

pub use error::{ErrorKind, LoaderError};
pub use loader::{LoaderObserver, RuntimeLoader};
pub use runtime::{
    ConstraintExportList, FieldInfo, LoadingArguments, POINTER_SIZE, RuntimeFunction,
    RuntimeFunctionCode, RuntimeType, StaticStorage,
};
