//! Aster: the loader and instantiation engine of a managed runtime
//! with parametric generics, traits, and nominal inheritance.
//!
//! The crate re-exports the three workspace layers:
//!
//! - [`assemblies`]: the immutable assembly bundle (templates, generic
//!   declarations, RefLists, constraints) and the registry that
//!   resolves imports and exports across assemblies.
//! - [`loader`]: the instantiation pipeline, the constraint solver,
//!   and the public [`RuntimeLoader`] API.
//! - [`utils`]: id newtypes and the segmented list used for generic
//!   argument vectors.

pub use aster_assemblies as assemblies;
pub use aster_loader as loader;
pub use aster_utils as utils;

pub use aster_assemblies::{
    Assembly, AssemblyRegistry, ConstantEntry, ConstraintKind, ExportRecord, FunctionTemplate,
    GenericConstraint, GenericDeclaration, ImportRecord, Inheritance, LocalVariable,
    NamedMember, RefEntry, RefKind, StorageMode, TraitField, TraitFunction, TraitTemplate,
    TraitTypeExport, TypeTemplate, VirtualFunction,
};
pub use aster_loader::{
    ConstraintExportList, ErrorKind, FieldInfo, LoaderError, LoaderObserver, LoadingArguments,
    POINTER_SIZE, RuntimeFunction, RuntimeLoader, RuntimeType,
};
pub use aster_utils::{FunctionId, MultiList, SegmentSizes, TypeId};
