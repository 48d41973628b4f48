pub mod generics;
pub mod model;
pub mod registry;

pub use generics::{
    ConstraintKind, GenericConstraint, GenericDeclaration, RefEntry, RefKind,
};
pub use model::{
    Assembly, ConstantEntry, ExportRecord, FunctionTemplate, ImportRecord, Inheritance,
    LocalVariable, NamedMember, StorageMode, TraitField, TraitFunction, TraitTemplate,
    TraitTypeExport, TypeTemplate, VirtualFunction,
};
pub use registry::AssemblyRegistry;
