use crate::generics::GenericDeclaration;

/// How instances of a type are stored and passed around.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StorageMode {
    /// Inline value storage; fields embed the full payload.
    Value,
    /// Heap reference storage; fields hold a pointer.
    Reference,
    /// Value storage plus a single process-lifetime static region.
    Global,
}

/// A named member of a template, pointing at an index whose meaning
/// depends on the table it sits in (field ordinal, RefList index, ...).
#[derive(Clone, Debug)]
pub struct NamedMember {
    pub name: String,
    pub index: usize,
}

impl NamedMember {
    pub fn new(name: impl Into<String>, index: usize) -> Self {
        NamedMember {
            name: name.into(),
            index,
        }
    }
}

/// A virtual slot visible on a base type or interface.
#[derive(Clone, Debug)]
pub struct VirtualFunction {
    pub name: String,
    /// Index of the virtual slot's function in the owner's function
    /// RefList.
    pub virtual_index: usize,
}

/// A base-type or interface declaration of a type template.
#[derive(Clone, Debug, Default)]
pub struct Inheritance {
    /// Index into the type RefList; `None` when nothing is inherited.
    pub target: Option<usize>,
    pub virtual_functions: Vec<VirtualFunction>,
}

/// An immutable description of a type, parameterized by generic
/// arguments.
#[derive(Clone, Debug)]
pub struct TypeTemplate {
    pub generic: GenericDeclaration,
    pub storage: StorageMode,
    /// Field types, as indices into the type RefList, in declaration
    /// order.
    pub fields: Vec<usize>,
    /// Public fields: name to field ordinal.
    pub public_fields: Vec<NamedMember>,
    /// Public functions: name to function RefList index.
    pub public_functions: Vec<NamedMember>,
    /// Nested types: name to type RefList index.
    pub subtypes: Vec<NamedMember>,
    pub base: Inheritance,
    pub interfaces: Vec<Inheritance>,
    /// Index into the function RefList; global-storage types only.
    pub initializer: Option<usize>,
    /// Index into the function RefList; reference types only.
    pub finalizer: Option<usize>,
}

impl TypeTemplate {
    pub fn new(storage: StorageMode) -> Self {
        TypeTemplate {
            generic: GenericDeclaration::default(),
            storage,
            fields: Vec::new(),
            public_fields: Vec::new(),
            public_functions: Vec::new(),
            subtypes: Vec::new(),
            base: Inheritance::default(),
            interfaces: Vec::new(),
            initializer: None,
            finalizer: None,
        }
    }
}

/// One entry of a function's constant table. A `length` of zero marks an
/// import-constant slot whose `offset` carries the import-record index
/// until the code cache resolves it.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ConstantEntry {
    pub offset: usize,
    pub length: usize,
}

/// A local variable of a function body.
#[derive(Copy, Clone, Debug)]
pub struct LocalVariable {
    /// Index into the function template's type RefList.
    pub type_index: usize,
}

/// An immutable description of a function, parameterized by generic
/// arguments.
#[derive(Clone, Debug, Default)]
pub struct FunctionTemplate {
    pub generic: GenericDeclaration,
    /// Index into the type RefList; an `Empty` entry means no return.
    pub return_type: usize,
    /// Indices into the type RefList, one per parameter.
    pub parameters: Vec<usize>,
    pub instructions: Vec<u8>,
    pub constant_data: Vec<u8>,
    pub constant_table: Vec<ConstantEntry>,
    pub locals: Vec<LocalVariable>,
}

/// A field required by a trait on its target.
#[derive(Clone, Debug)]
pub struct TraitField {
    pub name: String,
    pub export_name: String,
    /// Index into the trait's type RefList.
    pub type_index: usize,
}

/// A function required by a trait on its target.
#[derive(Clone, Debug)]
pub struct TraitFunction {
    pub name: String,
    pub export_name: String,
    /// Index into the trait's type RefList.
    pub return_type: usize,
    /// Indices into the trait's type RefList.
    pub parameter_types: Vec<usize>,
}

/// A type exported by name from a satisfied trait constraint.
#[derive(Clone, Debug)]
pub struct TraitTypeExport {
    pub export_name: String,
    /// Index into the trait's type RefList.
    pub index: usize,
}

/// An immutable trait description: member requirements over a target
/// type, plus exported names.
#[derive(Clone, Debug, Default)]
pub struct TraitTemplate {
    pub generic: GenericDeclaration,
    pub fields: Vec<TraitField>,
    pub functions: Vec<TraitFunction>,
    pub types: Vec<TraitTypeExport>,
}

/// An import record naming an entity of another assembly.
#[derive(Clone, Debug)]
pub struct ImportRecord {
    pub assembly: String,
    pub name: String,
    /// Declared arity of the imported entity; checked against the
    /// resolved template when present.
    pub generic_params: Option<usize>,
}

impl ImportRecord {
    pub fn new(assembly: impl Into<String>, name: impl Into<String>) -> Self {
        ImportRecord {
            assembly: assembly.into(),
            name: name.into(),
            generic_params: None,
        }
    }

    pub fn with_arity(mut self, n: usize) -> Self {
        self.generic_params = Some(n);
        self
    }
}

/// An export record. An `internal_id` beyond the local table length
/// re-exports import record `internal_id - table_len`.
#[derive(Clone, Debug)]
pub struct ExportRecord {
    pub name: String,
    pub internal_id: usize,
}

impl ExportRecord {
    pub fn new(name: impl Into<String>, internal_id: usize) -> Self {
        ExportRecord {
            name: name.into(),
            internal_id,
        }
    }
}

/// A bundle of templates plus import/export tables; the unit of
/// namespacing. Immutable for the loader's lifetime.
#[derive(Clone, Debug, Default)]
pub struct Assembly {
    pub name: String,
    pub types: Vec<TypeTemplate>,
    pub functions: Vec<FunctionTemplate>,
    pub traits: Vec<TraitTemplate>,
    pub import_types: Vec<ImportRecord>,
    pub import_functions: Vec<ImportRecord>,
    pub import_traits: Vec<ImportRecord>,
    pub import_constants: Vec<ImportRecord>,
    pub export_types: Vec<ExportRecord>,
    pub export_functions: Vec<ExportRecord>,
    pub export_traits: Vec<ExportRecord>,
    pub export_constants: Vec<ExportRecord>,
    /// Exports registerable through native type registration.
    pub native_types: Vec<ExportRecord>,
}

impl Assembly {
    pub fn named(name: impl Into<String>) -> Self {
        Assembly {
            name: name.into(),
            ..Assembly::default()
        }
    }
}
