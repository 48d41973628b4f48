use aster_assemblies::model::{ConstantEntry, LocalVariable, StorageMode};
use aster_utils::{FunctionId, MultiList, TypeId};
use std::fmt::{self, Display, Formatter};
use std::sync::{Arc, OnceLock};

/// Size of a reference-storage slot.
pub const POINTER_SIZE: usize = std::mem::size_of::<usize>();

/// The NOP opcode appended as tail padding to cached code blobs.
pub const OP_NOP: u8 = 0x00;
/// Number of NOP bytes appended to every cached code blob.
pub const NOP_PAD: usize = 16;

/// The key of an instantiation request: a template plus a segmented
/// generic-argument vector. Equality is structural.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct LoadingArguments {
    pub assembly: String,
    pub id: usize,
    pub arguments: MultiList<TypeId>,
}

impl LoadingArguments {
    pub fn new(assembly: impl Into<String>, id: usize, arguments: MultiList<TypeId>) -> Self {
        LoadingArguments {
            assembly: assembly.into(),
            id,
            arguments,
        }
    }

    /// A request with no generic arguments.
    pub fn plain(assembly: impl Into<String>, id: usize) -> Self {
        Self::new(assembly, id, MultiList::new())
    }
}

impl Display for LoadingArguments {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.assembly, self.id)?;
        if !self.arguments.is_empty() {
            write!(f, "<")?;
            for (i, arg) in self.arguments.iter().enumerate() {
                if i > 0 {
                    write!(f, ",")?;
                }
                write!(f, "{arg}")?;
            }
            write!(f, ">")?;
        }
        Ok(())
    }
}

/// One laid-out field of a runtime type.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FieldInfo {
    pub ty: TypeId,
    pub offset: usize,
    pub length: usize,
}

/// The process-lifetime storage region of a global-storage type. The
/// buffer is over-allocated by one alignment so an aligned address
/// always exists inside it.
#[derive(Debug)]
pub struct StaticStorage {
    buf: Box<[u8]>,
    aligned: usize,
}

impl StaticStorage {
    pub fn new(size: usize, alignment: usize) -> Self {
        let buf = vec![0u8; size + alignment].into_boxed_slice();
        let raw = buf.as_ptr() as usize;
        let aligned = raw.next_multiple_of(alignment) - raw;
        StaticStorage { buf, aligned }
    }

    /// First aligned address inside the region. The loader never writes
    /// through this pointer; the execution engine owns the contents.
    pub fn as_ptr(&self) -> *mut u8 {
        self.buf[self.aligned..].as_ptr() as *mut u8
    }
}

/// Constraint-export bindings of one instantiation, keyed by RefList
/// position within the owning generic declaration.
#[derive(Clone, Debug, Default)]
pub struct ConstraintExportList {
    pub types: Vec<(usize, TypeId)>,
    pub functions: Vec<(usize, FunctionId)>,
    pub fields: Vec<(usize, usize)>,
}

impl ConstraintExportList {
    pub fn type_at(&self, position: usize) -> Option<TypeId> {
        self.types
            .iter()
            .find(|(p, _)| *p == position)
            .map(|&(_, t)| t)
    }

    pub fn function_at(&self, position: usize) -> Option<FunctionId> {
        self.functions
            .iter()
            .find(|(p, _)| *p == position)
            .map(|&(_, f)| f)
    }

    pub fn field_at(&self, position: usize) -> Option<usize> {
        self.fields
            .iter()
            .find(|(p, _)| *p == position)
            .map(|&(_, f)| f)
    }
}

/// A fully materialized type. Owned by the loader; external callers hold
/// `Arc` handles that stay valid for the loader's lifetime. Immutable
/// after publication except for the monotonic pointer back-reference.
#[derive(Debug)]
pub struct RuntimeType {
    pub id: TypeId,
    pub args: LoadingArguments,
    pub storage: StorageMode,
    pub fields: Vec<FieldInfo>,
    pub size: usize,
    pub alignment: usize,
    pub base: Option<TypeId>,
    pub interfaces: Vec<TypeId>,
    pub initializer: Option<FunctionId>,
    pub finalizer: Option<FunctionId>,
    pub statics: Option<StaticStorage>,
    pub exports: ConstraintExportList,
    pointer_type: OnceLock<TypeId>,
}

impl RuntimeType {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_parts(
        id: TypeId,
        args: LoadingArguments,
        storage: StorageMode,
        fields: Vec<FieldInfo>,
        size: usize,
        alignment: usize,
        base: Option<TypeId>,
        interfaces: Vec<TypeId>,
        initializer: Option<FunctionId>,
        finalizer: Option<FunctionId>,
        statics: Option<StaticStorage>,
        exports: ConstraintExportList,
        pointer_type: Option<TypeId>,
    ) -> Self {
        let cell = OnceLock::new();
        if let Some(p) = pointer_type {
            let _ = cell.set(p);
        }
        RuntimeType {
            id,
            args,
            storage,
            fields,
            size,
            alignment,
            base,
            interfaces,
            initializer,
            finalizer,
            statics,
            exports,
            pointer_type: cell,
        }
    }

    /// Size of a field or slot holding this type.
    pub fn storage_size(&self) -> usize {
        match self.storage {
            StorageMode::Reference => POINTER_SIZE,
            StorageMode::Value | StorageMode::Global => self.size,
        }
    }

    /// Alignment of a field or slot holding this type.
    pub fn storage_alignment(&self) -> usize {
        match self.storage {
            StorageMode::Reference => POINTER_SIZE,
            StorageMode::Value | StorageMode::Global => self.alignment,
        }
    }

    /// The canonical pointer instantiation over this type, once loaded.
    pub fn pointer_type(&self) -> Option<TypeId> {
        self.pointer_type.get().copied()
    }

    pub fn static_pointer(&self) -> Option<*mut u8> {
        self.statics.as_ref().map(StaticStorage::as_ptr)
    }

    pub(crate) fn set_pointer_type(&self, id: TypeId) -> bool {
        self.pointer_type.set(id).is_ok()
    }
}

/// The byte-code blob of a function template, shared between all of its
/// instantiations. Immutable once cached.
#[derive(Clone, Debug)]
pub struct RuntimeFunctionCode {
    pub assembly: String,
    pub id: usize,
    pub instructions: Vec<u8>,
    pub constant_data: Vec<u8>,
    pub constant_table: Vec<ConstantEntry>,
    pub locals: Vec<LocalVariable>,
}

/// A fully materialized function. Referenced types and functions are
/// indexed by the position of the corresponding RefList entry; slots
/// that hold list structure rather than a reference are `None`.
#[derive(Debug)]
pub struct RuntimeFunction {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_storage_is_aligned() {
        for alignment in [1usize, 2, 4, 8, 16, 64] {
            let storage = StaticStorage::new(10, alignment);
            assert_eq!(storage.as_ptr() as usize % alignment, 0);
        }
    }

    #[test]
    fn loading_arguments_display() {
        let args = LoadingArguments::new(
            "M",
            3,
            MultiList::single(vec![TypeId::new(1), TypeId::new(2)]),
        );
        assert_eq!(args.to_string(), "M:3<1,2>");
        assert_eq!(LoadingArguments::plain("M", 0).to_string(), "M:0");
    }
}
