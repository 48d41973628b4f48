use std::fmt::{self, Display, Formatter};

/// Identifier of a published or in-flight runtime type.
///
/// Ids are non-zero and dense in the loaded table; slot 0 is reserved.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(pub u32);

impl Display for TypeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for TypeId {
    fn from(id: u32) -> Self {
        TypeId(id)
    }
}

impl From<TypeId> for u32 {
    fn from(id: TypeId) -> Self {
        id.0
    }
}

impl TypeId {
    pub fn new(id: u32) -> Self {
        TypeId(id)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Identifier of a published or in-flight runtime function.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FunctionId(pub u32);

impl Display for FunctionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for FunctionId {
    fn from(id: u32) -> Self {
        FunctionId(id)
    }
}

impl From<FunctionId> for u32 {
    fn from(id: FunctionId) -> Self {
        id.0
    }
}

impl FunctionId {
    pub fn new(id: u32) -> Self {
        FunctionId(id)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}
