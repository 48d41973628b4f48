use aster_utils::SegmentSizes;

/// The kind of one RefList entry.
///
/// A RefList is a positional encoding of references: a complex entry
/// (`Assembly`, `Import`, `Subtype`) is followed, in successive slots, by
/// its argument entries until a `ListEnd` (or `Empty`) terminator, with
/// `Segment` separating variadic argument segments. Everything else
/// occupies a single slot, except that `Argument` may be followed by an
/// `ArgSegment` qualifier naming the argument's segment.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RefKind {
    /// Null yield; also terminates an argument list.
    Empty,
    /// Terminates the argument list of the enclosing complex entry.
    ListEnd,
    /// Closes the current argument segment and opens the next.
    Segment,
    /// Redirects to another entry of the same list.
    Clone,
    /// Template `index` of the current assembly, arguments following.
    Assembly,
    /// Template behind import record `index`, arguments following.
    Import,
    /// Name-indexed reference into the enclosing constraint export list.
    Constraint,
    /// The current generic argument at `index`.
    Argument,
    /// Segment qualifier for a preceding `Argument` entry.
    ArgSegment,
    /// The owning type, or the constraint target inside a trait.
    SelfRef,
    /// Nested template of the parent in the following slot; `index`
    /// names the member in the declaration's name list.
    Subtype,
    /// Function argument drawn from the companion type list.
    CloneType,
    /// A field ordinal; only valid in field-reference lists.
    FieldId,
    /// Marks the redirected entry as fallible inside the solver.
    Try,
    /// An undetermined placeholder for the solver.
    Any,
}

/// One slot of a RefList.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RefEntry {
    pub kind: RefKind,
    pub index: usize,
    /// Decoded FORCELOAD bit, preserved as data.
    pub force_load: bool,
}

impl RefEntry {
    pub fn new(kind: RefKind, index: usize) -> Self {
        RefEntry {
            kind,
            index,
            force_load: false,
        }
    }

    pub fn empty() -> Self {
        Self::new(RefKind::Empty, 0)
    }

    pub fn list_end() -> Self {
        Self::new(RefKind::ListEnd, 0)
    }

    pub fn segment() -> Self {
        Self::new(RefKind::Segment, 0)
    }

    pub fn clone_of(index: usize) -> Self {
        Self::new(RefKind::Clone, index)
    }

    pub fn assembly(index: usize) -> Self {
        Self::new(RefKind::Assembly, index)
    }

    pub fn import(index: usize) -> Self {
        Self::new(RefKind::Import, index)
    }

    pub fn constraint(name_index: usize) -> Self {
        Self::new(RefKind::Constraint, name_index)
    }

    pub fn argument(index: usize) -> Self {
        Self::new(RefKind::Argument, index)
    }

    pub fn arg_segment(segment: usize) -> Self {
        Self::new(RefKind::ArgSegment, segment)
    }

    pub fn self_ref() -> Self {
        Self::new(RefKind::SelfRef, 0)
    }

    pub fn subtype(name_index: usize) -> Self {
        Self::new(RefKind::Subtype, name_index)
    }

    pub fn clone_type(type_index: usize) -> Self {
        Self::new(RefKind::CloneType, type_index)
    }

    pub fn field_id(ordinal: usize) -> Self {
        Self::new(RefKind::FieldId, ordinal)
    }

    pub fn try_of(index: usize) -> Self {
        Self::new(RefKind::Try, index)
    }

    pub fn any() -> Self {
        Self::new(RefKind::Any, 0)
    }
}

/// The kind of a generic constraint.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ConstraintKind {
    /// The target is a loadable, fully determined type.
    Exist,
    /// The single argument equals the target.
    Same,
    /// The single argument appears in the target's base chain.
    Base,
    /// The target implements the single argument.
    Interface,
    /// The target satisfies trait `index` of the source assembly.
    TraitAssembly,
    /// The target satisfies the trait behind import record `index`.
    TraitImport,
}

/// A predicate over a generic declaration's arguments.
///
/// `type_references` is a small scratch RefList private to the
/// constraint; `target` and `arguments` index into it. A non-empty
/// `export_name` makes the satisfied constraint's members available to
/// `Constraint`-kind entries of the enclosing declaration under
/// `"<export_name>/..."` names.
#[derive(Clone, Debug)]
pub struct GenericConstraint {
    pub kind: ConstraintKind,
    pub index: usize,
    pub type_references: Vec<RefEntry>,
    pub names: Vec<String>,
    pub target: usize,
    pub arguments: Vec<usize>,
    pub export_name: String,
}

impl Default for GenericConstraint {
    fn default() -> Self {
        GenericConstraint {
            kind: ConstraintKind::Exist,
            index: 0,
            type_references: Vec::new(),
            names: Vec::new(),
            target: 0,
            arguments: Vec::new(),
            export_name: String::new(),
        }
    }
}

/// The generic surface of a template: parameter shape, constraints, and
/// the type/function/field RefLists with their shared name list.
#[derive(Clone, Debug, Default)]
pub struct GenericDeclaration {
    pub params: SegmentSizes,
    pub constraints: Vec<GenericConstraint>,
    pub types: Vec<RefEntry>,
    pub functions: Vec<RefEntry>,
    pub fields: Vec<RefEntry>,
    pub names: Vec<String>,
}

impl GenericDeclaration {
    pub fn name(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }
}
