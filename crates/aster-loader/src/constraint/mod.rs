pub(crate) mod build;
pub(crate) mod exports;
pub(crate) mod node;
pub(crate) mod solve;
pub(crate) mod traits;

use self::node::CtRef;
use aster_assemblies::generics::GenericConstraint;
use aster_assemblies::model::TraitTemplate;
use aster_utils::MultiList;

/// A bound trait field: the declared type, the type found on the
/// target, and the target's field ordinal.
pub(crate) struct TraitFieldBind {
    pub declared: CtRef,
    pub in_target: CtRef,
    pub field_index: usize,
}

/// One candidate overload of a trait function on the target.
pub(crate) struct OverloadBind {
    /// Function RefList index in the target's declaration.
    pub index: usize,
    pub ret: CtRef,
    pub params: Vec<CtRef>,
}

/// A trait function with its declared signature and the surviving
/// candidate overloads; `current` is this function's odometer digit.
pub(crate) struct TraitFnBind {
    pub overloads: Vec<OverloadBind>,
    pub current: usize,
    pub ret: CtRef,
    pub params: Vec<CtRef>,
}

/// Per-constraint solver state: the constructed target and argument
/// trees, lazily built children for trait sub-constraints, and the
/// trait member resolution state.
pub(crate) struct ConstraintCache<'r> {
    pub source: &'r GenericConstraint,
    pub src_assembly: String,
    pub check_args: MultiList<CtRef>,
    /// The target the enclosing check was invoked on; a `Fail` node
    /// marks "no target".
    pub check_target: CtRef,
    pub target: CtRef,
    pub arguments: MultiList<CtRef>,
    pub children: Vec<ConstraintCache<'r>>,
    pub trait_created: bool,
    pub trait_resolved: bool,
    pub trait_template: Option<&'r TraitTemplate>,
    pub trait_assembly: String,
    pub trait_fields: Vec<TraitFieldBind>,
    pub trait_functions: Vec<TraitFnBind>,
    /// Placeholders introduced while reconstructing candidate
    /// signatures; all must resolve before the final check.
    pub fn_undetermined: Vec<CtRef>,
}

/// An ancestor entry used for circular-constraint detection: the
/// constraint's identity plus its check arguments.
pub(crate) struct AncestorEntry {
    pub source: *const GenericConstraint,
    pub check_args: MultiList<CtRef>,
}
