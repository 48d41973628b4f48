use aster_utils::{MultiList, TypeId};

/// Index of a constraint-type node in its root's arena.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct CtRef(pub usize);

/// A node of the solver's type tree. Leaves are `Rt`/`Empty`/`Any`;
/// internal nodes are not-yet-instantiated templates or unresolved
/// nested names. `Fail` marks impossibility.
#[derive(Clone, Debug)]
pub(crate) enum CtKind {
    Fail,
    Empty,
    /// A placeholder owned by the root's undetermined table.
    Any(usize),
    /// Resolved to a concrete runtime type.
    Rt(TypeId),
    /// A template with constraint-type arguments, possibly containing
    /// placeholders.
    Generic {
        assembly: String,
        index: usize,
        args: MultiList<CtRef>,
    },
    /// An unresolved nested-template reference.
    Subtype {
        parent: CtRef,
        name: String,
        args: MultiList<CtRef>,
    },
}

struct CtNode {
    kind: CtKind,
    /// Mark-stack depth at deduction time; 0 while undeducted.
    level: usize,
    /// Simplification failures demote this node to `Fail` instead of
    /// aborting the request.
    try_constraint: bool,
}

enum LogEntry {
    Deduct {
        node: CtRef,
        prev: CtKind,
        prev_level: usize,
    },
    Bind(usize),
}

/// Arena of constraint-type nodes plus the undetermined table and the
/// deduction log that makes every speculative step reversible.
#[derive(Default)]
pub(crate) struct SolverRoot {
    nodes: Vec<CtNode>,
    undetermined: Vec<Option<TypeId>>,
    log: Vec<LogEntry>,
    marks: Vec<usize>,
}

impl SolverRoot {
    pub fn new() -> Self {
        SolverRoot::default()
    }

    pub fn alloc(&mut self, kind: CtKind) -> CtRef {
        let r = CtRef(self.nodes.len());
        self.nodes.push(CtNode {
            kind,
            level: 0,
            try_constraint: false,
        });
        r
    }

    pub fn fail(&mut self) -> CtRef {
        self.alloc(CtKind::Fail)
    }

    pub fn empty(&mut self) -> CtRef {
        self.alloc(CtKind::Empty)
    }

    pub fn rt(&mut self, t: TypeId) -> CtRef {
        self.alloc(CtKind::Rt(t))
    }

    /// A fresh placeholder with its own undetermined slot.
    pub fn fresh_any(&mut self) -> CtRef {
        let slot = self.undetermined.len();
        self.undetermined.push(None);
        self.alloc(CtKind::Any(slot))
    }

    pub fn mark_try(&mut self, r: CtRef) {
        self.nodes[r.0].try_constraint = true;
    }

    pub fn try_flag(&self, r: CtRef) -> bool {
        self.nodes[r.0].try_constraint
    }

    pub fn kind(&self, r: CtRef) -> &CtKind {
        &self.nodes[r.0].kind
    }

    /// The concrete type of a node, when it has simplified to one.
    pub fn determined_of(&self, r: CtRef) -> Option<TypeId> {
        match self.nodes[r.0].kind {
            CtKind::Rt(t) => Some(t),
            _ => None,
        }
    }

    pub fn binding(&self, slot: usize) -> Option<TypeId> {
        self.undetermined[slot]
    }

    /// Binds an undetermined slot, logging the step for backtracking.
    pub fn bind(&mut self, slot: usize, t: TypeId) {
        debug_assert!(self.undetermined[slot].is_none());
        self.undetermined[slot] = Some(t);
        self.log.push(LogEntry::Bind(slot));
    }

    /// Replaces a node's kind, logging the prior state.
    pub fn deduct(&mut self, r: CtRef, kind: CtKind) {
        let node = &mut self.nodes[r.0];
        debug_assert_eq!(node.level, 0, "a node is deducted at most once");
        let prev = std::mem::replace(&mut node.kind, kind);
        let prev_level = node.level;
        node.level = self.marks.len();
        self.log.push(LogEntry::Deduct {
            node: r,
            prev,
            prev_level,
        });
    }

    pub fn deduct_rt(&mut self, r: CtRef, t: TypeId) {
        self.deduct(r, CtKind::Rt(t));
    }

    pub fn deduct_fail(&mut self, r: CtRef) {
        self.deduct(r, CtKind::Fail);
    }

    /// Opens a backtrack point and returns its handle.
    pub fn start_mark(&mut self) -> usize {
        self.marks.push(self.log.len());
        self.marks.len() - 1
    }

    /// Reverts every deduction and binding made since the mark.
    pub fn backtrack(&mut self, mark: usize) {
        let floor = self.marks[mark];
        while self.log.len() > floor {
            match self.log.pop().unwrap() {
                LogEntry::Deduct {
                    node,
                    prev,
                    prev_level,
                } => {
                    let n = &mut self.nodes[node.0];
                    debug_assert!(n.level > mark);
                    n.kind = prev;
                    n.level = prev_level;
                }
                LogEntry::Bind(slot) => {
                    self.undetermined[slot] = None;
                }
            }
        }
        self.marks.truncate(mark);
    }

    /// Drops the log and marks between constraints; surviving
    /// deductions become permanent.
    pub fn clear_log(&mut self) {
        self.log.clear();
        self.marks.clear();
        for node in &mut self.nodes {
            node.level = 0;
        }
    }

    /// Whether the node still contains an unbound placeholder.
    pub fn is_undetermined(&self, r: CtRef) -> bool {
        match &self.nodes[r.0].kind {
            CtKind::Rt(_) | CtKind::Empty | CtKind::Fail => false,
            CtKind::Any(slot) => self.binding(*slot).is_none(),
            CtKind::Generic { args, .. } => args.iter().any(|&a| self.is_undetermined(a)),
            CtKind::Subtype { parent, args, .. } => {
                self.is_undetermined(*parent) || args.iter().any(|&a| self.is_undetermined(a))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backtracking_reverts_deductions_and_bindings() {
        let mut root = SolverRoot::new();
        let any = root.fresh_any();
        let &CtKind::Any(slot) = root.kind(any) else {
            panic!("expected an Any node");
        };

        let mark = root.start_mark();
        root.bind(slot, TypeId::new(7));
        root.deduct_rt(any, TypeId::new(7));
        assert_eq!(root.determined_of(any), Some(TypeId::new(7)));
        assert!(!root.is_undetermined(any));

        root.backtrack(mark);
        assert!(matches!(root.kind(any), CtKind::Any(_)));
        assert_eq!(root.binding(slot), None);
        assert!(root.is_undetermined(any));
    }

    #[test]
    fn deductions_before_mark_survive() {
        let mut root = SolverRoot::new();
        let a = root.fresh_any();
        let b = root.fresh_any();
        let &CtKind::Any(slot_a) = root.kind(a) else {
            unreachable!()
        };

        root.start_mark();
        root.bind(slot_a, TypeId::new(1));
        root.deduct_rt(a, TypeId::new(1));

        let inner = root.start_mark();
        root.deduct_rt(b, TypeId::new(2));
        root.backtrack(inner);

        assert_eq!(root.determined_of(a), Some(TypeId::new(1)));
        assert!(matches!(root.kind(b), CtKind::Any(_)));
    }

    #[test]
    fn undetermined_walks_nested_arguments() {
        let mut root = SolverRoot::new();
        let any = root.fresh_any();
        let rt = root.rt(TypeId::new(3));
        let generic = root.alloc(CtKind::Generic {
            assembly: "M".into(),
            index: 0,
            args: MultiList::single(vec![rt, any]),
        });
        assert!(root.is_undetermined(generic));

        let &CtKind::Any(slot) = root.kind(any) else {
            unreachable!()
        };
        root.bind(slot, TypeId::new(4));
        assert!(!root.is_undetermined(generic));
    }
}
