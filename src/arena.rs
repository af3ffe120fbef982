//! Arena-backed tree model for the output syntax tree.
//!
//! Nodes live in a single arena and are addressed by stable [`NodeId`]
//! indices; parent/child/sibling relationships are index fields, so
//! reparenting is O(1) and never touches node payloads.
//!
//! # Invariants
//!
//! - A node has at most one parent. Attaching a node that already has a
//!   parent panics; callers must detach first.
//! - Per-kind null sentinels represent "absent" without an `Option`. They
//!   are created once per arena and can never be attached, detached, or
//!   mutated.
//! - Children are stored in insertion order; same-role children form an
//!   ordered collection. Traversal is pre-order, left-to-right, so every
//!   consumer sees nodes in a reproducible order.

use crate::node::{NodeData, NodeKind, Role};

/// Stable index of a node within its [`Arena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    fn new(index: usize) -> Self {
        Self(u32::try_from(index).expect("arena exceeded u32::MAX nodes"))
    }

    fn index(self) -> usize {
        self.0 as usize
    }
}

/// One arena slot: payload plus structural links.
#[derive(Debug, Clone)]
struct Slot {
    data: NodeData,
    parent: Option<NodeId>,
    /// The slot of the parent this node occupies. Meaningless for roots;
    /// kept so a detached node can be re-attached under a different role.
    role: Role,
    children: Vec<NodeId>,
}

// ═══════════════════════════════════════════════════════════════════════════
// Arena
// ═══════════════════════════════════════════════════════════════════════════

/// Owner of every node in one output tree.
///
/// One arena belongs to one decompilation request; it is never shared across
/// concurrent rewrites.
#[derive(Debug)]
pub struct Arena {
    slots: Vec<Slot>,
    /// Null sentinel per kind, indexed by `NodeKind::index`.
    nulls: Vec<NodeId>,
}

impl Arena {
    /// Create an empty arena with its null sentinels pre-seeded.
    pub fn new() -> Self {
        let mut arena = Self {
            slots: Vec::new(),
            nulls: Vec::new(),
        };
        for &kind in NodeKind::ALL {
            let id = arena.alloc(NodeData::Null(kind));
            arena.nulls.push(id);
        }
        arena
    }

    fn alloc(&mut self, data: NodeData) -> NodeId {
        let id = NodeId::new(self.slots.len());
        self.slots.push(Slot {
            data,
            parent: None,
            role: Role::Target,
            children: Vec::new(),
        });
        id
    }

    /// Create a detached node with the given payload.
    pub fn new_node(&mut self, data: NodeData) -> NodeId {
        assert!(!data.is_null(), "null sentinels are owned by the arena");
        self.alloc(data)
    }

    /// The null sentinel for `kind`.
    pub fn null(&self, kind: NodeKind) -> NodeId {
        self.nulls[kind.index()]
    }

    /// Whether `id` is a null sentinel.
    pub fn is_null(&self, id: NodeId) -> bool {
        self.slots[id.index()].data.is_null()
    }

    /// Number of nodes allocated, sentinels included.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the arena holds only its sentinels.
    pub fn is_empty(&self) -> bool {
        self.slots.len() == self.nulls.len()
    }

    // ───────────────────────────────────────────────────────────────────────
    // Payload access
    // ───────────────────────────────────────────────────────────────────────

    /// The payload of `id`.
    pub fn data(&self, id: NodeId) -> &NodeData {
        &self.slots[id.index()].data
    }

    /// Mutable payload access. Panics on null sentinels.
    pub fn data_mut(&mut self, id: NodeId) -> &mut NodeData {
        let slot = &mut self.slots[id.index()];
        assert!(!slot.data.is_null(), "cannot mutate a null sentinel");
        &mut slot.data
    }

    /// The kind tag of `id`.
    pub fn kind(&self, id: NodeId) -> NodeKind {
        self.slots[id.index()].data.kind()
    }

    // ───────────────────────────────────────────────────────────────────────
    // Structure queries
    // ───────────────────────────────────────────────────────────────────────

    /// The parent of `id`, if attached.
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.slots[id.index()].parent
    }

    /// The role `id` occupies in its parent. Only meaningful while attached.
    pub fn role(&self, id: NodeId) -> Role {
        self.slots[id.index()].role
    }

    /// All children of `id`, in insertion order across roles.
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.slots[id.index()].children
    }

    /// Children of `id` occupying `role`, in order.
    pub fn children_with_role(&self, id: NodeId, role: Role) -> Vec<NodeId> {
        self.slots[id.index()]
            .children
            .iter()
            .copied()
            .filter(|&c| self.slots[c.index()].role == role)
            .collect()
    }

    /// The first child of `id` occupying `role`, if present.
    pub fn child(&self, id: NodeId, role: Role) -> Option<NodeId> {
        self.slots[id.index()]
            .children
            .iter()
            .copied()
            .find(|&c| self.slots[c.index()].role == role)
    }

    /// Like [`Arena::child`], but absent slots yield the placeholder null
    /// sentinel so pattern code can match "real node or emptiness" uniformly.
    pub fn child_or_null(&self, id: NodeId, role: Role) -> NodeId {
        self.child(id, role)
            .unwrap_or_else(|| self.null(NodeKind::Placeholder))
    }

    /// Whether `node` lies in the subtree rooted at `root`.
    pub fn is_reachable_from(&self, root: NodeId, node: NodeId) -> bool {
        let mut cur = Some(node);
        while let Some(id) = cur {
            if id == root {
                return true;
            }
            cur = self.parent(id);
        }
        false
    }

    // ───────────────────────────────────────────────────────────────────────
    // Structure mutation
    // ───────────────────────────────────────────────────────────────────────

    /// Attach `child` under `parent` at the end of its child list.
    ///
    /// Panics if `child` already has a parent or is a null sentinel; a node
    /// mutation is a single attach/detach, so an attached node must be
    /// detached explicitly first.
    pub fn attach(&mut self, parent: NodeId, role: Role, child: NodeId) {
        self.pre_attach_checks(parent, child);
        self.slots[child.index()].parent = Some(parent);
        self.slots[child.index()].role = role;
        self.slots[parent.index()].children.push(child);
    }

    /// Attach `child` immediately before `anchor` in `parent`'s child list.
    ///
    /// Panics if `anchor` is not a child of `parent`.
    pub fn insert_before(&mut self, parent: NodeId, anchor: NodeId, role: Role, child: NodeId) {
        self.pre_attach_checks(parent, child);
        let pos = self.slots[parent.index()]
            .children
            .iter()
            .position(|&c| c == anchor)
            .unwrap_or_else(|| panic!("insert_before anchor {anchor:?} is not a child of {parent:?}"));
        self.slots[child.index()].parent = Some(parent);
        self.slots[child.index()].role = role;
        self.slots[parent.index()].children.insert(pos, child);
    }

    fn pre_attach_checks(&self, parent: NodeId, child: NodeId) {
        assert!(
            !self.is_null(child),
            "cannot attach a null sentinel ({:?})",
            self.kind(child)
        );
        assert!(
            self.slots[child.index()].parent.is_none(),
            "node {child:?} already has a parent; detach it first"
        );
        assert_ne!(parent, child, "cannot attach a node to itself");
    }

    /// Detach `id` from its parent, making it an independent root.
    /// Detaching a root is a no-op. Returns `id` for chaining.
    pub fn detach(&mut self, id: NodeId) -> NodeId {
        assert!(!self.is_null(id), "cannot detach a null sentinel");
        if let Some(parent) = self.slots[id.index()].parent.take() {
            let children = &mut self.slots[parent.index()].children;
            let pos = children
                .iter()
                .position(|&c| c == id)
                .expect("child missing from its parent's child list");
            children.remove(pos);
        }
        id
    }

    /// Replace attached node `old` with detached node `new`, keeping `old`'s
    /// position and role. `old` becomes an independent root and is returned.
    ///
    /// Panics if `old` is a root or `new` is attached.
    pub fn replace(&mut self, old: NodeId, new: NodeId) -> NodeId {
        assert!(!self.is_null(old) && !self.is_null(new), "cannot replace null sentinels");
        assert!(
            self.slots[new.index()].parent.is_none(),
            "replacement node {new:?} already has a parent"
        );
        let parent = self.slots[old.index()]
            .parent
            .unwrap_or_else(|| panic!("cannot replace detached node {old:?}"));
        let role = self.slots[old.index()].role;
        let pos = self.slots[parent.index()]
            .children
            .iter()
            .position(|&c| c == old)
            .expect("child missing from its parent's child list");
        self.slots[parent.index()].children[pos] = new;
        self.slots[old.index()].parent = None;
        self.slots[new.index()].parent = Some(parent);
        self.slots[new.index()].role = role;
        old
    }

    // ───────────────────────────────────────────────────────────────────────
    // Traversal and diagnostics
    // ───────────────────────────────────────────────────────────────────────

    /// Pre-order, left-to-right traversal of the subtree at `root`.
    ///
    /// Collected into a `Vec` so callers may rewrite the tree while walking
    /// the snapshot; rewritten regions are skipped via
    /// [`Arena::is_reachable_from`].
    pub fn preorder(&self, root: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            out.push(id);
            // Reverse so the leftmost child is popped first.
            for &child in self.slots[id.index()].children.iter().rev() {
                stack.push(child);
            }
        }
        out
    }

    /// Render the subtree at `root` as an indented structural dump.
    ///
    /// Diagnostic aid only; final text rendering belongs to a downstream
    /// formatter.
    pub fn dump(&self, root: NodeId) -> String {
        let mut out = String::new();
        self.dump_into(root, 0, &mut out);
        out
    }

    fn dump_into(&self, id: NodeId, depth: usize, out: &mut String) {
        for _ in 0..depth {
            out.push_str("  ");
        }
        if depth > 0 {
            out.push_str(&format!("{:?}: ", self.role(id)));
        }
        out.push_str(&format!("{:?}\n", self.data(id)));
        for &child in self.children(id) {
            self.dump_into(child, depth + 1, out);
        }
    }
}

impl Default for Arena {
    fn default() -> Self {
        Self::new()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════
